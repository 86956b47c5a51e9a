// Copyright 2022. The Handsel Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use handsel_common_types::types::FixedHash;
use handsel_shutdown::ShutdownSignal;
use handsel_storage::{KeyValueStore, MemoryStore, WriteBatch};
use handsel_tree::{Tree, TreeError, EMPTY_ROOT};

fn open_tree(store: &MemoryStore) -> Tree<MemoryStore> {
    Tree::open(store.clone(), b"k".to_vec()).unwrap()
}

fn key(n: u8) -> FixedHash {
    FixedHash::from([n; 32])
}

fn commit(tree: &mut Tree<MemoryStore>, store: &MemoryStore) -> FixedHash {
    let mut batch = WriteBatch::new();
    let root = tree.commit(&mut batch).unwrap();
    store.write(batch).unwrap();
    root
}

#[test]
fn empty_tree_has_zero_root() {
    let store = MemoryStore::new();
    let tree = open_tree(&store);
    assert_eq!(tree.root(), EMPTY_ROOT);
    assert!(tree.get(&key(1)).unwrap().is_none());
}

#[test]
fn insert_and_get_after_commit() {
    let store = MemoryStore::new();
    let mut tree = open_tree(&store);
    tree.insert(key(1), b"one".to_vec());
    tree.insert(key(2), b"two".to_vec());
    // Pending operations do not affect the committed view
    assert!(tree.get(&key(1)).unwrap().is_none());
    let root = commit(&mut tree, &store);
    assert_ne!(root, EMPTY_ROOT);
    assert_eq!(tree.get(&key(1)).unwrap().unwrap(), b"one");
    assert_eq!(tree.get(&key(2)).unwrap().unwrap(), b"two");
    assert!(tree.get(&key(3)).unwrap().is_none());
}

#[test]
fn equal_contents_hash_to_equal_roots() {
    let store1 = MemoryStore::new();
    let mut tree1 = open_tree(&store1);
    for i in 1..=5u8 {
        tree1.insert(key(i), vec![i]);
    }
    let root1 = commit(&mut tree1, &store1);

    // Same contents arrived at through inserts, removals and replacements
    let store2 = MemoryStore::new();
    let mut tree2 = open_tree(&store2);
    for i in 1..=7u8 {
        tree2.insert(key(i), vec![0xff]);
    }
    commit(&mut tree2, &store2);
    tree2.remove(key(6));
    tree2.remove(key(7));
    for i in 1..=5u8 {
        tree2.insert(key(i), vec![i]);
    }
    let root2 = commit(&mut tree2, &store2);
    assert_eq!(root1, root2);
}

#[test]
fn removal_of_last_key_returns_to_empty_root() {
    let store = MemoryStore::new();
    let mut tree = open_tree(&store);
    tree.insert(key(1), b"one".to_vec());
    commit(&mut tree, &store);
    tree.remove(key(1));
    let root = commit(&mut tree, &store);
    assert_eq!(root, EMPTY_ROOT);
}

#[test]
fn historical_roots_stay_readable() {
    let store = MemoryStore::new();
    let mut tree = open_tree(&store);
    let mut roots = Vec::new();
    for i in 0..10u8 {
        tree.insert(key(1), vec![i]);
        roots.push(commit(&mut tree, &store));
    }
    for (i, root) in roots.iter().enumerate() {
        assert_eq!(tree.get_at(root, &key(1)).unwrap().unwrap(), vec![i as u8]);
    }
}

#[test]
fn inject_restores_a_prior_root() {
    let store = MemoryStore::new();
    let mut tree = open_tree(&store);
    tree.insert(key(1), b"v1".to_vec());
    let root1 = commit(&mut tree, &store);
    tree.insert(key(1), b"v2".to_vec());
    tree.insert(key(9), b"nine".to_vec());
    commit(&mut tree, &store);

    let mut batch = WriteBatch::new();
    tree.inject(root1, &mut batch).unwrap();
    store.write(batch).unwrap();
    assert_eq!(tree.root(), root1);
    assert_eq!(tree.get(&key(1)).unwrap().unwrap(), b"v1");
    assert!(tree.get(&key(9)).unwrap().is_none());

    // Committing after the rewind continues the root log from the restored point
    tree.insert(key(5), b"five".to_vec());
    let root3 = commit(&mut tree, &store);
    let log = tree.roots().unwrap();
    assert_eq!(log.last().unwrap().1, root3);
    assert_eq!(log.len(), 2);
}

#[test]
fn inject_discards_pending_operations() {
    let store = MemoryStore::new();
    let mut tree = open_tree(&store);
    tree.insert(key(1), b"v1".to_vec());
    let root1 = commit(&mut tree, &store);
    tree.insert(key(2), b"junk".to_vec());
    assert!(tree.has_pending());
    let mut batch = WriteBatch::new();
    tree.inject(root1, &mut batch).unwrap();
    store.write(batch).unwrap();
    assert!(!tree.has_pending());
}

#[test]
fn compaction_keeps_the_retained_window() {
    let store = MemoryStore::new();
    let mut tree = open_tree(&store);
    let name = key(42);
    let mut roots = Vec::new();
    for i in 1..=20u8 {
        tree.insert(name, vec![i]);
        roots.push(commit(&mut tree, &store));
    }
    // Retain the last 8 roots: indices 12..=19 (values 13..=20)
    let retain = roots[12];
    let stats = tree.compact(retain, &ShutdownSignal::never()).unwrap();
    assert!(stats.nodes_deleted > 0);
    assert_eq!(stats.roots_deleted, 12);

    for (i, root) in roots.iter().enumerate().take(12) {
        let mut batch = WriteBatch::new();
        match tree.inject(*root, &mut batch) {
            Err(TreeError::MissingNode(missing)) => assert_eq!(missing, *root),
            other => panic!("expected MissingNode for root {}, got {:?}", i, other.map(|_| ())),
        }
    }
    for (i, root) in roots.iter().enumerate().skip(12) {
        assert_eq!(tree.get_at(root, &name).unwrap().unwrap(), vec![i as u8 + 1]);
        let mut batch = WriteBatch::new();
        tree.inject(*root, &mut batch).unwrap();
        store.write(batch).unwrap();
        assert_eq!(tree.get(&name).unwrap().unwrap(), vec![i as u8 + 1]);
    }
}

#[test]
fn compaction_is_idempotent() {
    let store = MemoryStore::new();
    let mut tree = open_tree(&store);
    for i in 1..=20u8 {
        tree.insert(key(i), vec![i]);
        commit(&mut tree, &store);
    }
    let retain = tree.roots().unwrap()[12].1;
    tree.compact(retain, &ShutdownSignal::never()).unwrap();
    let nodes_after_first = tree.node_count().unwrap();
    let keys_after_first = store.count().unwrap();

    let stats = tree.compact(retain, &ShutdownSignal::never()).unwrap();
    assert_eq!(stats.nodes_deleted, 0);
    assert_eq!(stats.roots_deleted, 0);
    assert_eq!(tree.node_count().unwrap(), nodes_after_first);
    assert_eq!(store.count().unwrap(), keys_after_first);
}

#[test]
fn compacting_an_unknown_root_fails() {
    let store = MemoryStore::new();
    let mut tree = open_tree(&store);
    tree.insert(key(1), b"one".to_vec());
    commit(&mut tree, &store);
    let err = tree.compact(key(99), &ShutdownSignal::never()).unwrap_err();
    assert!(matches!(err, TreeError::MissingRoot(_)));
}

#[test]
fn meta_survives_reopen() {
    let store = MemoryStore::new();
    let mut tree = open_tree(&store);
    tree.insert(key(7), b"seven".to_vec());
    let root = commit(&mut tree, &store);
    drop(tree);

    let tree = open_tree(&store);
    assert_eq!(tree.root(), root);
    assert_eq!(tree.root_count(), 1);
    assert_eq!(tree.get(&key(7)).unwrap().unwrap(), b"seven");
}

#[test]
fn clear_wipes_everything() {
    let store = MemoryStore::new();
    let mut tree = open_tree(&store);
    for i in 1..=5u8 {
        tree.insert(key(i), vec![i]);
    }
    commit(&mut tree, &store);
    tree.clear(&ShutdownSignal::never()).unwrap();
    assert_eq!(tree.root(), EMPTY_ROOT);
    assert_eq!(tree.root_count(), 0);
    assert_eq!(tree.node_count().unwrap(), 0);
    assert!(tree.roots().unwrap().is_empty());
}

#[test]
fn dense_keys_split_and_collapse_correctly() {
    // Keys differing only in the last bit exercise the deep padding chains
    let mut a = [0u8; 32];
    a[31] = 0b0000_0000;
    let mut b = [0u8; 32];
    b[31] = 0b0000_0001;
    let (a, b) = (FixedHash::from(a), FixedHash::from(b));

    let store = MemoryStore::new();
    let mut tree = open_tree(&store);
    tree.insert(a, b"a".to_vec());
    commit(&mut tree, &store);
    let root_single = tree.root();

    tree.insert(b, b"b".to_vec());
    commit(&mut tree, &store);
    assert_eq!(tree.get(&a).unwrap().unwrap(), b"a");
    assert_eq!(tree.get(&b).unwrap().unwrap(), b"b");

    tree.remove(b);
    let root = commit(&mut tree, &store);
    assert_eq!(root, root_single);
    assert_eq!(tree.get(&a).unwrap().unwrap(), b"a");
    assert!(tree.get(&b).unwrap().is_none());
}
