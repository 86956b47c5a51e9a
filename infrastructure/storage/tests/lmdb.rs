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

use std::ops::Bound;

use handsel_storage::{KeyValueStore, LmdbStore, MemoryStore, WriteBatch};
use handsel_test_utils::paths::create_temporary_data_path;

fn contract_suite<S: KeyValueStore>(store: &S) {
    // Point operations
    assert!(store.get(b"k1").unwrap().is_none());
    store.put(b"k1", b"v1").unwrap();
    assert_eq!(store.get(b"k1").unwrap().unwrap(), b"v1");
    store.put(b"k1", b"v2").unwrap();
    assert_eq!(store.get(b"k1").unwrap().unwrap(), b"v2");
    store.delete(b"k1").unwrap();
    assert!(store.get(b"k1").unwrap().is_none());
    // Deleting a missing key is a no-op
    store.delete(b"k1").unwrap();

    // Atomic batches
    let mut batch = WriteBatch::new();
    for i in 0u8..10 {
        batch.put([b'a', i], [i]);
    }
    batch.delete([b'a', 3u8]);
    store.write(batch).unwrap();
    assert!(store.get(&[b'a', 3]).unwrap().is_none());
    assert_eq!(store.get(&[b'a', 7]).unwrap().unwrap(), [7]);

    // Ordered range iteration, inclusive bounds
    let hits = store
        .range(Bound::Included(&[b'a', 2][..]), Bound::Included(&[b'a', 6][..]))
        .unwrap();
    let keys: Vec<_> = hits.iter().map(|(k, _)| k.clone()).collect();
    assert_eq!(keys, vec![vec![b'a', 2], vec![b'a', 4], vec![b'a', 5], vec![b'a', 6]]);

    // Exclusive bounds
    let hits = store
        .range(Bound::Excluded(&[b'a', 2][..]), Bound::Excluded(&[b'a', 6][..]))
        .unwrap();
    assert_eq!(hits.first().unwrap().0, vec![b'a', 4]);
    assert_eq!(hits.last().unwrap().0, vec![b'a', 5]);

    // Prefix scans stay inside the prefix
    store.put(b"b0", b"other").unwrap();
    let hits = store.scan_prefix(b"a").unwrap();
    assert_eq!(hits.len(), 9);
    assert!(hits.iter().all(|(k, _)| k[0] == b'a'));
}

#[test]
fn memory_store_contract() {
    let store = MemoryStore::new();
    contract_suite(&store);
}

#[test]
fn lmdb_store_contract() {
    let path = create_temporary_data_path();
    let store = LmdbStore::open(&path).unwrap();
    contract_suite(&store);
    std::fs::remove_dir_all(path).unwrap();
}

#[test]
fn lmdb_store_persists_across_reopen() {
    let path = create_temporary_data_path();
    {
        let store = LmdbStore::open(&path).unwrap();
        store.put(b"persist", b"yes").unwrap();
    }
    {
        let store = LmdbStore::open(&path).unwrap();
        assert_eq!(store.get(b"persist").unwrap().unwrap(), b"yes");
    }
    std::fs::remove_dir_all(path).unwrap();
}
