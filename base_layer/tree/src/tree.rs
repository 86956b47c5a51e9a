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

use std::collections::{BTreeMap, HashMap, HashSet};

use borsh::{BorshDeserialize, BorshSerialize};
use handsel_common_types::types::FixedHash;
use handsel_shutdown::ShutdownSignal;
use handsel_storage::{KeyValueStore, WriteBatch};
use log::*;

use crate::{
    error::TreeError,
    node::{key_bit, Node, EMPTY_ROOT},
};

const LOG_TARGET: &str = "tree";

const META_TAG: u8 = b'm';
const ROOT_TAG: u8 = b'r';
const NODE_TAG: u8 = b'n';

/// Nodes swept per batch during compaction, with a cancellation check in between.
const COMPACTION_BATCH_SIZE: usize = 4096;

/// Persistent bookkeeping for the tree, stored under a single meta key.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TreeMeta {
    pub committed_root: FixedHash,
    /// Number of commits so far; also the next root log index.
    pub root_count: u64,
    /// Root log index the last compaction retained from.
    pub compaction_index: u64,
    pub compaction_root: FixedHash,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompactStats {
    pub nodes_deleted: usize,
    pub roots_deleted: usize,
}

/// The authenticated name tree. See the crate docs for the storage model.
///
/// All mutating operations are `&mut self`; the chain database serializes access. The
/// committed root only changes in [Tree::commit] and [Tree::inject], and both stage their
/// persistent effects into a caller-supplied batch so a block's tree effects land atomically
/// with the rest of the block.
pub struct Tree<S> {
    store: S,
    prefix: Vec<u8>,
    meta: TreeMeta,
    pending: BTreeMap<FixedHash, Option<Vec<u8>>>,
}

impl<S: KeyValueStore> Tree<S> {
    pub fn open(store: S, prefix: Vec<u8>) -> Result<Self, TreeError> {
        let meta_key = meta_key(&prefix);
        let meta = match store.get(&meta_key)? {
            Some(bytes) => TreeMeta::try_from_slice(&bytes).map_err(|e| TreeError::Corrupt(e.to_string()))?,
            None => TreeMeta::default(),
        };
        Ok(Self {
            store,
            prefix,
            meta,
            pending: BTreeMap::new(),
        })
    }

    pub fn root(&self) -> FixedHash {
        self.meta.committed_root
    }

    pub fn root_count(&self) -> u64 {
        self.meta.root_count
    }

    pub fn compaction_root(&self) -> FixedHash {
        self.meta.compaction_root
    }

    pub fn meta(&self) -> &TreeMeta {
        &self.meta
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Queue an insert. Takes effect at the next [Tree::commit].
    pub fn insert(&mut self, key: FixedHash, value: Vec<u8>) {
        self.pending.insert(key, Some(value));
    }

    /// Queue a removal. Takes effect at the next [Tree::commit].
    pub fn remove(&mut self, key: FixedHash) {
        self.pending.insert(key, None);
    }

    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Value of `key` at the committed root.
    pub fn get(&self, key: &FixedHash) -> Result<Option<Vec<u8>>, TreeError> {
        self.get_at(&self.meta.committed_root, key)
    }

    /// Value of `key` at a historical root. Fails with [TreeError::MissingNode] if the root
    /// or any node on the path was compacted away.
    pub fn get_at(&self, root: &FixedHash, key: &FixedHash) -> Result<Option<Vec<u8>>, TreeError> {
        let mut current = *root;
        let mut depth = 0usize;
        loop {
            if current == EMPTY_ROOT {
                return Ok(None);
            }
            match self.read_node(&current)? {
                Node::Leaf { key: leaf_key, value } => {
                    return Ok(if leaf_key == *key { Some(value) } else { None });
                },
                Node::Internal { left, right } => {
                    current = if key_bit(key, depth) == 0 { left } else { right };
                    depth += 1;
                },
            }
        }
    }

    /// Apply all pending operations, persist the new nodes, the new root log entry and the
    /// meta record into `batch`, and return the new committed root.
    pub fn commit(&mut self, batch: &mut WriteBatch) -> Result<FixedHash, TreeError> {
        let mut overlay: HashMap<FixedHash, Node> = HashMap::new();
        let mut root = self.meta.committed_root;
        let ops = std::mem::take(&mut self.pending);
        for (key, op) in &ops {
            root = match op {
                Some(value) => self.insert_into(&mut overlay, root, key, value.clone())?,
                None => self.remove_from(&mut overlay, root, key)?,
            };
        }
        for (hash, node) in &overlay {
            batch.put(self.node_key(hash), node.encode());
        }
        batch.put(self.root_key(self.meta.root_count), root.as_slice());
        self.meta.committed_root = root;
        self.meta.root_count += 1;
        batch.put(meta_key(&self.prefix), borsh::to_vec(&self.meta).expect("TreeMeta serialization cannot fail"));
        trace!(
            target: LOG_TARGET,
            "Committed tree root {} ({} ops, {} new nodes)",
            root,
            ops.len(),
            overlay.len()
        );
        Ok(root)
    }

    /// Restore a historical root, discarding any pending operations. The root must still be
    /// within the compaction-retained window. Root log entries after the restored root are
    /// dropped so the log keeps mirroring the chain that is actually connected.
    pub fn inject(&mut self, root: FixedHash, batch: &mut WriteBatch) -> Result<(), TreeError> {
        if root != EMPTY_ROOT && !self.store.exists(&self.node_key(&root))? {
            return Err(TreeError::MissingNode(root));
        }
        if let Some(index) = self
            .roots()?
            .iter()
            .rev()
            .find(|(_, r)| *r == root)
            .map(|(i, _)| *i)
        {
            for stale in index + 1..self.meta.root_count {
                batch.delete(self.root_key(stale));
            }
            self.meta.root_count = index + 1;
        }
        self.pending.clear();
        self.meta.committed_root = root;
        batch.put(meta_key(&self.prefix), borsh::to_vec(&self.meta).expect("TreeMeta serialization cannot fail"));
        debug!(target: LOG_TARGET, "Injected tree root {}", root);
        Ok(())
    }

    /// All root log entries as `(index, root)`, ascending.
    pub fn roots(&self) -> Result<Vec<(u64, FixedHash)>, TreeError> {
        let mut prefix = self.prefix.clone();
        prefix.push(ROOT_TAG);
        let mut out = Vec::new();
        for (key, value) in self.store.scan_prefix(&prefix)? {
            if key.len() != prefix.len() + 8 {
                return Err(TreeError::Corrupt("bad root log key".to_string()));
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&key[prefix.len()..]);
            let root =
                FixedHash::try_from(value.as_slice()).map_err(|_| TreeError::Corrupt("bad root log value".to_string()))?;
            out.push((u64::from_be_bytes(raw), root));
        }
        Ok(out)
    }

    /// Number of stored nodes. Compaction idempotence is observable through this.
    pub fn node_count(&self) -> Result<usize, TreeError> {
        let mut prefix = self.prefix.clone();
        prefix.push(NODE_TAG);
        Ok(self.store.scan_prefix(&prefix)?.len())
    }

    /// Discard every node not reachable from a root at or after `retain_root`, and every
    /// root log entry before it. Idempotent: compacting again with the same root deletes
    /// nothing. Writes its own batches and checks `signal` between them.
    pub fn compact(&mut self, retain_root: FixedHash, signal: &ShutdownSignal) -> Result<CompactStats, TreeError> {
        let roots = self.roots()?;
        let retain_index = roots
            .iter()
            .rev()
            .find(|(_, r)| *r == retain_root)
            .map(|(i, _)| *i)
            .ok_or(TreeError::MissingRoot(retain_root))?;

        // Mark phase: everything reachable from retained roots, plus the live root.
        let mut reachable: HashSet<FixedHash> = HashSet::new();
        let mut stack: Vec<FixedHash> = roots
            .iter()
            .filter(|(i, _)| *i >= retain_index)
            .map(|(_, r)| *r)
            .chain(std::iter::once(self.meta.committed_root))
            .filter(|r| *r != EMPTY_ROOT)
            .collect();
        while let Some(hash) = stack.pop() {
            if !reachable.insert(hash) {
                continue;
            }
            match self.read_node(&hash)? {
                Node::Leaf { .. } => {},
                Node::Internal { left, right } => {
                    if left != EMPTY_ROOT {
                        stack.push(left);
                    }
                    if right != EMPTY_ROOT {
                        stack.push(right);
                    }
                },
            }
        }

        // Sweep phase, in bounded batches.
        let mut node_prefix = self.prefix.clone();
        node_prefix.push(NODE_TAG);
        let mut stats = CompactStats::default();
        let mut batch = WriteBatch::new();
        for (key, _) in self.store.scan_prefix(&node_prefix)? {
            let hash = FixedHash::try_from(&key[node_prefix.len()..])
                .map_err(|_| TreeError::Corrupt("bad node key".to_string()))?;
            if !reachable.contains(&hash) {
                batch.delete(key);
                stats.nodes_deleted += 1;
                if batch.len() >= COMPACTION_BATCH_SIZE {
                    self.store.write(std::mem::take(&mut batch))?;
                    if signal.is_triggered() {
                        return Err(TreeError::Cancelled);
                    }
                }
            }
        }
        for (index, _) in roots.iter().filter(|(i, _)| *i < retain_index) {
            batch.delete(self.root_key(*index));
            stats.roots_deleted += 1;
        }
        self.meta.compaction_index = retain_index;
        self.meta.compaction_root = retain_root;
        batch.put(meta_key(&self.prefix), borsh::to_vec(&self.meta).expect("TreeMeta serialization cannot fail"));
        self.store.write(batch)?;
        info!(
            target: LOG_TARGET,
            "Tree compacted to root {} (index {}): {} node(s), {} root log entr(ies) deleted",
            retain_root,
            retain_index,
            stats.nodes_deleted,
            stats.roots_deleted
        );
        Ok(stats)
    }

    /// Wipe the tree entirely. Used by archival reconstruction before replaying history.
    pub fn clear(&mut self, signal: &ShutdownSignal) -> Result<(), TreeError> {
        let mut batch = WriteBatch::new();
        for (key, _) in self.store.scan_prefix(&self.prefix)? {
            batch.delete(key);
            if batch.len() >= COMPACTION_BATCH_SIZE {
                self.store.write(std::mem::take(&mut batch))?;
                if signal.is_triggered() {
                    return Err(TreeError::Cancelled);
                }
            }
        }
        self.store.write(batch)?;
        self.meta = TreeMeta::default();
        self.pending.clear();
        Ok(())
    }

    fn insert_into(
        &self,
        overlay: &mut HashMap<FixedHash, Node>,
        root: FixedHash,
        key: &FixedHash,
        value: Vec<u8>,
    ) -> Result<FixedHash, TreeError> {
        let mut path: Vec<(FixedHash, u8)> = Vec::new();
        let mut depth = 0usize;
        let mut current = root;
        let bottom;
        loop {
            if current == EMPTY_ROOT {
                bottom = stage(overlay, Node::Leaf { key: *key, value });
                break;
            }
            match self.read_node_with(overlay, &current)? {
                Node::Leaf {
                    key: leaf_key,
                    value: _,
                } => {
                    if leaf_key == *key {
                        bottom = stage(overlay, Node::Leaf { key: *key, value });
                    } else {
                        // Split: pad internals along the shared prefix down to the first
                        // diverging bit, where both leaves hang.
                        let new_leaf = stage(overlay, Node::Leaf { key: *key, value });
                        let old_leaf = current;
                        let mut diverge = depth;
                        while key_bit(key, diverge) == key_bit(&leaf_key, diverge) {
                            diverge += 1;
                        }
                        let (left, right) = if key_bit(key, diverge) == 0 {
                            (new_leaf, old_leaf)
                        } else {
                            (old_leaf, new_leaf)
                        };
                        let mut node_hash = stage(overlay, Node::Internal { left, right });
                        let mut level = diverge;
                        while level > depth {
                            level -= 1;
                            node_hash = if key_bit(key, level) == 0 {
                                stage(overlay, Node::Internal {
                                    left: node_hash,
                                    right: EMPTY_ROOT,
                                })
                            } else {
                                stage(overlay, Node::Internal {
                                    left: EMPTY_ROOT,
                                    right: node_hash,
                                })
                            };
                        }
                        bottom = node_hash;
                    }
                    break;
                },
                Node::Internal { left, right } => {
                    let dir = key_bit(key, depth);
                    let (next, sibling) = if dir == 0 { (left, right) } else { (right, left) };
                    path.push((sibling, dir));
                    current = next;
                    depth += 1;
                },
            }
        }
        let mut node_hash = bottom;
        for (sibling, dir) in path.into_iter().rev() {
            node_hash = if dir == 0 {
                stage(overlay, Node::Internal {
                    left: node_hash,
                    right: sibling,
                })
            } else {
                stage(overlay, Node::Internal {
                    left: sibling,
                    right: node_hash,
                })
            };
        }
        Ok(node_hash)
    }

    fn remove_from(
        &self,
        overlay: &mut HashMap<FixedHash, Node>,
        root: FixedHash,
        key: &FixedHash,
    ) -> Result<FixedHash, TreeError> {
        let mut path: Vec<(FixedHash, u8)> = Vec::new();
        let mut depth = 0usize;
        let mut current = root;
        loop {
            if current == EMPTY_ROOT {
                return Ok(root);
            }
            match self.read_node_with(overlay, &current)? {
                Node::Leaf { key: leaf_key, .. } => {
                    if leaf_key != *key {
                        return Ok(root);
                    }
                    break;
                },
                Node::Internal { left, right } => {
                    let dir = key_bit(key, depth);
                    let (next, sibling) = if dir == 0 { (left, right) } else { (right, left) };
                    path.push((sibling, dir));
                    current = next;
                    depth += 1;
                },
            }
        }
        // Rebuild upward. A lone leaf collapses toward the root until it meets a non-empty
        // sibling, keeping the structure canonical.
        let mut node_hash = EMPTY_ROOT;
        for (sibling, dir) in path.into_iter().rev() {
            if node_hash == EMPTY_ROOT && sibling == EMPTY_ROOT {
                continue;
            }
            if node_hash == EMPTY_ROOT && self.is_leaf(overlay, &sibling)? {
                node_hash = sibling;
                continue;
            }
            if sibling == EMPTY_ROOT && node_hash != EMPTY_ROOT && self.is_leaf(overlay, &node_hash)? {
                continue;
            }
            node_hash = if dir == 0 {
                stage(overlay, Node::Internal {
                    left: node_hash,
                    right: sibling,
                })
            } else {
                stage(overlay, Node::Internal {
                    left: sibling,
                    right: node_hash,
                })
            };
        }
        Ok(node_hash)
    }

    fn is_leaf(&self, overlay: &HashMap<FixedHash, Node>, hash: &FixedHash) -> Result<bool, TreeError> {
        Ok(self.read_node_with(overlay, hash)?.is_leaf())
    }

    fn read_node(&self, hash: &FixedHash) -> Result<Node, TreeError> {
        let bytes = self
            .store
            .get(&self.node_key(hash))?
            .ok_or(TreeError::MissingNode(*hash))?;
        Node::decode(&bytes).map_err(|e| TreeError::Corrupt(e.to_string()))
    }

    fn read_node_with(&self, overlay: &HashMap<FixedHash, Node>, hash: &FixedHash) -> Result<Node, TreeError> {
        if let Some(node) = overlay.get(hash) {
            return Ok(node.clone());
        }
        self.read_node(hash)
    }

    fn node_key(&self, hash: &FixedHash) -> Vec<u8> {
        let mut key = self.prefix.clone();
        key.push(NODE_TAG);
        key.extend_from_slice(hash.as_slice());
        key
    }

    fn root_key(&self, index: u64) -> Vec<u8> {
        let mut key = self.prefix.clone();
        key.push(ROOT_TAG);
        key.extend_from_slice(&index.to_be_bytes());
        key
    }
}

fn stage(overlay: &mut HashMap<FixedHash, Node>, node: Node) -> FixedHash {
    let hash = node.hash();
    overlay.insert(hash, node);
    hash
}

fn meta_key(prefix: &[u8]) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.push(META_TAG);
    key
}
