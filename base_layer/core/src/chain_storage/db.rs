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

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use handsel_common::{ChainConfig, NetworkParams};
use handsel_common_types::{
    types::{BlockHash, FixedHash, NameHash, Txid},
    OutPoint,
};
use handsel_shutdown::ShutdownSignal;
use handsel_storage::{
    migration::{MigrationOptions, Migrator},
    KeyValueStore,
    WriteBatch,
};
use handsel_tree::Tree;
use log::*;
use tokio::sync::broadcast;

use crate::{
    blocks::{genesis_block, Block, ChainEntry},
    chain_storage::{
        error::ChainStorageError,
        events::ChainEvent,
        keys,
        migrations,
        state::{ChainOptions, ChainState, TreeState},
    },
    name_state::{NameState, NameStatus, NameUndo, NameView},
    transactions::{Coin, TxRecord, UndoCoins},
    validation::{HeaderValidator, ValidationError},
};

const LOG_TARGET: &str = "c::cs::database";

/// Broadcast buffer for chain events. A lagging wallet gets a `Lagged` error and rescans.
const EVENT_CHANNEL_SIZE: usize = 1024;

/// Outcome of [ChainDatabase::add_block].
#[derive(Debug, Clone)]
pub enum BlockAddResult {
    /// Extended the main chain.
    Ok(ChainEntry),
    BlockExists,
    /// Stored on a side chain with less work than the main chain.
    SideChain(ChainEntry),
    /// The block made a side chain the heaviest; the main chain was reorganized onto it.
    ChainReorg {
        removed: Vec<ChainEntry>,
        added: Vec<ChainEntry>,
    },
}

impl BlockAddResult {
    pub fn assert_added(&self) -> ChainEntry {
        match self {
            BlockAddResult::Ok(entry) => entry.clone(),
            other => panic!("expected added block, got {:?}", other),
        }
    }

    pub fn assert_reorg(&self, removed: usize, added: usize) {
        match self {
            BlockAddResult::ChainReorg {
                removed: r,
                added: a,
            } => {
                assert_eq!(r.len(), removed, "reorg removed {} blocks, expected {}", r.len(), removed);
                assert_eq!(a.len(), added, "reorg added {} blocks, expected {}", a.len(), added);
            },
            other => panic!("expected reorg, got {:?}", other),
        }
    }
}

/// The chain database: block entries, the UTXO set with undo data, name states and the
/// authenticated name tree, all in one prefix-partitioned ordered store.
///
/// All effects of one block land in one atomic batch. Connect/disconnect are serialized
/// under an exclusive lock; reads take a shared lock.
pub struct ChainDatabase<S>
where S: KeyValueStore + Clone + 'static
{
    inner: Arc<RwLock<Inner<S>>>,
    params: NetworkParams,
    events: broadcast::Sender<ChainEvent>,
}

impl<S> Clone for ChainDatabase<S>
where S: KeyValueStore + Clone + 'static
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            params: self.params.clone(),
            events: self.events.clone(),
        }
    }
}

struct Inner<S>
where S: KeyValueStore + Clone
{
    store: S,
    tree: Tree<S>,
    state: ChainState,
    params: NetworkParams,
    config: ChainConfig,
    validator: Arc<dyn HeaderValidator>,
    events: broadcast::Sender<ChainEvent>,
}

impl<S> ChainDatabase<S>
where S: KeyValueStore + Clone + 'static
{
    /// Run migrations, verify options, load (or create) the chain state and reconcile the
    /// tree with it.
    pub fn open(store: S, config: ChainConfig, validator: Arc<dyn HeaderValidator>) -> Result<Self, ChainStorageError> {
        let params = config.network.params();

        let mut opts = MigrationOptions::new("chain-migrate");
        opts.migrate = config.migrate;
        opts.prune = config.prune;
        opts.spv = config.spv;
        Migrator::open(&store, &migrations::registry(), &opts, ShutdownSignal::never())?;

        let options = ChainOptions {
            network: config.network.as_byte(),
            prune: config.prune,
            spv: config.spv,
        };
        match store.get(keys::KEY_OPTIONS)? {
            None => store.put(keys::KEY_OPTIONS, &options.encode())?,
            Some(bytes) => {
                let existing = ChainOptions::decode(&bytes).map_err(|e| ChainStorageError::Corrupt(e.to_string()))?;
                if existing.network != options.network {
                    return Err(ChainStorageError::ConfigMismatch(format!(
                        "store was created for network {}, configured {}",
                        existing.network, options.network
                    )));
                }
                if existing.prune != options.prune || existing.spv != options.spv {
                    store.put(keys::KEY_OPTIONS, &options.encode())?;
                }
            },
        }
        if store.get(keys::KEY_DEPLOYMENTS)?.is_none() {
            store.put(keys::KEY_DEPLOYMENTS, &0u32.to_le_bytes())?;
        }

        let tree = Tree::open(store.clone(), keys::TREE_PREFIX.to_vec())?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let mut inner = Inner {
            store,
            tree,
            state: ChainState::default(),
            params: params.clone(),
            config: config.clone(),
            validator,
            events: events.clone(),
        };

        match inner.store.get(keys::KEY_STATE)? {
            Some(bytes) => {
                inner.state = ChainState::decode(&bytes).map_err(|e| ChainStorageError::Corrupt(e.to_string()))?;
                inner.reconcile_tree()?;
            },
            None => {
                let genesis = genesis_block(config.network);
                info!(
                    target: LOG_TARGET,
                    "Initializing new {} chain with genesis {}",
                    config.network,
                    genesis.hash()
                );
                inner.connect(&genesis)?;
            },
        }

        if config.compact_tree_on_init {
            let tree_state = inner.read_tree_state()?;
            let since = inner.state.height.saturating_sub(tree_state.compaction_height);
            if inner.state.height >= params.compaction_keep_blocks && since >= config.compact_tree_init_interval {
                inner.compact_tree(&ShutdownSignal::never())?;
            }
        }

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
            params,
            events,
        })
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    fn read_access(&self) -> Result<RwLockReadGuard<'_, Inner<S>>, ChainStorageError> {
        self.inner
            .read()
            .map_err(|_| ChainStorageError::Corrupt("chain database lock poisoned".to_string()))
    }

    fn write_access(&self) -> Result<RwLockWriteGuard<'_, Inner<S>>, ChainStorageError> {
        self.inner
            .write()
            .map_err(|_| ChainStorageError::Corrupt("chain database lock poisoned".to_string()))
    }

    /// Add a block: extend the main chain, store it on a side chain, or reorganize to it if
    /// it creates a heavier branch.
    pub fn add_block(&self, block: Block) -> Result<BlockAddResult, ChainStorageError> {
        let mut inner = self.write_access()?;
        let hash = block.hash();
        if let Some(entry) = inner.read_entry(&hash)? {
            if inner.main_chain_hash(entry.height)? == Some(entry.hash) {
                return Ok(BlockAddResult::BlockExists);
            }
            // A known block off the main chain (e.g. previously disconnected) competes on
            // accumulated work like any other side chain tip
            if entry.chainwork > inner.state.chainwork {
                let old_tip = inner.tip_entry()?;
                let (removed, added) = inner.reorganize(&entry)?;
                let _ = inner.events.send(ChainEvent::Reorganized {
                    old_tip,
                    new_tip: entry.clone(),
                });
                return Ok(BlockAddResult::ChainReorg { removed, added });
            }
            return Ok(BlockAddResult::SideChain(entry));
        }
        let prev = inner
            .read_entry(&block.header.prev_hash)?
            .ok_or(ChainStorageError::OrphanBlock(hash))?;
        inner.validator.validate(&block.header, &prev)?;

        if prev.hash == inner.state.tip {
            let entry = inner.connect(&block)?;
            return Ok(BlockAddResult::Ok(entry));
        }

        // Side chain: store the entry and block without touching state
        let entry = ChainEntry::from_header(&block.header, prev.chainwork);
        let mut batch = WriteBatch::new();
        batch.put(keys::entry(&entry.hash), entry.encode());
        batch.put(keys::height_by_hash(&entry.hash), entry.height.to_be_bytes());
        batch.put(keys::block(&entry.hash), block.encode());
        batch.put(keys::side_tip(&entry.hash), b"");
        batch.delete(keys::side_tip(&entry.prev_hash));
        inner.store.write(batch)?;
        debug!(
            target: LOG_TARGET,
            "Stored side chain block {} at height {} (work {} vs main {})",
            entry.hash,
            entry.height,
            entry.chainwork,
            inner.state.chainwork
        );

        if entry.chainwork > inner.state.chainwork {
            let old_tip = inner.tip_entry()?;
            let (removed, added) = inner.reorganize(&entry)?;
            let _ = inner.events.send(ChainEvent::Reorganized {
                old_tip,
                new_tip: added.last().cloned().unwrap_or_else(|| entry.clone()),
            });
            warn!(
                target: LOG_TARGET,
                "Chain reorganized: removed {} block(s), added {} block(s), new tip {}",
                removed.len(),
                added.len(),
                entry.hash
            );
            return Ok(BlockAddResult::ChainReorg { removed, added });
        }
        Ok(BlockAddResult::SideChain(entry))
    }

    /// Disconnect main chain blocks until the tip is at `height`. Returns the disconnected
    /// entries, tip first.
    pub fn rewind_to_height(&self, height: u64) -> Result<Vec<ChainEntry>, ChainStorageError> {
        let mut inner = self.write_access()?;
        if height > inner.state.height {
            return Err(ChainStorageError::not_found("Block", format!("height {}", height)));
        }
        let mut removed = Vec::new();
        while inner.state.height > height {
            let (entry, _) = inner.disconnect_tip()?;
            removed.push(entry);
        }
        Ok(removed)
    }

    pub fn state(&self) -> Result<ChainState, ChainStorageError> {
        Ok(self.read_access()?.state.clone())
    }

    pub fn tip_entry(&self) -> Result<ChainEntry, ChainStorageError> {
        self.read_access()?.tip_entry()
    }

    pub fn fetch_entry(&self, hash: &BlockHash) -> Result<ChainEntry, ChainStorageError> {
        self.read_access()?.entry_required(hash)
    }

    pub fn fetch_entry_by_height(&self, height: u64) -> Result<ChainEntry, ChainStorageError> {
        self.read_access()?.entry_by_height(height)
    }

    pub fn fetch_block(&self, hash: &BlockHash) -> Result<Block, ChainStorageError> {
        self.read_access()?.read_block(hash)
    }

    pub fn fetch_block_by_height(&self, height: u64) -> Result<Block, ChainStorageError> {
        let inner = self.read_access()?;
        let entry = inner.entry_by_height(height)?;
        inner.read_block(&entry.hash)
    }

    pub fn fetch_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, ChainStorageError> {
        self.read_access()?.read_coin(outpoint)
    }

    pub fn fetch_name_state(&self, hash: &NameHash) -> Result<Option<NameState>, ChainStorageError> {
        self.read_access()?.read_name(hash)
    }

    /// The name's state record and lifecycle status at the current tip. `None` is UNOWNED.
    pub fn name_status(&self, hash: &NameHash) -> Result<Option<(NameState, NameStatus)>, ChainStorageError> {
        let inner = self.read_access()?;
        match inner.read_name(hash)? {
            None => Ok(None),
            Some(ns) => {
                let status = ns.status(inner.state.height, &self.params);
                Ok(Some((ns, status)))
            },
        }
    }

    pub fn fetch_tx(&self, txid: &Txid) -> Result<Option<TxRecord>, ChainStorageError> {
        let inner = self.read_access()?;
        match inner.store.get(&keys::tx(txid))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(
                borsh::from_slice(&bytes).map_err(|e| ChainStorageError::Corrupt(e.to_string()))?,
            )),
        }
    }

    pub fn tree_root(&self) -> Result<FixedHash, ChainStorageError> {
        Ok(self.read_access()?.tree.root())
    }

    /// Committed tree value for a name. Lags the `A` record by up to one tree interval.
    pub fn tree_get(&self, hash: &NameHash) -> Result<Option<Vec<u8>>, ChainStorageError> {
        Ok(self.read_access()?.tree.get(hash)?)
    }

    pub fn tree_state(&self) -> Result<TreeState, ChainStorageError> {
        self.read_access()?.read_tree_state()
    }

    /// Discard tree history older than the compaction keep window.
    pub fn compact_tree(&self, signal: &ShutdownSignal) -> Result<(), ChainStorageError> {
        self.write_access()?.compact_tree(signal)
    }

    /// Rebuild the full tree history from block undo data. Archival nodes only.
    pub fn reconstruct_tree(&self, signal: &ShutdownSignal) -> Result<(), ChainStorageError> {
        self.write_access()?.reconstruct_tree(signal)
    }

    /// Verify that every name record equals its committed tree leaf. Meaningful directly
    /// after a tree commit, before further name operations.
    pub fn audit(&self) -> Result<(), ChainStorageError> {
        let inner = self.read_access()?;
        for (key, value) in inner.store.scan_prefix(keys::NAME_PREFIX)? {
            let hash = NameHash::try_from(&key[keys::NAME_PREFIX.len()..])
                .map_err(|_| ChainStorageError::Corrupt("bad name key".to_string()))?;
            match inner.tree.get(&hash)? {
                Some(leaf) if leaf == value => {},
                other => {
                    return Err(ChainStorageError::Corrupt(format!(
                        "name {} differs between the state table and the tree (leaf present: {})",
                        hash,
                        other.is_some()
                    )));
                },
            }
        }
        Ok(())
    }
}

impl<S> Inner<S>
where S: KeyValueStore + Clone
{
    fn read_entry(&self, hash: &BlockHash) -> Result<Option<ChainEntry>, ChainStorageError> {
        match self.store.get(&keys::entry(hash))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(
                ChainEntry::decode(&bytes).map_err(|e| ChainStorageError::Corrupt(e.to_string()))?,
            )),
        }
    }

    fn entry_required(&self, hash: &BlockHash) -> Result<ChainEntry, ChainStorageError> {
        self.read_entry(hash)?
            .ok_or_else(|| ChainStorageError::not_found("ChainEntry", hash))
    }

    fn tip_entry(&self) -> Result<ChainEntry, ChainStorageError> {
        self.entry_required(&self.state.tip)
    }

    fn main_chain_hash(&self, height: u64) -> Result<Option<BlockHash>, ChainStorageError> {
        match self.store.get(&keys::hash_by_height(height))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(
                BlockHash::try_from(bytes.as_slice())
                    .map_err(|_| ChainStorageError::Corrupt("bad height index value".to_string()))?,
            )),
        }
    }

    fn entry_by_height(&self, height: u64) -> Result<ChainEntry, ChainStorageError> {
        let hash = self
            .main_chain_hash(height)?
            .ok_or_else(|| ChainStorageError::not_found("ChainEntry", format!("height {}", height)))?;
        self.entry_required(&hash)
    }

    fn read_block(&self, hash: &BlockHash) -> Result<Block, ChainStorageError> {
        let bytes = self
            .store
            .get(&keys::block(hash))?
            .ok_or_else(|| ChainStorageError::not_found("Block", hash))?;
        Block::decode(&bytes).map_err(|e| ChainStorageError::Corrupt(e.to_string()))
    }

    fn read_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, ChainStorageError> {
        match self.store.get(&keys::coin(outpoint))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(
                Coin::decode(&bytes).map_err(|e| ChainStorageError::Corrupt(e.to_string()))?,
            )),
        }
    }

    fn read_name(&self, hash: &NameHash) -> Result<Option<NameState>, ChainStorageError> {
        match self.store.get(&keys::name(hash))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(
                NameState::decode(&bytes).map_err(|e| ChainStorageError::Corrupt(e.to_string()))?,
            )),
        }
    }

    fn read_undo(&self, hash: &BlockHash) -> Result<UndoCoins, ChainStorageError> {
        match self.store.get(&keys::undo(hash))? {
            None => Ok(UndoCoins::default()),
            Some(bytes) => UndoCoins::decode(&bytes).map_err(|e| ChainStorageError::Corrupt(e.to_string())),
        }
    }

    fn read_name_undo(&self, hash: &BlockHash) -> Result<NameUndo, ChainStorageError> {
        match self.store.get(&keys::name_undo(hash))? {
            None => Ok(NameUndo::default()),
            Some(bytes) => NameUndo::decode(&bytes).map_err(|e| ChainStorageError::Corrupt(e.to_string())),
        }
    }

    fn read_tree_state(&self) -> Result<TreeState, ChainStorageError> {
        match self.store.get(keys::KEY_TREE_STATE)? {
            None => Ok(TreeState::default()),
            Some(bytes) => TreeState::decode(&bytes).map_err(|e| ChainStorageError::Corrupt(e.to_string())),
        }
    }

    /// Outpoints spent by this block that were also created by it. They never reach the
    /// store and are excluded from undo data and totals.
    fn in_block_spends(block: &Block) -> (HashSet<Txid>, HashSet<OutPoint>) {
        let txids: HashSet<Txid> = block.transactions.iter().map(|tx| tx.txid()).collect();
        let mut spent = HashSet::new();
        for tx in &block.transactions {
            if tx.is_coinbase() {
                continue;
            }
            for input in &tx.inputs {
                if txids.contains(&input.prevout.hash) {
                    spent.insert(input.prevout);
                }
            }
        }
        (txids, spent)
    }

    /// Connect `block` on top of the current tip, composing every effect into one batch.
    fn connect(&mut self, block: &Block) -> Result<ChainEntry, ChainStorageError> {
        let header = &block.header;
        let height = header.height;
        let is_genesis = height == 0;
        let prev_chainwork = if is_genesis {
            0
        } else {
            self.entry_required(&header.prev_hash)?.chainwork
        };
        let mut entry = ChainEntry::from_header(header, prev_chainwork);

        let (_, in_block_spent) = Self::in_block_spends(block);
        let mut batch = WriteBatch::new();
        let mut undo = UndoCoins::default();
        let mut view = NameView::new();
        let mut created: BTreeMap<OutPoint, Coin> = BTreeMap::new();
        let mut spent_count = 0u64;
        let mut spent_value = 0u128;
        let mut burned = 0u128;

        for (tx_index, tx) in block.transactions.iter().enumerate() {
            let txid = tx.txid();
            let mut spent_by_index: Vec<Option<(OutPoint, Coin)>> = Vec::new();
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let prevout = input.prevout;
                    let coin = if in_block_spent.contains(&prevout) {
                        created
                            .remove(&prevout)
                            .ok_or(ValidationError::CoinNotFound(prevout))?
                    } else {
                        let coin = self
                            .read_coin(&prevout)?
                            .ok_or(ValidationError::CoinNotFound(prevout))?;
                        if coin.coinbase && height < coin.height + self.params.coinbase_maturity {
                            return Err(ValidationError::ImmatureCoinbaseSpend(prevout).into());
                        }
                        batch.delete(keys::coin(&prevout));
                        undo.push(prevout, coin.clone());
                        spent_count += 1;
                        spent_value += u128::from(coin.value);
                        coin
                    };
                    spent_by_index.push(Some((prevout, coin)));
                }
            }
            for (out_index, output) in tx.outputs.iter().enumerate() {
                let outpoint = OutPoint::new(txid, out_index as u32);
                if output.covenant.is_name_covenant() {
                    let hash = output.covenant.name_hash()?;
                    view.load_with(hash, || self.read_name(&hash))?;
                    let spent = spent_by_index
                        .get(out_index)
                        .and_then(|s| s.as_ref())
                        .map(|(p, c)| (*p, c));
                    view.apply(&self.params, height, outpoint, output, spent)?;
                    if output.covenant.covenant_type() == crate::covenants::CovenantType::Revoke {
                        burned += u128::from(output.value);
                    }
                }
                created.insert(outpoint, Coin::from_output(output, height, tx.is_coinbase()));
            }
            let record = TxRecord {
                tx: tx.clone(),
                block_hash: entry.hash,
                height,
                index: tx_index as u32,
            };
            batch.put(
                keys::tx(&txid),
                borsh::to_vec(&record).expect("TxRecord serialization cannot fail"),
            );
        }

        let mut created_count = 0u64;
        let mut created_value = 0u128;
        for (outpoint, coin) in &created {
            created_count += 1;
            created_value += u128::from(coin.value);
            batch.put(keys::coin(outpoint), coin.encode());
        }
        if !undo.is_empty() {
            batch.put(keys::undo(&entry.hash), undo.encode());
        }

        let (finals, name_undo) = view.into_parts();
        for (hash, state) in &finals {
            match state {
                Some(ns) => batch.put(keys::name(hash), ns.encode()),
                None => batch.delete(keys::name(hash)),
            }
        }
        if !name_undo.is_empty() {
            batch.put(keys::name_undo(&entry.hash), name_undo.encode());
        }

        // Tree commitment at interval boundaries: fold in every name touched since the
        // previous boundary and commit into the same batch.
        let mut committed_root = None;
        if height % self.params.tree_interval == 0 {
            let mut dirty: BTreeMap<NameHash, Option<NameState>> = finals.iter().cloned().collect();
            if height > 0 {
                let start = height - self.params.tree_interval + 1;
                for h in start..height {
                    let hash = self
                        .main_chain_hash(h)?
                        .ok_or_else(|| ChainStorageError::not_found("Block", format!("height {}", h)))?;
                    for name in self.read_name_undo(&hash)?.touched() {
                        if !dirty.contains_key(name) {
                            let current = self.read_name(name)?;
                            dirty.insert(*name, current);
                        }
                    }
                }
            }
            for (name, state) in dirty {
                match state {
                    Some(ns) => self.tree.insert(name, ns.encode()),
                    None => self.tree.remove(name),
                }
            }
            let root = self.tree.commit(&mut batch)?;
            entry.tree_root = root;
            let mut tree_state = self.read_tree_state()?;
            tree_state.tree_root = root;
            tree_state.commit_height = height;
            batch.put(keys::KEY_TREE_STATE, tree_state.encode());
            committed_root = Some(root);
        } else {
            entry.tree_root = self.tree.root();
        }

        batch.put(keys::entry(&entry.hash), entry.encode());
        batch.put(keys::height_by_hash(&entry.hash), height.to_be_bytes());
        batch.put(keys::hash_by_height(height), entry.hash.as_slice());
        if !is_genesis {
            batch.put(keys::next_hash(&header.prev_hash), entry.hash.as_slice());
        }
        batch.delete(keys::side_tip(&entry.hash));
        batch.put(keys::block(&entry.hash), block.encode());

        self.state.tip = entry.hash;
        self.state.height = height;
        self.state.chainwork = entry.chainwork;
        self.state.coin_count = self.state.coin_count + created_count - spent_count;
        self.state.total_value = self.state.total_value + created_value - spent_value;
        self.state.burned += burned;
        batch.put(keys::KEY_STATE, self.state.encode());

        self.store.write(batch)?;
        debug!(
            target: LOG_TARGET,
            "Connected block {} at height {} ({} tx(s), {} name(s) touched)",
            entry.hash,
            height,
            block.transactions.len(),
            name_undo.entries.len()
        );
        let _ = self.events.send(ChainEvent::Connected {
            entry: entry.clone(),
            block: Arc::new(block.clone()),
        });
        if let Some(root) = committed_root {
            let _ = self.events.send(ChainEvent::TreeCommit { root, height });
        }
        Ok(entry)
    }

    /// Disconnect the tip block, reversing every effect in one batch.
    fn disconnect_tip(&mut self) -> Result<(ChainEntry, Arc<Block>), ChainStorageError> {
        let entry = self.tip_entry()?;
        if entry.height == 0 {
            return Err(ChainStorageError::Corrupt("cannot disconnect the genesis block".to_string()));
        }
        let block = self.read_block(&entry.hash)?;
        let prev = self.entry_required(&entry.prev_hash)?;
        let (_, in_block_spent) = Self::in_block_spends(&block);

        let mut batch = WriteBatch::new();
        let mut created_count = 0u64;
        let mut created_value = 0u128;
        let mut burned = 0u128;
        for tx in &block.transactions {
            let txid = tx.txid();
            for (out_index, output) in tx.outputs.iter().enumerate() {
                let outpoint = OutPoint::new(txid, out_index as u32);
                if in_block_spent.contains(&outpoint) {
                    continue;
                }
                batch.delete(keys::coin(&outpoint));
                created_count += 1;
                created_value += u128::from(output.value);
                if output.covenant.covenant_type() == crate::covenants::CovenantType::Revoke {
                    burned += u128::from(output.value);
                }
            }
            batch.delete(keys::tx(&txid));
        }

        let undo = self.read_undo(&entry.hash)?;
        let mut spent_count = 0u64;
        let mut spent_value = 0u128;
        for (outpoint, coin) in &undo.spent {
            batch.put(keys::coin(outpoint), coin.encode());
            spent_count += 1;
            spent_value += u128::from(coin.value);
        }
        batch.delete(keys::undo(&entry.hash));

        let name_undo = self.read_name_undo(&entry.hash)?;
        for (hash, prior) in name_undo.entries.iter().rev() {
            match prior {
                Some(ns) => batch.put(keys::name(hash), ns.encode()),
                None => batch.delete(keys::name(hash)),
            }
        }
        batch.delete(keys::name_undo(&entry.hash));

        batch.delete(keys::hash_by_height(entry.height));
        batch.delete(keys::next_hash(&prev.hash));
        batch.put(keys::side_tip(&entry.hash), b"");

        // Rewinding across a tree interval boundary restores the previous committed root,
        // which must still be within the compaction-retained window
        if entry.height % self.params.tree_interval == 0 {
            self.tree.inject(prev.tree_root, &mut batch)?;
            let mut tree_state = self.read_tree_state()?;
            tree_state.tree_root = prev.tree_root;
            tree_state.commit_height = self.params.last_tree_boundary(prev.height);
            batch.put(keys::KEY_TREE_STATE, tree_state.encode());
        }

        self.state.tip = prev.hash;
        self.state.height = prev.height;
        self.state.chainwork = prev.chainwork;
        self.state.coin_count = self.state.coin_count + spent_count - created_count;
        self.state.total_value = self.state.total_value + spent_value - created_value;
        self.state.burned -= burned;
        batch.put(keys::KEY_STATE, self.state.encode());

        self.store.write(batch)?;
        debug!(
            target: LOG_TARGET,
            "Disconnected block {} at height {}", entry.hash, entry.height
        );
        let block = Arc::new(block);
        let _ = self.events.send(ChainEvent::Disconnected {
            entry: entry.clone(),
            block: block.clone(),
        });
        Ok((entry, block))
    }

    /// Disconnect back to the fork point and connect the branch ending at `new_tip`. On a
    /// mid-branch failure the old chain is restored.
    fn reorganize(&mut self, new_tip: &ChainEntry) -> Result<(Vec<ChainEntry>, Vec<ChainEntry>), ChainStorageError> {
        let mut branch = Vec::new();
        let mut cursor = new_tip.clone();
        while self.main_chain_hash(cursor.height)? != Some(cursor.hash) {
            branch.push(cursor.clone());
            cursor = self.entry_required(&cursor.prev_hash)?;
        }
        let fork = cursor;
        branch.reverse();
        debug!(
            target: LOG_TARGET,
            "Reorganizing to {}: fork at height {}, {} branch block(s)",
            new_tip.hash,
            fork.height,
            branch.len()
        );

        let mut removed = Vec::new();
        let mut removed_blocks = Vec::new();
        while self.state.tip != fork.hash {
            let (entry, block) = self.disconnect_tip()?;
            removed.push(entry);
            removed_blocks.push(block);
        }

        let mut added = Vec::new();
        for branch_entry in &branch {
            let block = self.read_block(&branch_entry.hash)?;
            match self.connect(&block) {
                Ok(entry) => added.push(entry),
                Err(err) => {
                    error!(
                        target: LOG_TARGET,
                        "Failed to connect reorg block {}: {}. Restoring previous chain",
                        branch_entry.hash,
                        err
                    );
                    for _ in 0..added.len() {
                        self.disconnect_tip()?;
                    }
                    for block in removed_blocks.iter().rev() {
                        self.connect(block)?;
                    }
                    return Err(err);
                },
            }
        }
        Ok((removed, added))
    }

    /// If the chain's record of the tree diverges from the tree itself, bring the tree
    /// forward from the boundary it is actually at. A tree that is ahead of the chain state
    /// cannot be reconciled and refuses to open.
    fn reconcile_tree(&mut self) -> Result<(), ChainStorageError> {
        let tree_state = self.read_tree_state()?;
        if tree_state.tree_root == self.tree.root() {
            return Ok(());
        }
        warn!(
            target: LOG_TARGET,
            "Tree state {} does not match committed tree root {}; reconciling",
            tree_state.tree_root,
            self.tree.root()
        );
        let last = self.params.last_tree_boundary(self.state.height);
        let mut boundary = last;
        loop {
            let entry = self.entry_by_height(boundary)?;
            if entry.tree_root == self.tree.root() {
                self.sync_tree_range(boundary + self.params.tree_interval, &ShutdownSignal::never())?;
                return self.rewrite_tree_state();
            }
            if boundary == 0 {
                break;
            }
            boundary -= self.params.tree_interval;
        }
        if self.tree.root() == handsel_tree::EMPTY_ROOT && self.tree.root_count() == 0 {
            return self.sync_tree_range(0, &ShutdownSignal::never());
        }
        Err(ChainStorageError::Corrupt(
            "name tree is ahead of the chain state".to_string(),
        ))
    }

    fn rewrite_tree_state(&mut self) -> Result<(), ChainStorageError> {
        let mut tree_state = self.read_tree_state()?;
        if tree_state.tree_root != self.tree.root() {
            tree_state.tree_root = self.tree.root();
            self.store.put(keys::KEY_TREE_STATE, &tree_state.encode())?;
        }
        Ok(())
    }

    /// Re-commit every boundary from `from_boundary` (inclusive) to the last boundary at or
    /// below the tip, one batch per boundary.
    fn sync_tree_range(&mut self, from_boundary: u64, signal: &ShutdownSignal) -> Result<(), ChainStorageError> {
        let last = self.params.last_tree_boundary(self.state.height);
        let interval = self.params.tree_interval;
        let mut boundary = from_boundary;
        while boundary <= last {
            if signal.is_triggered() {
                return Err(ChainStorageError::Cancelled);
            }
            let mut dirty: BTreeSet<NameHash> = BTreeSet::new();
            if boundary > 0 {
                let start = boundary - interval + 1;
                for h in start..=boundary {
                    let hash = self
                        .main_chain_hash(h)?
                        .ok_or_else(|| ChainStorageError::not_found("Block", format!("height {}", h)))?;
                    dirty.extend(self.read_name_undo(&hash)?.touched());
                }
            }
            let mut batch = WriteBatch::new();
            for name in dirty {
                match self.name_state_as_of(&name, boundary)? {
                    Some(ns) => self.tree.insert(name, ns.encode()),
                    None => self.tree.remove(name),
                }
            }
            let root = self.tree.commit(&mut batch)?;
            let mut tree_state = self.read_tree_state()?;
            tree_state.tree_root = root;
            tree_state.commit_height = boundary;
            batch.put(keys::KEY_TREE_STATE, tree_state.encode());
            self.store.write(batch)?;
            debug!(target: LOG_TARGET, "Synced tree to boundary {} (root {})", boundary, root);
            boundary += interval;
        }
        Ok(())
    }

    /// The name's state as of the end of `height`, reconstructed by walking undo records of
    /// later blocks.
    fn name_state_as_of(&self, name: &NameHash, height: u64) -> Result<Option<NameState>, ChainStorageError> {
        for h in height + 1..=self.state.height {
            let hash = self
                .main_chain_hash(h)?
                .ok_or_else(|| ChainStorageError::not_found("Block", format!("height {}", h)))?;
            let undo = self.read_name_undo(&hash)?;
            if let Some((_, prior)) = undo.entries.iter().find(|(n, _)| n == name) {
                return Ok(prior.clone());
            }
        }
        self.read_name(name)
    }

    fn compact_tree(&mut self, signal: &ShutdownSignal) -> Result<(), ChainStorageError> {
        let keep = self.params.compaction_keep_blocks;
        if self.state.height < keep {
            return Err(ChainStorageError::ChainTooShort);
        }
        let interval = self.params.tree_interval;
        let base = self.state.height - keep;
        let boundary = if base % interval == 0 {
            base
        } else {
            base + (interval - base % interval)
        };
        let entry = self.entry_by_height(boundary)?;
        info!(
            target: LOG_TARGET,
            "Compacting tree to root {} at height {}", entry.tree_root, boundary
        );
        let _ = self.events.send(ChainEvent::TreeCompactStart { root: entry.tree_root });
        self.tree.compact(entry.tree_root, signal)?;
        let mut tree_state = self.read_tree_state()?;
        tree_state.compaction_root = entry.tree_root;
        tree_state.compaction_height = boundary;
        self.store.put(keys::KEY_TREE_STATE, &tree_state.encode())?;
        let _ = self.events.send(ChainEvent::TreeCompactEnd { root: entry.tree_root });
        Ok(())
    }

    fn reconstruct_tree(&mut self, signal: &ShutdownSignal) -> Result<(), ChainStorageError> {
        if self.config.prune {
            return Err(ChainStorageError::RequiresArchival("tree reconstruction"));
        }
        info!(target: LOG_TARGET, "Reconstructing tree history from undo data");
        let _ = self.events.send(ChainEvent::TreeReconstructStart);
        self.tree.clear(signal)?;
        self.sync_tree_range(0, signal)?;
        let root = self.tree.root();
        let expected = self
            .entry_by_height(self.params.last_tree_boundary(self.state.height))?
            .tree_root;
        if root != expected {
            return Err(ChainStorageError::Corrupt(format!(
                "reconstructed tree root {} does not match chain {}",
                root, expected
            )));
        }
        let _ = self.events.send(ChainEvent::TreeReconstructEnd { root });
        Ok(())
    }
}
