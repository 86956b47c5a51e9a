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

//! The thin client contract between a wallet and a node.
//!
//! The wallet never holds a pointer into the node; everything it needs flows through this
//! trait, so an in-process node and an RPC proxy are interchangeable. [LocalNodeClient] is
//! the in-process implementation over [ChainDatabase].

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, RwLock},
};

use async_trait::async_trait;
use handsel_common_types::{
    types::{BlockHash, NameHash, ScriptHash},
    Amount,
    OutPoint,
};
use handsel_core::{
    blocks::ChainEntry,
    chain_storage::{ChainDatabase, ChainStorageError},
    name_state::{NameState, NameStatus},
    transactions::{Coin, Transaction},
};
use handsel_shutdown::ShutdownSignal;
use handsel_storage::KeyValueStore;
use log::*;

const LOG_TARGET: &str = "w::node_client";

/// Base fee rate in base units per kvB, scaled down for generous confirmation targets.
const BASE_FEE_RATE: Amount = 1000;

/// What a node should match when scanning blocks for a wallet.
#[derive(Clone, Debug, Default)]
pub struct NodeFilter {
    pub scripts: HashSet<ScriptHash>,
    pub outpoints: HashSet<OutPoint>,
}

impl NodeFilter {
    pub fn matches(&self, tx: &Transaction) -> bool {
        tx.outputs.iter().any(|o| self.scripts.contains(&o.address)) ||
            tx.inputs.iter().any(|i| self.outpoints.contains(&i.prevout))
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty() && self.outpoints.is_empty()
    }
}

/// Receiver side of a rescan. The wallet implements this; returning `false` stops the scan.
#[async_trait]
pub trait BlockSink: Send + Sync {
    async fn on_block(&self, entry: &ChainEntry, txs: &[Transaction]) -> Result<bool, ChainStorageError>;
}

#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn get_tip(&self) -> Result<ChainEntry, ChainStorageError>;

    async fn get_entry(&self, hash: BlockHash) -> Result<ChainEntry, ChainStorageError>;

    async fn get_block_header(&self, height: u64) -> Result<ChainEntry, ChainStorageError>;

    async fn get_coin(&self, outpoint: OutPoint) -> Result<Option<Coin>, ChainStorageError>;

    async fn get_name_status(&self, hash: NameHash) -> Result<Option<(NameState, NameStatus)>, ChainStorageError>;

    async fn set_filter(&self, filter: NodeFilter);

    async fn add_filter(&self, scripts: Vec<ScriptHash>, outpoints: Vec<OutPoint>);

    async fn reset_filter(&self);

    /// Stream filtered blocks from `start` to the tip into `sink`. The filter may grow
    /// while the scan runs; each block observes the filter as of its turn.
    async fn rescan(&self, start: u64, sink: Arc<dyn BlockSink>, signal: ShutdownSignal)
        -> Result<(), ChainStorageError>;

    /// `set_filter` + `rescan` in one call.
    async fn scan_interactive(
        &self,
        start: u64,
        filter: NodeFilter,
        sink: Arc<dyn BlockSink>,
        signal: ShutdownSignal,
    ) -> Result<(), ChainStorageError> {
        self.set_filter(filter).await;
        self.rescan(start, sink, signal).await
    }

    /// Hand a transaction to the node for relay.
    async fn send(&self, tx: Transaction) -> Result<(), ChainStorageError>;

    /// Hand a reserved-name claim to the node for relay.
    async fn send_claim(&self, claim: Transaction) -> Result<(), ChainStorageError>;

    async fn estimate_fee(&self, blocks: u64) -> Result<Amount, ChainStorageError>;
}

/// In-process client over a [ChainDatabase]. Submitted transactions are queued for the
/// node's mempool layer to drain.
pub struct LocalNodeClient<S>
where S: KeyValueStore + Clone + 'static
{
    db: ChainDatabase<S>,
    filter: RwLock<NodeFilter>,
    submitted: Mutex<Vec<Transaction>>,
}

impl<S> LocalNodeClient<S>
where S: KeyValueStore + Clone + Send + Sync + 'static
{
    pub fn new(db: ChainDatabase<S>) -> Self {
        Self {
            db,
            filter: RwLock::new(NodeFilter::default()),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn db(&self) -> &ChainDatabase<S> {
        &self.db
    }

    /// Transactions handed over with [NodeClient::send], in order. The mempool layer (out
    /// of scope here) drains this.
    pub fn drain_submitted(&self) -> Vec<Transaction> {
        std::mem::take(&mut *self.submitted.lock().expect("submitted queue poisoned"))
    }

    fn filter_snapshot(&self) -> NodeFilter {
        self.filter.read().expect("filter lock poisoned").clone()
    }
}

#[async_trait]
impl<S> NodeClient for LocalNodeClient<S>
where S: KeyValueStore + Clone + Send + Sync + 'static
{
    async fn get_tip(&self) -> Result<ChainEntry, ChainStorageError> {
        self.db.tip_entry()
    }

    async fn get_entry(&self, hash: BlockHash) -> Result<ChainEntry, ChainStorageError> {
        self.db.fetch_entry(&hash)
    }

    async fn get_block_header(&self, height: u64) -> Result<ChainEntry, ChainStorageError> {
        self.db.fetch_entry_by_height(height)
    }

    async fn get_coin(&self, outpoint: OutPoint) -> Result<Option<Coin>, ChainStorageError> {
        self.db.fetch_coin(&outpoint)
    }

    async fn get_name_status(&self, hash: NameHash) -> Result<Option<(NameState, NameStatus)>, ChainStorageError> {
        self.db.name_status(&hash)
    }

    async fn set_filter(&self, filter: NodeFilter) {
        *self.filter.write().expect("filter lock poisoned") = filter;
    }

    async fn add_filter(&self, scripts: Vec<ScriptHash>, outpoints: Vec<OutPoint>) {
        let mut filter = self.filter.write().expect("filter lock poisoned");
        filter.scripts.extend(scripts);
        filter.outpoints.extend(outpoints);
    }

    async fn reset_filter(&self) {
        *self.filter.write().expect("filter lock poisoned") = NodeFilter::default();
    }

    async fn rescan(
        &self,
        start: u64,
        sink: Arc<dyn BlockSink>,
        signal: ShutdownSignal,
    ) -> Result<(), ChainStorageError> {
        let tip = self.db.state()?.height;
        debug!(target: LOG_TARGET, "Rescanning blocks {}..={}", start, tip);
        for height in start..=tip {
            if signal.is_triggered() {
                return Err(ChainStorageError::Cancelled);
            }
            let entry = self.db.fetch_entry_by_height(height)?;
            let block = self.db.fetch_block(&entry.hash)?;
            let filter = self.filter_snapshot();
            let matched: Vec<Transaction> = block
                .transactions
                .into_iter()
                .filter(|tx| filter.matches(tx))
                .collect();
            if !sink.on_block(&entry, &matched).await? {
                break;
            }
        }
        Ok(())
    }

    async fn send(&self, tx: Transaction) -> Result<(), ChainStorageError> {
        self.submitted.lock().expect("submitted queue poisoned").push(tx);
        Ok(())
    }

    async fn send_claim(&self, claim: Transaction) -> Result<(), ChainStorageError> {
        self.send(claim).await
    }

    async fn estimate_fee(&self, blocks: u64) -> Result<Amount, ChainStorageError> {
        Ok(BASE_FEE_RATE / blocks.clamp(1, 25))
    }
}
