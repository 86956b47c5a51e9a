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
    sync::{Arc, Mutex, MutexGuard},
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use handsel_common::{NetworkParams, WalletConfig};
use handsel_common_types::{
    types::{BlockHash, FixedHash, NameHash, ScriptHash, Txid},
    OutPoint,
};
use handsel_core::{
    blocks::ChainEntry,
    chain_storage::{ChainEvent, ChainStorageError},
    name_state::NameState,
    transactions::Transaction,
};
use handsel_shutdown::ShutdownSignal;
use handsel_storage::{
    migration::{MigrationOptions, Migrator},
    KeyValueStore,
};
use log::*;
use tokio::sync::broadcast;

use crate::{
    error::WalletError,
    events::WalletEvent,
    migrations,
    node_client::{BlockSink, NodeClient, NodeFilter},
    storage::{Balance, BidReveal, BlindBid, BlindValue, BlockMeta, Credit, SyncState, TxDb, WalletTx},
};

const LOG_TARGET: &str = "w::wallet";

const EVENT_CHANNEL_SIZE: usize = 1024;

/// A wallet over one per-wallet bucket of the wallet store.
///
/// All writes are serialized by a wallet-level mutex; separate wallets on the same store
/// are independent. Every method that changes state commits exactly one batch and then
/// emits the corresponding events plus a fresh balance.
#[derive(Debug)]
pub struct Wallet<S>
where S: KeyValueStore + Clone + 'static
{
    db: Arc<Mutex<TxDb<S>>>,
    params: NetworkParams,
    wallet_id: u32,
    events: broadcast::Sender<WalletEvent>,
}

impl<S> Clone for Wallet<S>
where S: KeyValueStore + Clone + 'static
{
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            params: self.params.clone(),
            wallet_id: self.wallet_id,
            events: self.events.clone(),
        }
    }
}

impl<S> Wallet<S>
where S: KeyValueStore + Clone + Send + Sync + 'static
{
    /// Run wallet migrations and open wallet `wallet_id` on `store`.
    pub fn open(store: S, wallet_id: u32, config: WalletConfig) -> Result<Self, WalletError> {
        let params = config.network.params();
        let mut opts = MigrationOptions::new("wallet-migrate");
        opts.migrate = config.migrate;
        opts.spv = config.spv;
        Migrator::open(&store, &migrations::registry(), &opts, ShutdownSignal::never())?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Ok(Self {
            db: Arc::new(Mutex::new(TxDb::new(store, wallet_id, params.clone()))),
            params,
            wallet_id,
            events,
        })
    }

    pub fn wallet_id(&self) -> u32 {
        self.wallet_id
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, TxDb<S>> {
        self.db.lock().expect("wallet lock poisoned")
    }

    fn emit(&self, events: Vec<WalletEvent>) {
        if events.is_empty() {
            return;
        }
        let balance = self.lock().balance().ok();
        for event in events {
            let _ = self.events.send(event);
        }
        if let Some(balance) = balance {
            let _ = self.events.send(WalletEvent::Balance { balance });
        }
    }

    // ---- key and address management ----------------------------------------------------

    pub fn add_address(&self, account: u32, script: ScriptHash) -> Result<(), WalletError> {
        self.lock().add_address(account, script)
    }

    pub fn is_owned(&self, script: &ScriptHash) -> Result<bool, WalletError> {
        self.lock().is_owned(script)
    }

    /// Remember the value and nonce behind a blind before broadcasting a bid.
    pub fn save_blind(&self, blind: FixedHash, value: u64, nonce: [u8; 32]) -> Result<(), WalletError> {
        self.lock().save_blind(blind, value, nonce)
    }

    // ---- chain following ----------------------------------------------------------------

    /// Track an unconfirmed transaction (mempool add).
    pub fn add_tx(&self, tx: &Transaction) -> Result<bool, WalletError> {
        let mut events = Vec::new();
        let relevant = self.lock().add(tx, None, now_secs(), &mut events)?;
        self.emit(events);
        Ok(relevant)
    }

    pub fn connect_block(&self, meta: &BlockMeta, txs: &[Transaction]) -> Result<usize, WalletError> {
        let mut events = Vec::new();
        let relevant = self.lock().connect_block(meta, txs, &mut events)?;
        self.emit(events);
        Ok(relevant)
    }

    pub fn disconnect_block(&self, height: u64, prev_hash: BlockHash) -> Result<usize, WalletError> {
        let mut events = Vec::new();
        let count = self.lock().disconnect_block(height, prev_hash, &mut events)?;
        self.emit(events);
        Ok(count)
    }

    /// Apply one chain event. Reorgs arrive as an ordered `Disconnected…, Connected…`
    /// sequence and must be fed in order.
    pub fn handle_chain_event(&self, event: &ChainEvent) -> Result<(), WalletError> {
        match event {
            ChainEvent::Connected { entry, block } => {
                let meta = block_meta(entry);
                self.connect_block(&meta, &block.transactions)?;
            },
            ChainEvent::Disconnected { entry, .. } => {
                self.disconnect_block(entry.height, entry.prev_hash)?;
            },
            _ => {},
        }
        Ok(())
    }

    /// Disconnect all wallet state above `height` (rescan preparation).
    pub fn revert(&self, height: u64) -> Result<usize, WalletError> {
        let mut events = Vec::new();
        let count = self.lock().revert(height, &mut events)?;
        self.emit(events);
        Ok(count)
    }

    /// Drop an unconfirmed transaction and its descendants.
    pub fn abandon(&self, txid: &Txid) -> Result<(), WalletError> {
        let mut events = Vec::new();
        self.lock().abandon(txid, &mut events)?;
        self.emit(events);
        Ok(())
    }

    /// Roll back to `start` and replay the chain from there through the node's filtered
    /// scan.
    pub async fn rescan(
        &self,
        client: Arc<dyn NodeClient>,
        start: u64,
        signal: ShutdownSignal,
    ) -> Result<(), WalletError> {
        info!(target: LOG_TARGET, "wallet {}: rescanning from height {}", self.wallet_id, start);
        self.revert(start.saturating_sub(1))?;

        let mut filter = NodeFilter::default();
        for (script, _) in self.lock().addresses()? {
            filter.scripts.insert(script);
        }
        for (outpoint, _) in self.lock().credits()? {
            filter.outpoints.insert(outpoint);
        }
        let sink = Arc::new(WalletBlockSink {
            wallet: self.clone(),
            client: client.clone(),
        });
        client.scan_interactive(start, filter, sink, signal).await?;
        Ok(())
    }

    // ---- views --------------------------------------------------------------------------

    pub fn balance(&self) -> Result<Balance, WalletError> {
        self.lock().balance()
    }

    pub fn account_balance(&self, account: u32) -> Result<Balance, WalletError> {
        self.lock().account_balance(account)
    }

    pub fn get_tx(&self, txid: &Txid) -> Result<Option<WalletTx>, WalletError> {
        self.lock().get_tx(txid)
    }

    pub fn pending_txs(&self) -> Result<Vec<Txid>, WalletError> {
        self.lock().pending()
    }

    pub fn credits(&self) -> Result<Vec<(OutPoint, Credit)>, WalletError> {
        self.lock().credits()
    }

    pub fn unspent_credits(&self) -> Result<Vec<(OutPoint, Credit)>, WalletError> {
        self.lock().unspent_credits()
    }

    pub fn name_state(&self, hash: &NameHash) -> Result<Option<NameState>, WalletError> {
        self.lock().name_state(hash)
    }

    pub fn bids(&self, hash: &NameHash) -> Result<Vec<(OutPoint, BlindBid)>, WalletError> {
        self.lock().bids(hash)
    }

    pub fn reveals(&self, hash: &NameHash) -> Result<Vec<(OutPoint, BidReveal)>, WalletError> {
        self.lock().reveals(hash)
    }

    pub fn blind_value(&self, blind: &FixedHash) -> Result<Option<BlindValue>, WalletError> {
        self.lock().blind_value(blind)
    }

    pub fn sync_state(&self) -> Result<SyncState, WalletError> {
        self.lock().sync_state()
    }

    /// Recompute balances from the credit table and compare with the running totals.
    pub fn audit_balances(&self) -> Result<(), WalletError> {
        self.lock().audit_balances()
    }
}

struct WalletBlockSink<S>
where S: KeyValueStore + Clone + 'static
{
    wallet: Wallet<S>,
    client: Arc<dyn NodeClient>,
}

#[async_trait]
impl<S> BlockSink for WalletBlockSink<S>
where S: KeyValueStore + Clone + Send + Sync + 'static
{
    async fn on_block(&self, entry: &ChainEntry, txs: &[Transaction]) -> Result<bool, ChainStorageError> {
        let meta = block_meta(entry);
        self.wallet
            .connect_block(&meta, txs)
            .map_err(|e| ChainStorageError::Corrupt(format!("wallet rescan failed: {}", e)))?;
        // Newly created credits become scannable spends for the rest of the scan
        let mut outpoints = Vec::new();
        for tx in txs {
            let txid = tx.txid();
            for index in 0..tx.outputs.len() {
                let outpoint = OutPoint::new(txid, index as u32);
                if self
                    .wallet
                    .lock()
                    .credit(&outpoint)
                    .map_err(|e| ChainStorageError::Corrupt(e.to_string()))?
                    .is_some()
                {
                    outpoints.push(outpoint);
                }
            }
        }
        if !outpoints.is_empty() {
            self.client.add_filter(Vec::new(), outpoints).await;
        }
        Ok(true)
    }
}

fn block_meta(entry: &ChainEntry) -> BlockMeta {
    BlockMeta {
        hash: entry.hash,
        height: entry.height,
        time: entry.time,
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
