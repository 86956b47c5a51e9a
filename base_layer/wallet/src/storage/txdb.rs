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

use std::collections::{BTreeMap, BTreeSet};

use handsel_common::NetworkParams;
use handsel_common_types::{
    types::{BlockHash, FixedHash, NameHash, Txid},
    OutPoint,
};
use handsel_core::{
    covenants::CovenantType,
    name_state::{NameState, NameUndo},
    transactions::{Coin, Transaction},
};
use handsel_storage::{KeyValueStore, WriteBatch};
use log::*;

use crate::{
    error::WalletError,
    events::WalletEvent,
    storage::{
        keys::{block_wallets, WalletKeys},
        records::{
            Balance,
            BalanceDelta,
            BidReveal,
            BlindBid,
            BlindValue,
            BlockMeta,
            BlockRecord,
            Credit,
            SyncState,
            WalletTx,
            UNCONFIRMED_HEIGHT,
        },
    },
};

const LOG_TARGET: &str = "w::txdb";

/// A write-through overlay over the store: reads see earlier writes, and the whole event
/// (one incoming tx, one connected block) commits as a single batch.
struct View<'a, S> {
    store: &'a S,
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a, S: KeyValueStore> View<'a, S> {
    fn new(store: &'a S) -> Self {
        Self {
            store,
            overlay: BTreeMap::new(),
        }
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, WalletError> {
        if let Some(entry) = self.overlay.get(key) {
            return Ok(entry.clone());
        }
        Ok(self.store.get(key)?)
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.overlay.insert(key, Some(value));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.overlay.insert(key, None);
    }

    fn into_batch(self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for (key, value) in self.overlay {
            match value {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }
        batch
    }
}

/// The wallet's transaction database. All writes go through [TxDb::add],
/// [TxDb::connect_block], [TxDb::disconnect_block] or [TxDb::abandon], each of which is
/// one atomic batch. The [Wallet](crate::Wallet) wrapper serializes callers.
#[derive(Debug)]
pub struct TxDb<S> {
    store: S,
    keys: WalletKeys,
    wallet_id: u32,
    params: NetworkParams,
}

impl<S: KeyValueStore + Clone> TxDb<S> {
    pub fn new(store: S, wallet_id: u32, params: NetworkParams) -> Self {
        Self {
            store,
            keys: WalletKeys::new(wallet_id),
            wallet_id,
            params,
        }
    }

    // ---- reads -------------------------------------------------------------------------

    pub fn get_tx(&self, txid: &Txid) -> Result<Option<WalletTx>, WalletError> {
        let view = View::new(&self.store);
        self.read_tx(&view, txid)
    }

    pub fn balance(&self) -> Result<Balance, WalletError> {
        let view = View::new(&self.store);
        self.read_balance(&view, None)
    }

    pub fn account_balance(&self, account: u32) -> Result<Balance, WalletError> {
        let view = View::new(&self.store);
        self.read_balance(&view, Some(account))
    }

    pub fn credit(&self, outpoint: &OutPoint) -> Result<Option<Credit>, WalletError> {
        let view = View::new(&self.store);
        self.read_credit(&view, outpoint)
    }

    pub fn credits(&self) -> Result<Vec<(OutPoint, Credit)>, WalletError> {
        let prefix = self.keys.credit_prefix();
        let mut out = Vec::new();
        for (key, value) in self.store.scan_prefix(&prefix)? {
            let raw = &key[prefix.len()..];
            let outpoint = decode_outpoint(raw)?;
            out.push((outpoint, Credit::decode(&value).map_err(corrupt)?));
        }
        Ok(out)
    }

    pub fn unspent_credits(&self) -> Result<Vec<(OutPoint, Credit)>, WalletError> {
        Ok(self.credits()?.into_iter().filter(|(_, c)| !c.spent).collect())
    }

    pub fn pending(&self) -> Result<Vec<Txid>, WalletError> {
        let prefix = self.keys.pending_prefix();
        let mut out = Vec::new();
        for (key, _) in self.store.scan_prefix(&prefix)? {
            out.push(Txid::try_from(&key[prefix.len()..]).map_err(|_| WalletError::Corrupt("bad pending key".into()))?);
        }
        Ok(out)
    }

    pub fn block_record(&self, height: u64) -> Result<Option<BlockRecord>, WalletError> {
        match self.store.get(&self.keys.block_record(height))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(BlockRecord::decode(&bytes).map_err(corrupt)?)),
        }
    }

    pub fn name_state(&self, hash: &NameHash) -> Result<Option<NameState>, WalletError> {
        match self.store.get(&self.keys.name(hash))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(NameState::decode(&bytes).map_err(corrupt)?)),
        }
    }

    pub fn bids(&self, hash: &NameHash) -> Result<Vec<(OutPoint, BlindBid)>, WalletError> {
        let prefix = self.keys.bid_prefix(hash);
        let mut out = Vec::new();
        for (key, value) in self.store.scan_prefix(&prefix)? {
            let outpoint = decode_outpoint(&key[prefix.len()..])?;
            out.push((outpoint, borsh::from_slice(&value).map_err(corrupt)?));
        }
        Ok(out)
    }

    pub fn reveals(&self, hash: &NameHash) -> Result<Vec<(OutPoint, BidReveal)>, WalletError> {
        let prefix = self.keys.reveal_prefix(hash);
        let mut out = Vec::new();
        for (key, value) in self.store.scan_prefix(&prefix)? {
            let outpoint = decode_outpoint(&key[prefix.len()..])?;
            out.push((outpoint, borsh::from_slice(&value).map_err(corrupt)?));
        }
        Ok(out)
    }

    pub fn blind_value(&self, blind: &FixedHash) -> Result<Option<BlindValue>, WalletError> {
        match self.store.get(&self.keys.blind_value(blind))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(borsh::from_slice(&bytes).map_err(corrupt)?)),
        }
    }

    /// Record the value and nonce behind a blind the wallet is about to bid with.
    pub fn save_blind(&self, blind: FixedHash, value: u64, nonce: [u8; 32]) -> Result<(), WalletError> {
        let record = BlindValue { value, nonce };
        self.store.put(
            &self.keys.blind_value(&blind),
            &borsh::to_vec(&record).expect("BlindValue serialization cannot fail"),
        )?;
        Ok(())
    }

    pub fn sync_state(&self) -> Result<SyncState, WalletError> {
        match self.store.get(&self.keys.sync_state())? {
            None => Ok(SyncState::default()),
            Some(bytes) => Ok(borsh::from_slice(&bytes).map_err(corrupt)?),
        }
    }

    pub fn add_address(&self, account: u32, script: FixedHash) -> Result<(), WalletError> {
        self.store.put(&self.keys.address(&script), &account.to_be_bytes())?;
        Ok(())
    }

    pub fn is_owned(&self, script: &FixedHash) -> Result<bool, WalletError> {
        Ok(self.store.get(&self.keys.address(script))?.is_some())
    }

    pub fn addresses(&self) -> Result<Vec<(FixedHash, u32)>, WalletError> {
        let prefix = self.keys.address_prefix();
        let mut out = Vec::new();
        for (key, value) in self.store.scan_prefix(&prefix)? {
            let script = FixedHash::try_from(&key[prefix.len()..])
                .map_err(|_| WalletError::Corrupt("bad address key".into()))?;
            let raw: [u8; 4] = value
                .as_slice()
                .try_into()
                .map_err(|_| WalletError::Corrupt("bad address table value".into()))?;
            out.push((script, u32::from_be_bytes(raw)));
        }
        Ok(out)
    }

    /// Recompute the wallet balance from first principles and compare with the running
    /// totals. Used by tests to enforce balance consistency.
    pub fn audit_balances(&self) -> Result<(), WalletError> {
        let view = View::new(&self.store);
        let mut expected_coin = 0u64;
        let mut expected_unconfirmed = 0i128;
        let mut expected_confirmed = 0i128;
        let mut expected_ulocked = 0i128;
        let mut expected_clocked = 0i128;
        for (outpoint, credit) in self.credits()? {
            expected_coin += 1;
            let value = i128::from(credit.coin.value);
            let confirmed = credit.coin.height != UNCONFIRMED_HEIGHT;
            let locking = credit.coin.covenant.is_locking();
            if confirmed {
                expected_confirmed += value;
                if locking {
                    expected_clocked += value;
                }
            }
            if !credit.spent {
                expected_unconfirmed += value;
                if locking {
                    expected_ulocked += value;
                }
            }
            let _ = outpoint;
        }
        // Unconfirmed spends of confirmed credits have already been debited from the
        // unconfirmed view, while the confirmed view still carries the credit. Spent
        // pending credits count toward neither.
        let balance = self.read_balance(&view, None)?;
        if u64::try_from(expected_unconfirmed).ok() != Some(balance.unconfirmed) ||
            u64::try_from(expected_confirmed).ok() != Some(balance.confirmed) ||
            expected_coin != balance.coin_count ||
            u64::try_from(expected_ulocked).ok() != Some(balance.ulocked) ||
            u64::try_from(expected_clocked).ok() != Some(balance.clocked)
        {
            return Err(WalletError::Corrupt(format!(
                "balance mismatch: stored {:?}, recomputed coins={} unconfirmed={} confirmed={} ulocked={} clocked={}",
                balance, expected_coin, expected_unconfirmed, expected_confirmed, expected_ulocked, expected_clocked
            )));
        }
        Ok(())
    }

    // ---- writes ------------------------------------------------------------------------

    /// Track a transaction. With `block` set this is a confirmation (or a direct confirmed
    /// insert); without, a mempool add. Returns false if the tx is irrelevant or already
    /// known in that state.
    pub fn add(
        &self,
        tx: &Transaction,
        block: Option<&BlockMeta>,
        mtime: u64,
        events: &mut Vec<WalletEvent>,
    ) -> Result<bool, WalletError> {
        let mut view = View::new(&self.store);
        let relevant = self.add_in(&mut view, tx, block, mtime, events)?;
        if relevant {
            if let Some(meta) = block {
                self.write_sync_state(&mut view, meta.height, meta.hash);
            }
            self.store.write(view.into_batch())?;
        }
        Ok(relevant)
    }

    /// Apply a connected block: every transaction, the block record and the sync state in
    /// one batch. Returns how many transactions touched this wallet.
    pub fn connect_block(
        &self,
        meta: &BlockMeta,
        txs: &[Transaction],
        events: &mut Vec<WalletEvent>,
    ) -> Result<usize, WalletError> {
        let mut view = View::new(&self.store);
        let mut relevant = 0;
        for tx in txs {
            if self.add_in(&mut view, tx, Some(meta), meta.time, events)? {
                relevant += 1;
            }
        }
        self.write_sync_state(&mut view, meta.height, meta.hash);
        self.store.write(view.into_batch())?;
        trace!(
            target: LOG_TARGET,
            "wallet {} connected block {} ({} relevant tx(s))",
            self.wallet_id,
            meta.height,
            relevant
        );
        Ok(relevant)
    }

    /// Reverse a disconnected block: every wallet tx in it moves back to pending, in
    /// reverse confirmation order, in one batch.
    pub fn disconnect_block(
        &self,
        height: u64,
        prev_hash: BlockHash,
        events: &mut Vec<WalletEvent>,
    ) -> Result<usize, WalletError> {
        let mut view = View::new(&self.store);
        let mut count = 0;
        if let Some(record) = self.read_block_record(&view, height)? {
            for txid in record.txids.iter().rev() {
                self.disconnect_in(&mut view, txid, events)?;
                count += 1;
                // A disconnected coinbase cannot confirm on any other branch; drop it and
                // everything built on it
                let is_coinbase = self
                    .read_tx(&view, txid)?
                    .map(|wtx| wtx.tx.is_coinbase())
                    .unwrap_or(false);
                if is_coinbase {
                    self.erase_in(&mut view, txid, events)?;
                }
            }
            view.delete(self.keys.block_record(height));
            view.delete(block_wallets(&record.hash, self.wallet_id));
        }
        self.write_sync_state(&mut view, height.saturating_sub(1), prev_hash);
        self.store.write(view.into_batch())?;
        Ok(count)
    }

    /// Disconnect every block above `height`. Used by rescans; event-driven reorgs go
    /// through [TxDb::disconnect_block] per block instead.
    pub fn revert(&self, height: u64, events: &mut Vec<WalletEvent>) -> Result<usize, WalletError> {
        let sync = self.sync_state()?;
        let mut total = 0;
        let mut h = sync.height;
        while h > height {
            total += self.disconnect_block(h, BlockHash::zero(), events)?;
            h -= 1;
        }
        Ok(total)
    }

    /// Drop an unconfirmed transaction and all its descendants.
    pub fn abandon(&self, txid: &Txid, events: &mut Vec<WalletEvent>) -> Result<(), WalletError> {
        let mut view = View::new(&self.store);
        let wtx = self
            .read_tx(&view, txid)?
            .ok_or_else(|| WalletError::not_found("WalletTx", txid))?;
        if wtx.is_confirmed() {
            return Err(WalletError::AbandonConfirmed);
        }
        self.erase_in(&mut view, txid, events)?;
        self.store.write(view.into_batch())?;
        Ok(())
    }

    // ---- internals ---------------------------------------------------------------------

    fn add_in(
        &self,
        view: &mut View<'_, S>,
        tx: &Transaction,
        block: Option<&BlockMeta>,
        mtime: u64,
        events: &mut Vec<WalletEvent>,
    ) -> Result<bool, WalletError> {
        let txid = tx.txid();
        match self.read_tx(view, &txid)? {
            Some(wtx) if wtx.is_confirmed() => return Ok(false),
            Some(_) => {
                return match block {
                    Some(meta) => {
                        self.confirm_in(view, &txid, meta, events)?;
                        Ok(true)
                    },
                    None => Ok(false),
                };
            },
            None => {},
        }

        let mut relevant = false;
        for input in &tx.inputs {
            if self.read_credit(view, &input.prevout)?.is_some() {
                relevant = true;
            }
        }
        for output in &tx.outputs {
            if self.account_of(view, &output.address)?.is_some() {
                relevant = true;
            }
        }
        if !relevant {
            return Ok(false);
        }

        if block.is_none() {
            self.double_open_check(view, tx)?;
        }
        self.remove_conflicts(view, tx, &txid, events)?;
        self.insert_in(view, tx, &txid, mtime, events)?;
        if let Some(meta) = block {
            self.confirm_in(view, &txid, meta, events)?;
        }
        Ok(true)
    }

    /// Refuse a second OPEN while a previous one for the same name is in flight or its
    /// auction has not lapsed.
    fn double_open_check(&self, view: &View<'_, S>, tx: &Transaction) -> Result<(), WalletError> {
        let sync = self.read_sync(view)?;
        for output in &tx.outputs {
            if output.covenant.covenant_type() != CovenantType::Open {
                continue;
            }
            if self.account_of(view, &output.address)?.is_none() {
                continue;
            }
            let hash = output.covenant.name_hash().map_err(|e| WalletError::Corrupt(e.to_string()))?;
            let Some(prev_txid) = self.read_open_guard(view, &hash)? else {
                continue;
            };
            let Some(prev) = self.read_tx(view, &prev_txid)? else {
                continue;
            };
            match prev.block {
                None => return Err(WalletError::DoubleOpen(hash)),
                Some(meta) => {
                    let lapsed = meta.height + self.params.bidding_period + self.params.reveal_period < sync.height;
                    if !lapsed {
                        return Err(WalletError::DoubleOpen(hash));
                    }
                },
            }
        }
        Ok(())
    }

    /// Recursively remove unconfirmed transactions that double-spend this tx's inputs.
    fn remove_conflicts(
        &self,
        view: &mut View<'_, S>,
        tx: &Transaction,
        txid: &Txid,
        events: &mut Vec<WalletEvent>,
    ) -> Result<(), WalletError> {
        for input in &tx.inputs {
            if let Some(spender) = self.read_spender(view, &input.prevout)? {
                if spender != *txid {
                    warn!(
                        target: LOG_TARGET,
                        "wallet {}: tx {} double-spends {}; evicting {}", self.wallet_id, txid, input.prevout, spender
                    );
                    events.push(WalletEvent::Conflict { txid: spender });
                    self.erase_in(view, &spender, events)?;
                }
            }
        }
        Ok(())
    }

    fn insert_in(
        &self,
        view: &mut View<'_, S>,
        tx: &Transaction,
        txid: &Txid,
        mtime: u64,
        events: &mut Vec<WalletEvent>,
    ) -> Result<(), WalletError> {
        let mut touched_accounts = BTreeSet::new();

        for input in &tx.inputs {
            let Some(mut credit) = self.read_credit(view, &input.prevout)? else {
                continue;
            };
            credit.spent = true;
            let account = self.account_of(view, &credit.coin.address)?.unwrap_or(0);
            touched_accounts.insert(account);
            let mut delta = BalanceDelta {
                unconfirmed: -i128::from(credit.coin.value),
                ..Default::default()
            };
            if credit.coin.covenant.is_locking() {
                delta.ulocked = -i128::from(credit.coin.value);
            }
            self.bump(view, account, &delta)?;
            view.put(self.keys.credit(&input.prevout), credit.encode());
            view.put(self.keys.spender(&input.prevout), txid.to_vec());
        }

        for (index, output) in tx.outputs.iter().enumerate() {
            let Some(account) = self.account_of(view, &output.address)? else {
                continue;
            };
            touched_accounts.insert(account);
            let outpoint = OutPoint::new(*txid, index as u32);
            let credit = Credit {
                coin: Coin::from_output(output, UNCONFIRMED_HEIGHT, tx.is_coinbase()),
                spent: false,
                own: true,
            };
            let mut delta = BalanceDelta {
                coin_count: 1,
                unconfirmed: i128::from(output.value),
                ..Default::default()
            };
            if output.covenant.is_locking() {
                delta.ulocked = i128::from(output.value);
            }
            self.bump(view, account, &delta)?;
            view.put(self.keys.credit(&outpoint), credit.encode());
            view.put(self.keys.account_credit(account, &outpoint), Vec::new());
        }

        self.apply_name_covenants(view, tx, txid)?;

        let wtx = WalletTx {
            tx: tx.clone(),
            block: None,
            mtime,
        };
        view.put(self.keys.tx(txid), wtx.encode());
        view.put(self.keys.pending(txid), Vec::new());
        view.put(self.keys.time_index(mtime, txid), Vec::new());

        let tx_delta = BalanceDelta {
            tx_count: 1,
            ..Default::default()
        };
        self.bump_wallet(view, &tx_delta)?;
        for account in touched_accounts {
            self.bump_account(view, account, &tx_delta)?;
        }
        events.push(WalletEvent::Tx { txid: *txid });
        Ok(())
    }

    fn confirm_in(
        &self,
        view: &mut View<'_, S>,
        txid: &Txid,
        meta: &BlockMeta,
        events: &mut Vec<WalletEvent>,
    ) -> Result<(), WalletError> {
        let mut wtx = self
            .read_tx(view, txid)?
            .ok_or_else(|| WalletError::not_found("WalletTx", txid))?;
        let tx = wtx.tx.clone();

        for input in &tx.inputs {
            if self.read_spender(view, &input.prevout)? != Some(*txid) {
                continue;
            }
            let credit = self
                .read_credit(view, &input.prevout)?
                .ok_or_else(|| WalletError::Corrupt(format!("spent credit {} missing", input.prevout)))?;
            let account = self.account_of(view, &credit.coin.address)?.unwrap_or(0);
            let mut delta = BalanceDelta {
                coin_count: -1,
                confirmed: -i128::from(credit.coin.value),
                ..Default::default()
            };
            if credit.coin.covenant.is_locking() {
                delta.clocked = -i128::from(credit.coin.value);
            }
            self.bump(view, account, &delta)?;
            view.put(self.keys.spent_undo(&input.prevout), credit.encode());
            view.delete(self.keys.credit(&input.prevout));
            view.delete(self.keys.account_credit(account, &input.prevout));
            view.delete(self.keys.spender(&input.prevout));
        }

        for (index, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint::new(*txid, index as u32);
            let Some(mut credit) = self.read_credit(view, &outpoint)? else {
                continue;
            };
            credit.coin.height = meta.height;
            view.put(self.keys.credit(&outpoint), credit.encode());
            let account = self.account_of(view, &output.address)?.unwrap_or(0);
            let mut delta = BalanceDelta {
                confirmed: i128::from(output.value),
                ..Default::default()
            };
            if output.covenant.is_locking() {
                delta.clocked = i128::from(output.value);
            }
            self.bump(view, account, &delta)?;
            self.set_name_row_height(view, output, &outpoint, meta.height)?;
        }

        wtx.block = Some(*meta);
        view.put(self.keys.tx(txid), wtx.encode());
        view.delete(self.keys.pending(txid));
        view.put(self.keys.height_index(meta.height, txid), Vec::new());

        let mut record = self
            .read_block_record(view, meta.height)?
            .unwrap_or(BlockRecord {
                hash: meta.hash,
                time: meta.time,
                txids: Vec::new(),
            });
        if !record.txids.contains(txid) {
            record.txids.push(*txid);
        }
        view.put(self.keys.block_record(meta.height), record.encode());
        view.put(block_wallets(&meta.hash, self.wallet_id), Vec::new());

        events.push(WalletEvent::Confirmed {
            txid: *txid,
            height: meta.height,
        });
        Ok(())
    }

    fn disconnect_in(
        &self,
        view: &mut View<'_, S>,
        txid: &Txid,
        events: &mut Vec<WalletEvent>,
    ) -> Result<(), WalletError> {
        let mut wtx = self
            .read_tx(view, txid)?
            .ok_or_else(|| WalletError::not_found("WalletTx", txid))?;
        let tx = wtx.tx.clone();

        for input in &tx.inputs {
            let Some(bytes) = view.get(&self.keys.spent_undo(&input.prevout))? else {
                continue;
            };
            let credit = Credit::decode(&bytes).map_err(corrupt)?;
            let account = self.account_of(view, &credit.coin.address)?.unwrap_or(0);
            let mut delta = BalanceDelta {
                coin_count: 1,
                confirmed: i128::from(credit.coin.value),
                ..Default::default()
            };
            if credit.coin.covenant.is_locking() {
                delta.clocked = i128::from(credit.coin.value);
            }
            self.bump(view, account, &delta)?;
            view.delete(self.keys.spent_undo(&input.prevout));
            view.put(self.keys.credit(&input.prevout), credit.encode());
            view.put(self.keys.account_credit(account, &input.prevout), Vec::new());
            view.put(self.keys.spender(&input.prevout), txid.to_vec());
        }

        for (index, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint::new(*txid, index as u32);
            let Some(mut credit) = self.read_credit(view, &outpoint)? else {
                continue;
            };
            credit.coin.height = UNCONFIRMED_HEIGHT;
            view.put(self.keys.credit(&outpoint), credit.encode());
            let account = self.account_of(view, &output.address)?.unwrap_or(0);
            let mut delta = BalanceDelta {
                confirmed: -i128::from(output.value),
                ..Default::default()
            };
            if output.covenant.is_locking() {
                delta.clocked = -i128::from(output.value);
            }
            self.bump(view, account, &delta)?;
            self.set_name_row_height(view, output, &outpoint, UNCONFIRMED_HEIGHT)?;
        }

        let height = wtx
            .block
            .map(|b| b.height)
            .ok_or_else(|| WalletError::Corrupt(format!("disconnecting unconfirmed tx {}", txid)))?;
        wtx.block = None;
        view.put(self.keys.tx(txid), wtx.encode());
        view.put(self.keys.pending(txid), Vec::new());
        view.delete(self.keys.height_index(height, txid));

        events.push(WalletEvent::Unconfirmed { txid: *txid });
        Ok(())
    }

    fn erase_in(&self, view: &mut View<'_, S>, txid: &Txid, events: &mut Vec<WalletEvent>) -> Result<(), WalletError> {
        let Some(wtx) = self.read_tx(view, txid)? else {
            return Ok(());
        };
        if wtx.is_confirmed() {
            return Err(WalletError::Conflict(format!(
                "cannot erase confirmed transaction {}",
                txid
            )));
        }
        let tx = wtx.tx;

        // Descendants first, so their credit adjustments unwind before ours
        for index in 0..tx.outputs.len() {
            let outpoint = OutPoint::new(*txid, index as u32);
            if let Some(spender) = self.read_spender(view, &outpoint)? {
                if spender != *txid {
                    events.push(WalletEvent::Conflict { txid: spender });
                    self.erase_in(view, &spender, events)?;
                }
            }
        }

        let mut touched_accounts = BTreeSet::new();
        for input in &tx.inputs {
            if self.read_spender(view, &input.prevout)? != Some(*txid) {
                continue;
            }
            let Some(mut credit) = self.read_credit(view, &input.prevout)? else {
                continue;
            };
            credit.spent = false;
            let account = self.account_of(view, &credit.coin.address)?.unwrap_or(0);
            touched_accounts.insert(account);
            let mut delta = BalanceDelta {
                unconfirmed: i128::from(credit.coin.value),
                ..Default::default()
            };
            if credit.coin.covenant.is_locking() {
                delta.ulocked = i128::from(credit.coin.value);
            }
            self.bump(view, account, &delta)?;
            view.put(self.keys.credit(&input.prevout), credit.encode());
            view.delete(self.keys.spender(&input.prevout));
        }

        for (index, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint::new(*txid, index as u32);
            let Some(credit) = self.read_credit(view, &outpoint)? else {
                continue;
            };
            let account = self.account_of(view, &output.address)?.unwrap_or(0);
            touched_accounts.insert(account);
            let mut delta = BalanceDelta {
                coin_count: -1,
                unconfirmed: -i128::from(credit.coin.value),
                ..Default::default()
            };
            if output.covenant.is_locking() {
                delta.ulocked = -i128::from(credit.coin.value);
            }
            self.bump(view, account, &delta)?;
            view.delete(self.keys.credit(&outpoint));
            view.delete(self.keys.account_credit(account, &outpoint));
            self.erase_name_rows(view, output, &outpoint, txid)?;
        }

        // Revert the wallet's name mirror with this tx's undo deltas
        if let Some(bytes) = view.get(&self.keys.name_undo(txid))? {
            let undo = NameUndo::decode(&bytes).map_err(corrupt)?;
            for (hash, prior) in undo.entries.iter().rev() {
                match prior {
                    Some(ns) => view.put(self.keys.name(hash), ns.encode()),
                    None => view.delete(self.keys.name(hash)),
                }
            }
            view.delete(self.keys.name_undo(txid));
        }

        view.delete(self.keys.tx(txid));
        view.delete(self.keys.pending(txid));
        view.delete(self.keys.time_index(wtx.mtime, txid));

        let tx_delta = BalanceDelta {
            tx_count: -1,
            ..Default::default()
        };
        self.bump_wallet(view, &tx_delta)?;
        for account in touched_accounts {
            self.bump_account(view, account, &tx_delta)?;
        }
        events.push(WalletEvent::RemovedTx { txid: *txid });
        Ok(())
    }

    /// Maintain the wallet's name mirror and auction rows for a newly inserted tx.
    fn apply_name_covenants(&self, view: &mut View<'_, S>, tx: &Transaction, txid: &Txid) -> Result<(), WalletError> {
        let sync = self.read_sync(view)?;
        let height = sync.height + 1;
        let mut undo = NameUndo::default();
        let mut recorded = BTreeSet::new();

        for (index, output) in tx.outputs.iter().enumerate() {
            let covenant = &output.covenant;
            if !covenant.is_name_covenant() {
                continue;
            }
            if self.account_of(view, &output.address)?.is_none() {
                continue;
            }
            let hash = covenant.name_hash().map_err(|e| WalletError::Corrupt(e.to_string()))?;
            let outpoint = OutPoint::new(*txid, index as u32);
            let prior = self.read_name(view, &hash)?;
            if recorded.insert(hash) {
                undo.entries.push((hash, prior.clone()));
            }

            match covenant.covenant_type() {
                CovenantType::Claim | CovenantType::Open => {
                    let name = covenant.name().map_err(|e| WalletError::Corrupt(e.to_string()))?.to_vec();
                    let mut ns = match prior {
                        Some(mut existing) => {
                            existing.reset(height);
                            existing
                        },
                        None => NameState::open(hash, name, height),
                    };
                    if covenant.covenant_type() == CovenantType::Claim {
                        ns.claimed += 1;
                        ns.owner = outpoint;
                    }
                    view.put(self.keys.name(&hash), ns.encode());
                    view.put(self.keys.open_guard(&hash), txid.to_vec());
                },
                CovenantType::Bid => {
                    let blind = covenant.blind().map_err(|e| WalletError::Corrupt(e.to_string()))?;
                    let bid = BlindBid {
                        name_hash: hash,
                        lockup: output.value,
                        blind,
                        height: UNCONFIRMED_HEIGHT,
                        own: true,
                    };
                    view.put(
                        self.keys.bid(&hash, &outpoint),
                        borsh::to_vec(&bid).expect("BlindBid serialization cannot fail"),
                    );
                },
                CovenantType::Reveal => {
                    let reveal = BidReveal {
                        name_hash: hash,
                        value: output.value,
                        height: UNCONFIRMED_HEIGHT,
                        own: true,
                    };
                    view.put(
                        self.keys.reveal(&hash, &outpoint),
                        borsh::to_vec(&reveal).expect("BidReveal serialization cannot fail"),
                    );
                    // Stash the nonce behind the bid's blind so REDEEM stays constructible
                    if let (Ok(nonce), Some(input)) = (covenant.nonce(), tx.inputs.get(index)) {
                        if let Some(bid_credit) = self.read_credit(view, &input.prevout)? {
                            if let Ok(blind) = bid_credit.coin.covenant.blind() {
                                let record = BlindValue {
                                    value: output.value,
                                    nonce,
                                };
                                view.put(
                                    self.keys.blind_value(&blind),
                                    borsh::to_vec(&record).expect("BlindValue serialization cannot fail"),
                                );
                            }
                        }
                    }
                    if let Some(mut ns) = prior {
                        if output.value > ns.highest {
                            ns.value = ns.highest;
                            ns.highest = output.value;
                            ns.owner = outpoint;
                        } else if output.value > ns.value {
                            ns.value = output.value;
                        }
                        view.put(self.keys.name(&hash), ns.encode());
                    }
                },
                CovenantType::Redeem => {},
                CovenantType::Register => {
                    if let Some(mut ns) = prior {
                        ns.registered = true;
                        ns.data = covenant.data().map_err(|e| WalletError::Corrupt(e.to_string()))?.to_vec();
                        ns.renewal = height;
                        ns.owner = outpoint;
                        view.put(self.keys.name(&hash), ns.encode());
                    }
                },
                CovenantType::Update => {
                    if let Some(mut ns) = prior {
                        ns.data = covenant.data().map_err(|e| WalletError::Corrupt(e.to_string()))?.to_vec();
                        ns.transfer = 0;
                        ns.owner = outpoint;
                        view.put(self.keys.name(&hash), ns.encode());
                    }
                },
                CovenantType::Renew => {
                    if let Some(mut ns) = prior {
                        ns.renewal = height;
                        ns.renewals += 1;
                        ns.owner = outpoint;
                        view.put(self.keys.name(&hash), ns.encode());
                    }
                },
                CovenantType::Transfer => {
                    if let Some(mut ns) = prior {
                        ns.transfer = height;
                        ns.owner = outpoint;
                        view.put(self.keys.name(&hash), ns.encode());
                    }
                },
                CovenantType::Finalize => {
                    if let Some(mut ns) = prior {
                        ns.transfer = 0;
                        ns.renewal = height;
                        ns.renewals += 1;
                        ns.owner = outpoint;
                        view.put(self.keys.name(&hash), ns.encode());
                    }
                },
                CovenantType::Revoke => {
                    if let Some(mut ns) = prior {
                        ns.revoked = height;
                        ns.transfer = 0;
                        ns.data = Vec::new();
                        view.put(self.keys.name(&hash), ns.encode());
                    }
                },
                CovenantType::None => {},
            }
        }

        if !undo.is_empty() {
            view.put(self.keys.name_undo(txid), undo.encode());
        }
        Ok(())
    }

    fn set_name_row_height(
        &self,
        view: &mut View<'_, S>,
        output: &handsel_core::transactions::TxOutput,
        outpoint: &OutPoint,
        height: u64,
    ) -> Result<(), WalletError> {
        match output.covenant.covenant_type() {
            CovenantType::Bid => {
                let hash = output.covenant.name_hash().map_err(|e| WalletError::Corrupt(e.to_string()))?;
                if let Some(bytes) = view.get(&self.keys.bid(&hash, outpoint))? {
                    let mut bid: BlindBid = borsh::from_slice(&bytes).map_err(corrupt)?;
                    bid.height = height;
                    view.put(
                        self.keys.bid(&hash, outpoint),
                        borsh::to_vec(&bid).expect("BlindBid serialization cannot fail"),
                    );
                }
            },
            CovenantType::Reveal => {
                let hash = output.covenant.name_hash().map_err(|e| WalletError::Corrupt(e.to_string()))?;
                if let Some(bytes) = view.get(&self.keys.reveal(&hash, outpoint))? {
                    let mut reveal: BidReveal = borsh::from_slice(&bytes).map_err(corrupt)?;
                    reveal.height = height;
                    view.put(
                        self.keys.reveal(&hash, outpoint),
                        borsh::to_vec(&reveal).expect("BidReveal serialization cannot fail"),
                    );
                }
            },
            _ => {},
        }
        Ok(())
    }

    fn erase_name_rows(
        &self,
        view: &mut View<'_, S>,
        output: &handsel_core::transactions::TxOutput,
        outpoint: &OutPoint,
        txid: &Txid,
    ) -> Result<(), WalletError> {
        if !output.covenant.is_name_covenant() {
            return Ok(());
        }
        let hash = output.covenant.name_hash().map_err(|e| WalletError::Corrupt(e.to_string()))?;
        match output.covenant.covenant_type() {
            CovenantType::Bid => view.delete(self.keys.bid(&hash, outpoint)),
            CovenantType::Reveal => view.delete(self.keys.reveal(&hash, outpoint)),
            CovenantType::Claim | CovenantType::Open => {
                if self.read_open_guard(view, &hash)? == Some(*txid) {
                    view.delete(self.keys.open_guard(&hash));
                }
            },
            _ => {},
        }
        Ok(())
    }

    // ---- small readers/writers over a view ----------------------------------------------

    fn read_tx(&self, view: &View<'_, S>, txid: &Txid) -> Result<Option<WalletTx>, WalletError> {
        match view.get(&self.keys.tx(txid))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(WalletTx::decode(&bytes).map_err(corrupt)?)),
        }
    }

    fn read_credit(&self, view: &View<'_, S>, outpoint: &OutPoint) -> Result<Option<Credit>, WalletError> {
        match view.get(&self.keys.credit(outpoint))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(Credit::decode(&bytes).map_err(corrupt)?)),
        }
    }

    fn read_spender(&self, view: &View<'_, S>, outpoint: &OutPoint) -> Result<Option<Txid>, WalletError> {
        match view.get(&self.keys.spender(outpoint))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(
                Txid::try_from(bytes.as_slice()).map_err(|_| WalletError::Corrupt("bad spender value".into()))?,
            )),
        }
    }

    fn read_name(&self, view: &View<'_, S>, hash: &NameHash) -> Result<Option<NameState>, WalletError> {
        match view.get(&self.keys.name(hash))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(NameState::decode(&bytes).map_err(corrupt)?)),
        }
    }

    fn read_open_guard(&self, view: &View<'_, S>, hash: &NameHash) -> Result<Option<Txid>, WalletError> {
        match view.get(&self.keys.open_guard(hash))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(
                Txid::try_from(bytes.as_slice()).map_err(|_| WalletError::Corrupt("bad open guard value".into()))?,
            )),
        }
    }

    fn read_block_record(&self, view: &View<'_, S>, height: u64) -> Result<Option<BlockRecord>, WalletError> {
        match view.get(&self.keys.block_record(height))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(BlockRecord::decode(&bytes).map_err(corrupt)?)),
        }
    }

    fn read_sync(&self, view: &View<'_, S>) -> Result<SyncState, WalletError> {
        match view.get(&self.keys.sync_state())? {
            None => Ok(SyncState::default()),
            Some(bytes) => Ok(borsh::from_slice(&bytes).map_err(corrupt)?),
        }
    }

    fn write_sync_state(&self, view: &mut View<'_, S>, height: u64, hash: BlockHash) {
        let state = SyncState { height, hash };
        view.put(
            self.keys.sync_state(),
            borsh::to_vec(&state).expect("SyncState serialization cannot fail"),
        );
    }

    fn account_of(&self, view: &View<'_, S>, script: &FixedHash) -> Result<Option<u32>, WalletError> {
        match view.get(&self.keys.address(script))? {
            None => Ok(None),
            Some(bytes) => {
                let raw: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| WalletError::Corrupt("bad address table value".into()))?;
                Ok(Some(u32::from_be_bytes(raw)))
            },
        }
    }

    fn read_balance(&self, view: &View<'_, S>, account: Option<u32>) -> Result<Balance, WalletError> {
        let key = match account {
            None => self.keys.balance(),
            Some(acct) => self.keys.account_balance(acct),
        };
        match view.get(&key)? {
            None => Ok(Balance::default()),
            Some(bytes) => Ok(Balance::decode(&bytes).map_err(corrupt)?),
        }
    }

    /// Apply a delta to both the wallet and the account balance.
    fn bump(&self, view: &mut View<'_, S>, account: u32, delta: &BalanceDelta) -> Result<(), WalletError> {
        self.bump_wallet(view, delta)?;
        self.bump_account(view, account, delta)
    }

    fn bump_wallet(&self, view: &mut View<'_, S>, delta: &BalanceDelta) -> Result<(), WalletError> {
        let mut balance = self.read_balance(view, None)?;
        balance.apply(delta)?;
        view.put(self.keys.balance(), balance.encode());
        Ok(())
    }

    fn bump_account(&self, view: &mut View<'_, S>, account: u32, delta: &BalanceDelta) -> Result<(), WalletError> {
        let mut balance = self.read_balance(view, Some(account))?;
        balance.apply(delta)?;
        view.put(self.keys.account_balance(account), balance.encode());
        Ok(())
    }
}

fn corrupt(e: borsh::io::Error) -> WalletError {
    WalletError::Corrupt(e.to_string())
}

fn decode_outpoint(raw: &[u8]) -> Result<OutPoint, WalletError> {
    if raw.len() != 36 {
        return Err(WalletError::Corrupt("bad outpoint key".into()));
    }
    let hash = Txid::try_from(&raw[..32]).map_err(|_| WalletError::Corrupt("bad outpoint key".into()))?;
    let mut index = [0u8; 4];
    index.copy_from_slice(&raw[32..]);
    Ok(OutPoint::new(hash, u32::from_be_bytes(index)))
}
