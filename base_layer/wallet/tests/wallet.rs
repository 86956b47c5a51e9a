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

use std::sync::Arc;

use handsel_common::{Network, WalletConfig};
use handsel_common_types::{types::FixedHash, OutPoint};
use handsel_core::{
    chain_storage::{ChainDatabase, ChainEvent},
    covenants::Covenant,
    hashing::bid_blind,
    name_state::name_hash,
    test_helpers::{create_test_db, mine_block, mine_empty_blocks, COINBASE_REWARD},
    transactions::{Transaction, TxInput, TxOutput},
};
use handsel_shutdown::ShutdownSignal;
use handsel_storage::{
    migration::{encode_version, legacy_marker_key, MigrationError, VERSION_KEY},
    KeyValueStore,
    MemoryStore,
};
use handsel_wallet::{
    node_client::LocalNodeClient,
    storage::UNCONFIRMED_HEIGHT,
    Wallet,
    WalletError,
    WalletEvent,
};
use tokio::sync::broadcast;

const NAME: &[u8] = b"dollarydoo";

fn wallet_addr() -> FixedHash {
    FixedHash::from([0x11; 32])
}

fn external_addr() -> FixedHash {
    FixedHash::from([0x99; 32])
}

struct Harness {
    chain: ChainDatabase<MemoryStore>,
    wallet: Wallet<MemoryStore>,
    chain_events: broadcast::Receiver<ChainEvent>,
}

impl Harness {
    fn new() -> Self {
        let chain = create_test_db();
        let chain_events = chain.subscribe();
        let wallet = Wallet::open(MemoryStore::new(), 1, WalletConfig::new(Network::Regtest)).unwrap();
        wallet.add_address(0, wallet_addr()).unwrap();
        Self {
            chain,
            wallet,
            chain_events,
        }
    }

    /// Feed every pending chain event into the wallet, in order.
    fn sync(&mut self) {
        while let Ok(event) = self.chain_events.try_recv() {
            self.wallet.handle_chain_event(&event).unwrap();
        }
    }

    fn mine(&mut self, txs: Vec<Transaction>) -> u64 {
        let entry = mine_block(&self.chain, wallet_addr(), txs);
        self.sync();
        entry.height
    }

    fn mine_many(&mut self, count: usize) {
        mine_empty_blocks(&self.chain, wallet_addr(), count);
        self.sync();
    }

    fn rewind(&mut self, height: u64) {
        self.chain.rewind_to_height(height).unwrap();
        self.sync();
    }

    fn coinbase_outpoint(&self, height: u64) -> OutPoint {
        let block = self.chain.fetch_block_by_height(height).unwrap();
        OutPoint::new(block.transactions[0].txid(), 0)
    }

    fn spend_coinbase(&self, height: u64, outputs: Vec<TxOutput>) -> Transaction {
        Transaction::new(vec![TxInput::spending(self.coinbase_outpoint(height))], outputs)
    }
}

#[test]
fn wallet_tracks_mined_coinbases() {
    let mut harness = Harness::new();
    harness.mine_many(5);
    let balance = harness.wallet.balance().unwrap();
    assert_eq!(balance.tx_count, 5);
    assert_eq!(balance.coin_count, 5);
    assert_eq!(balance.confirmed, 5 * COINBASE_REWARD);
    assert_eq!(balance.unconfirmed, 5 * COINBASE_REWARD);
    assert_eq!(harness.wallet.sync_state().unwrap().height, 5);
    harness.wallet.audit_balances().unwrap();
}

#[test]
fn irrelevant_transactions_are_ignored() {
    let mut harness = Harness::new();
    harness.mine_many(3);
    let foreign = Transaction::new(
        vec![TxInput::spending(OutPoint::new(FixedHash::random(), 0))],
        vec![TxOutput::new(5, external_addr())],
    );
    assert!(!harness.wallet.add_tx(&foreign).unwrap());
    assert_eq!(harness.wallet.balance().unwrap().tx_count, 3);
}

#[test]
fn mempool_spend_then_confirmation() {
    let mut harness = Harness::new();
    harness.mine_many(5);
    let spend = harness.spend_coinbase(1, vec![
        TxOutput::new(COINBASE_REWARD - 9000, external_addr()),
        TxOutput::new(9000, wallet_addr()),
    ]);
    let spent_outpoint = harness.coinbase_outpoint(1);
    assert!(harness.wallet.add_tx(&spend).unwrap());

    // Unconfirmed view reflects the spend; confirmed view does not move yet
    let balance = harness.wallet.balance().unwrap();
    assert_eq!(balance.confirmed, 5 * COINBASE_REWARD);
    assert_eq!(balance.unconfirmed, 4 * COINBASE_REWARD + 9000);
    let credit = harness.wallet.credits().unwrap().iter().find(|(o, _)| *o == spent_outpoint).unwrap().1.clone();
    assert!(credit.spent);
    let change = OutPoint::new(spend.txid(), 1);
    assert_eq!(
        harness.wallet.credits().unwrap().iter().find(|(o, _)| *o == change).unwrap().1.coin.height,
        UNCONFIRMED_HEIGHT
    );
    harness.wallet.audit_balances().unwrap();

    // Confirmation moves the confirmed view and removes the spent credit
    harness.mine(vec![spend.clone()]);
    let balance = harness.wallet.balance().unwrap();
    // 6 coinbases mined to us, minus the full spent one, plus our 9000 change
    assert_eq!(balance.confirmed, 5 * COINBASE_REWARD + 9000);
    assert_eq!(balance.unconfirmed, balance.confirmed);
    assert!(harness.wallet.credits().unwrap().iter().all(|(o, _)| *o != spent_outpoint));
    assert!(harness.wallet.pending_txs().unwrap().is_empty());
    harness.wallet.audit_balances().unwrap();
}

#[test]
fn incoming_payment_from_foreign_coin() {
    let mut harness = Harness::new();
    // Mine to an address the wallet does not own
    mine_empty_blocks(&harness.chain, external_addr(), 3);
    harness.sync();
    assert_eq!(harness.wallet.balance().unwrap().coin_count, 0);

    let foreign_coinbase = harness.coinbase_outpoint(1);
    let payment = Transaction::new(vec![TxInput::spending(foreign_coinbase)], vec![
        TxOutput::new(1234, wallet_addr()),
        TxOutput::new(COINBASE_REWARD - 1234, external_addr()),
    ]);
    mine_block(&harness.chain, external_addr(), vec![payment]);
    harness.sync();

    let balance = harness.wallet.balance().unwrap();
    assert_eq!(balance.coin_count, 1);
    assert_eq!(balance.confirmed, 1234);
    assert_eq!(balance.tx_count, 1);
    harness.wallet.audit_balances().unwrap();
}

#[test]
fn double_spend_evicts_the_earlier_mempool_tx() {
    let mut harness = Harness::new();
    harness.mine_many(5);
    let mut events = harness.wallet.subscribe();

    let tx1 = harness.spend_coinbase(1, vec![TxOutput::new(COINBASE_REWARD, external_addr())]);
    let tx2 = harness.spend_coinbase(1, vec![TxOutput::new(COINBASE_REWARD, wallet_addr())]);
    assert!(harness.wallet.add_tx(&tx1).unwrap());
    assert!(harness.wallet.add_tx(&tx2).unwrap());

    assert!(harness.wallet.get_tx(&tx1.txid()).unwrap().is_none());
    assert_eq!(harness.wallet.pending_txs().unwrap(), vec![tx2.txid()]);
    let mut saw_conflict = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, WalletEvent::Conflict { txid } if txid == tx1.txid()) {
            saw_conflict = true;
        }
    }
    assert!(saw_conflict);
    harness.wallet.audit_balances().unwrap();
}

#[test]
fn confirmed_double_spend_evicts_mempool_tx() {
    let mut harness = Harness::new();
    harness.mine_many(5);
    let tx1 = harness.spend_coinbase(1, vec![TxOutput::new(COINBASE_REWARD, external_addr())]);
    assert!(harness.wallet.add_tx(&tx1).unwrap());
    let tx2 = harness.spend_coinbase(1, vec![TxOutput::new(COINBASE_REWARD, wallet_addr())]);
    harness.mine(vec![tx2.clone()]);

    assert!(harness.wallet.get_tx(&tx1.txid()).unwrap().is_none());
    assert!(harness.wallet.get_tx(&tx2.txid()).unwrap().unwrap().is_confirmed());
    harness.wallet.audit_balances().unwrap();
}

#[test]
fn reorg_moves_transactions_back_to_the_mempool() {
    let mut harness = Harness::new();
    harness.mine_many(5);
    let spend = harness.spend_coinbase(1, vec![TxOutput::new(COINBASE_REWARD, external_addr())]);
    let height = harness.mine(vec![spend.clone()]);
    let confirmed = harness.wallet.balance().unwrap();

    harness.rewind(height - 1);
    // The spend is back in the mempool; confirmed balance no longer sees the block
    assert_eq!(harness.wallet.pending_txs().unwrap(), vec![spend.txid()]);
    let balance = harness.wallet.balance().unwrap();
    assert_eq!(balance.confirmed, 5 * COINBASE_REWARD);
    assert_eq!(balance.unconfirmed, 4 * COINBASE_REWARD);
    harness.wallet.audit_balances().unwrap();

    // A new branch confirming the same tx restores the confirmed view
    let parent = harness.chain.tip_entry().unwrap();
    let block = handsel_core::test_helpers::next_block(&parent, wallet_addr(), vec![spend.clone()], 1);
    harness.chain.add_block(block).unwrap().assert_added();
    harness.sync();
    assert!(harness.wallet.pending_txs().unwrap().is_empty());
    assert_eq!(harness.wallet.balance().unwrap().confirmed, confirmed.confirmed);
    harness.wallet.audit_balances().unwrap();
}

#[test]
fn deep_reorg_keeps_unconfirmed_survivors() {
    let mut harness = Harness::new();
    harness.mine_many(20);
    let spend = harness.spend_coinbase(1, vec![TxOutput::new(COINBASE_REWARD, external_addr())]);
    let height = harness.mine(vec![spend.clone()]);
    harness.mine_many(11);

    // Rewind across a tree interval boundary
    harness.rewind(height - 1);
    assert_eq!(harness.wallet.pending_txs().unwrap(), vec![spend.txid()]);

    // Catch up on a fresh branch that never confirms the tx: it stays in the mempool
    for nonce in 0..8 {
        let parent = harness.chain.tip_entry().unwrap();
        let block = handsel_core::test_helpers::next_block(&parent, external_addr(), vec![], 100 + nonce);
        harness.chain.add_block(block).unwrap().assert_added();
    }
    harness.sync();
    assert_eq!(harness.wallet.pending_txs().unwrap(), vec![spend.txid()]);
    harness.wallet.audit_balances().unwrap();
}

#[test]
fn abandon_removes_descendant_chain() {
    let mut harness = Harness::new();
    harness.mine_many(5);
    let tx1 = harness.spend_coinbase(1, vec![TxOutput::new(COINBASE_REWARD, wallet_addr())]);
    let tx2 = Transaction::new(vec![TxInput::spending(OutPoint::new(tx1.txid(), 0))], vec![TxOutput::new(
        COINBASE_REWARD,
        wallet_addr(),
    )]);
    harness.wallet.add_tx(&tx1).unwrap();
    harness.wallet.add_tx(&tx2).unwrap();
    assert_eq!(harness.wallet.pending_txs().unwrap().len(), 2);

    harness.wallet.abandon(&tx1.txid()).unwrap();
    assert!(harness.wallet.pending_txs().unwrap().is_empty());
    assert!(harness.wallet.get_tx(&tx2.txid()).unwrap().is_none());
    // The original coinbase credit is unspent again
    let credit = harness
        .wallet
        .credits()
        .unwrap()
        .into_iter()
        .find(|(o, _)| *o == harness.coinbase_outpoint(1))
        .unwrap()
        .1;
    assert!(!credit.spent);
    let balance = harness.wallet.balance().unwrap();
    assert_eq!(balance.unconfirmed, 5 * COINBASE_REWARD);
    harness.wallet.audit_balances().unwrap();

    // Abandoning a confirmed tx is refused
    let confirmed_txid = harness
        .chain
        .fetch_block_by_height(1)
        .unwrap()
        .transactions[0]
        .txid();
    assert!(matches!(
        harness.wallet.abandon(&confirmed_txid),
        Err(WalletError::AbandonConfirmed)
    ));
}

#[test]
fn auction_locks_and_unlocks_value() {
    let mut harness = Harness::new();
    harness.mine_many(100);
    let hash = name_hash(NAME);

    // OPEN at 101
    let open = harness.spend_coinbase(1, vec![
        TxOutput::with_covenant(0, wallet_addr(), Covenant::open(hash, 101, NAME)),
        TxOutput::new(COINBASE_REWARD, wallet_addr()),
    ]);
    harness.mine(vec![open]);
    assert!(harness.wallet.name_state(&hash).unwrap().is_some());

    // BID at 107: lockup 20000 hiding a 10000 bid
    harness.mine_many(5);
    let nonce = [1u8; 32];
    let blind = bid_blind(10_000, &nonce);
    harness.wallet.save_blind(blind, 10_000, nonce).unwrap();
    let bid = harness.spend_coinbase(2, vec![
        TxOutput::with_covenant(20_000, wallet_addr(), Covenant::bid(hash, 101, NAME, blind)),
        TxOutput::new(COINBASE_REWARD - 20_000, wallet_addr()),
    ]);
    let bid_outpoint = OutPoint::new(bid.txid(), 0);
    harness.mine(vec![bid.clone()]);

    let balance = harness.wallet.balance().unwrap();
    assert_eq!(balance.ulocked, 20_000);
    assert_eq!(balance.clocked, 20_000);
    let bids = harness.wallet.bids(&hash).unwrap();
    assert_eq!(bids.len(), 1);
    assert_eq!(bids[0].0, bid_outpoint);
    assert_eq!(bids[0].1.lockup, 20_000);
    assert_eq!(harness.wallet.blind_value(&blind).unwrap().unwrap().value, 10_000);

    // REVEAL at 113: the bid unlocks, the revealed value stays locked
    harness.mine_many(5);
    let reveal = Transaction::new(vec![TxInput::spending(bid_outpoint)], vec![
        TxOutput::with_covenant(10_000, wallet_addr(), Covenant::reveal(hash, 101, nonce)),
        TxOutput::new(10_000, wallet_addr()),
    ]);
    let reveal_outpoint = OutPoint::new(reveal.txid(), 0);
    harness.mine(vec![reveal.clone()]);

    let balance = harness.wallet.balance().unwrap();
    assert_eq!(balance.ulocked, 10_000);
    assert_eq!(balance.clocked, 10_000);
    let reveals = harness.wallet.reveals(&hash).unwrap();
    assert_eq!(reveals.len(), 1);
    assert_eq!(reveals[0].1.value, 10_000);
    harness.wallet.audit_balances().unwrap();

    // Close the auction; the wallet mirror shows the winning reveal
    harness.mine_many(10);
    let ns = harness.wallet.name_state(&hash).unwrap().unwrap();
    assert_eq!(ns.highest, 10_000);
    assert_eq!(ns.value, 0);
    assert_eq!(ns.owner, reveal_outpoint);

    // REGISTER at the second price (0): the reveal unlocks
    let register = Transaction::new(vec![TxInput::spending(reveal_outpoint)], vec![
        TxOutput::with_covenant(0, wallet_addr(), Covenant::register(hash, 101, b"zone")),
        TxOutput::new(10_000, wallet_addr()),
    ]);
    harness.mine(vec![register]);
    let balance = harness.wallet.balance().unwrap();
    assert_eq!(balance.ulocked, 0);
    assert_eq!(balance.clocked, 0);
    assert!(harness.wallet.name_state(&hash).unwrap().unwrap().registered);
    harness.wallet.audit_balances().unwrap();
}

#[test]
fn double_open_guard_follows_the_auction_clock() {
    let mut harness = Harness::new();
    harness.mine_many(10);
    let hash = name_hash(NAME);
    let open1 = harness.spend_coinbase(1, vec![
        TxOutput::with_covenant(0, wallet_addr(), Covenant::open(hash, 11, NAME)),
        TxOutput::new(COINBASE_REWARD, wallet_addr()),
    ]);
    harness.wallet.add_tx(&open1).unwrap();

    // A second unconfirmed open for the same name is refused
    let open2 = harness.spend_coinbase(2, vec![
        TxOutput::with_covenant(0, wallet_addr(), Covenant::open(hash, 11, NAME)),
        TxOutput::new(COINBASE_REWARD, wallet_addr()),
    ]);
    assert!(matches!(
        harness.wallet.add_tx(&open2),
        Err(WalletError::DoubleOpen(h)) if h == hash
    ));

    // Confirm the first open, and it is still refused until the auction lapses
    harness.mine(vec![open1]);
    assert!(matches!(harness.wallet.add_tx(&open2), Err(WalletError::DoubleOpen(_))));

    // Regtest bidding + reveal = 15 blocks; after that the open is allowed again
    harness.mine_many(16);
    assert!(harness.wallet.add_tx(&open2).unwrap());
}

#[tokio::test]
async fn rescan_rebuilds_wallet_state() {
    let mut harness = Harness::new();
    harness.mine_many(10);
    let spend = harness.spend_coinbase(1, vec![
        TxOutput::new(COINBASE_REWARD - 5000, external_addr()),
        TxOutput::new(5000, wallet_addr()),
    ]);
    harness.mine(vec![spend]);
    let original = harness.wallet.balance().unwrap();

    // A fresh wallet with the same addresses recovers everything from the chain
    let recovered = Wallet::open(MemoryStore::new(), 1, WalletConfig::new(Network::Regtest)).unwrap();
    recovered.add_address(0, wallet_addr()).unwrap();
    let client = Arc::new(LocalNodeClient::new(harness.chain.clone()));
    recovered
        .rescan(client, 0, ShutdownSignal::never())
        .await
        .unwrap();

    let balance = recovered.balance().unwrap();
    assert_eq!(balance.confirmed, original.confirmed);
    assert_eq!(balance.coin_count, original.coin_count);
    assert_eq!(balance.tx_count, original.tx_count);
    assert_eq!(
        recovered.sync_state().unwrap().height,
        harness.wallet.sync_state().unwrap().height
    );
    recovered.audit_balances().unwrap();
}

#[test]
fn wallet_open_refuses_legacy_store_without_flag() {
    let store = MemoryStore::new();
    store.put(VERSION_KEY, &encode_version("wallet", 1)).unwrap();
    store.put(&legacy_marker_key(0), b"").unwrap();
    store.put(&legacy_marker_key(1), b"").unwrap();

    let err = Wallet::open(store.clone(), 1, WalletConfig::new(Network::Regtest)).unwrap_err();
    match err {
        WalletError::Migration(MigrationError::NeedsMigration { ids, hint }) => {
            assert_eq!(ids, vec![0, 1]);
            assert!(hint.contains("--wallet-migrate=1"));
        },
        other => panic!("unexpected error: {}", other),
    }

    let mut config = WalletConfig::new(Network::Regtest);
    config.migrate = Some(1);
    Wallet::open(store.clone(), 1, config).unwrap();
    // The store is stamped at the current version with the markers converted
    let version = store.get(VERSION_KEY).unwrap().unwrap();
    assert_eq!(version, encode_version("wallet", 2));
    assert!(store.get(&legacy_marker_key(0)).unwrap().is_none());
}
