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

use std::{collections::BTreeMap, sync::Arc};

use handsel_common::{ChainConfig, Network};
use handsel_common_types::{types::FixedHash, OutPoint};
use handsel_core::{
    blocks::ChainEntry,
    chain_storage::{keys, BlockAddResult, ChainDatabase, ChainStorageError},
    covenants::Covenant,
    hashing::bid_blind,
    name_state::{name_hash, NameStatus},
    test_helpers::{create_test_db, create_test_db_with_config, mine_block, mine_empty_blocks, next_block, COINBASE_REWARD},
    transactions::{Transaction, TxInput, TxOutput},
    validation::ChainLinkValidator,
};
use handsel_shutdown::ShutdownSignal;
use handsel_storage::{KeyValueStore, MemoryStore};
use handsel_tree::TreeError;

const NAME: &[u8] = b"dollarydoo";

fn addr(n: u8) -> FixedHash {
    FixedHash::from([n; 32])
}

fn miner() -> FixedHash {
    addr(0xee)
}

/// The coinbase outpoint of the block mined at `height` in these tests.
fn coinbase_outpoint(db: &ChainDatabase<MemoryStore>, height: u64) -> OutPoint {
    let block = db.fetch_block_by_height(height).unwrap();
    OutPoint::new(block.transactions[0].txid(), 0)
}

fn spend_coinbase(db: &ChainDatabase<MemoryStore>, height: u64, outputs: Vec<TxOutput>) -> Transaction {
    let prevout = coinbase_outpoint(db, height);
    Transaction::new(vec![TxInput::spending(prevout)], outputs)
}

/// Snapshot of the parts of chain state that must be byte-identical across a
/// connect/disconnect round trip.
fn chain_snapshot(db: &ChainDatabase<MemoryStore>, store: &MemoryStore) -> (Vec<u8>, Vec<(Vec<u8>, Vec<u8>)>, FixedHash, Vec<(Vec<u8>, Vec<u8>)>) {
    (
        store.get(keys::KEY_STATE).unwrap().unwrap(),
        store.scan_prefix(keys::COIN_PREFIX).unwrap(),
        db.tree_root().unwrap(),
        store.scan_prefix(keys::NAME_PREFIX).unwrap(),
    )
}

#[test]
fn open_initializes_genesis() {
    let db = create_test_db();
    let state = db.state().unwrap();
    assert_eq!(state.height, 0);
    let tip = db.tip_entry().unwrap();
    assert_eq!(tip.height, 0);
    assert_eq!(tip.hash, state.tip);
    // The genesis boundary committed an empty tree
    assert_eq!(db.tree_root().unwrap(), handsel_tree::EMPTY_ROOT);
    assert_eq!(db.tree_state().unwrap().commit_height, 0);
}

#[test]
fn reopen_preserves_state() {
    let store = MemoryStore::new();
    let config = ChainConfig::new(Network::Regtest);
    let tip = {
        let db = ChainDatabase::open(store.clone(), config.clone(), Arc::new(ChainLinkValidator)).unwrap();
        mine_empty_blocks(&db, miner(), 12);
        db.tip_entry().unwrap()
    };
    let db = ChainDatabase::open(store, config, Arc::new(ChainLinkValidator)).unwrap();
    assert_eq!(db.tip_entry().unwrap(), tip);
    assert_eq!(db.state().unwrap().height, 12);
}

#[test]
fn mining_accumulates_coins_and_work() {
    let db = create_test_db();
    mine_empty_blocks(&db, miner(), 5);
    let state = db.state().unwrap();
    assert_eq!(state.height, 5);
    assert_eq!(state.coin_count, 5);
    assert_eq!(state.total_value, 5 * u128::from(COINBASE_REWARD));
    assert!(state.chainwork > 0);
    // Each coinbase is a live coin
    let coin = db.fetch_coin(&coinbase_outpoint(&db, 3)).unwrap().unwrap();
    assert!(coin.coinbase);
    assert_eq!(coin.value, COINBASE_REWARD);
    assert_eq!(coin.height, 3);
}

#[test]
fn spending_moves_value_and_writes_undo() {
    let db = create_test_db();
    mine_empty_blocks(&db, miner(), 5);
    let tx = spend_coinbase(&db, 1, vec![
        TxOutput::new(COINBASE_REWARD - 7, addr(1)),
        TxOutput::new(7, addr(2)),
    ]);
    let txid = tx.txid();
    let spent = coinbase_outpoint(&db, 1);
    mine_block(&db, miner(), vec![tx]);

    assert!(db.fetch_coin(&spent).unwrap().is_none());
    assert_eq!(db.fetch_coin(&OutPoint::new(txid, 0)).unwrap().unwrap().value, COINBASE_REWARD - 7);
    assert_eq!(db.fetch_coin(&OutPoint::new(txid, 1)).unwrap().unwrap().value, 7);
    let record = db.fetch_tx(&txid).unwrap().unwrap();
    assert_eq!(record.height, 6);

    // coin count: 6 coinbases - 1 spent + 2 created
    assert_eq!(db.state().unwrap().coin_count, 7);
    assert_eq!(db.state().unwrap().total_value, 6 * u128::from(COINBASE_REWARD));
}

#[test]
fn immature_coinbase_spend_is_rejected() {
    let db = create_test_db();
    mine_empty_blocks(&db, miner(), 2);
    // Regtest maturity is 2: the coinbase at height 2 is spendable at height 4, not 3
    let tx = spend_coinbase(&db, 2, vec![TxOutput::new(COINBASE_REWARD, addr(1))]);
    let parent = db.tip_entry().unwrap();
    let block = next_block(&parent, miner(), vec![tx.clone()], 0);
    match db.add_block(block) {
        Err(ChainStorageError::Validation(_)) => {},
        other => panic!("expected validation failure, got {:?}", other.map(|_| ())),
    }
    mine_empty_blocks(&db, miner(), 1);
    mine_block(&db, miner(), vec![tx]);
}

#[test]
fn double_spend_within_a_block_is_rejected() {
    let db = create_test_db();
    mine_empty_blocks(&db, miner(), 5);
    let tx1 = spend_coinbase(&db, 1, vec![TxOutput::new(COINBASE_REWARD, addr(1))]);
    let tx2 = spend_coinbase(&db, 1, vec![TxOutput::new(COINBASE_REWARD, addr(2))]);
    let parent = db.tip_entry().unwrap();
    let block = next_block(&parent, miner(), vec![tx1, tx2], 0);
    assert!(matches!(db.add_block(block), Err(ChainStorageError::Validation(_))));
}

#[test]
fn connect_then_disconnect_restores_state_exactly() {
    // Open on a store handle we keep, so we can inspect raw key ranges
    let store = MemoryStore::new();
    let db = ChainDatabase::open(store.clone(), ChainConfig::new(Network::Regtest), Arc::new(ChainLinkValidator)).unwrap();
    mine_empty_blocks(&db, miner(), 7);

    let before = chain_snapshot(&db, &store);
    let tx = spend_coinbase(&db, 2, vec![TxOutput::new(COINBASE_REWARD, addr(9))]);
    mine_block(&db, miner(), vec![tx]);
    let after_connect = chain_snapshot(&db, &store);
    assert_ne!(before.1, after_connect.1);

    db.rewind_to_height(7).unwrap();
    let after_disconnect = chain_snapshot(&db, &store);
    assert_eq!(before, after_disconnect);
}

#[test]
fn tree_commits_every_interval_and_lands_in_the_entry() {
    let db = create_test_db();
    // Fund and open a name so boundary commits have content
    mine_empty_blocks(&db, miner(), 100);
    let hash = name_hash(NAME);
    let open = spend_coinbase(&db, 1, vec![
        TxOutput::with_covenant(0, addr(1), Covenant::open(hash, 101, NAME)),
        TxOutput::new(COINBASE_REWARD, addr(1)),
    ]);
    mine_block(&db, miner(), vec![open]); // height 101
    let pre_boundary = db.tip_entry().unwrap();
    // The open is not yet committed to the tree
    assert_eq!(db.tree_get(&hash).unwrap(), None);
    assert_eq!(pre_boundary.tree_root, db.tree_state().unwrap().tree_root);

    mine_empty_blocks(&db, miner(), 4); // height 105: boundary
    let boundary = db.tip_entry().unwrap();
    assert_ne!(boundary.tree_root, pre_boundary.tree_root);
    assert_eq!(db.tree_state().unwrap().commit_height, 105);
    let leaf = db.tree_get(&hash).unwrap().unwrap();
    let ns = db.fetch_name_state(&hash).unwrap().unwrap();
    assert_eq!(leaf, ns.encode());
    db.audit().unwrap();
}

fn run_auction(db: &ChainDatabase<MemoryStore>) -> (OutPoint, u64) {
    // Fund the wallet by mining 100 blocks
    mine_empty_blocks(db, miner(), 100);
    let hash = name_hash(NAME);

    // OPEN at height 101
    let open = spend_coinbase(db, 1, vec![
        TxOutput::with_covenant(0, addr(1), Covenant::open(hash, 101, NAME)),
        TxOutput::new(COINBASE_REWARD, addr(1)),
    ]);
    mine_block(db, miner(), vec![open]);
    assert_eq!(db.name_status(&hash).unwrap().unwrap().1, NameStatus::Opening);

    // BID at height 107: lockup 20000, value 10000
    mine_empty_blocks(db, miner(), 5);
    let nonce = [1u8; 32];
    let blind = bid_blind(10_000, &nonce);
    let bid = spend_coinbase(db, 2, vec![
        TxOutput::with_covenant(20_000, addr(1), Covenant::bid(hash, 101, NAME, blind)),
        TxOutput::new(COINBASE_REWARD - 20_000, addr(1)),
    ]);
    let bid_txid = bid.txid();
    mine_block(db, miner(), vec![bid]);
    assert_eq!(db.name_status(&hash).unwrap().unwrap().1, NameStatus::Bidding);

    // REVEAL at height 113
    mine_empty_blocks(db, miner(), 5);
    let reveal = Transaction::new(
        vec![TxInput::spending(OutPoint::new(bid_txid, 0))],
        vec![
            TxOutput::with_covenant(10_000, addr(1), Covenant::reveal(hash, 101, nonce)),
            TxOutput::new(10_000, addr(1)),
        ],
    );
    let reveal_txid = reveal.txid();
    mine_block(db, miner(), vec![reveal]);
    assert_eq!(db.name_status(&hash).unwrap().unwrap().1, NameStatus::Revealing);

    // Close the auction
    mine_empty_blocks(db, miner(), 10);
    (OutPoint::new(reveal_txid, 0), db.state().unwrap().height)
}

#[test]
fn auction_round_resolves_with_second_price_zero() {
    let db = create_test_db();
    let (winner, _) = run_auction(&db);
    let hash = name_hash(NAME);
    let (ns, status) = db.name_status(&hash).unwrap().unwrap();
    assert_eq!(status, NameStatus::Closed);
    assert_eq!(ns.owner, winner);
    assert_eq!(ns.highest, 10_000);
    assert_eq!(ns.value, 0);
}

#[test]
fn register_then_update_chain() {
    let db = create_test_db();
    let (winner, _) = run_auction(&db);
    let hash = name_hash(NAME);

    // REGISTER pays the second price (0 here)
    let register = Transaction::new(
        vec![TxInput::spending(winner)],
        vec![
            TxOutput::with_covenant(0, addr(1), Covenant::register(hash, 101, &[0])),
            TxOutput::new(10_000, addr(1)),
        ],
    );
    let mut owner = OutPoint::new(register.txid(), 0);
    mine_block(&db, miner(), vec![register]);
    let (ns, status) = db.name_status(&hash).unwrap().unwrap();
    assert_eq!(status, NameStatus::Registered);
    assert_eq!(ns.data, [0]);

    // A chain of UPDATEs, each spending the previous owner output
    for i in 1u8..=10 {
        let update = Transaction::new(
            vec![TxInput::spending(owner)],
            vec![TxOutput::with_covenant(0, addr(1), Covenant::update(hash, 101, &[i]))],
        );
        owner = OutPoint::new(update.txid(), 0);
        mine_block(&db, miner(), vec![update]);
        assert_eq!(db.fetch_name_state(&hash).unwrap().unwrap().data, [i]);
    }

    // Shallow rewind unwinds the resource data
    db.rewind_to_height(db.state().unwrap().height - 4).unwrap();
    assert_eq!(db.fetch_name_state(&hash).unwrap().unwrap().data, [6]);
}

#[test]
fn reorg_to_heavier_side_chain() {
    let db = create_test_db();
    mine_empty_blocks(&db, miner(), 3);
    let fork_point = db.fetch_entry_by_height(2).unwrap();
    let main_tip = db.tip_entry().unwrap();

    // A side chain forking at height 2
    let side3 = next_block(&fork_point, addr(7), vec![], 77);
    let result = db.add_block(side3.clone()).unwrap();
    assert!(matches!(result, BlockAddResult::SideChain(_)));
    assert_eq!(db.tip_entry().unwrap(), main_tip);

    // Extending it outweighs the main chain and triggers a reorg
    let side3_entry = db.fetch_entry(&side3.hash()).unwrap();
    let side4 = next_block(&side3_entry, addr(7), vec![], 78);
    let result = db.add_block(side4.clone()).unwrap();
    result.assert_reorg(1, 2);
    assert_eq!(db.tip_entry().unwrap().hash, side4.hash());
    assert_eq!(db.state().unwrap().height, 4);
    // The replaced block is indexed as a side tip now
    assert_eq!(db.fetch_entry_by_height(3).unwrap().hash, side3.hash());
}

#[test]
fn duplicate_and_orphan_blocks() {
    let db = create_test_db();
    mine_empty_blocks(&db, miner(), 2);
    let tip = db.tip_entry().unwrap();
    let block = next_block(&tip, miner(), vec![], 5);
    db.add_block(block.clone()).unwrap().assert_added();
    assert!(matches!(db.add_block(block).unwrap(), BlockAddResult::BlockExists));

    let orphan_parent = ChainEntry {
        hash: FixedHash::random(),
        ..tip
    };
    let orphan = next_block(&orphan_parent, miner(), vec![], 6);
    assert!(matches!(db.add_block(orphan), Err(ChainStorageError::OrphanBlock(_))));
}

#[test]
fn deep_rewind_across_tree_boundary() {
    let db = create_test_db();
    let (winner, _) = run_auction(&db);
    let hash = name_hash(NAME);
    let register = Transaction::new(
        vec![TxInput::spending(winner)],
        vec![TxOutput::with_covenant(0, addr(1), Covenant::register(hash, 101, b"zone"))],
    );
    mine_block(&db, miner(), vec![register]);
    // Land exactly on a boundary so several commits cover the name
    let to_boundary = 5 - db.state().unwrap().height % 5;
    mine_empty_blocks(&db, miner(), to_boundary as usize + 10);

    let height = db.state().unwrap().height;
    db.rewind_to_height(height - 12).unwrap();
    // The name still resolves and the tree matches the rewound boundary
    let entry = db
        .fetch_entry_by_height(db.params().last_tree_boundary(height - 12))
        .unwrap();
    assert_eq!(db.tree_root().unwrap(), entry.tree_root);
    assert!(db.fetch_name_state(&hash).unwrap().is_some());

    // Mining forward again re-commits cleanly
    mine_empty_blocks(&db, miner(), 15);
    db.audit().unwrap();
}

#[test]
fn compact_tree_enforces_minimum_length_and_retention() {
    let db = create_test_db();
    mine_empty_blocks(&db, miner(), 10);
    assert!(matches!(
        db.compact_tree(&ShutdownSignal::never()),
        Err(ChainStorageError::ChainTooShort)
    ));

    // Build history with tree churn: an auction plus updates
    let (winner, _) = run_auction(&db);
    let hash = name_hash(NAME);
    let register = Transaction::new(
        vec![TxInput::spending(winner)],
        vec![TxOutput::with_covenant(0, addr(1), Covenant::register(hash, 101, &[0]))],
    );
    let mut owner = OutPoint::new(register.txid(), 0);
    mine_block(&db, miner(), vec![register]);
    for i in 1u8..=30 {
        let update = Transaction::new(
            vec![TxInput::spending(owner)],
            vec![TxOutput::with_covenant(0, addr(1), Covenant::update(hash, 101, &[i]))],
        );
        owner = OutPoint::new(update.txid(), 0);
        mine_block(&db, miner(), vec![update]);
    }

    let height = db.state().unwrap().height;
    db.compact_tree(&ShutdownSignal::never()).unwrap();
    let tree_state = db.tree_state().unwrap();
    // Nearest boundary at or above tip - keep_blocks (regtest keep = 40)
    let base = height - 40;
    let expected = base + (5 - base % 5) % 5;
    assert_eq!(tree_state.compaction_height, expected);

    // Rewinds within the window still work
    db.rewind_to_height(height - 10).unwrap();
    // Rewinding past the compaction horizon cannot restore the tree root
    let err = db.rewind_to_height(tree_state.compaction_height.saturating_sub(10)).unwrap_err();
    assert!(matches!(err, ChainStorageError::Tree(TreeError::MissingNode(_))));
}

#[test]
fn compact_tree_is_idempotent() {
    let db = create_test_db();
    let (winner, _) = run_auction(&db);
    let hash = name_hash(NAME);
    let register = Transaction::new(
        vec![TxInput::spending(winner)],
        vec![TxOutput::with_covenant(0, addr(1), Covenant::register(hash, 101, &[0]))],
    );
    mine_block(&db, miner(), vec![register]);
    mine_empty_blocks(&db, miner(), 40);

    db.compact_tree(&ShutdownSignal::never()).unwrap();
    let first = db.tree_state().unwrap();
    db.compact_tree(&ShutdownSignal::never()).unwrap();
    assert_eq!(db.tree_state().unwrap(), first);
}

#[test]
fn reconstruct_tree_rebuilds_history() {
    let db = create_test_db();
    let (winner, _) = run_auction(&db);
    let hash = name_hash(NAME);
    let register = Transaction::new(
        vec![TxInput::spending(winner)],
        vec![TxOutput::with_covenant(0, addr(1), Covenant::register(hash, 101, b"zone"))],
    );
    mine_block(&db, miner(), vec![register]);
    mine_empty_blocks(&db, miner(), 20);

    let root_before = db.tree_root().unwrap();
    db.reconstruct_tree(&ShutdownSignal::never()).unwrap();
    assert_eq!(db.tree_root().unwrap(), root_before);
    db.audit().unwrap();
}

#[test]
fn reconstruct_refused_under_pruning() {
    let mut config = ChainConfig::new(Network::Regtest);
    config.prune = true;
    let db = create_test_db_with_config(config);
    mine_empty_blocks(&db, miner(), 5);
    assert!(matches!(
        db.reconstruct_tree(&ShutdownSignal::never()),
        Err(ChainStorageError::RequiresArchival(_))
    ));
}

#[test]
fn stale_tree_state_record_is_reconciled_at_open() {
    let store = MemoryStore::new();
    let config = ChainConfig::new(Network::Regtest);
    {
        let db = ChainDatabase::open(store.clone(), config.clone(), Arc::new(ChainLinkValidator)).unwrap();
        mine_empty_blocks(&db, miner(), 12);
    }
    // Clobber the chain's tree record; the tree itself is intact
    let mut stale: handsel_core::chain_storage::TreeState =
        borsh::from_slice(&store.get(b"s").unwrap().unwrap()).unwrap();
    stale.tree_root = FixedHash::random();
    store.put(b"s", &borsh::to_vec(&stale).unwrap()).unwrap();

    let db = ChainDatabase::open(store.clone(), config, Arc::new(ChainLinkValidator)).unwrap();
    assert_eq!(db.tree_state().unwrap().tree_root, db.tree_root().unwrap());
}

#[test]
fn events_follow_connects_and_disconnects() {
    let db = create_test_db();
    let mut events = db.subscribe();
    mine_empty_blocks(&db, miner(), 5);
    db.rewind_to_height(4).unwrap();

    let mut connected = Vec::new();
    let mut disconnected = Vec::new();
    let mut commits = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            handsel_core::chain_storage::ChainEvent::Connected { entry, .. } => connected.push(entry.height),
            handsel_core::chain_storage::ChainEvent::Disconnected { entry, .. } => disconnected.push(entry.height),
            handsel_core::chain_storage::ChainEvent::TreeCommit { height, .. } => commits.push(height),
            _ => {},
        }
    }
    assert_eq!(connected, vec![1, 2, 3, 4, 5]);
    assert_eq!(disconnected, vec![5]);
    assert_eq!(commits, vec![5]);
}

#[test]
fn totals_audit_via_migration_state() {
    // A fresh database initializes the migration framework at the current version, so a
    // second open runs nothing
    let store = MemoryStore::new();
    let config = ChainConfig::new(Network::Regtest);
    {
        ChainDatabase::open(store.clone(), config.clone(), Arc::new(ChainLinkValidator)).unwrap();
    }
    let before: BTreeMap<Vec<u8>, Vec<u8>> = store
        .range(std::ops::Bound::Unbounded, std::ops::Bound::Unbounded)
        .unwrap()
        .into_iter()
        .collect();
    {
        ChainDatabase::open(store.clone(), config, Arc::new(ChainLinkValidator)).unwrap();
    }
    let after: BTreeMap<Vec<u8>, Vec<u8>> = store
        .range(std::ops::Bound::Unbounded, std::ops::Bound::Unbounded)
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(before, after);
}
