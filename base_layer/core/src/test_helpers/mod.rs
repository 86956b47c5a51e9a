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

//! Helpers for building small chains in tests. Also used by the wallet crate's tests.

use std::sync::Arc;

use handsel_common::{ChainConfig, Network};
use handsel_common_types::{types::ScriptHash, Amount};
use handsel_storage::MemoryStore;

use crate::{
    blocks::{Block, BlockHeader, ChainEntry},
    chain_storage::ChainDatabase,
    transactions::{Transaction, TxOutput},
    validation::ChainLinkValidator,
};

pub const COINBASE_REWARD: Amount = 50_000_000;

pub fn create_test_db() -> ChainDatabase<MemoryStore> {
    create_test_db_with_config(ChainConfig::new(Network::Regtest))
}

pub fn create_test_db_with_config(config: ChainConfig) -> ChainDatabase<MemoryStore> {
    ChainDatabase::open(MemoryStore::new(), config, Arc::new(ChainLinkValidator)).unwrap()
}

/// Build the block extending `parent` containing a coinbase to `miner` plus `txs`.
/// Distinct `nonce` values give distinct blocks at the same height for fork tests.
pub fn next_block(parent: &ChainEntry, miner: ScriptHash, txs: Vec<Transaction>, nonce: u64) -> Block {
    let header = BlockHeader {
        version: 0,
        prev_hash: parent.hash,
        merkle_root: Default::default(),
        tree_root: Default::default(),
        reserved_root: parent.reserved_root,
        height: parent.height + 1,
        time: parent.time + 1,
        bits: parent.bits,
        nonce,
    };
    let mut transactions = vec![Transaction::coinbase(
        header.height,
        vec![TxOutput::new(COINBASE_REWARD, miner)],
    )];
    transactions.extend(txs);
    let mut block = Block::new(header, transactions);
    block.header.merkle_root = block.compute_merkle_root();
    block
}

/// Mine one block with the given transactions onto the current tip.
pub fn mine_block(db: &ChainDatabase<MemoryStore>, miner: ScriptHash, txs: Vec<Transaction>) -> ChainEntry {
    let parent = db.tip_entry().unwrap();
    let block = next_block(&parent, miner, txs, 0);
    db.add_block(block).unwrap().assert_added()
}

/// Mine `count` empty blocks onto the current tip.
pub fn mine_empty_blocks(db: &ChainDatabase<MemoryStore>, miner: ScriptHash, count: usize) -> Vec<ChainEntry> {
    (0..count).map(|_| mine_block(db, miner, Vec::new())).collect()
}
