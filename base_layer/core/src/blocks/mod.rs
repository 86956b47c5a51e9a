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

use borsh::{BorshDeserialize, BorshSerialize};
use handsel_common_types::types::{BlockHash, FixedHash};

use crate::{
    hashing::{blake2b256, blake2b256_pair},
    transactions::Transaction,
};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: BlockHash,
    pub merkle_root: FixedHash,
    /// Root of the authenticated name tree as of the last tree-interval boundary at or
    /// below this height.
    pub tree_root: FixedHash,
    /// Commitment to the reserved-name claim set.
    pub reserved_root: FixedHash,
    pub height: u64,
    pub time: u64,
    /// Work units contributed by this block. Proof-of-work validation happens outside the
    /// state layer; the chain only accumulates work to compare branches.
    pub bits: u32,
    pub nonce: u64,
}

impl BlockHeader {
    pub fn hash(&self) -> BlockHash {
        blake2b256(&borsh::to_vec(self).expect("BlockHeader serialization cannot fail"))
    }

    /// The header extending this one, with fields the chain fills in at connect time left
    /// zeroed.
    pub fn next(&self, time: u64) -> BlockHeader {
        BlockHeader {
            version: self.version,
            prev_hash: self.hash(),
            merkle_root: FixedHash::zero(),
            tree_root: FixedHash::zero(),
            reserved_root: self.reserved_root,
            height: self.height + 1,
            time,
            bits: self.bits,
            nonce: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self { header, transactions }
    }

    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Pairwise merkle root over the txids, duplicating the last entry on odd levels.
    pub fn compute_merkle_root(&self) -> FixedHash {
        let mut level: Vec<FixedHash> = self.transactions.iter().map(|tx| tx.txid()).collect();
        if level.is_empty() {
            return FixedHash::zero();
        }
        while level.len() > 1 {
            if level.len() % 2 != 0 {
                level.push(*level.last().expect("non-empty"));
            }
            level = level
                .chunks(2)
                .map(|pair| blake2b256_pair(pair[0].as_slice(), pair[1].as_slice()))
                .collect();
        }
        level[0]
    }

    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("Block serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, borsh::io::Error> {
        Self::try_from_slice(bytes)
    }
}

/// A block header as stored in the chain, with its accumulated work. Immutable once
/// written.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChainEntry {
    pub hash: BlockHash,
    pub prev_hash: BlockHash,
    pub height: u64,
    pub time: u64,
    pub bits: u32,
    pub tree_root: FixedHash,
    pub reserved_root: FixedHash,
    pub nonce: u64,
    pub chainwork: u128,
}

impl ChainEntry {
    pub fn from_header(header: &BlockHeader, prev_chainwork: u128) -> Self {
        Self {
            hash: header.hash(),
            prev_hash: header.prev_hash,
            height: header.height,
            time: header.time,
            bits: header.bits,
            tree_root: header.tree_root,
            reserved_root: header.reserved_root,
            nonce: header.nonce,
            chainwork: prev_chainwork + u128::from(header.bits),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("ChainEntry serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, borsh::io::Error> {
        Self::try_from_slice(bytes)
    }
}

/// The deterministic first block of a network.
pub fn genesis_block(network: handsel_common::Network) -> Block {
    let time = match network {
        handsel_common::Network::Mainnet => 1_580_745_600,
        handsel_common::Network::Testnet => 1_580_745_601,
        handsel_common::Network::Regtest => 1_580_745_602,
    };
    let header = BlockHeader {
        version: 0,
        prev_hash: BlockHash::zero(),
        merkle_root: FixedHash::zero(),
        tree_root: FixedHash::zero(),
        reserved_root: FixedHash::zero(),
        height: 0,
        time,
        bits: 1,
        nonce: 0,
    };
    Block::new(header, Vec::new())
}
