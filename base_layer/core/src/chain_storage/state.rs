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

/// The distinguished tip pointer and the running totals, stored under `R`.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChainState {
    pub tip: BlockHash,
    pub height: u64,
    pub chainwork: u128,
    pub coin_count: u64,
    pub total_value: u128,
    pub burned: u128,
}

impl ChainState {
    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("ChainState serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, borsh::io::Error> {
        Self::try_from_slice(bytes)
    }
}

/// The chain's record of where the tree is, stored under `s`. Diverging from the tree's own
/// meta record is only possible after a partial crash, and is reconciled (or refused) at
/// open.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TreeState {
    pub tree_root: FixedHash,
    /// Height of the last tree commit.
    pub commit_height: u64,
    pub compaction_root: FixedHash,
    pub compaction_height: u64,
}

impl TreeState {
    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("TreeState serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, borsh::io::Error> {
        Self::try_from_slice(bytes)
    }
}

/// Immutable open-time options, stored under `O` and checked on every open.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChainOptions {
    pub network: u8,
    pub prune: bool,
    pub spv: bool,
}

impl ChainOptions {
    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("ChainOptions serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, borsh::io::Error> {
        Self::try_from_slice(bytes)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn records_round_trip() {
        let state = ChainState {
            tip: FixedHash::from([1u8; 32]),
            height: 42,
            chainwork: 43,
            coin_count: 44,
            total_value: 45,
            burned: 46,
        };
        assert_eq!(ChainState::decode(&state.encode()).unwrap(), state);

        let tree = TreeState {
            tree_root: FixedHash::from([2u8; 32]),
            commit_height: 40,
            compaction_root: FixedHash::from([3u8; 32]),
            compaction_height: 10,
        };
        assert_eq!(TreeState::decode(&tree.encode()).unwrap(), tree);
    }
}
