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

use blake2::{digest::consts::U32, Blake2b, Digest};
use borsh::{BorshDeserialize, BorshSerialize};
use handsel_common_types::types::FixedHash;

type Blake2b256 = Blake2b<U32>;

/// The root of an empty (sub)tree.
pub const EMPTY_ROOT: FixedHash = FixedHash::zero();

const LEAF_TAG: u8 = 0x00;
const INTERNAL_TAG: u8 = 0x01;

/// A trie node, stored by hash.
///
/// Internals may have one empty child along a padded prefix chain, but never carry a leaf
/// and an empty child together: removal collapses leaves upward so the structure stays
/// canonical and equal contents always hash to equal roots.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Node {
    Leaf { key: FixedHash, value: Vec<u8> },
    Internal { left: FixedHash, right: FixedHash },
}

impl Node {
    pub fn hash(&self) -> FixedHash {
        match self {
            Node::Leaf { key, value } => leaf_hash(key, value),
            Node::Internal { left, right } => internal_hash(left, right),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("Node serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, borsh::io::Error> {
        Self::try_from_slice(bytes)
    }
}

pub fn leaf_hash(key: &FixedHash, value: &[u8]) -> FixedHash {
    let value_hash: [u8; 32] = Blake2b256::digest(value).into();
    let mut hasher = Blake2b256::new();
    hasher.update([LEAF_TAG]);
    hasher.update(key.as_slice());
    hasher.update(value_hash);
    let out: [u8; 32] = hasher.finalize().into();
    FixedHash::from(out)
}

pub fn internal_hash(left: &FixedHash, right: &FixedHash) -> FixedHash {
    let mut hasher = Blake2b256::new();
    hasher.update([INTERNAL_TAG]);
    hasher.update(left.as_slice());
    hasher.update(right.as_slice());
    let out: [u8; 32] = hasher.finalize().into();
    FixedHash::from(out)
}

/// Bit `index` of `key`, most significant first. Determines the branch taken at depth
/// `index`: 0 goes left, 1 goes right.
pub(crate) fn key_bit(key: &FixedHash, index: usize) -> u8 {
    (key.as_slice()[index >> 3] >> (7 - (index & 7))) & 1
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn leaf_hash_depends_on_key_and_value() {
        let k1 = FixedHash::from([1u8; 32]);
        let k2 = FixedHash::from([2u8; 32]);
        assert_ne!(leaf_hash(&k1, b"a"), leaf_hash(&k2, b"a"));
        assert_ne!(leaf_hash(&k1, b"a"), leaf_hash(&k1, b"b"));
        assert_eq!(leaf_hash(&k1, b"a"), leaf_hash(&k1, b"a"));
    }

    #[test]
    fn internal_hash_is_order_sensitive() {
        let l = FixedHash::from([3u8; 32]);
        let r = FixedHash::from([4u8; 32]);
        assert_ne!(internal_hash(&l, &r), internal_hash(&r, &l));
    }

    #[test]
    fn key_bits_are_msb_first() {
        let key = FixedHash::from([0b1010_0000u8; 32]);
        assert_eq!(key_bit(&key, 0), 1);
        assert_eq!(key_bit(&key, 1), 0);
        assert_eq!(key_bit(&key, 2), 1);
        assert_eq!(key_bit(&key, 3), 0);
        assert_eq!(key_bit(&key, 8), 1);
    }

    #[test]
    fn node_encoding_round_trips() {
        let node = Node::Leaf {
            key: FixedHash::from([9u8; 32]),
            value: vec![1, 2, 3],
        };
        assert_eq!(Node::decode(&node.encode()).unwrap(), node);
    }
}
