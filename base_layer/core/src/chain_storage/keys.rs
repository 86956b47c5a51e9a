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

//! The chain store's single-letter key layout.
//!
//! `V` version, `O` options, `R` chain state, `D` deployment bits, `e/h/H/n/p` entry and
//! chain indexes, `b/u/c/t` block data, `A/U` name state and undo, `k…` the tree bucket,
//! `s` the tree state record.

use handsel_common_types::{
    types::{BlockHash, NameHash, Txid},
    OutPoint,
};

pub const KEY_OPTIONS: &[u8] = b"O";
pub const KEY_STATE: &[u8] = b"R";
pub const KEY_DEPLOYMENTS: &[u8] = b"D";
pub const KEY_TREE_STATE: &[u8] = b"s";
pub const TREE_PREFIX: &[u8] = b"k";

fn hash_key(tag: u8, hash: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + hash.len());
    key.push(tag);
    key.extend_from_slice(hash);
    key
}

pub fn entry(hash: &BlockHash) -> Vec<u8> {
    hash_key(b'e', hash.as_slice())
}

pub fn height_by_hash(hash: &BlockHash) -> Vec<u8> {
    hash_key(b'h', hash.as_slice())
}

pub fn hash_by_height(height: u64) -> Vec<u8> {
    hash_key(b'H', &height.to_be_bytes())
}

pub fn next_hash(hash: &BlockHash) -> Vec<u8> {
    hash_key(b'n', hash.as_slice())
}

pub fn side_tip(hash: &BlockHash) -> Vec<u8> {
    hash_key(b'p', hash.as_slice())
}

pub const SIDE_TIP_PREFIX: &[u8] = b"p";

pub fn block(hash: &BlockHash) -> Vec<u8> {
    hash_key(b'b', hash.as_slice())
}

pub fn undo(hash: &BlockHash) -> Vec<u8> {
    hash_key(b'u', hash.as_slice())
}

pub fn coin(outpoint: &OutPoint) -> Vec<u8> {
    hash_key(b'c', &outpoint.to_key_bytes())
}

pub const COIN_PREFIX: &[u8] = b"c";

pub fn tx(txid: &Txid) -> Vec<u8> {
    hash_key(b't', txid.as_slice())
}

pub fn name(hash: &NameHash) -> Vec<u8> {
    hash_key(b'A', hash.as_slice())
}

pub const NAME_PREFIX: &[u8] = b"A";

pub fn name_undo(hash: &BlockHash) -> Vec<u8> {
    hash_key(b'U', hash.as_slice())
}
