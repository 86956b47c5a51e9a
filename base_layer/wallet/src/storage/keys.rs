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

//! Per-wallet bucket layout.
//!
//! Every key is `w <wallet id: u32 BE> <tag> <suffix>`: `t/m/p/h` transaction indexes,
//! `c/C/s/d` credits and spend tracking, `b` per-height block records, `A/U/i/B/v/o` name
//! state, undo and auction rows, `R/r` balances, `a` the address table, `y` sync state.
//! The global `g <block hash> <wallet id>` map lets the node find which wallets a block
//! touched.

use handsel_common_types::{
    types::{BlockHash, FixedHash, NameHash, Txid},
    OutPoint,
};

#[derive(Debug)]
pub struct WalletKeys {
    prefix: Vec<u8>,
}

impl WalletKeys {
    pub fn new(wallet_id: u32) -> Self {
        let mut prefix = Vec::with_capacity(5);
        prefix.push(b'w');
        prefix.extend_from_slice(&wallet_id.to_be_bytes());
        Self { prefix }
    }

    fn tagged(&self, tag: u8, suffix: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.prefix.len() + 1 + suffix.len());
        key.extend_from_slice(&self.prefix);
        key.push(tag);
        key.extend_from_slice(suffix);
        key
    }

    pub fn tx(&self, txid: &Txid) -> Vec<u8> {
        self.tagged(b't', txid.as_slice())
    }

    pub fn time_index(&self, mtime: u64, txid: &Txid) -> Vec<u8> {
        let mut suffix = mtime.to_be_bytes().to_vec();
        suffix.extend_from_slice(txid.as_slice());
        self.tagged(b'm', &suffix)
    }

    pub fn pending(&self, txid: &Txid) -> Vec<u8> {
        self.tagged(b'p', txid.as_slice())
    }

    pub fn pending_prefix(&self) -> Vec<u8> {
        self.tagged(b'p', &[])
    }

    pub fn height_index(&self, height: u64, txid: &Txid) -> Vec<u8> {
        let mut suffix = height.to_be_bytes().to_vec();
        suffix.extend_from_slice(txid.as_slice());
        self.tagged(b'h', &suffix)
    }

    pub fn credit(&self, outpoint: &OutPoint) -> Vec<u8> {
        self.tagged(b'c', &outpoint.to_key_bytes())
    }

    pub fn credit_prefix(&self) -> Vec<u8> {
        self.tagged(b'c', &[])
    }

    pub fn account_credit(&self, account: u32, outpoint: &OutPoint) -> Vec<u8> {
        let mut suffix = account.to_be_bytes().to_vec();
        suffix.extend_from_slice(&outpoint.to_key_bytes());
        self.tagged(b'C', &suffix)
    }

    pub fn spender(&self, outpoint: &OutPoint) -> Vec<u8> {
        self.tagged(b's', &outpoint.to_key_bytes())
    }

    pub fn spent_undo(&self, outpoint: &OutPoint) -> Vec<u8> {
        self.tagged(b'd', &outpoint.to_key_bytes())
    }

    pub fn block_record(&self, height: u64) -> Vec<u8> {
        self.tagged(b'b', &height.to_be_bytes())
    }

    pub fn name(&self, hash: &NameHash) -> Vec<u8> {
        self.tagged(b'A', hash.as_slice())
    }

    pub fn name_undo(&self, txid: &Txid) -> Vec<u8> {
        self.tagged(b'U', txid.as_slice())
    }

    pub fn bid(&self, hash: &NameHash, outpoint: &OutPoint) -> Vec<u8> {
        let mut suffix = hash.to_vec();
        suffix.extend_from_slice(&outpoint.to_key_bytes());
        self.tagged(b'i', &suffix)
    }

    pub fn bid_prefix(&self, hash: &NameHash) -> Vec<u8> {
        self.tagged(b'i', hash.as_slice())
    }

    pub fn reveal(&self, hash: &NameHash, outpoint: &OutPoint) -> Vec<u8> {
        let mut suffix = hash.to_vec();
        suffix.extend_from_slice(&outpoint.to_key_bytes());
        self.tagged(b'B', &suffix)
    }

    pub fn reveal_prefix(&self, hash: &NameHash) -> Vec<u8> {
        self.tagged(b'B', hash.as_slice())
    }

    pub fn blind_value(&self, blind: &FixedHash) -> Vec<u8> {
        self.tagged(b'v', blind.as_slice())
    }

    pub fn open_guard(&self, hash: &NameHash) -> Vec<u8> {
        self.tagged(b'o', hash.as_slice())
    }

    pub fn balance(&self) -> Vec<u8> {
        self.tagged(b'R', &[])
    }

    pub fn account_balance(&self, account: u32) -> Vec<u8> {
        self.tagged(b'r', &account.to_be_bytes())
    }

    pub fn address(&self, script: &FixedHash) -> Vec<u8> {
        self.tagged(b'a', script.as_slice())
    }

    pub fn address_prefix(&self) -> Vec<u8> {
        self.tagged(b'a', &[])
    }

    pub fn sync_state(&self) -> Vec<u8> {
        self.tagged(b'y', &[])
    }
}

/// Global wallet-by-block index, outside the per-wallet buckets.
pub fn block_wallets(hash: &BlockHash, wallet_id: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32 + 4);
    key.push(b'g');
    key.extend_from_slice(hash.as_slice());
    key.extend_from_slice(&wallet_id.to_be_bytes());
    key
}
