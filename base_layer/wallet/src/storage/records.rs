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
use handsel_common_types::{
    types::{BlockHash, FixedHash, NameHash, Txid},
    Amount,
};
use handsel_core::transactions::{Coin, Transaction};

use crate::error::WalletError;

/// Height used on a credit's coin while the creating transaction is unconfirmed.
pub const UNCONFIRMED_HEIGHT: u64 = u64::MAX;

/// Where a wallet transaction confirmed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockMeta {
    pub hash: BlockHash,
    pub height: u64,
    pub time: u64,
}

/// A transaction the wallet tracks, with its confirmation status. `block` is `None` while
/// the transaction sits in the mempool.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct WalletTx {
    pub tx: Transaction,
    pub block: Option<BlockMeta>,
    pub mtime: u64,
}

impl WalletTx {
    pub fn is_confirmed(&self) -> bool {
        self.block.is_some()
    }

    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("WalletTx serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, borsh::io::Error> {
        Self::try_from_slice(bytes)
    }
}

/// An output owned by this wallet. `spent` means an unconfirmed transaction spends it; a
/// confirmed spend removes the credit (leaving an undo record).
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Credit {
    pub coin: Coin,
    pub spent: bool,
    pub own: bool,
}

impl Credit {
    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("Credit serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, borsh::io::Error> {
        Self::try_from_slice(bytes)
    }
}

/// Per-wallet or per-account balance, maintained in parallel unconfirmed and confirmed
/// views. `ulocked`/`clocked` track value bound by auction covenants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Balance {
    pub tx_count: u64,
    pub coin_count: u64,
    pub unconfirmed: u64,
    pub confirmed: u64,
    pub ulocked: u64,
    pub clocked: u64,
}

/// A signed adjustment applied to both the wallet and the affected account balance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BalanceDelta {
    pub tx_count: i64,
    pub coin_count: i64,
    pub unconfirmed: i128,
    pub confirmed: i128,
    pub ulocked: i128,
    pub clocked: i128,
}

impl BalanceDelta {
    pub fn is_zero(&self) -> bool {
        *self == BalanceDelta::default()
    }
}

impl std::ops::AddAssign for BalanceDelta {
    fn add_assign(&mut self, rhs: Self) {
        self.tx_count += rhs.tx_count;
        self.coin_count += rhs.coin_count;
        self.unconfirmed += rhs.unconfirmed;
        self.confirmed += rhs.confirmed;
        self.ulocked += rhs.ulocked;
        self.clocked += rhs.clocked;
    }
}

fn checked(value: u64, delta: i128, field: &'static str) -> Result<u64, WalletError> {
    let next = i128::from(value) + delta;
    u64::try_from(next).map_err(|_| WalletError::Corrupt(format!("balance field {} underflowed ({})", field, next)))
}

impl Balance {
    pub fn apply(&mut self, delta: &BalanceDelta) -> Result<(), WalletError> {
        self.tx_count = checked(self.tx_count, i128::from(delta.tx_count), "tx_count")?;
        self.coin_count = checked(self.coin_count, i128::from(delta.coin_count), "coin_count")?;
        self.unconfirmed = checked(self.unconfirmed, delta.unconfirmed, "unconfirmed")?;
        self.confirmed = checked(self.confirmed, delta.confirmed, "confirmed")?;
        self.ulocked = checked(self.ulocked, delta.ulocked, "ulocked")?;
        self.clocked = checked(self.clocked, delta.clocked, "clocked")?;
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("Balance serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, borsh::io::Error> {
        Self::try_from_slice(bytes)
    }
}

/// The wallet's transactions confirmed at one height, used for fast reorg surgery.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockRecord {
    pub hash: BlockHash,
    pub time: u64,
    pub txids: Vec<Txid>,
}

impl BlockRecord {
    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("BlockRecord serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, borsh::io::Error> {
        Self::try_from_slice(bytes)
    }
}

/// A bid the wallet placed (or watches). The true bid amount stays hidden until reveal.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlindBid {
    pub name_hash: NameHash,
    pub lockup: Amount,
    pub blind: FixedHash,
    pub height: u64,
    pub own: bool,
}

/// A revealed bid.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BidReveal {
    pub name_hash: NameHash,
    pub value: Amount,
    pub height: u64,
    pub own: bool,
}

/// The value and nonce behind a blind, stored when the wallet creates or reveals a bid so
/// REVEAL and REDEEM can always be constructed.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlindValue {
    pub value: Amount,
    pub nonce: [u8; 32],
}

/// How far this wallet has followed the chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SyncState {
    pub height: u64,
    pub hash: BlockHash,
}

#[cfg(test)]
mod test {
    use handsel_core::covenants::Covenant;

    use super::*;

    #[test]
    fn balance_applies_signed_deltas() {
        let mut balance = Balance::default();
        balance
            .apply(&BalanceDelta {
                tx_count: 1,
                coin_count: 2,
                unconfirmed: 1000,
                confirmed: 500,
                ulocked: 100,
                clocked: 50,
            })
            .unwrap();
        assert_eq!(balance.unconfirmed, 1000);
        balance
            .apply(&BalanceDelta {
                unconfirmed: -1000,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(balance.unconfirmed, 0);
        let err = balance.apply(&BalanceDelta {
            confirmed: -501,
            ..Default::default()
        });
        assert!(err.is_err());
    }

    #[test]
    fn records_round_trip() {
        let wtx = WalletTx {
            tx: Transaction::coinbase(3, vec![]),
            block: Some(BlockMeta {
                hash: FixedHash::from([1u8; 32]),
                height: 3,
                time: 99,
            }),
            mtime: 77,
        };
        assert_eq!(WalletTx::decode(&wtx.encode()).unwrap(), wtx);

        let credit = Credit {
            coin: Coin {
                version: 0,
                value: 5,
                address: FixedHash::from([2u8; 32]),
                covenant: Covenant::none(),
                height: UNCONFIRMED_HEIGHT,
                coinbase: false,
            },
            spent: true,
            own: true,
        };
        assert_eq!(Credit::decode(&credit.encode()).unwrap(), credit);

        let record = BlockRecord {
            hash: FixedHash::from([3u8; 32]),
            time: 1,
            txids: vec![FixedHash::from([4u8; 32])],
        };
        assert_eq!(BlockRecord::decode(&record.encode()).unwrap(), record);
    }
}
