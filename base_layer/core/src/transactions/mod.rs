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
    types::{ScriptHash, Txid},
    Amount,
    OutPoint,
};

use crate::{covenants::Covenant, hashing::blake2b256};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TxInput {
    pub prevout: OutPoint,
    /// Witness data is carried opaquely; script execution is outside the state layer.
    pub witness: Vec<Vec<u8>>,
}

impl TxInput {
    pub fn spending(prevout: OutPoint) -> Self {
        Self {
            prevout,
            witness: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TxOutput {
    pub value: Amount,
    pub address: ScriptHash,
    pub covenant: Covenant,
}

impl TxOutput {
    pub fn new(value: Amount, address: ScriptHash) -> Self {
        Self {
            value,
            address,
            covenant: Covenant::none(),
        }
    }

    pub fn with_covenant(value: Amount, address: ScriptHash, covenant: Covenant) -> Self {
        Self {
            value,
            address,
            covenant,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub locktime: u32,
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: 0,
            inputs,
            outputs,
            locktime: 0,
        }
    }

    /// A coinbase transaction spends the null outpoint and creates new value.
    pub fn coinbase(height: u64, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: 0,
            inputs: vec![TxInput {
                prevout: OutPoint::null(),
                // The height makes every coinbase unique
                witness: vec![height.to_le_bytes().to_vec()],
            }],
            outputs,
            locktime: 0,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    pub fn txid(&self) -> Txid {
        blake2b256(&borsh::to_vec(self).expect("Transaction serialization cannot fail"))
    }

    pub fn output_value(&self) -> Amount {
        self.outputs.iter().map(|o| o.value).sum()
    }
}

/// An unspent transaction output together with its confirmation context.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Coin {
    pub version: u32,
    pub value: Amount,
    pub address: ScriptHash,
    pub covenant: Covenant,
    pub height: u64,
    pub coinbase: bool,
}

impl Coin {
    pub fn from_output(output: &TxOutput, height: u64, coinbase: bool) -> Self {
        Self {
            version: 0,
            value: output.value,
            address: output.address,
            covenant: output.covenant.clone(),
            height,
            coinbase,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("Coin serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, borsh::io::Error> {
        Self::try_from_slice(bytes)
    }
}

/// The spent coins of one block, in spend order, sufficient to reverse the block.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct UndoCoins {
    pub spent: Vec<(OutPoint, Coin)>,
}

impl UndoCoins {
    pub fn push(&mut self, outpoint: OutPoint, coin: Coin) {
        self.spent.push((outpoint, coin));
    }

    pub fn is_empty(&self) -> bool {
        self.spent.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("UndoCoins serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, borsh::io::Error> {
        Self::try_from_slice(bytes)
    }
}

/// A confirmed transaction with its location, for the `t` index.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TxRecord {
    pub tx: Transaction,
    pub block_hash: handsel_common_types::types::BlockHash,
    pub height: u64,
    pub index: u32,
}

#[cfg(test)]
mod test {
    use handsel_common_types::types::FixedHash;

    use super::*;

    #[test]
    fn txid_is_stable_and_unique() {
        let tx1 = Transaction::coinbase(1, vec![TxOutput::new(50, FixedHash::from([1u8; 32]))]);
        let tx2 = Transaction::coinbase(2, vec![TxOutput::new(50, FixedHash::from([1u8; 32]))]);
        assert_eq!(tx1.txid(), tx1.txid());
        assert_ne!(tx1.txid(), tx2.txid());
    }

    #[test]
    fn coinbase_detection() {
        let coinbase = Transaction::coinbase(5, vec![]);
        assert!(coinbase.is_coinbase());
        let spend = Transaction::new(
            vec![TxInput::spending(OutPoint::new(FixedHash::random(), 0))],
            vec![],
        );
        assert!(!spend.is_coinbase());
    }

    #[test]
    fn coin_round_trips() {
        let coin = Coin {
            version: 0,
            value: 12_345,
            address: FixedHash::random(),
            covenant: crate::covenants::Covenant::none(),
            height: 9,
            coinbase: true,
        };
        assert_eq!(Coin::decode(&coin.encode()).unwrap(), coin);
    }
}
