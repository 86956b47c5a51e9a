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

use std::{
    fmt,
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
#[error("Invalid network: {0}")]
pub struct UnknownNetworkError(String);

/// The network a node or wallet is configured to run on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_byte(self) -> u8 {
        match self {
            Network::Mainnet => 0x00,
            Network::Testnet => 0x01,
            Network::Regtest => 0x02,
        }
    }

    pub fn as_key_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }

    pub fn params(self) -> NetworkParams {
        NetworkParams::new(self)
    }
}

impl Default for Network {
    fn default() -> Self {
        Network::Mainnet
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key_str())
    }
}

impl FromStr for Network {
    type Err = UnknownNetworkError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            v => Err(UnknownNetworkError(v.to_string())),
        }
    }
}

/// Consensus timing parameters for the name auction and tree commitment schedule.
///
/// All windows are in block heights. The auction timeline for a name opened at height `h` is
/// `OPENING` until `h + open_period()`, `BIDDING` for `bidding_period` blocks after that,
/// `REVEALING` for `reveal_period` blocks after that, and `CLOSED` from then on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParams {
    pub network: Network,
    /// Blocks between authenticated tree commits. The tree root in a block header is the root
    /// as of the last interval boundary.
    pub tree_interval: u64,
    /// Length of the bidding window.
    pub bidding_period: u64,
    /// Length of the reveal window.
    pub reveal_period: u64,
    /// Blocks a TRANSFER must age before FINALIZE is permitted.
    pub transfer_lockup: u64,
    /// Blocks after the last renewal before a name expires.
    pub renewal_window: u64,
    /// Blocks a REVOKE locks the name before it may be re-opened.
    pub revoke_lockup: u64,
    /// Window during which reserved names may be claimed.
    pub claim_period: u64,
    /// Blocks before a coinbase output may be spent.
    pub coinbase_maturity: u64,
    /// Blocks of history the tree keeps restorable across compaction. Eight tree intervals,
    /// so that a reorg within the retention window can always re-inject a prior root.
    pub compaction_keep_blocks: u64,
}

impl NetworkParams {
    pub fn new(network: Network) -> Self {
        match network {
            Network::Mainnet => Self {
                network,
                tree_interval: 36,
                bidding_period: 720,
                reveal_period: 1440,
                transfer_lockup: 288,
                renewal_window: 105_120,
                revoke_lockup: 4032,
                claim_period: 210_240,
                coinbase_maturity: 100,
                compaction_keep_blocks: 288,
            },
            Network::Testnet => Self {
                network,
                tree_interval: 10,
                bidding_period: 50,
                reveal_period: 100,
                transfer_lockup: 20,
                renewal_window: 2500,
                revoke_lockup: 100,
                claim_period: 5000,
                coinbase_maturity: 6,
                compaction_keep_blocks: 80,
            },
            Network::Regtest => Self {
                network,
                tree_interval: 5,
                bidding_period: 5,
                reveal_period: 10,
                transfer_lockup: 10,
                renewal_window: 5000,
                revoke_lockup: 10,
                claim_period: 100_000,
                coinbase_maturity: 2,
                compaction_keep_blocks: 40,
            },
        }
    }

    /// Blocks between an OPEN and the start of bidding. The extra block lets the OPEN reach a
    /// tree commit before bids are accepted.
    pub fn open_period(&self) -> u64 {
        self.tree_interval + 1
    }

    /// Total length of an auction from OPEN to CLOSED.
    pub fn auction_length(&self) -> u64 {
        self.open_period() + self.bidding_period + self.reveal_period
    }

    /// True if `height` is a tree commitment boundary.
    pub fn is_tree_interval(&self, height: u64) -> bool {
        height % self.tree_interval == 0
    }

    /// The last tree commitment boundary at or below `height`.
    pub fn last_tree_boundary(&self, height: u64) -> u64 {
        height - height % self.tree_interval
    }
}
