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

use serde::{Deserialize, Serialize};

use crate::network::Network;

/// Operator-supplied options for opening the chain database.
///
/// `migrate` mirrors the `chain-migrate=<id>` flag: migrations are only executed when the
/// flag authorizes the highest pending migration id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainConfig {
    pub network: Network,
    /// Pruning mode. Forbids migrations that need historical blocks and enables their skip
    /// rules.
    pub prune: bool,
    /// SPV mode. The chain keeps headers and the name tree only.
    pub spv: bool,
    /// `chain-migrate=<id>`: authorizes chain migrations up to and including `id`.
    pub migrate: Option<u32>,
    /// Compact the name tree on startup when the chain is long enough.
    pub compact_tree_on_init: bool,
    /// Minimum blocks since the last compaction before `compact_tree_on_init` re-runs.
    pub compact_tree_init_interval: u64,
}

impl ChainConfig {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            prune: false,
            spv: false,
            migrate: None,
            compact_tree_on_init: false,
            compact_tree_init_interval: 10_000,
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::new(Network::default())
    }
}

/// Operator-supplied options for opening a wallet database.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletConfig {
    pub network: Network,
    /// `wallet-migrate=<id>`: authorizes wallet migrations up to and including `id`.
    pub migrate: Option<u32>,
    /// SPV mode. Wallet migrations that need historical blocks are skipped.
    pub spv: bool,
}

impl WalletConfig {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            migrate: None,
            spv: false,
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self::new(Network::default())
    }
}
