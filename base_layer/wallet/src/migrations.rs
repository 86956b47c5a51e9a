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

//! Wallet database migrations.

use handsel_core::transactions::Coin;
use handsel_storage::{
    migration::{
        Migration,
        MigrationAction,
        MigrationContext,
        MigrationError,
        MigrationOutcome,
        MigrationRegistry,
        MigrateMigrations,
    },
    KeyValueStore,
    WriteBatch,
};
use log::*;

use crate::storage::{records::UNCONFIRMED_HEIGHT, Balance, Credit};

const LOG_TARGET: &str = "w::migrations";

pub const WALLET_DB_VERSION: u32 = 2;

pub fn registry<S: KeyValueStore>() -> MigrationRegistry<S> {
    MigrationRegistry::new("wallet", WALLET_DB_VERSION)
        .register(MigrateMigrations)
        .register(RecomputeLockedBalances)
}

/// Rebuild every wallet balance record from the credit table. Skipped under SPV, where the
/// wallet may not hold the full credit history.
pub struct RecomputeLockedBalances;

impl<S: KeyValueStore> Migration<S> for RecomputeLockedBalances {
    fn id(&self) -> u32 {
        1
    }

    fn name(&self) -> &'static str {
        "recompute locked balances"
    }

    fn check(&self, ctx: &MigrationContext<'_, S>) -> Result<MigrationAction, MigrationError> {
        if ctx.opts.spv {
            warn!(
                target: LOG_TARGET,
                "Skipping locked balance recompute under SPV; locked balances may be inaccurate"
            );
            return Ok(MigrationAction::Skip);
        }
        Ok(MigrationAction::Migrate)
    }

    fn migrate(&self, ctx: &MigrationContext<'_, S>, batch: &mut WriteBatch) -> Result<MigrationOutcome, MigrationError> {
        // Wallet buckets are `w <id: u32 BE> <tag> …`; rebuild the `R` record of each
        // wallet from its `c` credits
        let mut wallets: std::collections::BTreeMap<u32, Balance> = std::collections::BTreeMap::new();
        for (key, value) in ctx.db.scan_prefix(b"w")? {
            if key.len() < 6 {
                continue;
            }
            let mut id_raw = [0u8; 4];
            id_raw.copy_from_slice(&key[1..5]);
            let wallet_id = u32::from_be_bytes(id_raw);
            let entry = wallets.entry(wallet_id).or_default();
            match key[5] {
                b'c' => {
                    let credit = Credit::decode(&value).map_err(|e| MigrationError::Corrupt(e.to_string()))?;
                    recount(entry, &credit.coin, credit.spent);
                },
                b'R' => {
                    let stored = Balance::decode(&value).map_err(|e| MigrationError::Corrupt(e.to_string()))?;
                    entry.tx_count = stored.tx_count;
                },
                _ => {},
            }
        }
        for (wallet_id, balance) in wallets {
            let mut key = vec![b'w'];
            key.extend_from_slice(&wallet_id.to_be_bytes());
            key.push(b'R');
            batch.put(key, balance.encode());
            info!(
                target: LOG_TARGET,
                "Recomputed balances for wallet {}: {} coin(s), {} unconfirmed, {} confirmed",
                wallet_id,
                balance.coin_count,
                balance.unconfirmed,
                balance.confirmed
            );
        }
        Ok(MigrationOutcome::Complete)
    }
}

fn recount(balance: &mut Balance, coin: &Coin, spent: bool) {
    balance.coin_count += 1;
    let confirmed = coin.height != UNCONFIRMED_HEIGHT;
    if confirmed {
        balance.confirmed += coin.value;
        if coin.covenant.is_locking() {
            balance.clocked += coin.value;
        }
    }
    if !spent {
        balance.unconfirmed += coin.value;
        if coin.covenant.is_locking() {
            balance.ulocked += coin.value;
        }
    }
}
