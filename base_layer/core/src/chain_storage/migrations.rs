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

//! Chain database migrations.

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

use crate::{
    chain_storage::{keys, state::ChainState},
    transactions::Coin,
};

const LOG_TARGET: &str = "c::cs::migrations";

pub const CHAIN_DB_VERSION: u32 = 2;

pub fn registry<S: KeyValueStore>() -> MigrationRegistry<S> {
    MigrationRegistry::new("chain", CHAIN_DB_VERSION)
        .register(MigrateMigrations)
        .register(RecomputeChainTotals)
}

/// Recompute the coin count and total value in the chain state record by scanning the UTXO
/// set. Not possible under pruning, where the scan would be incomplete; skipped with a
/// warning instead.
pub struct RecomputeChainTotals;

impl<S: KeyValueStore> Migration<S> for RecomputeChainTotals {
    fn id(&self) -> u32 {
        1
    }

    fn name(&self) -> &'static str {
        "recompute chain totals"
    }

    fn check(&self, ctx: &MigrationContext<'_, S>) -> Result<MigrationAction, MigrationError> {
        if ctx.opts.prune {
            warn!(
                target: LOG_TARGET,
                "Skipping chain totals recompute under pruning; total chain value may be inaccurate"
            );
            return Ok(MigrationAction::Skip);
        }
        if ctx.db.get(keys::KEY_STATE)?.is_none() {
            return Ok(MigrationAction::FakeMigrate);
        }
        Ok(MigrationAction::Migrate)
    }

    fn migrate(&self, ctx: &MigrationContext<'_, S>, batch: &mut WriteBatch) -> Result<MigrationOutcome, MigrationError> {
        let bytes = ctx
            .db
            .get(keys::KEY_STATE)?
            .ok_or_else(|| MigrationError::Corrupt("chain state disappeared mid-migration".to_string()))?;
        let mut state = ChainState::decode(&bytes).map_err(|e| MigrationError::Corrupt(e.to_string()))?;

        let mut coin_count = 0u64;
        let mut total_value = 0u128;
        for (_, value) in ctx.db.scan_prefix(keys::COIN_PREFIX)? {
            let coin = Coin::decode(&value).map_err(|e| MigrationError::Corrupt(e.to_string()))?;
            coin_count += 1;
            total_value += u128::from(coin.value);
        }
        info!(
            target: LOG_TARGET,
            "Recomputed chain totals: {} coin(s), {} total value", coin_count, total_value
        );
        state.coin_count = coin_count;
        state.total_value = total_value;
        batch.put(keys::KEY_STATE, state.encode());
        Ok(MigrationOutcome::Complete)
    }
}
