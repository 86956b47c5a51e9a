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

//! Async ergonomics over [ChainDatabase].
//!
//! The database itself is synchronous; these wrappers move calls onto the blocking pool so
//! services built on tokio never hold a runtime thread through a disk access.

use handsel_common_types::{
    types::{BlockHash, NameHash},
    OutPoint,
};
use handsel_storage::KeyValueStore;

use crate::{
    blocks::{Block, ChainEntry},
    chain_storage::{BlockAddResult, ChainDatabase, ChainState, ChainStorageError},
    name_state::{NameState, NameStatus},
    transactions::Coin,
};

#[derive(Clone)]
pub struct AsyncChainDb<S>
where S: KeyValueStore + Clone + 'static
{
    db: ChainDatabase<S>,
}

impl<S> AsyncChainDb<S>
where S: KeyValueStore + Clone + Send + Sync + 'static
{
    pub fn new(db: ChainDatabase<S>) -> Self {
        Self { db }
    }

    pub fn inner(&self) -> &ChainDatabase<S> {
        &self.db
    }

    async fn blocking<F, R>(&self, f: F) -> Result<R, ChainStorageError>
    where
        F: FnOnce(ChainDatabase<S>) -> Result<R, ChainStorageError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(db))
            .await
            .map_err(|e| ChainStorageError::Corrupt(format!("blocking task panicked: {}", e)))?
    }

    pub async fn add_block(&self, block: Block) -> Result<BlockAddResult, ChainStorageError> {
        self.blocking(move |db| db.add_block(block)).await
    }

    pub async fn state(&self) -> Result<ChainState, ChainStorageError> {
        self.blocking(|db| db.state()).await
    }

    pub async fn tip_entry(&self) -> Result<ChainEntry, ChainStorageError> {
        self.blocking(|db| db.tip_entry()).await
    }

    pub async fn fetch_entry(&self, hash: BlockHash) -> Result<ChainEntry, ChainStorageError> {
        self.blocking(move |db| db.fetch_entry(&hash)).await
    }

    pub async fn fetch_entry_by_height(&self, height: u64) -> Result<ChainEntry, ChainStorageError> {
        self.blocking(move |db| db.fetch_entry_by_height(height)).await
    }

    pub async fn fetch_block(&self, hash: BlockHash) -> Result<Block, ChainStorageError> {
        self.blocking(move |db| db.fetch_block(&hash)).await
    }

    pub async fn fetch_block_by_height(&self, height: u64) -> Result<Block, ChainStorageError> {
        self.blocking(move |db| db.fetch_block_by_height(height)).await
    }

    pub async fn fetch_coin(&self, outpoint: OutPoint) -> Result<Option<Coin>, ChainStorageError> {
        self.blocking(move |db| db.fetch_coin(&outpoint)).await
    }

    pub async fn fetch_name_state(&self, hash: NameHash) -> Result<Option<NameState>, ChainStorageError> {
        self.blocking(move |db| db.fetch_name_state(&hash)).await
    }

    pub async fn name_status(&self, hash: NameHash) -> Result<Option<(NameState, NameStatus)>, ChainStorageError> {
        self.blocking(move |db| db.name_status(&hash)).await
    }
}
