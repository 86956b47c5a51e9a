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

use handsel_common_types::types::BlockHash;
use handsel_storage::{migration::MigrationError, StoreError};
use handsel_tree::TreeError;

use crate::validation::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum ChainStorageError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
    #[error("Block failed validation: {0}")]
    Validation(#[from] ValidationError),
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("Block {0} does not connect to any known entry")]
    OrphanBlock(BlockHash),
    #[error("Chain is shorter than the compaction keep window")]
    ChainTooShort,
    #[error("Operation requires an archival node: {0}")]
    RequiresArchival(&'static str),
    #[error("Chain options mismatch: {0}")]
    ConfigMismatch(String),
    #[error("Chain data corrupt: {0}")]
    Corrupt(String),
    #[error("Operation cancelled")]
    Cancelled,
}

impl ChainStorageError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        ChainStorageError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ChainStorageError::NotFound { .. })
    }
}
