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

use std::{ops::Bound, path::Path, sync::Arc};

use lmdb_zero as lmdb;
use lmdb_zero::error::LmdbResultExt;
use log::*;

use crate::{
    error::StoreError,
    key_val_store::{KeyValuePair, KeyValueStore, WriteBatch, WriteOp},
};

const LOG_TARGET: &str = "storage::lmdb";

const DEFAULT_MAP_SIZE: usize = 256 * 1024 * 1024;
const DATABASE_NAME: &str = "data";

/// A durable [KeyValueStore] backed by a single LMDB database.
///
/// One [WriteBatch] maps to one LMDB write transaction, which gives the all-or-nothing
/// guarantee the contract requires. LMDB's MVCC read transactions provide the snapshot
/// semantics for range scans.
#[derive(Clone)]
pub struct LmdbStore {
    env: Arc<lmdb::Environment>,
    db: Arc<lmdb::Database<'static>>,
}

impl LmdbStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::open_with_map_size(path, DEFAULT_MAP_SIZE)
    }

    pub fn open_with_map_size<P: AsRef<Path>>(path: P, map_size: usize) -> Result<Self, StoreError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let path_str = path
            .to_str()
            .ok_or_else(|| StoreError::InvalidPath(path.to_string_lossy().to_string()))?;
        let mut builder = lmdb::EnvBuilder::new()?;
        builder.set_maxdbs(1)?;
        builder.set_mapsize(map_size)?;
        // Safety: the path outlives the environment and no other process opens it with
        // conflicting flags.
        let env = unsafe { builder.open(path_str, lmdb::open::Flags::empty(), 0o600) }?;
        let env = Arc::new(env);
        let db = lmdb::Database::open(
            env.clone(),
            Some(DATABASE_NAME),
            &lmdb::DatabaseOptions::new(lmdb::db::CREATE),
        )?;
        debug!(target: LOG_TARGET, "Opened LMDB store at {} ({} MiB map)", path_str, map_size / 1024 / 1024);
        Ok(Self {
            env,
            db: Arc::new(db),
        })
    }
}

impl KeyValueStore for LmdbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let txn = lmdb::ReadTransaction::new(self.env.clone())?;
        let access = txn.access();
        let value = access.get::<[u8], [u8]>(&self.db, key).to_opt()?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let txn = lmdb::WriteTransaction::new(self.env.clone())?;
        {
            let mut access = txn.access();
            for op in batch.into_operations() {
                match op {
                    WriteOp::Put { key, value } => {
                        access.put(&self.db, key.as_slice(), value.as_slice(), lmdb::put::Flags::empty())?;
                    },
                    WriteOp::Delete { key } => {
                        // Deleting an absent key is a no-op, as in the memory store
                        access.del_key(&self.db, key.as_slice()).to_opt()?;
                    },
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn range(&self, low: Bound<&[u8]>, high: Bound<&[u8]>) -> Result<Vec<KeyValuePair>, StoreError> {
        let txn = lmdb::ReadTransaction::new(self.env.clone())?;
        let access = txn.access();
        let mut cursor = txn.cursor(self.db.clone())?;

        let mut result = Vec::new();
        let mut current = match low {
            Bound::Unbounded => cursor.first::<[u8], [u8]>(&access).to_opt()?,
            Bound::Included(l) => cursor.seek_range_k::<[u8], [u8]>(&access, l).to_opt()?,
            Bound::Excluded(l) => {
                let mut first = cursor.seek_range_k::<[u8], [u8]>(&access, l).to_opt()?;
                if let Some((k, _)) = first {
                    if k == l {
                        first = cursor.next::<[u8], [u8]>(&access).to_opt()?;
                    }
                }
                first
            },
        };
        while let Some((k, v)) = current {
            let in_range = match high {
                Bound::Unbounded => true,
                Bound::Included(h) => k <= h,
                Bound::Excluded(h) => k < h,
            };
            if !in_range {
                break;
            }
            result.push((k.to_vec(), v.to_vec()));
            current = cursor.next::<[u8], [u8]>(&access).to_opt()?;
        }
        Ok(result)
    }
}
