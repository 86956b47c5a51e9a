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

//! Versioned, operator-gated schema migrations.
//!
//! Both the chain and the wallet database run through [Migrator::open] before any other
//! reads. Migrations are identified by ascending numeric ids, registered at build time in a
//! [MigrationRegistry], and only executed when the operator flag authorizes the highest
//! pending id. Each migration's effects land in a single atomic batch (or a sequence of
//! checkpointed batches for large rewrites), so a crash leaves the store resumable.

mod state;

use std::collections::BTreeMap;

use handsel_shutdown::ShutdownSignal;
use log::*;
pub use state::MigrationState;

use crate::{
    error::StoreError,
    key_val_store::{KeyValueStore, WriteBatch},
};

const LOG_TARGET: &str = "storage::migration";

/// The single key holding [MigrationState].
pub const MIGRATION_STATE_KEY: &[u8] = b"M";
/// Pre-framework databases marked each completed migration with `M<id: u32 BE>`.
pub const LEGACY_MARKER_PREFIX: &[u8] = b"M";
/// Key holding `ASCII tag || u32 LE version`.
pub const VERSION_KEY: &[u8] = b"V";

/// The id reserved for the bootstrap that converts legacy markers.
pub const MIGRATE_MIGRATIONS_ID: u32 = 0;

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error(
        "Database needs migration(s) [{}]. {hint}",
        ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
    )]
    NeedsMigration { ids: Vec<u32>, hint: String },
    #[error("Database version mismatch for '{tag}': found {found}, expected at most {expected}")]
    VersionMismatch { tag: String, found: u32, expected: u32 },
    #[error("Refusing to open with force flags while migrations [{}] are pending",
        ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", "))]
    ForcedOpenWithPending { ids: Vec<u32> },
    #[error("Migration state corrupt: {0}")]
    Corrupt(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Migration cancelled")]
    Cancelled,
}

/// What `check()` decided for a pending migration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationAction {
    /// Run it. Requires operator authorization.
    Migrate,
    /// Do not run it (for example it needs historical blocks under pruning). Recorded and
    /// warned about on every subsequent open.
    Skip,
    /// Mark it handled without doing any work (not applicable to this store's contents).
    FakeMigrate,
}

/// Result of one `migrate()` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    Complete,
    /// More batches needed; the bytes checkpoint where to resume.
    InProgress(Vec<u8>),
}

/// Environment handed to `check()` and `migrate()`.
pub struct MigrationContext<'a, S> {
    pub db: &'a S,
    pub opts: &'a MigrationOptions,
    /// Checkpoint from a previous interrupted run of this migration, empty on a fresh start.
    pub progress: &'a [u8],
}

#[derive(Clone, Debug)]
pub struct MigrationOptions {
    /// Operator flag name used in error hints, e.g. `chain-migrate`.
    pub flag_name: &'static str,
    /// The id the operator has authorized migrations up to, if any.
    pub migrate: Option<u32>,
    pub prune: bool,
    pub spv: bool,
    /// Set when the caller is overriding other open-time safety checks. Forbidden while
    /// migrations are pending.
    pub force: bool,
}

impl MigrationOptions {
    pub fn new(flag_name: &'static str) -> Self {
        Self {
            flag_name,
            migrate: None,
            prune: false,
            spv: false,
            force: false,
        }
    }

    pub fn with_migrate(mut self, id: u32) -> Self {
        self.migrate = Some(id);
        self
    }
}

pub trait Migration<S: KeyValueStore>: Send + Sync {
    fn id(&self) -> u32;

    fn name(&self) -> &'static str;

    fn check(&self, ctx: &MigrationContext<'_, S>) -> Result<MigrationAction, MigrationError>;

    /// Compute this migration's effects into `batch`. The migrator appends the state update
    /// and writes the batch atomically. Must be idempotent: a crash before the batch lands
    /// re-runs it from the same `ctx.progress`.
    fn migrate(&self, ctx: &MigrationContext<'_, S>, batch: &mut WriteBatch) -> Result<MigrationOutcome, MigrationError>;
}

/// Ordered numeric id → migration mapping, fixed at build time. Tests pass their own
/// registry; no process-wide mutable registry exists.
pub struct MigrationRegistry<S> {
    tag: &'static str,
    target_version: u32,
    migrations: BTreeMap<u32, Box<dyn Migration<S>>>,
}

impl<S: KeyValueStore> MigrationRegistry<S> {
    pub fn new(tag: &'static str, target_version: u32) -> Self {
        Self {
            tag,
            target_version,
            migrations: BTreeMap::new(),
        }
    }

    pub fn register<M: Migration<S> + 'static>(mut self, migration: M) -> Self {
        let id = migration.id();
        assert!(
            self.migrations.insert(id, Box::new(migration)).is_none(),
            "duplicate migration id {}",
            id
        );
        self
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    pub fn target_version(&self) -> u32 {
        self.target_version
    }

    pub fn last_id(&self) -> Option<u32> {
        self.migrations.keys().next_back().copied()
    }

    fn pending_from(&self, next: u32) -> Vec<u32> {
        self.migrations.keys().copied().filter(|id| *id >= next).collect()
    }
}

/// Summary of what an open did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// The store was brand new and initialized at the current version.
    pub fresh: bool,
    pub ran: Vec<u32>,
    pub skipped: Vec<u32>,
    pub faked: Vec<u32>,
}

pub struct Migrator;

impl Migrator {
    /// Read the migration state, decide the pending set, enforce operator gating, and run
    /// whatever is due. Returns a report on success; the store is at
    /// `registry.target_version()` afterwards.
    pub fn open<S: KeyValueStore>(
        db: &S,
        registry: &MigrationRegistry<S>,
        opts: &MigrationOptions,
        signal: ShutdownSignal,
    ) -> Result<MigrationReport, MigrationError> {
        match read_version(db, registry.tag())? {
            None => Self::initialize(db, registry),
            Some(version) => Self::open_existing(db, registry, opts, signal, version),
        }
    }

    /// A store with no version key is brand new: stamp it at the target version with every
    /// known migration already handled.
    fn initialize<S: KeyValueStore>(db: &S, registry: &MigrationRegistry<S>) -> Result<MigrationReport, MigrationError> {
        let last = registry.last_id().unwrap_or(0);
        let state = MigrationState {
            last_migration: last,
            next_migration: last.saturating_add(1),
            ..Default::default()
        };
        let mut batch = WriteBatch::new();
        batch.put(VERSION_KEY, encode_version(registry.tag(), registry.target_version()));
        batch.put(MIGRATION_STATE_KEY, state.encode());
        db.write(batch)?;
        debug!(
            target: LOG_TARGET,
            "Initialized fresh '{}' store at version {}",
            registry.tag(),
            registry.target_version()
        );
        Ok(MigrationReport {
            fresh: true,
            ..Default::default()
        })
    }

    fn open_existing<S: KeyValueStore>(
        db: &S,
        registry: &MigrationRegistry<S>,
        opts: &MigrationOptions,
        signal: ShutdownSignal,
        version: u32,
    ) -> Result<MigrationReport, MigrationError> {
        if version > registry.target_version() {
            return Err(MigrationError::VersionMismatch {
                tag: registry.tag().to_string(),
                found: version,
                expected: registry.target_version(),
            });
        }

        let mut state = Self::read_state(db, registry, version)?;
        for id in &state.skipped {
            warn!(
                target: LOG_TARGET,
                "'{}' migration {} was skipped on a previous open and remains unapplied",
                registry.tag(),
                id
            );
        }
        if state.in_progress {
            warn!(
                target: LOG_TARGET,
                "'{}' migration {} was interrupted; resuming from checkpoint",
                registry.tag(),
                state.next_migration
            );
        }

        let pending = registry.pending_from(state.next_migration);
        if pending.is_empty() {
            if version != registry.target_version() {
                return Err(MigrationError::VersionMismatch {
                    tag: registry.tag().to_string(),
                    found: version,
                    expected: registry.target_version(),
                });
            }
            return Ok(MigrationReport::default());
        }

        // Decide an action per pending id before anything runs, so gating can consider the
        // full set.
        let mut actions = Vec::with_capacity(pending.len());
        for id in &pending {
            let migration = &registry.migrations[id];
            let ctx = MigrationContext {
                db,
                opts,
                progress: &state.progress,
            };
            actions.push((*id, migration.check(&ctx)?));
        }

        let to_run: Vec<u32> = actions
            .iter()
            .filter(|(_, action)| *action == MigrationAction::Migrate)
            .map(|(id, _)| *id)
            .collect();
        if !to_run.is_empty() {
            if opts.force {
                return Err(MigrationError::ForcedOpenWithPending { ids: to_run });
            }
            let highest = *to_run.last().expect("non-empty");
            if opts.migrate.map(|authorized| authorized < highest).unwrap_or(true) {
                return Err(MigrationError::NeedsMigration {
                    ids: to_run,
                    hint: format!("Restart with --{}={} to run them", opts.flag_name, highest),
                });
            }
        }

        let mut report = MigrationReport::default();
        for (id, action) in actions {
            if signal.is_triggered() {
                return Err(MigrationError::Cancelled);
            }
            let migration = &registry.migrations[&id];
            match action {
                MigrationAction::Skip => {
                    warn!(
                        target: LOG_TARGET,
                        "Skipping '{}' migration {} ({})",
                        registry.tag(),
                        id,
                        migration.name()
                    );
                    if !state.skipped.contains(&id) {
                        state.skipped.push(id);
                    }
                    state.last_migration = id;
                    state.next_migration = id + 1;
                    report.skipped.push(id);
                },
                MigrationAction::FakeMigrate => {
                    state.last_migration = id;
                    state.next_migration = id + 1;
                    state.in_progress = false;
                    state.progress.clear();
                    report.faked.push(id);
                },
                MigrationAction::Migrate => {
                    info!(
                        target: LOG_TARGET,
                        "Running '{}' migration {} ({})",
                        registry.tag(),
                        id,
                        migration.name()
                    );
                    loop {
                        if signal.is_triggered() {
                            return Err(MigrationError::Cancelled);
                        }
                        let ctx = MigrationContext {
                            db,
                            opts,
                            progress: &state.progress,
                        };
                        let mut batch = WriteBatch::new();
                        let outcome = migration.migrate(&ctx, &mut batch)?;
                        match outcome {
                            MigrationOutcome::Complete => {
                                state.last_migration = id;
                                state.next_migration = id + 1;
                                state.in_progress = false;
                                state.progress.clear();
                                batch.put(MIGRATION_STATE_KEY, state.encode());
                                db.write(batch)?;
                                break;
                            },
                            MigrationOutcome::InProgress(progress) => {
                                state.in_progress = true;
                                state.next_migration = id;
                                state.progress = progress;
                                batch.put(MIGRATION_STATE_KEY, state.encode());
                                db.write(batch)?;
                            },
                        }
                    }
                    report.ran.push(id);
                },
            }
        }

        // Persist the terminal state and the stepped version together.
        let mut batch = WriteBatch::new();
        batch.put(VERSION_KEY, encode_version(registry.tag(), registry.target_version()));
        batch.put(MIGRATION_STATE_KEY, state.encode());
        db.write(batch)?;
        Ok(report)
    }

    fn read_state<S: KeyValueStore>(
        db: &S,
        registry: &MigrationRegistry<S>,
        version: u32,
    ) -> Result<MigrationState, MigrationError> {
        match db.get(MIGRATION_STATE_KEY)? {
            Some(bytes) => MigrationState::decode(&bytes).map_err(|e| MigrationError::Corrupt(e.to_string())),
            None if version == registry.target_version() => {
                // Current-version store that predates the state key: nothing is pending.
                let last = registry.last_id().unwrap_or(0);
                Ok(MigrationState {
                    last_migration: last,
                    next_migration: last.saturating_add(1),
                    ..Default::default()
                })
            },
            // Pre-framework database: everything registered is pending, starting with the
            // marker bootstrap.
            None => Ok(MigrationState::default()),
        }
    }
}

/// Completed-migration markers written by pre-framework databases: `M<id: u32 BE>`.
pub fn legacy_marker_ids<S: KeyValueStore>(db: &S) -> Result<Vec<u32>, MigrationError> {
    let mut ids = Vec::new();
    for (key, _) in db.scan_prefix(LEGACY_MARKER_PREFIX)? {
        if key.len() == LEGACY_MARKER_PREFIX.len() + 4 {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&key[LEGACY_MARKER_PREFIX.len()..]);
            ids.push(u32::from_be_bytes(raw));
        }
    }
    Ok(ids)
}

pub fn legacy_marker_key(id: u32) -> Vec<u8> {
    let mut key = LEGACY_MARKER_PREFIX.to_vec();
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// The id-0 bootstrap: converts legacy per-id marker keys into the single-key state. Its
/// applicability is auto-detected from the markers themselves.
pub struct MigrateMigrations;

impl<S: KeyValueStore> Migration<S> for MigrateMigrations {
    fn id(&self) -> u32 {
        MIGRATE_MIGRATIONS_ID
    }

    fn name(&self) -> &'static str {
        "migrate migrations"
    }

    fn check(&self, ctx: &MigrationContext<'_, S>) -> Result<MigrationAction, MigrationError> {
        if legacy_marker_ids(ctx.db)?.is_empty() {
            Ok(MigrationAction::FakeMigrate)
        } else {
            Ok(MigrationAction::Migrate)
        }
    }

    fn migrate(&self, ctx: &MigrationContext<'_, S>, batch: &mut WriteBatch) -> Result<MigrationOutcome, MigrationError> {
        let ids = legacy_marker_ids(ctx.db)?;
        for id in &ids {
            batch.delete(legacy_marker_key(*id));
        }
        debug!(target: LOG_TARGET, "Converted {} legacy migration marker(s)", ids.len());
        Ok(MigrationOutcome::Complete)
    }
}

pub fn read_version<S: KeyValueStore>(db: &S, tag: &str) -> Result<Option<u32>, MigrationError> {
    match db.get(VERSION_KEY)? {
        None => Ok(None),
        Some(bytes) => {
            let tag_bytes = tag.as_bytes();
            if bytes.len() != tag_bytes.len() + 4 || &bytes[..tag_bytes.len()] != tag_bytes {
                return Err(MigrationError::Corrupt(format!(
                    "version key does not carry the '{}' tag",
                    tag
                )));
            }
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[tag_bytes.len()..]);
            Ok(Some(u32::from_le_bytes(raw)))
        },
    }
}

pub fn encode_version(tag: &str, version: u32) -> Vec<u8> {
    let mut bytes = tag.as_bytes().to_vec();
    bytes.extend_from_slice(&version.to_le_bytes());
    bytes
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::memory_store::MemoryStore;

    struct RecomputeTotals;

    impl Migration<MemoryStore> for RecomputeTotals {
        fn id(&self) -> u32 {
            1
        }

        fn name(&self) -> &'static str {
            "recompute totals"
        }

        fn check(&self, ctx: &MigrationContext<'_, MemoryStore>) -> Result<MigrationAction, MigrationError> {
            if ctx.opts.prune {
                Ok(MigrationAction::Skip)
            } else {
                Ok(MigrationAction::Migrate)
            }
        }

        fn migrate(
            &self,
            _ctx: &MigrationContext<'_, MemoryStore>,
            batch: &mut WriteBatch,
        ) -> Result<MigrationOutcome, MigrationError> {
            batch.put(b"recomputed", b"yes");
            Ok(MigrationOutcome::Complete)
        }
    }

    fn registry() -> MigrationRegistry<MemoryStore> {
        MigrationRegistry::new("wallet", 2)
            .register(MigrateMigrations)
            .register(RecomputeTotals)
    }

    fn legacy_store(marker_ids: &[u32]) -> MemoryStore {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(VERSION_KEY, encode_version("wallet", 1));
        for id in marker_ids {
            batch.put(legacy_marker_key(*id), b"");
        }
        store.write(batch).unwrap();
        store
    }

    #[test]
    fn fresh_store_initializes_at_target_version() {
        let store = MemoryStore::new();
        let report = Migrator::open(
            &store,
            &registry(),
            &MigrationOptions::new("wallet-migrate"),
            handsel_shutdown::ShutdownSignal::never(),
        )
        .unwrap();
        assert!(report.fresh);
        assert_eq!(read_version(&store, "wallet").unwrap(), Some(2));
    }

    #[test]
    fn refuses_without_operator_flag() {
        let store = legacy_store(&[0, 1]);
        let err = Migrator::open(
            &store,
            &registry(),
            &MigrationOptions::new("wallet-migrate"),
            handsel_shutdown::ShutdownSignal::never(),
        )
        .unwrap_err();
        match err {
            MigrationError::NeedsMigration { ids, hint } => {
                assert_eq!(ids, vec![0, 1]);
                assert!(hint.contains("--wallet-migrate=1"));
            },
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn refuses_flag_addressing_lower_id() {
        let store = legacy_store(&[0, 1]);
        let err = Migrator::open(
            &store,
            &registry(),
            &MigrationOptions::new("wallet-migrate").with_migrate(0),
            handsel_shutdown::ShutdownSignal::never(),
        )
        .unwrap_err();
        assert!(matches!(err, MigrationError::NeedsMigration { .. }));
    }

    #[test]
    fn runs_pending_migrations_with_flag() {
        let store = legacy_store(&[0, 1]);
        let report = Migrator::open(
            &store,
            &registry(),
            &MigrationOptions::new("wallet-migrate").with_migrate(1),
            handsel_shutdown::ShutdownSignal::never(),
        )
        .unwrap();
        assert_eq!(report.ran, vec![0, 1]);
        assert_eq!(read_version(&store, "wallet").unwrap(), Some(2));
        let state = MigrationState::decode(&store.get(MIGRATION_STATE_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(state.last_migration, 1);
        assert_eq!(state.next_migration, 2);
        assert!(state.skipped.is_empty());
        assert!(!state.in_progress);
        // Legacy markers are gone
        assert!(legacy_marker_ids(&store).unwrap().is_empty());
        assert_eq!(store.get(b"recomputed").unwrap().unwrap(), b"yes");
    }

    #[test]
    fn migrator_is_idempotent() {
        let store = legacy_store(&[0, 1]);
        let opts = MigrationOptions::new("wallet-migrate").with_migrate(1);
        Migrator::open(&store, &registry(), &opts, handsel_shutdown::ShutdownSignal::never()).unwrap();
        let snapshot = store.range(std::ops::Bound::Unbounded, std::ops::Bound::Unbounded).unwrap();
        let report = Migrator::open(&store, &registry(), &opts, handsel_shutdown::ShutdownSignal::never()).unwrap();
        assert_eq!(report, MigrationReport::default());
        let after = store.range(std::ops::Bound::Unbounded, std::ops::Bound::Unbounded).unwrap();
        assert_eq!(snapshot, after);
    }

    #[test]
    fn skip_is_recorded_and_version_still_steps() {
        let store = legacy_store(&[0]);
        let mut opts = MigrationOptions::new("wallet-migrate").with_migrate(1);
        opts.prune = true;
        let report = Migrator::open(&store, &registry(), &opts, handsel_shutdown::ShutdownSignal::never()).unwrap();
        assert_eq!(report.skipped, vec![1]);
        assert_eq!(report.ran, vec![0]);
        let state = MigrationState::decode(&store.get(MIGRATION_STATE_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(state.skipped, vec![1]);
        assert_eq!(read_version(&store, "wallet").unwrap(), Some(2));
    }

    #[test]
    fn force_flags_forbidden_with_pending() {
        let store = legacy_store(&[0, 1]);
        let mut opts = MigrationOptions::new("wallet-migrate").with_migrate(1);
        opts.force = true;
        let err = Migrator::open(&store, &registry(), &opts, handsel_shutdown::ShutdownSignal::never()).unwrap_err();
        assert!(matches!(err, MigrationError::ForcedOpenWithPending { .. }));
    }

    #[test]
    fn newer_version_is_refused() {
        let store = MemoryStore::new();
        store.put(VERSION_KEY, &encode_version("wallet", 9)).unwrap();
        let err = Migrator::open(
            &store,
            &registry(),
            &MigrationOptions::new("wallet-migrate"),
            handsel_shutdown::ShutdownSignal::never(),
        )
        .unwrap_err();
        assert!(matches!(err, MigrationError::VersionMismatch { found: 9, .. }));
    }

    #[test]
    fn wrong_tag_is_corrupt() {
        let store = MemoryStore::new();
        store.put(VERSION_KEY, &encode_version("chain", 2)).unwrap();
        let err = Migrator::open(
            &store,
            &registry(),
            &MigrationOptions::new("wallet-migrate"),
            handsel_shutdown::ShutdownSignal::never(),
        )
        .unwrap_err();
        assert!(matches!(err, MigrationError::Corrupt(_)));
    }
}
