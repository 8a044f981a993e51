//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use roster_integrity_core::{
    audit::AuditEntry,
    config::EngineConfig,
    error::{PersistenceError, PersistenceErrorKind},
    field::Field,
    orchestrator::UpdateOrchestrator,
    record::{PlayerProfile, PlayerRecord},
    store::{AuditTotals, PlayerStore, SqliteStore, StoreOp, SubRecord},
    types::PlayerId,
    update::SubCollection,
};
use std::time::Duration;

/// Route engine logs through the test harness. Set RUST_LOG to see them.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn orchestrator() -> UpdateOrchestrator<SqliteStore> {
    init_logging();
    UpdateOrchestrator::build_test().unwrap()
}

/// Orchestrator with `players` onboarded from the baseline profile.
pub fn with_players(players: &[&str]) -> UpdateOrchestrator<SqliteStore> {
    let orch = orchestrator();
    for p in players {
        orch.onboard_player(p, PlayerProfile::baseline_test(p), "test").unwrap();
    }
    orch
}

pub fn number(record: &PlayerRecord, field: Field) -> f64 {
    record
        .number(field)
        .unwrap_or_else(|| panic!("{field} has no numeric value"))
}

pub fn text(record: &PlayerRecord, field: Field) -> String {
    record
        .text(field)
        .unwrap_or_else(|| panic!("{field} has no text value"))
}

/// SQLite store wrapped with injectable faults.
pub struct FaultyStore {
    pub inner:         SqliteStore,
    /// Sleep inside every `load_player`, widening read-modify-write races.
    pub load_delay:    Option<Duration>,
    pub fail_audit:    bool,
    /// Fail any commit containing an op for which this returns true.
    pub fail_commit_if: Option<fn(&StoreOp) -> bool>,
}

impl FaultyStore {
    pub fn new() -> Self {
        init_logging();
        let config = EngineConfig::default_test();
        let inner = SqliteStore::in_memory(config.store).unwrap();
        inner.migrate().unwrap();
        Self { inner, load_delay: None, fail_audit: false, fail_commit_if: None }
    }

    pub fn failing_commits(predicate: fn(&StoreOp) -> bool) -> Self {
        Self { fail_commit_if: Some(predicate), ..Self::new() }
    }

    pub fn orchestrator(self, players: &[&str]) -> UpdateOrchestrator<FaultyStore> {
        let orch = UpdateOrchestrator::new(self, EngineConfig::default_test()).unwrap();
        for p in players {
            orch.onboard_player(p, PlayerProfile::baseline_test(p), "test").unwrap();
        }
        orch
    }
}

impl PlayerStore for FaultyStore {
    fn load_player(&self, player_id: &str) -> Result<Option<PlayerRecord>, PersistenceError> {
        if let Some(delay) = self.load_delay {
            std::thread::sleep(delay);
        }
        self.inner.load_player(player_id)
    }

    fn list_players(&self) -> Result<Vec<PlayerId>, PersistenceError> {
        self.inner.list_players()
    }

    fn commit(&self, ops: &[StoreOp]) -> Result<(), PersistenceError> {
        if let Some(fail) = self.fail_commit_if {
            if ops.iter().any(fail) {
                return Err(PersistenceError::new(
                    PersistenceErrorKind::Unavailable,
                    "injected outage",
                ));
            }
        }
        self.inner.commit(ops)
    }

    fn sub_records(
        &self,
        player_id:  &str,
        collection: SubCollection,
        limit:      usize,
    ) -> Result<Vec<SubRecord>, PersistenceError> {
        self.inner.sub_records(player_id, collection, limit)
    }

    fn append_audit(&self, entries: &[AuditEntry]) -> Result<(), PersistenceError> {
        if self.fail_audit {
            return Err(PersistenceError::new(PersistenceErrorKind::Timeout, "injected audit timeout"));
        }
        self.inner.append_audit(entries)
    }

    fn audit_history(&self, player_id: &str, limit: usize) -> Result<Vec<AuditEntry>, PersistenceError> {
        self.inner.audit_history(player_id, limit)
    }

    fn audit_totals(&self, player_id: &str) -> Result<AuditTotals, PersistenceError> {
        self.inner.audit_totals(player_id)
    }

    fn max_batch_size(&self) -> usize {
        self.inner.max_batch_size()
    }
}
