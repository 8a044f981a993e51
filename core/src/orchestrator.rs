//! The update orchestrator: the one entry point that mutates players.
//!
//! SINGLE UPDATE (fixed order, never reordered):
//!   1. Validate          (pure, outside the player lock)
//!   2. Lock the player
//!   3. Read snapshot     (fresh from the store, never cached)
//!   4. Cascade           (pure, against the snapshot)
//!   5. Commit            (upsert + implied sub-record, one transaction)
//!   6. Audit             (only after the commit; failures are warnings)
//!
//! RULES:
//!   - A blocking validation error or a cascade error leaves the store untouched.
//!   - Bulk and sync batches never abort on a row failure.
//!   - Rows of one player keep their input order. Bulk batches run distinct
//!     players on the worker pool in parallel.
//!   - Nothing waits on the worker pool while holding a player lock.

use crate::{
    audit::{self, AuditEntry, EntryContext, IntegrityReport, ONBOARDING_SOURCE},
    cascade::{self, find_stale, CascadeOutcome, FieldChange, StaleField},
    config::EngineConfig,
    error::{IntegrityError, IntegrityResult, PersistenceError, PersistenceErrorKind},
    impact::{self, ImpactReport},
    locks::PlayerLocks,
    record::{PlayerProfile, PlayerRecord},
    registry::{infer_source, RuleRegistry},
    store::{ChunkOutcome, FieldPatch, PlayerStore, SqliteStore, StoreOp, SubRecord},
    types::{PlayerId, UpdateId},
    update::{UpdateRequest, UpdateSource, ValidatedUpdate},
    validator::{self, IssueReason, ValidationIssue, ValidationResult},
};
use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Shared cancellation flag, checked between rows.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why an operation did not commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub code:      String,
    pub message:   String,
    pub retryable: bool,
}

impl From<&IntegrityError> for Failure {
    fn from(err: &IntegrityError) -> Self {
        Self {
            code:      err.code().to_string(),
            message:   err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    pub success:           bool,
    pub errors:            Vec<ValidationIssue>,
    pub warnings:          Vec<ValidationIssue>,
    pub direct_updates:    Vec<FieldChange>,
    pub cascading_updates: Vec<FieldChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_id:         Option<UpdateId>,
    pub audit_recorded:    bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure:           Option<Failure>,
}

impl CommitResult {
    fn committed(
        update:         &ValidatedUpdate,
        outcome:        CascadeOutcome,
        update_id:      UpdateId,
        audit_recorded: bool,
    ) -> Self {
        Self {
            success: true,
            errors: Vec::new(),
            warnings: update.warnings.clone(),
            direct_updates: outcome.direct,
            cascading_updates: outcome.cascading,
            update_id: Some(update_id),
            audit_recorded,
            failure: None,
        }
    }

    pub fn failed(err: &IntegrityError) -> Self {
        let (errors, warnings) = match err {
            IntegrityError::Validation(result) => (result.errors.clone(), result.warnings.clone()),
            _ => (Vec::new(), Vec::new()),
        };
        Self {
            success: false,
            errors,
            warnings,
            direct_updates: Vec::new(),
            cascading_updates: Vec::new(),
            update_id: None,
            audit_recorded: false,
            failure: Some(Failure::from(err)),
        }
    }
}

/// Per-row outcome of a bulk or sync batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowResult {
    pub row:               usize,
    pub player_id:         PlayerId,
    pub success:           bool,
    pub errors:            Vec<ValidationIssue>,
    pub warnings:          Vec<ValidationIssue>,
    pub cascading_updates: Vec<FieldChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_id:         Option<UpdateId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure:           Option<Failure>,
}

impl RowResult {
    fn from_commit(row: usize, player_id: &str, result: CommitResult) -> Self {
        Self {
            row,
            player_id: player_id.to_string(),
            success: result.success,
            errors: result.errors,
            warnings: result.warnings,
            cascading_updates: result.cascading_updates,
            update_id: result.update_id,
            failure: result.failure,
        }
    }

    fn failed(row: usize, player_id: &str, err: &IntegrityError) -> Self {
        Self::from_commit(row, player_id, CommitResult::failed(err))
    }

    pub fn is_cancelled(&self) -> bool {
        self.failure.as_ref().is_some_and(|f| f.code == "cancelled")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    /// Rows that ran to success or failure. Cancelled rows are not counted.
    pub processed:  usize,
    pub successful: usize,
    pub failed:     usize,
    pub cancelled:  usize,
    /// One entry per input row, in input order.
    pub results:    Vec<RowResult>,
    /// Store chunks, for sync batches only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub chunks:     Vec<ChunkOutcome>,
}

impl BulkSummary {
    fn from_results(mut results: Vec<RowResult>, chunks: Vec<ChunkOutcome>) -> Self {
        results.sort_by_key(|r| r.row);
        let cancelled = results.iter().filter(|r| r.is_cancelled()).count();
        let successful = results.iter().filter(|r| r.success).count();
        let failed = results.len() - successful - cancelled;
        Self {
            processed: successful + failed,
            successful,
            failed,
            cancelled,
            results,
            chunks,
        }
    }
}

/// A sync row validated and cascaded against the working snapshot.
struct PreparedRow {
    row:     usize,
    update:  ValidatedUpdate,
    outcome: CascadeOutcome,
    ops:     Vec<StoreOp>,
}

pub struct UpdateOrchestrator<S: PlayerStore> {
    store:    S,
    registry: RuleRegistry,
    config:   EngineConfig,
    locks:    PlayerLocks,
    pool:     rayon::ThreadPool,
}

impl<S: PlayerStore> UpdateOrchestrator<S> {
    /// Wire an orchestrator with the standard rule set.
    pub fn new(store: S, config: EngineConfig) -> IntegrityResult<Self> {
        let registry = RuleRegistry::standard(config.scoring.clone())?;
        Self::with_registry(store, registry, config)
    }

    pub fn with_registry(store: S, registry: RuleRegistry, config: EngineConfig) -> IntegrityResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.max(1))
            .thread_name(|i| format!("integrity-worker-{i}"))
            .build()
            .map_err(|e| anyhow::anyhow!("cannot start worker pool: {e}"))?;
        log::info!(
            "orchestrator ready: {} rules, max_passes={}, workers={}",
            registry.rules().len(),
            registry.max_passes(),
            config.worker_threads
        );
        Ok(Self { store, registry, config, locks: PlayerLocks::new(), pool })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn locks(&self) -> &PlayerLocks {
        &self.locks
    }

    // ── Roster ────────────────────────────────────────────────────────

    /// Create a player and compute every derived field from its profile.
    pub fn onboard_player(
        &self,
        player_id: &str,
        profile:   PlayerProfile,
        actor:     &str,
    ) -> IntegrityResult<PlayerRecord> {
        if player_id.trim().is_empty() {
            return Err(IntegrityError::Validation(ValidationResult {
                errors: vec![ValidationIssue::new(
                    "playerId",
                    IssueReason::MissingField,
                    "playerId must not be empty".to_string(),
                )],
                warnings: Vec::new(),
            }));
        }

        self.locks.with_player(player_id, || -> IntegrityResult<PlayerRecord> {
            if self.store.load_player(player_id)?.is_some() {
                return Err(IntegrityError::PlayerExists { player_id: player_id.to_string() });
            }

            let now = Utc::now();
            let fresh = PlayerRecord::from_profile(player_id.to_string(), profile, now);
            let outcome = cascade::recompute_all(&self.registry, &fresh, now)?;
            let mut record = outcome.record;
            self.store.insert_player(&record)?;
            record.version = 1;

            let context = EntryContext {
                update_id: uuid::Uuid::new_v4(),
                player_id,
                source:    ONBOARDING_SOURCE,
                actor,
                reason:    Some("created"),
                timestamp: now,
            };
            audit::record(&self.store, &context.entries(&outcome.cascading));
            log::info!(
                "player={player_id} onboarded: {} derived fields computed",
                outcome.cascading.len()
            );
            Ok(record)
        })
    }

    pub fn player(&self, player_id: &str) -> IntegrityResult<PlayerRecord> {
        self.store
            .load_player(player_id)?
            .ok_or_else(|| IntegrityError::PlayerNotFound { player_id: player_id.to_string() })
    }

    // ── Single update ─────────────────────────────────────────────────

    /// Dry-run validation. Never touches the store.
    pub fn validate(&self, request: &UpdateRequest) -> ValidationResult {
        validator::validate(request)
    }

    /// Run one update end to end. Failures are reported in the result.
    pub fn submit(&self, request: &UpdateRequest) -> CommitResult {
        match self.try_submit(request) {
            Ok(result) => result,
            Err(err) => {
                match &err {
                    IntegrityError::Validation(v) => log::debug!(
                        "player={} source={} rejected: {}",
                        request.player_id,
                        request.source.as_str(),
                        v.summary()
                    ),
                    _ => log::warn!(
                        "player={} source={} failed: {err}",
                        request.player_id,
                        request.source.as_str()
                    ),
                }
                CommitResult::failed(&err)
            }
        }
    }

    /// Like [`submit`](Self::submit), but surfaces the failure as an error.
    pub fn try_submit(&self, request: &UpdateRequest) -> IntegrityResult<CommitResult> {
        let update = validator::check(request).map_err(IntegrityError::Validation)?;
        self.locks
            .with_player(&update.player_id, || self.commit_locked(&update))
    }

    /// Steps 3 to 6. Caller holds the player lock.
    fn commit_locked(&self, update: &ValidatedUpdate) -> IntegrityResult<CommitResult> {
        let snapshot = self.player(&update.player_id)?;
        let outcome = cascade::apply(&self.registry, &snapshot, &update.changes, update.timestamp)?;
        let ops = store_ops(update, &outcome, Some(snapshot.version));
        self.store.commit(&ops)?;

        let update_id = uuid::Uuid::new_v4();
        let entries = audit_entries(update, &outcome, update_id);
        let audit_recorded = audit::record(&self.store, &entries);
        log::info!(
            "player={} source={} committed: {} direct, {} cascading, passes={}",
            update.player_id,
            update.source.as_str(),
            update.changes.len(),
            outcome.cascading.len(),
            outcome.passes
        );
        Ok(CommitResult::committed(update, outcome, update_id, audit_recorded))
    }

    // ── Impact analysis ───────────────────────────────────────────────

    /// Preview the cascade of `changes` without committing anything.
    /// Without a `source`, the first source accepting every field is used.
    pub fn analyze_impact(
        &self,
        player_id: &str,
        changes:   BTreeMap<String, serde_json::Value>,
        source:    Option<UpdateSource>,
    ) -> IntegrityResult<ImpactReport> {
        let source = source.unwrap_or_else(|| infer_source(changes.keys().map(String::as_str)));
        let mut request = UpdateRequest::new(player_id, source, "impact-analysis");
        request.changes = changes;
        self.analyze_request(&request)
    }

    pub fn analyze_request(&self, request: &UpdateRequest) -> IntegrityResult<ImpactReport> {
        let update = validator::check(request).map_err(IntegrityError::Validation)?;
        let snapshot = self.player(&update.player_id)?;
        Ok(impact::analyze(&self.registry, &snapshot, &update)?)
    }

    // ── Batches ───────────────────────────────────────────────────────

    /// Run the single-update path for every row. Distinct players run in
    /// parallel on the worker pool; one player's rows run in input order.
    pub fn bulk_update(&self, rows: &[UpdateRequest], cancel: &CancelToken) -> BulkSummary {
        let groups = partition_by_player(rows);
        let results: Vec<RowResult> = self.pool.install(|| {
            groups
                .par_iter()
                .flat_map_iter(|indices| {
                    indices
                        .iter()
                        .map(|&row| {
                            let request = &rows[row];
                            if cancel.is_cancelled() {
                                return RowResult::failed(row, &request.player_id, &IntegrityError::Cancelled);
                            }
                            RowResult::from_commit(row, &request.player_id, self.submit(request))
                        })
                        .collect::<Vec<_>>()
                })
                .collect()
        });

        let summary = BulkSummary::from_results(results, Vec::new());
        log::info!(
            "bulk update: {} rows, {} ok, {} failed, {} cancelled",
            rows.len(),
            summary.successful,
            summary.failed,
            summary.cancelled
        );
        summary
    }

    /// Vendor sync: cascade every row against a working snapshot, then
    /// commit all writes through [`PlayerStore::batch_commit_rows`].
    /// A row commits whole or not at all; only committed rows are audited.
    pub fn sync_external(&self, rows: &[UpdateRequest], cancel: &CancelToken) -> BulkSummary {
        let mut results = Vec::new();
        let mut valid: Vec<(usize, ValidatedUpdate)> = Vec::new();
        for (row, request) in rows.iter().enumerate() {
            match validator::check(request) {
                Ok(update) => valid.push((row, update)),
                Err(v) => results.push(RowResult::failed(row, &request.player_id, &IntegrityError::Validation(v))),
            }
        }

        // Held until every row is committed and audited. While they are held,
        // work stays on this thread and never waits on the worker pool.
        let handles = self.locks.handles(valid.iter().map(|(_, u)| u.player_id.as_str()));
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let mut by_player: Vec<Vec<(usize, ValidatedUpdate)>> = Vec::new();
        let mut slot: HashMap<PlayerId, usize> = HashMap::new();
        for (row, update) in valid {
            let i = *slot.entry(update.player_id.clone()).or_insert_with(|| {
                by_player.push(Vec::new());
                by_player.len() - 1
            });
            by_player[i].push((row, update));
        }

        let mut ready = Vec::new();
        for player_rows in by_player {
            for item in self.prepare_player_rows(player_rows, cancel) {
                match item {
                    Ok(p) => ready.push(p),
                    Err(r) => results.push(r),
                }
            }
        }
        ready.sort_by_key(|p| p.row);

        let row_ops: Vec<&[StoreOp]> = ready.iter().map(|p| p.ops.as_slice()).collect();
        let report = self.store.batch_commit_rows(&row_ops);

        let mut first_op = 0;
        for p in ready {
            let start = first_op;
            first_op += p.ops.len();
            let error = match report.chunk_for(start) {
                Some(chunk) => chunk.error.clone(),
                None => Some(PersistenceError::new(PersistenceErrorKind::Rejected, "row not committed")),
            };
            match error {
                None => {
                    let update_id = uuid::Uuid::new_v4();
                    let entries = audit_entries(&p.update, &p.outcome, update_id);
                    let audit_recorded = audit::record(&self.store, &entries);
                    let result = CommitResult::committed(&p.update, p.outcome, update_id, audit_recorded);
                    results.push(RowResult::from_commit(p.row, &p.update.player_id, result));
                }
                Some(error) => {
                    results.push(RowResult::failed(p.row, &p.update.player_id, &IntegrityError::Persistence(error)));
                }
            }
        }

        let summary = BulkSummary::from_results(results, report.chunks);
        log::info!(
            "external sync: {} rows, {} ok, {} failed, {} cancelled, {} chunks",
            rows.len(),
            summary.successful,
            summary.failed,
            summary.cancelled,
            summary.chunks.len()
        );
        summary
    }

    /// Cascade one player's sync rows in order, chaining snapshot and version.
    fn prepare_player_rows(
        &self,
        rows:   Vec<(usize, ValidatedUpdate)>,
        cancel: &CancelToken,
    ) -> Vec<Result<PreparedRow, RowResult>> {
        let mut working: Option<PlayerRecord> = None;
        let mut out = Vec::with_capacity(rows.len());
        for (row, update) in rows {
            if cancel.is_cancelled() {
                out.push(Err(RowResult::failed(row, &update.player_id, &IntegrityError::Cancelled)));
                continue;
            }
            let snapshot = match working.take() {
                Some(record) => record,
                None => match self.player(&update.player_id) {
                    Ok(record) => record,
                    Err(e) => {
                        out.push(Err(RowResult::failed(row, &update.player_id, &e)));
                        continue;
                    }
                },
            };
            match cascade::apply(&self.registry, &snapshot, &update.changes, update.timestamp) {
                Ok(outcome) => {
                    let ops = store_ops(&update, &outcome, Some(snapshot.version));
                    let mut next = outcome.record.clone();
                    // Each upsert bumps the stored version by one.
                    next.version = snapshot.version + 1;
                    working = Some(next);
                    out.push(Ok(PreparedRow { row, update, outcome, ops }));
                }
                Err(e) => {
                    working = Some(snapshot);
                    out.push(Err(RowResult::failed(row, &update.player_id, &IntegrityError::from(e))));
                }
            }
        }
        out
    }

    // ── Read side ─────────────────────────────────────────────────────

    pub fn history(&self, player_id: &str, limit: Option<usize>) -> IntegrityResult<Vec<AuditEntry>> {
        Ok(audit::history(&self.store, &self.config.audit, player_id, limit)?)
    }

    pub fn integrity_report(&self, player_id: &str) -> IntegrityResult<IntegrityReport> {
        audit::integrity_report(&self.store, &self.registry, &self.config.audit, player_id, Utc::now())
    }

    /// Derived fields whose stored value disagrees with their rule.
    pub fn verify_player(&self, player_id: &str) -> IntegrityResult<Vec<StaleField>> {
        let record = self.player(player_id)?;
        Ok(find_stale(&self.registry, &record))
    }
}

impl UpdateOrchestrator<SqliteStore> {
    /// In-memory store with the schema applied and `EngineConfig::default_test()`.
    pub fn build_test() -> IntegrityResult<Self> {
        let config = EngineConfig::default_test();
        let store = SqliteStore::in_memory(config.store.clone())?;
        store.migrate()?;
        Self::new(store, config)
    }
}

/// Row indices grouped by player, groups in first-appearance order.
fn partition_by_player(rows: &[UpdateRequest]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut slot: HashMap<&str, usize> = HashMap::new();
    for (row, request) in rows.iter().enumerate() {
        let i = *slot.entry(request.player_id.as_str()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[i].push(row);
    }
    groups
}

/// Writes for one committed update: the field merge plus any implied sub-record.
fn store_ops(update: &ValidatedUpdate, outcome: &CascadeOutcome, expected_version: Option<u64>) -> Vec<StoreOp> {
    let derived = outcome
        .touched
        .iter()
        .filter_map(|f| outcome.record.derived_value(*f).map(|d| (*f, d.clone())))
        .collect();
    let mut ops = vec![StoreOp::UpsertFields {
        player_id: update.player_id.clone(),
        patch: FieldPatch {
            source: update.changes.clone(),
            derived,
            updated_at: outcome.record.updated_at,
        },
        expected_version,
    }];
    if let Some(collection) = update.source.implied_collection(update.reason.is_some()) {
        ops.push(StoreOp::AppendSubRecord {
            player_id: update.player_id.clone(),
            record: SubRecord {
                id: None,
                collection,
                actor: update.actor.clone(),
                recorded_at: update.timestamp,
                payload: update.sub_record_payload(),
            },
        });
    }
    ops
}

fn audit_entries(update: &ValidatedUpdate, outcome: &CascadeOutcome, update_id: UpdateId) -> Vec<AuditEntry> {
    EntryContext {
        update_id,
        player_id: &update.player_id,
        source:    update.source.as_str(),
        actor:     &update.actor,
        reason:    update.reason.as_deref(),
        timestamp: update.timestamp,
    }
    .entries(outcome.all_changes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_keeps_first_appearance_order() {
        let rows: Vec<UpdateRequest> = ["b", "a", "b", "c", "a"]
            .iter()
            .map(|p| UpdateRequest::new(*p, UpdateSource::CsvRow, "test"))
            .collect();
        assert_eq!(partition_by_player(&rows), vec![vec![0, 2], vec![1, 4], vec![3]]);
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
