//! Audit log: append-only ledger of committed field changes.
//!
//! RULES:
//!   - `record` is called only after the store accepted the write.
//!   - A failed audit write is logged as a warning and never fails the
//!     update it describes.
//!   - Entries are never updated or deleted; the schema enforces it.

use crate::{
    cascade::{find_stale, FieldChange, StaleField},
    config::AuditConfig,
    error::{IntegrityError, IntegrityResult, PersistenceError},
    field::{Field, FieldValue},
    registry::RuleRegistry,
    store::PlayerStore,
    types::{PlayerId, Timestamp, UpdateId},
    update::SubCollection,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Audit `source` used for the entries written at onboarding.
pub const ONBOARDING_SOURCE: &str = "onboarding";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Store-assigned; None until written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id:        Option<i64>,
    pub update_id: UpdateId,
    pub player_id: PlayerId,
    pub field:     Field,
    pub before:    FieldValue,
    pub after:     FieldValue,
    pub source:    String,
    pub actor:     String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason:    Option<String>,
    /// Rule that produced the change; None for direct writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id:   Option<String>,
    pub timestamp: Timestamp,
}

/// Shared attributes of every entry written for one committed update.
#[derive(Debug, Clone)]
pub struct EntryContext<'a> {
    pub update_id: UpdateId,
    pub player_id: &'a str,
    pub source:    &'a str,
    pub actor:     &'a str,
    pub reason:    Option<&'a str>,
    pub timestamp: Timestamp,
}

impl EntryContext<'_> {
    pub fn entries<'c>(&self, changes: impl IntoIterator<Item = &'c FieldChange>) -> Vec<AuditEntry> {
        changes
            .into_iter()
            .map(|change| AuditEntry {
                id:        None,
                update_id: self.update_id,
                player_id: self.player_id.to_string(),
                field:     change.field,
                before:    change.before.clone(),
                after:     change.after.clone(),
                source:    self.source.to_string(),
                actor:     self.actor.to_string(),
                reason:    self.reason.map(str::to_string),
                rule_id:   change.rule_id.clone(),
                timestamp: self.timestamp,
            })
            .collect()
    }
}

/// Write `entries`. Returns false (after logging) when the store refused them.
pub fn record<S: PlayerStore + ?Sized>(store: &S, entries: &[AuditEntry]) -> bool {
    if entries.is_empty() {
        return true;
    }
    match store.append_audit(entries) {
        Ok(()) => true,
        Err(e) => {
            let player = entries.first().map(|e| e.player_id.as_str()).unwrap_or("-");
            log::warn!(
                "player={player} audit write failed for {} entries: {e}",
                entries.len()
            );
            false
        }
    }
}

/// Most-recent-first history, with the limit clamped to the configured maximum.
pub fn history<S: PlayerStore + ?Sized>(
    store:     &S,
    config:    &AuditConfig,
    player_id: &str,
    limit:     Option<usize>,
) -> Result<Vec<AuditEntry>, PersistenceError> {
    let limit = limit
        .unwrap_or(config.default_history_limit)
        .min(config.max_history_limit);
    if limit == 0 {
        return Ok(Vec::new());
    }
    store.audit_history(player_id, limit)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInjury {
    pub injury_type: String,
    pub severity:    Option<String>,
    pub status:      String,
    pub recorded_at: Timestamp,
}

/// Aggregated integrity view of one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub player_id:           PlayerId,
    /// Distinct committed updates over the player's whole ledger.
    pub total_updates:       usize,
    pub total_field_changes: usize,
    pub updates_by_source:   BTreeMap<String, usize>,
    pub open_injuries:       Vec<OpenInjury>,
    pub recent_ai_analyses:  usize,
    pub last_updated:        Timestamp,
    pub last_computed:       BTreeMap<Field, Option<Timestamp>>,
    pub stale_fields:        Vec<StaleField>,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.stale_fields.is_empty()
    }
}

/// Build the integrity report from stored history and current state only.
pub fn integrity_report<S: PlayerStore + ?Sized>(
    store:     &S,
    registry:  &RuleRegistry,
    config:    &AuditConfig,
    player_id: &str,
    now:       Timestamp,
) -> IntegrityResult<IntegrityReport> {
    let record = store
        .load_player(player_id)?
        .ok_or_else(|| IntegrityError::PlayerNotFound { player_id: player_id.to_string() })?;

    let totals = store.audit_totals(player_id)?;

    let injuries = store.sub_records(player_id, SubCollection::Injuries, config.max_history_limit)?;
    let mut seen = BTreeSet::new();
    let mut open_injuries = Vec::new();
    // Newest first: the first row per injury type is its current state.
    for row in &injuries {
        let fields = &row.payload["fields"];
        let Some(injury_type) = fields[Field::InjuryType.as_str()].as_str() else {
            continue;
        };
        if !seen.insert(injury_type.to_string()) {
            continue;
        }
        let status = fields[Field::InjuryStatus.as_str()].as_str().unwrap_or("active");
        if status != "cleared" {
            open_injuries.push(OpenInjury {
                injury_type: injury_type.to_string(),
                severity:    fields[Field::InjurySeverity.as_str()].as_str().map(str::to_string),
                status:      status.to_string(),
                recorded_at: row.recorded_at,
            });
        }
    }

    let cutoff = now - Duration::days(config.recent_analysis_days);
    let recent_ai_analyses = store
        .sub_records(player_id, SubCollection::AiAnalyses, config.max_history_limit)?
        .iter()
        .filter(|row| row.recorded_at >= cutoff)
        .count();

    let last_computed = record
        .derived
        .iter()
        .map(|(field, d)| (*field, d.last_computed_at))
        .collect();

    Ok(IntegrityReport {
        player_id: player_id.to_string(),
        total_updates: totals.updates,
        total_field_changes: totals.field_changes,
        updates_by_source: totals.updates_by_source,
        open_injuries,
        recent_ai_analyses,
        last_updated: record.updated_at,
        last_computed,
        stale_fields: find_stale(registry, &record),
    })
}
