//! The cascade engine: recomputes derived fields after a source change.
//!
//! ALGORITHM (pass based, deterministic):
//!   1. Apply the direct changes to a copy of the snapshot; the changed
//!      fields seed the work-set.
//!   2. Select every rule whose triggers intersect the work-set, in
//!      (priority, id) order.
//!   3. Run each against the copy as updated so far in this cascade
//!      (read-after-write), stamp its targets, collect changed targets.
//!   4. Changed targets become the next work-set. Stop when nothing changes.
//!
//! RULES:
//!   - Never touches persistence. Input snapshot in, new snapshot out.
//!   - Exceeding the registry's pass limit is a rule-graph bug and fails
//!     the whole update.

use crate::{
    error::CascadeError,
    field::{Field, FieldValue},
    record::PlayerRecord,
    registry::{CascadeRule, RuleRegistry},
    types::Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One field transition. `rule_id` is None for direct (requested) changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field:   Field,
    pub before:  FieldValue,
    pub after:   FieldValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CascadeOutcome {
    /// Snapshot after direct and derived changes.
    pub record:    PlayerRecord,
    /// Every requested field, including no-op writes.
    pub direct:    Vec<FieldChange>,
    /// Derived fields whose value changed, in execution order.
    pub cascading: Vec<FieldChange>,
    /// Derived fields recomputed (changed or not); their stamps must be persisted.
    pub touched:   BTreeSet<Field>,
    /// Ids of rules that changed at least one field, in first-fired order.
    pub fired:     Vec<&'static str>,
    pub passes:    usize,
}

impl CascadeOutcome {
    pub fn all_changes(&self) -> impl Iterator<Item = &FieldChange> {
        self.direct
            .iter()
            .filter(|c| c.before != c.after)
            .chain(self.cascading.iter())
    }
}

/// Apply `changes` to a copy of `snapshot` and cascade.
pub fn apply(
    registry: &RuleRegistry,
    snapshot: &PlayerRecord,
    changes:  &[(Field, FieldValue)],
    at:       Timestamp,
) -> Result<CascadeOutcome, CascadeError> {
    let mut record = snapshot.clone();
    let mut direct = Vec::with_capacity(changes.len());
    let mut work_set = BTreeSet::new();

    for (field, value) in changes {
        let before = record.get(*field);
        record
            .set(*field, value.clone())
            .map_err(|m| CascadeError::KindMismatch { rule_id: "request".into(), field: m.field })?;
        direct.push(FieldChange {
            field:   *field,
            before,
            after:   value.clone(),
            rule_id: None,
        });
        work_set.insert(*field);
    }

    let mut outcome = run(registry, record, work_set, at)?;
    outcome.direct = direct;
    outcome.record.updated_at = at;
    Ok(outcome)
}

/// Recompute every derived field from the record's source values.
/// Used at onboarding, when no derived value exists yet.
pub fn recompute_all(
    registry: &RuleRegistry,
    record:   &PlayerRecord,
    at:       Timestamp,
) -> Result<CascadeOutcome, CascadeError> {
    let seed: BTreeSet<Field> = Field::ALL.iter().copied().filter(|f| !f.is_derived()).collect();
    run(registry, record.clone(), seed, at)
}

fn run(
    registry:     &RuleRegistry,
    mut record:   PlayerRecord,
    mut work_set: BTreeSet<Field>,
    at:           Timestamp,
) -> Result<CascadeOutcome, CascadeError> {
    let mut cascading = Vec::new();
    let mut touched = BTreeSet::new();
    let mut fired: Vec<&'static str> = Vec::new();
    let mut passes = 0;

    while !work_set.is_empty() {
        let selected = registry.triggered_by(&work_set);
        if selected.is_empty() {
            break;
        }

        passes += 1;
        if passes > registry.max_passes() {
            return Err(CascadeError::PassLimitExceeded {
                max_passes: registry.max_passes(),
                last_rules: selected.iter().map(|r| r.id.to_string()).collect(),
            });
        }

        let mut next = BTreeSet::new();
        for rule in selected {
            let changed = fire(registry, rule, &mut record, at, &mut cascading)?;
            touched.extend(rule.targets.iter().copied());
            if !changed.is_empty() && !fired.contains(&rule.id) {
                fired.push(rule.id);
            }
            next.extend(changed);
        }
        work_set = next;
    }

    Ok(CascadeOutcome {
        record,
        direct: Vec::new(),
        cascading,
        touched,
        fired,
        passes,
    })
}

/// Run one rule against `record` in place. Returns the targets whose value changed.
fn fire(
    registry:  &RuleRegistry,
    rule:      &CascadeRule,
    record:    &mut PlayerRecord,
    at:        Timestamp,
    cascading: &mut Vec<FieldChange>,
) -> Result<Vec<Field>, CascadeError> {
    let mut changed = Vec::new();
    for (field, value) in (rule.recompute)(record, registry.scoring()) {
        if !rule.targets.contains(&field) {
            return Err(CascadeError::UndeclaredTarget { rule_id: rule.id.to_string(), field });
        }
        let before = record.get(field);
        record
            .set(field, value.clone())
            .map_err(|m| CascadeError::KindMismatch { rule_id: rule.id.to_string(), field: m.field })?;
        if before != value {
            log::debug!("cascade {}: {field} {before} -> {value}", rule.id);
            cascading.push(FieldChange {
                field,
                before,
                after: value,
                rule_id: Some(rule.id.to_string()),
            });
            changed.push(field);
        }
    }
    for target in &rule.targets {
        record.stamp_derived(*target, &rule.triggers, at);
    }
    Ok(changed)
}

/// A derived field whose stored value disagrees with its rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleField {
    pub field:    Field,
    pub stored:   FieldValue,
    pub expected: FieldValue,
    pub rule_id:  String,
}

/// Recompute every rule once, in execution order, and report mismatches.
/// Registry load guarantees producers run before consumers, so one sweep
/// sees fresh inputs.
pub fn find_stale(registry: &RuleRegistry, record: &PlayerRecord) -> Vec<StaleField> {
    let mut scratch = record.clone();
    let mut stale = Vec::new();
    for rule in registry.rules() {
        for (field, expected) in (rule.recompute)(&scratch, registry.scoring()) {
            let stored = record.get(field);
            if stored != expected {
                stale.push(StaleField {
                    field,
                    stored,
                    expected: expected.clone(),
                    rule_id: rule.id.to_string(),
                });
            }
            // A wrong-kind value already shows up as a stale entry; downstream
            // rules keep reading the stored value.
            if let Err(m) = scratch.set(field, expected) {
                log::debug!("verify {}: {} does not fit '{}', kept stored value", rule.id, m.value, m.field);
            }
        }
    }
    stale
}
