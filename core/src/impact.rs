//! Impact analysis: a cascade computed against a snapshot and never committed.

use crate::{
    cascade::{self, CascadeOutcome, FieldChange},
    error::CascadeError,
    record::PlayerRecord,
    registry::RuleRegistry,
    types::PlayerId,
    update::ValidatedUpdate,
    validator::ValidationIssue,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// High when a high-impact rule changed a field, medium when two or more
    /// cascading fields changed.
    pub fn assess(registry: &RuleRegistry, outcome: &CascadeOutcome) -> Self {
        let high_impact = outcome
            .fired
            .iter()
            .filter_map(|id| registry.rule(id))
            .any(|rule| rule.high_impact);
        if high_impact {
            RiskLevel::High
        } else if outcome.cascading.len() >= 2 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactReport {
    pub player_id:           PlayerId,
    pub direct_updates:      Vec<FieldChange>,
    pub cascading_updates:   Vec<FieldChange>,
    /// Labels of the rules that changed a field, in firing order.
    pub affected_subsystems: Vec<String>,
    pub risk_level:          RiskLevel,
    pub warnings:            Vec<ValidationIssue>,
}

/// Cascade `update` against `snapshot` and shape the result for review.
pub fn analyze(
    registry: &RuleRegistry,
    snapshot: &PlayerRecord,
    update:   &ValidatedUpdate,
) -> Result<ImpactReport, CascadeError> {
    let outcome = cascade::apply(registry, snapshot, &update.changes, update.timestamp)?;
    let affected_subsystems = outcome
        .fired
        .iter()
        .filter_map(|id| registry.rule(id))
        .map(|rule| rule.label.to_string())
        .collect();
    let risk_level = RiskLevel::assess(registry, &outcome);

    Ok(ImpactReport {
        player_id: update.player_id.clone(),
        direct_updates: outcome.direct,
        cascading_updates: outcome.cascading,
        affected_subsystems,
        risk_level,
        warnings: update.warnings.clone(),
    })
}
