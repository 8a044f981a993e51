use crate::{
    field::{Field, FieldValue},
    types::{PlayerId, Timestamp},
    validator::ValidationIssue,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Where an update came from. Each source has its own field schema.
/// Variants are only ever added; stored audit rows reference them by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    MedicalAppointment,
    TrainingAttendance,
    Injury,
    GpsSession,
    AiAnalysis,
    CsvRow,
    ExternalSync,
    ManualValueOverride,
}

impl UpdateSource {
    pub const ALL: [UpdateSource; 8] = [
        UpdateSource::MedicalAppointment,
        UpdateSource::TrainingAttendance,
        UpdateSource::Injury,
        UpdateSource::GpsSession,
        UpdateSource::AiAnalysis,
        UpdateSource::CsvRow,
        UpdateSource::ExternalSync,
        UpdateSource::ManualValueOverride,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateSource::MedicalAppointment  => "medical_appointment",
            UpdateSource::TrainingAttendance  => "training_attendance",
            UpdateSource::Injury              => "injury",
            UpdateSource::GpsSession          => "gps_session",
            UpdateSource::AiAnalysis          => "ai_analysis",
            UpdateSource::CsvRow              => "csv_row",
            UpdateSource::ExternalSync        => "external_sync",
            UpdateSource::ManualValueOverride => "manual_value_override",
        }
    }

    /// The sub-collection row this source appends alongside its field writes.
    pub fn implied_collection(&self, has_reason: bool) -> Option<SubCollection> {
        match self {
            UpdateSource::MedicalAppointment  => Some(SubCollection::Appointments),
            UpdateSource::Injury              => Some(SubCollection::Injuries),
            UpdateSource::GpsSession          => Some(SubCollection::GpsSessions),
            UpdateSource::AiAnalysis          => Some(SubCollection::AiAnalyses),
            UpdateSource::ManualValueOverride if has_reason => Some(SubCollection::Notes),
            _ => None,
        }
    }
}

/// Named per-player sub-collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubCollection {
    Appointments,
    Injuries,
    Notes,
    AiAnalyses,
    GpsSessions,
}

impl SubCollection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubCollection::Appointments => "appointments",
            SubCollection::Injuries     => "injuries",
            SubCollection::Notes        => "notes",
            SubCollection::AiAnalyses   => "ai_analyses",
            SubCollection::GpsSessions  => "gps_sessions",
        }
    }
}

fn default_actor() -> String {
    "system".to_string()
}

/// An update as handed over by the route layer. `changes` is still loosely
/// typed; the validator turns it into a [`ValidatedUpdate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub player_id: PlayerId,
    pub source:    UpdateSource,
    #[serde(default)]
    pub changes:   BTreeMap<String, serde_json::Value>,
    #[serde(default = "default_actor")]
    pub actor:     String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason:    Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: Timestamp,
}

impl UpdateRequest {
    pub fn new(player_id: impl Into<PlayerId>, source: UpdateSource, actor: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            source,
            changes:   BTreeMap::new(),
            actor:     actor.into(),
            reason:    None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_change(mut self, field: &str, value: impl Into<serde_json::Value>) -> Self {
        self.changes.insert(field.to_string(), value.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A request that passed validation: typed changes in field order,
/// schema defaults filled in, plus any non-blocking warnings.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedUpdate {
    pub player_id: PlayerId,
    pub source:    UpdateSource,
    pub actor:     String,
    pub reason:    Option<String>,
    pub timestamp: Timestamp,
    pub changes:   Vec<(Field, FieldValue)>,
    pub warnings:  Vec<ValidationIssue>,
}

impl ValidatedUpdate {
    pub fn changed_fields(&self) -> BTreeSet<Field> {
        self.changes.iter().map(|(f, _)| *f).collect()
    }

    /// Payload for the sub-collection row this update implies, if any.
    pub fn sub_record_payload(&self) -> serde_json::Value {
        let fields: serde_json::Map<String, serde_json::Value> = self
            .changes
            .iter()
            .map(|(f, v)| {
                (f.as_str().to_string(), serde_json::to_value(v).unwrap_or_default())
            })
            .collect();
        serde_json::json!({
            "source": self.source.as_str(),
            "fields": fields,
            "reason": self.reason,
        })
    }
}
