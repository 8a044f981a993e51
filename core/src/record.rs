//! The player document: source fields grouped per domain plus derived fields.
//!
//! RULE: derived fields are only ever written by the cascade engine.
//! Route-layer requests can name source fields only; the validator rejects
//! derived field names as unknown.

use crate::{
    field::{Field, FieldValue},
    types::{PlayerId, Timestamp},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalFields {
    pub appointment_status: Option<String>,
    pub appointment_type:   Option<String>,
    pub clinician:          Option<String>,
    pub assessment_score:   Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingFields {
    pub sessions_scheduled: Option<f64>,
    pub sessions_attended:  Option<f64>,
    pub training_load:      Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsFields {
    pub session_id:     Option<String>,
    pub total_distance: Option<f64>,
    pub max_speed:      Option<f64>,
    pub sprint_count:   Option<f64>,
    pub player_load:    Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjuryFields {
    pub injury_type:          Option<String>,
    pub severity:             Option<String>,
    pub status:               Option<String>,
    pub expected_return_days: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialFields {
    pub market_value: Option<f64>,
    pub weekly_wage:  Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohesionFields {
    pub peer_rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisFields {
    pub risk_score: Option<f64>,
    pub summary:    Option<String>,
}

/// One derived value together with its provenance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedValue {
    pub value:            FieldValue,
    pub computed_from:    Vec<Field>,
    pub last_computed_at: Option<Timestamp>,
}

/// Initial source facts for a player joining the roster.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerProfile {
    pub display_name: String,
    pub medical:      MedicalFields,
    pub training:     TrainingFields,
    pub gps:          GpsFields,
    pub injury:       InjuryFields,
    pub financial:    FinancialFields,
    pub cohesion:     CohesionFields,
    pub analysis:     AnalysisFields,
}

impl PlayerProfile {
    /// A fit, available squad player. Onboarding it yields
    /// attendanceScore 9.2, medicalScore 8.8, playerValue 147000,
    /// cohesionReliability 9.1 and fitnessRating 8.5.
    pub fn baseline_test(display_name: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            medical: MedicalFields {
                appointment_status: Some("attended".into()),
                appointment_type:   Some("screening".into()),
                clinician:          None,
                assessment_score:   Some(8.8),
            },
            training: TrainingFields {
                sessions_scheduled: Some(25.0),
                sessions_attended:  Some(23.0),
                training_load:      Some(420.0),
            },
            gps: GpsFields {
                session_id:     Some("baseline".into()),
                total_distance: Some(6800.0),
                max_speed:      Some(31.5),
                sprint_count:   Some(18.0),
                player_load:    Some(640.0),
            },
            injury:    InjuryFields::default(),
            financial: FinancialFields {
                market_value: Some(147_000.0),
                weekly_wage:  Some(2_100.0),
            },
            cohesion: CohesionFields { peer_rating: Some(8.7) },
            analysis: AnalysisFields::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub player_id:    PlayerId,
    pub display_name: String,
    pub medical:      MedicalFields,
    pub training:     TrainingFields,
    pub gps:          GpsFields,
    pub injury:       InjuryFields,
    pub financial:    FinancialFields,
    pub cohesion:     CohesionFields,
    pub analysis:     AnalysisFields,
    #[serde(default)]
    pub derived:      BTreeMap<Field, DerivedValue>,
    pub created_at:   Timestamp,
    pub updated_at:   Timestamp,
    /// Store-assigned document version. Not part of the stored document body.
    #[serde(skip)]
    pub version:      u64,
}

/// A value of the wrong kind was written to a field.
#[derive(Debug, Clone, PartialEq)]
pub struct KindMismatch {
    pub field: Field,
    pub value: FieldValue,
}

impl PlayerRecord {
    /// A record with source facts only. Derived fields are empty until the
    /// cascade engine computes them.
    pub fn from_profile(player_id: PlayerId, profile: PlayerProfile, at: Timestamp) -> Self {
        Self {
            player_id,
            display_name: profile.display_name,
            medical:      profile.medical,
            training:     profile.training,
            gps:          profile.gps,
            injury:       profile.injury,
            financial:    profile.financial,
            cohesion:     profile.cohesion,
            analysis:     profile.analysis,
            derived:      BTreeMap::new(),
            created_at:   at,
            updated_at:   at,
            version:      0,
        }
    }

    pub fn get(&self, field: Field) -> FieldValue {
        use Field::*;
        match field {
            MedicalAppointmentStatus => self.medical.appointment_status.clone().into(),
            AppointmentType          => self.medical.appointment_type.clone().into(),
            Clinician                => self.medical.clinician.clone().into(),
            MedicalAssessmentScore   => self.medical.assessment_score.into(),
            SessionsScheduled        => self.training.sessions_scheduled.into(),
            SessionsAttended         => self.training.sessions_attended.into(),
            TrainingLoad             => self.training.training_load.into(),
            GpsSessionId             => self.gps.session_id.clone().into(),
            GpsTotalDistance         => self.gps.total_distance.into(),
            GpsMaxSpeed              => self.gps.max_speed.into(),
            GpsSprintCount           => self.gps.sprint_count.into(),
            GpsPlayerLoad            => self.gps.player_load.into(),
            InjuryType               => self.injury.injury_type.clone().into(),
            InjurySeverity           => self.injury.severity.clone().into(),
            InjuryStatus             => self.injury.status.clone().into(),
            ExpectedReturnDays       => self.injury.expected_return_days.into(),
            MarketValue              => self.financial.market_value.into(),
            WeeklyWage               => self.financial.weekly_wage.into(),
            CohesionPeerRating       => self.cohesion.peer_rating.into(),
            AiRiskScore              => self.analysis.risk_score.into(),
            AiSummary                => self.analysis.summary.clone().into(),
            TrainingAttendanceRate | AttendanceScore | MedicalScore | MedicalStatus
            | PlayerValue | FitnessRating | PerformanceFlag | SelectionRisk
            | CohesionReliability => self
                .derived
                .get(&field)
                .map(|d| d.value.clone())
                .unwrap_or_default(),
        }
    }

    /// Write one field. Derived fields keep their provenance; use
    /// [`PlayerRecord::stamp_derived`] to update it.
    pub fn set(&mut self, field: Field, value: FieldValue) -> Result<(), KindMismatch> {
        if let Some(kind) = value.kind() {
            if kind != field.kind() {
                return Err(KindMismatch { field, value });
            }
        }

        use Field::*;
        match field {
            MedicalAppointmentStatus => self.medical.appointment_status = text(value),
            AppointmentType          => self.medical.appointment_type = text(value),
            Clinician                => self.medical.clinician = text(value),
            MedicalAssessmentScore   => self.medical.assessment_score = value.as_number(),
            SessionsScheduled        => self.training.sessions_scheduled = value.as_number(),
            SessionsAttended         => self.training.sessions_attended = value.as_number(),
            TrainingLoad             => self.training.training_load = value.as_number(),
            GpsSessionId             => self.gps.session_id = text(value),
            GpsTotalDistance         => self.gps.total_distance = value.as_number(),
            GpsMaxSpeed              => self.gps.max_speed = value.as_number(),
            GpsSprintCount           => self.gps.sprint_count = value.as_number(),
            GpsPlayerLoad            => self.gps.player_load = value.as_number(),
            InjuryType               => self.injury.injury_type = text(value),
            InjurySeverity           => self.injury.severity = text(value),
            InjuryStatus             => self.injury.status = text(value),
            ExpectedReturnDays       => self.injury.expected_return_days = value.as_number(),
            MarketValue              => self.financial.market_value = value.as_number(),
            WeeklyWage               => self.financial.weekly_wage = value.as_number(),
            CohesionPeerRating       => self.cohesion.peer_rating = value.as_number(),
            AiRiskScore              => self.analysis.risk_score = value.as_number(),
            AiSummary                => self.analysis.summary = text(value),
            TrainingAttendanceRate | AttendanceScore | MedicalScore | MedicalStatus
            | PlayerValue | FitnessRating | PerformanceFlag | SelectionRisk
            | CohesionReliability => {
                self.derived.entry(field).or_default().value = value;
            }
        }
        Ok(())
    }

    /// Record that a rule recomputed `field` from `computed_from` at `at`.
    pub fn stamp_derived(&mut self, field: Field, computed_from: &[Field], at: Timestamp) {
        let entry = self.derived.entry(field).or_default();
        entry.computed_from = computed_from.to_vec();
        entry.last_computed_at = Some(at);
    }

    pub fn derived_value(&self, field: Field) -> Option<&DerivedValue> {
        self.derived.get(&field)
    }

    /// Convenience accessor used by scoring rules and tests.
    pub fn number(&self, field: Field) -> Option<f64> {
        self.get(field).as_number()
    }

    pub fn text(&self, field: Field) -> Option<String> {
        self.get(field).as_text().map(str::to_string)
    }
}

fn text(value: FieldValue) -> Option<String> {
    match value {
        FieldValue::Text(s) => Some(s),
        _ => None,
    }
}
