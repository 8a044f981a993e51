//! Field identities and values.
//!
//! Every field the engine knows about is a variant of [`Field`]. Wire names
//! are camelCase and stable; they are what the route layer sends in
//! `changes` and what the audit log stores.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which bag of the player record a field lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Medical,
    Training,
    Gps,
    Injury,
    Financial,
    Cohesion,
    Analysis,
    Derived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    // ── Medical ───────────────────────────────────
    MedicalAppointmentStatus,
    AppointmentType,
    Clinician,
    MedicalAssessmentScore,

    // ── Training ──────────────────────────────────
    SessionsScheduled,
    SessionsAttended,
    TrainingLoad,

    // ── GPS ───────────────────────────────────────
    GpsSessionId,
    GpsTotalDistance,
    GpsMaxSpeed,
    GpsSprintCount,
    GpsPlayerLoad,

    // ── Injury ────────────────────────────────────
    InjuryType,
    InjurySeverity,
    InjuryStatus,
    ExpectedReturnDays,

    // ── Financial ─────────────────────────────────
    MarketValue,
    WeeklyWage,

    // ── Cohesion ──────────────────────────────────
    CohesionPeerRating,

    // ── AI analysis ───────────────────────────────
    AiRiskScore,
    AiSummary,

    // ── Derived ───────────────────────────────────
    TrainingAttendanceRate,
    AttendanceScore,
    MedicalScore,
    MedicalStatus,
    PlayerValue,
    FitnessRating,
    PerformanceFlag,
    SelectionRisk,
    CohesionReliability,
}

impl Field {
    pub const ALL: [Field; 30] = [
        Field::MedicalAppointmentStatus,
        Field::AppointmentType,
        Field::Clinician,
        Field::MedicalAssessmentScore,
        Field::SessionsScheduled,
        Field::SessionsAttended,
        Field::TrainingLoad,
        Field::GpsSessionId,
        Field::GpsTotalDistance,
        Field::GpsMaxSpeed,
        Field::GpsSprintCount,
        Field::GpsPlayerLoad,
        Field::InjuryType,
        Field::InjurySeverity,
        Field::InjuryStatus,
        Field::ExpectedReturnDays,
        Field::MarketValue,
        Field::WeeklyWage,
        Field::CohesionPeerRating,
        Field::AiRiskScore,
        Field::AiSummary,
        Field::TrainingAttendanceRate,
        Field::AttendanceScore,
        Field::MedicalScore,
        Field::MedicalStatus,
        Field::PlayerValue,
        Field::FitnessRating,
        Field::PerformanceFlag,
        Field::SelectionRisk,
        Field::CohesionReliability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::MedicalAppointmentStatus => "medicalAppointmentStatus",
            Field::AppointmentType          => "appointmentType",
            Field::Clinician                => "clinician",
            Field::MedicalAssessmentScore   => "medicalAssessmentScore",
            Field::SessionsScheduled        => "sessionsScheduled",
            Field::SessionsAttended         => "sessionsAttended",
            Field::TrainingLoad             => "trainingLoad",
            Field::GpsSessionId             => "gpsSessionId",
            Field::GpsTotalDistance         => "gpsTotalDistance",
            Field::GpsMaxSpeed              => "gpsMaxSpeed",
            Field::GpsSprintCount           => "gpsSprintCount",
            Field::GpsPlayerLoad            => "gpsPlayerLoad",
            Field::InjuryType               => "injuryType",
            Field::InjurySeverity           => "injurySeverity",
            Field::InjuryStatus             => "injuryStatus",
            Field::ExpectedReturnDays       => "expectedReturnDays",
            Field::MarketValue              => "marketValue",
            Field::WeeklyWage               => "weeklyWage",
            Field::CohesionPeerRating       => "cohesionPeerRating",
            Field::AiRiskScore              => "aiRiskScore",
            Field::AiSummary                => "aiSummary",
            Field::TrainingAttendanceRate   => "trainingAttendanceRate",
            Field::AttendanceScore          => "attendanceScore",
            Field::MedicalScore             => "medicalScore",
            Field::MedicalStatus            => "medicalStatus",
            Field::PlayerValue              => "playerValue",
            Field::FitnessRating            => "fitnessRating",
            Field::PerformanceFlag          => "performanceFlag",
            Field::SelectionRisk            => "selectionRisk",
            Field::CohesionReliability      => "cohesionReliability",
        }
    }

    pub fn domain(&self) -> Domain {
        use Field::*;
        match self {
            MedicalAppointmentStatus | AppointmentType | Clinician | MedicalAssessmentScore => {
                Domain::Medical
            }
            SessionsScheduled | SessionsAttended | TrainingLoad => Domain::Training,
            GpsSessionId | GpsTotalDistance | GpsMaxSpeed | GpsSprintCount | GpsPlayerLoad => {
                Domain::Gps
            }
            InjuryType | InjurySeverity | InjuryStatus | ExpectedReturnDays => Domain::Injury,
            MarketValue | WeeklyWage => Domain::Financial,
            CohesionPeerRating => Domain::Cohesion,
            AiRiskScore | AiSummary => Domain::Analysis,
            TrainingAttendanceRate | AttendanceScore | MedicalScore | MedicalStatus
            | PlayerValue | FitnessRating | PerformanceFlag | SelectionRisk
            | CohesionReliability => Domain::Derived,
        }
    }

    pub fn is_derived(&self) -> bool {
        self.domain() == Domain::Derived
    }

    /// The value kind stored for this field.
    pub fn kind(&self) -> ValueKind {
        use Field::*;
        match self {
            MedicalAppointmentStatus | AppointmentType | Clinician | GpsSessionId | InjuryType
            | InjurySeverity | InjuryStatus | AiSummary | MedicalStatus | SelectionRisk => {
                ValueKind::Text
            }
            PerformanceFlag => ValueKind::Flag,
            _ => ValueKind::Number,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFieldName(pub String);

impl FromStr for Field {
    type Err = UnknownFieldName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| UnknownFieldName(s.to_string()))
    }
}

impl Serialize for Field {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse()
            .map_err(|_| serde::de::Error::custom(format!("unknown field '{name}'")))
    }
}

/// Declared kind of a field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Number,
    Text,
    Flag,
}

/// A typed field value. Serializes as a bare JSON scalar (`null` for Missing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Number(f64),
    Text(String),
    #[default]
    Missing,
}

impl FieldValue {
    /// Convert a loose JSON value into the declared kind.
    /// Returns None on a kind mismatch. JSON null is always `Missing`.
    pub fn from_json(value: &serde_json::Value, kind: ValueKind) -> Option<Self> {
        use serde_json::Value;
        match (value, kind) {
            (Value::Null, _)                  => Some(FieldValue::Missing),
            (Value::Number(n), ValueKind::Number) => n.as_f64().filter(|v| v.is_finite()).map(FieldValue::Number),
            (Value::String(s), ValueKind::Text)   => Some(FieldValue::Text(s.clone())),
            (Value::Bool(b), ValueKind::Flag)     => Some(FieldValue::Flag(*b)),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FieldValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }

    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            FieldValue::Number(_) => Some(ValueKind::Number),
            FieldValue::Text(_)   => Some(ValueKind::Text),
            FieldValue::Flag(_)   => Some(ValueKind::Flag),
            FieldValue::Missing   => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Text(s)   => f.write_str(s),
            FieldValue::Flag(b)   => write!(f, "{b}"),
            FieldValue::Missing   => f.write_str("-"),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Flag(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<Option<f64>> for FieldValue {
    fn from(v: Option<f64>) -> Self {
        v.map(FieldValue::Number).unwrap_or_default()
    }
}

impl From<Option<String>> for FieldValue {
    fn from(v: Option<String>) -> Self {
        v.map(FieldValue::Text).unwrap_or_default()
    }
}
