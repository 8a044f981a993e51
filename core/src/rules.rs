//! The standard cascade rule set and its scoring functions.
//!
//! Each rule is a pure function of the snapshot. Numeric constants come from
//! [`ScoringConfig`] so clubs can tune formulas without touching the graph.
//!
//! Dependency graph (priority in brackets):
//!
//! ```text
//! sessionsScheduled, sessionsAttended ─▶ trainingAttendanceRate [5]
//! trainingAttendanceRate, appointmentStatus ─▶ attendanceScore [10]
//! injurySeverity, injuryStatus ─▶ medicalStatus [15]
//! assessment, appointmentStatus, injury* ─▶ medicalScore [20]
//! gpsTotalDistance ─▶ fitnessRating, performanceFlag [25]
//! marketValue, attendanceScore, medicalScore ─▶ playerValue [30]
//! medicalStatus, fitnessRating, aiRiskScore ─▶ selectionRisk [35]
//! cohesionPeerRating, attendanceScore ─▶ cohesionReliability [40]
//! ```

use crate::{
    config::ScoringConfig,
    field::{Field, FieldValue},
    record::PlayerRecord,
    registry::CascadeRule,
};

pub const STATUS_AVAILABLE: &str = "available";
pub const STATUS_LIMITED: &str = "limited";
pub const STATUS_UNAVAILABLE: &str = "unavailable";

pub const RISK_LOW: &str = "low";
pub const RISK_MEDIUM: &str = "medium";
pub const RISK_HIGH: &str = "high";

pub fn standard_rules() -> Vec<CascadeRule> {
    vec![
        CascadeRule {
            id:          "training_attendance_rate",
            label:       "Training Attendance",
            priority:    5,
            high_impact: false,
            triggers:    vec![Field::SessionsScheduled, Field::SessionsAttended],
            targets:     vec![Field::TrainingAttendanceRate],
            recompute:   attendance_rate,
        },
        CascadeRule {
            id:          "attendance_score",
            label:       "Attendance",
            priority:    10,
            high_impact: false,
            triggers:    vec![Field::TrainingAttendanceRate, Field::MedicalAppointmentStatus],
            targets:     vec![Field::AttendanceScore],
            recompute:   attendance_score,
        },
        CascadeRule {
            id:          "medical_status",
            label:       "Medical Availability",
            priority:    15,
            high_impact: true,
            triggers:    vec![Field::InjurySeverity, Field::InjuryStatus],
            targets:     vec![Field::MedicalStatus],
            recompute:   medical_status,
        },
        CascadeRule {
            id:          "medical_score",
            label:       "Medical",
            priority:    20,
            high_impact: true,
            triggers:    vec![
                Field::MedicalAssessmentScore,
                Field::MedicalAppointmentStatus,
                Field::InjurySeverity,
                Field::InjuryStatus,
            ],
            targets:     vec![Field::MedicalScore],
            recompute:   medical_score,
        },
        CascadeRule {
            id:          "fitness_rating",
            label:       "Fitness & Load",
            priority:    25,
            high_impact: false,
            triggers:    vec![Field::GpsTotalDistance],
            targets:     vec![Field::FitnessRating, Field::PerformanceFlag],
            recompute:   fitness_rating,
        },
        CascadeRule {
            id:          "player_value",
            label:       "Financial Valuation",
            priority:    30,
            high_impact: false,
            triggers:    vec![Field::MarketValue, Field::AttendanceScore, Field::MedicalScore],
            targets:     vec![Field::PlayerValue],
            recompute:   player_value,
        },
        CascadeRule {
            id:          "selection_risk",
            label:       "Selection Risk",
            priority:    35,
            high_impact: true,
            triggers:    vec![Field::MedicalStatus, Field::FitnessRating, Field::AiRiskScore],
            targets:     vec![Field::SelectionRisk],
            recompute:   selection_risk,
        },
        CascadeRule {
            id:          "cohesion_reliability",
            label:       "Squad Cohesion",
            priority:    40,
            high_impact: false,
            triggers:    vec![Field::CohesionPeerRating, Field::AttendanceScore],
            targets:     vec![Field::CohesionReliability],
            recompute:   cohesion_reliability,
        },
    ]
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn missed_appointment(record: &PlayerRecord) -> bool {
    record.medical.appointment_status.as_deref() == Some("missed")
}

fn attendance_rate(record: &PlayerRecord, _: &ScoringConfig) -> Vec<(Field, FieldValue)> {
    let rate = match (record.training.sessions_scheduled, record.training.sessions_attended) {
        (Some(scheduled), Some(attended)) if scheduled > 0.0 => {
            Some(round2((attended / scheduled).clamp(0.0, 1.0)))
        }
        _ => None,
    };
    vec![(Field::TrainingAttendanceRate, rate.into())]
}

fn attendance_score(record: &PlayerRecord, cfg: &ScoringConfig) -> Vec<(Field, FieldValue)> {
    let score = record.number(Field::TrainingAttendanceRate).map(|rate| {
        let penalty = if missed_appointment(record) { cfg.missed_appointment_penalty } else { 0.0 };
        round2((rate * 10.0 - penalty).clamp(0.0, 10.0))
    });
    vec![(Field::AttendanceScore, score.into())]
}

fn medical_status(record: &PlayerRecord, _: &ScoringConfig) -> Vec<(Field, FieldValue)> {
    let status = match (record.injury.status.as_deref(), record.injury.severity.as_deref()) {
        (Some("active"), Some("moderate" | "severe")) => STATUS_UNAVAILABLE,
        (Some("active"), _) | (Some("recovering"), _) => STATUS_LIMITED,
        _ => STATUS_AVAILABLE,
    };
    vec![(Field::MedicalStatus, status.into())]
}

/// Penalty for the current injury: full while active, half while recovering.
fn injury_penalty(record: &PlayerRecord, cfg: &ScoringConfig) -> f64 {
    let weight = match record.injury.status.as_deref() {
        Some("active")     => 1.0,
        Some("recovering") => 0.5,
        _ => return 0.0,
    };
    let base = match record.injury.severity.as_deref() {
        Some("minor")    => cfg.injury_penalty_minor,
        Some("moderate") => cfg.injury_penalty_moderate,
        Some("severe")   => cfg.injury_penalty_severe,
        _ => 0.0,
    };
    base * weight
}

fn medical_score(record: &PlayerRecord, cfg: &ScoringConfig) -> Vec<(Field, FieldValue)> {
    let assessment = record.medical.assessment_score.unwrap_or(cfg.default_assessment_score);
    let mut score = assessment - injury_penalty(record, cfg);
    if missed_appointment(record) {
        score -= cfg.missed_appointment_penalty;
    }
    vec![(Field::MedicalScore, round2(score.clamp(0.0, 10.0)).into())]
}

fn fitness_rating(record: &PlayerRecord, cfg: &ScoringConfig) -> Vec<(Field, FieldValue)> {
    let Some(distance) = record.gps.total_distance else {
        return vec![
            (Field::FitnessRating, FieldValue::Missing),
            (Field::PerformanceFlag, FieldValue::Missing),
        ];
    };
    // Highest band the session reaches.
    let rating = cfg
        .fitness_bands
        .iter()
        .filter(|band| distance >= band.min_distance)
        .max_by(|a, b| a.min_distance.total_cmp(&b.min_distance))
        .map(|band| band.rating);
    vec![
        (Field::FitnessRating, rating.into()),
        (Field::PerformanceFlag, (distance < cfg.performance_distance_threshold).into()),
    ]
}

fn player_value(record: &PlayerRecord, cfg: &ScoringConfig) -> Vec<(Field, FieldValue)> {
    let value = match (
        record.financial.market_value,
        record.number(Field::AttendanceScore),
        record.number(Field::MedicalScore),
    ) {
        (Some(market), Some(attendance), Some(medical)) => {
            let adjustment =
                cfg.value_per_score_point * (attendance + medical - cfg.value_reference_score);
            Some((market + adjustment).max(0.0).round())
        }
        (Some(market), _, _) => Some(market.round()),
        _ => None,
    };
    vec![(Field::PlayerValue, value.into())]
}

fn selection_risk(record: &PlayerRecord, cfg: &ScoringConfig) -> Vec<(Field, FieldValue)> {
    let status = record.text(Field::MedicalStatus);
    let fitness = record.number(Field::FitnessRating);
    let ai_risk = record.analysis.risk_score.unwrap_or(0.0);

    let risk = if status.as_deref() == Some(STATUS_UNAVAILABLE) {
        RISK_HIGH
    } else if status.as_deref() == Some(STATUS_LIMITED)
        || fitness.is_some_and(|f| f < cfg.selection_fitness_floor)
        || ai_risk >= cfg.ai_risk_threshold
    {
        RISK_MEDIUM
    } else {
        RISK_LOW
    };
    vec![(Field::SelectionRisk, risk.into())]
}

fn cohesion_reliability(record: &PlayerRecord, cfg: &ScoringConfig) -> Vec<(Field, FieldValue)> {
    let value = match (record.number(Field::AttendanceScore), record.cohesion.peer_rating) {
        (Some(attendance), Some(peer)) => {
            let w = cfg.cohesion_attendance_weight;
            Some(round2(attendance * w + peer * (1.0 - w)))
        }
        (Some(attendance), None) => Some(attendance),
        _ => None,
    };
    vec![(Field::CohesionReliability, value.into())]
}
