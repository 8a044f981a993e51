//! Rule registry load-time checks and schema lookups.

use roster_integrity_core::{
    config::ScoringConfig,
    error::RegistryError,
    field::{Field, FieldValue},
    record::PlayerRecord,
    registry::{infer_source, CascadeRule, RuleRegistry},
    rules::standard_rules,
    update::UpdateSource,
};

fn nothing(_: &PlayerRecord, _: &ScoringConfig) -> Vec<(Field, FieldValue)> {
    Vec::new()
}

fn rule(id: &'static str, priority: u32, triggers: &[Field], targets: &[Field]) -> CascadeRule {
    CascadeRule {
        id,
        label: id,
        priority,
        high_impact: false,
        triggers: triggers.to_vec(),
        targets: targets.to_vec(),
        recompute: nothing,
    }
}

fn load(rules: Vec<CascadeRule>) -> Result<RuleRegistry, RegistryError> {
    RuleRegistry::load(rules, ScoringConfig::default())
}

#[test]
fn standard_rules_load_with_four_passes() {
    let registry = RuleRegistry::standard(ScoringConfig::default()).unwrap();
    assert_eq!(registry.rules().len(), 8);
    // sessions -> rate -> attendanceScore -> playerValue
    assert_eq!(registry.max_passes(), 4);

    let priorities: Vec<u32> = registry.rules().iter().map(|r| r.priority).collect();
    let mut sorted = priorities.clone();
    sorted.sort_unstable();
    assert_eq!(priorities, sorted);
}

#[test]
fn every_derived_field_has_one_producer() {
    let registry = RuleRegistry::standard(ScoringConfig::default()).unwrap();
    for field in Field::ALL.iter().filter(|f| f.is_derived()) {
        assert!(registry.producer_of(*field).is_some(), "{field} has no producer");
        assert!(!registry.computed_from(*field).is_empty());
    }
    assert_eq!(
        registry.computed_from(Field::PlayerValue),
        &[Field::MarketValue, Field::AttendanceScore, Field::MedicalScore]
    );
    assert!(registry.computed_from(Field::MarketValue).is_empty());
    assert_eq!(registry.producer_of(Field::PerformanceFlag).unwrap().id, "fitness_rating");
}

#[test]
fn duplicate_rule_id_is_rejected() {
    let err = load(vec![
        rule("a", 1, &[Field::MarketValue], &[Field::PlayerValue]),
        rule("a", 2, &[Field::AiRiskScore], &[Field::SelectionRisk]),
    ])
    .unwrap_err();
    assert_eq!(err, RegistryError::DuplicateRule { rule_id: "a".into() });
}

#[test]
fn rule_without_triggers_or_targets_is_rejected() {
    let err = load(vec![rule("idle", 1, &[], &[Field::PlayerValue])]).unwrap_err();
    assert_eq!(err, RegistryError::EmptyRule { rule_id: "idle".into() });
    let err = load(vec![rule("mute", 1, &[Field::MarketValue], &[])]).unwrap_err();
    assert_eq!(err, RegistryError::EmptyRule { rule_id: "mute".into() });
}

#[test]
fn rule_targeting_a_source_field_is_rejected() {
    let err = load(vec![rule("rewrite", 1, &[Field::WeeklyWage], &[Field::MarketValue])]).unwrap_err();
    assert_eq!(
        err,
        RegistryError::SourceTarget { rule_id: "rewrite".into(), field: Field::MarketValue }
    );
}

#[test]
fn two_producers_for_one_field_are_rejected() {
    let err = load(vec![
        rule("first", 1, &[Field::MarketValue], &[Field::PlayerValue]),
        rule("second", 2, &[Field::WeeklyWage], &[Field::PlayerValue]),
    ])
    .unwrap_err();
    assert_eq!(
        err,
        RegistryError::ConflictingTarget {
            field:  Field::PlayerValue,
            first:  "first".into(),
            second: "second".into(),
        }
    );
}

#[test]
fn cyclic_rules_are_rejected() {
    let err = load(vec![
        rule("up", 1, &[Field::AttendanceScore], &[Field::MedicalScore]),
        rule("down", 2, &[Field::MedicalScore], &[Field::AttendanceScore]),
    ])
    .unwrap_err();
    let RegistryError::Cycle { path } = err else {
        panic!("expected a cycle, got {err:?}");
    };
    assert!(path.contains(&"up".to_string()));
    assert!(path.contains(&"down".to_string()));
}

#[test]
fn consumer_scheduled_before_its_producer_is_rejected() {
    let err = load(vec![
        rule("value", 5, &[Field::AttendanceScore], &[Field::PlayerValue]),
        rule("attendance", 10, &[Field::SessionsAttended], &[Field::AttendanceScore]),
    ])
    .unwrap_err();
    assert_eq!(
        err,
        RegistryError::PriorityInversion {
            rule_id:           "value".into(),
            priority:          5,
            producer:          "attendance".into(),
            producer_priority: 10,
        }
    );
}

#[test]
fn custom_chain_sets_pass_limit() {
    let registry = load(vec![
        rule("c", 30, &[Field::AttendanceScore], &[Field::PlayerValue]),
        rule("a", 10, &[Field::SessionsAttended], &[Field::TrainingAttendanceRate]),
        rule("b", 20, &[Field::TrainingAttendanceRate], &[Field::AttendanceScore]),
    ])
    .unwrap();
    assert_eq!(registry.max_passes(), 4);
    let order: Vec<&str> = registry.rules().iter().map(|r| r.id).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
    assert_eq!(registry.rule("b").unwrap().priority, 20);
}

#[test]
fn standard_rule_ids_are_unique_and_labelled() {
    let rules = standard_rules();
    assert!(rules.iter().all(|r| !r.label.is_empty()));
    let high: Vec<&str> = rules.iter().filter(|r| r.high_impact).map(|r| r.id).collect();
    assert_eq!(high, vec!["medical_status", "medical_score", "selection_risk"]);
}

#[test]
fn source_inference_picks_the_first_matching_schema() {
    assert_eq!(infer_source(["medicalAppointmentStatus"]), UpdateSource::MedicalAppointment);
    assert_eq!(infer_source(["sessionsAttended"]), UpdateSource::TrainingAttendance);
    assert_eq!(infer_source(["gpsTotalDistance"]), UpdateSource::GpsSession);
    assert_eq!(infer_source(["aiRiskScore", "aiSummary"]), UpdateSource::AiAnalysis);
    assert_eq!(infer_source(["sessionsAttended", "gpsTotalDistance"]), UpdateSource::CsvRow);
    assert_eq!(infer_source(["marketValue"]), UpdateSource::ManualValueOverride);
    assert_eq!(infer_source(["noSuchField"]), UpdateSource::ManualValueOverride);
}
