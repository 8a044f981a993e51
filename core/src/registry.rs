//! Schema & rule registry.
//!
//! Two static halves:
//!   - source schemas: which fields each [`UpdateSource`] may carry, with
//!     kind, required flag, numeric range, enum membership and defaults;
//!   - cascade rules: trigger fields → target fields, plus a pure
//!     recompute function.
//!
//! RULE: the registry is built once at process start and never mutated.
//! Loading checks that rules form a DAG over fields, that every derived
//! field has exactly one producer, and that priorities agree with the
//! dependency order, so a single ascending-priority sweep always reads
//! fresh inputs.

use crate::{
    config::ScoringConfig,
    error::RegistryError,
    field::{Field, FieldValue},
    record::PlayerRecord,
    update::UpdateSource,
};
use std::collections::{BTreeMap, BTreeSet};

// ── Source schemas ─────────────────────────────────────────────────────

/// Declaration of one field a source may carry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub field:    Field,
    pub required: bool,
    /// Inclusive numeric range. Values outside it are warnings, not errors.
    pub range:    Option<(f64, f64)>,
    /// Allowed text values. Empty means any text.
    pub allowed:  &'static [&'static str],
    /// Text value filled in when the field is absent from the request.
    pub default:  Option<&'static str>,
}

impl FieldSpec {
    pub const fn optional(field: Field) -> Self {
        Self { field, required: false, range: None, allowed: &[], default: None }
    }

    pub const fn required(field: Field) -> Self {
        Self { field, required: true, range: None, allowed: &[], default: None }
    }

    pub const fn range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    pub const fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = allowed;
        self
    }

    pub const fn default_text(mut self, value: &'static str) -> Self {
        self.default = Some(value);
        self
    }
}

pub const APPOINTMENT_STATUSES: &[&str] = &["attended", "missed", "cancelled", "rescheduled"];
pub const INJURY_SEVERITIES: &[&str] = &["minor", "moderate", "severe"];
pub const INJURY_STATUSES: &[&str] = &["active", "recovering", "cleared"];

const ASSESSMENT: FieldSpec = FieldSpec::optional(Field::MedicalAssessmentScore).range(0.0, 10.0);
const SCHEDULED: FieldSpec = FieldSpec::optional(Field::SessionsScheduled).range(0.0, 400.0);
const ATTENDED: FieldSpec = FieldSpec::optional(Field::SessionsAttended).range(0.0, 400.0);
const LOAD: FieldSpec = FieldSpec::optional(Field::TrainingLoad).range(0.0, 1000.0);
const DISTANCE: FieldSpec = FieldSpec::optional(Field::GpsTotalDistance).range(0.0, 14_000.0);
const MAX_SPEED: FieldSpec = FieldSpec::optional(Field::GpsMaxSpeed).range(0.0, 40.0);
const SPRINTS: FieldSpec = FieldSpec::optional(Field::GpsSprintCount).range(0.0, 80.0);
const PLAYER_LOAD: FieldSpec = FieldSpec::optional(Field::GpsPlayerLoad).range(0.0, 1200.0);
const AI_RISK: FieldSpec = FieldSpec::optional(Field::AiRiskScore).range(0.0, 1.0);

static MEDICAL_APPOINTMENT: [FieldSpec; 4] = [
    FieldSpec::required(Field::MedicalAppointmentStatus).one_of(APPOINTMENT_STATUSES),
    FieldSpec::optional(Field::AppointmentType),
    FieldSpec::optional(Field::Clinician),
    ASSESSMENT,
];

static TRAINING_ATTENDANCE: [FieldSpec; 3] = [
    FieldSpec::required(Field::SessionsScheduled).range(0.0, 400.0),
    FieldSpec::required(Field::SessionsAttended).range(0.0, 400.0),
    LOAD,
];

static INJURY: [FieldSpec; 4] = [
    FieldSpec::required(Field::InjuryType),
    FieldSpec::required(Field::InjurySeverity).one_of(INJURY_SEVERITIES),
    FieldSpec::optional(Field::InjuryStatus).one_of(INJURY_STATUSES).default_text("active"),
    FieldSpec::optional(Field::ExpectedReturnDays).range(0.0, 365.0),
];

static GPS_SESSION: [FieldSpec; 5] = [
    FieldSpec::required(Field::GpsSessionId),
    FieldSpec::required(Field::GpsTotalDistance).range(0.0, 14_000.0),
    MAX_SPEED,
    SPRINTS,
    PLAYER_LOAD,
];

static AI_ANALYSIS: [FieldSpec; 2] = [
    FieldSpec::required(Field::AiRiskScore).range(0.0, 1.0),
    FieldSpec::optional(Field::AiSummary),
];

static CSV_ROW: [FieldSpec; 6] = [SCHEDULED, ATTENDED, LOAD, ASSESSMENT, DISTANCE, PLAYER_LOAD];

static EXTERNAL_SYNC: [FieldSpec; 7] = [
    FieldSpec::optional(Field::GpsSessionId),
    DISTANCE,
    MAX_SPEED,
    SPRINTS,
    PLAYER_LOAD,
    AI_RISK,
    FieldSpec::optional(Field::AiSummary),
];

static MANUAL_VALUE_OVERRIDE: [FieldSpec; 4] = [
    FieldSpec::optional(Field::MarketValue).range(0.0, 200_000_000.0),
    FieldSpec::optional(Field::WeeklyWage).range(0.0, 1_000_000.0),
    FieldSpec::optional(Field::CohesionPeerRating).range(0.0, 10.0),
    ASSESSMENT,
];

/// The declared schema for a source, in declaration order.
pub fn schema_for(source: UpdateSource) -> &'static [FieldSpec] {
    match source {
        UpdateSource::MedicalAppointment  => &MEDICAL_APPOINTMENT,
        UpdateSource::TrainingAttendance  => &TRAINING_ATTENDANCE,
        UpdateSource::Injury              => &INJURY,
        UpdateSource::GpsSession          => &GPS_SESSION,
        UpdateSource::AiAnalysis          => &AI_ANALYSIS,
        UpdateSource::CsvRow              => &CSV_ROW,
        UpdateSource::ExternalSync        => &EXTERNAL_SYNC,
        UpdateSource::ManualValueOverride => &MANUAL_VALUE_OVERRIDE,
    }
}

pub fn field_spec(source: UpdateSource, field: Field) -> Option<&'static FieldSpec> {
    schema_for(source).iter().find(|s| s.field == field)
}

/// First source (declaration order) whose schema names every given field.
/// Used when a caller asks for impact analysis without naming a source.
pub fn infer_source<'a>(names: impl IntoIterator<Item = &'a str> + Clone) -> UpdateSource {
    UpdateSource::ALL
        .iter()
        .copied()
        .find(|source| {
            names.clone().into_iter().all(|name| {
                name.parse::<Field>()
                    .map(|f| field_spec(*source, f).is_some())
                    .unwrap_or(false)
            })
        })
        .unwrap_or(UpdateSource::ManualValueOverride)
}

// ── Cascade rules ──────────────────────────────────────────────────────

/// Pure recompute function: reads the snapshot, returns target values.
pub type Recompute = fn(&PlayerRecord, &ScoringConfig) -> Vec<(Field, FieldValue)>;

#[derive(Clone)]
pub struct CascadeRule {
    pub id:          &'static str,
    /// Human label for impact reports, e.g. "Selection Risk".
    pub label:       &'static str,
    /// Lower runs first within a pass.
    pub priority:    u32,
    /// Injury, medical and selection-affecting rules. Drives the impact risk level.
    pub high_impact: bool,
    pub triggers:    Vec<Field>,
    pub targets:     Vec<Field>,
    pub recompute:   Recompute,
}

impl std::fmt::Debug for CascadeRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeRule")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("triggers", &self.triggers)
            .field("targets", &self.targets)
            .finish()
    }
}

#[derive(Debug)]
pub struct RuleRegistry {
    rules:      Vec<CascadeRule>,
    /// Derived field → index of the rule producing it.
    producers:  BTreeMap<Field, usize>,
    max_passes: usize,
    scoring:    ScoringConfig,
}

impl RuleRegistry {
    /// The production rule set.
    pub fn standard(scoring: ScoringConfig) -> Result<Self, RegistryError> {
        Self::load(crate::rules::standard_rules(), scoring)
    }

    /// Validate and index a rule set.
    pub fn load(rules: Vec<CascadeRule>, scoring: ScoringConfig) -> Result<Self, RegistryError> {
        let mut seen = BTreeSet::new();
        let mut producers: BTreeMap<Field, usize> = BTreeMap::new();

        for (idx, rule) in rules.iter().enumerate() {
            if !seen.insert(rule.id) {
                return Err(RegistryError::DuplicateRule { rule_id: rule.id.to_string() });
            }
            if rule.triggers.is_empty() || rule.targets.is_empty() {
                return Err(RegistryError::EmptyRule { rule_id: rule.id.to_string() });
            }
            for target in &rule.targets {
                if !target.is_derived() {
                    return Err(RegistryError::SourceTarget {
                        rule_id: rule.id.to_string(),
                        field:   *target,
                    });
                }
                if let Some(prev) = producers.insert(*target, idx) {
                    return Err(RegistryError::ConflictingTarget {
                        field:  *target,
                        first:  rules[prev].id.to_string(),
                        second: rule.id.to_string(),
                    });
                }
            }
        }

        let longest = longest_chain(&rules, &producers)?;

        for rule in &rules {
            for trigger in &rule.triggers {
                if let Some(&p) = producers.get(trigger) {
                    let producer = &rules[p];
                    if producer.priority >= rule.priority {
                        return Err(RegistryError::PriorityInversion {
                            rule_id:           rule.id.to_string(),
                            priority:          rule.priority,
                            producer:          producer.id.to_string(),
                            producer_priority: producer.priority,
                        });
                    }
                }
            }
        }

        let mut rules = rules;
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(b.id)));
        let producers = rules
            .iter()
            .enumerate()
            .flat_map(|(idx, r)| r.targets.iter().map(move |t| (*t, idx)))
            .collect();

        log::debug!("rule registry loaded: {} rules, longest chain {longest}", rules.len());

        Ok(Self { rules, producers, max_passes: longest + 1, scoring })
    }

    /// Override the pass limit. Only useful for exercising the
    /// pass-limit failure path in tests and tooling.
    pub fn with_pass_limit(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// Rules in execution order (priority, then id).
    pub fn rules(&self) -> &[CascadeRule] {
        &self.rules
    }

    pub fn rule(&self, id: &str) -> Option<&CascadeRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn max_passes(&self) -> usize {
        self.max_passes
    }

    pub fn scoring(&self) -> &ScoringConfig {
        &self.scoring
    }

    pub fn producer_of(&self, field: Field) -> Option<&CascadeRule> {
        self.producers.get(&field).map(|&i| &self.rules[i])
    }

    /// The `computedFrom` set of a derived field.
    pub fn computed_from(&self, field: Field) -> &[Field] {
        self.producer_of(field).map(|r| r.triggers.as_slice()).unwrap_or(&[])
    }

    /// Rules whose triggers intersect `changed`, in execution order.
    pub fn triggered_by(&self, changed: &BTreeSet<Field>) -> Vec<&CascadeRule> {
        self.rules
            .iter()
            .filter(|r| r.triggers.iter().any(|t| changed.contains(t)))
            .collect()
    }
}

/// Length (in rules) of the longest dependency chain. Fails on a cycle.
fn longest_chain(
    rules:     &[CascadeRule],
    producers: &BTreeMap<Field, usize>,
) -> Result<usize, RegistryError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done(usize),
    }

    fn visit(
        idx:       usize,
        rules:     &[CascadeRule],
        producers: &BTreeMap<Field, usize>,
        marks:     &mut [Mark],
        stack:     &mut Vec<usize>,
    ) -> Result<usize, RegistryError> {
        match marks[idx] {
            Mark::Done(depth) => return Ok(depth),
            Mark::InProgress => {
                let start = stack.iter().position(|&i| i == idx).unwrap_or(0);
                let mut path: Vec<String> =
                    stack[start..].iter().map(|&i| rules[i].id.to_string()).collect();
                path.push(rules[idx].id.to_string());
                return Err(RegistryError::Cycle { path });
            }
            Mark::Unvisited => {}
        }

        marks[idx] = Mark::InProgress;
        stack.push(idx);
        let mut depth = 1;
        for trigger in &rules[idx].triggers {
            if let Some(&p) = producers.get(trigger) {
                depth = depth.max(1 + visit(p, rules, producers, marks, stack)?);
            }
        }
        stack.pop();
        marks[idx] = Mark::Done(depth);
        Ok(depth)
    }

    let mut marks = vec![Mark::Unvisited; rules.len()];
    let mut stack = Vec::new();
    let mut longest = 0;
    for idx in 0..rules.len() {
        longest = longest.max(visit(idx, rules, producers, &mut marks, &mut stack)?);
    }
    Ok(longest)
}
