//! Request validation against the static source schemas.
//!
//! Pure: the outcome depends only on the request and the registry, so
//! validating the same request twice always yields the same result.
//!
//! Blocking errors: MissingField, TypeMismatch, UnknownField, EmptyUpdate.
//! Non-blocking warnings: OutOfRange.

use crate::{
    field::{Field, FieldValue},
    registry::{field_spec, schema_for},
    update::{UpdateRequest, ValidatedUpdate},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueReason {
    MissingField,
    TypeMismatch,
    OutOfRange,
    UnknownField,
    EmptyUpdate,
}

impl IssueReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueReason::MissingField => "MissingField",
            IssueReason::TypeMismatch => "TypeMismatch",
            IssueReason::OutOfRange   => "OutOfRange",
            IssueReason::UnknownField => "UnknownField",
            IssueReason::EmptyUpdate  => "EmptyUpdate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field:   String,
    pub reason:  IssueReason,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, reason: IssueReason, message: String) -> Self {
        Self { field: field.into(), reason, message }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors:   Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// One-line summary, e.g. "unknownField: UnknownField".
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.reason.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Dry-run validation. Never fails; errors and warnings are enumerated.
pub fn validate(request: &UpdateRequest) -> ValidationResult {
    match check(request) {
        Ok(update) => ValidationResult { errors: Vec::new(), warnings: update.warnings },
        Err(result) => result,
    }
}

/// Validate and convert into typed changes. Returns the full
/// [`ValidationResult`] when any blocking error was found.
pub fn check(request: &UpdateRequest) -> Result<ValidatedUpdate, ValidationResult> {
    let schema = schema_for(request.source);
    let mut result = ValidationResult::default();
    let mut changes: Vec<(Field, FieldValue)> = Vec::new();

    if request.player_id.trim().is_empty() {
        result.errors.push(ValidationIssue::new(
            "playerId",
            IssueReason::MissingField,
            "playerId must not be empty".to_string(),
        ));
    }

    if request.changes.is_empty() {
        result.errors.push(ValidationIssue::new(
            "*",
            IssueReason::EmptyUpdate,
            format!("{} update carries no changes", request.source.as_str()),
        ));
    }

    // BTreeMap iteration keeps issue order stable.
    for (name, raw) in &request.changes {
        let spec = name
            .parse::<Field>()
            .ok()
            .and_then(|f| field_spec(request.source, f));
        let Some(spec) = spec else {
            result.errors.push(ValidationIssue::new(
                name.as_str(),
                IssueReason::UnknownField,
                format!("'{name}' is not accepted from {}", request.source.as_str()),
            ));
            continue;
        };

        let kind = spec.field.kind();
        let Some(value) = FieldValue::from_json(raw, kind) else {
            result.errors.push(ValidationIssue::new(
                name.as_str(),
                IssueReason::TypeMismatch,
                format!("expected {kind:?}, got {raw}"),
            ));
            continue;
        };

        if value.is_missing() {
            if spec.required {
                result.errors.push(ValidationIssue::new(
                    name.as_str(),
                    IssueReason::MissingField,
                    format!("'{name}' is required and cannot be cleared"),
                ));
            } else {
                changes.push((spec.field, value));
            }
            continue;
        }

        if let (Some(text), false) = (value.as_text(), spec.allowed.is_empty()) {
            if !spec.allowed.contains(&text) {
                result.errors.push(ValidationIssue::new(
                    name.as_str(),
                    IssueReason::TypeMismatch,
                    format!("'{text}' is not one of {}", spec.allowed.join("|")),
                ));
                continue;
            }
        }

        if let (Some(n), Some((min, max))) = (value.as_number(), spec.range) {
            if n < min || n > max {
                result.warnings.push(ValidationIssue::new(
                    name.as_str(),
                    IssueReason::OutOfRange,
                    format!("{n} is outside the expected range [{min}, {max}]"),
                ));
            }
        }

        changes.push((spec.field, value));
    }

    for spec in schema {
        let present = request.changes.contains_key(spec.field.as_str());
        if present {
            continue;
        }
        if spec.required {
            result.errors.push(ValidationIssue::new(
                spec.field.as_str(),
                IssueReason::MissingField,
                format!("'{}' is required for {}", spec.field, request.source.as_str()),
            ));
        } else if let Some(default) = spec.default {
            changes.push((spec.field, FieldValue::Text(default.to_string())));
        }
    }

    if !result.is_valid() {
        return Err(result);
    }

    changes.sort_by_key(|(f, _)| *f);
    Ok(ValidatedUpdate {
        player_id: request.player_id.clone(),
        source:    request.source,
        actor:     request.actor.clone(),
        reason:    request.reason.clone(),
        timestamp: request.timestamp,
        changes,
        warnings:  result.warnings,
    })
}
