use crate::{field::Field, types::PlayerId, validator::ValidationResult};
use thiserror::Error;

/// Problems found while loading the cascade rule registry.
/// Any of these means the rule set is unusable and the process must not start.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Rule '{rule_id}' is registered twice")]
    DuplicateRule { rule_id: String },

    #[error("Field '{field}' is produced by both '{first}' and '{second}'")]
    ConflictingTarget {
        field:  Field,
        first:  String,
        second: String,
    },

    #[error("Rule '{rule_id}' targets source field '{field}'")]
    SourceTarget { rule_id: String, field: Field },

    #[error("Rule '{rule_id}' has no trigger or no target fields")]
    EmptyRule { rule_id: String },

    #[error("Cascade rules form a cycle through: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Rule '{rule_id}' (priority {priority}) runs before its input producer '{producer}' (priority {producer_priority})")]
    PriorityInversion {
        rule_id:           String,
        priority:          u32,
        producer:          String,
        producer_priority: u32,
    },
}

/// Raised by the cascade engine. Always a rule-graph bug, never bad input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CascadeError {
    #[error("Cascade did not settle within {max_passes} passes (last rules: {})", last_rules.join(", "))]
    PassLimitExceeded {
        max_passes: usize,
        last_rules: Vec<String>,
    },

    #[error("Rule '{rule_id}' wrote '{field}', which it does not declare as a target")]
    UndeclaredTarget { rule_id: String, field: Field },

    #[error("'{rule_id}' wrote a value of the wrong kind to '{field}'")]
    KindMismatch { rule_id: String, field: Field },
}

/// Classification of a failed store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceErrorKind {
    /// Store could not be reached or opened.
    Unavailable,
    /// Call exceeded the busy timeout.
    Timeout,
    /// Document version moved underneath the writer.
    Conflict,
    /// Store-side constraint refused the write.
    Rejected,
    /// Stored document could not be decoded.
    Corrupt,
}

#[derive(Error, Debug, Clone, PartialEq, serde::Serialize)]
#[error("Persistence {kind:?}: {message}")]
pub struct PersistenceError {
    pub kind:    PersistenceErrorKind,
    pub message: String,
}

impl PersistenceError {
    pub fn new(kind: PersistenceErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// Busy, unavailable and version-conflict failures may succeed on a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            PersistenceErrorKind::Unavailable
                | PersistenceErrorKind::Timeout
                | PersistenceErrorKind::Conflict
        )
    }
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        let kind = match &err {
            rusqlite::Error::SqliteFailure(e, _) => match e.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => PersistenceErrorKind::Timeout,
                ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::SystemIoFailure
                | ErrorCode::PermissionDenied
                | ErrorCode::ReadOnly => PersistenceErrorKind::Unavailable,
                ErrorCode::DatabaseCorrupt => PersistenceErrorKind::Corrupt,
                _ => PersistenceErrorKind::Rejected,
            },
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..) => PersistenceErrorKind::Corrupt,
            _ => PersistenceErrorKind::Rejected,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(PersistenceErrorKind::Corrupt, err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("Update rejected: {}", .0.summary())]
    Validation(ValidationResult),

    #[error("Cascade computation failed: {0}")]
    Cascade(#[from] CascadeError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Rule registry invalid: {0}")]
    Registry(#[from] RegistryError),

    #[error("Player '{player_id}' not found")]
    PlayerNotFound { player_id: PlayerId },

    #[error("Player '{player_id}' already exists")]
    PlayerExists { player_id: PlayerId },

    #[error("Cancelled before processing")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntegrityError {
    /// Short stable code used in wire responses and bulk row results.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_)      => "validation_error",
            Self::Cascade(_)         => "cascade_computation_error",
            Self::Persistence(_)     => "persistence_error",
            Self::Registry(_)        => "registry_error",
            Self::PlayerNotFound { .. } => "player_not_found",
            Self::PlayerExists { .. }   => "player_exists",
            Self::Cancelled          => "cancelled",
            Self::Serialization(_)   => "serialization_error",
            Self::Other(_)           => "internal_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(e) if e.is_retryable())
    }
}

impl From<rusqlite::Error> for IntegrityError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Persistence(err.into())
    }
}

pub type IntegrityResult<T> = Result<T, IntegrityError>;
