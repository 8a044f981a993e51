//! Shared primitive types used across the entire engine.

use chrono::{DateTime, Utc};

/// Stable identifier of a rostered player.
pub type PlayerId = String;

/// Wall-clock instant attached to every update and audit row.
pub type Timestamp = DateTime<Utc>;

/// Opaque id correlating every audit row written by one committed update.
pub type UpdateId = uuid::Uuid;
