use super::{json_from_sql, ts_to_sql, FieldPatch};
use crate::{
    error::{PersistenceError, PersistenceErrorKind},
    record::{PlayerProfile, PlayerRecord},
    types::PlayerId,
};
use rusqlite::{params, types::Type, Connection, OptionalExtension};

// ── Player documents ─────────────────────────────────────────────────

pub(super) fn load(conn: &Connection, player_id: &str) -> Result<Option<PlayerRecord>, PersistenceError> {
    let row = conn
        .query_row(
            "SELECT document, version FROM player WHERE player_id = ?1",
            params![player_id],
            |row| {
                let document: String = row.get(0)?;
                let version: i64 = row.get(1)?;
                let mut record: PlayerRecord = json_from_sql(0, &document)?;
                record.version = u64::try_from(version).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(1, Type::Integer, Box::new(e))
                })?;
                Ok(record)
            },
        )
        .optional()?;
    Ok(row)
}

pub(super) fn list(conn: &Connection) -> Result<Vec<PlayerId>, PersistenceError> {
    let mut stmt = conn.prepare("SELECT player_id FROM player ORDER BY player_id")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

pub(super) fn insert(conn: &Connection, record: &PlayerRecord) -> Result<(), PersistenceError> {
    let document = serde_json::to_string(record)?;
    conn.execute(
        "INSERT INTO player (player_id, document, version, created_at, updated_at)
         VALUES (?1, ?2, 1, ?3, ?4)",
        params![
            record.player_id,
            document,
            ts_to_sql(&record.created_at),
            ts_to_sql(&record.updated_at),
        ],
    )?;
    Ok(())
}

/// Merge `patch` into the stored document and bump its version.
/// A missing document is created only when no version was expected.
pub(super) fn upsert_fields(
    conn:             &Connection,
    player_id:        &str,
    patch:            &FieldPatch,
    expected_version: Option<u64>,
) -> Result<(), PersistenceError> {
    let Some(mut record) = load(conn, player_id)? else {
        if let Some(expected) = expected_version {
            return Err(PersistenceError::new(
                PersistenceErrorKind::Conflict,
                format!("player '{player_id}' vanished (expected version {expected})"),
            ));
        }
        let mut record = PlayerRecord::from_profile(
            player_id.to_string(),
            PlayerProfile::default(),
            patch.updated_at,
        );
        merge(&mut record, patch)?;
        return insert(conn, &record);
    };

    let current = record.version;
    if let Some(expected) = expected_version {
        if expected != current {
            return Err(PersistenceError::new(
                PersistenceErrorKind::Conflict,
                format!("player '{player_id}' is at version {current}, expected {expected}"),
            ));
        }
    }

    merge(&mut record, patch)?;
    let document = serde_json::to_string(&record)?;
    let updated = conn.execute(
        "UPDATE player SET document = ?1, version = version + 1, updated_at = ?2
         WHERE player_id = ?3 AND version = ?4",
        params![document, ts_to_sql(&record.updated_at), player_id, version_to_sql(current)?],
    )?;
    if updated != 1 {
        return Err(PersistenceError::new(
            PersistenceErrorKind::Conflict,
            format!("player '{player_id}' changed during write"),
        ));
    }
    Ok(())
}

fn version_to_sql(version: u64) -> Result<i64, PersistenceError> {
    i64::try_from(version).map_err(|_| {
        PersistenceError::new(PersistenceErrorKind::Corrupt, format!("version {version} out of range"))
    })
}

fn merge(record: &mut PlayerRecord, patch: &FieldPatch) -> Result<(), PersistenceError> {
    for (field, value) in &patch.source {
        record.set(*field, value.clone()).map_err(|m| {
            PersistenceError::new(
                PersistenceErrorKind::Rejected,
                format!("value {} does not fit field '{}'", m.value, m.field),
            )
        })?;
    }
    for (field, derived) in &patch.derived {
        record.derived.insert(*field, derived.clone());
    }
    record.updated_at = patch.updated_at;
    Ok(())
}
