use super::{json_from_sql, ts_from_sql, ts_to_sql, AuditTotals};
use crate::{audit::AuditEntry, error::PersistenceError, field::Field};
use rusqlite::{params, types::Type, Connection};

// ── Audit ledger ─────────────────────────────────────────────────────
// Rows are insert-only; triggers in 002_audit.sql reject UPDATE and DELETE.

pub(super) fn insert(conn: &Connection, entry: &AuditEntry) -> Result<(), PersistenceError> {
    conn.execute(
        "INSERT INTO audit_entry
            (update_id, player_id, field, before_value, after_value,
             source, actor, reason, rule_id, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            entry.update_id.to_string(),
            entry.player_id,
            entry.field.as_str(),
            serde_json::to_string(&entry.before)?,
            serde_json::to_string(&entry.after)?,
            entry.source,
            entry.actor,
            entry.reason,
            entry.rule_id,
            ts_to_sql(&entry.timestamp),
        ],
    )?;
    Ok(())
}

pub(super) fn history(conn: &Connection, player_id: &str, limit: usize) -> Result<Vec<AuditEntry>, PersistenceError> {
    let mut stmt = conn.prepare(
        "SELECT id, update_id, player_id, field, before_value, after_value,
                source, actor, reason, rule_id, recorded_at
         FROM audit_entry
         WHERE player_id = ?1
         ORDER BY id DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![player_id, limit as i64], |row| {
        let update_id: String = row.get(1)?;
        let field: String = row.get(3)?;
        let before: String = row.get(4)?;
        let after: String = row.get(5)?;
        Ok(AuditEntry {
            id:        Some(row.get(0)?),
            update_id: uuid::Uuid::parse_str(&update_id)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?,
            player_id: row.get(2)?,
            field:     field.parse::<Field>().map_err(|_| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    Type::Text,
                    format!("unknown field '{field}'").into(),
                )
            })?,
            before:    json_from_sql(4, &before)?,
            after:     json_from_sql(5, &after)?,
            source:    row.get(6)?,
            actor:     row.get(7)?,
            reason:    row.get(8)?,
            rule_id:   row.get(9)?,
            timestamp: ts_from_sql(10, row.get(10)?)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

pub(super) fn count(conn: &Connection, player_id: &str) -> Result<i64, PersistenceError> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM audit_entry WHERE player_id = ?1",
        params![player_id],
        |row| row.get(0),
    )?;
    Ok(n)
}

pub(super) fn totals(conn: &Connection, player_id: &str) -> Result<AuditTotals, PersistenceError> {
    let mut stmt = conn.prepare(
        "SELECT source, COUNT(DISTINCT update_id), COUNT(*)
         FROM audit_entry
         WHERE player_id = ?1
         GROUP BY source",
    )?;
    let rows = stmt.query_map(params![player_id], |row| {
        let source: String = row.get(0)?;
        let updates: i64 = row.get(1)?;
        let changes: i64 = row.get(2)?;
        Ok((source, updates, changes))
    })?;

    let mut totals = AuditTotals::default();
    for row in rows {
        let (source, updates, changes) = row?;
        let updates = usize::try_from(updates).unwrap_or_default();
        totals.updates += updates;
        totals.field_changes += usize::try_from(changes).unwrap_or_default();
        totals.updates_by_source.insert(source, updates);
    }
    Ok(totals)
}
