use super::{json_from_sql, ts_from_sql, ts_to_sql, SubRecord};
use crate::{error::PersistenceError, update::SubCollection};
use rusqlite::{params, Connection};

// ── Sub-collections ──────────────────────────────────────────────────

pub(super) fn append(conn: &Connection, player_id: &str, record: &SubRecord) -> Result<(), PersistenceError> {
    conn.execute(
        "INSERT INTO player_sub_record (player_id, collection, actor, recorded_at, payload)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            player_id,
            record.collection.as_str(),
            record.actor,
            ts_to_sql(&record.recorded_at),
            record.payload.to_string(),
        ],
    )?;
    Ok(())
}

pub(super) fn list(
    conn:       &Connection,
    player_id:  &str,
    collection: SubCollection,
    limit:      usize,
) -> Result<Vec<SubRecord>, PersistenceError> {
    let mut stmt = conn.prepare(
        "SELECT id, actor, recorded_at, payload
         FROM player_sub_record
         WHERE player_id = ?1 AND collection = ?2
         ORDER BY id DESC
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![player_id, collection.as_str(), limit as i64], |row| {
        let payload: String = row.get(3)?;
        Ok(SubRecord {
            id:          Some(row.get(0)?),
            collection,
            actor:       row.get(1)?,
            recorded_at: ts_from_sql(2, row.get(2)?)?,
            payload:     json_from_sql(3, &payload)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

pub(super) fn count(conn: &Connection, player_id: &str) -> Result<i64, PersistenceError> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM player_sub_record WHERE player_id = ?1",
        params![player_id],
        |row| row.get(0),
    )?;
    Ok(n)
}
