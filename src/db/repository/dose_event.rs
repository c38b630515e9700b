//! Dose history, append-only. Events are never updated or deleted on
//! their own; only the cascade from a medication delete removes them.

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::sqlite::{format_timestamp, parse_timestamp};
use crate::db::DatabaseError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoseEvent {
    pub id: Uuid,
    pub medication_id: Uuid,
    pub taken_at: NaiveDateTime,
}

/// One row of the history view: an event joined with its medication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoseHistoryEntry {
    pub id: Uuid,
    pub medication_id: Uuid,
    pub medication_name: String,
    pub dose_quantity: String,
    pub taken_at: NaiveDateTime,
}

/// Append a dose-taken event.
pub fn add_dose_event(
    conn: &Connection,
    medication_id: &Uuid,
    taken_at: NaiveDateTime,
) -> Result<DoseEvent, DatabaseError> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO dose_events (id, medication_id, taken_at) VALUES (?1, ?2, ?3)",
        params![
            id.to_string(),
            medication_id.to_string(),
            format_timestamp(taken_at),
        ],
    )?;
    Ok(DoseEvent {
        id,
        medication_id: *medication_id,
        taken_at,
    })
}

/// How many doses of this medication have been taken.
pub fn count_dose_events(conn: &Connection, medication_id: &Uuid) -> Result<u32, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM dose_events WHERE medication_id = ?1",
        params![medication_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Full dose history for one owner, most recent first.
pub fn fetch_dose_history(
    conn: &Connection,
    owner_id: &Uuid,
) -> Result<Vec<DoseHistoryEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT e.id, e.medication_id, m.name, m.dose_quantity, e.taken_at
         FROM dose_events e
         JOIN medications m ON e.medication_id = m.id
         WHERE m.owner_id = ?1
         ORDER BY e.taken_at DESC",
    )?;
    let entries = stmt
        .query_map(params![owner_id.to_string()], |row| {
            Ok(DoseHistoryEntry {
                id: row
                    .get::<_, String>(0)?
                    .parse()
                    .unwrap_or_else(|_| Uuid::nil()),
                medication_id: row
                    .get::<_, String>(1)?
                    .parse()
                    .unwrap_or_else(|_| Uuid::nil()),
                medication_name: row.get(2)?,
                dose_quantity: row.get(3)?,
                taken_at: parse_timestamp(&row.get::<_, String>(4)?).unwrap_or_default(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}
