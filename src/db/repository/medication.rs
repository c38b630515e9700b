//! Medication records, the mutable half of the dose ledger.

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::sqlite::{format_timestamp, parse_timestamp};
use crate::db::DatabaseError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medication {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    /// Free text, e.g. "1 tablet" or "10ml".
    pub dose_quantity: String,
    pub interval_hours: i64,
    /// None means no dose scheduled.
    pub next_dose_at: Option<NaiveDateTime>,
    /// 0 = open-ended course; > 0 bounds the total dose count.
    pub total_doses: u32,
}

/// Input for creating a medication. The initial `next_dose_at` is computed
/// by the scheduler, not supplied by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMedication {
    pub owner_id: Uuid,
    pub name: String,
    pub dose_quantity: String,
    pub interval_hours: i64,
    pub total_doses: u32,
}

fn validate(name: &str, interval_hours: i64) -> Result<(), DatabaseError> {
    if name.trim().is_empty() {
        return Err(DatabaseError::ConstraintViolation(
            "medication name must not be empty".into(),
        ));
    }
    if interval_hours <= 0 {
        return Err(DatabaseError::ConstraintViolation(format!(
            "interval_hours must be positive, got {interval_hours}"
        )));
    }
    Ok(())
}

/// Insert a new medication with the given initial schedule.
pub fn add_medication(
    conn: &Connection,
    input: &NewMedication,
    next_dose_at: Option<NaiveDateTime>,
) -> Result<Medication, DatabaseError> {
    validate(&input.name, input.interval_hours)?;

    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO medications
         (id, owner_id, name, dose_quantity, interval_hours, next_dose_at, total_doses)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id.to_string(),
            input.owner_id.to_string(),
            input.name,
            input.dose_quantity,
            input.interval_hours,
            next_dose_at.map(format_timestamp),
            input.total_doses,
        ],
    )?;

    Ok(Medication {
        id,
        owner_id: input.owner_id,
        name: input.name.clone(),
        dose_quantity: input.dose_quantity.clone(),
        interval_hours: input.interval_hours,
        next_dose_at,
        total_doses: input.total_doses,
    })
}

/// Update an existing medication's editable fields and schedule.
pub fn update_medication(conn: &Connection, med: &Medication) -> Result<(), DatabaseError> {
    validate(&med.name, med.interval_hours)?;

    let changed = conn.execute(
        "UPDATE medications
         SET name = ?1, dose_quantity = ?2, interval_hours = ?3,
             next_dose_at = ?4, total_doses = ?5
         WHERE id = ?6",
        params![
            med.name,
            med.dose_quantity,
            med.interval_hours,
            med.next_dose_at.map(format_timestamp),
            med.total_doses,
            med.id.to_string(),
        ],
    )?;

    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "medication".into(),
            id: med.id.to_string(),
        });
    }
    Ok(())
}

/// Overwrite only the scheduled next dose.
pub fn set_next_dose(
    conn: &Connection,
    medication_id: &Uuid,
    next_dose_at: Option<NaiveDateTime>,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE medications SET next_dose_at = ?1 WHERE id = ?2",
        params![next_dose_at.map(format_timestamp), medication_id.to_string()],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "medication".into(),
            id: medication_id.to_string(),
        });
    }
    Ok(())
}

/// Delete a medication. Its dose events go with it (FK cascade).
pub fn delete_medication(conn: &Connection, medication_id: &Uuid) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM medications WHERE id = ?1",
        params![medication_id.to_string()],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "medication".into(),
            id: medication_id.to_string(),
        });
    }
    Ok(())
}

pub fn get_medication(
    conn: &Connection,
    medication_id: &Uuid,
) -> Result<Option<Medication>, DatabaseError> {
    let result = conn.query_row(
        "SELECT id, owner_id, name, dose_quantity, interval_hours, next_dose_at, total_doses
         FROM medications WHERE id = ?1",
        params![medication_id.to_string()],
        map_medication_row,
    );
    match result {
        Ok(med) => Ok(Some(med)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DatabaseError::from(e)),
    }
}

/// All medications for one owner, soonest next dose first. Unscheduled
/// medications sort last.
pub fn list_medications(
    conn: &Connection,
    owner_id: &Uuid,
) -> Result<Vec<Medication>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, name, dose_quantity, interval_hours, next_dose_at, total_doses
         FROM medications
         WHERE owner_id = ?1
         ORDER BY next_dose_at IS NULL, next_dose_at ASC",
    )?;
    let meds = stmt
        .query_map(params![owner_id.to_string()], map_medication_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(meds)
}

fn map_medication_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Medication> {
    Ok(Medication {
        id: row
            .get::<_, String>(0)?
            .parse()
            .unwrap_or_else(|_| Uuid::nil()),
        owner_id: row
            .get::<_, String>(1)?
            .parse()
            .unwrap_or_else(|_| Uuid::nil()),
        name: row.get(2)?,
        dose_quantity: row.get(3)?,
        interval_hours: row.get(4)?,
        next_dose_at: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| parse_timestamp(&s)),
        total_doses: row.get(6)?,
    })
}
