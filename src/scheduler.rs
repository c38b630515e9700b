//! Dose Scheduler: derives the next due dose from an interval and history.
//!
//! Holds no state of its own: everything here is a pure function over
//! ledger data plus an explicit `now`, or an explicit ledger write. All
//! read paths that surface `next_dose_at` go through [`catch_up_medication`]
//! so stale schedules roll forward in exactly one place.

use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::db::repository::dose_event::{add_dose_event, count_dose_events};
use crate::db::repository::medication::{
    add_medication, get_medication, list_medications, set_next_dose, Medication, NewMedication,
};
use crate::db::DatabaseError;

/// How many future doses are projected for an open-ended course
/// (total_doses = 0).
pub const OPEN_ENDED_PROJECTION: u32 = 5;

/// First dose of a fresh medication: one full interval from now.
pub fn initial_next_dose(now: NaiveDateTime, interval_hours: i64) -> NaiveDateTime {
    now + Duration::hours(interval_hours)
}

/// Roll a stale schedule forward by whole interval steps until it is
/// >= now. Repeated addition, never a single recompute: the interval may
/// not divide the elapsed time evenly and the result must land on a dose
/// boundary. No-op when the schedule is already current.
pub fn catch_up(next_dose_at: NaiveDateTime, now: NaiveDateTime, interval_hours: i64) -> NaiveDateTime {
    let step = Duration::hours(interval_hours);
    let mut next = next_dose_at;
    while next < now {
        next += step;
    }
    next
}

/// Display count of doses still ahead beyond the scheduled next one.
///
/// Open-ended courses show a fixed window of upcoming doses; finite
/// courses show what is actually left of the budget.
pub fn doses_remaining(total_doses: u32, doses_taken: u32) -> u32 {
    if total_doses == 0 {
        OPEN_ENDED_PROJECTION
    } else {
        total_doses.saturating_sub(doses_taken).saturating_sub(1)
    }
}

/// Bounded forward projection: the scheduled dose plus `additional` more,
/// spaced one interval apart. Recomputed from scratch on every call;
/// projected entries are ephemeral and hold no ledger state.
pub fn project_doses(
    next_dose_at: NaiveDateTime,
    interval_hours: i64,
    additional: u32,
) -> Vec<NaiveDateTime> {
    let step = Duration::hours(interval_hours);
    (0..=i64::from(additional))
        .map(|i| next_dose_at + step * i as i32)
        .collect()
}

/// Create a medication with its initial schedule.
pub fn create_medication(
    conn: &Connection,
    input: &NewMedication,
    now: NaiveDateTime,
) -> Result<Medication, DatabaseError> {
    let next = initial_next_dose(now, input.interval_hours);
    add_medication(conn, input, Some(next))
}

/// Catch up a medication's schedule and persist the roll-forward.
///
/// The single entry point invoked before any read of `next_dose_at` is
/// surfaced. Idempotent: a current schedule is returned untouched.
pub fn catch_up_medication(
    conn: &Connection,
    med: &Medication,
    now: NaiveDateTime,
) -> Result<Medication, DatabaseError> {
    let Some(next) = med.next_dose_at else {
        return Ok(med.clone());
    };
    if next >= now {
        return Ok(med.clone());
    }

    let rolled = catch_up(next, now, med.interval_hours);
    tracing::debug!(
        medication = %med.id,
        from = %next,
        to = %rolled,
        "catching up missed dose schedule"
    );
    set_next_dose(conn, &med.id, Some(rolled))?;

    let mut updated = med.clone();
    updated.next_dose_at = Some(rolled);
    Ok(updated)
}

/// Result of recording a taken dose.
#[derive(Debug, Clone, Serialize)]
pub struct MarkTaken {
    pub medication: Medication,
    pub doses_taken: u32,
    /// Doses still ahead for display; see [`doses_remaining`].
    pub doses_remaining: u32,
    /// A finite course just consumed its last dose.
    pub course_complete: bool,
}

/// Record a dose as taken now.
///
/// Appends a DoseEvent and sets `next_dose_at = now + interval`, discarding
/// whatever was previously scheduled (including a missed time). When this
/// event consumes the last dose of a finite course, the schedule is cleared
/// instead; recording against an already-complete course is rejected so the
/// event count can never exceed `total_doses`.
pub fn mark_taken(
    conn: &Connection,
    medication_id: &Uuid,
    now: NaiveDateTime,
) -> Result<MarkTaken, DatabaseError> {
    let med = get_medication(conn, medication_id)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "medication".into(),
        id: medication_id.to_string(),
    })?;

    let already_taken = count_dose_events(conn, medication_id)?;
    if med.total_doses > 0 && already_taken >= med.total_doses {
        return Err(DatabaseError::ConstraintViolation(format!(
            "course complete: all {} doses already recorded for {}",
            med.total_doses, med.name
        )));
    }

    add_dose_event(conn, medication_id, now)?;
    let doses_taken = already_taken + 1;

    let course_complete = med.total_doses > 0 && doses_taken >= med.total_doses;
    let next = if course_complete {
        None
    } else {
        Some(now + Duration::hours(med.interval_hours))
    };
    set_next_dose(conn, medication_id, next)?;

    tracing::info!(
        medication = %med.id,
        name = %med.name,
        doses_taken,
        course_complete,
        "dose recorded"
    );

    let mut updated = med;
    updated.next_dose_at = next;
    let remaining = doses_remaining(updated.total_doses, doses_taken);
    Ok(MarkTaken {
        medication: updated,
        doses_taken,
        doses_remaining: remaining,
        course_complete,
    })
}

/// Drop the scheduled next dose without recording anything. Only the real
/// next dose can be removed; projected entries do not exist in the ledger.
pub fn clear_next_dose(conn: &Connection, medication_id: &Uuid) -> Result<(), DatabaseError> {
    set_next_dose(conn, medication_id, None)
}

/// One entry of the merged upcoming-doses view.
#[derive(Debug, Clone, Serialize)]
pub struct UpcomingDose {
    pub medication_id: Uuid,
    pub name: String,
    pub dose_quantity: String,
    pub interval_hours: i64,
    pub scheduled_at: NaiveDateTime,
    /// False for the stored next dose, true for interval-projected entries.
    pub is_projected: bool,
}

/// Upcoming doses across all of an owner's medications, soonest first.
///
/// Each medication is caught up first (persisting the roll-forward), then
/// projected `doses_remaining` steps ahead. Medications without a schedule
/// contribute nothing.
pub fn upcoming_doses(
    conn: &Connection,
    owner_id: &Uuid,
    now: NaiveDateTime,
) -> Result<Vec<UpcomingDose>, DatabaseError> {
    let mut doses = Vec::new();

    for med in list_medications(conn, owner_id)? {
        let med = catch_up_medication(conn, &med, now)?;
        let Some(next) = med.next_dose_at else {
            continue;
        };

        let taken = count_dose_events(conn, &med.id)?;
        let remaining = doses_remaining(med.total_doses, taken);

        for (i, scheduled_at) in project_doses(next, med.interval_hours, remaining)
            .into_iter()
            .enumerate()
        {
            doses.push(UpcomingDose {
                medication_id: med.id,
                name: med.name.clone(),
                dose_quantity: med.dose_quantity.clone(),
                interval_hours: med.interval_hours,
                scheduled_at,
                is_projected: i > 0,
            });
        }
    }

    doses.sort_by_key(|d| d.scheduled_at);
    Ok(doses)
}
