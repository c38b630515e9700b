//! Alarm/Mute Engine: plays the repeating audible alert when a due-window
//! is entered, gated by a persisted mute state with expiry.
//!
//! The engine owns the MuteState and SoundConfig records (stored as JSON in
//! the settings table) and sequences calls to the injected [`PulseEmitter`]
//! capability. It never mutates Medication or DoseEvent state, so ledger
//! reads racing a playback observe the ledger unmodified by it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alerts::AlertPayload;
use crate::clock::Clock;
use crate::db::repository::medication::get_medication;
use crate::db::repository::settings::{get_setting, set_setting};
use crate::db::DatabaseError;

const MUTE_STATE_KEY: &str = "mute_state";
const SOUND_CONFIG_KEY: &str = "sound_config";

/// Grace window past the due instant during which a dose still counts as
/// due (seconds).
const DUE_GRACE_SECONDS: i64 = 5 * 60;

#[derive(Error, Debug)]
pub enum AlarmError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Pulse emission failed: {0}")]
    Pulse(#[from] PulseError),

    #[error("Invalid sound config: {0}")]
    InvalidConfig(String),
}

/// Failure reported by the sound collaborator for a single pulse.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct PulseError(pub String);

/// Consumed capability: one audible/visual pulse. The engine sequences
/// calls to it; it never plays more than one pulse per call.
pub trait PulseEmitter: Send + Sync {
    fn emit_pulse(&self) -> Result<(), PulseError>;
}

/// Repeating-alert configuration, persisted process-wide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundConfig {
    /// How many pulses one alarm plays (>= 1).
    pub repetitions: u32,
    /// Pause between pulses.
    pub interval_ms: u64,
    /// How far ahead of next_dose_at the due-soon window opens.
    pub advance_warning_minutes: i64,
}

impl SoundConfig {
    /// Field constraints: at least one pulse, non-negative due-soon window.
    /// A negative window would close the due-soon range entirely and no
    /// alarm would ever play.
    fn validate(&self) -> Result<(), AlarmError> {
        if self.repetitions == 0 {
            return Err(AlarmError::InvalidConfig(
                "repetitions must be at least 1".into(),
            ));
        }
        if self.advance_warning_minutes < 0 {
            return Err(AlarmError::InvalidConfig(format!(
                "advance_warning_minutes must not be negative, got {}",
                self.advance_warning_minutes
            )));
        }
        Ok(())
    }
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            repetitions: 3,
            interval_ms: 1500,
            advance_warning_minutes: 30,
        }
    }
}

/// Persisted mute record: a permanent toggle plus a temporary expiry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteState {
    pub muted: bool,
    pub mute_until: Option<NaiveDateTime>,
}

/// What a single alarm invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlarmOutcome {
    /// All configured pulses were played.
    Played { pulses: u32 },
    /// Mute state suppressed the alarm entirely.
    Suppressed,
    /// The cancel flag stopped the playback early.
    Cancelled { pulses: u32 },
    /// The payload's dose is outside the due-soon window.
    NotDue,
    /// The payload references a medication that no longer exists.
    MedicationGone,
}

/// A dose is due-soon when it is at most `advance_warning_minutes` ahead,
/// or at most 5 minutes past due.
pub fn is_due_soon(
    next_dose_at: NaiveDateTime,
    now: NaiveDateTime,
    advance_warning_minutes: i64,
) -> bool {
    let until_due = next_dose_at - now;
    until_due <= Duration::minutes(advance_warning_minutes)
        && until_due >= -Duration::seconds(DUE_GRACE_SECONDS)
}

pub struct AlarmEngine {
    sound: Arc<dyn PulseEmitter>,
    clock: Arc<dyn Clock>,
    cancelled: Arc<AtomicBool>,
}

impl AlarmEngine {
    pub fn new(sound: Arc<dyn PulseEmitter>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sound,
            clock,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    // ── Sound config ──────────────────────────────────────────

    /// Load the sound config, falling back to defaults when unset. A value
    /// that fails to parse or violates a field constraint is treated as
    /// unset (self-heal, logged).
    pub fn sound_config(&self, conn: &Connection) -> Result<SoundConfig, DatabaseError> {
        let Some(raw) = get_setting(conn, SOUND_CONFIG_KEY)? else {
            return Ok(SoundConfig::default());
        };
        match serde_json::from_str::<SoundConfig>(&raw) {
            Ok(config) => {
                if let Err(e) = config.validate() {
                    tracing::warn!(error = %e, "invalid stored sound config, using defaults");
                    return Ok(SoundConfig::default());
                }
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(error = %e, "corrupt sound config, using defaults");
                Ok(SoundConfig::default())
            }
        }
    }

    pub fn save_sound_config(
        &self,
        conn: &Connection,
        config: &SoundConfig,
    ) -> Result<(), AlarmError> {
        config.validate()?;
        let raw = serde_json::to_string(config)
            .map_err(|e| AlarmError::InvalidConfig(e.to_string()))?;
        set_setting(conn, SOUND_CONFIG_KEY, &raw)?;
        Ok(())
    }

    // ── Mute state ────────────────────────────────────────────

    /// Raw persisted mute record, without expiry evaluation.
    pub fn mute_state(&self, conn: &Connection) -> Result<MuteState, DatabaseError> {
        let Some(raw) = get_setting(conn, MUTE_STATE_KEY)? else {
            return Ok(MuteState::default());
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(state),
            Err(e) => {
                tracing::warn!(error = %e, "corrupt mute state, using defaults");
                Ok(MuteState::default())
            }
        }
    }

    fn save_mute_state(&self, conn: &Connection, state: &MuteState) -> Result<(), DatabaseError> {
        let raw = serde_json::to_string(state).map_err(|e| {
            // MuteState always serializes; keep the failure visible anyway.
            DatabaseError::ConstraintViolation(format!("mute state serialization: {e}"))
        })?;
        set_setting(conn, MUTE_STATE_KEY, &raw)
    }

    /// Effective mute status. An expired `mute_until` is cleared here
    /// (write-back): clock skew self-heals on read instead of erroring.
    pub fn is_muted(&self, conn: &Connection) -> Result<bool, DatabaseError> {
        let mut state = self.mute_state(conn)?;
        if state.muted {
            return Ok(true);
        }
        if let Some(until) = state.mute_until {
            if self.clock.now() < until {
                return Ok(true);
            }
            state.mute_until = None;
            self.save_mute_state(conn, &state)?;
        }
        Ok(false)
    }

    /// Silence alarms for the given number of minutes. Zero minutes is the
    /// canonical "clear mute": it removes both the temporary expiry and the
    /// permanent toggle, and never stores a past-or-now `mute_until`.
    pub fn mute_temporarily(
        &self,
        conn: &Connection,
        minutes: i64,
    ) -> Result<(), DatabaseError> {
        let mut state = self.mute_state(conn)?;
        if minutes <= 0 {
            state.muted = false;
            state.mute_until = None;
        } else {
            state.mute_until = Some(self.clock.now() + Duration::minutes(minutes));
        }
        self.save_mute_state(conn, &state)
    }

    /// Permanent mute toggle. Unmuting also drops any temporary expiry.
    pub fn set_muted(&self, conn: &Connection, muted: bool) -> Result<(), DatabaseError> {
        let mut state = self.mute_state(conn)?;
        state.muted = muted;
        if !muted {
            state.mute_until = None;
        }
        self.save_mute_state(conn, &state)
    }

    // ── Playback ──────────────────────────────────────────────

    /// Request that an in-progress playback stops before its next pulse.
    pub fn cancel_playback(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Play one alarm: mute evaluation, then the repeating pulse loop.
    pub async fn play_alarm(&self, conn: &Connection) -> Result<AlarmOutcome, AlarmError> {
        if self.is_muted(conn)? {
            tracing::debug!("alarm suppressed by mute state");
            return Ok(AlarmOutcome::Suppressed);
        }
        let config = self.sound_config(conn)?;
        self.run_playback(&config).await
    }

    /// The repeating pulse loop. Sleeping between pulses is the only
    /// suspension point in the crate; no ledger state is touched here. The
    /// cancel flag is checked before each pulse and after each sleep. A
    /// pulse failure aborts the remaining repetitions.
    pub async fn run_playback(&self, config: &SoundConfig) -> Result<AlarmOutcome, AlarmError> {
        self.cancelled.store(false, Ordering::SeqCst);
        let mut pulses = 0u32;

        for i in 0..config.repetitions.max(1) {
            if i > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(config.interval_ms)).await;
            }
            if self.cancelled.load(Ordering::SeqCst) {
                tracing::debug!(pulses, "alarm playback cancelled");
                return Ok(AlarmOutcome::Cancelled { pulses });
            }
            self.sound.emit_pulse().map_err(|e| {
                tracing::warn!(pulse = i + 1, error = %e, "pulse emission failed, aborting alarm");
                AlarmError::Pulse(e)
            })?;
            pulses += 1;
        }

        tracing::debug!(pulses, "alarm playback finished");
        Ok(AlarmOutcome::Played { pulses })
    }

    // ── Fired-alert handler ───────────────────────────────────

    /// Entry point for the notification collaborator: called with the
    /// payload stored at schedule time when a one-shot alert fires.
    ///
    /// Routes through the same ledger APIs as user-initiated actions; a
    /// medication deleted since scheduling is a not-found outcome, never a
    /// crash. A dose that moved out of the due-soon window (edit or
    /// catch-up since scheduling) plays nothing.
    pub async fn handle_alert_fired(
        &self,
        conn: &Connection,
        payload: &AlertPayload,
    ) -> Result<AlarmOutcome, AlarmError> {
        let Some(med) = get_medication(conn, &payload.medication_id)? else {
            tracing::warn!(medication = %payload.medication_id, "alert fired for missing medication");
            return Ok(AlarmOutcome::MedicationGone);
        };

        let Some(next) = med.next_dose_at else {
            return Ok(AlarmOutcome::NotDue);
        };

        let config = self.sound_config(conn)?;
        if !is_due_soon(next, self.clock.now(), config.advance_warning_minutes) {
            tracing::debug!(medication = %med.id, %next, "alert fired outside due-soon window");
            return Ok(AlarmOutcome::NotDue);
        }

        self.play_alarm(conn).await
    }
}
