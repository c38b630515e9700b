//! Alert Dispatcher: converges the external notification surface on the
//! invariant "at most one pending one-shot alert per medication, at its
//! current next_dose_at, and none for unscheduled or past doses".
//!
//! The dispatcher never talks to a delivery API; it drives the injected
//! [`NotificationGateway`] capability and holds no state of its own.
//! Actual wall-clock waiting happens inside the collaborator, which calls
//! back into the alarm engine at fire time.

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::repository::medication::Medication;

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Notification transport rejected {operation} for {key}: {reason}")]
    Transport {
        operation: &'static str,
        key: Uuid,
        reason: String,
    },
}

/// What the delivery collaborator stores with an alert and hands back to
/// the fired-alert handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub medication_id: Uuid,
    pub name: String,
    pub dose_quantity: String,
}

impl AlertPayload {
    pub fn for_medication(med: &Medication) -> Self {
        Self {
            medication_id: med.id,
            name: med.name.clone(),
            dose_quantity: med.dose_quantity.clone(),
        }
    }
}

/// A scheduled-but-not-yet-fired alert as reported by the collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAlert {
    pub key: Uuid,
    pub fire_at: NaiveDateTime,
    pub payload: AlertPayload,
}

/// Consumed capability: schedule/cancel one-shot future alerts. Keys are
/// medication ids; scheduling an existing key after `cancel` replaces it.
pub trait NotificationGateway: Send + Sync {
    /// Schedule a one-shot alert, returning a transport handle.
    fn schedule_one_shot(
        &self,
        key: Uuid,
        fire_at: NaiveDateTime,
        payload: AlertPayload,
    ) -> Result<String, AlertError>;

    /// Remove a pending alert. Must be a no-op when none exists.
    fn cancel(&self, key: Uuid) -> Result<(), AlertError>;

    fn list_pending(&self) -> Result<Vec<PendingAlert>, AlertError>;
}

pub struct AlertDispatcher {
    gateway: Arc<dyn NotificationGateway>,
}

impl AlertDispatcher {
    pub fn new(gateway: Arc<dyn NotificationGateway>) -> Self {
        Self { gateway }
    }

    /// Cancel-then-conditionally-schedule for a single medication. Used
    /// after creation, edit and mark-taken. Returns the transport handle
    /// when an alert was scheduled.
    pub fn reschedule(
        &self,
        med: &Medication,
        now: NaiveDateTime,
    ) -> Result<Option<String>, AlertError> {
        self.gateway.cancel(med.id)?;

        match med.next_dose_at {
            Some(fire_at) if fire_at > now => {
                let handle =
                    self.gateway
                        .schedule_one_shot(med.id, fire_at, AlertPayload::for_medication(med))?;
                tracing::debug!(medication = %med.id, %fire_at, handle, "alert scheduled");
                Ok(Some(handle))
            }
            _ => Ok(None),
        }
    }

    /// Remove the pending alert for one medication, if any.
    pub fn cancel(&self, medication_id: Uuid) -> Result<(), AlertError> {
        self.gateway.cancel(medication_id)
    }

    /// Converge every medication to exactly one pending alert (or none
    /// when unscheduled/past). Safe to call repeatedly. Transport failures
    /// are logged and skipped; the loop always finishes the list, and the
    /// affected medication simply has no alert until the next convergence.
    pub fn ensure_scheduled(&self, meds: &[Medication], now: NaiveDateTime) {
        for med in meds {
            if let Err(e) = self.reschedule(med, now) {
                tracing::warn!(medication = %med.id, error = %e, "alert reschedule failed, continuing");
            }
        }
    }

    /// Cancel all medications' pending alerts, same failure semantics as
    /// [`ensure_scheduled`].
    pub fn cancel_all(&self, meds: &[Medication]) {
        for med in meds {
            if let Err(e) = self.gateway.cancel(med.id) {
                tracing::warn!(medication = %med.id, error = %e, "alert cancel failed, continuing");
            }
        }
    }

    /// Global reminders toggle. Each flip is a full convergence pass over
    /// the given medications, never an incremental diff.
    pub fn set_enabled(&self, meds: &[Medication], enabled: bool, now: NaiveDateTime) {
        if enabled {
            self.ensure_scheduled(meds, now);
        } else {
            self.cancel_all(meds);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory gateway fake shared by dispatcher and handler tests.

    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MemoryGateway {
        pending: Mutex<HashMap<Uuid, PendingAlert>>,
        failing_keys: Mutex<HashSet<Uuid>>,
        pub schedule_calls: Mutex<u32>,
    }

    impl MemoryGateway {
        pub fn pending_keys(&self) -> Vec<Uuid> {
            let mut keys: Vec<Uuid> =
                self.pending.lock().unwrap().keys().copied().collect();
            keys.sort();
            keys
        }

        pub fn pending_for(&self, key: Uuid) -> Option<PendingAlert> {
            self.pending.lock().unwrap().get(&key).cloned()
        }

        /// Make every operation on this key fail, simulating a platform
        /// limitation.
        pub fn fail_key(&self, key: Uuid) {
            self.failing_keys.lock().unwrap().insert(key);
        }
    }

    impl NotificationGateway for MemoryGateway {
        fn schedule_one_shot(
            &self,
            key: Uuid,
            fire_at: NaiveDateTime,
            payload: AlertPayload,
        ) -> Result<String, AlertError> {
            *self.schedule_calls.lock().unwrap() += 1;
            if self.failing_keys.lock().unwrap().contains(&key) {
                return Err(AlertError::Transport {
                    operation: "schedule",
                    key,
                    reason: "platform rejected schedule".into(),
                });
            }
            self.pending.lock().unwrap().insert(
                key,
                PendingAlert {
                    key,
                    fire_at,
                    payload,
                },
            );
            Ok(format!("handle-{key}"))
        }

        fn cancel(&self, key: Uuid) -> Result<(), AlertError> {
            if self.failing_keys.lock().unwrap().contains(&key) {
                return Err(AlertError::Transport {
                    operation: "cancel",
                    key,
                    reason: "platform rejected cancel".into(),
                });
            }
            self.pending.lock().unwrap().remove(&key);
            Ok(())
        }

        fn list_pending(&self) -> Result<Vec<PendingAlert>, AlertError> {
            Ok(self.pending.lock().unwrap().values().cloned().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryGateway;
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn med(name: &str, next_dose_at: Option<NaiveDateTime>) -> Medication {
        Medication {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: name.into(),
            dose_quantity: "1 tablet".into(),
            interval_hours: 8,
            next_dose_at,
            total_doses: 0,
        }
    }

    fn dispatcher() -> (AlertDispatcher, Arc<MemoryGateway>) {
        let gateway = Arc::new(MemoryGateway::default());
        (AlertDispatcher::new(gateway.clone()), gateway)
    }

    /// Pending keys as reported through the gateway capability itself.
    fn pending_set(gateway: &dyn NotificationGateway) -> Vec<Uuid> {
        let mut keys: Vec<Uuid> = gateway
            .list_pending()
            .unwrap()
            .into_iter()
            .map(|alert| alert.key)
            .collect();
        keys.sort();
        keys
    }

    #[test]
    fn reschedule_future_dose_creates_one_alert() {
        let (dispatcher, gateway) = dispatcher();
        let m = med("Amoxicillin", Some(at(16)));

        let handle = dispatcher.reschedule(&m, at(8)).unwrap();
        assert!(handle.is_some());

        let pending = gateway.pending_for(m.id).unwrap();
        assert_eq!(pending.fire_at, at(16));
        assert_eq!(pending.payload.name, "Amoxicillin");
        assert_eq!(pending.payload.dose_quantity, "1 tablet");
    }

    #[test]
    fn reschedule_skips_null_and_past_doses() {
        let (dispatcher, gateway) = dispatcher();

        let unscheduled = med("A", None);
        assert!(dispatcher.reschedule(&unscheduled, at(8)).unwrap().is_none());

        let past = med("B", Some(at(7)));
        assert!(dispatcher.reschedule(&past, at(8)).unwrap().is_none());

        // Exactly-now is not strictly in the future.
        let due_now = med("C", Some(at(8)));
        assert!(dispatcher.reschedule(&due_now, at(8)).unwrap().is_none());

        assert!(gateway.pending_keys().is_empty());
    }

    #[test]
    fn reschedule_supersedes_stale_alert() {
        let (dispatcher, gateway) = dispatcher();
        let mut m = med("Amoxicillin", Some(at(16)));
        dispatcher.reschedule(&m, at(8)).unwrap();

        m.next_dose_at = Some(at(20));
        dispatcher.reschedule(&m, at(8)).unwrap();

        assert_eq!(gateway.pending_keys(), vec![m.id]);
        assert_eq!(gateway.pending_for(m.id).unwrap().fire_at, at(20));
    }

    #[test]
    fn ensure_scheduled_is_idempotent() {
        let (dispatcher, gateway) = dispatcher();
        let meds = vec![
            med("A", Some(at(10))),
            med("B", Some(at(12))),
            med("C", None),
        ];

        dispatcher.ensure_scheduled(&meds, at(8));
        let first = pending_set(gateway.as_ref());

        dispatcher.ensure_scheduled(&meds, at(8));
        assert_eq!(pending_set(gateway.as_ref()), first);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn ensure_scheduled_continues_past_failures() {
        let (dispatcher, gateway) = dispatcher();
        let failing = med("Broken", Some(at(10)));
        let ok = med("Fine", Some(at(12)));
        gateway.fail_key(failing.id);

        dispatcher.ensure_scheduled(&[failing.clone(), ok.clone()], at(8));

        // The failed medication has no alert; the rest of the loop ran.
        assert_eq!(gateway.pending_keys(), vec![ok.id]);
    }

    #[test]
    fn cancel_is_noop_without_pending_alert() {
        let (dispatcher, _gateway) = dispatcher();
        assert!(dispatcher.cancel(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn deleted_medication_alert_is_cancelled() {
        use crate::db::repository::medication::{add_medication, delete_medication, NewMedication};
        use crate::db::repository::user::add_user;
        use crate::db::sqlite::open_memory_database;

        let conn = open_memory_database().unwrap();
        let owner = add_user(&conn, "maria").unwrap();
        let m = add_medication(
            &conn,
            &NewMedication {
                owner_id: owner.id,
                name: "Amoxicillin".into(),
                dose_quantity: "1 tablet".into(),
                interval_hours: 8,
                total_doses: 0,
            },
            Some(at(16)),
        )
        .unwrap();

        let (dispatcher, gateway) = dispatcher();
        dispatcher.reschedule(&m, at(8)).unwrap();
        assert_eq!(gateway.pending_keys(), vec![m.id]);

        delete_medication(&conn, &m.id).unwrap();
        dispatcher.cancel(m.id).unwrap();
        assert!(gateway.pending_keys().is_empty());
    }

    #[test]
    fn toggle_converges_both_ways() {
        let (dispatcher, gateway) = dispatcher();
        let meds = vec![med("A", Some(at(10))), med("B", Some(at(12)))];

        dispatcher.set_enabled(&meds, true, at(8));
        assert_eq!(gateway.pending_keys().len(), 2);

        dispatcher.set_enabled(&meds, false, at(8));
        assert!(gateway.pending_keys().is_empty());

        dispatcher.set_enabled(&meds, true, at(8));
        assert_eq!(gateway.pending_keys().len(), 2);
    }
}
