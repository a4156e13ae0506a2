use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use shared_models::AppointmentId;

use crate::error::DispatchError;
use crate::models::{
    Alert, AlertFilter, AlertKind, AlertStatistics, AlertStatus, DispatchStatus, NotificationTask,
    TaskStatus,
};

#[derive(Default)]
struct LedgerState {
    alerts: HashMap<Uuid, Alert>,
    // Raise order
    order: Vec<Uuid>,
    tasks: HashMap<Uuid, NotificationTask>,
    alert_tasks: HashMap<Uuid, Vec<Uuid>>,
    latest: HashMap<(AppointmentId, AlertKind), Uuid>,
}

impl LedgerState {
    fn tasks_of(&self, alert_id: &Uuid) -> Vec<NotificationTask> {
        self.alert_tasks
            .get(alert_id)
            .map(|ids| ids.iter().filter_map(|id| self.tasks.get(id)).cloned().collect())
            .unwrap_or_default()
    }
}

/// Outcome of recording a raised alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    New(Uuid),
    /// Collapsed into an earlier alert inside the dedup window.
    Merged(Uuid),
}

impl Recorded {
    pub fn alert_id(&self) -> Uuid {
        match self {
            Recorded::New(id) | Recorded::Merged(id) => *id,
        }
    }
}

/// State of an alert right after one of its tasks changed.
#[derive(Debug, Clone)]
pub struct TaskUpdate {
    pub alert: Alert,
    pub tasks: Vec<NotificationTask>,
    /// The alert reached a terminal status with this update.
    pub finalized: bool,
}

/// Append-only record of alerts and their notification tasks.
pub struct AlertLedger {
    state: RwLock<LedgerState>,
    changed: Notify,
}

impl Default for AlertLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertLedger {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            changed: Notify::new(),
        }
    }

    /// Store a new alert, or merge it into a recent one for the same appointment and kind.
    ///
    /// Only an alert that has not started dispatching absorbs a duplicate;
    /// otherwise the duplicate is recorded on its own so its payload still goes out.
    pub(crate) async fn record(&self, alert: Alert, dedup_window: Duration) -> Recorded {
        let mut state = self.state.write().await;

        let key = match (&alert.source_appointment_id, alert.is_escalation()) {
            (Some(appointment_id), false) => Some((appointment_id.clone(), alert.kind)),
            _ => None,
        };

        if let Some(key) = &key {
            let existing_id = state.latest.get(key).copied();
            if let Some(existing) = existing_id.and_then(|id| state.alerts.get_mut(&id)) {
                let mergeable = existing.status == AlertStatus::Pending;
                if mergeable && alert.created_at - existing.created_at < dedup_window {
                    existing.payload = alert.payload;
                    existing.updated_at = alert.created_at;
                    debug!(alert_id = %existing.id, "Merged duplicate {:?} alert", existing.kind);
                    return Recorded::Merged(existing.id);
                }
            }
        }

        let id = alert.id;
        if let Some(key) = key {
            state.latest.insert(key, id);
        }
        state.order.push(id);
        state.alerts.insert(id, alert);
        Recorded::New(id)
    }

    pub(crate) async fn attach_tasks(&self, alert_id: Uuid, tasks: Vec<NotificationTask>, now: DateTime<Utc>) {
        let mut state = self.state.write().await;
        let ids: Vec<Uuid> = tasks.iter().map(|task| task.id).collect();
        for task in tasks {
            state.tasks.insert(task.id, task);
        }
        state.alert_tasks.entry(alert_id).or_default().extend(ids);

        let status = AlertStatus::aggregate(&state.tasks_of(&alert_id));
        if let Some(alert) = state.alerts.get_mut(&alert_id) {
            alert.status = status;
            alert.updated_at = now;
        }
    }

    /// Finalize an alert that expanded into no tasks.
    pub(crate) async fn finalize_empty(
        &self,
        alert_id: Uuid,
        status: AlertStatus,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let mut state = self.state.write().await;
        let alert = state.alerts.get_mut(&alert_id)?;
        alert.status = status;
        alert.updated_at = now;
        let alert = alert.clone();
        drop(state);

        self.changed.notify_waiters();
        Some(alert)
    }

    pub(crate) async fn task_with_alert(&self, task_id: Uuid) -> Option<(NotificationTask, Alert)> {
        let state = self.state.read().await;
        let task = state.tasks.get(&task_id)?;
        let alert = state.alerts.get(&task.alert_id)?;
        Some((task.clone(), alert.clone()))
    }

    /// Mark a task in flight and count the attempt. Returns the attempt number.
    pub(crate) async fn begin_attempt(&self, task_id: Uuid, now: DateTime<Utc>) -> Option<u32> {
        let mut state = self.state.write().await;
        let task = state.tasks.get_mut(&task_id)?;
        task.status = TaskStatus::InFlight;
        task.attempt_count += 1;
        task.attempted_at.push(now);
        task.next_retry_at = None;
        let (alert_id, attempts) = (task.alert_id, task.attempt_count);

        let status = AlertStatus::aggregate(&state.tasks_of(&alert_id));
        if let Some(alert) = state.alerts.get_mut(&alert_id) {
            alert.status = status;
            alert.updated_at = now;
        }
        Some(attempts)
    }

    /// Record the result of an attempt and recompute the owning alert.
    pub(crate) async fn complete_task(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        error: Option<String>,
        next_retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<TaskUpdate> {
        let mut state = self.state.write().await;
        let task = state.tasks.get_mut(&task_id)?;
        task.status = status;
        task.next_retry_at = next_retry_at;
        if error.is_some() {
            task.last_error = error;
        }
        let alert_id = task.alert_id;

        let tasks = state.tasks_of(&alert_id);
        let aggregate = AlertStatus::aggregate(&tasks);
        let alert = state.alerts.get_mut(&alert_id)?;
        let finalized = !alert.status.is_terminal() && aggregate.is_terminal();
        alert.status = aggregate;
        alert.updated_at = now;
        let update = TaskUpdate {
            alert: alert.clone(),
            tasks,
            finalized,
        };
        drop(state);

        self.changed.notify_waiters();
        Some(update)
    }

    pub async fn get_alert(&self, alert_id: Uuid) -> Option<Alert> {
        self.state.read().await.alerts.get(&alert_id).cloned()
    }

    /// Alerts matching the filter, in raise order.
    pub async fn list_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|id| state.alerts.get(id))
            .filter(|alert| filter.matches(alert))
            .cloned()
            .collect()
    }

    pub async fn get_dispatch_status(&self, alert_id: Uuid) -> Result<DispatchStatus, DispatchError> {
        let state = self.state.read().await;
        let alert = state
            .alerts
            .get(&alert_id)
            .cloned()
            .ok_or(DispatchError::AlertNotFound(alert_id))?;

        Ok(DispatchStatus {
            tasks: state.tasks_of(&alert_id),
            alert,
        })
    }

    /// Resolves once the alert reaches a terminal status.
    pub async fn wait_for_terminal(&self, alert_id: Uuid) -> Result<DispatchStatus, DispatchError> {
        loop {
            let changed = self.changed.notified();
            let status = self.get_dispatch_status(alert_id).await?;
            if status.alert.status.is_terminal() {
                return Ok(status);
            }
            changed.await;
        }
    }

    pub async fn statistics(&self) -> AlertStatistics {
        let state = self.state.read().await;
        let mut stats = AlertStatistics {
            total_alerts: state.alerts.len(),
            ..Default::default()
        };

        for alert in state.alerts.values() {
            *stats.by_status.entry(alert.status).or_default() += 1;
            *stats.by_kind.entry(alert.kind).or_default() += 1;
            if alert.acknowledged_at.is_some() {
                stats.acknowledged += 1;
            }
        }
        stats
    }

    /// Record who acknowledged an alert. Delivery status is left unchanged.
    pub async fn acknowledge(
        &self,
        alert_id: Uuid,
        acknowledged_by: impl Into<String>,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Alert, DispatchError> {
        let mut state = self.state.write().await;
        let alert = state
            .alerts
            .get_mut(&alert_id)
            .ok_or(DispatchError::AlertNotFound(alert_id))?;

        alert.acknowledged_by = Some(acknowledged_by.into());
        alert.acknowledged_at = Some(now);
        alert.acknowledgement_note = note;
        alert.updated_at = now;

        info!(alert_id = %alert_id, "Alert acknowledged");
        Ok(alert.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertPayload, AlertPriority, AlertRequest};

    fn confirmation(appointment: &str, created_at: DateTime<Utc>, message: &str) -> Alert {
        let request = AlertRequest::new(
            AlertKind::Confirmation,
            AlertPriority::Medium,
            AlertPayload::new().with_message(message),
        )
        .for_appointment(AppointmentId::from(appointment));
        Alert::from_request(request, created_at, created_at + Duration::minutes(30))
    }

    #[tokio::test]
    async fn test_record_merges_within_window() {
        let ledger = AlertLedger::new();
        let window = Duration::seconds(5);
        let t0 = Utc::now();

        let first = ledger.record(confirmation("APT_1", t0, "first"), window).await;
        let second = ledger
            .record(confirmation("APT_1", t0 + Duration::seconds(3), "second"), window)
            .await;
        let later = ledger
            .record(confirmation("APT_1", t0 + Duration::seconds(9), "third"), window)
            .await;

        assert_eq!(second, Recorded::Merged(first.alert_id()));
        assert!(matches!(later, Recorded::New(id) if id != first.alert_id()));

        let merged = ledger.get_alert(first.alert_id()).await.unwrap();
        assert_eq!(merged.payload.message.as_deref(), Some("second"));
        assert_eq!(ledger.list_alerts(&AlertFilter::default()).await.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_of_dispatched_alert_is_recorded_separately() {
        let ledger = AlertLedger::new();
        let window = Duration::seconds(5);
        let t0 = Utc::now();

        let first = ledger.record(confirmation("APT_3", t0, "booked"), window).await;
        ledger
            .finalize_empty(first.alert_id(), AlertStatus::Delivered, t0)
            .await
            .unwrap();

        let moved = ledger
            .record(confirmation("APT_3", t0 + Duration::seconds(1), "moved"), window)
            .await;
        assert!(matches!(moved, Recorded::New(id) if id != first.alert_id()));

        let kept = ledger.get_alert(first.alert_id()).await.unwrap();
        assert_eq!(kept.payload.message.as_deref(), Some("booked"));

        // The newer alert is now the merge target for its key
        let again = ledger
            .record(confirmation("APT_3", t0 + Duration::seconds(2), "moved again"), window)
            .await;
        assert_eq!(again, Recorded::Merged(moved.alert_id()));
    }

    #[tokio::test]
    async fn test_acknowledge_keeps_status() {
        let ledger = AlertLedger::new();
        let now = Utc::now();
        let id = ledger
            .record(confirmation("APT_2", now, "hello"), Duration::seconds(5))
            .await
            .alert_id();

        let alert = ledger
            .acknowledge(id, "front-desk", Some("called patient".to_string()), now)
            .await
            .unwrap();
        assert_eq!(alert.status, AlertStatus::Pending);
        assert_eq!(alert.acknowledged_by.as_deref(), Some("front-desk"));

        let stats = ledger.statistics().await;
        assert_eq!(stats.total_alerts, 1);
        assert_eq!(stats.acknowledged, 1);
        assert_eq!(stats.by_kind.get(&AlertKind::Confirmation), Some(&1));

        assert!(ledger.acknowledge(Uuid::new_v4(), "x", None, now).await.is_err());
    }
}
