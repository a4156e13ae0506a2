use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use shared_models::{AppointmentId, Channel, PatientContact};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Confirmation,
    Reminder,
    Delay,
    Cancellation,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertPriority {
    pub fn escalates(&self) -> bool {
        matches!(self, AlertPriority::High | AlertPriority::Critical)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Pending,
    Dispatching,
    Delivered,
    PartiallyFailed,
    Failed,
}

impl AlertStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AlertStatus::Delivered | AlertStatus::PartiallyFailed | AlertStatus::Failed
        )
    }

    /// Aggregate status of an alert from its tasks.
    pub fn aggregate(tasks: &[NotificationTask]) -> AlertStatus {
        if tasks.is_empty() {
            return AlertStatus::Delivered;
        }

        let delivered = tasks.iter().filter(|t| t.status == TaskStatus::Delivered).count();
        if tasks.iter().all(|t| t.status.is_terminal()) {
            return match delivered {
                n if n == tasks.len() => AlertStatus::Delivered,
                0 => AlertStatus::Failed,
                _ => AlertStatus::PartiallyFailed,
            };
        }

        let started = tasks
            .iter()
            .any(|t| t.attempt_count > 0 || t.status != TaskStatus::Pending);
        if started {
            AlertStatus::Dispatching
        } else {
            AlertStatus::Pending
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InFlight,
    Delivered,
    Failed,
    Abandoned,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Delivered | TaskStatus::Failed | TaskStatus::Abandoned)
    }
}

/// Human-readable message plus structured fields used by templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub message: Option<String>,
    pub fields: Map<String, Value>,
}

impl AlertPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Inbound request to raise an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRequest {
    pub kind: AlertKind,
    pub priority: AlertPriority,
    pub payload: AlertPayload,
    pub source_appointment_id: Option<AppointmentId>,
    pub recipients: Vec<PatientContact>,
    /// Replaces the routing table for this alert when set.
    pub channels: Option<Vec<Channel>>,
}

impl AlertRequest {
    pub fn new(kind: AlertKind, priority: AlertPriority, payload: AlertPayload) -> Self {
        Self {
            kind,
            priority,
            payload,
            source_appointment_id: None,
            recipients: Vec::new(),
            channels: None,
        }
    }

    pub fn for_appointment(mut self, appointment_id: AppointmentId) -> Self {
        self.source_appointment_id = Some(appointment_id);
        self
    }

    pub fn with_recipient(mut self, recipient: PatientContact) -> Self {
        self.recipients.push(recipient);
        self
    }

    pub fn with_channels(mut self, channels: Vec<Channel>) -> Self {
        self.channels = Some(channels);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub priority: AlertPriority,
    pub source_appointment_id: Option<AppointmentId>,
    pub payload: AlertPayload,
    pub recipients: Vec<PatientContact>,
    pub channels: Option<Vec<Channel>>,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub escalation_depth: u8,
    pub parent_alert_id: Option<Uuid>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledgement_note: Option<String>,
}

impl Alert {
    pub fn from_request(request: AlertRequest, created_at: DateTime<Utc>, deadline_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: request.kind,
            priority: request.priority,
            source_appointment_id: request.source_appointment_id,
            payload: request.payload,
            recipients: request.recipients,
            channels: request.channels,
            status: AlertStatus::Pending,
            created_at,
            updated_at: created_at,
            deadline_at,
            escalation_depth: 0,
            parent_alert_id: None,
            acknowledged_by: None,
            acknowledged_at: None,
            acknowledgement_note: None,
        }
    }

    pub fn is_escalation(&self) -> bool {
        self.escalation_depth > 0
    }
}

/// One delivery job: an alert sent to one recipient over one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationTask {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub channel: Channel,
    pub recipient: String,
    pub attempt_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub attempted_at: Vec<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl NotificationTask {
    pub fn new(alert_id: Uuid, channel: Channel, recipient: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_id,
            channel,
            recipient: recipient.into(),
            attempt_count: 0,
            next_retry_at: None,
            status: TaskStatus::Pending,
            attempted_at: Vec::new(),
            last_error: None,
        }
    }
}

/// Read-only view of an alert and its tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchStatus {
    pub alert: Alert,
    pub tasks: Vec<NotificationTask>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertFilter {
    pub kind: Option<AlertKind>,
    pub priority: Option<AlertPriority>,
    pub status: Option<AlertStatus>,
    pub appointment_id: Option<AppointmentId>,
    pub since: Option<DateTime<Utc>>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        self.kind.map_or(true, |kind| alert.kind == kind)
            && self.priority.map_or(true, |priority| alert.priority == priority)
            && self.status.map_or(true, |status| alert.status == status)
            && self
                .appointment_id
                .as_ref()
                .map_or(true, |id| alert.source_appointment_id.as_ref() == Some(id))
            && self.since.map_or(true, |since| alert.created_at >= since)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertStatistics {
    pub total_alerts: usize,
    pub by_status: BTreeMap<AlertStatus, usize>,
    pub by_kind: BTreeMap<AlertKind, usize>,
    pub acknowledged: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(status: TaskStatus, attempts: u32) -> NotificationTask {
        NotificationTask {
            status,
            attempt_count: attempts,
            ..NotificationTask::new(Uuid::new_v4(), Channel::Email, "patient@example.com")
        }
    }

    #[test]
    fn test_aggregate_status() {
        use TaskStatus::*;

        assert_eq!(AlertStatus::aggregate(&[]), AlertStatus::Delivered);
        assert_eq!(AlertStatus::aggregate(&[task(Pending, 0)]), AlertStatus::Pending);
        assert_eq!(AlertStatus::aggregate(&[task(Pending, 1)]), AlertStatus::Dispatching);
        assert_eq!(
            AlertStatus::aggregate(&[task(Delivered, 1), task(InFlight, 1)]),
            AlertStatus::Dispatching
        );
        assert_eq!(
            AlertStatus::aggregate(&[task(Delivered, 1), task(Delivered, 2)]),
            AlertStatus::Delivered
        );
        assert_eq!(
            AlertStatus::aggregate(&[task(Failed, 3), task(Abandoned, 2)]),
            AlertStatus::Failed
        );
        assert_eq!(
            AlertStatus::aggregate(&[task(Delivered, 1), task(Abandoned, 2)]),
            AlertStatus::PartiallyFailed
        );
    }

    #[test]
    fn test_filter_by_appointment_and_kind() {
        let now = Utc::now();
        let request = AlertRequest::new(AlertKind::Delay, AlertPriority::High, AlertPayload::new())
            .for_appointment(AppointmentId::from("APT_1"));
        let alert = Alert::from_request(request, now, now);

        let matching = AlertFilter {
            kind: Some(AlertKind::Delay),
            appointment_id: Some(AppointmentId::from("APT_1")),
            ..Default::default()
        };
        let other = AlertFilter {
            appointment_id: Some(AppointmentId::from("APT_2")),
            ..Default::default()
        };

        assert!(matching.matches(&alert));
        assert!(!other.matches(&alert));
    }
}
