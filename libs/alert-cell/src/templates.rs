use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use shared_models::PatientContact;

use crate::models::{Alert, AlertKind};

/// What a channel adapter actually sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplatedMessage {
    pub subject: String,
    pub body: String,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone)]
struct Template {
    subject: String,
    body: String,
}

/// Per-kind subject and body with `{placeholder}` substitution.
#[derive(Debug, Clone)]
pub struct MessageTemplates {
    hospital_name: String,
    templates: HashMap<AlertKind, Template>,
}

impl MessageTemplates {
    pub fn new(hospital_name: impl Into<String>) -> Self {
        let templates = [
            (
                AlertKind::Confirmation,
                "Appointment confirmed at {hospital_name}",
                "Dear {patient_name}, your appointment with {doctor_name} on {appointment_date} at {appointment_time} is confirmed. Appointment ID: {appointment_id}.",
            ),
            (
                AlertKind::Reminder,
                "Appointment reminder from {hospital_name}",
                "Dear {patient_name}, this is a reminder of your appointment with {doctor_name} on {appointment_date} at {appointment_time}.",
            ),
            (
                AlertKind::Delay,
                "Schedule update from {hospital_name}",
                "{doctor_name} is running {estimated_delay} late for your appointment on {appointment_date} at {appointment_time}. We apologize for the inconvenience.",
            ),
            (
                AlertKind::Cancellation,
                "Appointment cancelled at {hospital_name}",
                "Your appointment with {doctor_name} on {appointment_date} at {appointment_time} has been cancelled. Reason: {reason}.",
            ),
            (
                AlertKind::Emergency,
                "Urgent alert from {hospital_name}",
                "Your appointment with {doctor_name} on {appointment_date} at {appointment_time} is affected by an emergency. We will contact you with new available times.",
            ),
        ]
        .into_iter()
        .map(|(kind, subject, body)| {
            (
                kind,
                Template {
                    subject: subject.to_string(),
                    body: body.to_string(),
                },
            )
        })
        .collect();

        Self {
            hospital_name: hospital_name.into(),
            templates,
        }
    }

    pub fn with_template(mut self, kind: AlertKind, subject: impl Into<String>, body: impl Into<String>) -> Self {
        self.templates.insert(
            kind,
            Template {
                subject: subject.into(),
                body: body.into(),
            },
        );
        self
    }

    /// Render an alert for one recipient. An explicit payload message replaces the body.
    pub fn render(&self, alert: &Alert, recipient: &PatientContact) -> TemplatedMessage {
        let mut fields = alert.payload.fields.clone();
        fields
            .entry("patient_name")
            .or_insert_with(|| Value::String(recipient.name.clone()));
        fields
            .entry("hospital_name")
            .or_insert_with(|| Value::String(self.hospital_name.clone()));
        if let Some(message) = &alert.payload.message {
            fields
                .entry("message")
                .or_insert_with(|| Value::String(message.clone()));
        }
        if let Some(appointment_id) = &alert.source_appointment_id {
            fields
                .entry("appointment_id")
                .or_insert_with(|| Value::String(appointment_id.to_string()));
        }

        let (subject, body) = match self.templates.get(&alert.kind) {
            Some(template) => (substitute(&template.subject, &fields), substitute(&template.body, &fields)),
            None => (self.hospital_name.clone(), String::new()),
        };

        TemplatedMessage {
            subject,
            body: alert.payload.message.clone().unwrap_or(body),
            fields,
        }
    }
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self::new("City General Hospital")
    }
}

/// Replace every `{key}` whose key is present; unknown placeholders stay as written.
pub fn substitute(template: &str, fields: &Map<String, Value>) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match fields.get(key) {
                    Some(Value::String(text)) => rendered.push_str(text),
                    Some(value) => rendered.push_str(&value.to_string()),
                    None => {
                        rendered.push('{');
                        rendered.push_str(key);
                        rendered.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                rendered.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    rendered.push_str(rest);
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use crate::models::{AlertPayload, AlertPriority, AlertRequest};

    fn alert(payload: AlertPayload) -> Alert {
        let now = Utc::now();
        Alert::from_request(
            AlertRequest::new(AlertKind::Delay, AlertPriority::High, payload),
            now,
            now,
        )
    }

    #[test]
    fn test_substitute_keeps_unknown_placeholders() {
        let mut fields = Map::new();
        fields.insert("doctor_name".into(), json!("Dr. Smith"));
        fields.insert("delay".into(), json!(20));

        assert_eq!(
            substitute("{doctor_name} is {delay} min late, see {room}", &fields),
            "Dr. Smith is 20 min late, see {room}"
        );
        assert_eq!(substitute("unbalanced {brace", &fields), "unbalanced {brace");
    }

    #[test]
    fn test_render_delay_template() {
        let payload = AlertPayload::new()
            .with_field("doctor_name", "Dr. Smith")
            .with_field("estimated_delay", "20 minutes")
            .with_field("appointment_date", "2025-01-15")
            .with_field("appointment_time", "10:00");
        let message = MessageTemplates::new("Riverside Clinic").render(&alert(payload), &PatientContact::new("Ana"));

        assert_eq!(message.subject, "Schedule update from Riverside Clinic");
        assert_eq!(
            message.body,
            "Dr. Smith is running 20 minutes late for your appointment on 2025-01-15 at 10:00. We apologize for the inconvenience."
        );
        assert_eq!(message.fields["patient_name"], json!("Ana"));
    }

    #[test]
    fn test_explicit_message_overrides_body() {
        let payload = AlertPayload::new().with_message("Please call the front desk.");
        let message = MessageTemplates::default().render(&alert(payload), &PatientContact::new("Ana"));

        assert_eq!(message.body, "Please call the front desk.");
        assert_eq!(message.subject, "Schedule update from City General Hospital");
    }
}
