use serde::{Deserialize, Serialize};

use crate::Channel;

/// Alert recipient reference (a patient, or a doctor) carried for routing only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientContact {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl PatientContact {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: None,
            email: None,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Address used on the given channel, if the patient has one.
    ///
    /// Voice and messaging both go to the phone number; the workflow webhook
    /// is keyed by phone and falls back to email.
    pub fn address_for(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Email => self.email.as_deref(),
            Channel::Messaging | Channel::Voice => self.phone.as_deref(),
            Channel::Webhook => self.phone.as_deref().or(self.email.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_for_channel() {
        let contact = PatientContact::new("Jane Roe").with_phone("+15550100");

        assert_eq!(contact.address_for(Channel::Messaging), Some("+15550100"));
        assert_eq!(contact.address_for(Channel::Voice), Some("+15550100"));
        assert_eq!(contact.address_for(Channel::Email), None);
        assert_eq!(contact.address_for(Channel::Webhook), Some("+15550100"));
    }
}
