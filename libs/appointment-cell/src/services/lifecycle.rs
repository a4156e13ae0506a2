// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::models::{AppointmentError, AppointmentStatus};

/// Appointment state machine.
///
/// `Rescheduled` is a self-loop: the row keeps its status and records the
/// move in its audit trail.
pub struct AppointmentLifecycleService;

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Scheduled => vec![
                AppointmentStatus::Confirmed,
                AppointmentStatus::Rescheduled,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
                AppointmentStatus::Completed,
            ],
            AppointmentStatus::Confirmed => vec![
                AppointmentStatus::Rescheduled,
                AppointmentStatus::Cancelled,
                AppointmentStatus::Completed,
                AppointmentStatus::NoShow,
            ],
            // Terminal states - no transitions allowed
            AppointmentStatus::Rescheduled
            | AppointmentStatus::Cancelled
            | AppointmentStatus::Completed
            | AppointmentStatus::NoShow => vec![],
        }
    }

    /// Status held after the transition is applied.
    pub fn resulting_status(&self, current_status: AppointmentStatus, transition: AppointmentStatus) -> AppointmentStatus {
        match transition {
            AppointmentStatus::Rescheduled => current_status,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use AppointmentStatus::*;

    #[test]
    fn test_nothing_returns_to_scheduled() {
        let lifecycle = AppointmentLifecycleService::new();

        for status in [Scheduled, Confirmed, Rescheduled, Cancelled, Completed, NoShow] {
            assert!(!lifecycle.get_valid_transitions(status).contains(&Scheduled));
        }
    }

    #[test]
    fn test_confirm_only_from_scheduled() {
        let lifecycle = AppointmentLifecycleService::new();

        assert!(lifecycle.validate_status_transition(Scheduled, Confirmed).is_ok());
        assert_matches!(
            lifecycle.validate_status_transition(Confirmed, Confirmed),
            Err(AppointmentError::InvalidTransition { from: Confirmed, to: Confirmed })
        );
        assert_matches!(
            lifecycle.validate_status_transition(Cancelled, Completed),
            Err(AppointmentError::InvalidTransition { .. })
        );
    }

    #[test]
    fn test_reschedule_keeps_status() {
        let lifecycle = AppointmentLifecycleService::new();

        assert_eq!(lifecycle.resulting_status(Confirmed, Rescheduled), Confirmed);
        assert_eq!(lifecycle.resulting_status(Scheduled, Cancelled), Cancelled);
    }
}
