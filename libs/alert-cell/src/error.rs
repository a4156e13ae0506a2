use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Alert not found: {0}")]
    AlertNotFound(Uuid),

    #[error("Invalid alert: {0}")]
    InvalidAlert(String),

    #[error("Dispatcher is shut down")]
    ShutDown,

    #[error("Dispatcher already started")]
    AlreadyStarted,
}

/// Failure reported by a channel adapter for one delivery attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel rejected message: {0}")]
    Rejected(String),

    #[error("Transient channel failure: {0}")]
    Transient(String),

    #[error("Channel did not respond within {0:?}")]
    Timeout(Duration),

    /// The owning alert's deadline passed before the task was delivered.
    #[error("Dispatch deadline elapsed")]
    DispatchTimeout,
}

impl ChannelError {
    pub fn is_retriable(&self) -> bool {
        !matches!(self, ChannelError::Rejected(_) | ChannelError::DispatchTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_failures_are_retried() {
        assert!(ChannelError::Transient("busy".into()).is_retriable());
        assert!(ChannelError::Timeout(Duration::from_secs(10)).is_retriable());
        assert!(!ChannelError::Rejected("bad address".into()).is_retriable());
        assert!(!ChannelError::DispatchTimeout.is_retriable());
    }
}
