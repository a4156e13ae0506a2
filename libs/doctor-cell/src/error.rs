use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use shared_models::DoctorId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalendarError {
    #[error("Unknown doctor: {0}")]
    UnknownDoctor(DoctorId),

    #[error("Invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("Doctor already registered: {0}")]
    DuplicateDoctor(DoctorId),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Interval already occupied for doctor {0}")]
    IntervalOccupied(DoctorId),

    #[error("Blocked interval not found: {0}")]
    BlockNotFound(Uuid),
}
