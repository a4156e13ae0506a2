// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use alert_cell::DispatchError;
use doctor_cell::{CalendarError, Interval, TimeSlot};
use shared_config::AppConfig;
use shared_models::{AppointmentId, DoctorId, PatientContact};

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub patient: PatientContact,
    pub doctor_id: DoctorId,
    pub doctor_name: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub audit: Vec<AuditEntry>,
}

impl Appointment {
    pub fn interval(&self) -> Interval {
        Interval::from_minutes(self.date, self.start_time, self.duration_minutes)
    }

    /// Holds its interval in the calendar.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Rescheduled,
    Cancelled,
    Completed,
    NoShow,
}

impl AppointmentStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Rescheduled => write!(f, "rescheduled"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

/// One recorded transition. Reschedules keep the prior date and time here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub transition: AppointmentStatus,
    pub from_status: AppointmentStatus,
    pub previous_date: Option<NaiveDate>,
    pub previous_start_time: Option<NaiveTime>,
    pub note: Option<String>,
}

// ==============================================================================
// REQUEST / FILTER MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub doctor_id: DoctorId,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    /// Defaults to the doctor's slot duration for that date.
    pub duration_minutes: Option<u32>,
    pub patient: PatientContact,
    pub notes: Option<String>,
}

impl ScheduleRequest {
    pub fn new(doctor_id: impl Into<String>, date: NaiveDate, start_time: NaiveTime, patient: PatientContact) -> Self {
        Self {
            doctor_id: DoctorId::new(doctor_id),
            date,
            start_time,
            duration_minutes: None,
            patient,
            notes: None,
        }
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppointmentFilter {
    pub doctor_id: Option<DoctorId>,
    pub date: Option<NaiveDate>,
    pub patient_phone: Option<String>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.doctor_id.as_ref().map_or(true, |id| &appointment.doctor_id == id)
            && self.date.map_or(true, |date| appointment.date == date)
            && self
                .patient_phone
                .as_deref()
                .map_or(true, |phone| appointment.patient.phone.as_deref() == Some(phone))
            && self.status.map_or(true, |status| appointment.status == status)
    }
}

// ==============================================================================
// CONFLICT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    Reject,
    OfferAlternatives,
    /// An operator approved booking over the conflict. Never chosen by the engine itself.
    ForceOverrideWithApproval,
}

/// Result of a booking attempt that did not fit. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub doctor_id: DoctorId,
    pub requested: Interval,
    pub conflicting_appointments: Vec<AppointmentId>,
    pub resolution: ConflictResolution,
    pub alternatives: Vec<TimeSlot>,
}

// ==============================================================================
// POLICY
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPolicy {
    pub max_alternatives: usize,
    pub lookahead_business_days: u32,
    /// Calendar days searched for the next business days.
    pub business_day_horizon: u32,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for BookingPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_alternatives: config.booking_max_alternatives,
            lookahead_business_days: config.booking_lookahead_business_days,
            business_day_horizon: 14,
        }
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppointmentError {
    #[error("Unknown doctor: {0}")]
    UnknownDoctor(DoctorId),

    #[error("Invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("Requested slot conflicts with existing bookings ({} alternatives offered)", .0.alternatives.len())]
    SlotConflict(Box<ConflictRecord>),

    #[error("Appointment cannot move from {from} to {to}")]
    InvalidTransition { from: AppointmentStatus, to: AppointmentStatus },

    #[error("Appointment not found: {0}")]
    NotFound(AppointmentId),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Calendar(CalendarError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl From<CalendarError> for AppointmentError {
    fn from(error: CalendarError) -> Self {
        match error {
            CalendarError::UnknownDoctor(id) => AppointmentError::UnknownDoctor(id),
            CalendarError::InvalidRange { start, end } => AppointmentError::InvalidRange { start, end },
            other => AppointmentError::Calendar(other),
        }
    }
}

impl AppointmentError {
    pub fn conflict(&self) -> Option<&ConflictRecord> {
        match self {
            AppointmentError::SlotConflict(record) => Some(record),
            _ => None,
        }
    }
}
