use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::{AppointmentId, DoctorId, PatientContact};

use crate::error::CalendarError;

/// Working window for one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_minutes: u32,
}

impl DayHours {
    pub fn new(start_time: NaiveTime, end_time: NaiveTime, slot_minutes: u32) -> Self {
        Self { start_time, end_time, slot_minutes }
    }

    pub fn validate(&self) -> Result<(), CalendarError> {
        if self.start_time >= self.end_time {
            return Err(CalendarError::InvalidSchedule(
                "Start time must be before end time".to_string(),
            ));
        }
        if self.slot_minutes == 0 {
            return Err(CalendarError::InvalidSchedule(
                "Slot duration must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn slot_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.slot_minutes))
    }
}

/// Weekly template, indexed from Monday.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    days: [Option<DayHours>; 7],
}

impl WorkingHours {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same hours on every listed weekday.
    pub fn uniform(weekdays: &[Weekday], hours: DayHours) -> Self {
        let mut template = Self::default();
        for weekday in weekdays {
            template.set(*weekday, Some(hours));
        }
        template
    }

    pub fn with_day(mut self, weekday: Weekday, hours: DayHours) -> Self {
        self.set(weekday, Some(hours));
        self
    }

    pub fn set(&mut self, weekday: Weekday, hours: Option<DayHours>) {
        self.days[weekday.num_days_from_monday() as usize] = hours;
    }

    pub fn for_weekday(&self, weekday: Weekday) -> Option<&DayHours> {
        self.days[weekday.num_days_from_monday() as usize].as_ref()
    }

    pub fn for_date(&self, date: NaiveDate) -> Option<&DayHours> {
        self.for_weekday(date.weekday())
    }

    pub fn validate(&self) -> Result<(), CalendarError> {
        self.days.iter().flatten().try_for_each(DayHours::validate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: DoctorId,
    pub name: String,
    pub department: String,
    pub specialization: Option<String>,
    pub working_hours: WorkingHours,
    pub timezone: String,
    /// Where doctor-facing alerts are sent.
    #[serde(default)]
    pub contact: Option<PatientContact>,
}

impl Doctor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, department: impl Into<String>) -> Self {
        Self {
            id: DoctorId::new(id),
            name: name.into(),
            department: department.into(),
            specialization: None,
            working_hours: WorkingHours::default(),
            timezone: "UTC".to_string(),
            contact: None,
        }
    }

    pub fn with_working_hours(mut self, working_hours: WorkingHours) -> Self {
        self.working_hours = working_hours;
        self
    }

    pub fn with_contact(mut self, contact: PatientContact) -> Self {
        self.contact = Some(contact);
        self
    }

    pub fn works_on(&self, date: NaiveDate) -> bool {
        self.working_hours.for_date(date).is_some()
    }
}

/// Half-open `[start, end)` interval on the doctor's local clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Interval {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn from_minutes(date: NaiveDate, start_time: NaiveTime, minutes: u32) -> Self {
        let start = date.and_time(start_time);
        Self { start, end: start + Duration::minutes(i64::from(minutes)) }
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &Interval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// A derived candidate slot. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub doctor_id: DoctorId,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
}

impl TimeSlot {
    pub fn interval(&self) -> Interval {
        Interval::from_minutes(self.date, self.start_time, self.duration_minutes)
    }

    pub fn start(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }
}

/// What occupies a busy interval in the calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum BusySource {
    Appointment(AppointmentId),
    Block(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub interval: Interval,
    pub source: BusySource,
}

/// Time a doctor is unavailable for reasons other than appointments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedInterval {
    pub id: Uuid,
    pub doctor_id: DoctorId,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub reason: Option<String>,
}

impl BlockedInterval {
    pub fn interval(&self) -> Interval {
        Interval::new(self.date.and_time(self.start_time), self.date.and_time(self.end_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 15)
            .and_then(|d| d.and_hms_opt(h, m, 0))
            .unwrap()
    }

    #[test]
    fn test_adjacent_intervals_do_not_overlap() {
        let first = Interval::new(at(10, 0), at(10, 30));
        let second = Interval::new(at(10, 30), at(11, 0));

        assert!(!first.overlaps(&second));
        assert!(!second.overlaps(&first));
        assert!(first.overlaps(&Interval::new(at(10, 29), at(10, 45))));
    }

    #[test]
    fn test_day_hours_validation() {
        let t = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();

        assert!(DayHours::new(t(9), t(17), 30).validate().is_ok());
        assert!(DayHours::new(t(17), t(9), 30).validate().is_err());
        assert!(DayHours::new(t(9), t(17), 0).validate().is_err());
    }

    #[test]
    fn test_working_hours_lookup_by_date() {
        let hours = DayHours::new(
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            30,
        );
        let template = WorkingHours::uniform(&[Weekday::Mon, Weekday::Wed], hours);

        // 2025-01-15 is a Wednesday, 2025-01-16 a Thursday
        assert!(template.for_date(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()).is_some());
        assert!(template.for_date(NaiveDate::from_ymd_opt(2025, 1, 16).unwrap()).is_none());
    }
}
