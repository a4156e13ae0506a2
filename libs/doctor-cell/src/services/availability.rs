use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::{debug, instrument};

use shared_models::{AppointmentId, DoctorId};

use crate::error::CalendarError;
use crate::models::{Doctor, Interval, TimeSlot};
use crate::services::calendar::{CalendarStore, DoctorSnapshot};

/// Lazy, finite sequence of free slots for one doctor and date.
///
/// Built from a snapshot, so it never observes later mutations. Cloning (or
/// calling [`DaySlots::restart`]) yields the same sequence from the beginning.
#[derive(Debug, Clone)]
pub struct DaySlots {
    doctor_id: DoctorId,
    date: NaiveDate,
    origin: Option<NaiveDateTime>,
    cursor: Option<NaiveDateTime>,
    day_end: NaiveDateTime,
    step: Duration,
    slot_minutes: u32,
    busy: Arc<[Interval]>,
}

impl DaySlots {
    fn empty(doctor_id: DoctorId, date: NaiveDate) -> Self {
        Self {
            doctor_id,
            date,
            origin: None,
            cursor: None,
            day_end: NaiveDateTime::from(date),
            step: Duration::zero(),
            slot_minutes: 0,
            busy: Arc::from(Vec::new()),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn restart(&self) -> Self {
        Self {
            cursor: self.origin,
            ..self.clone()
        }
    }
}

impl Iterator for DaySlots {
    type Item = TimeSlot;

    fn next(&mut self) -> Option<TimeSlot> {
        loop {
            let start = self.cursor?;
            let end = start + self.step;
            if end > self.day_end {
                // Trailing partial slot
                self.cursor = None;
                return None;
            }
            self.cursor = Some(end);

            let candidate = Interval::new(start, end);
            if self.busy.iter().any(|busy| busy.overlaps(&candidate)) {
                continue;
            }

            return Some(TimeSlot {
                doctor_id: self.doctor_id.clone(),
                date: self.date,
                start_time: start.time(),
                duration_minutes: self.slot_minutes,
            });
        }
    }
}

/// Free slots for a date given the doctor's template and the busy intervals.
pub fn day_slots(doctor: &Doctor, date: NaiveDate, busy: Vec<Interval>) -> DaySlots {
    let Some(hours) = doctor.working_hours.for_date(date) else {
        return DaySlots::empty(doctor.id.clone(), date);
    };

    let origin = date.and_time(hours.start_time);
    DaySlots {
        doctor_id: doctor.id.clone(),
        date,
        origin: Some(origin),
        cursor: Some(origin),
        day_end: date.and_time(hours.end_time),
        step: hours.slot_duration(),
        slot_minutes: hours.slot_minutes,
        busy: Arc::from(busy),
    }
}

#[derive(Debug, Clone)]
pub struct DayAvailability {
    pub date: NaiveDate,
    slots: DaySlots,
}

impl DayAvailability {
    pub fn slots(&self) -> DaySlots {
        self.slots.restart()
    }

    pub fn to_vec(&self) -> Vec<TimeSlot> {
        self.slots().collect()
    }
}

/// Computes availability from the calendar store on every call.
pub struct AvailabilityResolver {
    store: Arc<CalendarStore>,
}

impl AvailabilityResolver {
    pub fn new(store: Arc<CalendarStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<CalendarStore> {
        &self.store
    }

    /// Free slots per date for an inclusive date range.
    #[instrument(skip(self))]
    pub async fn get_availability(
        &self,
        doctor_id: &DoctorId,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<DayAvailability>, CalendarError> {
        if start_date > end_date {
            return Err(CalendarError::InvalidRange { start: start_date, end: end_date });
        }

        let snapshot = self.store.snapshot(doctor_id, start_date, end_date).await?;
        let days: Vec<DayAvailability> = start_date
            .iter_days()
            .take_while(|date| *date <= end_date)
            .map(|date| DayAvailability {
                date,
                slots: Self::slots_from_snapshot(&snapshot, date, None),
            })
            .collect();

        debug!("Resolved availability for {} days", days.len());
        Ok(days)
    }

    pub async fn slots_for_date(&self, doctor_id: &DoctorId, date: NaiveDate) -> Result<DaySlots, CalendarError> {
        self.slots_excluding(doctor_id, date, None).await
    }

    /// Free slots on a date as if the given appointment were not booked.
    pub async fn slots_excluding(
        &self,
        doctor_id: &DoctorId,
        date: NaiveDate,
        exclude: Option<&AppointmentId>,
    ) -> Result<DaySlots, CalendarError> {
        let snapshot = self.store.snapshot(doctor_id, date, date).await?;
        Ok(Self::slots_from_snapshot(&snapshot, date, exclude))
    }

    pub fn slots_from_snapshot(
        snapshot: &DoctorSnapshot,
        date: NaiveDate,
        exclude: Option<&AppointmentId>,
    ) -> DaySlots {
        day_slots(&snapshot.doctor, date, snapshot.busy_on(date, exclude))
    }
}
