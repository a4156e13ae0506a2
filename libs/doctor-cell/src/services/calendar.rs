use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDate, NaiveTime, Weekday};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_models::{AppointmentId, DoctorId};

use crate::error::CalendarError;
use crate::models::{BlockedInterval, BusyInterval, BusySource, DayHours, Doctor, Interval};

struct DoctorCalendar {
    doctor: Doctor,
    // Kept sorted by interval start per date
    busy: BTreeMap<NaiveDate, Vec<BusyInterval>>,
    blocks: HashMap<Uuid, BlockedInterval>,
}

impl DoctorCalendar {
    fn new(doctor: Doctor) -> Self {
        Self {
            doctor,
            busy: BTreeMap::new(),
            blocks: HashMap::new(),
        }
    }

    fn is_free(&self, date: NaiveDate, interval: &Interval) -> bool {
        self.busy
            .get(&date)
            .map_or(true, |entries| entries.iter().all(|entry| !entry.interval.overlaps(interval)))
    }

    fn insert(&mut self, date: NaiveDate, entry: BusyInterval) {
        let entries = self.busy.entry(date).or_default();
        let position = entries.partition_point(|existing| existing.interval.start <= entry.interval.start);
        entries.insert(position, entry);
    }

    fn remove(&mut self, source: &BusySource) -> bool {
        let mut removed = false;
        self.busy.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|entry| &entry.source != source);
            removed |= entries.len() != before;
            !entries.is_empty()
        });
        removed
    }
}

/// Immutable copy of one doctor's template and busy intervals over a date range.
#[derive(Debug, Clone)]
pub struct DoctorSnapshot {
    pub doctor: Doctor,
    pub busy: BTreeMap<NaiveDate, Vec<BusyInterval>>,
}

impl DoctorSnapshot {
    /// Busy intervals on a date, optionally ignoring one appointment.
    pub fn busy_on(&self, date: NaiveDate, exclude: Option<&AppointmentId>) -> Vec<Interval> {
        self.busy
            .get(&date)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| match (&entry.source, exclude) {
                        (BusySource::Appointment(id), Some(excluded)) => id != excluded,
                        _ => true,
                    })
                    .map(|entry| entry.interval)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Doctor templates plus the booked and blocked interval sets.
///
/// Booked intervals are written only by the booking engine while it holds the
/// doctor's lock; readers take snapshots.
pub struct CalendarStore {
    calendars: RwLock<HashMap<DoctorId, DoctorCalendar>>,
}

impl Default for CalendarStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CalendarStore {
    pub fn new() -> Self {
        Self {
            calendars: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_doctor(&self, doctor: Doctor) -> Result<(), CalendarError> {
        doctor.working_hours.validate()?;

        let mut calendars = self.calendars.write().await;
        if calendars.contains_key(&doctor.id) {
            return Err(CalendarError::DuplicateDoctor(doctor.id));
        }

        info!(doctor_id = %doctor.id, department = %doctor.department, "Registered doctor");
        calendars.insert(doctor.id.clone(), DoctorCalendar::new(doctor));
        Ok(())
    }

    pub async fn get_doctor(&self, doctor_id: &DoctorId) -> Result<Doctor, CalendarError> {
        let calendars = self.calendars.read().await;
        calendars
            .get(doctor_id)
            .map(|calendar| calendar.doctor.clone())
            .ok_or_else(|| CalendarError::UnknownDoctor(doctor_id.clone()))
    }

    pub async fn list_doctors(&self, department: Option<&str>) -> Vec<Doctor> {
        let calendars = self.calendars.read().await;
        let mut doctors: Vec<Doctor> = calendars
            .values()
            .map(|calendar| &calendar.doctor)
            .filter(|doctor| department.map_or(true, |d| doctor.department.eq_ignore_ascii_case(d)))
            .cloned()
            .collect();
        doctors.sort_by(|a, b| a.id.cmp(&b.id));
        doctors
    }

    /// Replace one weekday of the template; `None` marks the day off.
    ///
    /// Existing appointments are kept even if they fall outside the new hours.
    pub async fn update_schedule(
        &self,
        doctor_id: &DoctorId,
        weekday: Weekday,
        hours: Option<DayHours>,
    ) -> Result<Doctor, CalendarError> {
        if let Some(hours) = &hours {
            hours.validate()?;
        }

        let mut calendars = self.calendars.write().await;
        let calendar = calendars
            .get_mut(doctor_id)
            .ok_or_else(|| CalendarError::UnknownDoctor(doctor_id.clone()))?;

        calendar.doctor.working_hours.set(weekday, hours);
        info!(doctor_id = %doctor_id, weekday = ?weekday, "Updated doctor schedule");
        Ok(calendar.doctor.clone())
    }

    pub async fn block_interval(
        &self,
        doctor_id: &DoctorId,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        reason: Option<String>,
    ) -> Result<BlockedInterval, CalendarError> {
        if start_time >= end_time {
            return Err(CalendarError::InvalidSchedule(
                "Blocked interval must end after it starts".to_string(),
            ));
        }

        let mut calendars = self.calendars.write().await;
        let calendar = calendars
            .get_mut(doctor_id)
            .ok_or_else(|| CalendarError::UnknownDoctor(doctor_id.clone()))?;

        let block = BlockedInterval {
            id: Uuid::new_v4(),
            doctor_id: doctor_id.clone(),
            date,
            start_time,
            end_time,
            reason,
        };

        calendar.insert(
            date,
            BusyInterval {
                interval: block.interval(),
                source: BusySource::Block(block.id),
            },
        );
        calendar.blocks.insert(block.id, block.clone());

        debug!(doctor_id = %doctor_id, block_id = %block.id, "Blocked interval on {}", date);
        Ok(block)
    }

    pub async fn unblock_interval(&self, doctor_id: &DoctorId, block_id: Uuid) -> Result<(), CalendarError> {
        let mut calendars = self.calendars.write().await;
        let calendar = calendars
            .get_mut(doctor_id)
            .ok_or_else(|| CalendarError::UnknownDoctor(doctor_id.clone()))?;

        if calendar.blocks.remove(&block_id).is_none() {
            return Err(CalendarError::BlockNotFound(block_id));
        }
        calendar.remove(&BusySource::Block(block_id));
        Ok(())
    }

    pub async fn list_blocks(&self, doctor_id: &DoctorId) -> Result<Vec<BlockedInterval>, CalendarError> {
        let calendars = self.calendars.read().await;
        let calendar = calendars
            .get(doctor_id)
            .ok_or_else(|| CalendarError::UnknownDoctor(doctor_id.clone()))?;

        let mut blocks: Vec<BlockedInterval> = calendar.blocks.values().cloned().collect();
        blocks.sort_by_key(|block| (block.date, block.start_time));
        Ok(blocks)
    }

    /// Record an appointment's interval. Fails if anything already occupies it.
    pub async fn reserve(
        &self,
        doctor_id: &DoctorId,
        appointment_id: &AppointmentId,
        interval: Interval,
    ) -> Result<(), CalendarError> {
        let date = interval.start.date();
        let mut calendars = self.calendars.write().await;
        let calendar = calendars
            .get_mut(doctor_id)
            .ok_or_else(|| CalendarError::UnknownDoctor(doctor_id.clone()))?;

        if !calendar.is_free(date, &interval) {
            warn!(doctor_id = %doctor_id, appointment_id = %appointment_id, "Reservation overlaps busy interval");
            return Err(CalendarError::IntervalOccupied(doctor_id.clone()));
        }

        calendar.insert(
            date,
            BusyInterval {
                interval,
                source: BusySource::Appointment(appointment_id.clone()),
            },
        );
        Ok(())
    }

    /// Drop an appointment's interval. Returns whether anything was removed.
    pub async fn release(&self, doctor_id: &DoctorId, appointment_id: &AppointmentId) -> Result<bool, CalendarError> {
        let mut calendars = self.calendars.write().await;
        let calendar = calendars
            .get_mut(doctor_id)
            .ok_or_else(|| CalendarError::UnknownDoctor(doctor_id.clone()))?;

        Ok(calendar.remove(&BusySource::Appointment(appointment_id.clone())))
    }

    /// Move an appointment's interval in one step: the old interval is ignored
    /// when checking the new one, and nothing changes on failure.
    pub async fn move_reservation(
        &self,
        doctor_id: &DoctorId,
        appointment_id: &AppointmentId,
        new_interval: Interval,
    ) -> Result<(), CalendarError> {
        let source = BusySource::Appointment(appointment_id.clone());
        let date = new_interval.start.date();

        let mut calendars = self.calendars.write().await;
        let calendar = calendars
            .get_mut(doctor_id)
            .ok_or_else(|| CalendarError::UnknownDoctor(doctor_id.clone()))?;

        let occupied = calendar.busy.get(&date).map_or(false, |entries| {
            entries
                .iter()
                .any(|entry| entry.source != source && entry.interval.overlaps(&new_interval))
        });
        if occupied {
            return Err(CalendarError::IntervalOccupied(doctor_id.clone()));
        }

        calendar.remove(&source);
        calendar.insert(date, BusyInterval { interval: new_interval, source });
        Ok(())
    }

    pub async fn snapshot(
        &self,
        doctor_id: &DoctorId,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<DoctorSnapshot, CalendarError> {
        if start_date > end_date {
            return Err(CalendarError::InvalidRange { start: start_date, end: end_date });
        }

        let calendars = self.calendars.read().await;
        let calendar = calendars
            .get(doctor_id)
            .ok_or_else(|| CalendarError::UnknownDoctor(doctor_id.clone()))?;

        let busy = calendar
            .busy
            .range(start_date..=end_date)
            .map(|(date, entries)| (*date, entries.clone()))
            .collect();

        Ok(DoctorSnapshot {
            doctor: calendar.doctor.clone(),
            busy,
        })
    }
}
