// libs/appointment-cell/src/services/booking.rs
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Days, NaiveDate, NaiveTime, Utc, Weekday};
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use alert_cell::{AlertDispatcher, AlertKind, AlertPayload, AlertPriority, AlertRequest};
use doctor_cell::{AvailabilityResolver, CalendarError, CalendarStore, DayAvailability, Doctor, Interval};
use shared_models::{AppointmentId, Channel, DoctorId};

use crate::models::{
    Appointment, AppointmentError, AppointmentFilter, AppointmentStatus, AuditEntry, BookingPolicy,
    ConflictRecord, ScheduleRequest,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::locks::DoctorLocks;

static APPOINTMENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

const FALLBACK_SLOT_MINUTES: u32 = 30;

/// Validates and commits bookings against the calendar, one doctor at a time.
///
/// Every read-check-write runs under that doctor's lock. Alerts are raised
/// after the lock is released and never affect the booking result.
pub struct AppointmentBookingService {
    calendar: Arc<CalendarStore>,
    resolver: AvailabilityResolver,
    alerts: Arc<AlertDispatcher>,
    appointments: RwLock<HashMap<AppointmentId, Appointment>>,
    locks: DoctorLocks,
    conflict_service: ConflictDetectionService,
    lifecycle_service: AppointmentLifecycleService,
}

impl AppointmentBookingService {
    pub fn new(calendar: Arc<CalendarStore>, alerts: Arc<AlertDispatcher>, policy: BookingPolicy) -> Self {
        Self {
            resolver: AvailabilityResolver::new(Arc::clone(&calendar)),
            calendar,
            alerts,
            appointments: RwLock::new(HashMap::new()),
            locks: DoctorLocks::new(),
            conflict_service: ConflictDetectionService::new(policy),
            lifecycle_service: AppointmentLifecycleService::new(),
        }
    }

    pub fn calendar(&self) -> &Arc<CalendarStore> {
        &self.calendar
    }

    pub fn alerts(&self) -> &Arc<AlertDispatcher> {
        &self.alerts
    }

    pub async fn get_availability(
        &self,
        doctor_id: &DoctorId,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<DayAvailability>, AppointmentError> {
        Ok(self.resolver.get_availability(doctor_id, start_date, end_date).await?)
    }

    /// Book a new appointment, or fail with the alternatives on offer.
    #[instrument(skip(self, request), fields(doctor_id = %request.doctor_id, date = %request.date))]
    pub async fn schedule(&self, request: ScheduleRequest) -> Result<Appointment, AppointmentError> {
        let doctor = self.calendar.get_doctor(&request.doctor_id).await?;
        let duration = resolve_duration(&doctor, request.date, request.duration_minutes)?;
        let requested = Interval::from_minutes(request.date, request.start_time, duration);

        let outcome = {
            let _guard = self.locks.acquire(&doctor.id).await;
            self.commit_new(&doctor, &request, requested).await
        };

        match &outcome {
            Ok(appointment) => {
                info!(appointment_id = %appointment.id, "Appointment scheduled");
                self.emit(confirmation_alert(appointment)).await;
            }
            Err(AppointmentError::SlotConflict(record)) => {
                warn!("Requested slot {} is not available", requested.start);
                self.emit(schedule_conflict_alert(&doctor, &request, record)).await;
            }
            Err(_) => {}
        }
        outcome
    }

    async fn commit_new(
        &self,
        doctor: &Doctor,
        request: &ScheduleRequest,
        requested: Interval,
    ) -> Result<Appointment, AppointmentError> {
        let snapshot = self
            .calendar
            .snapshot(&doctor.id, request.date, self.horizon_end(request.date))
            .await?;

        if !ConflictDetectionService::is_free(&snapshot, &requested, None) {
            let record = self.conflict_service.build_conflict(&snapshot, requested, None);
            return Err(AppointmentError::SlotConflict(Box::new(record)));
        }

        let now = Utc::now();
        let id = AppointmentId::generate(now.naive_utc(), APPOINTMENT_SEQUENCE.fetch_add(1, Ordering::Relaxed));
        let reserved = self.calendar.reserve(&doctor.id, &id, requested).await;
        self.conflict_if_occupied(reserved, &doctor.id, requested, None).await?;

        let appointment = Appointment {
            id: id.clone(),
            patient: request.patient.clone(),
            doctor_id: doctor.id.clone(),
            doctor_name: doctor.name.clone(),
            date: request.date,
            start_time: request.start_time,
            duration_minutes: u32::try_from(requested.minutes()).unwrap_or_default(),
            status: AppointmentStatus::Scheduled,
            notes: request.notes.clone(),
            created_at: now,
            updated_at: now,
            audit: Vec::new(),
        };

        self.appointments.write().await.insert(id, appointment.clone());
        Ok(appointment)
    }

    /// Move an appointment, keeping its id. Nothing changes if the new time is taken.
    #[instrument(skip(self))]
    pub async fn reschedule(
        &self,
        appointment_id: &AppointmentId,
        new_date: NaiveDate,
        new_time: NaiveTime,
    ) -> Result<Appointment, AppointmentError> {
        let doctor_id = self.get_appointment(appointment_id).await?.doctor_id;

        let outcome = {
            let _guard = self.locks.acquire(&doctor_id).await;
            self.commit_move(appointment_id, new_date, new_time).await
        };

        match &outcome {
            Ok(appointment) => {
                info!(appointment_id = %appointment_id, "Appointment rescheduled");
                self.emit(rescheduled_alert(appointment)).await;
            }
            Err(AppointmentError::SlotConflict(record)) => {
                if let Ok(appointment) = self.get_appointment(appointment_id).await {
                    self.emit(reschedule_conflict_alert(&appointment, record)).await;
                }
            }
            Err(_) => {}
        }
        outcome
    }

    async fn commit_move(
        &self,
        appointment_id: &AppointmentId,
        new_date: NaiveDate,
        new_time: NaiveTime,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.get_appointment(appointment_id).await?;
        self.lifecycle_service
            .validate_status_transition(current.status, AppointmentStatus::Rescheduled)?;

        let requested = Interval::from_minutes(new_date, new_time, current.duration_minutes);
        let snapshot = self
            .calendar
            .snapshot(&current.doctor_id, new_date, self.horizon_end(new_date))
            .await?;

        if !ConflictDetectionService::is_free(&snapshot, &requested, Some(appointment_id)) {
            let record = self
                .conflict_service
                .build_conflict(&snapshot, requested, Some(appointment_id));
            return Err(AppointmentError::SlotConflict(Box::new(record)));
        }

        let moved = self
            .calendar
            .move_reservation(&current.doctor_id, appointment_id, requested)
            .await;
        self.conflict_if_occupied(moved, &current.doctor_id, requested, Some(appointment_id))
            .await?;

        let now = Utc::now();
        let mut appointments = self.appointments.write().await;
        let appointment = appointments
            .get_mut(appointment_id)
            .ok_or_else(|| AppointmentError::NotFound(appointment_id.clone()))?;

        appointment.audit.push(AuditEntry {
            at: now,
            transition: AppointmentStatus::Rescheduled,
            from_status: appointment.status,
            previous_date: Some(appointment.date),
            previous_start_time: Some(appointment.start_time),
            note: None,
        });
        appointment.status = self
            .lifecycle_service
            .resulting_status(appointment.status, AppointmentStatus::Rescheduled);
        appointment.date = new_date;
        appointment.start_time = new_time;
        appointment.updated_at = now;
        Ok(appointment.clone())
    }

    /// Cancel an appointment. Cancelling twice succeeds and raises one alert.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        appointment_id: &AppointmentId,
        reason: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let (appointment, changed) = self
            .apply_transition(appointment_id, AppointmentStatus::Cancelled, reason.clone())
            .await?;

        if changed {
            info!(appointment_id = %appointment_id, "Appointment cancelled");
            self.emit(cancellation_alert(&appointment, reason.as_deref())).await;
        }
        Ok(appointment)
    }

    pub async fn confirm(&self, appointment_id: &AppointmentId) -> Result<Appointment, AppointmentError> {
        let (appointment, _) = self
            .apply_transition(appointment_id, AppointmentStatus::Confirmed, None)
            .await?;
        Ok(appointment)
    }

    pub async fn complete(&self, appointment_id: &AppointmentId) -> Result<Appointment, AppointmentError> {
        let (appointment, _) = self
            .apply_transition(appointment_id, AppointmentStatus::Completed, None)
            .await?;
        Ok(appointment)
    }

    pub async fn mark_no_show(&self, appointment_id: &AppointmentId) -> Result<Appointment, AppointmentError> {
        let (appointment, _) = self
            .apply_transition(appointment_id, AppointmentStatus::NoShow, None)
            .await?;
        Ok(appointment)
    }

    /// Returns the appointment and whether its status actually changed.
    async fn apply_transition(
        &self,
        appointment_id: &AppointmentId,
        transition: AppointmentStatus,
        note: Option<String>,
    ) -> Result<(Appointment, bool), AppointmentError> {
        let doctor_id = self.get_appointment(appointment_id).await?.doctor_id;
        let _guard = self.locks.acquire(&doctor_id).await;

        let mut appointments = self.appointments.write().await;
        let appointment = appointments
            .get_mut(appointment_id)
            .ok_or_else(|| AppointmentError::NotFound(appointment_id.clone()))?;

        if transition == AppointmentStatus::Cancelled && appointment.status == AppointmentStatus::Cancelled {
            return Ok((appointment.clone(), false));
        }
        self.lifecycle_service
            .validate_status_transition(appointment.status, transition)?;

        let next = self.lifecycle_service.resulting_status(appointment.status, transition);
        if appointment.is_active() && !next.is_active() {
            self.calendar.release(&doctor_id, appointment_id).await?;
        }

        let now = Utc::now();
        appointment.audit.push(AuditEntry {
            at: now,
            transition,
            from_status: appointment.status,
            previous_date: None,
            previous_start_time: None,
            note,
        });
        appointment.status = next;
        appointment.updated_at = now;
        Ok((appointment.clone(), true))
    }

    pub async fn get_appointment(&self, appointment_id: &AppointmentId) -> Result<Appointment, AppointmentError> {
        self.appointments
            .read()
            .await
            .get(appointment_id)
            .cloned()
            .ok_or_else(|| AppointmentError::NotFound(appointment_id.clone()))
    }

    /// Matching appointments ordered by date, start time and id.
    pub async fn list_appointments(&self, filter: &AppointmentFilter) -> Vec<Appointment> {
        let mut appointments: Vec<Appointment> = self
            .appointments
            .read()
            .await
            .values()
            .filter(|appointment| filter.matches(appointment))
            .cloned()
            .collect();
        appointments.sort_by(|a, b| (a.date, a.start_time, &a.id).cmp(&(b.date, b.start_time, &b.id)));
        appointments
    }

    /// Notify every active appointment of a doctor on a date that the doctor is late.
    #[instrument(skip(self, reason))]
    pub async fn report_doctor_delay(
        &self,
        doctor_id: &DoctorId,
        date: NaiveDate,
        delay_minutes: u32,
        reason: Option<String>,
    ) -> Result<Vec<Uuid>, AppointmentError> {
        if delay_minutes == 0 {
            return Err(AppointmentError::Validation("Delay must be at least one minute".to_string()));
        }
        self.calendar.get_doctor(doctor_id).await?;

        let filter = AppointmentFilter {
            doctor_id: Some(doctor_id.clone()),
            date: Some(date),
            ..Default::default()
        };
        let affected: Vec<Appointment> = self
            .list_appointments(&filter)
            .await
            .into_iter()
            .filter(Appointment::is_active)
            .collect();

        let mut alert_ids = Vec::with_capacity(affected.len());
        for appointment in &affected {
            if let Some(id) = self.emit(delay_alert(appointment, delay_minutes, reason.as_deref())).await {
                alert_ids.push(id);
            }
        }

        info!("Reported {} minute delay to {} appointments", delay_minutes, alert_ids.len());
        Ok(alert_ids)
    }

    /// External alert trigger.
    ///
    /// An alert naming an appointment reaches that appointment's patient when no
    /// recipient is given, and picks up the appointment's template fields.
    #[instrument(skip(self, request), fields(kind = ?request.kind, priority = ?request.priority))]
    pub async fn raise_alert(&self, mut request: AlertRequest) -> Result<Uuid, AppointmentError> {
        if let Some(appointment_id) = request.source_appointment_id.clone() {
            let appointment = self.get_appointment(&appointment_id).await?;
            for (key, value) in appointment_payload(&appointment).fields {
                request.payload.fields.entry(key).or_insert(value);
            }
            if request.recipients.is_empty() {
                request.recipients.push(appointment.patient);
            }
        }
        Ok(self.alerts.raise(request).await?)
    }

    /// One alert per listed appointment, each sent to that appointment's patient.
    ///
    /// Unknown appointment ids are skipped. Returns the ids of the raised alerts.
    #[instrument(skip(self, payload, appointment_ids), fields(count = appointment_ids.len()))]
    pub async fn raise_bulk(
        &self,
        kind: AlertKind,
        priority: AlertPriority,
        payload: AlertPayload,
        appointment_ids: &[AppointmentId],
    ) -> Result<Vec<Uuid>, AppointmentError> {
        let mut alert_ids = Vec::with_capacity(appointment_ids.len());
        for appointment_id in appointment_ids {
            if let Err(AppointmentError::NotFound(_)) = self.get_appointment(appointment_id).await {
                warn!(appointment_id = %appointment_id, "Skipping unknown appointment in bulk alert");
                continue;
            }
            let request = AlertRequest::new(kind, priority, payload.clone()).for_appointment(appointment_id.clone());
            alert_ids.push(self.raise_alert(request).await?);
        }

        info!("Raised {} of {} bulk alerts", alert_ids.len(), appointment_ids.len());
        Ok(alert_ids)
    }

    /// Forward an existing alert to the doctor of its appointment.
    ///
    /// The copy is not linked to the appointment, so it never merges with the
    /// patient's alert. Defaults to email.
    #[instrument(skip(self, channels))]
    pub async fn notify_doctor(
        &self,
        alert_id: Uuid,
        channels: Option<Vec<Channel>>,
    ) -> Result<Uuid, AppointmentError> {
        let alert = self.alerts.get_dispatch_status(alert_id).await?.alert;
        let appointment_id = alert.source_appointment_id.clone().ok_or_else(|| {
            AppointmentError::Validation(format!("Alert {} is not linked to an appointment", alert_id))
        })?;
        let appointment = self.get_appointment(&appointment_id).await?;
        let doctor = self.calendar.get_doctor(&appointment.doctor_id).await?;
        let contact = doctor.contact.ok_or_else(|| {
            AppointmentError::Validation(format!("Doctor {} has no contact details", doctor.id))
        })?;

        let payload = alert
            .payload
            .clone()
            .with_field("alert_id", alert.id.to_string())
            .with_field("appointment_id", appointment.id.to_string());
        let request = AlertRequest::new(alert.kind, alert.priority, payload)
            .with_recipient(contact)
            .with_channels(channels.unwrap_or_else(|| vec![Channel::Email]));

        let doctor_alert_id = self.alerts.raise(request).await?;
        info!(alert_id = %alert_id, doctor_alert_id = %doctor_alert_id, "Forwarded alert to doctor");
        Ok(doctor_alert_id)
    }

    async fn emit(&self, request: AlertRequest) -> Option<Uuid> {
        match self.alerts.raise(request).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!("Failed to raise alert: {}", e);
                None
            }
        }
    }

    /// A concurrent block can take the interval after the availability check;
    /// report that the same way as any other conflict.
    async fn conflict_if_occupied(
        &self,
        outcome: Result<(), CalendarError>,
        doctor_id: &DoctorId,
        requested: Interval,
        exclude: Option<&AppointmentId>,
    ) -> Result<(), AppointmentError> {
        match outcome {
            Err(CalendarError::IntervalOccupied(_)) => {
                warn!(doctor_id = %doctor_id, "Interval {} was taken after the availability check", requested.start);
                let date = requested.start.date();
                let snapshot = self.calendar.snapshot(doctor_id, date, self.horizon_end(date)).await?;
                let record = self.conflict_service.build_conflict(&snapshot, requested, exclude);
                Err(AppointmentError::SlotConflict(Box::new(record)))
            }
            other => Ok(other?),
        }
    }

    fn horizon_end(&self, date: NaiveDate) -> NaiveDate {
        let days = u64::from(self.conflict_service.policy().business_day_horizon);
        date.checked_add_days(Days::new(days)).unwrap_or(date)
    }
}

fn resolve_duration(doctor: &Doctor, date: NaiveDate, requested: Option<u32>) -> Result<u32, AppointmentError> {
    let hours = doctor.working_hours.for_date(date);
    match (requested, hours) {
        (Some(0), _) => Err(AppointmentError::Validation("Duration must be positive".to_string())),
        (Some(minutes), Some(hours)) if minutes > hours.slot_minutes => Err(AppointmentError::Validation(format!(
            "Duration of {} minutes exceeds the {} minute slot",
            minutes, hours.slot_minutes
        ))),
        (Some(minutes), _) => Ok(minutes),
        (None, Some(hours)) => Ok(hours.slot_minutes),
        (None, None) => Ok([
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .into_iter()
        .find_map(|weekday| doctor.working_hours.for_weekday(weekday))
        .map_or(FALLBACK_SLOT_MINUTES, |hours| hours.slot_minutes)),
    }
}

// ==============================================================================
// ALERT PAYLOADS
// ==============================================================================

fn appointment_payload(appointment: &Appointment) -> AlertPayload {
    AlertPayload::new()
        .with_field("doctor_name", appointment.doctor_name.clone())
        .with_field("appointment_date", appointment.date.format("%Y-%m-%d").to_string())
        .with_field("appointment_time", appointment.start_time.format("%H:%M").to_string())
}

fn describe_alternatives(record: &ConflictRecord) -> String {
    if record.alternatives.is_empty() {
        return "No alternative times are available.".to_string();
    }
    let times: Vec<String> = record
        .alternatives
        .iter()
        .map(|slot| format!("{} {}", slot.date.format("%Y-%m-%d"), slot.start_time.format("%H:%M")))
        .collect();
    format!("Available alternatives: {}.", times.join(", "))
}

fn confirmation_alert(appointment: &Appointment) -> AlertRequest {
    AlertRequest::new(AlertKind::Confirmation, AlertPriority::Medium, appointment_payload(appointment))
        .for_appointment(appointment.id.clone())
        .with_recipient(appointment.patient.clone())
}

fn schedule_conflict_alert(doctor: &Doctor, request: &ScheduleRequest, record: &ConflictRecord) -> AlertRequest {
    let message = format!(
        "{} is not available on {} at {}. {}",
        doctor.name,
        request.date.format("%Y-%m-%d"),
        request.start_time.format("%H:%M"),
        describe_alternatives(record)
    );
    let payload = AlertPayload::new()
        .with_message(message)
        .with_field("doctor_name", doctor.name.clone())
        .with_field("appointment_date", request.date.format("%Y-%m-%d").to_string())
        .with_field("appointment_time", request.start_time.format("%H:%M").to_string());

    AlertRequest::new(AlertKind::Delay, AlertPriority::Low, payload).with_recipient(request.patient.clone())
}

fn rescheduled_alert(appointment: &Appointment) -> AlertRequest {
    let new_time = format!(
        "{} {}",
        appointment.date.format("%Y-%m-%d"),
        appointment.start_time.format("%H:%M")
    );
    let message = format!(
        "Your appointment with {} has been moved to {}.",
        appointment.doctor_name, new_time
    );
    let payload = appointment_payload(appointment)
        .with_message(message)
        .with_field("new_appointment_time", new_time);

    AlertRequest::new(AlertKind::Confirmation, AlertPriority::Medium, payload)
        .for_appointment(appointment.id.clone())
        .with_recipient(appointment.patient.clone())
}

fn reschedule_conflict_alert(appointment: &Appointment, record: &ConflictRecord) -> AlertRequest {
    let message = format!(
        "Your appointment with {} could not be moved and remains on {} at {}. {}",
        appointment.doctor_name,
        appointment.date.format("%Y-%m-%d"),
        appointment.start_time.format("%H:%M"),
        describe_alternatives(record)
    );

    AlertRequest::new(
        AlertKind::Delay,
        AlertPriority::Low,
        appointment_payload(appointment).with_message(message),
    )
    .for_appointment(appointment.id.clone())
    .with_recipient(appointment.patient.clone())
}

fn cancellation_alert(appointment: &Appointment, reason: Option<&str>) -> AlertRequest {
    let payload = appointment_payload(appointment).with_field("reason", reason.unwrap_or("not specified"));

    AlertRequest::new(AlertKind::Cancellation, AlertPriority::High, payload)
        .for_appointment(appointment.id.clone())
        .with_recipient(appointment.patient.clone())
}

fn delay_alert(appointment: &Appointment, delay_minutes: u32, reason: Option<&str>) -> AlertRequest {
    let mut payload =
        appointment_payload(appointment).with_field("estimated_delay", format!("{} minutes", delay_minutes));
    if let Some(reason) = reason {
        payload = payload.with_field("reason", reason);
    }

    AlertRequest::new(AlertKind::Delay, AlertPriority::High, payload)
        .for_appointment(appointment.id.clone())
        .with_recipient(appointment.patient.clone())
}
