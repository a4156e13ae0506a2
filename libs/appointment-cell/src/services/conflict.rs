use chrono::{Duration, NaiveDate, NaiveTime};
use tracing::debug;

use doctor_cell::{AvailabilityResolver, BusySource, DoctorSnapshot, Interval, TimeSlot};
use shared_models::AppointmentId;

use crate::models::{BookingPolicy, ConflictRecord, ConflictResolution};

/// Builds conflict records and ranks alternative slots.
pub struct ConflictDetectionService {
    policy: BookingPolicy,
}

impl ConflictDetectionService {
    pub fn new(policy: BookingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    /// Whether a single free slot fully contains the requested interval.
    pub fn is_free(snapshot: &DoctorSnapshot, requested: &Interval, exclude: Option<&AppointmentId>) -> bool {
        let date = requested.start.date();
        AvailabilityResolver::slots_from_snapshot(snapshot, date, exclude)
            .any(|slot| slot.interval().contains(requested))
    }

    pub fn build_conflict(
        &self,
        snapshot: &DoctorSnapshot,
        requested: Interval,
        exclude: Option<&AppointmentId>,
    ) -> ConflictRecord {
        let date = requested.start.date();
        let conflicting_appointments = snapshot
            .busy
            .get(&date)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.interval.overlaps(&requested))
                    .filter_map(|entry| match &entry.source {
                        BusySource::Appointment(id) if Some(id) != exclude => Some(id.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let alternatives = self.find_alternatives(snapshot, &requested, exclude);
        let resolution = if alternatives.is_empty() {
            ConflictResolution::Reject
        } else {
            ConflictResolution::OfferAlternatives
        };

        debug!(
            doctor_id = %snapshot.doctor.id,
            "Conflict at {} with {} alternatives",
            requested.start,
            alternatives.len()
        );

        ConflictRecord {
            doctor_id: snapshot.doctor.id.clone(),
            requested,
            conflicting_appointments,
            resolution,
            alternatives,
        }
    }

    /// Nearest free slots that would accept the requested duration.
    ///
    /// Same-date slots come first, ranked by distance from the requested start
    /// with earlier winning ties. The following business days are then searched
    /// in order, each ranked by distance to the requested time of day.
    pub fn find_alternatives(
        &self,
        snapshot: &DoctorSnapshot,
        requested: &Interval,
        exclude: Option<&AppointmentId>,
    ) -> Vec<TimeSlot> {
        let limit = self.policy.max_alternatives;
        if limit == 0 {
            return Vec::new();
        }

        let minutes = u32::try_from(requested.minutes()).unwrap_or(0);
        let date = requested.start.date();
        let time = requested.start.time();

        // A moving appointment is never offered its own current time
        let own: Vec<Interval> = exclude
            .map(|id| {
                snapshot
                    .busy
                    .values()
                    .flatten()
                    .filter(|entry| entry.source == BusySource::Appointment(id.clone()))
                    .map(|entry| entry.interval)
                    .collect()
            })
            .unwrap_or_default();

        let mut alternatives = self.ranked_for_date(snapshot, date, time, minutes, requested, exclude, &own);
        alternatives.truncate(limit);

        let business_days = (1..=self.policy.business_day_horizon)
            .filter_map(|offset| date.checked_add_days(chrono::Days::new(u64::from(offset))))
            .filter(|day| snapshot.doctor.works_on(*day))
            .take(self.policy.lookahead_business_days as usize);

        for day in business_days {
            if alternatives.len() >= limit {
                break;
            }
            let ranked = self.ranked_for_date(snapshot, day, time, minutes, requested, exclude, &own);
            alternatives.extend(ranked.into_iter().take(limit - alternatives.len()));
        }

        alternatives
    }

    #[allow(clippy::too_many_arguments)]
    fn ranked_for_date(
        &self,
        snapshot: &DoctorSnapshot,
        date: NaiveDate,
        time: NaiveTime,
        minutes: u32,
        requested: &Interval,
        exclude: Option<&AppointmentId>,
        own: &[Interval],
    ) -> Vec<TimeSlot> {
        let mut candidates: Vec<TimeSlot> = AvailabilityResolver::slots_from_snapshot(snapshot, date, exclude)
            .filter(|slot| slot.duration_minutes >= minutes)
            .map(|slot| TimeSlot {
                duration_minutes: minutes,
                ..slot
            })
            .filter(|slot| slot.interval() != *requested)
            .filter(|slot| own.iter().all(|current| !current.overlaps(&slot.interval())))
            .collect();

        candidates.sort_by_key(|slot| (distance(slot.start_time, time), slot.start_time));
        candidates
    }
}

fn distance(a: NaiveTime, b: NaiveTime) -> Duration {
    (a - b).abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use chrono::Weekday;
    use doctor_cell::{BusyInterval, DayHours, Doctor, WorkingHours};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn wednesday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
    }

    fn snapshot(busy: Vec<(NaiveDate, NaiveTime)>) -> DoctorSnapshot {
        let template = WorkingHours::uniform(
            &[Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
            DayHours::new(t(10, 0), t(12, 0), 30),
        );
        let mut map: BTreeMap<NaiveDate, Vec<BusyInterval>> = BTreeMap::new();
        for (i, (date, time)) in busy.into_iter().enumerate() {
            map.entry(date).or_default().push(BusyInterval {
                interval: Interval::from_minutes(date, time, 30),
                source: BusySource::Appointment(AppointmentId(format!("APT_{}", i))),
            });
        }
        DoctorSnapshot {
            doctor: Doctor::new("dr-d", "Dr. D", "General").with_working_hours(template),
            busy: map,
        }
    }

    #[test]
    fn test_same_day_alternatives_nearest_first() {
        let snapshot = snapshot(vec![(wednesday(), t(10, 0))]);
        let service = ConflictDetectionService::new(BookingPolicy::default());
        let requested = Interval::from_minutes(wednesday(), t(10, 0), 30);

        let record = service.build_conflict(&snapshot, requested, None);
        let starts: Vec<_> = record.alternatives.iter().map(|s| s.start_time).collect();

        assert_eq!(starts, vec![t(10, 30), t(11, 0), t(11, 30)]);
        assert_eq!(record.resolution, ConflictResolution::OfferAlternatives);
        assert_eq!(record.conflicting_appointments, vec![AppointmentId::from("APT_0")]);
    }

    #[test]
    fn test_earlier_slot_wins_tie() {
        let snapshot = snapshot(vec![(wednesday(), t(11, 0))]);
        let service = ConflictDetectionService::new(BookingPolicy {
            max_alternatives: 2,
            ..BookingPolicy::default()
        });

        let alternatives =
            service.find_alternatives(&snapshot, &Interval::from_minutes(wednesday(), t(11, 0), 30), None);
        let starts: Vec<_> = alternatives.iter().map(|s| s.start_time).collect();

        assert_eq!(starts, vec![t(10, 30), t(11, 30)]);
    }

    #[test]
    fn test_full_day_spills_into_next_business_days() {
        // Friday fully booked, next business days are Monday and Tuesday
        let friday = NaiveDate::from_ymd_opt(2025, 1, 17).unwrap();
        let monday = NaiveDate::from_ymd_opt(2025, 1, 20).unwrap();
        let busy = [t(10, 0), t(10, 30), t(11, 0), t(11, 30)]
            .into_iter()
            .map(|time| (friday, time))
            .chain([(monday, t(11, 0))])
            .collect();
        let snapshot = snapshot(busy);
        let service = ConflictDetectionService::new(BookingPolicy::default());

        let alternatives =
            service.find_alternatives(&snapshot, &Interval::from_minutes(friday, t(11, 0), 30), None);
        let found: Vec<_> = alternatives.iter().map(|s| (s.date, s.start_time)).collect();

        assert_eq!(found, vec![(monday, t(10, 30)), (monday, t(11, 30)), (monday, t(10, 0))]);
    }

    #[test]
    fn test_moving_appointment_is_not_offered_its_own_slot() {
        // APT_0 sits at 10:00 and tries to move onto APT_1 at 11:00
        let snapshot = snapshot(vec![(wednesday(), t(10, 0)), (wednesday(), t(11, 0))]);
        let service = ConflictDetectionService::new(BookingPolicy {
            lookahead_business_days: 0,
            ..BookingPolicy::default()
        });
        let moving = AppointmentId::from("APT_0");

        let record = service.build_conflict(
            &snapshot,
            Interval::from_minutes(wednesday(), t(11, 0), 30),
            Some(&moving),
        );
        let starts: Vec<_> = record.alternatives.iter().map(|s| s.start_time).collect();

        assert_eq!(starts, vec![t(10, 30), t(11, 30)]);
        assert_eq!(record.conflicting_appointments, vec![AppointmentId::from("APT_1")]);
    }

    #[test]
    fn test_no_free_time_rejects() {
        let day = wednesday();
        let busy = [t(10, 0), t(10, 30), t(11, 0), t(11, 30)]
            .into_iter()
            .map(|time| (day, time))
            .collect();
        let service = ConflictDetectionService::new(BookingPolicy {
            lookahead_business_days: 0,
            ..BookingPolicy::default()
        });

        let record = service.build_conflict(&snapshot(busy), Interval::from_minutes(day, t(10, 0), 30), None);
        assert_eq!(record.resolution, ConflictResolution::Reject);
        assert!(record.alternatives.is_empty());
    }
}
