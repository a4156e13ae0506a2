pub mod availability;
pub mod calendar;

pub use availability::{day_slots, AvailabilityResolver, DayAvailability, DaySlots};
pub use calendar::{CalendarStore, DoctorSnapshot};
