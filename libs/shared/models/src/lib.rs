pub mod channel;
pub mod contact;
pub mod ids;

pub use channel::Channel;
pub use contact::PatientContact;
pub use ids::{AppointmentId, DoctorId};
