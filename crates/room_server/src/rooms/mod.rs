//! Room lifecycle and join admission.

pub mod admission;
pub mod manager;

pub use admission::{AdmissionControl, AdmissionGuard, AdmissionScope};
pub use manager::{LeaveOutcome, RoomManager};
