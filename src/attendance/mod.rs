//! Attendance state resolution: schedule lookup (including overnight
//! shifts), best-effort leave checks, the attendance record store and the
//! clock-in/clock-out state machine, plus the photo evidence binder.

pub mod engine;
pub mod leave;
pub mod photo;
pub mod schedule;
pub mod store;
