//! Scheduler layer
//!
//! Bounds how many job pipelines run at once. Jobs are admitted into a
//! bounded wait queue and only start once an execution slot frees up.

pub mod admission;

pub use admission::{ExecutionSlot, QueueTicket, Reservation, Scheduler};
