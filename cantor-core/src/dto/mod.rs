//! Data Transfer Objects for polling clients
//!
//! Read-only snapshots handed out by the engine. They are built from the
//! store's view at a single instant and never feed back into it.

pub mod job;
pub mod stats;
