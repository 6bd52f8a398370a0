//! Core domain types
//!
//! The job record and the rules for moving it through its lifecycle live here.
//! They are shared by the store (which owns records) and the pipeline runner
//! (which drives them forward).

pub mod job;
pub mod stage;
