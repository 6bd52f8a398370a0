//! Service layer
//!
//! Services hold the engine's business logic: running admitted jobs through
//! their stages, accepting and querying jobs, and expiring old ones. They
//! work on the job store and the scheduler handed to them at construction.
//!
//! Services are trait-based where a seam is useful for testing.

mod jobs;
mod pipeline;
mod reaper;

// Re-export traits
pub use pipeline::PipelineRunner;

// Re-export implementations
pub use jobs::JobService;
pub use pipeline::{StageExecutors, StandardPipelineRunner};
pub use reaper::{ExpiryReaper, ReaperConfig};
