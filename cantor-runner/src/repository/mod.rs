//! Repository layer
//!
//! The job store owns every Job Record. Other components only see clones and
//! mutate records through the store's accessors, which never suspend and are
//! serialized behind a single lock.
//!
//! The store is trait-based to enable testing and alternative backends.

mod jobs;

pub use jobs::JobRepository;

pub use jobs::InMemoryJobRepository;
