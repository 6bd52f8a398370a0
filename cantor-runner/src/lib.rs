//! Cantor Runner
//!
//! The job engine behind `cantor`: accepts vocal-extraction jobs, bounds how
//! many run at once, drives each job through its stages while composing a
//! global progress value, and reclaims disk space once jobs expire.
//!
//! Architecture:
//! - Repository: the in-memory job store, the single source of truth for status
//! - Scheduler: execution slots and the bounded wait queue
//! - Stage: the stage executor contract plus the yt-dlp and demucs executors
//! - Service: pipeline runner, job intake and the expiry reaper
//!
//! Components are constructed explicitly and handed to each other by `Arc`;
//! there is no global state.

pub mod config;
pub mod error;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod stage;

pub use config::Config;
