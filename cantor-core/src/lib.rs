//! Cantor Core
//!
//! Core types shared by the cantor engine and its command-line front end.
//!
//! This crate contains:
//! - Domain types: jobs, their status machine and stage weighting
//! - DTOs: point-in-time reports handed to polling clients

pub mod domain;
pub mod dto;
