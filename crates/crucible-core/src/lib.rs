//! Crucible CI Core
//!
//! Core domain types, traits, and error handling for Crucible CI.
//! This crate performs no I/O; it defines the shared vocabulary used by the
//! store implementations and the submission pipeline.

pub mod descriptor;
pub mod error;
pub mod ids;
pub mod naming;
pub mod ports;
pub mod repository;
pub mod run;
pub mod submission;
pub mod task;

pub use error::{Error, Result};
pub use ids::*;
