//! Calwatch Core - change-driven calibration recalculation and telluric polling.
//!
//! This crate holds the orchestration logic. It is storage-agnostic: the
//! session, recalculation and telluric traits are implemented by the
//! `storage-sqlite` crate and the server.

pub mod calibrations;
pub mod constants;
pub mod errors;
pub mod events;
pub mod feed;
pub mod session;
pub mod tasks;
pub mod telluric;
pub mod topic;
pub mod utils;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
