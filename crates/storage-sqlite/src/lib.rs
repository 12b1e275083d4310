//! SQLite storage implementation for Calwatch.
//!
//! This crate provides all database-related functionality using Diesel ORM with SQLite.
//! It implements the traits defined in `calwatch-core` and contains:
//! - Database connection pooling, pooled transactional sessions and migrations
//! - The recalculation ledger behind `RecalculationService`
//! - The change outbox feeding the topics
//! - The telluric work queue
//!
//! # Architecture
//!
//! This crate is the only place in the application where Diesel dependencies exist.
//! `core` is database-agnostic and works with traits.
//!
//! ```text
//!         core (orchestration)
//!                  │
//!                  ▼
//!          storage-sqlite (this crate)
//!                  │
//!                  ▼
//!              SQLite DB
//! ```

pub mod db;
pub mod errors;
pub mod outbox;
pub mod recalculations;
pub mod schema;
pub mod session;
pub mod telluric;

#[cfg(test)]
mod test_support;

// Re-export database utilities
pub use db::{create_pool, get_connection, init, run_migrations, DbConnection, DbPool};

// Re-export storage errors and conversion helpers
pub use errors::{IntoCore, StorageError};

pub use outbox::{append_change, SqliteOutboxFeed};
pub use recalculations::SqliteRecalculationLedger;
pub use session::{SqliteSession, SqliteSessionProvider};
pub use telluric::SqliteTelluricQueue;

// Re-export from calwatch-core for convenience
pub use calwatch_core::errors::{DatabaseError, Error, Result};
