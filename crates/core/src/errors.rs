//! Core error types for calwatch.
//!
//! This module defines store-agnostic error types. Storage-specific errors
//! (from Diesel, SQLite, etc.) are converted to these types by the storage layer.

use thiserror::Error;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the orchestrator.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Calibration recalculation failed: {0}")]
    Recalculation(String),

    #[error("Telluric processing failed: {0}")]
    Telluric(String),

    #[error("Elevated execution refused: {0}")]
    Unauthorized(String),

    #[error("Invalid configuration value: {0}")]
    InvalidConfigValue(String),

    #[error("Missing configuration key: {0}")]
    MissingConfigKey(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Store-agnostic error type for session and transaction operations.
///
/// Every variant carries the stringified cause so the storage layer can map
/// driver-specific errors into this shape.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish a database connection.
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to create the pool or check a session out of it.
    #[error("Connection pool error: {0}")]
    PoolError(String),

    /// A database query failed to execute.
    #[error("Database query failed: {0}")]
    QueryFailed(String),

    /// Begin, commit or rollback failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Database migration failed.
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// The session handed to a store was not the kind it expects.
    #[error("Session type mismatch: {0}")]
    SessionMismatch(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}
