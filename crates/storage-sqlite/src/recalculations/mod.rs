//! SQLite storage implementation for recalculation requests.

mod model;
mod repository;

pub use model::{CalibrationRecalculationDB, CalibrationTargetRecalculationDB, ObservationDB};
pub use repository::SqliteRecalculationLedger;
