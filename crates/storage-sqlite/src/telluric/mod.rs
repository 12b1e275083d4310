//! SQLite storage implementation for the telluric work queue.

mod model;
mod repository;

pub use model::{NewTelluricQueueDB, TelluricQueueDB, STATUS_PENDING, STATUS_RESOLVED};
pub use repository::{SqliteTelluricQueue, DEFAULT_MAX_ATTEMPTS};

#[cfg(test)]
mod tests;
