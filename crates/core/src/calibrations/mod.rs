//! Change-driven calibration recalculation.
//!
//! - `guard` - whether an observation change warrants recalculation
//! - `Dispatcher` - sequential per-subscription element processing
//! - `ObservationChangeHandler` / `CalibrationTimeHandler` - the two streams
//! - `RecalculationService` - the recalculation operations themselves

mod dispatcher;
pub mod guard;
mod handlers;
mod recording;
mod traits;

pub use dispatcher::*;
pub use handlers::*;
pub use recording::*;
pub use traits::*;
