//! Periodic telluric recalculation.

mod daemon;
mod memory;
mod traits;

pub use daemon::*;
pub use memory::*;
pub use traits::*;
