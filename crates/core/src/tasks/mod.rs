//! Supervision of the long-running background loops.

mod task_group;

pub use task_group::*;
