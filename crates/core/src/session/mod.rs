//! Pooled transactional sessions and elevated execution.
//!
//! Collaborators are always passed in explicitly; there is no ambient lookup.
//! - `Session` / `SessionProvider` - scoped checkout of pooled sessions
//! - `ElevatedContext` - service-account execution wrapper
//! - `run_transactional` - elevate, acquire, begin, run, commit or roll back
//! - `InMemorySessionProvider` - journaling provider for tests

mod elevated;
mod memory;
mod traits;
mod transaction;

pub use elevated::*;
pub use memory::*;
pub use traits::*;
pub use transaction::*;
