//! Change outbox: writers append change elements per stream, and one
//! [`SqliteOutboxFeed`] per stream drains them onto a topic.

mod model;
mod repository;

pub use model::{NewOutboxRowDB, OutboxRowDB};
pub use repository::{append_change, SqliteOutboxFeed};
