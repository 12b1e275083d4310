use std::sync::Arc;

use tempfile::TempDir;

use crate::db::{create_pool, init, run_migrations};
use crate::session::SqliteSessionProvider;

/// A migrated database in a temporary directory. Keep the `TempDir` alive
/// for as long as the provider is used.
pub fn migrated_provider(max_sessions: u32) -> (TempDir, Arc<SqliteSessionProvider>) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("calwatch.db");
    let db_path = init(db_path.to_str().unwrap()).unwrap();
    let pool = create_pool(&db_path, max_sessions).unwrap();
    run_migrations(&pool).unwrap();
    (dir, Arc::new(SqliteSessionProvider::new(pool)))
}
