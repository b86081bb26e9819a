//! SQLite connection handling.
//!
//! `SyncConnectionWrapper` gives Diesel's synchronous SQLite driver an async
//! interface. Connections are cheap to open, so the pool establishes one per
//! request and configures it for concurrent writers.

use std::path::Path;

use diesel::result::DatabaseErrorKind;
use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, SimpleAsyncConnection};

/// Diesel error type alias.
pub type DbError = diesel::result::Error;

/// Async SQLite connection type.
pub type SqliteConn = SyncConnectionWrapper<SqliteConnection>;

/// Concurrent jobs write to the same file; wait for locks instead of failing.
const CONNECTION_PRAGMAS: &str = r#"
    PRAGMA busy_timeout = 30000;
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
"#;

/// SQLite connection pool (lightweight - creates connections on demand).
#[derive(Clone)]
pub struct SqlitePool {
    database_url: String,
}

impl SqlitePool {
    /// Create a new SQLite pool.
    pub fn new(database_url: &str) -> Self {
        // Strip sqlite: prefix if present
        let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
        let url = url.strip_prefix("//").unwrap_or(url);
        Self {
            database_url: url.to_string(),
        }
    }

    /// Create pool from a file path.
    pub fn from_path(path: &Path) -> Self {
        Self::new(&path.display().to_string())
    }

    /// Get a connection.
    pub async fn get(&self) -> Result<SqliteConn, DbError> {
        let mut conn = SqliteConn::establish(&self.database_url)
            .await
            .map_err(|e| {
                DbError::DatabaseError(DatabaseErrorKind::Unknown, Box::new(e.to_string()))
            })?;
        conn.batch_execute(CONNECTION_PRAGMAS).await?;
        Ok(conn)
    }

    /// Get the database URL.
    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::result::DatabaseErrorInformation;

    #[test]
    fn test_url_prefixes_are_stripped() {
        assert_eq!(SqlitePool::new("sqlite:///tmp/x.db").database_url(), "/tmp/x.db");
        assert_eq!(SqlitePool::new("sqlite:data.db").database_url(), "data.db");
        assert_eq!(SqlitePool::new("/abs/path.db").database_url(), "/abs/path.db");
    }

    #[tokio::test]
    async fn test_unopenable_database_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePool::from_path(&dir.path().join("missing").join("x.db"));
        match pool.get().await {
            Err(DbError::DatabaseError(DatabaseErrorKind::Unknown, info)) => {
                assert!(!info.message().is_empty());
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("opened a database in a missing directory"),
        }
    }
}
