//! Configuration for SQLite database connection pools

use serde::{Deserialize, Serialize};

/// Configuration for SqliteDatabase connection pools
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_conn_mgr::SqliteDatabaseConfig;
///
/// // Use defaults
/// let config = SqliteDatabaseConfig::default();
///
/// // Override just one field
/// let config = SqliteDatabaseConfig {
///     max_connections: 3,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteDatabaseConfig {
   /// Maximum number of pooled connections
   ///
   /// A transaction holds one connection for its whole duration. Suspending it to run an
   /// independent transaction needs a second one, so values below 2 are raised to 2.
   ///
   /// Default: 6
   pub max_connections: u32,

   /// Idle timeout for pooled connections (in seconds)
   ///
   /// Connections that remain idle for this duration will be closed automatically.
   /// Ignored for in-memory databases, whose content lives only as long as a connection does.
   ///
   /// Default: 30
   pub idle_timeout_secs: u64,

   /// How long a connection waits for a lock held by another connection (in milliseconds)
   ///
   /// Default: 5000
   pub busy_timeout_ms: u64,
}

impl Default for SqliteDatabaseConfig {
   fn default() -> Self {
      Self {
         max_connections: 6,
         idle_timeout_secs: 30,
         busy_timeout_ms: 5000,
      }
   }
}

