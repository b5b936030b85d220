//! SQLite database with a pool of read-write connections

use crate::Result;
use crate::config::SqliteDatabaseConfig;
use crate::connection_guard::ConnectionGuard;
use crate::error::Error;
use crate::registry::{get_or_open_database, is_memory_database, uncache_database};
use sqlx::sqlite::{
   SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error};

/// SQLite database with a pool of read-write connections.
///
/// File databases are opened in WAL mode with `synchronous = NORMAL`. Connections wait up
/// to the configured busy timeout for locks held by other connections.
///
/// # Example
///
/// ```no_run
/// use sqlx_sqlite_conn_mgr::SqliteDatabase;
///
/// # async fn example() -> Result<(), sqlx_sqlite_conn_mgr::Error> {
/// let db = SqliteDatabase::connect("test.db", None).await?;
///
/// let rows = sqlx::query("SELECT * FROM users")
///     .fetch_all(db.pool()?)
///     .await?;
///
/// let mut conn = db.acquire().await?;
/// sqlx::query("INSERT INTO users (name) VALUES (?)")
///     .bind("Alice")
///     .execute(&mut *conn)
///     .await?;
///
/// db.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SqliteDatabase {
   /// Pool of read-write connections
   pool: Pool<Sqlite>,

   /// Marks database as closed to prevent further operations
   closed: AtomicBool,

   /// Path to database file (used for cleanup and registry lookups)
   path: PathBuf,
}

impl SqliteDatabase {
   /// Connect to a SQLite database
   ///
   /// If the database is already connected, returns the existing connection.
   /// Multiple calls with the same path will return the same database instance,
   /// except for `:memory:`, which opens a fresh private database every time.
   ///
   /// The database file is created if it doesn't exist.
   ///
   /// # Arguments
   ///
   /// * `path` - Path to the SQLite database file (will be created if missing)
   /// * `custom_config` - Optional custom configuration for the connection pool.
   ///   Pass `None` to use defaults (6 max connections, 30 second idle timeout,
   ///   5 second busy timeout).
   ///
   /// # Examples
   ///
   /// ```no_run
   /// use sqlx_sqlite_conn_mgr::{SqliteDatabase, SqliteDatabaseConfig};
   ///
   /// # async fn example() -> Result<(), sqlx_sqlite_conn_mgr::Error> {
   /// let custom_config = SqliteDatabaseConfig {
   ///    max_connections: 10,
   ///    ..Default::default()
   /// };
   /// let db = SqliteDatabase::connect("test.db", Some(custom_config)).await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn connect(
      path: impl AsRef<Path>,
      custom_config: Option<SqliteDatabaseConfig>,
   ) -> Result<Arc<Self>> {
      let config = custom_config.unwrap_or_default();
      let path = path.as_ref();

      // Validate path is not empty
      if path.as_os_str().is_empty() {
         return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Database path cannot be empty",
         )));
      }

      let path = path.to_path_buf();

      get_or_open_database(&path, || async {
         let in_memory = is_memory_database(&path);

         let options = if in_memory {
            // sqlx gives every in-memory URL its own shared-cache name, so all
            // connections of this pool see the same database
            SqliteConnectOptions::from_str("sqlite::memory:")?
         } else {
            SqliteConnectOptions::new()
               .filename(&path)
               .create_if_missing(true)
               .journal_mode(SqliteJournalMode::Wal)
               // https://www.sqlite.org/wal.html#performance_considerations
               .synchronous(SqliteSynchronous::Normal)
         };
         let options = options.busy_timeout(Duration::from_millis(config.busy_timeout_ms));

         let pool_options = SqlitePoolOptions::new().max_connections(config.max_connections.max(2));

         // The in-memory database disappears with its last connection
         let pool_options = if in_memory {
            pool_options
               .min_connections(1)
               .idle_timeout(None)
               .max_lifetime(None)
         } else {
            pool_options
               .min_connections(0)
               .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
         };

         let pool = pool_options.connect_with(options).await?;

         debug!("Opened database: {}", path.display());

         Ok(Self {
            pool,
            closed: AtomicBool::new(false),
            path: path.clone(),
         })
      })
      .await
   }

   /// Get a reference to the connection pool
   ///
   /// Queries executed directly on the pool run in autocommit mode.
   pub fn pool(&self) -> Result<&Pool<Sqlite>> {
      if self.closed.load(Ordering::SeqCst) {
         return Err(Error::DatabaseClosed);
      }
      Ok(&self.pool)
   }

   /// Check out a connection from the pool
   ///
   /// The connection stays reserved for the caller until the returned guard is dropped.
   ///
   /// # Example
   ///
   /// ```no_run
   /// use sqlx_sqlite_conn_mgr::SqliteDatabase;
   ///
   /// # async fn example() -> Result<(), sqlx_sqlite_conn_mgr::Error> {
   /// let db = SqliteDatabase::connect("test.db", None).await?;
   /// let mut conn = db.acquire().await?;
   /// sqlx::query("BEGIN").execute(&mut *conn).await?;
   /// sqlx::query("COMMIT").execute(&mut *conn).await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn acquire(&self) -> Result<ConnectionGuard> {
      if self.closed.load(Ordering::SeqCst) {
         return Err(Error::DatabaseClosed);
      }

      let conn = self.pool.acquire().await?;
      Ok(ConnectionGuard::new(conn))
   }

   /// Path this database was opened with
   pub fn path(&self) -> &Path {
      &self.path
   }

   /// Returns true if this is an in-memory database
   pub fn is_in_memory(&self) -> bool {
      is_memory_database(&self.path)
   }

   /// Close the database and clean up resources
   ///
   /// This closes all connections in the pool and removes the database from the cache.
   /// After calling close, any operations on this database will return `Error::DatabaseClosed`.
   ///
   /// Note: Takes `Arc<Self>` to consume ownership, preventing use-after-close at compile time.
   /// The registry stores `Weak` references, so when this Arc is dropped, the database is freed.
   pub async fn close(self: Arc<Self>) -> Result<()> {
      // Mark as closed
      self.closed.store(true, Ordering::SeqCst);

      // Remove from registry
      if let Err(e) = uncache_database(&self.path).await {
         error!("Failed to remove database from cache: {}", e);
      }

      // Checkpoint WAL to flush changes and truncate the WAL file
      if !self.is_in_memory()
         && let Ok(mut conn) = self.pool.acquire().await
      {
         let _ = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&mut *conn)
            .await;
      }

      // This will await all connections to be returned
      self.pool.close().await;

      debug!("Closed database: {}", self.path.display());
      Ok(())
   }

   /// Close the database and delete all database files
   ///
   /// This closes all connections and then deletes the database file,
   /// WAL file, and SHM file from disk. Use with caution!
   pub async fn remove(self: Arc<Self>) -> Result<()> {
      // Clone path before closing (since close consumes self)
      let path = self.path.clone();
      let in_memory = self.is_in_memory();

      // Close all connections and clean up
      self.close().await?;

      if in_memory {
         return Ok(());
      }

      // Remove main database file - propagate errors (file should exist)
      std::fs::remove_file(&path).map_err(Error::Io)?;

      // Remove WAL and SHM files - ignore "not found" but propagate other errors
      for suffix in ["-wal", "-shm"] {
         let mut sidecar = path.clone().into_os_string();
         sidecar.push(suffix);

         if let Err(e) = std::fs::remove_file(&sidecar)
            && e.kind() != std::io::ErrorKind::NotFound
         {
            return Err(Error::Io(e));
         }
      }

      Ok(())
   }
}
