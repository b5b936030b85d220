//! ConnectionGuard for pooled read-write access to the database

use sqlx::Sqlite;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteConnection;
use std::ops::{Deref, DerefMut};

/// RAII guard around a pooled read-write connection
///
/// The guard returns the connection to the pool on drop. A connection whose state
/// can no longer be trusted (for example one dropped in the middle of a transaction)
/// can be discarded instead with [`ConnectionGuard::close_on_drop`].
///
/// The guard derefs to `SqliteConnection` allowing direct use with sqlx queries.
///
/// # Example
///
/// ```no_run
/// use sqlx_sqlite_conn_mgr::SqliteDatabase;
/// use sqlx::query;
///
/// # async fn example() -> Result<(), sqlx_sqlite_conn_mgr::Error> {
/// let db = SqliteDatabase::connect("test.db", None).await?;
/// let mut conn = db.acquire().await?;
/// query("INSERT INTO users (name) VALUES (?)")
///     .bind("Alice")
///     .execute(&mut *conn)
///     .await?;
/// // Connection is automatically returned when dropped
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConnectionGuard {
   conn: PoolConnection<Sqlite>,
}

impl ConnectionGuard {
   /// Create a new ConnectionGuard by taking ownership of a pool connection
   pub(crate) fn new(conn: PoolConnection<Sqlite>) -> Self {
      Self { conn }
   }

   /// Close the underlying connection when the guard is dropped instead of
   /// returning it to the pool
   pub fn close_on_drop(&mut self) {
      self.conn.close_on_drop();
   }
}

impl Deref for ConnectionGuard {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      &self.conn
   }
}

impl DerefMut for ConnectionGuard {
   fn deref_mut(&mut self) -> &mut Self::Target {
      &mut self.conn
   }
}
