//! Transaction state shared between the manager and callbacks

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use sqlx::sqlite::SqliteConnection;
use sqlx_sqlite_conn_mgr::{ConnectionGuard, SqliteDatabase};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace, warn};

use super::Isolation;
use crate::dialect::Dialect;
use crate::query::SqlQuery;
use crate::{Error, Result};

/// Run a statement without arguments, wrapping failures through the dialect.
pub(crate) async fn execute_statement(
   conn: &mut SqliteConnection,
   dialect: &dyn Dialect,
   sql: &str,
) -> Result<()> {
   trace!("executing statement {}", sql);
   sqlx::query(sql)
      .execute(conn)
      .await
      .map_err(|e| dialect.convert_error(e, &SqlQuery::new(sql)))?;
   Ok(())
}

/// Rows changed on the connection since it was opened.
async fn total_changes(conn: &mut SqliteConnection, dialect: &dyn Dialect) -> Result<i64> {
   const SQL: &str = "SELECT total_changes()";
   sqlx::query_scalar::<_, i64>(SQL)
      .fetch_one(conn)
      .await
      .map_err(|e| dialect.convert_error(e, &SqlQuery::new(SQL)))
}

/// A transaction started on a pooled connection.
///
/// The connection is locked for the duration of each statement, so queries issued
/// concurrently from a transaction's callback run one after another.
///
/// If the transaction is dropped before it was committed or rolled back, its
/// connection is closed instead of being returned to the pool, which makes SQLite
/// roll the transaction back.
#[must_use = "if unused, the transaction is immediately rolled back"]
pub(crate) struct ActiveTransaction {
   conn: Arc<Mutex<ConnectionGuard>>,
   dialect: Arc<dyn Dialect>,
   isolation: Isolation,
   savepoints: AtomicU32,
   finished: AtomicBool,
   written: AtomicBool,
   changes_at_begin: i64,
}

impl ActiveTransaction {
   /// Start a transaction on `conn` with the dialect's begin statements.
   pub(crate) async fn begin(
      mut conn: ConnectionGuard,
      dialect: Arc<dyn Dialect>,
      isolation: Isolation,
   ) -> Result<Self> {
      for statement in dialect.begin_statements(isolation) {
         if let Err(e) = execute_statement(&mut conn, dialect.as_ref(), &statement).await {
            conn.close_on_drop();
            return Err(e);
         }
      }
      let changes_at_begin = match total_changes(&mut conn, dialect.as_ref()).await {
         Ok(changes) => changes,
         Err(e) => {
            conn.close_on_drop();
            return Err(e);
         }
      };
      debug!("Began transaction (isolation: {:?})", isolation);

      Ok(Self {
         conn: Arc::new(Mutex::new(conn)),
         written: AtomicBool::new(dialect.locks_on_begin(isolation)),
         dialect,
         isolation,
         savepoints: AtomicU32::new(0),
         finished: AtomicBool::new(false),
         changes_at_begin,
      })
   }

   /// Lock the transaction's connection.
   pub(crate) async fn lock(&self) -> OwnedMutexGuard<ConnectionGuard> {
      Arc::clone(&self.conn).lock_owned().await
   }

   pub(crate) fn dialect(&self) -> &dyn Dialect {
      self.dialect.as_ref()
   }

   pub(crate) async fn execute(&self, sql: &str) -> Result<()> {
      let mut conn = self.conn.lock().await;
      execute_statement(&mut conn, self.dialect.as_ref(), sql).await
   }

   pub(crate) fn mark_written(&self) {
      self.written.store(true, Ordering::SeqCst);
   }

   /// Whether the transaction holds the database's write lock.
   ///
   /// Besides writes issued through the `Database`, rows changed through the raw
   /// connection count, unless that connection is currently locked by someone else.
   pub(crate) async fn has_written(&self) -> Result<bool> {
      if self.written.load(Ordering::SeqCst) {
         return Ok(true);
      }
      let Ok(mut conn) = self.conn.try_lock() else {
         return Ok(false);
      };
      let changes = total_changes(&mut conn, self.dialect.as_ref()).await?;
      Ok(changes != self.changes_at_begin)
   }

   /// A savepoint name not used before in this transaction.
   pub(crate) fn next_savepoint_name(&self) -> String {
      let seq = self.savepoints.fetch_add(1, Ordering::SeqCst) + 1;
      format!("sp_{seq}")
   }

   pub(crate) async fn commit(&self) -> Result<()> {
      self.finish(self.dialect.commit_statement()).await?;
      debug!("Transaction committed");
      Ok(())
   }

   pub(crate) async fn rollback(&self) -> Result<()> {
      self.finish(self.dialect.rollback_statement()).await?;
      debug!("Transaction rolled back");
      Ok(())
   }

   async fn finish(&self, statement: &str) -> Result<()> {
      if self.finished.load(Ordering::SeqCst) {
         return Err(Error::TransactionAlreadyFinalized);
      }

      let mut conn = self.conn.lock().await;
      execute_statement(&mut conn, self.dialect.as_ref(), statement).await?;
      self.finished.store(true, Ordering::SeqCst);

      for statement in self.dialect.end_statements(self.isolation) {
         if let Err(e) = execute_statement(&mut conn, self.dialect.as_ref(), &statement).await {
            // The connection keeps the transaction's session settings, so it must not be reused
            warn!("Failed to reset connection after transaction: {}", e);
            conn.close_on_drop();
            break;
         }
      }
      Ok(())
   }
}

impl Drop for ActiveTransaction {
   fn drop(&mut self) {
      if !self.finished.load(Ordering::SeqCst) {
         debug!("Dropping unfinished transaction (will auto-rollback)");
         if let Ok(mut conn) = self.conn.try_lock() {
            conn.close_on_drop();
         }
      }
   }
}

impl fmt::Debug for ActiveTransaction {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("ActiveTransaction")
         .field("isolation", &self.isolation)
         .field("finished", &self.finished.load(Ordering::SeqCst))
         .finish_non_exhaustive()
   }
}

/// Handle passed to transaction callbacks.
///
/// Cloning the context is cheap; clones share the rollback-only flag. Queries made
/// through [`Database`](crate::Database) from inside the callback take part in the
/// transaction automatically, so the context is only needed to mark the transaction
/// for rollback or to work with the raw connection.
#[derive(Clone)]
pub struct TransactionContext {
   transaction: Option<Arc<ActiveTransaction>>,
   database: Arc<SqliteDatabase>,
   rollback_only: Arc<AtomicBool>,
}

impl TransactionContext {
   pub(crate) fn new(
      transaction: Option<Arc<ActiveTransaction>>,
      database: Arc<SqliteDatabase>,
      rollback_only: Arc<AtomicBool>,
   ) -> Self {
      Self {
         transaction,
         database,
         rollback_only,
      }
   }

   /// Roll the transaction back instead of committing it when the callback returns.
   ///
   /// Has no effect when the callback runs without a transaction.
   pub fn set_rollback_only(&self) {
      self.rollback_only.store(true, Ordering::SeqCst);
   }

   pub fn is_rollback_only(&self) -> bool {
      self.rollback_only.load(Ordering::SeqCst)
   }

   /// Returns false if the callback runs without a transaction, e.g. with
   /// [`Propagation::Supports`](super::Propagation::Supports) and no active transaction.
   pub fn is_transactional(&self) -> bool {
      self.transaction.is_some()
   }

   /// The connection the callback's queries run on.
   ///
   /// For a transactional context this locks the transaction's connection: release
   /// the returned guard before querying through the `Database` again, or the query
   /// will wait for it forever. Without a transaction a connection in autocommit
   /// mode is checked out of the pool.
   ///
   /// # Example
   ///
   /// ```no_run
   /// # use sqlx_sqlite_mapper::Database;
   /// # async fn example(db: Database) -> sqlx_sqlite_mapper::Result<()> {
   /// db.with_transaction(|ctx| async move {
   ///    let mut conn = ctx.connection().await?;
   ///    sqlx::query("DELETE FROM cache").execute(&mut *conn).await?;
   ///    Ok(())
   /// })
   /// .await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn connection(&self) -> Result<TransactionConnection> {
      let inner = match &self.transaction {
         Some(transaction) => ConnectionInner::Transaction(transaction.lock().await),
         None => ConnectionInner::Pooled(self.database.acquire().await?),
      };
      Ok(TransactionConnection { inner })
   }
}

impl fmt::Debug for TransactionContext {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("TransactionContext")
         .field("transactional", &self.is_transactional())
         .field("rollback_only", &self.is_rollback_only())
         .finish()
   }
}

/// Connection handed out by [`TransactionContext::connection`].
///
/// Derefs to `SqliteConnection`, so it can be used directly with sqlx queries.
pub struct TransactionConnection {
   inner: ConnectionInner,
}

enum ConnectionInner {
   Transaction(OwnedMutexGuard<ConnectionGuard>),
   Pooled(ConnectionGuard),
}

impl Deref for TransactionConnection {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      match &self.inner {
         ConnectionInner::Transaction(guard) => &***guard,
         ConnectionInner::Pooled(guard) => &**guard,
      }
   }
}

impl DerefMut for TransactionConnection {
   fn deref_mut(&mut self) -> &mut Self::Target {
      match &mut self.inner {
         ConnectionInner::Transaction(guard) => &mut ***guard,
         ConnectionInner::Pooled(guard) => &mut **guard,
      }
   }
}

impl fmt::Debug for TransactionConnection {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let kind = match self.inner {
         ConnectionInner::Transaction(_) => "transaction",
         ConnectionInner::Pooled(_) => "pooled",
      };
      f.debug_tuple("TransactionConnection").field(&kind).finish()
   }
}
