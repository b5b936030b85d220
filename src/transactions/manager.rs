//! Propagation state machine over task-bound transactions

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::future::BoxFuture;
use sqlx::sqlite::SqliteConnection;
use sqlx_sqlite_conn_mgr::SqliteDatabase;
use tracing::{debug, warn};

use super::context::{ActiveTransaction, TransactionContext};
use super::{Isolation, Propagation, TransactionSettings};
use crate::dialect::Dialect;
use crate::{Error, Result};

/// Work to run on whatever connection the current scope prescribes.
pub(crate) type ConnectionOp<T> =
   Box<dyn for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>> + Send>;

/// Box a closure as a [`ConnectionOp`], fixing its signature to the higher-ranked one.
pub(crate) fn connection_op<T, F>(op: F) -> ConnectionOp<T>
where
   F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>> + Send + 'static,
{
   Box::new(op)
}

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
   // Keyed by manager so that transactions of different databases don't see each other
   static BINDINGS: Arc<HashMap<u64, Scope>>;
}

/// Whether an operation may write to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
   Read,
   Write,
}

/// What the current task is bound to for one manager.
#[derive(Clone)]
enum Binding {
   Transaction {
      transaction: Arc<ActiveTransaction>,
      rollback_only: Arc<AtomicBool>,
   },
   /// Explicitly running outside of a transaction (SUPPORTS, NOT_SUPPORTED, NEVER).
   NonTransactional,
}

#[derive(Clone)]
struct Scope {
   binding: Binding,
   /// Transactions suspended by REQUIRES_NEW or NOT_SUPPORTED, outermost first.
   suspended: Vec<Arc<ActiveTransaction>>,
}

/// Starts, joins and suspends transactions of one database.
#[derive(Debug)]
pub(crate) struct TransactionManager {
   id: u64,
   database: Arc<SqliteDatabase>,
   dialect: Arc<dyn Dialect>,
}

impl TransactionManager {
   pub(crate) fn new(database: Arc<SqliteDatabase>, dialect: Arc<dyn Dialect>) -> Self {
      Self {
         id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
         database,
         dialect,
      }
   }

   fn current(&self) -> Option<Scope> {
      BINDINGS
         .try_with(|bindings| bindings.get(&self.id).cloned())
         .ok()
         .flatten()
   }

   fn suspended(&self) -> Vec<Arc<ActiveTransaction>> {
      self.current().map(|scope| scope.suspended).unwrap_or_default()
   }

   /// Run `future` with this manager's scope replaced.
   fn scoped<Fut: Future>(
      &self,
      binding: Binding,
      suspended: Vec<Arc<ActiveTransaction>>,
      future: Fut,
   ) -> impl Future<Output = Fut::Output> {
      let mut bindings: HashMap<u64, Scope> = BINDINGS
         .try_with(|bindings| (**bindings).clone())
         .unwrap_or_default();
      bindings.insert(self.id, Scope { binding, suspended });
      BINDINGS.scope(Arc::new(bindings), future)
   }

   pub(crate) fn has_active_transaction(&self) -> bool {
      matches!(
         self.current(),
         Some(Scope {
            binding: Binding::Transaction { .. },
            ..
         })
      )
   }

   /// Fail if a transaction suspended by this task holds the write lock. SQLite admits
   /// a single writer, and the suspended transaction only finishes after the inner scope.
   async fn ensure_no_suspended_writer(suspended: &[Arc<ActiveTransaction>]) -> Result<()> {
      for transaction in suspended {
         if transaction.has_written().await? {
            return Err(Error::IllegalTransactionState(
               "Cannot write while a suspended transaction holds the database write lock. \
                Write before suspending the transaction, or join it instead of suspending it."
                  .into(),
            ));
         }
      }
      Ok(())
   }

   /// Run `callback` as prescribed by `settings`, whose propagation and isolation must
   /// already be normalized.
   pub(crate) async fn with_transaction<F, Fut, T>(
      &self,
      settings: TransactionSettings,
      mut callback: F,
   ) -> Result<T>
   where
      F: FnMut(TransactionContext) -> Fut + Send,
      Fut: Future<Output = Result<T>> + Send,
      T: Send,
   {
      let propagation = settings.propagation;
      let (binding, mut suspended) = match self.current() {
         Some(scope) => (Some(scope.binding), scope.suspended),
         None => (None, Vec::new()),
      };

      match binding {
         Some(Binding::Transaction {
            transaction,
            rollback_only,
         }) => match propagation {
            Propagation::Never => Err(Error::IllegalTransactionState(
               "Transaction propagation was NEVER, but there was an existing transaction.".into(),
            )),
            Propagation::RequiresNew => {
               debug!("Suspending active transaction for a new one");
               suspended.push(transaction);
               self.run_new(settings, suspended, &mut callback).await
            }
            Propagation::Nested => self.run_nested(transaction, settings.retries, &mut callback).await,
            Propagation::NotSupported => {
               debug!("Suspending active transaction");
               suspended.push(transaction);
               self.run_without_transaction(suspended, &mut callback).await
            }
            _ => {
               let ctx =
                  TransactionContext::new(Some(transaction), Arc::clone(&self.database), rollback_only);
               callback(ctx).await
            }
         },
         _ => match propagation {
            Propagation::Mandatory => Err(Error::NoActiveTransaction(
               "Transaction propagation was MANDATORY, but there was no existing transaction."
                  .into(),
            )),
            Propagation::Supports | Propagation::NotSupported | Propagation::Never => {
               self.run_without_transaction(suspended, &mut callback).await
            }
            _ => self.run_new(settings, suspended, &mut callback).await,
         },
      }
   }

   async fn run_without_transaction<F, Fut, T>(
      &self,
      suspended: Vec<Arc<ActiveTransaction>>,
      callback: &mut F,
   ) -> Result<T>
   where
      F: FnMut(TransactionContext) -> Fut + Send,
      Fut: Future<Output = Result<T>> + Send,
      T: Send,
   {
      let ctx = TransactionContext::new(
         None,
         Arc::clone(&self.database),
         Arc::new(AtomicBool::new(false)),
      );
      self
         .scoped(Binding::NonTransactional, suspended, callback(ctx))
         .await
   }

   async fn run_new<F, Fut, T>(
      &self,
      settings: TransactionSettings,
      suspended: Vec<Arc<ActiveTransaction>>,
      callback: &mut F,
   ) -> Result<T>
   where
      F: FnMut(TransactionContext) -> Fut + Send,
      Fut: Future<Output = Result<T>> + Send,
      T: Send,
   {
      if self.dialect.locks_on_begin(settings.isolation) {
         Self::ensure_no_suspended_writer(&suspended).await?;
      }

      let mut attempt = 0;
      loop {
         match self
            .run_new_once(settings.isolation, suspended.clone(), callback)
            .await
         {
            Err(e) if e.is_serialization_failure() && attempt < settings.retries => {
               attempt += 1;
               warn!(
                  "Retrying transaction after serialization failure ({}/{}): {}",
                  attempt, settings.retries, e
               );
            }
            result => return result,
         }
      }
   }

   async fn run_new_once<F, Fut, T>(
      &self,
      isolation: Isolation,
      suspended: Vec<Arc<ActiveTransaction>>,
      callback: &mut F,
   ) -> Result<T>
   where
      F: FnMut(TransactionContext) -> Fut + Send,
      Fut: Future<Output = Result<T>> + Send,
      T: Send,
   {
      let conn = self.database.acquire().await?;
      let transaction =
         Arc::new(ActiveTransaction::begin(conn, Arc::clone(&self.dialect), isolation).await?);
      let rollback_only = Arc::new(AtomicBool::new(false));

      let ctx = TransactionContext::new(
         Some(Arc::clone(&transaction)),
         Arc::clone(&self.database),
         Arc::clone(&rollback_only),
      );
      let binding = Binding::Transaction {
         transaction: Arc::clone(&transaction),
         rollback_only: Arc::clone(&rollback_only),
      };
      let result = self.scoped(binding, suspended, callback(ctx)).await;

      complete(&transaction, result, rollback_only.load(Ordering::SeqCst)).await
   }

   async fn run_nested<F, Fut, T>(
      &self,
      transaction: Arc<ActiveTransaction>,
      retries: u32,
      callback: &mut F,
   ) -> Result<T>
   where
      F: FnMut(TransactionContext) -> Fut + Send,
      Fut: Future<Output = Result<T>> + Send,
      T: Send,
   {
      let mut attempt = 0;
      loop {
         match self.run_nested_once(&transaction, callback).await {
            Err(e) if e.is_serialization_failure() && attempt < retries => {
               attempt += 1;
               warn!(
                  "Retrying nested transaction after serialization failure ({}/{}): {}",
                  attempt, retries, e
               );
            }
            result => return result,
         }
      }
   }

   async fn run_nested_once<F, Fut, T>(
      &self,
      transaction: &Arc<ActiveTransaction>,
      callback: &mut F,
   ) -> Result<T>
   where
      F: FnMut(TransactionContext) -> Fut + Send,
      Fut: Future<Output = Result<T>> + Send,
      T: Send,
   {
      let dialect = transaction.dialect();
      let savepoint = transaction.next_savepoint_name();
      transaction.execute(&dialect.savepoint_statement(&savepoint)).await?;
      debug!("Created savepoint {}", savepoint);

      let rollback_only = Arc::new(AtomicBool::new(false));
      let ctx = TransactionContext::new(
         Some(Arc::clone(transaction)),
         Arc::clone(&self.database),
         Arc::clone(&rollback_only),
      );
      let binding = Binding::Transaction {
         transaction: Arc::clone(transaction),
         rollback_only: Arc::clone(&rollback_only),
      };
      let result = self.scoped(binding, self.suspended(), callback(ctx)).await;

      let release = dialect.release_savepoint_statement(&savepoint);
      match result {
         Ok(value) if !rollback_only.load(Ordering::SeqCst) => {
            transaction.execute(&release).await?;
            Ok(value)
         }
         Ok(value) => {
            transaction.execute(&dialect.rollback_to_savepoint_statement(&savepoint)).await?;
            transaction.execute(&release).await?;
            debug!("Rolled back to savepoint {}", savepoint);
            Ok(value)
         }
         Err(e) => {
            warn!("Rolling back to savepoint {} because of error: {}", savepoint, e);
            let rolled_back = async {
               transaction.execute(&dialect.rollback_to_savepoint_statement(&savepoint)).await?;
               transaction.execute(&release).await
            };
            match rolled_back.await {
               Ok(()) => Err(e),
               Err(rollback_error) => Err(Error::TransactionRollbackFailed {
                  transaction_error: e.to_string(),
                  rollback_error: rollback_error.to_string(),
               }),
            }
         }
      }
   }

   /// Run `op` on the connection of the current transaction.
   ///
   /// Without a bound transaction the operation runs in a transaction of its own with
   /// `implicit` isolation, or fails if implicit transactions are disabled (`None`).
   /// Inside a non-transactional scope it runs on a pooled connection in autocommit mode.
   ///
   /// Writes fail with [`Error::IllegalTransactionState`] while a transaction this task
   /// suspended holds the write lock.
   pub(crate) async fn with_connection<T: Send>(
      &self,
      implicit: Option<Isolation>,
      access: Access,
      op: ConnectionOp<T>,
   ) -> Result<T> {
      let scope = self.current();
      if access == Access::Write
         && let Some(scope) = &scope
      {
         Self::ensure_no_suspended_writer(&scope.suspended).await?;
      }

      match scope.map(|scope| scope.binding) {
         Some(Binding::Transaction { transaction, .. }) => {
            if access == Access::Write {
               transaction.mark_written();
            }
            let mut conn = transaction.lock().await;
            op(&mut **conn).await
         }
         Some(Binding::NonTransactional) => {
            let mut conn = self.database.acquire().await?;
            op(&mut *conn).await
         }
         None => {
            let Some(isolation) = implicit else {
               return Err(Error::NoActiveTransaction(
                  "Tried to perform database operation without active transaction. Database \
                   accesses should be bracketed with Database::with_transaction(...) or implicit \
                   transactions should be enabled."
                     .into(),
               ));
            };

            let conn = self.database.acquire().await?;
            let transaction = ActiveTransaction::begin(conn, Arc::clone(&self.dialect), isolation).await?;
            let result = {
               let mut conn = transaction.lock().await;
               op(&mut **conn).await
            };
            complete(&transaction, result, false).await
         }
      }
   }
}

/// Commit or roll back a transaction depending on the outcome of its work.
async fn complete<T>(transaction: &ActiveTransaction, result: Result<T>, rollback_only: bool) -> Result<T> {
   match result {
      Ok(value) if rollback_only => {
         transaction.rollback().await?;
         Ok(value)
      }
      Ok(value) => {
         if let Err(e) = transaction.commit().await {
            if let Err(rollback_error) = transaction.rollback().await {
               warn!("Failed to roll back after failed commit: {}", rollback_error);
            }
            return Err(e);
         }
         Ok(value)
      }
      Err(e) => {
         warn!("Rolling back transaction because of error: {}", e);
         match transaction.rollback().await {
            Ok(()) => Err(e),
            Err(rollback_error) => Err(Error::TransactionRollbackFailed {
               transaction_error: e.to_string(),
               rollback_error: rollback_error.to_string(),
            }),
         }
      }
   }
}
