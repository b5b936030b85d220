//! The main entry point: query execution, result mapping and transactions

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteColumn, SqliteConnection};
use sqlx::{Executor, Row};
use sqlx_sqlite_conn_mgr::{SqliteDatabase, SqliteDatabaseConfig};
use tracing::{debug, trace};

use crate::Result;
use crate::argument::Argument;
use crate::builders::TransactionBuilder;
use crate::conversion::{EnumMode, SqlTarget, TypeConversionRegistry};
use crate::decode::{bind_value, decode_table};
use crate::dialect::{Dialect, SqliteDialect};
use crate::instantiation::InstantiatorProvider;
use crate::query::SqlQuery;
use crate::result::{self, ResultTable, RowMapper};
use crate::transactions::{
   Access, Isolation, Propagation, TransactionContext, TransactionManager, TransactionSettings,
   connection_op,
};
use crate::value::Value;

/// Result of a write query (e.g. INSERT, UPDATE, DELETE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
   /// The number of rows affected by the query.
   pub rows_affected: u64,
   /// The last inserted row ID (SQLite ROWID).
   ///
   /// Only set for INSERT operations on tables with a ROWID.
   /// Tables created with `WITHOUT ROWID` will not set this value (returns 0).
   pub last_insert_id: i64,
}

/// Runtime settings of a [`Database`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabaseSettings {
   /// Propagation used by transactions that don't specify one.
   ///
   /// Default: `Required`
   pub default_propagation: Propagation,

   /// Isolation used by new transactions that don't specify one.
   ///
   /// Default: `Default`, i.e. whatever the database does by itself
   pub default_isolation: Isolation,

   /// Whether queries outside of `with_transaction` run in a transaction of their own.
   /// When disabled such queries fail with [`Error::NoActiveTransaction`](crate::Error).
   ///
   /// Default: true
   pub allow_implicit_transactions: bool,

   /// How enum arguments are written to the database.
   ///
   /// Default: `Name`
   pub enum_mode: EnumMode,
}

impl Default for DatabaseSettings {
   fn default() -> Self {
      Self {
         default_propagation: Propagation::Required,
         default_isolation: Isolation::Default,
         allow_implicit_transactions: true,
         enum_mode: EnumMode::Name,
      }
   }
}

/// Handle to a SQLite database with query helpers, reflective result mapping and
/// transaction management.
///
/// Cloning is cheap; clones share settings, type conversions and transactions.
///
/// # Example
///
/// ```no_run
/// use sqlx_sqlite_mapper::{Database, SqlQuery};
///
/// # async fn example() -> sqlx_sqlite_mapper::Result<()> {
/// let db = Database::connect("app.db", None).await?;
///
/// db.update("CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY, name TEXT)").await?;
/// db.update(SqlQuery::new("INSERT INTO users (name) VALUES (?)").bind("Alice")).await?;
///
/// let names: Vec<String> = db.find_all("SELECT name FROM users ORDER BY id").await?;
/// let count = db.find_unique_long("SELECT count(*) FROM users").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Database {
   inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
   database: Arc<SqliteDatabase>,
   provider: InstantiatorProvider,
   manager: TransactionManager,
   settings: RwLock<DatabaseSettings>,
}

impl Database {
   /// Connect to a SQLite database via the connection manager, using the SQLite dialect.
   ///
   /// Multiple connects to the same path share the underlying connection pool.
   pub async fn connect(
      path: impl AsRef<Path>,
      custom_config: Option<SqliteDatabaseConfig>,
   ) -> Result<Self> {
      let database = SqliteDatabase::connect(path, custom_config).await?;
      Ok(Self::from_database(database))
   }

   /// Wrap an already opened database.
   pub fn from_database(database: Arc<SqliteDatabase>) -> Self {
      Self::build(
         database,
         Arc::new(SqliteDialect),
         Arc::new(TypeConversionRegistry::with_defaults()),
         DatabaseSettings::default(),
      )
   }

   fn build(
      database: Arc<SqliteDatabase>,
      dialect: Arc<dyn Dialect>,
      registry: Arc<TypeConversionRegistry>,
      settings: DatabaseSettings,
   ) -> Self {
      debug!(
         "Using dialect {} for database: {}",
         dialect.name(),
         database.path().display()
      );
      Self {
         inner: Arc::new(DatabaseInner {
            provider: InstantiatorProvider::new(Arc::clone(&dialect), registry),
            manager: TransactionManager::new(Arc::clone(&database), dialect),
            database,
            settings: RwLock::new(settings),
         }),
      }
   }

   /// Replace the dialect.
   ///
   /// Returns a new handle sharing the connection pool, settings and registered type
   /// conversions; transactions of the old handle are not visible to the new one.
   pub fn with_dialect(self, dialect: impl Dialect + 'static) -> Self {
      Self::build(
         Arc::clone(&self.inner.database),
         Arc::new(dialect),
         Arc::clone(self.inner.provider.registry()),
         self.settings(),
      )
   }

   pub fn with_settings(self, settings: DatabaseSettings) -> Self {
      self.set_settings(settings);
      self
   }

   pub fn settings(&self) -> DatabaseSettings {
      *self.inner.settings.read()
   }

   pub fn set_settings(&self, settings: DatabaseSettings) {
      *self.inner.settings.write() = settings;
   }

   pub fn set_default_propagation(&self, propagation: Propagation) {
      self.inner.settings.write().default_propagation = propagation;
   }

   pub fn set_default_isolation(&self, isolation: Isolation) {
      self.inner.settings.write().default_isolation = isolation;
   }

   pub fn set_allow_implicit_transactions(&self, allow: bool) {
      self.inner.settings.write().allow_implicit_transactions = allow;
   }

   pub fn set_enum_mode(&self, mode: EnumMode) {
      self.inner.settings.write().enum_mode = mode;
   }

   pub fn dialect(&self) -> &dyn Dialect {
      self.inner.provider.dialect().as_ref()
   }

   /// Registry of custom conversions used by this database.
   ///
   /// Conversions can be registered at any time and apply to queries started afterwards.
   pub fn type_conversions(&self) -> &TypeConversionRegistry {
      self.inner.provider.registry()
   }

   /// The underlying connection manager database.
   pub fn inner(&self) -> &Arc<SqliteDatabase> {
      &self.inner.database
   }

   /// Run `callback` in a transaction.
   ///
   /// Returns a builder for choosing propagation, isolation and retries; awaiting it
   /// runs the callback. The callback may be called several times when retries are
   /// enabled. The transaction is committed when the callback succeeds, unless it was
   /// marked rollback-only, and rolled back when the callback fails.
   ///
   /// Queries made through this database from within the callback run in the
   /// transaction. Work spawned onto other tasks does not.
   ///
   /// # Example
   ///
   /// ```no_run
   /// use sqlx_sqlite_mapper::{Database, Propagation, SqlQuery};
   ///
   /// # async fn example(db: Database) -> sqlx_sqlite_mapper::Result<()> {
   /// let id = db
   ///    .with_transaction(|_ctx| {
   ///       let db = db.clone();
   ///       async move {
   ///          let result = db
   ///             .update_and_get_generated_key(
   ///                SqlQuery::new("INSERT INTO users (name) VALUES (?)").bind("Alice"),
   ///             )
   ///             .await?;
   ///          db.update(SqlQuery::new("INSERT INTO audit_log (user_id) VALUES (?)").bind(result.last_insert_id))
   ///             .await?;
   ///          Ok(result.last_insert_id)
   ///       }
   ///    })
   ///    .propagation(Propagation::RequiresNew)
   ///    .await?;
   /// # Ok(())
   /// # }
   /// ```
   pub fn with_transaction<F, Fut, T>(&self, callback: F) -> TransactionBuilder<'_, F>
   where
      F: FnMut(TransactionContext) -> Fut + Send,
      Fut: Future<Output = Result<T>> + Send,
      T: Send,
   {
      TransactionBuilder::new(self, callback)
   }

   pub(crate) async fn run_transaction<F, Fut, T>(
      &self,
      settings: TransactionSettings,
      callback: F,
   ) -> Result<T>
   where
      F: FnMut(TransactionContext) -> Fut + Send,
      Fut: Future<Output = Result<T>> + Send,
      T: Send,
   {
      let defaults = self.settings();
      let settings = TransactionSettings {
         propagation: settings.propagation.normalize(defaults.default_propagation),
         isolation: settings.isolation.normalize(defaults.default_isolation),
         retries: settings.retries,
      };
      self.inner.manager.with_transaction(settings, callback).await
   }

   /// Returns true if the current task runs inside a transaction of this database.
   pub fn has_active_transaction(&self) -> bool {
      self.inner.manager.has_active_transaction()
   }

   fn resolve_arguments(&self, arguments: &[Argument]) -> Result<Vec<Value>> {
      let mode = self.settings().enum_mode;
      arguments
         .iter()
         .map(|argument| self.inner.provider.value_to_database(argument, mode))
         .collect()
   }

   /// Run `work` with the query's SQL and bindable argument values on the connection
   /// the current transaction scope prescribes.
   async fn run<T, W>(&self, query: SqlQuery, access: Access, work: W) -> Result<T>
   where
      T: Send + 'static,
      W: for<'c> FnOnce(&'c mut SqliteConnection, String, Vec<Value>) -> BoxFuture<'c, sqlx::Result<T>>
         + Send
         + 'static,
   {
      let values = self.resolve_arguments(query.arguments())?;
      let settings = self.settings();
      let implicit = settings
         .allow_implicit_transactions
         .then_some(settings.default_isolation);

      trace!("executing query {}", query);
      let start = Instant::now();

      let description = query.to_string();
      let dialect = Arc::clone(self.inner.provider.dialect());
      let op = connection_op(move |conn| {
         Box::pin(async move {
            let sql = query.sql().to_string();
            work(conn, sql, values)
               .await
               .map_err(|e| dialect.convert_error(e, &query))
         })
      });
      let result = self.inner.manager.with_connection(implicit, access, op).await;

      debug!(
         "executed query in {} ms: {}",
         start.elapsed().as_millis(),
         description
      );
      result
   }

   /// Run a query and hand the whole result to `processor`.
   pub async fn execute_query<T, F>(&self, query: impl Into<SqlQuery>, processor: F) -> Result<T>
   where
      F: FnOnce(ResultTable) -> Result<T>,
   {
      processor(self.find_table(query).await?)
   }

   /// Run a query and return its columns and rows as is.
   pub async fn find_table(&self, query: impl Into<SqlQuery>) -> Result<ResultTable> {
      let (columns, rows) = self
         .run(query.into(), Access::Read, |conn, sql, values| {
            Box::pin(async move {
               let rows = bind_all(&sql, values).fetch_all(&mut *conn).await?;
               let columns: Vec<SqliteColumn> = match rows.first() {
                  Some(row) => row.columns().to_vec(),
                  // Without rows the columns have to come from the statement itself
                  None => (&mut *conn).describe(&sql).await?.columns().to_vec(),
               };
               Ok::<_, sqlx::Error>((columns, rows))
            })
         })
         .await?;
      decode_table(&columns, &rows)
   }

   /// Run a query and instantiate every row as `T`.
   ///
   /// Single column results are converted directly; wider ones are matched against the
   /// constructors and properties in `T`'s [`TypeInfo`](crate::TypeInfo).
   pub async fn find_all<T: SqlTarget>(&self, query: impl Into<SqlQuery>) -> Result<Vec<T>> {
      let table = self.find_table(query).await?;
      result::instantiate_rows(&self.inner.provider, table)
   }

   /// Run a query and map every row with `mapper`.
   pub async fn find_all_with<T, M>(&self, query: impl Into<SqlQuery>, mapper: M) -> Result<Vec<T>>
   where
      M: RowMapper<T>,
   {
      let table = self.find_table(query).await?;
      result::map_rows(&mapper, &table)
   }

   /// Run a query returning exactly one row.
   ///
   /// Fails with [`Error::EmptyResult`](crate::Error::EmptyResult) when there are no rows
   /// and with [`Error::NonUniqueResult`](crate::Error::NonUniqueResult) when there are more.
   pub async fn find_unique<T: SqlTarget>(&self, query: impl Into<SqlQuery>) -> Result<T> {
      let query = query.into();
      let results = self.find_all(&query).await?;
      result::unique(results, &query)
   }

   pub async fn find_unique_with<T, M>(&self, query: impl Into<SqlQuery>, mapper: M) -> Result<T>
   where
      M: RowMapper<T>,
   {
      let query = query.into();
      let results = self.find_all_with(&query, mapper).await?;
      result::unique(results, &query)
   }

   /// Run a query returning at most one row.
   pub async fn find_optional<T: SqlTarget>(&self, query: impl Into<SqlQuery>) -> Result<Option<T>> {
      let query = query.into();
      let results = self.find_all(&query).await?;
      result::optional(results, &query)
   }

   pub async fn find_optional_with<T, M>(
      &self,
      query: impl Into<SqlQuery>,
      mapper: M,
   ) -> Result<Option<T>>
   where
      M: RowMapper<T>,
   {
      let query = query.into();
      let results = self.find_all_with(&query, mapper).await?;
      result::optional(results, &query)
   }

   pub async fn find_unique_int(&self, query: impl Into<SqlQuery>) -> Result<i32> {
      self.find_unique(query).await
   }

   pub async fn find_unique_long(&self, query: impl Into<SqlQuery>) -> Result<i64> {
      self.find_unique(query).await
   }

   /// Run a query and build a map keyed by the first column, with the remaining
   /// columns instantiated as values. Rows keep their order.
   pub async fn find_map<K, V>(&self, query: impl Into<SqlQuery>) -> Result<IndexMap<K, V>>
   where
      K: SqlTarget + Hash + Eq,
      V: SqlTarget,
   {
      let table = self.find_table(query).await?;
      result::instantiate_map(&self.inner.provider, table)
   }

   /// Run a write query and return the number of affected rows.
   pub async fn update(&self, query: impl Into<SqlQuery>) -> Result<u64> {
      Ok(self.update_and_get_generated_key(query).await?.rows_affected)
   }

   /// Run a write query and return the affected rows along with the generated row id.
   pub async fn update_and_get_generated_key(&self, query: impl Into<SqlQuery>) -> Result<UpdateResult> {
      self
         .run(query.into(), Access::Write, |conn, sql, values| {
            Box::pin(async move {
               let result = bind_all(&sql, values).execute(&mut *conn).await?;
               Ok::<_, sqlx::Error>(UpdateResult {
                  rows_affected: result.rows_affected(),
                  last_insert_id: result.last_insert_rowid(),
               })
            })
         })
         .await
   }

   /// Run the same write statement once per argument list, all on one connection.
   ///
   /// Without an active transaction the whole batch runs in one implicit transaction,
   /// so either every statement is applied or none is.
   pub async fn update_batch<I>(&self, sql: &str, argument_lists: I) -> Result<Vec<u64>>
   where
      I: IntoIterator<Item = Vec<Argument>>,
   {
      let queries: Vec<SqlQuery> = argument_lists
         .into_iter()
         .map(|arguments| SqlQuery::with_arguments(sql, arguments))
         .collect();
      let batches = queries
         .iter()
         .map(|query| self.resolve_arguments(query.arguments()))
         .collect::<Result<Vec<_>>>()?;

      let settings = self.settings();
      let implicit = settings
         .allow_implicit_transactions
         .then_some(settings.default_isolation);
      let dialect = Arc::clone(self.inner.provider.dialect());
      let sql = sql.to_string();

      trace!("executing batch of {} for {}", queries.len(), sql);
      let start = Instant::now();

      let op = connection_op(move |conn| {
         Box::pin(async move {
            let mut counts = Vec::with_capacity(batches.len());
            for (values, query) in batches.into_iter().zip(&queries) {
               let result = bind_all(&sql, values)
                  .execute(&mut *conn)
                  .await
                  .map_err(|e| dialect.convert_error(e, query))?;
               counts.push(result.rows_affected());
            }
            Ok::<_, crate::Error>(counts)
         })
      });
      let counts = self
         .inner
         .manager
         .with_connection(implicit, Access::Write, op)
         .await?;

      debug!(
         "executed batch of {} in {} ms",
         counts.len(),
         start.elapsed().as_millis()
      );
      Ok(counts)
   }

   /// Close the database connection
   pub async fn close(self) -> Result<()> {
      Arc::clone(&self.inner.database).close().await?;
      Ok(())
   }

   /// Close the database connection and remove all database files
   pub async fn remove(self) -> Result<()> {
      Arc::clone(&self.inner.database).remove().await?;
      Ok(())
   }
}

impl fmt::Debug for Database {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Database")
         .field("path", &self.inner.database.path())
         .field("dialect", &self.dialect().name())
         .field("settings", &self.settings())
         .finish_non_exhaustive()
   }
}

fn bind_all(
   sql: &str,
   values: Vec<Value>,
) -> sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
   values
      .into_iter()
      .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}
