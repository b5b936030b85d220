use serde::{Serialize, Serializer};

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error report, e.g. for logging or for returning over an API boundary.
#[derive(Serialize)]
struct ErrorResponse {
   code: String,
   message: String,
}

/// Error types for database access, mapping and transactions.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from SQLx operations that did not run a query.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// Error from the connection manager.
   #[error(transparent)]
   ConnectionManager(#[from] sqlx_sqlite_conn_mgr::Error),

   /// The database rejected a query.
   #[error("{source} [query: {query}]")]
   Query {
      query: String,
      #[source]
      source: sqlx::Error,
   },

   /// The transaction could not be serialized with concurrent ones and may be retried.
   #[error("transaction serialization failure: {source} [query: {query}]")]
   TransactionSerialization {
      query: String,
      #[source]
      source: sqlx::Error,
   },

   /// The database rolled the transaction back on its own.
   #[error("transaction rolled back by the database: {source} [query: {query}]")]
   TransactionRollback {
      query: String,
      #[source]
      source: sqlx::Error,
   },

   /// A query expected to return exactly one row returned none.
   #[error("expected exactly one row, but query returned none [query: {query}]")]
   EmptyResult { query: String },

   /// A query expected to return at most one row returned several.
   #[error("expected at most one row, but query returned {count} [query: {query}]")]
   NonUniqueResult { count: usize, query: String },

   /// The result had a shape the caller could not process.
   #[error("unexpected result: {0}")]
   UnexpectedResult(String),

   /// No way was found to build the requested type from the result columns.
   #[error("instantiation failed: {0}")]
   Instantiation(String),

   /// A value could not be converted between its database and Rust representations.
   #[error("conversion failed: {0}")]
   Conversion(String),

   /// Malformed SQL passed to the named parameter parser.
   #[error("{message} [sql: {sql}]")]
   SqlSyntax { message: String, sql: String },

   /// A named parameter had no value.
   #[error("{0}")]
   VariableResolution(String),

   /// An operation requiring a transaction ran outside of one.
   #[error("no active transaction: {0}")]
   NoActiveTransaction(String),

   /// A transaction was active where propagation forbids one.
   #[error("illegal transaction state: {0}")]
   IllegalTransactionState(String),

   /// Transaction failed and rollback also failed.
   #[error("transaction failed: {transaction_error}; rollback also failed: {rollback_error}")]
   TransactionRollbackFailed {
      transaction_error: String,
      rollback_error: String,
   },

   /// Transaction has already been committed or rolled back.
   #[error("transaction has already been finalized (committed or rolled back)")]
   TransactionAlreadyFinalized,

   /// Invalid argument passed to a builder.
   #[error("invalid argument: {0}")]
   InvalidArgument(String),

   /// Error raised by application code running inside a transaction.
   #[error(transparent)]
   Callback(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
   /// Wrap an application error so it can be returned from a transaction callback.
   pub fn callback(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
      Error::Callback(error.into())
   }

   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Sqlx(e)
         | Error::Query { source: e, .. }
         | Error::TransactionSerialization { source: e, .. }
         | Error::TransactionRollback { source: e, .. } => {
            // Extract SQLite error codes from sqlx errors
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::ConnectionManager(_) => "CONNECTION_ERROR".to_string(),
         Error::EmptyResult { .. } => "EMPTY_RESULT".to_string(),
         Error::NonUniqueResult { .. } => "NON_UNIQUE_RESULT".to_string(),
         Error::UnexpectedResult(_) => "UNEXPECTED_RESULT".to_string(),
         Error::Instantiation(_) => "INSTANTIATION_FAILED".to_string(),
         Error::Conversion(_) => "CONVERSION_FAILED".to_string(),
         Error::SqlSyntax { .. } => "SQL_SYNTAX".to_string(),
         Error::VariableResolution(_) => "VARIABLE_RESOLUTION".to_string(),
         Error::NoActiveTransaction(_) => "NO_ACTIVE_TRANSACTION".to_string(),
         Error::IllegalTransactionState(_) => "ILLEGAL_TRANSACTION_STATE".to_string(),
         Error::TransactionRollbackFailed { .. } => "TRANSACTION_ROLLBACK_FAILED".to_string(),
         Error::TransactionAlreadyFinalized => "TRANSACTION_ALREADY_FINALIZED".to_string(),
         Error::InvalidArgument(_) => "INVALID_ARGUMENT".to_string(),
         Error::Callback(_) => "CALLBACK_ERROR".to_string(),
      }
   }

   /// Returns true for failures that a retried transaction may not hit again.
   pub fn is_serialization_failure(&self) -> bool {
      matches!(self, Error::TransactionSerialization { .. })
   }

   /// The query this error was raised for, if any.
   pub fn query(&self) -> Option<&str> {
      match self {
         Error::Query { query, .. }
         | Error::TransactionSerialization { query, .. }
         | Error::TransactionRollback { query, .. }
         | Error::EmptyResult { query }
         | Error::NonUniqueResult { query, .. } => Some(query),
         _ => None,
      }
   }
}

impl Serialize for Error {
   fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
   where
      S: Serializer,
   {
      let response = ErrorResponse {
         code: self.error_code(),
         message: self.to_string(),
      };
      response.serialize(serializer)
   }
}
