//! Per-database quirks: value representation, transaction statements and error
//! classification

mod generic;
mod sqlite;

use std::fmt;

use crate::conversion::TypeConversionRegistry;
use crate::error::Error;
use crate::query::SqlQuery;
use crate::transactions::Isolation;
use crate::value::Value;

pub use generic::GenericDialect;
pub use sqlite::SqliteDialect;

/// Strategy for the parts of SQL handling that differ between databases.
pub trait Dialect: Send + Sync + fmt::Debug {
   fn name(&self) -> &'static str;

   /// Turn a resolved argument into a value the driver can bind natively.
   fn value_to_database(&self, value: Value) -> crate::Result<Value> {
      Ok(value)
   }

   /// Hook for registering dialect specific conversions when a database is created.
   fn register_type_conversions(&self, _registry: &TypeConversionRegistry) {}

   /// Statements starting a transaction with the given isolation.
   fn begin_statements(&self, isolation: Isolation) -> Vec<String>;

   /// Whether a transaction started with `isolation` holds the write lock right away.
   fn locks_on_begin(&self, _isolation: Isolation) -> bool {
      false
   }

   /// Statements run on the connection after the transaction has ended.
   fn end_statements(&self, _isolation: Isolation) -> Vec<String> {
      Vec::new()
   }

   fn commit_statement(&self) -> &'static str {
      "COMMIT"
   }

   fn rollback_statement(&self) -> &'static str {
      "ROLLBACK"
   }

   fn savepoint_statement(&self, name: &str) -> String {
      format!("SAVEPOINT {name}")
   }

   fn rollback_to_savepoint_statement(&self, name: &str) -> String {
      format!("ROLLBACK TO SAVEPOINT {name}")
   }

   fn release_savepoint_statement(&self, name: &str) -> String {
      format!("RELEASE SAVEPOINT {name}")
   }

   /// Wrap a driver error raised by `query`, classifying transaction failures.
   fn convert_error(&self, error: sqlx::Error, query: &SqlQuery) -> Error;
}

/// Wrap `error` as a plain query error.
pub(crate) fn query_error(error: sqlx::Error, query: &SqlQuery) -> Error {
   Error::Query {
      query: query.to_string(),
      source: error,
   }
}
