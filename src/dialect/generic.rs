use super::{Dialect, query_error};
use crate::error::Error;
use crate::query::SqlQuery;
use crate::transactions::Isolation;

/// Dialect following ANSI SQL: isolation is set with `SET TRANSACTION` and
/// failures are classified by SQLSTATE.
///
/// SQLite does not understand `SET TRANSACTION`, so on SQLite connections only
/// [`Isolation::Default`] works; any other level fails at the start of the
/// transaction with [`Error::Query`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericDialect;

/// SQLSTATE class 40 is "transaction rollback"; 40001 is a serialization failure.
fn classify(sql_state: &str) -> Option<bool> {
   match sql_state {
      "40001" => Some(true),
      state if state.starts_with("40") => Some(false),
      _ => None,
   }
}

impl Dialect for GenericDialect {
   fn name(&self) -> &'static str {
      "generic"
   }

   fn begin_statements(&self, isolation: Isolation) -> Vec<String> {
      let mut statements = vec!["BEGIN".to_string()];
      if let Some(level) = isolation.sql_name() {
         statements.push(format!("SET TRANSACTION ISOLATION LEVEL {level}"));
      }
      statements
   }

   fn convert_error(&self, error: sqlx::Error, query: &SqlQuery) -> Error {
      let class = error
         .as_database_error()
         .and_then(|db_err| db_err.code())
         .and_then(|state| classify(&state));

      match class {
         Some(true) => Error::TransactionSerialization {
            query: query.to_string(),
            source: error,
         },
         Some(false) => Error::TransactionRollback {
            query: query.to_string(),
            source: error,
         },
         None => query_error(error, query),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_sql_state_classes() {
      assert_eq!(classify("40001"), Some(true));
      assert_eq!(classify("40P01"), Some(false));
      assert_eq!(classify("23505"), None);
   }

   #[test]
   fn test_isolation_statement() {
      let dialect = GenericDialect;
      assert_eq!(dialect.begin_statements(Isolation::Default), vec!["BEGIN"]);
      assert_eq!(
         dialect.begin_statements(Isolation::RepeatableRead),
         vec!["BEGIN", "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ"]
      );
   }
}
