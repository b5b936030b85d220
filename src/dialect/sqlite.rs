use super::{Dialect, query_error};
use crate::error::Error;
use crate::query::SqlQuery;
use crate::transactions::Isolation;
use crate::value::Value;

// Primary result codes, see https://www.sqlite.org/rescode.html
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Dialect for SQLite.
///
/// SQLite has no date, time, array or JSON column types, so such values are stored as
/// text: ISO-8601 for dates and times, JSON for arrays.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
   fn name(&self) -> &'static str {
      "sqlite"
   }

   fn value_to_database(&self, value: Value) -> crate::Result<Value> {
      Ok(match value {
         Value::Date(_) | Value::Time(_) | Value::DateTime(_) | Value::Timestamp(_) => value
            .as_text()
            .map(|text| Value::Text(text.into_owned()))
            .unwrap_or(Value::Null),
         Value::Array(_) | Value::Json(_) => Value::Text(value.to_json().to_string()),
         other => other,
      })
   }

   fn begin_statements(&self, isolation: Isolation) -> Vec<String> {
      match isolation {
         // Take the write lock up front so that concurrent writers fail fast with BUSY
         Isolation::Serializable => vec!["BEGIN IMMEDIATE".into()],
         Isolation::ReadUncommitted => vec!["PRAGMA read_uncommitted = 1".into(), "BEGIN".into()],
         _ => vec!["BEGIN".into()],
      }
   }

   fn locks_on_begin(&self, isolation: Isolation) -> bool {
      isolation == Isolation::Serializable
   }

   fn end_statements(&self, isolation: Isolation) -> Vec<String> {
      match isolation {
         Isolation::ReadUncommitted => vec!["PRAGMA read_uncommitted = 0".into()],
         _ => Vec::new(),
      }
   }

   fn convert_error(&self, error: sqlx::Error, query: &SqlQuery) -> Error {
      let code = error
         .as_database_error()
         .and_then(|db_err| db_err.code())
         .and_then(|code| code.parse::<i32>().ok());

      match code.map(|code| code & 0xff) {
         Some(SQLITE_BUSY | SQLITE_LOCKED) => Error::TransactionSerialization {
            query: query.to_string(),
            source: error,
         },
         _ => query_error(error, query),
      }
   }
}
