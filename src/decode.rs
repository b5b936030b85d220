//! Conversion between SQLite rows and [`Value`]s

use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteColumn, SqliteRow, SqliteValueRef};
use sqlx::{Column, Row, Sqlite, TypeInfo, Value as _, ValueRef};

use crate::result::{ColumnMetadata, ResultTable};
use crate::value::{Value, ValueKind, parse_date, parse_datetime, parse_time, parse_timestamp};
use crate::{Error, Result};

/// Decode a single cell by its storage class.
///
/// SQLite reports the storage class of non-null values, so only the five basic kinds
/// come out of here. Declared column types are applied afterwards by [`refine`].
fn decode_value(value: SqliteValueRef) -> Result<Value> {
   if value.is_null() {
      return Ok(Value::Null);
   }

   let storage = value.type_info().name().to_string();
   let owned = value.to_owned();
   let decoded = match storage.as_str() {
      "INTEGER" | "BOOLEAN" => owned.try_decode::<i64>().map(Value::Integer),
      "REAL" => owned.try_decode::<f64>().map(Value::Real),
      "BLOB" => owned.try_decode::<Vec<u8>>().map(Value::Blob),
      _ => owned.try_decode::<String>().map(Value::Text),
   };

   decoded.map_err(|e| Error::Conversion(format!("failed to decode {storage} value: {e}")))
}

/// Kind implied by the declared type of a column, `None` if the values decide.
fn declared_kind(type_name: &str) -> Option<ValueKind> {
   match type_name {
      "BOOLEAN" => Some(ValueKind::Boolean),
      "DATE" => Some(ValueKind::Date),
      "TIME" => Some(ValueKind::Time),
      "DATETIME" => Some(ValueKind::DateTime),
      "INTEGER" => Some(ValueKind::Integer),
      "REAL" => Some(ValueKind::Real),
      "TEXT" => Some(ValueKind::Text),
      "BLOB" => Some(ValueKind::Blob),
      // NUMERIC affinity and expression columns without a declared type
      _ => None,
   }
}

/// Interpret a raw cell according to the kind of its column.
///
/// Values that don't fit the declared kind are kept as stored; SQLite does not
/// enforce column types.
fn refine(value: Value, kind: ValueKind) -> Value {
   match (kind, value) {
      (ValueKind::Boolean, Value::Integer(v)) => Value::Boolean(v != 0),
      (ValueKind::Date, Value::Text(text)) => match parse_date(&text) {
         Some(date) => Value::Date(date),
         None => Value::Text(text),
      },
      (ValueKind::Time, Value::Text(text)) => match parse_time(&text) {
         Some(time) => Value::Time(time),
         None => Value::Text(text),
      },
      (ValueKind::DateTime, Value::Text(text)) => {
         if let Some(datetime) = parse_datetime(&text) {
            Value::DateTime(datetime)
         } else if let Some(timestamp) = parse_timestamp(&text) {
            Value::Timestamp(timestamp)
         } else {
            Value::Text(text)
         }
      }
      (_, value) => value,
   }
}

/// Build a result table from the columns of a statement and the rows it returned.
pub(crate) fn decode_table(columns: &[SqliteColumn], rows: &[SqliteRow]) -> Result<ResultTable> {
   let mut values = rows
      .iter()
      .map(|row| {
         (0..columns.len())
            .map(|index| decode_value(row.try_get_raw(index)?))
            .collect::<Result<Vec<_>>>()
      })
      .collect::<Result<Vec<_>>>()?;

   let metadata: Vec<ColumnMetadata> = columns
      .iter()
      .enumerate()
      .map(|(index, column)| {
         let type_name = column.type_info().name();
         let kind = declared_kind(type_name).unwrap_or_else(|| {
            values
               .iter()
               .map(|row| &row[index])
               .find(|value| !value.is_null())
               .map_or(ValueKind::Null, Value::kind)
         });
         let declared_type = (type_name != "NULL").then(|| type_name.to_string());
         ColumnMetadata::new(index, column.name().to_string(), kind, declared_type)
      })
      .collect();

   for row in &mut values {
      for (value, column) in row.iter_mut().zip(&metadata) {
         *value = refine(std::mem::replace(value, Value::Null), column.kind());
      }
   }

   Ok(ResultTable::new(metadata, values))
}

/// Bind a value that the dialect has already brought into a bindable form.
pub(crate) fn bind_value<'q>(
   query: Query<'q, Sqlite, SqliteArguments<'q>>,
   value: Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
   match value {
      Value::Null => query.bind(None::<i64>),
      Value::Boolean(v) => query.bind(v),
      Value::Integer(v) => query.bind(v),
      Value::Real(v) => query.bind(v),
      Value::Text(v) => query.bind(v),
      Value::Blob(v) => query.bind(v),
      Value::Json(_) | Value::Array(_) => query.bind(value.to_json().to_string()),
      temporal => query.bind(temporal.as_text().map(|text| text.into_owned())),
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use time::macros::{date, datetime, time};

   #[test]
   fn test_declared_kinds() {
      assert_eq!(declared_kind("BOOLEAN"), Some(ValueKind::Boolean));
      assert_eq!(declared_kind("DATETIME"), Some(ValueKind::DateTime));
      assert_eq!(declared_kind("INTEGER"), Some(ValueKind::Integer));
      assert_eq!(declared_kind("NUMERIC"), None);
      assert_eq!(declared_kind("NULL"), None);
   }

   #[test]
   fn test_refine_declared_values() {
      assert_eq!(refine(Value::Integer(1), ValueKind::Boolean), Value::Boolean(true));
      assert_eq!(
         refine(Value::Text("2024-02-29".into()), ValueKind::Date),
         Value::Date(date!(2024 - 02 - 29))
      );
      assert_eq!(
         refine(Value::Text("10:15:30".into()), ValueKind::Time),
         Value::Time(time!(10:15:30))
      );
      assert_eq!(
         refine(Value::Text("2024-02-29 10:15:30".into()), ValueKind::DateTime),
         Value::DateTime(datetime!(2024-02-29 10:15:30))
      );
   }

   #[test]
   fn test_refine_keeps_values_that_do_not_parse() {
      assert_eq!(
         refine(Value::Text("yesterday".into()), ValueKind::Date),
         Value::Text("yesterday".into())
      );
      assert_eq!(refine(Value::Null, ValueKind::Boolean), Value::Null);
      assert_eq!(refine(Value::Integer(4), ValueKind::Text), Value::Integer(4));
   }

   #[test]
   fn test_refine_datetime_with_offset() {
      assert_eq!(
         refine(Value::Text("2024-02-29T10:15:30+02:00".into()), ValueKind::DateTime),
         Value::Timestamp(datetime!(2024-02-29 10:15:30 +02:00))
      );
   }
}
