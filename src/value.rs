//! Database values and their kinds

use std::borrow::Cow;
use std::fmt;

use serde_json::Value as JsonValue;
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
const TIME_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[hour]:[minute]:[second]");
const TIME_FRACTION_FORMAT: &[BorrowedFormatItem<'static>] =
   format_description!("[hour]:[minute]:[second].[subsecond]");
const TIME_PARSE_FORMAT: &[BorrowedFormatItem<'static>] =
   format_description!("[hour]:[minute]:[second][optional [.[subsecond]]]");
const DATETIME_PARSE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
   "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
);
const DATETIME_T_PARSE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
   "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
);

/// A single value read from or written to the database.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
   Null,
   Boolean(bool),
   Integer(i64),
   Real(f64),
   Text(String),
   Blob(Vec<u8>),
   Date(Date),
   Time(Time),
   /// Date and time without an offset.
   DateTime(PrimitiveDateTime),
   /// Date and time with an offset.
   Timestamp(OffsetDateTime),
   Json(JsonValue),
   Array(Vec<Value>),
}

/// The kind of a [`Value`], used as the source side of conversion lookups.
///
/// Besides one kind per `Value` variant there are two abstract kinds, `Numeric` and
/// `Any`, which no value has but which conversions can be registered for. A lookup for
/// a kind falls back to its parents, so a conversion registered for `Numeric` applies
/// to integers, reals and booleans alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
   Null,
   Boolean,
   Integer,
   Real,
   Numeric,
   Text,
   Blob,
   Date,
   Time,
   DateTime,
   Timestamp,
   Json,
   Array,
   Any,
}

impl ValueKind {
   /// The more general kind this kind's values can also be read as.
   pub fn parent(self) -> Option<ValueKind> {
      match self {
         ValueKind::Boolean => Some(ValueKind::Integer),
         ValueKind::Integer | ValueKind::Real => Some(ValueKind::Numeric),
         ValueKind::Date
         | ValueKind::Time
         | ValueKind::DateTime
         | ValueKind::Timestamp
         | ValueKind::Json => Some(ValueKind::Text),
         ValueKind::Numeric
         | ValueKind::Text
         | ValueKind::Blob
         | ValueKind::Array
         | ValueKind::Null => Some(ValueKind::Any),
         ValueKind::Any => None,
      }
   }

   /// This kind followed by all of its parents, most specific first.
   pub fn ancestors(self) -> impl Iterator<Item = ValueKind> {
      std::iter::successors(Some(self), |kind| kind.parent())
   }

   /// Returns true if values of `other` may be read wherever this kind is expected.
   pub fn is_assignable_from(self, other: ValueKind) -> bool {
      other.ancestors().any(|kind| kind == self)
   }
}

impl fmt::Display for ValueKind {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let name = match self {
         ValueKind::Null => "NULL",
         ValueKind::Boolean => "BOOLEAN",
         ValueKind::Integer => "INTEGER",
         ValueKind::Real => "REAL",
         ValueKind::Numeric => "NUMERIC",
         ValueKind::Text => "TEXT",
         ValueKind::Blob => "BLOB",
         ValueKind::Date => "DATE",
         ValueKind::Time => "TIME",
         ValueKind::DateTime => "DATETIME",
         ValueKind::Timestamp => "TIMESTAMP",
         ValueKind::Json => "JSON",
         ValueKind::Array => "ARRAY",
         ValueKind::Any => "ANY",
      };
      f.write_str(name)
   }
}

impl Value {
   pub fn kind(&self) -> ValueKind {
      match self {
         Value::Null => ValueKind::Null,
         Value::Boolean(_) => ValueKind::Boolean,
         Value::Integer(_) => ValueKind::Integer,
         Value::Real(_) => ValueKind::Real,
         Value::Text(_) => ValueKind::Text,
         Value::Blob(_) => ValueKind::Blob,
         Value::Date(_) => ValueKind::Date,
         Value::Time(_) => ValueKind::Time,
         Value::DateTime(_) => ValueKind::DateTime,
         Value::Timestamp(_) => ValueKind::Timestamp,
         Value::Json(_) => ValueKind::Json,
         Value::Array(_) => ValueKind::Array,
      }
   }

   pub fn is_null(&self) -> bool {
      matches!(self, Value::Null)
   }

   /// Integer view of the value. Booleans read as 0/1, reals only when integral.
   pub fn as_i64(&self) -> Option<i64> {
      match self {
         Value::Integer(v) => Some(*v),
         Value::Boolean(v) => Some(i64::from(*v)),
         Value::Real(v) if v.fract() == 0.0 && *v >= i64::MIN as f64 && *v < i64::MAX as f64 => {
            Some(*v as i64)
         }
         _ => None,
      }
   }

   pub fn as_f64(&self) -> Option<f64> {
      match self {
         Value::Real(v) => Some(*v),
         Value::Integer(v) => Some(*v as f64),
         Value::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
         _ => None,
      }
   }

   /// Textual view of the value. Date, time and JSON values render in the
   /// format they are stored in.
   pub fn as_text(&self) -> Option<Cow<'_, str>> {
      match self {
         Value::Text(v) => Some(Cow::Borrowed(v)),
         Value::Date(_) | Value::Time(_) | Value::DateTime(_) | Value::Timestamp(_) => {
            self.temporal_text().map(Cow::Owned)
         }
         Value::Json(v) => Some(Cow::Owned(v.to_string())),
         _ => None,
      }
   }

   fn temporal_text(&self) -> Option<String> {
      match self {
         Value::Date(v) => v.format(DATE_FORMAT).ok(),
         Value::Time(v) => format_time(*v),
         Value::DateTime(v) => Some(format!(
            "{} {}",
            v.date().format(DATE_FORMAT).ok()?,
            format_time(v.time())?
         )),
         Value::Timestamp(v) => v.format(&Rfc3339).ok(),
         _ => None,
      }
   }

   /// Lossy conversion to JSON, used when arrays are stored as JSON text.
   pub fn to_json(&self) -> JsonValue {
      use base64::Engine;

      match self {
         Value::Null => JsonValue::Null,
         Value::Boolean(v) => JsonValue::Bool(*v),
         Value::Integer(v) => JsonValue::from(*v),
         Value::Real(v) => JsonValue::from(*v),
         Value::Text(v) => JsonValue::String(v.clone()),
         Value::Blob(v) => JsonValue::String(base64::engine::general_purpose::STANDARD.encode(v)),
         Value::Json(v) => v.clone(),
         Value::Array(values) => JsonValue::Array(values.iter().map(Value::to_json).collect()),
         temporal => temporal
            .temporal_text()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null),
      }
   }

   /// Inverse of [`Value::to_json`] for the shapes JSON can express.
   pub fn from_json(json: JsonValue) -> Value {
      match json {
         JsonValue::Null => Value::Null,
         JsonValue::Bool(v) => Value::Boolean(v),
         JsonValue::Number(n) => match n.as_i64() {
            Some(v) => Value::Integer(v),
            None => Value::Real(n.as_f64().unwrap_or_default()),
         },
         JsonValue::String(v) => Value::Text(v),
         JsonValue::Array(values) => Value::Array(values.into_iter().map(Value::from_json).collect()),
         object @ JsonValue::Object(_) => Value::Json(object),
      }
   }
}

fn format_time(time: Time) -> Option<String> {
   let format = if time.nanosecond() == 0 {
      TIME_FORMAT
   } else {
      TIME_FRACTION_FORMAT
   };
   time.format(format).ok()
}

pub(crate) fn parse_date(text: &str) -> Option<Date> {
   Date::parse(text.trim(), DATE_FORMAT).ok()
}

pub(crate) fn parse_time(text: &str) -> Option<Time> {
   Time::parse(text.trim(), TIME_PARSE_FORMAT).ok()
}

pub(crate) fn parse_datetime(text: &str) -> Option<PrimitiveDateTime> {
   let text = text.trim();
   PrimitiveDateTime::parse(text, DATETIME_PARSE_FORMAT)
      .or_else(|_| PrimitiveDateTime::parse(text, DATETIME_T_PARSE_FORMAT))
      .ok()
}

pub(crate) fn parse_timestamp(text: &str) -> Option<OffsetDateTime> {
   OffsetDateTime::parse(text.trim(), &Rfc3339).ok()
}

impl fmt::Display for Value {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Value::Null => f.write_str("null"),
         Value::Boolean(v) => write!(f, "{v}"),
         Value::Integer(v) => write!(f, "{v}"),
         Value::Real(v) => write!(f, "{v}"),
         Value::Text(v) => write!(f, "'{v}'"),
         Value::Blob(v) => write!(f, "<{} bytes>", v.len()),
         Value::Json(v) => write!(f, "{v}"),
         Value::Array(values) => {
            f.write_str("[")?;
            for (i, value) in values.iter().enumerate() {
               if i > 0 {
                  f.write_str(", ")?;
               }
               write!(f, "{value}")?;
            }
            f.write_str("]")
         }
         temporal => write!(f, "'{}'", temporal.temporal_text().unwrap_or_default()),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use time::macros::{date, datetime, time};

   #[test]
   fn test_kind_ancestors() {
      let chain: Vec<_> = ValueKind::Boolean.ancestors().collect();
      assert_eq!(
         chain,
         vec![
            ValueKind::Boolean,
            ValueKind::Integer,
            ValueKind::Numeric,
            ValueKind::Any
         ]
      );

      let chain: Vec<_> = ValueKind::Date.ancestors().collect();
      assert_eq!(chain, vec![ValueKind::Date, ValueKind::Text, ValueKind::Any]);
   }

   #[test]
   fn test_assignability_follows_hierarchy() {
      assert!(ValueKind::Numeric.is_assignable_from(ValueKind::Real));
      assert!(ValueKind::Text.is_assignable_from(ValueKind::DateTime));
      assert!(ValueKind::Any.is_assignable_from(ValueKind::Blob));
      assert!(!ValueKind::Integer.is_assignable_from(ValueKind::Real));
      assert!(!ValueKind::Date.is_assignable_from(ValueKind::Text));
   }

   #[test]
   fn test_numeric_views() {
      assert_eq!(Value::Boolean(true).as_i64(), Some(1));
      assert_eq!(Value::Real(4.0).as_i64(), Some(4));
      assert_eq!(Value::Real(4.5).as_i64(), None);
      // 2^63 does not fit, even though i64::MAX as f64 rounds to it
      assert_eq!(Value::Real(9.223372036854775808e18).as_i64(), None);
      assert_eq!(Value::Real(-9.223372036854775808e18).as_i64(), Some(i64::MIN));
      assert_eq!(Value::Integer(3).as_f64(), Some(3.0));
      assert_eq!(Value::Text("3".into()).as_i64(), None);
   }

   #[test]
   fn test_temporal_text_round_trips_through_parsers() {
      let d = Value::Date(date!(2024 - 02 - 29));
      assert_eq!(d.as_text().unwrap(), "2024-02-29");
      assert_eq!(parse_date("2024-02-29"), Some(date!(2024 - 02 - 29)));

      let t = Value::Time(time!(13:45:10));
      assert_eq!(t.as_text().unwrap(), "13:45:10");
      assert_eq!(Value::Time(time!(13:45:10.25)).as_text().unwrap(), "13:45:10.25");
      assert_eq!(parse_time("13:45:10.25"), Some(time!(13:45:10.25)));

      let dt = Value::DateTime(datetime!(2024-01-02 03:04:05));
      assert_eq!(dt.as_text().unwrap(), "2024-01-02 03:04:05");
      assert_eq!(
         parse_datetime("2024-01-02T03:04:05"),
         Some(datetime!(2024-01-02 03:04:05))
      );
   }

   #[test]
   fn test_display() {
      assert_eq!(Value::Text("abc".into()).to_string(), "'abc'");
      assert_eq!(Value::Null.to_string(), "null");
      assert_eq!(
         Value::Array(vec![Value::Integer(1), Value::Integer(2)]).to_string(),
         "[1, 2]"
      );
      assert_eq!(Value::Blob(vec![1, 2, 3]).to_string(), "<3 bytes>");
   }

   #[test]
   fn test_json_round_trip_of_arrays() {
      let value = Value::Array(vec![Value::Integer(1), Value::Text("x".into()), Value::Null]);
      assert_eq!(Value::from_json(value.to_json()), value);
   }
}
