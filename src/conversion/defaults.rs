use serde_json::Value as JsonValue;
use time::{OffsetDateTime, PrimitiveDateTime};
use url::Url;
use uuid::Uuid;

use super::{SqlTarget, TypeConversionRegistry, unconvertible};
use crate::value::{Value, ValueKind, parse_date, parse_datetime, parse_time, parse_timestamp};
use crate::{Error, Result};

pub(super) fn register_defaults(registry: &TypeConversionRegistry) {
   register_numeric_conversions(registry);
   register_text_conversions(registry);
   register_temporal_conversions(registry);
   register_identifier_conversions(registry);
   register_json_conversions(registry);
}

fn register_integer<T>(registry: &TypeConversionRegistry)
where
   T: SqlTarget + TryFrom<i64>,
{
   registry.register_conversion_from_database(ValueKind::Numeric, |value: Value| {
      let name = std::any::type_name::<T>();
      let integer = value
         .as_i64()
         .ok_or_else(|| unconvertible(&value, name))?;
      T::try_from(integer)
         .map_err(|_| Error::Conversion(format!("value {integer} is out of range for {name}")))
   });
}

fn register_numeric_conversions(registry: &TypeConversionRegistry) {
   register_integer::<i8>(registry);
   register_integer::<i16>(registry);
   register_integer::<i32>(registry);
   register_integer::<i64>(registry);
   register_integer::<isize>(registry);
   register_integer::<u8>(registry);
   register_integer::<u16>(registry);
   register_integer::<u32>(registry);
   register_integer::<u64>(registry);
   register_integer::<usize>(registry);

   registry.register_conversion_from_database(ValueKind::Numeric, |value: Value| {
      value.as_f64().ok_or_else(|| unconvertible(&value, "f64"))
   });
   registry.register_conversion_from_database(ValueKind::Numeric, |value: Value| {
      value
         .as_f64()
         .map(|v| v as f32)
         .ok_or_else(|| unconvertible(&value, "f32"))
   });
   registry.register_conversion_from_database(ValueKind::Numeric, |value: Value| {
      value
         .as_f64()
         .map(|v| v != 0.0)
         .ok_or_else(|| unconvertible(&value, "bool"))
   });
}

fn register_text_conversions(registry: &TypeConversionRegistry) {
   registry.register_conversion_from_database(ValueKind::Text, |value: Value| match value {
      Value::Text(text) => Ok(text),
      other => other
         .as_text()
         .map(|text| text.into_owned())
         .ok_or_else(|| unconvertible(&other, "String")),
   });
}

fn parse_text<T>(value: &Value, name: &str, parse: fn(&str) -> Option<T>) -> Result<T> {
   value
      .as_text()
      .and_then(|text| parse(&text))
      .ok_or_else(|| unconvertible(value, name))
}

fn register_temporal_conversions(registry: &TypeConversionRegistry) {
   registry.register_conversion_from_database(ValueKind::Text, |value: Value| {
      parse_text(&value, "Date", parse_date)
   });
   registry.register_conversion_from_database(ValueKind::Text, |value: Value| {
      parse_text(&value, "Time", parse_time)
   });
   registry.register_conversion_from_database(ValueKind::Text, |value: Value| {
      parse_text(&value, "PrimitiveDateTime", parse_datetime)
   });
   registry.register_conversion_from_database(ValueKind::Text, |value: Value| {
      parse_text(&value, "OffsetDateTime", |text| {
         parse_timestamp(text).or_else(|| parse_datetime(text).map(|dt| dt.assume_utc()))
      })
   });

   // Integer timestamps are seconds since the Unix epoch
   registry.register_conversion_from_database(ValueKind::Integer, |value: Value| {
      let seconds = value
         .as_i64()
         .ok_or_else(|| unconvertible(&value, "OffsetDateTime"))?;
      OffsetDateTime::from_unix_timestamp(seconds)
         .map_err(|e| Error::Conversion(format!("invalid unix timestamp {seconds}: {e}")))
   });

   registry.register_conversion_from_database(ValueKind::DateTime, |value: Value| match value {
      Value::DateTime(dt) => Ok(dt.assume_utc()),
      other => Err(unconvertible(&other, "OffsetDateTime")),
   });
   registry.register_conversion_from_database(ValueKind::DateTime, |value: Value| match value {
      Value::DateTime(dt) => Ok(dt.date()),
      other => Err(unconvertible(&other, "Date")),
   });
   registry.register_conversion_from_database(ValueKind::Timestamp, |value: Value| match value {
      Value::Timestamp(ts) => Ok(PrimitiveDateTime::new(ts.date(), ts.time())),
      other => Err(unconvertible(&other, "PrimitiveDateTime")),
   });
   registry.register_conversion_from_database(ValueKind::Date, |value: Value| match value {
      Value::Date(date) => Ok(date.midnight()),
      other => Err(unconvertible(&other, "PrimitiveDateTime")),
   });
}

fn register_identifier_conversions(registry: &TypeConversionRegistry) {
   registry.register_conversions(
      ValueKind::Text,
      |value: Value| {
         let text = value.as_text().ok_or_else(|| unconvertible(&value, "Uuid"))?;
         Uuid::parse_str(text.trim()).map_err(|e| Error::Conversion(format!("invalid UUID {value}: {e}")))
      },
      |uuid: &Uuid| Ok(Value::Text(uuid.to_string())),
   );
   registry.register_conversion_from_database(ValueKind::Blob, |value: Value| match value {
      Value::Blob(bytes) => Uuid::from_slice(&bytes)
         .map_err(|e| Error::Conversion(format!("invalid UUID bytes: {e}"))),
      other => Err(unconvertible(&other, "Uuid")),
   });

   registry.register_conversions(
      ValueKind::Text,
      |value: Value| {
         let text = value.as_text().ok_or_else(|| unconvertible(&value, "Url"))?;
         Url::parse(text.trim()).map_err(|e| Error::Conversion(format!("invalid URL {value}: {e}")))
      },
      |url: &Url| Ok(Value::Text(url.to_string())),
   );
}

fn register_json_conversions(registry: &TypeConversionRegistry) {
   registry.register_conversion_from_database(ValueKind::Any, |value: Value| Ok(value.to_json()));

   // Text holding a JSON document parses; any other text becomes a JSON string
   registry.register_conversion_from_database(ValueKind::Text, |value: Value| match value {
      Value::Text(text) => Ok(serde_json::from_str::<JsonValue>(&text).unwrap_or(JsonValue::String(text))),
      other => Ok(other.to_json()),
   });
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::conversion::{TargetType, downcast};
   use time::Date;
   use time::macros::{date, datetime};

   fn convert<T: SqlTarget>(value: Value) -> Result<T> {
      let registry = TypeConversionRegistry::with_defaults();
      let conversion = registry
         .find_conversion_from_database(value.kind(), &T::target_type())
         .ok_or_else(|| Error::Conversion("no conversion".into()))?;
      downcast::<T>(conversion.convert(value)?)
   }

   #[test]
   fn test_numeric_narrowing() {
      assert_eq!(convert::<i32>(Value::Integer(42)).unwrap(), 42);
      assert_eq!(convert::<u8>(Value::Real(7.0)).unwrap(), 7);
      assert_eq!(convert::<i64>(Value::Boolean(true)).unwrap(), 1);
      assert!(convert::<u8>(Value::Integer(300)).is_err());
      assert!(convert::<i32>(Value::Real(1.5)).is_err());
   }

   #[test]
   fn test_numeric_to_float_and_bool() {
      assert_eq!(convert::<f64>(Value::Integer(2)).unwrap(), 2.0);
      assert_eq!(convert::<f32>(Value::Real(0.5)).unwrap(), 0.5);
      assert!(convert::<bool>(Value::Integer(1)).unwrap());
      assert!(!convert::<bool>(Value::Integer(0)).unwrap());
   }

   #[test]
   fn test_text_to_temporal() {
      assert_eq!(
         convert::<Date>(Value::Text("2023-06-01".into())).unwrap(),
         date!(2023 - 06 - 01)
      );
      assert_eq!(
         convert::<PrimitiveDateTime>(Value::Text("2023-06-01 10:20:30".into())).unwrap(),
         datetime!(2023-06-01 10:20:30)
      );
      assert_eq!(
         convert::<OffsetDateTime>(Value::Text("2023-06-01T10:20:30Z".into())).unwrap(),
         datetime!(2023-06-01 10:20:30 UTC)
      );
      assert!(convert::<Date>(Value::Text("yesterday".into())).is_err());
   }

   #[test]
   fn test_unix_seconds_to_timestamp() {
      assert_eq!(
         convert::<OffsetDateTime>(Value::Integer(0)).unwrap(),
         OffsetDateTime::UNIX_EPOCH
      );
   }

   #[test]
   fn test_uuid_from_text_and_blob() {
      let id = Uuid::new_v4();
      assert_eq!(convert::<Uuid>(Value::Text(id.to_string())).unwrap(), id);
      assert_eq!(convert::<Uuid>(Value::Blob(id.as_bytes().to_vec())).unwrap(), id);
      assert!(convert::<Uuid>(Value::Text("nope".into())).is_err());
   }

   #[test]
   fn test_url_round_trip() {
      let registry = TypeConversionRegistry::with_defaults();
      let url = Url::parse("https://example.com/a?b=c").unwrap();
      let to_db = registry
         .find_conversion_to_database(std::any::TypeId::of::<Url>())
         .unwrap();
      let stored = to_db(&url).unwrap();
      assert_eq!(stored, Value::Text("https://example.com/a?b=c".into()));
      assert_eq!(convert::<Url>(stored).unwrap(), url);
   }

   #[test]
   fn test_json_from_text() {
      assert_eq!(
         convert::<JsonValue>(Value::Text(r#"{"a":1}"#.into())).unwrap(),
         serde_json::json!({"a": 1})
      );
      assert_eq!(
         convert::<JsonValue>(Value::Text("plain".into())).unwrap(),
         JsonValue::String("plain".into())
      );
      assert_eq!(
         convert::<JsonValue>(Value::Integer(3)).unwrap(),
         serde_json::json!(3)
      );
   }

   #[test]
   fn test_missing_conversion() {
      let registry = TypeConversionRegistry::with_defaults();
      assert!(
         registry
            .find_conversion_from_database(ValueKind::Blob, &TargetType::plain::<Date>())
            .is_none()
      );
   }
}
