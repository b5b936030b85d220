//! Query arguments
//!
//! Anything implementing [`ToArgument`] can be bound to a query. Primitive values,
//! strings, bytes, dates and JSON bind directly. Types without a native database
//! representation, like [`Uuid`] or application types, are carried as objects and
//! converted when the query runs, using the to-database conversions of the
//! [`TypeConversionRegistry`].

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use url::Url;
use uuid::Uuid;

use crate::conversion::{EnumMode, SqlEnum, TypeConversionRegistry, short_type_name};
use crate::value::Value;
use crate::{Error, Result};

/// A value bound to a query parameter.
#[derive(Clone)]
pub struct Argument {
   repr: Repr,
}

#[derive(Clone)]
enum Repr {
   Value(Value),
   Object {
      value: Arc<dyn Any + Send + Sync>,
      type_id: TypeId,
      type_name: &'static str,
      description: String,
   },
   Enum {
      name: &'static str,
      ordinal: i64,
   },
   Array(Vec<Argument>),
   Confidential(Box<Argument>),
}

impl Argument {
   pub fn value(value: Value) -> Self {
      Self {
         repr: Repr::Value(value),
      }
   }

   pub fn null() -> Self {
      Self::value(Value::Null)
   }

   /// An application object converted with the registry's to-database conversion for `T`.
   pub fn object<T>(value: T) -> Self
   where
      T: Any + Send + Sync + fmt::Display,
   {
      Self {
         repr: Repr::Object {
            description: value.to_string(),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            value: Arc::new(value),
         },
      }
   }

   pub fn enumeration<E: SqlEnum>(value: E) -> Self {
      Self {
         repr: Repr::Enum {
            name: value.name(),
            ordinal: value.ordinal(),
         },
      }
   }

   pub fn array(elements: Vec<Argument>) -> Self {
      Self {
         repr: Repr::Array(elements),
      }
   }

   /// An argument whose value is hidden when the query is logged or displayed.
   pub fn confidential(argument: Argument) -> Self {
      Self {
         repr: Repr::Confidential(Box::new(argument)),
      }
   }

   /// Resolve the argument into a database value.
   pub(crate) fn resolve(&self, registry: &TypeConversionRegistry, mode: EnumMode) -> Result<Value> {
      match &self.repr {
         Repr::Value(value) => Ok(value.clone()),
         Repr::Object {
            value,
            type_id,
            type_name,
            ..
         } => {
            let convert = registry.find_conversion_to_database(*type_id).ok_or_else(|| {
               Error::Conversion(format!(
                  "no conversion to database registered for {}",
                  short_type_name(type_name)
               ))
            })?;
            convert(value.as_ref())
         }
         Repr::Enum { name, ordinal } => Ok(match mode {
            EnumMode::Name => Value::Text((*name).to_string()),
            EnumMode::Ordinal => Value::Integer(*ordinal),
         }),
         Repr::Array(elements) => elements
            .iter()
            .map(|element| element.resolve(registry, mode))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
         Repr::Confidential(inner) => inner.resolve(registry, mode),
      }
   }
}

impl fmt::Display for Argument {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match &self.repr {
         Repr::Value(value) => write!(f, "{value}"),
         Repr::Object { description, .. } => write!(f, "'{description}'"),
         Repr::Enum { name, .. } => f.write_str(name),
         Repr::Array(elements) => {
            f.write_str("[")?;
            for (i, element) in elements.iter().enumerate() {
               if i > 0 {
                  f.write_str(", ")?;
               }
               write!(f, "{element}")?;
            }
            f.write_str("]")
         }
         Repr::Confidential(_) => f.write_str("****"),
      }
   }
}

impl fmt::Debug for Argument {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "Argument({self})")
   }
}

/// Conversion into a query [`Argument`].
pub trait ToArgument {
   fn to_argument(&self) -> Argument;
}

/// Wraps an argument so that its value never shows up in logs or error messages.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Confidential<T>(pub T);

impl<T> fmt::Debug for Confidential<T> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str("****")
   }
}

impl<T: ToArgument> ToArgument for Confidential<T> {
   fn to_argument(&self) -> Argument {
      Argument::confidential(self.0.to_argument())
   }
}

/// Binds a list of values as a single array argument.
///
/// SQLite has no array type, so arrays are stored as JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlArray<T>(pub Vec<T>);

impl<T: ToArgument> ToArgument for SqlArray<T> {
   fn to_argument(&self) -> Argument {
      Argument::array(self.0.iter().map(ToArgument::to_argument).collect())
   }
}

impl ToArgument for Argument {
   fn to_argument(&self) -> Argument {
      self.clone()
   }
}

impl ToArgument for Value {
   fn to_argument(&self) -> Argument {
      Argument::value(self.clone())
   }
}

impl<T: ToArgument + ?Sized> ToArgument for &T {
   fn to_argument(&self) -> Argument {
      (**self).to_argument()
   }
}

impl<T: ToArgument> ToArgument for Option<T> {
   fn to_argument(&self) -> Argument {
      match self {
         Some(value) => value.to_argument(),
         None => Argument::null(),
      }
   }
}

macro_rules! integer_arguments {
   ($($ty:ty),*) => {
      $(impl ToArgument for $ty {
         fn to_argument(&self) -> Argument {
            Argument::value(Value::Integer(i64::from(*self)))
         }
      })*
   };
}

integer_arguments!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! wide_integer_arguments {
   ($($ty:ty),*) => {
      $(impl ToArgument for $ty {
         fn to_argument(&self) -> Argument {
            // Values beyond i64 lose precision rather than wrap
            match i64::try_from(*self) {
               Ok(v) => Argument::value(Value::Integer(v)),
               Err(_) => Argument::value(Value::Real(*self as f64)),
            }
         }
      })*
   };
}

wide_integer_arguments!(u64, usize, isize);

impl ToArgument for bool {
   fn to_argument(&self) -> Argument {
      Argument::value(Value::Boolean(*self))
   }
}

impl ToArgument for f32 {
   fn to_argument(&self) -> Argument {
      Argument::value(Value::Real(f64::from(*self)))
   }
}

impl ToArgument for f64 {
   fn to_argument(&self) -> Argument {
      Argument::value(Value::Real(*self))
   }
}

impl ToArgument for str {
   fn to_argument(&self) -> Argument {
      Argument::value(Value::Text(self.to_string()))
   }
}

impl ToArgument for String {
   fn to_argument(&self) -> Argument {
      Argument::value(Value::Text(self.clone()))
   }
}

impl ToArgument for [u8] {
   fn to_argument(&self) -> Argument {
      Argument::value(Value::Blob(self.to_vec()))
   }
}

impl ToArgument for Vec<u8> {
   fn to_argument(&self) -> Argument {
      Argument::value(Value::Blob(self.clone()))
   }
}

impl ToArgument for Date {
   fn to_argument(&self) -> Argument {
      Argument::value(Value::Date(*self))
   }
}

impl ToArgument for Time {
   fn to_argument(&self) -> Argument {
      Argument::value(Value::Time(*self))
   }
}

impl ToArgument for PrimitiveDateTime {
   fn to_argument(&self) -> Argument {
      Argument::value(Value::DateTime(*self))
   }
}

impl ToArgument for OffsetDateTime {
   fn to_argument(&self) -> Argument {
      Argument::value(Value::Timestamp(*self))
   }
}

impl ToArgument for JsonValue {
   fn to_argument(&self) -> Argument {
      Argument::value(Value::Json(self.clone()))
   }
}

impl ToArgument for Uuid {
   fn to_argument(&self) -> Argument {
      Argument::object(*self)
   }
}

impl ToArgument for Url {
   fn to_argument(&self) -> Argument {
      Argument::object(self.clone())
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_display_hides_confidential_values() {
      let args = [
         "visible".to_argument(),
         Confidential("secret").to_argument(),
         Option::<i32>::None.to_argument(),
      ];
      let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
      assert_eq!(rendered, vec!["'visible'", "****", "null"]);
      assert_eq!(format!("{:?}", Confidential("secret")), "****");
   }

   #[test]
   fn test_wide_integers() {
      let registry = TypeConversionRegistry::empty();
      assert_eq!(
         5_u64.to_argument().resolve(&registry, EnumMode::Name).unwrap(),
         Value::Integer(5)
      );
      assert_eq!(
         u64::MAX.to_argument().resolve(&registry, EnumMode::Name).unwrap(),
         Value::Real(u64::MAX as f64)
      );
   }

   #[test]
   fn test_object_needs_registered_conversion() {
      let id = Uuid::new_v4();
      let err = id
         .to_argument()
         .resolve(&TypeConversionRegistry::empty(), EnumMode::Name)
         .unwrap_err();
      assert!(err.to_string().contains("no conversion to database registered for Uuid"));

      let value = id
         .to_argument()
         .resolve(&TypeConversionRegistry::with_defaults(), EnumMode::Name)
         .unwrap();
      assert_eq!(value, Value::Text(id.to_string()));
   }

   #[test]
   fn test_array_resolves_elements() {
      let registry = TypeConversionRegistry::with_defaults();
      let argument = SqlArray(vec![1, 2, 3]).to_argument();
      assert_eq!(argument.to_string(), "[1, 2, 3]");
      assert_eq!(
         argument.resolve(&registry, EnumMode::Name).unwrap(),
         Value::Array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)])
      );
   }

   #[test]
   fn test_confidential_resolves_inner_value() {
      let registry = TypeConversionRegistry::empty();
      let argument = Confidential(String::from("hunter2")).to_argument();
      assert_eq!(
         argument.resolve(&registry, EnumMode::Name).unwrap(),
         Value::Text("hunter2".into())
      );
   }
}
