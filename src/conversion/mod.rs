//! Target types and conversions from database values into them
//!
//! A conversion turns a [`Value`] of some [`ValueKind`] into an instance of a Rust type.
//! Rust types take part by implementing [`SqlTarget`], which describes the type's shape:
//! a plain type, an `Option` of another target, a `Vec` of another target, or an enum
//! implementing [`SqlEnum`]. Shapes let conversions compose, so registering `TEXT → Uuid`
//! also makes `Option<Uuid>` and `Vec<Uuid>` readable.

mod defaults;
mod registry;

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::instantiation::TypeInfo;
use crate::value::Value;
use crate::{Error, Result};

pub use registry::TypeConversionRegistry;

/// A type-erased conversion result.
pub type Boxed = Box<dyn Any + Send>;

/// A Rust type that database values can be converted into.
///
/// Plain types only need an empty implementation. Types built reflectively from
/// several columns also override [`SqlTarget::type_info`].
///
/// ```
/// use sqlx_sqlite_mapper::{SqlTarget, TypeInfo, param};
///
/// struct Department {
///    id: i64,
///    name: String,
///    description: Option<String>,
/// }
///
/// impl SqlTarget for Department {
///    fn type_info() -> TypeInfo<Self> {
///       TypeInfo::new()
///          .constructor(vec![param::<i64>("id"), param::<String>("name")], |args| {
///             Ok(Department {
///                id: args.next()?,
///                name: args.next()?,
///                description: None,
///             })
///          })
///          .property("description", |d: &mut Department, v: Option<String>| d.description = v)
///    }
/// }
/// ```
pub trait SqlTarget: Any + Send + Sized {
   fn target_type() -> TargetType {
      TargetType::plain::<Self>()
   }

   /// Constructors and properties used to build the type from several columns.
   fn type_info() -> TypeInfo<Self> {
      TypeInfo::new()
   }
}

/// A Rust enum stored in the database by variant name or by ordinal.
///
/// Implement this and invoke [`sql_enum!`](crate::sql_enum) to make the enum usable
/// both as a query argument and as a result target.
pub trait SqlEnum: Copy + PartialEq + Send + Sync + 'static {
   /// All variants in ordinal order.
   fn variants() -> &'static [Self];

   fn name(&self) -> &'static str;

   fn ordinal(&self) -> i64 {
      Self::variants()
         .iter()
         .position(|variant| variant == self)
         .map_or(-1, |position| position as i64)
   }
}

/// Implements [`SqlTarget`] and [`ToArgument`](crate::ToArgument) for a type implementing
/// [`SqlEnum`].
#[macro_export]
macro_rules! sql_enum {
   ($ty:ty) => {
      impl $crate::SqlTarget for $ty {
         fn target_type() -> $crate::TargetType {
            $crate::TargetType::enumeration::<Self>()
         }
      }

      impl $crate::ToArgument for $ty {
         fn to_argument(&self) -> $crate::Argument {
            $crate::Argument::enumeration(*self)
         }
      }
   };
}

/// How enum arguments are written to the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumMode {
   /// Store the variant name as text.
   #[default]
   Name,
   /// Store the zero-based variant position as an integer.
   Ordinal,
}

/// Runtime description of a [`SqlTarget`] type.
#[derive(Clone)]
pub struct TargetType {
   id: TypeId,
   name: &'static str,
   pub(crate) shape: Shape,
}

#[derive(Clone)]
pub(crate) enum Shape {
   Plain,
   Optional {
      inner: Box<TargetType>,
      some: fn(Boxed) -> Result<Boxed>,
      none: fn() -> Boxed,
   },
   List {
      element: Box<TargetType>,
      collect: fn(Vec<Boxed>) -> Result<Boxed>,
   },
   Enum {
      by_name: fn(&str) -> Option<Boxed>,
      by_ordinal: fn(i64) -> Option<Boxed>,
   },
}

impl TargetType {
   pub fn plain<T: Any + Send>() -> Self {
      Self {
         id: TypeId::of::<T>(),
         name: type_name::<T>(),
         shape: Shape::Plain,
      }
   }

   pub fn optional<T: SqlTarget>() -> Self {
      Self {
         id: TypeId::of::<Option<T>>(),
         name: type_name::<Option<T>>(),
         shape: Shape::Optional {
            inner: Box::new(T::target_type()),
            some: wrap_some::<T>,
            none: make_none::<T>,
         },
      }
   }

   pub fn list<T: SqlTarget>() -> Self {
      Self {
         id: TypeId::of::<Vec<T>>(),
         name: type_name::<Vec<T>>(),
         shape: Shape::List {
            element: Box::new(T::target_type()),
            collect: collect_vec::<T>,
         },
      }
   }

   pub fn enumeration<E: SqlEnum>() -> Self {
      Self {
         id: TypeId::of::<E>(),
         name: type_name::<E>(),
         shape: Shape::Enum {
            by_name: enum_by_name::<E>,
            by_ordinal: enum_by_ordinal::<E>,
         },
      }
   }

   pub fn id(&self) -> TypeId {
      self.id
   }

   pub fn is<T: Any>(&self) -> bool {
      self.id == TypeId::of::<T>()
   }

   /// Type name without module paths, e.g. `Option<String>`.
   pub fn name(&self) -> String {
      short_type_name(self.name)
   }
}

impl fmt::Debug for TargetType {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(&self.name())
   }
}

impl fmt::Display for TargetType {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(&self.name())
   }
}

pub(crate) fn short_type_name(name: &str) -> String {
   static PATH: OnceLock<Option<Regex>> = OnceLock::new();
   match PATH.get_or_init(|| Regex::new(r"\b[a-z_][a-z0-9_]*::").ok()) {
      Some(path) => path.replace_all(name, "").into_owned(),
      None => name.to_string(),
   }
}

/// Unbox a conversion result into the expected type.
pub(crate) fn downcast<T: Any>(boxed: Boxed) -> Result<T> {
   boxed.downcast::<T>().map(|value| *value).map_err(|_| {
      Error::Conversion(format!(
         "conversion produced a value of the wrong type, expected {}",
         short_type_name(type_name::<T>())
      ))
   })
}

fn wrap_some<T: SqlTarget>(boxed: Boxed) -> Result<Boxed> {
   Ok(Box::new(Some(downcast::<T>(boxed)?)))
}

fn make_none<T: SqlTarget>() -> Boxed {
   Box::new(None::<T>)
}

fn collect_vec<T: SqlTarget>(items: Vec<Boxed>) -> Result<Boxed> {
   let items = items
      .into_iter()
      .map(downcast::<T>)
      .collect::<Result<Vec<T>>>()?;
   Ok(Box::new(items))
}

fn enum_by_name<E: SqlEnum>(name: &str) -> Option<Boxed> {
   E::variants()
      .iter()
      .find(|variant| variant.name() == name)
      .map(|variant| Box::new(*variant) as Boxed)
}

fn enum_by_ordinal<E: SqlEnum>(ordinal: i64) -> Option<Boxed> {
   usize::try_from(ordinal)
      .ok()
      .and_then(|index| E::variants().get(index))
      .map(|variant| Box::new(*variant) as Boxed)
}

type ConversionFn = dyn Fn(Value) -> Result<Boxed> + Send + Sync;

/// A conversion from database values into one target type.
///
/// Conversions never see NULL: converting NULL with them is an error. NULL handling
/// belongs to the `Option` shape, which maps it to `None`.
#[derive(Clone)]
pub struct TypeConversion {
   target: TargetType,
   func: Arc<ConversionFn>,
}

impl TypeConversion {
   pub fn new<T, F>(func: F) -> Self
   where
      T: SqlTarget,
      F: Fn(Value) -> Result<T> + Send + Sync + 'static,
   {
      Self {
         target: T::target_type(),
         func: Arc::new(move |value| func(value).map(|v| Box::new(v) as Boxed)),
      }
   }

   pub fn target(&self) -> &TargetType {
      &self.target
   }

   pub fn convert(&self, value: Value) -> Result<Boxed> {
      if value.is_null() {
         return Err(Error::Conversion(format!(
            "cannot convert NULL to {}",
            self.target
         )));
      }
      (self.func)(value)
   }
}

impl fmt::Debug for TypeConversion {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("TypeConversion")
         .field("target", &self.target)
         .finish_non_exhaustive()
   }
}

/// Error for a value that a conversion cannot handle.
pub(crate) fn unconvertible(value: &Value, target: &str) -> Error {
   Error::Conversion(format!("cannot convert {} {} to {}", value.kind(), value, target))
}

macro_rules! plain_targets {
   ($($ty:ty),* $(,)?) => {
      $(impl SqlTarget for $ty {})*
   };
}

plain_targets!(
   bool,
   i8,
   i16,
   i32,
   i64,
   isize,
   u8,
   u16,
   u32,
   u64,
   usize,
   f32,
   f64,
   String,
   time::Date,
   time::Time,
   time::PrimitiveDateTime,
   time::OffsetDateTime,
   serde_json::Value,
   uuid::Uuid,
   url::Url,
   Value,
);

impl<T: SqlTarget> SqlTarget for Option<T> {
   fn target_type() -> TargetType {
      TargetType::optional::<T>()
   }
}

impl<T: SqlTarget> SqlTarget for Vec<T> {
   fn target_type() -> TargetType {
      TargetType::list::<T>()
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[derive(Debug, Clone, Copy, PartialEq)]
   enum Color {
      Red,
      Green,
   }

   impl SqlEnum for Color {
      fn variants() -> &'static [Self] {
         &[Color::Red, Color::Green]
      }

      fn name(&self) -> &'static str {
         match self {
            Color::Red => "RED",
            Color::Green => "GREEN",
         }
      }
   }

   #[test]
   fn test_short_type_names() {
      assert_eq!(TargetType::plain::<String>().name(), "String");
      assert_eq!(Option::<String>::target_type().name(), "Option<String>");
      assert_eq!(Vec::<uuid::Uuid>::target_type().name(), "Vec<Uuid>");
      assert_eq!(Vec::<u8>::target_type().name(), "Vec<u8>");
   }

   #[test]
   fn test_optional_shape_wraps_inner() {
      let target = Option::<i64>::target_type();
      let Shape::Optional { inner, some, none } = &target.shape else {
         panic!("expected optional shape");
      };
      assert!(inner.is::<i64>());

      let wrapped = some(Box::new(5_i64)).unwrap();
      assert_eq!(downcast::<Option<i64>>(wrapped).unwrap(), Some(5));
      assert_eq!(downcast::<Option<i64>>(none()).unwrap(), None);
   }

   #[test]
   fn test_enum_lookup() {
      assert_eq!(Color::Green.ordinal(), 1);

      let target = TargetType::enumeration::<Color>();
      let Shape::Enum { by_name, by_ordinal } = &target.shape else {
         panic!("expected enum shape");
      };
      assert_eq!(downcast::<Color>(by_name("RED").unwrap()).unwrap(), Color::Red);
      assert_eq!(downcast::<Color>(by_ordinal(1).unwrap()).unwrap(), Color::Green);
      assert!(by_name("red").is_none());
      assert!(by_ordinal(2).is_none());
      assert!(by_ordinal(-1).is_none());
   }

   #[test]
   fn test_conversion_rejects_null() {
      let conversion = TypeConversion::new(|value: Value| {
         value.as_i64().ok_or_else(|| unconvertible(&value, "i64"))
      });
      let err = conversion.convert(Value::Null).unwrap_err();
      assert!(err.to_string().contains("cannot convert NULL to i64"));

      let converted = conversion.convert(Value::Integer(3)).unwrap();
      assert_eq!(downcast::<i64>(converted).unwrap(), 3);
   }

   #[test]
   fn test_downcast_wrong_type() {
      let err = downcast::<String>(Box::new(1_i64)).unwrap_err();
      assert_eq!(err.error_code(), "CONVERSION_FAILED");
   }
}
