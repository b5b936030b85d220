//! Reflective instantiation of Rust types from result rows
//!
//! Rust has no runtime reflection, so a type opts in by describing itself with a
//! [`TypeInfo`]: its constructors (named, typed parameters plus a function building the
//! value) and the properties that can be set after construction. The
//! [`InstantiatorProvider`] matches result columns against this description.

mod provider;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::conversion::{Boxed, SqlTarget, TargetType, downcast};
use crate::{Error, Result};

pub(crate) use provider::InstantiatorProvider;

type BuildFn<T> = Arc<dyn Fn(&mut Arguments) -> Result<T> + Send + Sync>;
pub(crate) type Setter<T> = Arc<dyn Fn(&mut T, Boxed) -> Result<()> + Send + Sync>;
type NestedLookup<T> = Arc<dyn Fn(&str) -> Result<Option<PropertyBinding<T>>> + Send + Sync>;

/// Compare property and column names ignoring case and underscores, so that
/// `first_name`, `FIRSTNAME` and `firstName` all match.
pub(crate) fn names_match(left: &str, right: &str) -> bool {
   let normalize = |name: &str| {
      name
         .chars()
         .filter(|c| *c != '_')
         .flat_map(char::to_lowercase)
         .collect::<String>()
   };
   normalize(left) == normalize(right)
}

/// A named, typed constructor parameter.
#[derive(Clone)]
pub struct Parameter {
   name: String,
   target: TargetType,
}

impl Parameter {
   pub fn new<V: SqlTarget>(name: impl Into<String>) -> Self {
      Self {
         name: name.into(),
         target: V::target_type(),
      }
   }

   pub fn name(&self) -> &str {
      &self.name
   }

   pub fn target(&self) -> &TargetType {
      &self.target
   }
}

impl fmt::Debug for Parameter {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{}: {}", self.name, self.target)
   }
}

/// Shorthand for [`Parameter::new`].
pub fn param<V: SqlTarget>(name: &str) -> Parameter {
   Parameter::new::<V>(name)
}

/// Converted constructor arguments, consumed in parameter order.
pub struct Arguments {
   values: std::vec::IntoIter<Boxed>,
}

impl Arguments {
   pub(crate) fn new(values: Vec<Boxed>) -> Self {
      Self {
         values: values.into_iter(),
      }
   }

   /// Take the next argument. `V` must be the type its parameter was declared with.
   pub fn next<V: Any>(&mut self) -> Result<V> {
      let value = self.values.next().ok_or_else(|| {
         Error::Instantiation("constructor read more arguments than it declares".into())
      })?;
      downcast(value)
   }
}

pub(crate) struct Constructor<T> {
   pub(crate) parameters: Vec<Parameter>,
   pub(crate) build: BuildFn<T>,
}

impl<T> Clone for Constructor<T> {
   fn clone(&self) -> Self {
      Self {
         parameters: self.parameters.clone(),
         build: Arc::clone(&self.build),
      }
   }
}

/// A settable property resolved from a (possibly nested) path.
pub(crate) struct PropertyBinding<T> {
   pub(crate) target: TargetType,
   pub(crate) setter: Setter<T>,
}

enum Property<T> {
   Value {
      name: String,
      target: TargetType,
      setter: Setter<T>,
   },
   Nested {
      name: String,
      lookup: NestedLookup<T>,
   },
}

impl<T> Property<T> {
   fn name(&self) -> &str {
      match self {
         Property::Value { name, .. } | Property::Nested { name, .. } => name,
      }
   }
}

/// Constructors and properties of a type, used to build it from result columns.
///
/// Columns are bound to constructor parameters first. Any columns left over are
/// bound to properties by name; `a.b` paths descend into nested properties.
pub struct TypeInfo<T> {
   constructors: Vec<Constructor<T>>,
   properties: Vec<Property<T>>,
}

impl<T: SqlTarget> TypeInfo<T> {
   pub fn new() -> Self {
      Self {
         constructors: Vec::new(),
         properties: Vec::new(),
      }
   }

   pub fn constructor<F>(mut self, parameters: Vec<Parameter>, build: F) -> Self
   where
      F: Fn(&mut Arguments) -> Result<T> + Send + Sync + 'static,
   {
      self.constructors.push(Constructor {
         parameters,
         build: Arc::new(build),
      });
      self
   }

   /// Constructor without parameters; all columns are bound to properties.
   pub fn default_constructor(self) -> Self
   where
      T: Default,
   {
      self.constructor(Vec::new(), |_| Ok(T::default()))
   }

   pub fn property<V, F>(mut self, name: &str, setter: F) -> Self
   where
      V: SqlTarget,
      F: Fn(&mut T, V) + Send + Sync + 'static,
   {
      let setter: Setter<T> = Arc::new(move |instance: &mut T, value: Boxed| {
         setter(instance, downcast::<V>(value)?);
         Ok(())
      });
      self.properties.push(Property::Value {
         name: name.to_string(),
         target: V::target_type(),
         setter,
      });
      self
   }

   /// A nested object whose own properties are reachable as `name.property`.
   pub fn nested<U, F>(mut self, name: &str, access: F) -> Self
   where
      U: SqlTarget,
      F: Fn(&mut T) -> &mut U + Send + Sync + 'static,
   {
      let access = Arc::new(access);
      let lookup: NestedLookup<T> = Arc::new(move |path: &str| {
         let Some(inner) = U::type_info().find_property(path)? else {
            return Ok(None);
         };
         let access = Arc::clone(&access);
         let inner_setter = inner.setter;
         let setter: Setter<T> =
            Arc::new(move |instance: &mut T, value: Boxed| inner_setter(access(instance), value));
         Ok(Some(PropertyBinding {
            target: inner.target,
            setter,
         }))
      });
      self.properties.push(Property::Nested {
         name: name.to_string(),
         lookup,
      });
      self
   }

   pub(crate) fn constructors(&self) -> &[Constructor<T>] {
      &self.constructors
   }

   /// Find the property a column binds to. Matching more than one property is an error.
   pub(crate) fn find_property(&self, path: &str) -> Result<Option<PropertyBinding<T>>> {
      if let Some((head, rest)) = path.split_once('.') {
         let Some(property) = self.unique_property(head, path, true)? else {
            return Ok(None);
         };
         return match property {
            Property::Nested { lookup, .. } => lookup(rest),
            Property::Value { .. } => Ok(None),
         };
      }

      match self.unique_property(path, path, false)? {
         Some(Property::Value { target, setter, .. }) => Ok(Some(PropertyBinding {
            target: target.clone(),
            setter: Arc::clone(setter),
         })),
         _ => Ok(None),
      }
   }

   fn unique_property(&self, name: &str, path: &str, nested: bool) -> Result<Option<&Property<T>>> {
      let mut matches = self.properties.iter().filter(|property| {
         matches!(property, Property::Nested { .. }) == nested && names_match(property.name(), name)
      });
      let first = matches.next();
      if let (Some(first), Some(second)) = (first, matches.next()) {
         return Err(Error::Instantiation(format!(
            "column '{path}' matches both property '{}' and property '{}'",
            first.name(),
            second.name()
         )));
      }
      Ok(first)
   }
}

impl<T: SqlTarget> Default for TypeInfo<T> {
   fn default() -> Self {
      Self::new()
   }
}

/// Implements [`SqlTarget`] for a struct built through a constructor taking every
/// listed field, bound by field name.
///
/// ```
/// use sqlx_sqlite_mapper::sql_record;
///
/// struct Employee {
///    id: i64,
///    name: String,
///    manager_id: Option<i64>,
/// }
///
/// sql_record!(Employee { id: i64, name: String, manager_id: Option<i64> });
/// ```
#[macro_export]
macro_rules! sql_record {
   ($ty:ident { $($field:ident : $field_ty:ty),* $(,)? }) => {
      impl $crate::SqlTarget for $ty {
         fn type_info() -> $crate::TypeInfo<Self> {
            $crate::TypeInfo::new().constructor(
               vec![$($crate::param::<$field_ty>(stringify!($field))),*],
               |args| {
                  Ok($ty {
                     $($field: args.next::<$field_ty>()?),*
                  })
               },
            )
         }
      }
   };
}
