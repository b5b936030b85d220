use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{SqlTarget, TargetType, TypeConversion};
use crate::value::{Value, ValueKind};
use crate::{Error, Result};

pub(crate) type ToDatabaseFn = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Result<Value> + Send + Sync>;

/// Registry of custom conversions between database values and Rust types.
///
/// Conversions from the database are keyed by source [`ValueKind`] and looked up
/// contravariantly: a conversion registered for `TEXT` also handles `DATE` columns, and
/// one registered for `NUMERIC` handles integers and reals. Within one source kind the
/// most recent registration wins. Conversions to the database are keyed by the exact
/// Rust type.
pub struct TypeConversionRegistry {
   from_database: RwLock<HashMap<ValueKind, Vec<TypeConversion>>>,
   to_database: RwLock<HashMap<TypeId, ToDatabaseFn>>,
}

impl TypeConversionRegistry {
   /// Registry without any conversions.
   pub fn empty() -> Self {
      Self {
         from_database: RwLock::new(HashMap::new()),
         to_database: RwLock::new(HashMap::new()),
      }
   }

   /// Registry with the built-in conversions for numbers, text, dates, UUIDs, URLs and JSON.
   pub fn with_defaults() -> Self {
      let registry = Self::empty();
      super::defaults::register_defaults(&registry);
      registry
   }

   pub fn register_conversion_from_database<T, F>(&self, source: ValueKind, func: F)
   where
      T: SqlTarget,
      F: Fn(Value) -> Result<T> + Send + Sync + 'static,
   {
      self.add_conversion_from_database(source, TypeConversion::new(func));
   }

   pub fn add_conversion_from_database(&self, source: ValueKind, conversion: TypeConversion) {
      self
         .from_database
         .write()
         .entry(source)
         .or_default()
         .push(conversion);
   }

   pub fn register_conversion_to_database<T, F>(&self, func: F)
   where
      T: Any + Send + Sync,
      F: Fn(&T) -> Result<Value> + Send + Sync + 'static,
   {
      let erased: ToDatabaseFn = Arc::new(move |value: &(dyn Any + Send + Sync)| {
         let value = value.downcast_ref::<T>().ok_or_else(|| {
            Error::Conversion(format!(
               "to-database conversion called with a value other than {}",
               super::short_type_name(std::any::type_name::<T>())
            ))
         })?;
         func(value)
      });
      self.to_database.write().insert(TypeId::of::<T>(), erased);
   }

   /// Register conversions in both directions at once.
   pub fn register_conversions<T, F, G>(&self, source: ValueKind, from_database: F, to_database: G)
   where
      T: SqlTarget + Sync,
      F: Fn(Value) -> Result<T> + Send + Sync + 'static,
      G: Fn(&T) -> Result<Value> + Send + Sync + 'static,
   {
      self.register_conversion_from_database(source, from_database);
      self.register_conversion_to_database(to_database);
   }

   /// Find a conversion producing exactly `target` from values of `source` or one of its
   /// parent kinds.
   pub fn find_conversion_from_database(
      &self,
      source: ValueKind,
      target: &TargetType,
   ) -> Option<TypeConversion> {
      let conversions = self.from_database.read();
      source.ancestors().find_map(|kind| {
         conversions.get(&kind).and_then(|candidates| {
            candidates
               .iter()
               .rev()
               .find(|conversion| conversion.target().id() == target.id())
               .cloned()
         })
      })
   }

   pub(crate) fn find_conversion_to_database(&self, type_id: TypeId) -> Option<ToDatabaseFn> {
      self.to_database.read().get(&type_id).cloned()
   }
}

impl Default for TypeConversionRegistry {
   fn default() -> Self {
      Self::with_defaults()
   }
}

impl std::fmt::Debug for TypeConversionRegistry {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      let from_database = self.from_database.read();
      f.debug_struct("TypeConversionRegistry")
         .field(
            "from_database",
            &from_database.values().map(Vec::len).sum::<usize>(),
         )
         .field("to_database", &self.to_database.read().len())
         .finish()
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::conversion::downcast;

   #[derive(Debug, PartialEq)]
   struct EmailAddress(String);

   impl SqlTarget for EmailAddress {}

   fn email_from_text(value: Value) -> Result<EmailAddress> {
      Ok(EmailAddress(value.as_text().unwrap_or_default().into_owned()))
   }

   #[test]
   fn test_lookup_walks_parent_kinds() {
      let registry = TypeConversionRegistry::empty();
      registry.register_conversion_from_database(ValueKind::Text, email_from_text);

      let target = EmailAddress::target_type();
      assert!(registry.find_conversion_from_database(ValueKind::Text, &target).is_some());
      assert!(registry.find_conversion_from_database(ValueKind::Date, &target).is_some());
      assert!(registry.find_conversion_from_database(ValueKind::Integer, &target).is_none());
      assert!(registry.find_conversion_from_database(ValueKind::Any, &target).is_none());
   }

   #[test]
   fn test_latest_registration_wins() {
      let registry = TypeConversionRegistry::empty();
      registry.register_conversion_from_database(ValueKind::Text, email_from_text);
      registry.register_conversion_from_database(ValueKind::Text, |_: Value| {
         Ok(EmailAddress("override".into()))
      });

      let conversion = registry
         .find_conversion_from_database(ValueKind::Text, &EmailAddress::target_type())
         .unwrap();
      let converted = conversion.convert(Value::Text("a@b".into())).unwrap();
      assert_eq!(
         downcast::<EmailAddress>(converted).unwrap(),
         EmailAddress("override".into())
      );
   }

   #[test]
   fn test_to_database_conversion() {
      let registry = TypeConversionRegistry::empty();
      registry.register_conversions(ValueKind::Text, email_from_text, |email: &EmailAddress| {
         Ok(Value::Text(email.0.clone()))
      });

      let convert = registry
         .find_conversion_to_database(TypeId::of::<EmailAddress>())
         .unwrap();
      let email = EmailAddress("x@y".into());
      assert_eq!(convert(&email).unwrap(), Value::Text("x@y".into()));
      assert!(convert(&"not an email").is_err());
   }
}
