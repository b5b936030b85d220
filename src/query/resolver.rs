use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::argument::{Argument, ToArgument};
use crate::value::Value;
use crate::{Error, Result};

/// Supplies values for named parameters.
pub trait VariableResolver {
   fn resolve(&self, name: &str) -> Result<Argument>;
}

fn missing(name: &str) -> Error {
   Error::VariableResolution(format!("No value registered for key '{name}'"))
}

impl<K, V, S> VariableResolver for HashMap<K, V, S>
where
   K: Borrow<str> + Hash + Eq,
   V: ToArgument,
   S: BuildHasher,
{
   fn resolve(&self, name: &str) -> Result<Argument> {
      self.get(name).map(ToArgument::to_argument).ok_or_else(|| missing(name))
   }
}

impl<K, V, S> VariableResolver for IndexMap<K, V, S>
where
   K: Borrow<str> + Hash + Eq,
   V: ToArgument,
   S: BuildHasher,
{
   fn resolve(&self, name: &str) -> Result<Argument> {
      self.get(name).map(ToArgument::to_argument).ok_or_else(|| missing(name))
   }
}

impl<K, V> VariableResolver for BTreeMap<K, V>
where
   K: Borrow<str> + Ord,
   V: ToArgument,
{
   fn resolve(&self, name: &str) -> Result<Argument> {
      self.get(name).map(ToArgument::to_argument).ok_or_else(|| missing(name))
   }
}

/// Fields of a serialized JSON object. Nested objects bind as JSON values.
impl VariableResolver for Map<String, JsonValue> {
   fn resolve(&self, name: &str) -> Result<Argument> {
      self
         .get(name)
         .map(|json| Argument::value(Value::from_json(json.clone())))
         .ok_or_else(|| missing(name))
   }
}

/// Resolver backed by a closure.
pub struct FnResolver<F>(F);

/// Create a resolver that looks names up with `func`.
pub fn resolver_fn<F>(func: F) -> FnResolver<F>
where
   F: Fn(&str) -> Result<Argument>,
{
   FnResolver(func)
}

impl<F> VariableResolver for FnResolver<F>
where
   F: Fn(&str) -> Result<Argument>,
{
   fn resolve(&self, name: &str) -> Result<Argument> {
      (self.0)(name)
   }
}

/// Resolver for the fields of any serializable struct.
pub(crate) fn resolver_for_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Map<String, JsonValue>> {
   match serde_json::to_value(value) {
      Ok(JsonValue::Object(fields)) => Ok(fields),
      Ok(other) => Err(Error::VariableResolution(format!(
         "named parameters need a value serializing to an object, got {other}"
      ))),
      Err(e) => Err(Error::VariableResolution(format!(
         "failed to serialize named parameter values: {e}"
      ))),
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_map_resolvers() {
      let mut hash = HashMap::new();
      hash.insert("id", 5);
      assert_eq!(hash.resolve("id").unwrap().to_string(), "5");

      let mut ordered = BTreeMap::new();
      ordered.insert(String::from("name"), "Alice");
      assert_eq!(ordered.resolve("name").unwrap().to_string(), "'Alice'");

      let mut indexed: IndexMap<&str, Option<i32>> = IndexMap::new();
      indexed.insert("missing_value", None);
      assert_eq!(indexed.resolve("missing_value").unwrap().to_string(), "null");
   }

   #[test]
   fn test_missing_key() {
      let empty: HashMap<String, i32> = HashMap::new();
      let err = empty.resolve("foo").unwrap_err();
      assert_eq!(err.error_code(), "VARIABLE_RESOLUTION");
      assert_eq!(err.to_string(), "No value registered for key 'foo'");
   }

   #[test]
   fn test_closure_resolver() {
      let resolver = resolver_fn(|name| Ok(name.len().to_argument()));
      assert_eq!(resolver.resolve("four").unwrap().to_string(), "4");
   }

   #[test]
   fn test_serialize_resolver() {
      #[derive(Serialize)]
      struct Filter {
         min_age: i32,
         name: String,
      }

      let resolver = resolver_for_serialize(&Filter {
         min_age: 18,
         name: "Bob".into(),
      })
      .unwrap();
      assert_eq!(resolver.resolve("min_age").unwrap().to_string(), "18");
      assert_eq!(resolver.resolve("name").unwrap().to_string(), "'Bob'");
      let err = resolver.resolve("other").unwrap_err();
      assert_eq!(err.to_string(), "No value registered for key 'other'");

      assert!(resolver_for_serialize(&5).is_err());
   }
}
