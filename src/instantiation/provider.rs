use std::any::Any;
use std::cmp::Ordering;
use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::trace;

use super::{Arguments, Constructor, Setter, names_match};
use crate::argument::Argument;
use crate::conversion::{
   Boxed, EnumMode, Shape, SqlTarget, TargetType, TypeConversionRegistry, downcast,
};
use crate::dialect::Dialect;
use crate::result::ColumnMetadata;
use crate::value::{Value, ValueKind};
use crate::{Error, Result};

type ConvertFn = Arc<dyn Fn(Value) -> Result<Boxed> + Send + Sync>;

/// How well a conversion fits its source. Higher is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Compatibility {
   /// A registered or composed conversion.
   Registered = 1,
   /// The value is wrapped or taken as is: `Option` of a native type, `Value`, or a
   /// column whose kind is only known per row.
   Assignable = 2,
   /// The target is the native type of the source kind.
   Exact = 3,
}

#[derive(Clone)]
struct Conversion {
   compatibility: Compatibility,
   func: ConvertFn,
}

impl Conversion {
   fn new(
      compatibility: Compatibility,
      func: impl Fn(Value) -> Result<Boxed> + Send + Sync + 'static,
   ) -> Self {
      Self {
         compatibility,
         func: Arc::new(func),
      }
   }
}

/// Finds conversions and instantiators, and converts arguments for the database.
#[derive(Clone)]
pub(crate) struct InstantiatorProvider {
   inner: Arc<ProviderInner>,
}

struct ProviderInner {
   registry: Arc<TypeConversionRegistry>,
   dialect: Arc<dyn Dialect>,
}

impl InstantiatorProvider {
   pub(crate) fn new(dialect: Arc<dyn Dialect>, registry: Arc<TypeConversionRegistry>) -> Self {
      dialect.register_type_conversions(&registry);
      Self {
         inner: Arc::new(ProviderInner { registry, dialect }),
      }
   }

   pub(crate) fn registry(&self) -> &Arc<TypeConversionRegistry> {
      &self.inner.registry
   }

   pub(crate) fn dialect(&self) -> &Arc<dyn Dialect> {
      &self.inner.dialect
   }

   /// Convert an argument into a value the driver can bind.
   pub(crate) fn value_to_database(&self, argument: &Argument, mode: EnumMode) -> Result<Value> {
      let value = argument.resolve(&self.inner.registry, mode)?;
      self.inner.dialect.value_to_database(value)
   }

   fn find_conversion(&self, source: ValueKind, target: &TargetType) -> Option<Conversion> {
      if target.is::<Value>() {
         return Some(Conversion::new(Compatibility::Assignable, |value| {
            Ok(Box::new(value) as Boxed)
         }));
      }

      if let Some(conversion) = native_conversion(source, target) {
         return Some(conversion);
      }

      if let Some(conversion) = self.inner.registry.find_conversion_from_database(source, target) {
         return Some(Conversion::new(Compatibility::Registered, move |value| {
            conversion.convert(value)
         }));
      }

      match &target.shape {
         Shape::Optional { inner, some, none } => {
            let (some, none) = (*some, *none);
            if source == ValueKind::Null {
               return Some(Conversion::new(Compatibility::Assignable, move |_| Ok(none())));
            }
            let inner = self.find_conversion(source, inner)?;
            let compatibility = inner.compatibility.min(Compatibility::Assignable);
            Some(Conversion::new(compatibility, move |value| {
               if value.is_null() {
                  Ok(none())
               } else {
                  some((inner.func)(value)?)
               }
            }))
         }
         Shape::List { element, collect } => {
            if !matches!(source, ValueKind::Array | ValueKind::Json)
               && !ValueKind::Text.is_assignable_from(source)
            {
               return None;
            }
            let provider = self.clone();
            let element = (**element).clone();
            let collect = *collect;
            Some(Conversion::new(Compatibility::Registered, move |value| {
               let items = list_items(value)?
                  .into_iter()
                  .map(|item| provider.convert_dynamic(item, &element))
                  .collect::<Result<Vec<_>>>()?;
               collect(items)
            }))
         }
         Shape::Enum {
            by_name,
            by_ordinal,
         } => {
            if !ValueKind::Text.is_assignable_from(source)
               && !ValueKind::Integer.is_assignable_from(source)
            {
               return None;
            }
            let (by_name, by_ordinal) = (*by_name, *by_ordinal);
            let name = target.name();
            Some(Conversion::new(Compatibility::Registered, move |value| {
               let variant = match &value {
                  Value::Integer(ordinal) => by_ordinal(*ordinal),
                  Value::Boolean(b) => by_ordinal(i64::from(*b)),
                  other => other.as_text().and_then(|text| by_name(&text)),
               };
               variant.ok_or_else(|| {
                  Error::Conversion(format!("{value} is not a valid value of enum {name}"))
               })
            }))
         }
         Shape::Plain => None,
      }
   }

   /// Convert a value whose kind is only known now.
   fn convert_dynamic(&self, value: Value, target: &TargetType) -> Result<Boxed> {
      let kind = value.kind();
      match self.find_conversion(kind, target) {
         Some(conversion) => (conversion.func)(value),
         None if value.is_null() => Err(Error::Conversion(format!("cannot convert NULL to {target}"))),
         None => Err(Error::Conversion(format!(
            "no conversion from {kind} {value} to {target}"
         ))),
      }
   }

   fn column_conversion(&self, column: &ColumnMetadata, target: &TargetType) -> Option<ColumnConversion> {
      let conversion = if column.kind() == ValueKind::Null {
         None
      } else {
         Some(self.find_conversion(column.kind(), target)?)
      };
      Some(ColumnConversion {
         column: column.name().to_string(),
         kind: column.kind(),
         target: target.clone(),
         conversion,
         provider: self.clone(),
      })
   }

   /// Find a way to build `T` from rows with the given columns.
   ///
   /// A single column converts directly when a conversion to `T` exists. Otherwise
   /// every constructor of `T` is scored against the columns and the best one wins;
   /// ties at the top are reported as ambiguous.
   pub(crate) fn find_instantiator<T: SqlTarget>(
      &self,
      columns: &[ColumnMetadata],
   ) -> Result<Instantiator<T>> {
      let target = T::target_type();
      let info = T::type_info();

      if let [column] = columns {
         let direct = if column.kind() == ValueKind::Null {
            info.constructors().is_empty()
         } else {
            self.find_conversion(column.kind(), &target).is_some()
         };
         if direct && let Some(conversion) = self.column_conversion(column, &target) {
            trace!("instantiating {} directly from column {}", target, column.name());
            return Ok(Instantiator {
               plan: Plan::Direct(conversion),
            });
         }
      }

      let described_columns = describe_columns(columns);
      if info.constructors().is_empty() {
         return Err(Error::Instantiation(format!(
            "could not find a way to instantiate {target} with columns {described_columns}: \
             no conversion exists and the type declares no constructors"
         )));
      }

      let mut candidates = Vec::new();
      let mut rejections = Vec::new();
      for constructor in info.constructors() {
         match self.evaluate(constructor, &info, columns) {
            Ok(candidate) => candidates.push(candidate),
            Err(reason) => rejections.push((describe_constructor(&target, constructor), reason)),
         }
      }

      candidates.sort_by(|a, b| b.rank().cmp(&a.rank()));
      let mut ranked = candidates.into_iter();
      let Some(best) = ranked.next() else {
         let mut message = format!(
            "could not find a way to instantiate {target} with columns {described_columns}:"
         );
         for (constructor, reason) in rejections {
            let _ = write!(message, "\n  {constructor}: {reason}");
         }
         return Err(Error::Instantiation(message));
      };

      if let Some(runner_up) = ranked.next()
         && runner_up.rank().cmp(&best.rank()) == Ordering::Equal
      {
         return Err(Error::Instantiation(format!(
            "ambiguous constructors for {target} with columns {described_columns}: \
             {} and {} match equally well (score {})",
            describe_constructor(&target, &best.constructor),
            describe_constructor(&target, &runner_up.constructor),
            best.score
         )));
      }

      trace!(
         "instantiating {} with constructor {} (score {})",
         target,
         describe_constructor(&target, &best.constructor),
         best.score
      );
      Ok(Instantiator {
         plan: Plan::Reflective {
            build: Arc::clone(&best.constructor.build),
            parameters: best.parameters,
            properties: best.properties,
         },
      })
   }

   fn evaluate<T: SqlTarget>(
      &self,
      constructor: &Constructor<T>,
      info: &super::TypeInfo<T>,
      columns: &[ColumnMetadata],
   ) -> std::result::Result<Candidate<T>, String> {
      let parameters = &constructor.parameters;
      if parameters.len() > columns.len() {
         return Err(format!(
            "needs {} parameters but the result has {} columns",
            parameters.len(),
            columns.len()
         ));
      }

      let named = bind_by_name(parameters, columns);
      let parameter_columns = named
         .clone()
         .unwrap_or_else(|| (0..parameters.len()).collect());

      let mut score = 0;
      let mut bound_parameters = Vec::with_capacity(parameters.len());
      for (parameter, &index) in parameters.iter().zip(&parameter_columns) {
         let column = &columns[index];
         let conversion = self
            .column_conversion(column, parameter.target())
            .ok_or_else(|| {
               format!(
                  "no conversion from {} column '{}' to {} for parameter '{}'",
                  column.kind(),
                  column.name(),
                  parameter.target(),
                  parameter.name()
               )
            })?;
         score += conversion.compatibility() as u32;
         bound_parameters.push((index, conversion));
      }

      let mut properties = Vec::new();
      for (index, column) in columns.iter().enumerate() {
         if parameter_columns.contains(&index) {
            continue;
         }
         let binding = info
            .find_property(column.name())
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("no parameter or property matches column '{}'", column.name()))?;
         let conversion = self
            .column_conversion(column, &binding.target)
            .ok_or_else(|| {
               format!(
                  "no conversion from {} column '{}' to property of type {}",
                  column.kind(),
                  column.name(),
                  binding.target
               )
            })?;
         score += conversion.compatibility() as u32;
         properties.push((index, conversion, binding.setter));
      }

      Ok(Candidate {
         constructor: constructor.clone(),
         named: named.is_some(),
         score,
         parameters: bound_parameters,
         properties,
      })
   }
}

/// Bind every parameter to a distinct column of the same name, if possible.
fn bind_by_name(parameters: &[super::Parameter], columns: &[ColumnMetadata]) -> Option<Vec<usize>> {
   let mut used = Vec::with_capacity(parameters.len());
   for parameter in parameters {
      let index = (0..columns.len()).find(|index| {
         !used.contains(index) && names_match(parameter.name(), columns[*index].name())
      })?;
      used.push(index);
   }
   Some(used)
}

fn native_conversion(source: ValueKind, target: &TargetType) -> Option<Conversion> {
   macro_rules! native {
      ($variant:ident, $ty:ty) => {
         if source == ValueKind::$variant && target.is::<$ty>() {
            return Some(Conversion::new(Compatibility::Exact, |value| match value {
               Value::$variant(v) => Ok(Box::new(v) as Boxed),
               other => Err(Error::Conversion(format!(
                  "expected {} value, got {}",
                  ValueKind::$variant,
                  other.kind()
               ))),
            }));
         }
      };
   }

   native!(Boolean, bool);
   native!(Integer, i64);
   native!(Real, f64);
   native!(Text, String);
   native!(Blob, Vec<u8>);
   native!(Date, time::Date);
   native!(Time, time::Time);
   native!(DateTime, time::PrimitiveDateTime);
   native!(Timestamp, time::OffsetDateTime);
   native!(Json, JsonValue);
   None
}

/// Items of an array value, or of text holding a JSON array.
fn list_items(value: Value) -> Result<Vec<Value>> {
   match value {
      Value::Array(items) => Ok(items),
      Value::Json(JsonValue::Array(items)) => Ok(items.into_iter().map(Value::from_json).collect()),
      other => {
         let parsed = other
            .as_text()
            .and_then(|text| serde_json::from_str::<JsonValue>(&text).ok());
         match parsed {
            Some(JsonValue::Array(items)) => Ok(items.into_iter().map(Value::from_json).collect()),
            _ => Err(Error::Conversion(format!("{other} is not an array"))),
         }
      }
   }
}

fn describe_columns(columns: &[ColumnMetadata]) -> String {
   let columns: Vec<String> = columns
      .iter()
      .map(|column| format!("{}: {}", column.name(), column.kind()))
      .collect();
   format!("({})", columns.join(", "))
}

fn describe_constructor<T>(target: &TargetType, constructor: &Constructor<T>) -> String {
   let parameters: Vec<String> = constructor
      .parameters
      .iter()
      .map(|parameter| format!("{parameter:?}"))
      .collect();
   format!("{target}({})", parameters.join(", "))
}

struct Candidate<T> {
   constructor: Constructor<T>,
   named: bool,
   score: u32,
   parameters: Vec<(usize, ColumnConversion)>,
   properties: Vec<(usize, ColumnConversion, Setter<T>)>,
}

impl<T> Candidate<T> {
   fn rank(&self) -> (usize, bool, u32) {
      (self.constructor.parameters.len(), self.named, self.score)
   }
}

/// Conversion of one column into one target type.
///
/// Columns of unknown kind, and values whose kind differs from the column's, are
/// converted with a conversion looked up for the value's own kind.
struct ColumnConversion {
   column: String,
   kind: ValueKind,
   target: TargetType,
   conversion: Option<Conversion>,
   provider: InstantiatorProvider,
}

impl ColumnConversion {
   fn compatibility(&self) -> Compatibility {
      self
         .conversion
         .as_ref()
         .map_or(Compatibility::Assignable, |conversion| conversion.compatibility)
   }

   fn convert(&self, value: Value) -> Result<Boxed> {
      let result = match &self.conversion {
         Some(conversion) if value.kind() == self.kind => (conversion.func)(value),
         _ => self.provider.convert_dynamic(value, &self.target),
      };
      result.map_err(|e| match e {
         Error::Conversion(message) => {
            Error::Conversion(format!("{message} (column '{}')", self.column))
         }
         other => other,
      })
   }
}

enum Plan<T> {
   Direct(ColumnConversion),
   Reflective {
      build: Arc<dyn Fn(&mut Arguments) -> Result<T> + Send + Sync>,
      parameters: Vec<(usize, ColumnConversion)>,
      properties: Vec<(usize, ColumnConversion, Setter<T>)>,
   },
}

/// Builds instances of `T` from the values of one row.
pub(crate) struct Instantiator<T> {
   plan: Plan<T>,
}

impl<T: Any> Instantiator<T> {
   pub(crate) fn instantiate(&self, values: Vec<Value>) -> Result<T> {
      let mut slots: Vec<Option<Value>> = values.into_iter().map(Some).collect();
      let mut take = |index: usize| {
         slots
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| Error::UnexpectedResult(format!("row has no value for column {index}")))
      };

      match &self.plan {
         Plan::Direct(conversion) => downcast(conversion.convert(take(0)?)?),
         Plan::Reflective {
            build,
            parameters,
            properties,
         } => {
            let arguments = parameters
               .iter()
               .map(|(index, conversion)| conversion.convert(take(*index)?))
               .collect::<Result<Vec<_>>>()?;
            let mut instance = build(&mut Arguments::new(arguments))?;
            for (index, conversion, setter) in properties {
               setter(&mut instance, conversion.convert(take(*index)?)?)?;
            }
            Ok(instance)
         }
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::dialect::SqliteDialect;
   use crate::instantiation::{TypeInfo, param};
   use crate::{SqlEnum, sql_enum};

   fn provider() -> InstantiatorProvider {
      InstantiatorProvider::new(
         Arc::new(SqliteDialect),
         Arc::new(TypeConversionRegistry::with_defaults()),
      )
   }

   fn columns(definitions: &[(&str, ValueKind)]) -> Vec<ColumnMetadata> {
      definitions
         .iter()
         .enumerate()
         .map(|(index, (name, kind))| ColumnMetadata::new(index, name.to_string(), *kind, None))
         .collect()
   }

   #[derive(Debug, PartialEq)]
   struct Pair {
      id: i64,
      label: String,
   }

   impl SqlTarget for Pair {
      fn type_info() -> TypeInfo<Self> {
         TypeInfo::new().constructor(vec![param::<i64>("id"), param::<String>("label")], |args| {
            Ok(Pair {
               id: args.next()?,
               label: args.next()?,
            })
         })
      }
   }

   #[derive(Debug, Clone, Copy, PartialEq)]
   enum Status {
      Active,
      Closed,
   }

   impl SqlEnum for Status {
      fn variants() -> &'static [Self] {
         &[Status::Active, Status::Closed]
      }

      fn name(&self) -> &'static str {
         match self {
            Status::Active => "ACTIVE",
            Status::Closed => "CLOSED",
         }
      }
   }

   sql_enum!(Status);

   #[test]
   fn test_direct_conversion_for_single_column() {
      let provider = provider();
      let instantiator = provider
         .find_instantiator::<i32>(&columns(&[("n", ValueKind::Integer)]))
         .unwrap();
      assert_eq!(instantiator.instantiate(vec![Value::Integer(7)]).unwrap(), 7);
   }

   #[test]
   fn test_compatibility_levels() {
      let provider = provider();
      let exact = provider.find_conversion(ValueKind::Text, &String::target_type()).unwrap();
      assert_eq!(exact.compatibility, Compatibility::Exact);

      let wrapped = provider
         .find_conversion(ValueKind::Text, &Option::<String>::target_type())
         .unwrap();
      assert_eq!(wrapped.compatibility, Compatibility::Assignable);

      let registered = provider.find_conversion(ValueKind::Integer, &i32::target_type()).unwrap();
      assert_eq!(registered.compatibility, Compatibility::Registered);

      assert!(provider.find_conversion(ValueKind::Blob, &i32::target_type()).is_none());
   }

   #[test]
   fn test_optional_null_and_value() {
      let provider = provider();
      let instantiator = provider
         .find_instantiator::<Option<String>>(&columns(&[("s", ValueKind::Text)]))
         .unwrap();
      assert_eq!(instantiator.instantiate(vec![Value::Null]).unwrap(), None);
      assert_eq!(
         instantiator.instantiate(vec![Value::Text("x".into())]).unwrap(),
         Some("x".to_string())
      );
   }

   #[test]
   fn test_null_into_non_optional_names_column() {
      let provider = provider();
      let instantiator = provider
         .find_instantiator::<i64>(&columns(&[("amount", ValueKind::Integer)]))
         .unwrap();
      let err = instantiator.instantiate(vec![Value::Null]).unwrap_err();
      assert_eq!(err.to_string(), "conversion failed: cannot convert NULL to i64 (column 'amount')");
   }

   #[test]
   fn test_list_from_json_text() {
      let provider = provider();
      let instantiator = provider
         .find_instantiator::<Vec<i32>>(&columns(&[("xs", ValueKind::Text)]))
         .unwrap();
      assert_eq!(
         instantiator.instantiate(vec![Value::Text("[1, 2, 3]".into())]).unwrap(),
         vec![1, 2, 3]
      );
      assert!(instantiator.instantiate(vec![Value::Text("oops".into())]).is_err());
   }

   #[test]
   fn test_enum_by_name_and_ordinal() {
      let provider = provider();
      let by_name = provider
         .find_instantiator::<Status>(&columns(&[("status", ValueKind::Text)]))
         .unwrap();
      assert_eq!(by_name.instantiate(vec![Value::Text("CLOSED".into())]).unwrap(), Status::Closed);
      assert!(by_name.instantiate(vec![Value::Text("closed".into())]).is_err());

      let by_ordinal = provider
         .find_instantiator::<Status>(&columns(&[("status", ValueKind::Integer)]))
         .unwrap();
      assert_eq!(by_ordinal.instantiate(vec![Value::Integer(0)]).unwrap(), Status::Active);
   }

   #[test]
   fn test_constructor_binding_by_name() {
      let provider = provider();
      let instantiator = provider
         .find_instantiator::<Pair>(&columns(&[
            ("LABEL", ValueKind::Text),
            ("ID", ValueKind::Integer),
         ]))
         .unwrap();
      let pair = instantiator
         .instantiate(vec![Value::Text("a".into()), Value::Integer(1)])
         .unwrap();
      assert_eq!(
         pair,
         Pair {
            id: 1,
            label: "a".into()
         }
      );
   }

   #[test]
   fn test_constructor_binding_by_position() {
      let provider = provider();
      let instantiator = provider
         .find_instantiator::<Pair>(&columns(&[("x", ValueKind::Integer), ("y", ValueKind::Text)]))
         .unwrap();
      let pair = instantiator
         .instantiate(vec![Value::Integer(2), Value::Text("b".into())])
         .unwrap();
      assert_eq!(pair.id, 2);
      assert_eq!(pair.label, "b");
   }

   #[test]
   fn test_unknown_column_kind_is_converted_per_row() {
      let provider = provider();
      let instantiator = provider
         .find_instantiator::<Pair>(&columns(&[("id", ValueKind::Null), ("label", ValueKind::Text)]))
         .unwrap();
      let pair = instantiator
         .instantiate(vec![Value::Integer(3), Value::Text("c".into())])
         .unwrap();
      assert_eq!(pair.id, 3);
   }

   #[test]
   fn test_failure_lists_rejected_constructors() {
      let provider = provider();
      let err = provider
         .find_instantiator::<Pair>(&columns(&[("id", ValueKind::Integer)]))
         .err()
         .unwrap();
      let message = err.to_string();
      assert!(message.contains("could not find a way to instantiate"));
      assert!(message.contains("Pair(id: i64, label: String): needs 2 parameters but the result has 1 columns"));
   }
}
