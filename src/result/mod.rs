//! Query results and their processing into Rust values

mod formatter;
mod table;

use std::hash::Hash;

use indexmap::IndexMap;

use crate::conversion::SqlTarget;
use crate::instantiation::InstantiatorProvider;
use crate::{Error, Result};

pub use table::{ColumnMetadata, ResultRow, ResultTable};

/// Hand-written mapping of a row into a value.
///
/// Implemented for closures, so `|row: &ResultRow| ...` can be passed wherever a
/// mapper is expected.
pub trait RowMapper<T> {
   fn map_row(&self, row: &ResultRow) -> Result<T>;
}

impl<T, F> RowMapper<T> for F
where
   F: Fn(&ResultRow) -> Result<T>,
{
   fn map_row(&self, row: &ResultRow) -> Result<T> {
      self(row)
   }
}

/// Instantiate every row as `T`. The instantiator is only looked up when there are rows.
pub(crate) fn instantiate_rows<T: SqlTarget>(
   provider: &InstantiatorProvider,
   table: ResultTable,
) -> Result<Vec<T>> {
   if table.is_empty() {
      return Ok(Vec::new());
   }
   let instantiator = provider.find_instantiator::<T>(table.columns())?;
   let (_, rows) = table.into_parts();
   rows
      .into_iter()
      .map(|values| instantiator.instantiate(values))
      .collect()
}

pub(crate) fn map_rows<T, M>(mapper: &M, table: &ResultTable) -> Result<Vec<T>>
where
   M: RowMapper<T> + ?Sized,
{
   table.iter().map(|row| mapper.map_row(row)).collect()
}

/// Build a map keyed by the first column, with values instantiated from the rest.
pub(crate) fn instantiate_map<K, V>(
   provider: &InstantiatorProvider,
   table: ResultTable,
) -> Result<IndexMap<K, V>>
where
   K: SqlTarget + Hash + Eq,
   V: SqlTarget,
{
   if table.column_count() < 2 {
      return Err(Error::UnexpectedResult(format!(
         "Expected result with at least 2 columns, but got {} columns.",
         table.column_count()
      )));
   }
   if table.is_empty() {
      return Ok(IndexMap::new());
   }

   let key_instantiator = provider.find_instantiator::<K>(&table.columns()[..1])?;
   let value_instantiator = provider.find_instantiator::<V>(&table.columns()[1..])?;
   let (_, rows) = table.into_parts();

   let mut result = IndexMap::with_capacity(rows.len());
   for mut values in rows {
      let rest = values.split_off(1);
      let key = key_instantiator.instantiate(values)?;
      let value = value_instantiator.instantiate(rest)?;
      result.insert(key, value);
   }
   Ok(result)
}

/// Exactly one result, or a cardinality error naming the query.
pub(crate) fn unique<T>(mut results: Vec<T>, query: &dyn std::fmt::Display) -> Result<T> {
   match results.len() {
      1 => results.pop().ok_or_else(|| Error::EmptyResult {
         query: query.to_string(),
      }),
      0 => Err(Error::EmptyResult {
         query: query.to_string(),
      }),
      count => Err(Error::NonUniqueResult {
         count,
         query: query.to_string(),
      }),
   }
}

/// At most one result.
pub(crate) fn optional<T>(mut results: Vec<T>, query: &dyn std::fmt::Display) -> Result<Option<T>> {
   match results.len() {
      0 | 1 => Ok(results.pop()),
      count => Err(Error::NonUniqueResult {
         count,
         query: query.to_string(),
      }),
   }
}
