use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::instantiation::names_match;
use crate::value::{Value, ValueKind};

/// Name and type of one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
   index: usize,
   name: String,
   #[serde(serialize_with = "serialize_kind")]
   kind: ValueKind,
   declared_type: Option<String>,
}

fn serialize_kind<S: serde::Serializer>(kind: &ValueKind, serializer: S) -> Result<S::Ok, S::Error> {
   serializer.collect_str(kind)
}

impl ColumnMetadata {
   pub(crate) fn new(index: usize, name: String, kind: ValueKind, declared_type: Option<String>) -> Self {
      Self {
         index,
         name,
         kind,
         declared_type,
      }
   }

   pub fn index(&self) -> usize {
      self.index
   }

   pub fn name(&self) -> &str {
      &self.name
   }

   /// Kind of the column's values. `Null` when the kind is unknown, e.g. for
   /// expressions that only produced NULLs.
   pub fn kind(&self) -> ValueKind {
      self.kind
   }

   /// Type the column was declared with, if it comes from a table.
   pub fn declared_type(&self) -> Option<&str> {
      self.declared_type.as_deref()
   }
}

impl fmt::Display for ColumnMetadata {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{}: {}", self.name, self.kind)
   }
}

fn column_index(columns: &[ColumnMetadata], name: &str) -> Option<usize> {
   columns
      .iter()
      .position(|column| column.name.eq_ignore_ascii_case(name))
      .or_else(|| columns.iter().position(|column| names_match(&column.name, name)))
}

/// A fully materialized query result, detached from the database.
#[derive(Debug, Clone)]
pub struct ResultTable {
   columns: Arc<[ColumnMetadata]>,
   rows: Vec<ResultRow>,
}

impl ResultTable {
   pub(crate) fn new(columns: Vec<ColumnMetadata>, rows: Vec<Vec<Value>>) -> Self {
      let columns: Arc<[ColumnMetadata]> = columns.into();
      let rows = rows
         .into_iter()
         .map(|values| ResultRow {
            values,
            columns: Arc::clone(&columns),
         })
         .collect();
      Self { columns, rows }
   }

   pub fn row_count(&self) -> usize {
      self.rows.len()
   }

   pub fn column_count(&self) -> usize {
      self.columns.len()
   }

   pub fn is_empty(&self) -> bool {
      self.rows.is_empty()
   }

   pub fn columns(&self) -> &[ColumnMetadata] {
      &self.columns
   }

   pub fn column_names(&self) -> Vec<&str> {
      self.columns.iter().map(ColumnMetadata::name).collect()
   }

   pub fn rows(&self) -> &[ResultRow] {
      &self.rows
   }

   pub fn into_rows(self) -> Vec<ResultRow> {
      self.rows
   }

   pub fn get(&self, row: usize, column: usize) -> Option<&Value> {
      self.rows.get(row)?.get(column)
   }

   pub fn get_by_name(&self, row: usize, column: &str) -> Option<&Value> {
      self.rows.get(row)?.get_by_name(column)
   }

   pub fn iter(&self) -> std::slice::Iter<'_, ResultRow> {
      self.rows.iter()
   }

   pub(crate) fn into_parts(self) -> (Arc<[ColumnMetadata]>, Vec<Vec<Value>>) {
      let rows = self.rows.into_iter().map(|row| row.values).collect();
      (self.columns, rows)
   }
}

impl<'a> IntoIterator for &'a ResultTable {
   type Item = &'a ResultRow;
   type IntoIter = std::slice::Iter<'a, ResultRow>;

   fn into_iter(self) -> Self::IntoIter {
      self.rows.iter()
   }
}

impl fmt::Display for ResultTable {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      super::formatter::write_table(self, f)
   }
}

/// One row of a [`ResultTable`].
#[derive(Debug, Clone)]
pub struct ResultRow {
   values: Vec<Value>,
   columns: Arc<[ColumnMetadata]>,
}

impl ResultRow {
   pub fn len(&self) -> usize {
      self.values.len()
   }

   pub fn is_empty(&self) -> bool {
      self.values.is_empty()
   }

   pub fn get(&self, column: usize) -> Option<&Value> {
      self.values.get(column)
   }

   /// Value of the named column. Names match ignoring case, then ignoring underscores.
   pub fn get_by_name(&self, column: &str) -> Option<&Value> {
      column_index(&self.columns, column).and_then(|index| self.values.get(index))
   }

   pub fn columns(&self) -> &[ColumnMetadata] {
      &self.columns
   }

   pub fn values(&self) -> &[Value] {
      &self.values
   }

   pub fn into_values(self) -> Vec<Value> {
      self.values
   }
}

impl fmt::Display for ResultRow {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str("[")?;
      for (i, value) in self.values.iter().enumerate() {
         if i > 0 {
            f.write_str(", ")?;
         }
         write!(f, "{value}")?;
      }
      f.write_str("]")
   }
}
