//! SQL queries with their arguments
//!
//! Queries use `?` placeholders bound positionally. [`SqlQuery::named`] accepts
//! `:name` placeholders instead and looks their values up with a [`VariableResolver`].

mod builder;
mod named;
mod resolver;

use std::fmt;

use serde::Serialize;

use crate::Result;
use crate::argument::{Argument, ToArgument};

pub use builder::QueryBuilder;
pub use resolver::{FnResolver, VariableResolver, resolver_fn};

/// SQL text together with the arguments bound to its placeholders.
#[derive(Debug, Clone)]
pub struct SqlQuery {
   sql: String,
   arguments: Vec<Argument>,
}

impl SqlQuery {
   pub fn new(sql: impl Into<String>) -> Self {
      Self::with_arguments(sql, Vec::new())
   }

   pub fn with_arguments(sql: impl Into<String>, arguments: Vec<Argument>) -> Self {
      Self {
         sql: sql.into(),
         arguments,
      }
   }

   /// Bind the next positional argument.
   pub fn bind(mut self, value: impl ToArgument) -> Self {
      self.arguments.push(value.to_argument());
      self
   }

   /// Parse SQL with `:name` parameters, taking their values from `resolver`.
   ///
   /// Text inside quotes and comments is left alone, as are `::` casts. Traditional `?`
   /// placeholders are rejected.
   ///
   /// ```
   /// use std::collections::HashMap;
   /// use sqlx_sqlite_mapper::SqlQuery;
   ///
   /// let values = HashMap::from([("min", 10), ("max", 20)]);
   /// let query = SqlQuery::named("SELECT id FROM t WHERE x BETWEEN :min AND :max", &values)?;
   /// assert_eq!(query.sql(), "SELECT id FROM t WHERE x BETWEEN ? AND ?");
   /// assert_eq!(query.to_string(), "SELECT id FROM t WHERE x BETWEEN ? AND ? [10, 20]");
   /// # Ok::<(), sqlx_sqlite_mapper::Error>(())
   /// ```
   pub fn named<R>(sql: &str, resolver: &R) -> Result<Self>
   where
      R: VariableResolver + ?Sized,
   {
      named::parse_named_parameters(sql)?.to_query(resolver)
   }

   /// Like [`SqlQuery::named`], but resolving names against the fields of a serializable
   /// struct.
   pub fn named_from<T: Serialize + ?Sized>(sql: &str, value: &T) -> Result<Self> {
      let fields = resolver::resolver_for_serialize(value)?;
      Self::named(sql, &fields)
   }

   pub fn sql(&self) -> &str {
      &self.sql
   }

   pub fn arguments(&self) -> &[Argument] {
      &self.arguments
   }
}

impl From<&str> for SqlQuery {
   fn from(sql: &str) -> Self {
      SqlQuery::new(sql)
   }
}

impl From<String> for SqlQuery {
   fn from(sql: String) -> Self {
      SqlQuery::new(sql)
   }
}

impl From<&SqlQuery> for SqlQuery {
   fn from(query: &SqlQuery) -> Self {
      query.clone()
   }
}

impl fmt::Display for SqlQuery {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{} [", self.sql)?;
      for (i, argument) in self.arguments.iter().enumerate() {
         if i > 0 {
            f.write_str(", ")?;
         }
         write!(f, "{argument}")?;
      }
      f.write_str("]")
   }
}
