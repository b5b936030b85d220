use super::SqlQuery;
use crate::argument::{Argument, ToArgument};
use crate::{Error, Result};

/// Builds a [`SqlQuery`] piece by piece, e.g. for dynamic `WHERE` clauses.
///
/// ```
/// use sqlx_sqlite_mapper::QueryBuilder;
///
/// let ids = [1, 2, 3];
/// let mut builder = QueryBuilder::new("SELECT * FROM users WHERE id IN (");
/// builder.append_placeholders_for(ids)?.append(")");
/// let query = builder.build()?;
/// assert_eq!(query.to_string(), "SELECT * FROM users WHERE id IN (?,?,?) [1, 2, 3]");
/// # Ok::<(), sqlx_sqlite_mapper::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
   sql: String,
   arguments: Vec<Argument>,
}

impl QueryBuilder {
   pub fn new(sql: &str) -> Self {
      Self {
         sql: sql.to_string(),
         arguments: Vec::new(),
      }
   }

   pub fn append(&mut self, sql: &str) -> &mut Self {
      self.sql.push_str(sql);
      self
   }

   /// Append SQL together with the arguments of its placeholders.
   pub fn append_with<I>(&mut self, sql: &str, arguments: I) -> &mut Self
   where
      I: IntoIterator,
      I::Item: ToArgument,
   {
      self.append(sql).add_arguments(arguments)
   }

   pub fn append_query(&mut self, query: &SqlQuery) -> &mut Self {
      self.sql.push_str(query.sql());
      self.arguments.extend_from_slice(query.arguments());
      self
   }

   /// Append `count` comma separated placeholders.
   pub fn append_placeholders(&mut self, count: usize) -> Result<&mut Self> {
      if count == 0 {
         return Err(Error::InvalidArgument(
            "count must be positive, but was: 0".into(),
         ));
      }
      self.sql.push('?');
      for _ in 1..count {
         self.sql.push_str(",?");
      }
      Ok(self)
   }

   /// Append one placeholder per argument and bind the arguments to them.
   pub fn append_placeholders_for<I>(&mut self, arguments: I) -> Result<&mut Self>
   where
      I: IntoIterator,
      I::Item: ToArgument,
   {
      let arguments: Vec<Argument> = arguments.into_iter().map(|a| a.to_argument()).collect();
      self.append_placeholders(arguments.len())?;
      self.arguments.extend(arguments);
      Ok(self)
   }

   pub fn add_argument(&mut self, argument: impl ToArgument) -> &mut Self {
      self.arguments.push(argument.to_argument());
      self
   }

   pub fn add_arguments<I>(&mut self, arguments: I) -> &mut Self
   where
      I: IntoIterator,
      I::Item: ToArgument,
   {
      self
         .arguments
         .extend(arguments.into_iter().map(|a| a.to_argument()));
      self
   }

   pub fn is_empty(&self) -> bool {
      self.sql.is_empty()
   }

   pub fn has_arguments(&self) -> bool {
      !self.arguments.is_empty()
   }

   pub fn build(&self) -> Result<SqlQuery> {
      if self.sql.is_empty() {
         return Err(Error::InvalidArgument("empty query".into()));
      }
      Ok(SqlQuery::with_arguments(self.sql.clone(), self.arguments.clone()))
   }
}
