use std::sync::OnceLock;

use regex::Regex;

use super::{SqlQuery, VariableResolver};
use crate::{Error, Result};

/// SQL with named parameters replaced by `?`, plus the names in order of appearance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NamedParameterSql {
   pub(crate) sql: String,
   pub(crate) parameter_names: Vec<String>,
}

impl NamedParameterSql {
   pub(crate) fn to_query<R>(&self, resolver: &R) -> Result<SqlQuery>
   where
      R: VariableResolver + ?Sized,
   {
      let arguments = self
         .parameter_names
         .iter()
         .map(|name| resolver.resolve(name))
         .collect::<Result<Vec<_>>>()?;
      Ok(SqlQuery::with_arguments(self.sql.clone(), arguments))
   }
}

/// Region of SQL copied verbatim, so that colons inside it are not parameters.
struct SkippableBlock {
   start: &'static str,
   end: &'static str,
   ends_at_end_of_input: bool,
}

const SKIPPABLE_BLOCKS: &[SkippableBlock] = &[
   SkippableBlock {
      start: "'",
      end: "'",
      ends_at_end_of_input: false,
   },
   SkippableBlock {
      start: "\"",
      end: "\"",
      ends_at_end_of_input: false,
   },
   SkippableBlock {
      start: "/*",
      end: "*/",
      ends_at_end_of_input: false,
   },
   // PostgreSQL style casts: `col::TEXT`
   SkippableBlock {
      start: "::",
      end: "",
      ends_at_end_of_input: false,
   },
   SkippableBlock {
      start: "--",
      end: "\n",
      ends_at_end_of_input: true,
   },
];

fn identifier() -> Option<&'static Regex> {
   static IDENTIFIER: OnceLock<Option<Regex>> = OnceLock::new();
   IDENTIFIER
      .get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+").ok())
      .as_ref()
}

pub(crate) fn parse_named_parameters(sql: &str) -> Result<NamedParameterSql> {
   let mut parser = Parser {
      sql,
      offset: 0,
      output: String::with_capacity(sql.len()),
      parameter_names: Vec::new(),
   };
   while parser.has_more() {
      parser.parse_next()?;
   }
   Ok(NamedParameterSql {
      sql: parser.output,
      parameter_names: parser.parameter_names,
   })
}

struct Parser<'a> {
   sql: &'a str,
   offset: usize,
   output: String,
   parameter_names: Vec<String>,
}

impl Parser<'_> {
   fn has_more(&self) -> bool {
      self.offset < self.sql.len()
   }

   fn rest(&self) -> &str {
      &self.sql[self.offset..]
   }

   fn looking_at(&self, prefix: &str) -> bool {
      self.rest().starts_with(prefix)
   }

   fn syntax_error(&self, message: impl Into<String>) -> Error {
      Error::SqlSyntax {
         message: message.into(),
         sql: self.sql.to_string(),
      }
   }

   fn parse_next(&mut self) -> Result<()> {
      if let Some(block) = SKIPPABLE_BLOCKS.iter().find(|block| self.looking_at(block.start)) {
         self.read_block(block)
      } else if self.looking_at(":") {
         self.offset += 1;
         let name = self.read_name()?;
         self.output.push('?');
         self.parameter_names.push(name);
         Ok(())
      } else if self.looking_at("?") {
         Err(self.syntax_error("SQL cannot contain traditional ? placeholders."))
      } else {
         if let Some(c) = self.rest().chars().next() {
            self.output.push(c);
            self.offset += c.len_utf8();
         }
         Ok(())
      }
   }

   fn read_name(&mut self) -> Result<String> {
      let name = identifier()
         .and_then(|pattern| pattern.find(self.rest()))
         .map(|m| m.as_str().to_string())
         .ok_or_else(|| self.syntax_error("SQL cannot end to named parameter without name"))?;
      self.offset += name.len();
      Ok(name)
   }

   fn read_block(&mut self, block: &SkippableBlock) -> Result<()> {
      let start = self.offset;
      let search_from = start + block.start.len();
      let end = match self.sql[search_from..].find(block.end) {
         Some(hit) => search_from + hit + block.end.len(),
         None if block.ends_at_end_of_input => self.sql.len(),
         None => {
            return Err(self.syntax_error(format!("Block end not found: \"{}\".", block.end)));
         }
      };
      self.output.push_str(&self.sql[start..end]);
      self.offset = end;
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn assert_parsed(sql: &str, expected_sql: &str, expected_names: &[&str]) {
      let parsed = parse_named_parameters(sql).unwrap();
      assert_eq!(parsed.sql, expected_sql);
      assert_eq!(parsed.parameter_names, expected_names);
   }

   #[test]
   fn test_simple_query() {
      assert_parsed(
         "SELECT * FROM foo WHERE col = :col",
         "SELECT * FROM foo WHERE col = ?",
         &["col"],
      );
   }

   #[test]
   fn test_literal_like_named_parameter() {
      assert_parsed(
         "SELECT * FROM foobaz f WHERE f.id = :id AND f.col = ':notanamedparameter'",
         "SELECT * FROM foobaz f WHERE f.id = ? AND f.col = ':notanamedparameter'",
         &["id"],
      );
   }

   #[test]
   fn test_line_comment_without_line_end() {
      assert_parsed(
         "SELECT *, f.col::TEXT FROM foobar f WHERE f.id = :id -- comment :notnamedparameter",
         "SELECT *, f.col::TEXT FROM foobar f WHERE f.id = ? -- comment :notnamedparameter",
         &["id"],
      );
   }

   #[test]
   fn test_line_comment() {
      assert_parsed(
         "SELECT * FROM foobar f -- comment :notnamedparameter \n WHERE f.id = :id",
         "SELECT * FROM foobar f -- comment :notnamedparameter \n WHERE f.id = ?",
         &["id"],
      );
   }

   #[test]
   fn test_complex_query() {
      assert_parsed(
         "SELECT *, 1::TEXT FROM foobar f WHERE f.id = :id AND /* comment :notparameter */ f.qwerty = :bar*/snafu*/ AND f.literal = 'laalaa :pai puppa' AND f.test =:test /*what*/   /*  */ -- ef  ",
         "SELECT *, 1::TEXT FROM foobar f WHERE f.id = ? AND /* comment :notparameter */ f.qwerty = ?*/snafu*/ AND f.literal = 'laalaa :pai puppa' AND f.test =? /*what*/   /*  */ -- ef  ",
         &["id", "bar", "test"],
      );
   }

   #[test]
   fn test_quoted_strings() {
      assert_parsed("select 'foo '' :bar'", "select 'foo '' :bar'", &[]);
      assert_parsed("select \" :bar  \"", "select \" :bar  \"", &[]);
   }

   #[test]
   fn test_non_ascii_text_is_preserved() {
      assert_parsed(
         "SELECT 'äö' || name FROM ääkköset WHERE id = :id",
         "SELECT 'äö' || name FROM ääkköset WHERE id = ?",
         &["id"],
      );
   }

   #[test]
   fn test_traditional_placeholder_is_rejected() {
      let err = parse_named_parameters("SELECT * FROM foo WHERE id = ?").unwrap_err();
      assert_eq!(err.error_code(), "SQL_SYNTAX");
      assert!(err.to_string().contains("SQL cannot contain traditional ? placeholders."));
   }

   #[test]
   fn test_missing_parameter_name() {
      let err = parse_named_parameters("SELECT * FROM foo WHERE id = :").unwrap_err();
      assert!(err.to_string().contains("SQL cannot end to named parameter without name"));
   }

   #[test]
   fn test_unterminated_block() {
      let err = parse_named_parameters("SELECT 'abc FROM foo").unwrap_err();
      assert!(err.to_string().contains("Block end not found: \"'\"."));

      let err = parse_named_parameters("SELECT 1 /* comment").unwrap_err();
      assert!(err.to_string().contains("Block end not found: \"*/\"."));
   }
}
