use std::fmt;

use super::ResultTable;
use crate::value::Value;

const MAX_COLUMN_LENGTH: usize = 50;

/// Writes the table as an aligned ASCII grid:
///
/// ```text
/// | id | name  |
/// | -- | ----- |
/// | 1  | Alice |
/// ```
pub(super) fn write_table(table: &ResultTable, out: &mut impl fmt::Write) -> fmt::Result {
   let names = table.column_names();
   let rows: Vec<Vec<String>> = table
      .rows()
      .iter()
      .map(|row| row.values().iter().map(cell_text).collect())
      .collect();

   let mut lengths: Vec<usize> = names.iter().map(|name| name.chars().count()).collect();
   for row in &rows {
      for (length, cell) in lengths.iter_mut().zip(row) {
         *length = (*length).max(cell.chars().count());
      }
   }
   for length in &mut lengths {
      *length = (*length).min(MAX_COLUMN_LENGTH);
   }

   write_row(out, &names, &lengths, ' ')?;
   write_row(out, &vec![""; lengths.len()], &lengths, '-')?;
   for row in &rows {
      write_row(out, row, &lengths, ' ')?;
   }
   Ok(())
}

fn write_row<S: AsRef<str>>(
   out: &mut impl fmt::Write,
   cells: &[S],
   lengths: &[usize],
   padding: char,
) -> fmt::Result {
   out.write_char('|')?;
   for (cell, length) in cells.iter().zip(lengths) {
      let cell = truncate(cell.as_ref(), *length);
      out.write_char(' ')?;
      out.write_str(&cell)?;
      for _ in cell.chars().count()..*length {
         out.write_char(padding)?;
      }
      out.write_str(" |")?;
   }
   out.write_char('\n')
}

/// Plain text of a cell: strings without quotes, everything else as displayed.
fn cell_text(value: &Value) -> String {
   match value.as_text() {
      Some(text) => text.into_owned(),
      None => value.to_string(),
   }
}

fn truncate(text: &str, length: usize) -> String {
   const ELLIPSIS: &str = "...";

   if text.chars().count() <= length {
      return text.to_string();
   }
   if length < ELLIPSIS.len() {
      return ELLIPSIS[..length].to_string();
   }
   let mut truncated: String = text.chars().take(length - ELLIPSIS.len()).collect();
   truncated.push_str(ELLIPSIS);
   truncated
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::result::ColumnMetadata;
   use crate::value::ValueKind;

   #[test]
   fn test_truncate() {
      assert_eq!(truncate("", 4), "");
      assert_eq!(truncate("quux", 4), "quux");
      assert_eq!(truncate("foobar-baz", 6), "foo...");
      assert_eq!(truncate("foobar", 2), "..");
   }

   #[test]
   fn test_table_layout() {
      let table = ResultTable::new(
         vec![
            ColumnMetadata::new(0, "id".into(), ValueKind::Integer, None),
            ColumnMetadata::new(1, "name".into(), ValueKind::Text, None),
         ],
         vec![
            vec![Value::Integer(1), Value::Text("Alice".into())],
            vec![Value::Integer(22), Value::Null],
         ],
      );

      assert_eq!(
         table.to_string(),
         "| id | name  |\n\
          | -- | ----- |\n\
          | 1  | Alice |\n\
          | 22 | null  |\n"
      );
   }

   #[test]
   fn test_long_values_are_truncated() {
      let long = "x".repeat(80);
      let table = ResultTable::new(
         vec![ColumnMetadata::new(0, "v".into(), ValueKind::Text, None)],
         vec![vec![Value::Text(long)]],
      );
      let rendered = table.to_string();
      let last = rendered.lines().last().unwrap();
      assert_eq!(last.len(), MAX_COLUMN_LENGTH + 4);
      assert!(last.ends_with("... |"));
   }
}
