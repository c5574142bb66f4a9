//! Column-named tabular data passed between pipeline stages.
//!
//! A [`Dataset`] is deliberately loose: the engine does not enforce a schema
//! across stages, each transform checks the columns it needs.

pub mod types;
pub mod value;

use std::collections::HashSet;

pub use types::DatasetError;
pub use value::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Dataset {
    /// Creates an empty dataset with the given columns.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Dataset {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn from_rows<I, S>(columns: I, rows: Vec<Vec<Value>>) -> Result<Self, DatasetError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut dataset = Dataset::new(columns);
        for row in rows {
            dataset.push_row(row)?;
        }
        Ok(dataset)
    }

    /// Builds a dataset of text cells, one inner vector per row.
    pub fn from_text_rows<I, S>(columns: I, rows: &[Vec<&str>]) -> Result<Self, DatasetError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|cell| Value::from(*cell)).collect())
            .collect();
        Dataset::from_rows(columns, rows)
    }

    /// Same columns, no rows.
    pub fn empty_like(&self) -> Self {
        Dataset {
            columns: self.columns.clone(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), DatasetError> {
        if row.len() != self.columns.len() {
            return Err(DatasetError::WidthMismatch {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn column_index(&self, name: &str) -> Result<usize, DatasetError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DatasetError::MissingColumn(name.to_string()))
    }

    pub fn column(&self, name: &str) -> Result<impl Iterator<Item = &Value> + '_, DatasetError> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(move |row| &row[idx]))
    }

    pub fn value(&self, row: usize, name: &str) -> Result<Option<&Value>, DatasetError> {
        let idx = self.column_index(name)?;
        Ok(self.rows.get(row).map(|r| &r[idx]))
    }

    /// Removes rows whose `key` cell was already seen, keeping the first.
    ///
    /// Returns the number of rows removed.
    pub fn drop_duplicates(&mut self, key: &str) -> Result<usize, DatasetError> {
        let idx = self.column_index(key)?;
        let before = self.rows.len();
        let mut seen = HashSet::new();
        self.rows.retain(|row| seen.insert(row[idx].key()));
        Ok(before - self.rows.len())
    }

    /// Replaces every whitespace-only text cell with [`Value::Null`].
    pub fn normalize_blanks(&mut self) {
        self.replace_blanks(Value::Null);
    }

    /// Replaces nulls and whitespace-only text with `with`.
    pub fn replace_blanks(&mut self, with: Value) {
        for cell in self.rows.iter_mut().flatten() {
            if cell.is_blank() {
                *cell = with.clone();
            }
        }
    }

    pub fn drop_columns(&mut self, names: &[&str]) -> Result<(), DatasetError> {
        let mut indexes = names
            .iter()
            .map(|name| self.column_index(name))
            .collect::<Result<Vec<_>, _>>()?;
        indexes.sort_unstable();
        indexes.dedup();
        for idx in indexes.into_iter().rev() {
            self.columns.remove(idx);
            for row in &mut self.rows {
                row.remove(idx);
            }
        }
        Ok(())
    }

    /// Sets every cell of `name` to `value`, adding the column if needed.
    pub fn set_column(&mut self, name: &str, value: Value) {
        match self.column_index(name) {
            Ok(idx) => {
                for row in &mut self.rows {
                    row[idx] = value.clone();
                }
            }
            Err(_) => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(value.clone());
                }
            }
        }
    }

    /// Writes `f(source cell)` into `target`, adding `target` if needed.
    pub fn derive_column<F>(&mut self, target: &str, source: &str, mut f: F) -> Result<(), DatasetError>
    where
        F: FnMut(&Value) -> Value,
    {
        let src = self.column_index(source)?;
        let dst = match self.column_index(target) {
            Ok(idx) => idx,
            Err(_) => {
                self.columns.push(target.to_string());
                for row in &mut self.rows {
                    row.push(Value::Null);
                }
                self.columns.len() - 1
            }
        };
        for row in &mut self.rows {
            row[dst] = f(&row[src]);
        }
        Ok(())
    }

    /// Rewrites every cell of `name` in place.
    pub fn map_column<F>(&mut self, name: &str, mut f: F) -> Result<(), DatasetError>
    where
        F: FnMut(&Value) -> Value,
    {
        let idx = self.column_index(name)?;
        for row in &mut self.rows {
            row[idx] = f(&row[idx]);
        }
        Ok(())
    }

    /// Keeps the rows whose `name` cell satisfies `keep`.
    ///
    /// Returns the number of rows removed.
    pub fn retain_by<F>(&mut self, name: &str, mut keep: F) -> Result<usize, DatasetError>
    where
        F: FnMut(&Value) -> bool,
    {
        let idx = self.column_index(name)?;
        let before = self.rows.len();
        self.rows.retain(|row| keep(&row[idx]));
        Ok(before - self.rows.len())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<(), DatasetError> {
        let idx = self.column_index(from)?;
        self.columns[idx] = to.to_string();
        Ok(())
    }

    /// Replaces all column names positionally.
    pub fn set_columns<I, S>(&mut self, names: I) -> Result<(), DatasetError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.len() != self.columns.len() {
            return Err(DatasetError::WidthMismatch {
                expected: self.columns.len(),
                actual: names.len(),
            });
        }
        self.columns = names;
        Ok(())
    }

    /// Replaces nulls in `name` with `value`.
    pub fn fill_null(&mut self, name: &str, value: Value) -> Result<(), DatasetError> {
        self.map_column(name, |cell| match cell {
            Value::Null => value.clone(),
            other => other.clone(),
        })
    }

    /// Removes every occurrence of each pattern from the text cells of `name`.
    pub fn strip(&mut self, name: &str, patterns: &[&str]) -> Result<(), DatasetError> {
        self.map_column(name, |cell| match cell {
            Value::Text(s) => {
                let mut out = s.clone();
                for pattern in patterns {
                    out = out.replace(pattern, "");
                }
                Value::Text(out)
            }
            other => other.clone(),
        })
    }

    /// Converts the cells of `name` to numbers; text that does not parse
    /// becomes null.
    ///
    /// Returns the number of non-null cells that could not be parsed.
    pub fn coerce_numeric(&mut self, name: &str) -> Result<usize, DatasetError> {
        let mut failed = 0;
        self.map_column(name, |cell| match cell.to_numeric() {
            Some(v) => v,
            None => {
                failed += 1;
                Value::Null
            }
        })?;
        Ok(failed)
    }

    /// Renders every non-null cell of `name` as text.
    pub fn to_text(&mut self, name: &str) -> Result<(), DatasetError> {
        self.map_column(name, |cell| match cell {
            Value::Null => Value::Null,
            other => Value::Text(other.to_string()),
        })
    }

    /// Removes rows where every cell is blank.
    pub fn drop_blank_rows(&mut self) {
        self.rows.retain(|row| !row.iter().all(Value::is_blank));
    }

    /// Removes columns where every cell is blank.
    ///
    /// A dataset without rows keeps its columns.
    pub fn drop_blank_columns(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let keep: Vec<bool> = (0..self.columns.len())
            .map(|idx| !self.rows.iter().all(|row| row[idx].is_blank()))
            .collect();
        let mut flags = keep.iter();
        self.columns.retain(|_| *flags.next().unwrap_or(&true));
        for row in &mut self.rows {
            let mut flags = keep.iter();
            row.retain(|_| *flags.next().unwrap_or(&true));
        }
    }

    /// Appends the rows of `other`, matching columns by position.
    pub fn append(&mut self, other: Dataset) -> Result<(), DatasetError> {
        if other.width() != self.width() {
            return Err(DatasetError::WidthMismatch {
                expected: self.width(),
                actual: other.width(),
            });
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    /// Concatenates datasets of equal width under the first one's columns.
    pub fn concat<I>(datasets: I) -> Result<Option<Dataset>, DatasetError>
    where
        I: IntoIterator<Item = Dataset>,
    {
        let mut iter = datasets.into_iter();
        let Some(mut first) = iter.next() else {
            return Ok(None);
        };
        for next in iter {
            first.append(next)?;
        }
        Ok(Some(first))
    }
}
