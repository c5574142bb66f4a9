//! Append-only audit log shared by every pipeline stage.
//!
//! A [`LogTable`] is the only value a pipeline run hands back to its caller.
//! Rows are never removed or rewritten; a correction is just another row.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Category of a log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogIdentifier {
    /// The message is the path of a file that was read successfully.
    FileProcessed,
    Success,
    Error,
    Warning,
    /// The input could not be opened (bad password, permissions).
    Access,
}

impl LogIdentifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogIdentifier::FileProcessed => "file_processed",
            LogIdentifier::Success => "success",
            LogIdentifier::Error => "error",
            LogIdentifier::Warning => "warning",
            LogIdentifier::Access => "access",
        }
    }
}

impl fmt::Display for LogIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log identifier '{0}'")]
pub struct UnknownIdentifier(pub String);

impl FromStr for LogIdentifier {
    type Err = UnknownIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "file_processed" => Ok(LogIdentifier::FileProcessed),
            "success" => Ok(LogIdentifier::Success),
            "error" => Ok(LogIdentifier::Error),
            "warning" => Ok(LogIdentifier::Warning),
            "access" => Ok(LogIdentifier::Access),
            other => Err(UnknownIdentifier(other.to_string())),
        }
    }
}

/// A single `(identifier, message)` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRow {
    pub index: usize,
    pub identifier: LogIdentifier,
    pub message: String,
}

/// Ordered, append-only sequence of [`LogRow`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogTable {
    rows: Vec<LogRow>,
}

impl LogTable {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    /// Appends one row and returns the table.
    ///
    /// The new row gets index 0 on an empty table, otherwise the current
    /// maximum index plus one.
    #[must_use]
    pub fn append(mut self, identifier: LogIdentifier, message: impl Into<String>) -> Self {
        self.push(identifier, message);
        self
    }

    /// In-place form of [`LogTable::append`].
    pub fn push(&mut self, identifier: LogIdentifier, message: impl Into<String>) {
        let index = self.next_index();
        self.rows.push(LogRow {
            index,
            identifier,
            message: message.into(),
        });
    }

    /// Appends every row of `other`, re-indexed after the rows already here.
    pub fn extend(&mut self, other: LogTable) {
        for row in other.rows {
            self.push(row.identifier, row.message);
        }
    }

    fn next_index(&self) -> usize {
        self.rows
            .iter()
            .map(|row| row.index)
            .max()
            .map_or(0, |max| max + 1)
    }

    pub fn rows(&self) -> &[LogRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last(&self) -> Option<&LogRow> {
        self.rows.last()
    }

    /// Rows with the given identifier, in insertion order.
    pub fn filter(&self, identifier: LogIdentifier) -> impl Iterator<Item = &LogRow> + '_ {
        self.rows
            .iter()
            .filter(move |row| row.identifier == identifier)
    }

    /// Messages of the rows with the given identifier.
    ///
    /// `messages(LogIdentifier::FileProcessed)` yields the processed file paths.
    pub fn messages(&self, identifier: LogIdentifier) -> Vec<&str> {
        self.filter(identifier)
            .map(|row| row.message.as_str())
            .collect()
    }

    pub fn count(&self, identifier: LogIdentifier) -> usize {
        self.filter(identifier).count()
    }

    pub fn has_errors(&self) -> bool {
        self.count(LogIdentifier::Error) > 0
    }
}

impl IntoIterator for LogTable {
    type Item = LogRow;
    type IntoIter = std::vec::IntoIter<LogRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
