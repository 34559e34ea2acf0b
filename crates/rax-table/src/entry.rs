//! Log records as callers see them

use chrono::{DateTime, Utc};

/// A log to append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLog {
    pub text: String,
    pub categories: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl NewLog {
    pub fn new<I, S>(text: impl Into<String>, categories: I, timestamp: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            text: text.into(),
            categories: categories.into_iter().map(Into::into).collect(),
            timestamp,
        }
    }
}

/// A log read back from a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Append-order position, starting at 0
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    /// Category names, duplicates removed, in first-mention order
    pub categories: Vec<String>,
}

impl LogEntry {
    pub fn has_category(&self, name: &str) -> bool {
        self.categories.iter().any(|c| c == name)
    }
}
