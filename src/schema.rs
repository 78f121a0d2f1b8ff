//! Data-source schemas.
//!
//! A data source announces the tables it publishes and their columns before
//! it publishes any rows, so rules referencing those tables can be arity
//! checked up front.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tables published by one data source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    tables: BTreeMap<String, Vec<String>>,
}

impl Schema {
    /// Create an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table with the given column names.
    #[must_use]
    pub fn with_table<I, S>(mut self, table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert_table(table, columns);
        self
    }

    /// Add or replace a table.
    pub fn insert_table<I, S>(&mut self, table: impl Into<String>, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables
            .insert(table.into(), columns.into_iter().map(Into::into).collect());
    }

    /// Column names of a table.
    #[must_use]
    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.tables.get(table).map(Vec::as_slice)
    }

    /// Arity of a table.
    #[must_use]
    pub fn arity(&self, table: &str) -> Option<usize> {
        self.tables.get(table).map(Vec::len)
    }

    /// True if the schema declares the table.
    #[must_use]
    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Declared table names.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
