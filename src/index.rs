//! Column-keyed table indices.
//!
//! Every table keeps one hash index per column mapping a value to the rows
//! holding that value in that column. Joins look up the most selective bound
//! column instead of scanning, which turns a chain join over `k` tables of `n`
//! rows from `O(n^k)` nested scans into `O(n * k)` probes when selectivity is
//! high.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::ValidationError;
use crate::value::{Tuple, Value};

/// Rows of one table plus a hash index per column.
#[derive(Debug, Clone)]
pub struct TableIndex {
    arity: usize,
    rows: HashSet<Tuple>,
    columns: Vec<HashMap<Value, HashSet<Tuple>>>,
}

impl TableIndex {
    /// Create an empty table of the given arity.
    #[must_use]
    pub fn new(arity: usize) -> Self {
        Self {
            arity,
            rows: HashSet::new(),
            columns: vec![HashMap::new(); arity],
        }
    }

    #[must_use]
    pub const fn arity(&self) -> usize {
        self.arity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn contains(&self, row: &[Value]) -> bool {
        self.rows.contains(row)
    }

    /// Insert a row. Returns false if it was already present.
    pub fn insert(&mut self, row: Tuple) -> bool {
        debug_assert_eq!(row.len(), self.arity);
        if !self.rows.insert(row.clone()) {
            return false;
        }
        for (col, value) in row.iter().enumerate() {
            self.columns[col]
                .entry(value.clone())
                .or_default()
                .insert(row.clone());
        }
        true
    }

    /// Remove a row. Returns false if it was absent.
    pub fn remove(&mut self, row: &[Value]) -> bool {
        if !self.rows.remove(row) {
            return false;
        }
        for (col, value) in row.iter().enumerate() {
            if let Some(bucket) = self.columns[col].get_mut(value) {
                bucket.remove(row);
                if bucket.is_empty() {
                    self.columns[col].remove(value);
                }
            }
        }
        true
    }

    /// Rows whose `column` equals `value`.
    pub fn lookup<'a>(&'a self, column: usize, value: &Value) -> impl Iterator<Item = &'a Tuple> + 'a {
        self.columns
            .get(column)
            .and_then(|idx| idx.get(value))
            .into_iter()
            .flat_map(HashSet::iter)
    }

    /// Rows agreeing with every bound position of `pattern`.
    ///
    /// Probes the bound column with the smallest bucket and filters the rest.
    /// An empty pattern matches every row.
    #[must_use]
    pub fn matching(&self, pattern: &[Option<&Value>]) -> Vec<Tuple> {
        if pattern.is_empty() {
            return self.rows.iter().cloned().collect();
        }
        if pattern.len() != self.arity {
            return Vec::new();
        }

        let mut best: Option<&HashSet<Tuple>> = None;
        for (col, bound) in pattern.iter().enumerate() {
            let Some(value) = bound else { continue };
            match self.columns[col].get(*value) {
                None => return Vec::new(),
                Some(bucket) => {
                    if best.map_or(true, |b| bucket.len() < b.len()) {
                        best = Some(bucket);
                    }
                }
            }
        }

        let candidates = best.unwrap_or(&self.rows);
        candidates
            .iter()
            .filter(|row| agrees(row, pattern))
            .cloned()
            .collect()
    }

    /// All rows.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.rows.iter()
    }
}

fn agrees(row: &[Value], pattern: &[Option<&Value>]) -> bool {
    row.iter()
        .zip(pattern)
        .all(|(v, p)| p.map_or(true, |p| v == p))
}

/// A set of indexed tables keyed by name.
///
/// This is the shared base every theory kind builds on.
#[derive(Debug, Clone, Default)]
pub struct FactStore {
    tables: BTreeMap<String, TableIndex>,
}

impl FactStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row, creating the table on first use.
    ///
    /// Returns `Ok(false)` if the row was already present.
    pub fn insert(&mut self, table: &str, row: Tuple) -> Result<bool, ValidationError> {
        let index = match self.tables.get_mut(table) {
            Some(index) => index,
            None => self
                .tables
                .entry(table.to_string())
                .or_insert_with(|| TableIndex::new(row.len())),
        };
        if index.arity() != row.len() {
            return Err(ValidationError::ArityMismatch {
                table: table.to_string(),
                expected: index.arity(),
                actual: row.len(),
            });
        }
        Ok(index.insert(row))
    }

    /// Remove a row. Returns false if absent.
    pub fn remove(&mut self, table: &str, row: &[Value]) -> bool {
        self.tables.get_mut(table).is_some_and(|index| index.remove(row))
    }

    #[must_use]
    pub fn contains(&self, table: &str, row: &[Value]) -> bool {
        self.tables.get(table).is_some_and(|index| index.contains(row))
    }

    /// Point lookup on one column.
    #[must_use]
    pub fn lookup(&self, table: &str, column: usize, value: &Value) -> Vec<Tuple> {
        self.tables
            .get(table)
            .map(|index| index.lookup(column, value).cloned().collect())
            .unwrap_or_default()
    }

    /// Rows matching a partially bound pattern. Unknown tables match nothing.
    #[must_use]
    pub fn matching(&self, table: &str, pattern: &[Option<&Value>]) -> Vec<Tuple> {
        self.tables
            .get(table)
            .map(|index| index.matching(pattern))
            .unwrap_or_default()
    }

    /// All rows of a table.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Tuple> {
        self.tables
            .get(table)
            .map(|index| index.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of rows in a table.
    #[must_use]
    pub fn len_of(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, TableIndex::len)
    }

    /// Established arity of a table.
    #[must_use]
    pub fn arity(&self, table: &str) -> Option<usize> {
        self.tables.get(table).map(TableIndex::arity)
    }

    /// Make sure a table exists with the given arity.
    pub fn declare(&mut self, table: &str, arity: usize) -> Result<(), ValidationError> {
        match self.tables.get(table) {
            Some(index) if index.arity() != arity => Err(ValidationError::ArityMismatch {
                table: table.to_string(),
                expected: index.arity(),
                actual: arity,
            }),
            Some(_) => Ok(()),
            None => {
                self.tables.insert(table.to_string(), TableIndex::new(arity));
                Ok(())
            }
        }
    }

    /// Names of tables holding at least one row.
    pub fn populated_tables(&self) -> impl Iterator<Item = &str> {
        self.tables
            .iter()
            .filter(|(_, index)| !index.is_empty())
            .map(|(name, _)| name.as_str())
    }

    /// Names of every known table, empty or not.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Total number of rows across tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.values().map(TableIndex::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(TableIndex::is_empty)
    }

    /// Every `(table, row)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tuple)> {
        self.tables
            .iter()
            .flat_map(|(name, index)| index.iter().map(move |row| (name.as_str(), row)))
    }

    /// Drop a table and its rows.
    pub fn drop_table(&mut self, table: &str) -> Option<TableIndex> {
        self.tables.remove(table)
    }
}
