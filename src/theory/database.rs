//! Fact-only theories (`database` and `action` kinds).

use crate::compiler::ArityMap;
use crate::error::ValidationError;
use crate::index::FactStore;
use crate::literal::Literal;
use crate::rule::{Formula, Query};
use crate::value::{Tuple, Value};

use super::eval::{self, Resolver, RowSource};
use super::{net_changes, Applied, PolicyKind};

/// A theory that stores facts and nothing else.
#[derive(Debug, Clone)]
pub struct DatabaseTheory {
    name: String,
    kind: PolicyKind,
    store: FactStore,
}

impl DatabaseTheory {
    /// Create an empty fact store of kind `database` or `action`.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: PolicyKind) -> Self {
        debug_assert!(kind.is_fact_store());
        Self {
            name: name.into(),
            kind,
            store: FactStore::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> PolicyKind {
        self.kind
    }

    #[must_use]
    pub const fn store(&self) -> &FactStore {
        &self.store
    }

    #[must_use]
    pub fn defines(&self, table: &str) -> bool {
        self.store.arity(table).is_some()
    }

    /// Index lookup.
    #[must_use]
    pub fn rows(&self, table: &str, pattern: &[Option<&Value>]) -> Vec<Tuple> {
        self.store.matching(table, pattern)
    }

    pub fn select(&self, query: &Query, resolver: &dyn Resolver) -> Vec<String> {
        eval::answer(&Source { theory: self, resolver }, query)
    }

    pub fn apply(&mut self, changes: &[(Formula, bool)]) -> Result<Applied, ValidationError> {
        let changes = net_changes(changes, |f| match f {
            Formula::Fact(lit) => lit.tuple().is_some_and(|row| self.store.contains(&lit.table, &row)),
            Formula::Rule(_) => false,
        });

        let mut arities = ArityMap::new();
        let mut facts = Vec::with_capacity(changes.len());
        for (formula, insert) in &changes {
            match formula {
                Formula::Rule(rule) => {
                    return Err(ValidationError::RuleInFactStore {
                        policy: self.name.clone(),
                        kind: self.kind.to_string(),
                        rule: rule.to_string(),
                    });
                }
                Formula::Fact(lit) => {
                    let row = lit.tuple().ok_or_else(|| ValidationError::NonGroundFact {
                        literal: lit.to_string(),
                    })?;
                    if let Some(existing) = self.store.arity(&lit.table) {
                        arities.check(&lit.table, existing)?;
                    }
                    arities.check(&lit.table, row.len())?;
                    facts.push((lit.table.as_str(), row, *insert));
                }
            }
        }

        for (table, row, insert) in facts {
            if insert {
                self.store.insert(table, row)?;
            } else {
                self.store.remove(table, &row);
            }
        }

        Ok(Applied {
            changes,
            delta: Default::default(),
        })
    }
}

struct Source<'a> {
    theory: &'a DatabaseTheory,
    resolver: &'a dyn Resolver,
}

impl RowSource for Source<'_> {
    fn rows(&self, lit: &Literal, pattern: &[Option<&Value>]) -> Vec<Tuple> {
        if self.is_local(lit) {
            self.theory.rows(&lit.table, pattern)
        } else {
            self.resolver.rows(lit.theory.as_deref(), &lit.table, pattern)
        }
    }

    fn is_local(&self, lit: &Literal) -> bool {
        match lit.theory.as_deref() {
            Some(theory) => theory == self.theory.name,
            None => self.theory.defines(&lit.table),
        }
    }
}
