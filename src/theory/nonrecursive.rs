//! Non-recursive theories: rules evaluated top-down on demand.
//!
//! Nothing is cached. A lookup on a table unions the matching base facts with
//! the answers of every rule defining the table, binding the rule head against
//! the lookup pattern first so bound arguments flow into the body. Because no
//! local table may depend on itself, the recursion through local tables is
//! bounded by the depth of the dependency graph.

use std::collections::{BTreeSet, HashSet};

use crate::compiler::ArityMap;
use crate::error::ValidationError;
use crate::index::FactStore;
use crate::literal::Literal;
use crate::rule::{Formula, Query};
use crate::value::{Tuple, Value};

use super::eval::{self, Resolver, RowSource};
use super::{net_changes, record_arities, Applied, RuleSet};

/// A theory whose derived tables are computed on demand.
#[derive(Debug, Clone)]
pub struct NonRecursiveTheory {
    name: String,
    store: FactStore,
    rules: RuleSet,
}

impl NonRecursiveTheory {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store: FactStore::new(),
            rules: RuleSet::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn store(&self) -> &FactStore {
        &self.store
    }

    #[must_use]
    pub const fn rules(&self) -> &RuleSet {
        &self.rules
    }

    #[must_use]
    pub fn defines(&self, table: &str) -> bool {
        self.store.arity(table).is_some() || self.rules.defining(table).next().is_some()
    }

    #[must_use]
    pub fn defined_tables(&self) -> BTreeSet<String> {
        let mut tables = self.rules.heads();
        tables.extend(self.store.table_names().map(str::to_string));
        tables
    }

    /// Reject rule sets in which some table depends on itself.
    pub fn check_rules(&self, rules: &RuleSet) -> Result<(), ValidationError> {
        match rules.graph().find_cycle() {
            Some(cycle) => Err(ValidationError::Recursive {
                policy: self.name.clone(),
                table: cycle.first().cloned().unwrap_or_default(),
            }),
            None => Ok(()),
        }
    }

    /// Rows of a local table matching `pattern`, derived top-down.
    pub fn rows(&self, table: &str, pattern: &[Option<&Value>], resolver: &dyn Resolver) -> Vec<Tuple> {
        let source = Source { theory: self, resolver };
        let mut out: HashSet<Tuple> = self.store.matching(table, pattern).into_iter().collect();
        for rule in self.rules.defining(table) {
            let mut bindings = vec![None; rule.variable_count()];
            if !eval::bind_head(&rule.head, pattern, &mut bindings) {
                continue;
            }
            eval::solve(&source, &rule.body, &mut bindings, None, &mut |b| {
                if let Some(row) = eval::ground_tuple(&rule.head, b) {
                    if eval::agrees(&row, pattern) {
                        out.insert(row);
                    }
                }
            });
        }
        out.into_iter().collect()
    }

    pub fn select(&self, query: &Query, resolver: &dyn Resolver) -> Vec<String> {
        eval::answer(&Source { theory: self, resolver }, query)
    }

    pub fn apply(&mut self, changes: &[(Formula, bool)]) -> Result<Applied, ValidationError> {
        let changes = net_changes(changes, |f| match f {
            Formula::Fact(lit) => lit.tuple().is_some_and(|row| self.store.contains(&lit.table, &row)),
            Formula::Rule(rule) => self.rules.contains(rule),
        });
        if changes.is_empty() {
            return Ok(Applied::default());
        }

        let mut arities = ArityMap::new();
        for table in self.store.table_names() {
            if let Some(arity) = self.store.arity(table) {
                arities.check(table, arity)?;
            }
        }
        for rule in self.rules.iter() {
            record_arities(&mut arities, &Formula::Rule(rule.clone()))?;
        }

        let mut rules = self.rules.clone();
        let mut facts: Vec<(&str, Tuple, bool)> = Vec::new();
        for (formula, insert) in &changes {
            record_arities(&mut arities, formula)?;
            match formula {
                Formula::Fact(lit) => {
                    let row = lit.tuple().ok_or_else(|| ValidationError::NonGroundFact {
                        literal: lit.to_string(),
                    })?;
                    facts.push((lit.table.as_str(), row, *insert));
                }
                Formula::Rule(rule) => {
                    if *insert {
                        rules.insert(rule.clone());
                    } else {
                        rules.remove(rule);
                    }
                }
            }
        }
        self.check_rules(&rules)?;

        for (table, row, insert) in facts {
            if insert {
                self.store.insert(table, row)?;
            } else {
                self.store.remove(table, &row);
            }
        }
        self.rules = rules;

        Ok(Applied {
            changes,
            delta: Default::default(),
        })
    }
}

/// Rule bodies read local tables through the theory itself and everything
/// else through the resolver.
struct Source<'a> {
    theory: &'a NonRecursiveTheory,
    resolver: &'a dyn Resolver,
}

impl RowSource for Source<'_> {
    fn rows(&self, lit: &Literal, pattern: &[Option<&Value>]) -> Vec<Tuple> {
        if self.is_local(lit) {
            self.theory.rows(&lit.table, pattern, self.resolver)
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
