//! Theories: named sets of facts and rules.
//!
//! Every policy is held as one [`Theory`]. The kinds share a [`FactStore`]
//! base and differ in how they answer for derived tables:
//!
//! - `database` and `action` theories hold facts only.
//! - `nonrecursive` theories evaluate rules top-down on demand.
//! - `materialized` theories keep every local table's extension cached and
//!   maintain it incrementally.

pub mod database;
pub mod eval;
pub mod materialized;
pub mod nonrecursive;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::compiler::{ArityMap, DependencyGraph};
use crate::error::ValidationError;
use crate::index::FactStore;
use crate::literal::Literal;
use crate::rule::{Formula, Query, Rule};
use crate::value::{Tuple, Value};

pub use database::DatabaseTheory;
pub use eval::{NoExternal, Resolver, RowSource};
pub use materialized::MaterializedTheory;
pub use nonrecursive::NonRecursiveTheory;

/// The evaluation strategy of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    NonRecursive,
    Materialized,
    Database,
    Action,
}

impl PolicyKind {
    /// True for kinds that hold facts only.
    #[must_use]
    pub const fn is_fact_store(self) -> bool {
        matches!(self, Self::Database | Self::Action)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NonRecursive => "nonrecursive",
            Self::Materialized => "materialized",
            Self::Database => "database",
            Self::Action => "action",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nonrecursive" | "non-recursive" => Ok(Self::NonRecursive),
            "materialized" => Ok(Self::Materialized),
            "database" => Ok(Self::Database),
            "action" => Ok(Self::Action),
            other => Err(ValidationError::InvalidConfig {
                reason: format!("unknown policy kind '{other}'"),
            }),
        }
    }
}

/// Net change to one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDelta {
    pub added: HashSet<Tuple>,
    pub removed: HashSet<Tuple>,
}

impl TableDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Number of changed rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len()
    }
}

/// Per-table deltas keyed by table (or `policy:table` for imports).
pub type DeltaSet = std::collections::BTreeMap<String, TableDelta>;

/// Result of applying changes to a theory.
#[derive(Debug, Clone, Default)]
pub struct Applied {
    /// Formulas that actually changed, with `true` for insertions.
    pub changes: Vec<(Formula, bool)>,
    /// Net change to cached local tables (materialized theories only).
    pub delta: DeltaSet,
}

/// Rules of one theory in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. Returns false if already present.
    pub fn insert(&mut self, rule: Rule) -> bool {
        if self.rules.contains(&rule) {
            return false;
        }
        self.rules.push(rule);
        true
    }

    /// Remove a rule. Returns false if absent.
    pub fn remove(&mut self, rule: &Rule) -> bool {
        match self.rules.iter().position(|r| r == rule) {
            Some(pos) => {
                self.rules.remove(pos);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn contains(&self, rule: &Rule) -> bool {
        self.rules.contains(rule)
    }

    /// Rules whose head is `table`.
    pub fn defining<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules.iter().filter(move |r| r.head.table == table)
    }

    /// Tables defined by some rule.
    #[must_use]
    pub fn heads(&self) -> BTreeSet<String> {
        self.rules.iter().map(|r| r.head.table.clone()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Rule] {
        &self.rules
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Local table dependency graph.
    #[must_use]
    pub fn graph(&self) -> DependencyGraph {
        DependencyGraph::from_rules(&self.rules)
    }
}

/// Reduce a change list to the net changes against current membership.
///
/// Later events for the same formula win. Order follows first appearance.
pub(crate) fn net_changes(
    changes: &[(Formula, bool)],
    present: impl Fn(&Formula) -> bool,
) -> Vec<(Formula, bool)> {
    let mut order: Vec<&Formula> = Vec::new();
    let mut wanted: HashMap<&Formula, bool> = HashMap::new();
    for (formula, insert) in changes {
        if wanted.insert(formula, *insert).is_none() {
            order.push(formula);
        }
    }
    order
        .into_iter()
        .filter_map(|f| {
            let want = wanted.get(f).copied()?;
            (want != present(f)).then(|| (f.clone(), want))
        })
        .collect()
}

/// Record arities of every table a formula mentions locally.
pub(crate) fn record_arities(arities: &mut ArityMap, formula: &Formula) -> Result<(), ValidationError> {
    let head = formula.head();
    arities.check(&head.table, head.arity())?;
    if let Formula::Rule(rule) = formula {
        for lit in rule.body.iter().filter(|l| l.theory.is_none()) {
            arities.check(&lit.table, lit.arity())?;
        }
    }
    Ok(())
}

/// A policy's facts and rules, dispatched statically over kind.
#[derive(Debug, Clone)]
pub enum Theory {
    Database(DatabaseTheory),
    NonRecursive(NonRecursiveTheory),
    Materialized(MaterializedTheory),
}

impl Theory {
    /// Create an empty theory of the given kind.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: PolicyKind) -> Self {
        let name = name.into();
        match kind {
            PolicyKind::Database | PolicyKind::Action => Self::Database(DatabaseTheory::new(name, kind)),
            PolicyKind::NonRecursive => Self::NonRecursive(NonRecursiveTheory::new(name)),
            PolicyKind::Materialized => Self::Materialized(MaterializedTheory::new(name)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Database(t) => t.name(),
            Self::NonRecursive(t) => t.name(),
            Self::Materialized(t) => t.name(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::Database(t) => t.kind(),
            Self::NonRecursive(_) => PolicyKind::NonRecursive,
            Self::Materialized(_) => PolicyKind::Materialized,
        }
    }

    /// Base facts.
    #[must_use]
    pub fn store(&self) -> &FactStore {
        match self {
            Self::Database(t) => t.store(),
            Self::NonRecursive(t) => t.store(),
            Self::Materialized(t) => t.base(),
        }
    }

    /// Rules held by this theory.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        match self {
            Self::Database(_) => &[],
            Self::NonRecursive(t) => t.rules().as_slice(),
            Self::Materialized(t) => t.rules().as_slice(),
        }
    }

    /// Base facts as ground literals, sorted.
    #[must_use]
    pub fn facts(&self) -> Vec<Literal> {
        let store = self.store();
        let mut facts: Vec<Literal> = store
            .iter()
            .map(|(table, row)| Literal::from_table_tuple(table, row.iter().cloned()))
            .collect();
        facts.sort_by_cached_key(ToString::to_string);
        facts
    }

    /// Facts followed by rules.
    #[must_use]
    pub fn formulas(&self) -> Vec<Formula> {
        self.facts()
            .into_iter()
            .map(Formula::Fact)
            .chain(self.rules().iter().cloned().map(Formula::Rule))
            .collect()
    }

    /// True if the formula is stored here.
    #[must_use]
    pub fn contains(&self, formula: &Formula) -> bool {
        match formula {
            Formula::Fact(lit) => {
                let Some(row) = lit.tuple() else { return false };
                self.store().contains(&lit.table, &row)
            }
            Formula::Rule(rule) => self.rules().contains(rule),
        }
    }

    /// True if `table` has local facts or a local rule.
    #[must_use]
    pub fn defines(&self, table: &str) -> bool {
        match self {
            Self::Database(t) => t.defines(table),
            Self::NonRecursive(t) => t.defines(table),
            Self::Materialized(t) => t.defines(table),
        }
    }

    /// Tables with local facts or rules.
    #[must_use]
    pub fn defined_tables(&self) -> BTreeSet<String> {
        match self {
            Self::Database(t) => t.store().table_names().map(str::to_string).collect(),
            Self::NonRecursive(t) => t.defined_tables(),
            Self::Materialized(t) => t.local_tables().clone(),
        }
    }

    /// Every table mentioned: facts, rule heads and unqualified body tables.
    #[must_use]
    pub fn tablenames(&self) -> BTreeSet<String> {
        let mut names = self.defined_tables();
        for rule in self.rules() {
            for lit in rule.body.iter().filter(|l| l.theory.is_none()) {
                names.insert(lit.table.clone());
            }
        }
        names
    }

    /// Arities of every table this theory mentions locally.
    pub fn arity_map(&self) -> ArityMap {
        let mut arities = ArityMap::new();
        let store = self.store();
        for table in store.table_names() {
            if let Some(arity) = store.arity(table) {
                // Tables in one store are consistent by construction.
                let _ = arities.check(table, arity);
            }
        }
        for rule in self.rules() {
            let _ = record_arities(&mut arities, &Formula::Rule(rule.clone()));
        }
        arities
    }

    /// Body literals that read tables this theory does not define.
    #[must_use]
    pub fn external_literals(&self) -> Vec<&Literal> {
        let defined = self.defined_tables();
        self.rules()
            .iter()
            .flat_map(|r| r.body.iter())
            .filter(|lit| match &lit.theory {
                Some(theory) => theory != self.name(),
                None => !defined.contains(&lit.table),
            })
            .collect()
    }

    /// Rows of a local table matching `pattern`.
    pub fn rows(&self, table: &str, pattern: &[Option<&Value>], resolver: &dyn Resolver) -> Vec<Tuple> {
        match self {
            Self::Database(t) => t.rows(table, pattern),
            Self::NonRecursive(t) => t.rows(table, pattern, resolver),
            Self::Materialized(t) => t.rows(table, pattern),
        }
    }

    /// Answer a query, one rendered row per distinct answer.
    pub fn select(&self, query: &Query, resolver: &dyn Resolver) -> Vec<String> {
        match self {
            Self::Database(t) => t.select(query, resolver),
            Self::NonRecursive(t) => t.select(query, resolver),
            Self::Materialized(t) => t.select(query, resolver),
        }
    }

    /// Apply a list of changes, returning what actually changed.
    ///
    /// Materialized theories also refresh their imports through `resolver`.
    pub fn apply(&mut self, changes: &[(Formula, bool)], resolver: &dyn Resolver) -> Result<Applied, ValidationError> {
        match self {
            Self::Database(t) => t.apply(changes),
            Self::NonRecursive(t) => t.apply(changes),
            Self::Materialized(t) => t.apply(changes, resolver),
        }
    }

    /// Insert one formula into a standalone theory.
    pub fn insert(&mut self, formula: Formula) -> Result<bool, ValidationError> {
        Ok(!self.apply(&[(formula, true)], &NoExternal)?.changes.is_empty())
    }

    /// Delete one formula from a standalone theory.
    pub fn delete(&mut self, formula: Formula) -> Result<bool, ValidationError> {
        Ok(!self.apply(&[(formula, false)], &NoExternal)?.changes.is_empty())
    }

    /// Check that `rules` is an acceptable rule set for this theory's kind.
    pub fn check_rules(&self, rules: &RuleSet) -> Result<(), ValidationError> {
        match self {
            Self::Database(_) => Ok(()),
            Self::NonRecursive(t) => t.check_rules(rules),
            Self::Materialized(t) => t.check_rules(rules),
        }
    }
}
