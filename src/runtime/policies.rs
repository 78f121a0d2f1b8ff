//! The policies of a runtime and how they see each other.
//!
//! A batch is handled in two steps. [`PolicySet::stage`] validates every event
//! against a draft of each target (formula shape, arity, rule-set acceptability
//! for the target's kind, and acyclicity of the policy reference graph) without
//! touching any theory. [`PolicySet::commit`] then applies the drafts and
//! settles materialized theories so their imports reflect the new state.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::compiler::{check_formula, ArityMap, DependencyGraph, Polarity};
use crate::error::{ExecutionError, GuardError, GuardResult, ValidationError};
use crate::literal::Literal;
use crate::rule::{Formula, Rule};
use crate::schema::Schema;
use crate::theory::{record_arities, PolicyKind, Resolver, RuleSet, Theory};
use crate::value::{Tuple, Value};

use super::event::Event;

/// Unique identifier for a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyId(Uuid);

impl PolicyId {
    /// Create a new random policy id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for PolicyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata of a policy.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyInfo {
    pub id: PolicyId,
    pub name: String,
    pub abbreviation: String,
    pub kind: PolicyKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct Policy {
    pub info: PolicyInfo,
    pub theory: Theory,
}

impl Policy {
    pub fn new(name: &str, abbreviation: &str, kind: PolicyKind) -> Self {
        Self {
            info: PolicyInfo {
                id: PolicyId::new(),
                name: name.to_string(),
                abbreviation: abbreviation.to_string(),
                kind,
                created_at: Utc::now(),
            },
            theory: Theory::new(name, kind),
        }
    }
}

/// A validated batch, ready to commit.
#[derive(Debug)]
pub(crate) struct Staged {
    /// Events with qualifiers naming their own target removed.
    pub events: Vec<Event>,
    /// Changes per target, targets in order of first appearance.
    pub targets: Vec<(String, Vec<(Formula, bool)>)>,
    /// Policy reference graph after the batch.
    pub graph: DependencyGraph,
}

/// What other policies see of one policy.
struct Footprint<'a> {
    rules: Vec<&'a Rule>,
    defined: BTreeSet<String>,
}

/// Staged state of one target.
struct Draft<'a> {
    theory: &'a Theory,
    rules: RuleSet,
    fact_tables: BTreeSet<String>,
    arities: ArityMap,
    changes: Vec<(Formula, bool)>,
}

impl<'a> Draft<'a> {
    fn of(theory: &'a Theory, schema: Option<&Schema>) -> Self {
        let mut arities = theory.arity_map();
        if let Some(schema) = schema {
            for table in schema.table_names() {
                if let Some(arity) = schema.arity(table) {
                    // Stored data wins over a conflicting declaration.
                    let _ = arities.check(table, arity);
                }
            }
        }
        let mut rules = RuleSet::new();
        for rule in theory.rules() {
            rules.insert(rule.clone());
        }
        Self {
            theory,
            rules,
            fact_tables: theory.store().table_names().map(str::to_string).collect(),
            arities,
            changes: Vec::new(),
        }
    }

    fn stage(
        &mut self,
        formula: Formula,
        insert: bool,
        schemas: &BTreeMap<String, Schema>,
    ) -> Result<(), ValidationError> {
        if insert {
            if self.theory.kind().is_fact_store() {
                if let Formula::Rule(rule) = &formula {
                    return Err(ValidationError::RuleInFactStore {
                        policy: self.theory.name().to_string(),
                        kind: self.theory.kind().to_string(),
                        rule: rule.to_string(),
                    });
                }
            }
            record_arities(&mut self.arities, &formula)?;
            if let Formula::Rule(rule) = &formula {
                check_declared_arities(rule, schemas)?;
            }
        }

        match &formula {
            Formula::Fact(lit) => {
                if insert {
                    self.fact_tables.insert(lit.table.clone());
                }
            }
            Formula::Rule(rule) => {
                if insert {
                    self.rules.insert(rule.clone());
                    self.theory.check_rules(&self.rules)?;
                } else {
                    self.rules.remove(rule);
                }
            }
        }
        self.changes.push((formula, insert));
        Ok(())
    }

    fn footprint(&self) -> Footprint<'_> {
        let mut defined = self.rules.heads();
        defined.extend(self.fact_tables.iter().cloned());
        Footprint {
            rules: self.rules.iter().collect(),
            defined,
        }
    }
}

/// Qualified literals must agree with the arity their policy's schema declares.
fn check_declared_arities(rule: &Rule, schemas: &BTreeMap<String, Schema>) -> Result<(), ValidationError> {
    for lit in &rule.body {
        let Some(theory) = &lit.theory else { continue };
        if let Some(expected) = schemas.get(theory).and_then(|s| s.arity(&lit.table)) {
            if expected != lit.arity() {
                return Err(ValidationError::ArityMismatch {
                    table: lit.qualified_table(),
                    expected,
                    actual: lit.arity(),
                });
            }
        }
    }
    Ok(())
}

/// Remove qualifiers that name the policy the formula is stored in.
pub(crate) fn strip_own_qualifier(target: &str, formula: Formula) -> Formula {
    match formula {
        Formula::Rule(mut rule) => {
            for lit in &mut rule.body {
                if lit.theory.as_deref() == Some(target) {
                    lit.theory = None;
                }
            }
            Formula::Rule(rule)
        }
        fact @ Formula::Fact(_) => fact,
    }
}

/// Same for a single literal of a query.
pub(crate) fn strip_literal_qualifier(target: &str, lit: &mut Literal) {
    if lit.theory.as_deref() == Some(target) {
        lit.theory = None;
    }
}

/// Every policy of a runtime, by name.
#[derive(Debug, Clone, Default)]
pub(crate) struct PolicySet {
    policies: BTreeMap<String, Policy>,
}

impl PolicySet {
    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }

    pub fn insert(&mut self, policy: Policy) {
        self.policies.insert(policy.info.name.clone(), policy);
    }

    pub fn remove(&mut self, name: &str) -> Option<Policy> {
        self.policies.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.values()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// The first policy other than `requester`, by name, that defines `table`.
    pub fn defining(&self, table: &str, requester: &str) -> Option<&Policy> {
        self.policies
            .values()
            .find(|p| p.info.name != requester && p.theory.defines(table))
    }

    /// Resolver for rules and queries evaluated in `requester`.
    pub fn resolver<'a>(&'a self, requester: &'a str) -> Lookup<'a> {
        Lookup {
            policies: self,
            requester,
            parent: None,
        }
    }

    /// Rows of a table as seen from outside its policy.
    pub fn rows(&self, policy: &str, table: &str) -> Vec<Tuple> {
        self.get(policy)
            .map(|p| p.theory.rows(table, &[], &self.resolver(policy)))
            .unwrap_or_default()
    }

    /// Policy reference graph of the committed state.
    pub fn graph(&self) -> DependencyGraph {
        let footprints: BTreeMap<&str, Footprint<'_>> = self
            .policies
            .iter()
            .map(|(name, p)| {
                let footprint = Footprint {
                    rules: p.theory.rules().iter().collect(),
                    defined: p.theory.defined_tables(),
                };
                (name.as_str(), footprint)
            })
            .collect();
        reference_graph(&footprints)
    }

    /// Policies whose rules reference `name`.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        let graph = self.graph();
        graph
            .nodes()
            .filter(|node| *node != name && graph.dependencies(node).any(|(to, _)| to == name))
            .map(str::to_string)
            .collect()
    }

    /// Validate a batch without changing anything.
    pub fn stage(&self, events: Vec<Event>, schemas: &BTreeMap<String, Schema>) -> GuardResult<Staged> {
        let mut drafts: BTreeMap<String, Draft<'_>> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut last_touch: HashMap<String, usize> = HashMap::new();
        let mut normalized = Vec::with_capacity(events.len());

        for (index, event) in events.into_iter().enumerate() {
            let Some(policy) = self.get(&event.target) else {
                return Err(ExecutionError::PolicyNotFound { name: event.target }.into());
            };
            let formula = strip_own_qualifier(&event.target, event.formula);
            check_formula(&formula).map_err(|e| e.in_batch(index))?;

            if !drafts.contains_key(&event.target) {
                order.push(event.target.clone());
                drafts.insert(
                    event.target.clone(),
                    Draft::of(&policy.theory, schemas.get(&event.target)),
                );
            }
            if let Some(draft) = drafts.get_mut(&event.target) {
                draft
                    .stage(formula.clone(), event.insert, schemas)
                    .map_err(|e| e.in_batch(index))?;
            }
            last_touch.insert(event.target.clone(), index);
            normalized.push(Event {
                target: event.target,
                formula,
                insert: event.insert,
            });
        }

        let footprints: BTreeMap<&str, Footprint<'_>> = self
            .policies
            .iter()
            .map(|(name, p)| {
                let footprint = match drafts.get(name) {
                    Some(draft) => draft.footprint(),
                    None => Footprint {
                        rules: p.theory.rules().iter().collect(),
                        defined: p.theory.defined_tables(),
                    },
                };
                (name.as_str(), footprint)
            })
            .collect();
        let graph = reference_graph(&footprints);
        if let Some(cycle) = graph.find_cycle() {
            let index = cycle
                .iter()
                .filter_map(|name| last_touch.get(name))
                .max()
                .copied()
                .unwrap_or(0);
            return Err(ValidationError::PolicyCycle { cycle }.in_batch(index).into());
        }
        drop(footprints);

        let targets = order
            .into_iter()
            .map(|name| {
                let changes = drafts.remove(&name).map(|d| d.changes).unwrap_or_default();
                (name, changes)
            })
            .collect();
        Ok(Staged {
            events: normalized,
            targets,
            graph,
        })
    }

    /// Apply a staged batch and settle materialized theories.
    ///
    /// Returns the events that changed something, in order of first
    /// appearance in the batch.
    pub fn commit(&mut self, staged: &Staged) -> GuardResult<Vec<Event>> {
        let mut first_seen: HashMap<(&str, &Formula), usize> = HashMap::new();
        for (index, event) in staged.events.iter().enumerate() {
            first_seen.entry((event.target.as_str(), &event.formula)).or_insert(index);
        }

        let mut changed: Vec<(usize, Event)> = Vec::new();
        for (target, changes) in &staged.targets {
            let applied = self.apply_to(target, changes)?;
            for (formula, insert) in applied {
                let index = first_seen
                    .get(&(target.as_str(), &formula))
                    .copied()
                    .unwrap_or(usize::MAX);
                changed.push((index, Event::new(target.clone(), formula, insert)));
            }
        }
        changed.sort_by_key(|(index, _)| *index);

        self.settle(&staged.graph)?;
        Ok(changed.into_iter().map(|(_, event)| event).collect())
    }

    /// Refresh the imports of every materialized theory, dependencies first.
    pub fn settle(&mut self, graph: &DependencyGraph) -> GuardResult<()> {
        for name in graph.topological_order() {
            let materialized = self
                .get(&name)
                .is_some_and(|p| p.theory.kind() == PolicyKind::Materialized);
            if materialized {
                self.apply_to(&name, &[])?;
            }
        }
        Ok(())
    }

    fn apply_to(&mut self, target: &str, changes: &[(Formula, bool)]) -> GuardResult<Vec<(Formula, bool)>> {
        let Some(mut policy) = self.policies.remove(target) else {
            return Err(GuardError::internal(format!("policy '{target}' vanished during commit")));
        };
        let result = policy.theory.apply(changes, &self.resolver(target));
        self.policies.insert(target.to_string(), policy);
        result
            .map(|applied| applied.changes)
            .map_err(|e| GuardError::internal(format!("validated batch failed to apply to '{target}': {e}")))
    }
}

/// Edges `p -> q` whenever a rule of `p` reads a table of `q`.
fn reference_graph(footprints: &BTreeMap<&str, Footprint<'_>>) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for (name, footprint) in footprints {
        graph.add_node(name);
        for lit in footprint.rules.iter().flat_map(|r| r.body.iter()) {
            match &lit.theory {
                Some(theory) if theory != name => graph.add_edge(name, theory, Polarity::Positive),
                Some(_) => {}
                None if footprint.defined.contains(&lit.table) => {}
                None => {
                    let owner = footprints
                        .iter()
                        .find(|(other, f)| *other != name && f.defined.contains(&lit.table));
                    if let Some((owner, _)) = owner {
                        graph.add_edge(name, owner, Polarity::Positive);
                    }
                }
            }
        }
    }
    graph
}

/// Resolves cross-policy reads for one requesting policy.
pub(crate) struct Lookup<'a> {
    policies: &'a PolicySet,
    requester: &'a str,
    parent: Option<&'a Lookup<'a>>,
}

impl Lookup<'_> {
    fn visits(&self, name: &str) -> bool {
        self.requester == name || self.parent.is_some_and(|p| p.visits(name))
    }
}

impl Resolver for Lookup<'_> {
    fn rows(&self, theory: Option<&str>, table: &str, pattern: &[Option<&Value>]) -> Vec<Tuple> {
        let target = match theory {
            Some(name) => self.policies.get(name),
            None => self.policies.defining(table, self.requester),
        };
        let Some(policy) = target else {
            return Vec::new();
        };
        let name = policy.info.name.as_str();
        if self.visits(name) {
            return Vec::new();
        }
        let nested = Lookup {
            policies: self.policies,
            requester: name,
            parent: Some(self),
        };
        policy.theory.rows(table, pattern, &nested)
    }
}
