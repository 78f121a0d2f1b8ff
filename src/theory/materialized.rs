//! Materialized theories: cached extensions maintained incrementally.
//!
//! Every local table's extension lives in `model`. Tables the rules read from
//! other policies are held as imports, the last seen contents of the resolved
//! external table, keyed by `policy:table` (qualified) or `table`.
//!
//! Changes are applied stratum by stratum with delete-and-rederive:
//!
//! 1. Overdelete every cached row one of whose derivations may have lost
//!    support, evaluating against the state before the change.
//! 2. Remove those rows.
//! 3. Rederive the removed rows that still have a derivation.
//! 4. Insert new consequences semi-naively, one batch of fresh rows at a time.
//!
//! Lower strata are final by the time a stratum runs, so negated literals only
//! ever read settled tables. When a table switches between local and imported
//! the extension is recomputed from scratch and diffed instead.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use crate::compiler::{ArityMap, Strata};
use crate::error::ValidationError;
use crate::index::FactStore;
use crate::literal::Literal;
use crate::rule::{Formula, Query, Rule};
use crate::value::{Tuple, Value};

use super::eval::{self, Resolver, RowSource, Seed};
use super::{net_changes, record_arities, Applied, DeltaSet, RuleSet, TableDelta};

/// A theory whose local tables are kept fully evaluated.
#[derive(Debug, Clone)]
pub struct MaterializedTheory {
    name: String,
    base: FactStore,
    model: FactStore,
    imports: FactStore,
    import_refs: BTreeMap<String, (Option<String>, String)>,
    local: BTreeSet<String>,
    rules: RuleSet,
    strata: Strata,
}

impl MaterializedTheory {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: FactStore::new(),
            model: FactStore::new(),
            imports: FactStore::new(),
            import_refs: BTreeMap::new(),
            local: BTreeSet::new(),
            rules: RuleSet::new(),
            strata: Strata::default(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base facts.
    #[must_use]
    pub const fn base(&self) -> &FactStore {
        &self.base
    }

    /// Cached extension of every local table.
    #[must_use]
    pub const fn model(&self) -> &FactStore {
        &self.model
    }

    /// Cached contents of external tables, keyed by `policy:table` or `table`.
    #[must_use]
    pub const fn imports(&self) -> &FactStore {
        &self.imports
    }

    #[must_use]
    pub const fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Rule heads plus every table that has held a base fact.
    #[must_use]
    pub const fn local_tables(&self) -> &BTreeSet<String> {
        &self.local
    }

    #[must_use]
    pub fn defines(&self, table: &str) -> bool {
        self.local.contains(table)
    }

    /// Reject rule sets with recursion through negation.
    pub fn check_rules(&self, rules: &RuleSet) -> Result<(), ValidationError> {
        self.stratify(rules).map(|_| ())
    }

    fn stratify(&self, rules: &RuleSet) -> Result<Strata, ValidationError> {
        rules
            .graph()
            .stratify()
            .map_err(|cycle| ValidationError::Unstratifiable {
                policy: self.name.clone(),
                cycle,
            })
    }

    /// Cached rows of a local table.
    #[must_use]
    pub fn rows(&self, table: &str, pattern: &[Option<&Value>]) -> Vec<Tuple> {
        self.model.matching(table, pattern)
    }

    /// Answer a query against the cache, reading other policies through
    /// `resolver`.
    pub fn select(&self, query: &Query, resolver: &dyn Resolver) -> Vec<String> {
        let scope = self.scope();
        let view = View {
            resolver: Some(resolver),
            ..scope.over(&self.model, None)
        };
        eval::answer(&view, query)
    }

    /// Evaluate the current rules over the current base facts and imports
    /// without using the cache.
    pub fn recompute(&self) -> Result<FactStore, ValidationError> {
        evaluate(&self.scope(), &self.base, &self.rules, &self.strata)
    }

    /// Apply changes and refresh imports through `resolver`.
    ///
    /// An empty change list only refreshes imports.
    pub fn apply(
        &mut self,
        changes: &[(Formula, bool)],
        resolver: &dyn Resolver,
    ) -> Result<Applied, ValidationError> {
        let changes = net_changes(changes, |f| match f {
            Formula::Fact(lit) => lit.tuple().is_some_and(|row| self.base.contains(&lit.table, &row)),
            Formula::Rule(rule) => self.rules.contains(rule),
        });

        // Stage everything before touching state.
        let mut arities = ArityMap::new();
        for table in self.base.table_names() {
            if let Some(arity) = self.base.arity(table) {
                arities.check(table, arity)?;
            }
        }
        for rule in self.rules.iter() {
            record_arities(&mut arities, &Formula::Rule(rule.clone()))?;
        }

        let mut rules = self.rules.clone();
        let mut inserted = Vec::new();
        let mut deleted = Vec::new();
        let mut base_changes: BTreeMap<String, TableDelta> = BTreeMap::new();
        for (formula, insert) in &changes {
            record_arities(&mut arities, formula)?;
            match formula {
                Formula::Fact(lit) => {
                    let row = lit.tuple().ok_or_else(|| ValidationError::NonGroundFact {
                        literal: lit.to_string(),
                    })?;
                    let entry = base_changes.entry(lit.table.clone()).or_default();
                    if *insert {
                        entry.added.insert(row);
                    } else {
                        entry.removed.insert(row);
                    }
                }
                Formula::Rule(rule) => {
                    if *insert {
                        rules.insert(rule.clone());
                        inserted.push(rule.clone());
                    } else {
                        rules.remove(rule);
                        deleted.push(rule.clone());
                    }
                }
            }
        }
        let strata = self.stratify(&rules)?;

        let mut local = rules.heads();
        local.extend(self.base.table_names().map(str::to_string));
        local.extend(
            base_changes
                .iter()
                .filter(|(_, change)| !change.added.is_empty())
                .map(|(table, _)| table.clone()),
        );

        let import_refs = collect_imports(&self.name, &local, &rules);
        let mut imports = FactStore::new();
        for (key, (theory, table)) in &import_refs {
            for row in resolver.rows(theory.as_deref(), table, &[]) {
                imports.insert(key, row)?;
            }
        }

        let mut delta = diff_stores(&self.imports, &imports, self.import_refs.keys().chain(import_refs.keys()));
        if changes.is_empty() && delta.is_empty() {
            return Ok(Applied::default());
        }

        let read: BTreeSet<&str> = self
            .rules
            .iter()
            .chain(rules.iter())
            .flat_map(|r| r.body.iter())
            .filter(|l| l.theory.is_none())
            .map(|l| l.table.as_str())
            .collect();
        let rebuild = self
            .local
            .symmetric_difference(&local)
            .any(|table| read.contains(table.as_str()));

        // Commit.
        for (table, change) in &base_changes {
            for row in &change.removed {
                self.base.remove(table, row);
            }
            for row in &change.added {
                self.base.insert(table, row.clone())?;
            }
        }
        let previous_local = std::mem::replace(&mut self.local, local);
        self.rules = rules;
        self.strata = strata;
        self.imports = imports;
        self.import_refs = import_refs;

        let tables: BTreeSet<String> = previous_local.union(&self.local).cloned().collect();
        if rebuild {
            let model = self.recompute()?;
            let rebuilt = diff_stores(&self.model, &model, tables.iter());
            self.model = model;
            debug!(policy = %self.name, tables = rebuilt.len(), "materialized theory rebuilt");
            delta = rebuilt;
        } else {
            let scope = Scope {
                name: &self.name,
                local: &self.local,
                imports: &self.imports,
            };
            let mut maintenance = Maintenance {
                scope,
                base: &self.base,
                rules: &self.rules,
                inserted: &inserted,
                deleted: &deleted,
                base_changes: &base_changes,
                stats: Stats::default(),
            };
            let mut by_stratum: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
            for table in &tables {
                by_stratum
                    .entry(self.strata.stratum_of(table))
                    .or_default()
                    .insert(table.clone());
            }
            for stratum in by_stratum.values() {
                maintenance.stratum(stratum, &mut self.model, &mut delta)?;
            }
            let stats = maintenance.stats;
            debug!(
                policy = %self.name,
                overdeleted = stats.overdeleted,
                rederived = stats.rederived,
                inserted = stats.inserted,
                "materialized maintenance"
            );
        }

        for table in previous_local.difference(&self.local) {
            self.model.drop_table(table);
        }
        delta.retain(|key, change| tables.contains(key) && !change.is_empty());

        Ok(Applied { changes, delta })
    }

    fn scope(&self) -> Scope<'_> {
        Scope {
            name: &self.name,
            local: &self.local,
            imports: &self.imports,
        }
    }
}

/// Import keys of every non-local body literal.
fn collect_imports(
    name: &str,
    local: &BTreeSet<String>,
    rules: &RuleSet,
) -> BTreeMap<String, (Option<String>, String)> {
    rules
        .iter()
        .flat_map(|r| r.body.iter())
        .filter_map(|lit| {
            let (is_local, key) = classify(name, local, lit);
            (!is_local).then(|| (key.into_owned(), (lit.theory.clone(), lit.table.clone())))
        })
        .collect()
}

/// Whether a literal reads a local table, and the key it is stored under.
fn classify<'k>(name: &str, local: &BTreeSet<String>, lit: &'k Literal) -> (bool, Cow<'k, str>) {
    match lit.theory.as_deref() {
        Some(theory) if theory == name => (true, Cow::Borrowed(lit.table.as_str())),
        Some(_) => (false, Cow::Owned(lit.qualified_table())),
        None => (local.contains(&lit.table), Cow::Borrowed(lit.table.as_str())),
    }
}

/// Per-table differences between two stores over `tables`.
fn diff_stores<'a>(
    before: &FactStore,
    after: &FactStore,
    tables: impl Iterator<Item = &'a String>,
) -> DeltaSet {
    let mut delta = DeltaSet::new();
    for table in tables {
        if delta.contains_key(table) {
            continue;
        }
        let old: HashSet<Tuple> = before.rows(table).into_iter().collect();
        let new: HashSet<Tuple> = after.rows(table).into_iter().collect();
        let change = TableDelta {
            added: new.difference(&old).cloned().collect(),
            removed: old.difference(&new).cloned().collect(),
        };
        if !change.is_empty() {
            delta.insert(table.clone(), change);
        }
    }
    delta
}

// ============================================================================
// Views
// ============================================================================

#[derive(Clone, Copy)]
struct Scope<'a> {
    name: &'a str,
    local: &'a BTreeSet<String>,
    imports: &'a FactStore,
}

impl<'a> Scope<'a> {
    fn over<'v>(&self, model: &'v FactStore, undo: Option<&'v DeltaSet>) -> View<'v>
    where
        'a: 'v,
    {
        View {
            name: self.name,
            local: self.local,
            model,
            imports: self.imports,
            undo,
            resolver: None,
        }
    }
}

/// Rows as the rules see them. With `undo` set, recorded changes are rolled
/// back so the view shows the state before the current batch.
struct View<'a> {
    name: &'a str,
    local: &'a BTreeSet<String>,
    model: &'a FactStore,
    imports: &'a FactStore,
    undo: Option<&'a DeltaSet>,
    resolver: Option<&'a dyn Resolver>,
}

impl RowSource for View<'_> {
    fn rows(&self, lit: &Literal, pattern: &[Option<&Value>]) -> Vec<Tuple> {
        let (is_local, key) = classify(self.name, self.local, lit);
        if !is_local {
            if let Some(resolver) = self.resolver {
                return resolver.rows(lit.theory.as_deref(), &lit.table, pattern);
            }
        }
        let store = if is_local { self.model } else { self.imports };
        let mut rows = store.matching(&key, pattern);
        if let Some(change) = self.undo.and_then(|undo| undo.get(&*key)) {
            rows.retain(|row| !change.added.contains(row));
            rows.extend(
                change
                    .removed
                    .iter()
                    .filter(|row| eval::agrees(row, pattern))
                    .cloned(),
            );
        }
        rows
    }

    fn is_local(&self, lit: &Literal) -> bool {
        classify(self.name, self.local, lit).0
    }
}

// ============================================================================
// Evaluation
// ============================================================================

type Rows = BTreeMap<String, Vec<Tuple>>;

fn group(found: Vec<(String, Tuple)>) -> Rows {
    let mut rows = Rows::new();
    for (table, row) in found {
        rows.entry(table).or_default().push(row);
    }
    rows
}

/// Insert every row not yet cached, returning the ones that were new.
fn insert_new(model: &mut FactStore, found: Vec<(String, Tuple)>) -> Result<Rows, ValidationError> {
    let mut fresh = Rows::new();
    for (table, row) in found {
        if model.insert(&table, row.clone())? {
            fresh.entry(table).or_default().push(row);
        }
    }
    Ok(fresh)
}

/// Positions of positive body literals reading local `table`.
fn positive_reads(scope: &Scope<'_>, rule: &Rule, table: &str) -> Vec<usize> {
    rule.body
        .iter()
        .enumerate()
        .filter(|(_, lit)| {
            if lit.negated {
                return false;
            }
            let (is_local, key) = classify(scope.name, scope.local, lit);
            is_local && key == table
        })
        .map(|(i, _)| i)
        .collect()
}

/// Semi-naive closure of one stratum: every batch of fresh rows is joined
/// against the full cache until nothing new appears.
fn propagate(
    scope: &Scope<'_>,
    rules: &[&Rule],
    model: &mut FactStore,
    mut frontier: Vec<(String, Vec<Tuple>)>,
    fresh: &mut Rows,
) -> Result<usize, ValidationError> {
    let mut inserted = 0;
    while let Some((table, rows)) = frontier.pop() {
        let mut found = Vec::new();
        {
            let view = scope.over(model, None);
            for rule in rules {
                for index in positive_reads(scope, rule, &table) {
                    eval::derive(
                        &view,
                        &rule.head,
                        &rule.body,
                        rule.variable_count(),
                        Some(Seed { index, rows: &rows }),
                        &mut |row| found.push((rule.head.table.clone(), row)),
                    );
                }
            }
        }
        for (table, rows) in insert_new(model, found)? {
            inserted += rows.len();
            fresh.entry(table.clone()).or_default().extend(rows.iter().cloned());
            frontier.push((table, rows));
        }
    }
    Ok(inserted)
}

/// Stratified least fixpoint over `base` and the scope's imports.
fn evaluate(
    scope: &Scope<'_>,
    base: &FactStore,
    rules: &RuleSet,
    strata: &Strata,
) -> Result<FactStore, ValidationError> {
    let mut model = FactStore::new();
    for (table, row) in base.iter() {
        model.insert(table, row.clone())?;
    }

    let mut by_stratum: BTreeMap<usize, Vec<&Rule>> = BTreeMap::new();
    for rule in rules.iter() {
        by_stratum
            .entry(strata.stratum_of(&rule.head.table))
            .or_default()
            .push(rule);
    }

    for rules in by_stratum.values() {
        let mut found = Vec::new();
        {
            let view = scope.over(&model, None);
            for rule in rules {
                eval::derive(&view, &rule.head, &rule.body, rule.variable_count(), None, &mut |row| {
                    found.push((rule.head.table.clone(), row));
                });
            }
        }
        let fresh = insert_new(&mut model, found)?;
        let mut seen = Rows::new();
        propagate(scope, rules, &mut model, fresh.into_iter().collect(), &mut seen)?;
    }
    Ok(model)
}

/// True if `rule` derives exactly `row` in `view`.
fn derivable(view: &View<'_>, rule: &Rule, row: &Tuple) -> bool {
    let pattern: Vec<Option<&Value>> = row.iter().map(Some).collect();
    let mut bindings = vec![None; rule.variable_count()];
    if !eval::bind_head(&rule.head, &pattern, &mut bindings) {
        return false;
    }
    let mut found = false;
    eval::solve(view, &rule.body, &mut bindings, None, &mut |_| found = true);
    found
}

#[derive(Debug, Clone, Copy, Default)]
struct Stats {
    overdeleted: usize,
    rederived: usize,
    inserted: usize,
}

/// One delete-and-rederive pass over already committed base, rules and
/// imports.
struct Maintenance<'a> {
    scope: Scope<'a>,
    base: &'a FactStore,
    rules: &'a RuleSet,
    inserted: &'a [Rule],
    deleted: &'a [Rule],
    base_changes: &'a BTreeMap<String, TableDelta>,
    stats: Stats,
}

impl Maintenance<'_> {
    /// Derivations of `rule` that use a changed row of a table outside this
    /// stratum. With `gained` false these are derivations that held before
    /// the change and may not now; with `gained` true, ones that hold now and
    /// may not have before.
    fn seeded(&self, view: &View<'_>, rule: &Rule, delta: &DeltaSet, gained: bool, out: &mut Vec<(String, Tuple)>) {
        for (index, lit) in rule.body.iter().enumerate() {
            let (_, key) = classify(self.scope.name, self.scope.local, lit);
            let Some(change) = delta.get(&*key) else { continue };
            let rows = if gained != lit.negated {
                &change.added
            } else {
                &change.removed
            };
            if rows.is_empty() {
                continue;
            }
            let rows: Vec<Tuple> = rows.iter().cloned().collect();
            eval::derive(
                view,
                &rule.head,
                &rule.body,
                rule.variable_count(),
                Some(Seed { index, rows: &rows }),
                &mut |row| out.push((rule.head.table.clone(), row)),
            );
        }
    }

    fn stratum(
        &mut self,
        tables: &BTreeSet<String>,
        model: &mut FactStore,
        delta: &mut DeltaSet,
    ) -> Result<(), ValidationError> {
        let scope = self.scope;
        let current: Vec<&Rule> = self
            .rules
            .iter()
            .filter(|r| tables.contains(&r.head.table))
            .collect();
        let kept: Vec<&Rule> = current
            .iter()
            .copied()
            .filter(|r| !self.inserted.contains(r))
            .collect();

        // Overdelete against the old state.
        let mut doomed: BTreeMap<String, HashSet<Tuple>> = BTreeMap::new();
        let mut found = Vec::new();
        {
            let view = scope.over(model, Some(&*delta));
            for table in tables {
                if let Some(change) = self.base_changes.get(table) {
                    found.extend(change.removed.iter().map(|row| (table.clone(), row.clone())));
                }
            }
            for rule in self.deleted.iter().filter(|r| tables.contains(&r.head.table)) {
                eval::derive(&view, &rule.head, &rule.body, rule.variable_count(), None, &mut |row| {
                    found.push((rule.head.table.clone(), row));
                });
            }
            for rule in &kept {
                self.seeded(&view, rule, delta, false, &mut found);
            }
        }
        let mut frontier = mark(model, &mut doomed, found);
        while let Some((table, rows)) = frontier.pop() {
            let mut found = Vec::new();
            {
                let view = scope.over(model, Some(&*delta));
                for rule in &kept {
                    for index in positive_reads(&scope, rule, &table) {
                        eval::derive(
                            &view,
                            &rule.head,
                            &rule.body,
                            rule.variable_count(),
                            Some(Seed { index, rows: &rows }),
                            &mut |row| found.push((rule.head.table.clone(), row)),
                        );
                    }
                }
            }
            frontier.extend(mark(model, &mut doomed, found));
        }

        for (table, rows) in &doomed {
            self.stats.overdeleted += rows.len();
            for row in rows {
                model.remove(table, row);
            }
        }

        // Rederive what still has support.
        let mut fresh = Rows::new();
        for (table, rows) in &doomed {
            for row in rows {
                let keep = self.base.contains(table, row) || {
                    let view = scope.over(model, None);
                    current
                        .iter()
                        .filter(|r| r.head.table == *table)
                        .any(|r| derivable(&view, r, row))
                };
                if keep {
                    model.insert(table, row.clone())?;
                    fresh.entry(table.clone()).or_default().push(row.clone());
                    self.stats.rederived += 1;
                }
            }
        }

        // Insert against the new state.
        let mut found = Vec::new();
        {
            let view = scope.over(model, None);
            for table in tables {
                if let Some(change) = self.base_changes.get(table) {
                    found.extend(change.added.iter().map(|row| (table.clone(), row.clone())));
                }
            }
            for rule in self.inserted.iter().filter(|r| tables.contains(&r.head.table)) {
                eval::derive(&view, &rule.head, &rule.body, rule.variable_count(), None, &mut |row| {
                    found.push((rule.head.table.clone(), row));
                });
            }
            for rule in &kept {
                self.seeded(&view, rule, delta, true, &mut found);
            }
        }
        for (table, rows) in insert_new(model, found)? {
            self.stats.inserted += rows.len();
            fresh.entry(table).or_default().extend(rows);
        }
        let frontier: Vec<(String, Vec<Tuple>)> = fresh.iter().map(|(t, r)| (t.clone(), r.clone())).collect();
        self.stats.inserted += propagate(&scope, &current, model, frontier, &mut fresh)?;

        for table in tables {
            let gone = doomed.remove(table).unwrap_or_default();
            let mut change = TableDelta::default();
            for row in fresh.remove(table).unwrap_or_default() {
                if !gone.contains(&row) {
                    change.added.insert(row);
                }
            }
            for row in gone {
                if !model.contains(table, &row) {
                    change.removed.insert(row);
                }
            }
            if !change.is_empty() {
                delta.insert(table.clone(), change);
            }
        }
        Ok(())
    }
}

/// Record cached rows as overdeleted, returning the newly marked ones.
fn mark(
    model: &FactStore,
    doomed: &mut BTreeMap<String, HashSet<Tuple>>,
    found: Vec<(String, Tuple)>,
) -> Vec<(String, Vec<Tuple>)> {
    let marked: Vec<(String, Tuple)> = found
        .into_iter()
        .filter(|(table, row)| {
            model.contains(table, row) && doomed.entry(table.clone()).or_default().insert(row.clone())
        })
        .collect();
    group(marked).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::compiler::{parse, parse_formula, parse_query};
    use crate::theory::NoExternal;
    use crate::value::tuple;

    fn load(t: &mut MaterializedTheory, text: &str, insert: bool) -> Applied {
        let changes: Vec<(Formula, bool)> = parse(text).unwrap().into_iter().map(|f| (f, insert)).collect();
        t.apply(&changes, &NoExternal).unwrap()
    }

    fn theory(text: &str) -> MaterializedTheory {
        let mut t = MaterializedTheory::new("mat");
        load(&mut t, text, true);
        t
    }

    fn select(t: &MaterializedTheory, query: &str) -> Vec<String> {
        t.select(&parse_query(query).unwrap(), &NoExternal)
    }

    fn snapshot(store: &FactStore) -> Vec<String> {
        let mut rows: Vec<String> = store
            .iter()
            .map(|(table, row)| Literal::from_table_tuple(table, row.iter().cloned()).to_string())
            .collect();
        rows.sort();
        rows
    }

    fn assert_consistent(t: &MaterializedTheory) {
        assert_eq!(snapshot(t.model()), snapshot(&t.recompute().unwrap()));
    }

    const PATH: &str = "
        path(x, y) :- edge(x, y)
        path(x, z) :- edge(x, y), path(y, z)
    ";

    #[test]
    fn test_transitive_closure() {
        let mut t = theory(PATH);
        load(&mut t, "edge(1, 2) edge(2, 3) edge(3, 4)", true);
        assert_eq!(select(&t, "path(1, x)").len(), 3);
        assert_consistent(&t);
    }

    #[test]
    fn test_delete_in_cycle_rederives_nothing_stale() {
        let mut t = theory(PATH);
        load(&mut t, "edge(1, 2) edge(2, 1) edge(2, 3)", true);
        assert_eq!(select(&t, "path(1, 1)"), vec!["path(1, 1)"]);
        let applied = load(&mut t, "edge(2, 1)", false);
        assert!(select(&t, "path(1, 1)").is_empty());
        assert!(select(&t, "path(2, 2)").is_empty());
        assert_eq!(select(&t, "path(1, 3)"), vec!["path(1, 3)"]);
        let removed = &applied.delta["path"].removed;
        assert!(removed.contains(&tuple([1, 1])));
        assert!(removed.contains(&tuple([2, 1])));
        assert_consistent(&t);
    }

    #[test]
    fn test_alternative_support_survives() {
        let mut t = theory(PATH);
        load(&mut t, "edge(1, 2) edge(2, 3) edge(1, 3)", true);
        let applied = load(&mut t, "edge(1, 3)", false);
        assert_eq!(select(&t, "path(1, 3)"), vec!["path(1, 3)"]);
        assert!(!applied.delta.contains_key("path"));
        assert_consistent(&t);
    }

    #[test]
    fn test_stratified_negation() {
        let mut t = theory(
            "node(1) node(2) node(3) edge(1, 2)
             reach(x, y) :- edge(x, y)
             reach(x, z) :- edge(x, y), reach(y, z)
             isolated(x) :- node(x), not reach(x, _), not reach(_, x)",
        );
        assert_eq!(select(&t, "isolated(x)"), vec!["isolated(3)"]);

        let applied = load(&mut t, "edge(2, 3)", true);
        assert!(select(&t, "isolated(x)").is_empty());
        assert!(applied.delta["isolated"].removed.contains(&tuple([3])));

        load(&mut t, "edge(1, 2) edge(2, 3)", false);
        assert_eq!(select(&t, "isolated(x)").len(), 3);
        assert_consistent(&t);
    }

    #[test]
    fn test_negation_cycle_rejected() {
        let mut t = theory("p(x) :- q(x), not r(x)");
        let rule = parse_formula("r(x) :- q(x), not p(x)").unwrap();
        let err = t.apply(&[(rule, true)], &NoExternal).unwrap_err();
        assert!(matches!(err, ValidationError::Unstratifiable { .. }));
        assert_eq!(t.rules().len(), 1);
    }

    #[test]
    fn test_rule_insert_and_delete() {
        let mut t = theory("q(1) q(2) r(2)");
        let rule = parse_formula("p(x) :- q(x), not r(x)").unwrap();
        let applied = t.apply(&[(rule.clone(), true)], &NoExternal).unwrap();
        assert_eq!(select(&t, "p(x)"), vec!["p(1)"]);
        assert_eq!(applied.delta["p"].added.len(), 1);

        let applied = t.apply(&[(rule, false)], &NoExternal).unwrap();
        assert!(select(&t, "p(x)").is_empty());
        assert_eq!(applied.delta["p"].removed.len(), 1);
        assert!(!t.defines("p"));
        assert_consistent(&t);
    }

    #[test]
    fn test_base_fact_in_derived_table() {
        let mut t = theory("q(1) p(x) :- q(x)");
        load(&mut t, "p(1)", true);
        let applied = load(&mut t, "q(1)", false);
        assert_eq!(select(&t, "p(x)"), vec!["p(1)"]);
        assert!(!applied.delta.contains_key("p"));
        let applied = load(&mut t, "p(1)", false);
        assert!(applied.delta["p"].removed.contains(&tuple([1])));
        assert_consistent(&t);
    }

    struct Fixed(FactStore);

    impl Resolver for Fixed {
        fn rows(&self, theory: Option<&str>, table: &str, pattern: &[Option<&Value>]) -> Vec<Tuple> {
            match theory {
                Some("nova") | None => self.0.matching(table, pattern),
                Some(_) => Vec::new(),
            }
        }
    }

    #[test]
    fn test_imports_refresh_incrementally() {
        let mut t = MaterializedTheory::new("mat");
        let mut external = FactStore::new();
        external.insert("server", tuple(["a"])).unwrap();
        let rule = parse_formula("watched(x) :- nova:server(x)").unwrap();
        t.apply(&[(rule, true)], &Fixed(external.clone())).unwrap();
        assert_eq!(select(&t, "watched(x)"), vec!["watched(\"a\")"]);
        assert_eq!(t.imports().len_of("nova:server"), 1);

        external.insert("server", tuple(["b"])).unwrap();
        external.remove("server", &tuple(["a"]));
        let applied = t.apply(&[], &Fixed(external)).unwrap();
        assert!(applied.changes.is_empty());
        assert_eq!(select(&t, "watched(x)"), vec!["watched(\"b\")"]);
        assert_eq!(applied.delta["watched"].len(), 2);
        assert!(!applied.delta.contains_key("nova:server"));
    }

    #[test]
    fn test_table_becoming_local_rebuilds() {
        let mut t = MaterializedTheory::new("mat");
        let mut external = FactStore::new();
        external.insert("q", tuple([1])).unwrap();
        let resolver = Fixed(external);
        let rule = parse_formula("p(x) :- q(x)").unwrap();
        t.apply(&[(rule, true)], &resolver).unwrap();
        assert_eq!(select(&t, "p(x)"), vec!["p(1)"]);

        let fact = parse_formula("q(2)").unwrap();
        let applied = t.apply(&[(fact, true)], &resolver).unwrap();
        assert_eq!(select(&t, "p(x)"), vec!["p(2)"]);
        assert!(t.imports().is_empty());
        assert_eq!(applied.delta["p"].len(), 2);
        assert_consistent(&t);
    }

    #[test]
    fn test_noop_batch_reports_nothing() {
        let mut t = theory("q(1) p(x) :- q(x)");
        let applied = load(&mut t, "q(1)", true);
        assert!(applied.changes.is_empty());
        assert!(applied.delta.is_empty());
    }
}
