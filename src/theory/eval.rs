//! Conjunctive join evaluation.
//!
//! Bindings are a flat vector indexed by canonical variable index. Each step
//! picks the next body literal greedily: a seeded literal first, then any
//! negation whose variables are all bound, then the positive literal with the
//! most bound arguments, preferring tables local to the evaluating policy.
//! Every positive literal is fetched through an index probe on its bound
//! columns, so chains of equi-joins cost a probe per partial answer instead of
//! a scan.

use std::collections::BTreeSet;

use crate::literal::{Literal, Term};
use crate::rule::Query;
use crate::value::{Tuple, Value};

/// Variable assignment for one rule or query.
pub type Bindings = Vec<Option<Value>>;

/// Supplies rows for body literals.
pub trait RowSource {
    /// Rows of the literal's table agreeing with `pattern`.
    ///
    /// The literal's polarity is ignored; an empty pattern means every row.
    fn rows(&self, lit: &Literal, pattern: &[Option<&Value>]) -> Vec<Tuple>;

    /// True if the literal reads a table held by the evaluating policy.
    fn is_local(&self, _lit: &Literal) -> bool {
        false
    }
}

/// Resolves tables owned by other policies.
pub trait Resolver {
    /// Rows of `table` in the policy `theory` names, or in the first other
    /// policy defining `table` when unqualified.
    fn rows(&self, theory: Option<&str>, table: &str, pattern: &[Option<&Value>]) -> Vec<Tuple>;
}

/// A resolver that knows no other policies.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExternal;

impl Resolver for NoExternal {
    fn rows(&self, _theory: Option<&str>, _table: &str, _pattern: &[Option<&Value>]) -> Vec<Tuple> {
        Vec::new()
    }
}

/// Restricts body literal `index` to the given rows.
///
/// A seeded negated literal binds its variables from the seed rows and must
/// still hold against the source.
#[derive(Debug, Clone, Copy)]
pub struct Seed<'a> {
    pub index: usize,
    pub rows: &'a [Tuple],
}

/// Enumerate every assignment satisfying `body`, starting from `bindings`.
pub fn solve(
    source: &dyn RowSource,
    body: &[Literal],
    bindings: &mut Bindings,
    seed: Option<Seed<'_>>,
    emit: &mut dyn FnMut(&Bindings),
) {
    let mut used = vec![false; body.len()];
    step(source, body, &mut used, bindings, seed, emit);
}

fn step(
    source: &dyn RowSource,
    body: &[Literal],
    used: &mut [bool],
    bindings: &mut Bindings,
    seed: Option<Seed<'_>>,
    emit: &mut dyn FnMut(&Bindings),
) {
    let Some(next) = choose(source, body, used, bindings, seed) else {
        emit(bindings);
        return;
    };
    let lit = &body[next];
    used[next] = true;

    let seeded = seed.filter(|s| s.index == next);

    if lit.negated && seeded.is_none() {
        if holds_negation(source, lit, bindings) {
            step(source, body, used, bindings, seed, emit);
        }
        used[next] = false;
        return;
    }

    let rows = {
        let pattern = pattern_of(lit, bindings);
        match seeded {
            Some(s) => s
                .rows
                .iter()
                .filter(|row| agrees(row, &pattern))
                .cloned()
                .collect(),
            None => source.rows(lit, &pattern),
        }
    };

    let mut trail = Vec::new();
    for row in &rows {
        if unify(lit, row, bindings, &mut trail)
            && (!lit.negated || holds_negation(source, lit, bindings))
        {
            step(source, body, used, bindings, seed, emit);
        }
        for index in trail.drain(..) {
            bindings[index] = None;
        }
    }
    used[next] = false;
}

fn choose(
    source: &dyn RowSource,
    body: &[Literal],
    used: &[bool],
    bindings: &Bindings,
    seed: Option<Seed<'_>>,
) -> Option<usize> {
    if let Some(s) = seed {
        if s.index < body.len() && !used[s.index] {
            return Some(s.index);
        }
    }

    let mut best: Option<(usize, (usize, bool))> = None;
    let mut blocked_negation = None;
    for (i, lit) in body.iter().enumerate() {
        if used[i] {
            continue;
        }
        if lit.negated {
            if negation_ready(lit, bindings) {
                return Some(i);
            }
            blocked_negation.get_or_insert(i);
            continue;
        }
        let score = (bound_count(lit, bindings), source.is_local(lit));
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i).or(blocked_negation)
}

fn negation_ready(lit: &Literal, bindings: &Bindings) -> bool {
    lit.variables()
        .filter(|v| !v.is_anonymous())
        .all(|v| bindings.get(v.index).is_some_and(Option::is_some))
}

fn bound_count(lit: &Literal, bindings: &Bindings) -> usize {
    lit.args
        .iter()
        .filter(|t| match t {
            Term::Const(_) => true,
            Term::Var(v) => bindings.get(v.index).is_some_and(Option::is_some),
        })
        .count()
}

/// Anonymous variables stay existential even when a seed row bound them.
fn holds_negation(source: &dyn RowSource, lit: &Literal, bindings: &Bindings) -> bool {
    let mut pattern = pattern_of(lit, bindings);
    for (slot, term) in pattern.iter_mut().zip(&lit.args) {
        if matches!(term, Term::Var(v) if v.is_anonymous()) {
            *slot = None;
        }
    }
    source.rows(lit, &pattern).is_empty()
}

/// Bound value (or `None`) for each argument of `lit`.
#[must_use]
pub fn pattern_of<'a>(lit: &'a Literal, bindings: &'a Bindings) -> Vec<Option<&'a Value>> {
    lit.args
        .iter()
        .map(|t| match t {
            Term::Const(v) => Some(v),
            Term::Var(v) => bindings.get(v.index).and_then(Option::as_ref),
        })
        .collect()
}

/// True if `row` agrees with every bound position of `pattern`.
#[must_use]
pub fn agrees(row: &[Value], pattern: &[Option<&Value>]) -> bool {
    if pattern.is_empty() {
        return true;
    }
    row.len() == pattern.len()
        && row
            .iter()
            .zip(pattern)
            .all(|(v, p)| p.map_or(true, |p| v == p))
}

/// Bind the variables of `lit` against `row`, recording newly bound indices
/// in `trail`. Returns false on a clash.
pub fn unify(lit: &Literal, row: &[Value], bindings: &mut Bindings, trail: &mut Vec<usize>) -> bool {
    if lit.args.len() != row.len() {
        return false;
    }
    for (term, value) in lit.args.iter().zip(row.iter()) {
        match term {
            Term::Const(c) => {
                if c != value {
                    return false;
                }
            }
            Term::Var(v) => {
                if v.index >= bindings.len() {
                    bindings.resize(v.index + 1, None);
                }
                match &bindings[v.index] {
                    Some(bound) if bound != value => return false,
                    Some(_) => {}
                    None => {
                        bindings[v.index] = Some(value.clone());
                        trail.push(v.index);
                    }
                }
            }
        }
    }
    true
}

/// Seed bindings from a head literal and a lookup pattern.
///
/// Returns false if the head can never produce a row matching `pattern`. An
/// empty pattern binds nothing.
pub fn bind_head(head: &Literal, pattern: &[Option<&Value>], bindings: &mut Bindings) -> bool {
    if pattern.is_empty() {
        return true;
    }
    if head.args.len() != pattern.len() {
        return false;
    }
    for (term, bound) in head.args.iter().zip(pattern) {
        let Some(value) = bound else { continue };
        match term {
            Term::Const(c) => {
                if c != *value {
                    return false;
                }
            }
            Term::Var(v) => match &bindings[v.index] {
                Some(existing) if existing != *value => return false,
                Some(_) => {}
                None => bindings[v.index] = Some((*value).clone()),
            },
        }
    }
    true
}

/// The row a fully bound literal denotes.
#[must_use]
pub fn ground_tuple(lit: &Literal, bindings: &Bindings) -> Option<Tuple> {
    lit.args
        .iter()
        .map(|t| match t {
            Term::Const(v) => Some(v.clone()),
            Term::Var(v) => bindings.get(v.index).cloned().flatten(),
        })
        .collect::<Option<Vec<_>>>()
        .map(Tuple::from)
}

/// Every derivation of `head` through `body`, as head rows.
pub fn derive(
    source: &dyn RowSource,
    head: &Literal,
    body: &[Literal],
    variable_count: usize,
    seed: Option<Seed<'_>>,
    out: &mut dyn FnMut(Tuple),
) {
    let mut bindings = vec![None; variable_count];
    solve(source, body, &mut bindings, seed, &mut |b| {
        if let Some(row) = ground_tuple(head, b) {
            out(row);
        }
    });
}

/// Answer a query, rendering each distinct answer as text.
///
/// A query without a head renders the instantiated conjunction.
#[must_use]
pub fn answer(source: &dyn RowSource, query: &Query) -> Vec<String> {
    let mut rows = BTreeSet::new();
    let mut bindings = vec![None; query.variable_count()];
    let heads = query.answer_literals();
    solve(source, &query.body, &mut bindings, None, &mut |b| {
        let rendered: Vec<String> = heads.iter().map(|lit| lit.instantiate(b).to_string()).collect();
        rows.insert(rendered.join(", "));
    });
    rows.into_iter().collect()
}
