//! Safety checking for rules and queries.
//!
//! A rule is safe if every variable in its head or in a negated body literal
//! also appears in a positive body literal. Anonymous variables inside a
//! negated literal are wildcards and need no binding.

use std::collections::BTreeSet;

use crate::error::ValidationError;
use crate::literal::Literal;
use crate::rule::{Query, Rule};

/// Check that a rule is safe.
pub fn check_rule_safety(rule: &Rule) -> Result<(), ValidationError> {
    check(Some(&rule.head), &rule.body, || rule.to_string())
}

/// Check that a query is safe.
pub fn check_query_safety(query: &Query) -> Result<(), ValidationError> {
    check(query.head.as_ref(), &query.body, || query.to_string())
}

fn check(
    head: Option<&Literal>,
    body: &[Literal],
    render: impl Fn() -> String,
) -> Result<(), ValidationError> {
    let positive: BTreeSet<usize> = body
        .iter()
        .filter(|lit| !lit.negated)
        .flat_map(Literal::variables)
        .map(|v| v.index)
        .collect();

    let mut unsafe_vars: Vec<String> = Vec::new();
    let mut note = |name: &str| {
        if !unsafe_vars.iter().any(|n| n == name) {
            unsafe_vars.push(name.to_string());
        }
    };

    if let Some(head) = head {
        for v in head.variables() {
            if !positive.contains(&v.index) {
                note(&v.name);
            }
        }
    }

    for lit in body.iter().filter(|lit| lit.negated) {
        for v in lit.variables().filter(|v| !v.is_anonymous()) {
            if !positive.contains(&v.index) {
                note(&v.name);
            }
        }
    }

    if unsafe_vars.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::Unsafe {
            rule: render(),
            variables: unsafe_vars,
        })
    }
}
