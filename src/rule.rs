//! Rules and formulas.
//!
//! A formula is the unit a theory stores: either a ground fact or a Horn
//! clause `head :- body`. A rule with an empty body is normalized to a fact by
//! the compiler.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::literal::{Literal, Term, Variable};

/// A Horn clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub head: Literal,
    pub body: Vec<Literal>,
}

impl Rule {
    /// Create a rule.
    #[must_use]
    pub fn new(head: Literal, body: Vec<Literal>) -> Self {
        Self { head, body }
    }

    /// Number of distinct variables (canonical indices are dense from 0).
    #[must_use]
    pub fn variable_count(&self) -> usize {
        std::iter::once(&self.head)
            .chain(self.body.iter())
            .flat_map(Literal::variables)
            .map(|v| v.index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Policies named explicitly by body literals.
    #[must_use]
    pub fn qualified_policies(&self) -> BTreeSet<&str> {
        self.body.iter().filter_map(|l| l.theory.as_deref()).collect()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} :- ", self.head)?;
        for (i, lit) in self.body.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{lit}")?;
        }
        Ok(())
    }
}

/// Something a theory can contain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "formula", rename_all = "snake_case")]
pub enum Formula {
    Fact(Literal),
    Rule(Rule),
}

impl Formula {
    /// The table this formula adds rows to.
    #[must_use]
    pub fn head(&self) -> &Literal {
        match self {
            Self::Fact(lit) => lit,
            Self::Rule(rule) => &rule.head,
        }
    }

    #[must_use]
    pub const fn is_rule(&self) -> bool {
        matches!(self, Self::Rule(_))
    }

    #[must_use]
    pub const fn as_rule(&self) -> Option<&Rule> {
        match self {
            Self::Rule(rule) => Some(rule),
            Self::Fact(_) => None,
        }
    }

    /// Stable identity of this formula.
    #[must_use]
    pub fn id(&self) -> RuleId {
        RuleId::of(self)
    }

    /// Rendering with variables renamed by canonical index.
    #[must_use]
    pub fn canonical_text(&self) -> String {
        canonical(self).to_string()
    }
}

impl From<Rule> for Formula {
    fn from(rule: Rule) -> Self {
        Self::Rule(rule)
    }
}

impl From<Literal> for Formula {
    fn from(lit: Literal) -> Self {
        Self::Fact(lit)
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fact(lit) => write!(f, "{lit}"),
            Self::Rule(rule) => write!(f, "{rule}"),
        }
    }
}

fn canonical_literal(lit: &Literal) -> Literal {
    let args = lit
        .args
        .iter()
        .map(|t| match t {
            Term::Var(v) => Term::Var(Variable::new(v.index, format!("V{}", v.index))),
            Term::Const(c) => Term::Const(c.clone()),
        })
        .collect();
    Literal {
        theory: lit.theory.clone(),
        table: lit.table.clone(),
        args,
        negated: lit.negated,
    }
}

fn canonical(formula: &Formula) -> Formula {
    match formula {
        Formula::Fact(lit) => Formula::Fact(canonical_literal(lit)),
        Formula::Rule(rule) => Formula::Rule(Rule::new(
            canonical_literal(&rule.head),
            rule.body.iter().map(canonical_literal).collect(),
        )),
    }
}

/// A question asked of a policy.
///
/// Without a head, each answer is the instantiated conjunction; with a head,
/// each answer is the instantiated head.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub head: Option<Literal>,
    pub body: Vec<Literal>,
}

impl Query {
    /// A query for every instance of one literal.
    #[must_use]
    pub fn literal(lit: Literal) -> Self {
        Self {
            head: None,
            body: vec![lit],
        }
    }

    /// Number of distinct variables.
    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.head
            .iter()
            .chain(self.body.iter())
            .flat_map(Literal::variables)
            .map(|v| v.index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Literals rendered for each answer.
    #[must_use]
    pub fn answer_literals(&self) -> Vec<&Literal> {
        match &self.head {
            Some(head) => vec![head],
            None => self.body.iter().collect(),
        }
    }

    /// Policies named explicitly by body literals.
    #[must_use]
    pub fn qualified_policies(&self) -> BTreeSet<&str> {
        self.body.iter().filter_map(|l| l.theory.as_deref()).collect()
    }
}

impl From<Rule> for Query {
    fn from(rule: Rule) -> Self {
        Self {
            head: Some(rule.head),
            body: rule.body,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(head) = &self.head {
            write!(f, "{head} :- ")?;
        }
        for (i, lit) in self.body.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{lit}")?;
        }
        Ok(())
    }
}

/// Content-derived identifier of a formula.
///
/// Two formulas that compare equal have the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId([u8; 32]);

impl RuleId {
    /// Compute the id of a formula.
    #[must_use]
    pub fn of(formula: &Formula) -> Self {
        Self(*blake3::hash(formula.canonical_text().as_bytes()).as_bytes())
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}
