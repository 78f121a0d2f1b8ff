//! Terms and literals.
//!
//! A literal is a table name applied to an ordered list of terms, optionally
//! negated and optionally qualified with the policy that defines the table
//! (`nova:servers(x)`). Variables carry a canonical index assigned by the
//! compiler; equality and hashing look only at that index so that rules that
//! differ only in variable names compare equal.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::value::{Tuple, Value};

/// A rule-scoped variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    /// Canonical position of the variable within its rule or query.
    pub index: usize,
    /// Name as written by the author (used for rendering only).
    pub name: String,
}

impl Variable {
    /// Create a variable.
    #[must_use]
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }

    /// Returns true for the anonymous variable `_`.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.name == "_"
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for Variable {}

impl Hash for Variable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

/// A constant or a variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    Const(Value),
    Var(Variable),
}

impl Term {
    #[must_use]
    pub const fn as_const(&self) -> Option<&Value> {
        match self {
            Self::Const(v) => Some(v),
            Self::Var(_) => None,
        }
    }

    #[must_use]
    pub const fn as_var(&self) -> Option<&Variable> {
        match self {
            Self::Var(v) => Some(v),
            Self::Const(_) => None,
        }
    }

    #[must_use]
    pub const fn is_var(&self) -> bool {
        matches!(self, Self::Var(_))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(v) => write!(f, "{v}"),
            Self::Var(v) => f.write_str(&v.name),
        }
    }
}

/// A table applied to arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Literal {
    /// Policy that defines the table, when written explicitly.
    pub theory: Option<String>,
    /// Table name.
    pub table: String,
    /// Arguments, one per column.
    pub args: Vec<Term>,
    /// True for `not table(...)`.
    pub negated: bool,
}

impl Literal {
    /// Create a positive, unqualified literal.
    #[must_use]
    pub fn new(table: impl Into<String>, args: Vec<Term>) -> Self {
        Self {
            theory: None,
            table: table.into(),
            args,
            negated: false,
        }
    }

    /// Create a ground literal from a table name and a tuple of values.
    ///
    /// ```
    /// use guardlog::{Literal, Value};
    ///
    /// let lit = Literal::from_table_tuple("p", [Value::Int(1), Value::from("a")]);
    /// assert!(lit.is_ground());
    /// assert_eq!(lit.to_string(), "p(1, \"a\")");
    /// ```
    #[must_use]
    pub fn from_table_tuple<I>(table: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Self::new(table, values.into_iter().map(Term::Const).collect())
    }

    /// Qualify this literal with the policy defining its table.
    #[must_use]
    pub fn qualified(mut self, theory: impl Into<String>) -> Self {
        self.theory = Some(theory.into());
        self
    }

    /// Negate this literal.
    #[must_use]
    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// Number of arguments.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// True when no argument is a variable.
    #[must_use]
    pub fn is_ground(&self) -> bool {
        self.args.iter().all(|t| !t.is_var())
    }

    /// Variables in argument order (with repeats).
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.args.iter().filter_map(Term::as_var)
    }

    /// The argument values of a ground literal.
    #[must_use]
    pub fn tuple(&self) -> Option<Tuple> {
        self.args
            .iter()
            .map(|t| t.as_const().cloned())
            .collect::<Option<Vec<_>>>()
            .map(Tuple::from)
    }

    /// Substitute bound variables, leaving unbound ones in place.
    #[must_use]
    pub fn instantiate(&self, bindings: &[Option<Value>]) -> Self {
        let args = self
            .args
            .iter()
            .map(|t| match t {
                Term::Var(v) => match bindings.get(v.index) {
                    Some(Some(value)) => Term::Const(value.clone()),
                    _ => t.clone(),
                },
                Term::Const(_) => t.clone(),
            })
            .collect();
        Self {
            theory: self.theory.clone(),
            table: self.table.clone(),
            args,
            negated: self.negated,
        }
    }

    /// `theory:table` when qualified, `table` otherwise.
    #[must_use]
    pub fn qualified_table(&self) -> String {
        match &self.theory {
            Some(theory) => format!("{theory}:{}", self.table),
            None => self.table.clone(),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("not ")?;
        }
        if let Some(theory) = &self.theory {
            write!(f, "{theory}:")?;
        }
        write!(f, "{}(", self.table)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}

/// A ground row of a named table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fact {
    pub table: String,
    pub tuple: Vec<Value>,
}

impl Fact {
    /// Create a fact.
    #[must_use]
    pub fn new<I, V>(table: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            table: table.into(),
            tuple: values.into_iter().map(Into::into).collect(),
        }
    }

    /// The fact as a ground literal.
    #[must_use]
    pub fn to_literal(&self) -> Literal {
        Literal::from_table_tuple(self.table.clone(), self.tuple.iter().cloned())
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_literal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(index: usize, name: &str) -> Term {
        Term::Var(Variable::new(index, name))
    }

    #[test]
    fn test_variables_compare_by_index() {
        assert_eq!(Variable::new(0, "x"), Variable::new(0, "y"));
        assert_ne!(Variable::new(0, "x"), Variable::new(1, "x"));
    }

    #[test]
    fn test_literal_display() {
        let lit = Literal::new("servers", vec![var(0, "id"), Term::Const(Value::Int(3))])
            .qualified("nova")
            .negate();
        assert_eq!(lit.to_string(), "not nova:servers(id, 3)");
        assert_eq!(lit.qualified_table(), "nova:servers");
    }

    #[test]
    fn test_ground_literal_tuple() {
        let lit = Literal::from_table_tuple("p", [Value::Int(1), Value::Int(2)]);
        assert!(lit.is_ground());
        assert_eq!(lit.tuple().unwrap().len(), 2);

        let open = Literal::new("p", vec![var(0, "x")]);
        assert!(!open.is_ground());
        assert!(open.tuple().is_none());
    }

    #[test]
    fn test_instantiate_binds_known_variables() {
        let lit = Literal::new("p", vec![var(0, "x"), var(1, "y")]);
        let plugged = lit.instantiate(&[Some(Value::Int(4)), None]);
        assert_eq!(plugged.to_string(), "p(4, y)");
    }

    #[test]
    fn test_zero_arity_display() {
        assert_eq!(Literal::new("alarm", Vec::new()).to_string(), "alarm()");
    }

    #[test]
    fn test_fact_to_literal() {
        let fact = Fact::new("q", ["a", "b"]);
        assert_eq!(fact.to_string(), "q(\"a\", \"b\")");
    }
}
