//! Compiler for policy text.
//!
//! Text goes through a chumsky lexer and token parser into a raw tree, then
//! variables are numbered canonically (first appearance, head first) and each
//! statement is validated: heads are positive and unqualified, facts are
//! ground, rules are safe.
//!
//! # Example
//!
//! ```
//! use guardlog::compiler::parse;
//!
//! let formulas = parse("q(1) p(x) :- q(x)").unwrap();
//! assert_eq!(formulas.len(), 2);
//! assert!(formulas[1].is_rule());
//! ```

pub mod graph;
pub mod lexer;
pub mod parser;
pub mod safety;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use chumsky::error::SimpleReason;
use chumsky::prelude::*;

use crate::error::ValidationError;
use crate::literal::{Literal, Term, Variable};
use crate::rule::{Formula, Query, Rule};
use crate::value::Value;

pub use graph::{DependencyGraph, Polarity, Strata};
pub use safety::{check_query_safety, check_rule_safety};

use lexer::{Span, Token};
use parser::{RawLiteral, RawStatement, RawTerm};

/// Parse a program into formulas.
///
/// Statements are separated by whitespace, `.` or `;`. Empty text is an empty
/// program.
pub fn parse(text: &str) -> Result<Vec<Formula>, ValidationError> {
    run(parser::program(), text)?
        .into_iter()
        .map(compile_statement)
        .collect()
}

/// Parse exactly one formula.
pub fn parse_formula(text: &str) -> Result<Formula, ValidationError> {
    let mut formulas = parse(text)?;
    match formulas.len() {
        1 => Ok(formulas.remove(0)),
        n => Err(ValidationError::Syntax {
            offset: 0,
            message: format!("expected exactly one statement, found {n}"),
        }),
    }
}

/// Parse one rule. A bare fact yields a rule with an empty body.
pub fn parse_rule(text: &str) -> Result<Rule, ValidationError> {
    Ok(match parse_formula(text)? {
        Formula::Rule(rule) => rule,
        Formula::Fact(head) => Rule::new(head, Vec::new()),
    })
}

/// Build a ground literal for `table` from raw values.
pub fn parse_literal<I>(table: &str, values: I) -> Result<Literal, ValidationError>
where
    I: IntoIterator<Item = Value>,
{
    if !is_identifier(table) {
        return Err(ValidationError::Syntax {
            offset: 0,
            message: format!("invalid table name '{table}'"),
        });
    }
    Ok(Literal::from_table_tuple(table, values))
}

/// Parse a query: a literal, a conjunction, or `head :- body`.
pub fn parse_query(text: &str) -> Result<Query, ValidationError> {
    let raw = run(parser::query(), text)?;
    let mut scope = Scope::default();
    let head = raw.head.map(|h| scope.literal(h));
    let body = raw.body.into_iter().map(|l| scope.literal(l)).collect();
    let query = Query { head, body };
    if let Some(head) = &query.head {
        check_head(head)?;
    }
    check_query_safety(&query)?;
    Ok(query)
}

/// Parse an update sequence such as `p+(1) other:q-(2)` into
/// `(literal, insert)` pairs.
pub fn parse_update_sequence(text: &str) -> Result<Vec<(Literal, bool)>, ValidationError> {
    run(parser::update_sequence(), text)?
        .into_iter()
        .map(|update| {
            let lit = Scope::default().literal(update.literal);
            if lit.is_ground() {
                Ok((lit, update.insert))
            } else {
                Err(ValidationError::NonGroundFact {
                    literal: lit.to_string(),
                })
            }
        })
        .collect()
}

/// Check a formula built outside the parser: heads are positive and
/// unqualified, facts are ground and rules are safe.
pub fn check_formula(formula: &Formula) -> Result<(), ValidationError> {
    check_head(formula.head())?;
    match formula {
        Formula::Fact(lit) if !lit.is_ground() => Err(ValidationError::NonGroundFact {
            literal: lit.to_string(),
        }),
        Formula::Fact(_) => Ok(()),
        Formula::Rule(rule) => check_rule_safety(rule),
    }
}

/// True for `[A-Za-z_][A-Za-z0-9_]*`.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Arity of every table seen so far.
#[derive(Debug, Clone, Default)]
pub struct ArityMap {
    arities: HashMap<String, usize>,
}

impl ArityMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `arity` for `table`, failing if it disagrees with an earlier use.
    pub fn check(&mut self, table: &str, arity: usize) -> Result<(), ValidationError> {
        match self.arities.get(table) {
            Some(&expected) if expected != arity => Err(ValidationError::ArityMismatch {
                table: table.to_string(),
                expected,
                actual: arity,
            }),
            Some(_) => Ok(()),
            None => {
                self.arities.insert(table.to_string(), arity);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn get(&self, table: &str) -> Option<usize> {
        self.arities.get(table).copied()
    }
}

// ============================================================================
// Canonicalization
// ============================================================================

#[derive(Default)]
struct Scope {
    names: HashMap<String, usize>,
    next: usize,
}

impl Scope {
    fn var(&mut self, name: String) -> Variable {
        if name == "_" {
            let index = self.next;
            self.next += 1;
            return Variable::new(index, name);
        }
        let next = &mut self.next;
        let index = *self.names.entry(name.clone()).or_insert_with(|| {
            let index = *next;
            *next += 1;
            index
        });
        Variable::new(index, name)
    }

    fn literal(&mut self, raw: RawLiteral) -> Literal {
        let args = raw
            .args
            .into_iter()
            .map(|t| match t {
                RawTerm::Var(name) => Term::Var(self.var(name)),
                RawTerm::Const(v) => Term::Const(v),
            })
            .collect();
        Literal {
            theory: raw.theory,
            table: raw.table,
            args,
            negated: raw.negated,
        }
    }
}

fn check_head(head: &Literal) -> Result<(), ValidationError> {
    let reason = if head.negated {
        "head must not be negated"
    } else if head.theory.is_some() {
        "head must not be qualified with a policy"
    } else {
        return Ok(());
    };
    Err(ValidationError::InvalidHead {
        head: head.to_string(),
        reason: reason.to_string(),
    })
}

fn compile_statement(raw: RawStatement) -> Result<Formula, ValidationError> {
    let mut scope = Scope::default();
    let head = scope.literal(raw.head);
    let body: Vec<Literal> = raw.body.into_iter().map(|l| scope.literal(l)).collect();
    check_head(&head)?;

    if body.is_empty() {
        if !head.is_ground() {
            return Err(ValidationError::NonGroundFact {
                literal: head.to_string(),
            });
        }
        return Ok(Formula::Fact(head));
    }

    let rule = Rule::new(head, body);
    check_rule_safety(&rule)?;
    Ok(Formula::Rule(rule))
}

// ============================================================================
// Driving chumsky
// ============================================================================

fn run<T>(
    parser: impl Parser<Token, T, Error = Simple<Token>>,
    text: &str,
) -> Result<T, ValidationError> {
    let tokens: Vec<(Token, Span)> = lexer::lexer().parse(text).map_err(first_error)?;
    let len = text.chars().count();
    parser
        .parse(chumsky::Stream::from_iter(len..len + 1, tokens.into_iter()))
        .map_err(first_error)
}

fn first_error<I>(errors: Vec<Simple<I>>) -> ValidationError
where
    I: fmt::Display + Hash + Eq,
{
    errors
        .iter()
        .min_by_key(|e| e.span().start)
        .map_or_else(
            || ValidationError::Syntax {
                offset: 0,
                message: "unknown parse failure".to_string(),
            },
            |e| ValidationError::Syntax {
                offset: e.span().start,
                message: describe(e),
            },
        )
}

fn describe<I>(error: &Simple<I>) -> String
where
    I: fmt::Display + Hash + Eq,
{
    if let SimpleReason::Custom(msg) = error.reason() {
        return msg.clone();
    }

    let render = |tok: Option<&I>| tok.map_or_else(|| "end of input".to_string(), |t| format!("'{t}'"));
    let found = render(error.found());
    let mut expected: Vec<String> = error.expected().map(|e| render(e.as_ref())).collect();
    expected.sort();
    expected.dedup();

    if expected.is_empty() {
        format!("unexpected {found}")
    } else {
        format!("unexpected {found}, expected {}", expected.join(" or "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_numbering_head_first() {
        let rule = parse_rule("p(b, a) :- q(a, c, b)").unwrap();
        let head: Vec<usize> = rule.head.variables().map(|v| v.index).collect();
        let body: Vec<usize> = rule.body[0].variables().map(|v| v.index).collect();
        assert_eq!(head, vec![0, 1]);
        assert_eq!(body, vec![1, 2, 0]);
    }

    #[test]
    fn test_renamed_rules_are_equal() {
        assert_eq!(
            parse_rule("p(x) :- q(x)").unwrap(),
            parse_rule("p(y) :- q(y)").unwrap()
        );
        assert_ne!(
            parse_rule("p(x) :- q(x, y)").unwrap(),
            parse_rule("p(y) :- q(x, y)").unwrap()
        );
    }

    #[test]
    fn test_anonymous_variables_are_fresh() {
        let rule = parse_rule("p(x) :- q(x, _, _)").unwrap();
        let indices: Vec<usize> = rule.body[0].variables().map(|v| v.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_display_round_trip() {
        let text = "p(x, \"a\") :- q(x, 1.5), not nova:r(x, true)";
        let rule = parse_rule(text).unwrap();
        assert_eq!(rule.to_string(), text);
        assert_eq!(parse_rule(&rule.to_string()).unwrap(), rule);
    }

    #[test]
    fn test_empty_program() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("  // nothing here\n").unwrap().is_empty());
    }

    #[test]
    fn test_fact_must_be_ground() {
        assert!(matches!(parse("p(x)"), Err(ValidationError::NonGroundFact { .. })));
    }

    #[test]
    fn test_invalid_heads() {
        assert!(matches!(
            parse("not p(x) :- q(x)"),
            Err(ValidationError::InvalidHead { .. })
        ));
        assert!(matches!(
            parse("nova:p(x) :- q(x)"),
            Err(ValidationError::InvalidHead { .. })
        ));
    }

    #[test]
    fn test_syntax_error_offset() {
        let err = parse("p(1) q(").unwrap_err();
        let ValidationError::Syntax { offset, message } = err else {
            panic!("expected Syntax, got {err:?}");
        };
        assert!(offset >= 5, "offset {offset}");
        assert!(message.contains("unexpected"));
    }

    #[test]
    fn test_lexer_error_is_syntax() {
        assert!(matches!(parse("p(@)"), Err(ValidationError::Syntax { .. })));
    }

    #[test]
    fn test_parse_formula_requires_one() {
        assert!(parse_formula("p(1) p(2)").is_err());
        assert!(parse_formula("p(1)").is_ok());
    }

    #[test]
    fn test_parse_literal_checks_table_name() {
        let lit = parse_literal("p", [Value::Int(1)]).unwrap();
        assert_eq!(lit.to_string(), "p(1)");
        assert!(parse_literal("bad name", []).is_err());
    }

    #[test]
    fn test_update_sequence_must_be_ground() {
        let seq = parse_update_sequence("p+(1) q-(2)").unwrap();
        assert_eq!(seq.len(), 2);
        assert!(seq[0].1);
        assert!(!seq[1].1);
        assert!(matches!(
            parse_update_sequence("p+(x)"),
            Err(ValidationError::NonGroundFact { .. })
        ));
    }

    #[test]
    fn test_check_formula_rejects_hand_built_input() {
        use crate::literal::{Literal, Term, Variable};

        let open = Literal::new("p", vec![Term::Var(Variable::new(0, "x"))]);
        assert!(matches!(
            check_formula(&Formula::Fact(open.clone())),
            Err(ValidationError::NonGroundFact { .. })
        ));
        let qualified = Formula::Fact(Literal::from_table_tuple("p", [Value::Int(1)]).qualified("nova"));
        assert!(matches!(check_formula(&qualified), Err(ValidationError::InvalidHead { .. })));
        let unsafe_rule = Formula::Rule(Rule::new(open, Vec::new()));
        assert!(check_formula(&unsafe_rule).is_err());
        assert!(check_formula(&parse_formula("p(x) :- q(x)").unwrap()).is_ok());
    }

    #[test]
    fn test_arity_map() {
        let mut arities = ArityMap::new();
        arities.check("p", 2).unwrap();
        arities.check("p", 2).unwrap();
        assert!(matches!(
            arities.check("p", 3),
            Err(ValidationError::ArityMismatch { expected: 2, actual: 3, .. })
        ));
        assert_eq!(arities.get("p"), Some(2));
    }
}
