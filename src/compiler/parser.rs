//! Parser for policy text.
//!
//! Parses token streams into a raw syntax tree in which variables are still
//! named. Canonical numbering happens afterwards in [`super::canonicalize`].

use chumsky::prelude::*;

use super::lexer::{Span, Token};
use crate::value::Value;

/// A term before variable numbering.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTerm {
    Var(String),
    Const(Value),
}

/// A literal before variable numbering.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLiteral {
    pub theory: Option<String>,
    pub table: String,
    pub args: Vec<RawTerm>,
    pub negated: bool,
    pub span: Span,
}

/// `head :- body`, or a bare literal when `body` is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStatement {
    pub head: RawLiteral,
    pub body: Vec<RawLiteral>,
}

/// A query: a conjunction of literals, optionally with an answer head.
#[derive(Debug, Clone, PartialEq)]
pub struct RawQuery {
    pub head: Option<RawLiteral>,
    pub body: Vec<RawLiteral>,
}

/// One `table+(args)` or `table-(args)` entry of an update sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct RawUpdate {
    pub literal: RawLiteral,
    pub insert: bool,
}

// ============================================================================
// Helpers
// ============================================================================

fn ident() -> impl Parser<Token, String, Error = Simple<Token>> + Clone {
    select! { Token::Ident(s) => s }
}

fn term() -> impl Parser<Token, RawTerm, Error = Simple<Token>> + Clone {
    select! {
        Token::Ident(s) => RawTerm::Var(s),
        Token::Int(i) => RawTerm::Const(Value::Int(i)),
        Token::Float(bits) => RawTerm::Const(Value::Float(f64::from_bits(bits))),
        Token::Str(s) => RawTerm::Const(Value::String(s)),
        Token::True => RawTerm::Const(Value::Bool(true)),
        Token::False => RawTerm::Const(Value::Bool(false)),
    }
}

/// `(a, b, ...)`; omitted parentheses mean zero arguments.
fn args() -> impl Parser<Token, Vec<RawTerm>, Error = Simple<Token>> + Clone {
    term()
        .separated_by(just(Token::Comma))
        .delimited_by(just(Token::LParen), just(Token::RParen))
        .or_not()
        .map(Option::unwrap_or_default)
}

/// `table` or `policy:table`.
fn table_ref() -> impl Parser<Token, (Option<String>, String), Error = Simple<Token>> + Clone {
    ident()
        .then(just(Token::Colon).ignore_then(ident()).or_not())
        .map(|(first, second)| match second {
            Some(table) => (Some(first), table),
            None => (None, first),
        })
}

fn literal() -> impl Parser<Token, RawLiteral, Error = Simple<Token>> + Clone {
    just(Token::Not)
        .or_not()
        .then(table_ref())
        .then(args())
        .map_with_span(|((not, (theory, table)), args), span| RawLiteral {
            theory,
            table,
            args,
            negated: not.is_some(),
            span,
        })
}

fn conjunction() -> impl Parser<Token, Vec<RawLiteral>, Error = Simple<Token>> + Clone {
    literal().separated_by(just(Token::Comma)).at_least(1)
}

fn terminator() -> impl Parser<Token, (), Error = Simple<Token>> + Clone {
    choice((just(Token::Dot), just(Token::Semicolon)))
        .or_not()
        .ignored()
}

fn statement() -> impl Parser<Token, RawStatement, Error = Simple<Token>> + Clone {
    literal()
        .then(just(Token::ColonDash).ignore_then(conjunction()).or_not())
        .then_ignore(terminator())
        .map(|(head, body)| RawStatement {
            head,
            body: body.unwrap_or_default(),
        })
}

// ============================================================================
// Entry points
// ============================================================================

/// A program: zero or more statements.
pub fn program() -> impl Parser<Token, Vec<RawStatement>, Error = Simple<Token>> + Clone {
    statement().repeated().then_ignore(end())
}

/// A query: `lit`, `lit, lit, ...` or `head :- lit, ...`.
pub fn query() -> impl Parser<Token, RawQuery, Error = Simple<Token>> + Clone {
    conjunction()
        .then(just(Token::ColonDash).ignore_then(conjunction()).or_not())
        .then_ignore(terminator())
        .then_ignore(end())
        .try_map(|(first, body), span| match body {
            None => Ok(RawQuery {
                head: None,
                body: first,
            }),
            Some(body) => {
                let mut first = first.into_iter();
                match (first.next(), first.next()) {
                    (Some(head), None) => Ok(RawQuery {
                        head: Some(head),
                        body,
                    }),
                    _ => Err(Simple::custom(span, "a query rule must have exactly one head")),
                }
            }
        })
}

/// An update sequence: `p+(1) other:q-(2) ...`.
pub fn update_sequence() -> impl Parser<Token, Vec<RawUpdate>, Error = Simple<Token>> + Clone {
    let marker = choice((just(Token::Plus).to(true), just(Token::Minus).to(false)));

    table_ref()
        .then(marker)
        .then(args())
        .map_with_span(|(((theory, table), insert), args), span| RawUpdate {
            literal: RawLiteral {
                theory,
                table,
                args,
                negated: false,
                span,
            },
            insert,
        })
        .then_ignore(choice((just(Token::Comma), just(Token::Dot), just(Token::Semicolon))).or_not())
        .repeated()
        .then_ignore(end())
}
