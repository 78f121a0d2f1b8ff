//! Lexer for policy text.
//!
//! Tokenizes source into a stream for the parser.

use std::fmt;
use std::ops::Range;

use chumsky::prelude::*;

/// Token types for policy text.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Token {
    // Keywords
    Not,
    True,
    False,

    // Identifiers and constants
    Ident(String),
    Int(i64),
    /// Float literal, stored by bit pattern so tokens stay hashable.
    Float(u64),
    Str(String),

    // Punctuation
    ColonDash, // :-
    Colon,     // :
    Comma,     // ,
    LParen,    // (
    RParen,    // )
    Dot,       // .
    Semicolon, // ;
    Plus,      // +
    Minus,     // -
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Not => write!(f, "not"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Int(i) => write!(f, "{i}"),
            Token::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::ColonDash => write!(f, ":-"),
            Token::Colon => write!(f, ":"),
            Token::Comma => write!(f, ","),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Dot => write!(f, "."),
            Token::Semicolon => write!(f, ";"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
        }
    }
}

/// Character range of a token in the source.
pub type Span = Range<usize>;

/// Create a lexer for policy text.
pub fn lexer() -> impl Parser<char, Vec<(Token, Span)>, Error = Simple<char>> {
    let keyword_or_ident = text::ident().map(|s: String| match s.as_str() {
        "not" => Token::Not,
        "true" => Token::True,
        "false" => Token::False,
        _ => Token::Ident(s),
    });

    // A leading '-' only belongs to the number when digits follow, so `p-(1)`
    // still lexes as Ident Minus LParen.
    let number = just('-')
        .or_not()
        .then(text::digits(10))
        .then(just('.').ignore_then(text::digits(10)).or_not())
        .try_map(
            |((sign, whole), fraction): ((Option<char>, String), Option<String>), span| {
                let sign = if sign.is_some() { "-" } else { "" };
                match fraction {
                    Some(fraction) => format!("{sign}{whole}.{fraction}")
                        .parse::<f64>()
                        .map(|v| Token::Float(v.to_bits()))
                        .map_err(|e| Simple::custom(span, e.to_string())),
                    None => format!("{sign}{whole}")
                        .parse::<i64>()
                        .map(Token::Int)
                        .map_err(|e| Simple::custom(span, format!("integer {whole}: {e}"))),
                }
            },
        );

    let escape = just('\\').ignore_then(choice((
        just('\\'),
        just('"'),
        just('n').to('\n'),
        just('t').to('\t'),
    )));

    let string = just('"')
        .ignore_then(filter(|c: &char| *c != '\\' && *c != '"').or(escape).repeated())
        .then_ignore(just('"'))
        .collect::<String>()
        .map(Token::Str);

    let punctuation = choice((
        just(":-").to(Token::ColonDash),
        just(':').to(Token::Colon),
        just(',').to(Token::Comma),
        just('(').to(Token::LParen),
        just(')').to(Token::RParen),
        just('.').to(Token::Dot),
        just(';').to(Token::Semicolon),
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
    ));

    // Comments run to end of line: `// ...` or `# ...`
    let line_comment = just("//")
        .ignored()
        .or(just('#').ignored())
        .then(none_of('\n').repeated())
        .then(just('\n').or_not())
        .ignored();

    let token = choice((string, number, keyword_or_ident, punctuation));

    let token_or_skip = line_comment.to(None).or(token.map(Some));

    token_or_skip
        .map_with_span(|opt_tok, span| opt_tok.map(|tok| (tok, span)))
        .padded()
        .repeated()
        .then_ignore(end())
        .map(|items| items.into_iter().flatten().collect())
}
