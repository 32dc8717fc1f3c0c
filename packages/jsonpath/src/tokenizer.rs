use logos::Logos;
use std::fmt;

use crate::error::{ParseError, ParseResult};

/// Token types for path expressions
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
pub enum Token<'src> {
    // Keywords
    #[token("true")]
    True,

    #[token("false")]
    False,

    // Identifiers (unquoted attribute names)
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice())]
    Ident(&'src str),

    // String literals, single or double quoted
    #[regex(r#""([^"\\]|\\.)*""#, |lex| lex.slice())]
    #[regex(r"'([^'\\]|\\.)*'", |lex| lex.slice())]
    String(&'src str),

    // Numbers
    #[regex(r"-?[0-9]+(\.[0-9]+)?", |lex| lex.slice())]
    Number(&'src str),

    // Comparators
    #[token("==")]
    EqEq,

    #[token("!=")]
    NotEq,

    #[token(">=")]
    Gte,

    #[token("<=")]
    Lte,

    #[token(">")]
    Gt,

    #[token("<")]
    Lt,

    // Symbols
    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("..")]
    DotDot,

    #[token(".")]
    Dot,

    #[token(",")]
    Comma,

    #[token(":")]
    Colon,

    #[token("?")]
    Question,

    #[token("@")]
    At,

    #[token("$")]
    Dollar,
}

impl<'src> fmt::Display for Token<'src> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Ident(s) => write!(f, "identifier '{}'", s),
            Token::String(s) => write!(f, "string {}", s),
            Token::Number(n) => write!(f, "number {}", n),
            Token::EqEq => write!(f, "'=='"),
            Token::NotEq => write!(f, "'!='"),
            Token::Gte => write!(f, "'>='"),
            Token::Lte => write!(f, "'<='"),
            Token::Gt => write!(f, "'>'"),
            Token::Lt => write!(f, "'<'"),
            Token::LBracket => write!(f, "'['"),
            Token::RBracket => write!(f, "']'"),
            Token::DotDot => write!(f, "'..'"),
            Token::Dot => write!(f, "'.'"),
            Token::Comma => write!(f, "','"),
            Token::Colon => write!(f, "':'"),
            Token::Question => write!(f, "'?'"),
            Token::At => write!(f, "'@'"),
            Token::Dollar => write!(f, "'$'"),
        }
    }
}

/// Tokenize a path string, failing on the first unrecognizable character.
pub fn tokenize(source: &str) -> ParseResult<Vec<(Token, std::ops::Range<usize>)>> {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    for (result, span) in lexer.spanned() {
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(_) => return Err(ParseError::lexer_error(span.start)),
        }
    }
    Ok(tokens)
}
