use crate::ast::{Comparator, Expr};
use crate::error::{ParseError, ParseResult};
use crate::tokenizer::{tokenize, Token};

/// Parser for path expressions
pub struct Parser<'src> {
    tokens: Vec<(Token<'src>, std::ops::Range<usize>)>,
    pos: usize,
}

/// Parse a path string into an expression tree.
pub fn parse(source: &str) -> ParseResult<Expr> {
    let mut parser = Parser::new(source)?;
    parser.parse_root()
}

impl<'src> Parser<'src> {
    pub fn new(source: &'src str) -> ParseResult<Self> {
        Ok(Self {
            tokens: tokenize(source)?,
            pos: 0,
        })
    }

    fn parse_root(&mut self) -> ParseResult<Expr> {
        if self.tokens.is_empty() {
            return Err(ParseError::unexpected_eof(0));
        }
        let expr = self.parse_path()?;
        if !self.is_at_end() {
            return Err(ParseError::unexpected_token(
                self.peek_pos(),
                "end of path",
                self.describe_peek(),
            ));
        }
        Ok(expr)
    }

    /// Parse a sequence of segments: `a.b[5]..c`. Stops at `,` and `]` so it
    /// can double as the union-member path production.
    fn parse_path(&mut self) -> ParseResult<Expr> {
        let mut nodes: Vec<Expr> = Vec::new();
        loop {
            match self.peek() {
                None | Some((Token::Comma | Token::RBracket, _)) => break,
                Some((Token::DotDot, _)) => {
                    self.advance();
                    // `..` swallows the remainder of the path as its term
                    let term = self.parse_path()?;
                    nodes.push(Expr::Recursive {
                        term: Box::new(term),
                    });
                    break;
                }
                Some((Token::Dot, _)) => {
                    if nodes.is_empty() {
                        return Err(ParseError::unexpected_token(
                            self.peek_pos(),
                            "path segment",
                            "'.'",
                        ));
                    }
                    self.advance();
                    nodes.push(self.parse_named_segment()?);
                }
                Some((Token::LBracket, _)) => {
                    self.advance();
                    nodes.push(self.parse_bracket()?);
                }
                Some((
                    Token::Ident(_) | Token::String(_) | Token::At | Token::Dollar | Token::True
                    | Token::False,
                    _,
                )) if nodes.is_empty() => {
                    nodes.push(self.parse_named_segment()?);
                }
                Some(_) => {
                    if nodes.is_empty() {
                        return Err(ParseError::unexpected_token(
                            self.peek_pos(),
                            "path segment",
                            self.describe_peek(),
                        ));
                    }
                    break;
                }
            }
        }

        match nodes.len() {
            0 => Err(ParseError::invalid_syntax(self.peek_pos(), "expected a path")),
            1 => Ok(nodes.remove(0)),
            _ => Ok(Expr::Path { nodes }),
        }
    }

    /// A dotted segment: identifier, quoted string, or self reference.
    fn parse_named_segment(&mut self) -> ParseResult<Expr> {
        match self.peek() {
            Some((Token::Ident(name), _)) => {
                let name = name.to_string();
                self.advance();
                Ok(Expr::Attribute { name })
            }
            Some((Token::String(raw), _)) => {
                let name = unquote(raw);
                self.advance();
                Ok(Expr::Attribute { name })
            }
            Some((Token::True, _)) => {
                self.advance();
                Ok(Expr::Attribute {
                    name: "true".to_string(),
                })
            }
            Some((Token::False, _)) => {
                self.advance();
                Ok(Expr::Attribute {
                    name: "false".to_string(),
                })
            }
            Some((Token::At | Token::Dollar, _)) => {
                self.advance();
                Ok(Expr::This)
            }
            _ => Err(ParseError::unexpected_token(
                self.peek_pos(),
                "attribute name",
                self.describe_peek(),
            )),
        }
    }

    /// Bracket contents (the `[` is already consumed). A single member
    /// collapses to the member itself; multiple members form a union.
    fn parse_bracket(&mut self) -> ParseResult<Expr> {
        if self.match_token(Token::RBracket) {
            return Ok(Expr::Union { nodes: Vec::new() });
        }

        let mut members = vec![self.parse_union_member()?];
        while self.match_token(Token::Comma) {
            members.push(self.parse_union_member()?);
        }
        self.expect(Token::RBracket)?;

        if members.len() == 1 {
            Ok(members.remove(0))
        } else {
            Ok(Expr::Union { nodes: members })
        }
    }

    fn parse_union_member(&mut self) -> ParseResult<Expr> {
        if self.range_follows() {
            return self.parse_range();
        }
        match self.peek() {
            Some((Token::Number(_), _)) => self.parse_index(),
            Some((Token::Ident(_) | Token::String(_) | Token::At | Token::Dollar, _))
                if self.constraint_follows() =>
            {
                self.parse_constraint()
            }
            _ => self.parse_path(),
        }
    }

    fn range_follows(&self) -> bool {
        matches!(self.peek(), Some((Token::Colon, _)))
            || (matches!(self.peek(), Some((Token::Number(_), _)))
                && matches!(self.peek_ahead(1), Some((Token::Colon, _))))
    }

    fn constraint_follows(&self) -> bool {
        matches!(
            self.peek_ahead(1),
            Some((
                Token::Question
                    | Token::EqEq
                    | Token::NotEq
                    | Token::Gt
                    | Token::Gte
                    | Token::Lt
                    | Token::Lte,
                _
            ))
        )
    }

    fn parse_index(&mut self) -> ParseResult<Expr> {
        let value = self.expect_integer()?;
        Ok(Expr::Index { value })
    }

    fn parse_range(&mut self) -> ParseResult<Expr> {
        let start = if matches!(self.peek(), Some((Token::Number(_), _))) {
            Some(self.expect_integer()?)
        } else {
            None
        };
        self.expect(Token::Colon)?;
        let end = if matches!(self.peek(), Some((Token::Number(_), _))) {
            Some(self.expect_integer()?)
        } else {
            None
        };
        let step = if self.match_token(Token::Colon) {
            Some(self.expect_integer()?)
        } else {
            None
        };
        Ok(Expr::Range { start, end, step })
    }

    fn parse_constraint(&mut self) -> ParseResult<Expr> {
        let target = self.parse_named_segment()?;
        if self.match_token(Token::Question) {
            return Ok(Expr::Constraint {
                target: Box::new(target),
                comparator: None,
                value: None,
            });
        }
        let comparator = self.expect_comparator()?;
        let value = self.parse_literal()?;
        Ok(Expr::Constraint {
            target: Box::new(target),
            comparator: Some(comparator),
            value: Some(Box::new(value)),
        })
    }

    fn expect_comparator(&mut self) -> ParseResult<Comparator> {
        let comparator = match self.peek() {
            Some((Token::EqEq, _)) => Comparator::Eq,
            Some((Token::NotEq, _)) => Comparator::Neq,
            Some((Token::Gt, _)) => Comparator::Gt,
            Some((Token::Gte, _)) => Comparator::Gte,
            Some((Token::Lt, _)) => Comparator::Lt,
            Some((Token::Lte, _)) => Comparator::Lte,
            _ => {
                return Err(ParseError::unexpected_token(
                    self.peek_pos(),
                    "comparison operator",
                    self.describe_peek(),
                ))
            }
        };
        self.advance();
        Ok(comparator)
    }

    fn parse_literal(&mut self) -> ParseResult<Expr> {
        match self.peek() {
            Some((Token::Number(raw), span)) => {
                let raw = *raw;
                let pos = span.start;
                self.advance();
                let value = raw
                    .parse::<f64>()
                    .map_err(|_| ParseError::invalid_syntax(pos, "malformed number"))?;
                Ok(Expr::Number { value })
            }
            Some((Token::String(raw), _)) => {
                let value = unquote(raw);
                self.advance();
                Ok(Expr::String { value })
            }
            Some((Token::True, _)) => {
                self.advance();
                Ok(Expr::Boolean { value: true })
            }
            Some((Token::False, _)) => {
                self.advance();
                Ok(Expr::Boolean { value: false })
            }
            _ => Err(ParseError::unexpected_token(
                self.peek_pos(),
                "literal value",
                self.describe_peek(),
            )),
        }
    }

    // Helper methods

    fn peek(&self) -> Option<&(Token<'src>, std::ops::Range<usize>)> {
        self.tokens.get(self.pos)
    }

    fn peek_ahead(&self, offset: usize) -> Option<&(Token<'src>, std::ops::Range<usize>)> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<&(Token<'src>, std::ops::Range<usize>)> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn check(&self, token: Token) -> bool {
        if let Some((t, _)) = self.peek() {
            std::mem::discriminant(t) == std::mem::discriminant(&token)
        } else {
            false
        }
    }

    fn match_token(&mut self, token: Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> ParseResult<()> {
        if self.check(token.clone()) {
            self.advance();
            Ok(())
        } else {
            Err(ParseError::unexpected_token(
                self.peek_pos(),
                token.to_string(),
                self.describe_peek(),
            ))
        }
    }

    fn expect_integer(&mut self) -> ParseResult<i64> {
        match self.peek() {
            Some((Token::Number(raw), span)) => {
                let raw = *raw;
                let pos = span.start;
                self.advance();
                raw.parse::<i64>()
                    .map_err(|_| ParseError::invalid_syntax(pos, "index must be an integer"))
            }
            _ => Err(ParseError::unexpected_token(
                self.peek_pos(),
                "number",
                self.describe_peek(),
            )),
        }
    }

    /// Position of the next token, or just past the last one at EOF.
    fn peek_pos(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, span)| span.start)
            .unwrap_or_else(|| self.tokens.last().map(|(_, span)| span.end).unwrap_or(0))
    }

    fn describe_peek(&self) -> String {
        match self.peek() {
            Some((token, _)) => token.to_string(),
            None => "end of path".to_string(),
        }
    }
}

/// Strip quotes and resolve backslash escapes.
fn unquote(raw: &str) -> String {
    let inner = raw.get(1..raw.len().saturating_sub(1)).unwrap_or_default();
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}
