//! Source-text lexer for formulas
//!
//! Turns text such as `[Unit Price] * 2 + (Size / 3)` into the stored token
//! form. Column names are written in brackets, or bare when they are a single
//! word. Names are resolved to ids by the caller.

use std::iter::Peekable;
use std::str::CharIndices;
use tabula_core::{ColumnId, FormulaError, FormulaToken};

/// Byte range of a token in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(String),
    ColumnRef(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Lexer over formula source text.
pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    /// Tokenize the whole source. The last token is always [`TokenKind::Eof`].
    pub fn tokenize(&mut self) -> Result<Vec<Token>, FormulaError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token, FormulaError> {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }

        let Some(&(start, c)) = self.chars.peek() else {
            let end = self.source.len();
            return Ok(Token {
                kind: TokenKind::Eof,
                span: Span { start: end, end },
            });
        };

        let single = |kind| {
            Token {
                kind,
                span: Span {
                    start,
                    end: start + c.len_utf8(),
                },
            }
        };

        let token = match c {
            '+' => single(TokenKind::Plus),
            '-' => single(TokenKind::Minus),
            '*' => single(TokenKind::Star),
            '/' => single(TokenKind::Slash),
            '(' => single(TokenKind::LParen),
            ')' => single(TokenKind::RParen),
            '[' => return self.bracketed_name(start),
            c if c.is_ascii_digit() || c == '.' => return Ok(self.number(start)),
            c if c.is_alphabetic() || c == '_' => return Ok(self.bare_name(start)),
            other => {
                return Err(FormulaError::Malformed {
                    position: start,
                    reason: format!("unexpected character {:?}", other),
                })
            }
        };
        self.chars.next();
        Ok(token)
    }

    fn number(&mut self, start: usize) -> Token {
        let end = self.take_while(|c| c.is_ascii_digit() || c == '.');
        Token {
            kind: TokenKind::Number(self.source[start..end].to_string()),
            span: Span { start, end },
        }
    }

    fn bare_name(&mut self, start: usize) -> Token {
        let end = self.take_while(|c| c.is_alphanumeric() || c == '_');
        Token {
            kind: TokenKind::ColumnRef(self.source[start..end].to_string()),
            span: Span { start, end },
        }
    }

    fn bracketed_name(&mut self, start: usize) -> Result<Token, FormulaError> {
        self.chars.next();
        let name_start = start + 1;
        let name_end = self.take_while(|c| c != ']');
        if self.chars.next().is_none() {
            return Err(FormulaError::Malformed {
                position: start,
                reason: "unterminated column reference".to_string(),
            });
        }
        let name = self.source[name_start..name_end].trim();
        if name.is_empty() {
            return Err(FormulaError::Malformed {
                position: start,
                reason: "empty column reference".to_string(),
            });
        }
        Ok(Token {
            kind: TokenKind::ColumnRef(name.to_string()),
            span: Span {
                start,
                end: name_end + 1,
            },
        })
    }

    /// Consume chars matching `pred`; returns the byte offset after the last.
    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> usize {
        while let Some(&(_, c)) = self.chars.peek() {
            if !pred(c) {
                break;
            }
            self.chars.next();
        }
        self.chars
            .peek()
            .map(|(i, _)| *i)
            .unwrap_or(self.source.len())
    }
}

/// Convert formula source text into stored tokens.
///
/// `resolve` maps a column name to its id; an unknown name is reported as
/// malformed at the reference's byte offset.
pub fn tokens_from_source<F>(source: &str, mut resolve: F) -> Result<Vec<FormulaToken>, FormulaError>
where
    F: FnMut(&str) -> Option<ColumnId>,
{
    let lexed = Lexer::new(source).tokenize()?;
    let mut out = Vec::with_capacity(lexed.len());

    for token in lexed {
        let stored = match token.kind {
            TokenKind::Eof => break,
            TokenKind::Number(text) => FormulaToken::unit(text),
            TokenKind::ColumnRef(name) => {
                let column_id = resolve(&name).ok_or_else(|| FormulaError::Malformed {
                    position: token.span.start,
                    reason: format!("unknown column {:?}", name),
                })?;
                FormulaToken::property(column_id)
            }
            TokenKind::Plus => FormulaToken::operator("+"),
            TokenKind::Minus => FormulaToken::operator("-"),
            TokenKind::Star => FormulaToken::operator("*"),
            TokenKind::Slash => FormulaToken::operator("/"),
            TokenKind::LParen => FormulaToken::operator("("),
            TokenKind::RParen => FormulaToken::operator(")"),
        };
        out.push(stored);
    }

    Ok(out)
}

/// Render stored tokens back to source text, naming columns via `name_of`.
pub fn source_from_tokens<F>(tokens: &[FormulaToken], mut name_of: F) -> String
where
    F: FnMut(&ColumnId) -> Option<String>,
{
    tokens
        .iter()
        .map(|token| match token {
            FormulaToken::Operator { value } | FormulaToken::Unit { value } => {
                value.trim().to_string()
            }
            FormulaToken::Property { column_id } => {
                let name = name_of(column_id).unwrap_or_else(|| column_id.to_string());
                format!("[{}]", name)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_core::EntityIdType;

    #[test]
    fn test_tokenize_kinds_and_spans() {
        let tokens = Lexer::new("[Unit Price] * 2.5").tokenize().unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::ColumnRef("Unit Price".to_string()),
                TokenKind::Star,
                TokenKind::Number("2.5".to_string()),
                TokenKind::Eof,
            ]
        );
        assert_eq!(tokens[0].span, Span { start: 0, end: 12 });
        assert_eq!(tokens[2].span, Span { start: 15, end: 18 });
    }

    #[test]
    fn test_tokens_from_source_resolves_names() {
        let size = ColumnId::now_v7();
        let tokens = tokens_from_source("Size * (2 + 1)", |name| {
            (name == "Size").then_some(size)
        })
        .unwrap();
        assert_eq!(
            tokens,
            vec![
                FormulaToken::property(size),
                FormulaToken::operator("*"),
                FormulaToken::operator("("),
                FormulaToken::unit("2"),
                FormulaToken::operator("+"),
                FormulaToken::unit("1"),
                FormulaToken::operator(")"),
            ]
        );
    }

    #[test]
    fn test_unknown_column_reports_offset() {
        let err = tokens_from_source("2 * [Nope]", |_| None).unwrap_err();
        assert!(matches!(err, FormulaError::Malformed { position: 4, .. }));
    }

    #[test]
    fn test_lex_errors() {
        assert!(Lexer::new("[Size").tokenize().is_err());
        assert!(Lexer::new("[ ]").tokenize().is_err());
        assert!(Lexer::new("2 % 3").tokenize().is_err());
    }

    #[test]
    fn test_source_round_trip() {
        let size = ColumnId::now_v7();
        let source = source_from_tokens(
            &[
                FormulaToken::property(size),
                FormulaToken::operator("*"),
                FormulaToken::unit("2"),
            ],
            |id| (*id == size).then(|| "Size".to_string()),
        );
        assert_eq!(source, "[Size] * 2");
        let tokens = tokens_from_source(&source, |name| (name == "Size").then_some(size)).unwrap();
        assert_eq!(tokens.len(), 3);
    }
}
