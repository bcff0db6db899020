//! Hand-rolled scanner for the query dialect.
//!
//! Keywords are not distinguished here — identifiers are matched
//! case-insensitively by the parser, so `select`, `SELECT` and `Select`
//! all work.  String literals use double quotes with `""` as the escape
//! for an embedded quote.

use super::SqlError;

/// One lexical token, with its byte position for error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Bare word: keyword, table or field name.
    Ident(String),
    /// Double-quoted string literal.
    Str(String),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `,`
    Comma,
    /// `*`
    Star,
    /// `=`
    Eq,
    /// `@@` — text relevance match.
    AtAt,
    /// `<->` — multimedia similarity.
    Arrow,
    /// `;`
    Semicolon,
}

/// Token plus the byte offset it started at.
#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

/// Scan the whole statement into tokens.
pub fn lex(input: &str) -> Result<Vec<Spanned>, SqlError> {
    let bytes: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let position = i;
        match c {
            '(' => {
                tokens.push(Spanned { token: Token::LParen, position });
                i += 1;
            }
            ')' => {
                tokens.push(Spanned { token: Token::RParen, position });
                i += 1;
            }
            ',' => {
                tokens.push(Spanned { token: Token::Comma, position });
                i += 1;
            }
            '*' => {
                tokens.push(Spanned { token: Token::Star, position });
                i += 1;
            }
            '=' => {
                tokens.push(Spanned { token: Token::Eq, position });
                i += 1;
            }
            ';' => {
                tokens.push(Spanned { token: Token::Semicolon, position });
                i += 1;
            }
            '@' => {
                if bytes.get(i + 1) == Some(&'@') {
                    tokens.push(Spanned { token: Token::AtAt, position });
                    i += 2;
                } else {
                    return Err(SqlError::parse(position, "expected '@@'"));
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&'-') && bytes.get(i + 2) == Some(&'>') {
                    tokens.push(Spanned { token: Token::Arrow, position });
                    i += 3;
                } else {
                    return Err(SqlError::parse(position, "expected '<->'"));
                }
            }
            '"' => {
                let mut value = String::new();
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => {
                            return Err(SqlError::parse(position, "unterminated string literal"));
                        }
                        Some('"') if bytes.get(i + 1) == Some(&'"') => {
                            value.push('"');
                            i += 2;
                        }
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Spanned { token: Token::Str(value), position });
            }
            _ if c.is_ascii_digit() || c == '-' || c == '+' => {
                let mut end = i + 1;
                let mut is_float = false;
                while end < bytes.len()
                    && (bytes[end].is_ascii_digit() || bytes[end] == '.' || bytes[end] == 'e'
                        || bytes[end] == 'E'
                        || ((bytes[end] == '-' || bytes[end] == '+')
                            && (bytes[end - 1] == 'e' || bytes[end - 1] == 'E')))
                {
                    if bytes[end] == '.' || bytes[end] == 'e' || bytes[end] == 'E' {
                        is_float = true;
                    }
                    end += 1;
                }
                let raw: String = bytes[i..end].iter().collect();
                let token = if is_float {
                    Token::Float(raw.parse::<f64>().map_err(|_| {
                        SqlError::parse(position, format!("bad float literal {raw:?}"))
                    })?)
                } else {
                    Token::Int(raw.parse::<i64>().map_err(|_| {
                        SqlError::parse(position, format!("bad integer literal {raw:?}"))
                    })?)
                };
                tokens.push(Spanned { token, position });
                i = end;
            }
            _ if c.is_alphanumeric() || c == '_' => {
                let mut end = i + 1;
                while end < bytes.len() && (bytes[end].is_alphanumeric() || bytes[end] == '_') {
                    end += 1;
                }
                let word: String = bytes[i..end].iter().collect();
                tokens.push(Spanned { token: Token::Ident(word), position });
                i = end;
            }
            other => {
                return Err(SqlError::parse(position, format!("unexpected character {other:?}")));
            }
        }
    }

    Ok(tokens)
}
