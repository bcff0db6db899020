//! Recursive-descent parser over the token stream.

use std::str::FromStr;

use crate::index::IndexKind;
use crate::media::KnnMethod;

use super::lexer::{Spanned, Token, lex};
use super::{Literal, MediaKind, Predicate, Projection, SpatialArg, SqlError, Statement};

/// Parse one statement.
pub fn parse(input: &str) -> Result<Statement, SqlError> {
    let tokens = lex(input)?;
    let mut parser = Parser { tokens, pos: 0, input_len: input.len() };
    let statement = parser.statement()?;
    parser.eat_optional_semicolon();
    parser.expect_end()?;
    Ok(statement)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    input_len: usize,
}

impl Parser {
    // --------------------------------------------------------------------------------------------
    // Statements
    // --------------------------------------------------------------------------------------------

    fn statement(&mut self) -> Result<Statement, SqlError> {
        let word = self.peek_keyword().unwrap_or_default();
        match word.as_str() {
            "CREATE" => self.create(),
            "SELECT" => self.select(),
            "INSERT" => self.insert(),
            "DELETE" => self.delete(),
            "DROP" => self.drop(),
            _ => Err(self.error_here("expected CREATE, SELECT, INSERT, DELETE or DROP")),
        }
    }

    fn create(&mut self) -> Result<Statement, SqlError> {
        self.expect_keyword("CREATE")?;
        if self.peek_is_keyword("MULTIMEDIA") {
            return self.create_multimedia();
        }
        self.expect_keyword("TABLE")?;
        let name = self.ident()?;
        self.expect_keyword("FROM")?;
        self.expect_keyword("FILE")?;
        let path = self.string()?;
        self.expect_keyword("USING")?;
        self.expect_keyword("INDEX")?;

        let kind_word = self.ident()?;
        let kind = IndexKind::from_str(&kind_word)
            .map_err(|e| self.error_here(e))?;

        self.expect(Token::LParen)?;
        let mut fields = vec![self.name_or_string()?];
        while self.eat(Token::Comma) {
            fields.push(self.name_or_string()?);
        }
        self.expect(Token::RParen)?;

        Ok(Statement::CreateTable { name, path, kind, fields })
    }

    fn create_multimedia(&mut self) -> Result<Statement, SqlError> {
        self.expect_keyword("MULTIMEDIA")?;
        self.expect_keyword("TABLE")?;
        let name = self.ident()?;
        self.expect_keyword("FROM")?;
        self.expect_keyword("FILE")?;
        let path = self.string()?;
        self.expect_keyword("USING")?;

        let media_word = self.ident()?;
        let media = match media_word.to_ascii_uppercase().as_str() {
            "IMAGE" => MediaKind::Image,
            "AUDIO" => MediaKind::Audio,
            other => {
                return Err(self.error_here(format!("expected image or audio, got {other:?}")));
            }
        };

        self.expect_keyword("WITH")?;
        self.expect_keyword("METHOD")?;
        let method = self.name_or_string()?;
        self.expect_keyword("CLUSTERS")?;
        let clusters = self.unsigned()? as u32;

        Ok(Statement::CreateMultimediaTable { name, path, media, method, clusters })
    }

    fn select(&mut self) -> Result<Statement, SqlError> {
        self.expect_keyword("SELECT")?;

        let projection = if self.eat(Token::Star) {
            Projection::All
        } else {
            let mut fields = vec![self.name_or_string()?];
            while self.eat(Token::Comma) {
                fields.push(self.name_or_string()?);
            }
            Projection::Fields(fields)
        };

        self.expect_keyword("FROM")?;
        let table = self.ident()?;

        let predicate = if self.eat_keyword("WHERE") {
            Some(self.predicate()?)
        } else {
            None
        };

        let limit = if self.eat_keyword("LIMIT") {
            Some(self.unsigned()?)
        } else {
            None
        };

        Ok(Statement::Select { projection, table, predicate, limit })
    }

    fn insert(&mut self) -> Result<Statement, SqlError> {
        self.expect_keyword("INSERT")?;
        self.expect_keyword("INTO")?;
        let table = self.ident()?;

        if self.eat_keyword("GENERATE_DATA") {
            self.expect(Token::LParen)?;
            let count = self.unsigned()?;
            self.expect(Token::RParen)?;
            return Ok(Statement::InsertGenerate { table, count });
        }

        self.expect_keyword("VALUES")?;
        self.expect(Token::LParen)?;
        let mut values = vec![self.literal()?];
        while self.eat(Token::Comma) {
            values.push(self.literal()?);
        }
        self.expect(Token::RParen)?;

        Ok(Statement::Insert { table, values })
    }

    fn delete(&mut self) -> Result<Statement, SqlError> {
        self.expect_keyword("DELETE")?;
        self.expect_keyword("FROM")?;
        let table = self.ident()?;
        self.expect_keyword("WHERE")?;
        let field = self.name_or_string()?;
        self.expect(Token::Eq)?;
        let value = self.literal()?;
        Ok(Statement::Delete { table, field, value })
    }

    fn drop(&mut self) -> Result<Statement, SqlError> {
        self.expect_keyword("DROP")?;
        self.expect_keyword("TABLE")?;
        let name = self.ident()?;
        Ok(Statement::DropTable { name })
    }

    // --------------------------------------------------------------------------------------------
    // Predicates
    // --------------------------------------------------------------------------------------------

    fn predicate(&mut self) -> Result<Predicate, SqlError> {
        let field = self.name_or_string()?;

        if self.eat(Token::Eq) {
            let value = self.literal()?;
            return Ok(Predicate::Equals { field, value });
        }
        if self.eat_keyword("BETWEEN") {
            let lo = self.literal()?;
            self.expect_keyword("AND")?;
            let hi = self.literal()?;
            return Ok(Predicate::Between { field, lo, hi });
        }
        if self.eat_keyword("IN") {
            self.expect(Token::LParen)?;
            let point = self.string()?;
            self.expect(Token::Comma)?;
            let arg = match self.next_token()? {
                (Token::Float(r), _) => SpatialArg::Radius(r),
                (Token::Int(k), position) => {
                    if k < 0 {
                        return Err(SqlError::parse(position, "kNN count must be non-negative"));
                    }
                    SpatialArg::Knn(k as u64)
                }
                (_, position) => {
                    return Err(SqlError::parse(position, "expected a radius or a kNN count"));
                }
            };
            self.expect(Token::RParen)?;
            return Ok(Predicate::Spatial { field, point, arg });
        }
        if self.eat(Token::AtAt) {
            let query = self.string()?;
            return Ok(Predicate::Match { field, query });
        }
        if self.eat(Token::Arrow) {
            let path = self.string()?;
            let method = if self.eat_keyword("METHOD") {
                let word = self.ident()?;
                Some(match word.to_ascii_uppercase().as_str() {
                    "INVERTED" => KnnMethod::Inverted,
                    "SEQUENTIAL" => KnnMethod::Sequential,
                    other => {
                        return Err(
                            self.error_here(format!("unknown method {other:?}, expected inverted or sequential"))
                        );
                    }
                })
            } else {
                None
            };
            return Ok(Predicate::Similar { field, path, method });
        }

        Err(self.error_here("expected =, BETWEEN, IN, @@ or <-> after field"))
    }

    // --------------------------------------------------------------------------------------------
    // Token plumbing
    // --------------------------------------------------------------------------------------------

    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn next_token(&mut self) -> Result<(Token, usize), SqlError> {
        match self.tokens.get(self.pos) {
            Some(spanned) => {
                self.pos += 1;
                Ok((spanned.token.clone(), spanned.position))
            }
            None => Err(SqlError::parse(self.input_len, "unexpected end of statement")),
        }
    }

    fn peek_keyword(&self) -> Option<String> {
        match self.peek() {
            Some(Spanned { token: Token::Ident(word), .. }) => {
                Some(word.to_ascii_uppercase())
            }
            _ => None,
        }
    }

    fn peek_is_keyword(&self, keyword: &str) -> bool {
        self.peek_keyword().as_deref() == Some(keyword)
    }

    fn eat(&mut self, token: Token) -> bool {
        if self.peek().map(|s| &s.token) == Some(&token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_is_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_optional_semicolon(&mut self) {
        self.eat(Token::Semicolon);
    }

    fn expect(&mut self, token: Token) -> Result<(), SqlError> {
        let (got, position) = self.next_token()?;
        if got == token {
            Ok(())
        } else {
            Err(SqlError::parse(position, format!("expected {token:?}, got {got:?}")))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), SqlError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error_here(format!("expected {keyword}")))
        }
    }

    fn expect_end(&self) -> Result<(), SqlError> {
        match self.peek() {
            None => Ok(()),
            Some(spanned) => Err(SqlError::parse(
                spanned.position,
                format!("unexpected trailing {:?}", spanned.token),
            )),
        }
    }

    fn ident(&mut self) -> Result<String, SqlError> {
        match self.next_token()? {
            (Token::Ident(word), _) => Ok(word),
            (got, position) => {
                Err(SqlError::parse(position, format!("expected a name, got {got:?}")))
            }
        }
    }

    /// A field name: bare identifier or quoted string.
    fn name_or_string(&mut self) -> Result<String, SqlError> {
        match self.next_token()? {
            (Token::Ident(word), _) => Ok(word),
            (Token::Str(s), _) => Ok(s),
            (got, position) => {
                Err(SqlError::parse(position, format!("expected a name, got {got:?}")))
            }
        }
    }

    fn string(&mut self) -> Result<String, SqlError> {
        match self.next_token()? {
            (Token::Str(s), _) => Ok(s),
            (got, position) => {
                Err(SqlError::parse(position, format!("expected a string literal, got {got:?}")))
            }
        }
    }

    fn unsigned(&mut self) -> Result<u64, SqlError> {
        match self.next_token()? {
            (Token::Int(v), position) => {
                u64::try_from(v).map_err(|_| {
                    SqlError::parse(position, "expected a non-negative integer")
                })
            }
            (got, position) => {
                Err(SqlError::parse(position, format!("expected an integer, got {got:?}")))
            }
        }
    }

    fn literal(&mut self) -> Result<Literal, SqlError> {
        match self.next_token()? {
            (Token::Str(s), _) => Ok(Literal::Str(s)),
            (Token::Int(v), _) => Ok(Literal::Int(v)),
            (Token::Float(v), _) => Ok(Literal::Float(v)),
            (got, position) => {
                Err(SqlError::parse(position, format!("expected a literal, got {got:?}")))
            }
        }
    }

    fn error_here(&self, message: impl Into<String>) -> SqlError {
        let position = self.peek().map_or(self.input_len, |s| s.position);
        SqlError::parse(position, message)
    }
}
