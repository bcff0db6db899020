//! # SQL Dialect
//!
//! Lexer, parser and statement AST for the engine's query language:
//!
//! ```sql
//! CREATE TABLE t FROM FILE "rows.csv" USING INDEX btree("score")
//! CREATE MULTIMEDIA TABLE pics FROM FILE "pics.csv" USING image WITH METHOD bow CLUSTERS 64
//! SELECT a, b FROM t WHERE score BETWEEN 80 AND 90 LIMIT 20
//! SELECT * FROM t WHERE place IN ("47.61,-122.31", 5.0)
//! SELECT * FROM t WHERE body @@ "light love"
//! SELECT * FROM pics WHERE file <-> "query.png" METHOD inverted
//! INSERT INTO t VALUES ("x", 10, 2.5)
//! INSERT INTO t GENERATE_DATA(1000)
//! DELETE FROM t WHERE id = "o-17"
//! DROP TABLE t
//! ```
//!
//! Keywords are case-insensitive; string literals use double quotes;
//! numeric literals are unquoted.  The parser is a plain recursive
//! descent over the token stream — no precedence climbing is needed at
//! this grammar size.

pub mod lexer;
pub mod parser;

use thiserror::Error;

use crate::index::IndexKind;
use crate::media::KnnMethod;

pub use parser::parse;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Malformed SQL.
#[derive(Debug, Error)]
#[error("parse error at byte {position}: {message}")]
pub struct SqlError {
    /// Byte offset of the offending token.
    pub position: usize,
    /// Human-readable description.
    pub message: String,
}

impl SqlError {
    pub(crate) fn parse(position: usize, message: impl Into<String>) -> Self {
        Self { position, message: message.into() }
    }
}

// ------------------------------------------------------------------------------------------------
// AST
// ------------------------------------------------------------------------------------------------

/// A literal value in a predicate or `VALUES` list.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
}

impl Literal {
    /// The literal's raw textual form, as it would appear in a record
    /// field.
    pub fn render(&self) -> String {
        match self {
            Literal::Str(s) => s.clone(),
            Literal::Int(v) => v.to_string(),
            Literal::Float(v) => v.to_string(),
        }
    }
}

/// Argument of a spatial `IN` predicate: float radius or integer k.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpatialArg {
    /// Radius search (kilometres under haversine, plain units otherwise).
    Radius(f64),
    /// k-nearest-neighbour search.
    Knn(u64),
}

/// `WHERE` clause shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `f = v`
    Equals { field: String, value: Literal },
    /// `f BETWEEN a AND b`
    Between { field: String, lo: Literal, hi: Literal },
    /// `f IN ("lat,lon", r)` — radius if `r` is a float, kNN if an int.
    Spatial { field: String, point: String, arg: SpatialArg },
    /// `f @@ "query"` — text relevance.
    Match { field: String, query: String },
    /// `f <-> "path" [METHOD {inverted|sequential}]` — similarity.
    Similar { field: String, path: String, method: Option<KnnMethod> },
}

impl Predicate {
    /// The field the predicate constrains.
    pub fn field(&self) -> &str {
        match self {
            Predicate::Equals { field, .. }
            | Predicate::Between { field, .. }
            | Predicate::Spatial { field, .. }
            | Predicate::Match { field, .. }
            | Predicate::Similar { field, .. } => field,
        }
    }
}

/// Projection of a `SELECT`.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// `SELECT *`
    All,
    /// Explicit field list.
    Fields(Vec<String>),
}

/// Media flavour of a multimedia table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
}

/// One parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `CREATE TABLE name FROM FILE "path" USING INDEX kind(field…)`
    CreateTable {
        name: String,
        path: String,
        kind: IndexKind,
        fields: Vec<String>,
    },
    /// `CREATE MULTIMEDIA TABLE name FROM FILE "path" USING {image|audio}
    ///  WITH METHOD m CLUSTERS k`
    CreateMultimediaTable {
        name: String,
        path: String,
        media: MediaKind,
        method: String,
        clusters: u32,
    },
    /// `SELECT projection FROM name [WHERE predicate] [LIMIT n]`
    Select {
        projection: Projection,
        table: String,
        predicate: Option<Predicate>,
        limit: Option<u64>,
    },
    /// `INSERT INTO name VALUES (…)`
    Insert { table: String, values: Vec<Literal> },
    /// `INSERT INTO name GENERATE_DATA(n)`
    InsertGenerate { table: String, count: u64 },
    /// `DELETE FROM name WHERE f = v`
    Delete { table: String, field: String, value: Literal },
    /// `DROP TABLE name`
    DropTable { name: String },
}
