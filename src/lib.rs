//! # MosaicDB
//!
//! A self-contained, embeddable **multimodal database engine**: indexed
//! storage and query over tabular, textual and multimedia (image/audio)
//! data, driven by a small SQL dialect.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        Engine + SQL                       │
//! │   parse → validate → dispatch to the table's index        │
//! │  ┌───────────┐ ┌──────────────────────┐ ┌──────────────┐  │
//! │  │  Record   │ │   Key indexes        │ │  Similarity  │  │
//! │  │  store    │ │  sequential / isam   │ │  text (SPIMI)│  │
//! │  │ (rid → …) │ │  hash / btree / rtree│ │  media (BoW) │  │
//! │  └─────┬─────┘ └──────────┬───────────┘ └──────┬───────┘  │
//! │        │   rehydrate      │  (key, rid)        │ ranked   │
//! │        └──────────────────┴────────────────────┘ doc ids  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Table registry, SQL dispatch, result materialization |
//! | [`sql`] | Lexer and parser for the query dialect |
//! | [`record`] | Fixed-width paged record store (single source of truth for rids) |
//! | [`index`] | Key index family: sequential+aux, ISAM-2, extendible hash, B+ tree, R-tree |
//! | [`text`] | SPIMI inverted text index with TF–IDF cosine ranking |
//! | [`media`] | Bag-of-visual/acoustic-words multimedia index with kNN retrieval |
//! | [`encoding`] | Deterministic binary wire format for on-disk artifacts |
//!
//! ## Key Properties
//!
//! - **Stable rids** — a record's identifier never changes during the life
//!   of its table; every index resolves back through the record store.
//! - **Crash-safe rebuilds** — every index rebuild or merge writes to a
//!   temporary file, fsyncs, and renames into place.
//! - **Checksummed artifacts** — every persisted file carries a magic,
//!   a version, and CRC32-protected payload blocks.
//! - **Single-writer, multi-reader** — per-table shared/exclusive locking;
//!   each statement is its own unit of work.
//! - **Deterministic ranking** — text and multimedia top-k results break
//!   score ties by ascending document/asset id.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mosaicdb::engine::{Engine, EngineConfig};
//!
//! let engine = Engine::open("/tmp/my_db", EngineConfig::default()).unwrap();
//!
//! engine
//!     .execute(r#"CREATE TABLE students FROM FILE "students.csv" USING INDEX btree("math_score")"#)
//!     .unwrap();
//!
//! let out = engine
//!     .execute("SELECT * FROM students WHERE math_score BETWEEN 80 AND 90")
//!     .unwrap();
//!
//! for row in &out.rows {
//!     println!("{row:?}");
//! }
//! ```

pub mod encoding;
pub mod engine;
pub mod fs;
pub mod index;
pub mod media;
pub mod record;
pub mod sql;
pub mod stop;
pub mod text;
