//! # Engine & SQL Dispatch
//!
//! The engine owns the table registry, parses incoming statements, and
//! routes each operation to the table's primary index:
//!
//! ```text
//! SQL text → tokens → Statement → dispatch → index → rids / ranked ids
//!                                            → record store → rows
//! ```
//!
//! ## Concurrency Model
//!
//! The registry is a guarded map `name → Arc<RwLock<Table>>`.  Each table
//! is **single-writer, multi-reader**: `SELECT` takes the table's shared
//! lock; `CREATE`, `INSERT`, `DELETE` and index merges run under the
//! exclusive lock.  There are no cross-table transactions — every
//! statement is its own unit of work.
//!
//! ## Dispatch Rule
//!
//! A predicate is served by the table's single primary index when it
//! names the indexed field and the index supports the operation; a
//! predicate kind the index cannot serve fails fast with
//! `UnsupportedPredicate` (range on hash, text on btree, …).  Equality
//! and range predicates over other *existing* fields fall back to a full
//! scan with a typed filter; a field absent from the schema is
//! `UnknownField`, loudly.
//!
//! ## Result Surface
//!
//! Every statement returns [`QueryOutput`] — `{columns, rows, count,
//! elapsed}` — or an [`EngineError`] whose `kind()` matches the
//! documented error surface.  A point search that finds nothing is
//! **not** an error: it returns an empty result set.

pub mod ingest;
pub mod meta;
mod table;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::index::IndexError;
use crate::media::MediaIndexError;
use crate::media::extractor::{FeatureExtractor, default_extractors};
use crate::record::RecordStoreError;
use crate::sql::{self, Predicate, Projection, SpatialArg, Statement};
use crate::stop::StopSignal;
use crate::text::TextIndexError;
use crate::text::tokenizer::Language;

pub use table::Table;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// The user-visible error surface.  `kind()` yields the wire name.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed SQL.
    #[error("{0}")]
    Parse(String),

    /// The statement names a table that does not exist.
    #[error("unknown table {0:?}")]
    UnknownTable(String),

    /// The statement names a field absent from the schema.
    #[error("unknown field {0:?}")]
    UnknownField(String),

    /// Predicate kind ↔ index kind mismatch.
    #[error("{0}")]
    UnsupportedPredicate(String),

    /// Insert would violate a declared uniqueness constraint.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Underlying storage failure; the statement aborted with no partial
    /// on-disk state.
    #[error("I/O error: {0}")]
    Io(String),

    /// Ingestion or codebook construction failure.
    #[error("build error: {0}")]
    Build(String),
}

impl EngineError {
    /// Wire-format error kind, surfaced verbatim to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Parse(_) => "ParseError",
            EngineError::UnknownTable(_) => "UnknownTable",
            EngineError::UnknownField(_) => "UnknownField",
            EngineError::UnsupportedPredicate(_) => "UnsupportedPredicate",
            EngineError::DuplicateKey(_) => "DuplicateKey",
            EngineError::Io(_) => "IOError",
            EngineError::Build(_) => "BuildError",
        }
    }

    /// `{error: {kind, message}}` — the failure half of the surface.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": { "kind": self.kind(), "message": self.to_string() }
        })
    }

    pub(crate) fn from_index(e: IndexError) -> Self {
        match e {
            IndexError::DuplicateKey(key) => EngineError::DuplicateKey(key),
            IndexError::BadKey(message) => EngineError::Parse(message),
            // NotFound never crosses this boundary: the index layer's
            // point searches return empty sets instead.
            other => EngineError::Io(other.to_string()),
        }
    }

    pub(crate) fn from_store(e: RecordStoreError) -> Self {
        match e {
            RecordStoreError::FieldTooWide { .. } | RecordStoreError::FieldCountMismatch { .. } => {
                EngineError::Build(e.to_string())
            }
            other => EngineError::Io(other.to_string()),
        }
    }

    pub(crate) fn from_text(e: TextIndexError) -> Self {
        EngineError::Io(e.to_string())
    }

    pub(crate) fn from_media(e: MediaIndexError) -> Self {
        match e {
            MediaIndexError::Extractor(_)
            | MediaIndexError::ExtractorMismatch { .. }
            | MediaIndexError::DimensionMismatch { .. } => EngineError::Build(e.to_string()),
            other => EngineError::Io(other.to_string()),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Configuration & output
// ------------------------------------------------------------------------------------------------

/// Engine-wide tuning knobs, applied to tables at creation time.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// B+ tree order (max children per node).
    pub btree_order: usize,
    /// ISAM entries per data page.
    pub isam_block_factor: u32,
    /// Extendible hash entries per bucket page.
    pub hash_bucket_size: u32,
    /// Sequential-index merge threshold; `None` = `max(8, |main| / 10)`.
    pub sequential_rebuild_threshold: Option<u64>,
    /// SPIMI in-memory posting budget before a block spills.
    pub spimi_memory_budget: usize,
    /// R-tree max entries per node.
    pub rtree_max_entries: usize,
    /// Language profile for text normalization.
    pub language: Language,
    /// `LIMIT` when the statement does not carry one.
    pub default_limit: u64,
    /// Seed for codebook training and synthetic data.
    pub kmeans_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            btree_order: crate::index::btree::BTREE_DEFAULT_ORDER,
            isam_block_factor: crate::index::isam::ISAM_DEFAULT_BLOCK_FACTOR,
            hash_bucket_size: crate::index::hash::HASH_DEFAULT_BUCKET_SIZE,
            sequential_rebuild_threshold: None,
            spimi_memory_budget: crate::text::builder::SPIMI_DEFAULT_MEMORY_BUDGET,
            rtree_max_entries: crate::index::rtree::RTREE_DEFAULT_MAX_ENTRIES,
            language: Language::English,
            default_limit: 10,
            kmeans_seed: 0x5EED,
        }
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// The success half of the statement surface.
#[derive(Debug, Serialize)]
pub struct QueryOutput {
    /// Column names, including any appended ranking column.
    pub columns: Vec<String>,
    /// Materialized rows, all fields rendered as text.
    pub rows: Vec<Vec<String>>,
    /// Rows returned for reads; rows affected for writes.
    pub count: usize,
    /// Wall-clock execution time in seconds.
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

/// Per-table statistics snapshot.
#[derive(Debug, Serialize)]
pub struct TableStats {
    pub name: String,
    pub index_kind: String,
    pub record_slots: u64,
}

/// Engine statistics snapshot returned by [`Engine::stats`].
#[derive(Debug, Serialize)]
pub struct EngineStats {
    pub tables: Vec<TableStats>,
}

/// `(columns, rows, count)` before timing is attached.
type StatementOut = (Vec<String>, Vec<Vec<String>>, usize);

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

struct EngineShared {
    root: PathBuf,
    config: EngineConfig,
    tables: RwLock<HashMap<String, Arc<RwLock<Table>>>>,
    extractors: RwLock<HashMap<String, Arc<dyn FeatureExtractor>>>,
}

/// The engine handle.  Cheap to clone; all clones share one registry.
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl Engine {
    /// Open (or create) an engine rooted at `path`.  Existing table
    /// directories (those carrying a valid `meta.json`) are reopened.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| EngineError::Io(e.to_string()))?;

        let extractors = default_extractors();
        let mut tables = HashMap::new();
        for entry in std::fs::read_dir(&root).map_err(|e| EngineError::Io(e.to_string()))? {
            let entry = entry.map_err(|e| EngineError::Io(e.to_string()))?;
            let dir = entry.path();
            if !dir.is_dir() || !dir.join("meta.json").is_file() {
                continue;
            }
            match Table::open(&dir, &config, &extractors) {
                Ok(table) => {
                    tables.insert(table.meta.name.clone(), Arc::new(RwLock::new(table)));
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable table");
                }
            }
        }
        info!(root = %root.display(), tables = tables.len(), "engine opened");

        Ok(Self {
            shared: Arc::new(EngineShared {
                root,
                config,
                tables: RwLock::new(tables),
                extractors: RwLock::new(extractors),
            }),
        })
    }

    /// Register a feature extractor under a method name for
    /// `CREATE MULTIMEDIA TABLE … WITH METHOD <name>`.
    pub fn register_extractor(&self, method: &str, extractor: Arc<dyn FeatureExtractor>) {
        if let Ok(mut map) = self.shared.extractors.write() {
            map.insert(method.to_string(), extractor);
        }
    }

    /// Parse and execute one statement.
    pub fn execute(&self, statement: &str) -> Result<QueryOutput, EngineError> {
        self.execute_with(statement, &StopSignal::default())
    }

    /// Parse and execute one statement under a cancellation signal.
    pub fn execute_with(
        &self,
        statement: &str,
        stop: &StopSignal,
    ) -> Result<QueryOutput, EngineError> {
        let started = Instant::now();
        let parsed = sql::parse(statement).map_err(|e| EngineError::Parse(e.to_string()))?;

        let (columns, rows, count) = match parsed {
            Statement::CreateTable { name, path, kind, fields } => {
                self.create_table(&name, &path, kind, fields, stop)?
            }
            Statement::CreateMultimediaTable { name, path, media, method, clusters } => {
                self.create_multimedia(&name, &path, media, &method, clusters, stop)?
            }
            Statement::Select { projection, table, predicate, limit } => {
                self.select(&table, projection, predicate, limit, stop)?
            }
            Statement::Insert { table, values } => {
                let table = self.table(&table)?;
                let mut guard = write_lock(&table)?;
                let fields: Vec<String> = values.iter().map(|v| v.render()).collect();
                guard.insert_row(fields, stop)?;
                (vec!["inserted".to_string()], vec![vec!["1".to_string()]], 1)
            }
            Statement::InsertGenerate { table, count } => {
                let table = self.table(&table)?;
                let mut guard = write_lock(&table)?;
                let seed = self.shared.config.kmeans_seed ^ count;
                let inserted = guard.generate_rows(count, seed, stop)?;
                (
                    vec!["inserted".to_string()],
                    vec![vec![inserted.to_string()]],
                    inserted as usize,
                )
            }
            Statement::Delete { table, field, value } => {
                let table = self.table(&table)?;
                let mut guard = write_lock(&table)?;
                let removed = guard.delete_where(&field, &value, stop)?;
                (
                    vec!["deleted".to_string()],
                    vec![vec![removed.len().to_string()]],
                    removed.len(),
                )
            }
            Statement::DropTable { name } => {
                self.drop_table(&name)?;
                (vec!["dropped".to_string()], vec![vec![name]], 1)
            }
        };

        Ok(QueryOutput { columns, rows, count, elapsed: started.elapsed() })
    }

    /// Statistics across all registered tables.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let registry = self
            .shared
            .tables
            .read()
            .map_err(|_| EngineError::Io("registry lock poisoned".into()))?;
        let mut tables = Vec::with_capacity(registry.len());
        for table in registry.values() {
            let guard = read_lock(table)?;
            tables.push(TableStats {
                name: guard.meta.name.clone(),
                index_kind: guard
                    .meta
                    .index_kind
                    .map_or_else(|| "multimedia".to_string(), |k| k.to_string()),
                record_slots: guard.slot_count(),
            });
        }
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(EngineStats { tables })
    }

    // --------------------------------------------------------------------------------------------
    // Statement handlers
    // --------------------------------------------------------------------------------------------

    fn create_table(
        &self,
        name: &str,
        path: &str,
        kind: crate::index::IndexKind,
        fields: Vec<String>,
        stop: &StopSignal,
    ) -> Result<StatementOut, EngineError> {
        let mut registry = self
            .shared
            .tables
            .write()
            .map_err(|_| EngineError::Io("registry lock poisoned".into()))?;
        if registry.contains_key(name) {
            return Err(EngineError::Build(format!("table {name:?} already exists")));
        }

        let rowset = ingest::read_delimited(path)?;
        let dir = self.shared.root.join(name);
        let table = Table::create_regular(
            &dir,
            name,
            path,
            rowset.headers,
            rowset.rows,
            kind,
            fields,
            &self.shared.config,
            stop,
        )?;
        let records = table.slot_count() as usize;
        registry.insert(name.to_string(), Arc::new(RwLock::new(table)));

        Ok((
            vec!["table".to_string(), "records".to_string()],
            vec![vec![name.to_string(), records.to_string()]],
            records,
        ))
    }

    fn create_multimedia(
        &self,
        name: &str,
        path: &str,
        media: crate::sql::MediaKind,
        method: &str,
        clusters: u32,
        stop: &StopSignal,
    ) -> Result<StatementOut, EngineError> {
        let extractor = {
            let extractors = self
                .shared
                .extractors
                .read()
                .map_err(|_| EngineError::Io("extractor lock poisoned".into()))?;
            extractors.get(method).cloned().ok_or_else(|| {
                EngineError::Build(format!("no extractor registered for method {method:?}"))
            })?
        };

        let mut registry = self
            .shared
            .tables
            .write()
            .map_err(|_| EngineError::Io("registry lock poisoned".into()))?;
        if registry.contains_key(name) {
            return Err(EngineError::Build(format!("table {name:?} already exists")));
        }

        let rowset = ingest::read_delimited(path)?;
        let dir = self.shared.root.join(name);
        let kind = match media {
            crate::sql::MediaKind::Image => "image",
            crate::sql::MediaKind::Audio => "audio",
        };
        let table = Table::create_media(
            &dir,
            name,
            path,
            rowset.headers,
            rowset.rows,
            kind,
            method,
            clusters,
            extractor,
            &self.shared.config,
            stop,
        )?;
        let records = table.slot_count() as usize;
        registry.insert(name.to_string(), Arc::new(RwLock::new(table)));

        Ok((
            vec!["table".to_string(), "records".to_string()],
            vec![vec![name.to_string(), records.to_string()]],
            records,
        ))
    }

    fn select(
        &self,
        table: &str,
        projection: Projection,
        predicate: Option<Predicate>,
        limit: Option<u64>,
        stop: &StopSignal,
    ) -> Result<StatementOut, EngineError> {
        let table = self.table(table)?;
        let guard = read_lock(&table)?;
        let limit = limit.unwrap_or(self.shared.config.default_limit) as usize;

        // Resolve the projection before touching any index.
        let projected: Vec<usize> = match &projection {
            Projection::All => (0..guard.meta.headers.len()).collect(),
            Projection::Fields(fields) => fields
                .iter()
                .map(|f| guard.meta.require_field(f))
                .collect::<Result<Vec<usize>, EngineError>>()?,
        };
        let mut columns: Vec<String> =
            projected.iter().map(|i| guard.meta.headers[*i].clone()).collect();

        // Plain rid lists keep their emission order; ranked predicates
        // carry a score column.
        let (rids, scores): (Vec<u64>, Option<(String, Vec<f64>)>) = match &predicate {
            None => (guard.scan_all_rids(stop)?, None),
            Some(Predicate::Equals { field, value }) => {
                (guard.select_equals(field, value, stop)?, None)
            }
            Some(Predicate::Between { field, lo, hi }) => {
                (guard.select_between(field, lo, hi, stop)?, None)
            }
            Some(Predicate::Spatial { field, point, arg }) => {
                let hits = guard.select_spatial(field, point, *arg, stop)?;
                let hits: Vec<(u64, f64)> = match arg {
                    SpatialArg::Knn(_) => hits,
                    SpatialArg::Radius(_) => hits.into_iter().take(limit).collect(),
                };
                let (rids, dists): (Vec<u64>, Vec<f64>) = hits.into_iter().unzip();
                (rids, Some(("distance".to_string(), dists)))
            }
            Some(Predicate::Match { field, query }) => {
                let hits = guard.select_match(field, query, limit, stop)?;
                let (rids, scores): (Vec<u64>, Vec<f64>) = hits.into_iter().unzip();
                (rids, Some(("score".to_string(), scores)))
            }
            Some(Predicate::Similar { field, path, method }) => {
                let hits = guard.select_similar(field, path, *method, limit, stop)?;
                let (rids, scores): (Vec<u64>, Vec<f64>) = hits.into_iter().unzip();
                (rids, Some(("score".to_string(), scores)))
            }
        };

        let mut rows = Vec::new();
        match scores {
            None => {
                for (_, fields) in guard.rehydrate(&rids)?.into_iter().take(limit) {
                    rows.push(projected.iter().map(|i| fields[*i].clone()).collect());
                }
            }
            Some((score_column, scores)) => {
                columns.push(score_column);
                let materialized = guard.rehydrate(&rids)?;
                let mut by_rid: HashMap<u64, Vec<String>> = materialized.into_iter().collect();
                for (rid, score) in rids.iter().zip(scores) {
                    let Some(fields) = by_rid.remove(rid) else {
                        continue; // tombstoned under the index; already logged
                    };
                    let mut row: Vec<String> =
                        projected.iter().map(|i| fields[*i].clone()).collect();
                    row.push(format!("{score:.6}"));
                    rows.push(row);
                }
            }
        }

        let count = rows.len();
        Ok((columns, rows, count))
    }

    fn drop_table(&self, name: &str) -> Result<(), EngineError> {
        let mut registry = self
            .shared
            .tables
            .write()
            .map_err(|_| EngineError::Io("registry lock poisoned".into()))?;
        let Some(table) = registry.remove(name) else {
            return Err(EngineError::UnknownTable(name.to_string()));
        };
        drop(registry);

        match Arc::try_unwrap(table) {
            Ok(lock) => {
                let table = lock
                    .into_inner()
                    .map_err(|_| EngineError::Io("table lock poisoned".into()))?;
                table.destroy()?;
            }
            Err(shared) => {
                // A concurrent reader still holds the handle; wait for the
                // exclusive lock, then remove the artifacts.
                let guard = write_lock(&shared)?;
                let dir = self.shared.root.join(&guard.meta.name);
                drop(guard);
                std::fs::remove_dir_all(dir).map_err(|e| EngineError::Io(e.to_string()))?;
            }
        }
        info!(table = name, "table dropped");
        Ok(())
    }

    fn table(&self, name: &str) -> Result<Arc<RwLock<Table>>, EngineError> {
        let registry = self
            .shared
            .tables
            .read()
            .map_err(|_| EngineError::Io("registry lock poisoned".into()))?;
        registry
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownTable(name.to_string()))
    }
}

fn read_lock(
    table: &Arc<RwLock<Table>>,
) -> Result<std::sync::RwLockReadGuard<'_, Table>, EngineError> {
    table
        .read()
        .map_err(|_| EngineError::Io("table lock poisoned".into()))
}

fn write_lock(
    table: &Arc<RwLock<Table>>,
) -> Result<std::sync::RwLockWriteGuard<'_, Table>, EngineError> {
    table
        .write()
        .map_err(|_| EngineError::Io("table lock poisoned".into()))
}
