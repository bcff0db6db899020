//! Table metadata — the `meta.json` artifact.
//!
//! Written last during table creation (a directory without a valid
//! `meta.json` is not a table) and atomically rewritten on schema-level
//! changes.  Everything the engine needs to reopen a table lives here:
//! schema, widths, index binding, language profile, extractor identity.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::fs::atomic_write;
use crate::index::{FieldType, IndexKind};
use crate::text::tokenizer::Language;

/// Multimedia binding of a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaMeta {
    /// `image` or `audio` — informational; the extractor defines the
    /// actual descriptor space.
    pub kind: String,
    /// Registered method name the table was created with.
    pub method: String,
    /// Codebook size (`CLUSTERS`).
    pub clusters: u32,
    /// Extractor identity `(name/version;params)` bound at build time.
    pub extractor_id: String,
    /// The field holding asset paths.
    pub path_field: String,
}

/// Schema and index binding of one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    /// Table name (also the directory name).
    pub name: String,
    /// Ordered field names from the source header row.
    pub headers: Vec<String>,
    /// Declared field types, inferred at ingestion.
    pub types: Vec<FieldType>,
    /// Padded byte width of each field.
    pub widths: Vec<u32>,
    /// The source file the table was created from.
    pub source_file: String,
    /// Primary index kind; `None` for multimedia tables.
    pub index_kind: Option<IndexKind>,
    /// Field(s) the index is bound to (several only for spimi).
    pub index_fields: Vec<String>,
    /// Language profile for text normalization.
    pub language: Language,
    /// Whether the index enforces key uniqueness (hash only).
    pub unique: bool,
    /// Whether R-tree distances are geographic (haversine, km).
    pub geographic: bool,
    /// Multimedia binding, when present.
    pub media: Option<MediaMeta>,
}

impl TableMeta {
    /// Position of a field, or `None` if the schema has no such field.
    pub fn field_position(&self, field: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.eq_ignore_ascii_case(field))
    }

    /// Position of a field, surfacing `UnknownField` when absent.
    pub fn require_field(&self, field: &str) -> Result<usize, EngineError> {
        self.field_position(field)
            .ok_or_else(|| EngineError::UnknownField(field.to_string()))
    }

    /// Load `meta.json` from a table directory.
    pub fn load(dir: &Path) -> Result<Self, EngineError> {
        let bytes = std::fs::read(dir.join("meta.json"))
            .map_err(|e| EngineError::Io(format!("meta.json: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| EngineError::Io(format!("meta.json: {e}")))
    }

    /// Atomically write `meta.json` into a table directory.
    pub fn save(&self, dir: &Path) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| EngineError::Io(format!("meta.json: {e}")))?;
        atomic_write(&dir.join("meta.json"), &bytes)
            .map_err(|e| EngineError::Io(format!("meta.json: {e}")))?;
        Ok(())
    }
}
