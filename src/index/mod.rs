//! # Key Index Family
//!
//! Five index structures over `(key, rid)` entries, sharing the typed key
//! model defined here:
//!
//! | Module | Structure | Point | Range | Spatial |
//! |--------|-----------|-------|-------|---------|
//! | [`sequential`] | Ordered main file + auxiliary area | ✓ | ✓ | — |
//! | [`isam`] | Static two-level sparse index + overflow chains | ✓ | ✓ | — |
//! | [`hash`] | Extendible hashing | ✓ | — | — |
//! | [`btree`] | Order-m B+ tree with linked leaves | ✓ | ✓ | — |
//! | [`rtree`] | R-tree over MBRs | — | — | kNN + radius |
//!
//! Indexes never store records.  They store [`Entry`] pairs and resolve
//! rids through the record store; an index surfacing a tombstoned rid is a
//! bug the record store catches.
//!
//! ## Typed keys
//!
//! A [`Key`] is drawn from one declared field and compares by its declared
//! [`FieldType`]: numeric order for `Int`/`Float`, lexicographic for
//! `Text`, componentwise for `Geo2d`.  Floats order via `total_cmp`, so
//! keys form a total order and can safely live in sorted structures.
//!
//! ## Error discipline
//!
//! The index layer reports only [`IndexError::NotFound`],
//! [`IndexError::DuplicateKey`] and I/O-class failures; the engine
//! translates these to the user-visible error surface.

pub mod btree;
pub mod hash;
pub mod isam;
pub mod rtree;
pub mod sequential;

use std::cmp::Ordering;
use std::fmt;
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encoding::{Decode, Encode, EncodingError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by the key index layer.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Point search found no live entry.  Soft — the engine renders this
    /// as an empty result set, not a failure.
    #[error("key not found")]
    NotFound,

    /// Insert would violate a declared uniqueness constraint.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding failure in a persisted artifact.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A persisted artifact failed validation (bad magic, checksum, or
    /// internally inconsistent structure).
    #[error("Corrupt index: {0}")]
    Corrupt(String),

    /// A key literal could not be parsed as the declared field type.
    #[error("bad key: {0}")]
    BadKey(String),
}

// ------------------------------------------------------------------------------------------------
// Field types
// ------------------------------------------------------------------------------------------------

/// Declared type of a table field, recovered during ingestion.
///
/// Widths are byte widths of the padded on-disk encoding; comparison
/// semantics follow the declared type, not the stored bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 text, lexicographic order.
    Text,
    /// 64-bit signed integer, numeric order.
    Int,
    /// 64-bit float, numeric order (`total_cmp`).
    Float,
    /// Geographic or planar point, stored as `"lat,lon"`.
    Geo2d,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Text => write!(f, "text"),
            FieldType::Int => write!(f, "int"),
            FieldType::Float => write!(f, "float"),
            FieldType::Geo2d => write!(f, "geo2d"),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Keys
// ------------------------------------------------------------------------------------------------

/// An immutable key value drawn from one record field.
#[derive(Debug, Clone)]
pub enum Key {
    /// Lexicographically ordered text.
    Text(String),
    /// Numerically ordered integer.
    Int(i64),
    /// Numerically ordered float.
    Float(f64),
    /// 2-D point `(x, y)`; `(lat, lon)` when the field is geographic.
    Geo(f64, f64),
}

impl Key {
    /// Parse a raw field value as the declared type.
    pub fn parse(raw: &str, ty: FieldType) -> Result<Self, IndexError> {
        let trimmed = raw.trim();
        match ty {
            FieldType::Text => Ok(Key::Text(raw.to_string())),
            FieldType::Int => trimmed
                .parse::<i64>()
                .map(Key::Int)
                .map_err(|_| IndexError::BadKey(format!("{raw:?} is not an int"))),
            FieldType::Float => trimmed
                .parse::<f64>()
                .map(Key::Float)
                .map_err(|_| IndexError::BadKey(format!("{raw:?} is not a float"))),
            FieldType::Geo2d => {
                let (a, b) = trimmed
                    .split_once(',')
                    .ok_or_else(|| IndexError::BadKey(format!("{raw:?} is not \"lat,lon\"")))?;
                let x = a.trim().parse::<f64>();
                let y = b.trim().parse::<f64>();
                match (x, y) {
                    (Ok(x), Ok(y)) => Ok(Key::Geo(x, y)),
                    _ => Err(IndexError::BadKey(format!("{raw:?} is not \"lat,lon\""))),
                }
            }
        }
    }

    /// The field type this key was parsed as.
    pub fn field_type(&self) -> FieldType {
        match self {
            Key::Text(_) => FieldType::Text,
            Key::Int(_) => FieldType::Int,
            Key::Float(_) => FieldType::Float,
            Key::Geo(_, _) => FieldType::Geo2d,
        }
    }

    /// Canonical string form, identical to the field value it came from
    /// up to numeric normalization.
    pub fn render(&self) -> String {
        match self {
            Key::Text(s) => s.clone(),
            Key::Int(v) => v.to_string(),
            Key::Float(v) => v.to_string(),
            Key::Geo(x, y) => format!("{x},{y}"),
        }
    }

    /// Encode into a fixed-width slot (string form, zero-padded).
    pub fn write_fixed(&self, width: usize, buf: &mut Vec<u8>) -> Result<(), IndexError> {
        let s = self.render();
        let bytes = s.as_bytes();
        if bytes.len() > width {
            return Err(IndexError::BadKey(format!(
                "key {s:?} wider than slot ({} > {width})",
                bytes.len()
            )));
        }
        buf.extend_from_slice(bytes);
        buf.extend(std::iter::repeat_n(0u8, width - bytes.len()));
        Ok(())
    }

    /// Decode from a fixed-width slot written by [`Key::write_fixed`].
    pub fn read_fixed(slot: &[u8], ty: FieldType) -> Result<Self, IndexError> {
        let trimmed = match slot.iter().rposition(|b| *b != 0) {
            Some(last) => &slot[..=last],
            None => &slot[..0],
        };
        let s = std::str::from_utf8(trimmed)
            .map_err(|_| IndexError::Corrupt("key slot is not UTF-8".into()))?;
        Key::parse(s, ty)
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Text(_) => 0,
            Key::Int(_) => 1,
            Key::Float(_) => 2,
            Key::Geo(_, _) => 3,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Text(a), Key::Text(b)) => a.cmp(b),
            (Key::Int(a), Key::Int(b)) => a.cmp(b),
            (Key::Float(a), Key::Float(b)) => a.total_cmp(b),
            (Key::Geo(ax, ay), Key::Geo(bx, by)) => {
                ax.total_cmp(bx).then_with(|| ay.total_cmp(by))
            }
            // Heterogeneous keys never meet inside one index; order by
            // variant so the total order still holds.
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

/// Self-describing binary form: `[u8 tag][payload]`.  Used by the arena
/// dumps of the tree indexes, where key widths are not fixed.
impl Encode for Key {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            Key::Text(s) => {
                buf.push(0);
                s.encode_to(buf)?;
            }
            Key::Int(v) => {
                buf.push(1);
                v.encode_to(buf)?;
            }
            Key::Float(v) => {
                buf.push(2);
                v.encode_to(buf)?;
            }
            Key::Geo(x, y) => {
                buf.push(3);
                x.encode_to(buf)?;
                y.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for Key {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut off) = u8::decode_from(buf)?;
        let key = match tag {
            0 => {
                let (s, n) = String::decode_from(&buf[off..])?;
                off += n;
                Key::Text(s)
            }
            1 => {
                let (v, n) = i64::decode_from(&buf[off..])?;
                off += n;
                Key::Int(v)
            }
            2 => {
                let (v, n) = f64::decode_from(&buf[off..])?;
                off += n;
                Key::Float(v)
            }
            3 => {
                let (x, n) = f64::decode_from(&buf[off..])?;
                off += n;
                let (y, n) = f64::decode_from(&buf[off..])?;
                off += n;
                Key::Geo(x, y)
            }
            other => {
                return Err(EncodingError::InvalidTag {
                    tag: other as u32,
                    type_name: "Key",
                });
            }
        };
        Ok((key, off))
    }
}

// ------------------------------------------------------------------------------------------------
// Entries
// ------------------------------------------------------------------------------------------------

/// One index entry: a key and the rid it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The indexed key value.
    pub key: Key,
    /// Slot index of the record in the record store.
    pub rid: u64,
}

impl Entry {
    /// Convenience constructor.
    pub fn new(key: Key, rid: u64) -> Self {
        Self { key, rid }
    }
}

// ------------------------------------------------------------------------------------------------
// Index kinds
// ------------------------------------------------------------------------------------------------

/// The index kinds a table can be created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Ordered main file with auxiliary insert area (C2).
    Sequential,
    /// Static two-level ISAM with overflow chains (C3).
    Isam,
    /// Extendible hashing (C4).
    Hash,
    /// B+ tree (C5).
    Btree,
    /// R-tree (C6).
    Rtree,
    /// SPIMI inverted text index (C7).
    Spimi,
}

impl IndexKind {
    /// Whether this kind supports ordered range queries.
    pub fn supports_range(&self) -> bool {
        matches!(self, IndexKind::Sequential | IndexKind::Isam | IndexKind::Btree)
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexKind::Sequential => "sequential",
            IndexKind::Isam => "isam",
            IndexKind::Hash => "hash",
            IndexKind::Btree => "btree",
            IndexKind::Rtree => "rtree",
            IndexKind::Spimi => "spimi",
        };
        write!(f, "{name}")
    }
}

impl FromStr for IndexKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(IndexKind::Sequential),
            "isam" => Ok(IndexKind::Isam),
            "hash" => Ok(IndexKind::Hash),
            "btree" => Ok(IndexKind::Btree),
            "rtree" => Ok(IndexKind::Rtree),
            "spimi" => Ok(IndexKind::Spimi),
            other => Err(format!("unknown index kind {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests;
