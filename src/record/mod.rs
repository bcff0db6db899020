//! # Paged Record Store
//!
//! Fixed-width, slot-addressed record file — the single source of truth
//! for every table.  Indexes store `(key, rid)` entries and resolve the
//! `rid` here; a record's identifier is its slot index and never changes
//! during the life of the table.
//!
//! ## On-disk layout
//!
//! ```text
//! [MAGIC][PAYLOAD_LEN_LE][HEADER_PAYLOAD][HEADER_CRC32_LE]
//! [SLOT 0][SLOT 1][SLOT 2]…
//! ```
//!
//! - **Header payload** — format version plus the declared byte width of
//!   each field, CRC32-protected.
//! - **Slot** — one marker byte (`0x01` live, `0x00` tombstone) followed by
//!   each field right-padded with `0x00` to its declared width.
//!
//! Random access is O(1): slot offset = `header_len + rid · slot_size`.
//!
//! ## Deletion
//!
//! Deletion is logical.  [`RecordStore::tombstone`] flips the marker byte
//! in place; [`RecordStore::scan`] skips tombstoned slots; space reuse is
//! not attempted.
//!
//! ## Corruption policy
//!
//! A marker byte that is neither live nor tombstone means the file was
//! corrupted outside this process.  Per the storage contract this is the
//! only condition on which the store **panics** — every other failure is
//! reported through [`RecordStoreError`].

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, trace};

use crate::encoding::{self, Decode, Encode, EncodingError};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

const REC_MAGIC: [u8; 4] = *b"MRS1";
const REC_VERSION: u32 = 1;

const MARKER_TOMBSTONE: u8 = 0x00;
const MARKER_LIVE: u8 = 0x01;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by record store operations.
#[derive(Debug, Error)]
pub enum RecordStoreError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error in the header.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The file is not a record store (bad magic or version).
    #[error("Invalid record file: {0}")]
    InvalidFile(String),

    /// Header checksum did not match.
    #[error("Header checksum mismatch")]
    ChecksumMismatch,

    /// The rid does not address an allocated slot.
    #[error("rid {rid} out of range (slot count {slots})")]
    OutOfRange {
        /// The offending record id.
        rid: u64,
        /// Number of allocated slots.
        slots: u64,
    },

    /// A field value does not fit its declared width.
    #[error("field {index} is {actual} bytes, declared width {width}")]
    FieldTooWide {
        /// Zero-based field position.
        index: usize,
        /// Encoded byte length of the offered value.
        actual: usize,
        /// Declared maximum width.
        width: u32,
    },

    /// The number of offered fields does not match the schema.
    #[error("expected {expected} fields, got {actual}")]
    FieldCountMismatch {
        /// Fields declared by the schema.
        expected: usize,
        /// Fields offered by the caller.
        actual: usize,
    },

    /// A stored field was not valid UTF-8.
    #[error("field is not valid UTF-8 at rid {0}")]
    InvalidUtf8(u64),
}

// ------------------------------------------------------------------------------------------------
// RecordStore
// ------------------------------------------------------------------------------------------------

/// Fixed-width record file with O(1) slot access and logical deletion.
#[derive(Debug)]
pub struct RecordStore {
    file: File,
    widths: Vec<u32>,
    header_len: u64,
    slot_size: u64,
    slot_count: u64,
}

impl RecordStore {
    /// Create a fresh record store at `path` with the given field widths.
    ///
    /// Truncates any existing file.
    pub fn create(path: impl AsRef<Path>, widths: &[u32]) -> Result<Self, RecordStoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;

        let mut payload = Vec::new();
        REC_VERSION.encode_to(&mut payload)?;
        encoding::encode_vec(widths, &mut payload)?;

        let mut hasher = Crc32::new();
        hasher.update(&payload);
        let crc = hasher.finalize();

        let mut header = Vec::new();
        REC_MAGIC.encode_to(&mut header)?;
        (payload.len() as u32).encode_to(&mut header)?;
        header.extend_from_slice(&payload);
        crc.encode_to(&mut header)?;

        file.write_all_at(&header, 0)?;
        file.sync_all()?;

        debug!(path = %path.as_ref().display(), fields = widths.len(), "record store created");

        Ok(Self {
            file,
            header_len: header.len() as u64,
            slot_size: 1 + widths.iter().map(|w| u64::from(*w)).sum::<u64>(),
            widths: widths.to_vec(),
            slot_count: 0,
        })
    }

    /// Open an existing record store, validating magic, version and header CRC.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecordStoreError> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;

        let mut fixed = [0u8; 8];
        file.read_exact_at(&mut fixed, 0)?;
        if fixed[..4] != REC_MAGIC {
            return Err(RecordStoreError::InvalidFile("bad magic".into()));
        }
        let payload_len = u32::from_le_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]) as usize;

        let mut payload = vec![0u8; payload_len + 4];
        file.read_exact_at(&mut payload, 8)?;
        let stored_crc = u32::from_le_bytes([
            payload[payload_len],
            payload[payload_len + 1],
            payload[payload_len + 2],
            payload[payload_len + 3],
        ]);
        payload.truncate(payload_len);

        let mut hasher = Crc32::new();
        hasher.update(&payload);
        if hasher.finalize() != stored_crc {
            return Err(RecordStoreError::ChecksumMismatch);
        }

        let (version, n) = u32::decode_from(&payload)?;
        if version != REC_VERSION {
            return Err(RecordStoreError::InvalidFile(format!(
                "unsupported version {version}"
            )));
        }
        let (widths, _) = encoding::decode_vec::<u32>(&payload[n..])?;

        let header_len = 8 + payload_len as u64 + 4;
        let slot_size = 1 + widths.iter().map(|w| u64::from(*w)).sum::<u64>();
        let file_len = file.metadata()?.len();
        let slot_count = (file_len - header_len) / slot_size;

        trace!(
            path = %path.as_ref().display(),
            slots = slot_count,
            "record store opened"
        );

        Ok(Self {
            file,
            widths,
            header_len,
            slot_size,
            slot_count,
        })
    }

    /// Declared field widths.
    pub fn widths(&self) -> &[u32] {
        &self.widths
    }

    /// Number of allocated slots (live and tombstoned).
    pub fn slot_count(&self) -> u64 {
        self.slot_count
    }

    /// Append a record, returning its freshly assigned rid.
    pub fn append(&mut self, fields: &[String]) -> Result<u64, RecordStoreError> {
        let slot = self.encode_slot(fields)?;
        let rid = self.slot_count;
        self.file.write_all_at(&slot, self.slot_offset(rid))?;
        self.slot_count += 1;
        trace!(rid, "record appended");
        Ok(rid)
    }

    /// Read the record at `rid`.
    ///
    /// Returns `None` when the slot is tombstoned.
    ///
    /// # Panics
    ///
    /// Panics if the slot's marker byte is neither live nor tombstone —
    /// that means on-disk corruption, which the store must not paper over.
    pub fn read(&self, rid: u64) -> Result<Option<Vec<String>>, RecordStoreError> {
        self.check_range(rid)?;

        let mut slot = vec![0u8; self.slot_size as usize];
        self.file.read_exact_at(&mut slot, self.slot_offset(rid))?;

        match slot[0] {
            MARKER_TOMBSTONE => Ok(None),
            MARKER_LIVE => Ok(Some(self.decode_fields(rid, &slot[1..])?)),
            other => panic!("record store corruption: invalid marker byte 0x{other:02X} at rid {rid}"),
        }
    }

    /// Tombstone the record at `rid`.  Idempotent.
    pub fn tombstone(&mut self, rid: u64) -> Result<(), RecordStoreError> {
        self.check_range(rid)?;
        self.file
            .write_all_at(&[MARKER_TOMBSTONE], self.slot_offset(rid))?;
        trace!(rid, "record tombstoned");
        Ok(())
    }

    /// Iterate all live records as `(rid, fields)`, skipping tombstones.
    pub fn scan(&self) -> RecordScan<'_> {
        RecordScan { store: self, next: 0 }
    }

    /// Flush outstanding writes to stable storage.
    pub fn sync(&self) -> Result<(), RecordStoreError> {
        self.file.sync_all()?;
        Ok(())
    }

    fn slot_offset(&self, rid: u64) -> u64 {
        self.header_len + rid * self.slot_size
    }

    fn check_range(&self, rid: u64) -> Result<(), RecordStoreError> {
        if rid >= self.slot_count {
            return Err(RecordStoreError::OutOfRange {
                rid,
                slots: self.slot_count,
            });
        }
        Ok(())
    }

    fn encode_slot(&self, fields: &[String]) -> Result<Vec<u8>, RecordStoreError> {
        if fields.len() != self.widths.len() {
            return Err(RecordStoreError::FieldCountMismatch {
                expected: self.widths.len(),
                actual: fields.len(),
            });
        }

        let mut slot = Vec::with_capacity(self.slot_size as usize);
        slot.push(MARKER_LIVE);
        for (index, (value, width)) in fields.iter().zip(&self.widths).enumerate() {
            let bytes = value.as_bytes();
            if bytes.len() > *width as usize {
                return Err(RecordStoreError::FieldTooWide {
                    index,
                    actual: bytes.len(),
                    width: *width,
                });
            }
            slot.extend_from_slice(bytes);
            slot.extend(std::iter::repeat_n(0u8, *width as usize - bytes.len()));
        }
        Ok(slot)
    }

    fn decode_fields(&self, rid: u64, body: &[u8]) -> Result<Vec<String>, RecordStoreError> {
        let mut fields = Vec::with_capacity(self.widths.len());
        let mut offset = 0usize;
        for width in &self.widths {
            let raw = &body[offset..offset + *width as usize];
            let trimmed = match raw.iter().rposition(|b| *b != 0) {
                Some(last) => &raw[..=last],
                None => &raw[..0],
            };
            let s = std::str::from_utf8(trimmed)
                .map_err(|_| RecordStoreError::InvalidUtf8(rid))?
                .to_string();
            fields.push(s);
            offset += *width as usize;
        }
        Ok(fields)
    }
}

// ------------------------------------------------------------------------------------------------
// Scan iterator
// ------------------------------------------------------------------------------------------------

/// Iterator over live records, in rid order.
pub struct RecordScan<'a> {
    store: &'a RecordStore,
    next: u64,
}

impl Iterator for RecordScan<'_> {
    type Item = Result<(u64, Vec<String>), RecordStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.store.slot_count {
            let rid = self.next;
            self.next += 1;
            match self.store.read(rid) {
                Ok(Some(fields)) => return Some(Ok((rid, fields))),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}
