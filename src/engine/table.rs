//! Table handle — a record store bound to exactly one primary index,
//! plus the per-kind dispatch the engine drives.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{info, warn};

use crate::engine::meta::{MediaMeta, TableMeta};
use crate::engine::{EngineConfig, EngineError};
use crate::index::btree::BTreeIndex;
use crate::index::hash::ExtendibleHashIndex;
use crate::index::isam::IsamIndex;
use crate::index::rtree::{Metric, RTreeIndex};
use crate::index::sequential::SequentialIndex;
use crate::index::{Entry, FieldType, IndexKind, Key};
use crate::media::extractor::FeatureExtractor;
use crate::media::{KnnMethod, MediaIndex};
use crate::record::RecordStore;
use crate::sql::{Literal, SpatialArg};
use crate::stop::StopSignal;
use crate::text::TextIndex;

// ------------------------------------------------------------------------------------------------
// TableIndex
// ------------------------------------------------------------------------------------------------

/// The index structure a table is bound to.
pub(crate) enum TableIndex {
    Sequential(SequentialIndex),
    Isam(IsamIndex),
    Hash(ExtendibleHashIndex),
    Btree(BTreeIndex),
    Rtree(RTreeIndex),
    Spimi(TextIndex),
    Media {
        index: MediaIndex,
        extractor: Arc<dyn FeatureExtractor>,
    },
}

// ------------------------------------------------------------------------------------------------
// Table
// ------------------------------------------------------------------------------------------------

/// One table: metadata, record store, primary index.
pub struct Table {
    pub(crate) meta: TableMeta,
    dir: PathBuf,
    store: RecordStore,
    index: TableIndex,
}

impl Table {
    // --------------------------------------------------------------------------------------------
    // Creation
    // --------------------------------------------------------------------------------------------

    /// Create a key- or text-indexed table from ingested rows.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create_regular(
        dir: &Path,
        name: &str,
        source: &str,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
        kind: IndexKind,
        index_fields: Vec<String>,
        config: &EngineConfig,
        stop: &StopSignal,
    ) -> Result<Self, EngineError> {
        let (types, widths) = crate::engine::ingest::infer_schema(&headers, &rows);

        let mut meta = TableMeta {
            name: name.to_string(),
            headers,
            types,
            widths,
            source_file: source.to_string(),
            index_kind: Some(kind),
            index_fields,
            language: config.language,
            // Only extendible hashing enforces uniqueness.
            unique: kind == IndexKind::Hash,
            geographic: false,
            media: None,
        };
        for field in &meta.index_fields {
            meta.require_field(field)?;
        }
        if kind != IndexKind::Spimi && meta.index_fields.len() != 1 {
            return Err(EngineError::Build(format!(
                "index kind {kind} binds exactly one field"
            )));
        }

        std::fs::create_dir_all(dir).map_err(|e| EngineError::Io(e.to_string()))?;
        let mut store = RecordStore::create(dir.join("records.dat"), &meta.widths)
            .map_err(EngineError::from_store)?;

        let mut stored: Vec<(u64, Vec<String>)> = Vec::with_capacity(rows.len());
        for row in rows {
            let rid = store.append(&row).map_err(EngineError::from_store)?;
            stored.push((rid, row));
        }
        store.sync().map_err(EngineError::from_store)?;

        let index = Self::build_index(dir, &mut meta, &stored, config, stop)?;

        // meta.json written last: a table directory is valid only once the
        // schema file exists.
        meta.save(dir)?;
        info!(table = name, records = stored.len(), %kind, "table created");

        Ok(Self { meta, dir: dir.to_path_buf(), store, index })
    }

    /// Create a multimedia table: the records hold asset paths, the index
    /// holds their descriptor histograms.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create_media(
        dir: &Path,
        name: &str,
        source: &str,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
        media_kind: &str,
        method: &str,
        clusters: u32,
        extractor: Arc<dyn FeatureExtractor>,
        config: &EngineConfig,
        stop: &StopSignal,
    ) -> Result<Self, EngineError> {
        let (types, widths) = crate::engine::ingest::infer_schema(&headers, &rows);
        let path_field = pick_path_field(&headers, &types).ok_or_else(|| {
            EngineError::Build(format!(
                "no path column found in {source:?} for a multimedia table"
            ))
        })?;

        let meta = TableMeta {
            name: name.to_string(),
            headers,
            types,
            widths,
            source_file: source.to_string(),
            index_kind: None,
            index_fields: vec![path_field.clone()],
            language: config.language,
            unique: false,
            geographic: false,
            media: Some(MediaMeta {
                kind: media_kind.to_string(),
                method: method.to_string(),
                clusters,
                extractor_id: extractor.id(),
                path_field,
            }),
        };

        std::fs::create_dir_all(dir).map_err(|e| EngineError::Io(e.to_string()))?;
        let mut store = RecordStore::create(dir.join("records.dat"), &meta.widths)
            .map_err(EngineError::from_store)?;

        let path_pos = meta.require_field(&meta.index_fields[0])?;
        let mut assets: Vec<(u64, String)> = Vec::with_capacity(rows.len());
        for row in rows {
            let rid = store.append(&row).map_err(EngineError::from_store)?;
            assets.push((rid, row[path_pos].clone()));
        }
        store.sync().map_err(EngineError::from_store)?;

        let index = MediaIndex::build(
            dir.join("mm"),
            extractor.as_ref(),
            &assets,
            clusters,
            config.kmeans_seed,
            stop,
        )
        .map_err(EngineError::from_media)?;

        meta.save(dir)?;
        info!(table = name, assets = assets.len(), method, "multimedia table created");

        Ok(Self {
            meta,
            dir: dir.to_path_buf(),
            store,
            index: TableIndex::Media { index, extractor },
        })
    }

    fn build_index(
        dir: &Path,
        meta: &mut TableMeta,
        stored: &[(u64, Vec<String>)],
        config: &EngineConfig,
        stop: &StopSignal,
    ) -> Result<TableIndex, EngineError> {
        let kind = meta
            .index_kind
            .unwrap_or_else(|| unreachable!("regular tables always carry an index kind"));

        if kind == IndexKind::Spimi {
            let docs = stored.iter().map(|(rid, row)| {
                let fields = meta
                    .index_fields
                    .iter()
                    .map(|f| {
                        let pos = meta.field_position(f).unwrap_or(0);
                        (f.clone(), row[pos].clone())
                    })
                    .collect::<Vec<(String, String)>>();
                (*rid, fields)
            });
            let index = TextIndex::build(
                dir.join("spimi"),
                meta.language,
                config.spimi_memory_budget,
                docs,
                stop,
            )
            .map_err(EngineError::from_text)?;
            return Ok(TableIndex::Spimi(index));
        }

        let pos = meta.require_field(&meta.index_fields[0])?;
        let key_type = meta.types[pos];
        let key_width = meta.widths[pos];

        if kind == IndexKind::Rtree {
            if key_type != FieldType::Geo2d {
                return Err(EngineError::Build(format!(
                    "rtree requires a \"lat,lon\" field; {:?} is {key_type}",
                    meta.index_fields[0]
                )));
            }
            let mut points = Vec::with_capacity(stored.len());
            let mut geographic = !stored.is_empty();
            for (rid, row) in stored {
                let Key::Geo(x, y) = Key::parse(&row[pos], FieldType::Geo2d)
                    .map_err(EngineError::from_index)?
                else {
                    unreachable!("geo2d fields parse to geo keys");
                };
                if !(-90.0..=90.0).contains(&x) || !(-180.0..=180.0).contains(&y) {
                    geographic = false;
                }
                points.push(((x, y), *rid));
            }
            meta.geographic = geographic;
            let metric = if geographic { Metric::Haversine } else { Metric::Euclidean };
            let index = RTreeIndex::build(
                dir.join("rtree.idx"),
                metric,
                config.rtree_max_entries,
                &points,
            )
            .map_err(EngineError::from_index)?;
            return Ok(TableIndex::Rtree(index));
        }

        // Keyed entries, sorted for the bulk-build paths.
        let mut entries = Vec::with_capacity(stored.len());
        for (rid, row) in stored {
            let key = Key::parse(&row[pos], key_type).map_err(EngineError::from_index)?;
            entries.push(Entry::new(key, *rid));
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        if meta.unique {
            for pair in entries.windows(2) {
                if pair[0].key == pair[1].key {
                    return Err(EngineError::DuplicateKey(pair[0].key.render()));
                }
            }
        }

        let index = match kind {
            IndexKind::Sequential => TableIndex::Sequential(
                SequentialIndex::build(
                    dir,
                    key_type,
                    key_width,
                    meta.unique,
                    config.sequential_rebuild_threshold,
                    &entries,
                )
                .map_err(EngineError::from_index)?,
            ),
            IndexKind::Isam => TableIndex::Isam(
                IsamIndex::build(dir, key_type, key_width, config.isam_block_factor, &entries)
                    .map_err(EngineError::from_index)?,
            ),
            IndexKind::Hash => TableIndex::Hash(
                ExtendibleHashIndex::build(
                    dir,
                    key_type,
                    key_width,
                    config.hash_bucket_size,
                    meta.unique,
                    &entries,
                )
                .map_err(EngineError::from_index)?,
            ),
            IndexKind::Btree => TableIndex::Btree(
                BTreeIndex::build(dir.join("btree.idx"), config.btree_order, &entries)
                    .map_err(EngineError::from_index)?,
            ),
            IndexKind::Rtree | IndexKind::Spimi => unreachable!("handled above"),
        };
        Ok(index)
    }

    /// Open an existing table directory.
    pub(crate) fn open(
        dir: &Path,
        config: &EngineConfig,
        extractors: &std::collections::HashMap<String, Arc<dyn FeatureExtractor>>,
    ) -> Result<Self, EngineError> {
        let meta = TableMeta::load(dir)?;
        let store =
            RecordStore::open(dir.join("records.dat")).map_err(EngineError::from_store)?;

        let index = match (&meta.index_kind, &meta.media) {
            (_, Some(media)) => {
                let extractor = extractors
                    .get(&media.method)
                    .ok_or_else(|| {
                        EngineError::Build(format!(
                            "no extractor registered for method {:?}",
                            media.method
                        ))
                    })?
                    .clone();
                let index = MediaIndex::open(dir.join("mm")).map_err(EngineError::from_media)?;
                TableIndex::Media { index, extractor }
            }
            (Some(kind), None) => {
                let pos = meta.require_field(&meta.index_fields[0])?;
                let key_type = meta.types[pos];
                let key_width = meta.widths[pos];
                match kind {
                    IndexKind::Sequential => TableIndex::Sequential(
                        SequentialIndex::open(
                            dir,
                            key_type,
                            key_width,
                            meta.unique,
                            config.sequential_rebuild_threshold,
                        )
                        .map_err(EngineError::from_index)?,
                    ),
                    IndexKind::Isam => TableIndex::Isam(
                        IsamIndex::open(dir, key_type, key_width)
                            .map_err(EngineError::from_index)?,
                    ),
                    IndexKind::Hash => TableIndex::Hash(
                        ExtendibleHashIndex::open(dir, key_type, key_width, meta.unique)
                            .map_err(EngineError::from_index)?,
                    ),
                    IndexKind::Btree => TableIndex::Btree(
                        BTreeIndex::open(dir.join("btree.idx"))
                            .map_err(EngineError::from_index)?,
                    ),
                    IndexKind::Rtree => {
                        let metric =
                            if meta.geographic { Metric::Haversine } else { Metric::Euclidean };
                        TableIndex::Rtree(
                            RTreeIndex::open(dir.join("rtree.idx"), metric)
                                .map_err(EngineError::from_index)?,
                        )
                    }
                    IndexKind::Spimi => {
                        let mut index = TextIndex::open(dir.join("spimi"), meta.language)
                            .map_err(EngineError::from_text)?;
                        // Tombstones are not a text-index artifact; re-derive
                        // them from the record store.
                        for rid in 0..store.slot_count() {
                            if store.read(rid).map_err(EngineError::from_store)?.is_none() {
                                index.delete_document(rid);
                            }
                        }
                        TableIndex::Spimi(index)
                    }
                }
            }
            (None, None) => {
                return Err(EngineError::Io(format!(
                    "table {:?} has neither an index kind nor a media binding",
                    meta.name
                )));
            }
        };

        Ok(Self { meta, dir: dir.to_path_buf(), store, index })
    }

    /// Destroy the table's artifacts.
    pub(crate) fn destroy(self) -> Result<(), EngineError> {
        std::fs::remove_dir_all(&self.dir).map_err(|e| EngineError::Io(e.to_string()))?;
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Number of allocated record slots.
    pub fn slot_count(&self) -> u64 {
        self.store.slot_count()
    }

    fn parse_key(&self, pos: usize, value: &Literal) -> Result<Key, EngineError> {
        Key::parse(&value.render(), self.meta.types[pos]).map_err(EngineError::from_index)
    }

    fn index_serves(&self, field: &str) -> bool {
        self.meta
            .index_fields
            .iter()
            .any(|f| f.eq_ignore_ascii_case(field))
    }

    /// `f = v`: index point search when `f` is the indexed field, full
    /// scan + typed filter otherwise.
    pub(crate) fn select_equals(
        &self,
        field: &str,
        value: &Literal,
        stop: &StopSignal,
    ) -> Result<Vec<u64>, EngineError> {
        let pos = self.meta.require_field(field)?;

        if self.index_serves(field) {
            match &self.index {
                TableIndex::Sequential(index) => {
                    let key = self.parse_key(pos, value)?;
                    return index.search(&key).map_err(EngineError::from_index);
                }
                TableIndex::Isam(index) => {
                    let key = self.parse_key(pos, value)?;
                    return index.search(&key).map_err(EngineError::from_index);
                }
                TableIndex::Hash(index) => {
                    let key = self.parse_key(pos, value)?;
                    return index.search(&key).map_err(EngineError::from_index);
                }
                TableIndex::Btree(index) => {
                    let key = self.parse_key(pos, value)?;
                    return Ok(index.search(&key));
                }
                TableIndex::Rtree(index) => {
                    // Point equality on a spatial index: radius zero.
                    let Key::Geo(x, y) = self.parse_key(pos, value)? else {
                        return Err(EngineError::Parse(format!(
                            "{value:?} is not a \"lat,lon\" point"
                        )));
                    };
                    let hits = index
                        .radius((x, y), 0.0, stop)
                        .map_err(EngineError::from_index)?;
                    return Ok(hits.into_iter().map(|(rid, _)| rid).collect());
                }
                TableIndex::Spimi(_) | TableIndex::Media { .. } => {
                    // Equality on ranked indexes falls through to the scan.
                }
            }
        }

        self.scan_matching(pos, value, stop)
    }

    /// `f BETWEEN a AND b`: ordered index range when bound, fail-fast on
    /// the hash index, full scan otherwise.
    pub(crate) fn select_between(
        &self,
        field: &str,
        lo: &Literal,
        hi: &Literal,
        stop: &StopSignal,
    ) -> Result<Vec<u64>, EngineError> {
        let pos = self.meta.require_field(field)?;

        if self.index_serves(field) {
            let lo_key = self.parse_key(pos, lo)?;
            let hi_key = self.parse_key(pos, hi)?;
            let entries = match &self.index {
                TableIndex::Sequential(index) => index
                    .range(&lo_key, &hi_key, stop)
                    .map_err(EngineError::from_index)?,
                TableIndex::Isam(index) => index
                    .range(&lo_key, &hi_key, stop)
                    .map_err(EngineError::from_index)?,
                TableIndex::Btree(index) => index
                    .range(&lo_key, &hi_key, stop)
                    .map_err(EngineError::from_index)?,
                TableIndex::Hash(_) => {
                    return Err(EngineError::UnsupportedPredicate(
                        "hash index does not support range predicates".into(),
                    ));
                }
                TableIndex::Rtree(_) => {
                    return Err(EngineError::UnsupportedPredicate(
                        "rtree serves spatial predicates, not ranges".into(),
                    ));
                }
                TableIndex::Spimi(_) | TableIndex::Media { .. } => {
                    return Err(EngineError::UnsupportedPredicate(
                        "ranked indexes do not support range predicates".into(),
                    ));
                }
            };
            return Ok(entries.into_iter().map(|e| e.rid).collect());
        }

        // Full scan + typed filter on a non-indexed field.
        let ty = self.meta.types[pos];
        let lo_key = Key::parse(&lo.render(), ty).map_err(EngineError::from_index)?;
        let hi_key = Key::parse(&hi.render(), ty).map_err(EngineError::from_index)?;
        let mut hits: Vec<(Key, u64)> = Vec::new();
        for item in self.store.scan() {
            stop.checkpoint().map_err(|e| EngineError::Io(e.to_string()))?;
            let (rid, fields) = item.map_err(EngineError::from_store)?;
            let key = Key::parse(&fields[pos], ty).map_err(EngineError::from_index)?;
            if key >= lo_key && key <= hi_key {
                hits.push((key, rid));
            }
        }
        hits.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(hits.into_iter().map(|(_, rid)| rid).collect())
    }

    /// `f IN ("lat,lon", r)`: spatial search; requires the R-tree.
    pub(crate) fn select_spatial(
        &self,
        field: &str,
        point: &str,
        arg: SpatialArg,
        stop: &StopSignal,
    ) -> Result<Vec<(u64, f64)>, EngineError> {
        self.meta.require_field(field)?;
        let TableIndex::Rtree(index) = &self.index else {
            return Err(EngineError::UnsupportedPredicate(format!(
                "spatial predicate on {field:?} requires an rtree index"
            )));
        };
        if !self.index_serves(field) {
            return Err(EngineError::UnsupportedPredicate(format!(
                "the rtree index is bound to {:?}, not {field:?}",
                self.meta.index_fields[0]
            )));
        }

        let Key::Geo(x, y) =
            Key::parse(point, FieldType::Geo2d).map_err(EngineError::from_index)?
        else {
            unreachable!("geo2d parse yields geo keys");
        };

        match arg {
            SpatialArg::Radius(r) => {
                index.radius((x, y), r, stop).map_err(EngineError::from_index)
            }
            SpatialArg::Knn(k) => {
                index.knn((x, y), k as usize, stop).map_err(EngineError::from_index)
            }
        }
    }

    /// `f @@ "query"`: text relevance; requires the SPIMI index.
    pub(crate) fn select_match(
        &self,
        field: &str,
        query: &str,
        k: usize,
        stop: &StopSignal,
    ) -> Result<Vec<(u64, f64)>, EngineError> {
        self.meta.require_field(field)?;
        let TableIndex::Spimi(index) = &self.index else {
            return Err(EngineError::UnsupportedPredicate(format!(
                "text predicate on {field:?} requires a spimi index"
            )));
        };
        if !self.index_serves(field) {
            return Err(EngineError::UnsupportedPredicate(format!(
                "the text index covers {:?}, not {field:?}",
                self.meta.index_fields
            )));
        }

        // Scope to the named field when several fields are indexed
        // jointly; a single-field index already matches only that field.
        let scoped = if self.meta.index_fields.len() > 1 {
            scope_query(field, query)
        } else {
            query.to_string()
        };
        index.query(&scoped, k, stop).map_err(EngineError::from_text)
    }

    /// `f <-> "path"`: content similarity; requires a multimedia table.
    pub(crate) fn select_similar(
        &self,
        field: &str,
        path: &str,
        method: Option<KnnMethod>,
        k: usize,
        stop: &StopSignal,
    ) -> Result<Vec<(u64, f64)>, EngineError> {
        self.meta.require_field(field)?;
        let TableIndex::Media { index, extractor } = &self.index else {
            return Err(EngineError::UnsupportedPredicate(format!(
                "similarity predicate on {field:?} requires a multimedia table"
            )));
        };
        if !self.index_serves(field) {
            return Err(EngineError::UnsupportedPredicate(format!(
                "the multimedia index is bound to {:?}, not {field:?}",
                self.meta.index_fields[0]
            )));
        }

        index
            .query(
                extractor.as_ref(),
                path,
                k,
                method.unwrap_or(KnnMethod::Inverted),
                stop,
            )
            .map_err(EngineError::from_media)
    }

    /// All live rids, in rid order.
    pub(crate) fn scan_all_rids(&self, stop: &StopSignal) -> Result<Vec<u64>, EngineError> {
        let mut rids = Vec::new();
        for item in self.store.scan() {
            stop.checkpoint().map_err(|e| EngineError::Io(e.to_string()))?;
            let (rid, _) = item.map_err(EngineError::from_store)?;
            rids.push(rid);
        }
        Ok(rids)
    }

    /// Materialize rows for rids, skipping (and flagging) tombstones.
    pub(crate) fn rehydrate(
        &self,
        rids: &[u64],
    ) -> Result<Vec<(u64, Vec<String>)>, EngineError> {
        let mut rows = Vec::with_capacity(rids.len());
        for rid in rids {
            match self.store.read(*rid).map_err(EngineError::from_store)? {
                Some(fields) => rows.push((*rid, fields)),
                None => {
                    warn!(rid, table = %self.meta.name, "index surfaced a tombstoned rid");
                }
            }
        }
        Ok(rows)
    }

    // --------------------------------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------------------------------

    /// Append one record and index it.  On an index rejection (duplicate
    /// key) the appended record is tombstoned again, so the statement
    /// leaves no trace.
    pub(crate) fn insert_row(
        &mut self,
        fields: Vec<String>,
        stop: &StopSignal,
    ) -> Result<u64, EngineError> {
        let rid = self.store.append(&fields).map_err(EngineError::from_store)?;

        if let Err(e) = self.index_one(rid, &fields, stop) {
            let _ = self.store.tombstone(rid);
            return Err(e);
        }
        Ok(rid)
    }

    fn index_one(
        &mut self,
        rid: u64,
        fields: &[String],
        stop: &StopSignal,
    ) -> Result<(), EngineError> {
        let pos = self.meta.require_field(&self.meta.index_fields[0])?;
        let key_type = self.meta.types[pos];

        match &mut self.index {
            TableIndex::Sequential(index) => {
                let key = Key::parse(&fields[pos], key_type).map_err(EngineError::from_index)?;
                index.insert(Entry::new(key, rid), stop).map_err(EngineError::from_index)
            }
            TableIndex::Isam(index) => {
                let key = Key::parse(&fields[pos], key_type).map_err(EngineError::from_index)?;
                index.insert(Entry::new(key, rid)).map_err(EngineError::from_index)
            }
            TableIndex::Hash(index) => {
                let key = Key::parse(&fields[pos], key_type).map_err(EngineError::from_index)?;
                index.insert(Entry::new(key, rid)).map_err(EngineError::from_index)
            }
            TableIndex::Btree(index) => {
                let key = Key::parse(&fields[pos], key_type).map_err(EngineError::from_index)?;
                index.insert(Entry::new(key, rid));
                index.save().map_err(EngineError::from_index)
            }
            TableIndex::Rtree(index) => {
                let Key::Geo(x, y) = Key::parse(&fields[pos], FieldType::Geo2d)
                    .map_err(EngineError::from_index)?
                else {
                    unreachable!("geo2d parse yields geo keys");
                };
                index.insert((x, y), rid);
                index.save().map_err(EngineError::from_index)
            }
            TableIndex::Spimi(index) => {
                let docs: Vec<(String, String)> = self
                    .meta
                    .index_fields
                    .iter()
                    .filter_map(|f| {
                        self.meta
                            .field_position(f)
                            .map(|pos| (f.clone(), fields[pos].clone()))
                    })
                    .collect();
                index.insert_document(rid, &docs, stop).map_err(EngineError::from_text)
            }
            TableIndex::Media { index, extractor } => index
                .insert_asset(rid, extractor.as_ref(), &fields[pos])
                .map_err(EngineError::from_media),
        }
    }

    /// `DELETE FROM t WHERE f = v`.
    ///
    /// Key indexes serve deletion only through their own key field (the
    /// index can unlink entries solely by key).  Ranked indexes (spimi,
    /// media) unlink by rid, so any existing field works via full scan.
    pub(crate) fn delete_where(
        &mut self,
        field: &str,
        value: &Literal,
        stop: &StopSignal,
    ) -> Result<Vec<u64>, EngineError> {
        let pos = self.meta.require_field(field)?;

        if matches!(self.index, TableIndex::Spimi(_) | TableIndex::Media { .. }) {
            let rids = self.scan_matching(pos, value, stop)?;
            for rid in &rids {
                self.store.tombstone(*rid).map_err(EngineError::from_store)?;
                match &mut self.index {
                    TableIndex::Spimi(index) => index.delete_document(*rid),
                    TableIndex::Media { index, .. } => {
                        index.remove_asset(*rid).map_err(EngineError::from_media)?;
                    }
                    _ => unreachable!("variant checked above"),
                }
            }
            return Ok(rids);
        }

        if !self.index_serves(field) {
            return Err(EngineError::UnsupportedPredicate(format!(
                "delete on {field:?} is not served by the index on {:?}",
                self.meta.index_fields[0]
            )));
        }
        let ty = self.meta.types[pos];
        let key = Key::parse(&value.render(), ty).map_err(EngineError::from_index)?;

        let removed = match &mut self.index {
            TableIndex::Sequential(index) => {
                index.delete(&key).map_err(EngineError::from_index)?
            }
            TableIndex::Isam(index) => index.delete(&key).map_err(EngineError::from_index)?,
            TableIndex::Hash(index) => index.delete(&key).map_err(EngineError::from_index)?,
            TableIndex::Btree(index) => {
                let removed = index.delete(&key);
                index.save().map_err(EngineError::from_index)?;
                removed
            }
            TableIndex::Rtree(index) => {
                let Key::Geo(x, y) = key else {
                    return Err(EngineError::Parse(format!(
                        "{value:?} is not a \"lat,lon\" point"
                    )));
                };
                let removed = index.delete((x, y));
                index.save().map_err(EngineError::from_index)?;
                removed
            }
            TableIndex::Spimi(_) | TableIndex::Media { .. } => {
                unreachable!("variant checked above")
            }
        };

        for rid in &removed {
            self.store.tombstone(*rid).map_err(EngineError::from_store)?;
        }
        Ok(removed)
    }

    /// Rids whose field at `pos` equals the literal under typed compare.
    fn scan_matching(
        &self,
        pos: usize,
        value: &Literal,
        stop: &StopSignal,
    ) -> Result<Vec<u64>, EngineError> {
        let ty = self.meta.types[pos];
        let target = Key::parse(&value.render(), ty).map_err(EngineError::from_index)?;
        let mut rids = Vec::new();
        for item in self.store.scan() {
            stop.checkpoint().map_err(|e| EngineError::Io(e.to_string()))?;
            let (rid, fields) = item.map_err(EngineError::from_store)?;
            match Key::parse(&fields[pos], ty) {
                Ok(key) if key == target => rids.push(rid),
                _ => {}
            }
        }
        Ok(rids)
    }

    /// Synthesize and insert `n` rows.
    pub(crate) fn generate_rows(
        &mut self,
        n: u64,
        seed: u64,
        stop: &StopSignal,
    ) -> Result<u64, EngineError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let rows = crate::engine::ingest::generate_rows(
            &self.meta.types,
            &self.meta.widths,
            n,
            &mut rng,
        );
        let mut inserted = 0u64;
        for row in rows {
            stop.checkpoint().map_err(|e| EngineError::Io(e.to_string()))?;
            match self.insert_row(row, stop) {
                Ok(_) => inserted += 1,
                // Synthetic collisions against a unique index are skipped,
                // not fatal.
                Err(EngineError::DuplicateKey(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(inserted)
    }
}

/// Choose the column holding asset paths: a name that suggests a path,
/// else the first text column.
fn pick_path_field(headers: &[String], types: &[FieldType]) -> Option<String> {
    const HINTS: &[&str] = &["path", "file", "filename", "uri", "url", "asset"];
    for header in headers {
        let lower = header.to_lowercase();
        if HINTS.iter().any(|h| lower.contains(h)) {
            return Some(header.clone());
        }
    }
    headers
        .iter()
        .zip(types)
        .find(|(_, ty)| **ty == FieldType::Text)
        .map(|(h, _)| h.clone())
}

/// Prefix every query token with `field:` for scoped matching.
fn scope_query(field: &str, query: &str) -> String {
    query
        .split_whitespace()
        .map(|chunk| format!("{field}:{chunk}"))
        .collect::<Vec<String>>()
        .join(" ")
}
