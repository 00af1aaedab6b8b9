//! The public key-value operations: `get`, `set`, `delete`, `drop`,
//! `compact`, `compact_all`, and `merge`. Owns the in-memory offset index and
//! orchestrates the segment store and the record codec to implement them.

use std::collections::HashMap;
use std::path::Path;

use crate::codec::Record;
use crate::error::{CompactError, ConstructError, DropError, GetError, SegmentError, WriteError};
use crate::segment::SegmentStore;

/// Per-segment size cap, in bytes, used unless an engine is opened with
/// [`Engine::open_with_max_segment_size`]. Intentionally tiny so that
/// multi-segment behavior is easy to exercise in tests.
pub const MAX_SEGMENT_SIZE: u64 = 255;

/// `segment index -> (key -> byte offset of that key's latest record in
/// that segment)`.
type Index = HashMap<u64, HashMap<String, u64>>;

/// The log-structured key-value storage engine.
///
/// Every mutating operation (`set`, `delete`, `drop`, `compact`,
/// `compact_all`, `merge`) takes `&mut self`, so Rust's borrow checker
/// enforces the single-writer, run-to-completion scheduling model this
/// engine assumes: no two operations on the same `Engine` value can overlap.
pub struct Engine {
    store: SegmentStore,
    active_index: u64,
    max_segment_size: u64,
    index: Index,
}

impl Engine {
    /// Opens (or creates) an engine over `dir`, using [`MAX_SEGMENT_SIZE`] as
    /// the per-segment size cap.
    pub fn open(dir: &Path) -> Result<Engine, ConstructError> {
        Engine::open_with_max_segment_size(dir, MAX_SEGMENT_SIZE)
    }

    /// Opens (or creates) an engine over `dir` with a caller-chosen segment
    /// size cap. Exists so tests can exercise roll-over without depending on
    /// the production constant.
    pub fn open_with_max_segment_size(
        dir: &Path,
        max_segment_size: u64,
    ) -> Result<Engine, ConstructError> {
        let (store, active_index) = SegmentStore::open(dir).map_err(|e| match e {
            SegmentError::InvalidPath(p) => ConstructError::BadPath(p),
            other => ConstructError::from(other),
        })?;

        let mut engine = Engine {
            store,
            active_index,
            max_segment_size,
            index: Index::new(),
        };
        engine.reload_index()?;

        log::info!(
            "opened engine at {}: indexed {} live key(s) across {} segment(s)",
            dir.display(),
            engine.index.values().map(HashMap::len).sum::<usize>(),
            engine.active_index + 1
        );

        Ok(engine)
    }

    /// Scans every segment from 0 to `active_index` and rebuilds the index
    /// from scratch. Called once at construction so a freshly opened engine
    /// is correct without ever having served a `set`/`delete` in this
    /// process — see the cold-start rule in the crate's design notes.
    fn reload_index(&mut self) -> Result<(), ConstructError> {
        self.index.clear();
        for segment in 0..=self.active_index {
            self.index.entry(segment).or_default();
        }
        for item in self.store.scan_all(self.active_index) {
            let (segment, offset, record) = item.map_err(ConstructError::from)?;
            let key = decode_key(record.key().to_vec()).map_err(ConstructError::from)?;
            // Both puts and tombstones get an index entry: `get` dereferences
            // the offset and inspects the record itself to tell them apart.
            self.index.entry(segment).or_default().insert(key, offset);
        }
        Ok(())
    }

    /// Looks up `key`, returning the most recently written value, or `None`
    /// if the key does not exist or was last deleted.
    pub fn get(&self, key: &str) -> Result<Option<String>, GetError> {
        for segment in (0..=self.active_index).rev() {
            let Some(offset) = self.index.get(&segment).and_then(|m| m.get(key)) else {
                continue;
            };
            let record = self
                .store
                .read_at(segment, *offset)?
                .ok_or_else(|| GetError::CorruptDB("index points past end of segment".into()))?;
            return match record {
                Record::Tombstone { .. } => Ok(None),
                Record::Put { value, .. } => Ok(Some(decode_value(value)?)),
            };
        }
        Ok(None)
    }

    /// Writes `key -> value`. Rolls over to a fresh active segment first if
    /// the write would make the active segment strictly larger than the
    /// segment size cap.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), WriteError> {
        let record = Record::put(key.as_bytes(), value.as_bytes());
        self.append_to_active(key, record)
    }

    /// Marks `key` as deleted. Subsequent `get`s return `None` until a later
    /// `set` resurrects the key.
    pub fn delete(&mut self, key: &str) -> Result<(), WriteError> {
        let record = Record::tombstone(key.as_bytes());
        self.append_to_active(key, record)
    }

    fn append_to_active(&mut self, key: &str, record: Record) -> Result<(), WriteError> {
        if key.len() > crate::codec::MAX_FIELD_LEN {
            return Err(WriteError::KeyOversize);
        }
        if let Record::Put { ref value, .. } = record {
            if value.len() > crate::codec::MAX_FIELD_LEN {
                return Err(WriteError::ValueOversize);
            }
        }

        let projected = self.store.size(self.active_index)? + record.encoded_len() as u64;
        if projected > self.max_segment_size {
            self.active_index += 1;
            self.store.create(self.active_index)?;
            self.index.entry(self.active_index).or_default();
            log::debug!("rolled over to segment {}", self.active_index);
        }

        let offset = self.store.append(self.active_index, &record)?;
        self.index
            .entry(self.active_index)
            .or_default()
            .insert(key.to_string(), offset);
        Ok(())
    }

    /// Removes every segment file and resets the engine to a fresh, empty
    /// database: `active_index = 0` with an empty `data0.db`.
    pub fn drop(&mut self) -> Result<(), DropError> {
        for segment in 0..=self.active_index {
            self.store.remove(segment)?;
        }
        self.index.clear();
        self.active_index = 0;
        self.store.create(0)?;
        self.index.entry(0).or_default();
        log::info!("dropped database, reset to a single empty segment");
        Ok(())
    }

    /// Compacts segment `index` (or the active segment if `index` is
    /// `None`) in place, dropping superseded and tombstoned entries within
    /// that segment only. Unlike [`Engine::compact_all`], this can target
    /// the active segment.
    pub fn compact(&mut self, index: Option<u64>) -> Result<(), CompactError> {
        let index = index.unwrap_or(self.active_index);
        if index > self.active_index {
            return Err(CompactError::NoSuchSegment(index));
        }
        self.compact_segment(index)
    }

    /// Compacts every sealed segment (`0..active_index`), sequentially.
    /// Intentionally skips the active segment — it is still being appended
    /// to by `set`/`delete`. Call [`Engine::compact`] with `None` to compact
    /// the active segment explicitly.
    pub fn compact_all(&mut self) -> Result<(), CompactError> {
        for segment in 0..self.active_index {
            self.compact_segment(segment)?;
        }
        Ok(())
    }

    /// Rewrites `segment`'s own file in place, keeping at most one record —
    /// its last write, whether a put or a tombstone — per key that appeared
    /// in it. Mirrors [`Engine::merge`]'s temp-file-then-promote pattern
    /// instead of re-issuing records through `set`/`delete`, so the result
    /// always lands back in `segment` itself, never in whatever segment
    /// happens to be active when compaction runs.
    fn compact_segment(&mut self, segment: u64) -> Result<(), CompactError> {
        log::debug!("compacting segment {}", segment);
        let mut survivors: Vec<(String, Record)> = Vec::new();

        for item in self.store.scan(segment)? {
            let (_offset, record) = item?;
            let key = decode_key(record.key().to_vec())?;
            if let Some(pos) = survivors.iter().position(|(k, _)| k == &key) {
                survivors[pos].1 = record;
            } else {
                survivors.push((key, record));
            }
        }

        let before_size = self.store.size(segment)?;

        let temp_path = self.store.temp_path(segment);
        let mut offsets: HashMap<String, u64> = HashMap::new();
        for (key, record) in &survivors {
            let offset = self.store.append_to_path(&temp_path, record)?;
            offsets.insert(key.clone(), offset);
        }
        if survivors.is_empty() {
            self.store.create_temp(segment)?;
        }

        self.store.remove(segment)?;
        self.store.promote_temp(segment)?;
        self.index.insert(segment, offsets);

        let after_size = self.store.size(segment)?;
        log::debug!(
            "compacted segment {}: {} -> {} bytes",
            segment,
            before_size,
            after_size
        );
        Ok(())
    }

    /// Rewrites every segment into a minimal set of segments, each holding
    /// at most one record per live key, packed up to the segment size cap.
    /// First calls [`Engine::compact_all`] to collapse per-segment
    /// duplicates; the sealed segments it skips are folded in by the
    /// ascending merge scan below regardless.
    pub fn merge(&mut self) -> Result<(), CompactError> {
        log::info!("starting merge of {} segment(s)", self.active_index + 1);
        self.compact_all()?;

        let mut pending: Vec<(String, Record)> = Vec::new();
        let mut pending_size: u64 = 0;
        let mut out_index: u64 = 0;
        let mut new_index: Index = Index::new();
        new_index.entry(0).or_default();

        for item in self.store.scan_all(self.active_index) {
            let (_segment, _offset, record) = item?;
            let key = decode_key(record.key().to_vec())?;
            let record_len = record.encoded_len() as u64;

            let existing_len = pending
                .iter()
                .find(|(k, _)| k == &key)
                .map(|(_, r)| r.encoded_len() as u64)
                .unwrap_or(0);
            let projected = pending_size - existing_len + record_len;

            if projected >= self.max_segment_size && !pending.is_empty() {
                flush_pending(&self.store, out_index, &pending, &mut new_index)?;
                out_index += 1;
                new_index.entry(out_index).or_default();
                pending.clear();
                pending_size = 0;
            }

            if let Some(pos) = pending.iter().position(|(k, _)| k == &key) {
                pending_size -= pending[pos].1.encoded_len() as u64;
                pending[pos].1 = record;
            } else {
                pending.push((key, record));
            }
            pending_size += record_len;
        }

        if !pending.is_empty() {
            flush_pending(&self.store, out_index, &pending, &mut new_index)?;
        } else if out_index == 0 {
            // No record survived the scan (an empty database merging with
            // itself): still need one temp segment to promote below.
            self.store.create_temp(0)?;
        }

        self.drop()?;
        for i in 0..=out_index {
            self.store.promote_temp(i)?;
        }

        self.index = new_index;
        self.active_index = out_index;
        log::info!("merge complete: {} segment(s)", self.active_index + 1);
        Ok(())
    }
}

fn flush_pending(
    store: &SegmentStore,
    out_index: u64,
    pending: &[(String, Record)],
    new_index: &mut Index,
) -> Result<(), CompactError> {
    let path = store.temp_path(out_index);
    for (key, record) in pending {
        let offset = store.append_to_path(&path, record)?;
        new_index
            .entry(out_index)
            .or_default()
            .insert(key.clone(), offset);
    }
    Ok(())
}

fn decode_key(bytes: Vec<u8>) -> Result<String, SegmentError> {
    String::from_utf8(bytes)
        .map_err(|_| SegmentError::CorruptDB("key is not valid utf-8".to_string()))
}

fn decode_value(bytes: Vec<u8>) -> Result<String, SegmentError> {
    String::from_utf8(bytes)
        .map_err(|_| SegmentError::CorruptDB("value is not valid utf-8".to_string()))
}
