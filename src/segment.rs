//! The directory of append-only segment files and the primitives for
//! appending to, reading from, and scanning one or all of them.
//!
//! Segments are named `data{i}.db` for contiguous non-negative indices
//! starting at 0; the file at the store's `active_index` is the sole append
//! target, everything below it is sealed. Roll-over and merge policy live
//! one layer up, in [`crate::engine`].

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::codec::Record;
use crate::error::SegmentError;

const SEGMENT_PREFIX: &str = "data";
const TEMP_SEGMENT_PREFIX: &str = "tempdata";
const SEGMENT_EXT: &str = "db";

fn segment_filename(prefix: &str, index: u64) -> String {
    format!("{}{}.{}", prefix, index, SEGMENT_EXT)
}

/// Owns the data directory and knows how to name, create, append to, read
/// from, and scan its segment files. Holds no open file handles of its own:
/// every call opens the file it needs.
pub struct SegmentStore {
    dir: PathBuf,
}

impl SegmentStore {
    /// Opens (creating if necessary) the segment directory and determines
    /// the current active index by an ascending existence probe. Does not
    /// parse any segment content.
    pub fn open(dir: &Path) -> Result<(SegmentStore, u64), SegmentError> {
        if dir.exists() && !dir.is_dir() {
            return Err(SegmentError::InvalidPath(dir.to_path_buf()));
        }
        fs::create_dir_all(dir)?;

        let mut active_index = 0u64;
        while dir.join(segment_filename(SEGMENT_PREFIX, active_index + 1)).exists() {
            active_index += 1;
        }

        let store = SegmentStore {
            dir: dir.to_path_buf(),
        };
        store.ensure_exists(active_index)?;
        Ok((store, active_index))
    }

    pub fn path(&self, index: u64) -> PathBuf {
        self.dir.join(segment_filename(SEGMENT_PREFIX, index))
    }

    pub fn temp_path(&self, index: u64) -> PathBuf {
        self.dir.join(segment_filename(TEMP_SEGMENT_PREFIX, index))
    }

    fn ensure_exists(&self, index: u64) -> Result<(), SegmentError> {
        let path = self.path(index);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| SegmentError::IOErrorAtPath {
                path: path.clone(),
                source,
            })?;
        Ok(())
    }

    /// Size in bytes of segment `index`, or 0 if it does not exist.
    pub fn size(&self, index: u64) -> Result<u64, SegmentError> {
        match fs::metadata(self.path(index)) {
            Ok(m) => Ok(m.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Creates segment `index` if it does not already exist.
    pub fn create(&self, index: u64) -> Result<(), SegmentError> {
        self.ensure_exists(index)
    }

    /// Creates `tempdata{index}.db` if it does not already exist, empty.
    /// Used by merge to guarantee there is always at least one temp segment
    /// to promote, even when no record survived the merge scan.
    pub fn create_temp(&self, index: u64) -> Result<(), SegmentError> {
        let path = self.temp_path(index);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| SegmentError::IOErrorAtPath { path, source })?;
        Ok(())
    }

    /// Appends `record`'s serialized bytes to segment `index`, creating the
    /// segment if needed. Returns the byte offset the record was written at.
    pub fn append(&self, index: u64, record: &Record) -> Result<u64, SegmentError> {
        self.append_to_path(&self.path(index), record)
    }

    /// Same as [`SegmentStore::append`] but targets an arbitrary path,
    /// used by merge to write `tempdata{i}.db` files.
    pub fn append_to_path(&self, path: &Path, record: &Record) -> Result<u64, SegmentError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| SegmentError::IOErrorAtPath {
                path: path.to_path_buf(),
                source,
            })?;
        let offset = file.metadata()?.len();
        let mut buf = Vec::with_capacity(record.encoded_len());
        record.write_to(&mut buf)?;
        file.write_all(&buf)?;
        Ok(offset)
    }

    /// Reads exactly one record from segment `index` at `offset`.
    pub fn read_at(&self, index: u64, offset: u64) -> Result<Option<Record>, SegmentError> {
        let path = self.path(index);
        let mut file = File::open(&path).map_err(|source| SegmentError::IOErrorAtPath {
            path: path.clone(),
            source,
        })?;
        file.seek(SeekFrom::Start(offset))?;
        Record::read_from(&mut file)
    }

    /// Scans every record in segment `index`, in file order, yielding each
    /// record alongside the byte offset it starts at.
    pub fn scan(&self, index: u64) -> Result<SegmentScan, SegmentError> {
        let path = self.path(index);
        let file = File::open(&path).map_err(|source| SegmentError::IOErrorAtPath {
            path: path.clone(),
            source,
        })?;
        Ok(SegmentScan {
            reader: CountingReader::new(BufReader::new(file)),
        })
    }

    /// Scans every record across segments `0..=up_to_index`, in ascending
    /// segment order and file order within each segment, yielding
    /// `(segment_index, offset, record)`.
    pub fn scan_all(&self, up_to_index: u64) -> ScanAll<'_> {
        ScanAll {
            store: self,
            current_index: 0,
            up_to_index,
            current: None,
        }
    }

    /// Removes segment `index` if present; tolerates it already being gone.
    pub fn remove(&self, index: u64) -> Result<(), SegmentError> {
        match fs::remove_file(self.path(index)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Renames `tempdata{index}.db` to `data{index}.db`.
    pub fn promote_temp(&self, index: u64) -> Result<(), SegmentError> {
        fs::rename(self.temp_path(index), self.path(index))?;
        Ok(())
    }
}

/// Wraps a reader and counts bytes delivered through it, so a scan can report
/// the file offset each record started at without re-seeking (which would
/// discard the inner `BufReader`'s buffer on every record).
struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R> CountingReader<R> {
    fn new(inner: R) -> Self {
        CountingReader { inner, count: 0 }
    }
}

impl<R: std::io::Read> std::io::Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// Iterator over the records of a single segment, in file order, yielding
/// `(offset, record)`.
pub struct SegmentScan {
    reader: CountingReader<BufReader<File>>,
}

impl Iterator for SegmentScan {
    type Item = Result<(u64, Record), SegmentError>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.reader.count;
        match Record::read_from(&mut self.reader) {
            Ok(Some(record)) => Some(Ok((start, record))),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Iterator over the records of every segment `0..=up_to_index`, ascending.
pub struct ScanAll<'a> {
    store: &'a SegmentStore,
    current_index: u64,
    up_to_index: u64,
    current: Option<SegmentScan>,
}

impl<'a> Iterator for ScanAll<'a> {
    type Item = Result<(u64, u64, Record), SegmentError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                if self.current_index > self.up_to_index {
                    return None;
                }
                match self.store.scan(self.current_index) {
                    Ok(scan) => self.current = Some(scan),
                    Err(e) => return Some(Err(e)),
                }
            }
            let segment_index = self.current_index;
            match self.current.as_mut().unwrap().next() {
                Some(Ok((offset, record))) => return Some(Ok((segment_index, offset, record))),
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    self.current = None;
                    self.current_index += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_segment_zero_when_empty() {
        let dir = tempdir().unwrap();
        let (store, active) = SegmentStore::open(dir.path()).unwrap();
        assert_eq!(active, 0);
        assert!(store.path(0).exists());
    }

    #[test]
    fn open_rejects_non_directory_path() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("not_a_dir");
        File::create(&file_path).unwrap();
        let err = SegmentStore::open(&file_path).unwrap_err();
        assert!(matches!(err, SegmentError::InvalidPath(_)));
    }

    #[test]
    fn open_finds_highest_contiguous_segment() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("data0.db")).unwrap();
        File::create(dir.path().join("data1.db")).unwrap();
        File::create(dir.path().join("data2.db")).unwrap();
        // data4 without data3 must not be picked up.
        File::create(dir.path().join("data4.db")).unwrap();

        let (_store, active) = SegmentStore::open(dir.path()).unwrap();
        assert_eq!(active, 2);
    }

    #[test]
    fn append_returns_pre_append_offset() {
        let dir = tempdir().unwrap();
        let (store, _) = SegmentStore::open(dir.path()).unwrap();
        let off0 = store.append(0, &Record::put("a", "1")).unwrap();
        let off1 = store.append(0, &Record::put("b", "2")).unwrap();
        assert_eq!(off0, 0);
        assert_eq!(off1, Record::put("a", "1").encoded_len() as u64);
    }

    #[test]
    fn read_at_returns_record_at_offset() {
        let dir = tempdir().unwrap();
        let (store, _) = SegmentStore::open(dir.path()).unwrap();
        let off = store.append(0, &Record::put("a", "1")).unwrap();
        store.append(0, &Record::put("b", "2")).unwrap();
        let record = store.read_at(0, off).unwrap().unwrap();
        assert_eq!(record, Record::put("a", "1"));
    }

    #[test]
    fn scan_all_visits_segments_in_ascending_order() {
        let dir = tempdir().unwrap();
        let (store, _) = SegmentStore::open(dir.path()).unwrap();
        store.create(1).unwrap();
        store.create(2).unwrap();
        store.append(0, &Record::put("a", "1")).unwrap();
        store.append(1, &Record::put("b", "2")).unwrap();
        store.append(2, &Record::put("c", "3")).unwrap();

        let records: Vec<_> = store
            .scan_all(2)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(
            records,
            vec![
                (0, 0, Record::put("a", "1")),
                (1, 0, Record::put("b", "2")),
                (2, 0, Record::put("c", "3")),
            ]
        );
    }

    #[test]
    fn scan_reports_offsets_within_a_segment() {
        let dir = tempdir().unwrap();
        let (store, _) = SegmentStore::open(dir.path()).unwrap();
        let off_a = store.append(0, &Record::put("a", "1")).unwrap();
        let off_b = store.append(0, &Record::put("b", "2")).unwrap();

        let records: Vec<_> = store.scan(0).unwrap().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(
            records,
            vec![(off_a, Record::put("a", "1")), (off_b, Record::put("b", "2"))]
        );
    }

    #[test]
    fn remove_tolerates_missing_file() {
        let dir = tempdir().unwrap();
        let (store, _) = SegmentStore::open(dir.path()).unwrap();
        store.remove(0).unwrap();
        store.remove(0).unwrap();
    }

    #[test]
    fn promote_temp_renames_file() {
        let dir = tempdir().unwrap();
        let (store, _) = SegmentStore::open(dir.path()).unwrap();
        store
            .append_to_path(&store.temp_path(5), &Record::put("a", "1"))
            .unwrap();
        store.promote_temp(5).unwrap();
        assert!(store.path(5).exists());
        assert!(!store.temp_path(5).exists());
    }
}
