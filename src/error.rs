use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while opening an [`Engine`](crate::engine::Engine) over a
/// data directory.
#[derive(Error, Debug)]
pub enum ConstructError {
    #[error("path exists but is not a directory: {0}")]
    BadPath(PathBuf),

    #[error("corrupt database: {0}")]
    CorruptDB(String),

    #[error("IO error")]
    IOError(#[from] io::Error),
}

/// Errors raised by [`Engine::get`](crate::engine::Engine::get).
#[derive(Error, Debug)]
pub enum GetError {
    #[error("corrupt database: {0}")]
    CorruptDB(String),

    #[error("IO error")]
    IOError(#[from] io::Error),
}

/// Errors raised by [`Engine::set`](crate::engine::Engine::set) and
/// [`Engine::delete`](crate::engine::Engine::delete).
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("key exceeds max size (expected <= {} bytes)", crate::codec::MAX_FIELD_LEN)]
    KeyOversize,

    #[error("value exceeds max size (expected <= {} bytes)", crate::codec::MAX_FIELD_LEN)]
    ValueOversize,

    #[error("corrupt database: {0}")]
    CorruptDB(String),

    #[error("IO error")]
    IOError(#[from] io::Error),
}

/// Errors raised by [`Engine::drop`](crate::engine::Engine::drop).
#[derive(Error, Debug)]
pub enum DropError {
    #[error("IO error")]
    IOError(#[from] io::Error),
}

/// Errors raised by [`Engine::compact`](crate::engine::Engine::compact),
/// [`Engine::compact_all`](crate::engine::Engine::compact_all), and
/// [`Engine::merge`](crate::engine::Engine::merge).
#[derive(Error, Debug)]
pub enum CompactError {
    #[error("segment {0} does not exist")]
    NoSuchSegment(u64),

    #[error("corrupt database: {0}")]
    CorruptDB(String),

    #[error("IO error")]
    IOError(#[from] io::Error),
}

/// Errors raised while reading or scanning a single segment.
#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("can't derive a segment id from path: {0}")]
    InvalidPath(PathBuf),

    #[error("corrupt database: {0}")]
    CorruptDB(String),

    #[error("IO error at path: {path}")]
    IOErrorAtPath { path: PathBuf, source: io::Error },

    #[error("IO error")]
    IOError(#[from] io::Error),
}

impl From<WriteError> for SegmentError {
    fn from(e: WriteError) -> Self {
        match e {
            WriteError::IOError(e) => SegmentError::IOError(e),
            WriteError::CorruptDB(msg) => SegmentError::CorruptDB(msg),
            // `SegmentStore` only serializes records its caller already
            // validated, so this path means on-disk data is bogus, not that
            // a fresh write was rejected.
            WriteError::KeyOversize => {
                SegmentError::CorruptDB("key exceeds max size".to_string())
            }
            WriteError::ValueOversize => {
                SegmentError::CorruptDB("value exceeds max size".to_string())
            }
        }
    }
}

impl From<SegmentError> for ConstructError {
    fn from(e: SegmentError) -> Self {
        match e {
            SegmentError::IOError(e) => ConstructError::IOError(e),
            SegmentError::IOErrorAtPath { source, .. } => ConstructError::IOError(source),
            SegmentError::CorruptDB(msg) => ConstructError::CorruptDB(msg),
            SegmentError::InvalidPath(p) => {
                ConstructError::CorruptDB(format!("invalid segment path: {}", p.display()))
            }
        }
    }
}

impl From<SegmentError> for GetError {
    fn from(e: SegmentError) -> Self {
        match e {
            SegmentError::IOError(e) => GetError::IOError(e),
            SegmentError::IOErrorAtPath { source, .. } => GetError::IOError(source),
            SegmentError::CorruptDB(msg) => GetError::CorruptDB(msg),
            SegmentError::InvalidPath(p) => {
                GetError::CorruptDB(format!("invalid segment path: {}", p.display()))
            }
        }
    }
}

impl From<SegmentError> for WriteError {
    fn from(e: SegmentError) -> Self {
        match e {
            SegmentError::IOError(e) => WriteError::IOError(e),
            SegmentError::IOErrorAtPath { source, .. } => WriteError::IOError(source),
            SegmentError::CorruptDB(msg) => WriteError::CorruptDB(msg),
            SegmentError::InvalidPath(p) => {
                WriteError::CorruptDB(format!("invalid segment path: {}", p.display()))
            }
        }
    }
}

impl From<SegmentError> for DropError {
    fn from(e: SegmentError) -> Self {
        match e {
            SegmentError::IOError(e) => DropError::IOError(e),
            SegmentError::IOErrorAtPath { source, .. } => DropError::IOError(source),
            // `drop` only removes and recreates segment files; it never
            // scans or reads one, so these never actually occur in practice.
            SegmentError::CorruptDB(msg) => {
                DropError::IOError(io::Error::new(io::ErrorKind::Other, msg))
            }
            SegmentError::InvalidPath(p) => DropError::IOError(io::Error::new(
                io::ErrorKind::Other,
                format!("invalid segment path: {}", p.display()),
            )),
        }
    }
}

impl From<SegmentError> for CompactError {
    fn from(e: SegmentError) -> Self {
        match e {
            SegmentError::IOError(e) => CompactError::IOError(e),
            SegmentError::IOErrorAtPath { source, .. } => CompactError::IOError(source),
            SegmentError::CorruptDB(msg) => CompactError::CorruptDB(msg),
            SegmentError::InvalidPath(p) => {
                CompactError::CorruptDB(format!("invalid segment path: {}", p.display()))
            }
        }
    }
}

impl From<WriteError> for CompactError {
    fn from(e: WriteError) -> Self {
        match e {
            WriteError::IOError(e) => CompactError::IOError(e),
            WriteError::CorruptDB(msg) => CompactError::CorruptDB(msg),
            // Re-issued writes during compaction/merge operate on data that
            // was already accepted once, so an oversize rejection here means
            // the on-disk record itself is bogus.
            WriteError::KeyOversize => {
                CompactError::CorruptDB("re-issued key exceeds max size".to_string())
            }
            WriteError::ValueOversize => {
                CompactError::CorruptDB("re-issued value exceeds max size".to_string())
            }
        }
    }
}

impl From<DropError> for CompactError {
    fn from(e: DropError) -> Self {
        match e {
            DropError::IOError(e) => CompactError::IOError(e),
        }
    }
}
