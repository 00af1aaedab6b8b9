//! Core storage engine of a small, log-structured key-value database.
//!
//! The engine persists string key/value pairs in append-only segment files
//! (`data{i}.db`) on a local filesystem. It supports point lookups, updates,
//! and deletes (via tombstones), and provides two housekeeping operations:
//! per-segment [`Engine::compact`], which drops superseded and tombstoned
//! entries within one segment, and whole-database [`Engine::merge`], which
//! coalesces every segment into a fresh, minimal set bounded by a
//! per-segment size cap.
//!
//! This crate is the storage core only: an HTTP service and a CLI client
//! that talk to it are separate, out-of-scope collaborators.
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use toydb_engine::Engine;
//!
//! let mut db = Engine::open("./data".as_ref())?;
//! db.set("hello", "world")?;
//! assert_eq!(db.get("hello")?, Some("world".to_string()));
//! db.delete("hello")?;
//! assert_eq!(db.get("hello")?, None);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod engine;
pub mod error;
pub mod segment;

pub use engine::{Engine, MAX_SEGMENT_SIZE};
