//! # syncq Storage
//!
//! Byte-level persistence for the syncq leaf and hub tables.
//!
//! Backends are **opaque byte stores**: they append, read back, cut a
//! torn tail and atomically replace bytes. They know nothing about queue
//! items or mappings. On top of them, [`Journal`] frames each record with
//! a magic header, length and CRC32 so a table can be rebuilt by replaying
//! the journal after a crash.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and throwaway nodes
//! - [`FileBackend`] - One append-mode file per journal
//!
//! ## Example
//!
//! ```rust
//! use syncq_storage::{InMemoryBackend, Journal};
//!
//! let mut journal = Journal::new(InMemoryBackend::new());
//! journal.append(b"first").unwrap();
//! journal.append(b"second").unwrap();
//!
//! let replay = journal.replay().unwrap();
//! assert_eq!(replay.records, vec![b"first".to_vec(), b"second".to_vec()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod journal;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use journal::{compute_crc32, Durability, Journal, Replay, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use memory::InMemoryBackend;
