//! Core library for the Cairn build cache.
//!
//! Archives directory trees into tar streams, uploads them under a generated
//! key and restores them on later runs. See [`Cache`] for the entry point.

pub mod archive;
pub mod cache;
pub mod config;
pub mod error;
pub mod key;
pub mod multi_error;
pub mod path_utils;
pub mod rebuild;
pub mod restore;
pub mod storage;
pub mod streaming;

mod worker;

pub use archive::{Archive, ArchiveFormat, GzipArchive, TarArchive, ZstdArchive};
pub use cache::Cache;
pub use config::{CacheConfig, TransferSettings};
pub use error::{Error, Result};
pub use key::{GeneratedKey, KeyChain, KeyGenerator, KeySource, Metadata};
pub use multi_error::MultiError;
pub use rebuild::Rebuilder;
pub use restore::Restorer;
pub use storage::{Backend, BackendConfig, FileEntry, Storage};
