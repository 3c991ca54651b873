//! # Array Store Trait
//!
//! This is the contract between the engine and the backing store.
//! The engine only ever needs typed 1-D arrays addressed by a
//! hierarchical path, with contiguous range ("hyperslab") reads.
//!
//! ## Implementations
//!
//! | Store | Module | Description |
//! |-------|--------|-------------|
//! | `MemoryStore` | `memory` | In-memory, shareable across rank threads, JSON snapshots |

pub mod layout;
pub mod memory;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::{Column, Primitive, ValueKind};
use crate::{Error, Result};

pub use memory::MemoryStore;

// ============================================================================
// Store Configuration
// ============================================================================

/// Which store to open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Empty in-memory store.
    #[default]
    Memory,

    /// In-memory store loaded from (and savable to) a JSON snapshot.
    Snapshot { path: PathBuf },
}

/// Open a store from its configuration.
pub fn open_store(config: &StoreConfig) -> Result<MemoryStore> {
    match config {
        StoreConfig::Memory => Ok(MemoryStore::new()),
        StoreConfig::Snapshot { path } => MemoryStore::load_snapshot(path),
    }
}

// ============================================================================
// ArrayStore Trait
// ============================================================================

/// Typed 1-D datasets addressed by `/`-separated paths.
///
/// Implementations must be safe to share between the ranks of a group;
/// each rank issues its own independent range reads.
pub trait ArrayStore: Send + Sync {
    /// Number of elements in the dataset at `path`.
    fn len(&self, path: &str) -> Result<u64>;

    /// Element kind of the dataset at `path`.
    fn kind(&self, path: &str) -> Result<ValueKind>;

    /// Read `count` elements starting at `offset`.
    ///
    /// A range extending past the end of the dataset is an error.
    fn read(&self, path: &str, offset: u64, count: u64) -> Result<Column>;

    /// Create or replace the dataset at `path`.
    fn write(&self, path: &str, column: Column) -> Result<()>;

    /// Append to the dataset at `path` (creating it if absent). Returns the
    /// offset at which the new elements start.
    fn append(&self, path: &str, column: Column) -> Result<u64>;

    fn exists(&self, path: &str) -> bool;

    /// Names of the direct children of `group`, sorted.
    fn children(&self, group: &str) -> Result<Vec<String>>;

    /// Read a whole dataset.
    fn read_all(&self, path: &str) -> Result<Column> {
        let n = self.len(path)?;
        self.read(path, 0, n)
    }
}

/// Typed range read.
pub fn read_values<T: Primitive>(
    store: &dyn ArrayStore,
    path: &str,
    offset: u64,
    count: u64,
) -> Result<Vec<T>> {
    store.read(path, offset, count)?.into_vec::<T>()
}

/// Typed whole-dataset read.
pub fn read_all_values<T: Primitive>(store: &dyn ArrayStore, path: &str) -> Result<Vec<T>> {
    store.read_all(path)?.into_vec::<T>()
}

/// Read a one-element dataset.
pub fn read_scalar<T: Primitive>(store: &dyn ArrayStore, path: &str) -> Result<T> {
    read_values::<T>(store, path, 0, 1)?
        .first()
        .copied()
        .ok_or_else(|| Error::StorageError(format!("scalar dataset '{path}' is empty")))
}
