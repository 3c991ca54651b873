//! In-memory array store.
//!
//! This is the reference implementation of `ArrayStore`.
//! Datasets live in an ordered map protected by a RwLock; clones share the
//! same datasets, so every rank thread of a `LocalComm` group can hold its
//! own handle onto one "file".
//!
//! ## Limitations
//!
//! - **Whole-dataset writes**: `write()` replaces, `append()` extends; there
//!   is no partial overwrite.
//! - **No chunking or compression**: snapshots are plain JSON.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::ArrayStore;
use crate::model::{Column, ValueKind};
use crate::{Error, Result};

// ============================================================================
// MemoryStore
// ============================================================================

/// Shared in-memory dataset store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<BTreeMap<String, Column>>>,
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{trimmed}")
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of datasets.
    pub fn dataset_count(&self) -> usize {
        self.inner.read().len()
    }

    /// Write every dataset to a JSON snapshot.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &*self.inner.read())?;
        debug!(path = %path.display(), "saved store snapshot");
        Ok(())
    }

    /// Load a store from a JSON snapshot.
    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let datasets: BTreeMap<String, Column> = serde_json::from_reader(reader)?;
        debug!(path = %path.display(), datasets = datasets.len(), "loaded store snapshot");
        Ok(Self { inner: Arc::new(RwLock::new(datasets)) })
    }

    fn with_dataset<R>(&self, path: &str, f: impl FnOnce(&Column) -> Result<R>) -> Result<R> {
        let datasets = self.inner.read();
        let col = datasets
            .get(&normalize(path))
            .ok_or_else(|| Error::NotFound(format!("dataset '{path}'")))?;
        f(col)
    }
}

// ============================================================================
// ArrayStore impl
// ============================================================================

impl ArrayStore for MemoryStore {
    fn len(&self, path: &str) -> Result<u64> {
        self.with_dataset(path, |col| Ok(col.len() as u64))
    }

    fn kind(&self, path: &str) -> Result<ValueKind> {
        self.with_dataset(path, |col| Ok(col.kind()))
    }

    fn read(&self, path: &str, offset: u64, count: u64) -> Result<Column> {
        self.with_dataset(path, |col| {
            let end = offset.checked_add(count).filter(|&e| e <= col.len() as u64).ok_or_else(|| {
                Error::StorageError(format!(
                    "read of {count} elements at {offset} past end of '{path}' (length {})",
                    col.len()
                ))
            })?;
            col.slice(offset as usize..end as usize)
        })
    }

    fn write(&self, path: &str, column: Column) -> Result<()> {
        self.inner.write().insert(normalize(path), column);
        Ok(())
    }

    fn append(&self, path: &str, column: Column) -> Result<u64> {
        let mut datasets = self.inner.write();
        match datasets.get_mut(&normalize(path)) {
            Some(existing) => {
                let offset = existing.len() as u64;
                existing.extend_from(&column)?;
                Ok(offset)
            }
            None => {
                datasets.insert(normalize(path), column);
                Ok(0)
            }
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.inner.read().contains_key(&normalize(path))
    }

    fn children(&self, group: &str) -> Result<Vec<String>> {
        let group = normalize(group);
        let prefix = if group == "/" { group } else { format!("{group}/") };
        let datasets = self.inner.read();
        let names: BTreeSet<String> = datasets
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| k[prefix.len()..].split('/').next().map(str::to_owned))
            .collect();
        Ok(names.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_ranges() {
        let store = MemoryStore::new();
        store.write("/a/b", Column::from(vec![1u32, 2, 3, 4])).unwrap();
        assert_eq!(store.len("a/b").unwrap(), 4);
        assert_eq!(store.read("/a/b", 1, 2).unwrap(), Column::from(vec![2u32, 3]));
        assert_eq!(store.read("/a/b", 4, 0).unwrap(), Column::from(Vec::<u32>::new()));
        assert!(store.read("/a/b", 3, 2).is_err());
        assert!(matches!(store.len("/missing"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_append_and_children() {
        let store = MemoryStore::new();
        assert_eq!(store.append("/g/x", Column::from(vec![1u8])).unwrap(), 0);
        assert_eq!(store.append("/g/x", Column::from(vec![2u8, 3])).unwrap(), 1);
        assert!(store.append("/g/x", Column::from(vec![1u16])).is_err());
        store.write("/g/h/y", Column::from(vec![0.5f32])).unwrap();
        store.write("/gg/z", Column::from(vec![0.5f32])).unwrap();
        assert_eq!(store.children("/g").unwrap(), vec!["h".to_string(), "x".to_string()]);
        assert_eq!(store.children("/").unwrap(), vec!["g".to_string(), "gg".to_string()]);
        assert!(store.children("/nothing").unwrap().is_empty());
    }

    #[test]
    fn test_clones_share_datasets() {
        let a = MemoryStore::new();
        let b = a.clone();
        a.write("/d", Column::from(vec![1i32])).unwrap();
        assert!(b.exists("/d"));
        assert_eq!(b.dataset_count(), 1);
    }
}
