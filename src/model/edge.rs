//! Edges and adjacency maps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::attr::AttrSet;
use super::{NodeIndex, Rank};
use crate::{Error, Result};

/// A directed edge between two global node indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub src: NodeIndex,
    pub dst: NodeIndex,
}

impl Edge {
    pub fn new(src: NodeIndex, dst: NodeIndex) -> Self {
        Self { src, dst }
    }
}

/// Which endpoint keys an [`EdgeMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EdgeMapType {
    /// Keyed by destination; neighbors are sources.
    #[default]
    Dst,
    /// Keyed by source; neighbors are destinations.
    Src,
}

/// All edges touching one key node, with per-namespace attribute values.
///
/// `attrs[n]` holds one record per entry of `neighbors` for namespace `n`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeRecord {
    pub neighbors: Vec<NodeIndex>,
    pub attrs: SmallVec<[AttrSet; 2]>,
}

impl EdgeRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty record whose namespaces mirror the given attribute sets.
    pub fn with_schema<'a>(namespaces: impl IntoIterator<Item = &'a AttrSet>) -> Self {
        Self {
            neighbors: Vec::new(),
            attrs: namespaces.into_iter().map(AttrSet::empty_like).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Append the edges of `other` after the edges of `self`.
    pub fn append(&mut self, other: EdgeRecord) -> Result<()> {
        if self.attrs.len() != other.attrs.len() {
            return Err(Error::ContractViolation(format!(
                "edge record has {} namespaces, merged record has {}",
                self.attrs.len(),
                other.attrs.len()
            )));
        }
        self.neighbors.extend_from_slice(&other.neighbors);
        for (mine, theirs) in self.attrs.iter_mut().zip(&other.attrs) {
            mine.append(theirs)?;
        }
        Ok(())
    }
}

/// Adjacency keyed by node index.
pub type EdgeMap = BTreeMap<NodeIndex, EdgeRecord>;

/// Adjacency bucketed by the rank that owns each key.
pub type RankEdgeMap = BTreeMap<Rank, EdgeMap>;

/// Merge `from` into `into`; existing keys get the new edges appended.
pub fn merge_edge_maps(into: &mut EdgeMap, from: EdgeMap) -> Result<()> {
    for (key, record) in from {
        match into.get_mut(&key) {
            Some(existing) => existing.append(record)?,
            None => {
                into.insert(key, record);
            }
        }
    }
    Ok(())
}

/// Total number of edges in a map.
pub fn edge_count(map: &EdgeMap) -> usize {
    map.values().map(EdgeRecord::len).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(neighbors: &[NodeIndex], weights: &[f32]) -> EdgeRecord {
        let mut attrs = AttrSet::new();
        attrs.insert_values("weight", weights.to_vec()).unwrap();
        EdgeRecord { neighbors: neighbors.to_vec(), attrs: SmallVec::from_vec(vec![attrs]) }
    }

    #[test]
    fn test_merge_appends_existing_keys() {
        let mut a = EdgeMap::new();
        a.insert(1, record(&[10], &[0.5]));
        let mut b = EdgeMap::new();
        b.insert(1, record(&[11, 12], &[1.5, 2.5]));
        b.insert(2, record(&[13], &[3.5]));

        merge_edge_maps(&mut a, b).unwrap();
        assert_eq!(a[&1].neighbors, vec![10, 11, 12]);
        assert_eq!(a[&1].attrs[0].values::<f32>("weight"), Some(&[0.5f32, 1.5, 2.5][..]));
        assert_eq!(a[&2].neighbors, vec![13]);
        assert_eq!(edge_count(&a), 4);
    }

    #[test]
    fn test_append_namespace_mismatch() {
        let mut a = record(&[1], &[1.0]);
        assert!(a.append(EdgeRecord { neighbors: vec![2], attrs: SmallVec::new() }).is_err());
    }
}
