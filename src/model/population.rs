//! Populations: named contiguous ranges of the global node index space.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{NodeIndex, PopId};
use crate::{Error, Result};

/// A contiguous range `[start, start + count)` owned by one population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PopulationRange {
    pub start: NodeIndex,
    pub count: u32,
    pub pop: PopId,
}

impl PopulationRange {
    pub fn new(start: NodeIndex, count: u32, pop: PopId) -> Self {
        Self { start, count, pop }
    }

    /// One past the last node (widened, so a range may end at `u32::MAX + 1`).
    pub fn end(&self) -> u64 {
        self.start as u64 + self.count as u64
    }

    pub fn contains(&self, node: NodeIndex) -> bool {
        node >= self.start && (node as u64) < self.end()
    }
}

/// All population ranges of a file, with labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopulationTable {
    by_start: BTreeMap<NodeIndex, PopulationRange>,
    by_id: BTreeMap<PopId, PopulationRange>,
    labels: BTreeMap<PopId, String>,
    total_nodes: u64,
}

impl PopulationTable {
    /// Build from ranges; overlapping ranges and duplicate ids are rejected.
    pub fn new(ranges: impl IntoIterator<Item = PopulationRange>) -> Result<Self> {
        let mut table = Self::default();
        for range in ranges {
            if table.by_id.contains_key(&range.pop) {
                return Err(Error::ContractViolation(format!(
                    "population {} defined twice",
                    range.pop
                )));
            }
            if let Some(other) = table.overlapping(&range) {
                return Err(Error::ContractViolation(format!(
                    "population {} [{}, {}) overlaps population {} [{}, {})",
                    range.pop,
                    range.start,
                    range.end(),
                    other.pop,
                    other.start,
                    other.end()
                )));
            }
            table.total_nodes += range.count as u64;
            table.by_start.insert(range.start, range);
            table.by_id.insert(range.pop, range);
        }
        Ok(table)
    }

    fn overlapping(&self, range: &PopulationRange) -> Option<&PopulationRange> {
        if range.count == 0 {
            return None;
        }
        let before = self.by_start.range(..=range.start).next_back().map(|(_, r)| r);
        let after = self.by_start.range(range.start..).next().map(|(_, r)| r);
        before
            .filter(|r| r.end() > range.start as u64 && r.count > 0)
            .or_else(|| after.filter(|r| (r.start as u64) < range.end() && r.count > 0))
    }

    /// Attach a name to a population id.
    pub fn with_label(mut self, pop: PopId, name: impl Into<String>) -> Self {
        self.labels.insert(pop, name.into());
        self
    }

    pub fn set_label(&mut self, pop: PopId, name: impl Into<String>) {
        self.labels.insert(pop, name.into());
    }

    /// The range containing `node`, if any.
    pub fn lookup(&self, node: NodeIndex) -> Option<&PopulationRange> {
        self.by_start
            .range(..=node)
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.contains(node))
    }

    pub fn get(&self, pop: PopId) -> Option<&PopulationRange> {
        self.by_id.get(&pop)
    }

    pub fn id_of(&self, name: &str) -> Option<PopId> {
        self.labels.iter().find(|(_, n)| n.as_str() == name).map(|(&id, _)| id)
    }

    pub fn name_of(&self, pop: PopId) -> Option<&str> {
        self.labels.get(&pop).map(String::as_str)
    }

    /// Range of the population called `name`.
    pub fn by_name(&self, name: &str) -> Result<&PopulationRange> {
        self.id_of(name)
            .and_then(|id| self.get(id))
            .ok_or_else(|| Error::NotFound(format!("population '{name}'")))
    }

    /// Ranges ordered by start.
    pub fn ranges(&self) -> impl Iterator<Item = &PopulationRange> {
        self.by_start.values()
    }

    pub fn labels(&self) -> impl Iterator<Item = (PopId, &str)> {
        self.labels.iter().map(|(&id, n)| (id, n.as_str()))
    }

    pub fn total_nodes(&self) -> u64 {
        self.total_nodes
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Legal `(source population, destination population)` combinations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionPairSet(BTreeSet<(PopId, PopId)>);

impl ProjectionPairSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, src: PopId, dst: PopId) -> bool {
        self.0.insert((src, dst))
    }

    pub fn contains(&self, src: PopId, dst: PopId) -> bool {
        self.0.contains(&(src, dst))
    }

    pub fn iter(&self) -> impl Iterator<Item = (PopId, PopId)> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(PopId, PopId)> for ProjectionPairSet {
    fn from_iter<I: IntoIterator<Item = (PopId, PopId)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
