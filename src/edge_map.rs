//! Build adjacency maps from DBS projections.
//!
//! Each decoded edge lands in the record of its key node (destination for
//! [`EdgeMapType::Dst`], source for [`EdgeMapType::Src`]): the other
//! endpoint is appended to the neighbor list and the edge's value of every
//! attribute column is appended to the record's attribute sets, so record
//! attributes stay in edge order.

use std::collections::BTreeMap;
use std::hash::BuildHasher;

use tracing::debug;

use crate::dbs::DbsProjection;
use crate::model::{AttrSet, EdgeMap, EdgeMapType, EdgeRecord, NodeIndex, Rank, RankEdgeMap};
use crate::{Error, Result};

// ============================================================================
// Node to rank assignment
// ============================================================================

/// Which rank owns a node.
pub trait RankAssignment {
    fn rank_of(&self, node: NodeIndex) -> Option<Rank>;
}

impl<S: BuildHasher> RankAssignment for hashbrown::HashMap<NodeIndex, Rank, S> {
    fn rank_of(&self, node: NodeIndex) -> Option<Rank> {
        self.get(&node).copied()
    }
}

impl RankAssignment for BTreeMap<NodeIndex, Rank> {
    fn rank_of(&self, node: NodeIndex) -> Option<Rank> {
        self.get(&node).copied()
    }
}

/// Node `n` belongs to rank `n % size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundRobin(pub usize);

impl RankAssignment for RoundRobin {
    fn rank_of(&self, node: NodeIndex) -> Option<Rank> {
        (self.0 > 0).then(|| node as usize % self.0)
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Where the builder puts the record for a key.
trait RecordSink {
    fn record(&mut self, key: NodeIndex, attrs: &[AttrSet]) -> Result<&mut EdgeRecord>;
}

impl RecordSink for EdgeMap {
    fn record(&mut self, key: NodeIndex, attrs: &[AttrSet]) -> Result<&mut EdgeRecord> {
        Ok(self.entry(key).or_insert_with(|| EdgeRecord::with_schema(attrs)))
    }
}

struct RankSink<'a, A: ?Sized> {
    map: &'a mut RankEdgeMap,
    ranks: &'a A,
}

impl<A: RankAssignment + ?Sized> RecordSink for RankSink<'_, A> {
    fn record(&mut self, key: NodeIndex, attrs: &[AttrSet]) -> Result<&mut EdgeRecord> {
        let rank = self
            .ranks
            .rank_of(key)
            .ok_or_else(|| Error::ContractViolation(format!("node {key} has no rank assignment")))?;
        Ok(self
            .map
            .entry(rank)
            .or_default()
            .entry(key)
            .or_insert_with(|| EdgeRecord::with_schema(attrs)))
    }
}

fn append_edges<S: RecordSink>(
    prj: &DbsProjection,
    attrs: &[AttrSet],
    map_type: EdgeMapType,
    sink: &mut S,
) -> Result<usize> {
    let expected = prj.num_edges();
    for (ns, set) in attrs.iter().enumerate() {
        if !set.is_empty() && set.num_records() != expected {
            return Err(Error::ContractViolation(format!(
                "attribute namespace {ns} has {} records for {expected} edges",
                set.num_records()
            )));
        }
    }

    let count = prj.for_each_edge(|j, edge| {
        let (key, other) = match map_type {
            EdgeMapType::Dst => (edge.dst, edge.src),
            EdgeMapType::Src => (edge.src, edge.dst),
        };
        let record = sink.record(key, attrs)?;
        record.neighbors.push(other);
        for (mine, set) in record.attrs.iter_mut().zip(attrs) {
            mine.push_record_from(set, j)?;
        }
        Ok(())
    })?;

    if count != expected {
        return Err(Error::ContractViolation(format!(
            "edge map received {count} edges, source index holds {expected}"
        )));
    }
    Ok(count)
}

/// Append the edges of `prj` to `map`. `attrs` holds one attribute set per
/// namespace with one record per edge. Returns the number of edges added.
pub fn append_edge_map(
    prj: &DbsProjection,
    attrs: &[AttrSet],
    map_type: EdgeMapType,
    map: &mut EdgeMap,
) -> Result<usize> {
    let count = append_edges(prj, attrs, map_type, map)?;
    debug!(edges = count, keys = map.len(), ?map_type, "appended edge map");
    Ok(count)
}

/// Like [`append_edge_map`], but buckets each record under the rank that
/// owns its key. A key without an owner is an error.
pub fn append_rank_edge_map<A>(
    prj: &DbsProjection,
    attrs: &[AttrSet],
    node_ranks: &A,
    map_type: EdgeMapType,
    map: &mut RankEdgeMap,
) -> Result<usize>
where
    A: RankAssignment + ?Sized,
{
    let count = append_edges(prj, attrs, map_type, &mut RankSink { map: &mut *map, ranks: node_ranks })?;
    debug!(edges = count, ranks = map.len(), ?map_type, "appended rank edge map");
    Ok(count)
}
