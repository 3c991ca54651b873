//! # Destination Block Sparse codec
//!
//! A DBS projection is a two-level CSR over destination nodes. The block
//! layer skips runs of destinations with no incoming edges:
//!
//! ```text
//! block_ptr  [0, 2, 4]            block b covers slots block_ptr[b]..block_ptr[b+1]
//! block_base [0, 5]               first destination (minus dst_start) of block b
//! dst_ptr    [0, 1, 3, 4, 6]      slot i has sources src_idx[dst_ptr[i]..dst_ptr[i+1]]
//! src_idx    [10, 11, 12, 13, 14, 15]
//! ```
//!
//! The `reader` and `writer` submodules move projections between this
//! representation and an [`ArrayStore`](crate::storage::ArrayStore).

pub mod reader;
pub mod writer;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::model::{is_non_decreasing, prefix_sum, AttrSet, Edge, EdgeMap, EdgeRecord, NodeIndex, Rank};
use crate::{Error, Result};

pub use reader::{read_dbs_partition, read_edge_attributes, read_projection_meta, ProjectionMeta};
pub use writer::write_dbs_projection;

// ============================================================================
// DbsProjection
// ============================================================================

/// The DBS arrays of one projection, or of one rank's slice of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbsProjection {
    /// Added to `block_base` entries to form global destination ids.
    pub dst_start: NodeIndex,
    /// Added to `src_idx` entries to form global source ids.
    pub src_start: NodeIndex,
    pub block_ptr: Vec<u64>,
    pub block_base: Vec<NodeIndex>,
    pub dst_ptr: Vec<u64>,
    pub src_idx: Vec<NodeIndex>,
    /// Offset of `src_idx[0]` within the whole projection. Edge attributes
    /// for this slice start at the same offset.
    pub edge_base: u64,
}

impl DbsProjection {
    /// A projection slice with no blocks.
    pub fn empty(dst_start: NodeIndex, src_start: NodeIndex) -> Self {
        Self { dst_start, src_start, ..Self::default() }
    }

    pub fn num_blocks(&self) -> usize {
        self.block_ptr.len().saturating_sub(1)
    }

    pub fn num_edges(&self) -> usize {
        self.src_idx.len()
    }

    /// Structural checks on the four arrays.
    pub fn check(&self) -> Result<()> {
        if self.block_ptr.is_empty() {
            if !self.block_base.is_empty() || !self.src_idx.is_empty() {
                return Err(Error::ContractViolation(format!(
                    "projection without block pointer has {} block bases and {} edges",
                    self.block_base.len(),
                    self.src_idx.len()
                )));
            }
            return Ok(());
        }
        if self.block_base.len() + 1 != self.block_ptr.len() {
            return Err(Error::ContractViolation(format!(
                "{} block bases for a block pointer of length {}",
                self.block_base.len(),
                self.block_ptr.len()
            )));
        }
        if !is_non_decreasing(&self.block_ptr) {
            return Err(Error::ContractViolation("block pointer is not non-decreasing".into()));
        }
        if !is_non_decreasing(&self.dst_ptr) {
            return Err(Error::ContractViolation("destination pointer is not non-decreasing".into()));
        }
        let first_slot = self.block_ptr[0];
        let last_slot = self.block_ptr[self.block_ptr.len() - 1];
        if first_slot != 0 {
            return Err(Error::ContractViolation(format!(
                "block pointer starts at {first_slot}; rebase it first"
            )));
        }
        if last_slot > self.dst_ptr.len() as u64 {
            return Err(Error::ContractViolation(format!(
                "blocks cover {last_slot} slots but destination pointer has {} entries",
                self.dst_ptr.len()
            )));
        }
        match (self.dst_ptr.first(), self.dst_ptr.last()) {
            (Some(&0), Some(&last)) if last == self.src_idx.len() as u64 => Ok(()),
            (None, None) if self.src_idx.is_empty() => Ok(()),
            (first, last) => Err(Error::ContractViolation(format!(
                "destination pointer spans {first:?}..{last:?} over {} source indices",
                self.src_idx.len()
            ))),
        }
    }

    /// Visit every edge in destination-major order.
    ///
    /// `f` receives the position of the edge in `src_idx` and the edge with
    /// global node ids. Slots at or past the final destination pointer entry
    /// are skipped. Returns the number of edges visited.
    pub fn for_each_edge<F>(&self, mut f: F) -> Result<usize>
    where
        F: FnMut(usize, Edge) -> Result<()>,
    {
        self.check()?;
        let num_slots = self.dst_ptr.len().saturating_sub(1);
        let mut visited = 0;
        for (b, (bounds, &base)) in self.block_ptr.windows(2).zip(&self.block_base).enumerate() {
            let (lo, hi) = (bounds[0] as usize, bounds[1] as usize);
            trace!(block = b, base, slots = hi - lo, "decode block");
            for i in lo..hi {
                if i >= num_slots {
                    continue;
                }
                let dst = NodeIndex::try_from(i - lo)
                    .ok()
                    .and_then(|ii| base.checked_add(ii))
                    .and_then(|local| local.checked_add(self.dst_start))
                    .ok_or_else(|| {
                        Error::ContractViolation(format!(
                            "block {b} slot {} overflows the node index space (base {base}, dst_start {})",
                            i - lo,
                            self.dst_start
                        ))
                    })?;
                let (e0, e1) = (self.dst_ptr[i] as usize, self.dst_ptr[i + 1] as usize);
                for (j, &src) in self.src_idx[e0..e1].iter().enumerate() {
                    let src = src.checked_add(self.src_start).ok_or_else(|| {
                        Error::ContractViolation(format!(
                            "source {src} of destination {dst} overflows the node index space (src_start {})",
                            self.src_start
                        ))
                    })?;
                    f(e0 + j, Edge::new(src, dst))?;
                    visited += 1;
                }
            }
        }
        Ok(visited)
    }

    /// All edges, destination-major.
    pub fn decode(&self) -> Result<Vec<Edge>> {
        let mut edges = Vec::with_capacity(self.src_idx.len());
        self.for_each_edge(|_, e| {
            edges.push(e);
            Ok(())
        })?;
        Ok(edges)
    }
}

// ============================================================================
// Encode
// ============================================================================

/// Encode a destination-keyed edge map.
///
/// Consecutive destination ids share a block; a gap opens a new one. Keys
/// without neighbors are not materialised. Returns the projection together
/// with one attribute set per namespace, aligned with `src_idx`.
pub fn encode_edge_map(
    dst_start: NodeIndex,
    src_start: NodeIndex,
    map: &EdgeMap,
) -> Result<(DbsProjection, Vec<AttrSet>)> {
    let mut prj = DbsProjection::empty(dst_start, src_start);
    let mut attrs: Option<Vec<AttrSet>> = None;
    let mut counts = Vec::new();
    let mut prev: Option<NodeIndex> = None;

    for (&dst, record) in map.iter().filter(|(_, r)| !r.is_empty()) {
        let local = dst.checked_sub(dst_start).ok_or_else(|| {
            Error::ContractViolation(format!("destination {dst} precedes population start {dst_start}"))
        })?;
        if prev.is_none_or(|p| local != p + 1) {
            prj.block_ptr.push(counts.len() as u64);
            prj.block_base.push(local);
        }
        prev = Some(local);

        for &src in &record.neighbors {
            let local_src = src.checked_sub(src_start).ok_or_else(|| {
                Error::ContractViolation(format!("source {src} precedes population start {src_start}"))
            })?;
            prj.src_idx.push(local_src);
        }
        counts.push(record.len());

        let sets = attrs.get_or_insert_with(|| record.attrs.iter().map(AttrSet::empty_like).collect());
        if sets.len() != record.attrs.len() {
            return Err(Error::ContractViolation(format!(
                "destination {dst} has {} attribute namespaces, expected {}",
                record.attrs.len(),
                sets.len()
            )));
        }
        for (set, rec) in sets.iter_mut().zip(&record.attrs) {
            set.append(rec)?;
        }
    }

    if !counts.is_empty() {
        prj.block_ptr.push(counts.len() as u64);
        prj.dst_ptr = prefix_sum(counts);
    }
    prj.check()?;
    Ok((prj, attrs.unwrap_or_default()))
}

/// Encode a plain edge list. Edges are stably grouped by destination.
pub fn encode_edges(dst_start: NodeIndex, src_start: NodeIndex, edges: &[Edge]) -> Result<DbsProjection> {
    let mut map = EdgeMap::new();
    for e in edges {
        map.entry(e.dst).or_insert_with(EdgeRecord::new).neighbors.push(e.src);
    }
    let (prj, _) = encode_edge_map(dst_start, src_start, &map)?;
    Ok(prj)
}

// ============================================================================
// Block partitioning
// ============================================================================

/// Half-open range of `block_ptr` entries one rank reads.
///
/// `stop` is one past the last block so the final block's slot range is
/// bounded; neighbouring ranks share that sentinel entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: u64,
    pub stop: u64,
}

impl BlockRange {
    pub fn is_empty(&self) -> bool {
        self.stop <= self.start
    }

    /// Number of blocks (not pointer entries) in the range.
    pub fn num_blocks(&self) -> u64 {
        self.stop.saturating_sub(self.start).saturating_sub(1)
    }
}

/// Blocks read by `rank` out of `size` I/O ranks.
///
/// Every rank gets `num_blocks / size` blocks (at least one); the last
/// active rank absorbs the remainder. Ranks past the last block get an
/// empty range.
pub fn partition_blocks(num_blocks: u64, size: usize, rank: Rank) -> Result<BlockRange> {
    if size == 0 || rank >= size {
        return Err(Error::ContractViolation(format!(
            "rank {rank} outside an I/O group of {size}"
        )));
    }
    let (size, rank) = (size as u64, rank as u64);
    if rank >= num_blocks {
        return Ok(BlockRange { start: num_blocks, stop: num_blocks });
    }
    let per_rank = if num_blocks < size { 1 } else { num_blocks / size };
    let start = rank * per_rank;
    let stop = if rank == num_blocks.min(size) - 1 {
        num_blocks + 1
    } else {
        (rank + 1) * per_rank + 1
    };
    Ok(BlockRange { start, stop })
}
