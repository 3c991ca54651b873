//! Partitioned DBS reads.
//!
//! Rank 0 reads the small projection metadata and broadcasts it; after
//! that, every I/O rank issues its own chain of range reads without further
//! communication:
//!
//! 1. `BlockPtr[start..stop]`, rebased to zero
//! 2. `BlockBase[start..stop-1]`
//! 3. `DestPtr[base..base + last + 1]`, rebased; the removed value is the
//!    rank's edge offset
//! 4. `SourceIndex[edge_base..edge_base + dst_ptr.last]`

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{partition_blocks, DbsProjection};
use crate::model::{rebase, AttrSet, NodeIndex, PopId, PopulationTable, Primitive, Rank};
use crate::storage::{layout, read_scalar, read_values, ArrayStore};
use crate::{Error, Result};

/// Projection-wide values every rank needs before it can read its slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionMeta {
    pub src_pop: PopId,
    pub dst_pop: PopId,
    pub src_start: NodeIndex,
    pub dst_start: NodeIndex,
    pub num_blocks: u64,
    pub total_edges: u64,
}

/// Read the metadata of projection `src -> dst`.
pub fn read_projection_meta(
    store: &dyn ArrayStore,
    pops: &PopulationTable,
    src: &str,
    dst: &str,
) -> Result<ProjectionMeta> {
    let src_pop: PopId = read_scalar(store, &layout::connectivity(src, dst, layout::SRC_POP))?;
    let dst_pop: PopId = read_scalar(store, &layout::connectivity(src, dst, layout::DST_POP))?;
    let src_range = pops
        .get(src_pop)
        .ok_or_else(|| Error::NotFound(format!("source population {src_pop} of projection {src} -> {dst}")))?;
    let dst_range = pops
        .get(dst_pop)
        .ok_or_else(|| Error::NotFound(format!("destination population {dst_pop} of projection {src} -> {dst}")))?;

    let num_blocks = store
        .len(&layout::connectivity(src, dst, layout::BLOCK_PTR))?
        .saturating_sub(1);
    let total_edges = store.len(&layout::connectivity(src, dst, layout::SOURCE_INDEX))?;

    Ok(ProjectionMeta {
        src_pop,
        dst_pop,
        src_start: src_range.start,
        dst_start: dst_range.start,
        num_blocks,
        total_edges,
    })
}

/// Range read that treats a short dataset as a broken projection rather
/// than a storage failure.
fn read_exact<T: Primitive>(store: &dyn ArrayStore, path: &str, offset: u64, count: u64) -> Result<Vec<T>> {
    let len = store.len(path)?;
    if offset.checked_add(count).is_none_or(|end| end > len) {
        return Err(Error::ContractViolation(format!(
            "'{path}' has {len} elements, need {count} at offset {offset}"
        )));
    }
    read_values(store, path, offset, count)
}

/// Read the slice of projection `src -> dst` owned by `io_rank` out of
/// `io_size` I/O ranks.
pub fn read_dbs_partition(
    store: &dyn ArrayStore,
    src: &str,
    dst: &str,
    meta: &ProjectionMeta,
    io_rank: Rank,
    io_size: usize,
) -> Result<DbsProjection> {
    let range = partition_blocks(meta.num_blocks, io_size, io_rank)?;
    let mut prj = DbsProjection::empty(meta.dst_start, meta.src_start);
    if range.is_empty() {
        debug!(io_rank, io_size, "no blocks to read");
        return Ok(prj);
    }

    let path = |name| layout::connectivity(src, dst, name);

    prj.block_ptr = read_exact(store, &path(layout::BLOCK_PTR), range.start, range.stop - range.start)?;
    if prj.block_ptr.len() < 2 {
        return Err(Error::ContractViolation(format!(
            "rank {io_rank} read {} block pointer entries for blocks {}..{}",
            prj.block_ptr.len(),
            range.start,
            range.stop
        )));
    }
    let base = rebase(&mut prj.block_ptr)?;
    debug!(io_rank, start = range.start, stop = range.stop, base, "read block pointer");

    prj.block_base = read_exact(store, &path(layout::BLOCK_BASE), range.start, range.num_blocks())?;

    let num_slots = prj.block_ptr[prj.block_ptr.len() - 1];
    prj.dst_ptr = read_exact(store, &path(layout::DEST_PTR), base, num_slots + 1)?;
    prj.edge_base = rebase(&mut prj.dst_ptr)?;
    debug!(io_rank, slots = num_slots, edge_base = prj.edge_base, "read destination pointer");

    let num_edges = prj.dst_ptr.last().copied().unwrap_or(0);
    prj.src_idx = read_exact(store, &path(layout::SOURCE_INDEX), prj.edge_base, num_edges)?;
    debug!(io_rank, edges = num_edges, "read source index");

    prj.check()?;
    Ok(prj)
}

/// Read the attributes of `namespace` for edges
/// `[edge_base, edge_base + num_edges)` of projection `src -> dst`.
///
/// A namespace with no datasets yields an empty set.
pub fn read_edge_attributes(
    store: &dyn ArrayStore,
    src: &str,
    dst: &str,
    namespace: &str,
    edge_base: u64,
    num_edges: u64,
) -> Result<AttrSet> {
    let group = layout::attr_namespace(src, dst, namespace);
    let mut set = AttrSet::new();
    for name in store.children(&group)? {
        let path = layout::attr(src, dst, namespace, &name);
        let len = store.len(&path)?;
        if edge_base + num_edges > len {
            return Err(Error::ContractViolation(format!(
                "attribute '{path}' has {len} records, projection slice needs {}",
                edge_base + num_edges
            )));
        }
        set.insert(name, store.read(&path, edge_base, num_edges)?)?;
    }
    debug!(namespace, attributes = set.len(), records = num_edges, "read edge attributes");
    Ok(set)
}
