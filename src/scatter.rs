//! # Scatter coordinator
//!
//! Reads a projection with a subset of I/O ranks and redistributes the
//! edges so every rank ends up with the records of the nodes it owns:
//!
//! ```text
//! rank 0: metadata ──broadcast──▶ all ranks
//! I/O ranks: partitioned DBS read → validate → attributes → rank edge map → pack
//! all ranks: all-to-all ──▶ unpack and merge into the local EdgeMap
//! rank 0: attribute schemas ──broadcast──▶ all ranks
//! ```
//!
//! Every rank of the group must call these functions together. A failure on
//! any rank during a rank-local phase is reported to every rank before the
//! next collective, so the group fails as a whole instead of hanging.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

use crate::comm::{all_succeeded, broadcast_result, broadcast_value, Communicator, ExchangeBuffers};
use crate::dbs::{
    encode_edge_map, read_dbs_partition, read_edge_attributes, read_projection_meta, write_dbs_projection,
    DbsProjection, ProjectionMeta,
};
use crate::edge_map::{append_edge_map, append_rank_edge_map, RankAssignment};
use crate::exchange::{
    deserialize_rank_attr_map, deserialize_rank_edge_map, deserialize_rank_tree_map, serialize_rank_attr_map,
    serialize_rank_edge_map, serialize_rank_tree_map,
};
use crate::logging::LogConfig;
use crate::model::{
    AttrSchema, AttrSet, CellAttrMap, EdgeMap, EdgeMapType, PopulationTable, ProjectionPairSet, Rank, RankEdgeMap, TreeMap,
};
use crate::storage::{layout, ArrayStore};
use crate::validate::validate_edge_list;
use crate::{Error, Result};

// ============================================================================
// Configuration
// ============================================================================

fn default_io_size() -> usize {
    1
}

/// Settings shared by every projection read of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScatterConfig {
    /// Number of ranks that read from the store. Clamped to the group size.
    #[serde(default = "default_io_size")]
    pub io_size: usize,

    #[serde(default)]
    pub edge_map_type: EdgeMapType,

    /// Edge attribute namespaces to load, in order.
    #[serde(default)]
    pub namespaces: Vec<String>,

    #[serde(default)]
    pub log: LogConfig,
}

impl Default for ScatterConfig {
    fn default() -> Self {
        Self {
            io_size: default_io_size(),
            edge_map_type: EdgeMapType::default(),
            namespaces: Vec::new(),
            log: LogConfig::default(),
        }
    }
}

impl ScatterConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("invalid scatter config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.io_size == 0 {
            return Err(Error::ConfigError("io_size must be at least 1".into()));
        }
        if let Some(dup) = self.namespaces.iter().enumerate().find(|(i, ns)| self.namespaces[..*i].contains(*ns)) {
            return Err(Error::ConfigError(format!("namespace '{}' listed twice", dup.1)));
        }
        Ok(())
    }

    /// Number of I/O ranks in a group of `size`.
    pub fn io_size_for(&self, size: usize) -> Result<usize> {
        self.validate()?;
        Ok(self.io_size.min(size))
    }
}

// ============================================================================
// Output
// ============================================================================

/// One rank's share of a projection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionEdges {
    pub src: String,
    pub dst: String,
    pub edges: EdgeMap,
    /// Attribute namespaces; `edges` records hold one set per namespace in
    /// this order.
    pub namespaces: Vec<String>,
    /// Attribute schema of each namespace.
    pub schemas: Vec<AttrSchema>,
    pub local_num_nodes: usize,
    pub local_num_edges: usize,
    pub total_num_edges: u64,
}

// ============================================================================
// Reads
// ============================================================================

struct Partition {
    prj: DbsProjection,
    attrs: Vec<AttrSet>,
}

/// Read, validate and load attributes for one rank's slice.
fn read_partition(
    store: &dyn ArrayStore,
    config: &ScatterConfig,
    pops: &PopulationTable,
    pairs: &ProjectionPairSet,
    meta: &ProjectionMeta,
    (src, dst): (&str, &str),
    (io_rank, io_size): (Rank, usize),
) -> Result<Partition> {
    let prj = read_dbs_partition(store, src, dst, meta, io_rank, io_size)?;
    validate_edge_list(&prj, pops, pops, pairs)?;
    let attrs = config
        .namespaces
        .iter()
        .map(|ns| read_edge_attributes(store, src, dst, ns, prj.edge_base, prj.num_edges() as u64))
        .collect::<Result<Vec<_>>>()?;
    Ok(Partition { prj, attrs })
}

/// Read projection `src -> dst` on the I/O ranks and redistribute its edge
/// records to the ranks `node_ranks` assigns them to.
#[allow(clippy::too_many_arguments)]
pub fn scatter_read_projection<C, A>(
    comm: &C,
    store: &dyn ArrayStore,
    config: &ScatterConfig,
    pops: &PopulationTable,
    pairs: &ProjectionPairSet,
    node_ranks: &A,
    src: &str,
    dst: &str,
) -> Result<ProjectionEdges>
where
    C: Communicator + ?Sized,
    A: RankAssignment + ?Sized,
{
    let (rank, size) = (comm.rank(), comm.size());
    let span = info_span!("scatter_read_projection", rank, size, src, dst);
    let _guard = span.enter();

    let io_size = config.io_size_for(size)?;
    let meta = broadcast_result(comm, 0, || read_projection_meta(store, pops, src, dst))?;

    let local = if rank < io_size {
        read_partition(store, config, pops, pairs, &meta, (src, dst), (rank, io_size)).and_then(|part| {
            let mut by_rank = RankEdgeMap::new();
            let count = append_rank_edge_map(&part.prj, &part.attrs, node_ranks, config.edge_map_type, &mut by_rank)?;
            let (send, packed) = serialize_rank_edge_map(size, rank, &by_rank, &config.namespaces)?;
            if packed != count {
                return Err(Error::ContractViolation(format!("packed {packed} of {count} edges")));
            }
            debug!(edges = count, bytes = send.data.len(), "packed partition");
            Ok((send, part.attrs.iter().map(AttrSet::schema).collect::<Vec<_>>()))
        })
    } else {
        Ok((ExchangeBuffers::empty(size), Vec::new()))
    };
    let (send, local_schemas) = all_succeeded(comm, local)?;

    let recv = comm.all_to_all_v(&send)?;
    drop(send);

    let mut edges = EdgeMap::new();
    let stats = all_succeeded(comm, deserialize_rank_edge_map(size, &recv, &config.namespaces, &mut edges))?;

    let schemas: Vec<AttrSchema> = broadcast_value(comm, 0, Some(&local_schemas))?;

    info!(nodes = stats.num_nodes, edges = stats.num_edges, total = meta.total_edges, "scattered projection");
    Ok(ProjectionEdges {
        src: src.to_string(),
        dst: dst.to_string(),
        edges,
        namespaces: config.namespaces.clone(),
        schemas,
        local_num_nodes: stats.num_nodes,
        local_num_edges: stats.num_edges,
        total_num_edges: meta.total_edges,
    })
}

/// Read projection `src -> dst` with every rank reading its own block
/// range; no records move between ranks.
pub fn read_projection<C>(
    comm: &C,
    store: &dyn ArrayStore,
    config: &ScatterConfig,
    pops: &PopulationTable,
    pairs: &ProjectionPairSet,
    src: &str,
    dst: &str,
) -> Result<ProjectionEdges>
where
    C: Communicator + ?Sized,
{
    let (rank, size) = (comm.rank(), comm.size());
    let span = info_span!("read_projection", rank, size, src, dst);
    let _guard = span.enter();

    config.validate()?;
    let meta = broadcast_result(comm, 0, || read_projection_meta(store, pops, src, dst))?;

    let local = read_partition(store, config, pops, pairs, &meta, (src, dst), (rank, size)).and_then(|part| {
        let mut edges = EdgeMap::new();
        let count = append_edge_map(&part.prj, &part.attrs, config.edge_map_type, &mut edges)?;
        Ok((edges, count, part.attrs.iter().map(AttrSet::schema).collect::<Vec<_>>()))
    });
    let (edges, count, schemas) = all_succeeded(comm, local)?;

    info!(nodes = edges.len(), edges = count, total = meta.total_edges, "read projection");
    Ok(ProjectionEdges {
        src: src.to_string(),
        dst: dst.to_string(),
        local_num_nodes: edges.len(),
        local_num_edges: count,
        edges,
        namespaces: config.namespaces.clone(),
        schemas,
        total_num_edges: meta.total_edges,
    })
}

/// `(src, dst)` population names of every projection in the store, listed
/// on rank 0 and broadcast.
pub fn read_projection_names<C>(comm: &C, store: &dyn ArrayStore) -> Result<Vec<(String, String)>>
where
    C: Communicator + ?Sized,
{
    broadcast_result(comm, 0, || {
        let mut names = Vec::new();
        for src in store.children(layout::PROJECTIONS)? {
            for dst in store.children(&format!("{}/{src}", layout::PROJECTIONS))? {
                names.push((src.clone(), dst));
            }
        }
        debug!(projections = names.len(), "listed projections");
        Ok(names)
    })
}

// ============================================================================
// Writes
// ============================================================================

/// Gather the destination-keyed `edges` of every rank on rank 0, merge
/// them and write projection `src -> dst`.
///
/// Records must carry one attribute set per entry of `namespaces`. Every
/// rank returns once rank 0 has finished writing.
pub fn write_projection<C>(
    comm: &C,
    store: &dyn ArrayStore,
    pops: &PopulationTable,
    src: &str,
    dst: &str,
    edges: &EdgeMap,
    namespaces: &[String],
) -> Result<()>
where
    C: Communicator + ?Sized,
{
    let (rank, size) = (comm.rank(), comm.size());
    let span = info_span!("write_projection", rank, size, src, dst);
    let _guard = span.enter();

    let mut to_root = RankEdgeMap::new();
    if !edges.is_empty() {
        to_root.insert(0, edges.clone());
    }
    let local = serialize_rank_edge_map(size, rank, &to_root, namespaces);
    drop(to_root);
    let (send, packed) = all_succeeded(comm, local)?;
    debug!(edges = packed, "packed edges for gather");

    let recv = comm.all_to_all_v(&send)?;

    broadcast_result(comm, 0, || {
        let src_pop = pops.id_of(src).ok_or_else(|| Error::NotFound(format!("population '{src}'")))?;
        let dst_pop = pops.id_of(dst).ok_or_else(|| Error::NotFound(format!("population '{dst}'")))?;
        let src_start = pops.by_name(src)?.start;
        let dst_start = pops.by_name(dst)?.start;

        let mut merged = EdgeMap::new();
        let stats = deserialize_rank_edge_map(size, &recv, namespaces, &mut merged)?;
        let (prj, attrs) = encode_edge_map(dst_start, src_start, &merged)?;
        let attrs: Vec<(String, AttrSet)> = namespaces.iter().cloned().zip(attrs).collect();
        write_dbs_projection(store, src, dst, src_pop, dst_pop, &prj, &attrs)?;
        info!(nodes = stats.num_nodes, edges = stats.num_edges, "gathered and wrote projection");
        Ok(())
    })
}

// ============================================================================
// Trees
// ============================================================================

/// Send each rank the trees `by_rank` assigns to it. Returns the trees this
/// rank received; when a cell arrives twice the first copy is kept.
pub fn scatter_trees<C>(comm: &C, by_rank: &BTreeMap<Rank, TreeMap>) -> Result<TreeMap>
where
    C: Communicator + ?Sized,
{
    let (rank, size) = (comm.rank(), comm.size());
    let send = all_succeeded(comm, serialize_rank_tree_map(size, rank, by_rank))?;
    let recv = comm.all_to_all_v(&send)?;
    let mut trees = TreeMap::new();
    let received = all_succeeded(comm, deserialize_rank_tree_map(size, &recv, &mut trees))?;
    debug!(rank, trees = received, "scattered trees");
    Ok(trees)
}

/// Send each rank the cell attributes `by_rank` assigns to it.
pub fn scatter_cell_attributes<C>(comm: &C, by_rank: &BTreeMap<Rank, CellAttrMap>) -> Result<CellAttrMap>
where
    C: Communicator + ?Sized,
{
    let (rank, size) = (comm.rank(), comm.size());
    let send = all_succeeded(comm, serialize_rank_attr_map(size, rank, by_rank))?;
    let recv = comm.all_to_all_v(&send)?;
    let mut cells = CellAttrMap::new();
    let received = all_succeeded(comm, deserialize_rank_attr_map(size, &recv, &mut cells))?;
    debug!(rank, cells = received, "scattered cell attributes");
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ScatterConfig::from_json("{}").unwrap();
        assert_eq!(config, ScatterConfig::default());
        assert_eq!(config.io_size_for(8).unwrap(), 1);
    }

    #[test]
    fn test_config_parsing() {
        let config = ScatterConfig::from_json(
            r#"{"io_size": 16, "edge_map_type": "Src", "namespaces": ["Synapses"], "log": {"level": "debug"}}"#,
        )
        .unwrap();
        assert_eq!(config.io_size_for(4).unwrap(), 4);
        assert_eq!(config.edge_map_type, EdgeMapType::Src);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(matches!(ScatterConfig::from_json(r#"{"io_size": 0}"#), Err(Error::ConfigError(_))));
        assert!(matches!(
            ScatterConfig::from_json(r#"{"namespaces": ["A", "A"]}"#),
            Err(Error::ConfigError(_))
        ));
        assert!(matches!(ScatterConfig::from_json("not json"), Err(Error::ConfigError(_))));
    }
}
