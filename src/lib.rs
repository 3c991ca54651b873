//! # neurograph: distributed storage for block-sparse neural graphs
//!
//! Reads, writes and redistributes very large attributed projections
//! (directed edge sets between node populations) across a group of
//! cooperating ranks, without any rank holding a whole projection.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `ArrayStore` is the contract with the backing store,
//!    `Communicator` the contract with the rank group
//! 2. **Plain data model**: `Column`, `AttrSet`, `EdgeMap` cross all layers
//! 3. **Closed kinds**: attribute values are a tagged enum over a fixed set
//!    of primitives, never open-ended dispatch
//! 4. **Fail as a group**: every contract violation is a typed error, and
//!    collectives never leave a rank waiting on a rank that already failed
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use neurograph::comm::run_group;
//! use neurograph::edge_map::RoundRobin;
//! use neurograph::{Graph, MemoryStore, ScatterConfig};
//!
//! # fn example(store: MemoryStore) -> neurograph::Result<()> {
//! let config = ScatterConfig::from_json(r#"{"io_size": 2, "namespaces": ["Synapses"]}"#)?;
//! neurograph::logging::init(&config.log)?;
//! let per_rank = run_group(4, |comm| -> neurograph::Result<usize> {
//!     let graph = Graph::open(comm, store.clone(), config.clone())?;
//!     let prj = graph.scatter_read_projection(&RoundRobin(4), "GC", "MC")?;
//!     Ok(prj.local_num_edges)
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layers
//!
//! | Layer | Module | Description |
//! |-------|--------|-------------|
//! | Data model | `model` | Columns, attribute sets, edge records, populations, trees |
//! | Store | `storage` | `ArrayStore` trait, dataset layout, `MemoryStore` |
//! | Group | `comm` | `Communicator` trait, `SelfComm`, thread-backed `LocalComm` |
//! | Codec | `dbs` | DBS encode/decode, block partitioning, partitioned reads |
//! | Assembly | `validate`, `edge_map`, `exchange` | Population checks, adjacency maps, rank exchange |
//! | Orchestration | `scatter`, `population` | Collective reads and writes |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod storage;
pub mod comm;
pub mod dbs;
pub mod validate;
pub mod edge_map;
pub mod exchange;
pub mod population;
pub mod scatter;
pub mod logging;

use std::collections::BTreeMap;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{
    AttrSchema, AttrSet, AttrTable, CellAttrMap, CellAttrs, Column, Edge, EdgeMap, EdgeMapType, EdgeRecord, NodeIndex,
    PopId, PopulationRange, PopulationTable, ProjectionPairSet, Rank, RankEdgeMap, Tree, TreeMap, ValueKind,
};

// ============================================================================
// Re-exports: Store, group, orchestration
// ============================================================================

pub use storage::{open_store, ArrayStore, MemoryStore, StoreConfig};
pub use comm::{Communicator, ExchangeBuffers, LocalComm, SelfComm};
pub use dbs::DbsProjection;
pub use edge_map::RankAssignment;
pub use logging::LogConfig;
pub use scatter::{ProjectionEdges, ScatterConfig};

// ============================================================================
// Top-level Graph handle
// ============================================================================

/// The primary entry point: one rank's view of a graph file.
///
/// Opening a `Graph` is collective: every rank of `comm` must call
/// [`Graph::open`] (or [`Graph::create`]) together, and likewise every
/// projection read or write.
pub struct Graph<C: Communicator, S: ArrayStore> {
    comm: C,
    store: S,
    config: ScatterConfig,
    pops: PopulationTable,
    pairs: ProjectionPairSet,
}

impl<C: Communicator, S: ArrayStore> Graph<C, S> {
    /// Open an existing graph: populations and legal pairs are read on
    /// rank 0 and broadcast.
    pub fn open(comm: C, store: S, config: ScatterConfig) -> Result<Self> {
        config.validate()?;
        let pops = population::read_population_ranges(&comm, &store)?;
        let pairs = population::read_population_combos(&comm, &store)?;
        tracing::debug!(rank = comm.rank(), populations = pops.len(), pairs = pairs.len(), "opened graph");
        Ok(Self { comm, store, config, pops, pairs })
    }

    /// Start a new graph by writing its populations.
    pub fn create(
        comm: C,
        store: S,
        config: ScatterConfig,
        pops: PopulationTable,
        pairs: ProjectionPairSet,
    ) -> Result<Self> {
        config.validate()?;
        population::write_populations(&comm, &store, &pops, &pairs)?;
        Ok(Self { comm, store, config, pops, pairs })
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ScatterConfig {
        &self.config
    }

    pub fn populations(&self) -> &PopulationTable {
        &self.pops
    }

    pub fn population_pairs(&self) -> &ProjectionPairSet {
        &self.pairs
    }

    /// `(src, dst)` names of every projection in the store.
    pub fn projection_names(&self) -> Result<Vec<(String, String)>> {
        scatter::read_projection_names(&self.comm, &self.store)
    }

    /// Read one projection and redistribute its records by owning rank.
    pub fn scatter_read_projection<A>(&self, node_ranks: &A, src: &str, dst: &str) -> Result<ProjectionEdges>
    where
        A: RankAssignment + ?Sized,
    {
        scatter::scatter_read_projection(
            &self.comm,
            &self.store,
            &self.config,
            &self.pops,
            &self.pairs,
            node_ranks,
            src,
            dst,
        )
    }

    /// Scatter-read every projection in the store.
    pub fn scatter_read_all<A>(&self, node_ranks: &A) -> Result<Vec<ProjectionEdges>>
    where
        A: RankAssignment + ?Sized,
    {
        self.projection_names()?
            .iter()
            .map(|(src, dst)| self.scatter_read_projection(node_ranks, src, dst))
            .collect()
    }

    /// Read this rank's block range of one projection without
    /// redistribution.
    pub fn read_projection(&self, src: &str, dst: &str) -> Result<ProjectionEdges> {
        scatter::read_projection(&self.comm, &self.store, &self.config, &self.pops, &self.pairs, src, dst)
    }

    /// Gather destination-keyed `edges` from every rank and write them as
    /// projection `src -> dst`, using the configured namespaces.
    pub fn write_projection(&self, src: &str, dst: &str, edges: &EdgeMap) -> Result<()> {
        scatter::write_projection(&self.comm, &self.store, &self.pops, src, dst, edges, &self.config.namespaces)
    }

    /// Send trees to the ranks that own them.
    pub fn scatter_trees(&self, by_rank: &BTreeMap<Rank, TreeMap>) -> Result<TreeMap> {
        scatter::scatter_trees(&self.comm, by_rank)
    }

    /// Send cell attributes to the ranks that own them.
    pub fn scatter_cell_attributes(&self, by_rank: &BTreeMap<Rank, CellAttrMap>) -> Result<CellAttrMap> {
        scatter::scatter_cell_attributes(&self.comm, by_rank)
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Sizes, monotonicity, cardinality or rank preconditions do not hold.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Invalid edge {src} -> {dst}: {reason}")]
    InvalidEdge { src: NodeIndex, dst: NodeIndex, reason: String },

    #[error("Collective error: {0}")]
    CollectiveError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
