//! # Graph Data Model
//!
//! Plain data shared by every layer: node indices, populations, typed
//! columns and attribute sets, edge records and adjacency maps, trees.
//!
//! Design rule: this module is pure data. No I/O, no collectives.

pub mod value;
pub mod pointer;
pub mod attr;
pub mod edge;
pub mod population;
pub mod tree;

/// Global vertex identifier, unique across all populations.
pub type NodeIndex = u32;

/// Population identifier.
pub type PopId = u16;

/// Rank of a worker within its group.
pub type Rank = usize;

pub use value::{Column, Primitive, ValueKind};
pub use pointer::{check_pointer, is_non_decreasing, prefix_sum, rebase};
pub use attr::{
    cell_attrs_to_table, table_to_cell_attrs, AttrSchema, AttrSet, AttrSpec, AttrTable, CellAttrMap, CellAttrs, PointerId,
    PointerOwnership,
};
pub use edge::{edge_count, merge_edge_maps, Edge, EdgeMap, EdgeMapType, EdgeRecord, RankEdgeMap};
pub use population::{PopulationRange, PopulationTable, ProjectionPairSet};
pub use tree::{table_to_trees, trees_to_table, Tree, TreeMap};
