//! Population checks on decoded DBS edges.
//!
//! This is a gate, not a filter: the first bad edge fails the whole
//! projection.

use tracing::debug;

use crate::dbs::DbsProjection;
use crate::model::{PopulationTable, ProjectionPairSet};
use crate::{Error, Result};

/// Check every edge of `prj`: the destination must lie in a range of
/// `dst_pops`, the source in a range of `src_pops`, and the resolved
/// `(src_pop, dst_pop)` pair must be in `pairs`.
///
/// Returns the number of edges checked.
pub fn validate_edge_list(
    prj: &DbsProjection,
    dst_pops: &PopulationTable,
    src_pops: &PopulationTable,
    pairs: &ProjectionPairSet,
) -> Result<usize> {
    let checked = prj.for_each_edge(|_, edge| {
        let dst_pop = dst_pops.lookup(edge.dst).ok_or_else(|| Error::InvalidEdge {
            src: edge.src,
            dst: edge.dst,
            reason: "destination outside every population".into(),
        })?;
        let src_pop = src_pops.lookup(edge.src).ok_or_else(|| Error::InvalidEdge {
            src: edge.src,
            dst: edge.dst,
            reason: "source outside every population".into(),
        })?;
        if !pairs.contains(src_pop.pop, dst_pop.pop) {
            return Err(Error::InvalidEdge {
                src: edge.src,
                dst: edge.dst,
                reason: format!("population pair ({}, {}) is not a projection", src_pop.pop, dst_pop.pop),
            });
        }
        Ok(())
    })?;
    debug!(edges = checked, "validated edge list");
    Ok(checked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbs::encode_edges;
    use crate::model::{Edge, PopulationRange};

    fn pops() -> PopulationTable {
        PopulationTable::new([PopulationRange::new(0, 20, 0), PopulationRange::new(100, 10, 1)]).unwrap()
    }

    fn pairs() -> ProjectionPairSet {
        [(0, 1)].into_iter().collect()
    }

    #[test]
    fn test_valid_projection() {
        let prj = encode_edges(100, 0, &[Edge::new(3, 100), Edge::new(19, 109)]).unwrap();
        assert_eq!(validate_edge_list(&prj, &pops(), &pops(), &pairs()).unwrap(), 2);
    }

    #[test]
    fn test_destination_out_of_range() {
        let prj = encode_edges(100, 0, &[Edge::new(3, 100), Edge::new(4, 110)]).unwrap();
        let err = validate_edge_list(&prj, &pops(), &pops(), &pairs()).unwrap_err();
        assert!(matches!(err, Error::InvalidEdge { src: 4, dst: 110, .. }));
    }

    #[test]
    fn test_source_in_gap() {
        let prj = encode_edges(100, 0, &[Edge::new(50, 101)]).unwrap();
        let err = validate_edge_list(&prj, &pops(), &pops(), &pairs()).unwrap_err();
        assert!(matches!(err, Error::InvalidEdge { src: 50, .. }));
    }

    #[test]
    fn test_pair_not_in_set() {
        // both endpoints in population 1
        let prj = encode_edges(100, 0, &[Edge::new(105, 101)]).unwrap();
        let err = validate_edge_list(&prj, &pops(), &pops(), &pairs()).unwrap_err();
        assert!(matches!(err, Error::InvalidEdge { src: 105, dst: 101, .. }));
    }

    #[test]
    fn test_corrupt_block_base_is_rejected() {
        let mut prj = encode_edges(100, 0, &[Edge::new(3, 100), Edge::new(4, 101)]).unwrap();
        prj.block_base = vec![u32::MAX - 10];
        let err = validate_edge_list(&prj, &pops(), &pops(), &pairs()).unwrap_err();
        assert!(matches!(err, Error::ContractViolation(_)));
    }
}
