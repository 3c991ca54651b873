//! Write a DBS projection and its edge attributes to a store.

use tracing::info;

use super::DbsProjection;
use crate::model::{AttrSet, Column, PopId};
use crate::storage::{layout, ArrayStore};
use crate::{Error, Result};

/// Write projection `src -> dst`, replacing any existing datasets.
///
/// `attrs` pairs each namespace name with one attribute set holding one
/// record per entry of `prj.src_idx`.
pub fn write_dbs_projection(
    store: &dyn ArrayStore,
    src: &str,
    dst: &str,
    src_pop: PopId,
    dst_pop: PopId,
    prj: &DbsProjection,
    attrs: &[(String, AttrSet)],
) -> Result<()> {
    prj.check()?;
    if prj.edge_base != 0 {
        return Err(Error::ContractViolation(format!(
            "only whole projections can be written; slice starts at edge {}",
            prj.edge_base
        )));
    }
    for (namespace, set) in attrs {
        if !set.is_empty() && set.num_records() != prj.num_edges() {
            return Err(Error::ContractViolation(format!(
                "namespace '{namespace}' has {} records for {} edges",
                set.num_records(),
                prj.num_edges()
            )));
        }
    }

    let path = |name| layout::connectivity(src, dst, name);
    store.write(&path(layout::SRC_POP), Column::from(vec![src_pop]))?;
    store.write(&path(layout::DST_POP), Column::from(vec![dst_pop]))?;
    store.write(&path(layout::BLOCK_PTR), Column::from(prj.block_ptr.clone()))?;
    store.write(&path(layout::BLOCK_BASE), Column::from(prj.block_base.clone()))?;
    store.write(&path(layout::DEST_PTR), Column::from(prj.dst_ptr.clone()))?;
    store.write(&path(layout::SOURCE_INDEX), Column::from(prj.src_idx.clone()))?;

    for (namespace, set) in attrs {
        for (name, column) in set.iter() {
            store.write(&layout::attr(src, dst, namespace, name), column.clone())?;
        }
    }

    info!(src, dst, blocks = prj.num_blocks(), edges = prj.num_edges(), "wrote projection");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbs::{encode_edges, read_dbs_partition, read_edge_attributes, read_projection_meta};
    use crate::model::{Edge, PopulationRange, PopulationTable};
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;

    fn pops() -> PopulationTable {
        PopulationTable::new([PopulationRange::new(0, 50, 0), PopulationRange::new(100, 20, 1)]).unwrap()
    }

    fn edges() -> Vec<Edge> {
        // destinations 100,101,102 | 105,106 | 110
        [(10, 100), (11, 101), (12, 101), (13, 102), (14, 105), (15, 106), (16, 106), (17, 110)]
            .into_iter()
            .map(|(s, d)| Edge::new(s, d))
            .collect()
    }

    fn store_with_projection() -> MemoryStore {
        let store = MemoryStore::new();
        let prj = encode_edges(100, 0, &edges()).unwrap();
        let mut syn = AttrSet::new();
        syn.insert_values("weight", (0..8).map(|i| i as f32 * 0.5).collect()).unwrap();
        syn.insert_values("delay", (0..8u8).collect()).unwrap();
        write_dbs_projection(&store, "A", "B", 0, 1, &prj, &[("Synapses".to_string(), syn)]).unwrap();
        store
    }

    #[test]
    fn test_meta() {
        let store = store_with_projection();
        let meta = read_projection_meta(&store, &pops(), "A", "B").unwrap();
        assert_eq!((meta.src_pop, meta.dst_pop), (0, 1));
        assert_eq!((meta.src_start, meta.dst_start), (0, 100));
        assert_eq!(meta.num_blocks, 3);
        assert_eq!(meta.total_edges, 8);
    }

    #[test]
    fn test_partitions_reassemble_projection() {
        let store = store_with_projection();
        let meta = read_projection_meta(&store, &pops(), "A", "B").unwrap();
        for io_size in 1..=5 {
            let mut decoded = Vec::new();
            let mut next_edge = 0;
            for io_rank in 0..io_size {
                let part = read_dbs_partition(&store, "A", "B", &meta, io_rank, io_size).unwrap();
                if part.num_blocks() > 0 {
                    assert_eq!(part.edge_base, next_edge);
                }
                next_edge += part.num_edges() as u64;
                decoded.extend(part.decode().unwrap());
            }
            assert_eq!(decoded, edges(), "io_size {io_size}");
        }
    }

    #[test]
    fn test_edge_attribute_slice() {
        let store = store_with_projection();
        let set = read_edge_attributes(&store, "A", "B", "Synapses", 2, 3).unwrap();
        assert_eq!(set.values::<u8>("delay"), Some(&[2u8, 3, 4][..]));
        assert_eq!(set.values::<f32>("weight"), Some(&[1.0f32, 1.5, 2.0][..]));
        assert!(read_edge_attributes(&store, "A", "B", "Synapses", 6, 3).is_err());
        assert!(read_edge_attributes(&store, "A", "B", "Other", 0, 3).unwrap().is_empty());
    }

    #[test]
    fn test_short_source_index_is_contract_violation() {
        let store = store_with_projection();
        store
            .write(&layout::connectivity("A", "B", layout::SOURCE_INDEX), Column::from(vec![1u32, 2]))
            .unwrap();
        let meta = read_projection_meta(&store, &pops(), "A", "B").unwrap();
        let err = read_dbs_partition(&store, "A", "B", &meta, 0, 1).unwrap_err();
        assert!(matches!(err, Error::ContractViolation(_)));
    }

    #[test]
    fn test_attribute_count_mismatch_rejected() {
        let store = MemoryStore::new();
        let prj = encode_edges(100, 0, &edges()).unwrap();
        let mut syn = AttrSet::new();
        syn.insert_values("weight", vec![1.0f32]).unwrap();
        assert!(write_dbs_projection(&store, "A", "B", 0, 1, &prj, &[("Synapses".into(), syn)]).is_err());
        assert!(!store.exists(&layout::connectivity("A", "B", layout::SOURCE_INDEX)));
        assert!(!store.exists(&layout::connectivity("A", "B", layout::BLOCK_PTR)));
        assert_eq!(store.dataset_count(), 0);
    }

    #[test]
    fn test_decreasing_block_pointer_is_contract_violation() {
        let store = store_with_projection();
        store
            .write(&layout::connectivity("A", "B", layout::BLOCK_PTR), Column::from(vec![5u64, 3]))
            .unwrap();
        let meta = read_projection_meta(&store, &pops(), "A", "B").unwrap();
        let err = read_dbs_partition(&store, "A", "B", &meta, 0, 1).unwrap_err();
        assert!(matches!(err, Error::ContractViolation(_)));
    }
}
