//! Property tests: what goes into the store or onto the wire comes back
//! out at the right place.

use std::collections::BTreeMap;

use neurograph::comm::ExchangeBuffers;
use neurograph::dbs::{encode_edge_map, read_dbs_partition, read_edge_attributes, read_projection_meta, write_dbs_projection};
use neurograph::exchange::{deserialize_rank_edge_map, serialize_rank_edge_map};
use neurograph::model::edge_count;
use neurograph::{
    AttrSet, EdgeMap, EdgeRecord, MemoryStore, PopulationRange, PopulationTable, Rank, RankEdgeMap,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn populations() -> PopulationTable {
    PopulationTable::new([PopulationRange::new(0, 64, 0), PopulationRange::new(64, 64, 1)])
        .unwrap()
        .with_label(0, "A")
        .with_label(1, "B")
}

/// Destination-keyed map over population B with sources in A. Every edge
/// carries `delay` (u16) and `weight` (f32) in namespace 0.
fn edge_map_strategy() -> impl Strategy<Value = EdgeMap> {
    prop::collection::btree_map(64u32..128, prop::collection::vec(0u32..64, 1..6), 0..40).prop_map(|raw| {
        raw.into_iter()
            .map(|(dst, neighbors)| {
                let mut set = AttrSet::new();
                set.insert_values("delay", neighbors.iter().map(|&s| (s + dst) as u16).collect::<Vec<_>>())
                    .unwrap();
                set.insert_values("weight", neighbors.iter().map(|&s| s as f32 * 0.25).collect::<Vec<_>>())
                    .unwrap();
                (dst, EdgeRecord { neighbors, attrs: [set].into_iter().collect() })
            })
            .collect()
    })
}

/// Only `sender`'s slot of a group of `size` carries `payload`.
fn received_from(size: usize, sender: Rank, payload: &[u8]) -> ExchangeBuffers {
    let mut counts = vec![0; size];
    counts[sender] = payload.len();
    ExchangeBuffers { counts, displs: vec![0; size], data: payload.to_vec() }
}

proptest! {
    #[test]
    fn prop_partitioned_reads_reassemble_projection(map in edge_map_strategy(), io_size in 1usize..6) {
        let store = MemoryStore::new();
        let (prj, attrs) = encode_edge_map(64, 0, &map).unwrap();
        let attrs: Vec<(String, AttrSet)> = vec!["Syn".to_string()].into_iter().zip(attrs).collect();
        write_dbs_projection(&store, "A", "B", 0, 1, &prj, &attrs).unwrap();

        let meta = read_projection_meta(&store, &populations(), "A", "B").unwrap();
        prop_assert_eq!(meta.total_edges as usize, edge_count(&map));

        let mut merged = EdgeMap::new();
        let mut next_edge = 0;
        for io_rank in 0..io_size {
            let part = read_dbs_partition(&store, "A", "B", &meta, io_rank, io_size).unwrap();
            if part.num_edges() > 0 {
                prop_assert_eq!(part.edge_base, next_edge);
            }
            next_edge += part.num_edges() as u64;
            let set = read_edge_attributes(&store, "A", "B", "Syn", part.edge_base, part.num_edges() as u64).unwrap();
            neurograph::edge_map::append_edge_map(&part, &[set], Default::default(), &mut merged).unwrap();
        }
        prop_assert_eq!(next_edge as usize, edge_count(&map));
        prop_assert_eq!(merged, map);
    }

    #[test]
    fn prop_exchange_delivers_each_bucket_to_its_rank(
        map in edge_map_strategy(),
        size in 1usize..6,
        sender_seed in 0usize..100,
    ) {
        let sender = sender_seed % size;
        let namespaces = vec!["Syn".to_string()];
        let mut by_rank = RankEdgeMap::new();
        for (dst, record) in map {
            by_rank.entry(dst as usize % size).or_insert_with(EdgeMap::new).insert(dst, record);
        }

        let (send, packed) = serialize_rank_edge_map(size, sender, &by_rank, &namespaces).unwrap();
        prop_assert_eq!(packed, by_rank.values().map(edge_count).sum::<usize>());

        for target in 0..size {
            let recv = received_from(size, sender, send.payload(target).unwrap());
            let mut got = EdgeMap::new();
            let stats = deserialize_rank_edge_map(size, &recv, &namespaces, &mut got).unwrap();
            let expected = by_rank.get(&target).cloned().unwrap_or_default();
            prop_assert_eq!(stats.num_edges, edge_count(&expected));
            prop_assert_eq!(got, expected);
        }
    }
}

#[test]
fn test_exchange_merges_records_from_several_senders() {
    let namespaces: Vec<String> = Vec::new();
    let record = |neighbors: Vec<u32>| EdgeRecord { neighbors, attrs: Default::default() };
    let from_0: RankEdgeMap = BTreeMap::from([(1, EdgeMap::from([(70, record(vec![1, 2]))]))]);
    let from_2: RankEdgeMap = BTreeMap::from([(1, EdgeMap::from([(70, record(vec![9])), (71, record(vec![3]))]))]);

    let (a, _) = serialize_rank_edge_map(3, 0, &from_0, &namespaces).unwrap();
    let (b, _) = serialize_rank_edge_map(3, 2, &from_2, &namespaces).unwrap();
    let (pa, pb) = (a.payload(1).unwrap(), b.payload(1).unwrap());
    let mut data = pa.to_vec();
    data.extend_from_slice(pb);
    let recv = ExchangeBuffers { counts: vec![pa.len(), 0, pb.len()], displs: vec![0, 0, pa.len()], data };

    let mut merged = EdgeMap::new();
    let stats = deserialize_rank_edge_map(3, &recv, &namespaces, &mut merged).unwrap();
    assert_eq!(stats.num_edges, 4);
    assert_eq!(merged[&70].neighbors, vec![1, 2, 9]);
    assert_eq!(merged[&71].neighbors, vec![3]);
}
