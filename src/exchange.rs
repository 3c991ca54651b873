//! # Rank exchange codec
//!
//! Packs `rank -> keyed map` structures into [`ExchangeBuffers`] for an
//! all-to-all exchange and merges what a rank receives back into one map.
//!
//! Each non-empty per-rank payload is self-describing (all integers little
//! endian):
//!
//! ```text
//! edge map:  tag 'E' | version | u32 #namespaces | names
//!            | per namespace: u32 #attrs, (kind tag, name)*
//!            | u32 #records | per record: u32 key, u32 #neighbors, neighbors,
//!              then every column of every namespace (#neighbors values each)
//! tree map:  tag 'T' | version | table
//! cell attrs: tag 'A' | version | table
//! table:     u32 #records | ids
//!            | u32 #attrs | per attr: name, kind tag, ownership,
//!              owner pointer or owner name, u32 len, values
//! ```
//!
//! Strings are a u32 byte length followed by UTF-8 bytes.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut};
use tracing::debug;

use crate::comm::ExchangeBuffers;
use crate::model::{
    cell_attrs_to_table, table_to_cell_attrs, table_to_trees, trees_to_table, AttrSchema, AttrSet, AttrSpec,
    AttrTable, CellAttrMap, Column, EdgeMap, EdgeRecord, NodeIndex, PointerOwnership, Rank, RankEdgeMap, Tree,
    TreeMap, ValueKind,
};
use crate::{Error, Result};

const EDGE_MAP_TAG: u8 = b'E';
const TREE_MAP_TAG: u8 = b'T';
const CELL_ATTR_TAG: u8 = b'A';
const VERSION: u8 = 1;

/// What one rank received in an edge map exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeStats {
    pub num_nodes: usize,
    pub num_edges: usize,
}

// ============================================================================
// Framing
// ============================================================================

/// Encode `by_rank[r]` for every rank `r`, starting with the rank after
/// `rank` and wrapping. Ranks without an entry get an empty payload, and
/// encoders leave empty maps empty.
fn pack_by_rank<T>(
    size: usize,
    rank: Rank,
    by_rank: &BTreeMap<Rank, T>,
    mut encode: impl FnMut(&T, &mut Vec<u8>) -> Result<()>,
) -> Result<ExchangeBuffers> {
    if size == 0 || rank >= size {
        return Err(Error::ContractViolation(format!("rank {rank} outside a group of {size}")));
    }
    if let Some((&r, _)) = by_rank.range(size..).next() {
        return Err(Error::ContractViolation(format!("payload for rank {r} in a group of {size}")));
    }
    let mut send = ExchangeBuffers::empty(size);
    for dst in (rank + 1..size).chain(0..=rank) {
        let start = send.data.len();
        send.displs[dst] = start;
        if let Some(value) = by_rank.get(&dst) {
            encode(value, &mut send.data)?;
        }
        send.counts[dst] = send.data.len() - start;
    }
    Ok(send)
}

/// Call `decode` on every non-empty payload of `recv`, in rank order.
fn for_each_payload(
    size: usize,
    recv: &ExchangeBuffers,
    mut decode: impl FnMut(Rank, &[u8]) -> Result<()>,
) -> Result<()> {
    recv.check_shape(size)?;
    for src in 0..size {
        if recv.counts[src] == 0 {
            continue;
        }
        decode(src, recv.payload(src)?)?;
    }
    Ok(())
}

fn truncated(what: &str) -> Error {
    Error::DecodeError(format!("truncated payload reading {what}"))
}

fn get_u8(buf: &mut &[u8], what: &str) -> Result<u8> {
    if buf.remaining() < 1 {
        return Err(truncated(what));
    }
    Ok(buf.get_u8())
}

fn get_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(truncated(what));
    }
    Ok(buf.get_u32_le())
}

fn get_len(buf: &mut &[u8], what: &str) -> Result<usize> {
    get_u32(buf, what).map(|n| n as usize)
}

fn put_len(buf: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| Error::ContractViolation(format!("length {len} exceeds u32")))?;
    buf.put_u32_le(len);
    Ok(())
}

fn put_str(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    put_len(buf, s.len())?;
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn get_str(buf: &mut &[u8]) -> Result<String> {
    let n = get_len(buf, "string length")?;
    if buf.remaining() < n {
        return Err(truncated("string"));
    }
    let bytes: &[u8] = *buf;
    let (head, rest) = bytes.split_at(n);
    *buf = rest;
    String::from_utf8(head.to_vec()).map_err(|e| Error::DecodeError(format!("invalid string: {e}")))
}

fn get_kind(buf: &mut &[u8]) -> Result<ValueKind> {
    let tag = get_u8(buf, "kind tag")?;
    ValueKind::from_tag(tag).ok_or_else(|| Error::DecodeError(format!("unknown kind tag {tag}")))
}

fn check_header(buf: &mut &[u8], tag: u8) -> Result<()> {
    let got = get_u8(buf, "payload tag")?;
    if got != tag {
        return Err(Error::DecodeError(format!("expected payload tag {tag:#04x}, got {got:#04x}")));
    }
    let version = get_u8(buf, "payload version")?;
    if version != VERSION {
        return Err(Error::DecodeError(format!("unsupported payload version {version}")));
    }
    Ok(())
}

fn get_column(buf: &mut &[u8], kind: ValueKind, n: usize) -> Result<Column> {
    Column::decode(kind, n, buf)
}

// ============================================================================
// Edge maps
// ============================================================================

fn matches_schema(set: &AttrSet, schema: &AttrSchema) -> bool {
    set.len() == schema.len()
        && set
            .iter()
            .zip(schema.iter())
            .all(|((name, col), spec)| name == spec.name && col.kind() == spec.kind)
}

/// An empty map encodes to an empty payload, which receivers skip.
fn encode_edge_map(map: &EdgeMap, namespaces: &[String], schemas: &[AttrSchema], buf: &mut Vec<u8>) -> Result<usize> {
    if map.is_empty() {
        return Ok(0);
    }
    if schemas.len() != namespaces.len() {
        return Err(Error::ContractViolation(format!(
            "{} attribute schemas for {} namespaces",
            schemas.len(),
            namespaces.len()
        )));
    }
    buf.put_u8(EDGE_MAP_TAG);
    buf.put_u8(VERSION);
    put_len(buf, namespaces.len())?;
    for ns in namespaces {
        put_str(buf, ns)?;
    }
    for schema in schemas {
        put_len(buf, schema.len())?;
        for spec in schema.iter() {
            buf.put_u8(spec.kind.tag());
            put_str(buf, &spec.name)?;
        }
    }

    put_len(buf, map.len())?;
    let mut edges = 0;
    for (&key, record) in map {
        if record.attrs.len() != namespaces.len() {
            return Err(Error::ContractViolation(format!(
                "record {key} has {} attribute namespaces, exchange carries {}",
                record.attrs.len(),
                namespaces.len()
            )));
        }
        buf.put_u32_le(key);
        put_len(buf, record.neighbors.len())?;
        record.neighbors.iter().for_each(|&n| buf.put_u32_le(n));
        for (set, schema) in record.attrs.iter().zip(schemas) {
            if !matches_schema(set, schema) {
                return Err(Error::ContractViolation(format!("record {key} disagrees with the attribute schema")));
            }
            if set.num_records() != record.neighbors.len() && !set.is_empty() {
                return Err(Error::ContractViolation(format!(
                    "record {key} has {} neighbors but {} attribute values",
                    record.neighbors.len(),
                    set.num_records()
                )));
            }
            for (_, column) in set.iter() {
                column.encode(buf);
            }
        }
        edges += record.neighbors.len();
    }
    Ok(edges)
}

fn decode_edge_map(mut buf: &[u8], namespaces: &[String]) -> Result<(Vec<AttrSchema>, EdgeMap)> {
    let buf = &mut buf;
    check_header(buf, EDGE_MAP_TAG)?;

    let num_namespaces = get_len(buf, "namespace count")?;
    let mut names = Vec::with_capacity(num_namespaces.min(namespaces.len()));
    for _ in 0..num_namespaces {
        names.push(get_str(buf)?);
    }
    if names != namespaces {
        return Err(Error::ContractViolation(format!(
            "payload carries namespaces {names:?}, expected {namespaces:?}"
        )));
    }

    let mut schemas = Vec::with_capacity(names.len());
    for _ in &names {
        let n = get_len(buf, "schema length")?;
        let mut specs = Vec::new();
        for _ in 0..n {
            let kind = get_kind(buf)?;
            let name = get_str(buf)?;
            specs.push(AttrSpec { kind, name });
        }
        schemas.push(AttrSchema(specs));
    }

    let num_records = get_len(buf, "record count")?;
    let mut map = EdgeMap::new();
    for _ in 0..num_records {
        let key: NodeIndex = get_u32(buf, "record key")?;
        let n = get_len(buf, "neighbor count")?;
        let neighbors = get_column(buf, ValueKind::U32, n)?.into_vec::<u32>()?;
        let mut record = EdgeRecord { neighbors, attrs: Default::default() };
        for schema in &schemas {
            let mut set = AttrSet::new();
            for spec in schema.iter() {
                set.insert(spec.name.clone(), get_column(buf, spec.kind, n)?)?;
            }
            record.attrs.push(set);
        }
        match map.get_mut(&key) {
            Some(existing) => existing.append(record)?,
            None => {
                map.insert(key, record);
            }
        }
    }
    if buf.has_remaining() {
        return Err(Error::DecodeError(format!("{} trailing bytes after edge map", buf.remaining())));
    }
    Ok((schemas, map))
}

/// Pack `map` for an all-to-all exchange. `namespaces` names the attribute
/// sets of every record, in order. Returns the buffers and the number of
/// edges packed.
pub fn serialize_rank_edge_map(
    size: usize,
    rank: Rank,
    map: &RankEdgeMap,
    namespaces: &[String],
) -> Result<(ExchangeBuffers, usize)> {
    let schemas: Vec<AttrSchema> = match map.values().flat_map(|m| m.values()).next() {
        Some(record) => record.attrs.iter().map(AttrSet::schema).collect(),
        None => Vec::new(),
    };
    let mut packed = 0;
    let send = pack_by_rank(size, rank, map, |edges, buf| {
        packed += encode_edge_map(edges, namespaces, &schemas, buf)?;
        Ok(())
    })?;
    debug!(rank, size, edges = packed, bytes = send.data.len(), "serialized rank edge map");
    Ok((send, packed))
}

/// Merge every payload of `recv` into `map`. New keys are inserted; existing
/// keys get the received neighbors and attribute values appended.
pub fn deserialize_rank_edge_map(
    size: usize,
    recv: &ExchangeBuffers,
    namespaces: &[String],
    map: &mut EdgeMap,
) -> Result<ExchangeStats> {
    let mut stats = ExchangeStats::default();
    let mut schemas: Option<Vec<AttrSchema>> = None;
    for_each_payload(size, recv, |src, payload| {
        let (payload_schemas, received) = decode_edge_map(payload, namespaces)?;
        if let Some(expected) = &schemas {
            if *expected != payload_schemas {
                return Err(Error::ContractViolation(format!(
                    "rank {src} sent an attribute schema that disagrees with earlier ranks"
                )));
            }
        } else {
            schemas = Some(payload_schemas);
        }
        for (key, record) in received {
            stats.num_edges += record.len();
            match map.get_mut(&key) {
                Some(existing) => existing.append(record)?,
                None => {
                    stats.num_nodes += 1;
                    map.insert(key, record);
                }
            }
        }
        Ok(())
    })?;
    debug!(nodes = stats.num_nodes, edges = stats.num_edges, "deserialized rank edge map");
    Ok(stats)
}

// ============================================================================
// Attribute tables and tree maps
// ============================================================================

/// Append `ids` and `table` after a payload header.
fn encode_attr_table(ids: &[NodeIndex], table: &AttrTable, buf: &mut Vec<u8>) -> Result<()> {
    put_len(buf, ids.len())?;
    ids.iter().for_each(|&id| buf.put_u32_le(id));

    put_len(buf, table.len())?;
    for name in table.names() {
        let (Some(column), Some(ownership)) = (table.column(name), table.ownership(name)) else {
            return Err(Error::NotFound(format!("table attribute '{name}'")));
        };
        put_str(buf, name)?;
        buf.put_u8(column.kind().tag());
        match ownership {
            PointerOwnership::Owner => {
                buf.put_u8(0);
                let pointer = table.pointer(name).unwrap_or_default();
                put_len(buf, pointer.len())?;
                pointer.iter().for_each(|&p| buf.put_u64_le(p));
            }
            PointerOwnership::Shared(owner) => {
                buf.put_u8(1);
                put_str(buf, &owner)?;
            }
        }
        put_len(buf, column.len())?;
        column.encode(buf);
    }
    Ok(())
}

/// Read what [`encode_attr_table`] wrote. The table must end the payload.
fn decode_attr_table(buf: &mut &[u8]) -> Result<(Vec<NodeIndex>, AttrTable)> {
    let num_records = get_len(buf, "record count")?;
    let ids = get_column(buf, ValueKind::U32, num_records)?.into_vec::<u32>()?;

    let num_attrs = get_len(buf, "attribute count")?;
    let mut table = AttrTable::new();
    for _ in 0..num_attrs {
        let name = get_str(buf)?;
        let kind = get_kind(buf)?;
        match get_u8(buf, "pointer ownership")? {
            0 => {
                let n = get_len(buf, "pointer length")?;
                let pointer = get_column(buf, ValueKind::U64, n)?.into_vec::<u64>()?;
                let len = get_len(buf, "column length")?;
                let column = get_column(buf, kind, len)?;
                table.insert_owner(name, column, pointer)?;
            }
            1 => {
                let owner = get_str(buf)?;
                let len = get_len(buf, "column length")?;
                let column = get_column(buf, kind, len)?;
                table.insert_shared(name, column, &owner)?;
            }
            other => return Err(Error::DecodeError(format!("unknown pointer ownership {other}"))),
        }
    }
    if buf.has_remaining() {
        return Err(Error::DecodeError(format!("{} trailing bytes after attribute table", buf.remaining())));
    }
    Ok((ids, table))
}

fn encode_tree_map(trees: &TreeMap, buf: &mut Vec<u8>) -> Result<()> {
    if trees.is_empty() {
        return Ok(());
    }
    let (ids, table) = trees_to_table(trees.values())?;
    buf.put_u8(TREE_MAP_TAG);
    buf.put_u8(VERSION);
    encode_attr_table(&ids, &table, buf)
}

fn decode_tree_map(mut buf: &[u8]) -> Result<Vec<Tree>> {
    let buf = &mut buf;
    check_header(buf, TREE_MAP_TAG)?;
    let (ids, table) = decode_attr_table(buf)?;
    table_to_trees(&ids, &table)
}

/// Pack per-rank tree maps for an all-to-all exchange.
pub fn serialize_rank_tree_map(size: usize, rank: Rank, trees: &BTreeMap<Rank, TreeMap>) -> Result<ExchangeBuffers> {
    let send = pack_by_rank(size, rank, trees, encode_tree_map)?;
    debug!(rank, size, bytes = send.data.len(), "serialized rank tree map");
    Ok(send)
}

/// Merge every payload of `recv` into `trees`. The first tree received for
/// a cell wins. Returns the number of trees received.
pub fn deserialize_rank_tree_map(size: usize, recv: &ExchangeBuffers, trees: &mut TreeMap) -> Result<usize> {
    let mut received = 0;
    for_each_payload(size, recv, |_, payload| {
        for tree in decode_tree_map(payload)? {
            received += 1;
            trees.entry(tree.id).or_insert(tree);
        }
        Ok(())
    })?;
    debug!(trees = received, "deserialized rank tree map");
    Ok(received)
}

// ============================================================================
// Cell attribute maps
// ============================================================================

fn encode_cell_attr_map(cells: &CellAttrMap, buf: &mut Vec<u8>) -> Result<()> {
    if cells.is_empty() {
        return Ok(());
    }
    let (ids, table) = cell_attrs_to_table(cells)?;
    buf.put_u8(CELL_ATTR_TAG);
    buf.put_u8(VERSION);
    encode_attr_table(&ids, &table, buf)
}

fn decode_cell_attr_map(mut buf: &[u8]) -> Result<CellAttrMap> {
    let buf = &mut buf;
    check_header(buf, CELL_ATTR_TAG)?;
    let (ids, table) = decode_attr_table(buf)?;
    table_to_cell_attrs(&ids, &table)
}

/// Pack per-rank cell attributes for an all-to-all exchange.
pub fn serialize_rank_attr_map(size: usize, rank: Rank, cells: &BTreeMap<Rank, CellAttrMap>) -> Result<ExchangeBuffers> {
    let send = pack_by_rank(size, rank, cells, encode_cell_attr_map)?;
    debug!(rank, size, bytes = send.data.len(), "serialized rank attribute map");
    Ok(send)
}

/// Merge every payload of `recv` into `cells`. A cell seen again gains the
/// attributes it lacks; attributes it already has are kept. Returns the
/// number of cell records received.
pub fn deserialize_rank_attr_map(size: usize, recv: &ExchangeBuffers, cells: &mut CellAttrMap) -> Result<usize> {
    let mut received = 0;
    for_each_payload(size, recv, |_, payload| {
        for (id, attrs) in decode_cell_attr_map(payload)? {
            received += 1;
            let cell = cells.entry(id).or_default();
            for (name, values) in attrs {
                cell.entry(name).or_insert(values);
            }
        }
        Ok(())
    })?;
    debug!(cells = received, "deserialized rank attribute map");
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tree::sample_tree;
    use pretty_assertions::assert_eq;
    use smallvec::smallvec;

    fn record(neighbors: &[NodeIndex], weights: &[f32], kinds: &[i16]) -> EdgeRecord {
        let mut set = AttrSet::new();
        set.insert_values("weight", weights.to_vec()).unwrap();
        set.insert_values("kind", kinds.to_vec()).unwrap();
        EdgeRecord { neighbors: neighbors.to_vec(), attrs: smallvec![set] }
    }

    fn ns() -> Vec<String> {
        vec!["Synapses".to_string()]
    }

    #[test]
    fn test_targets_start_after_own_rank() {
        let mut map = RankEdgeMap::new();
        map.entry(0).or_default().insert(1, record(&[5], &[0.5], &[1]));
        map.entry(2).or_default().insert(2, record(&[6, 7], &[1.0, 2.0], &[2, 3]));
        let (send, packed) = serialize_rank_edge_map(3, 1, &map, &ns()).unwrap();
        assert_eq!(packed, 3);
        assert_eq!(send.counts[1], 0);
        // rank 2 is packed first, then rank 0, then the empty own slot
        assert_eq!(send.displs[2], 0);
        assert_eq!(send.displs[0], send.counts[2]);
        assert_eq!(send.displs[1], send.data.len());
    }

    #[test]
    fn test_self_exchange_merges_existing_keys() {
        let mut by_rank = RankEdgeMap::new();
        by_rank.entry(0).or_default().insert(4, record(&[1, 2], &[0.1, 0.2], &[-1, -2]));
        let (send, _) = serialize_rank_edge_map(1, 0, &by_rank, &ns()).unwrap();

        let mut map = EdgeMap::new();
        map.insert(4, record(&[9], &[0.9], &[9]));
        let stats = deserialize_rank_edge_map(1, &send, &ns(), &mut map).unwrap();
        assert_eq!(stats, ExchangeStats { num_nodes: 0, num_edges: 2 });
        assert_eq!(map[&4], record(&[9, 1, 2], &[0.9, 0.1, 0.2], &[9, -1, -2]));
    }

    #[test]
    fn test_corrupt_buffers_rejected() {
        let mut by_rank = RankEdgeMap::new();
        by_rank.entry(0).or_default().insert(4, record(&[1], &[0.1], &[1]));
        let (send, _) = serialize_rank_edge_map(1, 0, &by_rank, &ns()).unwrap();

        let mut bad = send.clone();
        bad.displs[0] = bad.data.len() + 3;
        assert!(matches!(
            deserialize_rank_edge_map(1, &bad, &ns(), &mut EdgeMap::new()),
            Err(Error::ContractViolation(_))
        ));

        let mut short = send.clone();
        short.data.truncate(short.data.len() - 1);
        short.counts[0] -= 1;
        assert!(matches!(
            deserialize_rank_edge_map(1, &short, &ns(), &mut EdgeMap::new()),
            Err(Error::DecodeError(_))
        ));

        assert!(matches!(
            deserialize_rank_edge_map(1, &send, &["Other".to_string()], &mut EdgeMap::new()),
            Err(Error::ContractViolation(_))
        ));
    }

    #[test]
    fn test_empty_bucket_with_namespaces() {
        let by_rank = RankEdgeMap::from([(0, EdgeMap::new())]);
        let (send, packed) = serialize_rank_edge_map(1, 0, &by_rank, &ns()).unwrap();
        assert_eq!(packed, 0);
        assert_eq!(send.counts, vec![0]);

        let mut map = EdgeMap::new();
        let stats = deserialize_rank_edge_map(1, &send, &ns(), &mut map).unwrap();
        assert_eq!(stats, ExchangeStats::default());
        assert!(map.is_empty());

        // an empty bucket next to a filled one
        let mut by_rank = RankEdgeMap::from([(0, EdgeMap::new())]);
        by_rank.entry(1).or_default().insert(7, record(&[3], &[0.3], &[3]));
        let (send, packed) = serialize_rank_edge_map(2, 0, &by_rank, &ns()).unwrap();
        assert_eq!(packed, 1);
        assert_eq!(send.counts[0], 0);
        let payload = send.payload(1).unwrap().to_vec();
        let recv = ExchangeBuffers { counts: vec![payload.len(), 0], displs: vec![0, 0], data: payload };
        let mut map = EdgeMap::new();
        deserialize_rank_edge_map(2, &recv, &ns(), &mut map).unwrap();
        assert_eq!(map[&7], record(&[3], &[0.3], &[3]));
    }

    #[test]
    fn test_rank_outside_group_rejected() {
        let mut by_rank = RankEdgeMap::new();
        by_rank.entry(3).or_default().insert(4, record(&[1], &[0.1], &[1]));
        assert!(serialize_rank_edge_map(2, 0, &by_rank, &ns()).is_err());
    }

    #[test]
    fn test_tree_map_exchange_keeps_first() {
        let mut mine = TreeMap::new();
        mine.insert(5, sample_tree(5, 3));
        mine.insert(8, sample_tree(8, 1));
        let by_rank = BTreeMap::from([(0, mine.clone())]);
        let send = serialize_rank_tree_map(1, 0, &by_rank).unwrap();

        let mut trees = TreeMap::new();
        trees.insert(8, sample_tree(8, 4));
        assert_eq!(deserialize_rank_tree_map(1, &send, &mut trees).unwrap(), 2);
        assert_eq!(trees[&5], mine[&5]);
        assert_eq!(trees[&8].num_points(), 4);
    }

    #[test]
    fn test_attr_map_exchange_routes_and_merges() {
        use crate::model::CellAttrs;
        let soma = |v: &[f32]| CellAttrs::from([("soma".to_string(), Column::from(v.to_vec()))]);
        let by_rank = BTreeMap::from([
            (0, CellAttrMap::from([(2, soma(&[1.0, 2.0]))])),
            (1, CellAttrMap::from([(4, soma(&[3.0])), (6, soma(&[]))])),
            (2, CellAttrMap::new()),
        ]);
        let send = serialize_rank_attr_map(3, 0, &by_rank).unwrap();
        assert_eq!(send.counts[2], 0);

        let recv = ExchangeBuffers {
            counts: vec![send.counts[1], 0, 0],
            displs: vec![0; 3],
            data: send.payload(1).unwrap().to_vec(),
        };
        let mut cells = CellAttrMap::from([(4, CellAttrs::from([("layer".to_string(), Column::from(vec![7u8]))]))]);
        assert_eq!(deserialize_rank_attr_map(3, &recv, &mut cells).unwrap(), 2);
        assert_eq!(cells[&4].len(), 2);
        assert_eq!(cells[&4]["soma"], Column::from(vec![3.0f32]));
        assert_eq!(cells[&6]["soma"], Column::from(Vec::<f32>::new()));
        assert!(!cells.contains_key(&2));

        let mut corrupt = send.payload(1).unwrap().to_vec();
        corrupt[0] = b'T';
        assert!(decode_cell_attr_map(&corrupt).is_err());
    }
}
