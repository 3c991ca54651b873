//! Population metadata: read once on rank 0, broadcast to every rank.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::comm::{broadcast_result, Communicator};
use crate::model::{prefix_sum, AttrTable, Column, PopId, PopulationRange, PopulationTable, ProjectionPairSet};
use crate::storage::{layout, read_all_values, ArrayStore};
use crate::{Error, Result};

/// Wire form of a [`PopulationTable`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct PopulationSnapshot {
    ranges: Vec<PopulationRange>,
    labels: Vec<(PopId, String)>,
}

impl PopulationSnapshot {
    fn into_table(self) -> Result<PopulationTable> {
        let mut table = PopulationTable::new(self.ranges)?;
        for (pop, name) in self.labels {
            table.set_label(pop, name);
        }
        Ok(table)
    }
}

fn read_snapshot(store: &dyn ArrayStore) -> Result<PopulationSnapshot> {
    let starts: Vec<u32> = read_all_values(store, layout::POP_START)?;
    let counts: Vec<u32> = read_all_values(store, layout::POP_COUNT)?;
    let ids: Vec<PopId> = read_all_values(store, layout::POP_ID)?;
    if starts.len() != counts.len() || starts.len() != ids.len() {
        return Err(Error::ContractViolation(format!(
            "population datasets disagree: {} starts, {} counts, {} ids",
            starts.len(),
            counts.len(),
            ids.len()
        )));
    }
    let ranges = starts
        .iter()
        .zip(&counts)
        .zip(&ids)
        .map(|((&start, &count), &pop)| PopulationRange::new(start, count, pop))
        .collect();

    let mut labels = Vec::new();
    if store.exists(layout::POP_NAME) {
        let mut names = AttrTable::new();
        names.insert_owner(
            "name",
            store.read_all(layout::POP_NAME)?,
            read_all_values(store, layout::POP_NAME_PTR)?,
        )?;
        if names.num_records() != Some(ids.len()) {
            return Err(Error::ContractViolation(format!(
                "{:?} population names for {} populations",
                names.num_records(),
                ids.len()
            )));
        }
        for (i, &pop) in ids.iter().enumerate() {
            let bytes = names.record::<u8>("name", i).unwrap_or_default();
            let name = String::from_utf8(bytes.to_vec())
                .map_err(|e| Error::DecodeError(format!("population {pop} name: {e}")))?;
            if !name.is_empty() {
                labels.push((pop, name));
            }
        }
    }
    Ok(PopulationSnapshot { ranges, labels })
}

/// Read the population table on rank 0 and broadcast it.
pub fn read_population_ranges<C>(comm: &C, store: &dyn ArrayStore) -> Result<PopulationTable>
where
    C: Communicator + ?Sized,
{
    let snapshot = broadcast_result(comm, 0, || read_snapshot(store))?;
    let table = snapshot.into_table()?;
    debug!(rank = comm.rank(), populations = table.len(), nodes = table.total_nodes(), "read populations");
    Ok(table)
}

/// Read the legal `(src, dst)` population pairs on rank 0 and broadcast
/// them.
pub fn read_population_combos<C>(comm: &C, store: &dyn ArrayStore) -> Result<ProjectionPairSet>
where
    C: Communicator + ?Sized,
{
    let pairs: Vec<(PopId, PopId)> = broadcast_result(comm, 0, || {
        let src: Vec<PopId> = read_all_values(store, layout::POP_COMBO_SRC)?;
        let dst: Vec<PopId> = read_all_values(store, layout::POP_COMBO_DST)?;
        if src.len() != dst.len() {
            return Err(Error::ContractViolation(format!(
                "{} combo sources for {} combo destinations",
                src.len(),
                dst.len()
            )));
        }
        Ok(src.into_iter().zip(dst).collect())
    })?;
    Ok(pairs.into_iter().collect())
}

fn write_snapshot(store: &dyn ArrayStore, pops: &PopulationTable, pairs: &ProjectionPairSet) -> Result<()> {
    let ranges: Vec<&PopulationRange> = pops.ranges().collect();
    store.write(layout::POP_START, Column::from(ranges.iter().map(|r| r.start).collect::<Vec<_>>()))?;
    store.write(layout::POP_COUNT, Column::from(ranges.iter().map(|r| r.count).collect::<Vec<_>>()))?;
    store.write(layout::POP_ID, Column::from(ranges.iter().map(|r| r.pop).collect::<Vec<_>>()))?;

    let names: Vec<&str> = ranges.iter().map(|r| pops.name_of(r.pop).unwrap_or("")).collect();
    let name_ptr = prefix_sum(names.iter().map(|n| n.len()));
    let name_bytes: Vec<u8> = names.iter().flat_map(|n| n.bytes()).collect();
    store.write(layout::POP_NAME, Column::from(name_bytes))?;
    store.write(layout::POP_NAME_PTR, Column::from(name_ptr))?;

    let (src, dst): (Vec<PopId>, Vec<PopId>) = pairs.iter().unzip();
    store.write(layout::POP_COMBO_SRC, Column::from(src))?;
    store.write(layout::POP_COMBO_DST, Column::from(dst))?;
    Ok(())
}

/// Write populations and legal pairs from rank 0. Every rank returns once
/// the write has finished.
pub fn write_populations<C>(
    comm: &C,
    store: &dyn ArrayStore,
    pops: &PopulationTable,
    pairs: &ProjectionPairSet,
) -> Result<()>
where
    C: Communicator + ?Sized,
{
    broadcast_result(comm, 0, || write_snapshot(store, pops, pairs))?;
    if comm.rank() == 0 {
        info!(populations = pops.len(), pairs = pairs.len(), "wrote populations");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{run_group, SelfComm};
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;

    fn table() -> PopulationTable {
        PopulationTable::new([PopulationRange::new(0, 10, 0), PopulationRange::new(10, 5, 1)])
            .unwrap()
            .with_label(0, "GC")
            .with_label(1, "MC")
    }

    #[test]
    fn test_write_then_read_on_every_rank() {
        let store = MemoryStore::new();
        let pairs: ProjectionPairSet = [(0, 1), (1, 1)].into_iter().collect();
        write_populations(&SelfComm, &store, &table(), &pairs).unwrap();

        let results = run_group(3, |comm| {
            let pops = read_population_ranges(&comm, &store).unwrap();
            let combos = read_population_combos(&comm, &store).unwrap();
            (pops, combos)
        })
        .unwrap();
        for (pops, combos) in results {
            assert_eq!(pops, table());
            assert_eq!(pops.by_name("MC").unwrap().start, 10);
            assert_eq!(combos, pairs);
        }
    }

    #[test]
    fn test_missing_populations_fail_everywhere() {
        let store = MemoryStore::new();
        let results = run_group(2, |comm| read_population_ranges(&comm, &store).is_err()).unwrap();
        assert_eq!(results, vec![true, true]);
    }
}
