//! Morphological trees keyed by cell index.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::attr::AttrTable;
use super::pointer::prefix_sum;
use super::value::Column;
use super::NodeIndex;
use crate::{Error, Result};

/// One cell's tree: section topology plus per-point attributes.
///
/// Point arrays (`x`, `y`, `z`, `radius`, `layer`, `parent`, `swc_type`)
/// have one entry per point; `src`/`dst` describe section connectivity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub id: NodeIndex,
    pub src: Vec<u16>,
    pub dst: Vec<u16>,
    pub sections: Vec<u16>,
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,
    pub radius: Vec<f32>,
    pub layer: Vec<u8>,
    pub parent: Vec<i32>,
    pub swc_type: Vec<i8>,
}

impl Tree {
    pub fn num_points(&self) -> usize {
        self.x.len()
    }

    /// All per-point arrays must have the same length, and the topology
    /// arrays must pair up.
    pub fn check(&self) -> Result<()> {
        let n = self.x.len();
        let lens = [
            self.y.len(),
            self.z.len(),
            self.radius.len(),
            self.layer.len(),
            self.parent.len(),
            self.swc_type.len(),
        ];
        if lens.iter().any(|&l| l != n) {
            return Err(Error::ContractViolation(format!(
                "tree {}: point arrays disagree on length ({n} vs {lens:?})",
                self.id
            )));
        }
        if self.src.len() != self.dst.len() {
            return Err(Error::ContractViolation(format!(
                "tree {}: {} topology sources vs {} destinations",
                self.id,
                self.src.len(),
                self.dst.len()
            )));
        }
        Ok(())
    }
}

/// Trees keyed by cell index.
pub type TreeMap = BTreeMap<NodeIndex, Tree>;

/// Flatten trees into an [`AttrTable`] with one record per tree.
///
/// `x` owns the point pointer and every other point attribute shares it;
/// `sections` owns the section pointer; `src` owns the topology pointer and
/// `dst` shares it.
pub fn trees_to_table<'a>(trees: impl IntoIterator<Item = &'a Tree>) -> Result<(Vec<NodeIndex>, AttrTable)> {
    let trees: Vec<&Tree> = trees.into_iter().collect();
    for tree in &trees {
        tree.check()?;
    }
    let ids = trees.iter().map(|t| t.id).collect();

    let point_ptr = prefix_sum(trees.iter().map(|t| t.num_points()));
    let section_ptr = prefix_sum(trees.iter().map(|t| t.sections.len()));
    let topo_ptr = prefix_sum(trees.iter().map(|t| t.src.len()));

    fn gather<T: Clone>(trees: &[&Tree], f: impl Fn(&Tree) -> &Vec<T>) -> Vec<T> {
        trees.iter().flat_map(|&t| f(t).iter().cloned()).collect()
    }

    let mut table = AttrTable::new();
    table.insert_owner("x", Column::from(gather(&trees, |t| &t.x)), point_ptr)?;
    table.insert_shared("y", Column::from(gather(&trees, |t| &t.y)), "x")?;
    table.insert_shared("z", Column::from(gather(&trees, |t| &t.z)), "x")?;
    table.insert_shared("radius", Column::from(gather(&trees, |t| &t.radius)), "x")?;
    table.insert_shared("layer", Column::from(gather(&trees, |t| &t.layer)), "x")?;
    table.insert_shared("parent", Column::from(gather(&trees, |t| &t.parent)), "x")?;
    table.insert_shared("swc_type", Column::from(gather(&trees, |t| &t.swc_type)), "x")?;
    table.insert_owner("sections", Column::from(gather(&trees, |t| &t.sections)), section_ptr)?;
    table.insert_owner("src", Column::from(gather(&trees, |t| &t.src)), topo_ptr)?;
    table.insert_shared("dst", Column::from(gather(&trees, |t| &t.dst)), "src")?;
    Ok((ids, table))
}

/// Inverse of [`trees_to_table`].
pub fn table_to_trees(ids: &[NodeIndex], table: &AttrTable) -> Result<Vec<Tree>> {
    let records = table.num_records().unwrap_or(0);
    if records != ids.len() {
        return Err(Error::ContractViolation(format!(
            "{} tree ids for {records} records",
            ids.len()
        )));
    }
    fn field<T: crate::model::Primitive>(table: &AttrTable, name: &str, i: usize) -> Result<Vec<T>> {
        table
            .record::<T>(name, i)
            .map(<[T]>::to_vec)
            .ok_or_else(|| Error::NotFound(format!("tree attribute '{name}' record {i}")))
    }
    ids.iter()
        .enumerate()
        .map(|(i, &id)| -> Result<Tree> {
            Ok(Tree {
                id,
                src: field(table, "src", i)?,
                dst: field(table, "dst", i)?,
                sections: field(table, "sections", i)?,
                x: field(table, "x", i)?,
                y: field(table, "y", i)?,
                z: field(table, "z", i)?,
                radius: field(table, "radius", i)?,
                layer: field(table, "layer", i)?,
                parent: field(table, "parent", i)?,
                swc_type: field(table, "swc_type", i)?,
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn sample_tree(id: NodeIndex, points: usize) -> Tree {
    Tree {
        id,
        src: vec![0],
        dst: vec![1],
        sections: vec![2, 0, 1],
        x: (0..points).map(|i| i as f32).collect(),
        y: (0..points).map(|i| i as f32 * 2.0).collect(),
        z: vec![0.0; points],
        radius: vec![1.5; points],
        layer: vec![1; points],
        parent: (0..points as i32).map(|i| i - 1).collect(),
        swc_type: vec![3; points],
    }
}
