//! Named attribute containers.
//!
//! - [`AttrSet`]: named columns sharing one record space with one value per
//!   record. Edge attributes of one namespace live here.
//! - [`AttrTable`]: named columns whose records are variable-length runs
//!   delimited by pointer arrays. One attribute owns each pointer array,
//!   others may share it (e.g. the y/z coordinates of a tree reuse the
//!   pointer owned by x).
//! - [`CellAttrMap`]: per-cell variable-length attribute values, the form
//!   cell attributes take before they are flattened into an [`AttrTable`].

use std::collections::BTreeMap;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::pointer::{check_pointer, prefix_sum, rebase};
use super::value::{Column, Primitive, ValueKind};
use super::NodeIndex;
use crate::{Error, Result};

// ============================================================================
// Schema
// ============================================================================

/// One `(kind, name)` entry of an attribute schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttrSpec {
    pub kind: ValueKind,
    pub name: String,
}

/// Kind-major ordered list of attributes in a set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrSchema(pub Vec<AttrSpec>);

impl AttrSchema {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttrSpec> {
        self.0.iter()
    }

    /// Attribute names of one kind, in schema order.
    pub fn names_of(&self, kind: ValueKind) -> Vec<&str> {
        self.0.iter().filter(|s| s.kind == kind).map(|s| s.name.as_str()).collect()
    }
}

// ============================================================================
// AttrSet
// ============================================================================

/// Named columns over one logical record space.
///
/// Columns are kept kind-major (in [`ValueKind::ATTRIBUTE_KINDS`] order),
/// insertion order within a kind, so two sets built from the same schema
/// line up column for column.
#[derive(Debug, Clone, Default)]
pub struct AttrSet {
    columns: Vec<(String, Column)>,
    index: HashMap<String, usize>,
}

impl PartialEq for AttrSet {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

impl AttrSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty set with the given schema.
    pub fn from_schema(schema: &AttrSchema) -> Result<Self> {
        let mut set = Self::new();
        for spec in schema.iter() {
            set.insert(spec.name.clone(), Column::new(spec.kind))?;
        }
        Ok(set)
    }

    /// An empty set with the same schema as `self`.
    pub fn empty_like(&self) -> Self {
        let columns: Vec<(String, Column)> = self
            .columns
            .iter()
            .map(|(name, col)| (name.clone(), Column::new(col.kind())))
            .collect();
        let index = self.index.clone();
        Self { columns, index }
    }

    /// Add a named column. All columns must hold the same number of records.
    pub fn insert(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        let kind = column.kind();
        if !kind.is_attribute() {
            return Err(Error::TypeError {
                expected: "attribute kind".into(),
                got: kind.to_string(),
            });
        }
        if self.index.contains_key(&name) {
            return Err(Error::ContractViolation(format!("duplicate attribute '{name}'")));
        }
        if !self.columns.is_empty() && column.len() != self.num_records() {
            return Err(Error::ContractViolation(format!(
                "attribute '{name}' has {} records, set has {}",
                column.len(),
                self.num_records()
            )));
        }
        let pos = self
            .columns
            .iter()
            .position(|(_, c)| c.kind() > kind)
            .unwrap_or(self.columns.len());
        self.columns.insert(pos, (name, column));
        self.reindex();
        Ok(())
    }

    pub fn insert_values<T: Primitive>(&mut self, name: impl Into<String>, values: Vec<T>) -> Result<()> {
        self.insert(name, T::into_column(values))
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, (name, _)) in self.columns.iter().enumerate() {
            self.index.insert(name.clone(), i);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|&i| &self.columns[i].1)
    }

    /// Typed values of one attribute.
    pub fn values<T: Primitive>(&self, name: &str) -> Option<&[T]> {
        self.get(name)?.as_slice::<T>()
    }

    /// Number of attributes of kind `T`.
    pub fn size_of<T: Primitive>(&self) -> usize {
        self.columns.iter().filter(|(_, c)| c.kind() == T::KIND).count()
    }

    /// Append one value to attribute `name` of kind `T`.
    pub fn push<T: Primitive>(&mut self, name: &str, value: T) -> Result<()> {
        let &i = self
            .index
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("attribute '{name}'")))?;
        let col = &mut self.columns[i].1;
        let got = col.kind();
        col.as_vec_mut::<T>()
            .ok_or_else(|| Error::TypeError { expected: T::KIND.to_string(), got: got.to_string() })?
            .push(value);
        Ok(())
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Number of records (0 for a set without attributes).
    pub fn num_records(&self) -> usize {
        self.columns.first().map_or(0, |(_, c)| c.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn schema(&self) -> AttrSchema {
        AttrSchema(
            self.columns
                .iter()
                .map(|(name, col)| AttrSpec { kind: col.kind(), name: name.clone() })
                .collect(),
        )
    }

    /// Append record `record` of `src` to every column of `self`.
    ///
    /// Both sets must share a schema; columns are matched positionally.
    pub fn push_record_from(&mut self, src: &AttrSet, record: usize) -> Result<()> {
        if src.columns.len() != self.columns.len() {
            return Err(Error::ContractViolation(format!(
                "attribute set has {} columns, source has {}",
                self.columns.len(),
                src.columns.len()
            )));
        }
        for ((_, dst), (_, col)) in self.columns.iter_mut().zip(&src.columns) {
            dst.push_from(col, record)?;
        }
        Ok(())
    }

    /// Append every record of `other`, matching columns by name.
    pub fn append(&mut self, other: &AttrSet) -> Result<()> {
        if other.len() != self.len() {
            return Err(Error::ContractViolation(format!(
                "cannot append attribute set with {} columns to one with {}",
                other.len(),
                self.len()
            )));
        }
        for (name, col) in &other.columns {
            let &i = self
                .index
                .get(name)
                .ok_or_else(|| Error::ContractViolation(format!("attribute '{name}' missing on merge")))?;
            self.columns[i].1.extend_from(col)?;
        }
        Ok(())
    }

    /// Copy of records `range` of every column.
    pub fn slice(&self, range: std::ops::Range<usize>) -> Result<AttrSet> {
        let mut out = AttrSet::new();
        for (name, col) in &self.columns {
            out.columns.push((name.clone(), col.slice(range.clone())?));
        }
        out.index = self.index.clone();
        Ok(out)
    }
}

// ============================================================================
// AttrTable
// ============================================================================

/// Index of a pointer array owned by an [`AttrTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointerId(usize);

/// How an attribute in a table relates to its pointer array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerOwnership {
    /// The attribute defines and persists the pointer array.
    Owner,
    /// The attribute reuses the pointer array of the named owner.
    Shared(String),
}

#[derive(Debug, Clone)]
struct TableAttr {
    name: String,
    column: Column,
    pointer: PointerId,
    owner: bool,
}

/// Variable-length attribute records with explicitly owned pointer arrays.
#[derive(Debug, Clone, Default)]
pub struct AttrTable {
    pointers: Vec<Vec<u64>>,
    attrs: Vec<TableAttr>,
    index: HashMap<String, usize>,
}

impl AttrTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute that owns `pointer`. The pointer is rebased.
    pub fn insert_owner(
        &mut self,
        name: impl Into<String>,
        column: Column,
        mut pointer: Vec<u64>,
    ) -> Result<PointerId> {
        let name = name.into();
        self.check_new(&name)?;
        check_pointer(&name, &pointer, column.len())?;
        let records = pointer.len() - 1;
        if let Some(n) = self.num_records() {
            if n != records {
                return Err(Error::ContractViolation(format!(
                    "attribute '{name}' has {records} records, table has {n}"
                )));
            }
        }
        rebase(&mut pointer)?;
        let id = PointerId(self.pointers.len());
        self.pointers.push(pointer);
        self.push_attr(TableAttr { name, column, pointer: id, owner: true });
        Ok(id)
    }

    /// Add an attribute that reuses the pointer array of `owner`.
    pub fn insert_shared(&mut self, name: impl Into<String>, column: Column, owner: &str) -> Result<()> {
        let name = name.into();
        self.check_new(&name)?;
        let owner_attr = self
            .index
            .get(owner)
            .map(|&i| &self.attrs[i])
            .ok_or_else(|| Error::NotFound(format!("pointer owner '{owner}'")))?;
        if !owner_attr.owner {
            return Err(Error::ContractViolation(format!(
                "'{owner}' shares its pointer array and cannot be an owner"
            )));
        }
        let id = owner_attr.pointer;
        let total = self.pointers[id.0].last().copied().unwrap_or(0);
        if column.len() as u64 != total {
            return Err(Error::ContractViolation(format!(
                "shared attribute '{name}' has {} values, owner '{owner}' spans {total}",
                column.len()
            )));
        }
        self.push_attr(TableAttr { name, column, pointer: id, owner: false });
        Ok(())
    }

    fn check_new(&self, name: &str) -> Result<()> {
        if self.index.contains_key(name) {
            return Err(Error::ContractViolation(format!("duplicate attribute '{name}'")));
        }
        Ok(())
    }

    fn push_attr(&mut self, attr: TableAttr) {
        self.index.insert(attr.name.clone(), self.attrs.len());
        self.attrs.push(attr);
    }

    /// Number of records, or `None` for an empty table.
    pub fn num_records(&self) -> Option<usize> {
        self.pointers.first().map(|p| p.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attrs.iter().map(|a| a.name.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|&i| &self.attrs[i].column)
    }

    pub fn pointer(&self, name: &str) -> Option<&[u64]> {
        self.index.get(name).map(|&i| self.pointers[self.attrs[i].pointer.0].as_slice())
    }

    pub fn ownership(&self, name: &str) -> Option<PointerOwnership> {
        let attr = &self.attrs[*self.index.get(name)?];
        if attr.owner {
            return Some(PointerOwnership::Owner);
        }
        self.attrs
            .iter()
            .find(|a| a.owner && a.pointer == attr.pointer)
            .map(|a| PointerOwnership::Shared(a.name.clone()))
    }

    /// Typed values of record `record` of attribute `name`.
    pub fn record<T: Primitive>(&self, name: &str, record: usize) -> Option<&[T]> {
        let attr = &self.attrs[*self.index.get(name)?];
        let ptr = &self.pointers[attr.pointer.0];
        let lo = *ptr.get(record)? as usize;
        let hi = *ptr.get(record + 1)? as usize;
        attr.column.as_slice::<T>().map(|v| &v[lo..hi])
    }
}

// ============================================================================
// Cell attributes
// ============================================================================

/// Attribute values of one cell, by attribute name.
pub type CellAttrs = BTreeMap<String, Column>;

/// Cell attributes keyed by cell index.
pub type CellAttrMap = BTreeMap<NodeIndex, CellAttrs>;

/// Flatten `cells` into an [`AttrTable`] with one record per cell. Every
/// attribute owns its pointer array.
///
/// All cells must carry the same attribute names with the same kinds.
pub fn cell_attrs_to_table(cells: &CellAttrMap) -> Result<(Vec<NodeIndex>, AttrTable)> {
    let ids: Vec<NodeIndex> = cells.keys().copied().collect();
    let mut table = AttrTable::new();
    let Some(first) = cells.values().next() else {
        return Ok((ids, table));
    };
    for (id, attrs) in cells {
        if attrs.len() != first.len() {
            return Err(Error::ContractViolation(format!(
                "cell {id} has {} attributes, expected {}",
                attrs.len(),
                first.len()
            )));
        }
    }
    for (name, template) in first {
        let mut column = Column::new(template.kind());
        let mut lengths = Vec::with_capacity(cells.len());
        for (id, attrs) in cells {
            let values = attrs
                .get(name)
                .ok_or_else(|| Error::ContractViolation(format!("cell {id} lacks attribute '{name}'")))?;
            column.extend_from(values)?;
            lengths.push(values.len());
        }
        table.insert_owner(name.as_str(), column, prefix_sum(lengths))?;
    }
    Ok((ids, table))
}

/// Inverse of [`cell_attrs_to_table`]. Shared attributes are read through
/// their owner's pointer.
pub fn table_to_cell_attrs(ids: &[NodeIndex], table: &AttrTable) -> Result<CellAttrMap> {
    if let Some(records) = table.num_records() {
        if records != ids.len() {
            return Err(Error::ContractViolation(format!("{} cell ids for {records} records", ids.len())));
        }
    }
    let mut cells: CellAttrMap = ids.iter().map(|&id| (id, CellAttrs::new())).collect();
    for attr in &table.attrs {
        let ptr = &table.pointers[attr.pointer.0];
        for (i, &id) in ids.iter().enumerate() {
            let range = ptr[i] as usize..ptr[i + 1] as usize;
            if let Some(cell) = cells.get_mut(&id) {
                cell.insert(attr.name.clone(), attr.column.slice(range)?);
            }
        }
    }
    Ok(cells)
}
