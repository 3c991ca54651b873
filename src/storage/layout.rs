//! Logical dataset layout the engine imposes on a store.
//!
//! ```text
//! /Populations/{Start,Count,Id,Name,NamePtr}
//! /Populations/Combos/{Src,Dst}
//! /Projections/<src>/<dst>/Connectivity/{SrcPop,DstPop,BlockPtr,BlockBase,DestPtr,SourceIndex}
//! /Projections/<src>/<dst>/Attributes/<namespace>/<attribute>
//! ```

pub const POPULATIONS: &str = "/Populations";
pub const POP_START: &str = "/Populations/Start";
pub const POP_COUNT: &str = "/Populations/Count";
pub const POP_ID: &str = "/Populations/Id";
pub const POP_NAME: &str = "/Populations/Name";
pub const POP_NAME_PTR: &str = "/Populations/NamePtr";
pub const POP_COMBO_SRC: &str = "/Populations/Combos/Src";
pub const POP_COMBO_DST: &str = "/Populations/Combos/Dst";

pub const PROJECTIONS: &str = "/Projections";

pub const SRC_POP: &str = "SrcPop";
pub const DST_POP: &str = "DstPop";
pub const BLOCK_PTR: &str = "BlockPtr";
pub const BLOCK_BASE: &str = "BlockBase";
pub const DEST_PTR: &str = "DestPtr";
pub const SOURCE_INDEX: &str = "SourceIndex";

/// `/Projections/<src>/<dst>`
pub fn projection(src: &str, dst: &str) -> String {
    format!("{PROJECTIONS}/{src}/{dst}")
}

/// `/Projections/<src>/<dst>/Connectivity/<dataset>`
pub fn connectivity(src: &str, dst: &str, dataset: &str) -> String {
    format!("{}/Connectivity/{dataset}", projection(src, dst))
}

/// `/Projections/<src>/<dst>/Attributes/<namespace>`
pub fn attr_namespace(src: &str, dst: &str, namespace: &str) -> String {
    format!("{}/Attributes/{namespace}", projection(src, dst))
}

/// `/Projections/<src>/<dst>/Attributes/<namespace>/<name>`
pub fn attr(src: &str, dst: &str, namespace: &str, name: &str) -> String {
    format!("{}/{name}", attr_namespace(src, dst, namespace))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(connectivity("GC", "MC", BLOCK_PTR), "/Projections/GC/MC/Connectivity/BlockPtr");
        assert_eq!(attr("GC", "MC", "Synapses", "weight"), "/Projections/GC/MC/Attributes/Synapses/weight");
    }
}
