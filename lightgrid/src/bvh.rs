//! Layout of the flat light BVH.
//!
//! The tree is complete with [`BVH_NUM_CHILDREN`] children per node. Levels
//! are stored one after the other starting at the root, so level `L` holds
//! `32^L` nodes starting at [`first_node_index`]`(L)`, and the children of
//! node `n` are `32 * n + 1 ..= 32 * n + 32`. The last level holds one leaf
//! per (sorted) light.

/// Branching factor of the tree.
pub const BVH_NUM_CHILDREN: u32 = 32;
/// Deepest tree that can be addressed with 32 bit node indices.
pub const BVH_MAX_LEVELS: u32 = 7;

/// Levels needed to hold `leaf_count` leaves, root included.
///
/// `ceil(log32(max(leaf_count, 1))) + 1`
pub fn num_levels(leaf_count: u32) -> u32 {
    let mut levels = 1;
    let mut capacity = 1u64;
    while capacity < leaf_count as u64 {
        capacity *= BVH_NUM_CHILDREN as u64;
        levels += 1;
    }
    levels
}

/// Node slots of a level: `32^level`.
pub fn num_level_nodes(level: u32) -> u32 {
    debug_assert!(level < BVH_MAX_LEVELS);
    BVH_NUM_CHILDREN.pow(level)
}

/// Index of the first node of `level` in the flat array.
pub fn first_node_index(level: u32) -> u32 {
    debug_assert!(level <= BVH_MAX_LEVELS);
    (((BVH_NUM_CHILDREN as u64).pow(level) - 1) / (BVH_NUM_CHILDREN as u64 - 1)) as u32
}

/// Total node slots of a tree over `leaf_count` leaves.
pub fn num_nodes(leaf_count: u32) -> u32 {
    first_node_index(num_levels(leaf_count))
}

pub fn first_child(node: u32) -> u32 {
    node * BVH_NUM_CHILDREN + 1
}

pub fn is_leaf(node: u32, levels: u32) -> bool {
    node >= first_node_index(levels - 1)
}

pub fn leaf_index(node: u32, levels: u32) -> u32 {
    node - first_node_index(levels - 1)
}
