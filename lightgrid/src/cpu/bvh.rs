use lightgrid_types::Aabb;

use crate::bvh::{first_child, first_node_index, num_level_nodes, BVH_NUM_CHILDREN};

/// Writes every leaf slot of the last level: the bounds of the light at that
/// position of the (sorted) order, or an empty box past the last light.
pub fn bvh_bottom(levels: u32, aabbs: &[Aabb], indices: Option<&[u32]>, nodes: &mut [Aabb]) {
    let first_leaf = first_node_index(levels - 1) as usize;
    let leaves = num_level_nodes(levels - 1) as usize;
    for (leaf, node) in nodes[first_leaf..first_leaf + leaves].iter_mut().enumerate() {
        *node = match indices {
            _ if leaf >= aabbs.len() => Aabb::EMPTY,
            Some(indices) => aabbs[indices[leaf] as usize],
            None => aabbs[leaf],
        };
    }
}

/// Writes the nodes of the level above `child_level` from their children.
/// Degenerate children are skipped, so padding never widens a parent.
pub fn bvh_top(child_level: u32, nodes: &mut [Aabb]) {
    debug_assert!(child_level > 0);
    let parent_level = child_level - 1;
    let first_parent = first_node_index(parent_level);
    for parent in first_parent..first_parent + num_level_nodes(parent_level) {
        let children = first_child(parent) as usize..(first_child(parent) + BVH_NUM_CHILDREN) as usize;
        nodes[parent as usize] = nodes[children]
            .iter()
            .fold(Aabb::EMPTY, |acc, child| acc.union_child(child));
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::{
        bvh::{num_levels, num_nodes},
        cpu::tests::Rng,
    };

    fn build(aabbs: &[Aabb], indices: Option<&[u32]>) -> Vec<Aabb> {
        let levels = num_levels(aabbs.len() as u32);
        let mut nodes = vec![Aabb::from_sphere(Vec3::splat(1e6), 1.0); num_nodes(aabbs.len() as u32) as usize];
        bvh_bottom(levels, aabbs, indices, &mut nodes);
        for child_level in (1..levels).rev() {
            bvh_top(child_level, &mut nodes);
        }
        nodes
    }

    #[test]
    fn root_contains_every_light() {
        let mut rng = Rng::new(11);
        for count in [0, 1, 31, 32, 1000] {
            let aabbs: Vec<_> = (0..count)
                .map(|_| Aabb::from_sphere(rng.vec3(-50.0, 50.0), rng.range(0.1, 4.0)))
                .collect();
            let mut order: Vec<u32> = (0..count).collect();
            order.reverse();

            for indices in [None, Some(&order[..])] {
                let nodes = build(&aabbs, indices);
                let root = nodes[0];
                assert!(aabbs.iter().all(|aabb| root.contains(aabb)), "{count} lights");
                if count == 0 {
                    assert!(root.is_empty());
                } else {
                    let union = aabbs.iter().fold(Aabb::EMPTY, |acc, aabb| acc.union(aabb));
                    assert_eq!(root, union, "{count} lights");
                }
            }
        }
    }

    #[test]
    fn degenerate_children_are_ignored() {
        let real = Aabb::from_sphere(Vec3::new(3.0, 0.0, 0.0), 1.0);
        let collapsed = Aabb::from_sphere(Vec3::new(-100.0, 0.0, 0.0), 0.0);
        let nodes = build(&[collapsed, real, collapsed], None);
        assert_eq!(nodes[0], real);
    }

    #[test]
    fn leaves_follow_the_sorted_order() {
        let aabbs = [
            Aabb::from_sphere(Vec3::X, 1.0),
            Aabb::from_sphere(Vec3::Y, 1.0),
            Aabb::from_sphere(Vec3::Z, 1.0),
        ];
        let nodes = build(&aabbs, Some(&[2, 0, 1][..]));
        let first_leaf = first_node_index(1) as usize;
        assert_eq!(&nodes[first_leaf..first_leaf + 3], &[aabbs[2], aabbs[0], aabbs[1]]);
        assert!(nodes[first_leaf + 3..].iter().all(Aabb::is_empty));
    }
}
