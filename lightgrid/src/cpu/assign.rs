//! Assignment of lights to clusters, and the cluster mask passes around it.

use arrayvec::ArrayVec;
use glam::{Mat4, UVec2, Vec2, Vec3};
use lightgrid_types::{
    Aabb, ClusterLightRange, DepthSamples, PointLight, SpotCulling, SpotLight, MAX_LIGHTS_PER_CLUSTER_LIMIT,
};

use crate::{
    bvh::{first_child, is_leaf, leaf_index, BVH_NUM_CHILDREN},
    cpu::sort::bitonic_network,
    grid::ClusterGrid,
    pass::limits::MAX_DISPATCH_GROUPS,
    volumes::{self, ClusterBounds, ViewCone},
};

pub type ClusterLights = ArrayVec<u32, { MAX_LIGHTS_PER_CLUSTER_LIMIT as usize }>;

/// View space volumes of the lights of one type.
pub enum LightVolumes {
    Points(Vec<(Vec3, f32)>),
    Spots(Vec<ViewCone>, SpotCulling),
}

impl LightVolumes {
    pub fn points(lights: &[PointLight], view: &Mat4) -> Self {
        Self::Points(
            lights
                .iter()
                .map(|light| (view.transform_point3(light.position), light.range))
                .collect(),
        )
    }

    pub fn spots(lights: &[SpotLight], view: &Mat4, culling: SpotCulling) -> Self {
        Self::Spots(lights.iter().map(|light| ViewCone::new(light, view)).collect(), culling)
    }

    fn touches(&self, light: usize, light_aabb: &Aabb, cluster: &ClusterBounds) -> bool {
        match self {
            Self::Points(points) => {
                let (center, range) = points[light];
                volumes::point_light_touches(center, range, light_aabb, cluster)
            }
            Self::Spots(cones, culling) => volumes::spot_light_touches(&cones[light], light_aabb, cluster, *culling),
        }
    }
}

/// Everything one assignment dispatch reads about its lights.
pub struct LightsInput<'a> {
    pub volumes: LightVolumes,
    pub aabbs: &'a [Aabb],
    /// Sorted order of the lights, natural order otherwise.
    pub indices: Option<&'a [u32]>,
    /// Nodes of the BVH and its level count, when traversing it.
    pub bvh: Option<(&'a [Aabb], u32)>,
    pub max_lights: u32,
    /// Bounds of every light, when clusters outside them are skipped.
    pub lights_aabb: Option<Aabb>,
}

impl LightsInput<'_> {
    fn light_at(&self, position: usize) -> usize {
        match self.indices {
            Some(indices) => indices[position] as usize,
            None => position,
        }
    }

    fn append(&self, position: usize, cluster: &ClusterBounds, out: &mut ClusterLights, appended: &mut u32) {
        let light = self.light_at(position);
        if self.volumes.touches(light, &self.aabbs[light], cluster) {
            if *appended < self.max_lights {
                out.push(light as u32);
            }
            *appended += 1;
        }
    }

    /// Lights touching the cluster, in append order, up to `max_lights`.
    pub fn gather(&self, cluster_aabb: &Aabb) -> ClusterLights {
        let mut out = ClusterLights::new();
        if let Some(bounds) = self.lights_aabb {
            if !bounds.intersects(cluster_aabb) {
                return out;
            }
        }

        let cluster = ClusterBounds::new(*cluster_aabb);
        let count = self.aabbs.len();
        let mut appended = 0;
        match self.bvh {
            None => {
                for position in 0..count {
                    self.append(position, &cluster, &mut out, &mut appended);
                }
            }
            Some((_, 1)) => {
                if count != 0 {
                    self.append(0, &cluster, &mut out, &mut appended);
                }
            }
            Some((nodes, levels)) => {
                let visit = |node: u32| {
                    let aabb = &nodes[node as usize];
                    !aabb.is_degenerate() && aabb.intersects(cluster_aabb)
                };
                let mut stack = Vec::new();
                if visit(0) {
                    stack.push(0);
                }
                while let Some(node) = stack.pop() {
                    let first = first_child(node);
                    for child in first..first + BVH_NUM_CHILDREN {
                        if is_leaf(child, levels) {
                            let position = leaf_index(child, levels) as usize;
                            if position < count {
                                self.append(position, &cluster, &mut out, &mut appended);
                            }
                        } else if visit(child) {
                            stack.push(child);
                        }
                    }
                }
            }
        }

        if appended > self.max_lights {
            log::trace!("Clamped {appended} lights to {} in a cluster", self.max_lights);
        }
        out
    }
}

/// Appends each cluster's lights to the flat index buffer, reserving its
/// range from the running `counter`. Lists running past the end of
/// `indices` are cut short, the counter still counts them.
pub fn assign_lights(
    input: &LightsInput<'_>,
    clusters: impl IntoIterator<Item = u32>,
    clusters_aabb: &[Aabb],
    counter: &mut u32,
    grid: &mut [ClusterLightRange],
    indices: &mut [u32],
) {
    let capacity = indices.len() as u32;
    for cluster in clusters {
        let lights = input.gather(&clusters_aabb[cluster as usize]);
        let found = lights.len() as u32;
        let offset = (*counter).min(capacity);
        let count = found.min(capacity - offset);
        *counter = counter.saturating_add(found);
        if count < found {
            log::trace!("Cluster light indices are full, dropped {} lights of cluster {cluster}", found - count);
        }
        indices[offset as usize..(offset + count) as usize].copy_from_slice(&lights[..count as usize]);
        grid[cluster as usize] = ClusterLightRange { offset, count };
    }
}

/// Flags the clusters containing a visible depth sample.
pub fn clusters_mask(invocations: u32, grid: &ClusterGrid, depth: &DepthSamples, mask: &mut [u32]) {
    let size = depth.size;
    let scale = grid.viewport().as_vec2() / size.max(UVec2::ONE).as_vec2();
    let count = invocations.min(size.x * size.y);
    for sample in 0..count {
        let view_z = depth.view_depths[sample as usize];
        if view_z >= 0.0 {
            continue;
        }
        let pixel = UVec2::new(sample % size.x, sample / size.x);
        let screen = (pixel.as_vec2() + Vec2::splat(0.5)) * scale;
        let cluster = grid.cluster_index_3d_from_screen(screen, view_z);
        mask[grid.cluster_index_1d(cluster) as usize] = 1;
    }
}

/// Compacts the flagged clusters and counts them in the indirect arguments.
/// Clusters past the dispatch limit are dropped.
pub fn find_unique_clusters(cluster_count: u32, mask: &[u32], unique: &mut [u32], indirect: &mut [u32; 3]) {
    indirect[1] = 1;
    indirect[2] = 1;
    for cluster in 0..cluster_count {
        if mask[cluster as usize] == 0 {
            continue;
        }
        let slot = indirect[0];
        if slot < MAX_DISPATCH_GROUPS {
            unique[slot as usize] = cluster;
            indirect[0] += 1;
        }
    }
}

/// Sorts each cluster's lights by light index.
pub fn sort_assigned_lights(
    clusters: impl IntoIterator<Item = u32>,
    grid: &[ClusterLightRange],
    indices: &mut [u32],
) {
    let mut pairs = Vec::with_capacity(MAX_LIGHTS_PER_CLUSTER_LIMIT as usize);
    for cluster in clusters {
        let range = grid[cluster as usize];
        let lights = &mut indices[range.offset as usize..(range.offset + range.count) as usize];

        pairs.clear();
        pairs.extend(lights.iter().map(|&light| (light, light)));
        pairs.resize(lights.len().next_power_of_two(), (u32::MAX, u32::MAX));
        bitonic_network(&mut pairs);
        for (light, (key, _)) in lights.iter_mut().zip(&pairs) {
            *light = *key;
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::UVec3;

    use super::*;

    fn cluster() -> Aabb {
        Aabb::from_min_max(Vec3::new(-1.0, -1.0, -11.0), Vec3::new(1.0, 1.0, -9.0))
    }

    fn input<'a>(volumes: LightVolumes, aabbs: &'a [Aabb], max_lights: u32) -> LightsInput<'a> {
        LightsInput {
            volumes,
            aabbs,
            indices: None,
            bvh: None,
            max_lights,
            lights_aabb: None,
        }
    }

    #[test]
    fn gather_clamps() {
        let lights: Vec<_> = (0..10)
            .map(|i| PointLight::new(Vec3::new(i as f32 * 0.1, 0.0, -10.0), 1.0))
            .collect();
        let aabbs: Vec<_> = lights.iter().map(|l| volumes::point_light_aabb(l, &Mat4::IDENTITY)).collect();

        let all = input(LightVolumes::points(&lights, &Mat4::IDENTITY), &aabbs, 128);
        assert_eq!(all.gather(&cluster()).as_slice(), &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);

        let clamped = input(LightVolumes::points(&lights, &Mat4::IDENTITY), &aabbs, 4);
        assert_eq!(clamped.gather(&cluster()).as_slice(), &[0, 1, 2, 3]);

        let limited = LightsInput {
            lights_aabb: Some(Aabb::from_sphere(Vec3::new(0.0, 0.0, -50.0), 1.0)),
            ..input(LightVolumes::points(&lights, &Mat4::IDENTITY), &aabbs, 128)
        };
        assert!(limited.gather(&cluster()).is_empty());
    }

    #[test]
    fn spot_culling_modes() {
        // Pointing away from the cluster, but its sphere reaches it. The apex
        // stays outside the sphere bounding the cluster.
        let spot = SpotLight::new(Vec3::new(0.0, 0.0, -7.0), Vec3::Z, 3.0, 0.3);
        let loose = [volumes::spot_light_aabb(&spot, &Mat4::IDENTITY, false)];

        let sphere = input(
            LightVolumes::spots(&[spot], &Mat4::IDENTITY, SpotCulling::Sphere),
            &loose,
            128,
        );
        assert_eq!(sphere.gather(&cluster()).as_slice(), &[0]);

        let cone = input(LightVolumes::spots(&[spot], &Mat4::IDENTITY, SpotCulling::Cone), &loose, 128);
        assert!(cone.gather(&cluster()).is_empty());

        // The tight box alone already rejects it.
        let tight = [volumes::spot_light_aabb(&spot, &Mat4::IDENTITY, true)];
        let sphere = input(
            LightVolumes::spots(&[spot], &Mat4::IDENTITY, SpotCulling::Sphere),
            &tight,
            128,
        );
        assert!(sphere.gather(&cluster()).is_empty());
    }

    #[test]
    fn full_index_buffer_cuts_lists() {
        let lights: Vec<_> = (0..6)
            .map(|i| PointLight::new(Vec3::new(i as f32 * 0.1, 0.0, -10.0), 1.0))
            .collect();
        let aabbs: Vec<_> = lights.iter().map(|l| volumes::point_light_aabb(l, &Mat4::IDENTITY)).collect();
        let input = input(LightVolumes::points(&lights, &Mat4::IDENTITY), &aabbs, 128);

        let clusters_aabb = [cluster(); 3];
        let mut grid = [ClusterLightRange::default(); 3];
        let mut indices = [u32::MAX; 10];
        let mut counter = 0;
        assign_lights(&input, 0..3, &clusters_aabb, &mut counter, &mut grid, &mut indices);

        assert_eq!(counter, 18);
        assert_eq!(grid[0], ClusterLightRange { offset: 0, count: 6 });
        assert_eq!(grid[1], ClusterLightRange { offset: 6, count: 4 });
        assert_eq!(grid[2], ClusterLightRange { offset: 10, count: 0 });
        assert_eq!(indices, [0, 1, 2, 3, 4, 5, 0, 1, 2, 3]);
    }

    #[test]
    fn mask_and_unique() {
        let grid = ClusterGrid::compute(1.0, 1.0, 100.0, 32, UVec2::new(128, 64));
        let mut depths = vec![1.0; 8];
        depths[0] = -2.0;
        depths[7] = -50.0;
        depths[6] = -50.0;
        let depth = DepthSamples::new(UVec2::new(4, 2), depths);

        let mut mask = vec![0; grid.cluster_count() as usize];
        clusters_mask(256, &grid, &depth, &mut mask);

        let near = grid.cluster_index_1d(UVec3::new(0, 0, grid.slice_from_view_z(-2.0)));
        let far = grid.cluster_index_1d(UVec3::new(3, 1, grid.slice_from_view_z(-50.0)));
        let far_left = grid.cluster_index_1d(UVec3::new(2, 1, grid.slice_from_view_z(-50.0)));
        assert_eq!(mask.iter().filter(|&&m| m != 0).count(), 3);
        assert!(mask[near as usize] == 1 && mask[far as usize] == 1 && mask[far_left as usize] == 1);

        let mut unique = vec![0; grid.cluster_count() as usize];
        let mut indirect = [0; 3];
        find_unique_clusters(grid.cluster_count(), &mask, &mut unique, &mut indirect);
        assert_eq!(indirect, [3, 1, 1]);
        let mut expected = vec![near, far, far_left];
        expected.sort_unstable();
        assert_eq!(&unique[..3], expected.as_slice());
    }

    #[test]
    fn sorted_cluster_lists() {
        let grid = [
            ClusterLightRange { offset: 0, count: 3 },
            ClusterLightRange { offset: 3, count: 0 },
            ClusterLightRange { offset: 3, count: 5 },
        ];
        let mut indices = [7, 2, 5, 9, 4, 8, 1, 0];
        sort_assigned_lights(0..3, &grid, &mut indices);
        assert_eq!(indices, [2, 5, 7, 0, 1, 4, 8, 9]);
    }
}
