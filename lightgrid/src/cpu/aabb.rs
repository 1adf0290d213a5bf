//! Bounds of clusters and lights, and their reduction.

use glam::Mat4;
use lightgrid_types::{Aabb, LightsData, PointLight, SpotLight};

use crate::{grid::ClusterGrid, pass::limits::REDUCE_NUM_THREADS, volumes};

pub fn clusters_aabb(invocations: u32, grid: &ClusterGrid, inv_projection: &Mat4, out: &mut [Aabb]) {
    let count = invocations.min(grid.cluster_count());
    for index in 0..count {
        out[index as usize] = volumes::cluster_aabb(grid, inv_projection, grid.cluster_index_3d(index));
    }
}

/// One invocation bounds the point light and the spot light of its index.
pub fn lights_aabb(
    invocations: u32,
    view: &Mat4,
    tight_spots: bool,
    lights: (&[PointLight], &[SpotLight]),
    out: (&mut [Aabb], &mut [Aabb]),
) {
    let (points, spots) = lights;
    let (point_aabbs, spot_aabbs) = out;
    for index in 0..invocations as usize {
        if let Some(light) = points.get(index) {
            point_aabbs[index] = volumes::point_light_aabb(light, view);
        }
        if let Some(light) = spots.get(index) {
            spot_aabbs[index] = volumes::spot_light_aabb(light, view, tight_spots);
        }
    }
}

/// Log step halving of a workgroup's values into the first one.
fn reduce_shared(shared: &mut [Aabb]) {
    let mut half = shared.len() / 2;
    while half > 0 {
        for thread in 0..half {
            shared[thread] = shared[thread].union(&shared[thread + half]);
        }
        half /= 2;
    }
}

/// Reduces every point light's then spot light's bounds into one partial
/// per workgroup. Threads stride over the lights by the size of the whole
/// dispatch, so any number of lights fits in `groups` workgroups.
pub fn reduce_lights_aabb_first(groups: u32, lights: (&[Aabb], &[Aabb]), partials: &mut [Aabb]) {
    let (points, spots) = lights;
    let total = points.len() + spots.len();
    let fetch = |index: usize| match points.get(index) {
        Some(aabb) => *aabb,
        None => spots[index - points.len()],
    };

    let threads = REDUCE_NUM_THREADS as usize;
    let stride = groups as usize * threads;
    for group in 0..groups as usize {
        let mut shared = [Aabb::EMPTY; REDUCE_NUM_THREADS as usize];
        for (thread, value) in shared.iter_mut().enumerate() {
            let mut index = group * threads + thread;
            while index < total {
                *value = value.union(&fetch(index));
                index += stride;
            }
        }
        reduce_shared(&mut shared);
        partials[group] = shared[0];
    }
}

/// Reduces the partials of the first pass in a single workgroup, then derives
/// the lights data from the result.
pub fn reduce_lights_aabb_second(partials: &[Aabb], grid: &ClusterGrid) -> LightsData {
    let mut shared = [Aabb::EMPTY; REDUCE_NUM_THREADS as usize];
    for (index, partial) in partials.iter().enumerate() {
        let value = &mut shared[index % shared.len()];
        *value = value.union(partial);
    }
    reduce_shared(&mut shared);
    volumes::lights_data(shared[0], grid)
}

#[cfg(test)]
mod tests {
    use glam::{UVec2, Vec3};

    use super::*;
    use crate::{
        cpu::tests::Rng,
        pass::limits::REDUCE_MAX_GROUPS,
        util::math::round_up_div,
    };

    fn reduce(points: &[Aabb], spots: &[Aabb], grid: &ClusterGrid) -> LightsData {
        let total = (points.len() + spots.len()) as u32;
        let groups = round_up_div(total, REDUCE_NUM_THREADS).clamp(1, REDUCE_MAX_GROUPS);
        let mut partials = vec![Aabb::EMPTY; groups as usize];
        reduce_lights_aabb_first(groups, (points, spots), &mut partials);
        reduce_lights_aabb_second(&partials, grid)
    }

    #[test]
    fn reduction_is_the_exact_union() {
        let grid = ClusterGrid::compute(1.0, 0.1, 500.0, 32, UVec2::new(1024, 768));
        let mut rng = Rng::new(7);

        assert_eq!(reduce(&[], &[], &grid), LightsData::default());
        assert!(reduce(&[], &[], &grid).aabb.is_empty());

        let single = [Aabb::from_sphere(Vec3::new(1.0, 2.0, -30.0), 3.0)];
        assert_eq!(reduce(&single, &[], &grid).aabb, single[0]);
        assert_eq!(reduce(&[], &single, &grid).aabb, single[0]);

        // 10000 lights fill 40 groups of the first pass.
        let points: Vec<_> = (0..7000)
            .map(|_| Aabb::from_sphere(rng.vec3(-100.0, 100.0), rng.range(0.1, 5.0)))
            .collect();
        let spots: Vec<_> = (0..3000)
            .map(|_| Aabb::from_sphere(rng.vec3(-100.0, 100.0), rng.range(0.1, 5.0)))
            .collect();
        let expected = points.iter().chain(&spots).fold(Aabb::EMPTY, |acc, aabb| acc.union(aabb));

        let data = reduce(&points, &spots, &grid);
        assert_eq!(data.aabb, expected);
        assert_eq!(data.inv_range.truncate(), expected.extent().recip());
    }

    #[test]
    fn reduction_strides_past_the_group_cap() {
        let grid = ClusterGrid::compute(1.0, 0.1, 500.0, 32, UVec2::new(1024, 768));
        let mut rng = Rng::new(11);

        let points: Vec<_> = (0..150_000)
            .map(|_| Aabb::from_sphere(rng.vec3(-100.0, 100.0), rng.range(0.1, 5.0)))
            .collect();
        let mut spots: Vec<_> = (0..50_000)
            .map(|_| Aabb::from_sphere(rng.vec3(-100.0, 100.0), rng.range(0.1, 5.0)))
            .collect();
        // Only reached by the second stride of its thread.
        spots[49_999] = Aabb::from_sphere(Vec3::new(0.0, 0.0, -900.0), 1.0);

        let total = (points.len() + spots.len()) as u32;
        assert!(total > REDUCE_MAX_GROUPS * REDUCE_NUM_THREADS);
        let groups = round_up_div(total, REDUCE_NUM_THREADS).clamp(1, REDUCE_MAX_GROUPS);
        assert_eq!(groups, REDUCE_MAX_GROUPS);

        let expected = points.iter().chain(&spots).fold(Aabb::EMPTY, |acc, aabb| acc.union(aabb));
        assert_eq!(expected.min.z, -901.0);
        assert_eq!(reduce(&points, &spots, &grid).aabb, expected);
    }

    #[test]
    fn clusters_cover_the_grid() {
        let grid = ClusterGrid::compute(1.0, 0.5, 50.0, 64, UVec2::new(256, 128));
        let inv_projection = Mat4::perspective_rh(1.0, 2.0, 0.5, 50.0).inverse();
        let mut out = vec![Aabb::EMPTY; grid.cluster_count() as usize + 3];
        clusters_aabb(round_up_div(grid.cluster_count(), 64) * 64, &grid, &inv_projection, &mut out);

        assert!(out[..grid.cluster_count() as usize].iter().all(|aabb| !aabb.is_degenerate()));
        assert!(out[grid.cluster_count() as usize..].iter().all(Aabb::is_empty));
    }
}
