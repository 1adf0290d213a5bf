//! Dimensions of the cluster grid and the mappings between cluster
//! coordinates, flat cluster indices, and screen positions.
//!
//! The frustum is split in `cluster_size` pixel wide tiles on screen and in
//! exponentially growing slices along view depth: slice `k` covers view
//! distances `[near * near_k^k, near * near_k^(k + 1))`.

use glam::{UVec2, UVec3, Vec2};
use lightgrid_types::Camera;

use crate::{pass::limits::MAX_CLUSTERS, util::math::round_up_div};

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ClusterGrid {
    dimensions: UVec3,
    viewport: UVec2,
    cluster_size: u32,
    near: f32,
    far: f32,
    near_k: f32,
    log_grid_dim_y: f32,
}

impl ClusterGrid {
    /// Derives the grid from the projection parameters. `vfov` is in radians.
    pub fn compute(vfov: f32, near: f32, far: f32, cluster_size: u32, viewport: UVec2) -> Self {
        debug_assert!(near > 0.0 && far > near, "near {near} far {far}");
        debug_assert!(cluster_size > 0);

        let viewport = viewport.max(UVec2::ONE);
        let xy = UVec2::new(
            round_up_div(viewport.x, cluster_size),
            round_up_div(viewport.y, cluster_size),
        );
        let near_k = 1.0 + (2.0 * (vfov * 0.5).tan()) / xy.y as f32;
        let log_near_k = near_k.ln();
        let z = ((far / near).ln() / log_near_k).floor().max(1.0) as u32;

        Self {
            dimensions: xy.extend(z),
            viewport,
            cluster_size,
            near,
            far,
            near_k,
            log_grid_dim_y: 1.0 / log_near_k,
        }
    }

    /// Grid of `camera`. The cluster size doubles until the grid holds at
    /// most [`MAX_CLUSTERS`] clusters.
    pub fn from_camera(camera: &Camera, cluster_size: u32) -> Self {
        let compute = |size| {
            Self::compute(
                camera.projection.vfov.to_radians(),
                camera.projection.near,
                camera.projection.far,
                size,
                camera.viewport,
            )
        };

        let mut grid = compute(cluster_size);
        let largest = camera.viewport.max_element().max(1);
        while grid.cluster_count() > MAX_CLUSTERS && grid.cluster_size < largest {
            grid = compute(grid.cluster_size.saturating_mul(2));
        }
        if grid.cluster_size != cluster_size {
            log::trace!(
                "Grew clusters from {cluster_size} to {} pixels, {} clusters fit the device limits",
                grid.cluster_size,
                grid.cluster_count()
            );
        }
        grid
    }

    pub fn dimensions(&self) -> UVec3 {
        self.dimensions
    }

    pub fn cluster_count(&self) -> u32 {
        self.dimensions.x * self.dimensions.y * self.dimensions.z
    }

    pub fn viewport(&self) -> UVec2 {
        self.viewport
    }

    pub fn cluster_size(&self) -> u32 {
        self.cluster_size
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    pub fn near_k(&self) -> f32 {
        self.near_k
    }

    pub fn log_grid_dim_y(&self) -> f32 {
        self.log_grid_dim_y
    }

    pub fn cluster_index_1d(&self, index: UVec3) -> u32 {
        index.x + self.dimensions.x * (index.y + self.dimensions.y * index.z)
    }

    pub fn cluster_index_3d(&self, index: u32) -> UVec3 {
        let plane = self.dimensions.x * self.dimensions.y;
        UVec3::new(
            index % self.dimensions.x,
            (index % plane) / self.dimensions.x,
            index / plane,
        )
    }

    /// View distance of the near plane of depth slice `slice`.
    pub fn cluster_depth(&self, slice: u32) -> f32 {
        self.near * self.near_k.powi(slice as i32)
    }

    /// View distances bounding depth slice `slice`. The last slice extends to
    /// the far plane, as [`ClusterGrid::slice_from_view_z`] clamps into it.
    pub fn slice_bounds(&self, slice: u32) -> (f32, f32) {
        let far = self.cluster_depth(slice + 1);
        if slice + 1 >= self.dimensions.z {
            (self.cluster_depth(slice), far.max(self.far))
        } else {
            (self.cluster_depth(slice), far)
        }
    }

    /// Depth slice containing the view space z `view_z`. Points in front of
    /// the near plane land in the first slice, points past the last slice in
    /// the last one.
    pub fn slice_from_view_z(&self, view_z: f32) -> u32 {
        let distance = (-view_z).max(self.near);
        let k = ((distance / self.near).ln() * self.log_grid_dim_y).floor();
        (k.max(0.0) as u32).min(self.dimensions.z - 1)
    }

    /// Cluster containing pixel position `screen` (origin top-left) at view
    /// space depth `view_z`.
    pub fn cluster_index_3d_from_screen(&self, screen: Vec2, view_z: f32) -> UVec3 {
        let tile = (screen.max(Vec2::ZERO) / self.cluster_size as f32).floor().as_uvec2();
        tile.min(self.dimensions.truncate() - UVec2::ONE)
            .extend(self.slice_from_view_z(view_z))
    }
}
