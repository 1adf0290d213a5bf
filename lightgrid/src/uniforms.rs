use encase::{ShaderType, UniformBuffer};
use glam::{Mat4, UVec2, UVec3, Vec2};
use lightgrid_types::{Camera, LightType};

use crate::{bvh, grid::ClusterGrid};

/// Per-frame constants shared by every culling kernel and by the shading
/// stage. The field order matches `ClustersUniform` in `common.wgsl`.
#[derive(Debug, Default, Copy, Clone, PartialEq, ShaderType)]
pub struct ClustersUniform {
    pub view: Mat4,
    pub inv_projection: Mat4,
    pub viewport: Vec2,
    /// Size of the depth samples of the cluster mask, zero without a mask.
    pub depth_size: UVec2,
    pub dimensions: UVec3,
    pub cluster_size: u32,
    pub near: f32,
    pub far: f32,
    pub near_k: f32,
    pub log_grid_dim_y: f32,
    pub point_light_count: u32,
    pub spot_light_count: u32,
    pub point_light_levels: u32,
    pub spot_light_levels: u32,
}

impl ClustersUniform {
    pub fn new(camera: &Camera, grid: &ClusterGrid, light_counts: [u32; 2], depth_size: UVec2) -> Self {
        let [point_light_count, spot_light_count] = light_counts;
        Self {
            view: camera.view,
            inv_projection: camera.proj().inverse(),
            viewport: grid.viewport().as_vec2(),
            depth_size,
            dimensions: grid.dimensions(),
            cluster_size: grid.cluster_size(),
            near: grid.near(),
            far: grid.far(),
            near_k: grid.near_k(),
            log_grid_dim_y: grid.log_grid_dim_y(),
            point_light_count,
            spot_light_count,
            point_light_levels: bvh::num_levels(point_light_count),
            spot_light_levels: bvh::num_levels(spot_light_count),
        }
    }

    pub fn light_count(&self, ty: LightType) -> u32 {
        match ty {
            LightType::Point => self.point_light_count,
            LightType::Spot => self.spot_light_count,
        }
    }

    pub fn bvh_levels(&self, ty: LightType) -> u32 {
        match ty {
            LightType::Point => self.point_light_levels,
            LightType::Spot => self.spot_light_levels,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, encase::internal::Error> {
        let mut buffer = UniformBuffer::new(Vec::with_capacity(Self::min_size().get() as usize));
        buffer.write(self)?;
        Ok(buffer.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use lightgrid_types::CameraProjection;

    use super::*;

    #[test]
    fn layout() {
        assert_eq!(ClustersUniform::min_size().get(), 192);

        let camera = Camera {
            projection: CameraProjection::default(),
            view: Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0)),
            viewport: UVec2::new(800, 600),
        };
        let grid = ClusterGrid::from_camera(&camera, 32);
        let uniform = ClustersUniform::new(&camera, &grid, [40, 1], UVec2::ZERO);
        assert_eq!(uniform.light_count(LightType::Point), 40);
        assert_eq!(uniform.bvh_levels(LightType::Point), 3);
        assert_eq!(uniform.bvh_levels(LightType::Spot), 1);

        let bytes = uniform.to_bytes().unwrap();
        assert_eq!(bytes.len(), 192);
        // dimensions.x sits right after the two matrices and the two vec2s.
        assert_eq!(&bytes[144..148], &grid.dimensions().x.to_le_bytes());
        assert_eq!(&bytes[176..180], &40u32.to_le_bytes());
    }
}
