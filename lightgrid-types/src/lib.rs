//! Type declarations for the lightgrid clustered light culling crates.
//!
//! This is reexported in the lightgrid crate proper and includes all the
//! "surface" api arguments: lights, the camera and the culling configuration.

use bytemuck::{Pod, Zeroable};
/// Reexport of the glam version lightgrid is using.
pub use glam;
use glam::{Mat4, UVec2, UVec4, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! changeable_struct {
    ($(#[$outer:meta])* pub struct $name:ident <- $name_change:ident { $($(#[$inner:meta])* $field_vis:vis $field_name:ident : $field_type:ty),* $(,)? } ) => {
        $(#[$outer])*
        #[derive(Debug, Clone)]
        pub struct $name {
            $(
                $(#[$inner])* $field_vis $field_name : $field_type
            ),*
        }
        impl $name {
            pub fn update_from_changes(&mut self, change: $name_change) {
                $(
                    if let Some(inner) = change.$field_name {
                        self.$field_name = inner;
                    }
                );*
            }
        }
        #[doc = concat!("Describes a modification to a ", stringify!($name), ".")]
        #[derive(Debug, Default, Clone)]
        pub struct $name_change {
            $(
                $field_vis $field_name : Option<$field_type>
            ),*
        }
    };
}

/// Upper bound of [`ClustersConfig::max_lights_per_cluster`].
///
/// Per-cluster lists are gathered in workgroup memory, so this is bounded by
/// what fits in a single workgroup.
pub const MAX_LIGHTS_PER_CLUSTER_LIMIT: u32 = 256;
/// Smallest supported cluster tile, in pixels.
pub const MIN_CLUSTER_PIXEL_SIZE: u32 = 8;
/// Largest supported spot light outer angle (89 degrees), in radians.
pub const MAX_SPOT_OUTER_ANGLE: f32 = 1.553_343;

/// The two kinds of lights that get clustered.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LightType {
    Point,
    Spot,
}

impl LightType {
    pub const ARRAY: [Self; 2] = [Self::Point, Self::Spot];

    /// Index of this light type in per-type arrays.
    pub const fn index(self) -> usize {
        match self {
            Self::Point => 0,
            Self::Spot => 1,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Point => "Point",
            Self::Spot => "Spot",
        }
    }
}

/// Axis aligned bounding box, stored homogeneously so it can be shared
/// verbatim with shaders. The `w` components are unused and kept at 1.
#[derive(Debug, Copy, Clone, PartialEq)]
#[repr(C, align(16))]
pub struct Aabb {
    pub min: Vec4,
    pub max: Vec4,
}

unsafe impl Zeroable for Aabb {}
unsafe impl Pod for Aabb {}

impl Aabb {
    /// The reduction identity. `min > max` on every axis.
    pub const EMPTY: Self = Self {
        min: Vec4::new(f32::MAX, f32::MAX, f32::MAX, 1.0),
        max: Vec4::new(-f32::MAX, -f32::MAX, -f32::MAX, 1.0),
    };

    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.extend(1.0),
            max: max.extend(1.0),
        }
    }

    pub fn from_sphere(center: Vec3, radius: f32) -> Self {
        Self::from_min_max(center - Vec3::splat(radius), center + Vec3::splat(radius))
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points
            .into_iter()
            .fold(Self::EMPTY, |aabb, point| Self::from_min_max(aabb.min3().min(point), aabb.max3().max(point)))
    }

    pub fn min3(&self) -> Vec3 {
        self.min.truncate()
    }

    pub fn max3(&self) -> Vec3 {
        self.max.truncate()
    }

    pub fn center(&self) -> Vec3 {
        self.min3() + (self.max3() - self.min3()) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        self.max3() - self.min3()
    }

    /// True when `min > max` on any axis, which is the case of [`Aabb::EMPTY`].
    pub fn is_empty(&self) -> bool {
        self.min3().cmpgt(self.max3()).any()
    }

    /// Empty, or collapsed to a single point.
    ///
    /// Degenerate boxes are "no light" sentinels in the BVH.
    pub fn is_degenerate(&self) -> bool {
        self.is_empty() || self.min3() == self.max3()
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self::from_min_max(self.min3().min(other.min3()), self.max3().max(other.max3()))
    }

    /// Union that ignores a degenerate `child`.
    #[must_use]
    pub fn union_child(&self, child: &Self) -> Self {
        if child.is_degenerate() {
            *self
        } else {
            self.union(child)
        }
    }

    pub fn contains(&self, other: &Self) -> bool {
        self.min3().cmple(other.min3()).all() && self.max3().cmpge(other.max3()).all()
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.min3().cmple(other.max3()).all() && other.min3().cmple(self.max3()).all()
    }

    /// Squared distance from `point` to the closest point of the box.
    pub fn distance_squared(&self, point: Vec3) -> f32 {
        let below = (self.min3() - point).max(Vec3::ZERO);
        let above = (point - self.max3()).max(Vec3::ZERO);
        (below + above).length_squared()
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// An omnidirectional light.
#[derive(Debug, Copy, Clone, PartialEq)]
#[repr(C)]
pub struct PointLight {
    /// World space position.
    pub position: Vec3,
    /// Distance past which the light has no influence.
    pub range: f32,
}

unsafe impl Zeroable for PointLight {}
unsafe impl Pod for PointLight {}

impl PointLight {
    pub fn new(position: Vec3, range: f32) -> Self {
        Self {
            position,
            range: range.max(0.0),
        }
    }
}

/// A cone shaped light. Trigonometry of the outer angle is cached as the
/// culling kernels need all of it.
#[derive(Debug, Copy, Clone, PartialEq)]
#[repr(C)]
pub struct SpotLight {
    /// World space position of the apex.
    pub position: Vec3,
    pub range: f32,
    /// World space direction the light shines towards. Normalized.
    pub direction: Vec3,
    pub cos_outer: f32,
    pub sin_outer: f32,
    pub tan_outer: f32,
    /// Half angle of the cone, in radians.
    pub outer_angle: f32,
    _padding: f32,
}

unsafe impl Zeroable for SpotLight {}
unsafe impl Pod for SpotLight {}

impl SpotLight {
    /// `outer_angle` is the half angle of the cone in radians, clamped to
    /// [`MAX_SPOT_OUTER_ANGLE`].
    pub fn new(position: Vec3, direction: Vec3, range: f32, outer_angle: f32) -> Self {
        let outer_angle = outer_angle.clamp(0.0, MAX_SPOT_OUTER_ANGLE);
        let (sin_outer, cos_outer) = outer_angle.sin_cos();
        Self {
            position,
            range: range.max(0.0),
            direction: direction.normalize_or_zero(),
            cos_outer,
            sin_outer,
            tan_outer: sin_outer / cos_outer,
            outer_angle,
            _padding: 0.0,
        }
    }
}

/// Describes how the world should be projected into the camera.
///
/// Always a right handed perspective projection looking down -Z.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CameraProjection {
    /// Vertical field of view in degrees.
    pub vfov: f32,
    /// Near plane distance.
    pub near: f32,
    /// Far plane distance.
    pub far: f32,
}

impl Default for CameraProjection {
    fn default() -> Self {
        Self {
            vfov: 60.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

/// Describes how the camera should look at the scene.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Camera {
    pub projection: CameraProjection,
    /// World to view matrix.
    pub view: Mat4,
    /// Size of the render target in pixels.
    pub viewport: UVec2,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            projection: CameraProjection::default(),
            view: Mat4::IDENTITY,
            viewport: UVec2::new(1920, 1080),
        }
    }
}

impl Camera {
    pub fn aspect_ratio(&self) -> f32 {
        self.viewport.x.max(1) as f32 / self.viewport.y.max(1) as f32
    }

    pub fn proj(&self) -> Mat4 {
        Mat4::perspective_rh(
            self.projection.vfov.to_radians(),
            self.aspect_ratio(),
            self.projection.near,
            self.projection.far,
        )
    }
}

/// Which test decides whether a spot light touches a cluster.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpotCulling {
    /// The light's bounding sphere against the cluster's AABB. Cheap and
    /// conservative.
    #[default]
    Sphere,
    /// The light's cone against the cluster's bounding sphere. Rejects more
    /// clusters at the cost of some trigonometry.
    Cone,
}

changeable_struct! {
    /// Configuration of the clustered light culling.
    #[derive(PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct ClustersConfig <- ClustersConfigChange {
        /// Master switch. When disabled no pass is scheduled.
        pub enabled: bool,
        /// Width and height of a cluster, in pixels.
        pub cluster_pixel_size: u32,
        /// Clamp of every per-cluster light list.
        pub max_lights_per_cluster: u32,
        /// Sort lights by morton code before building the BVH and assigning.
        pub sort_lights: bool,
        /// Assign lights by traversing a BVH instead of testing every light.
        pub use_lights_bvh: bool,
        /// Bound spot lights with their cone instead of their sphere.
        pub use_spot_tight_bounding_box: bool,
        pub spot_culling: SpotCulling,
        /// Skip clusters that lie outside the bounds of all lights.
        pub limit_clusters_to_lights_aabb: bool,
        /// Only assign lights to clusters touched by the supplied depth samples.
        pub use_depth_clusters_mask: bool,
        /// Sort each cluster's light list by light index.
        pub sort_assigned_lights: bool,
    }
}

impl Default for ClustersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cluster_pixel_size: 32,
            max_lights_per_cluster: 128,
            sort_lights: true,
            use_lights_bvh: true,
            use_spot_tight_bounding_box: true,
            spot_culling: SpotCulling::Sphere,
            limit_clusters_to_lights_aabb: false,
            use_depth_clusters_mask: false,
            sort_assigned_lights: false,
        }
    }
}

impl ClustersConfig {
    pub fn validate(&self) -> Result<(), ClustersConfigError> {
        if self.cluster_pixel_size < MIN_CLUSTER_PIXEL_SIZE {
            return Err(ClustersConfigError::ClusterPixelSizeTooSmall {
                size: self.cluster_pixel_size,
                min: MIN_CLUSTER_PIXEL_SIZE,
            });
        }
        if self.max_lights_per_cluster == 0 || self.max_lights_per_cluster > MAX_LIGHTS_PER_CLUSTER_LIMIT {
            return Err(ClustersConfigError::InvalidMaxLightsPerCluster {
                count: self.max_lights_per_cluster,
                max: MAX_LIGHTS_PER_CLUSTER_LIMIT,
            });
        }
        Ok(())
    }
}

/// Error returned from config validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClustersConfigError {
    #[error("Cluster pixel size is {size} but must be at least {min}")]
    ClusterPixelSizeTooSmall { size: u32, min: u32 },
    #[error("Max lights per cluster is {count} but must be between 1 and {max}")]
    InvalidMaxLightsPerCluster { count: u32, max: u32 },
}

/// View space depth of the visible geometry, used to mask out clusters
/// that nothing gets shaded in.
#[derive(Debug, Default, Clone)]
pub struct DepthSamples {
    pub size: UVec2,
    /// Row major, top-left first. Visible geometry has a negative view space
    /// z; anything else marks an empty sample.
    pub view_depths: Vec<f32>,
}

impl DepthSamples {
    pub fn new(size: UVec2, view_depths: Vec<f32>) -> Self {
        debug_assert_eq!(view_depths.len(), (size.x * size.y) as usize);
        Self { size, view_depths }
    }
}

/// Bounds of every light, derived once per frame by the reduction.
#[derive(Debug, Copy, Clone, PartialEq)]
#[repr(C, align(16))]
pub struct LightsData {
    /// Union of every point and spot light's view space AABB.
    pub aabb: Aabb,
    /// Reciprocal of the AABB's extent, used to quantize morton codes.
    pub inv_range: Vec4,
    /// First and last cluster depth slice covered by `aabb`. `x > y` when
    /// there are no lights.
    pub slice_range: UVec4,
}

unsafe impl Zeroable for LightsData {}
unsafe impl Pod for LightsData {}

impl Default for LightsData {
    fn default() -> Self {
        Self {
            aabb: Aabb::EMPTY,
            inv_range: Vec4::ZERO,
            slice_range: UVec4::new(1, 0, 0, 0),
        }
    }
}

/// Entry of a cluster light grid: where the cluster's lights start in the
/// flat index buffer, and how many there are.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct ClusterLightRange {
    pub offset: u32,
    pub count: u32,
}

unsafe impl Zeroable for ClusterLightRange {}
unsafe impl Pod for ClusterLightRange {}

/// The lights of a scene, as seen by the culling.
///
/// Every mutation bumps [`LightSet::generation`], which is how the culling
/// decides the lights are dirty.
#[derive(Debug, Default, Clone)]
pub struct LightSet {
    points: Vec<PointLight>,
    spots: Vec<SpotLight>,
    generation: u64,
}

impl LightSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&mut self, light: PointLight) -> usize {
        self.generation += 1;
        self.points.push(light);
        self.points.len() - 1
    }

    pub fn add_spot(&mut self, light: SpotLight) -> usize {
        self.generation += 1;
        self.spots.push(light);
        self.spots.len() - 1
    }

    pub fn set_point(&mut self, index: usize, light: PointLight) {
        self.generation += 1;
        self.points[index] = light;
    }

    pub fn set_spot(&mut self, index: usize, light: SpotLight) {
        self.generation += 1;
        self.spots[index] = light;
    }

    /// Removes a point light, moving the last point light into its slot.
    pub fn remove_point(&mut self, index: usize) -> PointLight {
        self.generation += 1;
        self.points.swap_remove(index)
    }

    /// Removes a spot light, moving the last spot light into its slot.
    pub fn remove_spot(&mut self, index: usize) -> SpotLight {
        self.generation += 1;
        self.spots.swap_remove(index)
    }

    pub fn clear(&mut self) {
        self.generation += 1;
        self.points.clear();
        self.spots.clear();
    }

    pub fn points(&self) -> &[PointLight] {
        &self.points
    }

    pub fn spots(&self) -> &[SpotLight] {
        &self.spots
    }

    pub fn count(&self, ty: LightType) -> u32 {
        match ty {
            LightType::Point => self.points.len() as u32,
            LightType::Spot => self.spots.len() as u32,
        }
    }

    pub fn total_count(&self) -> u32 {
        self.count(LightType::Point) + self.count(LightType::Spot)
    }

    pub fn has_clustered_lights(&self) -> bool {
        self.total_count() != 0
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_union_identity() {
        let aabb = Aabb::from_sphere(Vec3::new(1.0, -2.0, 3.0), 0.5);
        assert_eq!(Aabb::EMPTY.union(&aabb), aabb);
        assert!(Aabb::EMPTY.is_empty());
        assert!(Aabb::EMPTY.is_degenerate());
        assert!(!aabb.is_degenerate());
    }

    #[test]
    fn degenerate_child_is_skipped() {
        let aabb = Aabb::from_sphere(Vec3::ZERO, 1.0);
        let point = Aabb::from_sphere(Vec3::splat(10.0), 0.0);
        assert_eq!(aabb.union_child(&point), aabb);
        assert_eq!(aabb.union_child(&Aabb::EMPTY), aabb);
    }

    #[test]
    fn contains_and_intersects() {
        let big = Aabb::from_min_max(Vec3::splat(-2.0), Vec3::splat(2.0));
        let small = Aabb::from_sphere(Vec3::splat(1.0), 0.5);
        let far = Aabb::from_sphere(Vec3::splat(5.0), 0.5);
        assert!(big.contains(&small));
        assert!(!small.contains(&big));
        assert!(big.intersects(&small));
        assert!(!big.intersects(&far));
        assert_eq!(big.distance_squared(Vec3::new(3.0, 0.0, 0.0)), 1.0);
        assert_eq!(big.distance_squared(Vec3::ZERO), 0.0);
    }

    #[test]
    fn spot_angle_is_clamped() {
        let spot = SpotLight::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -2.0), 5.0, std::f32::consts::PI);
        assert_eq!(spot.outer_angle, MAX_SPOT_OUTER_ANGLE);
        assert_eq!(spot.direction, Vec3::NEG_Z);
        assert!(spot.tan_outer.is_finite());
    }

    #[test]
    fn config_validation() {
        assert_eq!(ClustersConfig::default().validate(), Ok(()));

        let mut config = ClustersConfig::default();
        config.update_from_changes(ClustersConfigChange {
            max_lights_per_cluster: Some(MAX_LIGHTS_PER_CLUSTER_LIMIT + 1),
            ..Default::default()
        });
        assert!(matches!(
            config.validate(),
            Err(ClustersConfigError::InvalidMaxLightsPerCluster { .. })
        ));

        config.max_lights_per_cluster = 64;
        config.cluster_pixel_size = 4;
        assert!(matches!(
            config.validate(),
            Err(ClustersConfigError::ClusterPixelSizeTooSmall { size: 4, .. })
        ));
    }

    #[test]
    fn partial_config_uses_defaults() {
        let config: ClustersConfig = serde_json::from_str(r#"{ "spot_culling": "Cone", "sort_lights": false }"#).unwrap();
        assert_eq!(config.spot_culling, SpotCulling::Cone);
        assert!(!config.sort_lights);
        assert_eq!(config.cluster_pixel_size, ClustersConfig::default().cluster_pixel_size);
    }

    #[test]
    fn light_set_generation() {
        let mut lights = LightSet::new();
        let start = lights.generation();
        let idx = lights.add_point(PointLight::new(Vec3::ZERO, 1.0));
        lights.set_point(idx, PointLight::new(Vec3::ONE, 2.0));
        assert_eq!(lights.generation(), start + 2);
        assert_eq!(lights.count(LightType::Point), 1);
        assert!(lights.has_clustered_lights());
        lights.remove_point(idx);
        assert!(!lights.has_clustered_lights());
    }
}
