//! Bounding volumes of lights and clusters and the tests between them.
//!
//! Everything here is in view space. The WGSL kernels implement the same
//! functions; the CPU backend calls these directly.

use glam::{Mat4, UVec3, UVec4, Vec2, Vec3};
use lightgrid_types::{Aabb, LightsData, PointLight, SpotCulling, SpotLight};

use crate::grid::ClusterGrid;

/// A spot light moved to view space.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ViewCone {
    pub apex: Vec3,
    pub direction: Vec3,
    pub range: f32,
    pub cos_outer: f32,
    pub sin_outer: f32,
}

impl ViewCone {
    pub fn new(light: &SpotLight, view: &Mat4) -> Self {
        Self {
            apex: view.transform_point3(light.position),
            direction: view.transform_vector3(light.direction).normalize_or_zero(),
            range: light.range,
            cos_outer: light.cos_outer,
            sin_outer: light.sin_outer,
        }
    }
}

pub fn point_light_aabb(light: &PointLight, view: &Mat4) -> Aabb {
    Aabb::from_sphere(view.transform_point3(light.position), light.range)
}

/// Bounds of a cone with apex `apex` whose base disk is centered on `base`.
fn cone_aabb(apex: Vec3, base: Vec3, base_radius: f32) -> Aabb {
    let axis = base - apex;
    let e = (Vec3::ONE - axis * axis / axis.length_squared()).max(Vec3::ZERO);
    let e = Vec3::new(e.x.sqrt(), e.y.sqrt(), e.z.sqrt());
    Aabb::from_min_max(apex.min(base - e * base_radius), apex.max(base + e * base_radius))
}

/// View space bounds of a spot light.
///
/// With `tight` the bounds enclose the cone and its spherical cap: the union
/// of the cone cut at `range * cos` and of the cone stretched to `range`,
/// both with the cap's radius. Otherwise the light's sphere is used.
pub fn spot_light_aabb(light: &SpotLight, view: &Mat4, tight: bool) -> Aabb {
    let cone = ViewCone::new(light, view);
    if !tight || cone.range <= 0.0 || cone.direction == Vec3::ZERO {
        return Aabb::from_sphere(cone.apex, cone.range);
    }

    let small_range = cone.range * cone.cos_outer;
    let base_radius = cone.range * cone.sin_outer;
    let small = cone_aabb(cone.apex, cone.apex + cone.direction * small_range, base_radius);
    let large = cone_aabb(cone.apex, cone.apex + cone.direction * cone.range, base_radius);
    small.union(&large)
}

fn screen_to_view(screen: Vec2, viewport: Vec2, inv_projection: &Mat4) -> Vec3 {
    let ndc = Vec2::new(screen.x / viewport.x * 2.0 - 1.0, 1.0 - screen.y / viewport.y * 2.0);
    inv_projection.project_point3(ndc.extend(0.0))
}

/// Bounds of a cluster: its four screen corners unprojected onto the near
/// and far planes of its depth slice.
pub fn cluster_aabb(grid: &ClusterGrid, inv_projection: &Mat4, index: UVec3) -> Aabb {
    let size = grid.cluster_size() as f32;
    let viewport = grid.viewport().as_vec2();
    let min = index.truncate().as_vec2() * size;
    let max = min + size;
    let (near, far) = grid.slice_bounds(index.z);

    let corners = [
        Vec2::new(min.x, min.y),
        Vec2::new(max.x, min.y),
        Vec2::new(min.x, max.y),
        Vec2::new(max.x, max.y),
    ];
    Aabb::from_points(corners.into_iter().flat_map(|corner| {
        let on_near_plane = screen_to_view(corner, viewport, inv_projection);
        [near, far].map(|depth| on_near_plane * (depth / -on_near_plane.z))
    }))
}

/// Center and radius of the sphere circumscribing a cluster's AABB.
pub fn cluster_sphere(aabb: &Aabb) -> (Vec3, f32) {
    let center = aabb.center();
    (center, aabb.max3().distance(center))
}

pub fn sphere_intersects_aabb(center: Vec3, radius: f32, aabb: &Aabb) -> bool {
    aabb.distance_squared(center) <= radius * radius
}

pub fn cone_intersects_sphere(cone: &ViewCone, center: Vec3, radius: f32) -> bool {
    let v = center - cone.apex;
    let len_sq = v.length_squared();
    let v1 = v.dot(cone.direction);
    let closest = cone.cos_outer * (len_sq - v1 * v1).max(0.0).sqrt() - v1 * cone.sin_outer;

    let angle_cull = closest > radius;
    let front_cull = v1 > radius + cone.range;
    let back_cull = v1 < -radius;
    !(angle_cull || front_cull || back_cull)
}

/// A cluster as seen by the light tests.
#[derive(Debug, Copy, Clone)]
pub struct ClusterBounds {
    pub aabb: Aabb,
    pub sphere_center: Vec3,
    pub sphere_radius: f32,
}

impl ClusterBounds {
    pub fn new(aabb: Aabb) -> Self {
        let (sphere_center, sphere_radius) = cluster_sphere(&aabb);
        Self {
            aabb,
            sphere_center,
            sphere_radius,
        }
    }
}

/// The light's AABB must overlap the cluster so that BVH pruning and brute
/// force testing accept exactly the same lights.
pub fn point_light_touches(center: Vec3, range: f32, light_aabb: &Aabb, cluster: &ClusterBounds) -> bool {
    !light_aabb.is_degenerate()
        && light_aabb.intersects(&cluster.aabb)
        && sphere_intersects_aabb(center, range, &cluster.aabb)
}

pub fn spot_light_touches(cone: &ViewCone, light_aabb: &Aabb, cluster: &ClusterBounds, culling: SpotCulling) -> bool {
    if light_aabb.is_degenerate() || !light_aabb.intersects(&cluster.aabb) {
        return false;
    }
    match culling {
        SpotCulling::Sphere => sphere_intersects_aabb(cone.apex, cone.range, &cluster.aabb),
        SpotCulling::Cone => cone_intersects_sphere(cone, cluster.sphere_center, cluster.sphere_radius),
    }
}

/// Values derived from the reduced bounds of all lights.
pub fn lights_data(aabb: Aabb, grid: &ClusterGrid) -> LightsData {
    if aabb.is_empty() {
        return LightsData::default();
    }

    let extent = aabb.extent();
    let inv_range = Vec3::select(extent.cmpgt(Vec3::ZERO), extent.recip(), Vec3::ZERO);
    // Larger z is closer to the camera.
    let first = grid.slice_from_view_z(aabb.max.z);
    let last = grid.slice_from_view_z(aabb.min.z);

    LightsData {
        aabb,
        inv_range: inv_range.extend(0.0),
        slice_range: UVec4::new(first, last, 0, 0),
    }
}
