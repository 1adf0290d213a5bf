//! Scheduling of the culling passes of one camera.
//!
//! Every frame, [`FrustumClusters::update`] compares the camera and lights to
//! the previous frame's to find out what is dirty, hands the new state to the
//! backend, and returns a [`FrameState`]. The passes of the frame are then
//! derived from that state alone by [`FrustumClusters::build_graph`].

use glam::UVec2;
use lightgrid_types::{
    Camera, ClustersConfig, ClustersConfigChange, ClustersConfigError, DepthSamples, LightSet, LightType,
};

use crate::{
    bvh,
    graph::{PassGraph, PassHandle},
    grid::ClusterGrid,
    pass::{
        limits::{
            BVH_THREADS, CLUSTERS_AABB_THREADS, LIGHTS_AABB_THREADS, MASK_THREADS, MAX_DEPTH_SAMPLES,
            MAX_LIGHTS_PER_TYPE, MORTON_THREADS, REDUCE_MAX_GROUPS, REDUCE_NUM_THREADS, UNIQUE_THREADS,
        },
        BufferId, DispatchGroups, DispatchParams, Kernel, PushConstants,
    },
    ping_pong::Slot,
    sort::{sorted_slot, SortPlan},
    uniforms::ClustersUniform,
    util::math::round_up_div,
};

/// Parents reduced by one workgroup of the BVH top kernel.
const BVH_PARENTS_PER_GROUP: u32 = BVH_THREADS / bvh::BVH_NUM_CHILDREN;

/// Storage and execution of the culling kernels.
pub trait ClusterBackend {
    type Error;

    /// Grows the buffers to fit the frame and uploads the uniforms, the lights
    /// when they are dirty, and the depth samples when the frame is masked.
    fn prepare(&mut self, frame: &FrameState, lights: &LightSet, depth: Option<&DepthSamples>)
        -> Result<(), Self::Error>;
}

/// Everything the passes of one frame depend on.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameState {
    pub index: u64,
    pub config: ClustersConfig,
    pub camera: Camera,
    pub grid: ClusterGrid,
    pub uniform: ClustersUniform,
    /// Lights per type, clamped to [`MAX_LIGHTS_PER_TYPE`].
    pub light_counts: [u32; 2],
    /// Size of the depth samples when the frame is masked, zero otherwise.
    pub depth_size: UVec2,
    pub clusters_dirty: bool,
    pub lights_dirty: bool,
    /// Slot the morton codes are written to when lights are sorted.
    pub sort_input: Slot,
    /// Slot holding the sorted codes and indices of each light type.
    pub sorted: [Slot; 2],
}

impl FrameState {
    pub fn light_count(&self, ty: LightType) -> u32 {
        self.light_counts[ty.index()]
    }

    pub fn total_light_count(&self) -> u32 {
        self.light_counts.iter().sum()
    }

    pub fn masked(&self) -> bool {
        self.config.use_depth_clusters_mask && self.depth_size.x * self.depth_size.y != 0
    }

    /// Slot of the sorted light indices, if lights of this type are sorted.
    pub fn sorted_indices(&self, ty: LightType) -> Option<Slot> {
        (self.config.sort_lights && self.light_count(ty) != 0).then_some(self.sorted[ty.index()])
    }

    pub fn uses_bvh(&self, ty: LightType) -> bool {
        self.config.use_lights_bvh && self.light_count(ty) != 0
    }

    pub fn bvh_levels(&self, ty: LightType) -> u32 {
        bvh::num_levels(self.light_count(ty))
    }

    /// One workgroup per cluster, or per unique cluster when masked.
    pub fn cluster_groups(&self) -> DispatchGroups {
        if self.masked() {
            DispatchGroups::Indirect(BufferId::ClustersIndirect)
        } else {
            DispatchGroups::Direct(self.grid.dimensions().to_array())
        }
    }

    fn lights_changed(&self) -> bool {
        self.lights_dirty && self.total_light_count() != 0
    }
}

/// The passes of the culling, in submission order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PassKind {
    ComputeClustersAabb,
    ComputeLightsAabb,
    ReduceLightsAabb,
    ComputeLightsMortonCode,
    SortLightsMortonCode,
    BuildLightsBvh,
    ComputeClustersMask,
    FindUniqueClusters,
    AssignLightsToClusters,
    SortAssignedLights,
}

impl PassKind {
    pub const ALL: [Self; 10] = [
        Self::ComputeClustersAabb,
        Self::ComputeLightsAabb,
        Self::ReduceLightsAabb,
        Self::ComputeLightsMortonCode,
        Self::SortLightsMortonCode,
        Self::BuildLightsBvh,
        Self::ComputeClustersMask,
        Self::FindUniqueClusters,
        Self::AssignLightsToClusters,
        Self::SortAssignedLights,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ComputeClustersAabb => "Compute Clusters AABB",
            Self::ComputeLightsAabb => "Compute Lights AABB",
            Self::ReduceLightsAabb => "Reduce Lights AABB",
            Self::ComputeLightsMortonCode => "Compute Lights Morton Code",
            Self::SortLightsMortonCode => "Sort Lights Morton Code",
            Self::BuildLightsBvh => "Build Lights BVH",
            Self::ComputeClustersMask => "Compute Clusters Mask",
            Self::FindUniqueClusters => "Find Unique Clusters",
            Self::AssignLightsToClusters => "Assign Lights To Clusters",
            Self::SortAssignedLights => "Sort Assigned Lights",
        }
    }

    pub fn predecessors(self) -> &'static [Self] {
        match self {
            Self::ComputeClustersAabb | Self::ComputeLightsAabb | Self::ComputeClustersMask => &[],
            Self::ReduceLightsAabb => &[Self::ComputeLightsAabb],
            Self::ComputeLightsMortonCode => &[Self::ReduceLightsAabb],
            Self::SortLightsMortonCode => &[Self::ComputeLightsMortonCode],
            Self::BuildLightsBvh => &[Self::ComputeLightsAabb, Self::SortLightsMortonCode],
            Self::FindUniqueClusters => &[Self::ComputeClustersMask],
            Self::AssignLightsToClusters => &[
                Self::ComputeClustersAabb,
                Self::ReduceLightsAabb,
                Self::SortLightsMortonCode,
                Self::BuildLightsBvh,
                Self::FindUniqueClusters,
            ],
            Self::SortAssignedLights => &[Self::AssignLightsToClusters],
        }
    }

    pub fn should_run(self, frame: &FrameState) -> bool {
        let config = &frame.config;
        if !config.enabled {
            return false;
        }
        match self {
            Self::ComputeClustersAabb => frame.clusters_dirty,
            Self::ComputeLightsAabb | Self::ReduceLightsAabb => frame.lights_changed(),
            Self::ComputeLightsMortonCode | Self::SortLightsMortonCode => config.sort_lights && frame.lights_changed(),
            Self::BuildLightsBvh => config.use_lights_bvh && frame.lights_changed(),
            Self::ComputeClustersMask | Self::FindUniqueClusters => frame.masked(),
            // Also runs without lights, to empty the light grid.
            Self::AssignLightsToClusters => frame.clusters_dirty || frame.lights_dirty || frame.masked(),
            Self::SortAssignedLights => {
                config.sort_assigned_lights && Self::AssignLightsToClusters.should_run(frame)
            }
        }
    }

    pub fn dispatch_params(self, frame: &FrameState) -> DispatchParams {
        let mut params = DispatchParams::new();
        let lights = || LightType::ARRAY.into_iter().filter(|&ty| frame.light_count(ty) != 0);

        match self {
            Self::ComputeClustersAabb => {
                params.dispatch(
                    Kernel::ClustersAabb,
                    DispatchGroups::linear(round_up_div(frame.grid.cluster_count(), CLUSTERS_AABB_THREADS)),
                    None,
                );
            }
            Self::ComputeLightsAabb => {
                let count = frame.light_counts.into_iter().max().unwrap_or(0);
                params.dispatch(
                    Kernel::LightsAabb,
                    DispatchGroups::linear(round_up_div(count, LIGHTS_AABB_THREADS)),
                    None,
                );
            }
            Self::ReduceLightsAabb => {
                let groups = round_up_div(frame.total_light_count(), REDUCE_NUM_THREADS).clamp(1, REDUCE_MAX_GROUPS);
                params.dispatch(Kernel::ReduceLightsAabbFirst, DispatchGroups::linear(groups), None);
                params.barrier();
                params.dispatch(
                    Kernel::ReduceLightsAabbSecond,
                    DispatchGroups::linear(1),
                    Some(PushConstants::one(groups)),
                );
            }
            Self::ComputeLightsMortonCode => {
                for light_type in lights() {
                    params.dispatch(
                        Kernel::MortonCodes {
                            light_type,
                            output: frame.sort_input,
                        },
                        DispatchGroups::linear(round_up_div(frame.light_count(light_type), MORTON_THREADS)),
                        None,
                    );
                }
            }
            Self::SortLightsMortonCode => {
                for light_type in lights() {
                    let plan = SortPlan::new(light_type, frame.light_count(light_type), frame.sort_input);
                    debug_assert_eq!(plan.output, frame.sorted[light_type.index()]);
                    params.extend(plan.params);
                }
            }
            Self::BuildLightsBvh => {
                for light_type in lights() {
                    let levels = frame.bvh_levels(light_type);
                    params.dispatch(
                        Kernel::BvhBottom {
                            light_type,
                            indices: frame.sorted_indices(light_type),
                        },
                        DispatchGroups::linear(round_up_div(bvh::num_level_nodes(levels - 1), BVH_THREADS)),
                        None,
                    );
                    for child_level in (1..levels).rev() {
                        params.barrier();
                        params.dispatch(
                            Kernel::BvhTop { light_type },
                            DispatchGroups::linear(round_up_div(
                                bvh::num_level_nodes(child_level - 1),
                                BVH_PARENTS_PER_GROUP,
                            )),
                            Some(PushConstants::one(child_level)),
                        );
                    }
                }
            }
            Self::ComputeClustersMask => {
                let size = frame.depth_size;
                params.clear(BufferId::ClustersMask);
                params.barrier();
                params.dispatch(
                    Kernel::ClustersMask,
                    DispatchGroups::linear(round_up_div(size.x * size.y, MASK_THREADS)),
                    None,
                );
            }
            Self::FindUniqueClusters => {
                params.clear(BufferId::ClustersIndirect);
                params.barrier();
                params.dispatch(
                    Kernel::FindUniqueClusters,
                    DispatchGroups::linear(round_up_div(frame.grid.cluster_count(), UNIQUE_THREADS)),
                    None,
                );
            }
            Self::AssignLightsToClusters => {
                let masked = frame.masked();
                params.clear(BufferId::LightCounters);
                if masked {
                    // Clusters missing from the unique list keep an empty range.
                    for light_type in LightType::ARRAY {
                        params.clear(BufferId::LightGrid(light_type));
                    }
                }
                params.barrier();
                for light_type in LightType::ARRAY {
                    params.dispatch(
                        Kernel::AssignLights {
                            light_type,
                            indices: frame.sorted_indices(light_type),
                            bvh: frame.uses_bvh(light_type),
                            masked,
                        },
                        frame.cluster_groups(),
                        None,
                    );
                }
            }
            Self::SortAssignedLights => {
                for light_type in lights() {
                    params.dispatch(
                        Kernel::SortAssignedLights {
                            light_type,
                            masked: frame.masked(),
                        },
                        frame.cluster_groups(),
                        None,
                    );
                }
            }
        }

        params
    }
}

/// Light culling state of one camera.
pub struct FrustumClusters<B> {
    config: ClustersConfig,
    backend: B,
    last_camera: Option<Camera>,
    last_generation: Option<u64>,
    config_dirty: bool,
    sort_input: Slot,
    sorted: [Slot; 2],
    frame_index: u64,
}

impl<B: ClusterBackend> FrustumClusters<B> {
    pub fn new(config: ClustersConfig, backend: B) -> Result<Self, ClustersConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            last_camera: None,
            last_generation: None,
            config_dirty: true,
            // Flipped before the first sort, which then writes to the front.
            sort_input: Slot::Back,
            sorted: [Slot::Front; 2],
            frame_index: 0,
        })
    }

    pub fn config(&self) -> &ClustersConfig {
        &self.config
    }

    /// Applies `change` if the resulting configuration is valid. Everything
    /// is recomputed on the next update.
    pub fn set_config(&mut self, change: ClustersConfigChange) -> Result<(), ClustersConfigError> {
        let mut config = self.config.clone();
        config.update_from_changes(change);
        config.validate()?;
        if config != self.config {
            log::debug!("Clusters config changed: {config:?}");
            self.config = config;
            self.config_dirty = true;
        }
        Ok(())
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    pub fn update(
        &mut self,
        camera: &Camera,
        lights: &LightSet,
        depth: Option<&DepthSamples>,
    ) -> Result<FrameState, B::Error> {
        profiling::scope!("FrustumClusters::update");

        let grid = ClusterGrid::from_camera(camera, self.config.cluster_pixel_size);

        let clusters_dirty = self.config_dirty
            || self
                .last_camera
                .map_or(true, |last| last.projection != camera.projection || last.viewport != camera.viewport);
        let lights_dirty = clusters_dirty
            || self.last_camera.map_or(true, |last| last.view != camera.view)
            || self.last_generation != Some(lights.generation());

        let light_counts = LightType::ARRAY.map(|ty| {
            let count = lights.count(ty);
            if count > MAX_LIGHTS_PER_TYPE {
                log::trace!(
                    "Clamping {count} {} lights to {MAX_LIGHTS_PER_TYPE}",
                    ty.name()
                );
            }
            count.min(MAX_LIGHTS_PER_TYPE)
        });

        let depth_size = match depth {
            Some(depth) if self.config.use_depth_clusters_mask => mask_size(depth.size),
            _ => UVec2::ZERO,
        };

        let mut sort_input = self.sort_input;
        let mut sorted = self.sorted;
        let total = light_counts.iter().sum::<u32>();
        if self.config.enabled && self.config.sort_lights && lights_dirty && total != 0 {
            sort_input = sort_input.other();
            for ty in LightType::ARRAY {
                let count = light_counts[ty.index()];
                if count != 0 {
                    sorted[ty.index()] = sorted_slot(count, sort_input);
                }
            }
        }

        let frame = FrameState {
            index: self.frame_index,
            config: self.config.clone(),
            camera: *camera,
            grid,
            uniform: ClustersUniform::new(camera, &grid, light_counts, depth_size),
            light_counts,
            depth_size,
            clusters_dirty,
            lights_dirty,
            sort_input,
            sorted,
        };

        log::trace!(
            "Frame {}: grid {}, clusters dirty {clusters_dirty}, lights dirty {lights_dirty}",
            frame.index,
            grid.dimensions()
        );

        self.backend.prepare(&frame, lights, depth)?;

        self.last_camera = Some(*camera);
        self.last_generation = Some(lights.generation());
        self.config_dirty = false;
        self.sort_input = sort_input;
        self.sorted = sorted;
        self.frame_index += 1;

        Ok(frame)
    }

    /// The passes of `frame`, with the ones that have nothing to do disabled.
    pub fn build_graph(&self, frame: &FrameState) -> PassGraph {
        build_graph(frame)
    }
}

/// Size of the depth samples the mask is built from, zero when there are too
/// many of them to bind.
fn mask_size(size: UVec2) -> UVec2 {
    let samples = size.x as u64 * size.y as u64;
    if samples > MAX_DEPTH_SAMPLES as u64 {
        log::trace!("{samples} depth samples exceed {MAX_DEPTH_SAMPLES}, assigning every cluster");
        UVec2::ZERO
    } else {
        size
    }
}

pub fn build_graph(frame: &FrameState) -> PassGraph {
    profiling::scope!("Build Clusters Graph");

    let mut graph = PassGraph::new();
    let mut handles: Vec<PassHandle> = Vec::with_capacity(PassKind::ALL.len());
    for kind in PassKind::ALL {
        let enabled = kind.should_run(frame);

        let mut builder = graph.add_pass(kind.name());
        for &pred in kind.predecessors() {
            builder.after(handles[pred as usize]);
        }
        builder.enabled(enabled);
        if enabled {
            builder.params(kind.dispatch_params(frame));
        }
        handles.push(builder.build());
    }
    graph
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use glam::{Mat4, Vec3};
    use lightgrid_types::{CameraProjection, PointLight, SpotLight};

    use super::*;
    use crate::pass::{
        limits::{MAX_CLUSTERS, MAX_DISPATCH_GROUPS},
        DispatchStep,
    };

    #[derive(Default)]
    struct CountingBackend {
        prepared: usize,
    }

    impl ClusterBackend for CountingBackend {
        type Error = Infallible;

        fn prepare(&mut self, _: &FrameState, _: &LightSet, _: Option<&DepthSamples>) -> Result<(), Infallible> {
            self.prepared += 1;
            Ok(())
        }
    }

    fn camera() -> Camera {
        Camera {
            projection: CameraProjection {
                vfov: 60.0,
                near: 0.1,
                far: 100.0,
            },
            view: Mat4::IDENTITY,
            viewport: UVec2::new(512, 288),
        }
    }

    fn lights(points: usize) -> LightSet {
        let mut lights = LightSet::new();
        for i in 0..points {
            lights.add_point(PointLight::new(Vec3::new(i as f32, 0.0, -5.0), 2.0));
        }
        lights
    }

    fn executed(frame: &FrameState) -> Vec<PassKind> {
        PassKind::ALL.into_iter().filter(|kind| kind.should_run(frame)).collect()
    }

    #[test]
    fn static_scene_runs_once() {
        let mut clusters = FrustumClusters::new(ClustersConfig::default(), CountingBackend::default()).unwrap();
        let lights = lights(3);

        let first = clusters.update(&camera(), &lights, None).unwrap();
        assert!(first.clusters_dirty && first.lights_dirty);
        assert_eq!(
            executed(&first),
            [
                PassKind::ComputeClustersAabb,
                PassKind::ComputeLightsAabb,
                PassKind::ReduceLightsAabb,
                PassKind::ComputeLightsMortonCode,
                PassKind::SortLightsMortonCode,
                PassKind::BuildLightsBvh,
                PassKind::AssignLightsToClusters,
            ]
        );

        let second = clusters.update(&camera(), &lights, None).unwrap();
        assert!(!second.clusters_dirty && !second.lights_dirty);
        assert!(executed(&second).is_empty());
        assert_eq!(second.index, 1);
        assert_eq!(clusters.backend().prepared, 2);
    }

    #[test]
    fn dirty_tracking() {
        let mut clusters = FrustumClusters::new(ClustersConfig::default(), CountingBackend::default()).unwrap();
        let mut lights = lights(2);
        let mut camera = camera();
        clusters.update(&camera, &lights, None).unwrap();

        camera.view = Mat4::from_translation(Vec3::X);
        let frame = clusters.update(&camera, &lights, None).unwrap();
        assert!(!frame.clusters_dirty && frame.lights_dirty);
        assert!(!PassKind::ComputeClustersAabb.should_run(&frame));
        assert!(PassKind::AssignLightsToClusters.should_run(&frame));

        lights.set_point(0, PointLight::new(Vec3::ZERO, 1.0));
        let frame = clusters.update(&camera, &lights, None).unwrap();
        assert!(!frame.clusters_dirty && frame.lights_dirty);

        camera.viewport = UVec2::new(640, 360);
        let frame = clusters.update(&camera, &lights, None).unwrap();
        assert!(frame.clusters_dirty && frame.lights_dirty);
        assert_eq!(frame.grid.dimensions().truncate(), UVec2::new(20, 12));

        clusters
            .set_config(ClustersConfigChange {
                cluster_pixel_size: Some(16),
                ..Default::default()
            })
            .unwrap();
        let frame = clusters.update(&camera, &lights, None).unwrap();
        assert!(frame.clusters_dirty);
        assert_eq!(frame.grid.cluster_size(), 16);

        let err = clusters.set_config(ClustersConfigChange {
            max_lights_per_cluster: Some(0),
            ..Default::default()
        });
        assert!(err.is_err());
        assert_eq!(clusters.config().cluster_pixel_size, 16);
    }

    #[test]
    fn sort_slot_flips_once_per_sort() {
        let mut clusters = FrustumClusters::new(ClustersConfig::default(), CountingBackend::default()).unwrap();
        let mut lights = lights(300);
        lights.add_spot(SpotLight::new(Vec3::ZERO, Vec3::NEG_Z, 5.0, 0.5));

        let first = clusters.update(&camera(), &lights, None).unwrap();
        assert_eq!(first.sort_input, Slot::Front);
        // Bitonic sorts in place, radix moves to the other slot.
        assert_eq!(first.sorted_indices(LightType::Point), Some(Slot::Front));
        assert_eq!(first.sorted_indices(LightType::Spot), Some(Slot::Back));

        let static_frame = clusters.update(&camera(), &lights, None).unwrap();
        assert_eq!(static_frame.sort_input, Slot::Front);
        assert_eq!(static_frame.sorted, first.sorted);

        lights.set_point(3, PointLight::new(Vec3::ONE, 1.0));
        let moved = clusters.update(&camera(), &lights, None).unwrap();
        assert_eq!(moved.sort_input, Slot::Back);
        assert_eq!(moved.sorted_indices(LightType::Point), Some(Slot::Back));
        assert_eq!(moved.sorted_indices(LightType::Spot), Some(Slot::Front));

        let params = PassKind::SortLightsMortonCode.dispatch_params(&moved);
        assert!(params.steps.iter().any(|step| matches!(
            step,
            DispatchStep::Dispatch {
                kernel: Kernel::BitonicSort {
                    light_type: LightType::Point,
                    slot: Slot::Back
                },
                ..
            }
        )));
    }

    #[test]
    fn no_lights_still_assigns() {
        let mut clusters = FrustumClusters::new(ClustersConfig::default(), CountingBackend::default()).unwrap();
        let frame = clusters.update(&camera(), &LightSet::new(), None).unwrap();
        assert_eq!(
            executed(&frame),
            [PassKind::ComputeClustersAabb, PassKind::AssignLightsToClusters]
        );

        let params = PassKind::AssignLightsToClusters.dispatch_params(&frame);
        for step in &params.steps {
            if let DispatchStep::Dispatch {
                kernel: Kernel::AssignLights { indices, bvh, .. },
                ..
            } = step
            {
                assert_eq!(*indices, None);
                assert!(!bvh);
            }
        }
        assert_eq!(params.dispatch_count(), 2);
    }

    #[test]
    fn masked_frames() {
        let config = ClustersConfig {
            use_depth_clusters_mask: true,
            sort_assigned_lights: true,
            ..Default::default()
        };
        let mut clusters = FrustumClusters::new(config, CountingBackend::default()).unwrap();
        let lights = lights(4);
        let depth = DepthSamples::new(UVec2::new(4, 2), vec![-1.0; 8]);

        clusters.update(&camera(), &lights, Some(&depth)).unwrap();
        let frame = clusters.update(&camera(), &lights, Some(&depth)).unwrap();
        assert!(frame.masked());
        assert_eq!(
            executed(&frame),
            [
                PassKind::ComputeClustersMask,
                PassKind::FindUniqueClusters,
                PassKind::AssignLightsToClusters,
                PassKind::SortAssignedLights,
            ]
        );
        assert_eq!(frame.cluster_groups(), DispatchGroups::Indirect(BufferId::ClustersIndirect));

        let params = PassKind::AssignLightsToClusters.dispatch_params(&frame);
        assert!(params.steps.contains(&DispatchStep::Clear(BufferId::LightGrid(LightType::Point))));

        // Without samples the mask cannot be used.
        let frame = clusters.update(&camera(), &lights, None).unwrap();
        assert!(!frame.masked());
        assert!(!PassKind::FindUniqueClusters.should_run(&frame));
    }

    #[test]
    fn graph_wiring() {
        let mut clusters = FrustumClusters::new(ClustersConfig::default(), CountingBackend::default()).unwrap();
        let frame = clusters.update(&camera(), &lights(1000), None).unwrap();
        let graph = clusters.build_graph(&frame);
        assert_eq!(graph.len(), PassKind::ALL.len());

        let assign = graph.find(PassKind::AssignLightsToClusters.name()).unwrap();
        let preds: Vec<_> = graph.predecessors(assign).iter().map(|&h| graph.label(h)).collect();
        assert_eq!(
            preds,
            [
                "Compute Clusters AABB",
                "Reduce Lights AABB",
                "Sort Lights Morton Code",
                "Build Lights BVH",
                "Find Unique Clusters"
            ]
        );
        assert!(!graph.is_enabled(graph.find("Find Unique Clusters").unwrap()));

        // 1000 point lights: 3 levels, two top dispatches.
        let bvh = graph.params(graph.find("Build Lights BVH").unwrap());
        let pushes: Vec<_> = bvh
            .steps
            .iter()
            .filter_map(|step| match step {
                DispatchStep::Dispatch {
                    push_constants: Some(push),
                    ..
                } => Some(push.word(0)),
                _ => None,
            })
            .collect();
        assert_eq!(pushes, [2, 1]);
    }

    #[test]
    fn disabled_config_schedules_nothing() {
        let config = ClustersConfig {
            enabled: false,
            ..Default::default()
        };
        let mut clusters = FrustumClusters::new(config, CountingBackend::default()).unwrap();
        let frame = clusters.update(&camera(), &lights(3), None).unwrap();
        assert!(executed(&frame).is_empty());
        assert_eq!(frame.sort_input, Slot::Back);
    }

    #[test]
    fn large_viewports_fit_device_limits() {
        let camera = Camera {
            projection: CameraProjection {
                vfov: 60.0,
                near: 0.1,
                far: 1000.0,
            },
            view: Mat4::IDENTITY,
            viewport: UVec2::new(3840, 2160),
        };
        let config = ClustersConfig {
            use_depth_clusters_mask: true,
            sort_assigned_lights: true,
            ..Default::default()
        };
        let mut clusters = FrustumClusters::new(config, CountingBackend::default()).unwrap();
        let lights = lights(5000);
        let depth = DepthSamples::new(UVec2::new(1920, 1080), vec![-3.0; 1920 * 1080]);

        for depth in [None, Some(&depth)] {
            let frame = clusters.update(&camera, &lights, depth).unwrap();
            assert!(frame.grid.cluster_count() <= MAX_CLUSTERS);
            let graph = clusters.build_graph(&frame);
            for kind in PassKind::ALL {
                let params = graph.params(graph.find(kind.name()).unwrap());
                for step in &params.steps {
                    if let DispatchStep::Dispatch {
                        kernel,
                        groups: DispatchGroups::Direct(groups),
                        ..
                    } = step
                    {
                        assert!(
                            groups.iter().all(|&g| g <= MAX_DISPATCH_GROUPS),
                            "{kernel:?} dispatches {groups:?}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn oversized_depth_skips_the_mask() {
        assert_eq!(mask_size(UVec2::new(1920, 1080)), UVec2::new(1920, 1080));
        assert_eq!(mask_size(UVec2::new(8192, 4096)), UVec2::new(8192, 4096));
        assert_eq!(mask_size(UVec2::new(8192, 4097)), UVec2::ZERO);
    }
}
