//! Reference backend running every kernel on the CPU.
//!
//! Each kernel is a plain function over slices, looping over the workgroups
//! and invocations of its dispatch in order. Results match the GPU kernels up
//! to the order lights are appended to a cluster, which the GPU leaves to
//! its atomics.

use std::convert::Infallible;

use glam::UVec2;
use lightgrid_types::{
    Aabb, Camera, ClusterLightRange, DepthSamples, LightSet, LightType, LightsData, PointLight, SpotLight,
};

use crate::{
    clusters::{ClusterBackend, FrameState, FrustumClusters},
    graph::{GraphStats, PassExecutor},
    pass::{
        limits::{
            CLUSTERS_AABB_THREADS, LIGHTS_AABB_THREADS, MASK_THREADS, MAX_CLUSTER_LIGHT_INDICES, MERGE_NUM_THREADS,
            REDUCE_MAX_GROUPS,
        },
        BufferId, DispatchGroups, Kernel, PushConstants,
    },
    ping_pong::{PingPong, Slot},
    sort::merge_partition_capacity,
};

pub mod aabb;
pub mod assign;
pub mod bvh;
pub mod sort;

use assign::{LightVolumes, LightsInput};

fn grow<T: Clone>(buffer: &mut Vec<T>, len: usize, value: T) {
    if buffer.len() < len {
        buffer.resize(len, value);
    }
}

#[derive(Default)]
struct CpuBuffers {
    clusters_aabb: Vec<Aabb>,
    lights_aabb: [Vec<Aabb>; 2],
    reduce_partials: Vec<Aabb>,
    lights_data: LightsData,
    morton_codes: [PingPong<Vec<u32>>; 2],
    light_indices: [PingPong<Vec<u32>>; 2],
    merge_partitions: [Vec<u32>; 2],
    bvh: [Vec<Aabb>; 2],
    clusters_mask: Vec<u32>,
    unique_clusters: Vec<u32>,
    clusters_indirect: [u32; 3],
    light_counters: [u32; 2],
    light_grid: [Vec<ClusterLightRange>; 2],
    cluster_light_indices: [Vec<u32>; 2],
}

impl CpuBuffers {
    fn grow(&mut self, frame: &FrameState) {
        let clusters = frame.grid.cluster_count() as usize;
        let max_lights = frame.config.max_lights_per_cluster;

        grow(&mut self.clusters_aabb, clusters, Aabb::EMPTY);
        grow(&mut self.reduce_partials, REDUCE_MAX_GROUPS as usize, Aabb::EMPTY);
        grow(&mut self.clusters_mask, clusters, 0);
        grow(&mut self.unique_clusters, clusters, 0);

        for ty in LightType::ARRAY {
            let i = ty.index();
            let count = frame.light_count(ty);
            grow(&mut self.lights_aabb[i], count as usize, Aabb::EMPTY);
            for slot in Slot::ARRAY {
                grow(&mut self.morton_codes[i][slot], count as usize, 0);
                grow(&mut self.light_indices[i][slot], count as usize, 0);
            }
            grow(&mut self.merge_partitions[i], merge_partition_capacity(count) as usize, 0);
            grow(&mut self.bvh[i], crate::bvh::num_nodes(count) as usize, Aabb::EMPTY);
            grow(&mut self.light_grid[i], clusters, ClusterLightRange::default());
            let indices = (clusters * max_lights.min(count) as usize).min(MAX_CLUSTER_LIGHT_INDICES as usize);
            grow(&mut self.cluster_light_indices[i], indices.max(1), 0);
        }
    }

    fn clear(&mut self, buffer: BufferId) {
        match buffer {
            BufferId::ClustersAabb => self.clusters_aabb.fill(Aabb::EMPTY),
            BufferId::LightsAabb(ty) => self.lights_aabb[ty.index()].fill(Aabb::EMPTY),
            BufferId::ReducePartials => self.reduce_partials.fill(Aabb::EMPTY),
            BufferId::LightsData => self.lights_data = LightsData::default(),
            BufferId::MortonCodes(ty, slot) => self.morton_codes[ty.index()][slot].fill(0),
            BufferId::LightIndices(ty, slot) => self.light_indices[ty.index()][slot].fill(0),
            BufferId::MergePartitions(ty) => self.merge_partitions[ty.index()].fill(0),
            BufferId::Bvh(ty) => self.bvh[ty.index()].fill(Aabb::EMPTY),
            BufferId::ClustersMask => self.clusters_mask.fill(0),
            BufferId::UniqueClusters => self.unique_clusters.fill(0),
            BufferId::ClustersIndirect => self.clusters_indirect = [0; 3],
            BufferId::LightCounters => self.light_counters = [0; 2],
            BufferId::LightGrid(ty) => self.light_grid[ty.index()].fill(ClusterLightRange::default()),
            BufferId::ClusterLightIndices(ty) => self.cluster_light_indices[ty.index()].fill(0),
            BufferId::Uniforms | BufferId::Lights(_) | BufferId::DepthSamples => {
                log::warn!("Clearing input buffer {buffer:?} has no effect");
            }
        }
    }
}

/// Backend keeping every buffer in host memory.
#[derive(Default)]
pub struct CpuClusters {
    frame: Option<FrameState>,
    points: Vec<PointLight>,
    spots: Vec<SpotLight>,
    depth: Option<DepthSamples>,
    buffers: CpuBuffers,
    barriers: usize,
}

impl CpuClusters {
    pub fn new() -> Self {
        Self::default()
    }

    /// The frame of the last successful prepare.
    pub fn frame(&self) -> Option<&FrameState> {
        self.frame.as_ref()
    }

    fn cluster_count(&self) -> usize {
        self.frame.as_ref().map_or(0, |frame| frame.grid.cluster_count() as usize)
    }

    fn light_count(&self, ty: LightType) -> usize {
        self.frame.as_ref().map_or(0, |frame| frame.light_count(ty) as usize)
    }

    /// Barriers recorded since the backend was created.
    pub fn barrier_count(&self) -> usize {
        self.barriers
    }

    pub fn clusters_aabb(&self) -> &[Aabb] {
        &self.buffers.clusters_aabb[..self.cluster_count()]
    }

    pub fn lights_aabb(&self, ty: LightType) -> &[Aabb] {
        &self.buffers.lights_aabb[ty.index()][..self.light_count(ty)]
    }

    pub fn lights_data(&self) -> &LightsData {
        &self.buffers.lights_data
    }

    pub fn morton_codes(&self, ty: LightType, slot: Slot) -> &[u32] {
        &self.buffers.morton_codes[ty.index()][slot][..self.light_count(ty)]
    }

    pub fn light_indices(&self, ty: LightType, slot: Slot) -> &[u32] {
        &self.buffers.light_indices[ty.index()][slot][..self.light_count(ty)]
    }

    /// Sorted light indices of the last frame, if lights were sorted.
    pub fn sorted_light_indices(&self, ty: LightType) -> Option<&[u32]> {
        let slot = self.frame.as_ref()?.sorted_indices(ty)?;
        Some(self.light_indices(ty, slot))
    }

    pub fn bvh(&self, ty: LightType) -> &[Aabb] {
        &self.buffers.bvh[ty.index()][..crate::bvh::num_nodes(self.light_count(ty) as u32) as usize]
    }

    pub fn clusters_mask(&self) -> &[u32] {
        &self.buffers.clusters_mask[..self.cluster_count()]
    }

    /// Clusters flagged by the mask, in the order they are assigned.
    pub fn unique_clusters(&self) -> &[u32] {
        &self.buffers.unique_clusters[..self.buffers.clusters_indirect[0] as usize]
    }

    /// Number of indices appended to the flat index buffer of `ty`.
    pub fn light_counter(&self, ty: LightType) -> u32 {
        self.buffers.light_counters[ty.index()]
    }

    pub fn light_grid(&self, ty: LightType) -> &[ClusterLightRange] {
        &self.buffers.light_grid[ty.index()][..self.cluster_count()]
    }

    /// Appended indices of `ty`, up to the capacity of the index buffer.
    pub fn cluster_light_indices(&self, ty: LightType) -> &[u32] {
        let indices = &self.buffers.cluster_light_indices[ty.index()];
        &indices[..(self.light_counter(ty) as usize).min(indices.len())]
    }

    /// The lights of type `ty` assigned to `cluster`.
    pub fn cluster_lights(&self, ty: LightType, cluster: u32) -> &[u32] {
        let range = self.light_grid(ty)[cluster as usize];
        &self.buffers.cluster_light_indices[ty.index()][range.offset as usize..(range.offset + range.count) as usize]
    }
}

impl ClusterBackend for CpuClusters {
    type Error = Infallible;

    fn prepare(
        &mut self,
        frame: &FrameState,
        lights: &LightSet,
        depth: Option<&DepthSamples>,
    ) -> Result<(), Self::Error> {
        profiling::scope!("CpuClusters::prepare");

        self.buffers.grow(frame);
        if frame.lights_dirty {
            self.points.clear();
            self.points
                .extend_from_slice(&lights.points()[..frame.light_count(LightType::Point) as usize]);
            self.spots.clear();
            self.spots
                .extend_from_slice(&lights.spots()[..frame.light_count(LightType::Spot) as usize]);
        }
        self.depth = depth.filter(|_| frame.masked()).cloned();
        self.frame = Some(frame.clone());
        Ok(())
    }
}

impl PassExecutor for CpuClusters {
    fn barrier(&mut self) {
        self.barriers += 1;
    }

    fn clear(&mut self, buffer: BufferId) {
        self.buffers.clear(buffer);
    }

    fn dispatch(&mut self, kernel: &Kernel, groups: &DispatchGroups, push_constants: Option<&PushConstants>) {
        let Self {
            frame,
            points,
            spots,
            depth,
            buffers,
            ..
        } = self;
        let Some(frame) = frame.as_ref() else {
            debug_assert!(false, "Dispatched {} before prepare", kernel.name());
            return;
        };
        let groups = match *groups {
            DispatchGroups::Direct(groups) => groups,
            DispatchGroups::Indirect(_) => buffers.clusters_indirect,
        };
        // Linear dispatches fold their groups into y past the group limit.
        let total_groups = groups.iter().product::<u32>();
        let push = |index: usize| push_constants.map_or(0, |push| push.word(index));
        let count = |ty: LightType| frame.light_count(ty) as usize;
        let view = frame.camera.view;

        profiling::scope!("CPU Dispatch", kernel.name());
        match *kernel {
            Kernel::ClustersAabb => aabb::clusters_aabb(
                total_groups * CLUSTERS_AABB_THREADS,
                &frame.grid,
                &frame.uniform.inv_projection,
                &mut buffers.clusters_aabb,
            ),
            Kernel::LightsAabb => {
                let [point_aabbs, spot_aabbs] = &mut buffers.lights_aabb;
                aabb::lights_aabb(
                    total_groups * LIGHTS_AABB_THREADS,
                    &view,
                    frame.config.use_spot_tight_bounding_box,
                    (&points[..], &spots[..]),
                    (&mut point_aabbs[..], &mut spot_aabbs[..]),
                );
            }
            Kernel::ReduceLightsAabbFirst => {
                let [point_aabbs, spot_aabbs] = &buffers.lights_aabb;
                aabb::reduce_lights_aabb_first(
                    groups[0],
                    (
                        &point_aabbs[..count(LightType::Point)],
                        &spot_aabbs[..count(LightType::Spot)],
                    ),
                    &mut buffers.reduce_partials,
                );
            }
            Kernel::ReduceLightsAabbSecond => {
                buffers.lights_data =
                    aabb::reduce_lights_aabb_second(&buffers.reduce_partials[..push(0) as usize], &frame.grid);
            }
            Kernel::MortonCodes { light_type, output } => {
                let i = light_type.index();
                sort::morton_codes(
                    &buffers.lights_data,
                    &buffers.lights_aabb[i][..count(light_type)],
                    &mut buffers.morton_codes[i][output],
                    &mut buffers.light_indices[i][output],
                );
            }
            Kernel::RadixSort { light_type, input } => {
                let i = light_type.index();
                let (src_codes, dst_codes) = buffers.morton_codes[i].split(input);
                let (src_indices, dst_indices) = buffers.light_indices[i].split(input);
                sort::radix_sort(
                    groups[0],
                    push(0),
                    push(1),
                    (&src_codes[..], &src_indices[..]),
                    (&mut dst_codes[..], &mut dst_indices[..]),
                );
            }
            Kernel::BitonicSort { light_type, slot } => {
                let i = light_type.index();
                sort::bitonic_sort(
                    push(0),
                    &mut buffers.morton_codes[i][slot],
                    &mut buffers.light_indices[i][slot],
                );
            }
            Kernel::MergePathPartitions { light_type, input } => {
                let i = light_type.index();
                sort::merge_path_partitions(
                    total_groups * MERGE_NUM_THREADS,
                    push(0),
                    push(1),
                    &buffers.morton_codes[i][input],
                    &mut buffers.merge_partitions[i],
                );
            }
            Kernel::MergeSort { light_type, input } => {
                let i = light_type.index();
                let (src_codes, dst_codes) = buffers.morton_codes[i].split(input);
                let (src_indices, dst_indices) = buffers.light_indices[i].split(input);
                sort::merge_sort(
                    groups[0],
                    push(0),
                    push(1),
                    &buffers.merge_partitions[i],
                    (&src_codes[..], &src_indices[..]),
                    (&mut dst_codes[..], &mut dst_indices[..]),
                );
            }
            Kernel::BvhBottom { light_type, indices } => {
                let i = light_type.index();
                let n = count(light_type);
                bvh::bvh_bottom(
                    frame.bvh_levels(light_type),
                    &buffers.lights_aabb[i][..n],
                    indices.map(|slot| &buffers.light_indices[i][slot][..n]),
                    &mut buffers.bvh[i],
                );
            }
            Kernel::BvhTop { light_type } => bvh::bvh_top(push(0), &mut buffers.bvh[light_type.index()]),
            Kernel::ClustersMask => {
                let Some(depth) = depth.as_ref() else {
                    log::warn!("Clusters mask dispatched without depth samples");
                    return;
                };
                assign::clusters_mask(
                    total_groups * MASK_THREADS,
                    &frame.grid,
                    depth,
                    &mut buffers.clusters_mask,
                );
            }
            Kernel::FindUniqueClusters => assign::find_unique_clusters(
                frame.grid.cluster_count(),
                &buffers.clusters_mask,
                &mut buffers.unique_clusters,
                &mut buffers.clusters_indirect,
            ),
            Kernel::AssignLights {
                light_type,
                indices,
                bvh,
                masked,
            } => {
                let i = light_type.index();
                let n = count(light_type);
                let volumes = match light_type {
                    LightType::Point => LightVolumes::points(&points[..], &view),
                    LightType::Spot => LightVolumes::spots(&spots[..], &view, frame.config.spot_culling),
                };
                let input = LightsInput {
                    volumes,
                    aabbs: &buffers.lights_aabb[i][..n],
                    indices: indices.map(|slot| &buffers.light_indices[i][slot][..n]),
                    bvh: bvh.then(|| (&buffers.bvh[i][..], frame.bvh_levels(light_type))),
                    max_lights: frame.config.max_lights_per_cluster,
                    lights_aabb: frame
                        .config
                        .limit_clusters_to_lights_aabb
                        .then_some(buffers.lights_data.aabb),
                };

                let dispatched = groups.iter().product::<u32>();
                let clusters: Vec<u32> = if masked {
                    buffers.unique_clusters[..dispatched as usize].to_vec()
                } else {
                    (0..dispatched).collect()
                };
                assign::assign_lights(
                    &input,
                    clusters,
                    &buffers.clusters_aabb,
                    &mut buffers.light_counters[i],
                    &mut buffers.light_grid[i],
                    &mut buffers.cluster_light_indices[i],
                );
            }
            Kernel::SortAssignedLights { light_type, masked } => {
                let i = light_type.index();
                let dispatched = groups.iter().product::<u32>();
                if masked {
                    assign::sort_assigned_lights(
                        buffers.unique_clusters[..dispatched as usize].iter().copied(),
                        &buffers.light_grid[i],
                        &mut buffers.cluster_light_indices[i],
                    );
                } else {
                    assign::sort_assigned_lights(
                        0..dispatched,
                        &buffers.light_grid[i],
                        &mut buffers.cluster_light_indices[i],
                    );
                }
            }
        }
    }
}

impl FrustumClusters<CpuClusters> {
    /// Updates the state of the frame and runs its passes to completion.
    pub fn run_frame(
        &mut self,
        camera: &Camera,
        lights: &LightSet,
        depth: Option<&DepthSamples>,
    ) -> (FrameState, GraphStats) {
        let frame = match self.update(camera, lights, depth) {
            Ok(frame) => frame,
            Err(never) => match never {},
        };
        let graph = self.build_graph(&frame);
        let stats = graph.execute(self.backend_mut(), None);
        (frame, stats)
    }
}

/// Depth samples covering the viewport with a single depth.
pub fn uniform_depth(size: UVec2, view_z: f32) -> DepthSamples {
    DepthSamples::new(size, vec![view_z; (size.x * size.y) as usize])
}
