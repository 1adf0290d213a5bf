//! WGSL sources of the kernels and the template values they are rendered
//! with.

use lightgrid::{
    bvh::BVH_NUM_CHILDREN,
    pass::{
        limits::{
            ASSIGN_BVH_STACK_SIZE, ASSIGN_BVH_THREADS, ASSIGN_THREADS, BITONIC_MAX_ELEMENTS, BITONIC_NUM_THREADS,
            BVH_THREADS, CLUSTERS_AABB_THREADS, LIGHTS_AABB_THREADS, MASK_THREADS, MAX_DISPATCH_GROUPS,
            MERGE_NUM_THREADS, MERGE_VALUES_PER_GROUP, MERGE_VALUES_PER_THREAD, MORTON_THREADS, RADIX_NUM_THREADS,
            REDUCE_NUM_THREADS, SORT_ASSIGNED_THREADS, UNIQUE_THREADS,
        },
        BufferId, Kernel, ResourceUsage,
    },
    types::{ClustersConfig, LightType, SpotCulling, MAX_LIGHTS_PER_CLUSTER_LIMIT},
    util::typedefs::FastHashMap,
    ShaderPreProcessor,
};
use rust_embed::RustEmbed;
use serde::Serialize;

#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/shaders"]
struct LightgridRoutineShaderSources;

/// Registers every kernel source under `lightgrid-routine/`.
pub fn builtin_shaders(spp: &mut ShaderPreProcessor) {
    spp.add_shaders_embed::<LightgridRoutineShaderSources>("lightgrid-routine");
}

pub fn shader_name(kernel: &Kernel) -> String {
    format!("lightgrid-routine/{}.wgsl", kernel.name())
}

/// The part of the configuration baked into the shaders. Pipelines are
/// rebuilt when it changes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ShaderSettings {
    pub max_lights_per_cluster: u32,
    pub tight_spots: bool,
    pub cone_culling: bool,
    pub limit_to_lights_aabb: bool,
}

impl ShaderSettings {
    pub fn new(config: &ClustersConfig) -> Self {
        Self {
            max_lights_per_cluster: config.max_lights_per_cluster,
            tight_spots: config.use_spot_tight_bounding_box,
            cone_culling: config.spot_culling == SpotCulling::Cone,
            limit_to_lights_aabb: config.limit_clusters_to_lights_aabb,
        }
    }
}

pub fn workgroup_size(kernel: &Kernel) -> u32 {
    match kernel {
        Kernel::ClustersAabb => CLUSTERS_AABB_THREADS,
        Kernel::LightsAabb => LIGHTS_AABB_THREADS,
        Kernel::ReduceLightsAabbFirst | Kernel::ReduceLightsAabbSecond => REDUCE_NUM_THREADS,
        Kernel::MortonCodes { .. } => MORTON_THREADS,
        Kernel::RadixSort { .. } => RADIX_NUM_THREADS,
        Kernel::BitonicSort { .. } => BITONIC_NUM_THREADS,
        Kernel::MergePathPartitions { .. } | Kernel::MergeSort { .. } => MERGE_NUM_THREADS,
        Kernel::BvhBottom { .. } | Kernel::BvhTop { .. } => BVH_THREADS,
        Kernel::ClustersMask => MASK_THREADS,
        Kernel::FindUniqueClusters => UNIQUE_THREADS,
        Kernel::AssignLights { bvh: true, .. } => ASSIGN_BVH_THREADS,
        Kernel::AssignLights { bvh: false, .. } => ASSIGN_THREADS,
        Kernel::SortAssignedLights { .. } => SORT_ASSIGNED_THREADS,
    }
}

/// Bytes of push constants the kernel reads.
pub fn push_constant_size(kernel: &Kernel) -> u32 {
    match kernel {
        Kernel::ReduceLightsAabbSecond | Kernel::BvhTop { .. } => 4,
        Kernel::RadixSort { .. }
        | Kernel::BitonicSort { .. }
        | Kernel::MergePathPartitions { .. }
        | Kernel::MergeSort { .. } => 8,
        _ => 0,
    }
}

fn light_type(kernel: &Kernel) -> Option<LightType> {
    match *kernel {
        Kernel::MortonCodes { light_type, .. }
        | Kernel::RadixSort { light_type, .. }
        | Kernel::BitonicSort { light_type, .. }
        | Kernel::MergePathPartitions { light_type, .. }
        | Kernel::MergeSort { light_type, .. }
        | Kernel::BvhBottom { light_type, .. }
        | Kernel::BvhTop { light_type }
        | Kernel::AssignLights { light_type, .. }
        | Kernel::SortAssignedLights { light_type, .. } => Some(light_type),
        _ => None,
    }
}

/// Name of the WGSL variable `buffer` is bound to in the kernel's source.
pub fn binding_name(kernel: &Kernel, buffer: BufferId, usage: ResourceUsage) -> &'static str {
    let both_types = matches!(kernel, Kernel::LightsAabb | Kernel::ReduceLightsAabbFirst);
    let reads_sorted = matches!(kernel, Kernel::BvhBottom { .. } | Kernel::AssignLights { .. });
    match buffer {
        BufferId::Uniforms => "uniforms",
        BufferId::ClustersAabb => "clusters_aabb",
        BufferId::Lights(LightType::Point) if both_types => "point_lights",
        BufferId::Lights(LightType::Spot) if both_types => "spot_lights",
        BufferId::Lights(_) => "lights",
        BufferId::LightsAabb(LightType::Point) if both_types => "point_lights_aabb",
        BufferId::LightsAabb(LightType::Spot) if both_types => "spot_lights_aabb",
        BufferId::LightsAabb(_) => "lights_aabb",
        BufferId::ReducePartials => "reduce_partials",
        BufferId::LightsData => "lights_data",
        BufferId::MortonCodes(..) if usage == ResourceUsage::Input => "codes_in",
        BufferId::MortonCodes(..) => "codes_out",
        BufferId::LightIndices(..) if reads_sorted => "sorted_indices",
        BufferId::LightIndices(..) if usage == ResourceUsage::Input => "indices_in",
        BufferId::LightIndices(..) => "indices_out",
        BufferId::MergePartitions(_) => "partitions",
        BufferId::Bvh(_) => "bvh",
        BufferId::DepthSamples => "depth_samples",
        BufferId::ClustersMask => "clusters_mask",
        BufferId::UniqueClusters => "unique_clusters",
        BufferId::ClustersIndirect => "clusters_indirect",
        BufferId::LightCounters => "light_counters",
        BufferId::LightGrid(_) => "light_grid",
        BufferId::ClusterLightIndices(_) => "cluster_light_indices",
    }
}

/// Template values of one kernel's source.
#[derive(Debug, Serialize)]
pub struct KernelShaderConfig {
    /// Binding index of every bound variable, by name.
    bind: FastHashMap<&'static str, u32>,
    workgroup_size: u32,
    light_type: &'static str,
    light_type_index: u32,
    spot: bool,
    sorted: bool,
    bvh: bool,
    masked: bool,
    max_lights_per_cluster: u32,
    max_lights_limit: u32,
    tight_spots: bool,
    cone_culling: bool,
    limit_to_lights_aabb: bool,
    bitonic_max_elements: u32,
    merge_values_per_thread: u32,
    merge_values_per_group: u32,
    bvh_stack_size: u32,
    bvh_num_children: u32,
    max_dispatch_groups: u32,
}

impl KernelShaderConfig {
    pub fn new(kernel: &Kernel, settings: &ShaderSettings) -> Self {
        let bind = kernel
            .resources()
            .into_iter()
            .enumerate()
            .map(|(index, (buffer, usage))| (binding_name(kernel, buffer, usage), index as u32))
            .collect();
        let ty = light_type(kernel).unwrap_or(LightType::Point);
        let (sorted, bvh, masked) = match *kernel {
            Kernel::BvhBottom { indices, .. } => (indices.is_some(), false, false),
            Kernel::AssignLights {
                indices, bvh, masked, ..
            } => (indices.is_some(), bvh, masked),
            Kernel::SortAssignedLights { masked, .. } => (false, false, masked),
            _ => (false, false, false),
        };

        Self {
            bind,
            workgroup_size: workgroup_size(kernel),
            light_type: match ty {
                LightType::Point => "point",
                LightType::Spot => "spot",
            },
            light_type_index: ty.index() as u32,
            spot: ty == LightType::Spot,
            sorted,
            bvh,
            masked,
            max_lights_per_cluster: settings.max_lights_per_cluster,
            max_lights_limit: MAX_LIGHTS_PER_CLUSTER_LIMIT,
            tight_spots: settings.tight_spots,
            cone_culling: settings.cone_culling,
            limit_to_lights_aabb: settings.limit_to_lights_aabb,
            bitonic_max_elements: BITONIC_MAX_ELEMENTS,
            merge_values_per_thread: MERGE_VALUES_PER_THREAD,
            merge_values_per_group: MERGE_VALUES_PER_GROUP,
            bvh_stack_size: ASSIGN_BVH_STACK_SIZE,
            bvh_num_children: BVH_NUM_CHILDREN,
            max_dispatch_groups: MAX_DISPATCH_GROUPS,
        }
    }
}
