//! Plain data description of the work the culling passes record: kernels,
//! the buffers they bind, and the steps of a dispatch sequence.

use arrayvec::ArrayVec;
use lightgrid_types::LightType;

use crate::{ping_pong::Slot, util::math::round_up_div};

/// Workgroup sizes and per-workgroup capacities of the kernels. Shared by
/// dispatch planning, the CPU backend, and the shader templates.
pub mod limits {
    pub const CLUSTERS_AABB_THREADS: u32 = 64;
    pub const LIGHTS_AABB_THREADS: u32 = 64;
    pub const REDUCE_NUM_THREADS: u32 = 256;
    /// First reduction pass never dispatches more groups than this, so the
    /// second pass fits one workgroup.
    pub const REDUCE_MAX_GROUPS: u32 = 512;
    pub const MORTON_THREADS: u32 = 64;
    /// Radix sort works on chunks of one value per thread.
    pub const RADIX_NUM_THREADS: u32 = 256;
    pub const BITONIC_MAX_ELEMENTS: u32 = 1024;
    pub const BITONIC_NUM_THREADS: u32 = 256;
    pub const MERGE_NUM_THREADS: u32 = 256;
    pub const MERGE_VALUES_PER_THREAD: u32 = 4;
    pub const MERGE_VALUES_PER_GROUP: u32 = MERGE_NUM_THREADS * MERGE_VALUES_PER_THREAD;
    pub const BVH_THREADS: u32 = 256;
    pub const MASK_THREADS: u32 = 256;
    pub const UNIQUE_THREADS: u32 = 256;
    pub const ASSIGN_THREADS: u32 = 64;
    /// One thread per child of the popped node.
    pub const ASSIGN_BVH_THREADS: u32 = crate::bvh::BVH_NUM_CHILDREN;
    pub const ASSIGN_BVH_STACK_SIZE: u32 = 1024;
    pub const SORT_ASSIGNED_THREADS: u32 = 64;
    /// Largest group count of a single dispatch dimension.
    pub const MAX_DISPATCH_GROUPS: u32 = 65535;
    /// Largest storage buffer binding every device supports.
    pub const MAX_STORAGE_BINDING_SIZE: u32 = 128 << 20;
    /// Cluster AABBs are the largest per cluster storage, two `vec4<f32>`.
    pub const MAX_CLUSTERS: u32 = MAX_STORAGE_BINDING_SIZE / 32;
    /// Capacity of one cluster light index list. Assignments past it are
    /// dropped.
    pub const MAX_CLUSTER_LIGHT_INDICES: u32 = MAX_STORAGE_BINDING_SIZE / 4;
    /// Depth buffers with more samples skip the cluster mask.
    pub const MAX_DEPTH_SAMPLES: u32 = MAX_STORAGE_BINDING_SIZE / 4;
    /// Lights of one type past this count are ignored.
    pub const MAX_LIGHTS_PER_TYPE: u32 = 1 << 20;
}

/// Every buffer the culling reads or writes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BufferId {
    Uniforms,
    ClustersAabb,
    Lights(LightType),
    LightsAabb(LightType),
    ReducePartials,
    LightsData,
    MortonCodes(LightType, Slot),
    LightIndices(LightType, Slot),
    MergePartitions(LightType),
    Bvh(LightType),
    DepthSamples,
    ClustersMask,
    UniqueClusters,
    /// Indirect dispatch arguments, `x` counts the unique clusters.
    ClustersIndirect,
    /// One append counter per light type.
    LightCounters,
    LightGrid(LightType),
    ClusterLightIndices(LightType),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResourceUsage {
    Input,
    Output,
    InputOutput,
}

impl ResourceUsage {
    pub fn writes(self) -> bool {
        !matches!(self, Self::Input)
    }
}

pub type KernelResources = ArrayVec<(BufferId, ResourceUsage), 12>;

/// A compute kernel together with the buffers it binds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Kernel {
    ClustersAabb,
    LightsAabb,
    ReduceLightsAabbFirst,
    ReduceLightsAabbSecond,
    MortonCodes {
        light_type: LightType,
        output: Slot,
    },
    RadixSort {
        light_type: LightType,
        input: Slot,
    },
    BitonicSort {
        light_type: LightType,
        slot: Slot,
    },
    MergePathPartitions {
        light_type: LightType,
        input: Slot,
    },
    MergeSort {
        light_type: LightType,
        input: Slot,
    },
    BvhBottom {
        light_type: LightType,
        /// Sorted light indices, when lights are sorted.
        indices: Option<Slot>,
    },
    BvhTop {
        light_type: LightType,
    },
    ClustersMask,
    FindUniqueClusters,
    AssignLights {
        light_type: LightType,
        indices: Option<Slot>,
        bvh: bool,
        masked: bool,
    },
    SortAssignedLights {
        light_type: LightType,
        masked: bool,
    },
}

impl Kernel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClustersAabb => "clusters_aabb",
            Self::LightsAabb => "lights_aabb",
            Self::ReduceLightsAabbFirst => "reduce_lights_aabb_first",
            Self::ReduceLightsAabbSecond => "reduce_lights_aabb_second",
            Self::MortonCodes { .. } => "morton_codes",
            Self::RadixSort { .. } => "radix_sort",
            Self::BitonicSort { .. } => "bitonic_sort",
            Self::MergePathPartitions { .. } => "merge_path_partitions",
            Self::MergeSort { .. } => "merge_sort",
            Self::BvhBottom { .. } => "bvh_bottom",
            Self::BvhTop { .. } => "bvh_top",
            Self::ClustersMask => "clusters_mask",
            Self::FindUniqueClusters => "find_unique_clusters",
            Self::AssignLights { .. } => "assign_lights",
            Self::SortAssignedLights { .. } => "sort_assigned_lights",
        }
    }

    /// Buffers bound by the kernel, in binding order.
    pub fn resources(&self) -> KernelResources {
        use BufferId as B;
        use ResourceUsage::{Input as R, InputOutput as RW, Output as W};

        let mut res = KernelResources::new();
        match *self {
            Self::ClustersAabb => {
                res.extend([(B::Uniforms, R), (B::ClustersAabb, W)]);
            }
            Self::LightsAabb => {
                res.extend([
                    (B::Uniforms, R),
                    (B::Lights(LightType::Point), R),
                    (B::Lights(LightType::Spot), R),
                    (B::LightsAabb(LightType::Point), W),
                    (B::LightsAabb(LightType::Spot), W),
                ]);
            }
            Self::ReduceLightsAabbFirst => {
                res.extend([
                    (B::Uniforms, R),
                    (B::LightsAabb(LightType::Point), R),
                    (B::LightsAabb(LightType::Spot), R),
                    (B::ReducePartials, W),
                ]);
            }
            Self::ReduceLightsAabbSecond => {
                res.extend([(B::Uniforms, R), (B::ReducePartials, R), (B::LightsData, W)]);
            }
            Self::MortonCodes { light_type, output } => {
                res.extend([
                    (B::Uniforms, R),
                    (B::LightsData, R),
                    (B::LightsAabb(light_type), R),
                    (B::MortonCodes(light_type, output), W),
                    (B::LightIndices(light_type, output), W),
                ]);
            }
            Self::RadixSort { light_type, input } => {
                let output = input.other();
                res.extend([
                    (B::MortonCodes(light_type, input), R),
                    (B::LightIndices(light_type, input), R),
                    (B::MortonCodes(light_type, output), W),
                    (B::LightIndices(light_type, output), W),
                ]);
            }
            Self::BitonicSort { light_type, slot } => {
                res.extend([
                    (B::MortonCodes(light_type, slot), RW),
                    (B::LightIndices(light_type, slot), RW),
                ]);
            }
            Self::MergePathPartitions { light_type, input } => {
                res.extend([
                    (B::MortonCodes(light_type, input), R),
                    (B::MergePartitions(light_type), W),
                ]);
            }
            Self::MergeSort { light_type, input } => {
                let output = input.other();
                res.extend([
                    (B::MortonCodes(light_type, input), R),
                    (B::LightIndices(light_type, input), R),
                    (B::MergePartitions(light_type), R),
                    (B::MortonCodes(light_type, output), W),
                    (B::LightIndices(light_type, output), W),
                ]);
            }
            Self::BvhBottom { light_type, indices } => {
                res.extend([(B::Uniforms, R), (B::LightsAabb(light_type), R)]);
                if let Some(slot) = indices {
                    res.push((B::LightIndices(light_type, slot), R));
                }
                res.push((B::Bvh(light_type), W));
            }
            Self::BvhTop { light_type } => {
                res.push((B::Bvh(light_type), RW));
            }
            Self::ClustersMask => {
                res.extend([(B::Uniforms, R), (B::DepthSamples, R), (B::ClustersMask, W)]);
            }
            Self::FindUniqueClusters => {
                res.extend([
                    (B::Uniforms, R),
                    (B::ClustersMask, R),
                    (B::UniqueClusters, W),
                    (B::ClustersIndirect, RW),
                ]);
            }
            Self::AssignLights {
                light_type,
                indices,
                bvh,
                masked,
            } => {
                res.extend([
                    (B::Uniforms, R),
                    (B::LightsData, R),
                    (B::ClustersAabb, R),
                    (B::Lights(light_type), R),
                    (B::LightsAabb(light_type), R),
                ]);
                if let Some(slot) = indices {
                    res.push((B::LightIndices(light_type, slot), R));
                }
                if bvh {
                    res.push((B::Bvh(light_type), R));
                }
                if masked {
                    res.push((B::UniqueClusters, R));
                }
                res.extend([
                    (B::LightCounters, RW),
                    (B::LightGrid(light_type), W),
                    (B::ClusterLightIndices(light_type), W),
                ]);
            }
            Self::SortAssignedLights { light_type, masked } => {
                res.extend([
                    (B::Uniforms, R),
                    (B::LightGrid(light_type), R),
                    (B::ClusterLightIndices(light_type), RW),
                ]);
                if masked {
                    res.push((B::UniqueClusters, R));
                }
            }
        }
        res
    }
}

/// Up to two words of push constants.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PushConstants {
    words: [u32; 2],
    len: usize,
}

impl PushConstants {
    pub fn one(word: u32) -> Self {
        Self { words: [word, 0], len: 1 }
    }

    pub fn two(first: u32, second: u32) -> Self {
        Self {
            words: [first, second],
            len: 2,
        }
    }

    pub fn words(&self) -> &[u32] {
        &self.words[..self.len]
    }

    pub fn word(&self, index: usize) -> u32 {
        self.words()[index]
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.words())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DispatchGroups {
    Direct([u32; 3]),
    /// Arguments are read from the buffer on the device.
    Indirect(BufferId),
}

impl DispatchGroups {
    /// `count` groups along x. Counts past [`limits::MAX_DISPATCH_GROUPS`]
    /// fold into y, kernels then derive their linear index from both.
    pub fn linear(count: u32) -> Self {
        use limits::MAX_DISPATCH_GROUPS;

        if count <= MAX_DISPATCH_GROUPS {
            Self::Direct([count, 1, 1])
        } else {
            Self::Direct([MAX_DISPATCH_GROUPS, round_up_div(count, MAX_DISPATCH_GROUPS), 1])
        }
    }

    /// Total groups of a direct dispatch.
    pub fn group_count(&self) -> Option<u32> {
        match *self {
            Self::Direct([x, y, z]) => Some(x * y * z),
            Self::Indirect(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStep {
    Dispatch {
        kernel: Kernel,
        groups: DispatchGroups,
        push_constants: Option<PushConstants>,
    },
    /// Makes writes of the previous steps visible to the next ones.
    Barrier,
    /// Zeroes the buffer.
    Clear(BufferId),
}

/// Everything a pass records, in order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchParams {
    pub steps: Vec<DispatchStep>,
}

impl DispatchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&mut self, kernel: Kernel, groups: DispatchGroups, push_constants: Option<PushConstants>) {
        self.steps.push(DispatchStep::Dispatch {
            kernel,
            groups,
            push_constants,
        });
    }

    pub fn barrier(&mut self) {
        self.steps.push(DispatchStep::Barrier);
    }

    pub fn clear(&mut self, buffer: BufferId) {
        self.steps.push(DispatchStep::Clear(buffer));
    }

    pub fn extend(&mut self, other: DispatchParams) {
        self.steps.extend(other.steps);
    }

    /// Union of the buffers touched by every step. A buffer read by one step
    /// and written by another is reported as read-write.
    pub fn resources(&self) -> Vec<(BufferId, ResourceUsage)> {
        let mut out: Vec<(BufferId, ResourceUsage)> = Vec::new();
        let mut add = |buffer: BufferId, usage: ResourceUsage| match out.iter_mut().find(|(b, _)| *b == buffer) {
            Some((_, existing)) if *existing != usage => *existing = ResourceUsage::InputOutput,
            Some(_) => {}
            None => out.push((buffer, usage)),
        };
        for step in &self.steps {
            match step {
                DispatchStep::Dispatch { kernel, groups, .. } => {
                    for (buffer, usage) in kernel.resources() {
                        add(buffer, usage);
                    }
                    if let DispatchGroups::Indirect(buffer) = groups {
                        add(*buffer, ResourceUsage::Input);
                    }
                }
                DispatchStep::Clear(buffer) => add(*buffer, ResourceUsage::Output),
                DispatchStep::Barrier => {}
            }
        }
        out
    }

    pub fn dispatch_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| matches!(step, DispatchStep::Dispatch { .. }))
            .count()
    }
}
