//! Device buffers of the culling. Buffers only ever grow, so a frame with
//! fewer lights or clusters reuses the allocation of a larger one.

use encase::ShaderType;
use lightgrid::{
    bvh,
    pass::{
        limits::{MAX_CLUSTER_LIGHT_INDICES, REDUCE_MAX_GROUPS},
        BufferId,
    },
    ping_pong::Slot,
    sort::merge_partition_capacity,
    types::{Aabb, ClusterLightRange, LightType, LightsData, PointLight, SpotLight},
    uniforms::ClustersUniform,
    util::{math::round_up_pot, typedefs::FastHashMap},
    FrameState,
};
use wgpu::{Buffer, BufferAddress, BufferDescriptor, BufferUsages, Device};

/// Smallest allocation. Holds one element of every array a kernel binds.
const MINIMUM_SIZE: BufferAddress = 64;

pub struct GrowableBuffer {
    inner: Buffer,
    size: BufferAddress,
    usage: BufferUsages,
    label: String,
}

impl GrowableBuffer {
    pub fn new(device: &Device, size: BufferAddress, usage: BufferUsages, label: String) -> Self {
        let size = round_up_pot(size.max(MINIMUM_SIZE), 4).next_power_of_two();
        Self {
            inner: device.create_buffer(&BufferDescriptor {
                label: Some(&label),
                size,
                usage,
                mapped_at_creation: false,
            }),
            size,
            usage,
            label,
        }
    }

    pub fn size(&self) -> BufferAddress {
        self.size
    }

    /// Determines if the buffer will resize given the desired size.
    pub fn will_resize(&self, desired: BufferAddress) -> Option<BufferAddress> {
        will_resize_inner(self.size, desired)
    }

    /// Recreates the buffer when it is smaller than `desired`. The contents
    /// are lost in that case, and `true` is returned.
    pub fn ensure_size(&mut self, device: &Device, desired: BufferAddress) -> bool {
        let Some(size) = self.will_resize(desired) else {
            return false;
        };
        log::debug!("Growing {} from {} to {} bytes", self.label, self.size, size);
        self.size = size;
        self.inner = device.create_buffer(&BufferDescriptor {
            label: Some(&self.label),
            size,
            usage: self.usage,
            mapped_at_creation: false,
        });
        true
    }
}

impl std::ops::Deref for GrowableBuffer {
    type Target = Buffer;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

fn will_resize_inner(current: BufferAddress, desired: BufferAddress) -> Option<BufferAddress> {
    debug_assert!(current.is_power_of_two());
    if desired <= current {
        None
    } else {
        Some(desired.next_power_of_two())
    }
}

/// Every buffer a kernel can bind.
pub fn all_buffers() -> Vec<BufferId> {
    let mut out = vec![
        BufferId::Uniforms,
        BufferId::ClustersAabb,
        BufferId::ReducePartials,
        BufferId::LightsData,
        BufferId::DepthSamples,
        BufferId::ClustersMask,
        BufferId::UniqueClusters,
        BufferId::ClustersIndirect,
        BufferId::LightCounters,
    ];
    for ty in LightType::ARRAY {
        out.extend([
            BufferId::Lights(ty),
            BufferId::LightsAabb(ty),
            BufferId::MergePartitions(ty),
            BufferId::Bvh(ty),
            BufferId::LightGrid(ty),
            BufferId::ClusterLightIndices(ty),
        ]);
        for slot in Slot::ARRAY {
            out.extend([BufferId::MortonCodes(ty, slot), BufferId::LightIndices(ty, slot)]);
        }
    }
    out
}

fn usage(buffer: BufferId) -> BufferUsages {
    match buffer {
        BufferId::Uniforms => BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        BufferId::ClustersIndirect => {
            BufferUsages::STORAGE | BufferUsages::INDIRECT | BufferUsages::COPY_DST | BufferUsages::COPY_SRC
        }
        _ => BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
    }
}

fn size_of<T>(count: u32) -> BufferAddress {
    std::mem::size_of::<T>() as BufferAddress * count as BufferAddress
}

/// Bytes `buffer` needs to hold everything `frame` writes to it.
pub fn required_size(buffer: BufferId, frame: &FrameState) -> BufferAddress {
    let clusters = frame.grid.cluster_count();
    let count = |ty: LightType| frame.light_count(ty);
    match buffer {
        BufferId::Uniforms => ClustersUniform::min_size().get(),
        BufferId::ClustersAabb => size_of::<Aabb>(clusters),
        BufferId::Lights(LightType::Point) => size_of::<PointLight>(count(LightType::Point)),
        BufferId::Lights(LightType::Spot) => size_of::<SpotLight>(count(LightType::Spot)),
        BufferId::LightsAabb(ty) => size_of::<Aabb>(count(ty)),
        BufferId::ReducePartials => size_of::<Aabb>(REDUCE_MAX_GROUPS),
        BufferId::LightsData => size_of::<LightsData>(1),
        BufferId::MortonCodes(ty, _) | BufferId::LightIndices(ty, _) => size_of::<u32>(count(ty)),
        BufferId::MergePartitions(ty) => size_of::<u32>(merge_partition_capacity(count(ty))),
        BufferId::Bvh(ty) => size_of::<Aabb>(bvh::num_nodes(count(ty))),
        BufferId::DepthSamples => size_of::<f32>(frame.depth_size.x * frame.depth_size.y),
        BufferId::ClustersMask | BufferId::UniqueClusters => size_of::<u32>(clusters),
        BufferId::ClustersIndirect => size_of::<u32>(3),
        BufferId::LightCounters => size_of::<u32>(2),
        BufferId::LightGrid(_) => size_of::<ClusterLightRange>(clusters),
        BufferId::ClusterLightIndices(ty) => {
            let per_cluster = frame.config.max_lights_per_cluster.min(count(ty));
            size_of::<u32>(clusters.saturating_mul(per_cluster).min(MAX_CLUSTER_LIGHT_INDICES))
        }
    }
}

pub struct GpuBuffers {
    buffers: FastHashMap<BufferId, GrowableBuffer>,
}

impl GpuBuffers {
    pub fn new(device: &Device) -> Self {
        let buffers = all_buffers()
            .into_iter()
            .map(|id| {
                let buffer = GrowableBuffer::new(device, MINIMUM_SIZE, usage(id), format!("lightgrid {id:?}"));
                (id, buffer)
            })
            .collect();
        Self { buffers }
    }

    /// Grows every buffer to fit `frame`. Returns true if any buffer was
    /// recreated, which invalidates the bind groups using it.
    pub fn grow(&mut self, device: &Device, frame: &FrameState) -> bool {
        profiling::scope!("GpuBuffers::grow");

        let mut recreated = false;
        for (&id, buffer) in &mut self.buffers {
            recreated |= buffer.ensure_size(device, required_size(id, frame));
        }
        recreated
    }

    pub fn get(&self, buffer: BufferId) -> Option<&GrowableBuffer> {
        self.buffers.get(&buffer)
    }
}
