use std::sync::Arc;

use bytemuck::Pod;
use lightgrid::{
    format_sso,
    pass::{BufferId, DispatchGroups, Kernel, PushConstants},
    types::{Camera, ClustersConfig, DepthSamples, LightSet, LightType},
    util::{math::round_up_pot, typedefs::FastHashMap},
    ClusterBackend, ClustersInitializationError, FrameState, FrustumClusters, GraphStats, PassExecutor, PassTimer,
    ShaderPreProcessor,
};
use thiserror::Error;
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, Buffer, BufferAddress, BufferDescriptor, BufferUsages,
    CommandEncoder, CommandEncoderDescriptor, ComputePassDescriptor, Device, Maintain, MapMode, Queue,
};

use crate::{
    buffers::GpuBuffers,
    pipelines::{all_kernels, ClusterPipelines},
    shaders::{builtin_shaders, ShaderSettings},
};

/// Failure to copy a culling buffer back to the host.
#[derive(Debug, Error)]
pub enum ReadBackError {
    #[error("Reading {requested} bytes of {buffer:?} which only holds {size}")]
    OutOfBounds {
        buffer: BufferId,
        requested: BufferAddress,
        size: BufferAddress,
    },
    #[error("Failed to map the read back buffer")]
    Map(#[from] wgpu::BufferAsyncError),
    #[error("The device dropped the map callback")]
    CallbackDropped,
}

/// GPU backend of [`FrustumClusters`].
///
/// Owns every buffer, pipeline and bind group of the culling. Bind groups are
/// built once per buffer allocation, for every kernel variant, so recording a
/// frame never creates device objects.
pub struct GpuClusters {
    device: Arc<Device>,
    queue: Arc<Queue>,
    spp: ShaderPreProcessor,
    pipelines: ClusterPipelines,
    buffers: GpuBuffers,
    bind_groups: FastHashMap<Kernel, BindGroup>,
    bind_groups_dirty: bool,
    frame: Option<FrameState>,
}

impl GpuClusters {
    pub fn new(device: Arc<Device>, queue: Arc<Queue>, config: &ClustersConfig) -> Result<Self, ClustersInitializationError> {
        let mut spp = ShaderPreProcessor::new();
        builtin_shaders(&mut spp);
        Self::with_shaders(device, queue, spp, config)
    }

    /// Uses the shaders registered in `spp`, which allows overriding the
    /// builtin kernels.
    pub fn with_shaders(
        device: Arc<Device>,
        queue: Arc<Queue>,
        spp: ShaderPreProcessor,
        config: &ClustersConfig,
    ) -> Result<Self, ClustersInitializationError> {
        profiling::scope!("GpuClusters::new");

        config.validate()?;
        let pipelines = ClusterPipelines::new(&device, &spp, ShaderSettings::new(config))?;
        let buffers = GpuBuffers::new(&device);

        Ok(Self {
            device,
            queue,
            spp,
            pipelines,
            buffers,
            bind_groups: FastHashMap::default(),
            bind_groups_dirty: true,
            frame: None,
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// The frame last prepared.
    pub fn frame(&self) -> Option<&FrameState> {
        self.frame.as_ref()
    }

    /// Buffers are recreated when they grow, so the returned buffer is only
    /// valid until the next [`ClusterBackend::prepare`].
    pub fn buffer(&self, buffer: BufferId) -> Option<&Buffer> {
        self.buffers.get(buffer).map(|b| &**b)
    }

    pub fn light_grid(&self, ty: LightType) -> Option<&Buffer> {
        self.buffer(BufferId::LightGrid(ty))
    }

    pub fn cluster_light_indices(&self, ty: LightType) -> Option<&Buffer> {
        self.buffer(BufferId::ClusterLightIndices(ty))
    }

    /// Records the work of a [`lightgrid::PassGraph`] into `encoder`.
    pub fn executor<'a>(&'a self, encoder: &'a mut CommandEncoder) -> GpuExecutor<'a> {
        GpuExecutor { clusters: self, encoder }
    }

    fn create_bind_groups(&mut self) {
        profiling::scope!("GpuClusters::create_bind_groups");

        self.bind_groups.clear();
        for kernel in all_kernels() {
            let Some(pipeline) = self.pipelines.get(&kernel) else {
                continue;
            };
            let entries: Vec<BindGroupEntry<'_>> = kernel
                .resources()
                .into_iter()
                .enumerate()
                .filter_map(|(binding, (buffer, _))| {
                    Some(BindGroupEntry {
                        binding: binding as u32,
                        resource: self.buffers.get(buffer)?.as_entire_binding(),
                    })
                })
                .collect();
            let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
                label: Some(&format_sso!("lightgrid {kernel:?} BG")),
                layout: &pipeline.bgl,
                entries: &entries,
            });
            self.bind_groups.insert(kernel, bind_group);
        }
        log::trace!("Created {} culling bind groups", self.bind_groups.len());
    }

    fn write<T: Pod>(&self, buffer: BufferId, data: &[T]) {
        if data.is_empty() {
            return;
        }
        if let Some(dst) = self.buffers.get(buffer) {
            self.queue.write_buffer(dst, 0, bytemuck::cast_slice(data));
        }
    }

    /// Copies the first `len` elements of `buffer` back to the host. Submits
    /// its own copy and blocks on the device until it is done.
    pub async fn read_back<T: Pod>(&self, buffer: BufferId, len: usize) -> Result<Vec<T>, ReadBackError> {
        profiling::scope!("GpuClusters::read_back");

        let element_size = std::mem::size_of::<T>();
        let requested = (len * element_size) as BufferAddress;
        if requested == 0 {
            return Ok(Vec::new());
        }
        let size = round_up_pot(requested, wgpu::COPY_BUFFER_ALIGNMENT);
        let source = self.buffers.get(buffer).ok_or(ReadBackError::OutOfBounds {
            buffer,
            requested,
            size: 0,
        })?;
        if size > source.size() {
            return Err(ReadBackError::OutOfBounds {
                buffer,
                requested,
                size: source.size(),
            });
        }

        let staging = self.device.create_buffer(&BufferDescriptor {
            label: Some("lightgrid read back"),
            size,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("lightgrid read back"),
        });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        let submit_index = self.queue.submit(Some(encoder.finish()));

        let (sender, receiver) = flume::bounded(1);
        staging.slice(..).map_async(MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(Maintain::WaitForSubmissionIndex(submit_index));

        receiver
            .recv_async()
            .await
            .map_err(|_| ReadBackError::CallbackDropped)??;

        let out = {
            let mapping = staging.slice(..).get_mapped_range();
            mapping[..requested as usize]
                .chunks_exact(element_size)
                .map(bytemuck::pod_read_unaligned)
                .collect()
        };
        staging.unmap();

        Ok(out)
    }
}

impl ClusterBackend for GpuClusters {
    type Error = ClustersInitializationError;

    fn prepare(
        &mut self,
        frame: &FrameState,
        lights: &LightSet,
        depth: Option<&DepthSamples>,
    ) -> Result<(), ClustersInitializationError> {
        profiling::scope!("GpuClusters::prepare");

        let settings = ShaderSettings::new(&frame.config);
        if *self.pipelines.settings() != settings {
            log::debug!("Rebuilding culling pipelines for {settings:?}");
            self.pipelines = ClusterPipelines::new(&self.device, &self.spp, settings)?;
            self.bind_groups_dirty = true;
        }

        if self.buffers.grow(&self.device, frame) {
            self.bind_groups_dirty = true;
        }
        if self.bind_groups_dirty {
            self.create_bind_groups();
            self.bind_groups_dirty = false;
        }

        let uniform = frame
            .uniform
            .to_bytes()
            .map_err(ClustersInitializationError::UniformSerialization)?;
        self.write(BufferId::Uniforms, &uniform);

        if frame.lights_dirty {
            let points = frame.light_count(LightType::Point) as usize;
            let spots = frame.light_count(LightType::Spot) as usize;
            self.write(BufferId::Lights(LightType::Point), &lights.points()[..points]);
            self.write(BufferId::Lights(LightType::Spot), &lights.spots()[..spots]);
        }

        if frame.masked() {
            if let Some(depth) = depth {
                self.write(BufferId::DepthSamples, &depth.view_depths);
            }
        }

        self.frame = Some(frame.clone());
        Ok(())
    }
}

/// [`PassExecutor`] recording into a command encoder.
///
/// Every dispatch gets its own compute pass, wgpu orders them, so barriers
/// need no work.
pub struct GpuExecutor<'a> {
    clusters: &'a GpuClusters,
    encoder: &'a mut CommandEncoder,
}

impl PassExecutor for GpuExecutor<'_> {
    fn barrier(&mut self) {}

    fn clear(&mut self, buffer: BufferId) {
        if let Some(buffer) = self.clusters.buffers.get(buffer) {
            self.encoder.clear_buffer(buffer, 0, None);
        }
    }

    fn dispatch(&mut self, kernel: &Kernel, groups: &DispatchGroups, push_constants: Option<&PushConstants>) {
        let clusters = self.clusters;
        let (Some(pipeline), Some(bind_group)) = (clusters.pipelines.get(kernel), clusters.bind_groups.get(kernel))
        else {
            log::error!("Culling kernel {kernel:?} has no pipeline or bind group, skipping it");
            return;
        };

        let mut cpass = self.encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some(kernel.name()),
            timestamp_writes: None,
        });
        cpass.set_pipeline(&pipeline.pipeline);
        cpass.set_bind_group(0, bind_group, &[]);
        if let Some(push_constants) = push_constants {
            cpass.set_push_constants(0, push_constants.as_bytes());
        }
        match *groups {
            DispatchGroups::Direct([x, y, z]) => {
                if x * y * z != 0 {
                    cpass.dispatch_workgroups(x, y, z);
                }
            }
            DispatchGroups::Indirect(args) => match clusters.buffers.get(args) {
                Some(args) => cpass.dispatch_workgroups_indirect(args, 0),
                None => log::error!("Missing indirect arguments {args:?} of {kernel:?}"),
            },
        }
    }
}

/// Runs the culling of one frame: uploads the frame's data, then records its
/// passes into `encoder`. The caller submits the encoder.
pub fn encode_frame(
    clusters: &mut FrustumClusters<GpuClusters>,
    camera: &Camera,
    lights: &LightSet,
    depth: Option<&DepthSamples>,
    encoder: &mut CommandEncoder,
    timer: Option<&mut dyn PassTimer>,
) -> Result<(FrameState, GraphStats), ClustersInitializationError> {
    profiling::scope!("encode_frame");

    let frame = clusters.update(camera, lights, depth)?;
    let graph = clusters.build_graph(&frame);
    let mut executor = clusters.backend().executor(encoder);
    let stats = graph.execute(&mut executor, timer);
    Ok((frame, stats))
}
