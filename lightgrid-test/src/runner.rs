use anyhow::{ensure, Context, Result};
use lightgrid::{
    cpu::CpuClusters,
    pass::BufferId,
    ping_pong::Slot,
    types::{Camera, ClusterLightRange, ClustersConfig, DepthSamples, LightSet, LightType},
    FrameState, FrustumClusters, GraphStats, InstanceAdapterDevice,
};
use lightgrid_routine::{encode_frame, GpuClusters};

#[derive(Default)]
pub struct TestRunnerBuilder {
    config: Option<ClustersConfig>,
    iad: Option<InstanceAdapterDevice>,
}

impl TestRunnerBuilder {
    pub fn new() -> Self {
        TestRunnerBuilder::default()
    }

    pub fn config(mut self, config: ClustersConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn iad(mut self, iad: InstanceAdapterDevice) -> Self {
        self.iad = Some(iad);
        self
    }

    pub async fn build(self) -> Result<TestRunner> {
        let _ = env_logger::builder().is_test(true).try_init();

        let iad = match self.iad {
            Some(iad) => iad,
            None => lightgrid::create_iad(None, None)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))
            .context("InstanceAdapterDevice creation failed")?,
        };
        let config = self.config.unwrap_or_default();

        let gpu = GpuClusters::new(iad.device.clone(), iad.queue.clone(), &config)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("GPU culling initialization failed")?;
        let clusters = FrustumClusters::new(config.clone(), gpu).context("Invalid culling config")?;
        let cpu = FrustumClusters::new(config, CpuClusters::new()).context("Invalid culling config")?;

        Ok(TestRunner { iad, clusters, cpu })
    }
}

/// Runs the GPU culling next to the CPU reference.
pub struct TestRunner {
    pub iad: InstanceAdapterDevice,
    pub clusters: FrustumClusters<GpuClusters>,
    pub cpu: FrustumClusters<CpuClusters>,
}

impl TestRunner {
    pub fn builder() -> TestRunnerBuilder {
        TestRunnerBuilder::new()
    }

    pub fn gpu(&self) -> &GpuClusters {
        self.clusters.backend()
    }

    /// Runs one frame on both backends and waits for the GPU to finish.
    pub fn run_frame(
        &mut self,
        camera: &Camera,
        lights: &LightSet,
        depth: Option<&DepthSamples>,
    ) -> Result<(FrameState, GraphStats)> {
        let mut encoder = self
            .iad
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Test culling encoder"),
            });
        let (frame, stats) = encode_frame(&mut self.clusters, camera, lights, depth, &mut encoder, None)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("Failed to encode the culling")?;
        let submit_index = self.iad.queue.submit(Some(encoder.finish()));
        self.iad
            .device
            .poll(wgpu::Maintain::WaitForSubmissionIndex(submit_index));

        let (cpu_frame, cpu_stats) = self.cpu.run_frame(camera, lights, depth);
        ensure!(
            cpu_frame.index == frame.index && cpu_stats.executed == stats.executed,
            "Backends scheduled different passes: {:?} vs {:?}",
            stats.executed,
            cpu_stats.executed
        );

        Ok((frame, stats))
    }

    pub async fn gpu_contents(&self, frame: &FrameState) -> Result<ClusterContents> {
        let clusters = frame.grid.cluster_count() as usize;
        let mut contents = ClusterContents::default();
        for ty in LightType::ARRAY {
            let grid: Vec<ClusterLightRange> = self
                .gpu()
                .read_back(BufferId::LightGrid(ty), clusters)
                .await
                .with_context(|| format!("Failed to read the {} light grid", ty.name()))?;
            let total = grid.iter().map(|r| r.offset + r.count).max().unwrap_or(0) as usize;
            contents.indices[ty.index()] = self
                .gpu()
                .read_back(BufferId::ClusterLightIndices(ty), total)
                .await
                .with_context(|| format!("Failed to read the {} cluster light indices", ty.name()))?;
            contents.grid[ty.index()] = grid;
        }
        Ok(contents)
    }

    pub fn cpu_contents(&self) -> ClusterContents {
        let cpu = self.cpu.backend();
        ClusterContents {
            grid: LightType::ARRAY.map(|ty| cpu.light_grid(ty).to_vec()),
            indices: LightType::ARRAY.map(|ty| cpu.cluster_light_indices(ty).to_vec()),
        }
    }

    /// Sorted morton codes and light indices of `ty`.
    pub async fn gpu_sorted(&self, frame: &FrameState, ty: LightType) -> Result<(Vec<u32>, Vec<u32>)> {
        let slot: Slot = frame.sorted[ty.index()];
        let count = frame.light_count(ty) as usize;
        let codes = self
            .gpu()
            .read_back(BufferId::MortonCodes(ty, slot), count)
            .await
            .context("Failed to read the morton codes")?;
        let indices = self
            .gpu()
            .read_back(BufferId::LightIndices(ty, slot), count)
            .await
            .context("Failed to read the light indices")?;
        Ok((codes, indices))
    }

    /// Unique clusters listed by the GPU, in list order.
    pub async fn gpu_unique_clusters(&self, frame: &FrameState) -> Result<Vec<u32>> {
        let args: Vec<u32> = self
            .gpu()
            .read_back(BufferId::ClustersIndirect, 3)
            .await
            .context("Failed to read the indirect arguments")?;
        ensure!(args[1] == 1 && args[2] == 1, "Bad indirect arguments {args:?}");
        let count = (args[0] as usize).min(frame.grid.cluster_count() as usize);
        Ok(self
            .gpu()
            .read_back(BufferId::UniqueClusters, count)
            .await
            .context("Failed to read the unique clusters")?)
    }
}

/// Light grids and index lists of both light types, as read from a backend.
#[derive(Debug, Default, Clone)]
pub struct ClusterContents {
    pub grid: [Vec<ClusterLightRange>; 2],
    pub indices: [Vec<u32>; 2],
}

impl ClusterContents {
    pub fn cluster_lights(&self, ty: LightType, cluster: usize) -> &[u32] {
        let range = self.grid[ty.index()][cluster];
        &self.indices[ty.index()][range.offset as usize..(range.offset + range.count) as usize]
    }

    pub fn cluster_count(&self) -> usize {
        self.grid[0].len()
    }
}
