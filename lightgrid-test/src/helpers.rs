use anyhow::{ensure, Result};
use glam::{Mat4, UVec2, Vec3};
use lightgrid::types::{Camera, CameraProjection, LightSet, LightType, PointLight, SpotLight};

use crate::ClusterContents;

/// Xorshift generator, so scenes are the same on every run.
pub struct Rng(u32);

impl Rng {
    pub fn new(seed: u32) -> Self {
        Self(seed.wrapping_mul(0x9E37_79B9) | 1)
    }

    pub fn next(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    pub fn range(&mut self, lo: f32, hi: f32) -> f32 {
        lo + (hi - lo) * ((self.next() >> 8) as f32 / (1u32 << 24) as f32)
    }
}

pub fn test_camera() -> Camera {
    Camera {
        projection: CameraProjection {
            vfov: 60.0,
            near: 0.5,
            far: 80.0,
        },
        view: Mat4::IDENTITY,
        viewport: UVec2::new(640, 360),
    }
}

/// Lights scattered in front of [`test_camera`].
pub fn random_lights(seed: u32, points: usize, spots: usize) -> LightSet {
    let mut rng = Rng::new(seed);
    let position = |rng: &mut Rng| {
        Vec3::new(
            rng.range(-30.0, 30.0),
            rng.range(-18.0, 18.0),
            rng.range(-75.0, -1.0),
        )
    };
    let mut lights = LightSet::new();
    for _ in 0..points {
        let pos = position(&mut rng);
        lights.add_point(PointLight::new(pos, rng.range(0.5, 4.0)));
    }
    for _ in 0..spots {
        let pos = position(&mut rng);
        let dir = Vec3::new(rng.range(-1.0, 1.0), rng.range(-1.0, 1.0), rng.range(-1.0, 1.0) + 0.01);
        let range = rng.range(1.0, 6.0);
        let angle = rng.range(0.2, 1.2);
        lights.add_spot(SpotLight::new(pos, dir, range, angle));
    }
    lights
}

/// Compares the light list of every cluster as a set. Lights sitting right
/// on a cluster boundary can land on either side depending on float
/// precision, so up to `tolerance` of the clusters may differ.
pub fn compare_contents(gpu: &ClusterContents, cpu: &ClusterContents, tolerance: f32) -> Result<()> {
    ensure!(
        gpu.cluster_count() == cpu.cluster_count(),
        "GPU has {} clusters, CPU has {}",
        gpu.cluster_count(),
        cpu.cluster_count()
    );

    let clusters = cpu.cluster_count();
    for ty in LightType::ARRAY {
        let mut mismatched = 0;
        let mut assigned = 0;
        for cluster in 0..clusters {
            let mut gpu_lights = gpu.cluster_lights(ty, cluster).to_vec();
            let mut cpu_lights = cpu.cluster_lights(ty, cluster).to_vec();
            assigned += cpu_lights.len();
            gpu_lights.sort_unstable();
            cpu_lights.sort_unstable();
            if gpu_lights != cpu_lights {
                log::debug!("{} cluster {cluster}: GPU {gpu_lights:?}, CPU {cpu_lights:?}", ty.name());
                mismatched += 1;
            }
        }

        let allowed = (clusters as f32 * tolerance).ceil() as usize;
        ensure!(
            mismatched <= allowed,
            "{} of {clusters} clusters have different {} lights (allowed {allowed})",
            mismatched,
            ty.name()
        );
        log::info!(
            "{}: {assigned} assignments, {mismatched} of {clusters} clusters differ",
            ty.name()
        );
    }
    Ok(())
}

/// Share of clusters allowed to differ in [`compare_contents`].
pub const TOLERANCE: f32 = 0.01;
