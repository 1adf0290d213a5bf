//! Clustered light culling.
//!
//! The view frustum is split into a grid of clusters, and every frame each
//! cluster gets the list of point and spot lights touching it. The work is
//! expressed as a graph of compute passes ([`clusters::PassKind`]) whose
//! dispatches are plain data, so the same schedule runs on the GPU
//! (`lightgrid-routine`) and on the CPU reference backend ([`cpu`]).
//!
//! A frame looks like:
//!
//! ```no_run
//! # use lightgrid::{cpu::CpuClusters, FrustumClusters, types::*};
//! let mut clusters = FrustumClusters::new(ClustersConfig::default(), CpuClusters::new()).unwrap();
//! let mut lights = LightSet::new();
//! lights.add_point(PointLight::new(glam::Vec3::new(0.0, 0.0, -5.0), 2.0));
//!
//! let (frame, _stats) = clusters.run_frame(&Camera::default(), &lights, None);
//! let lights_of_first_cluster = clusters.backend().cluster_lights(LightType::Point, 0);
//! ```

pub mod bvh;
pub mod clusters;
pub mod cpu;
mod error;
pub mod graph;
pub mod grid;
pub mod morton;
pub mod pass;
pub mod ping_pong;
mod setup;
mod shader;
pub mod sort;
pub mod uniforms;
pub mod util;
pub mod volumes;

pub use clusters::{build_graph, ClusterBackend, FrameState, FrustumClusters, PassKind};
pub use error::*;
pub use graph::{GraphStats, PassExecutor, PassGraph, PassTimer};
pub use grid::ClusterGrid;
pub use setup::*;
pub use shader::ShaderPreProcessor;

/// Reexport of [`lightgrid_types`] with glam.
pub mod types {
    pub use glam;
    pub use lightgrid_types::*;
}
