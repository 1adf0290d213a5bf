//! wgpu backend of the lightgrid culling.
//!
//! [`GpuClusters`] plugs into [`lightgrid::FrustumClusters`] and runs every
//! pass of the graph as a compute kernel. Kernels are WGSL templates rendered
//! per light type and configuration.

pub mod buffers;
mod clusters;
pub mod pipelines;
pub mod shaders;

pub use clusters::*;
