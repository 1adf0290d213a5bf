use lightgrid_types::ClustersConfigError;
use thiserror::Error;
use wgpu::Features;

use crate::util::typedefs::SsoString;

/// Enum mapping to each of a device's limit the culling depends on.
#[derive(Debug)]
pub enum LimitType {
    PushConstantSize,
    StorageBuffersPerShaderStage,
    StorageBufferBindingSize,
    ComputeWorkgroupStorageSize,
    ComputeInvocationsPerWorkgroup,
    ComputeWorkgroupSizeX,
    ComputeWorkgroupsPerDimension,
}

/// Reason why the culling failed to initialize.
#[derive(Error, Debug)]
pub enum ClustersInitializationError {
    #[error("No supported adapter found")]
    MissingAdapter,
    #[error("The device limit of {:?} is {} but the culling requires at least {}", ty, device_limit, required_limit)]
    LowDeviceLimit {
        ty: LimitType,
        device_limit: u32,
        required_limit: u32,
    },
    #[error("Device is missing required features: {:?}", features)]
    MissingDeviceFeatures { features: Features },
    #[error("Requesting a device failed")]
    RequestDeviceFailed(#[source] wgpu::RequestDeviceError),
    #[error("Failed to render shader {name}")]
    ShaderRender {
        name: SsoString,
        #[source]
        source: handlebars::RenderError,
    },
    #[error("Failed to create compute pipeline {name}")]
    PipelineCreation {
        name: SsoString,
        #[source]
        source: wgpu::Error,
    },
    #[error("Failed to serialize the clusters uniform")]
    UniformSerialization(#[source] encase::internal::Error),
    #[error(transparent)]
    InvalidConfig(#[from] ClustersConfigError),
}
