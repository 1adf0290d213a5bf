//! Device creation and the features and limits the culling kernels need.

use std::sync::Arc;

use arrayvec::ArrayVec;
use wgpu::{
    Adapter, AdapterInfo, Backend, Backends, Device, DeviceDescriptor, DeviceType, Features, Instance,
    InstanceDescriptor, Limits, Queue,
};

use crate::{
    error::{ClustersInitializationError, LimitType},
    pass::limits::{
        ASSIGN_BVH_STACK_SIZE, BITONIC_MAX_ELEMENTS, MAX_DISPATCH_GROUPS, MAX_STORAGE_BINDING_SIZE, REDUCE_NUM_THREADS,
    },
    util::typedefs::FastHashMap,
};

/// Features required to run the culling on the GPU.
pub const REQUIRED_FEATURES: Features = Features::PUSH_CONSTANTS;

/// Features the culling uses when they are available.
pub const OPTIONAL_FEATURES: Features = Features::TIMESTAMP_QUERY;

/// Check that all required features are present in the feature set given.
pub fn check_features(device: Features) -> Result<Features, ClustersInitializationError> {
    let missing = REQUIRED_FEATURES - device;
    if !missing.is_empty() {
        Err(ClustersInitializationError::MissingDeviceFeatures { features: missing })
    } else {
        Ok(REQUIRED_FEATURES | (OPTIONAL_FEATURES & device))
    }
}

/// Size of the largest workgroup shared array: the bitonic sort's pairs.
const WORKGROUP_STORAGE_SIZE: u32 = {
    let bitonic = BITONIC_MAX_ELEMENTS * 8;
    let reduce = REDUCE_NUM_THREADS * 32;
    let assign = (ASSIGN_BVH_STACK_SIZE + lightgrid_types::MAX_LIGHTS_PER_CLUSTER_LIMIT) * 4;
    let max = if bitonic > reduce { bitonic } else { reduce };
    if max > assign {
        max
    } else {
        assign
    }
};

/// Limits required to run the culling on the GPU.
pub fn required_limits() -> Limits {
    Limits {
        max_push_constant_size: 8,
        // Light assignment with sorted lights, a BVH and a cluster mask.
        max_storage_buffers_per_shader_stage: 10,
        max_storage_buffer_binding_size: MAX_STORAGE_BINDING_SIZE,
        max_compute_workgroup_storage_size: WORKGROUP_STORAGE_SIZE,
        max_compute_invocations_per_workgroup: 256,
        max_compute_workgroup_size_x: 256,
        max_compute_workgroups_per_dimension: MAX_DISPATCH_GROUPS,
        ..Limits::downlevel_defaults()
    }
}

fn check_limit(device_limit: u32, required_limit: u32, ty: LimitType) -> Result<(), ClustersInitializationError> {
    if device_limit < required_limit {
        Err(ClustersInitializationError::LowDeviceLimit {
            ty,
            device_limit,
            required_limit,
        })
    } else {
        Ok(())
    }
}

/// Check that all required limits are present in the given limit set. The
/// device's own limits are requested.
pub fn check_limits(device_limits: &Limits) -> Result<Limits, ClustersInitializationError> {
    let required = required_limits();
    check_limit(
        device_limits.max_push_constant_size,
        required.max_push_constant_size,
        LimitType::PushConstantSize,
    )?;
    check_limit(
        device_limits.max_storage_buffers_per_shader_stage,
        required.max_storage_buffers_per_shader_stage,
        LimitType::StorageBuffersPerShaderStage,
    )?;
    check_limit(
        device_limits.max_storage_buffer_binding_size,
        required.max_storage_buffer_binding_size,
        LimitType::StorageBufferBindingSize,
    )?;
    check_limit(
        device_limits.max_compute_workgroup_storage_size,
        required.max_compute_workgroup_storage_size,
        LimitType::ComputeWorkgroupStorageSize,
    )?;
    check_limit(
        device_limits.max_compute_invocations_per_workgroup,
        required.max_compute_invocations_per_workgroup,
        LimitType::ComputeInvocationsPerWorkgroup,
    )?;
    check_limit(
        device_limits.max_compute_workgroup_size_x,
        required.max_compute_workgroup_size_x,
        LimitType::ComputeWorkgroupSizeX,
    )?;
    check_limit(
        device_limits.max_compute_workgroups_per_dimension,
        required.max_compute_workgroups_per_dimension,
        LimitType::ComputeWorkgroupsPerDimension,
    )?;
    Ok(device_limits.clone())
}

/// Validated set of features and limits for a given T.
pub struct PotentialAdapter<T> {
    pub inner: T,
    pub info: AdapterInfo,
    pub features: Features,
    pub limits: Limits,
}

impl<T> PotentialAdapter<T> {
    pub fn new(
        inner: T,
        info: AdapterInfo,
        inner_limits: Limits,
        inner_features: Features,
    ) -> Result<Self, ClustersInitializationError> {
        Ok(PotentialAdapter {
            inner,
            info,
            features: check_features(inner_features)?,
            limits: check_limits(&inner_limits)?,
        })
    }
}

/// Container for Instance/Adapter/Device/Queue etc.
///
/// Create these yourself, or call [`create_iad`].
#[derive(Clone)]
pub struct InstanceAdapterDevice {
    pub instance: Arc<Instance>,
    pub adapter: Arc<Adapter>,
    pub device: Arc<Device>,
    pub queue: Arc<Queue>,
    pub info: AdapterInfo,
}

/// Creates an Instance/Adapter/Device/Queue able to run the culling. Tries to
/// get the best combination.
pub async fn create_iad(
    desired_backend: Option<Backend>,
    desired_device: Option<String>,
) -> Result<InstanceAdapterDevice, ClustersInitializationError> {
    profiling::scope!("create_iad");

    let default_backend_order = [Backend::Vulkan, Backend::Metal, Backend::Dx12, Backend::Gl];

    let instance = Instance::new(InstanceDescriptor {
        backends: Backends::VULKAN | Backends::METAL | Backends::DX12 | Backends::GL,
        ..Default::default()
    });

    let mut valid_adapters = FastHashMap::default();

    for backend in &default_backend_order {
        let adapters = instance.enumerate_adapters(Backends::from(*backend));

        let mut potential_adapters = ArrayVec::<PotentialAdapter<Adapter>, 4>::new();
        for (idx, adapter) in adapters.into_iter().enumerate() {
            let info = adapter.get_info();
            let limits = adapter.limits();
            let features = adapter.features();
            let potential = PotentialAdapter::new(adapter, info, limits, features);

            log::debug!(
                "{:?} Adapter {}: {:#?}",
                backend,
                idx,
                potential.as_ref().map(|p| &p.info)
            );

            let desired = if let Some(ref desired_device) = desired_device {
                potential
                    .as_ref()
                    .map(|i| i.info.name.to_lowercase().contains(desired_device))
                    .unwrap_or(false)
            } else {
                true
            };

            match (potential, desired) {
                (Ok(potential), true) if !potential_adapters.is_full() => {
                    log::debug!("Adapter usable");
                    potential_adapters.push(potential)
                }
                (Err(e), _) => log::debug!("Adapter not usable: {e}"),
                _ => log::debug!("Adapter not usable"),
            }
        }
        valid_adapters.insert(*backend, potential_adapters);
    }

    for backend_adapters in valid_adapters.values_mut() {
        backend_adapters.sort_by_key(|a: &PotentialAdapter<Adapter>| match a.info.device_type {
            DeviceType::DiscreteGpu => 0,
            DeviceType::IntegratedGpu => 1,
            DeviceType::VirtualGpu => 2,
            DeviceType::Cpu => 3,
            DeviceType::Other => 4,
        });
    }

    for backend in &default_backend_order {
        if let Some(desired_backend) = desired_backend {
            if desired_backend != *backend {
                log::debug!("Skipping unwanted backend {:?}", backend);
                continue;
            }
        }

        let adapter: Option<PotentialAdapter<Adapter>> =
            valid_adapters.remove(backend).and_then(|arr| arr.into_iter().next());

        if let Some(adapter) = adapter {
            log::debug!("Chosen adapter: {:#?}", adapter.info);
            log::debug!("Chosen features: {:#?}", adapter.features);
            log::debug!("Chosen limits: {:#?}", adapter.limits);

            let (device, queue) = adapter
                .inner
                .request_device(
                    &DeviceDescriptor {
                        label: Some("lightgrid device"),
                        required_features: adapter.features,
                        required_limits: adapter.limits,
                    },
                    None,
                )
                .await
                .map_err(ClustersInitializationError::RequestDeviceFailed)?;

            return Ok(InstanceAdapterDevice {
                instance: Arc::new(instance),
                adapter: Arc::new(adapter.inner),
                device: Arc::new(device),
                queue: Arc::new(queue),
                info: adapter.info,
            });
        }
    }

    Err(ClustersInitializationError::MissingAdapter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constants_are_required() {
        assert!(matches!(
            check_features(Features::TIMESTAMP_QUERY),
            Err(ClustersInitializationError::MissingDeviceFeatures { features }) if features == Features::PUSH_CONSTANTS
        ));
        assert_eq!(
            check_features(Features::PUSH_CONSTANTS | Features::TIMESTAMP_QUERY | Features::DEPTH_CLIP_CONTROL).ok(),
            Some(Features::PUSH_CONSTANTS | Features::TIMESTAMP_QUERY)
        );
    }

    #[test]
    fn limits() {
        assert!(matches!(
            check_limits(&Limits::default()),
            Err(ClustersInitializationError::LowDeviceLimit {
                ty: LimitType::PushConstantSize,
                ..
            })
        ));
        let device = Limits {
            max_push_constant_size: 128,
            max_storage_buffers_per_shader_stage: 16,
            ..Limits::default()
        };
        assert_eq!(check_limits(&device).ok(), Some(device));
    }
}
