//! Compute pipelines of every kernel variant.

use std::borrow::Cow;

use lightgrid::{
    format_sso,
    pass::{BufferId, Kernel, ResourceUsage},
    ping_pong::Slot,
    types::LightType,
    util::{error_scope::ValidationErrorScope, typedefs::FastHashMap},
    ClustersInitializationError, ShaderPreProcessor,
};
use wgpu::{
    BindGroupLayout, BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingType, BufferBindingType,
    ComputePipeline, ComputePipelineDescriptor, Device, PipelineLayoutDescriptor, PushConstantRange,
    ShaderModuleDescriptor, ShaderStages,
};

use crate::shaders::{push_constant_size, shader_name, KernelShaderConfig, ShaderSettings};

/// Every kernel the passes can dispatch, slots included.
pub fn all_kernels() -> Vec<Kernel> {
    let mut out = vec![
        Kernel::ClustersAabb,
        Kernel::LightsAabb,
        Kernel::ReduceLightsAabbFirst,
        Kernel::ReduceLightsAabbSecond,
        Kernel::ClustersMask,
        Kernel::FindUniqueClusters,
    ];
    for light_type in LightType::ARRAY {
        for slot in Slot::ARRAY {
            out.extend([
                Kernel::MortonCodes {
                    light_type,
                    output: slot,
                },
                Kernel::RadixSort { light_type, input: slot },
                Kernel::BitonicSort { light_type, slot },
                Kernel::MergePathPartitions { light_type, input: slot },
                Kernel::MergeSort { light_type, input: slot },
            ]);
        }
        out.push(Kernel::BvhTop { light_type });
        for indices in [None, Some(Slot::Front), Some(Slot::Back)] {
            out.push(Kernel::BvhBottom { light_type, indices });
            for bvh in [false, true] {
                for masked in [false, true] {
                    out.push(Kernel::AssignLights {
                        light_type,
                        indices,
                        bvh,
                        masked,
                    });
                }
            }
        }
        for masked in [false, true] {
            out.push(Kernel::SortAssignedLights { light_type, masked });
        }
    }
    out
}

/// Slots only change which buffers are bound, so kernels differing by slot
/// share a pipeline.
pub fn pipeline_key(kernel: &Kernel) -> Kernel {
    let front = Slot::Front;
    match *kernel {
        Kernel::MortonCodes { light_type, .. } => Kernel::MortonCodes {
            light_type,
            output: front,
        },
        Kernel::RadixSort { light_type, .. } => Kernel::RadixSort { light_type, input: front },
        Kernel::BitonicSort { light_type, .. } => Kernel::BitonicSort { light_type, slot: front },
        Kernel::MergePathPartitions { light_type, .. } => Kernel::MergePathPartitions { light_type, input: front },
        Kernel::MergeSort { light_type, .. } => Kernel::MergeSort { light_type, input: front },
        Kernel::BvhBottom { light_type, indices } => Kernel::BvhBottom {
            light_type,
            indices: indices.map(|_| front),
        },
        Kernel::AssignLights {
            light_type,
            indices,
            bvh,
            masked,
        } => Kernel::AssignLights {
            light_type,
            indices: indices.map(|_| front),
            bvh,
            masked,
        },
        other => other,
    }
}

fn layout_entry(binding: u32, buffer: BufferId, usage: ResourceUsage) -> BindGroupLayoutEntry {
    let ty = match buffer {
        BufferId::Uniforms => BufferBindingType::Uniform,
        _ => BufferBindingType::Storage {
            read_only: !usage.writes(),
        },
    };
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub struct KernelPipeline {
    pub bgl: BindGroupLayout,
    pub pipeline: ComputePipeline,
}

impl KernelPipeline {
    pub fn new(
        device: &Device,
        spp: &ShaderPreProcessor,
        kernel: &Kernel,
        settings: &ShaderSettings,
    ) -> Result<Self, ClustersInitializationError> {
        let name = shader_name(kernel);
        let source = spp
            .render_shader(&name, &KernelShaderConfig::new(kernel, settings))
            .map_err(|source| ClustersInitializationError::ShaderRender {
                name: name.as_str().into(),
                source,
            })?;

        let scope = ValidationErrorScope::new(device);

        let sm = device.create_shader_module(ShaderModuleDescriptor {
            label: Some(&format_sso!("lightgrid {kernel:?} SM")),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
        });

        let entries: Vec<_> = kernel
            .resources()
            .into_iter()
            .enumerate()
            .map(|(binding, (buffer, usage))| layout_entry(binding as u32, buffer, usage))
            .collect();
        let bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some(&format_sso!("lightgrid {kernel:?} BGL")),
            entries: &entries,
        });

        let push_constants = push_constant_size(kernel);
        let push_constant_ranges = [PushConstantRange {
            stages: ShaderStages::COMPUTE,
            range: 0..push_constants,
        }];
        let pll = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some(&format_sso!("lightgrid {kernel:?} PLL")),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &push_constant_ranges[..usize::from(push_constants != 0)],
        });

        let pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some(&format_sso!("lightgrid {kernel:?} Pipeline")),
            layout: Some(&pll),
            module: &sm,
            entry_point: "main",
        });

        scope.end().map_err(|source| ClustersInitializationError::PipelineCreation {
            name: name.as_str().into(),
            source,
        })?;

        Ok(Self { bgl, pipeline })
    }
}

/// Pipelines of every kernel, built for one set of [`ShaderSettings`].
pub struct ClusterPipelines {
    settings: ShaderSettings,
    pipelines: FastHashMap<Kernel, KernelPipeline>,
}

impl ClusterPipelines {
    pub fn new(
        device: &Device,
        spp: &ShaderPreProcessor,
        settings: ShaderSettings,
    ) -> Result<Self, ClustersInitializationError> {
        profiling::scope!("ClusterPipelines::new");

        let mut pipelines = FastHashMap::default();
        for kernel in all_kernels() {
            let key = pipeline_key(&kernel);
            if !pipelines.contains_key(&key) {
                pipelines.insert(key, KernelPipeline::new(device, spp, &key, &settings)?);
            }
        }
        log::debug!("Created {} culling pipelines", pipelines.len());

        Ok(Self { settings, pipelines })
    }

    pub fn settings(&self) -> &ShaderSettings {
        &self.settings
    }

    pub fn get(&self, kernel: &Kernel) -> Option<&KernelPipeline> {
        self.pipelines.get(&pipeline_key(kernel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightgrid::util::typedefs::FastHashSet;

    #[test]
    fn kernels_share_pipelines_across_slots() {
        let kernels = all_kernels();
        let unique: FastHashSet<Kernel> = kernels.iter().copied().collect();
        assert_eq!(unique.len(), kernels.len());

        let keys: FastHashSet<Kernel> = kernels.iter().map(pipeline_key).collect();
        assert_eq!(kernels.len(), 62);
        assert_eq!(keys.len(), 42);

        let back = Kernel::RadixSort {
            light_type: LightType::Spot,
            input: Slot::Back,
        };
        assert_eq!(
            pipeline_key(&back),
            Kernel::RadixSort {
                light_type: LightType::Spot,
                input: Slot::Front
            }
        );
    }

    #[test]
    fn storage_bindings_are_read_only_when_read() {
        let entry = layout_entry(3, BufferId::LightsData, ResourceUsage::Input);
        assert!(matches!(
            entry.ty,
            BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only: true },
                ..
            }
        ));
        let entry = layout_entry(0, BufferId::Uniforms, ResourceUsage::Input);
        assert!(matches!(
            entry.ty,
            BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                ..
            }
        ));
    }
}
