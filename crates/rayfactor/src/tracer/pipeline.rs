use std::mem::size_of;

use app::vulkan::ash::vk;
use app::vulkan::{
    Context, DescriptorPool, DescriptorSet, DescriptorSetLayout, PipelineLayout,
    RayTracingPipeline, RayTracingPipelineCreateInfo, RayTracingShaderCreateInfo,
    RayTracingShaderGroup, WriteDescriptorSet, WriteDescriptorSetKind,
};

use super::acceleration::TopAS;
use super::{TraceError, TracePushConstants};
use crate::spv::load_spv;

pub struct PipelineRes {
    pub pipeline: RayTracingPipeline,
    pub pipeline_layout: PipelineLayout,
    pub descriptor_set_layout: DescriptorSetLayout,
}

pub struct DescriptorRes {
    _pool: DescriptorPool,
    pub set: DescriptorSet,
}

pub fn create_pipeline(context: &Context) -> Result<PipelineRes, TraceError> {
    // binding 0: the top level structure, read by both ray generation entries
    let bindings = [vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::RAYGEN_KHR)
        .build()];

    let descriptor_set_layout = context
        .create_descriptor_set_layout(&bindings)
        .map_err(|e| TraceError::ResourceCreation("trace descriptor set layout", e))?;

    let push_constant_range = vk::PushConstantRange::builder()
        .offset(0)
        .size(size_of::<TracePushConstants>() as u32)
        .stage_flags(vk::ShaderStageFlags::RAYGEN_KHR)
        .build();

    let pipeline_layout = context
        .create_pipeline_layout(&[&descriptor_set_layout], &[push_constant_range])
        .map_err(|e| TraceError::ResourceCreation("trace pipeline layout", e))?;

    let load = |name| {
        load_spv(name).map_err(|e| TraceError::ResourceCreation("trace shader module", e))
    };
    let sample_source = load("sample.rgen.spv")?;
    let sweep_source = load("sweep.rgen.spv")?;
    let hit_source = load("trace.rchit.spv")?;
    let miss_source = load("trace.rmiss.spv")?;

    // Declaration order doubles as binding table handle order: ray
    // generation entries first, then the hit group, then the miss group.
    let shaders_create_info = [
        RayTracingShaderCreateInfo {
            source: &sample_source,
            stage: vk::ShaderStageFlags::RAYGEN_KHR,
            group: RayTracingShaderGroup::RayGen,
        },
        RayTracingShaderCreateInfo {
            source: &sweep_source,
            stage: vk::ShaderStageFlags::RAYGEN_KHR,
            group: RayTracingShaderGroup::RayGen,
        },
        RayTracingShaderCreateInfo {
            source: &hit_source,
            stage: vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            group: RayTracingShaderGroup::ClosestHit,
        },
        RayTracingShaderCreateInfo {
            source: &miss_source,
            stage: vk::ShaderStageFlags::MISS_KHR,
            group: RayTracingShaderGroup::Miss,
        },
    ];

    // closest hit never traces again, so no recursion budget is needed
    let pipeline_create_info = RayTracingPipelineCreateInfo {
        shaders: &shaders_create_info,
        max_ray_recursion_depth: 0,
    };

    let pipeline = context
        .create_ray_tracing_pipeline(&pipeline_layout, pipeline_create_info)
        .map_err(|e| TraceError::ResourceCreation("ray tracing pipeline", e))?;

    Ok(PipelineRes {
        pipeline,
        pipeline_layout,
        descriptor_set_layout,
    })
}

pub fn create_descriptor_sets(
    context: &Context,
    pipeline_res: &PipelineRes,
    top_as: &TopAS,
) -> Result<DescriptorRes, TraceError> {
    let pool_sizes = [vk::DescriptorPoolSize::builder()
        .ty(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
        .descriptor_count(1)
        .build()];

    let pool = context
        .create_descriptor_pool(1, &pool_sizes)
        .map_err(|e| TraceError::ResourceCreation("trace descriptor pool", e))?;

    let set = pool
        .allocate_set(&pipeline_res.descriptor_set_layout)
        .map_err(|e| TraceError::ResourceCreation("trace descriptor set", e))?;

    set.update(&[WriteDescriptorSet {
        binding: 0,
        kind: WriteDescriptorSetKind::AccelerationStructure {
            acceleration_structure: &top_as.inner,
        },
    }]);

    Ok(DescriptorRes { _pool: pool, set })
}
