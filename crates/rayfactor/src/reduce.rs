use std::mem::size_of;
use std::sync::Arc;

use app::vulkan::ash::vk;
use app::vulkan::gpu_allocator::MemoryLocation;
use app::vulkan::{
    Buffer, BufferBarrier, ComputePipeline, ComputePipelineCreateInfo, Context, PipelineLayout,
};

use crate::scene::Scene;
use crate::spv::load_spv;
use crate::tracer::{TraceError, Tracer};

// local_size_x of sum_energy.comp
const DISPATCH_SIZE: u32 = 256;

/// Parameter block of the reduction shader. Addresses and counts are all
/// 64 bit, mirroring the trace dispatch record.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct ReducePushConstants {
    hit_table: u64,
    mesh_energy: u64,
    triangle_mesh_map: u64,
    mesh_count: u64,
    triangle_count: u64,
    launch_size: u64,
}

/// Folds the hit table into one received energy total per mesh. One
/// invocation owns one mesh, so the sums need no atomics.
pub struct EnergyReduction {
    context: Arc<Context>,
    pipeline: ComputePipeline,
    pipeline_layout: PipelineLayout,
    mesh_energy_buffer: Buffer,
    push_constants: ReducePushConstants,
    mesh_count: u32,
}

impl EnergyReduction {
    pub fn new(context: Arc<Context>, scene: &Scene, tracer: &Tracer) -> Result<Self, TraceError> {
        let push_constant_range = vk::PushConstantRange::builder()
            .offset(0)
            .size(size_of::<ReducePushConstants>() as u32)
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .build();

        // push constant only layout, the shader reaches every buffer
        // through its device address
        let pipeline_layout = context
            .create_pipeline_layout(&[], &[push_constant_range])
            .map_err(|e| TraceError::ResourceCreation("reduction pipeline layout", e))?;

        let shader_source = load_spv("sum_energy.comp.spv")
            .map_err(|e| TraceError::ResourceCreation("reduction shader module", e))?;
        let pipeline = context
            .create_compute_pipeline(
                &pipeline_layout,
                ComputePipelineCreateInfo {
                    shader_source: &shader_source,
                },
            )
            .map_err(|e| TraceError::ResourceCreation("reduction pipeline", e))?;

        let mesh_count = scene.mesh_count();
        let mesh_energy_buffer = context
            .create_buffer(
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
                MemoryLocation::CpuToGpu,
                u64::from(mesh_count) * size_of::<f32>() as u64,
            )
            .map_err(|e| TraceError::ResourceCreation("mesh energy buffer", e))?;

        let push_constants = ReducePushConstants {
            hit_table: tracer.push_constants().hit_buffer,
            mesh_energy: mesh_energy_buffer.get_device_address(),
            triangle_mesh_map: scene.mesh_map_address(),
            mesh_count: u64::from(mesh_count),
            triangle_count: u64::from(scene.triangle_count()),
            launch_size: u64::from(mesh_count),
        };

        Ok(Self {
            context,
            pipeline,
            pipeline_layout,
            mesh_energy_buffer,
            push_constants,
            mesh_count,
        })
    }

    /// Runs one blocking reduction over the hit table and returns the per
    /// mesh totals. The leading barrier orders the dispatch after any sweep
    /// still executing on the queue, so the fence wait also proves the
    /// sweep itself has finished.
    pub fn run(&self, hit_table: &Buffer) -> Result<Vec<f32>, TraceError> {
        self.context
            .execute_one_time_commands(|buffer| {
                buffer.pipeline_buffer_barriers(&[BufferBarrier {
                    buffer: hit_table,
                    src_access_mask: vk::AccessFlags2::SHADER_WRITE,
                    src_stage_mask: vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                    dst_access_mask: vk::AccessFlags2::SHADER_READ,
                    dst_stage_mask: vk::PipelineStageFlags2::COMPUTE_SHADER,
                }]);

                buffer.bind_compute_pipeline(&self.pipeline);
                buffer.push_constants(
                    &self.pipeline_layout,
                    vk::ShaderStageFlags::COMPUTE,
                    &self.push_constants,
                );
                buffer.dispatch(self.mesh_count / DISPATCH_SIZE + 1, 1, 1);
            })
            .map_err(|e| TraceError::Dispatch("energy reduction", e))?;

        self.mesh_energy_buffer
            .read_data(self.mesh_count as usize)
            .map_err(|e| TraceError::Query("mesh energy buffer", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_record_is_six_words_in_shader_order() {
        assert_eq!(size_of::<ReducePushConstants>(), 48);

        let record = ReducePushConstants {
            hit_table: 1,
            mesh_energy: 2,
            triangle_mesh_map: 3,
            mesh_count: 4,
            triangle_count: 5,
            launch_size: 6,
        };
        let words: [u64; 6] = unsafe { std::mem::transmute(record) };
        assert_eq!(words, [1, 2, 3, 4, 5, 6]);
    }
}
