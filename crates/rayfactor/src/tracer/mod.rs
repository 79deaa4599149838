mod acceleration;
mod error;
mod pipeline;

use std::mem::size_of;
use std::sync::Arc;

use app::vulkan::ash::vk;
use app::vulkan::gpu_allocator::MemoryLocation;
use app::vulkan::{Buffer, CommandBuffer, Context, ShaderBindingTable};

pub use error::TraceError;

use acceleration::{create_bottom_as, create_top_as, BottomAS, TopAS};
use pipeline::{create_descriptor_sets, create_pipeline, DescriptorRes, PipelineRes};

use crate::scene::Scene;

/// Parameter block pushed with every trace dispatch.
///
/// Field order and widths are a contract with the ray generation shaders;
/// everything is 64 bit wide so the record reads the same on both sides.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct TracePushConstants {
    pub index_buffer: u64,
    pub vertex_buffer: u64,
    pub origin_buffer: u64,
    pub direction_buffer: u64,
    pub hit_buffer: u64,
    pub triangle_index: u64,
    pub triangle_count: u64,
    pub triangle_mesh_map: u64,
}

/// One sampling dispatch, fixed at request time. Carrying the values here
/// instead of reading live UI state while recording keeps a frame's trace
/// parameters stable even if the UI changes mid frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRequest {
    pub ray_count: u32,
    pub triangle: u32,
}

/// Parked in the selected triangle field during sweeps. Larger than any
/// real index, so shaders can never mistake it for a selection.
pub const SWEEP_ALL_TRIANGLES: u64 = u64::MAX;

/// Binding table entries of the two ray generation shaders, in the order
/// the pipeline declares them.
pub const SAMPLE_RAYGEN_INDEX: usize = 0;
pub const SWEEP_RAYGEN_INDEX: usize = 1;

/// Columns after the per triangle tallies in each hit table row: missed
/// energy, cast energy, triangle area.
const HIT_TABLE_EXTRA_COLUMNS: usize = 3;

// vec4 per ray on the shader side
const RAY_ELEMENT_SIZE: u64 = 16;

/// Hardware ray tracing front end: owns the acceleration structures, the
/// trace pipeline with its binding table, and the GPU buffers every
/// dispatch reads and writes.
pub struct Tracer {
    context: Arc<Context>,
    _bottom_as: BottomAS,
    _top_as: TopAS,
    pipeline_res: PipelineRes,
    sbt: ShaderBindingTable,
    descriptor_res: DescriptorRes,
    origin_buffer: Buffer,
    direction_buffer: Buffer,
    hit_buffer: Buffer,
    allocated_rays: u32,
    triangle_count: u32,
    push_constants: TracePushConstants,
}

impl Tracer {
    pub fn new(context: Arc<Context>, scene: &Scene, initial_rays: u32) -> Result<Self, TraceError> {
        let bottom_as = create_bottom_as(&context, scene)?;
        let top_as = create_top_as(&context, &bottom_as)?;

        let pipeline_res = create_pipeline(&context)?;
        let sbt = context
            .create_shader_binding_table(&pipeline_res.pipeline)
            .map_err(|e| TraceError::ResourceCreation("shader binding table", e))?;
        let descriptor_res = create_descriptor_sets(&context, &pipeline_res, &top_as)?;

        let triangle_count = scene.triangle_count();
        let hit_len = hit_table_len(triangle_count);
        let hit_buffer = context
            .create_buffer(
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
                MemoryLocation::CpuToGpu,
                (hit_len * size_of::<f32>()) as u64,
            )
            .map_err(|e| TraceError::ResourceCreation("hit table", e))?;
        // mapped memory is not zero initialized
        hit_buffer
            .copy_data_to_buffer(&vec![0f32; hit_len])
            .map_err(|e| TraceError::ResourceCreation("hit table", e))?;

        let (origin_buffer, direction_buffer) = create_ray_buffers(&context, initial_rays)?;

        let push_constants = TracePushConstants {
            index_buffer: scene.index_buffer_address(),
            vertex_buffer: scene.vertex_buffer_address(),
            origin_buffer: origin_buffer.get_device_address(),
            direction_buffer: direction_buffer.get_device_address(),
            hit_buffer: hit_buffer.get_device_address(),
            triangle_index: 0,
            triangle_count: u64::from(triangle_count),
            triangle_mesh_map: scene.mesh_map_address(),
        };

        log::debug!(
            "Tracer ready: {triangle_count} triangles, {initial_rays} ray slots, hit table of {hit_len} floats"
        );

        Ok(Self {
            context,
            _bottom_as: bottom_as,
            _top_as: top_as,
            pipeline_res,
            sbt,
            descriptor_res,
            origin_buffer,
            direction_buffer,
            hit_buffer,
            allocated_rays: initial_rays,
            triangle_count,
            push_constants,
        })
    }

    /// Records a sampling dispatch of `request.ray_count` rays cast from
    /// the selected triangle. A zero count request records nothing.
    ///
    /// When the requested count differs from the allocated one, the origin
    /// and direction buffers are recreated at exactly the new count and
    /// their fresh addresses are folded into the push constants before the
    /// trace is recorded. The old buffers are freed on the spot: nothing
    /// here waits for earlier frames that may still read them, so callers
    /// that pipeline frames must close that hazard themselves before
    /// letting the count change.
    pub fn trace_sample(
        &mut self,
        buffer: &CommandBuffer,
        request: &TraceRequest,
    ) -> Result<(), TraceError> {
        if request.ray_count == 0 {
            return Ok(());
        }

        if needs_resize(self.allocated_rays, request.ray_count) {
            log::debug!(
                "Resizing ray buffers: {} -> {} rays",
                self.allocated_rays,
                request.ray_count
            );

            let (origin, direction) = create_ray_buffers(&self.context, request.ray_count)?;
            self.push_constants.origin_buffer = origin.get_device_address();
            self.push_constants.direction_buffer = direction.get_device_address();
            self.origin_buffer = origin;
            self.direction_buffer = direction;
            self.allocated_rays = request.ray_count;
        }

        self.push_constants.triangle_index = u64::from(request.triangle);

        self.bind(buffer);
        buffer.trace_rays(&self.sbt, SAMPLE_RAYGEN_INDEX, request.ray_count, 1);

        Ok(())
    }

    /// Records the sweep dispatch: one launch column per scene triangle,
    /// each accumulating its own row of the hit table.
    pub fn trace_sweep(&mut self, buffer: &CommandBuffer) {
        self.push_constants.triangle_index = SWEEP_ALL_TRIANGLES;

        self.bind(buffer);
        buffer.trace_rays(&self.sbt, SWEEP_RAYGEN_INDEX, self.triangle_count, 1);
    }

    fn bind(&self, buffer: &CommandBuffer) {
        buffer.bind_rt_pipeline(&self.pipeline_res.pipeline);
        buffer.bind_descriptor_sets(
            vk::PipelineBindPoint::RAY_TRACING_KHR,
            &self.pipeline_res.pipeline_layout,
            0,
            &[&self.descriptor_res.set],
        );
        buffer.push_constants(
            &self.pipeline_res.pipeline_layout,
            vk::ShaderStageFlags::RAYGEN_KHR,
            &self.push_constants,
        );
    }

    /// Reads the hit table back to the host: `triangle_count` rows of
    /// `triangle_count + 3` columns, row major.
    pub fn read_hit_table(&self) -> Result<Vec<f32>, TraceError> {
        self.hit_buffer
            .read_data(hit_table_len(self.triangle_count))
            .map_err(|e| TraceError::Query("hit table", e))
    }

    pub fn read_origins(&self) -> Result<Vec<[f32; 4]>, TraceError> {
        self.origin_buffer
            .read_data(self.allocated_rays as usize)
            .map_err(|e| TraceError::Query("ray origin buffer", e))
    }

    pub fn read_directions(&self) -> Result<Vec<[f32; 4]>, TraceError> {
        self.direction_buffer
            .read_data(self.allocated_rays as usize)
            .map_err(|e| TraceError::Query("ray direction buffer", e))
    }

    /// Current push constant record. The raster side reads the ray buffer
    /// addresses out of it to draw the latest batch.
    pub fn push_constants(&self) -> &TracePushConstants {
        &self.push_constants
    }

    pub fn allocated_rays(&self) -> u32 {
        self.allocated_rays
    }

    pub fn triangle_count(&self) -> u32 {
        self.triangle_count
    }

    pub fn origin_buffer(&self) -> &Buffer {
        &self.origin_buffer
    }

    pub fn direction_buffer(&self) -> &Buffer {
        &self.direction_buffer
    }

    pub fn hit_buffer(&self) -> &Buffer {
        &self.hit_buffer
    }
}

fn needs_resize(allocated: u32, requested: u32) -> bool {
    requested != allocated
}

/// The buffers always hold at least one slot; zero sized buffers cannot
/// be created.
fn create_ray_buffers(context: &Context, count: u32) -> Result<(Buffer, Buffer), TraceError> {
    let size = u64::from(count.max(1)) * RAY_ELEMENT_SIZE;
    let usage = vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;

    let origin = context
        .create_buffer(usage, MemoryLocation::CpuToGpu, size)
        .map_err(|e| TraceError::ResourceCreation("ray origin buffer", e))?;
    let direction = context
        .create_buffer(usage, MemoryLocation::CpuToGpu, size)
        .map_err(|e| TraceError::ResourceCreation("ray direction buffer", e))?;

    Ok((origin, direction))
}

fn hit_table_len(triangle_count: u32) -> usize {
    let t = triangle_count as usize;
    (t + HIT_TABLE_EXTRA_COLUMNS) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constant_record_is_eight_words_in_dispatch_order() {
        assert_eq!(size_of::<TracePushConstants>(), 64);

        let record = TracePushConstants {
            index_buffer: 1,
            vertex_buffer: 2,
            origin_buffer: 3,
            direction_buffer: 4,
            hit_buffer: 5,
            triangle_index: 6,
            triangle_count: 7,
            triangle_mesh_map: 8,
        };
        let words: [u64; 8] = unsafe { std::mem::transmute(record) };
        assert_eq!(words, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn hit_table_holds_three_extra_columns_per_row() {
        assert_eq!(hit_table_len(2), 10);
        assert_eq!(hit_table_len(1), 4);
        assert_eq!(hit_table_len(100), 103 * 100);
    }

    #[test]
    fn sweep_sentinel_is_out_of_range_for_every_triangle_count() {
        assert!(SWEEP_ALL_TRIANGLES > u64::from(u32::MAX));
    }

    #[test]
    fn ray_buffers_are_replaced_only_on_count_changes() {
        // same count keeps the buffers, and thereby their addresses
        assert!(!needs_resize(50, 50));

        // growing and shrinking both reallocate at the exact new count
        assert!(needs_resize(50, 200));
        assert!(needs_resize(200, 50));
    }
}
