use std::mem::size_of;

use app::anyhow::Result;
use app::types::Mat4;
use app::vulkan::ash::vk;
use app::vulkan::gpu_allocator::MemoryLocation;
use app::vulkan::{
    Buffer, CommandBuffer, Context, DescriptorPool, DescriptorSet, DescriptorSetLayout,
    GraphicsPipeline, GraphicsPipelineCreateInfo, GraphicsShaderCreateInfo, PipelineLayout, Vertex,
    WriteDescriptorSet, WriteDescriptorSetKind,
};

use crate::scene::{Scene, TriangleVertex};
use crate::spv::load_spv;
use crate::tracer::TracePushConstants;

/// Per frame constants shared by the mesh and line passes. Matches the
/// std140 block at binding 0 of the raster shaders.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct GlobalUbo {
    pub view_proj: Mat4,
    pub ambient_color: [f32; 4],
    pub hit_table: u64,
    pub triangle_count: u32,
    pub shading_mode: u32,
}

/// Flat N dot L shading with the vertex color.
pub const SHADE_PLAIN: u32 = 0;
/// Tint each triangle by the energy it received in the last sweep.
pub const SHADE_ENERGY: u32 = 1;

/// Ray buffer addresses pushed to the line vertex shader. The lines read
/// the trace output in place, no copy into a vertex buffer happens.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct LinePushConstants {
    origin_buffer: u64,
    direction_buffer: u64,
}

/// The line pass has no vertex input at all. Endpoints are derived from
/// gl_VertexIndex and fetched through the pushed buffer addresses.
struct LineVertex;

impl Vertex for LineVertex {
    fn bindings() -> Vec<vk::VertexInputBindingDescription> {
        vec![]
    }

    fn attributes() -> Vec<vk::VertexInputAttributeDescription> {
        vec![]
    }
}

/// Raster half of the renderer: one pipeline for the scene meshes and one
/// for the traced rays, sharing a single uniform buffer.
pub struct RenderSystems {
    ubo_buffer: Buffer,
    _descriptor_set_layout: DescriptorSetLayout,
    _descriptor_pool: DescriptorPool,
    descriptor_set: DescriptorSet,
    mesh_pipeline_layout: PipelineLayout,
    mesh_pipeline: GraphicsPipeline,
    line_pipeline_layout: PipelineLayout,
    line_pipeline: GraphicsPipeline,
}

impl RenderSystems {
    pub fn new(context: &Context, color_format: vk::Format, depth_format: vk::Format) -> Result<Self> {
        let ubo_buffer = context.create_buffer(
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            size_of::<GlobalUbo>() as u64,
        )?;

        let descriptor_set_layout = context.create_descriptor_set_layout(&[
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
                .build(),
        ])?;

        let descriptor_pool = context.create_descriptor_pool(
            1,
            &[vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
            }],
        )?;

        let descriptor_set = descriptor_pool.allocate_set(&descriptor_set_layout)?;
        descriptor_set.update(&[WriteDescriptorSet {
            binding: 0,
            kind: WriteDescriptorSetKind::UniformBuffer {
                buffer: &ubo_buffer,
            },
        }]);

        let mesh_pipeline_layout = context.create_pipeline_layout(&[&descriptor_set_layout], &[])?;

        let mesh_vertex = load_spv("mesh.vert.spv")?;
        let mesh_fragment = load_spv("mesh.frag.spv")?;
        let mesh_pipeline = context.create_graphics_pipeline::<TriangleVertex>(
            &mesh_pipeline_layout,
            GraphicsPipelineCreateInfo {
                shaders: &[
                    GraphicsShaderCreateInfo {
                        source: &mesh_vertex,
                        stage: vk::ShaderStageFlags::VERTEX,
                    },
                    GraphicsShaderCreateInfo {
                        source: &mesh_fragment,
                        stage: vk::ShaderStageFlags::FRAGMENT,
                    },
                ],
                primitive_topology: vk::PrimitiveTopology::TRIANGLE_LIST,
                // plates are visible from both sides
                cull_mode: vk::CullModeFlags::NONE,
                extent: None,
                color_attachment_format: color_format,
                color_attachment_blend: None,
                depth_attachment_format: Some(depth_format),
                dynamic_states: Some(&[vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]),
            },
        )?;

        let line_push_range = vk::PushConstantRange::builder()
            .offset(0)
            .size(size_of::<LinePushConstants>() as u32)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build();
        let line_pipeline_layout =
            context.create_pipeline_layout(&[&descriptor_set_layout], &[line_push_range])?;

        let line_vertex = load_spv("line.vert.spv")?;
        let line_fragment = load_spv("line.frag.spv")?;
        let line_pipeline = context.create_graphics_pipeline::<LineVertex>(
            &line_pipeline_layout,
            GraphicsPipelineCreateInfo {
                shaders: &[
                    GraphicsShaderCreateInfo {
                        source: &line_vertex,
                        stage: vk::ShaderStageFlags::VERTEX,
                    },
                    GraphicsShaderCreateInfo {
                        source: &line_fragment,
                        stage: vk::ShaderStageFlags::FRAGMENT,
                    },
                ],
                primitive_topology: vk::PrimitiveTopology::LINE_LIST,
                cull_mode: vk::CullModeFlags::NONE,
                extent: None,
                color_attachment_format: color_format,
                color_attachment_blend: None,
                depth_attachment_format: Some(depth_format),
                dynamic_states: Some(&[
                    vk::DynamicState::VIEWPORT,
                    vk::DynamicState::SCISSOR,
                    vk::DynamicState::LINE_WIDTH,
                ]),
            },
        )?;

        Ok(Self {
            ubo_buffer,
            _descriptor_set_layout: descriptor_set_layout,
            _descriptor_pool: descriptor_pool,
            descriptor_set,
            mesh_pipeline_layout,
            mesh_pipeline,
            line_pipeline_layout,
            line_pipeline,
        })
    }

    pub fn update_ubo(&self, ubo: &GlobalUbo) -> Result<()> {
        self.ubo_buffer.copy_data_to_buffer(std::slice::from_ref(ubo))
    }

    pub fn draw_scene(&self, buffer: &CommandBuffer, scene: &Scene) {
        buffer.bind_graphics_pipeline(&self.mesh_pipeline);
        buffer.bind_descriptor_sets(
            vk::PipelineBindPoint::GRAPHICS,
            &self.mesh_pipeline_layout,
            0,
            &[&self.descriptor_set],
        );
        buffer.bind_vertex_buffer(&scene.vertex_buffer);
        buffer.bind_index_buffer(&scene.index_buffer);
        buffer.draw_indexed(scene.index_count());
    }

    /// Draws one line per traced ray, two vertices each, straight out of
    /// the origin and direction buffers of the last sampling dispatch.
    pub fn draw_rays(
        &self,
        buffer: &CommandBuffer,
        trace: &TracePushConstants,
        ray_count: u32,
        line_width: f32,
    ) {
        if ray_count == 0 {
            return;
        }

        buffer.bind_graphics_pipeline(&self.line_pipeline);
        buffer.bind_descriptor_sets(
            vk::PipelineBindPoint::GRAPHICS,
            &self.line_pipeline_layout,
            0,
            &[&self.descriptor_set],
        );
        buffer.push_constants(
            &self.line_pipeline_layout,
            vk::ShaderStageFlags::VERTEX,
            &LinePushConstants {
                origin_buffer: trace.origin_buffer,
                direction_buffer: trace.direction_buffer,
            },
        );
        buffer.set_line_width(line_width);
        buffer.draw(2 * ray_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_ubo_matches_the_std140_block() {
        // mat4 at 0, vec4 at 64, the 64 bit address at 80, two uints after
        assert_eq!(size_of::<GlobalUbo>(), 96);
    }

    #[test]
    fn line_push_record_holds_two_addresses() {
        assert_eq!(size_of::<LinePushConstants>(), 16);

        let record = LinePushConstants {
            origin_buffer: 7,
            direction_buffer: 8,
        };
        let words: [u64; 2] = unsafe { std::mem::transmute(record) };
        assert_eq!(words, [7, 8]);
    }

    #[test]
    fn line_pass_declares_no_vertex_input() {
        assert!(LineVertex::bindings().is_empty());
        assert!(LineVertex::attributes().is_empty());
    }
}
