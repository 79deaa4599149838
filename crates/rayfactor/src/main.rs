mod args;
mod gui_state;
mod reduce;
mod render;
mod scene;
mod spv;
mod tracer;

use app::anyhow::Result;
use app::types::{Point, Vec3};
use app::vulkan::ash::vk;
use app::vulkan::{BufferBarrier, CommandBuffer};
use app::{App, BaseApp, FrameStats};
use clap::Parser;

use args::Args;
use gui_state::{Gui, MAX_RAY_COUNT};
use reduce::EnergyReduction;
use render::{GlobalUbo, RenderSystems, SHADE_ENERGY, SHADE_PLAIN};
use scene::{Scene, SceneData};
use tracer::{TraceRequest, Tracer};

const APP_NAME: &str = "Ray factor";

fn main() -> Result<()> {
    let args = Args::parse();
    app::run::<RayFactor>(APP_NAME, args.width, args.height)
}

struct RayFactor {
    scene: Scene,
    tracer: Tracer,
    render: RenderSystems,
    reduction: EnergyReduction,
    /// Trace to record this frame, if one was requested.
    pending_trace: Option<TraceRequest>,
    /// A sweep was recorded last frame, fold its hit table next update.
    reduce_pending: bool,
    /// Rays drawn as lines, the count of the last request.
    ray_count: u32,
    line_width: f32,
}

impl App for RayFactor {
    type Gui = Gui;

    fn new(base: &mut BaseApp<Self>) -> Result<Self> {
        let args = Args::parse();
        let context = &base.context;

        let data = SceneData::load_obj(&args.model)?;
        let scene = Scene::new(context, &data)?;
        let initial_rays = args.rays.min(MAX_RAY_COUNT as u32);
        let tracer = Tracer::new(base.context.clone(), &scene, initial_rays)?;
        let render =
            RenderSystems::new(context, base.swapchain.format, base.swapchain.depth_format)?;
        let reduction = EnergyReduction::new(base.context.clone(), &scene, &tracer)?;

        base.camera.position = Point::new(2.2, 1.3, 2.2);
        base.camera.direction = Vec3::new(-1.7, -0.8, -1.7).normalize();

        Ok(Self {
            scene,
            tracer,
            render,
            reduction,
            // Populate the hit table and the ray lines on the first frame
            pending_trace: Some(TraceRequest {
                ray_count: initial_rays,
                triangle: 0,
            }),
            reduce_pending: false,
            ray_count: initial_rays,
            line_width: 1.0,
        })
    }

    fn update(
        &mut self,
        base: &mut BaseApp<Self>,
        gui: &mut Self::Gui,
        _image_index: usize,
        _frame_stats: &FrameStats,
    ) -> Result<()> {
        gui.triangle_count = self.tracer.triangle_count();

        // Requests made through the UI are recorded in the same frame, so
        // only the startup request is still pending here. It owns the
        // slider's first value.
        if let Some(request) = &self.pending_trace {
            gui.ray_count = request.ray_count as i32;
        }

        // wide lines are enabled, but the device still bounds the width
        let [min_width, max_width] = base.context.physical_device.line_width_range();
        self.line_width = gui.line_width.clamp(min_width, max_width);

        if self.reduce_pending {
            self.reduce_pending = false;
            let energy = self.reduction.run(self.tracer.hit_buffer())?;
            log::info!("Mesh energy totals: {energy:?}");
            gui.mesh_energy = energy;
        }

        if gui.trace_requested {
            gui.trace_requested = false;

            let last_triangle = gui.triangle_count.saturating_sub(1) as i32;
            let request = TraceRequest {
                ray_count: gui.ray_count.clamp(0, MAX_RAY_COUNT) as u32,
                triangle: gui.triangle.clamp(0, last_triangle) as u32,
            };

            // Frames still in flight read the ray buffers and the hit
            // table through their device addresses, and the dispatcher
            // frees and rewrites them without waiting. Drain the queue
            // before letting that happen.
            base.wait_for_gpu()?;

            self.ray_count = request.ray_count;
            self.pending_trace = Some(request);
        }

        let view_proj = base.camera.projection_matrix() * base.camera.view_matrix();
        self.render.update_ubo(&GlobalUbo {
            view_proj,
            ambient_color: [1.0, 1.0, 1.0, 0.2],
            hit_table: self.tracer.push_constants().hit_buffer,
            triangle_count: self.tracer.triangle_count(),
            shading_mode: if gui.shade_by_energy {
                SHADE_ENERGY
            } else {
                SHADE_PLAIN
            },
        })?;

        Ok(())
    }

    fn record_trace_commands(
        &mut self,
        _base: &BaseApp<Self>,
        buffer: &CommandBuffer,
        _image_index: usize,
    ) -> Result<()> {
        if let Some(request) = self.pending_trace.take() {
            self.tracer.trace_sample(buffer, &request)?;
            self.tracer.trace_sweep(buffer);

            // The raster passes read the fresh output later this frame
            buffer.pipeline_buffer_barriers(&[
                BufferBarrier {
                    buffer: self.tracer.origin_buffer(),
                    src_access_mask: vk::AccessFlags2::SHADER_WRITE,
                    src_stage_mask: vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                    dst_access_mask: vk::AccessFlags2::SHADER_READ,
                    dst_stage_mask: vk::PipelineStageFlags2::VERTEX_SHADER,
                },
                BufferBarrier {
                    buffer: self.tracer.direction_buffer(),
                    src_access_mask: vk::AccessFlags2::SHADER_WRITE,
                    src_stage_mask: vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                    dst_access_mask: vk::AccessFlags2::SHADER_READ,
                    dst_stage_mask: vk::PipelineStageFlags2::VERTEX_SHADER,
                },
                BufferBarrier {
                    buffer: self.tracer.hit_buffer(),
                    src_access_mask: vk::AccessFlags2::SHADER_WRITE,
                    src_stage_mask: vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                    dst_access_mask: vk::AccessFlags2::SHADER_READ,
                    dst_stage_mask: vk::PipelineStageFlags2::FRAGMENT_SHADER,
                },
            ]);

            self.reduce_pending = true;
        }

        Ok(())
    }

    fn record_raster_commands(
        &self,
        base: &BaseApp<Self>,
        buffer: &CommandBuffer,
        image_index: usize,
    ) -> Result<()> {
        buffer.begin_rendering(
            &base.swapchain.views[image_index],
            Some(&base.swapchain.depth_views[image_index]),
            base.swapchain.extent,
            vk::AttachmentLoadOp::CLEAR,
            Some([0.01, 0.01, 0.02, 1.0]),
        );
        buffer.set_viewport(base.swapchain.extent);
        buffer.set_scissor(base.swapchain.extent);

        self.render.draw_scene(buffer, &self.scene);
        self.render.draw_rays(
            buffer,
            self.tracer.push_constants(),
            self.ray_count,
            self.line_width,
        );

        buffer.end_rendering();

        Ok(())
    }

    fn on_recreate_swapchain(&mut self, _base: &BaseApp<Self>) -> Result<()> {
        // viewport and scissor are dynamic in every pipeline
        Ok(())
    }
}
