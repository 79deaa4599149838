pub use anyhow;
pub use nalgebra::{self as na};
pub use vulkan;

pub mod camera;
pub mod types;

use anyhow::Result;
use ash::vk::{self};
use camera::{Camera, Controls};
use gui::{
    imgui::{DrawData, Ui},
    imgui_rs_vulkan_renderer::Renderer,
    GuiContext,
};
use nalgebra::Point3;
use std::sync::Arc;
use std::{
    marker::PhantomData,
    time::{Duration, Instant},
};
use types::Vec3;
use vulkan::*;
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, Event, KeyboardInput, MouseButton, VirtualKeyCode, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::{Window, WindowBuilder},
};

const IN_FLIGHT_FRAMES: u32 = 2;

pub struct BaseApp<B: App> {
    phantom: PhantomData<B>,
    pub swapchain: Swapchain,
    pub command_pool: CommandPool,
    command_buffers: Vec<CommandBuffer>,
    in_flight_frames: InFlightFrames,
    pub context: Arc<Context>,
    pub camera: Camera,
    stats_display_mode: StatsDisplayMode,
}

pub trait App: Sized {
    type Gui: Gui;

    fn new(base: &mut BaseApp<Self>) -> Result<Self>;

    fn update(
        &mut self,
        base: &mut BaseApp<Self>,
        gui: &mut Self::Gui,
        image_index: usize,
        frame_stats: &FrameStats,
    ) -> Result<()>;

    /// Records work that only touches device buffers. Runs before any
    /// attachment is transitioned, so traces land ahead of the raster pass
    /// that visualizes their output. Takes `&mut self` because dispatchers
    /// may grow or shrink their buffers while recording.
    fn record_trace_commands(
        &mut self,
        base: &BaseApp<Self>,
        buffer: &CommandBuffer,
        image_index: usize,
    ) -> Result<()> {
        // prevents reports of unused parameters without needing to use #[allow]
        let _ = base;
        let _ = buffer;
        let _ = image_index;

        Ok(())
    }

    /// Records the scene render. The implementation owns its own
    /// begin/end rendering block and may attach the swapchain depth target.
    fn record_raster_commands(
        &self,
        base: &BaseApp<Self>,
        buffer: &CommandBuffer,
        image_index: usize,
    ) -> Result<()> {
        // prevents reports of unused parameters without needing to use #[allow]
        let _ = base;
        let _ = buffer;
        let _ = image_index;

        Ok(())
    }

    fn on_recreate_swapchain(&mut self, base: &BaseApp<Self>) -> Result<()>;
}

pub trait Gui: Sized {
    fn new() -> Result<Self>;

    fn build(&mut self, ui: &Ui);
}

impl Gui for () {
    fn new() -> Result<Self> {
        Ok(())
    }

    fn build(&mut self, _ui: &Ui) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatsDisplayMode {
    None,
    Basic,
    Full,
}

impl StatsDisplayMode {
    fn next(self) -> Self {
        match self {
            Self::None => Self::Basic,
            Self::Basic => Self::Full,
            Self::Full => Self::None,
        }
    }
}

pub fn run<A: App + 'static>(app_name: &str, width: u32, height: u32) -> Result<()> {
    pretty_env_logger::init();

    let (window, event_loop) = create_window(app_name, width, height)?;
    let mut base_app = BaseApp::new(&window, app_name)?;
    let mut ui = A::Gui::new()?;
    let mut app = A::new(&mut base_app)?;
    let mut gui_context = GuiContext::new(
        &base_app.context,
        &base_app.context.command_pool,
        base_app.swapchain.format,
        &window,
        IN_FLIGHT_FRAMES as _,
    )?;

    let mut controls = Controls::default();
    let mut is_swapchain_dirty = false;
    let mut last_frame = Instant::now();
    let mut frame_stats = FrameStats::default();

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        let app = &mut app; // Make sure it is dropped before base_app

        gui_context.handle_event(&window, &event);
        controls = controls.handle_event(&event);

        match event {
            Event::NewEvents(_) => {
                let now = Instant::now();
                let frame_time = now - last_frame;
                gui_context.update_delta_time(frame_time);
                last_frame = now;

                frame_stats.set_frame_time(frame_time);

                controls = controls.reset();
            }
            // On resize
            Event::WindowEvent {
                event: WindowEvent::Resized(..),
                ..
            } => {
                log::debug!("Window has been resized");
                is_swapchain_dirty = true;
            }
            // Draw
            Event::MainEventsCleared => {
                if is_swapchain_dirty {
                    let dim = window.inner_size();
                    if dim.width > 0 && dim.height > 0 {
                        base_app
                            .recreate_swapchain(dim.width, dim.height)
                            .expect("Failed to recreate swapchain");
                        app.on_recreate_swapchain(&base_app)
                            .expect("Error on recreate swapchain callback");
                    } else {
                        return;
                    }
                }

                base_app.camera = base_app.camera.update(&controls, frame_stats.frame_time);

                is_swapchain_dirty = base_app
                    .draw(&window, app, &mut gui_context, &mut ui, &mut frame_stats)
                    .expect("Failed to tick");
            }
            // Keyboard
            Event::WindowEvent {
                event:
                    WindowEvent::KeyboardInput {
                        input:
                            KeyboardInput {
                                state,
                                virtual_keycode: Some(key_code),
                                ..
                            },
                        ..
                    },
                ..
            } => {
                if key_code == VirtualKeyCode::R && state == ElementState::Pressed {
                    base_app.toggle_stats();
                }
            }
            // Mouse
            Event::WindowEvent {
                event: WindowEvent::MouseInput { state, button, .. },
                ..
            } => {
                if button == MouseButton::Right {
                    if state == ElementState::Pressed {
                        window.set_cursor_visible(false);
                    } else {
                        window.set_cursor_visible(true);
                    }
                }
            }
            // Exit app on request to close window
            Event::WindowEvent {
                event: WindowEvent::CloseRequested,
                ..
            } => *control_flow = ControlFlow::Exit,
            // Wait for gpu to finish pending work before closing app
            Event::LoopDestroyed => base_app
                .wait_for_gpu()
                .expect("Failed to wait for gpu to finish work"),
            _ => (),
        }
    });
}

fn create_window(app_name: &str, width: u32, height: u32) -> Result<(Window, EventLoop<()>)> {
    log::debug!("Creating window and event loop");
    let events_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title(app_name)
        .with_inner_size(PhysicalSize::new(width, height))
        .with_resizable(true)
        .build(&events_loop)?;

    Ok((window, events_loop))
}

impl<B: App> BaseApp<B> {
    fn new(window: &Window, app_name: &str) -> Result<Self> {
        log::info!("Create application: {}", app_name);

        let required_extensions = [
            "VK_KHR_swapchain",
            "VK_KHR_ray_tracing_pipeline",
            "VK_KHR_acceleration_structure",
            "VK_KHR_deferred_host_operations",
        ];

        let context = Arc::new(
            ContextBuilder::new(window)
                .vulkan_version(VERSION_1_3)
                .app_name(app_name)
                .required_extensions(&required_extensions)
                .required_device_features(DeviceFeatures {
                    ray_tracing_pipeline: true,
                    acceleration_structure: true,
                    buffer_device_address: true,
                    scalar_block_layout: true,
                    dynamic_rendering: true,
                    synchronization2: true,
                    shader_int64: true,
                    wide_lines: true,
                    geometry_shader: true,
                })
                .build()?,
        );

        let command_pool = context.create_command_pool(
            context.graphics_queue_family,
            Some(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
        )?;

        let swapchain = Swapchain::new(
            &context,
            window.inner_size().width,
            window.inner_size().height,
        )?;

        let command_buffers = create_command_buffers(&command_pool, &swapchain)?;

        let in_flight_frames = InFlightFrames::new(&context, IN_FLIGHT_FRAMES)?;

        let camera = Camera::new(
            Point3::from([0., 1., 3.]),
            -Vec3::z(),
            60.0,
            window.inner_size().width as f32 / window.inner_size().height as f32,
            0.1,
            100.0,
        );

        Ok(Self {
            phantom: PhantomData,
            context,
            command_pool,
            swapchain,
            command_buffers,
            in_flight_frames,
            camera,
            stats_display_mode: StatsDisplayMode::Basic,
        })
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        log::debug!("Recreating the swapchain");

        self.wait_for_gpu()?;

        // Depth targets are owned by the swapchain and follow it
        self.swapchain.resize(&self.context, width, height)?;

        self.camera.aspect_ratio = width as f32 / height as f32;

        Ok(())
    }

    pub fn wait_for_gpu(&self) -> Result<()> {
        self.context.device_wait_idle()
    }

    fn draw(
        &mut self,
        window: &Window,
        base_app: &mut B,
        gui_context: &mut GuiContext,
        gui: &mut B::Gui,
        frame_stats: &mut FrameStats,
    ) -> Result<bool> {
        self.in_flight_frames.next();
        self.in_flight_frames.fence().wait(None)?;

        // Can't get gpu time on the first frames or vkGetQueryPoolResults gets stuck
        // due to VK_QUERY_RESULT_WAIT_BIT
        let gpu_time = (frame_stats.total_frame_count >= IN_FLIGHT_FRAMES)
            .then(|| self.in_flight_frames.gpu_frame_time_ms())
            .transpose()?
            .unwrap_or_default();
        frame_stats.set_gpu_time(gpu_time);
        frame_stats.tick();

        let next_image_result = self
            .swapchain
            .acquire_next_image(u64::MAX, self.in_flight_frames.image_available_semaphore());
        let image_index = match next_image_result {
            Ok(AcquiredImage { index, .. }) => index as usize,
            Err(err) => match err.downcast_ref::<vk::Result>() {
                Some(&vk::Result::ERROR_OUT_OF_DATE_KHR) => return Ok(true),
                _ => return Err(err),
            },
        };
        self.in_flight_frames.fence().reset()?;

        // Generate UI
        gui_context
            .platform
            .prepare_frame(gui_context.imgui.io_mut(), window)?;
        let ui = gui_context.imgui.frame();

        gui.build(ui);
        self.build_perf_ui(ui, frame_stats, window.scale_factor() as _);

        gui_context.platform.prepare_render(ui, window);
        let draw_data = gui_context.imgui.render();

        base_app.update(self, gui, image_index, frame_stats)?;

        let command_buffer = &self.command_buffers[image_index];

        self.record_command_buffer(
            command_buffer,
            image_index,
            base_app,
            &mut gui_context.renderer,
            draw_data,
        )?;

        self.context.graphics_queue.submit(
            command_buffer,
            Some(SemaphoreSubmitInfo {
                semaphore: self.in_flight_frames.image_available_semaphore(),
                stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            }),
            Some(SemaphoreSubmitInfo {
                semaphore: self.in_flight_frames.render_finished_semaphore(),
                stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
            }),
            self.in_flight_frames.fence(),
        )?;

        let signal_semaphores = [self.in_flight_frames.render_finished_semaphore()];
        let present_result = self.swapchain.queue_present(
            image_index as _,
            &signal_semaphores,
            &self.context.present_queue,
        );
        match present_result {
            Ok(true) => return Ok(true),
            Err(err) => match err.downcast_ref::<vk::Result>() {
                Some(&vk::Result::ERROR_OUT_OF_DATE_KHR) => return Ok(true),
                _ => return Err(err),
            },
            _ => {}
        }

        Ok(false)
    }

    fn build_perf_ui(&self, ui: &Ui, frame_stats: &mut FrameStats, scale: f32) {
        let width = self.swapchain.extent.width as f32 / scale;
        let height = self.swapchain.extent.height as f32 / scale;

        if matches!(
            self.stats_display_mode,
            StatsDisplayMode::Basic | StatsDisplayMode::Full
        ) {
            ui.window("Frame stats")
                .focus_on_appearing(false)
                .no_decoration()
                .bg_alpha(0.5)
                .position([width * 0.7, 5.0], gui::imgui::Condition::Always)
                .size([160.0, 140.0], gui::imgui::Condition::FirstUseEver)
                .build(|| {
                    ui.text("Framerate");
                    ui.label_text("fps", frame_stats.fps_counter.to_string());
                    ui.text("Frametimes");
                    ui.label_text("all", format!("{:?}", frame_stats.frame_time));
                    ui.label_text("cpu", format!("{:?}", frame_stats.cpu_time));
                    ui.label_text("gpu", format!("{:?}", frame_stats.gpu_time));
                });
        }

        if matches!(self.stats_display_mode, StatsDisplayMode::Full) {
            let graph_size = [width - 80.0, 40.0];
            const SCALE_MIN: f32 = 0.0;
            const SCALE_MAX: f32 = 17.0;

            ui.window("Frametime graphs")
                .focus_on_appearing(false)
                .no_decoration()
                .bg_alpha(0.5)
                .position([5.0, height * 0.7], gui::imgui::Condition::Always)
                .size([width - 10.0, 140.0], gui::imgui::Condition::Always)
                .build(|| {
                    ui.plot_lines("Frame", &frame_stats.frame_time_ms_log.0)
                        .scale_min(SCALE_MIN)
                        .scale_max(SCALE_MAX)
                        .graph_size(graph_size)
                        .build();
                    ui.plot_lines("CPU", &frame_stats.cpu_time_ms_log.0)
                        .scale_min(SCALE_MIN)
                        .scale_max(SCALE_MAX)
                        .graph_size(graph_size)
                        .build();
                    ui.plot_lines("GPU", &frame_stats.gpu_time_ms_log.0)
                        .scale_min(SCALE_MIN)
                        .scale_max(SCALE_MAX)
                        .graph_size(graph_size)
                        .build();
                });
        }
    }

    fn record_command_buffer(
        &self,
        buffer: &CommandBuffer,
        image_index: usize,
        base_app: &mut B,
        gui_renderer: &mut Renderer,
        draw_data: &DrawData,
    ) -> Result<()> {
        let swapchain_image = &self.swapchain.images[image_index];
        let swapchain_image_view = &self.swapchain.views[image_index];
        let depth_image = &self.swapchain.depth_images[image_index];

        buffer.reset()?;

        buffer.begin(None)?;

        buffer.reset_all_timestamp_queries_from_pool(self.in_flight_frames.timing_query_pool());

        buffer.write_timestamp(
            vk::PipelineStageFlags2::NONE,
            self.in_flight_frames.timing_query_pool(),
            0,
        );

        // Buffer-only work first, while no attachment is in a render state
        base_app.record_trace_commands(self, buffer, image_index)?;

        buffer.pipeline_image_barriers(&[
            ImageBarrier {
                image: swapchain_image,
                aspect_mask: vk::ImageAspectFlags::COLOR,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                src_access_mask: vk::AccessFlags2::NONE,
                dst_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                src_stage_mask: vk::PipelineStageFlags2::NONE,
                dst_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            },
            // Depth contents never survive a frame, starting from UNDEFINED
            // lets the driver discard the previous image
            ImageBarrier {
                image: depth_image,
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
                src_access_mask: vk::AccessFlags2::NONE,
                dst_access_mask: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
                src_stage_mask: vk::PipelineStageFlags2::NONE,
                dst_stage_mask: vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            },
        ]);

        // Scene rendering
        base_app.record_raster_commands(self, buffer, image_index)?;

        // UI on top of the scene, so the pass loads instead of clearing
        buffer.begin_rendering(
            swapchain_image_view,
            None,
            self.swapchain.extent,
            vk::AttachmentLoadOp::LOAD,
            None,
        );
        let [w, h] = draw_data.display_size;
        if w > f32::EPSILON && h > f32::EPSILON {
            gui_renderer.cmd_draw(buffer.inner, draw_data)?;
        }
        buffer.end_rendering();

        buffer.pipeline_image_barriers(&[ImageBarrier {
            image: swapchain_image,
            aspect_mask: vk::ImageAspectFlags::COLOR,
            old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            src_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            dst_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_READ,
            src_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        }]);

        buffer.write_timestamp(
            vk::PipelineStageFlags2::ALL_COMMANDS,
            self.in_flight_frames.timing_query_pool(),
            1,
        );

        buffer.end()?;

        Ok(())
    }

    fn toggle_stats(&mut self) {
        self.stats_display_mode = self.stats_display_mode.next();
    }
}

fn create_command_buffers(pool: &CommandPool, swapchain: &Swapchain) -> Result<Vec<CommandBuffer>> {
    pool.allocate_command_buffers(vk::CommandBufferLevel::PRIMARY, swapchain.images.len() as _)
}

struct InFlightFrames {
    per_frames: Vec<PerFrame>,
    current_frame: usize,
}

struct PerFrame {
    image_available_semaphore: Semaphore,
    render_finished_semaphore: Semaphore,
    fence: Fence,
    timing_query_pool: TimestampQueryPool<2>,
}

impl InFlightFrames {
    fn new(context: &Context, frame_count: u32) -> Result<Self> {
        let sync_objects = (0..frame_count)
            .map(|_i| {
                let image_available_semaphore = context.create_semaphore()?;
                let render_finished_semaphore = context.create_semaphore()?;
                let fence = context.create_fence(Some(vk::FenceCreateFlags::SIGNALED))?;

                let timing_query_pool = context.create_timestamp_query_pool()?;

                Ok(PerFrame {
                    image_available_semaphore,
                    render_finished_semaphore,
                    fence,
                    timing_query_pool,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            per_frames: sync_objects,
            current_frame: 0,
        })
    }

    fn next(&mut self) {
        self.current_frame = (self.current_frame + 1) % self.per_frames.len();
    }

    fn image_available_semaphore(&self) -> &Semaphore {
        &self.per_frames[self.current_frame].image_available_semaphore
    }

    fn render_finished_semaphore(&self) -> &Semaphore {
        &self.per_frames[self.current_frame].render_finished_semaphore
    }

    fn fence(&self) -> &Fence {
        &self.per_frames[self.current_frame].fence
    }

    fn timing_query_pool(&self) -> &TimestampQueryPool<2> {
        &self.per_frames[self.current_frame].timing_query_pool
    }

    fn gpu_frame_time_ms(&self) -> Result<Duration> {
        let result = self.timing_query_pool().wait_for_all_results()?;
        let time = Duration::from_nanos(result[1].saturating_sub(result[0]));

        Ok(time)
    }
}

#[derive(Debug)]
pub struct FrameStats {
    // we collect gpu timings the frame after it was computed
    // so we keep frame times for the two last frames
    previous_frame_time: Duration,
    pub frame_time: Duration,
    cpu_time: Duration,
    gpu_time: Duration,
    frame_time_ms_log: Queue<f32>,
    cpu_time_ms_log: Queue<f32>,
    gpu_time_ms_log: Queue<f32>,
    total_frame_count: u32,
    pub frame_count: u32,
    fps_counter: u32,
    timer: Duration,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self {
            previous_frame_time: Default::default(),
            frame_time: Default::default(),
            cpu_time: Default::default(),
            gpu_time: Default::default(),
            frame_time_ms_log: Queue::new(FrameStats::MAX_LOG_SIZE),
            cpu_time_ms_log: Queue::new(FrameStats::MAX_LOG_SIZE),
            gpu_time_ms_log: Queue::new(FrameStats::MAX_LOG_SIZE),
            total_frame_count: Default::default(),
            frame_count: Default::default(),
            fps_counter: Default::default(),
            timer: Default::default(),
        }
    }
}

impl FrameStats {
    const ONE_SEC: Duration = Duration::from_secs(1);
    const MAX_LOG_SIZE: usize = 1000;

    fn tick(&mut self) {
        // compute cpu time
        self.cpu_time = self.previous_frame_time.saturating_sub(self.gpu_time);

        // push log
        self.frame_time_ms_log
            .push(self.previous_frame_time.as_millis() as _);
        self.cpu_time_ms_log.push(self.cpu_time.as_millis() as _);
        self.gpu_time_ms_log.push(self.gpu_time.as_millis() as _);

        // increment counter
        self.total_frame_count += 1;
        self.frame_count += 1;
        self.timer += self.frame_time;

        // reset counter if a sec has passed
        if self.timer > FrameStats::ONE_SEC {
            self.fps_counter = self.frame_count;
            self.frame_count = 0;
            self.timer -= FrameStats::ONE_SEC;
        }
    }

    fn set_frame_time(&mut self, frame_time: Duration) {
        self.previous_frame_time = self.frame_time;
        self.frame_time = frame_time;
    }

    fn set_gpu_time(&mut self, gpu_time: Duration) {
        self.gpu_time = gpu_time;
    }
}

#[derive(Debug)]
struct Queue<T>(Vec<T>, usize);

impl<T> Queue<T> {
    fn new(max_size: usize) -> Self {
        Self(Vec::with_capacity(max_size), max_size)
    }

    fn push(&mut self, value: T) {
        if self.0.len() == self.1 {
            self.0.remove(0);
        }
        self.0.push(value);
    }
}
