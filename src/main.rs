// =============================================================================
// HELLO TRIANGLE - Vulkan via ash + winit
// =============================================================================
//
// INITIALIZATION ORDER (teardown runs the exact reverse):
// ┌─────────────────────────────────────────────────────────────────┐
// │  instance -> debug messenger -> surface -> GPU -> device        │
// │    └── swapchain -> image views                                 │
// │          └── render pass -> pipeline -> framebuffers            │
// │                └── command pool/buffers -> sync objects         │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for this frame slot's fence
// 2. Acquire swapchain image
// 3. Re-record the command buffer for that image
// 4. Submit to the graphics queue
// 5. Present on the present queue
//
// Any failure is fatal: it is logged, the loop stops, and main returns it.
// =============================================================================

mod backend;
mod config;

use anyhow::{Context, Result};
use ash::vk;
use backend::command::{self, CommandPool, DrawTarget};
use backend::pipeline::{Framebuffers, TrianglePipeline};
use backend::swapchain::Acquire;
use backend::sync::FrameSync;
use backend::{Swapchain, VulkanDevice};
use config::Config;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes, WindowId},
};

const CONFIG_PATH: &str = "config.toml";

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Config decides the log level, so report its problems once logging is up
    let loaded = Config::load_from_path(CONFIG_PATH);
    let log_level = match &loaded {
        Ok(Some(config)) => config.debug.log_level.clone(),
        _ => Config::default().debug.log_level,
    };
    init_logging(&log_level);

    let config = match loaded {
        Ok(Some(config)) => {
            log::info!("Loaded configuration from {}", CONFIG_PATH);
            log::debug!("Config: {:?}", config);
            config
        }
        Ok(None) => {
            log::info!("Config file not found at {}, using defaults", CONFIG_PATH);
            Config::default()
        }
        Err(e) => {
            log::warn!("Failed to load {}: {:#}. Using defaults.", CONFIG_PATH, e);
            Config::default()
        }
    };

    log::info!("Starting hello triangle");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.resizable { "resizable" } else { "fixed size" }
    );
    log::info!("Preferred present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// `RUST_LOG` wins over the configured level
fn init_logging(default_level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Main application struct holding all Vulkan resources.
///
/// IMPORTANT: Field order matters for Drop! Fields drop top to bottom after
/// `App::drop` has released the sync objects, and every owning field holds
/// its own `Arc` of the device, so the device and surface go last, then the
/// window they were created for.
struct App {
    config: Config,

    // ─────────────────────────────────────────────────────────────────────────
    // COMMANDS
    // ─────────────────────────────────────────────────────────────────────────
    command_pool: Option<CommandPool>,
    /// One command buffer per frame in flight, re-recorded every frame
    command_buffers: Vec<vk::CommandBuffer>,

    // ─────────────────────────────────────────────────────────────────────────
    // PRESENTATION
    // ─────────────────────────────────────────────────────────────────────────
    framebuffers: Option<Framebuffers>,
    pipeline: Option<TrianglePipeline>,
    swapchain: Option<Swapchain>,

    // ─────────────────────────────────────────────────────────────────────────
    // SYNCHRONIZATION
    // ─────────────────────────────────────────────────────────────────────────
    frame_sync: Vec<FrameSync>,
    /// Which sync slot we're currently using (0 to frames_in_flight-1)
    current_frame: usize,
    wait_stages: [vk::PipelineStageFlags; 1],

    // ─────────────────────────────────────────────────────────────────────────
    // VULKAN CORE & WINDOW
    // ─────────────────────────────────────────────────────────────────────────
    device: Option<Arc<VulkanDevice>>,
    window: Option<Window>,

    // ─────────────────────────────────────────────────────────────────────────
    // STATE FLAGS
    // ─────────────────────────────────────────────────────────────────────────
    /// Set when the swapchain no longer matches the window
    needs_resize: bool,
    /// Set while the window has zero area - skip rendering
    is_minimized: bool,
    /// First fatal error, handed back to main
    error: Option<anyhow::Error>,

    // ─────────────────────────────────────────────────────────────────────────
    // FPS TRACKING
    // ─────────────────────────────────────────────────────────────────────────
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            command_pool: None,
            command_buffers: Vec::new(),
            framebuffers: None,
            pipeline: None,
            swapchain: None,
            frame_sync: Vec::new(),
            current_frame: 0,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            device: None,
            window: None,
            needs_resize: false,
            is_minimized: false,
            error: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Create every Vulkan object, in dependency order.
    fn init_vulkan(&mut self, window: &Window) -> Result<()> {
        log::info!("Initializing Vulkan...");

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Instance, debug messenger, surface, GPU, logical device
        // ─────────────────────────────────────────────────────────────────────
        let device = VulkanDevice::new(
            &self.config.window.title,
            self.config.validation_enabled(),
            window,
        )?;
        self.device = Some(device.clone());

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Swapchain, image views, render pass, pipeline, framebuffers
        // ─────────────────────────────────────────────────────────────────────
        self.create_swapchain_resources(window.inner_size())?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Command pool and one command buffer per frame in flight
        // ─────────────────────────────────────────────────────────────────────
        let frames_in_flight = self.config.frames_in_flight();
        let command_pool = CommandPool::new(device.clone(), device.queue_families.graphics)?;
        let buffer_count =
            u32::try_from(frames_in_flight).context("Too many frames in flight")?;
        self.command_buffers = command_pool.allocate(buffer_count)?;
        self.command_pool = Some(command_pool);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Synchronization primitives
        // ─────────────────────────────────────────────────────────────────────
        for _ in 0..frames_in_flight {
            self.frame_sync.push(FrameSync::new(&device)?);
        }

        log::info!(
            "Vulkan initialized successfully ({} frame(s) in flight)",
            frames_in_flight
        );
        Ok(())
    }

    /// Create swapchain, image views and framebuffers for the given size.
    ///
    /// Also (re)creates the render pass and pipeline when the surface format
    /// differs from the one they were built for.
    fn create_swapchain_resources(&mut self, size: PhysicalSize<u32>) -> Result<()> {
        let device = self.device.clone().context("Device not initialized")?;

        // Don't create swapchain if window is minimized (size = 0)
        if size.width == 0 || size.height == 0 {
            self.is_minimized = true;
            return Ok(());
        }
        self.is_minimized = false;

        // The surface can only have one swapchain at a time, and framebuffers
        // reference the old image views
        self.framebuffers = None;
        self.swapchain = None;

        let swapchain = Swapchain::new(
            device.clone(),
            self.config.preferred_present_mode(),
            size.width,
            size.height,
        )?;

        let format_changed = self
            .pipeline
            .as_ref()
            .map_or(true, |pipeline| pipeline.format != swapchain.format);
        if format_changed {
            self.pipeline = None;
            self.pipeline = Some(TrianglePipeline::new(
                device.clone(),
                swapchain.format,
                &self.config.shaders.vertex,
                &self.config.shaders.fragment,
            )?);
        }
        let pipeline = self.pipeline.as_ref().context("Pipeline not initialized")?;

        let framebuffers = Framebuffers::new(
            device,
            pipeline.render_pass,
            &swapchain.image_views,
            swapchain.extent,
        )?;

        log::info!("Created {} framebuffers", framebuffers.framebuffers.len());

        self.swapchain = Some(swapchain);
        self.framebuffers = Some(framebuffers);
        self.needs_resize = false;

        Ok(())
    }

    /// Recreate swapchain after the window changed size.
    fn recreate_swapchain(&mut self) -> Result<()> {
        // Wait for GPU to finish all work before destroying resources
        if let Some(ref device) = self.device {
            device.wait_idle()?;
        }

        let size = self.window.as_ref().context("Window not created")?.inner_size();
        log::debug!("Recreating swapchain at {}x{}", size.width, size.height);
        self.create_swapchain_resources(size)
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Render a single frame. Returns whether a frame was presented.
    fn render_frame(&mut self) -> Result<bool> {
        if self.needs_resize {
            self.recreate_swapchain()?;
        }

        // Skip rendering if minimized
        if self.is_minimized {
            return Ok(false);
        }

        let device = self.device.as_ref().context("Device not initialized")?;
        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;
        let pipeline = self.pipeline.as_ref().context("Pipeline not initialized")?;
        let framebuffers = self.framebuffers.as_ref().context("Framebuffers not initialized")?;
        let sync = &self.frame_sync[self.current_frame];
        let cmd = self.command_buffers[self.current_frame];

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait until the GPU is done with this slot's last frame
        // ─────────────────────────────────────────────────────────────────────
        unsafe { device.device.wait_for_fences(&[sync.in_flight_fence], true, u64::MAX) }
            .context("Failed to wait for in-flight fence")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire next swapchain image
        // ─────────────────────────────────────────────────────────────────────
        let image_index = match swapchain.acquire_next_image(u64::MAX, sync.image_available)? {
            Acquire::Image(index, suboptimal) => {
                // Still usable this frame; rebuild before the next one
                if suboptimal {
                    self.needs_resize = true;
                }
                index
            }
            Acquire::OutOfDate => {
                self.needs_resize = true;
                return Ok(false);
            }
        };

        // Only reset once work is certain to be submitted, or the next wait hangs
        unsafe { device.device.reset_fences(&[sync.in_flight_fence]) }
            .context("Failed to reset in-flight fence")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Record the triangle for this image
        // ─────────────────────────────────────────────────────────────────────
        let target = DrawTarget {
            render_pass: pipeline.render_pass,
            pipeline: pipeline.pipeline,
            framebuffer: framebuffers.framebuffers[image_index as usize],
            extent: swapchain.extent,
            clear_color: self.config.graphics.clear_color,
        };

        unsafe { device.device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty()) }
            .context("Failed to reset command buffer")?;
        command::record_triangle(&device.device, cmd, &target)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Submit
        // ─────────────────────────────────────────────────────────────────────
        let wait_semaphores = [sync.image_available];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores) // Wait for image to be available
            .wait_dst_stage_mask(&self.wait_stages) // Which stage waits
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores); // Signal when done

        unsafe {
            device.device.queue_submit(
                device.graphics_queue,
                &[submit_info.build()],
                sync.in_flight_fence, // Signal this fence when GPU is done
            )
        }
        .context("Failed to submit draw command buffer")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Present
        // ─────────────────────────────────────────────────────────────────────
        if swapchain.present(device.present_queue, image_index, &signal_semaphores)? {
            self.needs_resize = true;
        }

        self.current_frame = (self.current_frame + 1) % self.frame_sync.len();

        Ok(true)
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    /// Track the window's framebuffer size; zero area pauses rendering
    fn handle_resize(&mut self, size: PhysicalSize<u32>) {
        if size.width == 0 || size.height == 0 {
            self.is_minimized = true;
        } else {
            self.is_minimized = false;
            self.needs_resize = true;
        }
    }

    /// Whether the loop should keep asking for frames
    fn keeps_drawing(&self) -> bool {
        !self.is_minimized && self.error.is_none()
    }

    /// Record a fatal error and stop the event loop
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(self.config.window.resizable);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => w,
            Err(e) => {
                self.fail(event_loop, anyhow::anyhow!("Failed to create window: {}", e));
                return;
            }
        };

        if let Err(e) = self.init_vulkan(&window) {
            self.window = Some(window);
            self.fail(event_loop, e.context("Failed to initialize Vulkan"));
            return;
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref device) = self.device {
                    if let Err(e) = device.wait_idle() {
                        log::error!("{:#}", e);
                    }
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.handle_resize(size);
            }

            WindowEvent::RedrawRequested => {
                if self.error.is_some() {
                    return;
                }
                match self.render_frame() {
                    Ok(true) => self.update_fps(),
                    Ok(false) => {}
                    Err(e) => self.fail(event_loop, e.context("Render error")),
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Keep drawing continuously, like a poll loop. A minimized window
    /// sleeps until the next `Resized` event.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if !self.keeps_drawing() {
            return;
        }
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        if let Some(ref device) = self.device {
            // Wait for GPU to finish before destroying anything
            let _ = device.wait_idle();

            // Sync objects hold no Arc, destroy them by hand
            for sync in &self.frame_sync {
                sync.destroy(&device.device);
            }
        }
        self.frame_sync.clear();

        // The rest goes in field order: command pool, framebuffers, pipeline,
        // swapchain, then the device (surface, messenger, instance), then the window
        log::info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimized_window_stops_redraws() {
        let mut app = App::new(Config::default());
        assert!(app.keeps_drawing());

        app.handle_resize(PhysicalSize::new(0, 0));
        assert!(app.is_minimized);
        assert!(!app.needs_resize);
        assert!(!app.keeps_drawing());

        app.handle_resize(PhysicalSize::new(800, 0));
        assert!(!app.keeps_drawing());
    }

    #[test]
    fn restored_window_resumes_and_rebuilds() {
        let mut app = App::new(Config::default());
        app.handle_resize(PhysicalSize::new(0, 0));
        app.handle_resize(PhysicalSize::new(1024, 768));

        assert!(!app.is_minimized);
        assert!(app.needs_resize);
        assert!(app.keeps_drawing());
    }

    #[test]
    fn failed_app_stops_redraws() {
        let mut app = App::new(Config::default());
        app.error = Some(anyhow::anyhow!("device lost"));
        assert!(!app.keeps_drawing());
    }
}
