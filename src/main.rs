// =============================================================================
// HELLO TRIANGLE - Vulkan triangle with frames in flight
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (App)                                         │
// │    └── Renderer                                                 │
// │          ├── VulkanDevice (instance, surface, queue)            │
// │          ├── FrameRing (N slots: commands, sync, uniform set)   │
// │          └── DeletionQueue (everything above, released LIFO)    │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for the slot's fence (frame mod N), reset it
// 2. Acquire swapchain image
// 3. Write camera uniform, record render pass, draw 3 vertices
// 4. Submit, present, advance the frame counter
//
// =============================================================================

mod backend;
mod config;
mod renderer;
mod triangle;

use anyhow::{Context, Result};
use config::{Config, LoggingConfig};
use renderer::Renderer;
use std::fs::File;
use std::io::Write;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowAttributes, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let (config, config_error) = Config::load();

    init_logging(&config.logging)?;
    if let Some(e) = config_error {
        log::warn!(target: "application", "Using default configuration: {:#}", e);
    }

    log::info!(target: "application", "Starting {}", config.window.title);
    log::info!(target: "application", "Window: {}x{}, {} frames in flight",
        config.window.width,
        config.window.height,
        config.graphics.frame_overlap
    );

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Set up env_logger from the logging section. `RUST_LOG` takes precedence
/// over the configured level.
fn init_logging(config: &LoggingConfig) -> Result<()> {
    use env_logger::{Builder, Target};

    let mut builder = Builder::new();
    builder.parse_filters(&config.level);
    builder.parse_default_env();

    if config.log_to_file {
        let mut file = File::create(&config.log_file)
            .with_context(|| format!("Failed to create log file {:?}", config.log_file))?;
        writeln!(file, "=== Hello Triangle Log ===")?;
        writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
        writeln!(file)?;

        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("Failed to initialize logger")?;
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Window plus renderer, driven by winit.
///
/// The renderer is declared before the window so it is dropped first; the
/// surface must go before the window it was created for.
struct App {
    config: Config,
    renderer: Option<Renderer>,
    window: Option<Window>,
    /// First fatal error; returned from `main` once the loop exits
    error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            error: None,
        }
    }

    fn create_window_and_renderer(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(self.config.window.resizable);

        let window = event_loop
            .create_window(window_attributes)
            .context("Failed to create window")?;

        let size = window.inner_size();
        let renderer = Renderer::new(&self.config, &window, size.width, size.height)?;

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    /// Record a fatal error and stop the event loop. Only the first error
    /// is kept.
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!(target: "application", "{:#}", error);
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut renderer) = self.renderer.take() {
            log::info!(target: "application", "Exiting after {} frames", renderer.frame());
            if let Err(e) = renderer.shutdown() {
                self.fail(event_loop, e);
            }
        }
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

        if let Err(e) = self.create_window_and_renderer(event_loop) {
            self.fail(event_loop, e.context("Failed to initialize renderer"));
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!(target: "application", "Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!(target: "application", "ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            WindowEvent::RedrawRequested => {
                if event_loop.exiting() {
                    return;
                }
                let result = match self.renderer.as_mut() {
                    Some(renderer) => renderer.render(),
                    None => Ok(()),
                };
                if let Err(e) = result {
                    self.fail(event_loop, e.context("Frame failed"));
                }
            }

            _ => {}
        }
    }

    /// Redraw continuously.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, event_loop: &ActiveEventLoop) {
        self.shutdown(event_loop);
    }
}
