use anyhow::{Context, Result};
use ouroboros::self_referencing;

use winit::application::ApplicationHandler;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use crate::assets::Assets;
use crate::gfx::wgpu_backend::{GfxInit, WgpuBackend};
use crate::render::{FrameOutcome, ResizeOutcome, SurfaceExtent, Viewer};
use crate::time::FrameClock;

/// Window and GPU configuration for [`Runtime::run`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub title: String,
    pub initial_size: LogicalSize<f64>,
    pub gfx: GfxInit,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            title: "prism".to_string(),
            initial_size: LogicalSize::new(800.0, 600.0),
            gfx: GfxInit::default(),
        }
    }
}

/// Entry point: opens one window and runs the viewer until it closes.
pub struct Runtime;

impl Runtime {
    /// Blocks until the window is closed. Startup failures and fatal frame
    /// errors are returned once the event loop has exited.
    pub fn run<A>(config: RuntimeConfig, assets: A) -> Result<()>
    where
        A: Assets + 'static,
    {
        let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
        let mut state = AppState::new(config, assets);

        event_loop
            .run_app(&mut state)
            .context("winit event loop terminated with error")?;

        match state.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn extent_of(size: PhysicalSize<u32>) -> SurfaceExtent {
    SurfaceExtent::new(size.width, size.height)
}

#[self_referencing]
struct WindowEntry {
    clock: FrameClock,

    window: Window,

    #[borrows(window)]
    #[covariant]
    viewer: Viewer<WgpuBackend<'this>>,
}

struct AppState<A: Assets> {
    config: RuntimeConfig,
    assets: A,

    entry: Option<WindowEntry>,
    fatal: Option<anyhow::Error>,
}

impl<A: Assets> AppState<A> {
    fn new(config: RuntimeConfig, assets: A) -> Self {
        Self {
            config,
            assets,
            entry: None,
            fatal: None,
        }
    }

    fn create_window_entry(&mut self, event_loop: &ActiveEventLoop) -> Result<WindowEntry> {
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(self.config.initial_size);

        let window = event_loop
            .create_window(attrs)
            .context("failed to create window")?;

        let extent = extent_of(window.inner_size());
        let gfx = self.config.gfx.clone();
        let assets = &self.assets;

        WindowEntry::try_new(FrameClock::new(), window, |w| {
            let backend = pollster::block_on(WgpuBackend::new(w, gfx))
                .context("GPU initialization failed")?;
            Viewer::new(backend, assets, extent)
        })
    }

    /// Records a fatal error, tears the viewer down and stops the loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("{err:#}");
        self.entry = None;
        self.fatal.get_or_insert(err);
        event_loop.exit();
    }

    fn close(&mut self, event_loop: &ActiveEventLoop) {
        // Dropping the entry drops the viewer before its window.
        self.entry = None;
        event_loop.exit();
    }
}

impl<A: Assets> ApplicationHandler for AppState<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.entry.is_some() {
            return;
        }

        match self.create_window_entry(event_loop) {
            Ok(entry) => {
                entry.borrow_window().request_redraw();
                self.entry = Some(entry);
            }
            Err(e) => self.fail(event_loop, e.context("failed to start viewer")),
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(entry) = &self.entry {
            event_loop.set_control_flow(ControlFlow::Poll);
            entry.borrow_window().request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(entry) = self.entry.as_mut() else {
            return;
        };
        if entry.borrow_window().id() != window_id {
            return;
        }

        let result = match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                self.close(event_loop);
                return;
            }

            WindowEvent::Resized(size) => entry.with_mut(|fields| -> Result<()> {
                let outcome = fields.viewer.resize(size.width, size.height)?;
                log::debug!("resize {}x{}: {outcome:?}", size.width, size.height);
                if outcome == ResizeOutcome::Applied {
                    // Resize time does not count as frame delta.
                    fields.clock.reset();
                }
                Ok(())
            }),

            WindowEvent::ScaleFactorChanged { .. } => {
                let size = entry.borrow_window().inner_size();
                entry
                    .with_viewer_mut(|viewer| viewer.resize(size.width, size.height))
                    .map(|_| ())
            }

            WindowEvent::RedrawRequested => entry.with_mut(|fields| {
                let time = fields.clock.tick();
                fields.viewer.frame(time.elapsed).map(|outcome| {
                    if outcome == FrameOutcome::Skipped {
                        log::trace!("frame {} skipped", time.frame_index);
                    }
                })
            }),

            _ => Ok(()),
        };

        if let Err(e) = result {
            self.fail(event_loop, e);
        }
    }
}
