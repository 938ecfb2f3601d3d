//! Window management using winit
//!
//! The host loop owns the window and input routing; rendering goes through
//! the [`FrameRenderer`] capability so the engine stays independent of
//! windowing concerns.

use crate::backend::traits::{BackendError, BackendResult};
use crate::engine::FrameRenderer;
use std::sync::Arc;
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, Event, KeyEvent, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window as WinitWindow, WindowBuilder},
};

/// Wrapper around winit window with additional state
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
}

impl Window {
    /// Create a new window with the given title and dimensions
    pub fn new(event_loop: &EventLoop<()>, title: &str, width: u32, height: u32) -> Self {
        let window = Arc::new(
            WindowBuilder::new()
                .with_title(title)
                .with_inner_size(PhysicalSize::new(width, height))
                .build(event_loop)
                .expect("Failed to create window"),
        );

        Self {
            window,
            width,
            height,
            resized: false,
            close_requested: false,
        }
    }

    /// Get the raw window for backend initialization
    pub fn window(&self) -> &WinitWindow {
        &self.window
    }

    /// Get arc reference to window
    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    /// Get current window dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Check if window was resized since last frame
    pub fn was_resized(&self) -> bool {
        self.resized
    }

    /// Clear the resize flag
    pub fn clear_resize_flag(&mut self) {
        self.resized = false;
    }

    /// Check if close was requested
    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    /// Handle window events
    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            _ => {}
        }
    }

    /// Request a redraw
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

/// Run a renderer against a new window until close.
///
/// `build` receives the created window and produces the renderer. One
/// frame renders per tick with the current client size; resizes are
/// forwarded before the frame. Escape and window close shut the renderer
/// down and exit; every other key event goes to `on_key`, so the renderer
/// itself never sees input. A render error that escapes the renderer's own
/// recovery is fatal: it is logged and the loop exits.
pub fn run<R, F, K>(
    title: &str,
    width: u32,
    height: u32,
    build: F,
    mut on_key: K,
) -> BackendResult<()>
where
    R: FrameRenderer + 'static,
    F: FnOnce(Arc<WinitWindow>) -> BackendResult<R>,
    K: FnMut(&mut R, KeyCode, ElementState) + 'static,
{
    let event_loop = EventLoop::new()
        .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;
    let mut window = Window::new(&event_loop, title, width, height);
    let mut renderer = build(window.window_arc())?;

    event_loop
        .run(move |event, elwt: &EventLoopWindowTarget<()>| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => {
                    window.handle_event(&event);

                    match event {
                        WindowEvent::CloseRequested => {
                            renderer.shutdown();
                            elwt.exit();
                        }
                        WindowEvent::KeyboardInput {
                            event:
                                KeyEvent {
                                    physical_key: PhysicalKey::Code(code),
                                    state,
                                    ..
                                },
                            ..
                        } => {
                            if code == KeyCode::Escape && state == ElementState::Pressed {
                                renderer.shutdown();
                                elwt.exit();
                            } else {
                                on_key(&mut renderer, code, state);
                            }
                        }
                        _ => {}
                    }
                }
                Event::AboutToWait => {
                    if window.was_resized() {
                        let (w, h) = window.dimensions();
                        renderer.resize(w, h);
                        window.clear_resize_flag();
                    }

                    let (w, h) = window.dimensions();
                    if let Err(err) = renderer.render_frame(w, h) {
                        log::error!("render failed: {err}");
                        renderer.shutdown();
                        elwt.exit();
                        return;
                    }

                    window.request_redraw();
                }
                _ => {}
            }
        })
        .map_err(|e| BackendError::InitializationFailed(e.to_string()))
}
