// SPDX-License-Identifier: CEPL-1.0
use std::time::Duration;

use cubic_render::{RenderSize, Renderer, RendererDesc};
use tracing::{debug, error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::error::OsError;
use winit::event::{KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::PhysicalKey;
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window as WinitWindow, WindowAttributes, WindowId};

use crate::error::PlatformError;
use crate::frame_loop::{run_loop, EventPump, LoopState, StopHandle, WindowCallbacks};
use crate::input::Action;

pub const DEFAULT_TITLE: &str = "Cubic Vulkan renderer";

/// Pumps allowed for the platform to deliver `resumed` at startup.
const STARTUP_PUMPS: u32 = 64;
const STARTUP_PUMP_TIMEOUT: Duration = Duration::from_millis(16);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub validation: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_owned(),
            width: 800,
            height: 600,
            validation: true,
        }
    }
}

/// winit event loop driven one non-blocking pump at a time.
///
/// Field order is drop order: the window goes before its event loop.
struct WinitPump {
    window: Option<WinitWindow>,
    event_loop: EventLoop<()>,
    attributes: WindowAttributes,
    close_requested: bool,
    create_error: Option<OsError>,
}

/// Borrowed view of a [`WinitPump`] handed to winit for the duration of one pump.
struct Dispatch<'a, 'cb> {
    window: &'a mut Option<WinitWindow>,
    attributes: &'a WindowAttributes,
    close_requested: &'a mut bool,
    create_error: &'a mut Option<OsError>,
    callbacks: Option<&'a mut (dyn WindowCallbacks + 'cb)>,
}

impl ApplicationHandler for Dispatch<'_, '_> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => {
                let size = window.inner_size();
                info!("window created: {}x{}", size.width, size.height);
                *self.window = Some(window);
            }
            Err(e) => {
                error!("create_window failed: {e}");
                *self.create_error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if self.window.as_ref().map(|w| w.id()) != Some(window_id) {
            return;
        }

        if let WindowEvent::CloseRequested = event {
            info!("CloseRequested");
            *self.close_requested = true;
            return;
        }

        let Some(callbacks) = self.callbacks.as_deref_mut() else {
            return;
        };
        match event {
            WindowEvent::Resized(size) => callbacks.on_framebuffer_resize(size.width, size.height),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        repeat,
                        ..
                    },
                ..
            } => callbacks.on_key(code, Action::from_winit(state, repeat)),
            WindowEvent::MouseInput { state, button, .. } => {
                callbacks.on_mouse_button(button, Action::from_winit(state, false))
            }
            WindowEvent::CursorMoved { position, .. } => {
                callbacks.on_cursor_move(position.x, position.y)
            }
            _ => {}
        }
    }
}

impl WinitPump {
    fn pump(&mut self, timeout: Option<Duration>, callbacks: Option<&mut dyn WindowCallbacks>) {
        let mut dispatch = Dispatch {
            window: &mut self.window,
            attributes: &self.attributes,
            close_requested: &mut self.close_requested,
            create_error: &mut self.create_error,
            callbacks,
        };
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut dispatch) {
            debug!("event loop exited with {code}");
            self.close_requested = true;
        }
    }

    /// Pumps until `resumed` has produced the window.
    fn wait_for_window(&mut self) -> Result<&WinitWindow, PlatformError> {
        for _ in 0..STARTUP_PUMPS {
            if let Some(e) = self.create_error.take() {
                return Err(PlatformError::WindowCreation(e));
            }
            if self.window.is_some() || self.close_requested {
                break;
            }
            self.pump(Some(STARTUP_PUMP_TIMEOUT), None);
        }
        if let Some(e) = self.create_error.take() {
            return Err(PlatformError::WindowCreation(e));
        }
        self.window.as_ref().ok_or(PlatformError::NoWindow)
    }
}

impl EventPump for WinitPump {
    fn should_close(&self) -> bool {
        self.close_requested
    }

    fn poll_events(&mut self, callbacks: &mut dyn WindowCallbacks) {
        self.pump(Some(Duration::ZERO), Some(callbacks));
    }

    fn wait_events(&mut self, callbacks: &mut dyn WindowCallbacks, timeout: Duration) {
        self.pump(Some(timeout), Some(callbacks));
    }
}

// Drop order: renderer (owns the surface) → window → event loop.
struct Platform<R> {
    renderer: R,
    pump: WinitPump,
}

/// The single window of the process plus its render loop.
///
/// If the windowing system cannot be initialized the controller is built in
/// an inactive state and [`Window::start`] does nothing.
pub struct Window<R: Renderer> {
    state: LoopState,
    platform: Option<Platform<R>>,
}

impl<R: Renderer> Window<R> {
    pub fn new(config: &WindowConfig) -> Result<Self, PlatformError> {
        let mut state = LoopState::new(RenderSize {
            width: config.width,
            height: config.height,
        });

        let event_loop = match EventLoop::new() {
            Ok(event_loop) => event_loop,
            Err(e) => {
                let e = PlatformError::from(e);
                warn!("{e}; window stays inactive");
                return Ok(Self {
                    state,
                    platform: None,
                });
            }
        };

        let attributes = WinitWindow::default_attributes()
            .with_title(config.title.clone())
            .with_inner_size(LogicalSize::new(config.width, config.height));

        let mut pump = WinitPump {
            window: None,
            event_loop,
            attributes,
            close_requested: false,
            create_error: None,
        };

        let window = pump.wait_for_window()?;
        let inner = window.inner_size();
        state.set_size(RenderSize {
            width: inner.width,
            height: inner.height,
        });

        let desc = RendererDesc {
            title: &config.title,
            size: state.size(),
            validation: config.validation,
        };
        let renderer = R::new(window, window, &desc).map_err(PlatformError::Renderer)?;

        Ok(Self {
            state,
            platform: Some(Platform { renderer, pump }),
        })
    }

    pub fn is_active(&self) -> bool {
        self.platform.is_some()
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    /// Stops the loop between frames; usable from another thread while `start` runs.
    pub fn stop_handle(&self) -> StopHandle {
        self.state.stop_handle()
    }

    pub fn stop(&mut self) {
        self.state.stop();
    }

    /// Runs the frame loop until the window is closed or escape is pressed.
    pub fn start(&mut self) {
        let Some(Platform { renderer, pump }) = self.platform.as_mut() else {
            warn!("no window, start ignored");
            return;
        };
        run_loop(&mut self.state, pump, |frame| renderer.draw_frame(frame));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_loop::LoopPhase;
    use cubic_render::FrameInput;
    use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};

    /// Stand-in backend; the inactive window never constructs it.
    struct NullRenderer;

    impl Renderer for NullRenderer {
        fn new(
            _: &dyn HasWindowHandle,
            _: &dyn HasDisplayHandle,
            _: &RendererDesc<'_>,
        ) -> anyhow::Result<Self> {
            Ok(Self)
        }

        fn draw_frame(&mut self, _: FrameInput) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn inactive() -> Window<NullRenderer> {
        Window {
            state: LoopState::new(RenderSize {
                width: 800,
                height: 600,
            }),
            platform: None,
        }
    }

    #[test]
    fn inactive_window_start_is_a_no_op() {
        let mut window = inactive();
        assert!(!window.is_active());
        window.start();
        window.start();
        assert!(!window.is_active());
        assert_eq!(window.state().phase(), LoopPhase::Idle);
        assert!(!window.state().is_running());
    }

    #[test]
    fn stop_on_inactive_window_is_recorded() {
        let mut window = inactive();
        let handle = window.stop_handle();
        window.stop();
        assert!(handle.is_stopped());
        window.start();
        assert_eq!(window.state().phase(), LoopPhase::Idle);
    }

    #[test]
    fn default_config_is_800_by_600_with_validation() {
        let cfg = WindowConfig::default();
        assert_eq!((cfg.width, cfg.height), (800, 600));
        assert_eq!(cfg.title, DEFAULT_TITLE);
        assert!(cfg.validation);
    }
}
