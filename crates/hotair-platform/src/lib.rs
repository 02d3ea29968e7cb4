// SPDX-License-Identifier: CEPL-1.0
//! Wayland window backed by winit, exposed through [`WindowAdapter`].
//!
//! winit's application callbacks are folded into batches of
//! [`PlatformEvent`]s by pumping the event loop from `dispatch`, so the
//! frame loop stays the only owner of control flow.

use hotair_render::{DispatchError, Geometry, PlatformEvent, WindowAdapter};
use raw_window_handle::{HandleError, HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error, info, trace, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::platform::wayland::{EventLoopBuilderExtWayland, WindowAttributesExtWayland};
use winit::window::{Fullscreen, Window, WindowId};

/// How the toplevel is created.
#[derive(Clone, Debug)]
pub struct WindowSettings {
    pub title: String,
    pub app_id: String,
    pub geometry: Geometry,
    pub fullscreen: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        WindowSettings {
            title: "HotAir".to_owned(),
            app_id: "hotair".to_owned(),
            geometry: Geometry::new(800, 600),
            fullscreen: false,
        }
    }
}

/// Receives winit callbacks and queues them as platform events.
struct Shell {
    settings: WindowSettings,
    window: Option<Window>,
    geometry: Geometry,
    events: Vec<PlatformEvent>,
    error: Option<DispatchError>,
    frame_armed: bool,
}

impl Shell {
    fn new(settings: WindowSettings) -> Self {
        Shell {
            geometry: settings.geometry,
            settings,
            window: None,
            events: Vec::new(),
            error: None,
            frame_armed: false,
        }
    }

    fn create_window(&mut self, event_loop: &ActiveEventLoop) -> Result<Window, DispatchError> {
        let mut attrs = Window::default_attributes()
            .with_title(self.settings.title.as_str())
            .with_name(self.settings.app_id.as_str(), "")
            .with_inner_size(PhysicalSize::new(self.geometry.width, self.geometry.height));
        if self.settings.fullscreen {
            attrs = attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        event_loop.create_window(attrs).map_err(|e| DispatchError::Protocol(e.to_string()))
    }
}

impl ApplicationHandler for Shell {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        event_loop.set_control_flow(ControlFlow::Wait);
        match self.create_window(event_loop) {
            Ok(window) => {
                let size = window.inner_size();
                if size.width > 0 && size.height > 0 {
                    self.geometry = Geometry::new(size.width, size.height);
                }
                info!(
                    "window \"{}\" created at {}x{}{}",
                    self.settings.title,
                    self.geometry.width,
                    self.geometry.height,
                    if self.settings.fullscreen { " (fullscreen)" } else { "" }
                );
                self.window = Some(window);
                self.events.push(PlatformEvent::Configured);
            }
            Err(e) => {
                error!("window creation failed: {e}");
                self.error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(ev) = translate(event, &mut self.geometry, &mut self.frame_armed) {
            self.events.push(ev);
        }
    }
}

/// Maps a winit window event onto the platform events the frame loop
/// understands. Redraws only count while a frame is armed.
fn translate(event: WindowEvent, geometry: &mut Geometry, frame_armed: &mut bool) -> Option<PlatformEvent> {
    match event {
        WindowEvent::Resized(size) => {
            let next = Geometry::new(size.width, size.height);
            if next == *geometry {
                return None;
            }
            *geometry = next;
            Some(PlatformEvent::Resized(next))
        }
        WindowEvent::RedrawRequested => {
            if !*frame_armed {
                trace!("unrequested redraw dropped");
                return None;
            }
            *frame_armed = false;
            Some(PlatformEvent::Frame)
        }
        WindowEvent::CloseRequested | WindowEvent::Destroyed => Some(PlatformEvent::Closed),
        _ => None,
    }
}

/// The single Wayland toplevel this process renders into.
pub struct WaylandWindow {
    // The window must go before the event loop that owns its connection.
    shell: Shell,
    event_loop: EventLoop<()>,
    exited: bool,
}

impl WaylandWindow {
    /// Connects to the compositor and creates the toplevel. The initial
    /// `Configured` event stays queued for the first `dispatch`.
    pub fn open(settings: WindowSettings) -> Result<Self, DispatchError> {
        let event_loop = EventLoop::builder()
            .with_wayland()
            .build()
            .map_err(|e| DispatchError::Protocol(e.to_string()))?;
        let mut window = WaylandWindow { shell: Shell::new(settings), event_loop, exited: false };

        while window.shell.window.is_none() {
            let status = window.event_loop.pump_app_events(None, &mut window.shell);
            if let Some(e) = window.shell.error.take() {
                return Err(e);
            }
            if let PumpStatus::Exit(code) = status {
                return Err(DispatchError::Exited(code));
            }
        }
        debug!("wayland connection established");
        Ok(window)
    }

    pub fn window(&self) -> Option<&Window> {
        self.shell.window.as_ref()
    }
}

impl WindowAdapter for WaylandWindow {
    fn geometry(&self) -> Geometry {
        self.shell.geometry
    }

    fn dispatch(&mut self) -> Result<Vec<PlatformEvent>, DispatchError> {
        if self.exited {
            return Ok(vec![PlatformEvent::Closed]);
        }
        loop {
            let status = self.event_loop.pump_app_events(None, &mut self.shell);
            if let Some(e) = self.shell.error.take() {
                return Err(e);
            }
            let mut events = std::mem::take(&mut self.shell.events);
            if let PumpStatus::Exit(code) = status {
                self.exited = true;
                if code != 0 {
                    warn!("event loop exited with status {code}");
                    return Err(DispatchError::Exited(code));
                }
                if !events.contains(&PlatformEvent::Closed) {
                    events.push(PlatformEvent::Closed);
                }
            }
            if !events.is_empty() {
                return Ok(events);
            }
        }
    }

    fn request_frame(&mut self) {
        self.shell.frame_armed = true;
        if let Some(window) = self.shell.window.as_ref() {
            window.request_redraw();
        }
    }

    fn pre_present(&self) {
        if let Some(window) = self.shell.window.as_ref() {
            window.pre_present_notify();
        }
    }

    fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle), HandleError> {
        let window = self.shell.window.as_ref().ok_or(HandleError::Unavailable)?;
        Ok((window.display_handle()?.as_raw(), window.window_handle()?.as_raw()))
    }
}
