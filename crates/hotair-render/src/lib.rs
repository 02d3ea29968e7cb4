// SPDX-License-Identifier: CEPL-1.0
use raw_window_handle::{HandleError, RawDisplayHandle, RawWindowHandle};

/// Window size in physical pixels. A resize is detected by inequality
/// against the previously stored value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub const fn new(width: u32, height: u32) -> Self {
        Geometry { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Notifications delivered by one dispatch of the platform event loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlatformEvent {
    /// Edge-triggered, fires once per (re)configuration.
    Configured,
    /// The window geometry changed.
    Resized(Geometry),
    /// The one-shot frame callback fired; it must be re-armed to fire again.
    Frame,
    /// Terminal.
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("display connection failed: {0}")]
    Protocol(String),

    #[error("event loop exited with status {0}")]
    Exited(i32),
}

/// Capability provider for the one window this process draws into.
///
/// All calls happen on the thread that owns the adapter. Events are handed
/// back from `dispatch` instead of being delivered through callbacks, so the
/// caller handles them one at a time and never concurrently with a frame.
pub trait WindowAdapter {
    /// Current window geometry.
    fn geometry(&self) -> Geometry;

    /// Blocks until the display server delivered at least one event.
    fn dispatch(&mut self) -> Result<Vec<PlatformEvent>, DispatchError>;

    /// Arms the one-shot frame callback; exactly one `Frame` follows.
    fn request_frame(&mut self);

    /// Called right before a frame is handed to the presentation engine.
    fn pre_present(&self) {}

    /// Handles used to create the presentable surface.
    fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle), HandleError>;
}
