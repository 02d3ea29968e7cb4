// SPDX-License-Identifier: CEPL-1.0
//! Window lifecycle and per-frame protocol.
//!
//! The loop owns the resources that are rebuilt on resize and drives them
//! from the window's dispatch results. The graphics context is created once
//! and outlives every rebuild.

use std::rc::Rc;
use std::str::FromStr;
use std::time::{Duration, Instant};

use ash::vk;
use hotair_core::{ConfigError, ConfigStore, Key};
use hotair_render::{DispatchError, Geometry, PlatformEvent, WindowAdapter};
use serde::Deserialize;
use tracing::{debug, info, trace, warn};

use crate::commands::CommandResources;
use crate::context::ContextSlot;
use crate::error::GpuError;
use crate::gpu::{Acquired, ClearPass, Gpu, Presented, QueueRole, Submission};
use crate::swapchain::SwapchainResources;
use crate::sync::FrameSync;

pub const CLEAR_COLOR: [f32; 4] = [1.0, 0.3, 0.0, 1.0];

const ACQUIRE: &str = "vkAcquireNextImageKHR";
const PRESENT: &str = "vkQueuePresentKHR";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Uninitialized,
    Configuring,
    Running,
    Resizing,
    Closed,
}

/// What a stale swapchain reported by acquire or present leads to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutOfDatePolicy {
    /// Stop with an error.
    #[default]
    Fatal,
    /// Rebuild the swapchain and keep going.
    Rebuild,
}

impl FromStr for OutOfDatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fatal" => Ok(OutOfDatePolicy::Fatal),
            "rebuild" => Ok(OutOfDatePolicy::Rebuild),
            other => Err(format!("unknown out-of-date policy `{other}` (expected fatal or rebuild)")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("persisting window geometry: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Clone, Copy, Debug)]
pub struct FrameLoopOptions {
    pub clear_color: [f32; 4],
    pub on_out_of_date: OutOfDatePolicy,
}

impl Default for FrameLoopOptions {
    fn default() -> Self {
        FrameLoopOptions { clear_color: CLEAR_COLOR, on_out_of_date: OutOfDatePolicy::Fatal }
    }
}

/// Passed to the tick hook before each frame-callback redraw.
#[derive(Clone, Copy, Debug)]
pub struct FrameTick {
    /// Frames presented so far.
    pub frame: u64,
    pub extent: vk::Extent2D,
}

/// Outcome of one pass through the frame protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Presented, but the swapchain no longer matches the surface.
    PresentedStale,
    /// Nothing drawn; the swapchain has to be rebuilt first.
    Skipped,
}

/// Everything that is torn down and rebuilt on resize.
///
/// Dropping idles the device first. Fields then drop in declaration order,
/// the reverse of creation: sync objects, command buffers and pools, then
/// the swapchain set.
pub struct FrameResources {
    sync: FrameSync,
    commands: CommandResources,
    swapchain: SwapchainResources,
    gpu: Rc<dyn Gpu>,
    idle: bool,
}

impl FrameResources {
    pub fn new(gpu: &Rc<dyn Gpu>, window: Geometry) -> Result<Self, GpuError> {
        let swapchain = SwapchainResources::new(gpu, window)?;
        let commands = CommandResources::new(gpu, swapchain.len())?;
        let sync = FrameSync::new(gpu)?;
        Ok(FrameResources { sync, commands, swapchain, gpu: Rc::clone(gpu), idle: false })
    }

    pub fn swapchain(&self) -> &SwapchainResources {
        &self.swapchain
    }

    pub fn commands(&self) -> &CommandResources {
        &self.commands
    }

    pub fn sync(&self) -> &FrameSync {
        &self.sync
    }

    /// Waits for the device to go idle, then releases everything.
    pub fn retire(mut self) -> Result<(), GpuError> {
        self.gpu.wait_idle()?;
        self.idle = true;
        Ok(())
    }

    /// Fence wait and reset, acquire, record, submit, present.
    pub fn draw(
        &self,
        clear_color: [f32; 4],
        policy: OutOfDatePolicy,
        before_present: impl FnOnce(),
    ) -> Result<FrameStatus, GpuError> {
        let gpu = &self.gpu;
        let fence = self.sync.in_flight();
        gpu.wait_for_fence(fence, u64::MAX)?;
        gpu.reset_fence(fence)?;

        let swapchain = self.swapchain.swapchain();
        let (index, stale) = match gpu.acquire_next_image(swapchain, self.sync.image_available(), u64::MAX)? {
            Acquired::Ready(index) => (index, false),
            Acquired::Suboptimal(index) => match policy {
                OutOfDatePolicy::Fatal => return Err(GpuError::Suboptimal { op: ACQUIRE }),
                OutOfDatePolicy::Rebuild => (index, true),
            },
            Acquired::OutOfDate => match policy {
                OutOfDatePolicy::Fatal => return Err(GpuError::OutOfDate { op: ACQUIRE }),
                OutOfDatePolicy::Rebuild => return Ok(FrameStatus::Skipped),
            },
        };

        let (command_buffer, framebuffer) = match (
            self.commands.graphics(index as usize),
            self.swapchain.framebuffer(index as usize),
        ) {
            (Some(cb), Some(fb)) => (cb, fb),
            _ => return Err(GpuError::ImageIndexOutOfRange { index, len: self.swapchain.len() }),
        };

        gpu.record_clear_pass(
            command_buffer,
            &ClearPass {
                render_pass: self.swapchain.render_pass(),
                framebuffer,
                extent: self.swapchain.extent(),
                clear_color,
            },
        )?;

        gpu.submit(
            QueueRole::Graphics,
            &Submission {
                command_buffer,
                wait_semaphore: self.sync.image_available(),
                wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                signal_semaphore: self.sync.render_finished(),
                fence,
            },
        )?;

        before_present();
        let presented = gpu.present(swapchain, index, self.sync.render_finished())?;
        match (presented, policy) {
            (Presented::Done, _) if !stale => Ok(FrameStatus::Presented),
            (Presented::Done, _) => Ok(FrameStatus::PresentedStale),
            (Presented::Suboptimal, OutOfDatePolicy::Fatal) => Err(GpuError::Suboptimal { op: PRESENT }),
            (Presented::OutOfDate, OutOfDatePolicy::Fatal) => Err(GpuError::OutOfDate { op: PRESENT }),
            (_, OutOfDatePolicy::Rebuild) => Ok(FrameStatus::PresentedStale),
        }
    }
}

impl Drop for FrameResources {
    fn drop(&mut self) {
        if !self.idle {
            if let Err(e) = self.gpu.wait_idle() {
                warn!("device idle before frame teardown failed: {e}");
            }
        }
        debug!("releasing frame resources");
    }
}

struct FpsCounter {
    frames: u32,
    since: Instant,
}

impl FpsCounter {
    fn new() -> Self {
        FpsCounter { frames: 0, since: Instant::now() }
    }

    fn tick(&mut self) {
        self.frames += 1;
        let elapsed = self.since.elapsed();
        if elapsed >= Duration::from_secs(1) {
            debug!("{:.1} fps", f64::from(self.frames) / elapsed.as_secs_f64());
            self.frames = 0;
            self.since = Instant::now();
        }
    }
}

type TickHook = Box<dyn FnMut(&FrameTick) -> bool>;

/// Drives one window through configure, draw, resize and close.
pub struct FrameLoop<W: WindowAdapter, C: ConfigStore> {
    // Drop order: per-frame objects, then the context, then the window the
    // surface was created from.
    resources: Option<FrameResources>,
    context: ContextSlot,
    window: W,
    config: C,
    options: FrameLoopOptions,
    state: LoopState,
    geometry: Geometry,
    configured: bool,
    ready: bool,
    closed: bool,
    halted: bool,
    frame_armed: bool,
    on_tick: Option<TickHook>,
    frames: u64,
    fps: FpsCounter,
}

impl<W: WindowAdapter, C: ConfigStore> FrameLoop<W, C> {
    pub fn new(window: W, config: C, options: FrameLoopOptions) -> Self {
        let geometry = window.geometry();
        FrameLoop {
            resources: None,
            context: ContextSlot::default(),
            window,
            config,
            options,
            state: LoopState::Uninitialized,
            geometry,
            configured: false,
            ready: false,
            closed: false,
            halted: false,
            frame_armed: false,
            on_tick: None,
            frames: 0,
            fps: FpsCounter::new(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn resources(&self) -> Option<&FrameResources> {
        self.resources.as_ref()
    }

    /// Called before every frame-callback redraw. Returning false stops
    /// redrawing; the window stays open until it is closed.
    pub fn on_tick(&mut self, hook: impl FnMut(&FrameTick) -> bool + 'static) {
        self.on_tick = Some(Box::new(hook));
    }

    /// Creates the graphics context for this loop's window. Calling it again
    /// keeps the existing context.
    pub fn create_context<F>(&mut self, create: F) -> Result<Rc<dyn Gpu>, LoopError>
    where
        F: FnOnce(&W) -> Result<Rc<dyn Gpu>, GpuError>,
    {
        let window = &self.window;
        let gpu = self.context.get_or_try_init(|| create(window))?;
        if self.state == LoopState::Uninitialized {
            self.state = LoopState::Configuring;
        }
        Ok(gpu)
    }

    /// Pumps dispatch until the window is configured or closed.
    pub fn wait_configured(&mut self) -> Result<(), LoopError> {
        if self.context.get().is_none() {
            return Err(GpuError::NoContext.into());
        }
        while !self.configured && !self.closed {
            self.pump()?;
        }
        Ok(())
    }

    /// Waits for configuration, builds the swapchain set, draws the first
    /// frame and arms the frame callback.
    pub fn begin(&mut self) -> Result<(), LoopError> {
        self.wait_configured()?;
        if self.closed || self.resources.is_some() {
            return Ok(());
        }
        self.geometry = self.window.geometry();
        self.build_resources()?;
        self.state = LoopState::Running;
        info!("running at {}x{}", self.geometry.width, self.geometry.height);

        self.draw_frame()?;
        self.arm_frame();
        Ok(())
    }

    /// Handles one dispatch worth of events. Returns false once closed.
    pub fn pump(&mut self) -> Result<bool, LoopError> {
        let events = self.window.dispatch()?;
        for event in events {
            self.handle(event)?;
        }
        Ok(!self.closed)
    }

    pub fn run(&mut self) -> Result<(), LoopError> {
        self.begin()?;
        while !self.closed {
            self.pump()?;
        }
        self.state = LoopState::Closed;
        info!("frame loop finished after {} frames", self.frames);
        Ok(())
    }

    fn handle(&mut self, event: PlatformEvent) -> Result<(), LoopError> {
        trace!("event {event:?}");
        match event {
            PlatformEvent::Configured => {
                if !self.configured {
                    debug!("window configured");
                }
                self.configured = true;
            }
            PlatformEvent::Resized(geometry) => self.resize(geometry)?,
            PlatformEvent::Frame => self.on_frame()?,
            PlatformEvent::Closed => {
                if !self.closed {
                    info!("window closed");
                }
                self.closed = true;
                self.state = LoopState::Closed;
            }
        }
        Ok(())
    }

    fn on_frame(&mut self) -> Result<(), LoopError> {
        self.frame_armed = false;
        if self.closed {
            debug!("frame callback after close, not redrawing");
            return Ok(());
        }
        if self.halted || self.resources.is_none() {
            return Ok(());
        }
        if let Some(hook) = self.on_tick.as_mut() {
            let extent = self
                .resources
                .as_ref()
                .map_or(vk::Extent2D::default(), |r| r.swapchain.extent());
            if !hook(&FrameTick { frame: self.frames, extent }) {
                info!("tick hook stopped redrawing after {} frames", self.frames);
                self.halted = true;
                return Ok(());
            }
        }
        self.draw_frame()?;
        self.arm_frame();
        Ok(())
    }

    fn arm_frame(&mut self) {
        if self.closed || self.halted || self.frame_armed {
            return;
        }
        self.window.request_frame();
        self.frame_armed = true;
    }

    fn draw_frame(&mut self) -> Result<(), LoopError> {
        if !self.ready {
            trace!("frame skipped, swapchain not ready");
            return Ok(());
        }
        let Some(resources) = self.resources.as_ref() else {
            return Ok(());
        };
        let window = &self.window;
        let status = resources.draw(self.options.clear_color, self.options.on_out_of_date, || {
            window.pre_present()
        })?;

        match status {
            FrameStatus::Presented => self.count_frame(),
            FrameStatus::PresentedStale => {
                self.count_frame();
                warn!("swapchain suboptimal or out of date after present, rebuilding");
                self.rebuild()?;
            }
            FrameStatus::Skipped => {
                warn!("swapchain out of date on acquire, rebuilding");
                self.rebuild()?;
            }
        }
        Ok(())
    }

    fn count_frame(&mut self) {
        self.frames += 1;
        self.fps.tick();
    }

    fn resize(&mut self, geometry: Geometry) -> Result<(), LoopError> {
        if geometry == self.geometry {
            trace!("resize to the same geometry ignored");
            return Ok(());
        }
        if geometry.is_empty() {
            debug!("ignoring empty geometry {}x{}", geometry.width, geometry.height);
            return Ok(());
        }
        self.geometry = geometry;
        self.config.set(Key::Width, geometry.width.into())?;
        self.config.set(Key::Height, geometry.height.into())?;

        if self.resources.is_none() {
            debug!("geometry {}x{} recorded before first swapchain", geometry.width, geometry.height);
            return Ok(());
        }

        info!("resizing to {}x{}", geometry.width, geometry.height);
        self.state = LoopState::Resizing;
        self.rebuild()?;
        self.state = LoopState::Running;
        self.arm_frame();
        Ok(())
    }

    fn rebuild(&mut self) -> Result<(), LoopError> {
        self.ready = false;
        if let Some(old) = self.resources.take() {
            old.retire()?;
        }
        self.build_resources()
    }

    fn build_resources(&mut self) -> Result<(), LoopError> {
        let gpu = self.context.get().cloned().ok_or(GpuError::NoContext)?;
        self.resources = Some(FrameResources::new(&gpu, self.geometry)?);
        self.ready = true;
        Ok(())
    }
}
