// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;
use hotair_core::{init_tracing, ConfigStore, Key, TomlConfig};
use hotair_platform::{WaylandWindow, WindowSettings};
use hotair_render::{Geometry, WindowAdapter};
use hotair_render_vk::{ContextOptions, FrameLoop, FrameLoopOptions, Gpu, GraphicsContext, OutOfDatePolicy};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// More log output (-v debug, -vv trace). RUST_LOG overrides this.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Settings file, defaults to the per-user config directory
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable the Khronos validation layer
    #[arg(long)]
    validation: bool,

    /// What a stale swapchain leads to: fatal | rebuild
    #[arg(long)]
    on_out_of_date: Option<OutOfDatePolicy>,
}

struct Settings {
    geometry: Geometry,
    fullscreen: bool,
    on_out_of_date: OutOfDatePolicy,
}

fn load_settings(cfg: &mut TomlConfig, args: &Args) -> Result<Settings> {
    let dimension = |cfg: &mut TomlConfig, key: Key| -> Result<u32> {
        let fallback = key.default_value().as_u32().unwrap_or(1);
        Ok(match cfg.get(key)?.as_u32() {
            Some(v) if v > 0 => v,
            _ => {
                warn!("{} must be a positive integer, using {fallback}", key.path());
                fallback
            }
        })
    };
    let geometry = Geometry::new(dimension(cfg, Key::Width)?, dimension(cfg, Key::Height)?);
    let fullscreen = cfg.get(Key::Fullscreen)?.as_bool().unwrap_or(false);

    let on_out_of_date = match args.on_out_of_date {
        Some(policy) => policy,
        None => cfg
            .get(Key::OutOfDatePolicy)?
            .parse(Key::OutOfDatePolicy)
            .unwrap_or_else(|e| {
                warn!("{e}, using fatal");
                OutOfDatePolicy::Fatal
            }),
    };
    Ok(Settings { geometry, fullscreen, on_out_of_date })
}

fn run(args: Args) -> Result<u64> {
    let mut cfg = match &args.config {
        Some(path) => TomlConfig::open(path),
        None => TomlConfig::open_default(),
    }
    .context("loading settings")?;
    if let Some(path) = cfg.path() {
        debug!("settings from {}", path.display());
    }

    let settings = load_settings(&mut cfg, &args)?;
    info!(
        "starting at {}x{}, fullscreen={}, on_out_of_date={:?}",
        settings.geometry.width, settings.geometry.height, settings.fullscreen, settings.on_out_of_date
    );

    let window = WaylandWindow::open(WindowSettings {
        geometry: settings.geometry,
        fullscreen: settings.fullscreen,
        ..WindowSettings::default()
    })
    .context("opening wayland window")?;

    let options = FrameLoopOptions { on_out_of_date: settings.on_out_of_date, ..FrameLoopOptions::default() };
    let mut frame_loop = FrameLoop::new(window, cfg, options);

    let ctx_options = ContextOptions { validation: args.validation };
    frame_loop
        .create_context(|window| {
            let (display, handle) = window.raw_handles()?;
            // SAFETY: the frame loop owns the window and drops the context first.
            let ctx = unsafe { GraphicsContext::new(display, handle, &ctx_options)? };
            debug!("graphics context ready on {}", ctx.device_name());
            Ok(Rc::new(ctx) as Rc<dyn Gpu>)
        })
        .context("creating vulkan context")?;

    frame_loop.run()?;
    Ok(frame_loop.frames_presented())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args) {
        Ok(frames) => {
            info!("exiting after {frames} presented frames");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
