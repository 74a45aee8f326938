//! Scripted surface backend
//!
//! A deterministic, in-process [`Launcher`] whose surfaces answer readiness
//! probes from a fixed script and capture solid PNGs of the launch viewport.
//! Shared counters track how many surfaces were launched and closed, so tests
//! can check that every job returns the process count to its baseline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::readiness::{MAP_EXISTS_EXPRESSION, RENDER_COMPLETE_EXPRESSION};
use crate::{Error, LaunchSpec, Launcher, Result, Surface, Viewport};

/// What a scripted surface does at each stage
#[derive(Debug, Clone, Default)]
pub struct ScriptedBehaviour {
    pub fail_launch: bool,
    pub fail_navigation: bool,
    /// Polls answered `false` before the completion flag turns true; `None` never signals
    pub ready_after_polls: Option<u32>,
    /// Answer to the fallback existence check
    pub map_exists: bool,
    pub fail_capture: bool,
    pub fail_close: bool,
    /// Size of the captured image; the launch viewport when unset
    pub capture_size: Option<Viewport>,
}

impl ScriptedBehaviour {
    /// A renderer that signals completion on the first poll
    pub fn ready() -> Self {
        Self {
            ready_after_polls: Some(0),
            map_exists: true,
            ..Self::default()
        }
    }

    /// A renderer whose map loads but never raises the completion flag
    pub fn never_signals() -> Self {
        Self {
            ready_after_polls: None,
            map_exists: true,
            ..Self::default()
        }
    }
}

/// Counters shared by a launcher and every surface it started
#[derive(Debug, Default)]
pub struct SurfaceCounters {
    launched: AtomicUsize,
    closed: AtomicUsize,
    polls: AtomicUsize,
    navigations: Mutex<Vec<String>>,
}

impl SurfaceCounters {
    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    /// Number of close calls received, successful or not
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Surfaces launched and not yet closed
    pub fn live(&self) -> usize {
        self.launched().saturating_sub(self.closed())
    }

    /// Completion-flag polls across all surfaces
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// URLs passed to `navigate`, in order
    pub fn navigations(&self) -> Vec<String> {
        self.navigations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedLauncher {
    behaviour: ScriptedBehaviour,
    counters: Arc<SurfaceCounters>,
}

impl ScriptedLauncher {
    pub fn new(behaviour: ScriptedBehaviour) -> Self {
        Self {
            behaviour,
            counters: Arc::new(SurfaceCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<SurfaceCounters> {
        Arc::clone(&self.counters)
    }
}

impl Launcher for ScriptedLauncher {
    type Surface = ScriptedSurface;

    fn launch(&self, spec: &LaunchSpec) -> Result<ScriptedSurface> {
        if self.behaviour.fail_launch {
            return Err(Error::LaunchError("scripted launch failure".into()));
        }
        self.counters.launched.fetch_add(1, Ordering::SeqCst);
        debug!("[{}] Scripted surface launched", spec.job_id);

        Ok(ScriptedSurface {
            behaviour: self.behaviour.clone(),
            counters: Arc::clone(&self.counters),
            viewport: spec.viewport,
            navigated: false,
            polls: 0,
        })
    }
}

pub struct ScriptedSurface {
    behaviour: ScriptedBehaviour,
    counters: Arc<SurfaceCounters>,
    viewport: Viewport,
    navigated: bool,
    polls: u32,
}

impl Surface for ScriptedSurface {
    fn navigate(&mut self, url: &str) -> Result<()> {
        self.counters
            .navigations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());
        if self.behaviour.fail_navigation {
            return Err(Error::LoadError("scripted navigation failure".into()));
        }
        self.navigated = true;
        Ok(())
    }

    fn evaluate_flag(&mut self, expression: &str) -> Result<bool> {
        if !self.navigated {
            return Err(Error::ScriptError("no document loaded".into()));
        }
        match expression {
            RENDER_COMPLETE_EXPRESSION => {
                self.polls += 1;
                self.counters.polls.fetch_add(1, Ordering::SeqCst);
                Ok(self
                    .behaviour
                    .ready_after_polls
                    .is_some_and(|n| self.polls > n))
            }
            MAP_EXISTS_EXPRESSION => Ok(self.behaviour.map_exists),
            other => Err(Error::ScriptError(format!(
                "unsupported expression: {}",
                other
            ))),
        }
    }

    fn capture_png(&mut self) -> Result<Vec<u8>> {
        if self.behaviour.fail_capture {
            return Err(Error::CaptureError("scripted capture failure".into()));
        }
        let size = self.behaviour.capture_size.unwrap_or(self.viewport);
        solid_png(size.width, size.height)
    }

    fn close(&mut self) -> Result<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        if self.behaviour.fail_close {
            return Err(Error::Other("scripted teardown failure".into()));
        }
        Ok(())
    }
}

/// Encode a white grayscale PNG of the given size.
pub fn solid_png(width: u32, height: u32) -> Result<Vec<u8>> {
    let pixels = vec![0xFFu8; width as usize * height as usize];
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| Error::CaptureError(format!("PNG header: {}", e)))?;
        writer
            .write_image_data(&pixels)
            .map_err(|e| Error::CaptureError(format!("PNG data: {}", e)))?;
        writer
            .finish()
            .map_err(|e| Error::CaptureError(format!("PNG finish: {}", e)))?;
    }
    Ok(out)
}
