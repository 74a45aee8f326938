//! Headless surface controller
//!
//! One controller drives one surface for one job through
//! `Uninitialized -> Launching -> Navigating -> AwaitingReady -> Capturing -> Closed`.
//! Any failure before `Closed` passes through `Error`, which always ends in
//! `Closed` after forced teardown. The surface is held by a [`SurfaceGuard`],
//! so it is closed exactly once on every exit path, including unwinding.

use std::io::Cursor;
use std::ops::{Deref, DerefMut};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::readiness::{self, Readiness, ReadinessTimings};
use crate::{Error, LaunchSpec, Launcher, Result, Surface};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceStage {
    Uninitialized,
    Launching,
    Navigating,
    AwaitingReady,
    Capturing,
    Error,
    Closed,
}

impl SurfaceStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SurfaceStage::Closed)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: SurfaceStage) -> bool {
        use SurfaceStage::*;
        match (*self, next) {
            (Uninitialized, Launching)
            | (Launching, Navigating)
            | (Navigating, AwaitingReady)
            | (AwaitingReady, Capturing)
            | (Capturing, Closed)
            | (Error, Closed) => true,
            (from, Error) => !matches!(from, Error | Closed),
            _ => false,
        }
    }
}

/// Owns a live surface and closes it exactly once.
///
/// Closing explicitly through [`SurfaceGuard::close`] reports the outcome;
/// otherwise `Drop` closes the surface and logs any failure.
pub struct SurfaceGuard<S: Surface> {
    surface: S,
    job_id: String,
    closed: bool,
}

impl<S: Surface> SurfaceGuard<S> {
    pub fn new(surface: S, job_id: impl Into<String>) -> Self {
        Self {
            surface,
            job_id: job_id.into(),
            closed: false,
        }
    }

    /// Close the surface. Later calls (and the eventual drop) do nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.surface.close()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<S: Surface> Deref for SurfaceGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.surface
    }
}

impl<S: Surface> DerefMut for SurfaceGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.surface
    }
}

impl<S: Surface> Drop for SurfaceGuard<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("[{}] Surface teardown failed: {}", self.job_id, e);
        }
    }
}

/// Pixels captured from a surface
#[derive(Debug, Clone)]
pub struct Capture {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub readiness: Readiness,
}

/// Width and height from a PNG header.
pub fn png_dimensions(png: &[u8]) -> Result<(u32, u32)> {
    let decoder = png::Decoder::new(Cursor::new(png));
    let reader = decoder
        .read_info()
        .map_err(|e| Error::CaptureError(format!("Captured buffer is not a valid PNG: {}", e)))?;
    let info = reader.info();
    Ok((info.width, info.height))
}

/// State machine for one job's surface
#[derive(Debug)]
pub struct SurfaceController {
    job_id: String,
    stage: SurfaceStage,
    history: Vec<SurfaceStage>,
}

impl SurfaceController {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            stage: SurfaceStage::Uninitialized,
            history: vec![SurfaceStage::Uninitialized],
        }
    }

    pub fn stage(&self) -> SurfaceStage {
        self.stage
    }

    /// Every stage visited so far, in order
    pub fn history(&self) -> &[SurfaceStage] {
        &self.history
    }

    fn enter(&mut self, next: SurfaceStage) {
        let legal = self.stage.can_transition_to(next);
        if !legal {
            error!(
                "[{}] Illegal surface transition {:?} -> {:?}",
                self.job_id, self.stage, next
            );
        }
        debug_assert!(legal, "illegal surface transition");
        debug!("[{}] Surface {:?} -> {:?}", self.job_id, self.stage, next);
        self.stage = next;
        self.history.push(next);
    }

    /// Drive a fresh surface from launch to capture.
    ///
    /// Runs at most once per controller. The surface is always closed before
    /// this returns, and teardown failures never replace the job's outcome.
    pub fn run<L: Launcher + ?Sized>(
        &mut self,
        launcher: &L,
        spec: &LaunchSpec,
        url: &str,
        timings: &ReadinessTimings,
    ) -> Result<Capture> {
        if self.stage != SurfaceStage::Uninitialized {
            return Err(Error::Other(format!(
                "Surface controller for job {} already ran",
                self.job_id
            )));
        }

        let mut slot: Option<SurfaceGuard<L::Surface>> = None;
        let outcome = self.drive(launcher, spec, url, timings, &mut slot);

        if let Err(e) = &outcome {
            warn!("[{}] Render failed during {:?}: {}", self.job_id, self.stage, e);
            self.enter(SurfaceStage::Error);
        }
        if let Some(mut guard) = slot.take() {
            match guard.close() {
                Ok(()) => info!("[{}] Surface closed", self.job_id),
                Err(e) => warn!("[{}] Surface teardown failed: {}", self.job_id, e),
            }
        }
        self.enter(SurfaceStage::Closed);

        outcome
    }

    fn drive<L: Launcher + ?Sized>(
        &mut self,
        launcher: &L,
        spec: &LaunchSpec,
        url: &str,
        timings: &ReadinessTimings,
        slot: &mut Option<SurfaceGuard<L::Surface>>,
    ) -> Result<Capture> {
        self.enter(SurfaceStage::Launching);
        info!(
            "[{}] Launching surface ({} profile, viewport {})",
            self.job_id, spec.profile, spec.viewport
        );
        let surface = launcher.launch(spec)?;
        let guard = slot.insert(SurfaceGuard::new(surface, self.job_id.clone()));

        self.enter(SurfaceStage::Navigating);
        info!("[{}] Loading renderer ({} characters)", self.job_id, url.len());
        guard.navigate(url)?;

        self.enter(SurfaceStage::AwaitingReady);
        let readiness = readiness::await_ready(&mut **guard, timings, &self.job_id)?;

        self.enter(SurfaceStage::Capturing);
        info!("[{}] Capturing screenshot...", self.job_id);
        let png = guard.capture_png()?;
        let (width, height) = png_dimensions(&png)?;
        if (width, height) != (spec.viewport.width, spec.viewport.height) {
            return Err(Error::CaptureError(format!(
                "Captured {}x{} but the viewport is {}",
                width, height, spec.viewport
            )));
        }
        info!(
            "[{}] Captured {}x{} ({} bytes)",
            self.job_id,
            width,
            height,
            png.len()
        );

        Ok(Capture {
            png,
            width,
            height,
            readiness,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedBehaviour, ScriptedLauncher};
    use crate::{CapabilityProfile, Viewport};
    use std::time::Duration;

    fn spec() -> LaunchSpec {
        LaunchSpec {
            job_id: "test".into(),
            viewport: Viewport {
                width: 32,
                height: 24,
            },
            profile: CapabilityProfile::Software,
            chrome_path: None,
            navigation_timeout: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(1),
        }
    }

    fn timings() -> ReadinessTimings {
        ReadinessTimings {
            initial_settle: Duration::ZERO,
            poll_interval: Duration::from_millis(1),
            ready_timeout: Duration::from_millis(20),
            tile_settle: Duration::ZERO,
            final_settle: Duration::ZERO,
        }
    }

    #[test]
    fn transitions_follow_the_lifecycle() {
        use SurfaceStage::*;
        assert!(Uninitialized.can_transition_to(Launching));
        assert!(Capturing.can_transition_to(Closed));
        assert!(Navigating.can_transition_to(Error));
        assert!(Error.can_transition_to(Closed));
        assert!(!Launching.can_transition_to(Capturing));
        assert!(!Closed.can_transition_to(Error));
        assert!(!Error.can_transition_to(Error));
        assert!(Closed.is_terminal());
    }

    #[test]
    fn successful_run_visits_every_stage() {
        let launcher = ScriptedLauncher::new(ScriptedBehaviour::ready());
        let mut controller = SurfaceController::new("ok");
        let capture = controller
            .run(&launcher, &spec(), "http://renderer/", &timings())
            .unwrap();

        assert_eq!((capture.width, capture.height), (32, 24));
        assert_eq!(capture.readiness, Readiness::Signalled);
        assert_eq!(
            controller.history(),
            &[
                SurfaceStage::Uninitialized,
                SurfaceStage::Launching,
                SurfaceStage::Navigating,
                SurfaceStage::AwaitingReady,
                SurfaceStage::Capturing,
                SurfaceStage::Closed,
            ]
        );
        assert_eq!(launcher.counters().closed(), 1);
    }

    #[test]
    fn failure_goes_through_error_to_closed() {
        let launcher = ScriptedLauncher::new(ScriptedBehaviour {
            fail_navigation: true,
            ..ScriptedBehaviour::ready()
        });
        let mut controller = SurfaceController::new("nav");
        let err = controller
            .run(&launcher, &spec(), "http://renderer/", &timings())
            .unwrap_err();

        assert_eq!(err.kind(), "navigation");
        let tail = &controller.history()[controller.history().len() - 2..];
        assert_eq!(tail, &[SurfaceStage::Error, SurfaceStage::Closed]);
        assert_eq!(launcher.counters().live(), 0);
    }

    #[test]
    fn launch_failure_has_nothing_to_close() {
        let launcher = ScriptedLauncher::new(ScriptedBehaviour {
            fail_launch: true,
            ..ScriptedBehaviour::ready()
        });
        let mut controller = SurfaceController::new("launch");
        let err = controller
            .run(&launcher, &spec(), "http://renderer/", &timings())
            .unwrap_err();
        assert_eq!(err.kind(), "launch");
        assert_eq!(controller.stage(), SurfaceStage::Closed);
        assert_eq!(launcher.counters().closed(), 0);
    }

    #[test]
    fn teardown_error_does_not_mask_success() {
        let launcher = ScriptedLauncher::new(ScriptedBehaviour {
            fail_close: true,
            ..ScriptedBehaviour::ready()
        });
        let mut controller = SurfaceController::new("close");
        assert!(controller
            .run(&launcher, &spec(), "http://renderer/", &timings())
            .is_ok());
        assert_eq!(launcher.counters().closed(), 1);
    }

    #[test]
    fn mismatched_capture_is_rejected() {
        let launcher = ScriptedLauncher::new(ScriptedBehaviour {
            capture_size: Some(Viewport {
                width: 16,
                height: 24,
            }),
            ..ScriptedBehaviour::ready()
        });
        let mut controller = SurfaceController::new("size");
        let err = controller
            .run(&launcher, &spec(), "http://renderer/", &timings())
            .unwrap_err();
        assert_eq!(err.kind(), "capture");
    }

    #[test]
    fn controller_runs_once() {
        let launcher = ScriptedLauncher::new(ScriptedBehaviour::ready());
        let mut controller = SurfaceController::new("twice");
        controller
            .run(&launcher, &spec(), "http://renderer/", &timings())
            .unwrap();
        assert!(controller
            .run(&launcher, &spec(), "http://renderer/", &timings())
            .is_err());
        assert_eq!(launcher.counters().launched(), 1);
    }

    #[test]
    fn guard_closes_on_drop_exactly_once() {
        let launcher = ScriptedLauncher::new(ScriptedBehaviour::ready());
        let surface = launcher.launch(&spec()).unwrap();
        {
            let mut guard = SurfaceGuard::new(surface, "drop");
            guard.close().unwrap();
            assert!(guard.is_closed());
        }
        assert_eq!(launcher.counters().closed(), 1);

        let surface = launcher.launch(&spec()).unwrap();
        drop(SurfaceGuard::new(surface, "drop"));
        assert_eq!(launcher.counters().closed(), 2);
        assert_eq!(launcher.counters().live(), 0);
    }

    #[test]
    fn garbage_is_not_a_png() {
        assert_eq!(png_dimensions(b"not a png").unwrap_err().kind(), "capture");
    }
}
