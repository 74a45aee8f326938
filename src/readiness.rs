//! Render readiness protocol
//!
//! The renderer cannot report completion synchronously (tiles stream in over
//! the network, compositing happens on the GPU), so readiness is a handshake
//! with fixed ordering:
//!
//! 1. initial settle after navigation
//! 2. poll the strict completion flag, bounded by `ready_timeout`
//! 3. on timeout only, fall back to "does the map object exist?"
//! 4. tile settle, then final settle, then capture
//!
//! A degraded render (flag never seen, map present) still succeeds; a missing
//! map object is the only readiness failure that aborts the job.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::{Error, Result, Surface};

/// Set by the in-page renderer once the map has loaded, overlays are attached
/// and its own settle delay has elapsed
pub const RENDER_COMPLETE_EXPRESSION: &str = "window.mapRenderComplete === true";

/// Weak fallback check
pub const MAP_EXISTS_EXPRESSION: &str = "window.map !== undefined && window.map !== null";

/// Empirical delays of the protocol. None of them is derived from a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessTimings {
    /// Script bootstrap time after navigation
    pub initial_settle: Duration,
    /// Delay between flag polls
    pub poll_interval: Duration,
    /// Bound on the strict wait
    pub ready_timeout: Duration,
    /// Lets in-flight tile requests finish after readiness is decided
    pub tile_settle: Duration,
    /// Last margin immediately before capture
    pub final_settle: Duration,
}

impl Default for ReadinessTimings {
    fn default() -> Self {
        Self {
            initial_settle: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
            ready_timeout: Duration::from_secs(120),
            tile_settle: Duration::from_secs(5),
            final_settle: Duration::from_secs(2),
        }
    }
}

impl ReadinessTimings {
    /// Worst-case time spent in the protocol, excluding probe latency
    pub fn total_budget(&self) -> Duration {
        self.initial_settle + self.ready_timeout + self.tile_settle + self.final_settle
    }
}

/// Result of a bounded wait for a flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Ready,
    Timeout,
}

/// How the scene was judged safe to capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The renderer raised its completion flag
    Signalled,
    /// The flag never appeared but the map object exists; the capture may be incomplete
    Degraded,
}

impl Readiness {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Readiness::Degraded)
    }
}

/// Poll `expression` until it is true or `timeout` elapses.
///
/// The flag is always checked at least once. Evaluation errors count as
/// "not yet".
pub fn wait_for_flag<S: Surface + ?Sized>(
    surface: &mut S,
    expression: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Handshake {
    let start = Instant::now();
    loop {
        match surface.evaluate_flag(expression) {
            Ok(true) => return Handshake::Ready,
            Ok(false) => {}
            Err(e) => debug!("Readiness probe failed, retrying: {}", e),
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Handshake::Timeout;
        }
        thread::sleep(poll_interval.min(timeout - elapsed));
    }
}

/// Run the whole protocol against a navigated surface.
pub fn await_ready<S: Surface + ?Sized>(
    surface: &mut S,
    timings: &ReadinessTimings,
    job_id: &str,
) -> Result<Readiness> {
    thread::sleep(timings.initial_settle);

    info!(
        "[{}] Waiting for map to render (timeout: {}s)...",
        job_id,
        timings.ready_timeout.as_secs_f64()
    );
    let readiness = match wait_for_flag(
        surface,
        RENDER_COMPLETE_EXPRESSION,
        timings.ready_timeout,
        timings.poll_interval,
    ) {
        Handshake::Ready => {
            info!("[{}] Map render complete signal received", job_id);
            Readiness::Signalled
        }
        Handshake::Timeout => {
            warn!(
                "[{}] Timeout waiting for render completion, checking map state...",
                job_id
            );
            match surface.evaluate_flag(MAP_EXISTS_EXPRESSION) {
                Ok(true) => {
                    warn!(
                        "[{}] Map exists, proceeding with a possibly incomplete capture",
                        job_id
                    );
                    Readiness::Degraded
                }
                Ok(false) => {
                    error!("[{}] Map object never appeared", job_id);
                    return Err(Error::RendererInitFailed);
                }
                Err(e) => {
                    error!("[{}] Surface stopped responding: {}", job_id, e);
                    return Err(Error::Timeout(timings.ready_timeout.as_millis() as u64));
                }
            }
        }
    };

    debug!(
        "[{}] Settling {}ms for tiles, then {}ms before capture",
        job_id,
        timings.tile_settle.as_millis(),
        timings.final_settle.as_millis()
    );
    thread::sleep(timings.tile_settle);
    thread::sleep(timings.final_settle);

    Ok(readiness)
}
