//! End-to-end render orchestration
//!
//! validate -> reconcile geometry -> encode -> launch -> navigate ->
//! await ready -> capture -> teardown -> persist. Configuration problems are
//! caught before any surface exists; everything after launch runs inside a
//! [`SurfaceController`], so the surface is gone by the time a result is
//! recorded.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use url::Url;

use crate::encoding::{self, MAX_URL_LEN};
use crate::geometry::ZoomReconciliation;
use crate::job::{megabytes, JobId, JobState, RenderJob, RenderMetadata, RenderResult};
use crate::poster::PosterConfig;
use crate::profile::CapabilityProfile;
use crate::readiness::ReadinessTimings;
use crate::storage::OutputStore;
use crate::surface::{Capture, SurfaceController};
use crate::{LaunchSpec, Launcher, Result, Viewport};

/// Default bound for navigation and individual protocol calls
pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest payload returned inline in the envelope
pub const DEFAULT_MAX_INLINE_BYTES: usize = 50 * 1024 * 1024;

/// Validated, deployment-level render settings
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Where the in-page renderer is served
    pub renderer_url: Url,
    pub profile: CapabilityProfile,
    pub chrome_path: Option<PathBuf>,
    pub timings: ReadinessTimings,
    pub navigation_timeout: Duration,
    pub max_url_len: usize,
    pub max_inline_bytes: usize,
}

impl RenderOptions {
    pub fn new(renderer_url: Url, profile: CapabilityProfile) -> Self {
        Self {
            renderer_url,
            profile,
            chrome_path: None,
            timings: ReadinessTimings::default(),
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
            max_url_len: MAX_URL_LEN,
            max_inline_bytes: DEFAULT_MAX_INLINE_BYTES,
        }
    }

    /// Silence allowed on the browser connection; covers the whole readiness
    /// protocol plus one navigation.
    pub fn idle_timeout(&self) -> Duration {
        self.timings.total_budget() + self.navigation_timeout
    }
}

/// Everything computed from a configuration before a surface is launched
#[derive(Debug, Clone)]
pub struct PreparedRender {
    pub viewport: Viewport,
    pub dpi: f64,
    pub url: String,
    pub maps: Vec<ZoomReconciliation>,
}

pub struct RenderPipeline<L> {
    launcher: L,
    store: OutputStore,
    options: RenderOptions,
}

impl<L: Launcher> RenderPipeline<L> {
    pub fn new(launcher: L, store: OutputStore, options: RenderOptions) -> Self {
        Self {
            launcher,
            store,
            options,
        }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn store(&self) -> &OutputStore {
        &self.store
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Validate `config` and compute the viewport, zoom plan and renderer URL.
    pub fn prepare(&self, job_id: &JobId, config: &PosterConfig) -> Result<PreparedRender> {
        config.validate()?;

        let geometry = config.geometry();
        let viewport = geometry.viewport();
        info!(
            "[{}] Poster dimensions: {}px ({}x{}cm @ {} DPI)",
            job_id, viewport, geometry.width_cm, geometry.height_cm, geometry.dpi
        );

        let maps: Vec<ZoomReconciliation> = config
            .maps
            .iter()
            .map(|map| map.reconcile(viewport.width))
            .collect();
        for (index, plan) in maps.iter().enumerate() {
            info!(
                "[{}] Map {}: preview {}px -> poster {}px, zoom {} + {:.2} = {:.2}",
                job_id,
                index,
                plan.preview_width,
                plan.poster_width,
                plan.base_zoom,
                plan.zoom_delta,
                plan.effective_zoom
            );
            if plan.clamped {
                warn!(
                    "[{}] Map {}: zoom {:.2} clamped to {:.2}",
                    job_id,
                    index,
                    plan.base_zoom + plan.zoom_delta,
                    plan.effective_zoom
                );
            }
        }

        let url = encoding::build_render_url(
            &self.options.renderer_url,
            &config.normalized(),
            geometry.dpi,
            viewport,
            self.options.max_url_len,
        )?;

        Ok(PreparedRender {
            viewport,
            dpi: geometry.dpi,
            url,
            maps,
        })
    }

    /// Run one job from a configuration to a finished [`RenderJob`].
    pub fn render(&self, config: PosterConfig) -> RenderJob {
        let mut job = RenderJob::new(config);
        self.process(&mut job);
        job
    }

    /// Drive `job` to a terminal state. Never fails: every error ends up in the
    /// job's result envelope.
    pub fn process(&self, job: &mut RenderJob) {
        let started = Instant::now();
        info!("[{}] Starting poster generation", job.id);

        let prepared = match self.prepare(&job.id, job.config()) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("[{}] Configuration rejected: {}", job.id, e);
                job.fail(&e);
                return;
            }
        };

        job.state = JobState::Rendering;
        let spec = LaunchSpec {
            job_id: job.id.to_string(),
            viewport: prepared.viewport,
            profile: self.options.profile,
            chrome_path: self.options.chrome_path.clone(),
            navigation_timeout: self.options.navigation_timeout,
            idle_timeout: self.options.idle_timeout(),
        };

        let mut controller = SurfaceController::new(job.id.as_str());
        let outcome = controller.run(
            &self.launcher,
            &spec,
            &prepared.url,
            &self.options.timings,
        );
        job.stages = controller.history().to_vec();

        match outcome.and_then(|capture| self.deliver(&job.id, capture, &prepared, started)) {
            Ok(result) => job.finish(result),
            Err(e) => {
                error!("[{}] Poster generation failed: {}", job.id, e);
                job.fail(&e);
            }
        }
    }

    fn deliver(
        &self,
        job_id: &JobId,
        capture: Capture,
        prepared: &PreparedRender,
        started: Instant,
    ) -> Result<RenderResult> {
        let path = self.store.persist(job_id, &capture.png)?;
        let render_time_ms = started.elapsed().as_millis() as u64;

        let metadata = RenderMetadata {
            width: capture.width,
            height: capture.height,
            dpi: prepared.dpi,
            size_bytes: capture.png.len(),
            size_in_mb: megabytes(capture.png.len()),
            render_time_ms,
            degraded: capture.readiness.is_degraded(),
            maps: prepared.maps.clone(),
        };
        info!(
            "[{}] Poster generated in {}ms ({} MB{})",
            job_id,
            render_time_ms,
            metadata.size_in_mb,
            if metadata.degraded { ", degraded" } else { "" }
        );

        Ok(RenderResult::success(
            job_id.clone(),
            &capture.png,
            self.options.max_inline_bytes,
            metadata,
            path,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedBehaviour, ScriptedLauncher};

    fn pipeline(dir: &std::path::Path) -> RenderPipeline<ScriptedLauncher> {
        let options = RenderOptions::new(
            Url::parse("http://renderer.test/").unwrap(),
            CapabilityProfile::Software,
        );
        RenderPipeline::new(
            ScriptedLauncher::new(ScriptedBehaviour::ready()),
            OutputStore::new(dir),
            options,
        )
    }

    #[test]
    fn prepare_reference_poster() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PosterConfig::from_json(
            r#"{"print":{"width":80,"height":60,"dpi":200},"maps":[{"center":[-122.4,37.8],"zoom":15,"previewWidth":640}]}"#,
        )
        .unwrap();
        let prepared = pipeline(tmp.path())
            .prepare(&JobId::generate(), &config)
            .unwrap();

        assert_eq!(
            prepared.viewport,
            Viewport {
                width: 6299,
                height: 4724
            }
        );
        assert!((prepared.maps[0].effective_zoom - 18.2992).abs() < 1e-3);
        assert!(!prepared.maps[0].clamped);
        assert!(prepared.url.ends_with("&dpi=200&width=6299&height=4724"));
    }

    #[test]
    fn prepare_rejects_invalid_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PosterConfig::from_json(r#"{"print":{"dpi":-1},"maps":[]}"#).unwrap();
        let err = pipeline(tmp.path())
            .prepare(&JobId::generate(), &config)
            .unwrap_err();
        assert_eq!(err.details().map(|d| d.len()), Some(2));
    }

    #[test]
    fn idle_timeout_outlasts_readiness() {
        let options = RenderOptions::new(
            Url::parse("http://renderer.test/").unwrap(),
            CapabilityProfile::Accelerated,
        );
        assert!(options.idle_timeout() > options.timings.ready_timeout);
    }
}
