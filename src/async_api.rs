//! Async-friendly render API
//!
//! Rendering is a chain of blocking waits, so each job runs on a dedicated
//! worker thread that owns its surface from launch to teardown. Async callers
//! await the finished job through a oneshot channel and never block the
//! runtime.

use std::sync::Arc;
use std::thread;

use tokio::sync::oneshot;

use crate::job::RenderJob;
use crate::pipeline::RenderPipeline;
use crate::poster::PosterConfig;
use crate::{Error, Launcher, Result};

/// Shareable async handle over a render pipeline.
pub struct Renderer<L> {
    pipeline: Arc<RenderPipeline<L>>,
}

impl<L> Clone for Renderer<L> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

impl<L: Launcher + 'static> Renderer<L> {
    pub fn new(pipeline: RenderPipeline<L>) -> Self {
        Self::from_shared(Arc::new(pipeline))
    }

    pub fn from_shared(pipeline: Arc<RenderPipeline<L>>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &RenderPipeline<L> {
        &self.pipeline
    }

    /// Render one poster on its own worker thread.
    ///
    /// Errors only when the worker could not be started or died before
    /// reporting; render failures are carried in the job's result.
    pub async fn render(&self, config: PosterConfig) -> Result<RenderJob> {
        let job = RenderJob::new(config);
        self.run(job).await
    }

    /// Drive an already created job on a worker thread.
    pub async fn run(&self, mut job: RenderJob) -> Result<RenderJob> {
        let pipeline = Arc::clone(&self.pipeline);
        let (tx, rx) = oneshot::channel();
        let name = format!("render-{}", job.id);

        thread::Builder::new()
            .name(name)
            .spawn(move || {
                pipeline.process(&mut job);
                // the receiver may have been dropped by a cancelled caller
                let _ = tx.send(job);
            })
            .map_err(|e| Error::Other(format!("Failed to spawn render worker: {}", e)))?;

        rx.await
            .map_err(|e| Error::Other(format!("Render worker exited early: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedBehaviour, ScriptedLauncher};
    use crate::storage::OutputStore;
    use crate::{CapabilityProfile, JobState, RenderOptions};

    #[tokio::test]
    async fn rejected_config_resolves_without_launch() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = ScriptedLauncher::new(ScriptedBehaviour::ready());
        let counters = launcher.counters();
        let options = RenderOptions::new(
            url::Url::parse("http://renderer.test/").unwrap(),
            CapabilityProfile::Software,
        );
        let renderer = Renderer::new(RenderPipeline::new(
            launcher,
            OutputStore::new(tmp.path()),
            options,
        ));

        let config = PosterConfig::from_json(r#"{"maps":[]}"#).unwrap();
        let job = renderer.render(config).await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.result().unwrap().rejected);
        assert_eq!(counters.launched(), 0);
    }
}
