//! Render jobs and their result envelopes

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use base64::Engine as Base64Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::ZoomReconciliation;
use crate::poster::PosterConfig;
use crate::surface::SurfaceStage;
use crate::Error;

/// Collision-resistant job identifier: a random UUID as 32 lowercase hex digits
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        JobId(Uuid::new_v4().simple().to_string())
    }

    /// Accept only identifiers this crate could have generated.
    ///
    /// Anything else (including path separators) is rejected, so a parsed id
    /// is always safe to embed in a file name.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == 32
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| JobId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Rendering,
    Delivered,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Delivered | JobState::Failed)
    }
}

/// Metadata of a delivered poster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderMetadata {
    pub width: u32,
    pub height: u32,
    pub dpi: f64,
    pub size_bytes: usize,
    /// Megabytes with two decimals
    #[serde(rename = "sizeInMB")]
    pub size_in_mb: String,
    pub render_time_ms: u64,
    /// Captured after the readiness fallback; tiles may be missing
    pub degraded: bool,
    pub maps: Vec<ZoomReconciliation>,
}

/// Result envelope returned to callers, success or failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResult {
    pub success: bool,
    pub job_id: JobId,
    /// `data:image/png;base64,...`, omitted above the inline size bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RenderMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
    /// Where the poster was persisted
    #[serde(skip)]
    pub output_path: Option<PathBuf>,
    /// Rejected before any surface was launched
    #[serde(skip)]
    pub rejected: bool,
}

impl RenderResult {
    /// Success envelope; the payload is inlined when it fits `max_inline_bytes`.
    pub fn success(
        job_id: JobId,
        png: &[u8],
        max_inline_bytes: usize,
        metadata: RenderMetadata,
        output_path: PathBuf,
    ) -> Self {
        let image = (png.len() <= max_inline_bytes).then(|| {
            format!(
                "data:image/png;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(png)
            )
        });
        let download_url = Some(format!("/api/download/{}", job_id));

        Self {
            success: true,
            job_id,
            image,
            download_url,
            metadata: Some(metadata),
            error: None,
            error_kind: None,
            details: None,
            output_path: Some(output_path),
            rejected: false,
        }
    }

    /// Failure envelope carrying a readable message, never the raw error value.
    pub fn failure(job_id: JobId, err: &Error) -> Self {
        Self {
            success: false,
            job_id,
            image: None,
            download_url: None,
            metadata: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
            details: err.details().map(|d| d.to_vec()),
            output_path: None,
            rejected: err.is_configuration(),
        }
    }
}

/// Size in megabytes, two decimals.
pub fn megabytes(bytes: usize) -> String {
    format!("{:.2}", bytes as f64 / (1024.0 * 1024.0))
}

/// One end-to-end request to produce one poster.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub id: JobId,
    config: PosterConfig,
    pub state: JobState,
    /// Surface stages visited, in order
    pub stages: Vec<SurfaceStage>,
    pub created: Instant,
    result: Option<RenderResult>,
}

impl RenderJob {
    pub fn new(config: PosterConfig) -> Self {
        Self::with_id(JobId::generate(), config)
    }

    pub fn with_id(id: JobId, config: PosterConfig) -> Self {
        Self {
            id,
            config,
            state: JobState::Pending,
            stages: Vec::new(),
            created: Instant::now(),
            result: None,
        }
    }

    /// Configuration the job was submitted with; fixed for the job's lifetime
    pub fn config(&self) -> &PosterConfig {
        &self.config
    }

    /// Record the result; later calls are ignored so a result is produced once.
    pub(crate) fn finish(&mut self, result: RenderResult) {
        if self.result.is_some() {
            return;
        }
        self.state = if result.success {
            JobState::Delivered
        } else {
            JobState::Failed
        };
        self.result = Some(result);
    }

    pub(crate) fn fail(&mut self, err: &Error) {
        let result = RenderResult::failure(self.id.clone(), err);
        self.finish(result);
    }

    /// Envelope of a finished job
    pub fn result(&self) -> Option<&RenderResult> {
        self.result.as_ref()
    }

    /// Envelope of the job; an unfinished job reports a failure.
    pub fn into_result(self) -> RenderResult {
        let id = self.id;
        self.result.unwrap_or_else(|| {
            RenderResult::failure(id, &Error::Other("Render job did not finish".into()))
        })
    }
}
