//! Mapposter
//!
//! Renders user-configured map posters at print resolution by driving a
//! headless browser: the poster configuration is handed to an in-page map
//! renderer, the pipeline waits until the scene is drawn, and the viewport is
//! captured as a PNG.
//!
//! # Features
//!
//! - **CDP Backend** (default): launches headless Chrome through the DevTools Protocol
//! - **Scripted Backend**: deterministic in-process surface for tests
//! - **Bounded readiness**: every job ends with a definitive answer, never a hang
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "cdp")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use mapposter::cdp::CdpLauncher;
//! use mapposter::{CapabilityProfile, OutputStore, PosterConfig, RenderOptions, RenderPipeline};
//!
//! let options = RenderOptions::new(
//!     url::Url::parse("http://localhost:8080/")?,
//!     CapabilityProfile::from_env(),
//! );
//! let pipeline = RenderPipeline::new(CdpLauncher, OutputStore::new("output"), options);
//!
//! let config = PosterConfig::from_json(
//!     r#"{"print":{"width":80,"height":60,"dpi":200},"maps":[{"center":[-122.4,37.8],"zoom":15}]}"#,
//! )?;
//! let job = pipeline.render(config);
//! println!("{}", serde_json::to_string(&job.into_result())?);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "cdp"))]
//! # fn main() {}
//! ```

use std::path::PathBuf;
use std::time::Duration;

pub mod error;
pub use error::{Error, Result};

pub mod encoding;
pub mod geometry;
pub mod job;
pub mod pipeline;
pub mod poster;
pub mod profile;
pub mod readiness;
pub mod scripted;
pub mod server;
pub mod settings;
pub mod storage;
pub mod surface;

#[cfg(feature = "cdp")]
pub mod cdp;

// Async-friendly render API (worker-thread backed)
pub mod async_api;

pub use async_api::Renderer;
pub use job::{JobId, JobState, RenderJob, RenderResult};
pub use pipeline::{RenderOptions, RenderPipeline};
pub use poster::PosterConfig;
pub use profile::CapabilityProfile;
pub use readiness::{Readiness, ReadinessTimings};
pub use storage::OutputStore;

/// Viewport dimensions in CSS pixels (device scale factor 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Display for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Everything a launcher needs to start one surface for one job.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Job the surface is bound to (used for log prefixes)
    pub job_id: String,
    /// Fixed viewport; matches the poster pixel dimensions exactly
    pub viewport: Viewport,
    /// Rendering capability profile
    pub profile: CapabilityProfile,
    /// Explicit browser binary, if configured
    pub chrome_path: Option<PathBuf>,
    /// Upper bound for navigation and individual protocol calls
    pub navigation_timeout: Duration,
    /// How long the browser connection may stay silent before it is dropped
    pub idle_timeout: Duration,
}

/// A live headless surface hosting the in-page renderer for exactly one job.
///
/// Implementations are driven from a single thread and never shared.
pub trait Surface {
    /// Load the renderer surface and wait until the document has navigated
    fn navigate(&mut self, url: &str) -> Result<()>;

    /// Evaluate a boolean expression in the page's global context
    fn evaluate_flag(&mut self, expression: &str) -> Result<bool>;

    /// Capture the full viewport as PNG bytes
    fn capture_png(&mut self) -> Result<Vec<u8>>;

    /// Terminate the surface process
    fn close(&mut self) -> Result<()>;
}

/// Starts surfaces. One launcher serves many jobs; every launch is independent.
pub trait Launcher: Send + Sync {
    type Surface: Surface;

    /// Start a surface with the viewport and capability flags in `spec`
    fn launch(&self, spec: &LaunchSpec) -> Result<Self::Surface>;
}
