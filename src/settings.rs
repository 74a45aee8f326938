//! Command-line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use url::Url;

use crate::pipeline::{RenderOptions, DEFAULT_MAX_INLINE_BYTES};
use crate::profile::CapabilityProfile;
use crate::readiness::ReadinessTimings;
use crate::server::DEFAULT_MAX_BODY_BYTES;
use crate::{Error, Result};

#[derive(Debug, Parser)]
#[command(name = "mapposter", version, about = "Print-resolution map poster renderer")]
pub struct Cli {
    /// Default log filter; `RUST_LOG` takes precedence
    #[arg(
        long = "log-level",
        env = "MAPPOSTER_LOG",
        value_name = "LEVEL",
        default_value = "info",
        global = true
    )]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP service
    Serve(ServeArgs),
    /// Render one poster from a configuration file
    Render(RenderArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long, value_name = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", value_name = "PORT", default_value_t = 3000)]
    pub port: u16,

    #[arg(
        long = "output-dir",
        env = "MAPPOSTER_OUTPUT_DIR",
        value_name = "PATH",
        default_value = "output"
    )]
    pub output_dir: PathBuf,

    #[arg(long = "max-body-bytes", value_name = "BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    #[command(flatten)]
    pub render: RenderSettings,
}

impl ServeArgs {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    /// Poster configuration (JSON)
    #[arg(long, value_name = "PATH")]
    pub config: PathBuf,

    /// Where to copy the finished PNG
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,

    #[arg(
        long = "output-dir",
        env = "MAPPOSTER_OUTPUT_DIR",
        value_name = "PATH",
        default_value = "output"
    )]
    pub output_dir: PathBuf,

    #[command(flatten)]
    pub render: RenderSettings,
}

/// Settings shared by every command that renders
#[derive(Debug, Clone, Args)]
pub struct RenderSettings {
    /// Address of the in-page renderer
    #[arg(long = "renderer-url", env = "MAPPOSTER_RENDERER_URL", value_name = "URL")]
    pub renderer_url: Option<String>,

    /// Chrome binary; discovered automatically when unset
    #[arg(long = "chrome-path", env = "CHROME_PATH", value_name = "PATH")]
    pub chrome_path: Option<PathBuf>,

    /// `software` or `accelerated`; selected from the environment when unset
    #[arg(long, value_name = "PROFILE")]
    pub profile: Option<String>,

    #[arg(long = "initial-settle-ms", value_name = "MS", default_value_t = 2000)]
    pub initial_settle_ms: u64,

    #[arg(long = "poll-interval-ms", value_name = "MS", default_value_t = 500)]
    pub poll_interval_ms: u64,

    #[arg(long = "ready-timeout-ms", value_name = "MS", default_value_t = 120_000)]
    pub ready_timeout_ms: u64,

    #[arg(long = "tile-settle-ms", value_name = "MS", default_value_t = 5000)]
    pub tile_settle_ms: u64,

    #[arg(long = "final-settle-ms", value_name = "MS", default_value_t = 2000)]
    pub final_settle_ms: u64,

    #[arg(long = "navigation-timeout-ms", value_name = "MS", default_value_t = 60_000)]
    pub navigation_timeout_ms: u64,

    #[arg(long = "max-inline-bytes", value_name = "BYTES", default_value_t = DEFAULT_MAX_INLINE_BYTES)]
    pub max_inline_bytes: usize,
}

impl RenderSettings {
    /// Validate and convert into pipeline options. Fails fast on a missing or
    /// unusable renderer address and on a browser path that does not exist.
    pub fn into_render_options(self) -> Result<RenderOptions> {
        let raw = self
            .renderer_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::ConfigError(
                    "renderer URL is required (--renderer-url or MAPPOSTER_RENDERER_URL)".into(),
                )
            })?;
        let renderer_url = Url::parse(raw)
            .map_err(|e| Error::ConfigError(format!("invalid renderer URL '{}': {}", raw, e)))?;
        match renderer_url.scheme() {
            "http" | "https" | "file" => {}
            other => {
                return Err(Error::ConfigError(format!(
                    "unsupported renderer URL scheme '{}' (expected http, https or file)",
                    other
                )))
            }
        }

        if let Some(path) = &self.chrome_path {
            if !path.is_file() {
                return Err(Error::ConfigError(format!(
                    "Chrome binary not found at {}",
                    path.display()
                )));
            }
        }

        let profile = match self.profile.as_deref() {
            Some(name) => name.parse::<CapabilityProfile>()?,
            None => CapabilityProfile::from_env(),
        };

        for (name, value) in [
            ("poll interval", self.poll_interval_ms),
            ("ready timeout", self.ready_timeout_ms),
            ("navigation timeout", self.navigation_timeout_ms),
        ] {
            if value == 0 {
                return Err(Error::ConfigError(format!("{} must be positive", name)));
            }
        }

        let mut options = RenderOptions::new(renderer_url, profile);
        options.chrome_path = self.chrome_path;
        options.timings = ReadinessTimings {
            initial_settle: Duration::from_millis(self.initial_settle_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ready_timeout: Duration::from_millis(self.ready_timeout_ms),
            tile_settle: Duration::from_millis(self.tile_settle_ms),
            final_settle: Duration::from_millis(self.final_settle_ms),
        };
        options.navigation_timeout = Duration::from_millis(self.navigation_timeout_ms);
        options.max_inline_bytes = self.max_inline_bytes;
        Ok(options)
    }
}
