//! Rendering capability profiles for the headless surface
//!
//! The in-page renderer needs WebGL. Servers without a GPU get it through
//! SwiftShader; workstations use the hardware path through ANGLE. The two
//! profile-specific flag sets never overlap.

use std::fmt;
use std::str::FromStr;

use log::warn;

use crate::Error;

/// Environment variable selecting the profile explicitly
pub const PROFILE_ENV: &str = "MAPPOSTER_PROFILE";

/// Legacy container marker; `true` selects the software profile
pub const DOCKER_ENV: &str = "DOCKER_ENV";

/// Flags shared by both profiles
pub const COMMON_FLAGS: &[&str] = &[
    "--disable-dev-shm-usage",
    // WebGL for the vector-tile renderer
    "--enable-webgl",
    "--enable-webgl2",
    "--ignore-gpu-blocklist",
    "--enable-accelerated-2d-canvas",
    // tiles, fonts and sprites come from third-party origins
    "--disable-web-security",
    "--disable-features=VizDisplayCompositor",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
    "--hide-scrollbars",
    "--force-device-scale-factor=1",
    "--disable-logging",
    "--log-level=3",
];

const SOFTWARE_FLAGS: &[&str] = &[
    "--use-gl=angle",
    "--use-angle=swiftshader",
    "--enable-unsafe-swiftshader",
    "--disable-gpu-sandbox",
];

const ACCELERATED_FLAGS: &[&str] = &[
    "--use-gl=angle",
    "--use-angle=default",
    "--enable-gpu-rasterization",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityProfile {
    /// SwiftShader software rendering, for sandboxed or GPU-less hosts
    Software,
    /// Hardware rendering through ANGLE
    Accelerated,
}

impl CapabilityProfile {
    /// Select from the process environment.
    pub fn from_env() -> Self {
        let explicit = std::env::var(PROFILE_ENV).ok();
        let docker = std::env::var(DOCKER_ENV).ok();
        Self::select(explicit.as_deref(), docker.as_deref())
    }

    /// `explicit` wins when it names a profile; otherwise `DOCKER_ENV=true`
    /// means software and anything else means accelerated.
    pub fn select(explicit: Option<&str>, docker_env: Option<&str>) -> Self {
        if let Some(value) = explicit.filter(|v| !v.trim().is_empty()) {
            match value.parse() {
                Ok(profile) => return profile,
                Err(e) => warn!("Ignoring {}: {}", PROFILE_ENV, e),
            }
        }
        if docker_env.is_some_and(|v| v.trim().eq_ignore_ascii_case("true")) {
            CapabilityProfile::Software
        } else {
            CapabilityProfile::Accelerated
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CapabilityProfile::Software => "software",
            CapabilityProfile::Accelerated => "accelerated",
        }
    }

    /// Flags only this profile adds
    pub fn specific_flags(&self) -> &'static [&'static str] {
        match self {
            CapabilityProfile::Software => SOFTWARE_FLAGS,
            CapabilityProfile::Accelerated => ACCELERATED_FLAGS,
        }
    }

    /// Every browser flag for this profile, common flags first
    pub fn flags(&self) -> Vec<&'static str> {
        COMMON_FLAGS
            .iter()
            .chain(self.specific_flags())
            .copied()
            .collect()
    }
}

impl fmt::Display for CapabilityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CapabilityProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "software" | "swiftshader" => Ok(CapabilityProfile::Software),
            "accelerated" | "hardware" | "gpu" => Ok(CapabilityProfile::Accelerated),
            other => Err(Error::ConfigError(format!(
                "unknown capability profile '{}' (expected 'software' or 'accelerated')",
                other
            ))),
        }
    }
}
