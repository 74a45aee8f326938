//! Error types for the poster render pipeline

use thiserror::Error;

/// Result type alias for render operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while preparing, rendering or delivering a poster
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid service or render configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The submitted poster configuration failed validation
    #[error("Invalid poster configuration: {}", .0.join("; "))]
    InvalidPoster(Vec<String>),

    /// The encoded configuration does not fit in a navigation URL
    #[error("Encoded render request is {len} characters, exceeding the {limit} character limit")]
    ConfigTooLarge { len: usize, limit: usize },

    /// Failed to encode or decode a render request
    #[error("Encoding failed: {0}")]
    EncodeError(String),

    /// The surface process could not be started
    #[error("Surface launch failed: {0}")]
    LaunchError(String),

    /// Navigation to the renderer surface failed
    #[error("Failed to load renderer surface: {0}")]
    LoadError(String),

    /// Evaluating a probe expression in the surface failed
    #[error("Script evaluation failed: {0}")]
    ScriptError(String),

    /// The surface stopped answering while the render was still pending
    #[error("Render did not complete within {0}ms")]
    Timeout(u64),

    /// The in-page renderer never created its map object
    #[error("Renderer failed to initialize: map object never appeared")]
    RendererInitFailed,

    /// Capturing the pixel buffer failed
    #[error("Capture failed: {0}")]
    CaptureError(String),

    /// Persisting or reading a poster failed
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable classification carried in failure envelopes as `errorKind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ConfigError(_) | Error::InvalidPoster(_) => "configuration",
            Error::ConfigTooLarge { .. } | Error::EncodeError(_) => "encoding",
            Error::LaunchError(_) => "launch",
            Error::LoadError(_) => "navigation",
            Error::ScriptError(_) => "script",
            Error::Timeout(_) => "timeout",
            Error::RendererInitFailed => "renderer_init",
            Error::CaptureError(_) => "capture",
            Error::StorageError(_) | Error::Io(_) => "storage",
            Error::Other(_) => "other",
        }
    }

    /// Whether the error was raised before any surface was launched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::ConfigError(_)
                | Error::InvalidPoster(_)
                | Error::ConfigTooLarge { .. }
                | Error::EncodeError(_)
        )
    }

    /// Validation messages, when the error carries any.
    pub fn details(&self) -> Option<&[String]> {
        match self {
            Error::InvalidPoster(errors) => Some(errors),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_poster_joins_messages() {
        let err = Error::InvalidPoster(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Invalid poster configuration: a; b");
        assert_eq!(err.details().map(|d| d.len()), Some(2));
        assert!(err.is_configuration());
    }

    #[test]
    fn renderer_init_is_not_a_timeout() {
        assert_eq!(Error::RendererInitFailed.kind(), "renderer_init");
        assert_eq!(Error::Timeout(120_000).kind(), "timeout");
        assert!(!Error::RendererInitFailed.is_configuration());
    }
}
