//! Print geometry and zoom reconciliation
//!
//! A map renderer's ground resolution halves with every zoom level, so a
//! poster that is `k` times wider than the on-screen preview needs
//! `log2(k)` extra zoom levels to show the same framing. The in-page
//! renderer performs the same computation; the pixel rounding here must
//! stay identical to it (`round(cm / 2.54 * dpi)`, half away from zero).

use serde::{Deserialize, Serialize};

use crate::Viewport;

pub const CM_PER_INCH: f64 = 2.54;

/// Preview width assumed when the client did not report one
pub const DEFAULT_PREVIEW_WIDTH: f64 = 640.0;

/// Base zoom used when a map does not specify one
pub const DEFAULT_ZOOM: f64 = 15.0;

/// Supported zoom range of the in-page renderer
pub const MIN_ZOOM: f64 = 10.0;
pub const MAX_ZOOM: f64 = 22.0;

/// Pixel length of a printed edge: `round(length_cm / 2.54 * dpi)`.
///
/// Callers validate that both inputs are finite and positive.
pub fn poster_pixels(length_cm: f64, dpi: f64) -> u32 {
    ((length_cm / CM_PER_INCH) * dpi).round() as u32
}

/// Resolved physical print geometry (defaults and orientation applied).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintGeometry {
    pub width_cm: f64,
    pub height_cm: f64,
    pub dpi: f64,
}

impl PrintGeometry {
    pub fn width_px(&self) -> u32 {
        poster_pixels(self.width_cm, self.dpi)
    }

    pub fn height_px(&self) -> u32 {
        poster_pixels(self.height_cm, self.dpi)
    }

    /// Viewport exactly matching the poster, so capture needs no scaling.
    pub fn viewport(&self) -> Viewport {
        Viewport {
            width: self.width_px(),
            height: self.height_px(),
        }
    }
}

/// Substitute the default for a missing, non-finite or non-positive preview width.
pub fn effective_preview_width(preview_width: Option<f64>) -> f64 {
    match preview_width {
        Some(w) if w.is_finite() && w > 0.0 => w,
        _ => DEFAULT_PREVIEW_WIDTH,
    }
}

/// `log2(poster_width / preview_width)`; both widths must be positive.
pub fn zoom_delta(preview_width: f64, poster_width: f64) -> f64 {
    (poster_width / preview_width).log2()
}

/// Clamp a zoom into the renderer's supported range.
pub fn clamp_zoom(zoom: f64) -> f64 {
    if zoom.is_nan() {
        return DEFAULT_ZOOM;
    }
    zoom.clamp(MIN_ZOOM, MAX_ZOOM)
}

/// Outcome of reconciling one map's preview framing with the poster size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoomReconciliation {
    pub preview_width: f64,
    pub poster_width: u32,
    pub base_zoom: f64,
    pub zoom_delta: f64,
    pub effective_zoom: f64,
    /// True when the unclamped zoom fell outside the supported range
    pub clamped: bool,
}

/// Compute the render zoom for a map previewed at `preview_width` pixels.
pub fn reconcile(
    base_zoom: Option<f64>,
    preview_width: Option<f64>,
    poster_width: u32,
) -> ZoomReconciliation {
    let base_zoom = base_zoom.filter(|z| z.is_finite()).unwrap_or(DEFAULT_ZOOM);
    let preview_width = effective_preview_width(preview_width);
    let delta = zoom_delta(preview_width, f64::from(poster_width));
    let raw = base_zoom + delta;
    let effective_zoom = clamp_zoom(raw);

    ZoomReconciliation {
        preview_width,
        poster_width,
        base_zoom,
        zoom_delta: delta,
        effective_zoom,
        clamped: effective_zoom != raw,
    }
}
