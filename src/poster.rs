//! Poster configuration model
//!
//! The configuration is forwarded to the in-page renderer verbatim, so only the
//! fields the pipeline needs are typed; everything else rides along in the
//! flattened `extra` maps.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::geometry::{self, PrintGeometry};
use crate::{Error, Result};

pub const DEFAULT_WIDTH_CM: f64 = 80.0;
pub const DEFAULT_HEIGHT_CM: f64 = 60.0;
pub const DEFAULT_DPI: f64 = 200.0;

/// Largest printable edge in centimetres
pub const MAX_PRINT_CM: f64 = 200.0;

/// Largest poster edge in pixels
pub const MAX_PIXELS_PER_AXIS: u32 = 20_000;

/// Full user-specified rendering request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PosterConfig {
    #[serde(default)]
    pub print: PrintSpec,
    /// Poster-wide style identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Layout descriptor, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Value>,
    #[serde(default)]
    pub maps: Vec<MapSpec>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Landscape,
    Portrait,
}

/// Physical print geometry; absent values take the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintSpec {
    /// Width in centimetres
    #[serde(default, alias = "widthCm", skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    /// Height in centimetres
    #[serde(default, alias = "heightCm", skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    /// Dots per inch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One map on the poster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapSpec {
    /// `[longitude, latitude]`
    pub center: [f64; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoom: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Width of the on-screen preview the framing was chosen in
    #[serde(default, alias = "containerWidth", skip_serializing_if = "Option::is_none")]
    pub preview_width: Option<f64>,
    #[serde(default, alias = "containerHeight", skip_serializing_if = "Option::is_none")]
    pub preview_height: Option<f64>,
    #[serde(default)]
    pub markers: Vec<Marker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<TitleSpec>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    /// `[longitude, latitude]`
    pub coordinates: [f64; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Title overlay
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_text: Option<String>,
    /// Font family
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
}

impl PrintSpec {
    /// Apply defaults, then swap edges so they agree with the orientation.
    pub fn resolve(&self) -> PrintGeometry {
        let mut width_cm = self.width.unwrap_or(DEFAULT_WIDTH_CM);
        let mut height_cm = self.height.unwrap_or(DEFAULT_HEIGHT_CM);
        let dpi = self.dpi.unwrap_or(DEFAULT_DPI);

        let swap = match self.orientation {
            Some(Orientation::Portrait) => width_cm > height_cm,
            Some(Orientation::Landscape) => height_cm > width_cm,
            None => false,
        };
        if swap {
            std::mem::swap(&mut width_cm, &mut height_cm);
        }

        PrintGeometry {
            width_cm,
            height_cm,
            dpi,
        }
    }
}

impl PosterConfig {
    /// Parse a configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("Malformed poster configuration: {}", e)))
    }

    /// Parse a configuration from an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::ConfigError(format!("Malformed poster configuration: {}", e)))
    }

    /// Resolved print geometry.
    pub fn geometry(&self) -> PrintGeometry {
        self.print.resolve()
    }

    /// Copy with print defaults and orientation written back into `print`.
    ///
    /// This is the form sent to the renderer: it computes the poster width from
    /// `print.width`, which must match the viewport the surface is launched with.
    /// Zoom values are left untouched; the renderer applies the zoom delta itself.
    pub fn normalized(&self) -> PosterConfig {
        let geometry = self.geometry();
        let mut config = self.clone();
        config.print.width = Some(geometry.width_cm);
        config.print.height = Some(geometry.height_cm);
        config.print.dpi = Some(geometry.dpi);
        config
    }

    /// Check every field, reporting all problems at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        let geometry = self.geometry();

        check_length("width", geometry.width_cm, &mut errors);
        check_length("height", geometry.height_cm, &mut errors);
        if !(geometry.dpi.is_finite() && geometry.dpi > 0.0) {
            errors.push(format!("Invalid print resolution: {} DPI", geometry.dpi));
        }

        if errors.is_empty() {
            let viewport = geometry.viewport();
            if viewport.width > MAX_PIXELS_PER_AXIS || viewport.height > MAX_PIXELS_PER_AXIS {
                errors.push(format!(
                    "Resulting image would be too large: {}px (maximum {}px per side). Reduce size or DPI.",
                    viewport, MAX_PIXELS_PER_AXIS
                ));
            }
            if viewport.width == 0 || viewport.height == 0 {
                errors.push(format!("Resulting image would be empty: {}px", viewport));
            }
        }

        if self.maps.is_empty() {
            errors.push("At least one map is required".to_string());
        }
        for (index, map) in self.maps.iter().enumerate() {
            map.validate(index, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidPoster(errors))
        }
    }
}

impl MapSpec {
    fn validate(&self, index: usize, errors: &mut Vec<String>) {
        let prefix = format!("Map {}:", index);
        check_coordinates(&prefix, self.center, errors);

        check_range(&prefix, "zoom", self.zoom, 0.0, 22.0, errors);
        check_range(&prefix, "bearing", self.bearing, 0.0, 360.0, errors);
        check_range(&prefix, "pitch", self.pitch, 0.0, 60.0, errors);

        if let Some(w) = self.preview_width {
            if !w.is_finite() {
                errors.push(format!("{} Invalid previewWidth: {}", prefix, w));
            }
        }

        for (marker_index, marker) in self.markers.iter().enumerate() {
            let prefix = format!("Map {}, Marker {}:", index, marker_index);
            check_coordinates(&prefix, marker.coordinates, errors);
        }
    }

    /// Zoom reconciliation for this map on a poster `poster_width` pixels wide.
    pub fn reconcile(&self, poster_width: u32) -> geometry::ZoomReconciliation {
        geometry::reconcile(self.zoom, self.preview_width, poster_width)
    }
}

fn check_length(name: &str, cm: f64, errors: &mut Vec<String>) {
    if !(cm.is_finite() && cm > 0.0) {
        errors.push(format!("Invalid print {}: {}cm", name, cm));
    } else if cm > MAX_PRINT_CM {
        errors.push(format!(
            "Print {} exceeds maximum ({}cm): {}cm",
            name, MAX_PRINT_CM, cm
        ));
    }
}

fn check_coordinates(prefix: &str, [lng, lat]: [f64; 2], errors: &mut Vec<String>) {
    if !(-180.0..=180.0).contains(&lng) {
        errors.push(format!(
            "{} Invalid longitude: {}. Must be between -180 and 180",
            prefix, lng
        ));
    }
    if !(-90.0..=90.0).contains(&lat) {
        errors.push(format!(
            "{} Invalid latitude: {}. Must be between -90 and 90",
            prefix, lat
        ));
    }
}

fn check_range(
    prefix: &str,
    name: &str,
    value: Option<f64>,
    min: f64,
    max: f64,
    errors: &mut Vec<String>,
) {
    if let Some(v) = value {
        if !(min..=max).contains(&v) {
            errors.push(format!(
                "{} Invalid {}: {}. Must be between {} and {}",
                prefix, name, v, min, max
            ));
        }
    }
}
