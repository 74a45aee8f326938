//! Render request encoding
//!
//! The whole poster configuration travels to the renderer as one URL
//! parameter: JSON, then standard base64, then percent-escaping. Decoding
//! reverses the three steps.
//!
//! The page decodes the base64 with `atob`, which yields one Latin-1
//! character per byte, so the JSON is written as pure ASCII: every
//! non-ASCII character becomes a `\uXXXX` escape (surrogate pairs above the
//! BMP).

use std::io;

use base64::Engine as Base64Engine;
use serde::Serialize;
use serde_json::ser::Formatter;
use url::Url;

use crate::poster::PosterConfig;
use crate::{Error, Result, Viewport};

/// Longest navigation URL the surface accepts (Chromium's URL ceiling)
pub const MAX_URL_LEN: usize = 2 * 1024 * 1024;

/// Compact JSON formatter that escapes everything outside ASCII.
struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (i, ch) in fragment.char_indices() {
            if ch.is_ascii() {
                continue;
            }
            writer.write_all(fragment[start..i].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = i + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

/// Serialize a configuration as ASCII-only JSON.
pub fn ascii_json(config: &PosterConfig) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut out, AsciiFormatter);
    config
        .serialize(&mut ser)
        .map_err(|e| Error::EncodeError(format!("Failed to serialize configuration: {}", e)))?;
    Ok(out)
}

/// Encode a configuration into a transport-safe parameter value.
pub fn encode_config(config: &PosterConfig) -> Result<String> {
    let json = ascii_json(config)?;
    let b64 = base64::engine::general_purpose::STANDARD.encode(&json);
    Ok(urlencoding::encode(&b64).into_owned())
}

/// Inverse of [`encode_config`].
pub fn decode_config(encoded: &str) -> Result<PosterConfig> {
    let b64 = urlencoding::decode(encoded)
        .map_err(|e| Error::EncodeError(format!("Invalid percent-encoding: {}", e)))?;
    let json = base64::engine::general_purpose::STANDARD
        .decode(b64.as_bytes())
        .map_err(|e| Error::EncodeError(format!("Invalid base64 payload: {}", e)))?;
    serde_json::from_slice(&json)
        .map_err(|e| Error::EncodeError(format!("Invalid configuration payload: {}", e)))
}

/// Navigation URL for the renderer surface.
///
/// Appends `print`, `config`, `dpi`, `width` and `height` to `base`, keeping
/// any query or fragment already present. Fails with
/// [`Error::ConfigTooLarge`] instead of truncating when the result is longer
/// than `limit`.
pub fn build_render_url(
    base: &Url,
    config: &PosterConfig,
    dpi: f64,
    viewport: Viewport,
    limit: usize,
) -> Result<String> {
    let encoded = encode_config(config)?;

    let mut target = base.clone();
    let fragment = target.fragment().map(|f| f.to_string());
    target.set_fragment(None);

    let separator = match target.query() {
        Some(q) if !q.is_empty() => "&",
        Some(_) => "",
        None => "?",
    };

    let mut url = format!(
        "{}{}print=true&config={}&dpi={}&width={}&height={}",
        target.as_str(),
        separator,
        encoded,
        dpi,
        viewport.width,
        viewport.height
    );
    if let Some(fragment) = fragment {
        url.push('#');
        url.push_str(&fragment);
    }

    if url.len() > limit {
        return Err(Error::ConfigTooLarge {
            len: url.len(),
            limit,
        });
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poster::{Marker, TitleSpec};

    fn sample() -> PosterConfig {
        let mut config = PosterConfig::from_json(
            r#"{"print":{"width":80,"height":60,"dpi":200},"style":"mapbox://styles/mapbox/streets-v12","maps":[{"center":[-122.4,37.8],"zoom":15,"previewWidth":640}]}"#,
        )
        .unwrap();
        let map = &mut config.maps[0];
        map.markers.push(Marker {
            coordinates: [-122.41, 37.79],
            icon: Some("heart".into()),
            color: Some("rgb(211, 59, 62)".into()),
            extra: Default::default(),
        });
        map.title = Some(TitleSpec {
            enabled: true,
            large_text: Some("SAN FRANCISCO & 東京 — «ÇA VA?» 🗺️".into()),
            small_text: Some("37.7749° N, 122.4194° W / %20 +=&?#".into()),
            font: Some("Poppins".into()),
        });
        config
    }

    #[test]
    fn encoded_config_decodes_to_the_original() {
        let config = sample();
        let encoded = encode_config(&config).unwrap();
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "%-._~".contains(c)));
        assert_eq!(decode_config(&encoded).unwrap(), config);
    }

    /// Decode the parameter like the page does: `atob` maps each byte to
    /// one char, then `JSON.parse`.
    fn page_decode(encoded: &str) -> PosterConfig {
        let b64 = urlencoding::decode(encoded).unwrap();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64.as_bytes())
            .unwrap();
        let latin1: String = bytes.iter().map(|&b| b as char).collect();
        serde_json::from_str(&latin1).unwrap()
    }

    #[test]
    fn non_ascii_titles_survive_page_decode() {
        let mut config = sample();
        config.maps[0].title.as_mut().unwrap().small_text = Some("25.7617° N, 東京".into());
        let decoded = page_decode(&encode_config(&config).unwrap());
        assert_eq!(
            decoded.maps[0].title.as_ref().unwrap().small_text.as_deref(),
            Some("25.7617° N, 東京")
        );
        // emoji and other astral chars need surrogate pairs
        assert_eq!(decoded, config);
    }

    #[test]
    fn json_payload_is_ascii_only() {
        let json = ascii_json(&sample()).unwrap();
        assert!(json.is_ascii());
        let text = String::from_utf8(json).unwrap();
        assert!(text.contains("\\u6771\\u4eac"));
        assert!(text.contains("\\ud83d\\uddfa"));
        assert!(text.contains("\\u00b0"));
    }

    #[test]
    fn url_carries_all_parameters() {
        let base = Url::parse("https://renderer.example/print").unwrap();
        let viewport = Viewport {
            width: 6299,
            height: 4724,
        };
        let url = build_render_url(&base, &sample(), 200.0, viewport, MAX_URL_LEN).unwrap();
        assert!(url.starts_with("https://renderer.example/print?print=true&config="));
        assert!(url.ends_with("&dpi=200&width=6299&height=4724"));

        let parsed = Url::parse(&url).unwrap();
        let config = parsed
            .query_pairs()
            .find(|(k, _)| k == "config")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        // query_pairs already undid the percent-escaping
        let json = base64::engine::general_purpose::STANDARD
            .decode(config.as_bytes())
            .unwrap();
        let decoded: PosterConfig = serde_json::from_slice(&json).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn existing_query_and_fragment_are_kept() {
        let base = Url::parse("http://localhost:8080/?token=abc#poster").unwrap();
        let viewport = Viewport {
            width: 10,
            height: 10,
        };
        let url = build_render_url(&base, &sample(), 150.0, viewport, MAX_URL_LEN).unwrap();
        assert!(url.starts_with("http://localhost:8080/?token=abc&print=true&config="));
        assert!(url.ends_with("&dpi=150&width=10&height=10#poster"));
    }

    #[test]
    fn oversized_request_fails_loudly() {
        let mut config = sample();
        config.maps[0].title.as_mut().unwrap().large_text = Some("x".repeat(4096));
        let base = Url::parse("http://localhost/").unwrap();
        let viewport = Viewport {
            width: 10,
            height: 10,
        };
        match build_render_url(&base, &config, 200.0, viewport, 1024) {
            Err(Error::ConfigTooLarge { len, limit }) => {
                assert_eq!(limit, 1024);
                assert!(len > 1024);
            }
            other => panic!("expected ConfigTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn corrupt_payload_is_an_encoding_error() {
        assert_eq!(decode_config("%%%").unwrap_err().kind(), "encoding");
        assert_eq!(decode_config("bm90IGpzb24=").unwrap_err().kind(), "encoding");
    }
}
