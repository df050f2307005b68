//! Image selection: built-in presets or a custom URL

use crate::config::Config;
use crate::error::{Error, Result};
use crate::utils::{filename_from_url, parse_http_url};
use std::path::PathBuf;

/// Which image the user wants to download
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageSelection {
    /// A preset from [`Config::images`], by name (case-insensitive)
    Preset(String),
    /// An arbitrary http/https URL
    Custom(String),
}

impl ImageSelection {
    /// Combine a picked preset with an optional custom URL field
    ///
    /// A non-blank custom URL takes precedence over the preset.
    pub fn from_inputs(preset: &str, custom_url: Option<&str>) -> Self {
        match custom_url.map(str::trim) {
            Some(url) if !url.is_empty() => ImageSelection::Custom(url.to_string()),
            _ => ImageSelection::Preset(preset.to_string()),
        }
    }
}

/// A resolved download: where to fetch from and where to save it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    /// Human-readable name of the image
    pub name: String,
    /// Source URL
    pub source: url::Url,
    /// Local file inside the download directory
    pub destination: PathBuf,
}

impl Config {
    /// Resolve a selection into a concrete source URL and destination path
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unknown preset, or a custom URL
    /// that is blank, malformed, or not http/https.
    pub fn resolve(&self, selection: &ImageSelection) -> Result<FetchRequest> {
        match selection {
            ImageSelection::Preset(name) => {
                let preset = self.preset(name).ok_or_else(|| Error::InvalidInput {
                    field: "preset",
                    reason: format!(
                        "unknown image '{}' (available: {})",
                        name.trim(),
                        self.images
                            .iter()
                            .map(|p| p.name.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                })?;
                Ok(FetchRequest {
                    name: preset.name.clone(),
                    source: parse_http_url(&preset.url)?,
                    destination: self.download_dir().join(&preset.filename),
                })
            }
            ImageSelection::Custom(raw) => {
                let source = parse_http_url(raw)?;
                let filename = filename_from_url(&source);
                tracing::debug!(url = %source, filename = %filename, "resolved custom image URL");
                Ok(FetchRequest {
                    name: filename.clone(),
                    destination: self.download_dir().join(&filename),
                    source,
                })
            }
        }
    }
}
