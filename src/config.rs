use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};
use thiserror::Error;

use crate::client::RequestContext;
use crate::editor::SmoothingConfig;
use crate::enums::FramePolicy;
use crate::locator::DEFAULT_THRESHOLD_PX;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Backend endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub api_base: String,
    pub media_base: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8666/api/v1/".into(),
            media_base: "http://localhost:8666/media/".into(),
        }
    }
}

/// Viewer settings. Every field falls back to its default when missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub backend: BackendConfig,
    /// Inference list refresh period.
    pub poll_interval_ms: u64,
    /// Pick radius around contour vertices, in canvas pixels.
    pub hit_threshold_px: f64,
    pub smoothing: SmoothingConfig,
    pub frame_policy: FramePolicy,
    pub highlight_radius_px: f32,
    /// Where downloaded DICOM files are kept.
    pub cache_dir: PathBuf,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            poll_interval_ms: 5000,
            hit_threshold_px: DEFAULT_THRESHOLD_PX,
            smoothing: SmoothingConfig::default(),
            frame_policy: FramePolicy::default(),
            highlight_radius_px: 4.0,
            cache_dir: PathBuf::from("dicom"),
        }
    }
}

impl ViewerConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Request context without a token.
    pub fn request_context(&self) -> RequestContext {
        RequestContext::new(&self.backend.api_base, &self.backend.media_base)
    }
}
