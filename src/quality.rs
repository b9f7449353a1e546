use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error_codes::{CodedError, CONFIG_INVALID};
use crate::schema::Orientation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Fast,
    Standard,
    #[default]
    High,
}

impl QualityPreset {
    pub fn from_keyword(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "standard" => Ok(Self::Standard),
            "high" => Ok(Self::High),
            _ => Err(anyhow!(CodedError::configuration(
                CONFIG_INVALID,
                format!("invalid quality preset '{value}'"),
            )
            .with_details(json!({
                "provided": value,
                "allowed": ["fast", "standard", "high"]
            })))),
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Standard => "standard",
            Self::High => "high",
        }
    }

    /// Landscape frame size; portrait swaps the axes.
    fn landscape_px(self) -> (u32, u32) {
        match self {
            Self::Fast => (854, 480),
            Self::Standard => (1280, 720),
            Self::High => (1920, 1080),
        }
    }

    pub fn fps(self) -> u32 {
        60
    }

    pub fn dimensions_px(self, orientation: Orientation) -> (u32, u32) {
        let (width, height) = self.landscape_px();
        match orientation {
            Orientation::Landscape => (width, height),
            Orientation::Portrait => (height, width),
        }
    }

    /// Wall-clock budget for one render subprocess.
    pub fn render_timeout(self) -> Duration {
        match self {
            Self::Fast => Duration::from_secs(180),
            Self::Standard => Duration::from_secs(300),
            Self::High => Duration::from_secs(600),
        }
    }

    /// libx264 `-preset` used for this quality.
    pub fn x264_preset(self) -> &'static str {
        match self {
            Self::Fast => "ultrafast",
            Self::Standard => "veryfast",
            Self::High => "medium",
        }
    }

    pub fn frame_spec(self, orientation: Orientation) -> FrameSpec {
        let (width, height) = self.dimensions_px(orientation);
        FrameSpec {
            width,
            height,
            fps: self.fps(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl FrameSpec {
    /// Directory name for this frame size, e.g. `1080p60` or `1920p60` for portrait.
    pub fn directory_name(self) -> String {
        format!("{}p{}", self.height, self.fps)
    }

    pub fn aspect(self) -> f32 {
        self.width as f32 / self.height as f32
    }

    pub fn frame_bytes(self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// `{media_root}/videos/{height}p{fps}/{file_name}`, deterministic per preset.
pub fn output_video_path(media_root: &Path, frame: FrameSpec, file_name: &str) -> PathBuf {
    media_root
        .join("videos")
        .join(frame.directory_name())
        .join(file_name)
}
