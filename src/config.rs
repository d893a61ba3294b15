//! Session configuration
//!
//! The session document describes the stream (encode size, rate and
//! bitrate), where to find the signaling service, and the fixed
//! foveation tuning. It is JSON, every field is required:
//!
//! ```json
//! {
//!     "version": "1.0.0",
//!     "paas_service": {
//!         "enable": false,
//!         "signaling_server_port": 8443,
//!         "signaling_server_ipaddr": "127.0.0.1"
//!     },
//!     "video_params": { "width": 3840, "height": 1920, "fps": 90, "bitrate": 50000000 },
//!     "fix_foveation_render": {
//!         "center_size_x": 0.6, "center_size_y": 0.6,
//!         "center_shift_x": 0.0, "center_shift_y": 0.0,
//!         "edge_ratio_x": 2.0, "edge_ratio_y": 2.0,
//!         "frag_shader_path": "shaders/ffr.frag.spv",
//!         "vert_shader_path": "shaders/ffr.vert.spv",
//!         "supported": true,
//!         "enable": true
//!     }
//! }
//! ```
use serde::{Deserialize, Serialize};
use squall::{FoveationConfig, FoveationParams};
use utils::log;

use crate::{Result, StratusError};

use std::fs;
use std::path::{Path, PathBuf};

/// Signaling service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaasService {
    pub enable: bool,
    pub signaling_server_port: u32,
    pub signaling_server_ipaddr: String,
}

/// Encoder settings. `width` covers both eyes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
}

/// Fixed foveation tuning and the resample shaders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixFoveationRender {
    pub center_size_x: f32,
    pub center_size_y: f32,
    pub center_shift_x: f32,
    pub center_shift_y: f32,
    pub edge_ratio_x: f32,
    pub edge_ratio_y: f32,
    pub frag_shader_path: String,
    pub vert_shader_path: String,
    /// This device can foveate at all
    pub supported: bool,
    /// Foveate until the client says otherwise
    pub enable: bool,
}

impl FixFoveationRender {
    pub fn params(&self) -> FoveationParams {
        FoveationParams {
            center_size_x: self.center_size_x,
            center_size_y: self.center_size_y,
            center_shift_x: self.center_shift_x,
            center_shift_y: self.center_shift_y,
            edge_ratio_x: self.edge_ratio_x,
            edge_ratio_y: self.edge_ratio_y,
        }
    }
}

/// The whole session document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub version: String,
    pub paas_service: PaasService,
    pub video_params: VideoParams,
    pub fix_foveation_render: FixFoveationRender,
}

impl SessionConfig {
    /// Read and validate the session document at `path`
    pub fn load(path: &Path) -> Result<Self> {
        log::info!("Loading session config from {}", path.display());
        let data = fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Parse and validate a session document
    pub fn from_json(data: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values serde can't
    pub fn validate(&self) -> Result<()> {
        let video = &self.video_params;
        if video.width == 0 || video.height == 0 {
            return Err(StratusError::CONFIG_INVALID(format!(
                "stream resolution {}x{} is empty",
                video.width, video.height
            )));
        }
        if video.fps == 0 {
            return Err(StratusError::CONFIG_INVALID(
                "stream frame rate must be positive".to_string(),
            ));
        }

        let ffr = &self.fix_foveation_render;
        if ffr.supported {
            // the planner divides by these
            ffr.params()
                .validate()
                .map_err(|e| StratusError::CONFIG_INVALID(e.to_string()))?;

            let sizes = [ffr.center_size_x, ffr.center_size_y];
            if sizes.iter().any(|r| !(0.0..=1.0).contains(r)) {
                return Err(StratusError::CONFIG_INVALID(
                    "foveation center size must be within [0, 1]".to_string(),
                ));
            }
            let shifts = [ffr.center_shift_x, ffr.center_shift_y];
            if shifts.iter().any(|r| !(0.0..=1.0).contains(r)) {
                return Err(StratusError::CONFIG_INVALID(
                    "foveation center shift must be within [0, 1]".to_string(),
                ));
            }
            if ffr.vert_shader_path.is_empty() || ffr.frag_shader_path.is_empty() {
                return Err(StratusError::CONFIG_INVALID(
                    "foveation needs both shader paths".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Foveation settings for the presentation target, None if unsupported
    pub fn foveation(&self) -> Option<FoveationConfig> {
        let ffr = &self.fix_foveation_render;
        if !ffr.supported {
            return None;
        }

        Some(FoveationConfig {
            params: ffr.params(),
            vert_shader_path: PathBuf::from(&ffr.vert_shader_path),
            frag_shader_path: PathBuf::from(&ffr.frag_shader_path),
        })
    }

    /// Foveation is supported and turned on at startup
    pub fn foveation_enabled(&self) -> bool {
        self.fix_foveation_render.supported && self.fix_foveation_render.enable
    }
}
