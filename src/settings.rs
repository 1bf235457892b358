//! The measurement configuration and the settings file it is persisted to.
//!
//! The file is a plain JSON object from channel to
//! `{ "audio": <stimulus id>, "status": <string> }`, e.g.
//!
//! ```text
//! {"FL":{"audio":"FL","status":"Selected"},"SW2":{"audio":"SW1","status":"Selected"}}
//! ```

use crate::channel::{ChannelMapping, DEFAULT_CHANNELS};
use log::{info, warn};
use std::{fs, io, path::Path};
use thiserror::Error;

/// Default location of the settings file.
pub const SETTINGS_FILE: &str = "settings.json";

/// Things that go wrong reading or writing the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Reading or writing the file failed.
    #[error("settings file io error: {0}")]
    Io(#[from] io::Error),
    /// The file is not valid JSON settings.
    #[error("settings file is not valid: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything the schedule is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementConfig {
    /// Selected channels and their stimuli.
    pub channels: ChannelMapping,
    /// Sweeps per channel at this position. Ignored for the reference.
    pub iterations: u32,
    /// Measuring the main listening position.
    pub reference: bool,
    /// Run the left/right centering check before the sweeps.
    pub center_microphone: bool,
    /// Name of the microphone position.
    pub position: String,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            channels: ChannelMapping::identity(DEFAULT_CHANNELS.iter().copied()),
            iterations: 1,
            reference: false,
            center_microphone: false,
            position: "Reference".to_owned(),
        }
    }
}

/// Read the channel mapping from `path`.
pub fn read_settings(path: impl AsRef<Path>) -> Result<ChannelMapping, SettingsError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Load the mapping if the file exists and is valid. A corrupt file is
/// ignored with a warning.
pub fn load_settings(path: impl AsRef<Path>) -> Option<ChannelMapping> {
    let path = path.as_ref();
    if !path.exists() {
        return None;
    }
    match read_settings(path) {
        Ok(mapping) => {
            info!(
                "Loaded {} channels from {}",
                mapping.len(),
                path.display()
            );
            Some(mapping)
        }
        Err(e) => {
            warn!("Settings file {} is corrupted, ignoring it: {e}", path.display());
            None
        }
    }
}

/// Write the mapping to `path`.
pub fn save_settings(path: impl AsRef<Path>, mapping: &ChannelMapping) -> Result<(), SettingsError> {
    let json = serde_json::to_string_pretty(mapping)?;
    fs::write(path.as_ref(), json)?;
    info!("Settings saved to {}", path.as_ref().display());
    Ok(())
}
