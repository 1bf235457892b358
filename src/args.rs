// Commandline argument parsers using clap for autosweep and locate

use crate::{
    automation::xdo::DEFAULT_CAPTURE_COMMAND,
    channel::ChannelMapping,
    player::DEFAULT_TIMEOUT,
    rew::DEFAULT_BASE_URL,
    settings::{MeasurementConfig, SETTINGS_FILE},
    workflow::ControllerConfig,
};
use clap::{ArgAction, Parser};
use std::{path::PathBuf, time::Duration};

/// Where log output goes while the dashboard owns the terminal.
pub const DEFAULT_LOG_FILE: &str = "autosweep.log";

/// Default address for `--serve`.
pub const DEFAULT_BIND: &str = "0.0.0.0:4736";

/// How the measurement is presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontEnd {
    /// Full-screen terminal dashboard.
    Tui,
    /// Line-oriented console on stdin and stdout.
    Console,
    /// Line-oriented console for TCP clients on this address.
    Serve(String),
}

/// Options of the `autosweep` binary.
#[derive(Debug, Parser, Clone)]
#[clap(version, about = "Drives REW through a series of sweep measurements")]
pub struct SweepArgs {
    /// Base URL of REW's HTTP API
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub rew_url: String,

    /// Directory holding the sweep stimuli, one file per channel
    #[arg(long, default_value = "audio")]
    pub audio_dir: PathBuf,

    /// Directory holding the button template images
    #[arg(long, default_value = "assets")]
    pub assets_dir: PathBuf,

    /// Settings file with the channel mapping
    #[arg(long, default_value = SETTINGS_FILE)]
    pub settings: PathBuf,

    /// Channels to measure, overriding the settings file, e.g. C,FL,FR,SW1
    #[arg(long, value_delimiter = ',')]
    pub channels: Option<Vec<String>>,

    /// Name of the microphone position
    #[arg(long, default_value = "Reference")]
    pub position: String,

    /// Sweeps per channel
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub iterations: u32,

    /// Measure the main listening position, a single iteration
    #[arg(long, action = ArgAction::SetTrue)]
    pub reference: bool,

    /// Check that the microphone is centred between FL and FR first
    #[arg(long, action = ArgAction::SetTrue)]
    pub center_mic: bool,

    /// Sweeps per step before a step counts as failed
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: u32,

    /// Give up on the run after this many failed dispatches of one step,
    /// retry forever when absent
    #[arg(long)]
    pub max_step_retries: Option<u32>,

    /// Seconds to wait for playback when a stimulus' length is unknown
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub playback_timeout: u64,

    /// Command printing a screenshot to stdout
    #[arg(long, default_value = DEFAULT_CAPTURE_COMMAND)]
    pub capture_command: String,

    /// Use a line-oriented console on stdin instead of the dashboard
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "serve")]
    pub console: bool,

    /// Accept console clients over TCP instead of the dashboard
    #[arg(long, action = ArgAction::SetTrue)]
    pub serve: bool,

    /// Address to listen on with --serve
    #[arg(long, default_value = DEFAULT_BIND)]
    pub bind: String,

    /// Run against a simulated REW and screen, without playing audio
    #[arg(long, action = ArgAction::SetTrue)]
    pub simulate: bool,

    /// Chance, from 0 to 1, that a simulated sweep raises a warning
    #[arg(long, default_value_t = 0.0)]
    pub problem_rate: f64,

    /// Log file, defaults to autosweep.log with the dashboard
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl SweepArgs {
    /// Which front end the flags select.
    pub fn front_end(&self) -> FrontEnd {
        if self.serve {
            FrontEnd::Serve(self.bind.clone())
        } else if self.console {
            FrontEnd::Console
        } else {
            FrontEnd::Tui
        }
    }

    /// The log file to use, if any. The dashboard always logs to a file.
    pub fn log_file(&self) -> Option<PathBuf> {
        match (&self.log_file, self.front_end()) {
            (Some(path), _) => Some(path.clone()),
            (None, FrontEnd::Tui) => Some(PathBuf::from(DEFAULT_LOG_FILE)),
            (None, _) => None,
        }
    }

    /// The measurement configuration. `--channels` wins over `saved`, which
    /// wins over the default channel set.
    pub fn measurement_config(&self, saved: Option<ChannelMapping>) -> MeasurementConfig {
        let defaults = MeasurementConfig::default();
        let channels = match (&self.channels, saved) {
            (Some(channels), _) => ChannelMapping::identity(channels),
            (None, Some(saved)) => saved,
            (None, None) => defaults.channels,
        };
        MeasurementConfig {
            channels,
            iterations: self.iterations,
            reference: self.reference,
            center_microphone: self.center_mic,
            position: self.position.clone(),
        }
    }

    /// Retry limits for the controller.
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            max_attempts: self.max_attempts,
            max_step_retries: self.max_step_retries,
            ..ControllerConfig::default()
        }
    }

    /// Fallback playback wait.
    pub fn playback_timeout(&self) -> Duration {
        Duration::from_secs(self.playback_timeout)
    }
}

/// Options of the `locate` binary.
#[derive(Debug, Parser, Clone)]
#[clap(version, about = "Finds REW's Measure and Start buttons on screen")]
pub struct LocateArgs {
    /// Directory holding the button template images
    #[arg(long, default_value = "assets")]
    pub assets_dir: PathBuf,

    /// Command printing a screenshot to stdout
    #[arg(long, default_value = DEFAULT_CAPTURE_COMMAND)]
    pub capture_command: String,

    /// Minimum template match score, from 0 to 1
    #[arg(long, default_value_t = 0.9)]
    pub confidence: f32,

    /// Move the pointer to every point found, for a visual check
    #[arg(short = 'm', long = "move", action = ArgAction::SetTrue)]
    pub move_pointer: bool,

    /// Seconds to rest on each point with --move
    #[arg(long, default_value_t = 1)]
    pub pause: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definitions_are_consistent() {
        SweepArgs::command().debug_assert();
        LocateArgs::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let args = SweepArgs::parse_from(["autosweep"]);
        assert_eq!(args.front_end(), FrontEnd::Tui);
        assert_eq!(args.log_file(), Some(PathBuf::from(DEFAULT_LOG_FILE)));
        assert_eq!(args.measurement_config(None), MeasurementConfig::default());
        assert_eq!(args.controller_config(), ControllerConfig::default());
        assert_eq!(args.playback_timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn channels_override_settings() {
        let args = SweepArgs::parse_from([
            "autosweep",
            "--channels",
            "fl,FR,SW1",
            "--iterations",
            "3",
            "--reference",
            "--console",
        ]);
        let saved = ChannelMapping::identity(["C"]);
        let config = args.measurement_config(Some(saved));
        assert_eq!(config.channels.ordered_channels(), vec!["FL", "FR", "SW1"]);
        assert_eq!(config.iterations, 3);
        assert!(config.reference);
        assert_eq!(args.front_end(), FrontEnd::Console);
        assert_eq!(args.log_file(), None);
    }

    #[test]
    fn saved_mapping_used_without_channels() {
        let args = SweepArgs::parse_from(["autosweep", "--serve", "--max-step-retries", "5"]);
        let mut saved = ChannelMapping::identity(["SW1", "SW2"]);
        saved.remap("SW2", "SW1");
        assert_eq!(args.measurement_config(Some(saved.clone())).channels, saved);
        assert_eq!(args.front_end(), FrontEnd::Serve(DEFAULT_BIND.to_owned()));
        assert_eq!(args.controller_config().max_step_retries, Some(5));
    }

    #[test]
    fn zero_iterations_rejected() {
        assert!(SweepArgs::try_parse_from(["autosweep", "--iterations", "0"]).is_err());
        assert!(SweepArgs::try_parse_from(["autosweep", "--console", "--serve"]).is_err());
    }
}
