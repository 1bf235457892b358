//! The error type for setting up and hosting a measurement.
//!
//! Nothing here crosses from the worker thread to the host: a running
//! measurement reports through its observer and its final
//! [`crate::workflow::WorkflowState`].

use crate::{
    automation::AutomationError, player::PlayerError, rew::RewError, settings::SettingsError,
};
use std::io;
use thiserror::Error;

/// Anything that can go wrong outside a running measurement.
#[derive(Debug, Error)]
pub enum SweepError {
    /// Talking to REW failed.
    #[error(transparent)]
    Rew(#[from] RewError),
    /// Driving the screen failed.
    #[error(transparent)]
    Automation(#[from] AutomationError),
    /// Playing a stimulus failed.
    #[error(transparent)]
    Player(#[from] PlayerError),
    /// Loading or saving settings failed.
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// Spawning the worker thread or another io failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// A request the session cannot honour in its current state.
    #[error("{0}")]
    Session(String),
}
