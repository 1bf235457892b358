use std::{io, sync::mpsc};
use thiserror::Error;

/// What can end the dashboard early.
#[derive(Debug, Error)]
pub enum TuiError {
    /// Terminal input or output failed.
    #[error("terminal io error: {0}")]
    Io(#[from] io::Error),
    /// The measurement's event channel closed underneath the dashboard.
    #[error("measurement events: {0}")]
    Events(#[from] mpsc::TryRecvError),
}
