//! The measurement schedule: an ordered list of steps derived from the
//! current configuration.
//!
//! The list is always rebuilt from scratch when the configuration changes.
//! Only the workflow controller touches step statuses afterwards.

use crate::{channel, settings::MeasurementConfig};
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

/// What a step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// Wait for REW to be online and configured, and its window to be visible.
    CheckSettings,
    /// Sweep one of the mains so its impulse arrival time is known.
    MeasureDistance,
    /// Compare the left and right arrival times.
    CheckMicrophonePosition,
    /// An actual channel measurement.
    MeasureSweep,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepKind::CheckSettings => "Check REW settings",
            StepKind::MeasureDistance => "Measure distance",
            StepKind::CheckMicrophonePosition => "Check microphone position",
            StepKind::MeasureSweep => "Measure sweep",
        };
        f.write_str(s)
    }
}

/// Where a step is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepStatus {
    /// Waiting to run.
    NotStarted,
    /// Running now.
    InProgress,
    /// Finished with a clean sweep.
    Completed,
    /// The last attempt failed, the step will run again.
    Retrying,
    /// Given up on, only with a bounded outer retry.
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::NotStarted => "Not started",
            StepStatus::InProgress => "In progress",
            StepStatus::Completed => "Completed",
            StepStatus::Retrying => "Retrying",
            StepStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Which iteration of a position a sweep belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IterationLabel {
    /// The main listening position, measured once.
    Reference,
    /// Iteration number within a position. Zero is the pre-measurement
    /// distance check.
    Number(u32),
}

impl fmt::Display for IterationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterationLabel::Reference => f.write_str("Reference"),
            IterationLabel::Number(n) => write!(f, "{n}"),
        }
    }
}

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementStep {
    /// What the step does.
    pub description: StepKind,
    /// Absent for utility steps.
    pub channel: Option<String>,
    /// Stimulus id to play, may differ from the channel.
    pub audio_file: Option<String>,
    /// Which iteration, or the reference label.
    pub iteration: IterationLabel,
    /// Microphone position name.
    pub position: String,
    /// Where the step stands.
    pub status: StepStatus,
    /// The user has to move this subwoofer's cable onto the SW1 output
    /// before the sweep.
    pub cable_swap: bool,
}

impl MeasurementStep {
    fn utility(description: StepKind, position: &str) -> Self {
        Self {
            description,
            channel: None,
            audio_file: None,
            iteration: IterationLabel::Reference,
            position: position.to_owned(),
            status: StepStatus::NotStarted,
            cable_swap: false,
        }
    }

    fn sweep(
        description: StepKind,
        channel: &str,
        config: &MeasurementConfig,
        iteration: IterationLabel,
    ) -> Self {
        Self {
            description,
            channel: Some(channel.to_owned()),
            audio_file: Some(config.channels.audio_for(channel).to_owned()),
            iteration,
            position: config.position.clone(),
            status: StepStatus::NotStarted,
            cable_swap: config.channels.needs_cable_swap(channel),
        }
    }

    /// The name typed into REW for this measurement.
    pub fn measurement_name(&self) -> String {
        let channel = self.channel.as_deref().unwrap_or_default();
        match self.iteration {
            IterationLabel::Reference => channel.to_owned(),
            IterationLabel::Number(n) => {
                format!("{channel} (Pos: {} - Iter: {n})", self.position)
            }
        }
    }

    /// A one-line summary for logs and prompts.
    pub fn label(&self) -> String {
        match &self.channel {
            Some(channel) => format!(
                "{} {channel} (Pos: {} - Iter: {})",
                self.description, self.position, self.iteration
            ),
            None => self.description.to_string(),
        }
    }
}

/// The ordered list of steps for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    steps: Vec<MeasurementStep>,
}

/// A schedule shared between the worker and whatever is displaying it.
pub type SharedSchedule = Arc<Mutex<Schedule>>;

/// Lock a [`SharedSchedule`], riding over poisoning.
pub fn lock(schedule: &SharedSchedule) -> MutexGuard<'_, Schedule> {
    schedule.lock().unwrap_or_else(|e| e.into_inner())
}

impl Schedule {
    /// Wrap a prepared list of steps.
    pub fn from_steps(steps: Vec<MeasurementStep>) -> Self {
        Self { steps }
    }

    /// Build the step list for `config`. Pure and idempotent: every status
    /// starts at [`StepStatus::NotStarted`].
    pub fn regenerate(config: &MeasurementConfig) -> Self {
        let position = config.position.as_str();
        let mut steps = vec![MeasurementStep::utility(StepKind::CheckSettings, position)];

        let iterations: Vec<IterationLabel> = if config.reference {
            vec![IterationLabel::Reference]
        } else {
            (1..=config.iterations.max(1))
                .map(IterationLabel::Number)
                .collect()
        };

        if config.center_microphone {
            let label = if config.reference {
                IterationLabel::Reference
            } else {
                IterationLabel::Number(0)
            };
            for side in [channel::LEFT, channel::RIGHT] {
                steps.push(MeasurementStep::sweep(
                    StepKind::MeasureDistance,
                    side,
                    config,
                    label,
                ));
            }
            steps.push(MeasurementStep::utility(
                StepKind::CheckMicrophonePosition,
                position,
            ));
        }

        let channels = config.channels.ordered_channels();
        for iteration in iterations {
            for ch in &channels {
                steps.push(MeasurementStep::sweep(
                    StepKind::MeasureSweep,
                    ch,
                    config,
                    iteration,
                ));
            }
        }

        Self { steps }
    }

    /// Wrap into a [`SharedSchedule`].
    pub fn shared(self) -> SharedSchedule {
        Arc::new(Mutex::new(self))
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether there are no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The step at `index`.
    pub fn get(&self, index: usize) -> Option<&MeasurementStep> {
        self.steps.get(index)
    }

    /// Steps in order.
    pub fn iter(&self) -> std::slice::Iter<'_, MeasurementStep> {
        self.steps.iter()
    }

    /// Set one step's status. Out of range indices are ignored.
    pub fn set_status(&mut self, index: usize, status: StepStatus) {
        if let Some(step) = self.steps.get_mut(index) {
            step.status = status;
        }
    }

    /// Put every step back to [`StepStatus::NotStarted`].
    pub fn reset_status(&mut self) {
        for step in &mut self.steps {
            step.status = StepStatus::NotStarted;
        }
    }

    /// Status of the step at `index`.
    pub fn status(&self, index: usize) -> Option<StepStatus> {
        self.steps.get(index).map(|s| s.status)
    }

    /// Number of completed steps and the total.
    pub fn progress(&self) -> (usize, usize) {
        let done = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        (done, self.steps.len())
    }
}
