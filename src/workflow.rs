//! The measurement workflow: walks the schedule step by step, retries failed
//! sweeps, and loops back when the microphone is off centre.
//!
//! [`WorkflowController::run`] is meant to be called on a worker thread of
//! its own. It blocks for the whole run and only talks to the outside world
//! through the [`Observer`] and the [`ExecutionControl`] it is handed.

use crate::{
    channel,
    control::{ExecutionControl, Stopped},
    observer::Observer,
    rew::MeasurementTool,
    schedule::{lock, MeasurementStep, SharedSchedule, StepKind, StepStatus},
};
use log::{debug, info, warn};
use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

/// Lifecycle of a measurement run, as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowState {
    /// No run yet, or the last one was reset.
    Idle,
    /// A run is in progress.
    Running,
    /// Running, but held at the pause gate.
    Paused,
    /// Every step finished.
    Completed,
    /// Stopped by the user.
    Cancelled,
    /// A step ran out of retries.
    Failed,
}

impl WorkflowState {
    /// Whether a run is in flight.
    pub fn is_active(self) -> bool {
        matches!(self, WorkflowState::Running | WorkflowState::Paused)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowState::Idle => "Idle",
            WorkflowState::Running => "Running",
            WorkflowState::Paused => "Paused",
            WorkflowState::Completed => "Completed",
            WorkflowState::Cancelled => "Cancelled",
            WorkflowState::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Tunables of the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Sweeps per step before the step counts as failed.
    pub max_attempts: u32,
    /// Failed dispatches of one step before the run gives up. `None` retries
    /// forever.
    pub max_step_retries: Option<u32>,
    /// Left/right offsets below this many centimetres count as centred.
    pub tolerance_cm: i64,
    /// Metres per second.
    pub speed_of_sound: f64,
    /// Delay between checks while waiting for REW.
    pub recheck_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_step_retries: None,
            tolerance_cm: 4,
            speed_of_sound: 343.0,
            recheck_delay: Duration::from_secs(1),
        }
    }
}

/// What actually performs a sweep on screen.
pub trait SweepDriver {
    /// Block until REW's main measurement control can be found.
    fn wait_for_primary_control(
        &mut self,
        observer: &dyn Observer,
        control: &ExecutionControl,
    ) -> Result<(), Stopped>;

    /// Run one sweep for `step`, including playing its stimulus.
    fn drive_sweep(
        &mut self,
        step: &MeasurementStep,
        observer: &dyn Observer,
        control: &ExecutionControl,
    ) -> Result<(), Stopped>;
}

impl<S: SweepDriver + ?Sized> SweepDriver for Box<S> {
    fn wait_for_primary_control(
        &mut self,
        observer: &dyn Observer,
        control: &ExecutionControl,
    ) -> Result<(), Stopped> {
        (**self).wait_for_primary_control(observer, control)
    }

    fn drive_sweep(
        &mut self,
        step: &MeasurementStep,
        observer: &dyn Observer,
        control: &ExecutionControl,
    ) -> Result<(), Stopped> {
        (**self).drive_sweep(step, observer, control)
    }
}

/// What happened to a dispatched step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Completed,
    Retry,
    /// Go back this many steps.
    Rewind(usize),
}

/// Lateral microphone offset in centimetres from the impulse peak times of
/// the left and right mains. Positive means the microphone is closer to the
/// right speaker and has to move left.
pub fn centering_offset_cm(left_peak: f64, right_peak: f64, speed_of_sound: f64) -> i64 {
    ((left_peak - right_peak) * speed_of_sound * 100.0).round() as i64
}

/// What to tell the user after a centering check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicAdvice {
    /// Within tolerance.
    Centered {
        /// Signed distance from the centre.
        offset_cm: i64,
        /// Largest offset still accepted.
        margin_cm: i64,
    },
    /// Move this many centimetres toward the left speaker.
    TowardLeft(i64),
    /// Move this many centimetres toward the right speaker.
    TowardRight(i64),
}

impl MicAdvice {
    /// Advice for a signed offset, see [`centering_offset_cm`].
    pub fn new(offset_cm: i64, tolerance_cm: i64) -> Self {
        if offset_cm.abs() < tolerance_cm {
            MicAdvice::Centered {
                offset_cm: offset_cm.abs(),
                margin_cm: (tolerance_cm - 1).max(0),
            }
        } else if offset_cm < 0 {
            MicAdvice::TowardRight(offset_cm.abs())
        } else {
            MicAdvice::TowardLeft(offset_cm)
        }
    }

    /// Whether the microphone is close enough to the centre.
    pub fn is_centered(&self) -> bool {
        matches!(self, MicAdvice::Centered { .. })
    }
}

impl fmt::Display for MicAdvice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (cm, side) = match *self {
            MicAdvice::Centered {
                offset_cm,
                margin_cm,
            } => {
                return write!(
                    f,
                    "The microphone is positioned correctly within the error margin of \
                     {margin_cm} cm. (Distance from center: {offset_cm} cm)"
                )
            }
            MicAdvice::TowardLeft(cm) => (cm, "left"),
            MicAdvice::TowardRight(cm) => (cm, "right"),
        };
        write!(
            f,
            "Move the microphone {cm} cm ({:.2} in) to the {side} speaker",
            cm as f64 / 2.54
        )
    }
}

/// Runs a schedule against REW.
#[derive(Debug)]
pub struct WorkflowController<T, S> {
    tool: T,
    driver: S,
    config: ControllerConfig,
    /// Latest good distance measurement per main channel.
    distance_ids: HashMap<String, String>,
}

impl<T: MeasurementTool, S: SweepDriver> WorkflowController<T, S> {
    /// A controller over `tool` and `driver`.
    pub fn new(tool: T, driver: S, config: ControllerConfig) -> Self {
        Self {
            tool,
            driver,
            config,
            distance_ids: HashMap::new(),
        }
    }

    /// The measurement tool.
    pub fn tool(&self) -> &T {
        &self.tool
    }

    /// The sweep driver.
    pub fn driver(&self) -> &S {
        &self.driver
    }

    /// Timing and retry limits.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Execute `schedule` from its first step.
    ///
    /// Returns [`WorkflowState::Cancelled`] as soon as a stop is seen, leaving
    /// the step in flight as it was. Otherwise runs until every step is done
    /// or, with a bounded outer retry, until a step fails for good.
    pub fn run(
        &mut self,
        schedule: &SharedSchedule,
        observer: &dyn Observer,
        control: &ExecutionControl,
    ) -> WorkflowState {
        let total = lock(schedule).len();
        let mut cursor = 0;
        let mut failures = 0;
        self.distance_ids.clear();
        info!("Starting a run of {total} steps");

        while cursor < total {
            if control.checkpoint().is_err() {
                break;
            }
            let Some(step) = lock(schedule).get(cursor).cloned() else {
                warn!("Schedule shrank under a running measurement");
                return WorkflowState::Failed;
            };

            observer.info(&format!("Step {}/{total}: {}", cursor + 1, step.label()));
            lock(schedule).set_status(cursor, StepStatus::InProgress);
            observer.update();

            let outcome = match self.dispatch(&step, observer, control) {
                Ok(outcome) => outcome,
                Err(Stopped) => break,
            };
            if control.is_stopped() {
                break;
            }

            match outcome {
                StepOutcome::Completed => {
                    lock(schedule).set_status(cursor, StepStatus::Completed);
                    observer.update();
                    cursor += 1;
                    failures = 0;
                }
                StepOutcome::Retry => {
                    failures += 1;
                    if self.config.max_step_retries.is_some_and(|max| failures > max) {
                        lock(schedule).set_status(cursor, StepStatus::Failed);
                        observer.update();
                        observer.info(&format!(
                            "Giving up on {} after {failures} failed tries",
                            step.label()
                        ));
                        return WorkflowState::Failed;
                    }
                    lock(schedule).set_status(cursor, StepStatus::Retrying);
                    observer.update();
                }
                StepOutcome::Rewind(back) => {
                    let target = cursor.saturating_sub(back);
                    {
                        let mut schedule = lock(schedule);
                        for index in target..cursor {
                            schedule.set_status(index, StepStatus::NotStarted);
                        }
                        schedule.set_status(cursor, StepStatus::Retrying);
                    }
                    observer.update();
                    cursor = target;
                    failures = 0;
                }
            }
        }

        if control.is_stopped() {
            info!("Run stopped at step {}", cursor + 1);
            return WorkflowState::Cancelled;
        }
        observer.complete();
        WorkflowState::Completed
    }

    fn dispatch(
        &mut self,
        step: &MeasurementStep,
        observer: &dyn Observer,
        control: &ExecutionControl,
    ) -> Result<StepOutcome, Stopped> {
        match step.description {
            StepKind::CheckSettings => {
                self.check_settings(observer, control)?;
                Ok(StepOutcome::Completed)
            }
            StepKind::MeasureDistance => {
                if !self.sweep_with_retry(step, observer, control)? {
                    return Ok(StepOutcome::Retry);
                }
                match (step.channel.as_deref(), self.tool.selected_measurement_id()) {
                    (Some(channel), Some(id)) => {
                        debug!("Distance measurement for {channel} is {id}");
                        self.distance_ids.insert(channel.to_owned(), id);
                    }
                    _ => warn!("No measurement id recorded for {}", step.label()),
                }
                Ok(StepOutcome::Completed)
            }
            StepKind::MeasureSweep => Ok(if self.sweep_with_retry(step, observer, control)? {
                StepOutcome::Completed
            } else {
                StepOutcome::Retry
            }),
            StepKind::CheckMicrophonePosition => self.check_microphone_position(observer, control),
        }
    }

    /// Wait for REW's API, then for its settings, then for its window.
    fn check_settings(
        &mut self,
        observer: &dyn Observer,
        control: &ExecutionControl,
    ) -> Result<(), Stopped> {
        while !self.tool.is_online() {
            observer.info("REW is not responding on its API port");
            observer.input("Start REW with its API server enabled, then continue.");
            control.checkpoint()?;
            control.sleep(self.config.recheck_delay)?;
        }

        loop {
            let errors = self.tool.check_configuration();
            if errors.is_empty() {
                break;
            }
            for error in &errors {
                observer.info(error);
            }
            observer.input("Fix the REW settings listed above, then continue.");
            control.checkpoint()?;
            control.sleep(self.config.recheck_delay)?;
        }

        self.driver.wait_for_primary_control(observer, control)?;
        observer.info("REW is ready");
        Ok(())
    }

    /// Sweep `step` up to `max_attempts` times until REW reports no new
    /// problem. Each bad measurement is deleted. Returns whether a clean
    /// sweep was made.
    pub fn sweep_with_retry(
        &mut self,
        step: &MeasurementStep,
        observer: &dyn Observer,
        control: &ExecutionControl,
    ) -> Result<bool, Stopped> {
        let label = step.label();
        let mut baseline: HashSet<String> = match self.tool.poll_problems() {
            Ok(problems) => problems.into_iter().map(|p| p.time).collect(),
            Err(e) => {
                warn!("Problem baseline failed: {e}");
                observer.info(&format!(
                    "Could not read REW's problem list, not sweeping {label}: {e}"
                ));
                control.sleep(self.config.recheck_delay)?;
                return Ok(false);
            }
        };

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_problem = String::new();
        for attempt in 1..=max_attempts {
            control.checkpoint()?;
            debug!("{label}: attempt {attempt} of {max_attempts}");
            let previous = self.tool.selected_measurement_id();
            self.driver.drive_sweep(step, observer, control)?;
            control.checkpoint()?;

            match self.tool.new_problems_since(&baseline) {
                Ok((new, _)) if new.is_empty() => {
                    observer.info("No new problems detected. Sweep successful.");
                    return Ok(true);
                }
                Ok((new, problems)) => {
                    let title = problems
                        .last()
                        .map(|p| p.title.clone())
                        .unwrap_or_else(|| "unknown problem".to_owned());
                    observer.info(&format!("New problem detected: {title}"));
                    baseline.extend(new);
                    last_problem = title;
                }
                Err(e) => {
                    // Unverified sweeps are not kept.
                    observer.info(&format!("Could not check the sweep for problems: {e}"));
                    last_problem = e.to_string();
                }
            }
            self.discard_new_measurement(previous.as_deref(), observer);

            if attempt < max_attempts {
                observer.info(&format!("Retrying sweep... Attempt {}", attempt + 1));
            }
        }

        observer.info("Max attempts reached. Exiting with problem.");
        observer.input(&format!(
            "{label} failed {max_attempts} times ({last_problem}). Fix the problem, then \
             continue to try again."
        ));
        control.checkpoint()?;
        Ok(false)
    }

    /// Delete the measurement the last sweep created. An aborted sweep
    /// creates none, then the selection is still `previous` and is kept.
    fn discard_new_measurement(&self, previous: Option<&str>, observer: &dyn Observer) {
        let Some(id) = self.tool.selected_measurement_id() else {
            warn!("No selected measurement to delete");
            return;
        };
        if previous == Some(id.as_str()) {
            info!("The sweep created no measurement, nothing to delete");
            return;
        }
        match self.tool.delete_measurement(&id) {
            Ok(()) => debug!("Deleted measurement {id}"),
            Err(e) => {
                warn!("Deleting measurement {id} failed: {e}");
                observer.info(&format!("Could not delete the bad measurement: {e}"));
            }
        }
    }

    fn peak(&self, channel: &str) -> Result<f64, String> {
        let id = self
            .distance_ids
            .get(channel)
            .ok_or_else(|| format!("there is no distance measurement for {channel}"))?;
        let summary = self
            .tool
            .measurement_summary(id)
            .map_err(|e| e.to_string())?;
        summary
            .time_of_ir_peak_seconds
            .ok_or_else(|| format!("REW reported no impulse peak for {channel}"))
    }

    fn check_microphone_position(
        &mut self,
        observer: &dyn Observer,
        control: &ExecutionControl,
    ) -> Result<StepOutcome, Stopped> {
        let peaks = self
            .peak(channel::LEFT)
            .and_then(|left| Ok((left, self.peak(channel::RIGHT)?)));
        let (left, right) = match peaks {
            Ok(peaks) => peaks,
            Err(reason) => {
                observer.info(&format!("Cannot check the microphone position: {reason}"));
                observer.input("The distance measurements will be repeated. Continue when ready.");
                control.checkpoint()?;
                return Ok(StepOutcome::Rewind(2));
            }
        };

        let offset = centering_offset_cm(left, right, self.config.speed_of_sound);
        debug!("Peaks L {left:.6} s, R {right:.6} s, offset {offset} cm");
        let advice = MicAdvice::new(offset, self.config.tolerance_cm);
        observer.info(&advice.to_string());
        if advice.is_centered() {
            return Ok(StepOutcome::Completed);
        }

        observer.input(&format!("{advice}, then continue."));
        control.checkpoint()?;
        Ok(StepOutcome::Rewind(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::ChannelMapping,
        rew::{DummyRew, MeasurementSummary, ProblemRecord, RewError},
        schedule::{IterationLabel, Schedule},
        settings::MeasurementConfig,
    };
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
        thread,
    };

    /// Sweeps straight into a [`DummyRew`], with scripted problems and peaks.
    #[derive(Clone)]
    struct StubDriver {
        rew: DummyRew,
        sweeps: Arc<Mutex<Vec<String>>>,
        failing_sweeps: u32,
        aborted_sweeps: u32,
        stop_on_sweep: Option<usize>,
        peaks: HashMap<String, VecDeque<f64>>,
    }

    impl StubDriver {
        fn new(rew: &DummyRew) -> Self {
            Self {
                rew: rew.clone(),
                sweeps: Arc::default(),
                failing_sweeps: 0,
                aborted_sweeps: 0,
                stop_on_sweep: None,
                peaks: HashMap::new(),
            }
        }

        fn sweeps(&self) -> Vec<String> {
            self.sweeps.lock().unwrap().clone()
        }
    }

    impl SweepDriver for StubDriver {
        fn wait_for_primary_control(
            &mut self,
            _: &dyn Observer,
            control: &ExecutionControl,
        ) -> Result<(), Stopped> {
            control.checkpoint()
        }

        fn drive_sweep(
            &mut self,
            step: &MeasurementStep,
            _: &dyn Observer,
            control: &ExecutionControl,
        ) -> Result<(), Stopped> {
            let count = {
                let mut sweeps = self.sweeps.lock().unwrap();
                sweeps.push(step.measurement_name());
                sweeps.len()
            };
            if self.stop_on_sweep == Some(count) {
                control.stop();
                return control.checkpoint();
            }
            if self.aborted_sweeps > 0 {
                // Clipping aborts the sweep before REW stores anything.
                self.aborted_sweeps -= 1;
                self.rew.raise_problem("Heavy input clipping");
                return Ok(());
            }
            let id = self.rew.record_sweep(&step.measurement_name());
            let channel = step.channel.clone().unwrap_or_default();
            if let Some(peak) = self.peaks.get_mut(&channel).and_then(VecDeque::pop_front) {
                self.rew.set_peak(&id, peak);
            }
            if self.failing_sweeps > 0 {
                self.failing_sweeps -= 1;
                self.rew.raise_problem("Heavy input clipping");
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        infos: Mutex<Vec<String>>,
        inputs: Mutex<Vec<String>>,
        updates: Mutex<usize>,
        completes: Mutex<usize>,
    }

    impl Recorder {
        fn infos(&self) -> Vec<String> {
            self.infos.lock().unwrap().clone()
        }
        fn inputs(&self) -> Vec<String> {
            self.inputs.lock().unwrap().clone()
        }
        fn completes(&self) -> usize {
            *self.completes.lock().unwrap()
        }
    }

    impl Observer for Recorder {
        fn info(&self, message: &str) {
            self.infos.lock().unwrap().push(message.to_owned());
        }
        fn update(&self) {
            *self.updates.lock().unwrap() += 1;
        }
        fn input(&self, message: &str) {
            self.inputs.lock().unwrap().push(message.to_owned());
        }
        fn complete(&self) {
            *self.completes.lock().unwrap() += 1;
        }
    }

    fn quick() -> ControllerConfig {
        ControllerConfig {
            recheck_delay: Duration::from_millis(1),
            ..ControllerConfig::default()
        }
    }

    fn schedule(channels: &[&str], center: bool) -> SharedSchedule {
        Schedule::regenerate(&MeasurementConfig {
            channels: ChannelMapping::identity(channels.iter().copied()),
            iterations: 1,
            reference: false,
            center_microphone: center,
            position: "1".to_owned(),
        })
        .shared()
    }

    fn sweep_step() -> MeasurementStep {
        lock(&schedule(&["FL"], false)).get(1).unwrap().clone()
    }

    fn statuses(schedule: &SharedSchedule) -> Vec<StepStatus> {
        lock(schedule).iter().map(|s| s.status).collect()
    }

    #[test]
    fn retry_exhausts_max_attempts() {
        let rew = DummyRew::builder().problem_rate(1.0).build();
        let driver = StubDriver::new(&rew);
        let mut controller = WorkflowController::new(rew.clone(), driver.clone(), quick());
        let observer = Recorder::default();
        let control = ExecutionControl::new();

        let ok = controller
            .sweep_with_retry(&sweep_step(), &observer, &control)
            .unwrap();
        assert!(!ok);
        assert_eq!(driver.sweeps().len(), 3);
        assert_eq!(rew.deleted().len(), 3);
        assert!(rew.measurement_ids().unwrap().is_empty());
        assert_eq!(observer.inputs().len(), 1);
        assert!(observer
            .infos()
            .contains(&"Max attempts reached. Exiting with problem.".to_owned()));
    }

    #[test]
    fn clean_sweep_succeeds_first_time() {
        let rew = DummyRew::default();
        let driver = StubDriver::new(&rew);
        let mut controller = WorkflowController::new(rew.clone(), driver.clone(), quick());
        let control = ExecutionControl::new();

        let ok = controller
            .sweep_with_retry(&sweep_step(), &Recorder::default(), &control)
            .unwrap();
        assert!(ok);
        assert_eq!(driver.sweeps().len(), 1);
        assert!(rew.deleted().is_empty());
    }

    #[test]
    fn old_problems_are_not_new() {
        let rew = DummyRew::default();
        rew.raise_problem("Left over from last session");
        let driver = StubDriver::new(&rew);
        let mut controller = WorkflowController::new(rew, driver.clone(), quick());
        let ok = controller
            .sweep_with_retry(&sweep_step(), &Recorder::default(), &ExecutionControl::new())
            .unwrap();
        assert!(ok);
        assert_eq!(driver.sweeps().len(), 1);
    }

    #[test]
    fn recovers_on_a_later_attempt() {
        let rew = DummyRew::default();
        let mut driver = StubDriver::new(&rew);
        driver.failing_sweeps = 2;
        let mut controller = WorkflowController::new(rew.clone(), driver.clone(), quick());
        let ok = controller
            .sweep_with_retry(&sweep_step(), &Recorder::default(), &ExecutionControl::new())
            .unwrap();
        assert!(ok);
        assert_eq!(controller.driver().sweeps().len(), 3);
        assert_eq!(rew.deleted().len(), 2);
        assert_eq!(rew.measurement_ids().unwrap().len(), 1);
    }

    #[test]
    fn aborted_sweep_keeps_the_previous_measurement() {
        let rew = DummyRew::default();
        let good = rew.record_sweep("C (Pos: 1 - Iter: 1)");
        let mut driver = StubDriver::new(&rew);
        driver.aborted_sweeps = 1;
        let mut controller = WorkflowController::new(rew.clone(), driver.clone(), quick());

        let ok = controller
            .sweep_with_retry(&sweep_step(), &Recorder::default(), &ExecutionControl::new())
            .unwrap();
        assert!(ok);
        assert_eq!(controller.driver().sweeps().len(), 2);
        assert!(rew.deleted().is_empty());
        let ids = rew.measurement_ids().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&good));
    }

    #[test]
    fn unreadable_baseline_skips_the_sweep() {
        let rew = DummyRew::builder().failing_polls(1).build();
        let driver = StubDriver::new(&rew);
        let mut controller = WorkflowController::new(rew, driver.clone(), quick());
        let ok = controller
            .sweep_with_retry(&sweep_step(), &Recorder::default(), &ExecutionControl::new())
            .unwrap();
        assert!(!ok);
        assert!(driver.sweeps().is_empty());
    }

    /// Answers every problem poll but the second.
    struct FailSecondPoll {
        rew: DummyRew,
        polls: Mutex<u32>,
    }

    impl MeasurementTool for FailSecondPoll {
        fn is_online(&self) -> bool {
            true
        }
        fn check_configuration(&self) -> Vec<String> {
            Vec::new()
        }
        fn poll_problems(&self) -> Result<Vec<ProblemRecord>, RewError> {
            let mut polls = self.polls.lock().unwrap();
            *polls += 1;
            if *polls == 2 {
                Err(RewError::Unavailable("problem list".to_owned()))
            } else {
                self.rew.poll_problems()
            }
        }
        fn selected_measurement_id(&self) -> Option<String> {
            self.rew.selected_measurement_id()
        }
        fn delete_measurement(&self, id: &str) -> Result<(), RewError> {
            self.rew.delete_measurement(id)
        }
        fn measurement_summary(&self, id: &str) -> Result<MeasurementSummary, RewError> {
            self.rew.measurement_summary(id)
        }
        fn measurement_ids(&self) -> Result<Vec<String>, RewError> {
            self.rew.measurement_ids()
        }
    }

    #[test]
    fn unverified_sweep_is_discarded() {
        let rew = DummyRew::default();
        let tool = FailSecondPoll {
            rew: rew.clone(),
            polls: Mutex::new(0),
        };
        let driver = StubDriver::new(&rew);
        let mut controller = WorkflowController::new(tool, driver.clone(), quick());
        let observer = Recorder::default();

        let ok = controller
            .sweep_with_retry(&sweep_step(), &observer, &ExecutionControl::new())
            .unwrap();
        assert!(ok);
        assert_eq!(driver.sweeps().len(), 2);
        assert_eq!(rew.deleted().len(), 1);
        assert_eq!(rew.measurement_ids().unwrap().len(), 1);
        assert!(observer
            .infos()
            .iter()
            .any(|m| m.starts_with("Could not check the sweep")));
    }

    #[test]
    fn offset_formula() {
        assert_eq!(centering_offset_cm(0.010, 0.010, 343.0), 0);
        assert_eq!(centering_offset_cm(0.012, 0.010, 343.0), 69);
        assert_eq!(centering_offset_cm(0.010, 0.012, 343.0), -69);
    }

    #[test]
    fn advice_messages() {
        let centered = MicAdvice::new(0, 4);
        assert!(centered.is_centered());
        assert_eq!(
            centered.to_string(),
            "The microphone is positioned correctly within the error margin of 3 cm. \
             (Distance from center: 0 cm)"
        );
        assert!(MicAdvice::new(-3, 4).is_centered());

        let left = MicAdvice::new(69, 4);
        assert_eq!(left, MicAdvice::TowardLeft(69));
        assert_eq!(
            left.to_string(),
            "Move the microphone 69 cm (27.17 in) to the left speaker"
        );
        assert_eq!(MicAdvice::new(-4, 4), MicAdvice::TowardRight(4));
    }

    #[test]
    fn full_run_completes() {
        let rew = DummyRew::default();
        let driver = StubDriver::new(&rew);
        let mut controller = WorkflowController::new(rew, driver.clone(), quick());
        let schedule = schedule(&["C", "FL"], true);
        let observer = Recorder::default();

        let state = controller.run(&schedule, &observer, &ExecutionControl::new());
        assert_eq!(state, WorkflowState::Completed);
        assert!(statuses(&schedule).iter().all(|s| *s == StepStatus::Completed));
        assert_eq!(observer.completes(), 1);
        assert_eq!(
            driver.sweeps(),
            vec![
                "FL (Pos: 1 - Iter: 0)",
                "FR (Pos: 1 - Iter: 0)",
                "C (Pos: 1 - Iter: 1)",
                "FL (Pos: 1 - Iter: 1)",
            ]
        );
        assert!(observer.inputs().is_empty());
    }

    #[test]
    fn off_centre_microphone_rewinds_distance_steps() {
        let rew = DummyRew::default();
        let mut driver = StubDriver::new(&rew);
        driver
            .peaks
            .insert("FL".to_owned(), VecDeque::from([0.012, 0.010]));
        let mut controller = WorkflowController::new(rew, driver.clone(), quick());
        let schedule = schedule(&["C"], true);
        let observer = Recorder::default();

        let state = controller.run(&schedule, &observer, &ExecutionControl::new());
        assert_eq!(state, WorkflowState::Completed);
        assert_eq!(
            driver.sweeps(),
            vec![
                "FL (Pos: 1 - Iter: 0)",
                "FR (Pos: 1 - Iter: 0)",
                "FL (Pos: 1 - Iter: 0)",
                "FR (Pos: 1 - Iter: 0)",
                "C (Pos: 1 - Iter: 1)",
            ]
        );
        let inputs = observer.inputs();
        assert_eq!(inputs.len(), 1);
        assert!(inputs[0].starts_with("Move the microphone 69 cm"));
        assert!(inputs[0].contains("to the left speaker"));
    }

    #[test]
    fn failed_step_is_retried_in_place() {
        let rew = DummyRew::default();
        let mut driver = StubDriver::new(&rew);
        driver.failing_sweeps = 3;
        let mut controller = WorkflowController::new(rew, driver.clone(), quick());
        let schedule = schedule(&["FL", "FR"], false);
        let observer = Recorder::default();

        let state = controller.run(&schedule, &observer, &ExecutionControl::new());
        assert_eq!(state, WorkflowState::Completed);
        let sweeps = driver.sweeps();
        assert_eq!(sweeps.len(), 5);
        assert!(sweeps[..4].iter().all(|s| s.starts_with("FL ")));
        assert_eq!(sweeps[4], "FR (Pos: 1 - Iter: 1)");
        assert_eq!(observer.inputs().len(), 1);
    }

    #[test]
    fn bounded_outer_retry_fails_the_run() {
        let rew = DummyRew::default();
        let mut driver = StubDriver::new(&rew);
        driver.failing_sweeps = u32::MAX;
        let config = ControllerConfig {
            max_attempts: 1,
            max_step_retries: Some(1),
            ..quick()
        };
        let mut controller = WorkflowController::new(rew, driver.clone(), config);
        let schedule = schedule(&["FL", "FR"], false);
        let observer = Recorder::default();

        let state = controller.run(&schedule, &observer, &ExecutionControl::new());
        assert_eq!(state, WorkflowState::Failed);
        assert_eq!(driver.sweeps().len(), 2);
        assert_eq!(
            statuses(&schedule),
            vec![StepStatus::Completed, StepStatus::Failed, StepStatus::NotStarted]
        );
        assert_eq!(observer.completes(), 0);
    }

    #[test]
    fn stop_leaves_the_step_as_it_was() {
        let rew = DummyRew::default();
        let mut driver = StubDriver::new(&rew);
        driver.stop_on_sweep = Some(2);
        let mut controller = WorkflowController::new(rew, driver.clone(), quick());
        let schedule = schedule(&["C", "FL", "FR"], false);
        let observer = Recorder::default();
        let control = ExecutionControl::new();

        let state = controller.run(&schedule, &observer, &control);
        assert_eq!(state, WorkflowState::Cancelled);
        assert_eq!(
            statuses(&schedule),
            vec![
                StepStatus::Completed,
                StepStatus::Completed,
                StepStatus::InProgress,
                StepStatus::NotStarted,
            ]
        );
        assert_eq!(observer.completes(), 0);
        assert_eq!(driver.sweeps().len(), 2);
    }

    #[test]
    fn pause_holds_progress_until_resumed() {
        let rew = DummyRew::default();
        let driver = StubDriver::new(&rew);
        let sweeps = Arc::clone(&driver.sweeps);
        let schedule = schedule(&["C", "FL"], false);
        let control = Arc::new(ExecutionControl::new());
        control.pause();

        let th_schedule = Arc::clone(&schedule);
        let th_control = Arc::clone(&control);
        let worker = thread::spawn(move || {
            let mut controller = WorkflowController::new(rew, driver, quick());
            controller.run(&th_schedule, &Recorder::default(), &th_control)
        });

        thread::sleep(Duration::from_millis(100));
        assert!(sweeps.lock().unwrap().is_empty());
        assert!(statuses(&schedule)
            .iter()
            .all(|s| *s == StepStatus::NotStarted));

        control.resume();
        assert_eq!(worker.join().unwrap(), WorkflowState::Completed);
        assert_eq!(sweeps.lock().unwrap().len(), 2);
    }

    #[test]
    fn settings_check_waits_for_rew() {
        let rew = DummyRew::builder()
            .offline_checks(2)
            .misconfigured_checks(1)
            .build();
        let driver = StubDriver::new(&rew);
        let mut controller = WorkflowController::new(rew, driver, quick());
        let schedule = schedule(&[], false);
        let observer = Recorder::default();

        let state = controller.run(&schedule, &observer, &ExecutionControl::new());
        assert_eq!(state, WorkflowState::Completed);
        assert_eq!(observer.inputs().len(), 3);
        assert!(observer
            .infos()
            .iter()
            .any(|m| m.starts_with("Playback mode in Measure")));
    }

    #[test]
    fn distance_steps_are_labelled_zero() {
        let schedule = schedule(&["C"], true);
        let step = lock(&schedule).get(1).unwrap().clone();
        assert_eq!(step.iteration, IterationLabel::Number(0));
    }
}
