//! Hosting a measurement: the configuration, its schedule, and at most one
//! worker thread running the workflow over them.

use crate::{
    control::ExecutionControl,
    error::SweepError,
    observer::{ChannelObserver, WorkflowEvent},
    rew::MeasurementTool,
    schedule::{lock, Schedule, SharedSchedule},
    settings::MeasurementConfig,
    workflow::{SweepDriver, WorkflowController, WorkflowState},
};
use log::{error, info};
use std::{
    sync::{mpsc::Sender, Arc},
    thread::{self, JoinHandle},
};

/// What [`MeasurementSession::start`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAction {
    /// A new run was spawned.
    Started,
    /// A run was already active, it was resumed instead.
    Resumed,
}

type Worker<T, S> = JoinHandle<(WorkflowController<T, S>, WorkflowState)>;

/// Owns everything a run needs and enforces the single-active-run rule.
///
/// The controller lives here between runs and moves onto the worker thread
/// for the duration of one.
pub struct MeasurementSession<T, S, E = WorkflowEvent> {
    config: MeasurementConfig,
    schedule: SharedSchedule,
    control: Arc<ExecutionControl>,
    controller: Option<WorkflowController<T, S>>,
    worker: Option<Worker<T, S>>,
    events: Sender<E>,
    last: WorkflowState,
}

impl<T, S, E> MeasurementSession<T, S, E>
where
    T: MeasurementTool + Send + 'static,
    S: SweepDriver + Send + 'static,
    E: From<WorkflowEvent> + Send + 'static,
{
    /// An idle session. Workflow events go to `events`.
    pub fn new(
        controller: WorkflowController<T, S>,
        config: MeasurementConfig,
        events: Sender<E>,
    ) -> Self {
        let schedule = Schedule::regenerate(&config).shared();
        Self {
            config,
            schedule,
            control: Arc::new(ExecutionControl::new()),
            controller: Some(controller),
            worker: None,
            events,
            last: WorkflowState::Idle,
        }
    }

    /// Send events of future runs to `events` instead.
    pub fn set_events(&mut self, events: Sender<E>) {
        self.events = events;
    }

    /// The configuration the next run uses.
    pub fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    /// The schedule, shared with any running worker.
    pub fn schedule(&self) -> SharedSchedule {
        Arc::clone(&self.schedule)
    }

    /// The pause and stop control of the current run.
    pub fn control(&self) -> Arc<ExecutionControl> {
        Arc::clone(&self.control)
    }

    /// The controller, while no run holds it.
    pub fn controller(&self) -> Option<&WorkflowController<T, S>> {
        self.controller.as_ref()
    }

    /// Current state. Reaps a finished worker first.
    pub fn state(&mut self) -> WorkflowState {
        self.poll();
        if self.worker.is_some() {
            if self.control.is_paused() || self.control.is_held() {
                WorkflowState::Paused
            } else {
                WorkflowState::Running
            }
        } else {
            self.last
        }
    }

    /// Whether a worker is running, paused or not.
    pub fn is_running(&mut self) -> bool {
        self.state().is_active()
    }

    /// Start a run from the first step, or resume the active one.
    pub fn start(&mut self) -> Result<StartAction, SweepError> {
        self.poll();
        if self.worker.is_some() {
            info!("Measurement already running, resuming");
            self.control.resume();
            return Ok(StartAction::Resumed);
        }

        let mut controller = self
            .controller
            .take()
            .ok_or_else(|| SweepError::Session("the measurement controller was lost".to_owned()))?;
        *lock(&self.schedule) = Schedule::regenerate(&self.config);
        self.control.reset();

        let schedule = Arc::clone(&self.schedule);
        let control = Arc::clone(&self.control);
        let observer = ChannelObserver::new(self.events.clone(), Arc::clone(&self.control));
        let events = self.events.clone();
        let worker = thread::Builder::new()
            .name("measurement".to_owned())
            .spawn(move || {
                let state = controller.run(&schedule, &observer, &control);
                info!("Measurement finished: {state}");
                let _ = events.send(E::from(WorkflowEvent::Finished(state)));
                (controller, state)
            })?;

        self.worker = Some(worker);
        self.last = WorkflowState::Running;
        Ok(StartAction::Started)
    }

    /// Hold the run at its next checkpoint. Returns whether a run was paused.
    pub fn pause(&mut self) -> bool {
        if self.is_running() {
            self.control.pause();
            true
        } else {
            false
        }
    }

    /// Let a paused run carry on.
    pub fn resume(&mut self) -> bool {
        if self.is_running() {
            self.control.resume();
            true
        } else {
            false
        }
    }

    /// Ask the run to stop. Does not wait, see [`MeasurementSession::wait`].
    pub fn stop(&mut self) -> bool {
        if self.is_running() {
            info!("Stopping the measurement");
            self.control.stop();
            true
        } else {
            false
        }
    }

    /// Reap the worker if it has returned, yielding its final state.
    pub fn poll(&mut self) -> Option<WorkflowState> {
        if self.worker.as_ref().is_some_and(|w| w.is_finished()) {
            self.join()
        } else {
            None
        }
    }

    /// Block until the worker returns, if there is one.
    pub fn wait(&mut self) -> Option<WorkflowState> {
        self.join()
    }

    fn join(&mut self) -> Option<WorkflowState> {
        let worker = self.worker.take()?;
        let state = match worker.join() {
            Ok((controller, state)) => {
                self.controller = Some(controller);
                state
            }
            Err(_) => {
                error!("The measurement thread panicked");
                WorkflowState::Failed
            }
        };
        if state == WorkflowState::Cancelled {
            *lock(&self.schedule) = Schedule::regenerate(&self.config);
        }
        self.control.reset();
        self.last = state;
        Some(state)
    }

    /// Replace the configuration and regenerate the schedule. Refused while a
    /// run is active.
    pub fn configure(&mut self, config: MeasurementConfig) -> Result<(), SweepError> {
        if self.is_running() {
            return Err(SweepError::Session(
                "the configuration cannot change during a measurement".to_owned(),
            ));
        }
        *lock(&self.schedule) = Schedule::regenerate(&config);
        self.config = config;
        self.last = WorkflowState::Idle;
        Ok(())
    }
}

impl<T, S, E> Drop for MeasurementSession<T, S, E> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.control.stop();
        }
    }
}
