use crate::{
    channel::CANONICAL_ORDER,
    observer::WorkflowEvent,
    rew::MeasurementTool,
    schedule::{lock, MeasurementStep},
    session::{MeasurementSession, StartAction},
    settings::{save_settings, MeasurementConfig},
    workflow::{SweepDriver, WorkflowState},
};
use crossterm::event::KeyCode;
use log::warn;
use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::mpsc::Sender,
};

const LOG_LINES: usize = 500;

/// A prompt from the running measurement, waiting for Enter.
pub struct Prompt {
    pub message: String,
    ack: Sender<()>,
}

impl Prompt {
    #[cfg(test)]
    pub fn new(message: &str, ack: Sender<()>) -> Self {
        Self {
            message: message.to_owned(),
            ack,
        }
    }
}

/// Which screen has the keyboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Dashboard,
    Configure,
    /// Typing a new position name, holding what has been typed.
    EditPosition(String),
}

/// Everything the dashboard shows, refreshed from the session every tick.
pub struct App {
    pub mode: Mode,
    pub log: VecDeque<String>,
    pub prompt: Option<Prompt>,
    pub state: WorkflowState,
    pub steps: Vec<MeasurementStep>,
    /// The configuration being edited in [`Mode::Configure`].
    pub draft: MeasurementConfig,
    /// Index into [`CANONICAL_ORDER`].
    pub cursor: usize,
    pub quit: bool,
    settings_path: PathBuf,
}

impl App {
    pub fn new(settings_path: impl Into<PathBuf>) -> Self {
        Self {
            mode: Mode::Dashboard,
            log: VecDeque::new(),
            prompt: None,
            state: WorkflowState::Idle,
            steps: vec![],
            draft: MeasurementConfig::default(),
            cursor: 0,
            quit: false,
            settings_path: settings_path.into(),
        }
    }

    pub fn push_log(&mut self, line: impl Into<String>) {
        if self.log.len() == LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back(line.into());
    }

    /// Completed steps and the total.
    pub fn progress(&self) -> (usize, usize) {
        let done = self
            .steps
            .iter()
            .filter(|s| s.status == crate::schedule::StepStatus::Completed)
            .count();
        (done, self.steps.len())
    }

    pub fn refresh<T, S>(&mut self, session: &mut MeasurementSession<T, S>)
    where
        T: MeasurementTool + Send + 'static,
        S: SweepDriver + Send + 'static,
    {
        self.state = session.state();
        self.steps = lock(&session.schedule()).iter().cloned().collect();
    }

    pub fn on_workflow<T, S>(&mut self, event: WorkflowEvent, session: &mut MeasurementSession<T, S>)
    where
        T: MeasurementTool + Send + 'static,
        S: SweepDriver + Send + 'static,
    {
        match event {
            WorkflowEvent::Info(message) => self.push_log(message),
            WorkflowEvent::Update => {}
            WorkflowEvent::Input { message, ack } => {
                self.push_log(format!(">> {message}"));
                self.prompt = Some(Prompt { message, ack });
            }
            WorkflowEvent::Complete => self.push_log("All measurements completed"),
            WorkflowEvent::Finished(state) => {
                self.prompt = None;
                session.wait();
                self.push_log(format!("Measurement {state}"));
            }
        }
    }

    pub fn on_key<T, S>(&mut self, key: KeyCode, session: &mut MeasurementSession<T, S>)
    where
        T: MeasurementTool + Send + 'static,
        S: SweepDriver + Send + 'static,
    {
        if self.prompt.is_some() {
            self.on_prompt_key(key, session);
            return;
        }
        match self.mode.clone() {
            Mode::Dashboard => self.on_dashboard_key(key, session),
            Mode::Configure => self.on_configure_key(key, session),
            Mode::EditPosition(text) => self.on_position_key(key, text),
        }
    }

    fn on_prompt_key<T, S>(&mut self, key: KeyCode, session: &mut MeasurementSession<T, S>)
    where
        T: MeasurementTool + Send + 'static,
        S: SweepDriver + Send + 'static,
    {
        match key {
            KeyCode::Enter => {
                if let Some(prompt) = self.prompt.take() {
                    let _ = prompt.ack.send(());
                }
            }
            KeyCode::Char('x') => self.stop(session),
            KeyCode::Char('q') => {
                self.stop(session);
                self.quit = true;
            }
            _ => {}
        }
    }

    fn stop<T, S>(&mut self, session: &mut MeasurementSession<T, S>)
    where
        T: MeasurementTool + Send + 'static,
        S: SweepDriver + Send + 'static,
    {
        if session.stop() {
            self.push_log("Stopping");
        }
        // An unanswered prompt would keep the run waiting.
        self.prompt = None;
    }

    fn on_dashboard_key<T, S>(&mut self, key: KeyCode, session: &mut MeasurementSession<T, S>)
    where
        T: MeasurementTool + Send + 'static,
        S: SweepDriver + Send + 'static,
    {
        match key {
            KeyCode::Char('s') => match session.start() {
                Ok(StartAction::Started) => self.push_log("Measurement started"),
                Ok(StartAction::Resumed) => self.push_log("Measurement resumed"),
                Err(e) => self.push_log(format!("Could not start: {e}")),
            },
            KeyCode::Char('p') => {
                if session.pause() {
                    self.push_log("Pausing at the next checkpoint");
                }
            }
            KeyCode::Char('x') => self.stop(session),
            KeyCode::Char('c') => {
                if session.is_running() {
                    self.push_log("Stop the measurement before changing the configuration");
                } else {
                    self.draft = session.config().clone();
                    self.mode = Mode::Configure;
                }
            }
            KeyCode::Char('q') => {
                self.stop(session);
                self.quit = true;
            }
            _ => {}
        }
    }

    fn on_configure_key<T, S>(&mut self, key: KeyCode, session: &mut MeasurementSession<T, S>)
    where
        T: MeasurementTool + Send + 'static,
        S: SweepDriver + Send + 'static,
    {
        let n = CANONICAL_ORDER.len();
        match key {
            KeyCode::Down => self.cursor = (self.cursor + 1) % n,
            KeyCode::Up => self.cursor = (self.cursor + n - 1) % n,
            KeyCode::Char(' ') => {
                let channel = CANONICAL_ORDER[self.cursor];
                if self.draft.channels.is_selected(channel) {
                    self.draft.channels.deselect(channel);
                } else {
                    self.draft.channels.select(channel);
                }
            }
            KeyCode::Char('r') => self.draft.reference = !self.draft.reference,
            KeyCode::Char('m') => self.draft.center_microphone = !self.draft.center_microphone,
            KeyCode::Char('+') => self.draft.iterations = self.draft.iterations.saturating_add(1),
            KeyCode::Char('-') => self.draft.iterations = self.draft.iterations.saturating_sub(1).max(1),
            KeyCode::Char('n') => self.mode = Mode::EditPosition(self.draft.position.clone()),
            KeyCode::Char('w') => match save_settings(&self.settings_path, &self.draft.channels) {
                Ok(()) => self.push_log(format!("Settings saved to {}", self.settings_path.display())),
                Err(e) => {
                    warn!("Could not save settings: {e}");
                    self.push_log(format!("Could not save settings: {e}"));
                }
            },
            KeyCode::Enter => {
                match session.configure(self.draft.clone()) {
                    Ok(()) => self.push_log("Configuration applied"),
                    Err(e) => self.push_log(format!("Refused: {e}")),
                }
                self.mode = Mode::Dashboard;
            }
            KeyCode::Esc => self.mode = Mode::Dashboard,
            _ => {}
        }
    }

    fn on_position_key(&mut self, key: KeyCode, mut text: String) {
        match key {
            KeyCode::Char(c) => {
                text.push(c);
                self.mode = Mode::EditPosition(text);
            }
            KeyCode::Backspace => {
                text.pop();
                self.mode = Mode::EditPosition(text);
            }
            KeyCode::Enter => {
                let name = text.trim();
                if !name.is_empty() {
                    self.draft.position = name.to_owned();
                }
                self.mode = Mode::Configure;
            }
            KeyCode::Esc => self.mode = Mode::Configure,
            _ => {}
        }
    }
}
