//! A pretend screen with REW's controls at fixed places.

use super::{AutomationError, ControlTarget, Key, ScreenDriver, ScreenPoint};
use crate::rew::DummyRew;
use log::debug;
use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

/// Where the simulated Measure button sits.
pub const MEASURE_POINT: ScreenPoint = ScreenPoint::new(400, 300);
/// Where the simulated Start button sits.
pub const START_POINT: ScreenPoint = ScreenPoint::new(1200, 900);

/// Something done to the simulated screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenAction {
    /// A click at a point, with the click count.
    Click(ScreenPoint, u32),
    /// A pointer move.
    Move(ScreenPoint),
    /// Typed text.
    Type(String),
    /// A key press.
    Key(Key),
}

#[derive(Debug, Default)]
struct ScreenState {
    actions: Vec<ScreenAction>,
    last_typed: String,
    hidden_lookups: u32,
}

/// Records input and reports the Start click to a [`DummyRew`], if any.
/// Clones share their record.
#[derive(Debug, Clone, Default)]
pub struct DummyScreen {
    state: Arc<Mutex<ScreenState>>,
    rew: Option<DummyRew>,
}

impl DummyScreen {
    /// A screen with no controls found yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report sweeps to `rew`.
    pub fn with_rew(self, rew: DummyRew) -> Self {
        Self {
            rew: Some(rew),
            ..self
        }
    }

    /// The next `lookups` locate calls find nothing, as if REW were hidden.
    pub fn hidden_for(self, lookups: u32) -> Self {
        self.state().hidden_lookups = lookups;
        self
    }

    fn state(&self) -> MutexGuard<'_, ScreenState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Everything done so far, oldest first.
    pub fn actions(&self) -> Vec<ScreenAction> {
        self.state().actions.clone()
    }
}

impl ScreenDriver for DummyScreen {
    fn locate(
        &mut self,
        template: &Path,
        _confidence: f32,
    ) -> Result<Option<ScreenPoint>, AutomationError> {
        let mut state = self.state();
        if state.hidden_lookups > 0 {
            state.hidden_lookups -= 1;
            return Ok(None);
        }
        let file = template.file_name().and_then(|f| f.to_str());
        Ok(match file {
            Some(f) if f == ControlTarget::MeasureButton.template_file() => Some(MEASURE_POINT),
            Some(f) if f == ControlTarget::StartButton.template_file() => Some(START_POINT),
            _ => None,
        })
    }

    fn click(&mut self, point: ScreenPoint, clicks: u32) -> Result<(), AutomationError> {
        let title = {
            let mut state = self.state();
            state.actions.push(ScreenAction::Click(point, clicks));
            state.last_typed.clone()
        };
        if point == START_POINT {
            if let Some(rew) = &self.rew {
                let id = rew.record_sweep(&title);
                debug!("Simulated sweep '{title}' as {id}");
            }
        }
        Ok(())
    }

    fn move_to(&mut self, point: ScreenPoint) -> Result<(), AutomationError> {
        self.state().actions.push(ScreenAction::Move(point));
        Ok(())
    }

    fn type_text(&mut self, text: &str) -> Result<(), AutomationError> {
        let mut state = self.state();
        state.actions.push(ScreenAction::Type(text.to_owned()));
        state.last_typed = text.to_owned();
        Ok(())
    }

    fn press_key(&mut self, key: Key) -> Result<(), AutomationError> {
        self.state().actions.push(ScreenAction::Key(key));
        Ok(())
    }
}
