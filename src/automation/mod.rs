//! Driving REW's window with simulated mouse and keyboard input.
//!
//! Only two controls are ever located on screen, the Measure and Start
//! buttons. Everything else in REW's measurement dialog is reached at a fixed
//! offset from the Start button.

pub mod dummy;
pub mod template;
pub mod xdo;

pub use dummy::DummyScreen;
pub use xdo::XdoDriver;

use crate::{
    control::{ExecutionControl, Stopped},
    observer::Observer,
    player::{Player, SweepExecutor},
    schedule::MeasurementStep,
    workflow::SweepDriver,
};
use log::{debug, info, warn};
use std::{
    fmt, io,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

/// Failures of a [`ScreenDriver`].
#[derive(Debug, Error)]
pub enum AutomationError {
    /// A helper program could not be started.
    #[error("could not launch {program}: {source}")]
    Launch {
        /// Program that failed to start.
        program: String,
        /// Why it failed to start.
        source: io::Error,
    },
    /// A helper program exited unsuccessfully.
    #[error("{program} failed ({status}): {stderr}")]
    Command {
        /// Program that failed.
        program: String,
        /// Its exit status.
        status: String,
        /// What it printed on stderr.
        stderr: String,
    },
    /// The screenshot could not be taken or decoded.
    #[error("screen capture failed: {0}")]
    Capture(String),
    /// A template image could not be loaded.
    #[error("could not load template {}: {source}", path.display())]
    Template {
        /// Template image path.
        path: PathBuf,
        /// Why it could not be loaded.
        source: image::ImageError,
    },
}

/// An absolute screen position in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScreenPoint {
    /// Horizontal pixel.
    pub x: i32,
    /// Vertical pixel.
    pub y: i32,
}

impl ScreenPoint {
    /// A point at `x`, `y`.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The point `offset` away from this one.
    pub fn offset(self, offset: Offset) -> Self {
        Self {
            x: self.x + offset.dx,
            y: self.y + offset.dy,
        }
    }
}

impl fmt::Display for ScreenPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A displacement between two screen points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offset {
    /// Horizontal shift in pixels.
    pub dx: i32,
    /// Vertical shift in pixels.
    pub dy: i32,
}

impl Offset {
    /// An offset of `dx`, `dy`.
    pub const fn new(dx: i32, dy: i32) -> Self {
        Self { dx, dy }
    }
}

/// The controls that are found by image matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlTarget {
    /// Opens REW's measurement dialog.
    MeasureButton,
    /// Starts the sweep inside the dialog.
    StartButton,
}

impl ControlTarget {
    /// File name of the template image in the assets directory.
    pub fn template_file(self) -> &'static str {
        match self {
            ControlTarget::MeasureButton => "MeasureButton.png",
            ControlTarget::StartButton => "StartButton.png",
        }
    }
}

impl fmt::Display for ControlTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlTarget::MeasureButton => f.write_str("Measure button"),
            ControlTarget::StartButton => f.write_str("Start button"),
        }
    }
}

/// Keys the automation presses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// The Enter key.
    Enter,
}

impl Key {
    /// X keysym name.
    pub fn keysym(self) -> &'static str {
        match self {
            Key::Enter => "Return",
        }
    }
}

/// Where things are in REW's measurement dialog, and how patient to be.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    /// Name field, relative to the Start button.
    pub name_offset: Offset,
    /// Notes field, relative to the Start button.
    pub notes_offset: Offset,
    /// Minimum template match score.
    pub confidence: f32,
    /// Wait after playback before dismissing dialogs.
    pub settle: Duration,
    /// Enter presses after each sweep.
    pub dismiss_presses: u32,
    /// Delay between failed lookups.
    pub retry_delay: Duration,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            name_offset: Offset::new(-560, -642),
            notes_offset: Offset::new(-560, -470),
            confidence: 0.9,
            settle: Duration::from_secs(2),
            dismiss_presses: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Low level access to the screen, mouse and keyboard.
pub trait ScreenDriver {
    /// Centre of the best match for the image at `template` scoring at
    /// least `confidence`, if any.
    fn locate(
        &mut self,
        template: &Path,
        confidence: f32,
    ) -> Result<Option<ScreenPoint>, AutomationError>;

    /// Click the left button `clicks` times at `point`.
    fn click(&mut self, point: ScreenPoint, clicks: u32) -> Result<(), AutomationError>;

    /// Move the pointer without clicking.
    fn move_to(&mut self, point: ScreenPoint) -> Result<(), AutomationError>;

    /// Type `text` into whatever has focus.
    fn type_text(&mut self, text: &str) -> Result<(), AutomationError>;

    /// Press and release `key`.
    fn press_key(&mut self, key: Key) -> Result<(), AutomationError>;
}

impl<D: ScreenDriver + ?Sized> ScreenDriver for Box<D> {
    fn locate(
        &mut self,
        template: &Path,
        confidence: f32,
    ) -> Result<Option<ScreenPoint>, AutomationError> {
        (**self).locate(template, confidence)
    }
    fn click(&mut self, point: ScreenPoint, clicks: u32) -> Result<(), AutomationError> {
        (**self).click(point, clicks)
    }
    fn move_to(&mut self, point: ScreenPoint) -> Result<(), AutomationError> {
        (**self).move_to(point)
    }
    fn type_text(&mut self, text: &str) -> Result<(), AutomationError> {
        (**self).type_text(text)
    }
    fn press_key(&mut self, key: Key) -> Result<(), AutomationError> {
        (**self).press_key(key)
    }
}

/// Runs one sweep in REW from start to finish.
#[derive(Debug)]
pub struct InputAutomation<D, P> {
    driver: D,
    executor: SweepExecutor<P>,
    assets_dir: PathBuf,
    layout: Layout,
}

impl<D: ScreenDriver, P: Player> InputAutomation<D, P> {
    /// Find templates in `assets_dir` and play through `executor`.
    pub fn new(driver: D, executor: SweepExecutor<P>, assets_dir: impl Into<PathBuf>) -> Self {
        Self {
            driver,
            executor,
            assets_dir: assets_dir.into(),
            layout: Layout::default(),
        }
    }

    /// Use `layout` instead of the default.
    pub fn with_layout(self, layout: Layout) -> Self {
        Self { layout, ..self }
    }

    /// Click offsets and timings.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The screen driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The stimulus player.
    pub fn executor(&self) -> &SweepExecutor<P> {
        &self.executor
    }

    /// Path of the template image for `target`.
    pub fn template_path(&self, target: ControlTarget) -> PathBuf {
        self.assets_dir.join(target.template_file())
    }

    /// Find `target` on screen. Never gives up: every miss asks the user to
    /// bring REW's window into view and tries again, until found or stopped.
    pub fn locate_control(
        &mut self,
        target: ControlTarget,
        observer: &dyn Observer,
        control: &ExecutionControl,
    ) -> Result<ScreenPoint, Stopped> {
        let template = self.template_path(target);
        loop {
            control.checkpoint()?;
            match self.driver.locate(&template, self.layout.confidence) {
                Ok(Some(point)) => {
                    debug!("{target} at {point}");
                    return Ok(point);
                }
                Ok(None) => {
                    info!("{target} not found on screen");
                    observer.input(&format!(
                        "Could not find the {target}. Make sure the REW window is visible and \
                         nothing covers it, then continue."
                    ));
                }
                Err(e) => {
                    warn!("Looking for the {target} failed: {e}");
                    observer.input(&format!(
                        "Could not look for the {target} ({e}). Check the screen and continue."
                    ));
                }
            }
            control.checkpoint()?;
            control.sleep(self.layout.retry_delay)?;
        }
    }

    /// Click `clicks` times at `offset` from `anchor`.
    pub fn click_relative(
        &mut self,
        anchor: ScreenPoint,
        offset: Offset,
        clicks: u32,
        observer: &dyn Observer,
        control: &ExecutionControl,
    ) -> Result<ScreenPoint, Stopped> {
        let point = anchor.offset(offset);
        self.act(observer, control, |d| d.click(point, clicks))?;
        Ok(point)
    }

    /// Run a driver action, then checkpoint. A failed action is reported and
    /// otherwise ignored, the sweep check afterwards catches the outcome.
    fn act(
        &mut self,
        observer: &dyn Observer,
        control: &ExecutionControl,
        action: impl FnOnce(&mut D) -> Result<(), AutomationError>,
    ) -> Result<(), Stopped> {
        if let Err(e) = action(&mut self.driver) {
            warn!("Input automation failed: {e}");
            observer.info(&format!("Input automation failed: {e}"));
        }
        control.checkpoint()
    }

    /// Start the sweep for `step` in REW and play its stimulus.
    pub fn drive_sweep_start(
        &mut self,
        step: &MeasurementStep,
        observer: &dyn Observer,
        control: &ExecutionControl,
    ) -> Result<(), Stopped> {
        let channel = step.channel.as_deref().unwrap_or_default();

        let measure = self.locate_control(ControlTarget::MeasureButton, observer, control)?;
        self.act(observer, control, |d| d.click(measure, 2))?;

        let start = self.locate_control(ControlTarget::StartButton, observer, control)?;
        let (name_offset, notes_offset) = (self.layout.name_offset, self.layout.notes_offset);
        self.click_relative(start, name_offset, 2, observer, control)?;

        let name = step.measurement_name();
        debug!("Measurement name '{name}'");
        self.act(observer, control, |d| d.type_text(&name))?;
        self.click_relative(start, notes_offset, 1, observer, control)?;

        if step.cable_swap {
            observer.input(&format!(
                "You are measuring {channel}, please plug your {channel} into SW1 and continue."
            ));
            control.checkpoint()?;
        }

        self.act(observer, control, |d| d.click(start, 1))?;
        let audio = step.audio_file.as_deref().unwrap_or(channel);
        self.executor.play(audio, observer, control)?;
        control.checkpoint()?;

        control.sleep(self.layout.settle)?;
        for _ in 0..self.layout.dismiss_presses {
            self.act(observer, control, |d| d.press_key(Key::Enter))?;
        }
        Ok(())
    }
}

impl<D: ScreenDriver, P: Player> SweepDriver for InputAutomation<D, P> {
    fn wait_for_primary_control(
        &mut self,
        observer: &dyn Observer,
        control: &ExecutionControl,
    ) -> Result<(), Stopped> {
        self.locate_control(ControlTarget::MeasureButton, observer, control)
            .map(|_| ())
    }

    fn drive_sweep(
        &mut self,
        step: &MeasurementStep,
        observer: &dyn Observer,
        control: &ExecutionControl,
    ) -> Result<(), Stopped> {
        self.drive_sweep_start(step, observer, control)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        automation::dummy::{ScreenAction, MEASURE_POINT, START_POINT},
        channel::ChannelMapping,
        observer::LogObserver,
        player::SilentPlayer,
        rew::{DummyRew, MeasurementTool},
        schedule::Schedule,
        settings::MeasurementConfig,
    };
    use std::{
        sync::{Arc, Mutex},
        thread,
    };

    fn quick_layout() -> Layout {
        Layout {
            settle: Duration::from_millis(1),
            retry_delay: Duration::from_millis(1),
            ..Layout::default()
        }
    }

    fn automation(screen: DummyScreen) -> InputAutomation<DummyScreen, SilentPlayer> {
        let executor = SweepExecutor::new(SilentPlayer::new(Duration::from_millis(1)), "audio")
            .with_poll_interval(Duration::from_millis(1));
        InputAutomation::new(screen, executor, "assets").with_layout(quick_layout())
    }

    fn step(channels: &[&str], index: usize, remap: Option<(&str, &str)>) -> MeasurementStep {
        let mut config = MeasurementConfig {
            channels: ChannelMapping::identity(channels.iter().copied()),
            iterations: 1,
            reference: false,
            center_microphone: false,
            position: "Sofa".to_owned(),
        };
        if let Some((ch, audio)) = remap {
            config.channels.remap(ch, audio);
        }
        Schedule::regenerate(&config).get(index).unwrap().clone()
    }

    /// Counts prompts and acknowledges them at once.
    #[derive(Default)]
    struct Prompts(Mutex<Vec<String>>);

    impl Observer for Prompts {
        fn info(&self, _: &str) {}
        fn update(&self) {}
        fn input(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_owned());
        }
        fn complete(&self) {}
    }

    #[test]
    fn offsets_resolve_from_the_anchor() {
        let start = ScreenPoint::new(1200, 900);
        let layout = Layout::default();
        assert_eq!(start.offset(layout.name_offset), ScreenPoint::new(640, 258));
        assert_eq!(start.offset(layout.notes_offset), ScreenPoint::new(640, 430));
    }

    #[test]
    fn sweep_start_sequence() {
        let screen = DummyScreen::new();
        let mut automation = automation(screen.clone());
        let control = ExecutionControl::new();
        let step = step(&["FL"], 1, None);

        automation
            .drive_sweep_start(&step, &LogObserver, &control)
            .unwrap();

        let name = START_POINT.offset(Layout::default().name_offset);
        let notes = START_POINT.offset(Layout::default().notes_offset);
        assert_eq!(
            screen.actions(),
            vec![
                ScreenAction::Click(MEASURE_POINT, 2),
                ScreenAction::Click(name, 2),
                ScreenAction::Type("FL (Pos: Sofa - Iter: 1)".to_owned()),
                ScreenAction::Click(notes, 1),
                ScreenAction::Click(START_POINT, 1),
                ScreenAction::Key(Key::Enter),
                ScreenAction::Key(Key::Enter),
                ScreenAction::Key(Key::Enter),
            ]
        );
    }

    #[test]
    fn start_click_records_a_measurement() {
        let rew = DummyRew::default();
        let mut automation = automation(DummyScreen::new().with_rew(rew.clone()));
        let control = ExecutionControl::new();
        automation
            .drive_sweep_start(&step(&["C"], 1, None), &LogObserver, &control)
            .unwrap();
        assert_eq!(rew.titles(), vec!["C (Pos: Sofa - Iter: 1)"]);
        assert!(rew.selected_measurement_id().is_some());
    }

    #[test]
    fn cable_swap_prompt_only_when_needed() {
        let control = ExecutionControl::new();

        let prompts = Prompts::default();
        let mut automation = automation(DummyScreen::new());
        let sw2 = step(&["SW1", "SW2"], 2, None);
        automation.drive_sweep_start(&sw2, &prompts, &control).unwrap();
        assert!(prompts.0.lock().unwrap().is_empty());

        let sw2 = step(&["SW1", "SW2"], 2, Some(("SW1", "C")));
        automation.drive_sweep_start(&sw2, &prompts, &control).unwrap();
        let prompts = prompts.0.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("plug your SW2 into SW1"));
    }

    #[test]
    fn missing_control_prompts_until_found() {
        let mut automation = automation(DummyScreen::new().hidden_for(2));
        let control = ExecutionControl::new();
        let prompts = Prompts::default();
        let point = automation
            .locate_control(ControlTarget::StartButton, &prompts, &control)
            .unwrap();
        assert_eq!(point, START_POINT);
        assert_eq!(prompts.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn stop_ends_an_endless_lookup() {
        let control = Arc::new(ExecutionControl::new());
        let th_control = Arc::clone(&control);
        let worker = thread::spawn(move || {
            let mut automation = automation(DummyScreen::new().hidden_for(u32::MAX));
            automation.locate_control(ControlTarget::MeasureButton, &LogObserver, &th_control)
        });
        thread::sleep(Duration::from_millis(30));
        control.stop();
        assert_eq!(worker.join().unwrap(), Err(Stopped));
    }

    #[test]
    fn stop_before_start_click_skips_it() {
        let screen = DummyScreen::new();
        let mut automation = automation(screen.clone());
        let control = ExecutionControl::new();
        control.stop();
        let result = automation.drive_sweep_start(&step(&["FL"], 1, None), &LogObserver, &control);
        assert_eq!(result, Err(Stopped));
        assert!(screen.actions().is_empty());
    }
}
