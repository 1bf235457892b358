//! [`ScreenDriver`] for an X11 desktop: screenshots through an external
//! capture command and input through `xdotool`.

use super::{template, AutomationError, Key, ScreenDriver, ScreenPoint};
use image::GrayImage;
use log::{debug, trace};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::{Command, Output},
};

/// Captures the whole screen as PNG on stdout.
pub const DEFAULT_CAPTURE_COMMAND: &str = "import -window root png:-";

/// Milliseconds between typed characters.
const TYPE_DELAY_MS: u32 = 50;

/// Drives the desktop through command line tools.
#[derive(Debug)]
pub struct XdoDriver {
    capture: Vec<String>,
    xdotool: String,
    templates: HashMap<PathBuf, GrayImage>,
}

impl Default for XdoDriver {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_COMMAND)
    }
}

impl XdoDriver {
    /// `capture_command` is split on whitespace and must print an image to
    /// stdout.
    pub fn new(capture_command: &str) -> Self {
        Self {
            capture: capture_command
                .split_whitespace()
                .map(str::to_owned)
                .collect(),
            xdotool: "xdotool".to_owned(),
            templates: HashMap::new(),
        }
    }

    fn run(program: &str, args: &[String]) -> Result<Output, AutomationError> {
        trace!("{program} {}", args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| AutomationError::Launch {
                program: program.to_owned(),
                source,
            })?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(AutomationError::Command {
                program: program.to_owned(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }

    fn xdotool(&self, args: &[String]) -> Result<(), AutomationError> {
        Self::run(&self.xdotool, args).map(|_| ())
    }

    /// Grab the current screen.
    pub fn screenshot(&self) -> Result<GrayImage, AutomationError> {
        let (program, args) = self
            .capture
            .split_first()
            .ok_or_else(|| AutomationError::Capture("empty capture command".to_owned()))?;
        let output = Self::run(program, args)?;
        let image = image::load_from_memory(&output.stdout)
            .map_err(|e| AutomationError::Capture(e.to_string()))?;
        Ok(image.to_luma8())
    }

    fn template(&mut self, path: &Path) -> Result<&GrayImage, AutomationError> {
        if !self.templates.contains_key(path) {
            let image = template::load_gray(path).map_err(|source| AutomationError::Template {
                path: path.to_owned(),
                source,
            })?;
            debug!(
                "Loaded template {} ({}x{})",
                path.display(),
                image.width(),
                image.height()
            );
            self.templates.insert(path.to_owned(), image);
        }
        self.templates
            .get(path)
            .ok_or_else(|| AutomationError::Capture(format!("template {} vanished", path.display())))
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl ScreenDriver for XdoDriver {
    fn locate(
        &mut self,
        template_path: &Path,
        confidence: f32,
    ) -> Result<Option<ScreenPoint>, AutomationError> {
        let screen = self.screenshot()?;
        let pattern = self.template(template_path)?;
        let best = template::best_match(&screen, pattern);
        if let Some(m) = &best {
            debug!(
                "{}: best score {:.3} at ({}, {})",
                template_path.display(),
                m.score,
                m.x,
                m.y
            );
        }
        Ok(best
            .filter(|m| m.score >= confidence)
            .map(|m| {
                let (x, y) = m.center();
                ScreenPoint::new(x as i32, y as i32)
            }))
    }

    fn click(&mut self, point: ScreenPoint, clicks: u32) -> Result<(), AutomationError> {
        let (x, y, n) = (point.x.to_string(), point.y.to_string(), clicks.max(1).to_string());
        self.xdotool(&args(["mousemove", x.as_str(), y.as_str(), "click", "--repeat", n.as_str(), "1"]))
    }

    fn move_to(&mut self, point: ScreenPoint) -> Result<(), AutomationError> {
        let (x, y) = (point.x.to_string(), point.y.to_string());
        self.xdotool(&args(["mousemove", x.as_str(), y.as_str()]))
    }

    fn type_text(&mut self, text: &str) -> Result<(), AutomationError> {
        let delay = TYPE_DELAY_MS.to_string();
        self.xdotool(&args(["type", "--delay", delay.as_str(), "--", text]))
    }

    fn press_key(&mut self, key: Key) -> Result<(), AutomationError> {
        self.xdotool(&args(["key", key.keysym()]))
    }
}
