//! A line-oriented front end. Reads commands from any reader, writes the
//! measurement's progress to any writer, so the same loop serves a terminal
//! and a TCP client.

use crate::{
    channel::{normalize, ChannelEntry, ChannelMapping},
    observer::WorkflowEvent,
    rew::MeasurementTool,
    schedule::lock,
    session::{MeasurementSession, StartAction},
    settings::save_settings,
    workflow::SweepDriver,
};
use log::{debug, warn};
use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{char, space0, space1, u32},
    combinator::{all_consuming, map, rest, value, verify},
    error::Error,
    multi::separated_list1,
    sequence::{delimited, pair, preceded, separated_pair},
    Finish, IResult,
};
use std::{
    collections::BTreeMap,
    io::{self, BufRead, Write},
    path::Path,
    str::FromStr,
    sync::mpsc::{self, Sender},
    thread,
};

/// Everything the console loop reacts to.
#[derive(Debug)]
pub enum ConsoleEvent {
    /// A line typed by the user, without its newline.
    Line(String),
    /// The reader reached its end.
    Closed,
    /// Something from the running measurement.
    Workflow(WorkflowEvent),
}

impl From<WorkflowEvent> for ConsoleEvent {
    fn from(event: WorkflowEvent) -> Self {
        ConsoleEvent::Workflow(event)
    }
}

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Start or resume the run.
    Start,
    /// Pause at the next checkpoint.
    Pause,
    /// Resume a paused run.
    Resume,
    /// Stop the run.
    Stop,
    /// Show progress and REW's measurement count.
    Status,
    /// Select exactly these channels.
    Channels(Vec<String>),
    /// Play `audio` when measuring `channel`.
    Map {
        /// Channel to remap.
        channel: String,
        /// Stimulus it should play.
        audio: String,
    },
    /// Sweeps per channel.
    Iterations(u32),
    /// Microphone position name.
    Position(String),
    /// Toggle the reference run.
    Reference(bool),
    /// Toggle microphone centering.
    Center(bool),
    /// Write the channel mapping to the settings file.
    Save,
    /// List the commands.
    Help,
    /// Leave the console.
    Quit,
}

const HELP: &str = "\
commands:
  start              start a measurement, or resume the running one
  pause | resume     hold or continue the running measurement
  stop               cancel the running measurement
  status             show the schedule
  channels A,B,...   select exactly these channels
  map CH AUDIO       play AUDIO's stimulus when measuring CH
  iterations N       sweeps per channel
  position NAME      name of the microphone position
  reference on|off   measure the main listening position
  center on|off      check microphone centering first
  save               write the channel mapping to the settings file
  quit               stop and leave
any line answers a pending prompt";

fn channel_name(s: &str) -> IResult<&str, String> {
    map(
        take_while1(|c: char| c.is_ascii_alphanumeric()),
        normalize,
    )(s)
}

fn switch(s: &str) -> IResult<&str, bool> {
    alt((
        value(true, tag_no_case("on")),
        value(false, tag_no_case("off")),
    ))(s)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, (&'a str, &'a str)> {
    pair(tag_no_case(word), space1)
}

fn parse_command(s: &str) -> IResult<&str, ConsoleCommand> {
    alt((
        value(ConsoleCommand::Start, tag_no_case("start")),
        value(ConsoleCommand::Pause, tag_no_case("pause")),
        value(ConsoleCommand::Resume, tag_no_case("resume")),
        value(ConsoleCommand::Stop, tag_no_case("stop")),
        value(ConsoleCommand::Status, tag_no_case("status")),
        map(
            preceded(
                keyword("channels"),
                separated_list1(delimited(space0, char(','), space0), channel_name),
            ),
            ConsoleCommand::Channels,
        ),
        map(
            preceded(
                keyword("map"),
                separated_pair(channel_name, space1, channel_name),
            ),
            |(channel, audio)| ConsoleCommand::Map { channel, audio },
        ),
        map(
            preceded(keyword("iterations"), verify(u32, |n: &u32| *n > 0)),
            ConsoleCommand::Iterations,
        ),
        map(
            preceded(
                keyword("position"),
                verify(rest, |name: &str| !name.trim().is_empty()),
            ),
            |name: &str| ConsoleCommand::Position(name.trim().to_owned()),
        ),
        map(preceded(keyword("reference"), switch), ConsoleCommand::Reference),
        map(preceded(keyword("center"), switch), ConsoleCommand::Center),
        value(ConsoleCommand::Save, tag_no_case("save")),
        value(ConsoleCommand::Help, tag_no_case("help")),
        value(ConsoleCommand::Quit, tag_no_case("quit")),
    ))(s)
}

impl FromStr for ConsoleCommand {
    type Err = Error<String>;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match all_consuming(delimited(space0, parse_command, space0))(s).finish() {
            Ok((_remaining, command)) => Ok(command),
            Err(Error { input, code }) => Err(Error {
                input: input.to_string(),
                code,
            }),
        }
    }
}

/// Forward every line of `reader` to `tx` on a background thread, then
/// [`ConsoleEvent::Closed`].
pub fn spawn_reader<R>(reader: R, tx: Sender<ConsoleEvent>) -> io::Result<()>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("console-input".to_owned())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(ConsoleEvent::Line(line)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        debug!("Console input ended: {e}");
                        break;
                    }
                }
            }
            let _ = tx.send(ConsoleEvent::Closed);
        })?;
    Ok(())
}

/// Run a console over `reader` and `writer` until `quit` or the end of the
/// input.
///
/// Workflow events of runs started here are printed to `writer`. When the
/// input ends during a run, the run is allowed to finish, but prompts can no
/// longer be answered and stop it. Any run still active on return is stopped
/// and waited for.
pub fn run_console<R, W, T, S>(
    reader: R,
    writer: &mut W,
    session: &mut MeasurementSession<T, S, ConsoleEvent>,
    settings_path: &Path,
) -> io::Result<()>
where
    R: BufRead + Send + 'static,
    W: Write,
    T: MeasurementTool + Send + 'static,
    S: SweepDriver + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    session.set_events(tx.clone());
    spawn_reader(reader, tx)?;

    let mut console = Console {
        writer,
        settings_path,
        pending: None,
        active: false,
        closed: false,
    };
    let res = console.run(session, rx);
    drop(console);

    if session.stop() {
        session.wait();
    }
    res
}

struct Console<'a, W> {
    writer: &'a mut W,
    settings_path: &'a Path,
    pending: Option<Sender<()>>,
    /// A run was started here and its `Finished` has not arrived yet.
    active: bool,
    closed: bool,
}

impl<W: Write> Console<'_, W> {
    fn run<T, S>(
        &mut self,
        session: &mut MeasurementSession<T, S, ConsoleEvent>,
        rx: mpsc::Receiver<ConsoleEvent>,
    ) -> io::Result<()>
    where
        T: MeasurementTool + Send + 'static,
        S: SweepDriver + Send + 'static,
    {
        writeln!(self.writer, "autosweep console, type 'help' for commands")?;
        self.writer.flush()?;

        while let Ok(event) = rx.recv() {
            match event {
                ConsoleEvent::Line(line) => {
                    if !self.line(&line, session)? {
                        return Ok(());
                    }
                }
                ConsoleEvent::Closed => {
                    self.closed = true;
                    self.pending = None;
                    if !self.active {
                        return Ok(());
                    }
                    writeln!(self.writer, "Input closed, waiting for the measurement")?;
                }
                ConsoleEvent::Workflow(event) => {
                    if !self.workflow(event, session)? {
                        return Ok(());
                    }
                }
            }
            self.writer.flush()?;
        }
        Ok(())
    }

    /// Returns false once the console should end.
    fn workflow<T, S>(
        &mut self,
        event: WorkflowEvent,
        session: &mut MeasurementSession<T, S, ConsoleEvent>,
    ) -> io::Result<bool>
    where
        T: MeasurementTool + Send + 'static,
        S: SweepDriver + Send + 'static,
    {
        match event {
            WorkflowEvent::Info(message) => writeln!(self.writer, "{message}")?,
            WorkflowEvent::Update => {}
            WorkflowEvent::Input { message, ack } => {
                if self.closed {
                    warn!("Cannot answer '{message}' after the input closed");
                } else {
                    writeln!(self.writer, ">> {message}")?;
                    writeln!(self.writer, ">> press Enter to continue")?;
                    self.pending = Some(ack);
                }
            }
            WorkflowEvent::Complete => writeln!(self.writer, "All measurements completed")?,
            WorkflowEvent::Finished(state) => {
                self.pending = None;
                self.active = false;
                session.wait();
                writeln!(self.writer, "Measurement {state}")?;
                if self.closed {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Returns false once the console should end.
    fn line<T, S>(
        &mut self,
        line: &str,
        session: &mut MeasurementSession<T, S, ConsoleEvent>,
    ) -> io::Result<bool>
    where
        T: MeasurementTool + Send + 'static,
        S: SweepDriver + Send + 'static,
    {
        let command = ConsoleCommand::from_str(line);

        if let Some(ack) = self.pending.take() {
            // Stop and quit still mean what they say while a prompt waits.
            if !matches!(command, Ok(ConsoleCommand::Stop | ConsoleCommand::Quit)) {
                let _ = ack.send(());
                writeln!(self.writer, "Continuing")?;
                return Ok(true);
            }
        }

        let command = match command {
            Ok(command) => command,
            Err(_) if line.trim().is_empty() => return Ok(true),
            Err(_) => {
                writeln!(self.writer, "Unknown command '{}', try 'help'", line.trim())?;
                return Ok(true);
            }
        };

        match command {
            ConsoleCommand::Start => match session.start() {
                Ok(StartAction::Started) => {
                    self.active = true;
                    writeln!(self.writer, "Measurement started")?
                }
                Ok(StartAction::Resumed) => writeln!(self.writer, "Measurement resumed")?,
                Err(e) => writeln!(self.writer, "Could not start: {e}")?,
            },
            ConsoleCommand::Pause => {
                if session.pause() {
                    writeln!(self.writer, "Pausing at the next checkpoint")?;
                } else {
                    writeln!(self.writer, "No measurement is running")?;
                }
            }
            ConsoleCommand::Resume => {
                if session.resume() {
                    writeln!(self.writer, "Measurement resumed")?;
                } else {
                    writeln!(self.writer, "No measurement is running")?;
                }
            }
            ConsoleCommand::Stop => {
                if session.stop() {
                    writeln!(self.writer, "Stopping")?;
                } else {
                    writeln!(self.writer, "No measurement is running")?;
                }
            }
            ConsoleCommand::Status => self.status(session)?,
            ConsoleCommand::Help => writeln!(self.writer, "{HELP}")?,
            ConsoleCommand::Save => {
                match save_settings(self.settings_path, &session.config().channels) {
                    Ok(()) => writeln!(
                        self.writer,
                        "Settings saved to {}",
                        self.settings_path.display()
                    )?,
                    Err(e) => writeln!(self.writer, "Could not save settings: {e}")?,
                }
            }
            ConsoleCommand::Quit => {
                writeln!(self.writer, "Bye")?;
                return Ok(false);
            }
            other => self.reconfigure(other, session)?,
        }
        Ok(true)
    }

    fn reconfigure<T, S>(
        &mut self,
        command: ConsoleCommand,
        session: &mut MeasurementSession<T, S, ConsoleEvent>,
    ) -> io::Result<()>
    where
        T: MeasurementTool + Send + 'static,
        S: SweepDriver + Send + 'static,
    {
        let mut config = session.config().clone();
        match command {
            ConsoleCommand::Channels(channels) => {
                let old = config.channels.entries();
                let entries: BTreeMap<String, ChannelEntry> = channels
                    .into_iter()
                    .map(|c| {
                        let entry = old
                            .get(&c)
                            .cloned()
                            .unwrap_or_else(|| ChannelEntry::identity(&c));
                        (c, entry)
                    })
                    .collect();
                config.channels = ChannelMapping::from_entries(entries);
            }
            ConsoleCommand::Map { channel, audio } => config.channels.remap(&channel, &audio),
            ConsoleCommand::Iterations(n) => config.iterations = n,
            ConsoleCommand::Position(name) => config.position = name,
            ConsoleCommand::Reference(on) => config.reference = on,
            ConsoleCommand::Center(on) => config.center_microphone = on,
            _ => return Ok(()),
        }
        match session.configure(config) {
            Ok(()) => {
                let steps = lock(&session.schedule()).len();
                writeln!(self.writer, "Configuration updated, {steps} steps")?;
            }
            Err(e) => writeln!(self.writer, "Refused: {e}")?,
        }
        Ok(())
    }

    fn status<T, S>(&mut self, session: &mut MeasurementSession<T, S, ConsoleEvent>) -> io::Result<()>
    where
        T: MeasurementTool + Send + 'static,
        S: SweepDriver + Send + 'static,
    {
        let state = session.state();
        let config = session.config();
        writeln!(
            self.writer,
            "State: {state}, position '{}', channels {}",
            config.position,
            config.channels.ordered_channels().join(",")
        )?;
        {
            let schedule = session.schedule();
            let schedule = lock(&schedule);
            let (done, total) = schedule.progress();
            writeln!(self.writer, "Progress: {done}/{total}")?;
            for (i, step) in schedule.iter().enumerate() {
                writeln!(self.writer, "{:>3}  {:<12} {}", i + 1, step.status, step.label())?;
            }
        }
        if let Some(controller) = session.controller() {
            match controller.tool().measurement_ids() {
                Ok(ids) => writeln!(self.writer, "REW holds {} measurements", ids.len())?,
                Err(e) => writeln!(self.writer, "REW: {e}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        automation::{DummyScreen, InputAutomation, Layout},
        player::{SilentPlayer, SweepExecutor},
        rew::DummyRew,
        settings::{read_settings, MeasurementConfig},
        workflow::{ControllerConfig, WorkflowController, WorkflowState},
    };
    use std::{io::Cursor, time::Duration};

    type Session =
        MeasurementSession<DummyRew, InputAutomation<DummyScreen, SilentPlayer>, ConsoleEvent>;

    fn session(rew: &DummyRew, channels: &[&str]) -> Session {
        let executor = SweepExecutor::new(SilentPlayer::new(Duration::from_millis(2)), "audio")
            .with_poll_interval(Duration::from_millis(1));
        let layout = Layout {
            settle: Duration::from_millis(1),
            retry_delay: Duration::from_millis(1),
            ..Layout::default()
        };
        let automation =
            InputAutomation::new(DummyScreen::new().with_rew(rew.clone()), executor, "assets")
                .with_layout(layout);
        let controller = WorkflowController::new(rew.clone(), automation, ControllerConfig::default());
        let config = MeasurementConfig {
            channels: ChannelMapping::identity(channels.iter().copied()),
            ..MeasurementConfig::default()
        };
        let (tx, _rx) = mpsc::channel();
        MeasurementSession::new(controller, config, tx)
    }

    fn run_script(session: &mut Session, script: &str, settings: &Path) -> String {
        let mut out = Vec::new();
        run_console(Cursor::new(script.to_owned()), &mut out, session, settings).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn parses_commands() {
        assert_eq!("start".parse(), Ok(ConsoleCommand::Start));
        assert_eq!("  STOP ".parse(), Ok(ConsoleCommand::Stop));
        assert_eq!("status".parse(), Ok(ConsoleCommand::Status));
        assert_eq!(
            "channels c, fl,FR".parse(),
            Ok(ConsoleCommand::Channels(vec![
                "C".to_owned(),
                "FL".to_owned(),
                "FR".to_owned()
            ]))
        );
        assert_eq!(
            "map sw2 sw1".parse(),
            Ok(ConsoleCommand::Map {
                channel: "SW2".to_owned(),
                audio: "SW1".to_owned()
            })
        );
        assert_eq!("iterations 3".parse(), Ok(ConsoleCommand::Iterations(3)));
        assert_eq!(
            "position Left Seat".parse(),
            Ok(ConsoleCommand::Position("Left Seat".to_owned()))
        );
        assert_eq!("reference on".parse(), Ok(ConsoleCommand::Reference(true)));
        assert_eq!("center OFF".parse(), Ok(ConsoleCommand::Center(false)));
    }

    #[test]
    fn rejects_malformed_commands() {
        for line in ["", "iterations 0", "iterations x", "channels", "map FL", "position ", "starting", "reference maybe"] {
            assert!(line.parse::<ConsoleCommand>().is_err(), "{line:?} parsed");
        }
    }

    #[test]
    fn configure_then_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let rew = DummyRew::default();
        let mut session = session(&rew, &["C"]);

        let out = run_script(
            &mut session,
            "channels FL,FR,SW1,SW2\nmap SW2 SW1\niterations 2\nposition Couch\ncenter on\nsave\nstatus\nbogus\nquit\n",
            &path,
        );

        let config = session.config();
        assert_eq!(config.iterations, 2);
        assert_eq!(config.position, "Couch");
        assert!(config.center_microphone);
        assert_eq!(config.channels.audio_for("SW2"), "SW1");
        assert_eq!(read_settings(&path).unwrap(), config.channels);

        assert!(out.contains("Progress: 0/"));
        assert!(out.contains("Unknown command 'bogus'"));
        assert!(out.contains("Bye"));
        // Settings check, two distance sweeps and the centering check, then
        // 4 channels twice.
        assert_eq!(lock(&session.schedule()).len(), 1 + 3 + 8);
    }

    #[test]
    fn run_finishes_after_input_closes() {
        let rew = DummyRew::default();
        let mut session = session(&rew, &["C", "FL"]);
        let out = run_script(&mut session, "start\n", Path::new("unused.json"));

        assert!(out.contains("Measurement started"));
        assert!(out.contains("Measurement Completed"));
        assert_eq!(session.state(), WorkflowState::Completed);
        assert_eq!(rew.titles().len(), 2);
    }

    #[test]
    fn unanswerable_prompt_cancels() {
        let rew = DummyRew::builder().offline_checks(1).build();
        let mut session = session(&rew, &["C"]);
        let out = run_script(&mut session, "start\n", Path::new("unused.json"));

        assert!(out.contains("Measurement Cancelled"));
        assert!(rew.titles().is_empty());
    }
}
