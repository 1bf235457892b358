//! The terminal dashboard: schedule, progress, log and prompts, plus a small
//! configuration editor.

mod app;
mod error;
mod ui;

pub use error::TuiError;

use crate::{
    observer::WorkflowEvent, rew::MeasurementTool, session::MeasurementSession,
    workflow::SweepDriver,
};
use app::App;
use crossterm::{
    event::{self, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{prelude::*, Terminal};
use std::{
    io::stdout,
    path::Path,
    sync::mpsc::{Receiver, TryRecvError},
    time::Duration,
};

/// Take over the terminal and run the dashboard until the user quits.
///
/// `events` must be the receiving end of the session's event channel. A run
/// still active on quit is stopped and waited for.
pub fn run_tui<T, S>(
    session: &mut MeasurementSession<T, S>,
    events: &Receiver<WorkflowEvent>,
    settings_path: &Path,
) -> Result<(), TuiError>
where
    T: MeasurementTool + Send + 'static,
    S: SweepDriver + Send + 'static,
{
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let mut app = App::new(settings_path);
    let res = event_loop(&mut terminal, &mut app, session, events);
    // Dropping the app drops any unanswered prompt.
    drop(app);
    if session.stop() {
        session.wait();
    }

    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    res
}

fn event_loop<B, T, S>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    session: &mut MeasurementSession<T, S>,
    events: &Receiver<WorkflowEvent>,
) -> Result<(), TuiError>
where
    B: Backend,
    T: MeasurementTool + Send + 'static,
    S: SweepDriver + Send + 'static,
{
    while !app.quit {
        loop {
            match events.try_recv() {
                Ok(event) => app.on_workflow(event, session),
                Err(TryRecvError::Empty) => break,
                Err(e) => return Err(e.into()),
            }
        }
        app.refresh(session);

        terminal.draw(|frame| ui::draw(frame, app))?;

        if event::poll(Duration::from_millis(16))? {
            if let event::Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.on_key(key.code, session);
                }
            }
        }
    }
    Ok(())
}
