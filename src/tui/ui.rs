use super::app::{App, Mode};
use crate::{
    channel::CANONICAL_ORDER,
    schedule::{MeasurementStep, StepStatus},
    workflow::WorkflowState,
};
use ratatui::{
    prelude::*,
    widgets::{
        block::{Position, Title},
        *,
    },
};

fn status_color(status: StepStatus) -> Color {
    match status {
        StepStatus::NotStarted => Color::DarkGray,
        StepStatus::InProgress => Color::Yellow,
        StepStatus::Completed => Color::Green,
        StepStatus::Retrying => Color::Magenta,
        StepStatus::Failed => Color::Red,
    }
}

fn state_color(state: WorkflowState) -> Color {
    match state {
        WorkflowState::Running => Color::Yellow,
        WorkflowState::Paused => Color::Cyan,
        WorkflowState::Completed => Color::Green,
        WorkflowState::Cancelled | WorkflowState::Failed => Color::Red,
        WorkflowState::Idle => Color::White,
    }
}

fn instructions(app: &App) -> Title<'static> {
    let keys: &[(&str, &str)] = if app.prompt.is_some() {
        &[(" Continue ", "<Enter>"), (" Stop ", "<X>"), (" Quit ", "<Q> ")]
    } else {
        match app.mode {
            Mode::Dashboard => &[
                (" Start ", "<S>"),
                (" Pause ", "<P>"),
                (" Stop ", "<X>"),
                (" Configure ", "<C>"),
                (" Quit ", "<Q> "),
            ],
            Mode::Configure => &[
                (" Toggle ", "<Space>"),
                (" Reference ", "<R>"),
                (" Mic ", "<M>"),
                (" Iterations ", "<+>/<->"),
                (" Position ", "<N>"),
                (" Save ", "<W>"),
                (" Apply ", "<Enter>"),
                (" Cancel ", "<Esc> "),
            ],
            Mode::EditPosition(_) => &[(" Done ", "<Enter>"), (" Cancel ", "<Esc> ")],
        }
    };
    let spans: Vec<Span> = keys
        .iter()
        .flat_map(|(what, key)| [(*what).into(), key.magenta().bold()])
        .collect();
    Title::from(Line::from(spans))
}

/// Draw the whole screen.
pub fn draw(frame: &mut Frame, app: &App) {
    let title = Title::from(" autosweep ".magenta().bold());
    let outer = Block::default()
        .title(title.alignment(Alignment::Center))
        .title(
            instructions(app)
                .alignment(Alignment::Center)
                .position(Position::Bottom),
        )
        .borders(Borders::ALL);
    let area = frame.size();
    let inner = outer.inner(area);
    frame.render_widget(outer, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(4)])
        .split(inner);
    draw_progress(frame, app, rows[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(rows[1]);
    match app.mode {
        Mode::Dashboard => draw_schedule(frame, &app.steps, columns[0]),
        Mode::Configure | Mode::EditPosition(_) => draw_configure(frame, app, columns[0]),
    }
    draw_log(frame, app, columns[1]);

    if let Some(prompt) = &app.prompt {
        draw_prompt(frame, &prompt.message, area);
    }
}

fn draw_progress(frame: &mut Frame, app: &App, area: Rect) {
    let (done, total) = app.progress();
    let ratio = if total == 0 {
        0.0
    } else {
        done as f64 / total as f64
    };
    let title = Line::from(vec![
        " State: ".into(),
        Span::styled(
            app.state.to_string(),
            Style::default().fg(state_color(app.state)).bold(),
        ),
        " ".into(),
    ]);
    let gauge = Gauge::default()
        .block(Block::default().title(title).borders(Borders::ALL))
        .gauge_style(Style::default().fg(Color::Magenta))
        .ratio(ratio)
        .label(format!("{done}/{total}"));
    frame.render_widget(gauge, area);
}

fn draw_schedule(frame: &mut Frame, steps: &[MeasurementStep], area: Rect) {
    let header = Row::new(["#", "Step", "Channel", "Audio", "Iter", "Status"])
        .style(Style::default().fg(Color::Magenta).bold());
    let rows = steps.iter().enumerate().map(|(i, step)| {
        Row::new([
            Cell::from((i + 1).to_string()),
            Cell::from(step.description.to_string()),
            Cell::from(step.channel.clone().unwrap_or_default()),
            Cell::from(step.audio_file.clone().unwrap_or_default()),
            Cell::from(step.iteration.to_string()),
            Cell::from(step.status.to_string()).style(Style::default().fg(status_color(step.status))),
        ])
    });
    let widths = [
        Constraint::Length(3),
        Constraint::Min(16),
        Constraint::Length(8),
        Constraint::Length(6),
        Constraint::Length(10),
        Constraint::Length(12),
    ];
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().title(" Schedule ").borders(Borders::ALL));
    frame.render_widget(table, area);
}

fn draw_configure(frame: &mut Frame, app: &App, area: Rect) {
    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let channels = &app.draft.channels;
    let items = CANONICAL_ORDER.iter().map(|&c| {
        if channels.is_selected(c) {
            let audio = channels.audio_for(c);
            if audio == c {
                format!("[x] {c}")
            } else {
                format!("[x] {c} -> {audio}")
            }
        } else {
            format!("[ ] {c}")
        }
    });
    let list = List::new(items)
        .style(Style::default().fg(Color::White))
        .highlight_symbol(">>")
        .highlight_style(Style::default().fg(Color::Magenta))
        .block(Block::default().title(" Channels ").borders(Borders::ALL));
    let mut list_state = ListState::default().with_selected(Some(app.cursor));
    frame.render_stateful_widget(list, halves[0], &mut list_state);

    let on_off = |on: bool| if on { "on" } else { "off" };
    let position = match &app.mode {
        Mode::EditPosition(text) => Span::styled(format!("{text}_"), Style::default().fg(Color::Magenta)),
        _ => Span::raw(app.draft.position.clone()),
    };
    let options = Paragraph::new(vec![
        Line::from(format!("Reference:     {}", on_off(app.draft.reference))),
        Line::from(format!("Mic centering: {}", on_off(app.draft.center_microphone))),
        Line::from(format!("Iterations:    {}", app.draft.iterations)),
        Line::from(vec!["Position:      ".into(), position]),
    ])
    .block(Block::default().title(" Options ").borders(Borders::ALL));
    frame.render_widget(options, halves[1]);
}

fn draw_log(frame: &mut Frame, app: &App, area: Rect) {
    let height = area.height.saturating_sub(2) as usize;
    let skip = app.log.len().saturating_sub(height);
    let lines = app
        .log
        .iter()
        .skip(skip)
        .map(|line| ListItem::new(line.as_str()));
    let list = List::new(lines).block(Block::default().title(" Log ").borders(Borders::ALL));
    frame.render_widget(list, area);
}

fn draw_prompt(frame: &mut Frame, message: &str, area: Rect) {
    let width = (area.width * 3 / 5).max(20).min(area.width);
    let height = 7.min(area.height);
    let popup = Rect::new(
        area.x + (area.width - width) / 2,
        area.y + (area.height - height) / 2,
        width,
        height,
    );
    let block = Block::default()
        .title(Title::from(" Action required ".magenta().bold()).alignment(Alignment::Center))
        .title(
            Title::from(Line::from(vec![" Continue ".into(), "<Enter> ".magenta().bold()]))
                .alignment(Alignment::Center)
                .position(Position::Bottom),
        )
        .borders(Borders::ALL);
    let text = Paragraph::new(message.to_owned())
        .wrap(Wrap { trim: true })
        .block(block);
    frame.render_widget(Clear, popup);
    frame.render_widget(text, popup);
}
