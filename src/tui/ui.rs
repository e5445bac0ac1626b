//! UI rendering for the viewer.

use ratatui::{
    layout::{Constraint, Layout, Rect},
    prelude::*,
    widgets::{Block, Borders, Paragraph, Wrap},
};

use super::app::{App, Pane};
use crate::{
    coqtop::MessageLevel,
    session::{MessageEntry, SessionStatus},
    tui_ipc::{socket_path, ViewerState},
};

pub fn render(frame: &mut Frame, app: &App) {
    let [main_area, help_area] =
        Layout::vertical([Constraint::Fill(1), Constraint::Length(1)]).areas(frame.area());

    render_main(frame, app, main_area);
    render_help(frame, help_area);
}

fn render_main(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" coq-tui ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    if !app.connected {
        let text = Paragraph::new(format!("Connecting to {}...", socket_path().display()));
        frame.render_widget(text, inner);
        return;
    }

    let [header_area, content_area] =
        Layout::vertical([Constraint::Length(2), Constraint::Fill(1)]).areas(inner);

    render_header(frame, app, header_area);

    let Some(state) = &app.state else {
        let idle = Paragraph::new("No focused document")
            .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(idle, content_area);
        return;
    };

    match (state.show_goals, state.show_messages) {
        (true, true) => {
            let [goals_area, messages_area] =
                Layout::vertical([Constraint::Percentage(65), Constraint::Percentage(35)])
                    .areas(content_area);
            render_goals(frame, app, state, goals_area);
            render_messages(frame, app, &state.messages, messages_area);
        }
        (true, false) => render_goals(frame, app, state, content_area),
        (false, true) => render_messages(frame, app, &state.messages, content_area),
        (false, false) => {
            let hidden = Paragraph::new("Goals and messages are hidden")
                .style(Style::default().fg(Color::DarkGray));
            frame.render_widget(hidden, content_area);
        }
    }
}

const fn status_style(status: SessionStatus) -> (&'static str, Color) {
    match status {
        SessionStatus::Starting => ("starting", Color::Yellow),
        SessionStatus::Ready => ("ready", Color::Green),
        SessionStatus::Broken => ("broken", Color::Red),
        SessionStatus::Closed => ("closed", Color::DarkGray),
    }
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let mut spans = Vec::new();
    if let Some(state) = &app.state {
        let (label, color) = status_style(state.status);
        spans.push(Span::raw("File: "));
        spans.push(Span::styled(state.doc.clone(), Style::default().fg(Color::Green)));
        spans.push(Span::raw("  coqtop: "));
        spans.push(Span::styled(label, Style::default().fg(color)));
        if state.busy {
            spans.push(Span::styled(" (busy)", Style::default().fg(Color::Yellow)));
        }
    }
    if let Some(error) = &app.error {
        spans.push(Span::styled(
            format!("  Error: {error}"),
            Style::default().fg(Color::Red),
        ));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn pane_block(title: &'static str, active: bool) -> Block<'static> {
    let color = if active { Color::Cyan } else { Color::DarkGray };
    Block::default()
        .title(title)
        .borders(Borders::TOP)
        .border_style(Style::default().fg(color))
}

fn render_goals(frame: &mut Frame, app: &App, state: &ViewerState, area: Rect) {
    let lines: Vec<Line> = state
        .goals
        .lines()
        .map(|line| {
            if line.starts_with("____") {
                Line::from(line.to_string()).style(Style::default().fg(Color::DarkGray))
            } else {
                Line::from(line.to_string())
            }
        })
        .collect();
    let goals = Paragraph::new(Text::from(lines))
        .block(pane_block(" Goals ", app.pane == Pane::Goals))
        .scroll((app.goals_scroll, 0));
    frame.render_widget(goals, area);
}

const fn level_color(level: MessageLevel) -> Color {
    match level {
        MessageLevel::Error => Color::Red,
        MessageLevel::Warning => Color::Yellow,
        MessageLevel::Notice | MessageLevel::Info => Color::White,
        MessageLevel::Debug => Color::DarkGray,
    }
}

fn render_messages(frame: &mut Frame, app: &App, messages: &[MessageEntry], area: Rect) {
    let lines: Vec<Line> = messages
        .iter()
        .flat_map(|entry| {
            let style = Style::default().fg(level_color(entry.level));
            entry
                .text
                .lines()
                .map(move |line| Line::from(line.to_string()).style(style))
        })
        .collect();
    let messages = Paragraph::new(Text::from(lines))
        .block(pane_block(" Messages ", app.pane == Pane::Messages))
        .wrap(Wrap { trim: false })
        .scroll((app.messages_scroll, 0));
    frame.render_widget(messages, area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let help = Line::from(vec![
        Span::styled("g", Style::default().fg(Color::Cyan)),
        Span::raw(": goals  "),
        Span::styled("m", Style::default().fg(Color::Cyan)),
        Span::raw(": messages  "),
        Span::styled("c", Style::default().fg(Color::Cyan)),
        Span::raw(": clear  "),
        Span::styled("Tab j/k", Style::default().fg(Color::Cyan)),
        Span::raw(": scroll  "),
        Span::styled("q", Style::default().fg(Color::Cyan)),
        Span::raw(": quit"),
    ]);
    frame.render_widget(Paragraph::new(help), area);
}
