//! Terminal viewer for the goals and messages of the focused document.

pub mod app;
mod ui;

use std::io::{stdout, Stdout};

use app::App;
use crossterm::{
    event::EventStream,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use futures::StreamExt;
use ratatui::prelude::*;

use crate::{
    error::Result,
    tui_ipc::{connect_to_engine, socket_path, Incoming},
};

type Screen = Terminal<CrosstermBackend<Stdout>>;

/// Run the viewer until the user quits. The terminal is restored even when
/// drawing fails.
pub async fn run() -> Result<()> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let result = match Terminal::new(CrosstermBackend::new(stdout())) {
        Ok(mut screen) => event_loop(&mut screen).await,
        Err(e) => Err(e.into()),
    };
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    result
}

async fn event_loop(screen: &mut Screen) -> Result<()> {
    let mut link = connect_to_engine(socket_path());
    let mut app = App::default();
    let mut terminal_events = EventStream::new();

    while !app.should_exit {
        screen.draw(|frame| ui::render(frame, &app))?;

        // Resizes arrive as terminal events, so every redraw has a cause.
        tokio::select! {
            Some(incoming) = link.incoming.recv() => match incoming {
                Incoming::Message(msg) => app.handle_message(msg),
                Incoming::EngineLost => app.engine_lost(),
            },
            Some(Ok(event)) = terminal_events.next() => app.handle_event(&event),
            else => break,
        }

        for command in app.take_commands() {
            if link.commands.send(command).await.is_err() {
                app.should_exit = true;
            }
        }
    }
    Ok(())
}
