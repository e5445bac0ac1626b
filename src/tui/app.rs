//! Application state for the viewer.

use std::mem;

use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::{
    session::VisibilityMode,
    tui_ipc::{Command, Message, ViewerState},
};

/// Which pane scrolls with j/k.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Pane {
    #[default]
    Goals,
    Messages,
}

#[derive(Default)]
pub struct App {
    /// Latest state of the focused document, if any.
    pub state: Option<ViewerState>,
    pub error: Option<String>,
    /// Whether connected to the engine.
    pub connected: bool,
    pub should_exit: bool,
    pub pane: Pane,
    pub goals_scroll: u16,
    pub messages_scroll: u16,
    outgoing_commands: Vec<Command>,
}

impl App {
    /// Queue a command to be sent to the engine.
    pub fn queue_command(&mut self, cmd: Command) {
        self.outgoing_commands.push(cmd);
    }

    /// Take all queued commands.
    pub fn take_commands(&mut self) -> Vec<Command> {
        mem::take(&mut self.outgoing_commands)
    }

    pub fn handle_message(&mut self, msg: Message) {
        self.connected = true;
        match msg {
            Message::Connected => self.error = None,
            Message::State(state) => {
                let same_doc = self.state.as_ref().is_some_and(|s| s.doc == state.doc);
                let goals_changed = self.state.as_ref().is_none_or(|s| s.goals != state.goals);
                if !same_doc || goals_changed {
                    self.goals_scroll = 0;
                }
                if !same_doc {
                    self.messages_scroll = 0;
                }
                self.state = Some(state);
                self.error = None;
            }
            Message::Idle => self.state = None,
            Message::Error { error } => self.error = Some(error),
        }
    }

    /// The engine went away; show the connecting screen until it is back.
    pub fn engine_lost(&mut self) {
        self.connected = false;
        self.state = None;
        self.error = None;
    }

    pub fn handle_event(&mut self, event: &Event) {
        if let Event::Key(key) = event {
            if key.kind == KeyEventKind::Press {
                self.handle_key(*key);
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_exit = true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_exit = true;
            }
            KeyCode::Char('g') => self.queue_command(Command::GoalVisibility {
                mode: VisibilityMode::Toggle,
            }),
            KeyCode::Char('m') => self.queue_command(Command::MessageVisibility {
                mode: VisibilityMode::Toggle,
            }),
            KeyCode::Char('c') => self.queue_command(Command::ClearMessages),
            KeyCode::Tab => {
                self.pane = match self.pane {
                    Pane::Goals => Pane::Messages,
                    Pane::Messages => Pane::Goals,
                };
            }
            KeyCode::Char('j') | KeyCode::Down => self.scroll(1),
            KeyCode::Char('k') | KeyCode::Up => self.scroll(-1),
            _ => {}
        }
    }

    fn scroll(&mut self, delta: i16) {
        let offset = match self.pane {
            Pane::Goals => &mut self.goals_scroll,
            Pane::Messages => &mut self.messages_scroll,
        };
        *offset = offset.saturating_add_signed(delta);
    }
}
