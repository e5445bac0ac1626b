use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::session::{MessageEntry, SessionStatus, VisibilityMode};

/// Returns the path to the Unix socket for IPC.
pub fn socket_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("coq-tui/coq-tui.sock")
}

/// What the viewer shows for the focused document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerState {
    pub doc: String,
    pub status: SessionStatus,
    pub busy: bool,
    /// Rendered goal text, empty while goals are hidden.
    pub goals: String,
    /// Empty while messages are hidden.
    pub messages: Vec<MessageEntry>,
    pub show_goals: bool,
    pub show_messages: bool,
}

/// Messages sent from the engine to viewers over the Unix socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    Connected,
    State(ViewerState),
    /// No document has focus.
    Idle,
    Error {
        error: String,
    },
}

/// Commands sent from viewers to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    GoalVisibility { mode: VisibilityMode },
    MessageVisibility { mode: VisibilityMode },
    /// Clear the message log of the focused document.
    ClearMessages,
}
