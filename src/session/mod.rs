//! One document bound to one coqtop connection.

mod controller;
pub mod view;

use serde::{Deserialize, Serialize};

pub use controller::Session;
pub use view::{
    Highlight, HighlightClass, MessageEntry, ParseProblem, Snapshot, VisibilityMode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Waiting for the answer to `Init`.
    Starting,
    Ready,
    /// The connection failed; the session must be recreated.
    Broken,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Blocked,
    Timeout,
    Fatal,
}

/// Out-of-band condition the editor should show to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}
