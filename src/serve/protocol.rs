//! Newline-delimited JSON spoken with the editor plugin on stdio.

use serde::{Deserialize, Serialize};

use crate::{
    session::{MessageEntry, NotificationKind, Snapshot, VisibilityMode},
    text::Position,
};

/// Which buffer-level event the editor reports for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditorEvent {
    Focus,
    Unfocus,
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRange {
    pub start: Position,
    pub end: Position,
}

/// Commands read from the editor, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum EditorCommand {
    NewSession { doc: String, text: String },
    CloseSession { doc: String },
    Forward { doc: String },
    Backward { doc: String },
    ToCursor { doc: String, position: Position },
    /// Incremental change: `range` of the previous text becomes `text`.
    Edit {
        doc: String,
        range: EditRange,
        text: String,
    },
    /// Full resynchronization of the buffer text.
    SetText { doc: String, text: String },
    Event { doc: String, kind: EditorEvent },
    GoalVisibility { mode: VisibilityMode },
    MessageVisibility { mode: VisibilityMode },
    ClearMessages { doc: String },
    RedrawGoals,
    RedrawMessages,
    ProcessFeedbacks,
    Shutdown,
}

/// Events written to the editor, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Snapshot {
        doc: String,
        snapshot: Snapshot,
    },
    Goals {
        doc: String,
        text: String,
    },
    Messages {
        doc: String,
        entries: Vec<MessageEntry>,
    },
    Visibility {
        show_goals: bool,
        show_messages: bool,
    },
    Notification {
        doc: String,
        kind: NotificationKind,
        message: String,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_editor_commands() {
        let cmd: EditorCommand =
            serde_json::from_str(r#"{"cmd":"to_cursor","doc":"a.v","position":{"line":3,"character":7}}"#)
                .unwrap();
        assert_eq!(
            cmd,
            EditorCommand::ToCursor {
                doc: "a.v".to_string(),
                position: Position::new(3, 7),
            }
        );
        let cmd: EditorCommand = serde_json::from_str(
            r#"{"cmd":"edit","doc":"a.v","range":{"start":{"line":0,"character":1},"end":{"line":0,"character":2}},"text":"x"}"#,
        )
        .unwrap();
        assert!(matches!(cmd, EditorCommand::Edit { ref text, .. } if text == "x"));
        let cmd: EditorCommand =
            serde_json::from_str(r#"{"cmd":"goal_visibility","mode":"toggle"}"#).unwrap();
        assert_eq!(
            cmd,
            EditorCommand::GoalVisibility {
                mode: VisibilityMode::Toggle
            }
        );
        let cmd: EditorCommand =
            serde_json::from_str(r#"{"cmd":"event","doc":"a.v","kind":"focus"}"#).unwrap();
        assert!(matches!(
            cmd,
            EditorCommand::Event {
                kind: EditorEvent::Focus,
                ..
            }
        ));
        assert!(serde_json::from_str::<EditorCommand>(r#"{"cmd":"launch"}"#).is_err());
    }

    #[test]
    fn test_event_json_shape() {
        let event = EngineEvent::Notification {
            doc: "a.v".to_string(),
            kind: NotificationKind::Blocked,
            message: "Fix the error first".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"event":"notification","doc":"a.v","kind":"blocked","message":"Fix the error first"}"#
        );
    }
}
