//! Render state derived from a session: highlights, goal text and messages.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use super::SessionStatus;
use crate::{
    coqtop::{Goal, Goals, MessageLevel},
    document::{Document, SentenceState, Validity},
    text::{offset_to_position, Position},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightClass {
    /// Sent to coqtop, not checked yet.
    Sent,
    Axiom,
    Verified,
    Error,
    /// The located part of an error inside its sentence.
    ErrorPart,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    pub range: Range<usize>,
    pub start: Position,
    pub end: Position,
    pub class: HighlightClass,
}

impl Highlight {
    fn new(text: &str, range: Range<usize>, class: HighlightClass) -> Self {
        Self {
            start: offset_to_position(text, range.start),
            end: offset_to_position(text, range.end),
            range,
            class,
        }
    }
}

/// Highlights for the locked prefix, in document order.
pub fn highlights(doc: &Document) -> Vec<Highlight> {
    let text = doc.text();
    let mut out = Vec::new();
    for sentence in doc.live_locked() {
        let class = match &sentence.state {
            SentenceState::Unprocessed => continue,
            SentenceState::Pending => HighlightClass::Sent,
            SentenceState::Valid(Validity::AxiomDependent) => HighlightClass::Axiom,
            SentenceState::Valid(Validity::Ordinary) if sentence.processed => {
                HighlightClass::Verified
            }
            SentenceState::Valid(Validity::Ordinary) => HighlightClass::Sent,
            SentenceState::Error { range, .. } => {
                out.push(Highlight::new(text, sentence.span(), HighlightClass::Error));
                if range.len() < sentence.text.len() {
                    let part = sentence.start + range.start..sentence.start + range.end;
                    out.push(Highlight::new(text, part, HighlightClass::ErrorPart));
                }
                continue;
            }
        };
        out.push(Highlight::new(text, sentence.span(), class));
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub level: MessageLevel,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityMode {
    Show,
    Hide,
    Toggle,
}

impl VisibilityMode {
    pub const fn apply(self, visible: bool) -> bool {
        match self {
            Self::Show => true,
            Self::Hide => false,
            Self::Toggle => !visible,
        }
    }
}

const SEPARATOR: &str = "_______________________";

fn push_goal(lines: &mut Vec<String>, goal: &Goal, index: usize, total: usize) {
    lines.push(format!("{SEPARATOR} ({index}/{total})"));
    lines.extend(goal.goal.lines().map(str::to_string));
}

/// Goal panel text. The hypotheses shown are those of the first goal.
pub fn render_goals(goals: Option<&Goals>) -> String {
    let Some(goals) = goals else {
        return "No subgoals.".to_string();
    };
    let mut lines = Vec::new();
    let focused = goals.foreground.len();
    if focused == 0 {
        let unfocused: Vec<&Goal> = goals
            .background
            .iter()
            .flat_map(|(before, after)| before.iter().chain(after))
            .collect();
        if unfocused.is_empty() {
            lines.push("No more subgoals.".to_string());
        } else {
            lines.push(
                "This subproof is complete, but there are some unfocused goals:".to_string(),
            );
            lines.push(String::new());
            for (i, goal) in unfocused.iter().enumerate() {
                push_goal(&mut lines, goal, i + 1, unfocused.len());
            }
        }
    } else {
        lines.push(if focused == 1 {
            "1 subgoal".to_string()
        } else {
            format!("{focused} subgoals")
        });
        for hypothesis in &goals.foreground[0].hypotheses {
            lines.extend(hypothesis.lines().map(str::to_string));
        }
        for (i, goal) in goals.foreground.iter().enumerate() {
            push_goal(&mut lines, goal, i + 1, focused);
        }
    }
    lines.join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseProblem {
    pub position: Position,
    pub message: String,
}

/// Everything an editor or viewer needs to draw one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub status: SessionStatus,
    pub busy: bool,
    pub highlights: Vec<Highlight>,
    /// End of the locked prefix.
    pub locked_end: Position,
    pub goals: String,
    pub messages: Vec<MessageEntry>,
    pub parse_error: Option<ParseProblem>,
}
