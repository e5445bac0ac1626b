//! Coqtop XML protocol types, codec and process channel.
//!
//! Coqtop (`coqtop -ideslave` / `coqidetop`) answers each `<call>` with a
//! `<value>` in request order and interleaves unsolicited `<feedback>`
//! elements about states it already accepted:
//! - `Init` - obtain the blank initial state id
//! - `Add` - submit one sentence on top of a state id
//! - `Edit_at` - roll back to an earlier state id
//! - `Goal` - fetch the goals at the current tip

mod channel;
pub mod codec;
pub mod xml;

pub use channel::ProverChannel;
pub use codec::{decode_frame, CoqtopCodec};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Coqtop's handle to a point in its proof-state history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub u32);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Byte range reported by coqtop, relative to the start of the sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub start: usize,
    pub stop: usize,
}

impl Location {
    pub const fn is_empty(&self) -> bool {
        self.start >= self.stop
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
}

impl MessageLevel {
    pub fn parse(level: &str) -> Option<Self> {
        Some(match level {
            "debug" => Self::Debug,
            "info" => Self::Info,
            "notice" => Self::Notice,
            "warning" => Self::Warning,
            "error" => Self::Error,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub hypotheses: Vec<String>,
    pub goal: String,
}

/// Goals at the current tip, as returned by the `Goal` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goals {
    pub foreground: Vec<Goal>,
    /// Unfocused goals as (before, after) pairs, one per focusing level.
    pub background: Vec<(Vec<Goal>, Vec<Goal>)>,
    pub shelved: Vec<Goal>,
    pub given_up: Vec<Goal>,
}

/// Answer to `Edit_at` when the target lies inside an already closed proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusedProof {
    pub proof_state_id: StateId,
    pub qed_state_id: StateId,
    pub old_focused: StateId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProverStatus {
    pub path: Vec<String>,
    pub proof_name: Option<String>,
    pub all_proofs: Vec<String>,
    pub proof_number: i64,
}

/// Outgoing protocol call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Init,
    Add {
        command: String,
        edit_id: i64,
        state_id: StateId,
        verbose: bool,
    },
    EditAt(StateId),
    Goal,
    Status,
    Quit,
}

/// Which call a response answers; responses are decoded against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Init,
    Add,
    EditAt,
    Goal,
    Status,
    Quit,
}

impl Call {
    pub const fn kind(&self) -> CallKind {
        match self {
            Self::Init => CallKind::Init,
            Self::Add { .. } => CallKind::Add,
            Self::EditAt(_) => CallKind::EditAt,
            Self::Goal => CallKind::Goal,
            Self::Status => CallKind::Status,
            Self::Quit => CallKind::Quit,
        }
    }
}

/// Decoded successful answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Init(StateId),
    Add {
        state_id: StateId,
        closed_proof: Option<StateId>,
        message: String,
    },
    EditAt(Option<FocusedProof>),
    Goal(Option<Goals>),
    Status(ProverStatus),
    Quit,
}

/// A `<value val="fail">` answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub state_id: StateId,
    pub location: Option<Location>,
    pub message: String,
}

impl From<Failure> for EngineError {
    fn from(failure: Failure) -> Self {
        Self::ProtocolReject {
            message: failure.message,
            location: failure.location,
        }
    }
}

/// A `<value>` whose payload is interpreted once the matching call is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Good(xml::Element),
    Fail(Failure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackContent {
    AddedAxiom,
    Processed,
    Incomplete,
    InProgress(i64),
    ProcessingIn(String),
    ErrorMsg {
        location: Option<Location>,
        message: String,
    },
    Message {
        level: MessageLevel,
        location: Option<Location>,
        text: String,
    },
    FileDependency {
        source: Option<String>,
        dependency: String,
    },
    FileLoaded {
        module: String,
        vo_file: String,
    },
    Unknown(String),
}

/// Unsolicited `<feedback>` about a state coqtop already accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub state_id: StateId,
    pub content: FeedbackContent,
}

/// One decoded frame read from coqtop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Response(Response),
    Feedback(Feedback),
}

/// The session's view of a prover connection.
///
/// `send` never blocks and `try_recv` never waits; frames come back in the
/// order coqtop wrote them.
pub trait Transport {
    fn send(&mut self, call: Call) -> Result<(), EngineError>;

    /// Next available frame, `Ok(None)` if nothing arrived yet.
    fn try_recv(&mut self) -> Result<Option<Inbound>, EngineError>;

    /// Stop talking to the prover and terminate it.
    fn close(&mut self);
}
