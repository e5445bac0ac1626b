use std::{collections::VecDeque, mem, time::Instant};

use tracing::{debug, error, info, warn};

use super::{
    view::{self, MessageEntry, ParseProblem, Snapshot},
    Notification, NotificationKind, SessionStatus,
};
use crate::{
    config::{AxiomPolicy, SessionConfig},
    coqtop::{
        codec::decode_reply, Call, CallKind, Feedback, FeedbackContent, Goals, Inbound,
        Location, MessageLevel, ProverStatus, Reply, Response, Transport,
    },
    document::{Document, Reconciliation, SentenceId, SentenceState, Validity},
    error::EngineError,
    text::{offset_to_position, position_to_offset, Position},
};

/// Coqtop ignores edit ids for plain `Add` calls.
const EDIT_ID: i64 = -1;

/// Queued navigation, waiting for the in-flight slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    /// Add this many more sentences.
    Forward(usize),
    /// Make the locked prefix exactly the sentences ending at or before the offset.
    Cursor(usize),
    /// Remove this many sentences from the end of the locked prefix.
    Backward(usize),
    /// Rewind before a sentence invalidated by an edit.
    Rewind(SentenceId),
}

impl Op {
    const fn advances(self) -> bool {
        matches!(self, Self::Forward(_) | Self::Cursor(_))
    }
}

/// The request occupying the single in-flight slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Init,
    Add(SentenceId),
    /// Rollback; sentences from the id on are truncated once coqtop agrees.
    EditAt(Option<SentenceId>),
    Goal,
    Status,
    Quit,
}

impl Request {
    const fn kind(self) -> CallKind {
        match self {
            Self::Init => CallKind::Init,
            Self::Add(_) => CallKind::Add,
            Self::EditAt(_) => CallKind::EditAt,
            Self::Goal => CallKind::Goal,
            Self::Status => CallKind::Status,
            Self::Quit => CallKind::Quit,
        }
    }
}

#[derive(Debug)]
struct InFlight {
    request: Request,
    sent_at: Instant,
    timed_out: bool,
}

/// Outcome of looking at the operation at the head of the queue.
enum Step {
    /// A request went out; the operation may still have work left.
    Sent,
    /// The operation is finished and was removed from the queue.
    Done,
}

/// Navigation state machine for one document.
///
/// Every call is non-blocking: navigation is queued, at most one request is
/// outstanding at any time, and [`Session::process_feedbacks`] applies
/// whatever coqtop has answered so far.
pub struct Session<T: Transport> {
    transport: T,
    config: SessionConfig,
    doc: Document,
    status: SessionStatus,
    fatal: Option<EngineError>,
    in_flight: Option<InFlight>,
    queue: VecDeque<Op>,
    goals_stale: bool,
    goals: Option<Goals>,
    prover_status: Option<ProverStatus>,
    messages: Vec<MessageEntry>,
    notifications: Vec<Notification>,
}

impl<T: Transport> Session<T> {
    /// Bind `text` to a prover connection and send `Init`.
    pub fn new(transport: T, text: impl Into<String>, config: SessionConfig) -> Self {
        let mut session = Self {
            transport,
            config,
            doc: Document::new(text),
            status: SessionStatus::Starting,
            fatal: None,
            in_flight: None,
            queue: VecDeque::new(),
            goals_stale: false,
            goals: None,
            prover_status: None,
            messages: Vec::new(),
            notifications: Vec::new(),
        };
        session.send(Request::Init, Call::Init);
        session
    }

    pub const fn status(&self) -> SessionStatus {
        self.status
    }

    pub const fn document(&self) -> &Document {
        &self.doc
    }

    pub const fn goals(&self) -> Option<&Goals> {
        self.goals.as_ref()
    }

    pub const fn prover_status(&self) -> Option<&ProverStatus> {
        self.prover_status.as_ref()
    }

    pub fn messages(&self) -> &[MessageEntry] {
        &self.messages
    }

    /// Whether a request is outstanding or navigation is queued.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some() || !self.queue.is_empty() || self.goals_stale
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        mem::take(&mut self.notifications)
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }

    fn ensure_alive(&self) -> Result<(), EngineError> {
        match (&self.fatal, self.status) {
            (Some(e), _) => Err(e.clone()),
            (None, SessionStatus::Closed) => {
                Err(EngineError::InvalidOperation("session is closed".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Whether something already queued or in flight will move the locked
    /// prefix back.
    fn rewind_pending(&self) -> bool {
        matches!(
            self.in_flight,
            Some(InFlight {
                request: Request::EditAt(_),
                ..
            })
        ) || self
            .queue
            .iter()
            .any(|op| matches!(op, Op::Backward(_) | Op::Rewind(_) | Op::Cursor(_)))
    }

    /// Why the locked prefix cannot grow, if it cannot.
    fn blocked(&self) -> Option<EngineError> {
        let last = self.doc.live_locked().last()?;
        match last.state {
            SentenceState::Error { .. } => Some(EngineError::BlockedByError),
            SentenceState::Valid(Validity::AxiomDependent)
                if self.config.axiom_policy == AxiomPolicy::Block =>
            {
                Some(EngineError::BlockedByError)
            }
            _ => None,
        }
    }

    /// Send the next sentence.
    pub fn forward(&mut self) -> Result<(), EngineError> {
        self.ensure_alive()?;
        if let Some(e) = self.blocked() {
            if !self.rewind_pending() {
                return Err(e);
            }
        }
        match self.queue.back_mut() {
            Some(Op::Forward(n)) => *n += 1,
            _ => self.queue.push_back(Op::Forward(1)),
        }
        self.pump();
        Ok(())
    }

    /// Remove the last sentence of the locked prefix. A no-op when nothing is
    /// locked.
    pub fn backward(&mut self) -> Result<(), EngineError> {
        self.ensure_alive()?;
        let queued_forward = self.queue.iter().any(|op| op.advances());
        if self.doc.live_locked().is_empty() && !queued_forward && self.in_flight.is_none() {
            debug!("Nothing to step back over");
            return Ok(());
        }
        match self.queue.back_mut() {
            Some(Op::Backward(n)) => *n += 1,
            _ => self.queue.push_back(Op::Backward(1)),
        }
        self.pump();
        Ok(())
    }

    /// Move the locked prefix to the sentences ending at or before `position`.
    pub fn to_cursor(&mut self, position: Position) -> Result<(), EngineError> {
        self.ensure_alive()?;
        let offset = position_to_offset(self.doc.text(), position);
        // Absolute targets supersede queued relative navigation.
        self.queue.retain(|op| matches!(op, Op::Rewind(_)));
        self.queue.push_back(Op::Cursor(offset));
        self.pump();
        Ok(())
    }

    /// Replace `start..end` with `replacement` and reconcile the sentences.
    pub fn apply_edit(
        &mut self,
        start: Position,
        end: Position,
        replacement: &str,
    ) -> Result<Reconciliation, EngineError> {
        let text = self.doc.text();
        let range = position_to_offset(text, start)..position_to_offset(text, end);
        let outcome = self.doc.replace(range, replacement)?;
        self.after_edit(outcome);
        Ok(outcome)
    }

    /// Resynchronize with the full editor text.
    pub fn set_text(&mut self, text: &str) -> Reconciliation {
        let outcome = self.doc.set_text(text);
        self.after_edit(outcome);
        outcome
    }

    fn after_edit(&mut self, outcome: Reconciliation) {
        let Reconciliation::Rollback(id) = outcome else {
            return;
        };
        if self.ensure_alive().is_err() {
            return;
        }
        // The document never diverges later than an earlier rollback, so the
        // new one replaces it.
        self.queue.retain(|op| !matches!(op, Op::Rewind(_)));
        self.queue.push_front(Op::Rewind(id));
        self.pump();
    }

    /// Ask coqtop for its status. Answered through [`Self::prover_status`].
    pub fn request_status(&mut self) -> Result<(), EngineError> {
        self.ensure_alive()?;
        if self.in_flight.is_some() {
            return Err(EngineError::InvalidOperation(
                "a request is already outstanding".to_string(),
            ));
        }
        self.send(Request::Status, Call::Status);
        Ok(())
    }

    /// Apply everything coqtop sent since the last call, then send the next
    /// queued request. Returns whether anything visible changed.
    pub fn process_feedbacks(&mut self) -> bool {
        let mut changed = false;
        while self.fatal.is_none() && self.status != SessionStatus::Closed {
            match self.transport.try_recv() {
                Ok(Some(inbound)) => {
                    changed = true;
                    if let Err(e) = self.handle_inbound(inbound) {
                        self.fail(e);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    changed = true;
                    self.fail(e);
                }
            }
        }
        changed |= self.check_timeout();
        self.pump();
        changed
    }

    fn check_timeout(&mut self) -> bool {
        let Some(in_flight) = &mut self.in_flight else {
            return false;
        };
        let elapsed = in_flight.sent_at.elapsed();
        if in_flight.timed_out || elapsed < self.config.timeout {
            return false;
        }
        in_flight.timed_out = true;
        let e = EngineError::Timeout {
            elapsed_ms: elapsed.as_millis(),
        };
        warn!("{:?} request: {e}", in_flight.request);
        self.notify(NotificationKind::Timeout, e.to_string());
        true
    }

    /// Quit coqtop and release the connection.
    pub fn close(&mut self) {
        if self.status == SessionStatus::Closed {
            return;
        }
        if self.fatal.is_none() && self.in_flight.is_none() {
            self.send(Request::Quit, Call::Quit);
        }
        self.queue.clear();
        self.in_flight = None;
        self.status = SessionStatus::Closed;
        self.transport.close();
        info!("Session closed");
    }

    pub fn snapshot(&self) -> Snapshot {
        let text = self.doc.text();
        Snapshot {
            status: self.status,
            busy: self.is_busy(),
            highlights: view::highlights(&self.doc),
            locked_end: offset_to_position(text, self.doc.locked_end()),
            goals: view::render_goals(self.goals.as_ref()),
            messages: self.messages.clone(),
            parse_error: self.doc.parse_error().map(|e| ParseProblem {
                position: offset_to_position(text, e.offset()),
                message: e.to_string(),
            }),
        }
    }

    fn notify(&mut self, kind: NotificationKind, message: String) {
        self.notifications.push(Notification { kind, message });
    }

    fn log(&mut self, level: MessageLevel, text: String) {
        if text.is_empty() {
            return;
        }
        let entry = MessageEntry { level, text };
        // A failed call is often reported both as its answer and as feedback.
        if self.messages.last() != Some(&entry) {
            self.messages.push(entry);
        }
    }

    fn fail(&mut self, e: EngineError) {
        error!("Session broken: {e}");
        self.status = SessionStatus::Broken;
        self.in_flight = None;
        self.queue.clear();
        self.goals_stale = false;
        self.notify(NotificationKind::Fatal, e.to_string());
        self.fatal = Some(e);
        self.transport.close();
    }

    fn send(&mut self, request: Request, call: Call) {
        debug_assert!(self.in_flight.is_none(), "one request at a time");
        debug!("Sending {call:?}");
        match self.transport.send(call) {
            Ok(()) => {
                self.in_flight = Some(InFlight {
                    request,
                    sent_at: Instant::now(),
                    timed_out: false,
                });
            }
            Err(e) => self.fail(e),
        }
    }

    fn drop_advances(&mut self) {
        self.queue.retain(|op| !op.advances());
    }

    /// Send requests until one is in flight or nothing is left to do.
    fn pump(&mut self) {
        while self.in_flight.is_none() && self.status == SessionStatus::Ready {
            let Some(&op) = self.queue.front() else {
                if self.goals_stale {
                    self.goals_stale = false;
                    self.send(Request::Goal, Call::Goal);
                }
                return;
            };
            match self.step(op) {
                Ok(Step::Sent | Step::Done) => {}
                Err(e) => {
                    self.drop_advances();
                    if let EngineError::ParseAmbiguity { .. } = e {
                        self.log(MessageLevel::Error, e.to_string());
                    }
                    self.notify(NotificationKind::Blocked, e.to_string());
                }
            }
        }
    }

    fn pop(&mut self) -> Step {
        self.queue.pop_front();
        Step::Done
    }

    fn step(&mut self, op: Op) -> Result<Step, EngineError> {
        match op {
            Op::Forward(0) => Ok(self.pop()),
            Op::Forward(n) => {
                if let Some(e) = self.blocked() {
                    return Err(e);
                }
                let Some(id) = self.doc.extend_next()? else {
                    debug!("End of document reached");
                    return Ok(self.pop());
                };
                if let Some(Op::Forward(left)) = self.queue.front_mut() {
                    *left = n - 1;
                }
                if n == 1 {
                    self.queue.pop_front();
                }
                self.send_add(id)
            }
            Op::Cursor(offset) => {
                if let Some(index) = self.doc.first_locked_past(offset) {
                    return Ok(self.rewind_to(index));
                }
                if self.blocked().is_some() {
                    return Ok(self.pop());
                }
                match self.doc.extend_next()? {
                    Some(id) if self.doc.sentence(id).is_some_and(|s| s.end <= offset) => {
                        self.send_add(id)
                    }
                    _ => Ok(self.pop()),
                }
            }
            Op::Backward(n) => {
                self.queue.pop_front();
                let locked = self.doc.live_locked().len();
                if locked == 0 {
                    return Ok(Step::Done);
                }
                Ok(self.rewind_to(locked.saturating_sub(n)))
            }
            Op::Rewind(id) => {
                self.queue.pop_front();
                match self.doc.index_of(id) {
                    Some(index) => Ok(self.rewind_to(index)),
                    None => Ok(Step::Done),
                }
            }
        }
    }

    fn send_add(&mut self, id: SentenceId) -> Result<Step, EngineError> {
        let parent = self
            .doc
            .tip_state_id()
            .ok_or_else(|| EngineError::InvalidOperation("no initial state".to_string()))?;
        self.doc.mark_pending(id)?;
        let command = self
            .doc
            .sentence(id)
            .map(|s| s.text.clone())
            .unwrap_or_default();
        self.send(
            Request::Add(id),
            Call::Add {
                command,
                edit_id: EDIT_ID,
                state_id: parent,
                verbose: false,
            },
        );
        Ok(Step::Sent)
    }

    /// Roll coqtop back to the state before sentence `index`.
    fn rewind_to(&mut self, index: usize) -> Step {
        let Some(sentence) = self.doc.sentences().get(index) else {
            return Step::Done;
        };
        let id = sentence.id;
        match self.doc.state_id_before(index) {
            Some(target) => {
                self.send(Request::EditAt(Some(id)), Call::EditAt(target));
                Step::Sent
            }
            None => {
                self.doc.truncate_to(id);
                Step::Done
            }
        }
    }

    fn handle_inbound(&mut self, inbound: Inbound) -> Result<(), EngineError> {
        match inbound {
            Inbound::Response(response) => self.handle_response(response),
            Inbound::Feedback(feedback) => {
                self.handle_feedback(feedback);
                Ok(())
            }
        }
    }

    fn handle_response(&mut self, response: Response) -> Result<(), EngineError> {
        let Some(in_flight) = self.in_flight.take() else {
            return Err(EngineError::ProtocolDesync(
                "response without an outstanding request".to_string(),
            ));
        };
        let request = in_flight.request;
        if in_flight.timed_out {
            info!("Late answer to {request:?} arrived");
        }
        match response {
            Response::Good(payload) => {
                let reply = decode_reply(request.kind(), &payload)?;
                self.apply_reply(request, reply)
            }
            Response::Fail(failure) => {
                debug!("{request:?} failed: {}", failure.message);
                self.apply_failure(request, failure.location, failure.message)
            }
        }
    }

    fn apply_reply(&mut self, request: Request, reply: Reply) -> Result<(), EngineError> {
        match (request, reply) {
            (Request::Init, Reply::Init(state_id)) => {
                info!("coqtop ready at state {state_id}");
                self.doc.set_initial_state_id(state_id);
                self.status = SessionStatus::Ready;
            }
            (
                Request::Add(id),
                Reply::Add {
                    state_id,
                    closed_proof,
                    message,
                },
            ) => {
                if self.doc.sentence(id).is_none() {
                    debug!("Ignoring answer for discarded sentence {}", id.0);
                    return Ok(());
                }
                self.doc.mark_valid(id, state_id, false)?;
                if let Some(next) = closed_proof {
                    debug!("Proof closed, next state {next}");
                }
                self.log(MessageLevel::Info, message);
                self.goals_stale = true;
            }
            (Request::EditAt(truncate), Reply::EditAt(focus)) => {
                if let Some(focus) = focus {
                    debug!("Rewound into a closed proof: {focus:?}");
                }
                if let Some(id) = truncate {
                    self.doc.truncate_to(id);
                }
                self.goals_stale = true;
            }
            (Request::Goal, Reply::Goal(goals)) => self.goals = goals,
            (Request::Status, Reply::Status(status)) => self.prover_status = Some(status),
            (Request::Quit, Reply::Quit) => {}
            (request, reply) => {
                return Err(EngineError::ProtocolDesync(format!(
                    "{reply:?} does not answer {request:?}"
                )))
            }
        }
        Ok(())
    }

    fn apply_failure(
        &mut self,
        request: Request,
        location: Option<Location>,
        message: String,
    ) -> Result<(), EngineError> {
        match request {
            Request::Init => {
                return Err(EngineError::ProtocolReject { message, location });
            }
            Request::Add(id) => {
                if self.doc.sentence(id).is_some() {
                    self.doc.mark_error(id, location, message.clone())?;
                }
                self.drop_advances();
                self.goals_stale = true;
            }
            Request::EditAt(truncate) => {
                // Keep the document consistent with what the user sees.
                if let Some(id) = truncate {
                    self.doc.truncate_to(id);
                }
                self.goals_stale = true;
            }
            Request::Goal | Request::Status | Request::Quit => {}
        }
        self.log(MessageLevel::Error, message);
        Ok(())
    }

    fn handle_feedback(&mut self, feedback: Feedback) {
        let index = self.doc.index_of_state(feedback.state_id);
        match feedback.content {
            FeedbackContent::AddedAxiom => {
                if let Some(index) = index {
                    self.doc.mark_axiom(index);
                }
            }
            FeedbackContent::Processed => {
                if let Some(index) = index {
                    self.doc.mark_processed(index);
                }
            }
            FeedbackContent::ErrorMsg { location, message }
            | FeedbackContent::Message {
                level: MessageLevel::Error,
                location,
                text: message,
            } => self.sentence_error(index, location, message),
            FeedbackContent::Message { level, text, .. } => self.log(level, text),
            other => debug!("Feedback for {}: {other:?}", feedback.state_id),
        }
    }

    /// An already accepted sentence turned out to fail. Later sentences are
    /// dropped and queued progress is cancelled.
    fn sentence_error(&mut self, index: Option<usize>, location: Option<Location>, message: String) {
        if let Some(index) = index {
            let id = self.doc.sentences()[index].id;
            if self.doc.mark_error(id, location, message.clone()).is_ok() {
                let discarded = self.doc.truncate_at(index + 1);
                if !discarded.is_empty() {
                    debug!("Dropped {} sentences after the error", discarded.len());
                }
                self.drop_advances();
                self.goals_stale = true;
            }
        }
        self.log(MessageLevel::Error, message);
    }
}
