//! Routes editor commands to one session per document.

use std::{
    collections::{HashMap, HashSet},
    mem,
    result::Result as StdResult,
};

use tracing::{debug, info, warn};

use super::protocol::{EditorCommand, EditorEvent, EngineEvent};
use crate::{
    config::SessionConfig,
    coqtop::Transport,
    error::{EngineError, Error, Result},
    session::{view::render_goals, NotificationKind, Session, VisibilityMode},
    tui_ipc::{Command, Message, ViewerState},
};

/// Opens a prover connection for a new session.
pub type Connector<T> = Box<dyn FnMut(&SessionConfig) -> Result<T>>;

/// Whether the serve loop should keep reading commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

pub struct Workspace<T: Transport> {
    config: SessionConfig,
    connect: Connector<T>,
    sessions: HashMap<String, Session<T>>,
    focused: Option<String>,
    /// Documents visible in some editor window.
    active: HashSet<String>,
    show_goals: bool,
    show_messages: bool,
    events: Vec<EngineEvent>,
    last_viewer: Option<Message>,
}

impl<T: Transport> Workspace<T> {
    pub fn new(config: SessionConfig, connect: Connector<T>) -> Self {
        Self {
            config,
            connect,
            sessions: HashMap::new(),
            focused: None,
            active: HashSet::new(),
            show_goals: true,
            show_messages: true,
            events: Vec::new(),
            last_viewer: None,
        }
    }

    pub fn session(&self, doc: &str) -> Option<&Session<T>> {
        self.sessions.get(doc)
    }

    pub fn focused(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    pub fn is_active(&self, doc: &str) -> bool {
        self.active.contains(doc)
    }

    /// Events produced since the last call, in order.
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        mem::take(&mut self.events)
    }

    pub fn handle(&mut self, command: EditorCommand) -> Flow {
        let doc = match &command {
            EditorCommand::NewSession { doc, .. }
            | EditorCommand::CloseSession { doc }
            | EditorCommand::Forward { doc }
            | EditorCommand::Backward { doc }
            | EditorCommand::ToCursor { doc, .. }
            | EditorCommand::Edit { doc, .. }
            | EditorCommand::SetText { doc, .. }
            | EditorCommand::Event { doc, .. }
            | EditorCommand::ClearMessages { doc } => Some(doc.clone()),
            _ => None,
        };
        match self.dispatch(command) {
            Ok(flow) => {
                if let Some(doc) = &doc {
                    self.publish(doc);
                }
                flow
            }
            Err(e) => {
                self.report(doc.as_deref(), &e);
                if let Some(doc) = &doc {
                    self.publish(doc);
                }
                Flow::Continue
            }
        }
    }

    fn session_mut(&mut self, doc: &str) -> Result<&mut Session<T>> {
        self.sessions.get_mut(doc).ok_or_else(|| {
            EngineError::InvalidOperation(format!("no session for {doc}")).into()
        })
    }

    /// Run a navigation step, then take in whatever coqtop already answered.
    fn navigate(
        &mut self,
        doc: &str,
        step: impl FnOnce(&mut Session<T>) -> StdResult<(), EngineError>,
    ) -> Result<()> {
        let session = self.session_mut(doc)?;
        step(session)?;
        session.process_feedbacks();
        Ok(())
    }

    fn dispatch(&mut self, command: EditorCommand) -> Result<Flow> {
        match command {
            EditorCommand::NewSession { doc, text } => {
                if let Some(mut old) = self.sessions.remove(&doc) {
                    info!("Replacing session for {doc}");
                    old.close();
                }
                let transport = (self.connect)(&self.config)?;
                info!("Starting session for {doc}");
                let session = Session::new(transport, text, self.config.clone());
                self.sessions.insert(doc.clone(), session);
                self.focus(doc);
            }
            EditorCommand::CloseSession { doc } => {
                let mut session = self.sessions.remove(&doc).ok_or_else(|| {
                    EngineError::InvalidOperation(format!("no session for {doc}"))
                })?;
                session.close();
                self.active.remove(&doc);
                if self.focused.as_deref() == Some(doc.as_str()) {
                    self.focused = None;
                }
            }
            EditorCommand::Forward { doc } => self.navigate(&doc, Session::forward)?,
            EditorCommand::Backward { doc } => self.navigate(&doc, Session::backward)?,
            EditorCommand::ToCursor { doc, position } => {
                self.navigate(&doc, |session| session.to_cursor(position))?;
            }
            EditorCommand::Edit { doc, range, text } => {
                let outcome = self
                    .session_mut(&doc)?
                    .apply_edit(range.start, range.end, &text)?;
                debug!("Edit in {doc}: {outcome:?}");
            }
            EditorCommand::SetText { doc, text } => {
                let outcome = self.session_mut(&doc)?.set_text(&text);
                debug!("Resync of {doc}: {outcome:?}");
            }
            EditorCommand::Event { doc, kind } => self.editor_event(doc, kind)?,
            EditorCommand::GoalVisibility { mode } => self.set_visibility(Some(mode), None),
            EditorCommand::MessageVisibility { mode } => self.set_visibility(None, Some(mode)),
            EditorCommand::ClearMessages { doc } => self.session_mut(&doc)?.clear_messages(),
            EditorCommand::RedrawGoals => {
                if let Some(doc) = self.focused.clone() {
                    self.replay_goals(&doc);
                }
            }
            EditorCommand::RedrawMessages => {
                if let Some(doc) = self.focused.clone() {
                    self.replay_messages(&doc);
                }
            }
            EditorCommand::ProcessFeedbacks => self.process_feedbacks(),
            EditorCommand::Shutdown => {
                self.shutdown();
                return Ok(Flow::Shutdown);
            }
        }
        Ok(Flow::Continue)
    }

    fn editor_event(&mut self, doc: String, kind: EditorEvent) -> Result<()> {
        if !self.sessions.contains_key(&doc) {
            return Err(EngineError::InvalidOperation(format!("no session for {doc}")).into());
        }
        match kind {
            EditorEvent::Focus => self.focus(doc),
            EditorEvent::Unfocus => {
                if self.focused.as_deref() == Some(doc.as_str()) {
                    self.focused = None;
                }
            }
            EditorEvent::Active => {
                self.active.insert(doc);
            }
            EditorEvent::Inactive => {
                self.active.remove(&doc);
            }
        }
        Ok(())
    }

    /// The goal and message panels follow the focused document; they are
    /// replayed when the command is published.
    fn focus(&mut self, doc: String) {
        if self.focused.as_deref() != Some(doc.as_str()) {
            debug!("Focus moved to {doc}");
        }
        self.active.insert(doc.clone());
        self.focused = Some(doc);
    }

    fn replay_goals(&mut self, doc: &str) {
        if !self.show_goals {
            return;
        }
        if let Some(session) = self.sessions.get(doc) {
            let text = render_goals(session.goals());
            self.events.push(EngineEvent::Goals {
                doc: doc.to_string(),
                text,
            });
        }
    }

    fn replay_messages(&mut self, doc: &str) {
        if !self.show_messages {
            return;
        }
        if let Some(session) = self.sessions.get(doc) {
            self.events.push(EngineEvent::Messages {
                doc: doc.to_string(),
                entries: session.messages().to_vec(),
            });
        }
    }

    fn set_visibility(&mut self, goals: Option<VisibilityMode>, messages: Option<VisibilityMode>) {
        let show_goals = goals.map_or(self.show_goals, |mode| mode.apply(self.show_goals));
        let show_messages =
            messages.map_or(self.show_messages, |mode| mode.apply(self.show_messages));
        let reveal_goals = show_goals && !self.show_goals;
        let reveal_messages = show_messages && !self.show_messages;
        self.show_goals = show_goals;
        self.show_messages = show_messages;
        self.events.push(EngineEvent::Visibility {
            show_goals,
            show_messages,
        });
        if let Some(doc) = self.focused.clone() {
            if reveal_goals {
                self.replay_goals(&doc);
            }
            if reveal_messages {
                self.replay_messages(&doc);
            }
        }
    }

    /// Apply a command coming from a viewer.
    pub fn handle_viewer(&mut self, command: Command) {
        match command {
            Command::GoalVisibility { mode } => self.set_visibility(Some(mode), None),
            Command::MessageVisibility { mode } => self.set_visibility(None, Some(mode)),
            Command::ClearMessages => {
                if let Some(doc) = self.focused.clone() {
                    if let Some(session) = self.sessions.get_mut(&doc) {
                        session.clear_messages();
                    }
                    self.replay_messages(&doc);
                }
            }
        }
    }

    /// Poll every session and publish those that changed.
    pub fn process_feedbacks(&mut self) {
        let changed: Vec<String> = self
            .sessions
            .iter_mut()
            .filter_map(|(doc, session)| session.process_feedbacks().then(|| doc.clone()))
            .collect();
        for doc in changed {
            self.publish(&doc);
        }
        // Notifications raised without any inbound traffic, such as timeouts.
        let quiet: Vec<String> = self.sessions.keys().cloned().collect();
        for doc in quiet {
            self.flush_notifications(&doc);
        }
    }

    /// Emit the snapshot of `doc`, plus its goals and messages when focused.
    fn publish(&mut self, doc: &str) {
        let Some(session) = self.sessions.get(doc) else {
            return;
        };
        let snapshot = session.snapshot();
        self.events.push(EngineEvent::Snapshot {
            doc: doc.to_string(),
            snapshot,
        });
        if self.focused.as_deref() == Some(doc) {
            self.replay_goals(doc);
            self.replay_messages(doc);
        }
        self.flush_notifications(doc);
    }

    fn flush_notifications(&mut self, doc: &str) {
        let Some(session) = self.sessions.get_mut(doc) else {
            return;
        };
        for notification in session.take_notifications() {
            self.events.push(EngineEvent::Notification {
                doc: doc.to_string(),
                kind: notification.kind,
                message: notification.message,
            });
        }
    }

    /// Report a line that is not a valid command.
    pub fn report_malformed(&mut self, reason: &str) {
        self.events.push(EngineEvent::Error {
            message: format!("Malformed command: {reason}"),
        });
    }

    fn report(&mut self, doc: Option<&str>, e: &Error) {
        match (doc, e) {
            (Some(doc), Error::Engine(EngineError::BlockedByError)) => {
                self.events.push(EngineEvent::Notification {
                    doc: doc.to_string(),
                    kind: NotificationKind::Blocked,
                    message: e.to_string(),
                });
            }
            _ => {
                warn!("Command failed: {e}");
                self.events.push(EngineEvent::Error {
                    message: e.to_string(),
                });
            }
        }
    }

    /// State for viewers, if it changed since the last call.
    pub fn take_viewer_update(&mut self) -> Option<Message> {
        let message = self.viewer_message();
        if self.last_viewer.as_ref() == Some(&message) {
            return None;
        }
        self.last_viewer = Some(message.clone());
        Some(message)
    }

    fn viewer_message(&self) -> Message {
        let Some((doc, session)) = self
            .focused
            .as_ref()
            .and_then(|doc| Some((doc, self.sessions.get(doc)?)))
        else {
            return Message::Idle;
        };
        Message::State(ViewerState {
            doc: doc.clone(),
            status: session.status(),
            busy: session.is_busy(),
            goals: if self.show_goals {
                render_goals(session.goals())
            } else {
                String::new()
            },
            messages: if self.show_messages {
                session.messages().to_vec()
            } else {
                Vec::new()
            },
            show_goals: self.show_goals,
            show_messages: self.show_messages,
        })
    }

    /// Close every session.
    pub fn shutdown(&mut self) {
        for (doc, mut session) in self.sessions.drain() {
            debug!("Closing {doc}");
            session.close();
        }
        self.focused = None;
        self.active.clear();
    }
}
