#![allow(dead_code)]

use std::{cell::RefCell, collections::VecDeque, rc::Rc, time::Duration};

use coq_tui::{
    config::{AxiomPolicy, SessionConfig},
    coqtop::{decode_frame, Call, Inbound, Transport},
    error::EngineError,
    session::Session,
};

/// Scripted stand-in for coqtop. Each sentence gets the next state id; the
/// rules below match sentences by substring.
#[derive(Default)]
pub struct FakeCoqtop {
    /// State id handed out for the latest accepted sentence.
    pub last_state: u32,
    /// `Add` fails with the message.
    pub rejected: Vec<(&'static str, &'static str)>,
    /// `Add` succeeds, then an error feedback arrives for the new state.
    pub late_errors: Vec<(&'static str, &'static str)>,
    /// `Add` succeeds with an `addedaxiom` feedback.
    pub axioms: Vec<&'static str>,
    /// Extra feedback frames sent after every good `Add`.
    pub chatter: Vec<String>,
    pub fail_init: bool,
    /// Never answer anything.
    pub silent: bool,
}

fn good(payload: &str) -> String {
    format!(r#"<value val="good">{payload}</value>"#)
}

fn feedback(state: u32, kind: &str, body: &str) -> String {
    format!(
        r#"<feedback object="state" route="0"><state_id val="{state}"/><feedback_content val="{kind}">{body}</feedback_content></feedback>"#
    )
}

fn matching<'a, T>(rules: &'a [(&str, T)], command: &str) -> Option<&'a T> {
    rules
        .iter()
        .find(|(key, _)| command.contains(key))
        .map(|(_, value)| value)
}

impl FakeCoqtop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&mut self, call: &Call) -> Vec<String> {
        if self.silent {
            return Vec::new();
        }
        match call {
            Call::Init if self.fail_init => vec![
                r#"<value val="fail"><state_id val="0"/><string>Cannot load Prelude</string></value>"#
                    .to_string(),
            ],
            Call::Init => {
                self.last_state = 1;
                vec![good(r#"<state_id val="1"/>"#)]
            }
            Call::Add {
                command, state_id, ..
            } => {
                if let Some(message) = matching(&self.rejected, command) {
                    return vec![format!(
                        r#"<value val="fail"><state_id val="{}"/><string>{message}</string></value>"#,
                        state_id.0
                    )];
                }
                self.last_state += 1;
                let state = self.last_state;
                let mut frames = vec![good(&format!(
                    r#"<pair><state_id val="{state}"/><pair><union val="in_l"><unit/></union><string></string></pair></pair>"#
                ))];
                if self.axioms.iter().any(|key| command.contains(key)) {
                    frames.push(feedback(state, "addedaxiom", ""));
                }
                if let Some(message) = matching(&self.late_errors, command) {
                    frames.push(feedback(
                        state,
                        "errormsg",
                        &format!(r#"<loc start="0" stop="3"/><string>{message}</string>"#),
                    ));
                } else {
                    frames.push(feedback(state, "processed", ""));
                }
                frames.extend(self.chatter.iter().cloned());
                frames
            }
            Call::EditAt(_) => vec![good(r#"<union val="in_l"><unit/></union>"#)],
            Call::Goal => vec![good(
                r#"<option val="some"><goals><list><goal><string>3</string><list><string>n : nat</string></list><string>n + 0 = n</string></goal></list><list/><list/><list/></goals></option>"#,
            )],
            Call::Status => vec![good(
                r#"<status><list><string>Top</string></list><option val="some"><string>foo</string></option><list><string>foo</string></list><int>1</int></status>"#,
            )],
            Call::Quit => vec![good("<unit/>")],
        }
    }
}

/// Shared state of a [`MockTransport`], inspected by the tests.
pub struct Wire {
    pub prover: FakeCoqtop,
    pub calls: Vec<Call>,
    inbox: VecDeque<Inbound>,
    outstanding: bool,
    pub disconnected: bool,
    pub closed: bool,
}

impl Wire {
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|call| pred(call)).count()
    }

    /// Queue a frame coqtop sends on its own, outside any answer.
    pub fn inject(&mut self, frame: &str) {
        let inbound = decode_frame(frame).expect("injected frame must decode");
        self.inbox.push_back(inbound);
    }

    pub fn adds(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Add { command, .. } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }
}

pub struct MockTransport {
    wire: Rc<RefCell<Wire>>,
}

impl MockTransport {
    pub fn new(prover: FakeCoqtop) -> (Self, Rc<RefCell<Wire>>) {
        let wire = Rc::new(RefCell::new(Wire {
            prover,
            calls: Vec::new(),
            inbox: VecDeque::new(),
            outstanding: false,
            disconnected: false,
            closed: false,
        }));
        (Self { wire: wire.clone() }, wire)
    }
}

impl Transport for MockTransport {
    fn send(&mut self, call: Call) -> Result<(), EngineError> {
        let mut wire = self.wire.borrow_mut();
        if wire.closed || wire.disconnected {
            return Err(EngineError::ChannelClosed);
        }
        assert!(
            !wire.outstanding,
            "{call:?} sent while another request is outstanding"
        );
        let frames = wire.prover.respond(&call);
        for frame in frames {
            let inbound = decode_frame(&frame).expect("fake coqtop frame must decode");
            wire.inbox.push_back(inbound);
        }
        wire.calls.push(call);
        wire.outstanding = true;
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Inbound>, EngineError> {
        let mut wire = self.wire.borrow_mut();
        match wire.inbox.pop_front() {
            Some(inbound) => {
                if matches!(inbound, Inbound::Response(_)) {
                    wire.outstanding = false;
                }
                Ok(Some(inbound))
            }
            None if wire.disconnected => Err(EngineError::ChannelClosed),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.wire.borrow_mut().closed = true;
    }
}

pub const PROOF: &str = "Lemma foo: True.\nProof.\n  trivial.\nQed.";

pub fn config() -> SessionConfig {
    SessionConfig {
        timeout: Duration::from_secs(60),
        ..SessionConfig::default()
    }
}

pub fn blocking_config() -> SessionConfig {
    SessionConfig {
        axiom_policy: AxiomPolicy::Block,
        ..config()
    }
}

pub fn start(
    text: &str,
    prover: FakeCoqtop,
    config: SessionConfig,
) -> (Session<MockTransport>, Rc<RefCell<Wire>>) {
    let (transport, wire) = MockTransport::new(prover);
    (Session::new(transport, text, config), wire)
}

/// Process feedback until the session has nothing left to do.
pub fn settle(session: &mut Session<MockTransport>) {
    for _ in 0..100 {
        session.process_feedbacks();
        if !session.is_busy() {
            return;
        }
    }
    panic!("session did not settle");
}
