mod common;

use std::time::Duration;

use common::{blocking_config, config, settle, start, FakeCoqtop, MockTransport, PROOF};
use coq_tui::{
    config::SessionConfig,
    coqtop::{Call, MessageLevel, StateId},
    document::{Reconciliation, SentenceState, Validity},
    error::EngineError,
    session::{HighlightClass, NotificationKind, Session, SessionStatus},
    text::Position,
};

fn classes(session: &Session<MockTransport>) -> Vec<HighlightClass> {
    session.snapshot().highlights.iter().map(|h| h.class).collect()
}

#[test]
fn test_forward_checks_every_sentence() {
    let (mut session, wire) = start(PROOF, FakeCoqtop::new(), config());
    for _ in 0..4 {
        session.forward().unwrap();
    }
    settle(&mut session);

    assert_eq!(session.status(), SessionStatus::Ready);
    assert_eq!(
        wire.borrow().adds(),
        ["Lemma foo: True.", "Proof.", "trivial.", "Qed."]
    );
    let doc = session.document();
    assert_eq!(doc.live_locked().len(), 4);
    assert!(doc
        .sentences()
        .iter()
        .all(|s| s.state == SentenceState::Valid(Validity::Ordinary) && s.processed));
    assert_eq!(classes(&session), [HighlightClass::Verified; 4]);
    assert_eq!(session.snapshot().locked_end, Position::new(3, 4));
    // Goals are asked for once the queue drains.
    assert_eq!(wire.borrow().calls.last(), Some(&Call::Goal));
    assert_eq!(
        session.snapshot().goals,
        "1 subgoal\nn : nat\n_______________________ (1/1)\nn + 0 = n"
    );
}

#[test]
fn test_add_chains_state_ids() {
    let (mut session, wire) = start(PROOF, FakeCoqtop::new(), config());
    session.forward().unwrap();
    session.forward().unwrap();
    settle(&mut session);

    let parents: Vec<_> = wire
        .borrow()
        .calls
        .iter()
        .filter_map(|call| match call {
            Call::Add { state_id, .. } => Some(*state_id),
            _ => None,
        })
        .collect();
    assert_eq!(parents, [StateId(1), StateId(2)]);
}

#[test]
fn test_one_request_at_a_time() {
    let (mut session, wire) = start(PROOF, FakeCoqtop::new(), config());
    session.forward().unwrap();
    session.forward().unwrap();
    session.forward().unwrap();
    // Still waiting for Init.
    assert_eq!(wire.borrow().calls, [Call::Init]);

    session.process_feedbacks();
    assert_eq!(wire.borrow().adds(), ["Lemma foo: True."]);
    assert!(session.is_busy());

    session.process_feedbacks();
    assert_eq!(wire.borrow().adds().len(), 2);
    settle(&mut session);
    assert_eq!(wire.borrow().adds().len(), 3);
}

#[test]
fn test_error_feedback_stops_forward_progress() {
    let prover = FakeCoqtop {
        late_errors: vec![("trivial", "No such goal")],
        ..FakeCoqtop::new()
    };
    let (mut session, wire) = start(PROOF, prover, config());
    for _ in 0..4 {
        session.forward().unwrap();
    }
    settle(&mut session);

    assert_eq!(
        wire.borrow().adds(),
        ["Lemma foo: True.", "Proof.", "trivial."]
    );
    assert_eq!(session.document().locked_len(), 3);
    assert_eq!(
        classes(&session),
        [
            HighlightClass::Verified,
            HighlightClass::Verified,
            HighlightClass::Error,
            HighlightClass::ErrorPart,
        ]
    );
    assert_eq!(
        session.messages().last().map(|m| (m.level, m.text.as_str())),
        Some((MessageLevel::Error, "No such goal"))
    );
    assert_eq!(session.forward(), Err(EngineError::BlockedByError));
}

#[test]
fn test_rejected_sentence_can_be_stepped_back_over() {
    let prover = FakeCoqtop {
        rejected: vec![("trivial", "Unable to unify")],
        ..FakeCoqtop::new()
    };
    let (mut session, wire) = start(PROOF, prover, config());
    for _ in 0..4 {
        session.forward().unwrap();
    }
    settle(&mut session);

    assert_eq!(wire.borrow().adds().len(), 3);
    assert_eq!(
        classes(&session),
        [
            HighlightClass::Verified,
            HighlightClass::Verified,
            HighlightClass::Error,
        ]
    );
    let errors = session
        .messages()
        .iter()
        .filter(|m| m.text == "Unable to unify")
        .count();
    assert_eq!(errors, 1);

    session.backward().unwrap();
    settle(&mut session);
    assert!(wire.borrow().calls.contains(&Call::EditAt(StateId(3))));
    assert_eq!(session.document().locked_len(), 2);
    assert!(session.forward().is_ok());
}

#[test]
fn test_edit_before_error_unblocks_forward() {
    let prover = FakeCoqtop {
        late_errors: vec![("trivial", "No such goal")],
        ..FakeCoqtop::new()
    };
    let (mut session, wire) = start(PROOF, prover, config());
    for _ in 0..4 {
        session.forward().unwrap();
    }
    settle(&mut session);
    assert_eq!(session.forward(), Err(EngineError::BlockedByError));

    session
        .apply_edit(Position::new(1, 2), Position::new(1, 2), "o")
        .unwrap();
    settle(&mut session);

    assert_eq!(wire.borrow().calls.last(), Some(&Call::Goal));
    assert!(wire.borrow().calls.contains(&Call::EditAt(StateId(2))));
    assert_eq!(session.document().locked_len(), 1);
    assert!(session.forward().is_ok());
    settle(&mut session);
    assert_eq!(wire.borrow().adds().last().map(String::as_str), Some("Prooof."));
}

#[test]
fn test_error_after_later_sentences_were_accepted() {
    let (mut session, wire) = start(PROOF, FakeCoqtop::new(), config());
    for _ in 0..4 {
        session.forward().unwrap();
    }
    settle(&mut session);
    assert_eq!(session.document().locked_len(), 4);

    // coqtop reports the failure of `trivial.` (state 4) only after `Qed.`
    // was accepted as state 5.
    wire.borrow_mut().inject(
        r#"<feedback object="state" route="0"><state_id val="4"/><feedback_content val="errormsg"><loc start="0" stop="7"/><string>No such goal</string></feedback_content></feedback>"#,
    );
    settle(&mut session);
    assert_eq!(session.document().locked_len(), 3);
    assert_eq!(session.document().sentences().len(), 3);
    assert_eq!(session.forward(), Err(EngineError::BlockedByError));

    session.backward().unwrap();
    settle(&mut session);
    assert!(wire.borrow().calls.contains(&Call::EditAt(StateId(3))));
    assert_eq!(session.document().locked_len(), 2);
    assert!(session.forward().is_ok());
}

#[test]
fn test_edit_in_sent_sentence_rewinds_before_it() {
    let (mut session, wire) = start(PROOF, FakeCoqtop::new(), config());
    for _ in 0..4 {
        session.forward().unwrap();
    }
    settle(&mut session);

    let outcome = session
        .apply_edit(Position::new(1, 2), Position::new(1, 2), "o")
        .unwrap();
    let second = session.document().sentences()[1].id;
    assert_eq!(outcome, Reconciliation::Rollback(second));
    // Highlights stop before the invalidated sentence right away.
    assert_eq!(session.snapshot().highlights.len(), 1);

    settle(&mut session);
    assert!(wire.borrow().calls.contains(&Call::EditAt(StateId(2))));
    assert_eq!(session.document().locked_len(), 1);
    assert_eq!(session.document().sentences().len(), 1);

    session.forward().unwrap();
    settle(&mut session);
    let wire = wire.borrow();
    assert_eq!(wire.adds().last().map(String::as_str), Some("Prooof."));
    assert!(wire.calls.contains(&Call::Add {
        command: "Prooof.".to_string(),
        edit_id: -1,
        state_id: StateId(2),
        verbose: false,
    }));
}

#[test]
fn test_edit_while_adding_rolls_back_after_answer() {
    let (mut session, wire) = start(PROOF, FakeCoqtop::new(), config());
    settle(&mut session);
    session.forward().unwrap();

    let outcome = session
        .apply_edit(Position::new(0, 0), Position::new(0, 5), "Theorem")
        .unwrap();
    assert!(matches!(outcome, Reconciliation::Rollback(_)));
    settle(&mut session);

    assert_eq!(
        wire.borrow().calls[1..],
        [
            Call::Add {
                command: "Lemma foo: True.".to_string(),
                edit_id: -1,
                state_id: StateId(1),
                verbose: false,
            },
            Call::EditAt(StateId(1)),
            Call::Goal,
        ]
    );
    assert!(session.document().sentences().is_empty());

    session.forward().unwrap();
    settle(&mut session);
    assert_eq!(
        wire.borrow().adds().last().map(String::as_str),
        Some("Theorem foo: True.")
    );
}

#[test]
fn test_edit_after_locked_prefix_sends_nothing() {
    let (mut session, wire) = start(PROOF, FakeCoqtop::new(), config());
    session.forward().unwrap();
    settle(&mut session);
    let sent = wire.borrow().calls.len();

    let outcome = session
        .apply_edit(Position::new(3, 0), Position::new(3, 3), "Defined")
        .unwrap();
    assert_eq!(outcome, Reconciliation::Shifted);
    settle(&mut session);
    assert_eq!(wire.borrow().calls.len(), sent);
    assert_eq!(session.document().locked_len(), 1);
}

#[test]
fn test_backward_on_empty_prefix_is_noop() {
    let (mut session, wire) = start(PROOF, FakeCoqtop::new(), config());
    settle(&mut session);
    session.backward().unwrap();
    settle(&mut session);
    assert_eq!(wire.borrow().calls, [Call::Init]);
}

#[test]
fn test_to_cursor_moves_both_ways() {
    let (mut session, wire) = start(PROOF, FakeCoqtop::new(), config());
    settle(&mut session);

    session.to_cursor(Position::new(1, 6)).unwrap();
    settle(&mut session);
    assert_eq!(wire.borrow().adds(), ["Lemma foo: True.", "Proof."]);
    assert_eq!(session.document().live_locked().len(), 2);

    session.to_cursor(Position::new(0, 16)).unwrap();
    settle(&mut session);
    assert!(wire.borrow().calls.contains(&Call::EditAt(StateId(2))));
    assert_eq!(session.document().live_locked().len(), 1);

    session.to_cursor(Position::new(10, 0)).unwrap();
    settle(&mut session);
    assert_eq!(session.document().live_locked().len(), 4);
}

#[test]
fn test_cursor_supersedes_queued_forwards() {
    let (mut session, wire) = start(PROOF, FakeCoqtop::new(), config());
    session.forward().unwrap();
    session.forward().unwrap();
    session.forward().unwrap();
    session.to_cursor(Position::new(0, 16)).unwrap();
    settle(&mut session);
    assert_eq!(wire.borrow().adds(), ["Lemma foo: True."]);
}

#[test]
fn test_axiom_annotate_keeps_going() {
    let text = "Lemma a: True.\nProof.\n  admit.\nQed.";
    let prover = FakeCoqtop {
        axioms: vec!["admit"],
        ..FakeCoqtop::new()
    };
    let (mut session, wire) = start(text, prover, config());
    for _ in 0..4 {
        session.forward().unwrap();
    }
    settle(&mut session);

    assert_eq!(wire.borrow().adds().len(), 4);
    assert_eq!(
        classes(&session),
        [
            HighlightClass::Verified,
            HighlightClass::Verified,
            HighlightClass::Axiom,
            HighlightClass::Verified,
        ]
    );
}

#[test]
fn test_axiom_block_policy_stops_like_an_error() {
    let text = "Lemma a: True.\nProof.\n  admit.\nQed.";
    let prover = FakeCoqtop {
        axioms: vec!["admit"],
        ..FakeCoqtop::new()
    };
    let (mut session, wire) = start(text, prover, blocking_config());
    for _ in 0..4 {
        session.forward().unwrap();
    }
    settle(&mut session);

    assert_eq!(wire.borrow().adds().len(), 3);
    assert!(session
        .take_notifications()
        .iter()
        .any(|n| n.kind == NotificationKind::Blocked));
    assert_eq!(session.forward(), Err(EngineError::BlockedByError));
}

#[test]
fn test_unterminated_comment_is_reported() {
    let (mut session, wire) = start("Lemma a: True. (* open", FakeCoqtop::new(), config());
    session.forward().unwrap();
    session.forward().unwrap();
    settle(&mut session);

    assert_eq!(wire.borrow().adds(), ["Lemma a: True."]);
    let snapshot = session.snapshot();
    let problem = snapshot.parse_error.expect("parse error is reported");
    assert_eq!(problem.position, Position::new(0, 15));
    assert!(session
        .take_notifications()
        .iter()
        .any(|n| n.kind == NotificationKind::Blocked));
    assert_eq!(session.messages().last().map(|m| m.level), Some(MessageLevel::Error));
}

#[test]
fn test_timeout_is_reported_once() {
    let prover = FakeCoqtop {
        silent: true,
        ..FakeCoqtop::new()
    };
    let (mut session, _wire) = start(
        PROOF,
        prover,
        SessionConfig {
            timeout: Duration::ZERO,
            ..config()
        },
    );
    assert!(session.process_feedbacks());
    let notifications = session.take_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationKind::Timeout);

    assert!(!session.process_feedbacks());
    assert!(session.take_notifications().is_empty());
    assert_eq!(session.status(), SessionStatus::Starting);
    assert!(session.is_busy());
}

#[test]
fn test_lost_connection_breaks_session() {
    let (mut session, wire) = start(PROOF, FakeCoqtop::new(), config());
    session.forward().unwrap();
    settle(&mut session);

    wire.borrow_mut().disconnected = true;
    session.forward().unwrap();
    session.process_feedbacks();

    assert_eq!(session.status(), SessionStatus::Broken);
    assert!(wire.borrow().closed);
    assert!(session
        .take_notifications()
        .iter()
        .any(|n| n.kind == NotificationKind::Fatal));
    assert_eq!(session.forward(), Err(EngineError::ChannelClosed));
    assert_eq!(session.backward(), Err(EngineError::ChannelClosed));
}

#[test]
fn test_rejected_init_is_fatal() {
    let prover = FakeCoqtop {
        fail_init: true,
        ..FakeCoqtop::new()
    };
    let (mut session, _wire) = start(PROOF, prover, config());
    settle(&mut session);
    assert_eq!(session.status(), SessionStatus::Broken);
    assert!(matches!(
        session.forward(),
        Err(EngineError::ProtocolReject { message, .. }) if message == "Cannot load Prelude"
    ));
}

#[test]
fn test_status_request() {
    let (mut session, wire) = start(PROOF, FakeCoqtop::new(), config());
    settle(&mut session);
    session.request_status().unwrap();
    assert!(session.request_status().is_err());
    settle(&mut session);

    assert_eq!(wire.borrow().calls.last(), Some(&Call::Status));
    let status = session.prover_status().expect("status answered");
    assert_eq!(status.proof_name.as_deref(), Some("foo"));
    assert_eq!(status.path, ["Top"]);
}

#[test]
fn test_repeated_messages_are_logged_once() {
    let notice = r#"<feedback object="state" route="0"><state_id val="99"/><feedback_content val="message"><message><message_level val="notice"/><option val="none"/><richpp>foo is defined</richpp></message></feedback_content></feedback>"#;
    let prover = FakeCoqtop {
        chatter: vec![notice.to_string()],
        ..FakeCoqtop::new()
    };
    let (mut session, _wire) = start(PROOF, prover, config());
    session.forward().unwrap();
    session.forward().unwrap();
    settle(&mut session);

    let notices: Vec<_> = session
        .messages()
        .iter()
        .filter(|m| m.level == MessageLevel::Notice)
        .collect();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].text, "foo is defined");

    session.clear_messages();
    assert!(session.messages().is_empty());
}

#[test]
fn test_close_quits_coqtop() {
    let (mut session, wire) = start(PROOF, FakeCoqtop::new(), config());
    settle(&mut session);
    session.close();

    assert_eq!(wire.borrow().calls.last(), Some(&Call::Quit));
    assert!(wire.borrow().closed);
    assert_eq!(session.status(), SessionStatus::Closed);
    assert!(matches!(
        session.forward(),
        Err(EngineError::InvalidOperation(_))
    ));
}
