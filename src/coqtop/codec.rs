//! Translation between protocol types and coqtop's XML frames.
//!
//! Responses are decoded in two steps: the frame is split into good/fail
//! without knowing which call it answers, then [`decode_reply`] interprets
//! the payload once the session matches it with its outstanding call.

use std::{io, str::FromStr};

use tokio_util::{
    bytes::{Buf, BufMut, BytesMut},
    codec::{Decoder, Encoder},
};
use tracing::{debug, warn};

use super::{
    xml::{self, Element},
    Call, CallKind, Failure, Feedback, FeedbackContent, FocusedProof, Goal, Goals, Inbound,
    Location, MessageLevel, ProverStatus, Reply, Response, StateId,
};
use crate::error::EngineError;

type Decoded<T> = Result<T, EngineError>;

fn desync(message: impl Into<String>) -> EngineError {
    EngineError::ProtocolDesync(message.into())
}

// Encoding

fn string(value: &str) -> Element {
    Element::new("string").text(value)
}

fn int(value: i64) -> Element {
    Element::new("int").text(value.to_string())
}

fn boolean(value: bool) -> Element {
    Element::new("bool").attr("val", value.to_string())
}

fn state_id(id: StateId) -> Element {
    Element::new("state_id").attr("val", id.0.to_string())
}

fn pair(first: Element, second: Element) -> Element {
    Element::new("pair").child(first).child(second)
}

fn unit() -> Element {
    Element::new("unit")
}

/// Build the `<call>` element for an outgoing request.
pub fn encode_call(call: &Call) -> Element {
    let (name, argument) = match call {
        Call::Init => ("Init", Element::new("option").attr("val", "none")),
        Call::Add {
            command,
            edit_id,
            state_id: parent,
            verbose,
        } => (
            "Add",
            pair(
                pair(string(command), int(*edit_id)),
                pair(state_id(*parent), boolean(*verbose)),
            ),
        ),
        Call::EditAt(target) => ("Edit_at", state_id(*target)),
        Call::Goal => ("Goal", unit()),
        Call::Status => ("Status", boolean(false)),
        Call::Quit => ("Quit", unit()),
    };
    Element::new("call").attr("val", name).child(argument)
}

// Decoding of the basic types

fn expect_tag<'a>(el: &'a Element, tag: &str) -> Decoded<&'a Element> {
    if el.name == tag {
        Ok(el)
    } else {
        Err(desync(format!("expected <{tag}>, found <{}>", el.name)))
    }
}

fn child(el: &Element, index: usize) -> Decoded<&Element> {
    el.nth(index)
        .ok_or_else(|| desync(format!("<{}> is missing child {index}", el.name)))
}

fn attr<'a>(el: &'a Element, key: &str) -> Decoded<&'a str> {
    el.get_attr(key)
        .ok_or_else(|| desync(format!("<{}> is missing attribute {key}", el.name)))
}

fn number<T: FromStr>(raw: &str, what: &str) -> Decoded<T> {
    raw.trim()
        .parse()
        .map_err(|_| desync(format!("invalid {what}: {raw:?}")))
}

fn decode_state_id(el: &Element) -> Decoded<StateId> {
    let el = expect_tag(el, "state_id")?;
    number(attr(el, "val")?, "state id").map(StateId)
}

fn decode_int(el: &Element) -> Decoded<i64> {
    number(&expect_tag(el, "int")?.inner_text(), "int")
}

fn decode_string(el: &Element) -> Decoded<String> {
    Ok(expect_tag(el, "string")?.inner_text())
}

/// Text of a `<string>` or a `<richpp>`, whose markup is dropped.
fn decode_text(el: &Element) -> Decoded<String> {
    match el.name.as_str() {
        "string" | "richpp" => Ok(el.inner_text()),
        other => Err(desync(format!("expected text, found <{other}>"))),
    }
}

fn decode_option<T>(el: &Element, inner: impl Fn(&Element) -> Decoded<T>) -> Decoded<Option<T>> {
    let el = expect_tag(el, "option")?;
    match attr(el, "val")? {
        "none" => Ok(None),
        "some" => inner(child(el, 0)?).map(Some),
        other => Err(desync(format!("invalid option tag {other:?}"))),
    }
}

fn decode_list<T>(el: &Element, item: impl Fn(&Element) -> Decoded<T>) -> Decoded<Vec<T>> {
    expect_tag(el, "list")?.elements().map(item).collect()
}

fn decode_pair<A, B>(
    el: &Element,
    first: impl Fn(&Element) -> Decoded<A>,
    second: impl Fn(&Element) -> Decoded<B>,
) -> Decoded<(A, B)> {
    let el = expect_tag(el, "pair")?;
    Ok((first(child(el, 0)?)?, second(child(el, 1)?)?))
}

enum Union<L, R> {
    Left(L),
    Right(R),
}

fn decode_union<L, R>(
    el: &Element,
    left: impl Fn(&Element) -> Decoded<L>,
    right: impl Fn(&Element) -> Decoded<R>,
) -> Decoded<Union<L, R>> {
    let el = expect_tag(el, "union")?;
    match attr(el, "val")? {
        "in_l" => left(child(el, 0)?).map(Union::Left),
        "in_r" => right(child(el, 0)?).map(Union::Right),
        other => Err(desync(format!("invalid union tag {other:?}"))),
    }
}

fn decode_unit(el: &Element) -> Decoded<()> {
    expect_tag(el, "unit").map(|_| ())
}

fn decode_location(el: &Element) -> Decoded<Location> {
    let el = expect_tag(el, "loc")?;
    Ok(Location {
        start: number(attr(el, "start")?, "location")?,
        stop: number(attr(el, "stop")?, "location")?,
    })
}

fn decode_goal(el: &Element) -> Decoded<Goal> {
    let el = expect_tag(el, "goal")?;
    Ok(Goal {
        id: decode_string(child(el, 0)?)?,
        hypotheses: decode_list(child(el, 1)?, decode_text)?,
        goal: decode_text(child(el, 2)?)?,
    })
}

fn decode_goal_list(el: &Element) -> Decoded<Vec<Goal>> {
    decode_list(el, decode_goal)
}

fn decode_goals(el: &Element) -> Decoded<Goals> {
    let el = expect_tag(el, "goals")?;
    Ok(Goals {
        foreground: decode_goal_list(child(el, 0)?)?,
        background: decode_list(child(el, 1)?, |bg| {
            decode_pair(bg, decode_goal_list, decode_goal_list)
        })?,
        shelved: decode_goal_list(child(el, 2)?)?,
        given_up: decode_goal_list(child(el, 3)?)?,
    })
}

fn decode_status(el: &Element) -> Decoded<ProverStatus> {
    let el = expect_tag(el, "status")?;
    Ok(ProverStatus {
        path: decode_list(child(el, 0)?, decode_string)?,
        proof_name: decode_option(child(el, 1)?, decode_string)?,
        all_proofs: decode_list(child(el, 2)?, decode_string)?,
        proof_number: decode_int(child(el, 3)?)?,
    })
}

// Responses

fn decode_failure(el: &Element) -> Decoded<Failure> {
    let location = match (el.get_attr("loc_s"), el.get_attr("loc_e")) {
        (Some(start), Some(stop)) => Some(Location {
            start: number(start, "location")?,
            stop: number(stop, "location")?,
        }),
        _ => None,
    };
    Ok(Failure {
        state_id: decode_state_id(child(el, 0)?)?,
        location,
        message: decode_text(child(el, 1)?)?,
    })
}

fn decode_response(el: &Element) -> Decoded<Response> {
    match attr(el, "val")? {
        "good" => Ok(Response::Good(child(el, 0)?.clone())),
        "fail" => decode_failure(el).map(Response::Fail),
        other => Err(desync(format!("invalid value tag {other:?}"))),
    }
}

/// Interpret the payload of a good `<value>` as the answer to `kind`.
pub fn decode_reply(kind: CallKind, payload: &Element) -> Decoded<Reply> {
    match kind {
        CallKind::Init => decode_state_id(payload).map(Reply::Init),
        CallKind::Add => {
            let (state_id, (closed, message)) = decode_pair(payload, decode_state_id, |rest| {
                decode_pair(
                    rest,
                    |u| decode_union(u, decode_unit, decode_state_id),
                    decode_text,
                )
            })?;
            let closed_proof = match closed {
                Union::Left(()) => None,
                Union::Right(next) => Some(next),
            };
            Ok(Reply::Add {
                state_id,
                closed_proof,
                message,
            })
        }
        CallKind::EditAt => {
            let focused = decode_union(payload, decode_unit, |focus| {
                decode_pair(focus, decode_state_id, |ids| {
                    decode_pair(ids, decode_state_id, decode_state_id)
                })
            })?;
            Ok(Reply::EditAt(match focused {
                Union::Left(()) => None,
                Union::Right((proof_state_id, (qed_state_id, old_focused))) => {
                    Some(FocusedProof {
                        proof_state_id,
                        qed_state_id,
                        old_focused,
                    })
                }
            }))
        }
        CallKind::Goal => decode_option(payload, decode_goals).map(Reply::Goal),
        CallKind::Status => decode_status(payload).map(Reply::Status),
        CallKind::Quit => decode_unit(payload).map(|()| Reply::Quit),
    }
}

// Feedback

fn decode_message(el: &Element) -> Decoded<FeedbackContent> {
    let el = expect_tag(el, "message")?;
    let level_el = expect_tag(child(el, 0)?, "message_level")?;
    let level_name = attr(level_el, "val")?;
    let level = MessageLevel::parse(level_name)
        .ok_or_else(|| desync(format!("invalid message level {level_name:?}")))?;
    let (location, text) = if el.elements().count() == 2 {
        (None, decode_text(child(el, 1)?)?)
    } else {
        (
            decode_option(child(el, 1)?, decode_location)?,
            decode_text(child(el, 2)?)?,
        )
    };
    Ok(FeedbackContent::Message {
        level,
        location,
        text,
    })
}

fn decode_feedback_content(el: &Element) -> Decoded<FeedbackContent> {
    let el = expect_tag(el, "feedback_content")?;
    let content = match attr(el, "val")? {
        "addedaxiom" => FeedbackContent::AddedAxiom,
        "processed" => FeedbackContent::Processed,
        "incomplete" => FeedbackContent::Incomplete,
        "inprogress" => FeedbackContent::InProgress(decode_int(child(el, 0)?)?),
        "processingin" => FeedbackContent::ProcessingIn(decode_string(child(el, 0)?)?),
        "errormsg" => FeedbackContent::ErrorMsg {
            location: Some(decode_location(child(el, 0)?)?),
            message: decode_text(child(el, 1)?)?,
        },
        "message" => decode_message(child(el, 0)?)?,
        "filedependency" => FeedbackContent::FileDependency {
            source: decode_option(child(el, 0)?, decode_string)?,
            dependency: decode_string(child(el, 1)?)?,
        },
        "fileloaded" => FeedbackContent::FileLoaded {
            module: decode_string(child(el, 0)?)?,
            vo_file: decode_string(child(el, 1)?)?,
        },
        other => FeedbackContent::Unknown(other.to_string()),
    };
    Ok(content)
}

/// Decode a top-level element. Frames the session has no use for, such as
/// feedback about edit ids, yield `Ok(None)`.
pub fn decode_element(el: &Element) -> Decoded<Option<Inbound>> {
    match el.name.as_str() {
        "value" => decode_response(el).map(|r| Some(Inbound::Response(r))),
        "feedback" => {
            if el.get_attr("object") != Some("state") {
                debug!("Ignoring feedback about {:?}", el.get_attr("object"));
                return Ok(None);
            }
            Ok(Some(Inbound::Feedback(Feedback {
                state_id: decode_state_id(child(el, 0)?)?,
                content: decode_feedback_content(child(el, 1)?)?,
            })))
        }
        other => {
            warn!("Ignoring unexpected <{other}> frame from coqtop");
            Ok(None)
        }
    }
}

/// Decode a complete frame held in a string.
pub fn decode_frame(frame: &str) -> Decoded<Inbound> {
    let el = xml::parse(frame).map_err(|e| desync(e.to_string()))?;
    decode_element(&el)?.ok_or_else(|| desync(format!("<{}> is not a response", el.name)))
}

/// Framing for coqtop's stdio: a stream of concatenated XML elements with
/// no delimiters.
#[derive(Debug, Default)]
pub struct CoqtopCodec;

/// Codec failure: either the pipe broke or the stream is no longer valid.
#[derive(Debug)]
pub enum CodecError {
    Io(io::Error),
    Protocol(EngineError),
}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<CodecError> for EngineError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(e) => {
                debug!("coqtop pipe error: {e}");
                Self::ChannelClosed
            }
            CodecError::Protocol(e) => e,
        }
    }
}

impl Decoder for CoqtopCodec {
    type Item = Inbound;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some((el, used)) =
                xml::parse_prefix(src).map_err(|e| CodecError::Protocol(desync(e.to_string())))?
            else {
                return Ok(None);
            };
            src.advance(used);
            debug!("<- {el}");
            if let Some(inbound) = decode_element(&el).map_err(CodecError::Protocol)? {
                return Ok(Some(inbound));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.iter().all(u8::is_ascii_whitespace) => Ok(None),
            None => Err(CodecError::Protocol(desync(
                "coqtop closed its output in the middle of a frame",
            ))),
        }
    }
}

impl Encoder<Call> for CoqtopCodec {
    type Error = CodecError;

    fn encode(&mut self, call: Call, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = encode_call(&call).to_string();
        debug!("-> {frame}");
        dst.reserve(frame.len());
        dst.put_slice(frame.as_bytes());
        Ok(())
    }
}
