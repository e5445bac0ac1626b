//! The sentence sequence of one document and its locked prefix.
//!
//! `sentences[..locked]` have been sent to coqtop (pending, valid or in
//! error); everything after is unprocessed. Sentences from `doomed_from` on
//! are still locked but already invalidated by an edit, waiting for the
//! rollback that removes them.

use std::ops::Range;

use serde::Serialize;
use tracing::debug;

use crate::{
    coqtop::{Location, StateId},
    error::EngineError,
    sentence::{self, SplitError},
};

/// Stable identifier of a sentence for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SentenceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    Ordinary,
    /// Accepted through an axiom or `admit`.
    AxiomDependent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentenceState {
    Unprocessed,
    Pending,
    Valid(Validity),
    /// `range` is relative to the sentence start.
    Error { range: Range<usize>, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub id: SentenceId,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub state: SentenceState,
    pub state_id: Option<StateId>,
    /// Coqtop reported it finished checking this sentence.
    pub processed: bool,
}

impl Sentence {
    pub const fn span(&self) -> Range<usize> {
        self.start..self.end
    }

    pub const fn is_error(&self) -> bool {
        matches!(self.state, SentenceState::Error { .. })
    }

    fn shift(&mut self, delta: isize) {
        self.start = self.start.saturating_add_signed(delta);
        self.end = self.end.saturating_add_signed(delta);
    }
}

/// What an edit did to the sentence sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// No sentence changed; offsets after the edit were moved.
    Shifted,
    /// Unsent sentences from the edit on were dropped.
    Dropped,
    /// A sent sentence changed. Coqtop must rewind to the state before it,
    /// after which it is truncated.
    Rollback(SentenceId),
}

#[derive(Debug, Default)]
pub struct Document {
    text: String,
    sentences: Vec<Sentence>,
    locked: usize,
    doomed_from: Option<usize>,
    initial_state_id: Option<StateId>,
    parse_error: Option<SplitError>,
    next_id: u64,
}

fn invalid(message: String) -> EngineError {
    EngineError::InvalidOperation(message)
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sentences(&self) -> &[Sentence] {
        &self.sentences
    }

    pub fn sentence(&self, id: SentenceId) -> Option<&Sentence> {
        self.index_of(id).map(|i| &self.sentences[i])
    }

    /// Number of sentences in the locked prefix.
    pub const fn locked_len(&self) -> usize {
        self.locked
    }

    /// Locked sentences that are not waiting to be rolled back.
    pub fn live_locked(&self) -> &[Sentence] {
        &self.sentences[..self.doomed_from.unwrap_or(self.locked)]
    }

    pub fn locked_end(&self) -> usize {
        self.live_locked().last().map_or(0, |s| s.end)
    }

    pub const fn initial_state_id(&self) -> Option<StateId> {
        self.initial_state_id
    }

    pub fn set_initial_state_id(&mut self, state_id: StateId) {
        self.initial_state_id = Some(state_id);
    }

    /// Splitter failure found by the last extension, if the text still has it.
    pub const fn parse_error(&self) -> Option<&SplitError> {
        self.parse_error.as_ref()
    }

    pub fn index_of(&self, id: SentenceId) -> Option<usize> {
        self.sentences.iter().position(|s| s.id == id)
    }

    pub fn index_of_state(&self, state_id: StateId) -> Option<usize> {
        self.sentences
            .iter()
            .position(|s| s.state_id == Some(state_id))
    }

    /// State coqtop must be at before sentence `index` is added: the last
    /// state id among its predecessors, or the initial one.
    pub fn state_id_before(&self, index: usize) -> Option<StateId> {
        self.sentences[..index.min(self.sentences.len())]
            .iter()
            .rev()
            .find_map(|s| s.state_id)
            .or(self.initial_state_id)
    }

    /// State id of the end of the locked prefix.
    pub fn tip_state_id(&self) -> Option<StateId> {
        self.state_id_before(self.locked)
    }

    /// The last locked sentence, when it is in error.
    pub fn blocking_error(&self) -> Option<&Sentence> {
        self.live_locked().last().filter(|s| s.is_error())
    }

    fn push_span(&mut self, span: Range<usize>) -> SentenceId {
        let id = SentenceId(self.next_id);
        self.next_id += 1;
        self.sentences.push(Sentence {
            id,
            text: self.text[span.clone()].to_string(),
            start: span.start,
            end: span.end,
            state: SentenceState::Unprocessed,
            state_id: None,
            processed: false,
        });
        id
    }

    fn split_next(&mut self) -> Result<Option<SentenceId>, EngineError> {
        let from = self.sentences.last().map_or(0, |s| s.end);
        match sentence::next_sentence(&self.text, from) {
            Ok(span) => {
                self.parse_error = None;
                Ok(span.map(|span| self.push_span(span)))
            }
            Err(e) => {
                let error = EngineError::ParseAmbiguity {
                    offset: e.offset(),
                    reason: e.to_string(),
                };
                self.parse_error = Some(e);
                Err(error)
            }
        }
    }

    /// Split sentences until one ends at or past `offset` or the text runs
    /// out. Returns the sentences created by this call.
    pub fn extend_to(&mut self, offset: usize) -> Result<Vec<SentenceId>, EngineError> {
        let mut created = Vec::new();
        while self.sentences.last().is_none_or(|s| s.end < offset) {
            match self.split_next()? {
                Some(id) => created.push(id),
                None => break,
            }
        }
        Ok(created)
    }

    /// The first unlocked sentence, splitting it off the text if needed.
    pub fn extend_next(&mut self) -> Result<Option<SentenceId>, EngineError> {
        if let Some(next) = self.sentences.get(self.locked) {
            return Ok(Some(next.id));
        }
        self.split_next()
    }

    fn locked_index(&self, id: SentenceId) -> Result<usize, EngineError> {
        match self.index_of(id) {
            Some(index) if index < self.locked => Ok(index),
            Some(_) => Err(invalid(format!("sentence {} was never sent", id.0))),
            None => Err(invalid(format!("no sentence {}", id.0))),
        }
    }

    /// Lock the first unprocessed sentence as sent.
    pub fn mark_pending(&mut self, id: SentenceId) -> Result<(), EngineError> {
        let index = self
            .index_of(id)
            .ok_or_else(|| invalid(format!("no sentence {}", id.0)))?;
        if index != self.locked || self.doomed_from.is_some() {
            return Err(invalid(format!(
                "sentence {} does not follow the locked prefix",
                id.0
            )));
        }
        self.sentences[index].state = SentenceState::Pending;
        self.locked += 1;
        Ok(())
    }

    pub fn mark_valid(
        &mut self,
        id: SentenceId,
        state_id: StateId,
        axiom: bool,
    ) -> Result<(), EngineError> {
        let index = self.locked_index(id)?;
        let sentence = &mut self.sentences[index];
        sentence.state_id = Some(state_id);
        sentence.state = SentenceState::Valid(if axiom {
            Validity::AxiomDependent
        } else {
            Validity::Ordinary
        });
        Ok(())
    }

    /// Record that the sentence relies on an axiom. Other states are kept.
    pub fn mark_axiom(&mut self, index: usize) {
        if let Some(sentence) = self.sentences.get_mut(index) {
            if matches!(sentence.state, SentenceState::Valid(_)) {
                sentence.state = SentenceState::Valid(Validity::AxiomDependent);
            }
        }
    }

    pub fn mark_processed(&mut self, index: usize) {
        if let Some(sentence) = self.sentences.get_mut(index) {
            sentence.processed = true;
        }
    }

    /// Put a sent sentence in error. A missing or empty location covers the
    /// whole sentence.
    pub fn mark_error(
        &mut self,
        id: SentenceId,
        location: Option<Location>,
        message: impl Into<String>,
    ) -> Result<(), EngineError> {
        let index = self.locked_index(id)?;
        let sentence = &mut self.sentences[index];
        let len = sentence.text.len();
        let range = match location {
            Some(loc) if !loc.is_empty() => loc.start.min(len)..loc.stop.min(len),
            _ => 0..len,
        };
        sentence.state = SentenceState::Error {
            range,
            message: message.into(),
        };
        Ok(())
    }

    /// Discard every sentence from `id` on, newest first.
    pub fn truncate_to(&mut self, id: SentenceId) -> Vec<Sentence> {
        match self.index_of(id) {
            Some(index) => self.truncate_at(index),
            None => Vec::new(),
        }
    }

    /// Discard every sentence from `index` on, newest first.
    pub fn truncate_at(&mut self, index: usize) -> Vec<Sentence> {
        if index >= self.sentences.len() {
            return Vec::new();
        }
        self.locked = self.locked.min(index);
        self.doomed_from = self.doomed_from.filter(|&d| d < index);
        let mut discarded: Vec<_> = self.sentences.drain(index..).collect();
        discarded.reverse();
        discarded
    }

    /// Index of the first locked sentence ending past `offset`.
    pub fn first_locked_past(&self, offset: usize) -> Option<usize> {
        self.live_locked().iter().position(|s| s.end > offset)
    }

    /// Replace `range` of the text and reconcile the sentences with it.
    pub fn replace(
        &mut self,
        range: Range<usize>,
        replacement: &str,
    ) -> Result<Reconciliation, EngineError> {
        if range.start > range.end
            || range.end > self.text.len()
            || !self.text.is_char_boundary(range.start)
            || !self.text.is_char_boundary(range.end)
        {
            return Err(invalid(format!(
                "edit range {range:?} is outside the document"
            )));
        }
        let old_end = range.end;
        let start = range.start;
        self.text.replace_range(range, replacement);
        Ok(self.reconcile_edit(start, old_end, start + replacement.len()))
    }

    /// Replace the whole text, reconciling only the part that differs.
    pub fn set_text(&mut self, text: &str) -> Reconciliation {
        let old = self.text.as_bytes();
        let new = text.as_bytes();
        let mut prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
        while !text.is_char_boundary(prefix) || !self.text.is_char_boundary(prefix) {
            prefix -= 1;
        }
        let max_suffix = old.len().min(new.len()) - prefix;
        let mut suffix = old
            .iter()
            .rev()
            .zip(new.iter().rev())
            .take(max_suffix)
            .take_while(|(a, b)| a == b)
            .count();
        while !text.is_char_boundary(new.len() - suffix)
            || !self.text.is_char_boundary(old.len() - suffix)
        {
            suffix -= 1;
        }
        if prefix == old.len() && prefix == new.len() {
            return Reconciliation::Shifted;
        }
        let old_end = old.len() - suffix;
        let new_end = new.len() - suffix;
        self.text = text.to_string();
        self.reconcile_edit(prefix, old_end, new_end)
    }

    /// Bring the sentences in line with a text whose bytes
    /// `start..old_end` were replaced by `start..new_end`.
    ///
    /// The text is re-split from the last sentence boundary before the edit.
    /// Sentences before the edit must come out unchanged and sentences after
    /// it shifted; the first that does not is where the document diverges.
    #[allow(clippy::cast_possible_wrap)]
    pub fn reconcile_edit(
        &mut self,
        start: usize,
        old_end: usize,
        new_end: usize,
    ) -> Reconciliation {
        self.parse_error = None;
        let delta = new_end as isize - old_end as isize;
        let live = self.doomed_from.unwrap_or(self.sentences.len());

        let Some(first) = self.sentences[..live].iter().position(|s| s.end >= start) else {
            return Reconciliation::Shifted;
        };
        let mut pos = if first == 0 {
            0
        } else {
            self.sentences[first - 1].end
        };

        let mut index = first;
        let diverged = loop {
            if index >= live {
                break None;
            }
            let old = &self.sentences[index];
            let after_edit = old.start >= old_end;
            let expected = if old.end <= start {
                Some(old.span())
            } else if after_edit {
                Some(old.start.saturating_add_signed(delta)..old.end.saturating_add_signed(delta))
            } else {
                None
            };
            let found = sentence::next_sentence(&self.text, pos).ok().flatten();
            match (expected, found) {
                (Some(expected), Some(found)) if expected == found => {
                    if after_edit {
                        for sentence in &mut self.sentences[index..live] {
                            sentence.shift(delta);
                        }
                        break None;
                    }
                    pos = found.end;
                    index += 1;
                }
                _ => break Some(index),
            }
        };

        let Some(index) = diverged else {
            return Reconciliation::Shifted;
        };
        if index < self.locked {
            let id = self.sentences[index].id;
            debug!("Edit invalidates sent sentence {}", id.0);
            self.sentences.truncate(self.locked);
            self.doomed_from = Some(self.doomed_from.map_or(index, |d| d.min(index)));
            Reconciliation::Rollback(id)
        } else {
            self.sentences.truncate(index);
            Reconciliation::Dropped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROOF: &str = "Lemma foo: True. Proof. trivial. Qed.";

    fn texts(doc: &Document) -> Vec<&str> {
        doc.sentences().iter().map(|s| s.text.as_str()).collect()
    }

    /// Lock and validate the first `n` sentences with state ids 2, 3, ...
    fn validate(doc: &mut Document, n: usize) {
        doc.set_initial_state_id(StateId(1));
        for i in 0..n {
            let id = doc.extend_next().unwrap().unwrap();
            doc.mark_pending(id).unwrap();
            doc.mark_valid(id, StateId(i as u32 + 2), false).unwrap();
        }
    }

    #[test]
    fn test_extend_to_is_idempotent() {
        let mut doc = Document::new(PROOF);
        let created = doc.extend_to(PROOF.find("trivial").unwrap()).unwrap();
        assert_eq!(created.len(), 3);
        assert_eq!(texts(&doc), ["Lemma foo: True.", "Proof.", "trivial."]);
        assert!(doc.extend_to(5).unwrap().is_empty());
        assert!(doc.extend_to(PROOF.find("trivial").unwrap()).unwrap().is_empty());
        assert_eq!(doc.extend_to(PROOF.len() + 10).unwrap().len(), 1);
        assert!(doc.extend_to(PROOF.len() + 10).unwrap().is_empty());
    }

    #[test]
    fn test_extend_reports_parse_ambiguity() {
        let mut doc = Document::new("Proof. (* open");
        assert!(doc.extend_next().unwrap().is_some());
        doc.mark_pending(doc.sentences()[0].id).unwrap();
        assert_eq!(
            doc.extend_next(),
            Err(EngineError::ParseAmbiguity {
                offset: 7,
                reason: "comment opened at offset 7 is never closed".to_string(),
            })
        );
        assert!(doc.parse_error().is_some());
    }

    #[test]
    fn test_locking_is_contiguous() {
        let mut doc = Document::new(PROOF);
        doc.extend_to(PROOF.len()).unwrap();
        let ids: Vec<_> = doc.sentences().iter().map(|s| s.id).collect();
        assert!(doc.mark_pending(ids[1]).is_err());
        assert!(doc.mark_valid(ids[0], StateId(2), false).is_err());
        doc.mark_pending(ids[0]).unwrap();
        assert_eq!(doc.locked_len(), 1);
        assert_eq!(doc.sentences()[0].state, SentenceState::Pending);
    }

    #[test]
    fn test_state_id_before_skips_failed_sentences() {
        let mut doc = Document::new(PROOF);
        validate(&mut doc, 2);
        let third = doc.extend_next().unwrap().unwrap();
        doc.mark_pending(third).unwrap();
        doc.mark_error(third, None, "bad").unwrap();
        assert_eq!(doc.state_id_before(0), Some(StateId(1)));
        assert_eq!(doc.state_id_before(2), Some(StateId(3)));
        assert_eq!(doc.tip_state_id(), Some(StateId(3)));
        assert_eq!(doc.blocking_error().map(|s| s.id), Some(third));
    }

    #[test]
    fn test_error_range_defaults_to_whole_sentence() {
        let mut doc = Document::new(PROOF);
        validate(&mut doc, 1);
        let id = doc.sentences()[0].id;
        doc.mark_error(id, Some(Location { start: 3, stop: 3 }), "x").unwrap();
        assert!(matches!(
            &doc.sentences()[0].state,
            SentenceState::Error { range, .. } if *range == (0..16)
        ));
        doc.mark_error(id, Some(Location { start: 6, stop: 99 }), "x").unwrap();
        assert!(matches!(
            &doc.sentences()[0].state,
            SentenceState::Error { range, .. } if *range == (6..16)
        ));
    }

    #[test]
    fn test_truncate_returns_newest_first() {
        let mut doc = Document::new(PROOF);
        validate(&mut doc, 3);
        let second = doc.sentences()[1].id;
        let discarded = doc.truncate_to(second);
        assert_eq!(
            discarded.iter().map(|s| s.text.as_str()).collect::<Vec<_>>(),
            ["trivial.", "Proof."]
        );
        assert_eq!(doc.locked_len(), 1);
        assert_eq!(doc.tip_state_id(), Some(StateId(2)));
    }

    #[test]
    fn test_edit_inside_locked_sentence_requests_rollback() {
        let mut doc = Document::new(PROOF);
        validate(&mut doc, 3);
        let second = doc.sentences()[1].id;
        let at = PROOF.find("Proof").unwrap() + 2;
        assert_eq!(doc.replace(at..at, "o"), Ok(Reconciliation::Rollback(second)));
        // Still locked until coqtop confirms the rollback.
        assert_eq!(doc.locked_len(), 3);
        assert_eq!(doc.live_locked().len(), 1);
        assert_eq!(doc.state_id_before(1), Some(StateId(2)));
        doc.truncate_to(second);
        assert_eq!(texts(&doc), ["Lemma foo: True."]);
        let next = doc.extend_next().unwrap().unwrap();
        assert_eq!(doc.sentence(next).unwrap().text, "Prooof.");
    }

    #[test]
    fn test_edit_before_locked_prefix_end_in_whitespace_shifts() {
        let mut doc = Document::new(PROOF);
        validate(&mut doc, 2);
        doc.extend_to(PROOF.len()).unwrap();
        let at = PROOF.find(" Proof").unwrap();
        assert_eq!(doc.replace(at..at, "\n\n"), Ok(Reconciliation::Shifted));
        assert_eq!(doc.locked_len(), 2);
        let proof = &doc.sentences()[1];
        assert_eq!(&doc.text()[proof.span()], "Proof.");
        let qed = &doc.sentences()[3];
        assert_eq!(&doc.text()[qed.span()], "Qed.");
    }

    #[test]
    fn test_edit_in_unprocessed_suffix_drops_locally() {
        let mut doc = Document::new(PROOF);
        validate(&mut doc, 2);
        doc.extend_to(PROOF.len()).unwrap();
        let at = PROOF.find("trivial").unwrap();
        assert_eq!(
            doc.replace(at..at + "trivial".len(), "exact I"),
            Ok(Reconciliation::Dropped)
        );
        assert_eq!(doc.sentences().len(), 2);
        assert_eq!(doc.locked_len(), 2);
    }

    #[test]
    fn test_edit_after_everything_keeps_sentences() {
        let mut doc = Document::new(PROOF);
        validate(&mut doc, 4);
        let end = PROOF.len();
        assert_eq!(
            doc.replace(end..end, "\nCheck foo."),
            Ok(Reconciliation::Shifted)
        );
        assert_eq!(doc.sentences().len(), 4);
    }

    #[test]
    fn test_edit_removing_terminator_space_invalidates() {
        let mut doc = Document::new(PROOF);
        validate(&mut doc, 4);
        let at = PROOF.find(" Qed").unwrap();
        let third = doc.sentences()[2].id;
        assert_eq!(doc.replace(at..at + 1, ""), Ok(Reconciliation::Rollback(third)));
    }

    #[test]
    fn test_edit_opening_comment_invalidates() {
        let mut doc = Document::new(PROOF);
        validate(&mut doc, 4);
        let at = PROOF.find("trivial").unwrap();
        let third = doc.sentences()[2].id;
        assert_eq!(doc.replace(at..at, "(* "), Ok(Reconciliation::Rollback(third)));
    }

    #[test]
    fn test_set_text_diffs_against_current() {
        let mut doc = Document::new(PROOF);
        validate(&mut doc, 4);
        let first = doc.sentences()[0].id;
        assert_eq!(doc.set_text(PROOF), Reconciliation::Shifted);
        let edited = PROOF.replace("True", "False");
        assert_eq!(doc.set_text(&edited), Reconciliation::Rollback(first));
        assert_eq!(doc.text(), edited);
    }

    #[test]
    fn test_rejects_edit_outside_text() {
        let mut doc = Document::new("Qed.");
        assert!(doc.replace(2..10, "").is_err());
    }
}
