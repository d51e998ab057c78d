//! Property tests for the cross-module invariants in `spec.md` §8 (the
//! general "must hold for all valid inputs" list, as opposed to the
//! literal end-to-end scenarios, which live as ordinary unit tests
//! alongside the component they exercise).

#![cfg(test)]

use proptest::prelude::*;

use crate::decoder;
use crate::enumerator::{self, EnumerationOptions};
use crate::feedback::{constrain, Feedback, FeedbackEntry, ForcedMaps};
use crate::line::{CandidateSpan, Document, Line};
use crate::schema::{FieldDef, FieldSchema};
use crate::scoring;
use crate::state::Label;
use crate::weights::Weights;

fn schema() -> FieldSchema {
    FieldSchema::new(vec![FieldDef::new("Name", 1), FieldDef::new("Phone", 3)], "Noise")
}

fn lines_from(texts: &[String]) -> Vec<Line> {
    texts.iter().enumerate().map(|(i, t)| Line { index: i, text: t.clone() }).collect()
}

/// One span per non-empty line, covering the whole line.
fn whole_line_spans(lines: &[Line]) -> Vec<Vec<CandidateSpan>> {
    lines.iter().map(|l| if l.text.is_empty() { vec![] } else { vec![CandidateSpan::new(0, l.text.len())] }).collect()
}

proptest! {
    /// Invariants 1-3: `decode` is total and per-line field counts and
    /// labels stay within the schema's vocabulary for arbitrary line text.
    #[test]
    fn decode_is_total_with_known_labels(texts in prop::collection::vec("[a-zA-Z0-9 .@-]{0,16}", 1..8)) {
        let lines = lines_from(&texts);
        let spans = whole_line_spans(&lines);
        let schema = schema();
        let weights = Weights::new();
        let result = decoder::decode(&lines, &spans, &weights, &schema, &EnumerationOptions::default());

        prop_assert_eq!(result.sequence.len(), lines.len());
        for (i, state) in result.sequence.iter().enumerate() {
            prop_assert_eq!(state.fields.len(), spans[i].len());
            for label in &state.fields {
                let name = label.name(&schema);
                prop_assert!(schema.is_known_label(name));
            }
        }
    }

    /// Invariant 4: a field declared `max_allowed = 1` never appears twice
    /// among one line's enumerated labels, across arbitrary word counts.
    #[test]
    fn single_occurrence_field_never_duplicated(words in prop::collection::vec("[A-Za-z]{1,6}", 0..6)) {
        let line_text = words.join(" ");
        let mut spans = Vec::new();
        let mut cursor = 0usize;
        for w in &words {
            spans.push(CandidateSpan::new(cursor, cursor + w.len()));
            cursor += w.len() + 1;
        }
        let schema = schema();
        let opts = EnumerationOptions::default();
        let forced = ForcedMaps::new();
        let mut warnings = Vec::new();
        let states = enumerator::enumerate_states(0, &line_text, &spans, &schema, &opts, &forced, &Default::default(), &mut warnings);

        for state in &states {
            let name_count = state.fields.iter().filter(|l| l.field_index() == Some(0)).count();
            prop_assert!(name_count <= 1);
        }
    }

    /// Invariant 6: `extract` is a pure function of its inputs.
    #[test]
    fn extract_is_deterministic(texts in prop::collection::vec("[a-zA-Z0-9 ]{0,12}", 1..5)) {
        let lines = lines_from(&texts);
        let spans = whole_line_spans(&lines);
        let schema = schema();
        let weights = Weights::new();
        let seq = decoder::decode(&lines, &spans, &weights, &schema, &EnumerationOptions::default()).sequence;

        let a = scoring::extract(&lines, &spans, &seq, &schema);
        let b = scoring::extract(&lines, &spans, &seq, &schema);
        prop_assert_eq!(a, b);
    }

    /// Invariant 9: a whitespace-only candidate span is always assigned the
    /// noise label by the enumerator (and therefore the decoder), whatever
    /// the surrounding text looks like.
    #[test]
    fn whitespace_spans_are_always_noise(prefix in "[a-zA-Z]{1,6}", ws_len in 1usize..4, suffix in "[a-zA-Z]{1,6}") {
        let ws = " ".repeat(ws_len);
        let line_text = format!("{prefix}{ws}{suffix}");
        let spans = vec![
            CandidateSpan::new(0, prefix.len()),
            CandidateSpan::new(prefix.len(), prefix.len() + ws.len()),
            CandidateSpan::new(prefix.len() + ws.len(), line_text.len()),
        ];
        let schema = schema();
        let opts = EnumerationOptions::default();
        let forced = ForcedMaps::new();
        let mut warnings = Vec::new();
        let states = enumerator::enumerate_states(0, &line_text, &spans, &schema, &opts, &forced, &Default::default(), &mut warnings);

        for state in &states {
            prop_assert_eq!(state.fields[1], Label::Noise);
        }
    }

    /// Invariant 12: normalizing an already-normalized feedback log (i.e.
    /// re-running `constrain` on the sanitized spans with the same
    /// feedback) produces the same forced maps and the same spans again.
    #[test]
    fn feedback_normalization_is_idempotent(start_line in 0usize..5, span_len in 1usize..4) {
        let texts: Vec<String> = (0..8).map(|i| format!("line number {i} here")).collect();
        let doc = Document::new(&texts.join("\n"));
        let end_line = (start_line + span_len).min(doc.lines.len() - 1);
        let spans_per_line: Vec<Vec<CandidateSpan>> = doc.lines.iter().map(|l| vec![CandidateSpan::new(0, l.text.len())]).collect();
        let schema = schema();
        let feedback = Feedback(vec![FeedbackEntry::Record { start_line, end_line }]);

        let mut w1 = Vec::new();
        let (spans1, forced1) = constrain(&doc.lines, &spans_per_line, &doc, &feedback, &schema, 8, &mut w1);

        let mut w2 = Vec::new();
        let (spans2, forced2) = constrain(&doc.lines, &spans1, &doc, &feedback, &schema, 8, &mut w2);

        prop_assert_eq!(spans1, spans2);
        for l in 0..doc.lines.len() {
            prop_assert_eq!(forced1.forced_boundary(l), forced2.forced_boundary(l));
        }
    }
}
