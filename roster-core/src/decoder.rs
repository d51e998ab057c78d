//! The joint Viterbi decoder: a dynamic program over the per-line lattice
//! of candidate [`JointState`]s.
//!
//! Standard `O(|S_t|·|S_{t-1}|)` max-reduction with backpointers, over a
//! per-line lattice whose width varies with `enumerate_states`'s bounded
//! output rather than a fixed tag set. Emission and transition scoring live
//! in [`crate::scoring`] so the decoder, [`crate::projector`], and
//! [`crate::trainer`] never disagree on the label-aware coupling rule.

use crate::enumerator::{self, EnumerationOptions};
use crate::error::DecodeWarning;
use crate::feedback::ForcedMaps;
use crate::line::{CandidateSpan, Line};
use crate::schema::FieldSchema;
use crate::scoring;
use crate::state::{JointSequence, JointState};
use crate::weights::Weights;

#[derive(Debug, Clone)]
pub struct DecodeResult {
    pub sequence: JointSequence,
    pub score: f64,
    pub warnings: Vec<DecodeWarning>,
}

/// Unconstrained forward decode: `decode(lines, spans_per_line, weights,
/// schema, opts)` from `spec.md` §4.3, with an empty forced-constraint set.
pub fn decode(
    lines: &[Line],
    spans_per_line: &[Vec<CandidateSpan>],
    weights: &Weights,
    schema: &FieldSchema,
    opts: &EnumerationOptions,
) -> DecodeResult {
    decode_with_forced(lines, spans_per_line, weights, schema, opts, &ForcedMaps::new())
}

/// Feedback-constrained decode: same lattice, but `enumerate_states` and
/// the emission scorer both see `forced`'s per-line constraints.
pub fn decode_with_forced(
    lines: &[Line],
    spans_per_line: &[Vec<CandidateSpan>],
    weights: &Weights,
    schema: &FieldSchema,
    opts: &EnumerationOptions,
    forced: &ForcedMaps,
) -> DecodeResult {
    let mut warnings = Vec::new();
    if lines.is_empty() {
        return DecodeResult { sequence: JointSequence::default(), score: 0.0, warnings };
    }

    let empty_whitespace = Default::default();
    let states_per_line: Vec<Vec<JointState>> = (0..lines.len())
        .map(|t| {
            enumerator::enumerate_states(
                t,
                &lines[t].text,
                &spans_per_line[t],
                schema,
                opts,
                forced,
                &empty_whitespace,
                &mut warnings,
            )
        })
        .collect();

    let emission_per_line: Vec<Vec<f64>> = states_per_line
        .iter()
        .enumerate()
        .map(|(t, states)| {
            states
                .iter()
                .map(|s| scoring::emission_score(weights, lines, t, &spans_per_line[t], s, schema))
                .collect()
        })
        .collect();

    let mut v: Vec<Vec<f64>> = Vec::with_capacity(lines.len());
    let mut backptr: Vec<Vec<usize>> = Vec::with_capacity(lines.len());

    let first_scores: Vec<f64> = states_per_line[0]
        .iter()
        .zip(&emission_per_line[0])
        .map(|(s, e)| e + scoring::start_bias(s, &lines[0]))
        .collect();
    v.push(first_scores);
    backptr.push(vec![0; states_per_line[0].len()]);

    for t in 1..lines.len() {
        let prev_scores = &v[t - 1];
        let cur_states = &states_per_line[t];
        let mut cur_scores = Vec::with_capacity(cur_states.len());
        let mut cur_back = Vec::with_capacity(cur_states.len());

        for (i, state) in cur_states.iter().enumerate() {
            let mut best_j = 0usize;
            let mut best_score = f64::NEG_INFINITY;
            for (j, prev_state) in states_per_line[t - 1].iter().enumerate() {
                let transition = scoring::transition_score(weights, prev_state.boundary, state.boundary);
                let candidate = prev_scores[j] + transition;
                if candidate > best_score {
                    best_score = candidate;
                    best_j = j;
                }
            }
            cur_scores.push(best_score + emission_per_line[t][i]);
            cur_back.push(best_j);
        }
        v.push(cur_scores);
        backptr.push(cur_back);
    }

    let last_t = lines.len() - 1;
    let (mut best_i, mut best_score) = (0usize, f64::NEG_INFINITY);
    for (i, score) in v[last_t].iter().enumerate() {
        if *score > best_score {
            best_score = *score;
            best_i = i;
        }
    }
    if !best_score.is_finite() {
        best_i = 0;
        best_score = 0.0;
    }

    let mut path = vec![0usize; lines.len()];
    path[last_t] = best_i;
    for t in (1..lines.len()).rev() {
        path[t - 1] = backptr[t][path[t]];
    }

    let mut states: Vec<JointState> = path
        .iter()
        .enumerate()
        .map(|(t, &i)| states_per_line[t][i].clone())
        .collect();

    for (t, state) in states.iter_mut().enumerate() {
        if let Some(entity_type) = forced.forced_entity_type(t) {
            state.entity_type = Some(entity_type.clone());
        }
    }

    for w in &warnings {
        w.log();
    }

    DecodeResult { sequence: JointSequence(states), score: best_score, warnings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{Feedback, FeedbackEntry};
    use crate::line::Document;
    use crate::schema::FieldDef;

    fn schema() -> FieldSchema {
        FieldSchema::new(vec![FieldDef::new("Name", 1), FieldDef::new("Phone", 3)], "Noise")
    }

    #[test]
    fn decode_is_total_and_matches_line_count() {
        let doc = Document::new("Alice\nBob\n\nCarol");
        let spans: Vec<Vec<CandidateSpan>> = doc.lines.iter().map(|l| {
            if l.text.is_empty() { vec![] } else { vec![CandidateSpan::new(0, l.text.len())] }
        }).collect();
        let weights = Weights::new();
        let schema = schema();
        let result = decode(&doc.lines, &spans, &weights, &schema, &EnumerationOptions::default());
        assert_eq!(result.sequence.len(), doc.lines.len());
        for (i, state) in result.sequence.iter().enumerate() {
            assert_eq!(state.fields.len(), spans[i].len());
        }
    }

    #[test]
    fn forced_boundary_is_honored() {
        let doc = Document::new("a\nb\nc\nd");
        let spans: Vec<Vec<CandidateSpan>> = doc.lines.iter().map(|_| vec![]).collect();
        let weights = Weights::new();
        let schema = schema();
        let feedback = Feedback(vec![FeedbackEntry::Record { start_line: 0, end_line: 3 }]);
        let mut warnings = Vec::new();
        let (sanitized, forced) = crate::feedback::constrain(&doc.lines, &spans, &doc, &feedback, &schema, 8, &mut warnings);
        let result = decode_with_forced(&doc.lines, &sanitized, &weights, &schema, &EnumerationOptions::default(), &forced);
        assert!(result.sequence[0].boundary.is_begin());
        assert!(!result.sequence[1].boundary.is_begin());
        assert!(!result.sequence[2].boundary.is_begin());
        assert!(!result.sequence[3].boundary.is_begin());
    }

    #[test]
    fn forced_label_is_honored() {
        let doc = Document::new("1234567890");
        let spans = vec![vec![CandidateSpan::new(0, 10)]];
        let mut weights = Weights::new();
        weights.set("segment.is_extid", 5.0);
        let schema = schema();
        let feedback = Feedback(vec![FeedbackEntry::Field {
            action: crate::feedback::FieldAction::Add,
            line_index: 0,
            start: 0,
            end: 10,
            field_type: "Phone".into(),
            confidence: None,
        }]);
        let mut warnings = Vec::new();
        let (sanitized, forced) = crate::feedback::constrain(&doc.lines, &spans, &doc, &feedback, &schema, 8, &mut warnings);
        let result = decode_with_forced(&doc.lines, &sanitized, &weights, &schema, &EnumerationOptions::default(), &forced);
        let label = result.sequence[0].fields[0];
        assert_eq!(label.name(&schema), "Phone");
    }

    #[test]
    fn exact_ten_digits_prefers_phone_over_extid() {
        let doc = Document::new("1234567890");
        let spans = vec![vec![CandidateSpan::new(0, 10)]];
        let mut weights = Weights::new();
        weights.set("segment.is_phone", 1.0);
        weights.set("segment.is_extid", 1.0);
        let schema = FieldSchema::new(vec![FieldDef::new("Phone", 3), FieldDef::new("ExtID", 3)], "Noise");
        let result = decode(&doc.lines, &spans, &weights, &schema, &EnumerationOptions::default());
        assert_eq!(result.sequence[0].fields[0].name(&schema), "Phone");
    }
}
