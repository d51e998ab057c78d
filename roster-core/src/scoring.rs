//! Shared emission scoring: boundary/segment contributions, label-aware
//! coupling, and the feature-vector extractor.
//!
//! The label-aware weighting rule has to produce identical scores wherever
//! it runs — decoder, projector, trainer, and feature extractor alike — or
//! training silently diverges from decoding. This module is the single
//! place that rule lives; [`decoder`], [`crate::projector`], and
//! [`crate::trainer`] all call into here instead of recomputing it
//! themselves.

use std::collections::HashMap;

use crate::features::{self, FeatureContext};
use crate::line::{CandidateSpan, Line};
use crate::schema::FieldSchema;
use crate::state::{Boundary, JointState, Label};
use crate::validators;
use crate::weights::Weights;

/// Sum of `weight(f_id) * f(ctx)` over every boundary feature — the
/// line-level signal `spec.md` §4.3 calls `boundary_base(t)`.
pub fn boundary_base(weights: &Weights, ctx: &FeatureContext) -> f64 {
    features::BOUNDARY_FEATURES
        .iter()
        .map(|(id, f)| weights.get(id) * f(ctx))
        .sum()
}

/// Raw (line-level) boundary feature values, unweighted — used by
/// [`extract`] to build the trainer's gold/predicted feature vectors.
fn boundary_values(ctx: &FeatureContext) -> impl Iterator<Item = (&'static str, f64)> + '_ {
    features::BOUNDARY_FEATURES.iter().map(move |(id, f)| (*id, f(ctx)))
}

/// The expected label for the small set of features with label-aware
/// coupling (`spec.md` §4.3). `None` means the feature contributes
/// `w * v` unconditionally, regardless of the candidate label.
fn expected_label(feature_id: &str) -> Option<&'static str> {
    match feature_id {
        "segment.is_phone" => Some("Phone"),
        "segment.is_email" => Some("Email"),
        "segment.is_name" => Some("Name"),
        "segment.is_preferred_name" => Some("PreferredName"),
        "segment.is_birthdate" => Some("Birthdate"),
        "segment.is_extid" => Some("ExtID"),
        _ => None,
    }
}

/// Applies the label-aware coupling rule to a raw feature value `v`,
/// returning the signed/scaled coefficient that either the decoder
/// (multiplied by the current weight) or the trainer (accumulated
/// directly, as the gradient's feature value) uses.
///
/// This is the exact rule from `spec.md` §4.3: most label-aware features
/// contribute `+v` when the candidate label matches their expected label
/// and `-0.5*v` otherwise; `segment.is_extid` has its own three-way split
/// driven by [`validators::is_exact_10_or_11_digits`].
pub fn label_aware_value(feature_id: &str, value: f64, label: Label, schema: &FieldSchema, span_text: &str) -> f64 {
    let Some(expected) = expected_label(feature_id) else {
        return value;
    };

    if feature_id == "segment.is_extid" && validators::is_exact_10_or_11_digits(span_text) {
        return match label.name(schema) {
            "ExtID" => -0.8 * value,
            "Phone" => 0.7 * value,
            _ => -0.3 * value,
        };
    }

    if label.name(schema) == expected {
        value
    } else {
        -0.5 * value
    }
}

/// `weight(f_id) * label_aware_value(...)` for one segment feature.
fn label_aware_contribution(weights: &Weights, feature_id: &str, value: f64, label: Label, schema: &FieldSchema, span_text: &str) -> f64 {
    weights.get(feature_id) * label_aware_value(feature_id, value, label, schema, span_text)
}

/// Total segment-feature contribution for one span under `label`. Zero for
/// the noise label (`spec.md` §4.3: "If ℓ == noise_label, contribute 0").
pub fn segment_contribution(weights: &Weights, lines: &[Line], line_index: usize, spans: &[CandidateSpan], span_index: usize, label: Label, schema: &FieldSchema) -> f64 {
    if label.is_noise() {
        return 0.0;
    }
    let ctx = FeatureContext::for_line(lines, line_index, spans, schema).with_span(span_index, label);
    let span_text = ctx.span_text();
    features::SEGMENT_FEATURES
        .iter()
        .map(|(id, f)| label_aware_contribution(weights, id, f(&ctx), label, schema, span_text))
        .sum()
}

/// Transition score between two boundary codes. `B→B`, `C→C`, and `any→B`
/// (read as `C→B`) each carry a learned weight; `B→C` — a record opening
/// and its very next line continuing it — is the unsurprising case and
/// always scores `0.0`.
pub fn transition_score(weights: &Weights, prev: Boundary, next: Boundary) -> f64 {
    match (prev, next) {
        (Boundary::Begin, Boundary::Begin) => weights_or(weights, "transition.B_to_B", -0.5),
        (Boundary::Continue, Boundary::Continue) => weights_or(weights, "transition.C_to_C", 0.3),
        (Boundary::Continue, Boundary::Begin) => weights_or(weights, "transition.any_to_B", 0.4),
        (Boundary::Begin, Boundary::Continue) => 0.0,
    }
}

fn weights_or(weights: &Weights, id: &str, default: f64) -> f64 {
    if weights.contains(id) {
        weights.get(id)
    } else {
        default
    }
}

/// `start_bias` from `spec.md` §4.3: `+0.75` if the state opens a record
/// and the first line has visible content, else `0`.
pub fn start_bias(state: &JointState, first_line: &Line) -> f64 {
    if state.boundary.is_begin() && !first_line.text.trim().is_empty() {
        0.75
    } else {
        0.0
    }
}

/// `emission(t, i)` from `spec.md` §4.3: boundary contribution plus the sum
/// of every span's segment contribution.
pub fn emission_score(weights: &Weights, lines: &[Line], line_index: usize, spans: &[CandidateSpan], state: &JointState, schema: &FieldSchema) -> f64 {
    let bctx = FeatureContext::for_line(lines, line_index, spans, schema);
    let base = boundary_base(weights, &bctx);
    let b_contribution = if state.boundary.is_begin() { base } else { -base };
    let f_contribution: f64 = state
        .fields
        .iter()
        .enumerate()
        .map(|(k, label)| segment_contribution(weights, lines, line_index, spans, k, *label, schema))
        .sum();
    b_contribution + f_contribution
}

/// Numerically-stable softmax (`spec.md` §4.5's confidence step, and the
/// same shape as the teacher's `viterbi.rs::scores_to_probs`).
pub fn softmax(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return vec![];
    }
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if sum == 0.0 {
        return vec![1.0 / scores.len() as f64; scores.len()];
    }
    exps.iter().map(|e| e / sum).collect()
}

/// `extract(lines, spans, seq, features, schema) → map<id, real>` from
/// `spec.md` §4.6: the pure, weight-independent feature-vector accountant
/// the trainer diffs between gold and predicted sequences. Line-level
/// boundary contributions accumulate as `+v` for `Begin`, `-v` for
/// `Continue`; span-level contributions use the same [`label_aware_value`]
/// coupling as the decoder, just without a weight multiplied in.
pub fn extract(lines: &[Line], spans_per_line: &[Vec<CandidateSpan>], seq: &crate::state::JointSequence, schema: &FieldSchema) -> HashMap<String, f64> {
    let mut acc: HashMap<String, f64> = HashMap::new();

    for (t, state) in seq.iter().enumerate() {
        let spans = &spans_per_line[t];
        let bctx = FeatureContext::for_line(lines, t, spans, schema);
        let sign = if state.boundary.is_begin() { 1.0 } else { -1.0 };
        for (id, v) in boundary_values(&bctx) {
            *acc.entry(id.to_string()).or_insert(0.0) += sign * v;
        }

        for (k, label) in state.fields.iter().enumerate() {
            if label.is_noise() {
                continue;
            }
            let ctx = FeatureContext::for_line(lines, t, spans, schema).with_span(k, *label);
            let span_text = ctx.span_text();
            for (id, f) in features::SEGMENT_FEATURES {
                let v = label_aware_value(id, f(&ctx), *label, schema, span_text);
                *acc.entry(id.to_string()).or_insert(0.0) += v;
            }
        }
    }

    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldSchema};
    use crate::state::{Boundary, JointSequence, JointState};

    fn schema() -> FieldSchema {
        FieldSchema::new(
            vec![FieldDef::new("Name", 1), FieldDef::new("Phone", 3), FieldDef::new("Email", 3)],
            "Noise",
        )
    }

    #[test]
    fn extid_exact_digits_favor_phone_over_extid() {
        let schema = schema();
        let phone_label = Label::from_name("Phone", &schema).unwrap();
        let v = label_aware_value("segment.is_extid", 1.0, phone_label, &schema, "1234567890");
        assert!(v > 0.0, "exact 10-digit span labeled Phone should get a positive ExtID-feature contribution: {v}");
    }

    #[test]
    fn noise_label_contributes_nothing() {
        let weights = Weights::new();
        let schema = schema();
        let lines = vec![Line { index: 0, text: "hello@example.com".to_string() }];
        let spans = vec![CandidateSpan::new(0, 17)];
        let c = segment_contribution(&weights, &lines, 0, &spans, 0, Label::Noise, &schema);
        assert_eq!(c, 0.0);
    }

    #[test]
    fn extract_is_deterministic() {
        let schema = schema();
        let lines = vec![Line { index: 0, text: "Alice".to_string() }];
        let spans = vec![vec![CandidateSpan::new(0, 5)]];
        let label = Label::from_name("Name", &schema).unwrap();
        let seq = JointSequence(vec![JointState::new(Boundary::Begin, vec![label])]);
        let a = extract(&lines, &spans, &seq, &schema);
        let b = extract(&lines, &spans, &seq, &schema);
        assert_eq!(a, b);
    }

    #[test]
    fn transition_defaults_match_spec() {
        let weights = Weights::new();
        assert_eq!(transition_score(&weights, Boundary::Begin, Boundary::Begin), -0.5);
        assert_eq!(transition_score(&weights, Boundary::Continue, Boundary::Continue), 0.3);
        assert_eq!(transition_score(&weights, Boundary::Continue, Boundary::Begin), 0.4);
        assert_eq!(transition_score(&weights, Boundary::Begin, Boundary::Continue), 0.0);
    }
}
