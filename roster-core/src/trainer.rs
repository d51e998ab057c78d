//! The online trainer: perceptron-style weight updates driven by sparse
//! user feedback, plus targeted nudges, an enforce-asserted loop, boundary
//! nudging, and a stabilization pass.
//!
//! The core update (step 6 below) diffs a gold and a predicted feature
//! vector and applies `weight += lr * (gold - pred)` per surviving feature.
//! The extra passes — remove-specific localization, targeted nudges,
//! boundary nudging, stabilization — layer on top of it, all routed through
//! [`crate::scoring::extract`] so the gradient direction is never computed
//! two different ways.

use std::collections::HashSet;

use crate::decoder;
use crate::enumerator::EnumerationOptions;
use crate::error::DecodeWarning;
use crate::feedback::{self, Feedback, FeedbackEntry, FieldAction, ForcedMaps};
use crate::features::{self, FeatureContext};
use crate::line::{CandidateSpan, Document};
use crate::schema::FieldSchema;
use crate::scoring;
use crate::state::{Boundary, JointSequence, JointState, Label};
use crate::validators;
use crate::weights::Weights;

#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub learning_rate: f64,
    pub stabilization_factor: f64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self { learning_rate: 0.1, stabilization_factor: 0.05 }
    }
}

#[derive(Debug, Clone)]
pub struct TrainResult {
    pub prediction: JointSequence,
    pub sanitized_spans: Vec<Vec<CandidateSpan>>,
    pub warnings: Vec<DecodeWarning>,
}

/// `update_weights_from_feedback` from `spec.md` §4.6. `weights` is
/// mutated in place; the returned sequence is the final, post-overridden
/// prediction.
pub fn update_weights_from_feedback(
    doc: &Document,
    spans_per_line: &[Vec<CandidateSpan>],
    joint_seq: &JointSequence,
    feedback: &Feedback,
    weights: &mut Weights,
    schema: &FieldSchema,
    enumerate_opts: &EnumerationOptions,
    opts: &TrainOptions,
) -> TrainResult {
    let lines = &doc.lines;
    let mut warnings = Vec::new();

    let (spans_copy, forced) = feedback::constrain(lines, spans_per_line, doc, feedback, schema, enumerate_opts.safe_prefix, &mut warnings);
    let mut run_opts = enumerate_opts.clone();
    run_opts.safe_prefix = run_opts.safe_prefix.max(forced.safe_prefix);

    let mean_conf = mean_confidence(feedback);

    let gold = build_gold_sequence(lines, &spans_copy, joint_seq, &forced, spans_per_line);
    let pred_unforced = decoder::decode(lines, &spans_copy, weights, schema, &run_opts).sequence;

    let v_gold = scoring::extract(lines, &spans_copy, &gold, schema);
    let v_pred = scoring::extract(lines, &spans_copy, &pred_unforced, schema);
    apply_gradient(weights, &v_gold, &v_pred, opts.learning_rate, mean_conf);

    for entry in &feedback.0 {
        if let FeedbackEntry::Field { action: FieldAction::Remove, line_index, start, end, field_type, confidence } = entry {
            if *line_index < lines.len() {
                remove_specific_update(lines, spans_per_line, weights, schema, *line_index, *start, *end, field_type, confidence.unwrap_or(1.0), opts.learning_rate);
            }
        }
    }

    enforce_asserted_loop(lines, &spans_copy, weights, schema, feedback, &run_opts, mean_conf, opts.learning_rate);
    boundary_nudging(lines, &spans_copy, weights, schema, &forced, &run_opts, mean_conf, opts.learning_rate);

    let final_decode = decoder::decode_with_forced(lines, &spans_copy, weights, schema, &run_opts, &forced);
    let mut prediction = final_decode.sequence;
    warnings.extend(final_decode.warnings);

    apply_deterministic_overrides(&mut prediction, &spans_copy, &forced);
    stabilization_pass(lines, &spans_copy, weights, schema, joint_seq, &prediction, feedback, opts.learning_rate, opts.stabilization_factor);

    TrainResult { prediction, sanitized_spans: spans_copy, warnings }
}

fn mean_confidence(feedback: &Feedback) -> f64 {
    let confidences: Vec<f64> = feedback
        .0
        .iter()
        .filter_map(|e| match e {
            FeedbackEntry::Field { confidence, .. } => Some(confidence.unwrap_or(1.0)),
            _ => None,
        })
        .collect();
    if confidences.is_empty() {
        1.0
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    }
}

fn build_gold_sequence(
    lines: &[crate::line::Line],
    spans_copy: &[Vec<CandidateSpan>],
    prior: &JointSequence,
    forced: &ForcedMaps,
    original_spans: &[Vec<CandidateSpan>],
) -> JointSequence {
    let mut states = Vec::with_capacity(lines.len());
    for t in 0..lines.len() {
        let boundary = forced.forced_boundary(t).unwrap_or_else(|| prior.0.get(t).map(|s| s.boundary).unwrap_or(Boundary::Continue));
        let fields: Vec<Label> = spans_copy[t]
            .iter()
            .map(|span| {
                if let Some(label) = forced.forced_label(t, *span) {
                    return label;
                }
                if let Some(idx) = original_spans.get(t).and_then(|os| os.iter().position(|s| s == span)) {
                    if let Some(prior_state) = prior.0.get(t) {
                        if let Some(label) = prior_state.fields.get(idx) {
                            return *label;
                        }
                    }
                }
                Label::Noise
            })
            .collect();
        let entity_type = forced.forced_entity_type(t).cloned();
        states.push(JointState { boundary, fields, entity_type });
    }
    JointSequence(states)
}

fn apply_gradient(weights: &mut Weights, gold: &std::collections::HashMap<String, f64>, pred: &std::collections::HashMap<String, f64>, lr: f64, mean_conf: f64) {
    let mut keys: HashSet<&String> = gold.keys().collect();
    keys.extend(pred.keys());
    for k in keys {
        let g = gold.get(k).copied().unwrap_or(0.0);
        let p = pred.get(k).copied().unwrap_or(0.0);
        weights.add(k, lr * mean_conf * (g - p));
    }
}

fn label_feature_for(name: &str) -> String {
    match name {
        "Phone" => "segment.is_phone".to_string(),
        "Email" => "segment.is_email".to_string(),
        "ExtID" => "segment.is_extid".to_string(),
        "Name" => "segment.is_name".to_string(),
        "PreferredName" => "segment.is_preferred_name".to_string(),
        "Birthdate" => "segment.is_birthdate".to_string(),
        other => format!("segment.is_{}", other.to_lowercase()),
    }
}

#[allow(clippy::too_many_arguments)]
fn remove_specific_update(
    lines: &[crate::line::Line],
    original_spans: &[Vec<CandidateSpan>],
    weights: &mut Weights,
    schema: &FieldSchema,
    line_index: usize,
    start: usize,
    end: usize,
    field_type: &str,
    confidence: f64,
    lr: f64,
) {
    let line_text = &lines[line_index].text;
    let has_original = original_spans[line_index].iter().any(|s| s.overlaps(&CandidateSpan::new(start, end)));
    let text = &line_text[start.min(line_text.len())..end.min(line_text.len())];

    if has_original {
        if let Some((ts, te)) = validators::locate_tight_region(text, field_type) {
            let tight_span = CandidateSpan::new(start + ts, start + te);
            let removed_label = Label::from_name(field_type, schema).unwrap_or(Label::Noise);
            let one_line = std::slice::from_ref(&lines[line_index]);
            let one_spans = vec![vec![tight_span]];

            let seq_removed = JointSequence(vec![JointState::new(Boundary::Begin, vec![removed_label])]);
            let seq_noise = JointSequence(vec![JointState::new(Boundary::Begin, vec![Label::Noise])]);

            let v_removed = scoring::extract(one_line, &one_spans, &seq_removed, schema);
            let v_noise = scoring::extract(one_line, &one_spans, &seq_noise, schema);

            let mut keys: HashSet<&String> = v_removed.keys().collect();
            keys.extend(v_noise.keys());
            for k in keys {
                let r = v_removed.get(k).copied().unwrap_or(0.0);
                let n = v_noise.get(k).copied().unwrap_or(0.0);
                weights.add(k, lr * confidence * (n - r));
            }
            return;
        }
    }

    weights.add(&label_feature_for(field_type), -2.0 * lr * confidence);
}

#[allow(clippy::too_many_arguments)]
fn targeted_nudge(
    lines: &[crate::line::Line],
    spans: &[Vec<CandidateSpan>],
    weights: &mut Weights,
    schema: &FieldSchema,
    line_index: usize,
    span_index: usize,
    target_label: Label,
    current_label: Label,
    lr: f64,
    mean_conf: f64,
) {
    let gap = |w: &Weights, label: Label| scoring::segment_contribution(w, lines, line_index, &spans[line_index], span_index, label, schema);
    let base_gap = gap(weights, target_label) - gap(weights, current_label);
    if base_gap > 0.0 {
        return; // already favors the target
    }

    let feature_id = label_feature_for(target_label.name(schema));
    if try_nudge_feature(weights, &feature_id, base_gap, &gap, target_label, current_label, lr, mean_conf) {
        return;
    }

    let mut best: Option<(&'static str, f64)> = None;
    for (id, _) in features::SEGMENT_FEATURES {
        if *id == feature_id {
            continue;
        }
        let mut probe = weights.clone();
        probe.add(id, 1.0);
        let slope = (gap(&probe, target_label) - gap(&probe, current_label)) - base_gap;
        if slope > 0.0 && best.map(|(_, s)| slope > s).unwrap_or(true) {
            best = Some((id, slope));
        }
    }

    if let Some((id, _)) = best {
        try_nudge_feature(weights, id, base_gap, &gap, target_label, current_label, lr, mean_conf);
    } else {
        weights.add(&feature_id, 8.0 * lr * mean_conf);
    }
}

#[allow(clippy::too_many_arguments)]
fn try_nudge_feature(
    weights: &mut Weights,
    feature_id: &str,
    base_gap: f64,
    gap: &dyn Fn(&Weights, Label) -> f64,
    target_label: Label,
    current_label: Label,
    lr: f64,
    mean_conf: f64,
) -> bool {
    let mut probe = weights.clone();
    probe.add(feature_id, 1.0);
    let new_gap = gap(&probe, target_label) - gap(&probe, current_label);
    let slope = new_gap - base_gap;
    if slope <= 0.0 {
        return false;
    }
    let needed = -base_gap / slope;
    weights.add(feature_id, needed.max(0.5) * lr * mean_conf);
    true
}

#[allow(clippy::too_many_arguments)]
fn enforce_asserted_loop(
    lines: &[crate::line::Line],
    spans: &[Vec<CandidateSpan>],
    weights: &mut Weights,
    schema: &FieldSchema,
    feedback: &Feedback,
    opts: &EnumerationOptions,
    mean_conf: f64,
    lr: f64,
) {
    for _ in 0..2 {
        // Unconstrained: forcing the asserted label via `forced` would make
        // every assertion trivially agree with the decode, so the natural
        // (unforced) preference is what targeted_nudge needs to correct.
        let decoded = decoder::decode(lines, spans, weights, schema, opts).sequence;
        let mut changed = false;

        for entry in &feedback.0 {
            if let FeedbackEntry::Field { action: FieldAction::Add, line_index, start, end, field_type, .. } = entry {
                if *line_index >= lines.len() {
                    continue;
                }
                let Some(span_index) = spans[*line_index].iter().position(|s| s.start == *start && s.end == *end) else { continue };
                let target = match Label::from_name(field_type, schema) {
                    Some(l) => l,
                    None => continue,
                };
                let decoded_label = decoded.0[*line_index].fields.get(span_index).copied().unwrap_or(Label::Noise);
                if decoded_label != target {
                    targeted_nudge(lines, spans, weights, schema, *line_index, span_index, target, decoded_label, lr, mean_conf);
                    changed = true;
                }
            }
        }

        if !changed {
            break;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn boundary_nudging(
    lines: &[crate::line::Line],
    spans: &[Vec<CandidateSpan>],
    weights: &mut Weights,
    schema: &FieldSchema,
    forced: &ForcedMaps,
    opts: &EnumerationOptions,
    mean_conf: f64,
    lr: f64,
) {
    for _ in 0..5 {
        // Same reasoning as enforce_asserted_loop: decode unconstrained so
        // the asserted boundary isn't trivially satisfied by construction.
        let decoded = decoder::decode(lines, spans, weights, schema, opts).sequence;
        let mut changed = false;

        for (s, e) in &forced.asserted_ranges {
            if decoded.0[*s].boundary != Boundary::Begin {
                nudge_boundary_line(weights, lines, spans, schema, *s, true, lr, mean_conf);
                changed = true;
            }
            for t in (*s + 1)..=*e {
                if decoded.0[t].boundary == Boundary::Begin {
                    nudge_boundary_line(weights, lines, spans, schema, t, false, lr, mean_conf);
                    changed = true;
                }
            }
        }

        if !changed {
            break;
        }
    }
}

fn nudge_boundary_line(weights: &mut Weights, lines: &[crate::line::Line], spans: &[Vec<CandidateSpan>], schema: &FieldSchema, line_index: usize, desired_begin: bool, lr: f64, mean_conf: f64) {
    let ctx = FeatureContext::for_line(lines, line_index, &spans[line_index], schema);
    let desired_sign = if desired_begin { 1.0 } else { -1.0 };
    for (id, f) in features::BOUNDARY_FEATURES {
        let v = f(&ctx);
        let delta = (desired_sign * v).clamp(-0.5, 0.5);
        weights.add(id, delta * 0.5 * lr * mean_conf);
    }
}

fn apply_deterministic_overrides(prediction: &mut JointSequence, spans: &[Vec<CandidateSpan>], forced: &ForcedMaps) {
    for (t, spans_t) in spans.iter().enumerate() {
        for (k, span) in spans_t.iter().enumerate() {
            if let Some(label) = forced.forced_label(t, *span) {
                if let Some(state) = prediction.0.get_mut(t) {
                    if let Some(slot) = state.fields.get_mut(k) {
                        *slot = label;
                    }
                }
            }
        }
        if let Some(boundary) = forced.forced_boundary(t) {
            if let Some(state) = prediction.0.get_mut(t) {
                state.boundary = boundary;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn stabilization_pass(
    lines: &[crate::line::Line],
    spans: &[Vec<CandidateSpan>],
    weights: &mut Weights,
    schema: &FieldSchema,
    prior: &JointSequence,
    updated: &JointSequence,
    feedback: &Feedback,
    lr: f64,
    stabilization_factor: f64,
) {
    let mentioned: HashSet<(usize, usize, usize)> = feedback
        .0
        .iter()
        .filter_map(|e| match e {
            FeedbackEntry::Field { line_index, start, end, .. } => Some((*line_index, *start, *end)),
            _ => None,
        })
        .collect();

    for t in 0..spans.len() {
        let Some(prior_state) = prior.0.get(t) else { continue };
        let Some(updated_state) = updated.0.get(t) else { continue };
        for (k, span) in spans[t].iter().enumerate() {
            if mentioned.contains(&(t, span.start, span.end)) {
                continue;
            }
            let prior_label = prior_state.fields.get(k).copied().unwrap_or(Label::Noise);
            let updated_label = updated_state.fields.get(k).copied().unwrap_or(Label::Noise);
            if prior_label != updated_label || updated_label.is_noise() {
                continue;
            }

            let ctx = FeatureContext::for_line(lines, t, &spans[t], schema).with_span(k, updated_label);
            let span_text = ctx.span_text();
            for (id, f) in features::SEGMENT_FEATURES {
                let value = scoring::label_aware_value(id, f(&ctx), updated_label, schema, span_text);
                let contrib = value.max(0.0);
                if contrib > 0.0 {
                    weights.add(id, lr * stabilization_factor * contrib);
                }
            }
        }
    }
}
