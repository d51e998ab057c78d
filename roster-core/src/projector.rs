//! The entity projector: walks a decoded [`JointSequence`] into a nested
//! tree of [`RecordSpan`]/[`SubEntitySpan`]/[`FieldSpan`] with per-span
//! confidences.
//!
//! A three-level fold: lines into sub-entities by `entity_type`,
//! sub-entities into records by boundary code.

use crate::feedback::SubEntityHint;
use crate::features::{self, FeatureContext};
use crate::line::{CandidateSpan, Document};
use crate::schema::FieldSchema;
use crate::scoring;
use crate::state::{EntityType, JointSequence, Label};
use crate::weights::Weights;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpan {
    pub line_index: usize,
    pub start: usize,
    pub end: usize,
    pub file_start: usize,
    pub file_end: usize,
    pub text: String,
    pub field_type: String,
    pub confidence: f64,
    pub entity_start: usize,
    pub entity_end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubEntitySpan {
    pub start_line: usize,
    pub end_line: usize,
    pub file_start: usize,
    pub file_end: usize,
    pub entity_type: EntityType,
    pub fields: Vec<FieldSpan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordSpan {
    pub start_line: usize,
    pub end_line: usize,
    pub file_start: usize,
    pub file_end: usize,
    pub sub_entities: Vec<SubEntitySpan>,
}

/// Converts a decoded sequence into records (`spec.md` §4.5's `project`
/// contract). `sub_entity_hints` come from [`crate::feedback::ForcedMaps`]
/// when this is a feedback-constrained re-decode; pass `&[]` for a plain
/// forward projection.
pub fn project(
    doc: &Document,
    spans_per_line: &[Vec<CandidateSpan>],
    joint_seq: &JointSequence,
    weights: &Weights,
    schema: &FieldSchema,
    sub_entity_hints: &[SubEntityHint],
) -> Vec<RecordSpan> {
    let lines = &doc.lines;
    if joint_seq.is_empty() {
        return vec![];
    }

    let mut seq = joint_seq.clone().normalize_first_line();
    annotate_entity_types_if_absent(lines, spans_per_line, &mut seq, weights, schema);
    warn_on_unsupported_guardian_assertions(&seq);

    let mut records = Vec::new();
    let mut start_line = 0usize;
    for t in 1..=seq.len() {
        let at_boundary = t == seq.len() || seq[t].boundary.is_begin();
        if at_boundary {
            let end_line = t - 1;
            records.push(build_record(doc, spans_per_line, &seq, weights, schema, start_line, end_line, sub_entity_hints));
            start_line = t;
        }
    }
    records
}

fn build_record(
    doc: &Document,
    spans_per_line: &[Vec<CandidateSpan>],
    seq: &JointSequence,
    weights: &Weights,
    schema: &FieldSchema,
    start_line: usize,
    end_line: usize,
    sub_entity_hints: &[SubEntityHint],
) -> RecordSpan {
    let file_start = doc.line_start(start_line);
    let file_end = doc.file_offset(end_line, doc.lines[end_line].text.len());

    let mut sub_entities = Vec::new();
    let mut group_start = start_line;
    for t in (start_line + 1)..=(end_line + 1) {
        let boundary = t > end_line || !same_entity_type(&seq[t], &seq[group_start]);
        if boundary {
            let group_end = t - 1;
            if let Some(entity_type) = seq[group_start].entity_type.clone() {
                if !entity_type.is_unknown() {
                    sub_entities.push(build_sub_entity(
                        doc,
                        spans_per_line,
                        seq,
                        weights,
                        schema,
                        group_start,
                        group_end,
                        entity_type,
                        sub_entity_hints,
                    ));
                }
            }
            group_start = t;
        }
    }

    RecordSpan { start_line, end_line, file_start, file_end, sub_entities }
}

fn same_entity_type(a: &crate::state::JointState, b: &crate::state::JointState) -> bool {
    match (&a.entity_type, &b.entity_type) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[allow(clippy::too_many_arguments)]
fn build_sub_entity(
    doc: &Document,
    spans_per_line: &[Vec<CandidateSpan>],
    seq: &JointSequence,
    weights: &Weights,
    schema: &FieldSchema,
    start_line: usize,
    end_line: usize,
    entity_type: EntityType,
    sub_entity_hints: &[SubEntityHint],
) -> SubEntitySpan {
    let lines = &doc.lines;
    let mut fields = Vec::new();
    let mut tight_start: Option<usize> = None;
    let mut tight_end: Option<usize> = None;

    for t in start_line..=end_line {
        let spans = &spans_per_line[t];
        let state = &seq[t];
        for (k, span) in spans.iter().enumerate() {
            let label = state.fields.get(k).copied().unwrap_or(Label::Noise);
            let whitespace = span.is_whitespace_only(&lines[t].text);
            let effective_label = if whitespace { Label::Noise } else { label };

            let file_start = doc.file_offset(t, span.start);
            let file_end = doc.file_offset(t, span.end);
            let confidence = span_confidence(lines, t, spans, k, effective_label, weights, schema, whitespace);

            if !effective_label.is_noise() {
                tight_start = Some(tight_start.map_or(file_start, |v: usize| v.min(file_start)));
                tight_end = Some(tight_end.map_or(file_end, |v: usize| v.max(file_end)));
            }

            fields.push(FieldSpan {
                line_index: t,
                start: span.start,
                end: span.end,
                file_start,
                file_end,
                text: span.text(&lines[t].text).to_string(),
                field_type: effective_label.name(schema).to_string(),
                confidence,
                entity_start: 0,
                entity_end: 0,
            });
        }
    }

    let hint = sub_entity_hints.iter().find(|h| h.start_line == start_line && h.end_line == end_line);
    let (file_start, file_end) = match hint {
        Some(h) => (h.file_start, h.file_end),
        None => (
            tight_start.unwrap_or(doc.line_start(start_line)),
            tight_end.unwrap_or(doc.file_offset(end_line, lines[end_line].text.len())),
        ),
    };

    for f in &mut fields {
        f.entity_start = f.file_start.saturating_sub(file_start);
        f.entity_end = f.file_end.saturating_sub(file_start);
    }

    SubEntitySpan { start_line, end_line, file_start, file_end, entity_type, fields }
}

#[allow(clippy::too_many_arguments)]
fn span_confidence(
    lines: &[crate::line::Line],
    line_index: usize,
    spans: &[CandidateSpan],
    span_index: usize,
    assigned_label: Label,
    weights: &Weights,
    schema: &FieldSchema,
    whitespace: bool,
) -> f64 {
    if weights.is_empty() {
        return 0.5;
    }

    let labels: Vec<&str> = schema.labels().collect();
    let mut scores: Vec<f64> = labels
        .iter()
        .map(|name| {
            let label = Label::from_name(name, schema).expect("schema label round-trips");
            let mut s = scoring::segment_contribution(weights, lines, line_index, spans, span_index, label, schema);
            if whitespace && !label.is_noise() {
                s -= 1.0e6;
            }
            s
        })
        .collect();
    if whitespace {
        if let Some(noise_idx) = labels.iter().position(|n| *n == schema.noise_label()) {
            scores[noise_idx] += 1.0e6;
        }
    }

    let probs = scoring::softmax(&scores);
    let assigned_index = labels.iter().position(|n| *n == assigned_label.name(schema)).unwrap_or(labels.len() - 1);
    probs[assigned_index]
}

fn annotate_entity_types_if_absent(
    lines: &[crate::line::Line],
    spans_per_line: &[Vec<CandidateSpan>],
    seq: &mut JointSequence,
    weights: &Weights,
    schema: &FieldSchema,
) {
    if seq.iter().any(|s| s.entity_type.is_some()) {
        return;
    }

    let raw: Vec<EntityType> = (0..seq.len())
        .map(|t| {
            let ctx = FeatureContext::for_line(lines, t, &spans_per_line[t], schema);
            let primary = weights.get("line.primary_likely") * feature_value(&ctx, "line.primary_likely");
            let guardian = weights.get("line.guardian_likely") * feature_value(&ctx, "line.guardian_likely");
            if guardian > primary && guardian > 0.0 {
                EntityType::Guardian
            } else if primary > 0.0 {
                EntityType::Primary
            } else {
                EntityType::Unknown
            }
        })
        .collect();

    for t in 0..seq.0.len() {
        let final_type = match &raw[t] {
            EntityType::Guardian => {
                let lower = t.saturating_sub(3);
                let nearby_primary = raw[lower..t].iter().any(|e| matches!(e, EntityType::Primary))
                    || raw.get(t + 1).map(|e| matches!(e, EntityType::Primary)).unwrap_or(false);
                if nearby_primary { EntityType::Guardian } else { EntityType::Unknown }
            }
            other => other.clone(),
        };
        seq.0[t].entity_type = Some(final_type);
    }
}

fn feature_value(ctx: &FeatureContext, id: &str) -> f64 {
    features::BOUNDARY_FEATURES.iter().find(|(fid, _)| *fid == id).map(|(_, f)| f(ctx)).unwrap_or(0.0)
}

/// `spec.md` §9's open question: a user-asserted `Guardian` entity type is
/// authoritative and is never downgraded, unlike the heuristic pass above.
/// We only surface a warning when one appears with no nearby `Primary`.
fn warn_on_unsupported_guardian_assertions(seq: &JointSequence) {
    for (t, state) in seq.iter().enumerate() {
        if !matches!(state.entity_type, Some(EntityType::Guardian)) {
            continue;
        }
        let lower = t.saturating_sub(3);
        let nearby_primary = seq.0[lower..t].iter().any(|s| matches!(s.entity_type, Some(EntityType::Primary)))
            || seq.0.get(t + 1).map(|s| matches!(s.entity_type, Some(EntityType::Primary))).unwrap_or(false);
        if !nearby_primary {
            log::warn!("line {t} is asserted Guardian with no nearby Primary; keeping the assertion as authoritative");
        }
    }
}
