//! The feedback constrainer: turns a chronological feedback log into hard
//! decode constraints plus a sanitized candidate-span array.
//!
//! Feedback entries are folded in order, newer entries winning conflicts
//! over the same span, into a forced-assignment map the decoder treats as
//! hard constraints rather than scoring hints.

use std::collections::HashMap;

use crate::error::DecodeWarning;
use crate::line::{CandidateSpan, Document, Line};
use crate::schema::FieldSchema;
use crate::state::{Boundary, EntityType, Label};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAction {
    Add,
    Remove,
}

/// One normalized user correction (`spec.md` §3's "Feedback Entry").
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackEntry {
    Record {
        start_line: usize,
        end_line: usize,
    },
    SubEntity {
        file_start: usize,
        file_end: usize,
        entity_type: EntityType,
    },
    Field {
        action: FieldAction,
        line_index: usize,
        start: usize,
        end: usize,
        field_type: String,
        confidence: Option<f64>,
    },
}

/// An ordered log of feedback entries. Order is significant: conflicts
/// resolve last-wins (`spec.md` §9's "deterministic feedback chronology").
#[derive(Debug, Clone, Default)]
pub struct Feedback(pub Vec<FeedbackEntry>);

/// The three forced maps plus the original sub-entity assertions, produced
/// by [`constrain`]. Represented as flat hashmaps keyed by packed
/// `(line, start, end)` triples per `spec.md` §9's "forced maps as compact
/// lookups" note, rather than a nested `map<line, map<string, label>>`.
#[derive(Debug, Clone, Default)]
pub struct ForcedMaps {
    labels: HashMap<(usize, usize, usize), Label>,
    boundaries: HashMap<usize, Boundary>,
    entity_types: HashMap<usize, EntityType>,
    pub safe_prefix: usize,
    /// Exact file-anchored sub-entity assertions, carried through for the
    /// projector to prefer over its own tightened bounds (`spec.md` §4.5's
    /// `sub_entity_hints`).
    pub sub_entity_hints: Vec<SubEntityHint>,
    /// Union of asserted record and sub-entity line ranges, for the
    /// trainer's boundary-nudging pass (`spec.md` §4.6).
    pub asserted_ranges: Vec<(usize, usize)>,
}

/// A sub-entity assertion's exact file range, as supplied by the user
/// rather than computed from field offsets.
#[derive(Debug, Clone, Copy)]
pub struct SubEntityHint {
    pub file_start: usize,
    pub file_end: usize,
    pub start_line: usize,
    pub end_line: usize,
}

impl ForcedMaps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forced_label(&self, line: usize, span: CandidateSpan) -> Option<Label> {
        self.labels.get(&(line, span.start, span.end)).copied()
    }

    pub fn forced_boundary(&self, line: usize) -> Option<Boundary> {
        self.boundaries.get(&line).copied()
    }

    pub fn forced_entity_type(&self, line: usize) -> Option<&EntityType> {
        self.entity_types.get(&line)
    }

    pub fn set_label(&mut self, line: usize, span: CandidateSpan, label: Label) {
        self.labels.insert((line, span.start, span.end), label);
    }

    pub fn set_boundary(&mut self, line: usize, boundary: Boundary) {
        self.boundaries.insert(line, boundary);
    }

    pub fn clear_boundary(&mut self, line: usize) {
        self.boundaries.remove(&line);
    }

    pub fn set_entity_type(&mut self, line: usize, entity_type: EntityType) {
        self.entity_types.insert(line, entity_type);
    }
}

#[derive(Debug, Clone)]
struct SubEntityAssertion {
    file_start: usize,
    file_end: usize,
    start_line: usize,
    end_line: usize,
    entity_type: EntityType,
}

#[derive(Debug, Clone, Copy)]
struct FieldAssertion {
    start: usize,
    end: usize,
    label: Label,
}

/// Normalizes `feedback` into sanitized candidate spans plus the three
/// forced maps (`spec.md` §4.4). `num_lines` bounds the valid line range
/// for `OutOfRangeLine` checks.
pub fn constrain(
    lines: &[Line],
    spans_per_line: &[Vec<CandidateSpan>],
    doc: &Document,
    feedback: &Feedback,
    schema: &FieldSchema,
    default_safe_prefix: usize,
    warnings: &mut Vec<DecodeWarning>,
) -> (Vec<Vec<CandidateSpan>>, ForcedMaps) {
    let num_lines = lines.len();
    let mut forced = ForcedMaps::new();
    let mut record_ranges: Vec<(usize, usize)> = Vec::new();
    let mut sub_entities: Vec<SubEntityAssertion> = Vec::new();
    let mut field_assertions: HashMap<usize, Vec<FieldAssertion>> = HashMap::new();

    for entry in &feedback.0 {
        match entry {
            FeedbackEntry::Record { start_line, end_line } => {
                if *end_line < *start_line {
                    warnings.push(DecodeWarning::BadFeedbackRange { start: *start_line, end: *end_line });
                    continue;
                }
                if *start_line >= num_lines {
                    warnings.push(DecodeWarning::OutOfRangeLine { line: *start_line, num_lines });
                    continue;
                }
                let end_line = (*end_line).min(num_lines.saturating_sub(1));

                record_ranges.retain(|(s, e)| {
                    let overlaps = *s <= end_line && *start_line <= *e;
                    if overlaps {
                        for l in *s..=*e {
                            forced.clear_boundary(l);
                        }
                    }
                    !overlaps
                });
                record_ranges.push((*start_line, end_line));
                forced.asserted_ranges.retain(|(s, e)| !(*s <= end_line && *start_line <= *e));
                forced.asserted_ranges.push((*start_line, end_line));

                forced.set_boundary(*start_line, Boundary::Begin);
                for l in (*start_line + 1)..=end_line {
                    forced.set_boundary(l, Boundary::Continue);
                }
                if end_line + 1 < num_lines {
                    forced.set_boundary(end_line + 1, Boundary::Begin);
                }
            }
            FeedbackEntry::SubEntity { file_start, file_end, entity_type } => {
                if file_end < file_start {
                    warnings.push(DecodeWarning::BadFeedbackRange { start: *file_start, end: *file_end });
                    continue;
                }
                let (start_line, _) = doc.line_of_offset(*file_start);
                let (end_line_raw, end_off) = doc.line_of_offset(*file_end);
                let end_line = if end_off == 0 && end_line_raw > start_line { end_line_raw - 1 } else { end_line_raw };
                let end_line = end_line.min(num_lines.saturating_sub(1));
                if start_line >= num_lines {
                    warnings.push(DecodeWarning::OutOfRangeLine { line: start_line, num_lines });
                    continue;
                }

                sub_entities.retain(|se| !(se.start_line <= end_line && start_line <= se.end_line));
                sub_entities.push(SubEntityAssertion {
                    file_start: *file_start,
                    file_end: *file_end,
                    start_line,
                    end_line,
                    entity_type: entity_type.clone(),
                });
                forced.sub_entity_hints.retain(|h| !(h.start_line <= end_line && start_line <= h.end_line));
                forced.sub_entity_hints.push(SubEntityHint {
                    file_start: *file_start,
                    file_end: *file_end,
                    start_line,
                    end_line,
                });
                forced.asserted_ranges.retain(|(s, e)| !(*s <= end_line && start_line <= *e));
                forced.asserted_ranges.push((start_line, end_line));

                for l in start_line..=end_line {
                    forced.set_entity_type(l, entity_type.clone());
                }

                let contained = record_ranges.iter().any(|(s, e)| *s <= start_line && end_line <= *e);
                if !contained {
                    forced.set_boundary(start_line, Boundary::Begin);
                    for l in (start_line + 1)..=end_line {
                        forced.set_boundary(l, Boundary::Continue);
                    }
                }
            }
            FeedbackEntry::Field { action, line_index, start, end, field_type, .. } => {
                if *line_index >= num_lines {
                    warnings.push(DecodeWarning::OutOfRangeLine { line: *line_index, num_lines });
                    continue;
                }
                if end < start {
                    warnings.push(DecodeWarning::BadFeedbackRange { start: *start, end: *end });
                    continue;
                }

                let entries = field_assertions.entry(*line_index).or_default();
                entries.retain(|a| !(a.start == *start && a.end == *end));

                let label = match Label::from_name(field_type, schema) {
                    Some(l) => l,
                    None => {
                        warnings.push(DecodeWarning::SchemaMismatch { line: *line_index, label: field_type.clone() });
                        Label::Noise
                    }
                };

                let span = CandidateSpan::new(*start, *end);
                match action {
                    FieldAction::Add => {
                        entries.retain(|a| !CandidateSpan::new(a.start, a.end).overlaps(&span));
                        entries.push(FieldAssertion { start: *start, end: *end, label });
                    }
                    FieldAction::Remove => {
                        entries.push(FieldAssertion { start: *start, end: *end, label: Label::Noise });
                    }
                }
                forced.set_label(*line_index, span, entries.last().unwrap().label);
            }
        }
    }

    let sanitized = sanitize_spans(lines, spans_per_line, doc, &sub_entities, &field_assertions);

    let mut safe_prefix = default_safe_prefix;
    for (line_index, spans) in sanitized.iter().enumerate() {
        for (idx, span) in spans.iter().enumerate() {
            if forced.forced_label(line_index, *span).is_some() {
                safe_prefix = safe_prefix.max(idx + 1);
            }
        }
    }
    forced.safe_prefix = safe_prefix;

    (sanitized, forced)
}

fn line_local_interval(doc: &Document, line_index: usize, line_len: usize, file_start: usize, file_end: usize) -> (usize, usize) {
    let ls = doc.line_start(line_index);
    let le = ls + line_len;
    let s = file_start.max(ls);
    let e = file_end.min(le);
    if s >= e || s < ls {
        return (0, 0);
    }
    (s - ls, e - ls)
}

fn sanitize_spans(
    lines: &[Line],
    spans_per_line: &[Vec<CandidateSpan>],
    doc: &Document,
    sub_entities: &[SubEntityAssertion],
    field_assertions: &HashMap<usize, Vec<FieldAssertion>>,
) -> Vec<Vec<CandidateSpan>> {
    let mut result: Vec<Vec<CandidateSpan>> = spans_per_line.to_vec();

    for se in sub_entities {
        for line_index in se.start_line..=se.end_line {
            if line_index >= lines.len() {
                continue;
            }
            let line_text = &lines[line_index].text;
            let (iv_start, iv_end) = line_local_interval(doc, line_index, line_text.len(), se.file_start, se.file_end);
            if iv_start >= iv_end {
                continue;
            }
            result[line_index] = replace_interval_coverage(&result[line_index], line_text, iv_start, iv_end);
        }
    }

    for (line_index, assertions) in field_assertions {
        if *line_index >= result.len() {
            continue;
        }
        let spans = &mut result[*line_index];
        for a in assertions {
            let asserted = CandidateSpan::new(a.start, a.end);
            spans.retain(|s| *s == asserted || !s.overlaps(&asserted));
            if !spans.iter().any(|s| *s == asserted) {
                spans.push(asserted);
            }
        }
        spans.sort();
        spans.dedup();
    }

    result
}

/// Replaces the portion of `spans` overlapping `[iv_start, iv_end)` with an
/// exact, gap-free, whitespace-trimmed coverage of that interval (`spec.md`
/// §4.4's candidate-span sanitization).
fn replace_interval_coverage(spans: &[CandidateSpan], line_text: &str, iv_start: usize, iv_end: usize) -> Vec<CandidateSpan> {
    let interval = CandidateSpan::new(iv_start, iv_end);
    let outside: Vec<CandidateSpan> = spans.iter().filter(|s| !s.overlaps(&interval)).copied().collect();

    let mut inside: Vec<CandidateSpan> = spans
        .iter()
        .filter(|s| s.overlaps(&interval))
        .map(|s| CandidateSpan::new(s.start.max(iv_start), s.end.min(iv_end)))
        .collect();
    inside.sort();

    let inside = if inside.is_empty() {
        vec![interval]
    } else {
        let mut filled = Vec::new();
        let mut cursor = iv_start;
        for s in &inside {
            if s.start > cursor {
                filled.push(CandidateSpan::new(cursor, s.start));
            }
            filled.push(*s);
            cursor = cursor.max(s.end);
        }
        if cursor < iv_end {
            filled.push(CandidateSpan::new(cursor, iv_end));
        }
        filled
    };

    let mut trimmed = Vec::new();
    for s in inside {
        let text = s.text(line_text);
        let lead = text.len() - text.trim_start().len();
        let trail = text.len() - text.trim_end().len();
        if lead > 0 {
            trimmed.push(CandidateSpan::new(s.start, s.start + lead));
        }
        let core_start = s.start + lead;
        let core_end = s.end - trail;
        if core_start < core_end {
            trimmed.push(CandidateSpan::new(core_start, core_end));
        }
        if trail > 0 && core_end < s.end {
            trimmed.push(CandidateSpan::new(core_end, s.end));
        }
    }

    let mut coalesced: Vec<CandidateSpan> = Vec::new();
    for s in trimmed {
        if let Some(last) = coalesced.last_mut() {
            if last.end == s.start && last.is_whitespace_only(line_text) && s.is_whitespace_only(line_text) {
                *last = CandidateSpan::new(last.start, s.end);
                continue;
            }
        }
        coalesced.push(s);
    }

    let mut result: Vec<CandidateSpan> = outside.into_iter().chain(coalesced).collect();
    result.sort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldSchema};

    fn schema() -> FieldSchema {
        FieldSchema::new(vec![FieldDef::new("Name", 1), FieldDef::new("Phone", 3)], "Noise")
    }

    fn ten_lines() -> (Vec<Line>, Document) {
        let text = (0..10).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let doc = Document::new(&text);
        (doc.lines.clone(), doc)
    }

    #[test]
    fn record_assertion_forces_boundaries() {
        let (lines, doc) = ten_lines();
        let spans_per_line: Vec<Vec<CandidateSpan>> = lines.iter().map(|_| vec![]).collect();
        let schema = schema();
        let feedback = Feedback(vec![FeedbackEntry::Record { start_line: 0, end_line: 4 }]);
        let mut warnings = Vec::new();
        let (_, forced) = constrain(&lines, &spans_per_line, &doc, &feedback, &schema, 8, &mut warnings);

        assert_eq!(forced.forced_boundary(0), Some(Boundary::Begin));
        assert_eq!(forced.forced_boundary(1), Some(Boundary::Continue));
        assert_eq!(forced.forced_boundary(4), Some(Boundary::Continue));
        assert_eq!(forced.forced_boundary(5), Some(Boundary::Begin));
    }

    #[test]
    fn field_toggle_removes_prior_assertion_on_exact_range() {
        let (lines, doc) = ten_lines();
        let spans_per_line: Vec<Vec<CandidateSpan>> = lines.iter().map(|_| vec![]).collect();
        let schema = schema();
        let feedback = Feedback(vec![
            FeedbackEntry::Field { action: FieldAction::Add, line_index: 0, start: 0, end: 4, field_type: "Name".into(), confidence: None },
            FeedbackEntry::Field { action: FieldAction::Remove, line_index: 0, start: 0, end: 4, field_type: "Name".into(), confidence: None },
        ]);
        let mut warnings = Vec::new();
        let (spans, forced) = constrain(&lines, &spans_per_line, &doc, &feedback, &schema, 8, &mut warnings);
        let span = spans[0].iter().find(|s| s.start == 0 && s.end == 4).copied().unwrap();
        assert_eq!(forced.forced_label(0, span), Some(Label::Noise));
    }

    #[test]
    fn unknown_field_type_warns_and_falls_back_to_noise() {
        let (lines, doc) = ten_lines();
        let spans_per_line: Vec<Vec<CandidateSpan>> = lines.iter().map(|_| vec![]).collect();
        let schema = schema();
        let feedback = Feedback(vec![FeedbackEntry::Field {
            action: FieldAction::Add,
            line_index: 0,
            start: 0,
            end: 4,
            field_type: "NotInSchema".into(),
            confidence: None,
        }]);
        let mut warnings = Vec::new();
        let (spans, forced) = constrain(&lines, &spans_per_line, &doc, &feedback, &schema, 8, &mut warnings);
        let span = spans[0].iter().find(|s| s.start == 0 && s.end == 4).copied().unwrap();
        assert_eq!(forced.forced_label(0, span), Some(Label::Noise));
        assert!(warnings.iter().any(|w| matches!(w, DecodeWarning::SchemaMismatch { .. })));
    }

    #[test]
    fn sanitizer_fills_gaps_and_trims_whitespace() {
        let text = "Alice   Smith";
        let doc = Document::new(text);
        let lines = doc.lines.clone();
        let spans_per_line = vec![vec![CandidateSpan::new(0, 5)]];
        let schema = schema();
        let feedback = Feedback(vec![FeedbackEntry::SubEntity {
            file_start: 0,
            file_end: text.len(),
            entity_type: EntityType::Primary,
        }]);
        let mut warnings = Vec::new();
        let (spans, _) = constrain(&lines, &spans_per_line, &doc, &feedback, &schema, 8, &mut warnings);

        let total: usize = spans[0].iter().map(|s| s.len()).sum();
        assert_eq!(total, text.len());
        for w in spans[0].windows(2) {
            assert_eq!(w[0].end, w[1].start);
        }
    }

    #[test]
    fn out_of_range_line_is_skipped_with_warning() {
        let (lines, doc) = ten_lines();
        let spans_per_line: Vec<Vec<CandidateSpan>> = lines.iter().map(|_| vec![]).collect();
        let schema = schema();
        let feedback = Feedback(vec![FeedbackEntry::Field {
            action: FieldAction::Add,
            line_index: 999,
            start: 0,
            end: 4,
            field_type: "Name".into(),
            confidence: None,
        }]);
        let mut warnings = Vec::new();
        let (_, _) = constrain(&lines, &spans_per_line, &doc, &feedback, &schema, 8, &mut warnings);
        assert!(warnings.iter().any(|w| matches!(w, DecodeWarning::OutOfRangeLine { .. })));
    }
}
