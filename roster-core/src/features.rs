//! The feature registry: a library of pure scoring functions over a
//! [`FeatureContext`], split into boundary and segment families.
//!
//! Every feature has one fixed string id and produces one bounded score,
//! rather than an open vocabulary of generated keys (`word=brasil`,
//! `prefix2=pe`, …) — the decoder collects the active feature set into two
//! plain slices once per decode and walks them in a tight loop, with no
//! per-line dynamic dispatch.

use std::collections::HashSet;

use unicode_segmentation::UnicodeSegmentation;

use crate::line::{CandidateSpan, Line};
use crate::schema::FieldSchema;
use crate::state::Label;
use crate::validators;

/// Everything a feature function may read. Boundary features only use
/// `lines`/`line_index`; segment features additionally use `spans`,
/// `span_index`, and (for the two `field.*` features) `assigned_label` —
/// the label the decoder is currently scoring this span under, included so
/// those two features can reason about consistency-with-label without
/// breaking purity (it's just more context, not a side effect).
pub struct FeatureContext<'a> {
    pub lines: &'a [Line],
    pub line_index: usize,
    pub spans: &'a [CandidateSpan],
    pub span_index: Option<usize>,
    pub assigned_label: Option<Label>,
    pub schema: &'a FieldSchema,
}

impl<'a> FeatureContext<'a> {
    pub fn for_line(lines: &'a [Line], line_index: usize, spans: &'a [CandidateSpan], schema: &'a FieldSchema) -> Self {
        Self {
            lines,
            line_index,
            spans,
            span_index: None,
            assigned_label: None,
            schema,
        }
    }

    pub fn with_span(mut self, span_index: usize, assigned_label: Label) -> Self {
        self.span_index = Some(span_index);
        self.assigned_label = Some(assigned_label);
        self
    }

    pub fn line(&self) -> &'a Line {
        &self.lines[self.line_index]
    }

    pub fn prev_line(&self) -> Option<&'a Line> {
        self.line_index.checked_sub(1).map(|i| &self.lines[i])
    }

    pub fn next_line(&self) -> Option<&'a Line> {
        self.lines.get(self.line_index + 1)
    }

    pub fn span(&self) -> CandidateSpan {
        self.spans[self.span_index.expect("segment feature requires a span")]
    }

    pub fn span_text(&self) -> &'a str {
        self.span().text(&self.line().text)
    }
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

fn clamp11(v: f64) -> f64 {
    v.clamp(-1.0, 1.0)
}

fn leading_whitespace(text: &str) -> usize {
    text.chars().take_while(|c| c.is_whitespace()).count()
}

fn lower_token_set(text: &str) -> HashSet<String> {
    text.unicode_words().map(|w| w.to_lowercase()).collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn words(text: &str) -> Vec<&str> {
    text.unicode_words().collect()
}

fn looks_like_key_value(text: &str) -> bool {
    let trimmed = text.trim();
    if let Some(idx) = trimmed.find(':') {
        return idx > 0 && idx < trimmed.len() - 1;
    }
    trimmed.contains('\t')
}

fn starts_with_list_marker(text: &str) -> bool {
    let trimmed = text.trim_start();
    let markers = ["- ", "* ", "\u{2022} ", "+ "];
    if markers.iter().any(|m| trimmed.starts_with(m)) {
        return true;
    }
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    !digits.is_empty() && trimmed[digits.len()..].starts_with(['.', ')'])
}

fn has_contact_pattern(text: &str) -> bool {
    words(text)
        .iter()
        .any(|w| validators::is_phone(w) || validators::is_email(w))
        || validators::is_email(text)
        || validators::is_phone(text)
}

fn field_like_token_count(text: &str) -> usize {
    words(text)
        .iter()
        .filter(|w| {
            validators::is_phone(w)
                || validators::is_email(w)
                || validators::is_extid(w)
                || validators::is_birthdate(w)
        })
        .count()
}

fn guardian_prefix(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    ["parent:", "guardian:", "emergency:", "emergency contact:", "next of kin:"]
        .iter()
        .any(|p| lower.starts_with(p))
}

// ---------------------------------------------------------------------
// Boundary features
// ---------------------------------------------------------------------

pub fn line_indentation_delta(ctx: &FeatureContext) -> f64 {
    let cur = leading_whitespace(&ctx.line().text) as f64;
    let prev = ctx
        .prev_line()
        .map(|l| leading_whitespace(&l.text) as f64)
        .unwrap_or(cur);
    clamp11((cur - prev) / 8.0)
}

pub fn line_lexical_similarity_drop(ctx: &FeatureContext) -> f64 {
    let cur = lower_token_set(&ctx.line().text);
    match ctx.prev_line() {
        None => 0.0,
        Some(prev) => clamp01(1.0 - jaccard(&cur, &lower_token_set(&prev.text))),
    }
}

pub fn line_blank_line(ctx: &FeatureContext) -> f64 {
    if ctx.line().is_blank() {
        1.0
    } else {
        0.0
    }
}

pub fn line_hanging_continuation(ctx: &FeatureContext) -> f64 {
    let cur = &ctx.line().text;
    let Some(prev) = ctx.prev_line() else {
        return 0.0;
    };
    let more_indented = leading_whitespace(cur) > leading_whitespace(&prev.text);
    let prev_unterminated = !prev.text.trim_end().ends_with(['.', '!', '?', ':']);
    if more_indented && prev_unterminated && !cur.trim().is_empty() {
        1.0
    } else {
        0.0
    }
}

pub fn line_leading_extid(ctx: &FeatureContext) -> f64 {
    match words(&ctx.line().text).first() {
        Some(w) if validators::is_extid(w) && !validators::is_name(w) => 1.0,
        _ => 0.0,
    }
}

pub fn line_has_name(ctx: &FeatureContext) -> f64 {
    let ws = words(&ctx.line().text);
    if ws.windows(2).any(|pair| validators::is_name(pair[0]) && validators::is_name(pair[1])) {
        1.0
    } else {
        0.0
    }
}

pub fn line_has_birthdate(ctx: &FeatureContext) -> f64 {
    if validators::is_birthdate(&ctx.line().text) || words(&ctx.line().text).iter().any(|w| validators::is_birthdate(w)) {
        1.0
    } else {
        0.0
    }
}

pub fn line_has_key_value_pattern(ctx: &FeatureContext) -> f64 {
    if looks_like_key_value(&ctx.line().text) {
        1.0
    } else {
        0.0
    }
}

pub fn line_has_list_marker(ctx: &FeatureContext) -> f64 {
    if starts_with_list_marker(&ctx.line().text) {
        1.0
    } else {
        0.0
    }
}

pub fn line_short_token_count(ctx: &FeatureContext) -> f64 {
    let ws = words(&ctx.line().text);
    if ws.is_empty() {
        return 0.0;
    }
    let short = ws.iter().filter(|w| w.len() <= 2).count() as f64;
    clamp01(short / ws.len() as f64)
}

pub fn line_next_has_contact(ctx: &FeatureContext) -> f64 {
    match ctx.next_line() {
        Some(next) if has_contact_pattern(&next.text) => 1.0,
        _ => 0.0,
    }
}

pub fn line_field_density(ctx: &FeatureContext) -> f64 {
    let ws = words(&ctx.line().text);
    if ws.is_empty() {
        return 0.0;
    }
    clamp01(field_like_token_count(&ctx.line().text) as f64 / ws.len() as f64)
}

pub fn line_avg_token_length(ctx: &FeatureContext) -> f64 {
    let ws = words(&ctx.line().text);
    if ws.is_empty() {
        return 0.0;
    }
    let avg = ws.iter().map(|w| w.len()).sum::<usize>() as f64 / ws.len() as f64;
    clamp01(avg / 12.0)
}

pub fn line_primary_likely(ctx: &FeatureContext) -> f64 {
    if guardian_prefix(&ctx.line().text) {
        return 0.0;
    }
    if line_has_name(ctx) > 0.0 {
        1.0
    } else {
        0.0
    }
}

pub fn line_guardian_likely(ctx: &FeatureContext) -> f64 {
    if guardian_prefix(&ctx.line().text) {
        1.0
    } else {
        0.0
    }
}

pub type BoundaryFeatureFn = fn(&FeatureContext) -> f64;
pub type SegmentFeatureFn = fn(&FeatureContext) -> f64;

pub const BOUNDARY_FEATURES: &[(&str, BoundaryFeatureFn)] = &[
    ("line.indentation_delta", line_indentation_delta),
    ("line.lexical_similarity_drop", line_lexical_similarity_drop),
    ("line.blank_line", line_blank_line),
    ("line.hanging_continuation", line_hanging_continuation),
    ("line.leading_extid", line_leading_extid),
    ("line.has_name", line_has_name),
    ("line.has_birthdate", line_has_birthdate),
    ("line.has_key_value_pattern", line_has_key_value_pattern),
    ("line.has_list_marker", line_has_list_marker),
    ("line.short_token_count", line_short_token_count),
    ("line.next_has_contact", line_next_has_contact),
    ("line.field_density", line_field_density),
    ("line.avg_token_length", line_avg_token_length),
    ("line.primary_likely", line_primary_likely),
    ("line.guardian_likely", line_guardian_likely),
];

// ---------------------------------------------------------------------
// Segment features
// ---------------------------------------------------------------------

pub fn segment_token_count_bucket(ctx: &FeatureContext) -> f64 {
    match words(ctx.span_text()).len() {
        0 => 0.0,
        1 => 0.3,
        2 => 0.6,
        _ => 0.9,
    }
}

pub fn segment_numeric_ratio(ctx: &FeatureContext) -> f64 {
    let text = ctx.span_text();
    if text.is_empty() {
        return 0.0;
    }
    clamp01(text.chars().filter(|c| c.is_ascii_digit()).count() as f64 / text.chars().count() as f64)
}

pub fn segment_is_email(ctx: &FeatureContext) -> f64 {
    bool_score(validators::is_email(ctx.span_text()))
}

pub fn segment_is_phone(ctx: &FeatureContext) -> f64 {
    bool_score(validators::is_phone(ctx.span_text()))
}

pub fn segment_is_extid(ctx: &FeatureContext) -> f64 {
    bool_score(validators::is_extid(ctx.span_text()))
}

pub fn segment_is_name(ctx: &FeatureContext) -> f64 {
    bool_score(validators::is_name(ctx.span_text()))
}

pub fn segment_is_preferred_name(ctx: &FeatureContext) -> f64 {
    bool_score(validators::is_preferred_name(ctx.span_text()))
}

pub fn segment_is_birthdate(ctx: &FeatureContext) -> f64 {
    bool_score(validators::is_birthdate(ctx.span_text()))
}

pub fn segment_all_caps(ctx: &FeatureContext) -> f64 {
    let text = ctx.span_text();
    bool_score(!text.trim().is_empty() && text.chars().filter(|c| c.is_alphabetic()).all(|c| c.is_uppercase()))
}

pub fn segment_title_case(ctx: &FeatureContext) -> f64 {
    let ws = words(ctx.span_text());
    bool_score(!ws.is_empty() && ws.iter().all(|w| validators::is_name(w)))
}

pub fn segment_initial_caps(ctx: &FeatureContext) -> f64 {
    bool_score(ctx.span_text().trim().chars().next().map(|c| c.is_uppercase()).unwrap_or(false))
}

pub fn segment_mixed_case(ctx: &FeatureContext) -> f64 {
    let text = ctx.span_text();
    let has_upper = text.chars().any(|c| c.is_uppercase());
    let has_lower = text.chars().any(|c| c.is_lowercase());
    bool_score(has_upper && has_lower)
}

pub fn segment_digit_pattern(ctx: &FeatureContext) -> f64 {
    let digits = validators::digits_only(ctx.span_text());
    bool_score(matches!(digits.len(), 7 | 10 | 11))
}

pub fn segment_char_length_bucket(ctx: &FeatureContext) -> f64 {
    match ctx.span_text().len() {
        0..=2 => 0.1,
        3..=6 => 0.4,
        7..=15 => 0.7,
        _ => 1.0,
    }
}

pub fn segment_prefix_2(ctx: &FeatureContext) -> f64 {
    char_pair_score(ctx.span_text().chars().take(2))
}

pub fn segment_suffix_2(ctx: &FeatureContext) -> f64 {
    let text = ctx.span_text();
    let count = text.chars().count();
    char_pair_score(text.chars().skip(count.saturating_sub(2)))
}

fn char_pair_score(chars: impl Iterator<Item = char>) -> f64 {
    let sum: u32 = chars.map(|c| c.to_ascii_lowercase() as u32).sum();
    clamp01((sum % 100) as f64 / 100.0)
}

pub fn segment_has_special_chars(ctx: &FeatureContext) -> f64 {
    bool_score(ctx.span_text().chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()))
}

pub fn segment_punctuation_ratio(ctx: &FeatureContext) -> f64 {
    let text = ctx.span_text();
    if text.is_empty() {
        return 0.0;
    }
    clamp01(text.chars().filter(|c| c.is_ascii_punctuation()).count() as f64 / text.chars().count() as f64)
}

pub fn token_context_isolation(ctx: &FeatureContext) -> f64 {
    let Some(idx) = ctx.span_index else { return 0.0 };
    let line_text = &ctx.line().text;
    let before_ws = idx
        .checked_sub(1)
        .and_then(|i| ctx.spans.get(i))
        .map(|s| s.is_whitespace_only(line_text))
        .unwrap_or(true);
    let after_ws = ctx
        .spans
        .get(idx + 1)
        .map(|s| s.is_whitespace_only(line_text))
        .unwrap_or(true);
    bool_score(before_ws && after_ws)
}

/// How consistent the span's relative position on the line (`start / len`)
/// is with where its currently-hypothesized label "usually" sits: earlier
/// schema fields (lower index) are expected earlier on the line.
pub fn field_relative_position_consistency(ctx: &FeatureContext) -> f64 {
    let Some(Label::Field(idx)) = ctx.assigned_label else {
        return 0.0;
    };
    let line_len = ctx.line().len().max(1) as f64;
    let relative_pos = ctx.span().start as f64 / line_len;
    let num_fields = ctx.schema.fields().len().max(1) as f64;
    let expected_pos = idx as f64 / num_fields;
    clamp01(1.0 - (relative_pos - expected_pos).abs())
}

/// Small penalty contribution for assigning a label far along a line to an
/// optional (repeatable, i.e. not the sole occurrence) field — encourages
/// the decoder to prefer earlier, denser assignments.
pub fn field_optional_penalty(ctx: &FeatureContext) -> f64 {
    let Some(Label::Field(idx)) = ctx.assigned_label else {
        return 0.0;
    };
    let field = &ctx.schema.fields()[idx];
    if !field.is_repeatable() {
        return 0.0;
    }
    let line_len = ctx.line().len().max(1) as f64;
    let relative_pos = ctx.span().start as f64 / line_len;
    -clamp01(relative_pos * 0.5)
}

fn bool_score(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

pub const SEGMENT_FEATURES: &[(&str, SegmentFeatureFn)] = &[
    ("segment.token_count_bucket", segment_token_count_bucket),
    ("segment.numeric_ratio", segment_numeric_ratio),
    ("segment.is_email", segment_is_email),
    ("segment.is_phone", segment_is_phone),
    ("segment.is_extid", segment_is_extid),
    ("segment.is_name", segment_is_name),
    ("segment.is_preferred_name", segment_is_preferred_name),
    ("segment.is_birthdate", segment_is_birthdate),
    ("segment.all_caps", segment_all_caps),
    ("segment.title_case", segment_title_case),
    ("segment.initial_caps", segment_initial_caps),
    ("segment.mixed_case", segment_mixed_case),
    ("segment.digit_pattern", segment_digit_pattern),
    ("segment.char_length_bucket", segment_char_length_bucket),
    ("segment.prefix_2", segment_prefix_2),
    ("segment.suffix_2", segment_suffix_2),
    ("segment.has_special_chars", segment_has_special_chars),
    ("segment.punctuation_ratio", segment_punctuation_ratio),
    ("token.context_isolation", token_context_isolation),
    ("field.relative_position_consistency", field_relative_position_consistency),
    ("field.optional_penalty", field_optional_penalty),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldSchema};

    fn schema() -> FieldSchema {
        FieldSchema::new(vec![FieldDef::new("Name", 1), FieldDef::new("Phone", 3)], "Noise")
    }

    fn lines(texts: &[&str]) -> Vec<Line> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Line { index: i, text: t.to_string() })
            .collect()
    }

    #[test]
    fn blank_line_feature() {
        let ls = lines(&["", "hello"]);
        let schema = schema();
        let ctx = FeatureContext::for_line(&ls, 0, &[], &schema);
        assert_eq!(line_blank_line(&ctx), 1.0);
        let ctx = FeatureContext::for_line(&ls, 1, &[], &schema);
        assert_eq!(line_blank_line(&ctx), 0.0);
    }

    #[test]
    fn lexical_similarity_drop_first_line_is_zero() {
        let ls = lines(&["a b c"]);
        let schema = schema();
        let ctx = FeatureContext::for_line(&ls, 0, &[], &schema);
        assert_eq!(line_lexical_similarity_drop(&ctx), 0.0);
    }

    #[test]
    fn segment_is_phone_detects_digits() {
        let ls = lines(&["410-111-1111"]);
        let schema = schema();
        let spans = vec![CandidateSpan::new(0, 12)];
        let ctx = FeatureContext::for_line(&ls, 0, &spans, &schema).with_span(0, Label::Noise);
        assert_eq!(segment_is_phone(&ctx), 1.0);
    }

    #[test]
    fn all_boundary_and_segment_ids_are_unique() {
        let mut ids: Vec<&str> = BOUNDARY_FEATURES.iter().map(|(id, _)| *id).collect();
        ids.extend(SEGMENT_FEATURES.iter().map(|(id, _)| *id));
        let unique: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(ids.len(), unique.len());
    }
}
