//! The bounded state enumerator: produces each line's candidate
//! [`JointState`]s under repeatability and cap constraints.
//!
//! Enumeration walks every legal per-line label assignment up to a count cap
//! via backtracking rather than a flat loop, because the constraint set
//! (single-occurrence fields, repeatable caps, a distinct-label budget)
//! prunes the search space far below the naive `(|schema|+1)^|spans|`
//! product.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::DecodeWarning;
use crate::feedback::ForcedMaps;
use crate::line::CandidateSpan;
use crate::schema::FieldSchema;
use crate::state::{Boundary, JointState, Label};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumerationOptions {
    /// Distinct non-noise labels allowed on a single line.
    pub max_unique_fields: usize,
    /// Per-label repetition cap override, keyed by field name. Falls back
    /// to the schema's `max_allowed` when a field has no override here.
    pub max_states_per_field: HashMap<String, usize>,
    /// Only the first `safe_prefix` spans are exhaustively enumerated;
    /// remaining positions default to the noise label.
    pub safe_prefix: usize,
    /// Hard ceiling on emitted states; generation stops at this cap.
    pub max_states: usize,
}

impl Default for EnumerationOptions {
    fn default() -> Self {
        Self {
            max_unique_fields: 3,
            max_states_per_field: HashMap::new(),
            safe_prefix: 8,
            max_states: 2048,
        }
    }
}

impl EnumerationOptions {
    fn cap_for(&self, schema: &FieldSchema, field_index: usize) -> usize {
        let field = &schema.fields()[field_index];
        self.max_states_per_field
            .get(&field.name)
            .copied()
            .unwrap_or(field.max_allowed)
    }
}

struct Budget {
    remaining: usize,
    cap_hit: bool,
}

/// Produces the bounded catalogue of candidate per-line assignments for
/// one line (`spec.md` §4.2's `enumerate_states` contract).
pub fn enumerate_states(
    line_index: usize,
    line_text: &str,
    spans: &[CandidateSpan],
    schema: &FieldSchema,
    opts: &EnumerationOptions,
    forced: &ForcedMaps,
    extra_whitespace_indices: &std::collections::HashSet<usize>,
    warnings: &mut Vec<DecodeWarning>,
) -> Vec<JointState> {
    let prefix = spans.len().min(opts.safe_prefix);
    let whitespace: Vec<bool> = spans
        .iter()
        .enumerate()
        .map(|(i, s)| s.is_whitespace_only(line_text) || extra_whitespace_indices.contains(&i))
        .collect();

    let mut budget = Budget {
        remaining: opts.max_states.max(1),
        cap_hit: false,
    };
    let mut assignments: Vec<Vec<Label>> = Vec::new();
    let mut current: Vec<Label> = Vec::with_capacity(spans.len());
    let mut unique_counts: HashMap<usize, usize> = HashMap::new();

    backtrack(
        0,
        prefix,
        spans,
        schema,
        opts,
        forced,
        line_index,
        &whitespace,
        &mut current,
        &mut unique_counts,
        &mut assignments,
        &mut budget,
    );

    if budget.cap_hit {
        warnings.push(DecodeWarning::EnumerationCapReached {
            line: line_index,
            cap: opts.max_states,
        });
    }

    let forced_boundary = forced.forced_boundary(line_index);
    let mut states = Vec::with_capacity(assignments.len() * 2);
    for fields in assignments {
        match forced_boundary {
            Some(b) => states.push(JointState::new(b, fields)),
            None => {
                states.push(JointState::new(Boundary::Begin, fields.clone()));
                states.push(JointState::new(Boundary::Continue, fields));
            }
        }
    }
    states
}

#[allow(clippy::too_many_arguments)]
fn backtrack(
    pos: usize,
    prefix: usize,
    spans: &[CandidateSpan],
    schema: &FieldSchema,
    opts: &EnumerationOptions,
    forced: &ForcedMaps,
    line_index: usize,
    whitespace: &[bool],
    current: &mut Vec<Label>,
    unique_counts: &mut HashMap<usize, usize>,
    out: &mut Vec<Vec<Label>>,
    budget: &mut Budget,
) {
    if budget.remaining == 0 {
        budget.cap_hit = true;
        return;
    }

    if pos == spans.len() {
        out.push(current.clone());
        budget.remaining -= 1;
        return;
    }

    if pos >= prefix {
        current.push(Label::Noise);
        backtrack(pos + 1, prefix, spans, schema, opts, forced, line_index, whitespace, current, unique_counts, out, budget);
        current.pop();
        return;
    }

    if whitespace[pos] {
        current.push(Label::Noise);
        backtrack(pos + 1, prefix, spans, schema, opts, forced, line_index, whitespace, current, unique_counts, out, budget);
        current.pop();
        return;
    }

    if let Some(forced_label) = forced.forced_label(line_index, spans[pos]) {
        current.push(forced_label);
        backtrack(pos + 1, prefix, spans, schema, opts, forced, line_index, whitespace, current, unique_counts, out, budget);
        current.pop();
        return;
    }

    for (field_index, field) in schema.fields().iter().enumerate() {
        if budget.remaining == 0 {
            budget.cap_hit = true;
            return;
        }
        let used = *unique_counts.get(&field_index).unwrap_or(&0);
        let cap = opts.cap_for(schema, field_index);
        if used >= cap {
            continue;
        }
        if !field.is_repeatable() && used >= 1 {
            continue;
        }
        let distinct_used = unique_counts.values().filter(|&&c| c > 0).count();
        if used == 0 && distinct_used >= opts.max_unique_fields {
            continue;
        }

        *unique_counts.entry(field_index).or_insert(0) += 1;
        current.push(Label::Field(field_index));
        backtrack(pos + 1, prefix, spans, schema, opts, forced, line_index, whitespace, current, unique_counts, out, budget);
        current.pop();
        *unique_counts.get_mut(&field_index).unwrap() -= 1;
    }

    if budget.remaining == 0 {
        budget.cap_hit = true;
        return;
    }
    current.push(Label::Noise);
    backtrack(pos + 1, prefix, spans, schema, opts, forced, line_index, whitespace, current, unique_counts, out, budget);
    current.pop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldSchema};

    fn schema() -> FieldSchema {
        FieldSchema::new(vec![FieldDef::new("Name", 1), FieldDef::new("Phone", 2)], "Noise")
    }

    #[test]
    fn empty_spans_yields_exactly_two_states() {
        let schema = schema();
        let opts = EnumerationOptions::default();
        let forced = ForcedMaps::new();
        let mut warnings = Vec::new();
        let states = enumerate_states(0, "", &[], &schema, &opts, &forced, &Default::default(), &mut warnings);
        assert_eq!(states.len(), 2);
        assert!(states.iter().any(|s| s.boundary.is_begin()));
        assert!(states.iter().any(|s| !s.boundary.is_begin()));
    }

    #[test]
    fn single_occurrence_field_not_repeated() {
        let schema = schema();
        let opts = EnumerationOptions::default();
        let forced = ForcedMaps::new();
        let mut warnings = Vec::new();
        let spans = vec![CandidateSpan::new(0, 3), CandidateSpan::new(4, 7)];
        let states = enumerate_states(0, "Bob Eve", &spans, &schema, &opts, &forced, &Default::default(), &mut warnings);
        for s in &states {
            let name_count = s.fields.iter().filter(|l| **l == Label::Field(0)).count();
            assert!(name_count <= 1);
        }
    }

    #[test]
    fn whitespace_spans_forced_to_noise() {
        let schema = schema();
        let opts = EnumerationOptions::default();
        let forced = ForcedMaps::new();
        let mut warnings = Vec::new();
        let spans = vec![CandidateSpan::new(0, 3), CandidateSpan::new(3, 4)];
        let states = enumerate_states(0, "Bob ", &spans, &schema, &opts, &forced, &Default::default(), &mut warnings);
        for s in &states {
            assert_eq!(s.fields[1], Label::Noise);
        }
    }

    #[test]
    fn respects_max_states_cap() {
        let schema = FieldSchema::new(
            vec![FieldDef::new("A", 5), FieldDef::new("B", 5), FieldDef::new("C", 5)],
            "Noise",
        );
        let mut opts = EnumerationOptions::default();
        opts.max_states = 10;
        opts.max_unique_fields = 3;
        let forced = ForcedMaps::new();
        let mut warnings = Vec::new();
        let spans: Vec<CandidateSpan> = (0..6).map(|i| CandidateSpan::new(i * 2, i * 2 + 1)).collect();
        let line_text = "a a a a a a".to_string();
        let states = enumerate_states(0, &line_text, &spans, &schema, &opts, &forced, &Default::default(), &mut warnings);
        assert!(states.len() <= 20); // <= max_states assignments * 2 boundary copies
        assert!(!warnings.is_empty());
    }
}
