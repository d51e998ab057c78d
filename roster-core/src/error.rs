//! Recoverable-error kinds for the decode/feedback pipeline.
//!
//! `spec.md` §7 is explicit that decoding is total: every one of these is
//! handled locally (skip the bad entry, fall back to the noise label,
//! proceed with a truncated enumeration) and never surfaces as `Result::Err`
//! from `decode`/`project`/`update_weights_from_feedback`. Components instead
//! push a [`DecodeWarning`] onto a caller-visible warnings vector and emit a
//! `log::warn!` so a configured logger can see what was patched.
//!
//! The only conditions this crate treats as fatal are programmer errors
//! (`spec.md` §7: empty schema, an empty weights/lines precondition) — those
//! panic via `debug_assert!`, the same way the teacher crate never wraps an
//! internal invariant in `Result`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeWarning {
    /// A forced label referenced by feedback/opts is not in the schema and
    /// is not the noise label; the constrainer fell back to `noise_label`.
    #[error("forced label {label:?} at line {line} is not in the schema; using noise label")]
    SchemaMismatch { line: usize, label: String },

    /// A feedback entry referenced a line index outside `[0, |lines|)`.
    #[error("feedback entry referenced out-of-range line {line} (document has {num_lines} lines)")]
    OutOfRangeLine { line: usize, num_lines: usize },

    /// `end < start` in a record/sub-entity feedback entry.
    #[error("feedback range end ({end}) is before start ({start})")]
    BadFeedbackRange { start: usize, end: usize },

    /// The state enumerator reached `max_states` before exhausting the
    /// search; this is a normal outcome under heavy inputs, not an error.
    #[error("line {line} enumeration reached the cap of {cap} states")]
    EnumerationCapReached { line: usize, cap: usize },
}

impl DecodeWarning {
    /// Emits this warning through the `log` facade at the appropriate level.
    pub fn log(&self) {
        match self {
            DecodeWarning::EnumerationCapReached { .. } => log::debug!("{self}"),
            _ => log::warn!("{self}"),
        }
    }
}
