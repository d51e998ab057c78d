//! # roster-core — joint roster/record decoder
//!
//! Extracts structured Records → Sub-entities → Fields from loosely
//! formatted text via a feature-weighted joint Viterbi decoder, a bounded
//! state enumerator, a feedback-constrained decoder, an online perceptron
//! trainer, and a joint-to-records projector.
//!
//! ## Pipeline
//!
//! ```text
//! Document → candidate spans → enumerate_states → decode → project → RecordSpan tree
//!                                                      ↑
//!                                                 feedback::constrain
//!                                                      ↓
//!                                              trainer::update_weights_from_feedback
//! ```

pub mod decoder;
pub mod enumerator;
pub mod error;
pub mod features;
pub mod feedback;
pub mod line;
pub mod projector;
pub mod schema;
pub mod scoring;
pub mod state;
pub mod trainer;
pub mod validators;
pub mod weights;

#[cfg(test)]
mod proptests;

pub use decoder::{decode, decode_with_forced, DecodeResult};
pub use enumerator::{enumerate_states, EnumerationOptions};
pub use error::DecodeWarning;
pub use feedback::{constrain, Feedback, FeedbackEntry, FieldAction, ForcedMaps};
pub use line::{CandidateSpan, Document, Line};
pub use projector::{project, FieldSpan, RecordSpan, SubEntitySpan};
pub use schema::{FieldDef, FieldSchema};
pub use state::{Boundary, EntityType, JointSequence, JointState, Label};
pub use trainer::{update_weights_from_feedback, TrainOptions, TrainResult};
pub use weights::Weights;
