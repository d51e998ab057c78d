//! The per-line decoded tuple and its sequence.
//!
//! [`Label`] packs a field assignment as a schema field index or the noise
//! sentinel, rather than a boxed string — display strings are resolved only
//! at the [`FieldSchema`] lookup boundary, keeping the hot comparisons and
//! hashing on plain integers.

use serde::{Deserialize, Serialize};

use crate::schema::FieldSchema;

/// Per-line boundary code: does this line start a new record, or continue
/// the previous one?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Boundary {
    /// Starts a new record at this line.
    Begin,
    /// Continues the record opened by a prior `Begin`.
    Continue,
}

impl Boundary {
    pub fn is_begin(&self) -> bool {
        matches!(self, Boundary::Begin)
    }
}

/// A label assigned to one candidate span: either a schema field (by index
/// into [`FieldSchema::fields`]) or the noise sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Field(usize),
    Noise,
}

impl Label {
    pub fn is_noise(&self) -> bool {
        matches!(self, Label::Noise)
    }

    pub fn field_index(&self) -> Option<usize> {
        match self {
            Label::Field(i) => Some(*i),
            Label::Noise => None,
        }
    }

    /// Resolves the display name of this label against `schema`.
    pub fn name<'s>(&self, schema: &'s FieldSchema) -> &'s str {
        match self {
            Label::Field(i) => &schema.fields()[*i].name,
            Label::Noise => schema.noise_label(),
        }
    }

    /// Looks up the label corresponding to a field name, or `Noise` if
    /// `name` matches the schema's noise label. Returns `None` if `name` is
    /// neither — callers (the constrainer, in particular) treat that as a
    /// [`crate::error::DecodeWarning::SchemaMismatch`] and fall back to
    /// `Noise` themselves.
    pub fn from_name(name: &str, schema: &FieldSchema) -> Option<Label> {
        if name == schema.noise_label() {
            return Some(Label::Noise);
        }
        schema
            .fields()
            .iter()
            .position(|f| f.name == name)
            .map(Label::Field)
    }
}

/// Sub-entity role tag. `Primary`/`Guardian`/`Unknown` are the closed set
/// named in `spec.md` §3; `Custom` covers "…schema-defined sub-entity
/// types" beyond those three.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    Primary,
    Guardian,
    Unknown,
    Custom(String),
}

impl EntityType {
    pub fn name(&self) -> &str {
        match self {
            EntityType::Primary => "Primary",
            EntityType::Guardian => "Guardian",
            EntityType::Unknown => "Unknown",
            EntityType::Custom(s) => s,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "Primary" => EntityType::Primary,
            "Guardian" => EntityType::Guardian,
            "Unknown" => EntityType::Unknown,
            other => EntityType::Custom(other.to_string()),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, EntityType::Unknown)
    }
}

/// The decoded tuple for a single line: `(boundary, fields, entity_type?)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    pub boundary: Boundary,
    /// Aligned positionally with that line's candidate spans.
    pub fields: Vec<Label>,
    pub entity_type: Option<EntityType>,
}

impl JointState {
    pub fn new(boundary: Boundary, fields: Vec<Label>) -> Self {
        Self {
            boundary,
            fields,
            entity_type: None,
        }
    }

    pub fn with_entity_type(mut self, entity_type: Option<EntityType>) -> Self {
        self.entity_type = entity_type;
        self
    }
}

/// An ordered sequence of [`JointState`]s, one per line (`spec.md` §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JointSequence(pub Vec<JointState>);

impl JointSequence {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, JointState> {
        self.0.iter()
    }

    /// Applies invariant (c) from `spec.md` §3: the first line is always
    /// treated as `Begin`, even if some upstream step produced `Continue`
    /// for it (documents start a record on their first line).
    pub fn normalize_first_line(mut self) -> Self {
        if let Some(first) = self.0.first_mut() {
            first.boundary = Boundary::Begin;
        }
        self
    }
}

impl std::ops::Index<usize> for JointSequence {
    type Output = JointState;
    fn index(&self, i: usize) -> &JointState {
        &self.0[i]
    }
}
