//! Field schema: the caller-supplied vocabulary of labels.
//!
//! A schema is an ordered list of field definitions plus one distinguished
//! noise label. It is the full set of labels the decoder may assign to a
//! candidate span, and the only place that vocabulary is defined — nothing
//! downstream hardcodes a field name.

use serde::{Deserialize, Serialize};

/// One field definition in the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    /// Maximum occurrences of this field per record. `1` for
    /// single-occurrence fields (Name, Birthdate); `>1` for repeatable
    /// fields (Phone, Email).
    pub max_allowed: usize,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, max_allowed: usize) -> Self {
        debug_assert!(max_allowed >= 1, "max_allowed must be at least 1");
        Self {
            name: name.into(),
            max_allowed,
        }
    }

    pub fn is_repeatable(&self) -> bool {
        self.max_allowed > 1
    }
}

/// The schema: an ordered list of fields plus a distinguished noise label.
///
/// Field order is significant — it is the tie-break order the enumerator
/// uses when two labels are otherwise equally preferable (`spec.md` §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    fields: Vec<FieldDef>,
    noise_label: String,
}

impl FieldSchema {
    /// Builds a schema. Panics if `fields` is empty or contains a duplicate
    /// name — both are precondition violations per `spec.md` §7, not
    /// recoverable decode-time conditions.
    pub fn new(fields: Vec<FieldDef>, noise_label: impl Into<String>) -> Self {
        assert!(!fields.is_empty(), "schema must declare at least one field");
        let noise_label = noise_label.into();
        let mut seen = std::collections::HashSet::new();
        for f in &fields {
            assert!(f.name != noise_label, "field {:?} collides with noise label", f.name);
            assert!(seen.insert(f.name.clone()), "duplicate field name {:?}", f.name);
        }
        Self { fields, noise_label }
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn noise_label(&self) -> &str {
        &self.noise_label
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_known_label(&self, label: &str) -> bool {
        label == self.noise_label || self.field(label).is_some()
    }

    /// All labels a span may carry, schema fields first (in declared
    /// order) then the noise label last — the same enumeration order
    /// `spec.md` §4.2's tie-break rule relies on.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(std::iter::once(self.noise_label.as_str()))
    }
}
