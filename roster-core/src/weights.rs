//! Feature weight storage.
//!
//! A thin `HashMap<String, f64>` wrapper. Missing keys default to `0.0`
//! everywhere a weight is looked up, so callers can start a decode session
//! from an empty map and let the trainer grow it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Mapping from feature-id strings to real-valued weights.
///
/// Kept as a single flat map: label-aware coupling (see `scoring.rs`)
/// derives the label-specific sign/scale from the feature id and the
/// candidate label at lookup time, rather than baking the label into the
/// map key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Weights(HashMap<String, f64>);

impl Weights {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Looks up a weight, defaulting to `0.0` for unseen feature ids.
    pub fn get(&self, feature_id: &str) -> f64 {
        *self.0.get(feature_id).unwrap_or(&0.0)
    }

    pub fn set(&mut self, feature_id: impl Into<String>, value: f64) {
        self.0.insert(feature_id.into(), value);
    }

    /// Adds `delta` to the current weight, inserting `0.0 + delta` if absent.
    pub fn add(&mut self, feature_id: &str, delta: f64) {
        *self.0.entry(feature_id.to_string()).or_insert(0.0) += delta;
    }

    pub fn contains(&self, feature_id: &str) -> bool {
        self.0.contains_key(feature_id)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, f64)> for Weights {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_defaults_to_zero() {
        let w = Weights::new();
        assert_eq!(w.get("segment.is_phone"), 0.0);
    }

    #[test]
    fn add_accumulates_from_zero() {
        let mut w = Weights::new();
        w.add("line.blank_line", 1.5);
        w.add("line.blank_line", -0.5);
        assert_eq!(w.get("line.blank_line"), 1.0);
    }
}
