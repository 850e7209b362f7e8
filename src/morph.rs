//! Morph-target weights and the character's control surfaces.
//!
//! A character exposes two surfaces, head and teeth. Each maps a control-point
//! name to an index into its influence array. The teeth surface never owns
//! its weights; it mirrors whatever the head resolves to each frame.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Clamp a weight into `[0, 1]`. Non-finite values become `0`.
#[must_use]
pub fn clamp_weight(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Control-point name to weight, always within `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MorphWeights(BTreeMap<String, f32>);

impl MorphWeights {
    /// An empty weight set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a weight, clamping it into `[0, 1]`.
    pub fn set(&mut self, name: impl Into<String>, value: f32) {
        self.0.insert(name.into(), clamp_weight(value));
    }

    /// Weight of `name`, if declared.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f32> {
        self.0.get(name).copied()
    }

    /// Whether `name` is declared.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Iterate `(name, weight)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of declared control points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no control point is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f32)> for MorphWeights {
    fn from_iter<I: IntoIterator<Item = (S, f32)>>(iter: I) -> Self {
        let mut weights = Self::new();
        for (name, value) in iter {
            weights.set(name, value);
        }
        weights
    }
}

/// One mesh's morph dictionary plus its live influence values.
#[derive(Debug, Clone, PartialEq)]
pub struct MorphSurface {
    name: String,
    dictionary: HashMap<String, usize>,
    /// Control-point names in index order.
    names: Vec<String>,
    influences: Vec<f32>,
}

impl MorphSurface {
    /// Build a surface from its target names, in influence-index order.
    ///
    /// Duplicate names keep their first index.
    pub fn new<I, S>(name: impl Into<String>, target_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = target_names.into_iter().map(Into::into).collect();
        let mut dictionary = HashMap::with_capacity(names.len());
        for (index, target) in names.iter().enumerate() {
            dictionary.entry(target.clone()).or_insert(index);
        }
        Self {
            name: name.into(),
            influences: vec![0.0; names.len()],
            dictionary,
            names,
        }
    }

    /// Mesh name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Influence index of a control point.
    #[must_use]
    pub fn index_of(&self, control: &str) -> Option<usize> {
        self.dictionary.get(control).copied()
    }

    /// Whether the surface defines `control`.
    #[must_use]
    pub fn has(&self, control: &str) -> bool {
        self.dictionary.contains_key(control)
    }

    /// Current weight of `control`, `None` when the surface lacks it.
    #[must_use]
    pub fn weight(&self, control: &str) -> Option<f32> {
        self.index_of(control)
            .and_then(|i| self.influences.get(i).copied())
    }

    /// Set the weight of `control`. Returns `false` when the surface lacks it.
    pub fn set_weight(&mut self, control: &str, value: f32) -> bool {
        match self.index_of(control) {
            Some(i) => match self.influences.get_mut(i) {
                Some(slot) => {
                    *slot = clamp_weight(value);
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Distinct control-point names in influence-index order.
    pub fn controls(&self) -> impl Iterator<Item = &str> {
        self.names
            .iter()
            .enumerate()
            .filter(|(i, n)| self.dictionary.get(n.as_str()) == Some(i))
            .map(|(_, n)| n.as_str())
    }

    /// Raw influence array, indexed by the dictionary.
    #[must_use]
    pub fn influences(&self) -> &[f32] {
        &self.influences
    }

    /// Snapshot of every control point's weight.
    #[must_use]
    pub fn snapshot(&self) -> MorphWeights {
        self.dictionary
            .iter()
            .map(|(n, &i)| (n.clone(), self.influences.get(i).copied().unwrap_or(0.0)))
            .collect()
    }

    /// Reset every influence to zero.
    pub fn reset(&mut self) {
        self.influences.iter_mut().for_each(|w| *w = 0.0);
    }
}

/// Head and optional teeth surfaces of one character.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceRig {
    /// Head mesh; its dictionary defines which control points are driven.
    pub head: MorphSurface,
    /// Teeth mesh, mirrored from the head.
    pub teeth: Option<MorphSurface>,
}

impl FaceRig {
    /// Create a rig from its surfaces.
    #[must_use]
    pub fn new(head: MorphSurface, teeth: Option<MorphSurface>) -> Self {
        Self { head, teeth }
    }

    /// Control points in `expected` that the head surface lacks.
    ///
    /// Duplicates in `expected` are reported once, in first-seen order.
    pub fn missing_controls<'a, I>(&self, expected: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut missing: Vec<String> = Vec::new();
        for name in expected {
            if !self.head.has(name) && !missing.iter().any(|m| m == name) {
                missing.push(name.to_owned());
            }
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn weights_are_clamped_on_insert() {
        let mut w = MorphWeights::new();
        w.set("a", 1.7);
        w.set("b", -0.2);
        w.set("c", f32::NAN);
        w.set("d", 0.4);
        assert_eq!(w.get("a"), Some(1.0));
        assert_eq!(w.get("b"), Some(0.0));
        assert_eq!(w.get("c"), Some(0.0));
        assert_eq!(w.get("d"), Some(0.4));
        assert_eq!(w.get("missing"), None);
    }

    #[test]
    fn surface_maps_names_to_indices() {
        let mut surface = MorphSurface::new("Head", ["jawOpen", "viseme_aa", "jawOpen"]);
        assert_eq!(surface.index_of("jawOpen"), Some(0));
        assert_eq!(surface.index_of("viseme_aa"), Some(1));
        assert!(surface.set_weight("viseme_aa", 0.6));
        assert!(!surface.set_weight("mouthSmile_Left", 0.6));
        assert_eq!(surface.weight("viseme_aa"), Some(0.6));
        assert_eq!(surface.influences(), &[0.0, 0.6, 0.0]);

        surface.reset();
        assert_eq!(surface.weight("viseme_aa"), Some(0.0));
    }

    #[test]
    fn missing_controls_reports_each_name_once() {
        let rig = FaceRig::new(MorphSurface::new("Head", ["browInnerUp"]), None);
        let missing = rig.missing_controls(["browInnerUp", "eyeWideLeft", "eyeWideLeft"]);
        assert_eq!(missing, vec!["eyeWideLeft".to_owned()]);
    }
}
