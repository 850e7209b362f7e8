//! Precomputed lip-sync timelines.
//!
//! Offline aligners emit a JSON document of phoneme intervals, each tagged
//! with one of seven mouth-shape codes (`A`..`G`). A timeline is sampled
//! against the audio element's playback position every frame.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{Viseme, VisemeSignal};
use crate::error::{AvatarError, Result};

/// One aligned phoneme as it appears in lip-sync JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhonemeCue {
    /// Source phoneme, informational only.
    #[serde(default)]
    pub phoneme: String,
    /// Mouth-shape code, `A`..`G`.
    pub viseme: String,
    /// Interval start in seconds.
    pub start: f64,
    /// Interval end in seconds.
    pub end: f64,
}

/// Lip-sync document: the spoken text and its aligned phonemes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LipSyncData {
    /// Transcript of the audio.
    #[serde(default)]
    pub text: String,
    /// Aligned phonemes.
    #[serde(default)]
    pub phonemes: Vec<PhonemeCue>,
}

/// Map a mouth-shape code to a head morph target.
///
/// Unknown codes fall back to the open-mouth shape.
#[must_use]
pub fn code_to_morph(code: &str) -> &'static str {
    match code.trim() {
        "A" => Viseme::AA.morph_name(),
        "B" => Viseme::E.morph_name(),
        "C" => Viseme::I.morph_name(),
        "D" => Viseme::O.morph_name(),
        "E" => Viseme::FF.morph_name(),
        "F" => Viseme::TH.morph_name(),
        "G" => Viseme::PP.morph_name(),
        _ => Viseme::AA.morph_name(),
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Interval {
    target: &'static str,
    start: f64,
    end: f64,
}

/// Ordered mouth-shape intervals on a playback clock (seconds).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhonemeTimeline {
    intervals: Vec<Interval>,
}

impl PhonemeTimeline {
    /// Build a timeline from lip-sync data.
    ///
    /// # Errors
    ///
    /// Returns [`AvatarError::LipSync`] if an interval has non-finite bounds
    /// or ends before it starts.
    pub fn from_data(data: &LipSyncData) -> Result<Self> {
        let mut intervals = Vec::with_capacity(data.phonemes.len());
        for (i, cue) in data.phonemes.iter().enumerate() {
            if !cue.start.is_finite() || !cue.end.is_finite() || cue.end < cue.start {
                return Err(AvatarError::LipSync(format!(
                    "phoneme {i} has invalid interval {}..{}",
                    cue.start, cue.end
                )));
            }
            intervals.push(Interval {
                target: code_to_morph(&cue.viseme),
                start: cue.start,
                end: cue.end,
            });
        }
        Ok(Self::from_intervals(intervals))
    }

    /// Parse lip-sync JSON.
    ///
    /// # Errors
    ///
    /// Returns [`AvatarError::LipSync`] on malformed JSON or invalid intervals.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let data: LipSyncData = serde_json::from_str(json)
            .map_err(|e| AvatarError::LipSync(format!("invalid lip-sync JSON: {e}")))?;
        Self::from_data(&data)
    }

    /// Read lip-sync JSON from disk.
    ///
    /// # Errors
    ///
    /// Returns [`AvatarError::Io`] if the file cannot be read, otherwise as
    /// [`from_json_str`](Self::from_json_str).
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Build a timeline from `(viseme, start_ms, duration_ms)` triples, as
    /// produced by [`phonemes_to_visemes`](super::phonemes_to_visemes).
    /// Silent intervals are dropped.
    #[must_use]
    pub fn from_visemes(visemes: &[(Viseme, f32, f32)]) -> Self {
        let intervals = visemes
            .iter()
            .filter(|(v, _, d)| !v.is_silent() && *d > 0.0)
            .map(|&(v, start, duration)| Interval {
                target: v.morph_name(),
                start: f64::from(start) / 1000.0,
                end: f64::from(start + duration) / 1000.0,
            })
            .collect();
        Self::from_intervals(intervals)
    }

    fn from_intervals(mut intervals: Vec<Interval>) -> Self {
        intervals.sort_by(|a, b| a.start.total_cmp(&b.start));
        Self { intervals }
    }

    /// Number of intervals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// Whether the timeline has no intervals.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// End of the last interval, in seconds.
    #[must_use]
    pub fn end_time(&self) -> f64 {
        self.intervals.iter().map(|i| i.end).fold(0.0, f64::max)
    }

    /// Whether no interval remains at or after `t`.
    #[must_use]
    pub fn is_finished_at(&self, t: f64) -> bool {
        self.is_empty() || t > self.end_time()
    }

    /// Morph target active at `t`, if any. Bounds are inclusive; when
    /// intervals overlap the earliest-starting one wins.
    #[must_use]
    pub fn active_at(&self, t: f64) -> Option<&'static str> {
        self.intervals
            .iter()
            .take_while(|i| i.start <= t)
            .find(|i| t <= i.end)
            .map(|i| i.target)
    }

    /// Signal at `t`: full strength inside an interval, cleared in gaps.
    #[must_use]
    pub fn sample(&self, t: f64) -> VisemeSignal {
        match self.active_at(t) {
            Some(target) => VisemeSignal::new(target, 1.0),
            None => VisemeSignal::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    const TWO_CUES: &str = r#"{
        "text": "hi",
        "phonemes": [
            { "phoneme": "HH", "viseme": "A", "start": 0.0, "end": 0.5 },
            { "phoneme": "IY", "viseme": "B", "start": 0.6, "end": 1.0 }
        ]
    }"#;

    #[test]
    fn gap_clears_and_interval_is_full_strength() {
        let timeline = PhonemeTimeline::from_json_str(TWO_CUES).unwrap();
        assert_eq!(timeline.sample(0.55), VisemeSignal::default());
        assert_eq!(timeline.sample(0.3), VisemeSignal::new("viseme_aa", 1.0));
        assert_eq!(timeline.sample(0.8), VisemeSignal::new("viseme_E", 1.0));
    }

    #[test]
    fn bounds_are_inclusive() {
        let timeline = PhonemeTimeline::from_json_str(TWO_CUES).unwrap();
        assert_eq!(timeline.active_at(0.5), Some("viseme_aa"));
        assert_eq!(timeline.active_at(0.6), Some("viseme_E"));
        assert_eq!(timeline.active_at(1.0), Some("viseme_E"));
        assert!(!timeline.is_finished_at(1.0));
        assert!(timeline.is_finished_at(1.01));
    }

    #[test]
    fn codes_map_to_morphs_with_fallback() {
        let expected = [
            ("A", "viseme_aa"),
            ("B", "viseme_E"),
            ("C", "viseme_I"),
            ("D", "viseme_O"),
            ("E", "viseme_FF"),
            ("F", "viseme_TH"),
            ("G", "viseme_PP"),
            ("X", "viseme_aa"),
            ("", "viseme_aa"),
        ];
        for (code, morph) in expected {
            assert_eq!(code_to_morph(code), morph, "code {code:?}");
        }
    }

    #[test]
    fn intervals_are_sorted_on_load() {
        let json = r#"{ "phonemes": [
            { "viseme": "G", "start": 1.0, "end": 1.2 },
            { "viseme": "D", "start": 0.0, "end": 0.2 }
        ] }"#;
        let timeline = PhonemeTimeline::from_json_str(json).unwrap();
        assert_eq!(timeline.active_at(0.1), Some("viseme_O"));
        assert_eq!(timeline.active_at(1.1), Some("viseme_PP"));
        assert!((timeline.end_time() - 1.2).abs() < 1e-9);
    }

    #[test]
    fn reversed_interval_is_rejected() {
        let json = r#"{ "phonemes": [{ "viseme": "A", "start": 1.0, "end": 0.5 }] }"#;
        assert!(matches!(
            PhonemeTimeline::from_json_str(json),
            Err(AvatarError::LipSync(_))
        ));
        assert!(PhonemeTimeline::from_json_str("not json").is_err());
    }

    #[test]
    fn empty_timeline_is_finished() {
        let timeline = PhonemeTimeline::from_json_str(r#"{ "text": "" }"#).unwrap();
        assert!(timeline.is_empty());
        assert!(timeline.is_finished_at(0.0));
        assert_eq!(timeline.sample(0.0), VisemeSignal::default());
    }

    #[test]
    fn arpabet_visemes_convert_to_seconds() {
        let timeline = PhonemeTimeline::from_visemes(&[
            (Viseme::Sil, 0.0, 100.0),
            (Viseme::PP, 100.0, 80.0),
            (Viseme::AA, 180.0, 120.0),
        ]);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.active_at(0.05), None);
        assert_eq!(timeline.active_at(0.15), Some("viseme_PP"));
        assert_eq!(timeline.active_at(0.25), Some("viseme_aa"));
    }
}
