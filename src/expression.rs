//! Facial expression table.
//!
//! Each [`ExpressionLabel`] resolves to a sparse set of morph-target weights.
//! Control points a label does not list implicitly target zero.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::morph::MorphWeights;

/// Closed set of emotions the face can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpressionLabel {
    /// Calm, expressionless face.
    #[default]
    Neutral,
    Happy,
    Sad,
    Angry,
    Surprised,
    Fearful,
    Disgusted,
    Thinking,
    Excited,
    Confused,
    Tired,
    Flirty,
}

impl ExpressionLabel {
    /// Every label, in declaration order.
    pub const ALL: [ExpressionLabel; 12] = [
        ExpressionLabel::Neutral,
        ExpressionLabel::Happy,
        ExpressionLabel::Sad,
        ExpressionLabel::Angry,
        ExpressionLabel::Surprised,
        ExpressionLabel::Fearful,
        ExpressionLabel::Disgusted,
        ExpressionLabel::Thinking,
        ExpressionLabel::Excited,
        ExpressionLabel::Confused,
        ExpressionLabel::Tired,
        ExpressionLabel::Flirty,
    ];

    /// Lowercase label name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ExpressionLabel::Neutral => "neutral",
            ExpressionLabel::Happy => "happy",
            ExpressionLabel::Sad => "sad",
            ExpressionLabel::Angry => "angry",
            ExpressionLabel::Surprised => "surprised",
            ExpressionLabel::Fearful => "fearful",
            ExpressionLabel::Disgusted => "disgusted",
            ExpressionLabel::Thinking => "thinking",
            ExpressionLabel::Excited => "excited",
            ExpressionLabel::Confused => "confused",
            ExpressionLabel::Tired => "tired",
            ExpressionLabel::Flirty => "flirty",
        }
    }
}

impl fmt::Display for ExpressionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown expression name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown expression: {0}")]
pub struct UnknownExpression(pub String);

impl FromStr for ExpressionLabel {
    type Err = UnknownExpression;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ExpressionLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == wanted)
            .ok_or_else(|| UnknownExpression(s.to_owned()))
    }
}

const HAPPY: &[(&str, f32)] = &[
    ("mouthSmile_Left", 0.9),
    ("mouthSmile_Right", 0.9),
    ("eyeSquintLeft", 0.7),
    ("eyeSquintRight", 0.7),
    ("cheekSquint_Left", 0.5),
    ("cheekSquint_Right", 0.5),
];

const SAD: &[(&str, f32)] = &[
    ("mouthFrown_Left", 0.9),
    ("mouthFrown_Right", 0.9),
    ("browInnerUp", 0.8),
    ("eyeSquintLeft", 0.4),
    ("eyeSquintRight", 0.4),
    ("mouthLowerDown_Left", 0.5),
    ("mouthLowerDown_Right", 0.5),
];

const ANGRY: &[(&str, f32)] = &[
    ("browDown_Left", 1.0),
    ("browDown_Right", 1.0),
    ("mouthPress_Left", 0.9),
    ("mouthPress_Right", 0.9),
    ("eyeSquintLeft", 0.6),
    ("eyeSquintRight", 0.6),
    ("noseSneer_Left", 0.5),
    ("noseSneer_Right", 0.5),
];

const SURPRISED: &[(&str, f32)] = &[
    ("eyeWide_Left", 1.0),
    ("eyeWide_Right", 1.0),
    ("browInnerUp", 1.0),
    ("browOuterUp_Left", 0.9),
    ("browOuterUp_Right", 0.9),
    ("mouthOpen", 0.7),
    ("jawOpen", 0.5),
];

const FEARFUL: &[(&str, f32)] = &[
    ("eyeWide_Left", 1.0),
    ("eyeWide_Right", 1.0),
    ("browInnerUp", 1.0),
    ("browOuterUp_Left", 0.8),
    ("browOuterUp_Right", 0.8),
    ("mouthOpen", 0.4),
    ("jawForward", 0.3),
];

const DISGUSTED: &[(&str, f32)] = &[
    ("noseSneer_Left", 1.0),
    ("noseSneer_Right", 1.0),
    ("mouthUpperUp_Left", 0.8),
    ("mouthUpperUp_Right", 0.8),
    ("browDown_Left", 0.6),
    ("browDown_Right", 0.6),
    ("eyeSquintLeft", 0.5),
    ("eyeSquintRight", 0.5),
];

const THINKING: &[(&str, f32)] = &[
    ("browDown_Left", 0.3),
    ("browInnerUp", 0.4),
    ("eyeSquintLeft", 0.3),
    ("mouthLeft", 0.5),
    ("mouthPucker", 0.3),
];

const EXCITED: &[(&str, f32)] = &[
    ("eyeWide_Left", 0.8),
    ("eyeWide_Right", 0.8),
    ("mouthSmile_Left", 1.0),
    ("mouthSmile_Right", 1.0),
    ("mouthOpen", 0.5),
    ("browOuterUp_Left", 0.7),
    ("browOuterUp_Right", 0.7),
];

const CONFUSED: &[(&str, f32)] = &[
    ("browDown_Left", 0.4),
    ("browOuterUp_Right", 0.8),
    ("browInnerUp", 0.5),
    ("mouthLeft", 0.4),
    ("mouthFrown_Left", 0.3),
    ("mouthFrown_Right", 0.3),
];

const TIRED: &[(&str, f32)] = &[
    ("eyeSquintLeft", 0.8),
    ("eyeSquintRight", 0.8),
    ("eyeBlink_Left", 0.4),
    ("eyeBlink_Right", 0.4),
    ("mouthFrown_Left", 0.4),
    ("mouthFrown_Right", 0.4),
    ("browDown_Left", 0.3),
    ("browDown_Right", 0.3),
];

const FLIRTY: &[(&str, f32)] = &[
    ("mouthSmile_Right", 0.8),
    ("eyeSquintLeft", 0.6),
    ("eyeWide_Right", 0.5),
    ("browOuterUp_Left", 0.4),
    ("mouthDimple_Right", 0.5),
    ("mouthPucker", 0.3),
];

fn table(label: ExpressionLabel) -> &'static [(&'static str, f32)] {
    match label {
        ExpressionLabel::Neutral => &[],
        ExpressionLabel::Happy => HAPPY,
        ExpressionLabel::Sad => SAD,
        ExpressionLabel::Angry => ANGRY,
        ExpressionLabel::Surprised => SURPRISED,
        ExpressionLabel::Fearful => FEARFUL,
        ExpressionLabel::Disgusted => DISGUSTED,
        ExpressionLabel::Thinking => THINKING,
        ExpressionLabel::Excited => EXCITED,
        ExpressionLabel::Confused => CONFUSED,
        ExpressionLabel::Tired => TIRED,
        ExpressionLabel::Flirty => FLIRTY,
    }
}

/// Target weights for `label`. Neutral is empty.
#[must_use]
pub fn lookup(label: ExpressionLabel) -> MorphWeights {
    table(label).iter().copied().collect()
}

/// Every control point named anywhere in the table, deduplicated.
#[must_use]
pub fn controls() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = Vec::new();
    for label in ExpressionLabel::ALL {
        for &(name, _) in table(label) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// Affective description of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExpressionProfile {
    /// Pleasantness, `-1.0..=1.0`.
    pub valence: f32,
    /// Activation, `-1.0..=1.0`.
    pub arousal: f32,
    /// How recognisable the face is, `0.0..=1.0`.
    pub confidence: f32,
    /// Short human-readable description.
    pub description: &'static str,
}

/// Affective profile of `label`.
#[must_use]
pub fn profile(label: ExpressionLabel) -> ExpressionProfile {
    let (valence, arousal, confidence, description) = match label {
        ExpressionLabel::Neutral => (0.0, 0.0, 1.0, "Calm and expressionless face"),
        ExpressionLabel::Happy => (
            0.9,
            0.6,
            0.95,
            "Joyful expression with smile and squinted eyes",
        ),
        ExpressionLabel::Sad => (
            -0.8,
            -0.3,
            0.9,
            "Sorrowful face with frown and raised inner brows",
        ),
        ExpressionLabel::Angry => (
            -0.7,
            0.8,
            0.92,
            "Aggressive expression with furrowed brows and pressed lips",
        ),
        ExpressionLabel::Surprised => (
            0.3,
            0.9,
            0.88,
            "Shocked look with wide eyes and raised eyebrows",
        ),
        ExpressionLabel::Fearful => (
            -0.6,
            0.9,
            0.85,
            "Frightened expression with wide eyes and tense face",
        ),
        ExpressionLabel::Disgusted => (
            -0.8,
            0.4,
            0.87,
            "Repulsed look with wrinkled nose and raised upper lip",
        ),
        ExpressionLabel::Thinking => (
            0.1,
            0.2,
            0.75,
            "Contemplative expression with slightly furrowed brow",
        ),
        ExpressionLabel::Excited => (
            0.95,
            0.95,
            0.93,
            "Enthusiastic face with wide eyes and big smile",
        ),
        ExpressionLabel::Confused => (
            -0.2,
            0.4,
            0.8,
            "Puzzled look with asymmetric brows and tilted mouth",
        ),
        ExpressionLabel::Tired => (
            -0.4,
            -0.7,
            0.82,
            "Fatigued expression with droopy eyes and slight frown",
        ),
        ExpressionLabel::Flirty => (
            0.7,
            0.5,
            0.78,
            "Playful look with asymmetric smile and one squinted eye",
        ),
    };
    ExpressionProfile {
        valence,
        arousal,
        confidence,
        description,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn lookup_returns_only_declared_points_in_range() {
        for label in ExpressionLabel::ALL {
            let weights = lookup(label);
            let declared = table(label);
            assert_eq!(weights.len(), declared.len(), "{label}");
            for (name, weight) in weights.iter() {
                assert!(declared.iter().any(|(n, _)| *n == name), "{label}: {name}");
                assert!((0.0..=1.0).contains(&weight), "{label}: {name}={weight}");
            }
        }
    }

    #[test]
    fn neutral_is_empty() {
        assert!(lookup(ExpressionLabel::Neutral).is_empty());
    }

    #[test]
    fn happy_smiles() {
        let happy = lookup(ExpressionLabel::Happy);
        assert_eq!(happy.get("mouthSmile_Left"), Some(0.9));
        assert_eq!(happy.get("eyeSquintRight"), Some(0.7));
        assert_eq!(happy.get("cheekSquint_Left"), Some(0.5));
        assert_eq!(happy.get("mouthFrown_Left"), None);
    }

    #[test]
    fn labels_parse_and_display() {
        for label in ExpressionLabel::ALL {
            assert_eq!(label.to_string().parse::<ExpressionLabel>().unwrap(), label);
        }
        assert_eq!(
            " Happy ".parse::<ExpressionLabel>().unwrap(),
            ExpressionLabel::Happy
        );
        assert!("ecstatic".parse::<ExpressionLabel>().is_err());
    }

    #[test]
    fn labels_serialize_lowercase() {
        let json = serde_json::to_string(&ExpressionLabel::Surprised).unwrap();
        assert_eq!(json, "\"surprised\"");
        let back: ExpressionLabel = serde_json::from_str("\"tired\"").unwrap();
        assert_eq!(back, ExpressionLabel::Tired);
    }

    #[test]
    fn profiles_stay_in_range() {
        for label in ExpressionLabel::ALL {
            let p = profile(label);
            assert!((-1.0..=1.0).contains(&p.valence));
            assert!((-1.0..=1.0).contains(&p.arousal));
            assert!((0.0..=1.0).contains(&p.confidence));
            assert!(!p.description.is_empty());
        }
        assert!(profile(ExpressionLabel::Happy).valence > 0.0);
        assert!(profile(ExpressionLabel::Sad).valence < 0.0);
    }

    #[test]
    fn controls_are_unique() {
        let names = controls();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), names.len());
        assert!(names.contains(&"jawForward"));
    }
}
