//! Per-frame facial blending.
//!
//! Every frame each control point on the head eases toward its target. The
//! target is the current expression's weight, raised to the viseme strength
//! when the viseme signal names that point. Viseme-named points ease quickly
//! so the mouth tracks audio; everything else eases slowly so expression
//! changes never snap. Teeth copy the head's result verbatim.

use tracing::debug;

use crate::config::BlendConfig;
use crate::expression::{self, ExpressionLabel};
use crate::morph::{FaceRig, MorphWeights};
use crate::viseme::VisemeSignal;

/// Whether a control point belongs to the mouth-shape set.
#[must_use]
pub fn is_viseme_control(name: &str) -> bool {
    name.to_lowercase().contains("viseme")
}

fn lerp(from: f32, to: f32, rate: f32) -> f32 {
    from + (to - from) * rate
}

/// Blends expression targets and the viseme signal into a [`FaceRig`].
#[derive(Debug, Clone)]
pub struct BlendEngine {
    config: BlendConfig,
    expression: ExpressionLabel,
    targets: MorphWeights,
}

impl Default for BlendEngine {
    fn default() -> Self {
        Self::new(BlendConfig::default())
    }
}

impl BlendEngine {
    /// Create an engine showing the neutral face.
    #[must_use]
    pub fn new(config: BlendConfig) -> Self {
        Self {
            config,
            expression: ExpressionLabel::Neutral,
            targets: MorphWeights::new(),
        }
    }

    /// Current expression.
    #[must_use]
    pub fn expression(&self) -> ExpressionLabel {
        self.expression
    }

    /// Expression targets. Control points not listed target zero.
    #[must_use]
    pub fn targets(&self) -> &MorphWeights {
        &self.targets
    }

    /// Switch expression. All previous targets drop to zero.
    pub fn set_expression(&mut self, label: ExpressionLabel) {
        if label != self.expression {
            debug!(from = %self.expression, to = %label, "expression target changed");
        }
        self.expression = label;
        self.targets = expression::lookup(label);
    }

    fn target_for(&self, control: &str, signal: &VisemeSignal) -> f32 {
        let mut target = self.targets.get(control).unwrap_or(0.0);
        if signal.drives(control) {
            target = target.max(signal.strength);
        }
        target
    }

    fn rate_for(&self, control: &str) -> f32 {
        if is_viseme_control(control) {
            self.config.viseme_rate
        } else {
            self.config.expression_rate
        }
    }

    /// Advance one frame. Returns `true` if any weight moved.
    ///
    /// Control points the rig lacks are skipped; a weight within the settle
    /// epsilon of its target snaps to it so steady state is exact.
    pub fn tick(&self, rig: &mut FaceRig, signal: &VisemeSignal) -> bool {
        let mut moved = false;
        let controls: Vec<String> = rig.head.controls().map(str::to_owned).collect();

        for control in &controls {
            let Some(current) = rig.head.weight(control) else {
                continue;
            };
            let target = self.target_for(control, signal);
            let mut next = lerp(current, target, self.rate_for(control));
            if (next - target).abs() < self.config.settle_epsilon {
                next = target;
            }
            if next != current {
                moved = true;
            }
            rig.head.set_weight(control, next);
            let resolved = rig.head.weight(control).unwrap_or(next);
            if let Some(teeth) = rig.teeth.as_mut() {
                teeth.set_weight(control, resolved);
            }
        }
        moved
    }

    /// Idle decay of a signal nobody is refreshing.
    pub fn decay_signal(&self, signal: &mut VisemeSignal) {
        signal.set_strength(signal.strength * self.config.idle_decay);
        if signal.strength < self.config.idle_clear_below {
            signal.clear();
        }
    }

    /// Whether every head control point sits on its target.
    #[must_use]
    pub fn is_settled(&self, rig: &FaceRig, signal: &VisemeSignal) -> bool {
        rig.head.controls().all(|control| {
            rig.head
                .weight(control)
                .is_none_or(|w| (w - self.target_for(control, signal)).abs() <= self.config.settle_epsilon)
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::morph::MorphSurface;

    fn rig() -> FaceRig {
        FaceRig::new(
            MorphSurface::new(
                "Wolf3D_Head",
                ["mouthSmile_Left", "viseme_aa", "viseme_I", "browInnerUp", "jawOpen"],
            ),
            Some(MorphSurface::new("Wolf3D_Teeth", ["viseme_aa", "jawOpen"])),
        )
    }

    #[test]
    fn expression_points_ease_slowly() {
        let mut engine = BlendEngine::default();
        engine.set_expression(ExpressionLabel::Happy);
        let mut rig = rig();
        engine.tick(&mut rig, &VisemeSignal::default());
        let smile = rig.head.weight("mouthSmile_Left").unwrap();
        assert!((smile - 0.9 * 0.12).abs() < 1e-6);
    }

    #[test]
    fn viseme_points_ease_fast_and_mirror_to_teeth() {
        let engine = BlendEngine::default();
        let mut rig = rig();
        engine.tick(&mut rig, &VisemeSignal::new("viseme_aa", 1.0));
        assert!((rig.head.weight("viseme_aa").unwrap() - 0.5).abs() < 1e-6);
        assert_eq!(
            rig.teeth.as_ref().unwrap().weight("viseme_aa"),
            rig.head.weight("viseme_aa")
        );
        assert_eq!(rig.head.weight("viseme_I"), Some(0.0));
    }

    #[test]
    fn viseme_never_suppresses_stronger_expression() {
        let mut engine = BlendEngine::default();
        engine.set_expression(ExpressionLabel::Surprised);
        let signal = VisemeSignal::new("jawOpen", 0.2);
        assert!((engine.target_for("jawOpen", &signal) - 0.5).abs() < 1e-6);
        let signal = VisemeSignal::new("jawOpen", 0.9);
        assert!((engine.target_for("jawOpen", &signal) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn converges_and_stops_changing() {
        let mut engine = BlendEngine::default();
        engine.set_expression(ExpressionLabel::Sad);
        let mut rig = rig();
        let signal = VisemeSignal::new("viseme_I", 0.7);
        let mut frames = 0;
        while engine.tick(&mut rig, &signal) {
            frames += 1;
            assert!(frames < 500, "blend never settled");
        }
        assert!(engine.is_settled(&rig, &signal));
        let before = rig.head.snapshot();
        assert!(!engine.tick(&mut rig, &signal));
        assert_eq!(rig.head.snapshot(), before);
        assert!((rig.head.weight("browInnerUp").unwrap() - 0.8).abs() < 1e-6);
        assert!((rig.head.weight("viseme_I").unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn switching_expression_releases_old_targets() {
        let mut engine = BlendEngine::default();
        engine.set_expression(ExpressionLabel::Happy);
        engine.set_expression(ExpressionLabel::Sad);
        assert_eq!(engine.targets().get("mouthSmile_Left"), None);
        assert_eq!(engine.target_for("mouthSmile_Left", &VisemeSignal::default()), 0.0);
    }

    #[test]
    fn idle_decay_clears_signal() {
        let engine = BlendEngine::default();
        let mut signal = VisemeSignal::new("viseme_aa", 1.0);
        let mut ticks = 0;
        while signal.active.is_some() {
            let before = signal.strength;
            engine.decay_signal(&mut signal);
            assert!(signal.strength <= before);
            ticks += 1;
            assert!(ticks < 100);
        }
        assert_eq!(signal.strength, 0.0);
    }

    #[test]
    fn viseme_control_detection_is_case_insensitive() {
        assert!(is_viseme_control("viseme_aa"));
        assert!(is_viseme_control("Viseme_PP"));
        assert!(!is_viseme_control("mouthOpen"));
    }
}
