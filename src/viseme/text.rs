//! Character-stepped visemes for synthetic speech.
//!
//! When no audio is available the mouth walks the response text one
//! character per tick. Each character picks a rough shape; whitespace and
//! punctuation close the mouth for that step.

use super::Viseme;

/// Strength of a vowel step.
const VOWEL_STRENGTH: f32 = 0.8;
/// Strength of a consonant step.
const CONSONANT_STRENGTH: f32 = 0.5;

/// One tick of character stepping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStep {
    /// Shape for this tick, `None` for a closed mouth.
    pub viseme: Option<Viseme>,
    /// Strength in `[0, 1]`, zero when closed.
    pub strength: f32,
}

impl TextStep {
    const CLOSED: TextStep = TextStep {
        viseme: None,
        strength: 0.0,
    };

    fn vowel(v: Viseme) -> Self {
        Self {
            viseme: Some(v),
            strength: VOWEL_STRENGTH,
        }
    }

    fn consonant(v: Viseme) -> Self {
        Self {
            viseme: Some(v),
            strength: CONSONANT_STRENGTH,
        }
    }
}

/// Shape for a single character.
#[must_use]
pub fn char_step(c: char) -> TextStep {
    match c.to_ascii_lowercase() {
        'a' => TextStep::vowel(Viseme::AA),
        'e' => TextStep::vowel(Viseme::E),
        'i' | 'y' => TextStep::vowel(Viseme::I),
        'o' => TextStep::vowel(Viseme::O),
        'u' | 'w' => TextStep::vowel(Viseme::U),
        'p' | 'b' | 'm' => TextStep::consonant(Viseme::PP),
        'f' | 'v' => TextStep::consonant(Viseme::FF),
        't' | 'd' | 'l' => TextStep::consonant(Viseme::DD),
        'n' => TextStep::consonant(Viseme::NN),
        'k' | 'g' | 'q' | 'c' | 'x' | 'h' => TextStep::consonant(Viseme::KK),
        'j' => TextStep::consonant(Viseme::CH),
        's' | 'z' => TextStep::consonant(Viseme::SS),
        'r' => TextStep::consonant(Viseme::RR),
        other => sinhala_step(other),
    }
}

/// Sinhala letters and vowel signs (U+0D80..U+0DFF).
fn sinhala_step(c: char) -> TextStep {
    match c {
        // Independent vowels
        '\u{0D85}' | '\u{0D86}' => TextStep::vowel(Viseme::AA),
        '\u{0D87}' | '\u{0D88}' | '\u{0D91}' | '\u{0D92}' | '\u{0D93}' => {
            TextStep::vowel(Viseme::E)
        }
        '\u{0D89}' | '\u{0D8A}' => TextStep::vowel(Viseme::I),
        '\u{0D8B}' | '\u{0D8C}' => TextStep::vowel(Viseme::U),
        '\u{0D94}'..='\u{0D96}' => TextStep::vowel(Viseme::O),
        // Dependent vowel signs
        '\u{0DCF}' => TextStep::vowel(Viseme::AA),
        '\u{0DD0}' | '\u{0DD1}' | '\u{0DD9}' | '\u{0DDA}' | '\u{0DDB}' => {
            TextStep::vowel(Viseme::E)
        }
        '\u{0DD2}' | '\u{0DD3}' => TextStep::vowel(Viseme::I),
        '\u{0DD4}' | '\u{0DD6}' => TextStep::vowel(Viseme::U),
        '\u{0DDC}'..='\u{0DDE}' => TextStep::vowel(Viseme::O),
        // Labials
        '\u{0DB4}' | '\u{0DB5}' | '\u{0DB6}' | '\u{0DB7}' | '\u{0DB8}' | '\u{0DB9}' => {
            TextStep::consonant(Viseme::PP)
        }
        '\u{0DC0}' | '\u{0DC6}' => TextStep::consonant(Viseme::FF),
        // Virama silences the inherent vowel
        '\u{0DCA}' => TextStep::CLOSED,
        // Other consonants carry an inherent /a/
        '\u{0D9A}'..='\u{0DC6}' => TextStep::consonant(Viseme::AA),
        c if c.is_alphabetic() => TextStep::consonant(Viseme::AA),
        _ => TextStep::CLOSED,
    }
}

/// Shapes for every character of `text`, one per tick.
#[must_use]
pub fn text_visemes(text: &str) -> Vec<TextStep> {
    text.chars().map(char_step).collect()
}
