//! Viseme mapping for lip-sync animation.
//!
//! A viseme is a visual mouth shape that corresponds to a phoneme (sound).
//! Three sources feed the mouth:
//!
//! - [`bands`]: live audio, classified by frequency-band energy.
//! - [`timeline`]: precomputed phoneme intervals aligned to a playback clock.
//! - [`text`]: character-by-character stepping for synthetic speech.
//!
//! All three produce a [`VisemeSignal`] naming one morph target on the head.

pub mod bands;
pub mod text;
pub mod timeline;
pub mod wav;

pub use bands::{BandLevels, FrequencyBandMapper, Spectrum};
pub use timeline::{LipSyncData, PhonemeCue, PhonemeTimeline};

use serde::{Deserialize, Serialize};

use crate::morph::clamp_weight;

/// Oculus viseme IDs (standard for lip-sync)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Viseme {
    /// Silence (default mouth closed)
    Sil = 0,
    /// /p/, /b/, /m/ (lips pressed together)
    PP = 1,
    /// /f/, /v/ (teeth on lip)
    FF = 2,
    /// /θ/, /ð/ (tongue between teeth)
    TH = 3,
    /// /t/, /d/, /n/, /l/ (tongue at roof)
    DD = 4,
    /// /k/, /g/, /ŋ/ (back of tongue up)
    KK = 5,
    /// /tʃ/, /dʒ/, /ʃ/, /ʒ/ (tongue curved)
    CH = 6,
    /// /s/, /z/ (teeth together, tongue forward)
    SS = 7,
    /// /n/, /nj/ (tongue at roof)
    NN = 8,
    /// /r/ (tongue curled)
    RR = 9,
    /// /a/ (mouth open wide)
    AA = 10,
    /// /e/ (mouth medium)
    E = 11,
    /// /i/ (mouth wide, teeth apart)
    I = 12,
    /// /o/ (rounded, medium)
    O = 13,
    /// /u/ (rounded, small)
    U = 14,
}

impl Viseme {
    /// Every viseme in ID order.
    pub const ALL: [Viseme; 15] = [
        Viseme::Sil,
        Viseme::PP,
        Viseme::FF,
        Viseme::TH,
        Viseme::DD,
        Viseme::KK,
        Viseme::CH,
        Viseme::SS,
        Viseme::NN,
        Viseme::RR,
        Viseme::AA,
        Viseme::E,
        Viseme::I,
        Viseme::O,
        Viseme::U,
    ];

    /// Morph target name of this viseme on an Oculus-compatible head mesh.
    #[must_use]
    pub fn morph_name(self) -> &'static str {
        match self {
            Viseme::Sil => "viseme_sil",
            Viseme::PP => "viseme_PP",
            Viseme::FF => "viseme_FF",
            Viseme::TH => "viseme_TH",
            Viseme::DD => "viseme_DD",
            Viseme::KK => "viseme_kk",
            Viseme::CH => "viseme_CH",
            Viseme::SS => "viseme_SS",
            Viseme::NN => "viseme_nn",
            Viseme::RR => "viseme_RR",
            Viseme::AA => "viseme_aa",
            Viseme::E => "viseme_E",
            Viseme::I => "viseme_I",
            Viseme::O => "viseme_O",
            Viseme::U => "viseme_U",
        }
    }

    /// Whether this shape closes the mouth.
    #[must_use]
    pub fn is_silent(self) -> bool {
        self == Viseme::Sil
    }
}

/// Morph target used when only a generic mouth opening is wanted.
pub const MOUTH_OPEN: &str = "mouthOpen";

/// The mouth target the face should show right now.
///
/// `active` names a head control point; `strength` is always in `[0, 1]`.
/// A cleared signal is `(None, 0.0)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisemeSignal {
    /// Control point to drive, if any.
    pub active: Option<String>,
    /// Intensity of the active control point.
    pub strength: f32,
}

impl VisemeSignal {
    /// A signal driving `target` at `strength`.
    pub fn new(target: impl Into<String>, strength: f32) -> Self {
        Self {
            active: Some(target.into()),
            strength: clamp_weight(strength),
        }
    }

    /// Replace the active target and strength.
    pub fn set(&mut self, target: impl Into<String>, strength: f32) {
        self.active = Some(target.into());
        self.strength = clamp_weight(strength);
    }

    /// Change strength without touching the active target.
    pub fn set_strength(&mut self, strength: f32) {
        self.strength = clamp_weight(strength);
    }

    /// Reset to `(None, 0.0)`.
    pub fn clear(&mut self) {
        self.active = None;
        self.strength = 0.0;
    }

    /// Whether some target is driven with non-zero strength.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_some() && self.strength > 0.0
    }

    /// Whether the signal drives `control`.
    #[must_use]
    pub fn drives(&self, control: &str) -> bool {
        self.strength > 0.0 && self.active.as_deref() == Some(control)
    }
}

/// ARPABET phoneme to viseme mapping.
/// Based on Carnegie Mellon University Pronouncing Dictionary.
#[must_use]
pub fn phoneme_to_viseme(phoneme: &str) -> Viseme {
    // Remove stress markers (0, 1, 2)
    let p = phoneme.trim_end_matches(['0', '1', '2']);

    match p {
        "" | "sil" | "sp" => Viseme::Sil,

        // Bilabial
        "B" | "P" | "M" | "EM" | "MX" => Viseme::PP,
        // Labiodental
        "F" | "V" => Viseme::FF,
        // Dental
        "TH" | "DH" => Viseme::TH,
        // Alveolar
        "T" | "D" | "L" | "DX" | "EL" => Viseme::DD,
        "N" | "NX" | "EN" => Viseme::NN,
        // Velar
        "K" | "G" | "NG" => Viseme::KK,
        // Postalveolar
        "CH" | "JH" | "SH" | "ZH" => Viseme::CH,
        "R" | "RR" => Viseme::RR,
        // Alveolar sibilants
        "S" | "Z" => Viseme::SS,

        "AA" | "AO" | "AW" => Viseme::AA,
        "AE" | "AH" | "EH" | "ER" => Viseme::E,
        "AY" | "EY" | "IH" | "IY" | "Y" => Viseme::I,
        "OW" | "OY" | "UH" => Viseme::O,
        "UW" | "W" => Viseme::U,

        // Slight opening for anything unrecognised
        _ => Viseme::DD,
    }
}

/// Convert space-separated ARPABET phonemes to timed visemes.
///
/// Returns `(viseme, start_ms, duration_ms)`. Consecutive phonemes that map
/// to the same viseme are merged into one interval.
#[must_use]
pub fn phonemes_to_visemes(phonemes: &str, speech_rate: f32) -> Vec<(Viseme, f32, f32)> {
    let mut result: Vec<(Viseme, f32, f32)> = Vec::new();

    // Base duration per phoneme in ms (at 1.0 rate)
    let duration = 80.0 / speech_rate.max(0.5);
    let mut cursor = 0.0_f32;

    for phone in phonemes.split_whitespace() {
        if phone == "sil" || phone == "sp" {
            cursor += duration;
            continue;
        }

        let viseme = phoneme_to_viseme(phone);
        let bare = phone.trim_end_matches(['0', '1', '2']);
        let phone_duration = match bare {
            "AA" | "AE" | "AH" | "AO" | "AW" | "AY" | "EH" | "EY" | "IH" | "IY" | "OW" | "OY"
            | "UH" | "UW" | "ER" => duration * 1.5,
            "P" | "B" | "T" | "D" | "K" | "G" | "M" | "N" | "F" | "V" | "S" | "Z" => duration * 0.8,
            _ => duration,
        };

        match result.last_mut() {
            Some((last, start, d)) if *last == viseme && (*start + *d - cursor).abs() < 1e-3 => {
                *d += phone_duration;
            }
            _ => result.push((viseme, cursor, phone_duration)),
        }
        cursor += phone_duration;
    }

    result
}

/// Estimate total duration of text in milliseconds.
#[must_use]
pub fn estimate_duration(text: &str, words_per_minute: f32) -> f32 {
    let word_count = text.split_whitespace().count() as f32;
    let minutes = word_count / words_per_minute.max(30.0);
    minutes * 60.0 * 1000.0
}
