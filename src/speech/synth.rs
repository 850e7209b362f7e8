//! Speech synthesizers for the synthetic lip-sync path.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::SpeechConfig;
use crate::error::Result;
use crate::viseme::estimate_duration;

/// Speaks an utterance and resolves when it ends.
///
/// The future resolving is the completion signal; an error is a failed
/// utterance. Dropping the future must stop playback.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Speak `text` in `language` (BCP 47 tag).
    async fn speak(&self, text: &str, language: &str) -> Result<()>;
}

/// Silent synthesizer that only waits as long as the text would take to say.
///
/// Stands in for a platform voice so the mouth still moves for the right
/// length of time.
#[derive(Debug, Clone)]
pub struct PacedSynthesizer {
    words_per_minute: f32,
    char_interval: Duration,
}

impl PacedSynthesizer {
    /// Pace from speech settings.
    #[must_use]
    pub fn new(config: &SpeechConfig) -> Self {
        Self {
            words_per_minute: config.words_per_minute,
            char_interval: Duration::from_millis(config.char_interval_ms),
        }
    }

    /// How long `text` is held open. Never shorter than one step per character.
    #[must_use]
    pub fn duration_for(&self, text: &str) -> Duration {
        let ms = estimate_duration(text, self.words_per_minute).round().max(0.0);
        let by_words = Duration::from_millis(ms as u64);
        let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
        let by_chars = self.char_interval.saturating_mul(chars);
        by_words.max(by_chars)
    }
}

impl Default for PacedSynthesizer {
    fn default() -> Self {
        Self::new(&SpeechConfig::default())
    }
}

#[async_trait]
impl Synthesizer for PacedSynthesizer {
    async fn speak(&self, text: &str, language: &str) -> Result<()> {
        let duration = self.duration_for(text);
        debug!(language, ms = duration.as_millis() as u64, "paced utterance");
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn duration_covers_every_character() {
        let synth = PacedSynthesizer::default();
        // 2 chars at 70 ms < 1 word at 150 wpm (400 ms).
        assert_eq!(synth.duration_for("hi"), Duration::from_millis(400));
        let long = "a".repeat(20);
        assert_eq!(synth.duration_for(&long), Duration::from_millis(1400));
    }

    #[tokio::test(start_paused = true)]
    async fn speak_waits_for_duration() {
        let synth = PacedSynthesizer::default();
        let start = tokio::time::Instant::now();
        synth.speak("hello there", "si-LK").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(800));
    }
}
