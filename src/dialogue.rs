//! Canned dialogue for the offline chat mode.
//!
//! An ordered table of keyword → (response, expression). Lookup lowercases
//! and trims the input, tries an exact key match, then falls back to the
//! first entry whose key contains the input or is contained in it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AvatarError, Result};
use crate::expression::ExpressionLabel;

/// One row of the dialogue table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueEntry {
    /// Lowercase trigger phrase.
    pub key: String,
    /// Text the avatar says.
    pub response: String,
    /// Face shown while saying it.
    pub expression: ExpressionLabel,
}

impl DialogueEntry {
    fn new(key: &str, response: &str, expression: ExpressionLabel) -> Self {
        Self {
            key: key.to_lowercase(),
            response: response.to_owned(),
            expression,
        }
    }
}

/// A selected reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueReply {
    /// Text to speak.
    pub response: String,
    /// Expression to show.
    pub expression: ExpressionLabel,
}

#[derive(Debug, Deserialize)]
struct DialogueFile {
    #[serde(default)]
    entries: Vec<DialogueEntry>,
}

/// Ordered dialogue table. Earlier entries win ties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueTable {
    entries: Vec<DialogueEntry>,
}

impl Default for DialogueTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DialogueTable {
    /// Build a table from entries, lowercasing and trimming keys. Entries
    /// with an empty key are dropped.
    #[must_use]
    pub fn new(entries: Vec<DialogueEntry>) -> Self {
        let entries = entries
            .into_iter()
            .filter_map(|mut e| {
                e.key = e.key.trim().to_lowercase();
                (!e.key.is_empty()).then_some(e)
            })
            .collect();
        Self { entries }
    }

    /// The built-in table: English small talk plus Sinhala greetings.
    #[must_use]
    pub fn builtin() -> Self {
        use ExpressionLabel::{Angry, Confused, Happy, Neutral, Sad, Surprised, Thinking};

        let rows: &[(&str, &str, ExpressionLabel)] = &[
            ("hi", "Hi there, nice to meet you!", Happy),
            ("hello", "Hello! How can I help you today?", Happy),
            ("how are you", "I'm doing great, thanks for asking!", Happy),
            (
                "how are you?",
                "I'm not feeling good today... How about you?",
                Sad,
            ),
            ("bye", "Goodbye! Take care!", Neutral),
            ("see you", "See you later!", Happy),
            ("angry", "DON'T TALK TO ME RIGHT NOW!", Angry),
            ("furious", "I AM EXTREMELY UPSET!", Angry),
            ("love", "Aww, I love you too!", Happy),
            ("i love you", "That makes me so happy!", Happy),
            ("sorry", "It's okay, don't worry about it.", Neutral),
            ("i'm sorry", "I forgive you... It's alright.", Sad),
            ("laugh", "Hahaha! That's hilarious!", Happy),
            ("lol", "LOL! You're too funny!", Happy),
            ("scared", "Ahh! Don't scare me like that!", Surprised),
            ("surprise", "Whoa! You surprised me!", Surprised),
            ("confused", "Wait... what do you mean?", Confused),
            ("thinking", "Hmm... let me think about that.", Thinking),
            ("yes", "Yes! Absolutely!", Happy),
            ("no", "No way!", Angry),
            ("ආයුබෝවන්", "ආයුබෝවන්! ඔබට කොහොමද?", Happy),
            ("කොහොමද", "මම හොඳින්, ස්තූතියි! ඔබට කොහොමද?", Happy),
            ("ස්තූතියි", "කමක් නෑ! ඕනෑම වෙලාවක.", Happy),
            ("ගිහින් එන්නම්", "හරි, ගිහින් එන්න! පරිස්සමෙන්.", Neutral),
        ];
        Self::new(
            rows.iter()
                .map(|&(key, response, expression)| DialogueEntry::new(key, response, expression))
                .collect(),
        )
    }

    /// Parse a table from TOML `[[entries]]` rows.
    ///
    /// # Errors
    ///
    /// Returns [`AvatarError::Config`] on malformed TOML or unknown expressions.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let file: DialogueFile =
            toml::from_str(toml_str).map_err(|e| AvatarError::Config(e.to_string()))?;
        Ok(Self::new(file.entries))
    }

    /// Entries in match order.
    #[must_use]
    pub fn entries(&self) -> &[DialogueEntry] {
        &self.entries
    }

    /// Pick a reply for `input`, or `None` when nothing matches.
    #[must_use]
    pub fn select(&self, input: &str) -> Option<DialogueReply> {
        let wanted = input.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }

        let entry = self
            .entries
            .iter()
            .find(|e| e.key == wanted)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|e| wanted.contains(e.key.as_str()) || e.key.contains(wanted.as_str()))
            })?;

        debug!(key = %entry.key, expression = %entry.expression, "dialogue matched");
        Some(DialogueReply {
            response: entry.response.clone(),
            expression: entry.expression,
        })
    }
}
