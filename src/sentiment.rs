//! Keyword expression detection for assistant replies.
//!
//! Scans reply text against an ordered bilingual keyword table and returns
//! the first expression whose keywords appear. English keywords match on
//! word boundaries; Sinhala keywords match anywhere, since Sinhala words
//! take suffixes. The table order is the tie-break: a reply that is both
//! happy and sad reads as happy.

use std::sync::LazyLock;

use regex::Regex;

use crate::expression::ExpressionLabel;

/// (expression, English words, Sinhala fragments), in priority order.
const EXPRESSION_KEYWORDS: &[(ExpressionLabel, &[&str], &[&str])] = &[
    (
        ExpressionLabel::Happy,
        &[
            "happy",
            "joy",
            "great",
            "love",
            "wonderful",
            "amazing",
            "excited",
            "yay",
        ],
        &["සතුටු", "ලස්සන", "අපූරු", "හොඳ", "වාව්", "අනේ", "ආදරෙයි"],
    ),
    (
        ExpressionLabel::Sad,
        &["sad", "sorry", "unfortunately", "regret", "disappointed"],
        &["කණගාටු", "දුක", "අඩෝ", "අනේ මන්දා"],
    ),
    (
        ExpressionLabel::Angry,
        &["angry", "mad", "furious", "upset", "annoyed"],
        &["තරහ", "කෝප", "හෙන", "අමාරු"],
    ),
    (
        ExpressionLabel::Surprised,
        &["surprised", "wow", "omg", "shocked", "unbelievable"],
        &["පුදුම", "විස්මිත", "මොකක්ද", "එහෙම", "වාව්"],
    ),
    (
        ExpressionLabel::Confused,
        &["confused", "unclear", "not sure", "don't understand"],
        &["අවුල", r"තේරෙන්නේ\s*නෑ", "තේරෙන්නෑ", "ඇයි", "මොකද්ද"],
    ),
    (
        ExpressionLabel::Thinking,
        &["think", "hmm", "consider", "ponder", "wondering"],
        &["හිත", "හ්ම්", "හ්ම්ම්", "හම්ම්", "එහෙනම්"],
    ),
    (
        ExpressionLabel::Fearful,
        &["scared", "afraid", "frightened", "terrified"],
        &["බය", "බියෙන්", "බිහිසුණු"],
    ),
    (
        ExpressionLabel::Excited,
        &["excited", "thrilled", "pumped"],
        &["උනන්දු", "සතුටු", "සතුටුයි", "වාව්"],
    ),
];

fn pattern_for(english: &[&str], sinhala: &[&str]) -> String {
    // English terms are plain words; Sinhala fragments may carry `\s*`.
    let words: Vec<String> = english.iter().map(|w| regex::escape(w)).collect();
    let mut pattern = format!(r"\b(?:{})\b", words.join("|"));
    for fragment in sinhala {
        pattern.push('|');
        pattern.push_str(fragment);
    }
    pattern
}

static MATCHERS: LazyLock<Vec<(ExpressionLabel, Regex)>> = LazyLock::new(|| {
    EXPRESSION_KEYWORDS
        .iter()
        .filter_map(|&(label, english, sinhala)| {
            Regex::new(&pattern_for(english, sinhala))
                .ok()
                .map(|re| (label, re))
        })
        .collect()
});

/// Expression for a reply, `neutral` when no keyword appears.
#[must_use]
pub fn detect_expression(text: &str) -> ExpressionLabel {
    matched_keyword(text).map_or(ExpressionLabel::Neutral, |(label, _)| label)
}

/// First matching expression together with the text that triggered it.
#[must_use]
pub fn matched_keyword(text: &str) -> Option<(ExpressionLabel, String)> {
    let lower = text.to_lowercase();
    MATCHERS.iter().find_map(|(label, re)| {
        re.find(&lower)
            .map(|m| (*label, m.as_str().to_owned()))
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn every_pattern_compiles() {
        assert_eq!(MATCHERS.len(), EXPRESSION_KEYWORDS.len());
    }

    #[test]
    fn happy_keyword_among_other_words() {
        assert_eq!(
            detect_expression("Well, the weather is GREAT for a walk today."),
            ExpressionLabel::Happy
        );
    }

    #[test]
    fn no_keyword_is_neutral() {
        assert_eq!(detect_expression("The train leaves at noon."), ExpressionLabel::Neutral);
        assert_eq!(detect_expression(""), ExpressionLabel::Neutral);
    }

    #[test]
    fn english_matches_whole_words_only() {
        // "madam" must not read as "mad", "sadly" must not read as "sad".
        assert_eq!(detect_expression("Yes madam, sadly noted"), ExpressionLabel::Neutral);
        assert_eq!(detect_expression("I'm so mad"), ExpressionLabel::Angry);
    }

    #[test]
    fn earlier_rows_win() {
        assert_eq!(
            detect_expression("Sorry, but this is wonderful"),
            ExpressionLabel::Happy
        );
        // "excited" appears under happy before the excited row.
        assert_eq!(detect_expression("I'm so excited!"), ExpressionLabel::Happy);
        assert_eq!(detect_expression("I'm thrilled"), ExpressionLabel::Excited);
    }

    #[test]
    fn each_row_is_reachable() {
        let cases = [
            ("that is unfortunate, unfortunately", ExpressionLabel::Sad),
            ("why are you upset", ExpressionLabel::Angry),
            ("wow, really?", ExpressionLabel::Surprised),
            ("i'm not sure what you mean", ExpressionLabel::Confused),
            ("hmm, let me see", ExpressionLabel::Thinking),
            ("i'm afraid of the dark", ExpressionLabel::Fearful),
            ("we are pumped", ExpressionLabel::Excited),
        ];
        for (text, expected) in cases {
            assert_eq!(detect_expression(text), expected, "{text}");
        }
    }

    #[test]
    fn sinhala_fragments_match_inside_words() {
        assert_eq!(detect_expression("මට හරිම සතුටුයි!"), ExpressionLabel::Happy);
        assert_eq!(detect_expression("ඒක දුකයි"), ExpressionLabel::Sad);
        assert_eq!(detect_expression("මට තේරෙන්නේ  නෑ"), ExpressionLabel::Confused);
        assert_eq!(detect_expression("මට බයයි"), ExpressionLabel::Fearful);
    }

    #[test]
    fn matched_keyword_reports_trigger() {
        let (label, word) = matched_keyword("That was AMAZING").unwrap();
        assert_eq!(label, ExpressionLabel::Happy);
        assert_eq!(word, "amazing");
        assert!(matched_keyword("plain text").is_none());
    }
}
