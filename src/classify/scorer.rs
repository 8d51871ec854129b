//! Pluggable language scoring for candidate text samples.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use stop_words::{LANGUAGE, get};
use tracing::{instrument, trace};

/// Scores how likely a short text sample is to be English.
///
/// Implementations return a confidence in `[0.0, 1.0]`, or `None` when the
/// text carries no usable signal either way.
pub trait LanguageScorer: Send + Sync {
    /// Returns the English confidence for `text`.
    fn score(&self, text: &str) -> Option<f32>;
}

/// Scripts that are never English.
static NON_LATIN_SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r"[\p{Han}\p{Hiragana}\p{Katakana}\p{Hangul}\p{Greek}\p{Cyrillic}\p{Arabic}\p{Hebrew}\p{Thai}\p{Devanagari}]",
    )
});

fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Title words common in English technical and non-fiction catalogues.
const SUBJECT_VOCABULARY: &[&str] = &[
    "security",
    "architecture",
    "forensics",
    "series",
    "digital",
    "river",
    "publishers",
    "students",
    "research",
    "hunting",
    "book",
    "god",
    "system",
    "systems",
    "methods",
    "embedded",
    "controller",
    "learning",
    "crisis",
    "intervention",
    "stories",
    "born",
    "crime",
    "how",
    "why",
    "guide",
    "introduction",
    "handbook",
    "programming",
    "engineering",
    "analysis",
    "design",
    "network",
    "networks",
    "computer",
    "science",
    "history",
    "theory",
    "practice",
    "principles",
    "fundamentals",
    "edition",
    "manual",
    "art",
    "war",
];

/// Short function words that reliably mark Romance and Germanic titles.
///
/// Matched before the English list, so ambiguous tokens such as `en` or
/// `de` count against English.
const FOREIGN_CORE: &[&str] = &[
    "matemática",
    "psychologie",
    "etudes",
    "le",
    "la",
    "les",
    "de",
    "del",
    "des",
    "du",
    "das",
    "dos",
    "der",
    "und",
    "es",
    "et",
    "für",
    "y",
    "en",
    "el",
    "los",
    "las",
    "il",
    "di",
    "della",
    "het",
    "een",
    "van",
    "por",
    "para",
    "pour",
    "avec",
    "une",
    "mit",
    "zur",
    "von",
];

const FOREIGN_LANGUAGES: [LANGUAGE; 6] = [
    LANGUAGE::French,
    LANGUAGE::German,
    LANGUAGE::Spanish,
    LANGUAGE::Portuguese,
    LANGUAGE::Italian,
    LANGUAGE::Dutch,
];

/// Stop-word frequency scorer.
///
/// Confidence is `english / (english + foreign)` over the word tokens of
/// the sample. Any character from a non-Latin script yields `0.0`.
pub struct StopwordScorer {
    english: HashSet<String>,
    foreign_core: HashSet<String>,
    foreign: HashSet<String>,
}

impl std::fmt::Debug for StopwordScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopwordScorer")
            .field("english", &self.english.len())
            .field("foreign", &self.foreign.len())
            .finish_non_exhaustive()
    }
}

impl Default for StopwordScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl StopwordScorer {
    /// Builds the word lists.
    #[must_use]
    #[instrument]
    pub fn new() -> Self {
        let mut english: HashSet<String> = get(LANGUAGE::English)
            .iter()
            .map(|word| word.to_lowercase())
            .collect();
        english.extend(SUBJECT_VOCABULARY.iter().map(|word| (*word).to_string()));

        let foreign_core: HashSet<String> =
            FOREIGN_CORE.iter().map(|word| (*word).to_string()).collect();

        let mut foreign = HashSet::new();
        for language in FOREIGN_LANGUAGES {
            foreign.extend(
                get(language)
                    .iter()
                    .map(|word| word.to_lowercase())
                    .filter(|word| !english.contains(word)),
            );
        }

        Self {
            english,
            foreign_core,
            foreign,
        }
    }

    fn is_foreign(&self, token: &str) -> bool {
        self.foreign_core.contains(token)
            || self.foreign.contains(token)
            || token.chars().any(|c| !c.is_ascii())
    }
}

impl LanguageScorer for StopwordScorer {
    fn score(&self, text: &str) -> Option<f32> {
        if NON_LATIN_SCRIPT.is_match(text) {
            trace!(text, "non-Latin script");
            return Some(0.0);
        }

        let mut english = 0u32;
        let mut foreign = 0u32;
        for token in tokens(text) {
            if self.foreign_core.contains(&token) {
                foreign += 1;
            } else if self.english.contains(&token) {
                english += 1;
            } else if self.is_foreign(&token) {
                foreign += 1;
            }
        }

        trace!(text, english, foreign, "scored sample");
        let total = english + foreign;
        if total == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        Some(english as f32 / total as f32)
    }
}

/// Lowercased alphabetic runs.
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphabetic())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}
