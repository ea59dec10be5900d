//! Text canonicalization for keyword matching
//!
//! Lowercases, drops supplier noise tokens (vendor SKU fragments such as
//! `simpli_b224-0500`, internal model codes such as `jv202`), strips
//! punctuation and collapses whitespace. Pure functions only.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::category::Phrase;

/// Short alphanumeric prefix, `_` or `-`, then an alphanumeric code
static SKU_FRAGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]{1,10}[_-][a-z0-9_-]{2,}$").expect("valid SKU regex"));

/// 2-4 letters immediately followed by 2+ digits
static MODEL_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{2,4}[0-9]{2,}$").expect("valid model code regex"));

/// Code-like tokens only: underscore-joined, or a lettered prefix with a
/// digit somewhere. "heavy-duty" and "5-gallon" stay as words.
fn is_sku_fragment(token: &str) -> bool {
    if !SKU_FRAGMENT.is_match(token) {
        return false;
    }
    let prefix = token.split(['_', '-']).next().unwrap_or_default();
    token.contains('_')
        || (prefix.chars().any(|c| c.is_ascii_alphabetic())
            && token.chars().any(|c| c.is_ascii_digit()))
}

fn is_model_code(word: &str) -> bool {
    MODEL_CODE.is_match(word)
}

fn split_words(token: &str) -> impl Iterator<Item = &str> {
    token.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty())
}

fn normalized_words(raw: &str) -> Vec<String> {
    let lowered = raw.to_lowercase();
    let mut words = Vec::new();

    for token in lowered.split_whitespace() {
        let core = token.trim_matches(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'));
        if core.is_empty() || is_sku_fragment(core) {
            continue;
        }
        words.extend(
            split_words(core)
                .filter(|word| !is_model_code(word))
                .map(ToString::to_string),
        );
    }

    words
}

/// Canonical single-spaced form of `raw`
pub fn normalize(raw: &str) -> String {
    normalized_words(raw).join(" ")
}

/// Word sequence for a configured keyword. Noise stripping is not applied so
/// a phrase is never silently emptied by the SKU heuristics.
pub fn tokenize_phrase(raw: &str) -> Vec<String> {
    split_words(&raw.to_lowercase()).map(ToString::to_string).collect()
}

/// Normalized text kept as words for phrase / whole-word matching
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedText {
    words: Vec<String>,
}

impl NormalizedText {
    pub fn new(raw: &str) -> Self {
        Self {
            words: normalized_words(raw),
        }
    }

    /// Concatenates already-normalized parts in order
    pub fn join<'a>(parts: impl IntoIterator<Item = &'a Self>) -> Self {
        Self {
            words: parts
                .into_iter()
                .flat_map(|part| part.words.iter().cloned())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Phrase match: all words contiguous and in order. A single-word phrase
    /// therefore only matches a whole word, never a substring.
    pub fn contains(&self, phrase: &Phrase) -> bool {
        let needle = phrase.words();
        if needle.is_empty() || needle.len() > self.words.len() {
            return false;
        }
        self.words.windows(needle.len()).any(|window| window == needle)
    }

    /// First phrase (in list order) that matches
    pub fn first_match<'p>(&self, phrases: &'p [Phrase]) -> Option<&'p Phrase> {
        phrases.iter().find(|phrase| self.contains(phrase))
    }
}

impl std::fmt::Display for NormalizedText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.words.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Motor Assembly 120V", "motor assembly 120v")]
    #[case("  HEPA   Filter,  (replacement)!! ", "hepa filter replacement")]
    #[case("Bag for JV202 and PN600", "bag for and")]
    #[case("Brush simpli_B224-0500 kit", "brush kit")]
    #[case("Filter XV-10 housing", "filter housing")]
    #[case("Heavy-duty hose", "heavy duty hose")]
    #[case("5-Gallon Tank", "5 gallon tank")]
    #[case("2-Stage Motor", "2 stage motor")]
    #[case("12-Volt battery, 10-ft cord", "12 volt battery 10 ft cord")]
    #[case("Sac en papier, aspirateur électrique", "sac en papier aspirateur électrique")]
    #[case("Floor Machine 175 RPM", "floor machine 175 rpm")]
    #[case("", "")]
    fn normalizes_feed_text(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize(raw), expected);
    }

    #[test]
    fn noise_tokens_removed_not_substituted() {
        // no stray placeholder words left where codes were
        assert_eq!(normalize("JV202 motor"), "motor");
        assert_eq!(normalize("(JV202), motor"), "motor");
    }

    #[rstest]
    #[case("motor assembly complete", "motor", true)]
    #[case("motorized brush", "motor", false)]
    #[case("floor machine 175 rpm", "floor machine", true)]
    #[case("machine floor", "floor machine", false)]
    #[case("floor scrubbing machine", "floor machine", false)]
    #[case("hepa filter", "HEPA-Filter", true)]
    #[case("5-Gallon Tank", "gallon", true)]
    #[case("2-Stage Motor", "motor", true)]
    fn phrase_and_whole_word_matching(#[case] text: &str, #[case] keyword: &str, #[case] expected: bool) {
        let text = NormalizedText::new(text);
        let phrase = Phrase::new(keyword).unwrap();
        assert_eq!(text.contains(&phrase), expected);
    }

    #[test]
    fn join_preserves_order() {
        let title = NormalizedText::new("Paper Bag");
        let body = NormalizedText::new("Pack of 6");
        let joined = NormalizedText::join([&title, &body]);
        assert_eq!(joined.to_string(), "paper bag pack of 6");
    }

    #[test]
    fn phrase_tokenizer_keeps_codes() {
        assert_eq!(tokenize_phrase("JV202 Motor"), vec!["jv202", "motor"]);
    }
}
