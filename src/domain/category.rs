//! # Category rules and classification results
//!
//! Rules are value objects evaluated uniformly by the classifier; nothing here
//! special-cases a particular category. The `RuleSet` is built once per run and
//! never mutated afterwards.

use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;

use crate::domain::errors::SyncError;
use crate::domain::product::{Language, ProductRecord};
use crate::domain::services::text_normalizer::tokenize_phrase;

/// Handle reserved for the "Needs Review" fallback
pub const NEEDS_REVIEW_HANDLE: &str = "needs-review";

/// Where a product lands: storefront category path, handle and display title
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CategoryRef {
    pub product_type: String,
    pub handle: String,
    pub title: String,
}

impl CategoryRef {
    pub fn new(
        product_type: impl Into<String>,
        handle: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            product_type: product_type.into(),
            handle: handle.into(),
            title: title.into(),
        }
    }

    pub fn needs_review() -> Self {
        Self::new("Other > Needs Review", NEEDS_REVIEW_HANDLE, "Needs Review")
    }

    pub fn general_parts() -> Self {
        Self::new(
            "Parts & Replacement Parts > General Parts",
            "parts-general",
            "General Parts",
        )
    }

    pub fn is_needs_review(&self) -> bool {
        self.handle == NEEDS_REVIEW_HANDLE
    }
}

/// A keyword or exclusion precompiled into its normalized word sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phrase {
    words: Vec<String>,
}

impl Phrase {
    /// Returns `None` for phrases that normalize to nothing.
    pub fn new(raw: &str) -> Option<Self> {
        let words = tokenize_phrase(raw);
        if words.is_empty() {
            None
        } else {
            Some(Self { words })
        }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn is_single_word(&self) -> bool {
        self.words.len() == 1
    }

    pub fn compile_all<S: AsRef<str>>(raw: &[S]) -> Vec<Self> {
        raw.iter().filter_map(|p| Self::new(p.as_ref())).collect()
    }
}

impl fmt::Display for Phrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.words.join(" "))
    }
}

/// Keyword and exclusion lists for one language
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LanguagePhrases {
    pub keywords: Vec<Phrase>,
    pub exclusions: Vec<Phrase>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRule {
    pub category: CategoryRef,
    pub priority: i64,
    pub en: LanguagePhrases,
    pub fr: LanguagePhrases,
    pub min_products: usize,
    /// Position in the source document, used as the stable tie-breaker
    pub declaration_index: usize,
}

impl CategoryRule {
    pub const fn phrases(&self, language: Language) -> &LanguagePhrases {
        match language {
            Language::En => &self.en,
            Language::Fr => &self.fr,
        }
    }

    pub fn all_exclusions(&self) -> impl Iterator<Item = &Phrase> {
        self.en.exclusions.iter().chain(self.fr.exclusions.iter())
    }
}

/// Phrases that short-circuit classification to a fixed category
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalKeywordSet {
    pub phrases: Vec<Phrase>,
}

impl GlobalKeywordSet {
    pub fn new<S: AsRef<str>>(raw: &[S]) -> Self {
        Self {
            phrases: Phrase::compile_all(raw),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

/// Placeholder-product screening, applied before classification
#[derive(Debug, Clone, PartialEq)]
pub struct SkipPatterns {
    pub max_price_threshold: rust_decimal::Decimal,
    pub title_patterns: Vec<String>,
}

impl Default for SkipPatterns {
    fn default() -> Self {
        Self {
            max_price_threshold: rust_decimal::Decimal::new(5, 2),
            title_patterns: Vec::new(),
        }
    }
}

/// Immutable, priority-sorted rule table for one run
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<CategoryRule>,
    global_keywords: GlobalKeywordSet,
    global_category: CategoryRef,
    fallback: CategoryRef,
    skip_patterns: SkipPatterns,
}

impl RuleSet {
    /// Sorts by priority descending; ties keep declaration order (stable sort).
    pub fn new(
        mut rules: Vec<CategoryRule>,
        global_keywords: GlobalKeywordSet,
        global_category: CategoryRef,
        skip_patterns: SkipPatterns,
    ) -> Result<Self, SyncError> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if rule.category.handle.trim().is_empty() {
                return Err(SyncError::config(format!(
                    "category '{}' has an empty handle",
                    rule.category.product_type
                )));
            }
            if rule.category.product_type.trim().is_empty() {
                return Err(SyncError::config(format!(
                    "category '{}' has an empty productType",
                    rule.category.handle
                )));
            }
            if !seen.insert(rule.category.handle.clone()) {
                return Err(SyncError::config(format!(
                    "duplicate category handle '{}'",
                    rule.category.handle
                )));
            }
        }

        rules.sort_by_key(|rule| (std::cmp::Reverse(rule.priority), rule.declaration_index));

        Ok(Self {
            rules,
            global_keywords,
            global_category,
            fallback: CategoryRef::needs_review(),
            skip_patterns,
        })
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    pub const fn global_keywords(&self) -> &GlobalKeywordSet {
        &self.global_keywords
    }

    pub const fn global_category(&self) -> &CategoryRef {
        &self.global_category
    }

    pub const fn fallback(&self) -> &CategoryRef {
        &self.fallback
    }

    pub const fn skip_patterns(&self) -> &SkipPatterns {
        &self.skip_patterns
    }

    pub fn rule_by_handle(&self, handle: &str) -> Option<&CategoryRule> {
        self.rules.iter().find(|rule| rule.category.handle == handle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Which part of the record a keyword was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchField {
    Title,
    Description,
}

/// Machine-readable explanation of a classification
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    GlobalKeyword(String),
    Keyword {
        phrase: String,
        field: MatchField,
        language: Language,
    },
    NoMatch,
    BelowMinProducts {
        count: usize,
        threshold: usize,
    },
}

impl ReasonCode {
    /// Stable prefix used for grouping in the run summary
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::GlobalKeyword(_) => "global_keyword",
            Self::Keyword { .. } => "keyword",
            Self::NoMatch => "no_match",
            Self::BelowMinProducts { .. } => "below_min_products",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GlobalKeyword(phrase) => write!(f, "global_keyword:{phrase}"),
            Self::Keyword { phrase, field, .. } => {
                let field = match field {
                    MatchField::Title => "title",
                    MatchField::Description => "description",
                };
                write!(f, "keyword:{phrase}@{field}")
            }
            Self::NoMatch => f.write_str("no_match"),
            Self::BelowMinProducts { count, threshold } => {
                write!(f, "below_min_products:{count}/{threshold}")
            }
        }
    }
}

impl Serialize for ReasonCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationResult {
    pub category: CategoryRef,
    pub confidence: Confidence,
    pub reason: ReasonCode,
    /// Priority of the winning rule, `None` for global and fallback assignments
    pub priority: Option<i64>,
}

impl ClassificationResult {
    pub fn needs_review(reason: ReasonCode) -> Self {
        Self {
            category: CategoryRef::needs_review(),
            confidence: Confidence::Low,
            reason,
            priority: None,
        }
    }

    pub fn is_needs_review(&self) -> bool {
        self.category.is_needs_review()
    }
}

/// A feed record paired with its (possibly demoted) classification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedProduct {
    pub record: ProductRecord,
    pub classification: ClassificationResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(handle: &str, priority: i64, index: usize) -> CategoryRule {
        CategoryRule {
            category: CategoryRef::new(format!("Cat > {handle}"), handle, handle),
            priority,
            en: LanguagePhrases::default(),
            fr: LanguagePhrases::default(),
            min_products: 1,
            declaration_index: index,
        }
    }

    #[test]
    fn rules_sorted_by_priority_then_declaration() {
        let rules = vec![rule("a", 10, 0), rule("b", 90, 1), rule("c", 10, 2), rule("d", 90, 3)];
        let set = RuleSet::new(
            rules,
            GlobalKeywordSet::default(),
            CategoryRef::general_parts(),
            SkipPatterns::default(),
        )
        .unwrap();
        let order: Vec<_> = set.rules().iter().map(|r| r.category.handle.as_str()).collect();
        assert_eq!(order, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn duplicate_handle_is_config_error() {
        let err = RuleSet::new(
            vec![rule("motors", 10, 0), rule("motors", 20, 1)],
            GlobalKeywordSet::default(),
            CategoryRef::general_parts(),
            SkipPatterns::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Config { .. }));
    }

    #[test]
    fn reason_codes_render_machine_readable() {
        let keyword = ReasonCode::Keyword {
            phrase: "motor".into(),
            field: MatchField::Title,
            language: Language::En,
        };
        assert_eq!(keyword.to_string(), "keyword:motor@title");
        assert_eq!(
            ReasonCode::BelowMinProducts { count: 3, threshold: 5 }.to_string(),
            "below_min_products:3/5"
        );
        assert_eq!(ReasonCode::GlobalKeyword("gasket".into()).to_string(), "global_keyword:gasket");
        assert_eq!(ReasonCode::NoMatch.to_string(), "no_match");
    }

    #[test]
    fn blank_phrases_are_dropped() {
        let phrases = Phrase::compile_all(&["  ", "Floor Machine", "--"]);
        assert_eq!(phrases.len(), 1);
        assert_eq!(phrases[0].to_string(), "floor machine");
    }
}
