//! Category rule document loader
//!
//! Parses the JSON rule document (`settings` + `categories[]`), validates it
//! and compiles it into an immutable [`RuleSet`]. Any problem here is fatal
//! for the run and surfaces as [`SyncError::Config`].

use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::domain::category::{
    CategoryRef, CategoryRule, GlobalKeywordSet, LanguagePhrases, Phrase, RuleSet, SkipPatterns,
};
use crate::domain::errors::SyncError;

#[derive(Debug, Deserialize)]
struct RuleDocument {
    #[serde(default)]
    settings: SettingsDocument,
    #[serde(default)]
    categories: Vec<CategoryDocument>,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsDocument {
    #[serde(default)]
    global_part_keywords: Vec<String>,
    #[serde(default)]
    global_part_category: Option<CategoryRefDocument>,
    #[serde(default)]
    skip_patterns: Option<SkipPatternsDocument>,
}

#[derive(Debug, Deserialize)]
struct CategoryRefDocument {
    #[serde(rename = "productType")]
    product_type: String,
    handle: String,
    title: String,
}

#[derive(Debug, Deserialize)]
struct SkipPatternsDocument {
    #[serde(default)]
    max_price_threshold: Option<Decimal>,
    #[serde(default)]
    title_patterns_en: Vec<String>,
    #[serde(default)]
    title_patterns_fr: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CategoryDocument {
    #[serde(rename = "productType")]
    product_type: String,
    handle: String,
    #[serde(default)]
    title: Option<String>,
    priority: i64,
    #[serde(default)]
    keywords_en: Vec<String>,
    #[serde(default)]
    keywords_fr: Vec<String>,
    #[serde(default)]
    exclusions_en: Vec<String>,
    #[serde(default)]
    exclusions_fr: Vec<String>,
    #[serde(default = "default_min_products")]
    min_products: usize,
}

const fn default_min_products() -> usize {
    1
}

impl CategoryDocument {
    fn into_rule(self, declaration_index: usize) -> CategoryRule {
        let title = self.title.unwrap_or_else(|| self.handle.clone());
        CategoryRule {
            category: CategoryRef::new(self.product_type.trim(), self.handle.trim(), title.trim()),
            priority: self.priority,
            en: LanguagePhrases {
                keywords: Phrase::compile_all(&self.keywords_en),
                exclusions: Phrase::compile_all(&self.exclusions_en),
            },
            fr: LanguagePhrases {
                keywords: Phrase::compile_all(&self.keywords_fr),
                exclusions: Phrase::compile_all(&self.exclusions_fr),
            },
            min_products: self.min_products,
            declaration_index,
        }
    }
}

/// Parse and validate a rule document held in memory
pub fn parse_rules(json: &str) -> Result<RuleSet, SyncError> {
    let document: RuleDocument = serde_json::from_str(json)
        .map_err(|e| SyncError::config(format!("invalid rule document: {e}")))?;

    let global_category = document
        .settings
        .global_part_category
        .map_or_else(CategoryRef::general_parts, |c| {
            CategoryRef::new(c.product_type, c.handle, c.title)
        });

    let skip_patterns = document
        .settings
        .skip_patterns
        .map(|doc| {
            let defaults = SkipPatterns::default();
            SkipPatterns {
                max_price_threshold: doc.max_price_threshold.unwrap_or(defaults.max_price_threshold),
                title_patterns: doc
                    .title_patterns_en
                    .into_iter()
                    .chain(doc.title_patterns_fr)
                    .collect(),
            }
        })
        .unwrap_or_default();

    let rules: Vec<CategoryRule> = document
        .categories
        .into_iter()
        .enumerate()
        .map(|(index, category)| category.into_rule(index))
        .collect();

    RuleSet::new(
        rules,
        GlobalKeywordSet::new(&document.settings.global_part_keywords),
        global_category,
        skip_patterns,
    )
}

/// Read, parse and validate the rule document at `path`
pub async fn load_rules(path: &Path) -> Result<RuleSet, SyncError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SyncError::config(format!("cannot read {}: {e}", path.display())))?;

    let rules = parse_rules(&content)?;
    info!(
        "📚 Loaded {} category rule(s) and {} global keyword(s) from {}",
        rules.rules().len(),
        rules.global_keywords().phrases.len(),
        path.display()
    );
    Ok(rules)
}
