//! Priority classifier
//!
//! 1. Global keyword precheck over the whole record: any hit assigns the
//!    global category with `high` confidence, regardless of rule priority.
//! 2. Rules in priority order (highest first, declaration order on ties).
//!    A rule is vetoed outright when any of its exclusions appears anywhere in
//!    the record. Otherwise the first keyword found selects the rule
//!    (first match wins, no scoring across rules).
//! 3. Nothing matched: "Needs Review", `low`, `no_match`.
//!
//! Classification is single-threaded and deterministic.

use std::sync::Arc;
use tracing::debug;

use crate::domain::category::{
    CategoryRule, ClassificationResult, ClassifiedProduct, Confidence, MatchField, ReasonCode,
    RuleSet,
};
use crate::domain::product::{Language, ProductRecord};
use crate::domain::services::text_normalizer::NormalizedText;

/// Normalized views of one record, computed once per record
#[derive(Debug, Clone)]
pub struct RecordTexts {
    titles: [NormalizedText; 2],
    bodies: [NormalizedText; 2],
    all: NormalizedText,
}

impl RecordTexts {
    pub fn new(record: &ProductRecord) -> Self {
        let title_en = NormalizedText::new(&record.title_en);
        let title_fr = NormalizedText::new(&record.title_fr);
        let desc_en = NormalizedText::new(&record.description_en);
        let desc_fr = NormalizedText::new(&record.description_fr);

        let body_en = NormalizedText::join([&title_en, &desc_en]);
        let body_fr = NormalizedText::join([&title_fr, &desc_fr]);
        let all = NormalizedText::join([&body_en, &body_fr]);

        Self {
            titles: [title_en, title_fr],
            bodies: [body_en, body_fr],
            all,
        }
    }

    const fn slot(language: Language) -> usize {
        match language {
            Language::En => 0,
            Language::Fr => 1,
        }
    }

    pub const fn title(&self, language: Language) -> &NormalizedText {
        &self.titles[Self::slot(language)]
    }

    /// Title followed by description, one language
    pub const fn body(&self, language: Language) -> &NormalizedText {
        &self.bodies[Self::slot(language)]
    }

    pub const fn all(&self) -> &NormalizedText {
        &self.all
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Arc<RuleSet>,
}

impl Classifier {
    pub const fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn classify(&self, record: &ProductRecord) -> ClassificationResult {
        let texts = RecordTexts::new(record);

        if let Some(result) = self.global_precheck(&texts) {
            return result;
        }

        for rule in self.rules.rules() {
            if rule.category.is_needs_review() {
                continue;
            }
            if let Some(result) = Self::evaluate_rule(rule, &texts) {
                return result;
            }
        }

        ClassificationResult::needs_review(ReasonCode::NoMatch)
    }

    /// Classifies every record in input order. No population enforcement here.
    pub fn classify_batch(&self, records: Vec<ProductRecord>) -> Vec<ClassifiedProduct> {
        records
            .into_iter()
            .map(|record| {
                let classification = self.classify(&record);
                debug!(
                    "🏷️ {} -> {} ({}, {})",
                    record.key,
                    classification.category.handle,
                    classification.confidence.as_str(),
                    classification.reason
                );
                ClassifiedProduct {
                    record,
                    classification,
                }
            })
            .collect()
    }

    fn global_precheck(&self, texts: &RecordTexts) -> Option<ClassificationResult> {
        let phrase = texts.all().first_match(&self.rules.global_keywords().phrases)?;
        Some(ClassificationResult {
            category: self.rules.global_category().clone(),
            confidence: Confidence::High,
            reason: ReasonCode::GlobalKeyword(phrase.to_string()),
            priority: None,
        })
    }

    fn evaluate_rule(rule: &CategoryRule, texts: &RecordTexts) -> Option<ClassificationResult> {
        if let Some(excluded_by) = rule.all_exclusions().find(|p| texts.all().contains(p)) {
            debug!(
                "⛔ rule '{}' vetoed by exclusion '{}'",
                rule.category.handle, excluded_by
            );
            return None;
        }

        Language::ALL.into_iter().find_map(|language| {
            let phrase = texts
                .body(language)
                .first_match(&rule.phrases(language).keywords)?;
            let (field, confidence) = if texts.title(language).contains(phrase) {
                (MatchField::Title, Confidence::High)
            } else {
                (MatchField::Description, Confidence::Medium)
            };
            Some(ClassificationResult {
                category: rule.category.clone(),
                confidence,
                reason: ReasonCode::Keyword {
                    phrase: phrase.to_string(),
                    field,
                    language,
                },
                priority: Some(rule.priority),
            })
        })
    }
}
