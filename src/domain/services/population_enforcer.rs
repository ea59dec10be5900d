//! Minimum-population post-pass
//!
//! Runs after the whole batch is classified. Counts are taken over the full
//! batch before any record is touched, so the outcome does not depend on
//! record order.

use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::domain::category::{ClassificationResult, ClassifiedProduct, ReasonCode, RuleSet};

/// One category that fell below its threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demotion {
    pub handle: String,
    pub count: usize,
    pub threshold: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnforcementReport {
    pub demotions: Vec<Demotion>,
    pub demoted_records: usize,
}

pub struct PopulationEnforcer<'a> {
    rules: &'a RuleSet,
}

impl<'a> PopulationEnforcer<'a> {
    pub const fn new(rules: &'a RuleSet) -> Self {
        Self { rules }
    }

    /// Per-handle counts over the batch, excluding the fallback category
    pub fn count(products: &[ClassifiedProduct]) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for product in products {
            let category = &product.classification.category;
            if category.is_needs_review() {
                continue;
            }
            *counts.entry(category.handle.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Demotes every record in a category whose batch count is below the
    /// rule's `min_products`. Categories without a rule (e.g. the global
    /// parts category when it is not declared) are never demoted.
    pub fn enforce(&self, products: &mut [ClassifiedProduct]) -> EnforcementReport {
        let counts = Self::count(products);

        let below: BTreeMap<&str, Demotion> = counts
            .iter()
            .filter_map(|(handle, &count)| {
                let rule = self.rules.rule_by_handle(handle)?;
                (count < rule.min_products).then(|| {
                    (
                        handle.as_str(),
                        Demotion {
                            handle: handle.clone(),
                            count,
                            threshold: rule.min_products,
                        },
                    )
                })
            })
            .collect();

        let mut report = EnforcementReport::default();
        if below.is_empty() {
            return report;
        }

        for product in products.iter_mut() {
            if let Some(demotion) = below.get(product.classification.category.handle.as_str()) {
                product.classification = ClassificationResult::needs_review(
                    ReasonCode::BelowMinProducts {
                        count: demotion.count,
                        threshold: demotion.threshold,
                    },
                );
                report.demoted_records += 1;
            }
        }

        for demotion in below.values() {
            warn!(
                "📉 category '{}' has {} product(s), below minimum {}; demoted to Needs Review",
                demotion.handle, demotion.count, demotion.threshold
            );
        }
        report.demotions = below.into_values().collect();
        info!(
            "📉 Population enforcement demoted {} record(s) across {} categor(ies)",
            report.demoted_records,
            report.demotions.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::category::{
        CategoryRef, CategoryRule, Confidence, GlobalKeywordSet, SkipPatterns,
    };
    use crate::domain::services::classifier::Classifier;
    use crate::test_utils::{record, rule_with};
    use std::sync::Arc;

    fn springs_rules() -> Arc<RuleSet> {
        let mut springs: CategoryRule = rule_with("springs", "Parts > Springs", 90, &["spring"], &[]);
        springs.min_products = 5;
        let hoses = rule_with("hoses", "Parts > Hoses", 10, &["hose"], &[]);
        Arc::new(
            RuleSet::new(
                vec![springs, hoses],
                GlobalKeywordSet::new(&["gasket"]),
                CategoryRef::general_parts(),
                SkipPatterns::default(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn under_populated_category_is_demoted() {
        let rules = springs_rules();
        let classifier = Classifier::new(rules.clone());
        let mut batch = classifier.classify_batch(vec![
            record("S1", "Spring small", ""),
            record("S2", "Spring large", ""),
            record("S3", "Return spring", ""),
            record("H1", "Hose 2m", ""),
        ]);

        let report = PopulationEnforcer::new(&rules).enforce(&mut batch);

        assert_eq!(report.demoted_records, 3);
        assert_eq!(
            report.demotions,
            vec![Demotion {
                handle: "springs".into(),
                count: 3,
                threshold: 5
            }]
        );
        for product in &batch[..3] {
            assert!(product.classification.is_needs_review());
            assert_eq!(product.classification.confidence, Confidence::Low);
            assert_eq!(product.classification.reason.to_string(), "below_min_products:3/5");
        }
        assert_eq!(batch[3].classification.category.handle, "hoses");
    }

    #[test]
    fn category_at_threshold_is_kept() {
        let rules = springs_rules();
        let classifier = Classifier::new(rules.clone());
        let records = (0..5).map(|i| record(&format!("S{i}"), "Spring", "")).collect();
        let mut batch = classifier.classify_batch(records);

        let report = PopulationEnforcer::new(&rules).enforce(&mut batch);
        assert_eq!(report, EnforcementReport::default());
        assert!(batch.iter().all(|p| p.classification.category.handle == "springs"));
    }

    #[test]
    fn global_category_without_rule_is_exempt() {
        let rules = springs_rules();
        let classifier = Classifier::new(rules.clone());
        let mut batch = classifier.classify_batch(vec![record("G1", "Door gasket", "")]);

        PopulationEnforcer::new(&rules).enforce(&mut batch);
        assert_eq!(batch[0].classification.category, CategoryRef::general_parts());
    }

    #[test]
    fn fallback_records_are_not_counted() {
        let rules = springs_rules();
        let classifier = Classifier::new(rules);
        let batch = classifier.classify_batch(vec![record("X1", "Unknown", "")]);
        assert!(PopulationEnforcer::count(&batch).is_empty());
    }
}
