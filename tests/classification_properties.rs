//! Property tests for classification, population enforcement and the delta

use catalog_sync_lib::domain::category::{
    CategoryRef, CategoryRule, ClassifiedProduct, GlobalKeywordSet, RuleSet, SkipPatterns,
};
use catalog_sync_lib::domain::delta::{DesiredProduct, RemoteSnapshot};
use catalog_sync_lib::domain::product::{Language, ProductRecord};
use catalog_sync_lib::domain::services::{Classifier, DeltaCalculator, PopulationEnforcer};
use catalog_sync_lib::test_utils::{record, remote, rule_with};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

const VOCABULARY: &[&str] = &[
    "motor", "hose", "wand", "spring", "brush", "filter", "bag", "gasket", "floor", "machine",
    "belt", "wheel", "switch", "cord", "nozzle", "pad",
];

fn rule_set(rules: Vec<CategoryRule>, global: &[&str]) -> Arc<RuleSet> {
    Arc::new(
        RuleSet::new(
            rules,
            GlobalKeywordSet::new(global),
            CategoryRef::general_parts(),
            SkipPatterns::default(),
        )
        .unwrap(),
    )
}

fn standard_rules() -> Vec<CategoryRule> {
    let mut springs = rule_with("springs", "Parts > Springs", 90, &["spring"], &[]);
    springs.min_products = 3;
    vec![
        rule_with("motors", "Parts > Motors", 100, &["motor"], &["floor machine"]),
        springs,
        rule_with("hoses", "Parts > Hoses", 70, &["hose", "nozzle"], &["wand"]),
        rule_with("floor", "Equipment > Floor Machines", 50, &["floor machine"], &[]),
        rule_with("brushes", "Parts > Brushes", 40, &["brush", "pad"], &["belt"]),
    ]
}

fn words() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(VOCABULARY), 0..6).prop_map(|w| w.join(" "))
}

fn records() -> impl Strategy<Value = Vec<ProductRecord>> {
    prop::collection::vec((words(), words()), 0..40).prop_map(|texts| {
        texts
            .into_iter()
            .enumerate()
            .map(|(i, (title, description))| record(&format!("SKU{i}"), &title, &description))
            .collect()
    })
}

fn classify_and_enforce(rules: &Arc<RuleSet>, records: Vec<ProductRecord>) -> Vec<ClassifiedProduct> {
    let mut batch = Classifier::new(rules.clone()).classify_batch(records);
    PopulationEnforcer::new(rules).enforce(&mut batch);
    batch
}

proptest! {
    #[test]
    fn classification_is_deterministic(records in records()) {
        let rules = rule_set(standard_rules(), &["gasket"]);
        let first = classify_and_enforce(&rules, records.clone());
        let second = classify_and_enforce(&rules, records);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn exclusion_always_vetoes_its_rule(title in words(), description in words()) {
        let rules = rule_set(standard_rules(), &[]);
        let classifier = Classifier::new(rules.clone());
        let product = record("SKU", &title, &description);
        let result = classifier.classify(&product);

        if let Some(rule) = rules.rule_by_handle(&result.category.handle) {
            let text = format!("{title} {description}");
            let words: Vec<&str> = text.split_whitespace().collect();
            for exclusion in rule.all_exclusions() {
                let excluded = exclusion.words();
                let present = words.windows(excluded.len()).any(|w| w == excluded);
                prop_assert!(!present, "{} won despite exclusion {}", rule.category.handle, exclusion);
            }
        }
    }

    #[test]
    fn global_keyword_dominates_every_rule(title in words(), description in words()) {
        let rules = rule_set(standard_rules(), &["gasket"]);
        let product = record("SKU", &format!("{title} gasket"), &description);
        let result = Classifier::new(rules).classify(&product);
        prop_assert_eq!(result.category, CategoryRef::general_parts());
        prop_assert_eq!(result.reason.to_string(), "global_keyword:gasket");
    }

    #[test]
    fn higher_priority_wins_in_any_declaration_order(
        order in Just(vec![0usize, 1, 2, 3]).prop_shuffle(),
        priorities in Just(vec![10i64, 20, 30, 40]).prop_shuffle(),
    ) {
        let handles = ["alpha", "beta", "gamma", "delta"];
        let rules: Vec<CategoryRule> = order
            .iter()
            .map(|&i| rule_with(handles[i], handles[i], priorities[i], &["motor"], &[]))
            .collect();
        let winner = handles[priorities.iter().position(|&p| p == 40).unwrap()];

        let result = Classifier::new(rule_set(rules, &[])).classify(&record("SKU", "motor", ""));
        prop_assert_eq!(result.category.handle, winner);
        prop_assert_eq!(result.priority, Some(40));
    }

    #[test]
    fn population_enforcement_ignores_processing_order(records in records()) {
        let rules = rule_set(standard_rules(), &["gasket"]);
        let forward = classify_and_enforce(&rules, records.clone());
        let mut reversed = classify_and_enforce(&rules, records.into_iter().rev().collect());
        reversed.reverse();
        prop_assert_eq!(forward, reversed);
    }

    #[test]
    fn delta_partitions_exactly_the_desired_keys(
        desired_ids in prop::collection::btree_set(0u16..60, 0..40),
        remote_ids in prop::collection::btree_set(0u16..60, 0..40),
        changed in prop::collection::vec(any::<bool>(), 60),
    ) {
        let rules = rule_set(standard_rules(), &[]);
        let records: Vec<ProductRecord> = desired_ids
            .iter()
            .map(|id| record(&format!("K{id}"), "motor", ""))
            .collect();
        let desired: Vec<DesiredProduct> = Classifier::new(rules)
            .classify_batch(records)
            .into_iter()
            .map(|p| DesiredProduct::from_classified(p, Language::En))
            .collect();
        let remotes = remote_ids
            .iter()
            .map(|&id| {
                let title = if changed[usize::from(id)] { "old title" } else { "motor" };
                remote(&format!("K{id}"), title, "10.00", 1, "Parts > Motors")
            })
            .collect();
        let snapshot = RemoteSnapshot::from_products(remotes).0;

        let plan = DeltaCalculator::calculate(desired, &snapshot).unwrap();
        let planned: Vec<String> = plan.entries.iter().map(|e| e.key().to_string()).collect();
        let unique: BTreeSet<&String> = planned.iter().collect();
        let expected: BTreeSet<String> = desired_ids.iter().map(|id| format!("K{id}")).collect();

        prop_assert_eq!(planned.len(), unique.len());
        prop_assert_eq!(unique.into_iter().cloned().collect::<BTreeSet<_>>(), expected);

        let counts = plan.counts();
        prop_assert_eq!(counts.creates + counts.updates + counts.unchanged, desired_ids.len());
        prop_assert_eq!(counts.creates, desired_ids.difference(&remote_ids).count());
        prop_assert_eq!(counts.archives, remote_ids.difference(&desired_ids).count());
    }
}
