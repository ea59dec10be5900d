//! Placeholder product screening, applied before classification

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use tracing::debug;

use crate::domain::category::SkipPatterns;
use crate::domain::product::ProductRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    PriceBelowThreshold { price: Decimal, threshold: Decimal },
    TitlePattern { pattern: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PriceBelowThreshold { price, threshold } => {
                write!(f, "price {price:.2} at or below threshold {threshold}")
            }
            Self::TitlePattern { pattern } => write!(f, "matched skip pattern '{pattern}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedProduct {
    pub record: ProductRecord,
    pub reason: SkipReason,
}

pub struct SkipFilter<'a> {
    patterns: &'a SkipPatterns,
    lowered_patterns: Vec<String>,
}

impl<'a> SkipFilter<'a> {
    pub fn new(patterns: &'a SkipPatterns) -> Self {
        let lowered_patterns = patterns
            .title_patterns
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self {
            patterns,
            lowered_patterns,
        }
    }

    /// A zero price is a missing price, not a placeholder, and is kept.
    pub fn check(&self, record: &ProductRecord) -> Option<SkipReason> {
        let threshold = self.patterns.max_price_threshold;
        if record.price > Decimal::ZERO && record.price <= threshold {
            return Some(SkipReason::PriceBelowThreshold {
                price: record.price,
                threshold,
            });
        }

        let combined = format!("{} {}", record.title_en, record.title_fr).to_lowercase();
        self.lowered_patterns
            .iter()
            .find(|pattern| combined.contains(pattern.as_str()))
            .map(|pattern| SkipReason::TitlePattern {
                pattern: pattern.clone(),
            })
    }

    /// Splits records into (kept, skipped), preserving input order in both
    pub fn partition(&self, records: Vec<ProductRecord>) -> (Vec<ProductRecord>, Vec<SkippedProduct>) {
        let mut kept = Vec::with_capacity(records.len());
        let mut skipped = Vec::new();

        for record in records {
            match self.check(&record) {
                Some(reason) => {
                    debug!("⏭️ skipping {}: {}", record.key, reason);
                    skipped.push(SkippedProduct { record, reason });
                }
                None => kept.push(record),
            }
        }

        (kept, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::record;
    use std::str::FromStr;

    fn patterns() -> SkipPatterns {
        SkipPatterns {
            max_price_threshold: Decimal::from_str("0.05").unwrap(),
            title_patterns: vec!["Do Not Use".into(), "article factice".into()],
        }
    }

    #[test]
    fn penny_price_is_placeholder() {
        let patterns = patterns();
        let filter = SkipFilter::new(&patterns);
        let mut product = record("P1", "Motor", "");
        product.price = Decimal::from_str("0.01").unwrap();
        assert!(matches!(
            filter.check(&product),
            Some(SkipReason::PriceBelowThreshold { .. })
        ));

        product.price = Decimal::ZERO;
        assert_eq!(filter.check(&product), None);
    }

    #[test]
    fn title_patterns_match_either_language() {
        let patterns = patterns();
        let filter = SkipFilter::new(&patterns);

        let en = record("P2", "Motor - DO NOT USE", "");
        assert_eq!(
            filter.check(&en),
            Some(SkipReason::TitlePattern {
                pattern: "do not use".into()
            })
        );

        let mut fr = record("P3", "Motor", "");
        fr.title_fr = "Article factice moteur".into();
        assert!(filter.check(&fr).is_some());
    }

    #[test]
    fn partition_keeps_order() {
        let patterns = patterns();
        let filter = SkipFilter::new(&patterns);
        let (kept, skipped) = filter.partition(vec![
            record("A", "Hose", ""),
            record("B", "do not use", ""),
            record("C", "Wand", ""),
        ]);
        let keys: Vec<_> = kept.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["A", "C"]);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].record.key.as_str(), "B");
    }
}
