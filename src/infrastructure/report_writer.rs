//! CSV and JSON reports written at the end of each stage

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::domain::category::ClassifiedProduct;
use crate::domain::dispatch::DispatchOutcome;
use crate::domain::product::{ExternalKey, ProductRecord};
use crate::domain::services::skip_filter::SkippedProduct;
use crate::infrastructure::feed_parser::RejectedRow;

pub const NEEDS_REVIEW_FILE: &str = "needs_review.csv";
pub const FAILED_DISPATCH_FILE: &str = "failed_dispatch.csv";
pub const SKIPPED_FILE: &str = "skipped_products.csv";
pub const REJECTED_FILE: &str = "rejected_rows.csv";
pub const SUMMARY_FILE: &str = "run_summary.json";

#[derive(Serialize)]
struct NeedsReviewRow<'a> {
    #[serde(rename = "SKU")]
    sku: &'a str,
    title_en: &'a str,
    title_fr: &'a str,
    description_en: &'a str,
    description_fr: &'a str,
    reason: String,
}

#[derive(Serialize)]
struct FailedDispatchRow<'a> {
    #[serde(rename = "SKU")]
    sku: &'a str,
    kind: String,
    state: &'static str,
    attempts: u32,
    last_error: &'a str,
    title_en: &'a str,
    title_fr: &'a str,
    description_en: &'a str,
    description_fr: &'a str,
}

#[derive(Serialize)]
struct SkippedRow<'a> {
    #[serde(rename = "SKU")]
    sku: &'a str,
    title_en: &'a str,
    price: String,
    reason: String,
}

#[derive(Serialize)]
struct RejectedCsvRow<'a> {
    row: usize,
    #[serde(rename = "SKU")]
    sku: &'a str,
    reason: &'a str,
}

/// Writes every report into one directory, created on demand
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create report directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Header row first, so an empty report still says what it would contain
    fn write_csv<T: Serialize>(&self, file_name: &str, headers: &[&str], rows: &[T]) -> Result<PathBuf> {
        let path = self.dir.join(file_name);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create report {}", path.display()))?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        writer.write_record(headers)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to write report {}", path.display()))?;

        info!("📝 {} row(s) written to {}", rows.len(), path.display());
        Ok(path)
    }

    /// Every product left in Needs Review
    pub fn write_needs_review(&self, products: &[ClassifiedProduct]) -> Result<PathBuf> {
        let rows: Vec<NeedsReviewRow<'_>> = products
            .iter()
            .filter(|p| p.classification.is_needs_review())
            .map(|p| NeedsReviewRow {
                sku: p.record.key.as_str(),
                title_en: &p.record.title_en,
                title_fr: &p.record.title_fr,
                description_en: &p.record.description_en,
                description_fr: &p.record.description_fr,
                reason: p.classification.reason.to_string(),
            })
            .collect();
        self.write_csv(
            NEEDS_REVIEW_FILE,
            &["SKU", "title_en", "title_fr", "description_en", "description_fr", "reason"],
            &rows,
        )
    }

    /// Failed and never-dispatched mutations; `records` supplies the feed text
    pub fn write_failed_dispatch<'a>(
        &self,
        outcomes: impl IntoIterator<Item = &'a DispatchOutcome>,
        records: &HashMap<&ExternalKey, &ProductRecord>,
    ) -> Result<PathBuf> {
        let rows: Vec<FailedDispatchRow<'_>> = outcomes
            .into_iter()
            .filter(|o| o.state.is_failure())
            .map(|o| {
                let record = records.get(&o.key).copied();
                FailedDispatchRow {
                    sku: o.key.as_str(),
                    kind: o.kind.to_string(),
                    state: o.state.as_str(),
                    attempts: o.attempts,
                    last_error: o.last_error.as_deref().unwrap_or(""),
                    title_en: record.map_or("", |r| r.title_en.as_str()),
                    title_fr: record.map_or("", |r| r.title_fr.as_str()),
                    description_en: record.map_or("", |r| r.description_en.as_str()),
                    description_fr: record.map_or("", |r| r.description_fr.as_str()),
                }
            })
            .collect();
        self.write_csv(
            FAILED_DISPATCH_FILE,
            &[
                "SKU",
                "kind",
                "state",
                "attempts",
                "last_error",
                "title_en",
                "title_fr",
                "description_en",
                "description_fr",
            ],
            &rows,
        )
    }

    pub fn write_skipped(&self, skipped: &[SkippedProduct]) -> Result<PathBuf> {
        let rows: Vec<SkippedRow<'_>> = skipped
            .iter()
            .map(|s| SkippedRow {
                sku: s.record.key.as_str(),
                title_en: &s.record.title_en,
                price: s.record.price.to_string(),
                reason: s.reason.to_string(),
            })
            .collect();
        self.write_csv(SKIPPED_FILE, &["SKU", "title_en", "price", "reason"], &rows)
    }

    pub fn write_rejected(&self, rejected: &[RejectedRow]) -> Result<PathBuf> {
        let rows: Vec<RejectedCsvRow<'_>> = rejected
            .iter()
            .map(|r| RejectedCsvRow {
                row: r.row,
                sku: r.key.as_deref().unwrap_or(""),
                reason: &r.reason,
            })
            .collect();
        self.write_csv(REJECTED_FILE, &["row", "SKU", "reason"], &rows)
    }

    pub fn write_summary<T: Serialize>(&self, summary: &T) -> Result<PathBuf> {
        let path = self.dir.join(SUMMARY_FILE);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, summary)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("📝 Run summary written to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::category::{ClassificationResult, ReasonCode};
    use crate::domain::dispatch::{DispatchState, MutationKind};
    use crate::test_utils::record;
    use tempfile::TempDir;

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn needs_review_lists_only_fallback_records() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path().join("reports")).unwrap();

        let motor = record("M1", "Motor", "");
        let products = vec![
            ClassifiedProduct {
                record: record("X1", "Mystery; item", "no idea"),
                classification: ClassificationResult::needs_review(ReasonCode::NoMatch),
            },
            ClassifiedProduct {
                classification: ClassificationResult {
                    category: crate::domain::category::CategoryRef::general_parts(),
                    confidence: crate::domain::category::Confidence::High,
                    reason: ReasonCode::GlobalKeyword("motor".into()),
                    priority: None,
                },
                record: motor,
            },
        ];

        let path = writer.write_needs_review(&products).unwrap();
        let content = read(&path);
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "SKU,title_en,title_fr,description_en,description_fr,reason");
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("X1,Mystery; item,"));
        assert!(lines[1].ends_with("no_match"));
    }

    #[test]
    fn failed_dispatch_joins_feed_text() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path()).unwrap();
        let product = record("SKU1", "Motor", "desc");
        let records = HashMap::from([(&product.key, &product)]);

        let outcomes = vec![
            DispatchOutcome {
                key: product.key.clone(),
                kind: MutationKind::Create,
                state: DispatchState::FailedPermanent,
                attempts: 1,
                last_error: Some("Rejected by remote: title".into()),
                remote_id: None,
            },
            DispatchOutcome {
                key: ExternalKey::new("OK").unwrap(),
                kind: MutationKind::Update,
                state: DispatchState::Succeeded,
                attempts: 1,
                last_error: None,
                remote_id: Some("gid://1".into()),
            },
        ];

        let content = read(&writer.write_failed_dispatch(&outcomes, &records).unwrap());
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[1],
            "SKU1,create,failed_permanent,1,Rejected by remote: title,Motor,,desc,"
        );
    }

    #[test]
    fn empty_reports_keep_their_header() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path()).unwrap();
        let content = read(&writer.write_rejected(&[]).unwrap());
        assert_eq!(content.trim(), "row,SKU,reason");
    }

    #[test]
    fn summary_is_pretty_json() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path()).unwrap();
        let path = writer
            .write_summary(&serde_json::json!({"creates": 3}))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&read(&path)).unwrap();
        assert_eq!(value["creates"], 3);
    }
}
