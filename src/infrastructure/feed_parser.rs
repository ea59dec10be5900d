//! Supplier feed ingestion
//!
//! The feed is semicolon-delimited with a header row. Rows missing a SKU or
//! with an unparseable price/inventory are rejected and reported; the rest of
//! the feed is still used. A repeated SKU keeps its first row and rejects the
//! later ones.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Read;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::errors::SyncError;
use crate::domain::product::{ExternalKey, ProductRecord};
use crate::infrastructure::config::defaults;

/// Raw row as it appears in the feed; every column optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FeedRow {
    #[serde(rename = "SKU")]
    sku: Option<String>,
    #[serde(rename = "ProductTitleEN")]
    title_en: Option<String>,
    #[serde(rename = "ProductTitleFR")]
    title_fr: Option<String>,
    #[serde(rename = "ProductDescriptionEN")]
    description_en: Option<String>,
    #[serde(rename = "ProductDescriptionFR")]
    description_fr: Option<String>,
    #[serde(rename = "RegularPrice")]
    price: Option<String>,
    #[serde(rename = "Inventory")]
    inventory: Option<String>,
    weight: Option<String>,
    upc: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Whole units; fractional quantities are truncated, blank means zero
fn parse_inventory(raw: Option<&str>) -> Option<i64> {
    match raw.map(str::trim) {
        None | Some("") => Some(0),
        Some(value) => value
            .parse::<i64>()
            .ok()
            .or_else(|| value.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
    }
}

impl FeedRow {
    fn into_record(self, row: usize) -> Result<ProductRecord, SyncError> {
        let key = self
            .sku
            .as_deref()
            .and_then(ExternalKey::new)
            .ok_or_else(|| SyncError::malformed(row, None, "missing SKU"))?;

        let raw_price = non_blank(self.price)
            .ok_or_else(|| SyncError::malformed(row, Some(key.as_str()), "missing RegularPrice"))?;
        let price = Decimal::from_str(&raw_price).map_err(|_| {
            SyncError::malformed(row, Some(key.as_str()), format!("invalid RegularPrice '{raw_price}'"))
        })?;

        let inventory_quantity = parse_inventory(self.inventory.as_deref()).ok_or_else(|| {
            SyncError::malformed(row, Some(key.as_str()), "invalid Inventory")
        })?;

        Ok(ProductRecord {
            key,
            title_en: non_blank(self.title_en).unwrap_or_default(),
            title_fr: non_blank(self.title_fr).unwrap_or_default(),
            description_en: non_blank(self.description_en).unwrap_or_default(),
            description_fr: non_blank(self.description_fr).unwrap_or_default(),
            price,
            inventory_quantity,
            weight_kg: non_blank(self.weight).and_then(|w| w.parse().ok()),
            barcode: non_blank(self.upc),
        })
    }
}

/// A feed row that did not make it into the desired set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRow {
    /// 1-based line number in the feed (the header is line 1)
    pub row: usize,
    pub key: Option<String>,
    pub reason: String,
}

impl From<SyncError> for RejectedRow {
    fn from(error: SyncError) -> Self {
        match error {
            SyncError::MalformedRecord { row, key, reason } => Self { row, key, reason },
            other => Self {
                row: 0,
                key: None,
                reason: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct FeedIngestion {
    pub records: Vec<ProductRecord>,
    pub rejected: Vec<RejectedRow>,
}

/// Parse a semicolon-delimited feed
pub fn parse_feed<R: Read>(reader: R) -> Result<FeedIngestion> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers().context("Failed to read feed header")?.clone();

    let mut ingestion = FeedIngestion::default();
    let mut seen = HashSet::new();

    for (index, result) in reader.records().enumerate() {
        let row = index + 2;
        let parsed = result
            .map_err(|e| SyncError::malformed(row, None, format!("unreadable row: {e}")))
            .and_then(|record| {
                record
                    .deserialize::<FeedRow>(Some(&headers))
                    .map_err(|e| SyncError::malformed(row, None, format!("unreadable row: {e}")))
            })
            .and_then(|raw| raw.into_record(row))
            .and_then(|record| {
                if seen.insert(record.key.clone()) {
                    Ok(record)
                } else {
                    Err(SyncError::malformed(
                        row,
                        Some(record.key.as_str()),
                        "duplicate external key",
                    ))
                }
            });

        match parsed {
            Ok(record) => ingestion.records.push(record),
            Err(error) => {
                warn!("⚠️ {}", error);
                ingestion.rejected.push(error.into());
            }
        }
    }

    info!(
        "📥 Parsed {} product(s) from feed, {} row(s) rejected",
        ingestion.records.len(),
        ingestion.rejected.len()
    );
    Ok(ingestion)
}

/// Read the raw feed from a local path or an http(s) URL
pub async fn fetch_feed(source: &str) -> Result<String> {
    if source.starts_with("http://") || source.starts_with("https://") {
        info!("🌐 Fetching feed from: {}", source);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(defaults::FEED_TIMEOUT_SECONDS))
            .build()
            .context("Failed to build feed HTTP client")?;
        let response = client
            .get(source)
            .send()
            .await
            .with_context(|| format!("Failed to download feed from {source}"))?
            .error_for_status()
            .with_context(|| format!("Feed server returned an error for {source}"))?;
        response.text().await.context("Failed to read feed body")
    } else {
        info!("📄 Reading feed from: {}", source);
        tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("Failed to read feed file {source}"))
    }
}

/// Fetch and parse in one step
pub async fn load_feed(source: &str) -> Result<FeedIngestion> {
    let body = fetch_feed(source).await?;
    parse_feed(body.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "SKU;ProductTitleEN;ProductTitleFR;ProductDescriptionEN;ProductDescriptionFR;RegularPrice;Inventory;weight;upc";

    fn feed(rows: &[&str]) -> String {
        let mut text = String::from(HEADER);
        for row in rows {
            text.push('\n');
            text.push_str(row);
        }
        text
    }

    #[test]
    fn parses_valid_rows() {
        let text = feed(&[
            " JV100 ;Motor Assembly 120V;Moteur 120V;Replacement motor;Moteur de remplacement;45.00;10;2.5;0123456789",
            "JV101;Hose;Boyau;;;12.5;3.0;;",
        ]);
        let ingestion = parse_feed(text.as_bytes()).unwrap();

        assert!(ingestion.rejected.is_empty());
        assert_eq!(ingestion.records.len(), 2);
        let motor = &ingestion.records[0];
        assert_eq!(motor.key.as_str(), "JV100");
        assert_eq!(motor.price, Decimal::new(4500, 2));
        assert_eq!(motor.inventory_quantity, 10);
        assert_eq!(motor.weight_kg, Some(2.5));
        assert_eq!(motor.barcode.as_deref(), Some("0123456789"));

        let hose = &ingestion.records[1];
        assert_eq!(hose.inventory_quantity, 3);
        assert!(hose.barcode.is_none());
        assert!(hose.description_en.is_empty());
    }

    #[test]
    fn malformed_rows_are_rejected_not_fatal() {
        let text = feed(&[
            ";No SKU;;;;1.00;1;;",
            "JV1;Bad price;;;;abc;1;;",
            "JV2;Bad inventory;;;;1.00;lots;;",
            "JV3;Good;;;;1.00;;;",
        ]);
        let ingestion = parse_feed(text.as_bytes()).unwrap();

        assert_eq!(ingestion.records.len(), 1);
        assert_eq!(ingestion.records[0].inventory_quantity, 0);
        let rows: Vec<_> = ingestion.rejected.iter().map(|r| r.row).collect();
        assert_eq!(rows, vec![2, 3, 4]);
        assert_eq!(ingestion.rejected[1].key.as_deref(), Some("JV1"));
    }

    #[test]
    fn duplicate_sku_keeps_first() {
        let text = feed(&["JV1;First;;;;1.00;1;;", "JV1;Second;;;;2.00;1;;"]);
        let ingestion = parse_feed(text.as_bytes()).unwrap();

        assert_eq!(ingestion.records.len(), 1);
        assert_eq!(ingestion.records[0].title_en, "First");
        assert_eq!(ingestion.rejected[0].reason, "duplicate external key");
    }

    #[tokio::test]
    async fn loads_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.csv");
        std::fs::write(&path, feed(&["JV1;Motor;;;;1.00;1;;"])).unwrap();

        let ingestion = load_feed(path.to_str().unwrap()).await.unwrap();
        assert_eq!(ingestion.records.len(), 1);
    }
}
