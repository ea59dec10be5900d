//! Desired vs remote state, and the decisions that reconcile them

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::domain::category::{CategoryRef, ClassifiedProduct, Confidence};
use crate::domain::product::{ExternalKey, Language, ProductRecord, ProductStatus};

/// Last-known remote values for one product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProduct {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub key: ExternalKey,
    pub title: String,
    pub price: Decimal,
    pub inventory_quantity: i64,
    /// Lifecycle status as reported by the remote side
    pub status: ProductStatus,
    pub product_type: String,
}

impl RemoteProduct {
    /// Status used for comparison, derived from inventory like the desired side
    pub const fn derived_status(&self) -> ProductStatus {
        ProductStatus::from_inventory(self.inventory_quantity)
    }
}

/// Remote catalog indexed by external key. Read-only for the run.
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    products: BTreeMap<ExternalKey, RemoteProduct>,
}

impl RemoteSnapshot {
    /// Keeps the first product per key; later duplicates are returned to the
    /// caller for reporting.
    pub fn from_products(products: Vec<RemoteProduct>) -> (Self, Vec<RemoteProduct>) {
        let mut map = BTreeMap::new();
        let mut duplicates = Vec::new();
        for product in products {
            if map.contains_key(&product.key) {
                duplicates.push(product);
            } else {
                map.insert(product.key.clone(), product);
            }
        }
        (Self { products: map }, duplicates)
    }

    pub fn get(&self, key: &ExternalKey) -> Option<&RemoteProduct> {
        self.products.get(key)
    }

    pub fn contains(&self, key: &ExternalKey) -> bool {
        self.products.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ExternalKey> {
        self.products.keys()
    }

    pub fn products(&self) -> impl Iterator<Item = &RemoteProduct> {
        self.products.values()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

/// What the remote catalog should hold for one key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DesiredProduct {
    pub record: ProductRecord,
    pub category: CategoryRef,
    pub confidence: Confidence,
    /// Classification reason kind, sent as the `source:` tag
    pub source: &'static str,
    /// Title in the storefront language, then the other language, then the
    /// external key. Create, update and the diff all use this value.
    pub title: String,
    pub description: String,
}

impl DesiredProduct {
    pub fn from_classified(product: ClassifiedProduct, language: Language) -> Self {
        let pick = |primary: &str, other: &str| {
            let primary = primary.trim();
            if primary.is_empty() {
                other.trim().to_string()
            } else {
                primary.to_string()
            }
        };
        let other = match language {
            Language::En => Language::Fr,
            Language::Fr => Language::En,
        };
        let record = product.record;
        let mut title = pick(record.title(language), record.title(other));
        if title.is_empty() {
            title = record.key.to_string();
        }
        let description = pick(record.description(language), record.description(other));

        Self {
            source: product.classification.reason.kind(),
            category: product.classification.category,
            confidence: product.classification.confidence,
            title,
            description,
            record,
        }
    }

    pub const fn key(&self) -> &ExternalKey {
        &self.record.key
    }

    pub const fn price(&self) -> Decimal {
        self.record.price
    }

    pub const fn status(&self) -> ProductStatus {
        self.record.status()
    }

    pub fn product_type(&self) -> &str {
        &self.category.product_type
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedField {
    Title,
    Price,
    Status,
    ProductType,
}

impl fmt::Display for ChangedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Title => "title",
            Self::Price => "price",
            Self::Status => "status",
            Self::ProductType => "product_type",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum DeltaDecision {
    Create,
    Update { changed: BTreeSet<ChangedField> },
    Unchanged,
}

impl DeltaDecision {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update { .. } => "update",
            Self::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaEntry {
    pub desired: DesiredProduct,
    pub decision: DeltaDecision,
    /// Present for updates (and unchanged); carries the remote identifiers
    pub remote: Option<RemoteProduct>,
}

impl DeltaEntry {
    pub const fn key(&self) -> &ExternalKey {
        self.desired.key()
    }
}

/// Remote product with no desired counterpart
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveEntry {
    pub remote: RemoteProduct,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeltaPlan {
    /// One entry per desired key, in desired order
    pub entries: Vec<DeltaEntry>,
    /// Kept apart from the create/update/unchanged partition
    pub archive: Vec<ArchiveEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeltaCounts {
    pub creates: usize,
    pub updates: usize,
    pub unchanged: usize,
    pub archives: usize,
}

impl DeltaPlan {
    pub fn counts(&self) -> DeltaCounts {
        let mut counts = DeltaCounts {
            archives: self.archive.len(),
            ..DeltaCounts::default()
        };
        for entry in &self.entries {
            match entry.decision {
                DeltaDecision::Create => counts.creates += 1,
                DeltaDecision::Update { .. } => counts.updates += 1,
                DeltaDecision::Unchanged => counts.unchanged += 1,
            }
        }
        counts
    }

    /// Drops unchanged entries and splits the rest for dispatch
    pub fn into_actionable(self) -> (Vec<DeltaEntry>, Vec<DeltaEntry>, Vec<ArchiveEntry>) {
        let mut creates = Vec::new();
        let mut updates = Vec::new();
        for entry in self.entries {
            match entry.decision {
                DeltaDecision::Create => creates.push(entry),
                DeltaDecision::Update { .. } => updates.push(entry),
                DeltaDecision::Unchanged => {}
            }
        }
        (creates, updates, self.archive)
    }
}
