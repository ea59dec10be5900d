//! Fixtures and an in-memory catalog backend
//!
//! Compiled for unit tests, and for `tests/` and `benches/` through the
//! `test-utils` feature. Not part of a release build.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

use crate::application::backend::{CatalogBackend, SnapshotPage};
use crate::domain::category::{CategoryRef, CategoryRule, Confidence, LanguagePhrases, Phrase};
use crate::domain::delta::{ChangedField, DesiredProduct, RemoteProduct};
use crate::domain::errors::RemoteError;
use crate::domain::product::{ExternalKey, ProductRecord, ProductStatus};

static DECLARATION_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn key(raw: &str) -> ExternalKey {
    ExternalKey::new(raw).unwrap_or_else(|| panic!("fixture key '{raw}' is blank"))
}

fn price(raw: &str) -> Decimal {
    raw.parse()
        .unwrap_or_else(|e| panic!("fixture price '{raw}' is not a decimal: {e}"))
}

/// English-only record priced 10.00 with one unit in stock
pub fn record(key_raw: &str, title_en: &str, description_en: &str) -> ProductRecord {
    ProductRecord {
        key: key(key_raw),
        title_en: title_en.to_string(),
        title_fr: String::new(),
        description_en: description_en.to_string(),
        description_fr: String::new(),
        price: Decimal::new(1000, 2),
        inventory_quantity: 1,
        weight_kg: None,
        barcode: None,
    }
}

/// Rule with English keywords and exclusions; declaration order follows call order
pub fn rule_with(
    handle: &str,
    product_type: &str,
    priority: i64,
    keywords_en: &[&str],
    exclusions_en: &[&str],
) -> CategoryRule {
    CategoryRule {
        category: CategoryRef::new(product_type, handle, handle),
        priority,
        en: LanguagePhrases {
            keywords: Phrase::compile_all(keywords_en),
            exclusions: Phrase::compile_all(exclusions_en),
        },
        fr: LanguagePhrases::default(),
        min_products: 1,
        declaration_index: DECLARATION_COUNTER.fetch_add(1, Ordering::Relaxed),
    }
}

pub fn desired(
    key_raw: &str,
    title: &str,
    price_raw: &str,
    inventory_quantity: i64,
    product_type: &str,
) -> DesiredProduct {
    let mut record = record(key_raw, title, "");
    record.price = price(price_raw);
    record.inventory_quantity = inventory_quantity;
    DesiredProduct {
        category: CategoryRef::new(product_type, "fixture", "Fixture"),
        confidence: Confidence::High,
        source: "keyword",
        title: title.to_string(),
        description: String::new(),
        record,
    }
}

/// Remote product whose reported status follows its inventory
pub fn remote(
    key_raw: &str,
    title: &str,
    price_raw: &str,
    inventory_quantity: i64,
    product_type: &str,
) -> RemoteProduct {
    RemoteProduct {
        product_id: format!("gid://shopify/Product/{key_raw}"),
        variant_id: Some(format!("gid://shopify/ProductVariant/{key_raw}")),
        key: key(key_raw),
        title: title.to_string(),
        price: price(price_raw),
        inventory_quantity,
        status: ProductStatus::from_inventory(inventory_quantity),
        product_type: product_type.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    SnapshotPage,
    Create,
    Update,
    Archive,
}

/// One request received by [`InMemoryCatalog`]
#[derive(Debug, Clone)]
pub struct CatalogCall {
    pub kind: CallKind,
    pub key: Option<ExternalKey>,
    pub at: Instant,
}

struct InjectedFailure {
    error: RemoteError,
    remaining: usize,
}

/// Catalog kept in memory. Pages are cut by offset, the cursor is the offset.
#[derive(Default)]
pub struct InMemoryCatalog {
    products: Mutex<Vec<RemoteProduct>>,
    calls: Mutex<Vec<CatalogCall>>,
    snapshot_failure: Mutex<Option<RemoteError>>,
    key_failures: Mutex<HashMap<ExternalKey, InjectedFailure>>,
    next_id: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryCatalog {
    pub fn with_products(products: Vec<RemoteProduct>) -> Self {
        let catalog = Self::default();
        *lock(&catalog.products) = products;
        catalog
    }

    /// Every snapshot page request fails with `error`
    pub fn fail_snapshot_with(&self, error: RemoteError) {
        *lock(&self.snapshot_failure) = Some(error);
    }

    /// The next `times` mutations for `key` fail with `error`
    pub fn fail_key_with(&self, key_raw: &str, error: RemoteError, times: usize) {
        lock(&self.key_failures).insert(
            key(key_raw),
            InjectedFailure {
                error,
                remaining: times,
            },
        );
    }

    pub fn calls(&self) -> Vec<CatalogCall> {
        lock(&self.calls).clone()
    }

    pub fn mutation_calls(&self) -> Vec<CatalogCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.kind != CallKind::SnapshotPage)
            .collect()
    }

    pub fn snapshot_products(&self) -> Vec<RemoteProduct> {
        lock(&self.products).clone()
    }

    fn record_call(&self, kind: CallKind, key: Option<&ExternalKey>) {
        lock(&self.calls).push(CatalogCall {
            kind,
            key: key.cloned(),
            at: Instant::now(),
        });
    }

    fn injected_failure(&self, key: &ExternalKey) -> Result<(), RemoteError> {
        let mut failures = lock(&self.key_failures);
        match failures.get_mut(key) {
            Some(failure) if failure.remaining > 0 => {
                failure.remaining -= 1;
                Err(failure.error.clone())
            }
            _ => Ok(()),
        }
    }

    fn with_product<F>(&self, key: &ExternalKey, apply: F) -> Result<(), RemoteError>
    where
        F: FnOnce(&mut RemoteProduct),
    {
        let mut products = lock(&self.products);
        let product = products
            .iter_mut()
            .find(|p| &p.key == key)
            .ok_or_else(|| RemoteError::Rejected(format!("product {key} does not exist")))?;
        apply(product);
        Ok(())
    }
}

#[async_trait]
impl CatalogBackend for InMemoryCatalog {
    async fn fetch_snapshot_page(
        &self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<SnapshotPage, RemoteError> {
        self.record_call(CallKind::SnapshotPage, None);
        if let Some(error) = lock(&self.snapshot_failure).clone() {
            return Err(error);
        }

        let offset = match cursor {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| RemoteError::Protocol(format!("bad cursor '{raw}'")))?,
            None => 0,
        };
        let products = lock(&self.products);
        let end = (offset + page_size.max(1)).min(products.len());
        let page = products.get(offset..end).unwrap_or_default().to_vec();
        let next_cursor = (end < products.len()).then(|| end.to_string());
        Ok(SnapshotPage {
            products: page,
            next_cursor,
        })
    }

    async fn create_product(&self, product: &DesiredProduct) -> Result<String, RemoteError> {
        self.record_call(CallKind::Create, Some(product.key()));
        self.injected_failure(product.key())?;

        let mut products = lock(&self.products);
        if products.iter().any(|p| &p.key == product.key()) {
            return Err(RemoteError::Rejected(format!(
                "SKU {} has already been taken",
                product.key()
            )));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let product_id = format!("gid://shopify/Product/mem-{id}");
        products.push(RemoteProduct {
            product_id: product_id.clone(),
            variant_id: Some(format!("gid://shopify/ProductVariant/mem-{id}")),
            key: product.key().clone(),
            title: product.title.clone(),
            price: product.price(),
            inventory_quantity: product.record.inventory_quantity,
            status: product.status(),
            product_type: product.product_type().to_string(),
        });
        Ok(product_id)
    }

    async fn update_product(
        &self,
        remote: &RemoteProduct,
        desired: &DesiredProduct,
        _changed: &BTreeSet<ChangedField>,
    ) -> Result<(), RemoteError> {
        self.record_call(CallKind::Update, Some(&remote.key));
        self.injected_failure(&remote.key)?;
        self.with_product(&remote.key, |product| {
            product.title.clone_from(&desired.title);
            product.price = desired.price();
            product.inventory_quantity = desired.record.inventory_quantity;
            product.status = desired.status();
            product.product_type = desired.product_type().to_string();
        })
    }

    async fn archive_product(&self, remote: &RemoteProduct) -> Result<(), RemoteError> {
        self.record_call(CallKind::Archive, Some(&remote.key));
        self.injected_failure(&remote.key)?;
        self.with_product(&remote.key, |product| {
            product.status = ProductStatus::Draft;
        })
    }
}
