//! Remote catalog seam
//!
//! [`CatalogBackend`] is everything the pipeline needs from the store: paged
//! snapshot reads plus per-item create / update / archive. The Shopify client,
//! the dry-run wrapper and the in-memory test catalog all implement it.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::delta::{ChangedField, DesiredProduct, RemoteProduct, RemoteSnapshot};
use crate::domain::errors::{RemoteError, SyncError};
use crate::infrastructure::rate_limiter::RateLimiter;
use crate::infrastructure::retry_policy::RetryPolicy;

/// One page of the remote product listing
#[derive(Debug, Clone, Default)]
pub struct SnapshotPage {
    pub products: Vec<RemoteProduct>,
    /// Cursor for the next page, `None` on the last page
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait CatalogBackend: Send + Sync {
    async fn fetch_snapshot_page(
        &self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<SnapshotPage, RemoteError>;

    /// Returns the new remote product id
    async fn create_product(&self, product: &DesiredProduct) -> Result<String, RemoteError>;

    async fn update_product(
        &self,
        remote: &RemoteProduct,
        desired: &DesiredProduct,
        changed: &BTreeSet<ChangedField>,
    ) -> Result<(), RemoteError>;

    /// Sets the remote product to draft
    async fn archive_product(&self, remote: &RemoteProduct) -> Result<(), RemoteError>;
}

/// Reads pass through, mutations are only logged
pub struct DryRunBackend {
    inner: Arc<dyn CatalogBackend>,
}

impl DryRunBackend {
    pub fn new(inner: Arc<dyn CatalogBackend>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CatalogBackend for DryRunBackend {
    async fn fetch_snapshot_page(
        &self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<SnapshotPage, RemoteError> {
        self.inner.fetch_snapshot_page(cursor, page_size).await
    }

    async fn create_product(&self, product: &DesiredProduct) -> Result<String, RemoteError> {
        info!(
            "🔸 [dry-run] create {} '{}' as {}",
            product.key(),
            product.title,
            product.product_type()
        );
        Ok(format!("dry-run-{}", product.key()))
    }

    async fn update_product(
        &self,
        remote: &RemoteProduct,
        _desired: &DesiredProduct,
        changed: &BTreeSet<ChangedField>,
    ) -> Result<(), RemoteError> {
        let fields: Vec<String> = changed.iter().map(ToString::to_string).collect();
        info!("🔸 [dry-run] update {} ({})", remote.key, fields.join(", "));
        Ok(())
    }

    async fn archive_product(&self, remote: &RemoteProduct) -> Result<(), RemoteError> {
        info!("🔸 [dry-run] archive {}", remote.key);
        Ok(())
    }
}

/// Fetch every snapshot page through the shared limiter and retry policy.
/// Any page failing for good aborts the run: a partial snapshot would turn
/// existing products into creates.
pub async fn fetch_snapshot(
    backend: &dyn CatalogBackend,
    limiter: &RateLimiter,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    page_size: usize,
) -> Result<(RemoteSnapshot, Vec<RemoteProduct>), SyncError> {
    let mut products = Vec::new();
    let mut cursor: Option<String> = None;
    let mut page = 0usize;

    loop {
        page += 1;
        let label = format!("snapshot page {page}");
        let result = policy
            .execute(limiter, cancel, &label, || {
                backend.fetch_snapshot_page(cursor.as_deref(), page_size)
            })
            .await
            .into_result();

        let fetched = match result {
            Ok(fetched) => fetched,
            Err(Some(error)) => return Err(SyncError::RemoteQuery(error)),
            Err(None) => {
                return Err(SyncError::Aborted {
                    reason: "cancelled while fetching the remote snapshot".into(),
                });
            }
        };

        products.extend(fetched.products);
        if page % 20 == 0 {
            info!("📦 Snapshot page {}, {} product(s) so far", page, products.len());
        }
        match fetched.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    let (snapshot, duplicates) = RemoteSnapshot::from_products(products);
    info!(
        "📦 Fetched {} remote product(s) in {} page(s)",
        snapshot.len(),
        page
    );
    Ok((snapshot, duplicates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{InMemoryCatalog, desired, remote};

    #[tokio::test(start_paused = true)]
    async fn snapshot_walks_all_pages() {
        let catalog = InMemoryCatalog::with_products(
            (0..7).map(|i| remote(&format!("SKU{i}"), "T", "1.00", 1, "Parts")).collect(),
        );
        let limiter = RateLimiter::new(10);
        let (snapshot, duplicates) = fetch_snapshot(
            &catalog,
            &limiter,
            &RetryPolicy::default(),
            &CancellationToken::new(),
            3,
        )
        .await
        .unwrap();

        assert_eq!(snapshot.len(), 7);
        assert!(duplicates.is_empty());
        assert_eq!(limiter.granted(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_failure_is_fatal() {
        let catalog = InMemoryCatalog::default();
        catalog.fail_snapshot_with(RemoteError::Authentication("401".into()));
        let err = fetch_snapshot(
            &catalog,
            &RateLimiter::new(10),
            &RetryPolicy::default(),
            &CancellationToken::new(),
            250,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::RemoteQuery(RemoteError::Authentication(_))));
    }

    #[tokio::test]
    async fn dry_run_never_mutates() {
        let catalog = Arc::new(InMemoryCatalog::default());
        let dry = DryRunBackend::new(catalog.clone());

        let id = dry.create_product(&desired("SKU1", "Motor", "1.00", 1, "Parts")).await.unwrap();
        assert_eq!(id, "dry-run-SKU1");
        assert!(catalog.calls().is_empty());
        assert!(catalog.snapshot_products().is_empty());
    }
}
