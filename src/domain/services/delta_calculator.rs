//! Desired-state vs snapshot diff
//!
//! Every desired key ends up in exactly one of create / update / unchanged.
//! Remote keys missing from the desired set are collected separately as
//! archive candidates (already-draft products are left alone).

use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

use crate::domain::delta::{
    ArchiveEntry, ChangedField, DeltaDecision, DeltaEntry, DeltaPlan, DesiredProduct,
    RemoteProduct, RemoteSnapshot,
};
use crate::domain::errors::SyncError;
use crate::domain::product::ProductStatus;

pub struct DeltaCalculator;

impl DeltaCalculator {
    /// Fields that differ between the desired and remote product. Price is a
    /// numeric comparison, so `10.0` and `10.00` are equal.
    pub fn changed_fields(desired: &DesiredProduct, remote: &RemoteProduct) -> BTreeSet<ChangedField> {
        let mut changed = BTreeSet::new();
        if desired.title.trim() != remote.title.trim() {
            changed.insert(ChangedField::Title);
        }
        if desired.price() != remote.price {
            changed.insert(ChangedField::Price);
        }
        if desired.status() != remote.derived_status() {
            changed.insert(ChangedField::Status);
        }
        if desired.product_type() != remote.product_type {
            changed.insert(ChangedField::ProductType);
        }
        changed
    }

    pub fn decide(desired: &DesiredProduct, remote: Option<&RemoteProduct>) -> DeltaDecision {
        match remote {
            None => DeltaDecision::Create,
            Some(remote) => {
                let changed = Self::changed_fields(desired, remote);
                if changed.is_empty() {
                    DeltaDecision::Unchanged
                } else {
                    DeltaDecision::Update { changed }
                }
            }
        }
    }

    /// Duplicate desired keys are a data error and abort the diff.
    pub fn calculate(
        desired: Vec<DesiredProduct>,
        snapshot: &RemoteSnapshot,
    ) -> Result<DeltaPlan, SyncError> {
        let mut seen = HashSet::with_capacity(desired.len());
        for product in &desired {
            if !seen.insert(product.key().clone()) {
                return Err(SyncError::DuplicateKey {
                    key: product.key().to_string(),
                });
            }
        }

        let entries: Vec<DeltaEntry> = desired
            .into_iter()
            .map(|product| {
                let remote = snapshot.get(product.key()).cloned();
                let decision = Self::decide(&product, remote.as_ref());
                debug!("🧮 {} -> {}", product.key(), decision.label());
                DeltaEntry {
                    desired: product,
                    decision,
                    remote,
                }
            })
            .collect();

        let archive = snapshot
            .products()
            .filter(|remote| !seen.contains(&remote.key) && remote.status != ProductStatus::Draft)
            .map(|remote| ArchiveEntry {
                remote: remote.clone(),
            })
            .collect();

        let plan = DeltaPlan { entries, archive };
        let counts = plan.counts();
        info!(
            "🧮 Delta: {} create, {} update, {} unchanged, {} archive candidate(s)",
            counts.creates, counts.updates, counts.unchanged, counts.archives
        );
        Ok(plan)
    }
}
