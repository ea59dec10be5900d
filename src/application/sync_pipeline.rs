//! End-to-end sync run
//!
//! rules → feed → skip filter → classify → enforce population → reports →
//! snapshot → delta → dispatch → reports + summary.
//!
//! Every fatal condition is raised before the first mutation is issued.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::backend::{CatalogBackend, DryRunBackend, fetch_snapshot};
use crate::application::dispatcher::{BatchDispatcher, DispatchConfig, DispatchReport};
use crate::domain::category::{ClassifiedProduct, RuleSet};
use crate::domain::delta::{DeltaCounts, DeltaPlan, DesiredProduct, RemoteProduct};
use crate::domain::dispatch::DispatchState;
use crate::domain::errors::SyncError;
use crate::domain::services::population_enforcer::EnforcementReport;
use crate::domain::services::{Classifier, DeltaCalculator, PopulationEnforcer, SkipFilter, SkippedProduct};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::feed_parser::{self, FeedIngestion, RejectedRow};
use crate::infrastructure::rate_limiter::RateLimiter;
use crate::infrastructure::report_writer::ReportWriter;
use crate::infrastructure::retry_policy::RetryPolicy;
use crate::infrastructure::rule_config;

/// How far a run goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Ingest, classify and report; no remote access
    Classify,
    /// Everything up to the delta; no mutations
    Plan,
    /// Full run
    Sync,
}

/// Output of the classification half of a run
#[derive(Debug, Default)]
pub struct ClassificationStage {
    pub classified: Vec<ClassifiedProduct>,
    pub skipped: Vec<SkippedProduct>,
    pub rejected: Vec<RejectedRow>,
    pub enforcement: EnforcementReport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounts {
    pub succeeded: usize,
    pub failed_permanent: usize,
    pub failed_after_retries: usize,
    pub not_dispatched: usize,
    pub aborted: bool,
}

impl From<&DispatchReport> for DispatchCounts {
    fn from(report: &DispatchReport) -> Self {
        Self {
            succeeded: report.succeeded(),
            failed_permanent: report.count(DispatchState::FailedPermanent),
            failed_after_retries: report.count(DispatchState::FailedAfterRetries),
            not_dispatched: report.not_dispatched(),
            aborted: report.aborted,
        }
    }
}

/// Aggregate counts for one run, written to `run_summary.json`
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub mode: RunMode,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: i64,
    pub records_ingested: usize,
    pub rows_rejected: usize,
    pub skipped: usize,
    pub classified: usize,
    pub needs_review: usize,
    pub demoted: usize,
    /// Keyed by product type
    pub per_category: BTreeMap<String, usize>,
    pub per_confidence: BTreeMap<String, usize>,
    /// Keyed by reason kind (`keyword`, `no_match`, ...)
    pub per_reason: BTreeMap<String, usize>,
    pub remote_products: Option<usize>,
    pub remote_duplicates: Option<usize>,
    pub plan: Option<DeltaCounts>,
    pub dispatch: Option<DispatchCounts>,
}

impl RunSummary {
    fn start(mode: RunMode, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            mode,
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
            records_ingested: 0,
            rows_rejected: 0,
            skipped: 0,
            classified: 0,
            needs_review: 0,
            demoted: 0,
            per_category: BTreeMap::new(),
            per_confidence: BTreeMap::new(),
            per_reason: BTreeMap::new(),
            remote_products: None,
            remote_duplicates: None,
            plan: None,
            dispatch: None,
        }
    }

    fn record_classification(&mut self, stage: &ClassificationStage, ingested: usize) {
        self.records_ingested = ingested;
        self.rows_rejected = stage.rejected.len();
        self.skipped = stage.skipped.len();
        self.classified = stage.classified.len();
        self.demoted = stage.enforcement.demoted_records;
        for product in &stage.classified {
            let classification = &product.classification;
            if classification.is_needs_review() {
                self.needs_review += 1;
            }
            *self
                .per_category
                .entry(classification.category.product_type.clone())
                .or_default() += 1;
            *self
                .per_confidence
                .entry(classification.confidence.as_str().to_string())
                .or_default() += 1;
            *self
                .per_reason
                .entry(classification.reason.kind().to_string())
                .or_default() += 1;
        }
    }

    fn finish(&mut self) {
        let finished = Utc::now();
        self.duration_ms = (finished - self.started_at).num_milliseconds();
        self.finished_at = Some(finished);
    }

    /// Exit status should be non-zero when this is true
    pub fn has_failures(&self) -> bool {
        self.dispatch.is_some_and(|d| {
            d.aborted || d.failed_permanent + d.failed_after_retries + d.not_dispatched > 0
        })
    }

    pub fn log(&self) {
        info!("📊 Run {} ({:?}{})", self.run_id, self.mode, if self.dry_run { ", dry run" } else { "" });
        info!(
            "📊 Feed: {} record(s), {} rejected row(s), {} skipped",
            self.records_ingested, self.rows_rejected, self.skipped
        );
        info!(
            "📊 Classified {} product(s): {} in Needs Review ({} demoted)",
            self.classified, self.needs_review, self.demoted
        );
        for (category, count) in &self.per_category {
            info!("   {:>6}  {}", count, category);
        }
        if let Some(plan) = &self.plan {
            info!(
                "📊 Plan: {} create, {} update, {} unchanged, {} archive",
                plan.creates, plan.updates, plan.unchanged, plan.archives
            );
        }
        if let Some(dispatch) = &self.dispatch {
            info!(
                "📊 Dispatch: {} succeeded, {} failed permanently, {} failed after retries, {} not dispatched{}",
                dispatch.succeeded,
                dispatch.failed_permanent,
                dispatch.failed_after_retries,
                dispatch.not_dispatched,
                if dispatch.aborted { " (aborted)" } else { "" }
            );
        }
        info!("📊 Finished in {:.1}s", self.duration_ms as f64 / 1000.0);
    }
}

/// Everything a finished run hands back
#[derive(Debug)]
pub struct RunResult {
    pub summary: RunSummary,
    pub stage: ClassificationStage,
    pub plan: Option<DeltaPlan>,
    pub dispatch: Option<DispatchReport>,
}

pub struct SyncPipeline {
    config: AppConfig,
    backend: Option<Arc<dyn CatalogBackend>>,
    cancel: CancellationToken,
}

impl SyncPipeline {
    pub fn new(config: AppConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            backend: None,
            cancel,
        }
    }

    /// Remote catalog used by `Plan` and `Sync`. Wrapped in a dry-run
    /// backend when `sync.dry_run` is set.
    pub fn with_backend(mut self, backend: Arc<dyn CatalogBackend>) -> Self {
        self.backend = Some(if self.config.sync.dry_run {
            Arc::new(DryRunBackend::new(backend))
        } else {
            backend
        });
        self
    }

    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Load rules and feed from the configured locations, then run
    pub async fn run(&self, mode: RunMode) -> Result<RunResult> {
        let rules = rule_config::load_rules(&self.config.paths.rules_path).await?;
        let source = self
            .config
            .paths
            .feed_source
            .as_deref()
            .ok_or_else(|| anyhow!("No feed source configured (paths.feed_source or --feed)"))?;
        let ingestion = feed_parser::load_feed(source).await?;
        self.run_with(mode, Arc::new(rules), ingestion).await
    }

    /// Run on rules and records already in memory
    pub async fn run_with(
        &self,
        mode: RunMode,
        rules: Arc<RuleSet>,
        ingestion: FeedIngestion,
    ) -> Result<RunResult> {
        let mut summary = RunSummary::start(mode, self.config.sync.dry_run);
        info!("🚀 Starting {:?} run {}", mode, summary.run_id);

        let reports = ReportWriter::new(&self.config.paths.report_dir)?;
        let ingested = ingestion.records.len();
        let stage = Self::classify(&rules, ingestion);
        summary.record_classification(&stage, ingested);

        reports.write_rejected(&stage.rejected)?;
        reports.write_skipped(&stage.skipped)?;
        reports.write_needs_review(&stage.classified)?;

        if mode == RunMode::Classify {
            return self.finish(summary, &reports, stage, None, None);
        }

        let backend = self
            .backend
            .clone()
            .ok_or_else(|| anyhow!("No remote catalog configured"))?;
        let limiter = Arc::new(RateLimiter::new(self.config.sync.rate_limit_per_second));
        let policy = RetryPolicy::from(&self.config.retry);

        info!("📦 Fetching remote snapshot");
        let (snapshot, duplicates) = fetch_snapshot(
            backend.as_ref(),
            &limiter,
            &policy,
            &self.cancel,
            self.config.sync.snapshot_page_size,
        )
        .await?;
        log_duplicates(&duplicates);
        summary.remote_products = Some(snapshot.len());
        summary.remote_duplicates = Some(duplicates.len());

        let language = self.config.sync.language;
        let desired: Vec<DesiredProduct> = stage
            .classified
            .iter()
            .cloned()
            .map(|product| DesiredProduct::from_classified(product, language))
            .collect();
        let mut plan = DeltaCalculator::calculate(desired, &snapshot)?;
        if !self.config.sync.archive_missing {
            plan.archive.clear();
        }
        let counts = plan.counts();
        summary.plan = Some(counts);
        info!(
            "📋 Delta: {} create, {} update, {} unchanged, {} archive",
            counts.creates, counts.updates, counts.unchanged, counts.archives
        );

        if mode == RunMode::Plan {
            return self.finish(summary, &reports, stage, Some(plan), None);
        }

        if self.cancel.is_cancelled() {
            return Err(SyncError::Aborted {
                reason: "cancelled before dispatch".into(),
            }
            .into());
        }

        let dispatcher = BatchDispatcher::new(
            backend,
            limiter,
            policy,
            DispatchConfig::from(&self.config.sync),
            self.cancel.clone(),
        );
        let (creates, updates, archive) = plan.clone().into_actionable();
        let report = dispatcher
            .dispatch(creates, updates, archive, snapshot.keys().cloned().collect::<Vec<_>>())
            .await;
        summary.dispatch = Some(DispatchCounts::from(&report));

        let records: HashMap<_, _> = stage
            .classified
            .iter()
            .map(|p| (&p.record.key, &p.record))
            .collect();
        reports
            .write_failed_dispatch(&report.outcomes, &records)
            .context("Failed to write dispatch report")?;

        self.finish(summary, &reports, stage, Some(plan), Some(report))
    }

    /// Skip filter, classification and population enforcement. Single-threaded.
    pub fn classify(rules: &Arc<RuleSet>, ingestion: FeedIngestion) -> ClassificationStage {
        let filter = SkipFilter::new(rules.skip_patterns());
        let (kept, skipped) = filter.partition(ingestion.records);
        if !skipped.is_empty() {
            info!("🔸 Skipped {} placeholder product(s)", skipped.len());
        }

        info!("🔍 Classifying {} product(s) against {} rule(s)", kept.len(), rules.rules().len());
        let classifier = Classifier::new(Arc::clone(rules));
        let mut classified = classifier.classify_batch(kept);
        let enforcement = PopulationEnforcer::new(rules).enforce(&mut classified);

        ClassificationStage {
            classified,
            skipped,
            rejected: ingestion.rejected,
            enforcement,
        }
    }

    fn finish(
        &self,
        mut summary: RunSummary,
        reports: &ReportWriter,
        stage: ClassificationStage,
        plan: Option<DeltaPlan>,
        dispatch: Option<DispatchReport>,
    ) -> Result<RunResult> {
        summary.finish();
        reports.write_summary(&summary)?;
        summary.log();
        if self.cancel.is_cancelled() {
            warn!("🛑 Run {} was cancelled before completion", summary.run_id);
        }
        Ok(RunResult {
            summary,
            stage,
            plan,
            dispatch,
        })
    }
}

fn log_duplicates(duplicates: &[RemoteProduct]) {
    for duplicate in duplicates {
        warn!(
            "⚠️ Remote SKU {} appears on more than one product ({}), keeping the first",
            duplicate.key, duplicate.product_id
        );
    }
}
