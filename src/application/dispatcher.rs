//! Chunked, rate-limited mutation dispatch
//!
//! Creates and updates are cut into fixed-size chunks and pushed onto one
//! shared queue. A fixed pool of workers pulls chunks; inside a chunk items run
//! in order, each through the retry policy (which takes a limiter permit per
//! attempt). Workers do not care what kind of chunk they hold.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::backend::CatalogBackend;
use crate::domain::delta::{ArchiveEntry, DeltaDecision, DeltaEntry};
use crate::domain::dispatch::{DispatchOutcome, DispatchState, Mutation, MutationKind};
use crate::domain::errors::RemoteError;
use crate::domain::product::ExternalKey;
use crate::infrastructure::config::SyncConfig;
use crate::infrastructure::rate_limiter::RateLimiter;
use crate::infrastructure::retry_policy::{RetryOutcome, RetryPolicy};

/// Pool and chunk sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    pub max_concurrency: usize,
    pub create_chunk_size: usize,
    pub update_chunk_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for DispatchConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency.max(1),
            create_chunk_size: config.create_chunk_size.max(1),
            update_chunk_size: config.update_chunk_size.max(1),
        }
    }
}

/// A run of same-kind mutations handled by one worker, in order
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: usize,
    pub kind: MutationKind,
    pub items: Vec<Mutation>,
}

/// Cut the actionable plan into chunks: creates, then updates, then archives.
/// Archives use the update chunk size.
pub fn build_chunks(
    creates: Vec<DeltaEntry>,
    updates: Vec<DeltaEntry>,
    archive: Vec<ArchiveEntry>,
    config: &DispatchConfig,
) -> VecDeque<Chunk> {
    let mut chunks = VecDeque::new();
    let mut push = |kind: MutationKind, items: Vec<Mutation>, size: usize| {
        let mut items = items.into_iter().peekable();
        while items.peek().is_some() {
            let id = chunks.len();
            chunks.push_back(Chunk {
                id,
                kind,
                items: items.by_ref().take(size).collect(),
            });
        }
    };

    push(
        MutationKind::Create,
        creates.into_iter().map(Mutation::Create).collect(),
        config.create_chunk_size,
    );
    push(
        MutationKind::Update,
        updates.into_iter().map(Mutation::Update).collect(),
        config.update_chunk_size,
    );
    push(
        MutationKind::Archive,
        archive.into_iter().map(Mutation::Archive).collect(),
        config.update_chunk_size,
    );
    chunks
}

/// Everything the dispatcher did in one run
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// One outcome per mutation handed in, sorted by kind then key
    pub outcomes: Vec<DispatchOutcome>,
    pub chunks: usize,
    /// The run-level abort signal fired before the queue drained
    pub aborted: bool,
    pub elapsed: Duration,
}

impl DispatchReport {
    pub fn count(&self, state: DispatchState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(DispatchState::Succeeded)
    }

    /// Failed permanently or after retries
    pub fn failed(&self) -> usize {
        self.count(DispatchState::FailedPermanent) + self.count(DispatchState::FailedAfterRetries)
    }

    pub fn not_dispatched(&self) -> usize {
        self.count(DispatchState::NotDispatched)
    }

    pub fn failures(&self) -> impl Iterator<Item = &DispatchOutcome> {
        self.outcomes.iter().filter(|o| o.state.is_failure())
    }
}

pub struct BatchDispatcher {
    backend: Arc<dyn CatalogBackend>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    config: DispatchConfig,
    cancel: CancellationToken,
}

/// State shared by the workers of one dispatch call
struct RunState {
    queue: Mutex<VecDeque<Chunk>>,
    outcomes: Mutex<Vec<DispatchOutcome>>,
    /// Keys known to exist remotely, plus every key a create was issued for
    created: Mutex<HashSet<ExternalKey>>,
    total_chunks: usize,
    finished_chunks: Mutex<usize>,
}

impl BatchDispatcher {
    pub fn new(
        backend: Arc<dyn CatalogBackend>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        config: DispatchConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backend,
            limiter,
            policy,
            config,
            cancel,
        }
    }

    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Dispatch the actionable plan. `existing_keys` is the remote snapshot's
    /// key set; a create for any of those keys is refused without a call.
    pub async fn dispatch(
        &self,
        creates: Vec<DeltaEntry>,
        updates: Vec<DeltaEntry>,
        archive: Vec<ArchiveEntry>,
        existing_keys: impl IntoIterator<Item = ExternalKey>,
    ) -> DispatchReport {
        let started = Instant::now();
        let chunks = build_chunks(creates, updates, archive, &self.config);
        let total_chunks = chunks.len();
        if total_chunks == 0 {
            info!("✅ Nothing to dispatch");
            return DispatchReport::default();
        }

        let item_count: usize = chunks.iter().map(|c| c.items.len()).sum();
        info!(
            "🚀 Dispatching {} mutation(s) in {} chunk(s) with {} worker(s) at {}/s",
            item_count,
            total_chunks,
            self.config.max_concurrency,
            self.limiter.limit()
        );

        let state = RunState {
            queue: Mutex::new(chunks),
            outcomes: Mutex::new(Vec::with_capacity(item_count)),
            created: Mutex::new(existing_keys.into_iter().collect()),
            total_chunks,
            finished_chunks: Mutex::new(0),
        };

        let workers = (0..self.config.max_concurrency.min(total_chunks))
            .map(|worker_id| self.run_worker(worker_id, &state));
        futures::future::join_all(workers).await;

        // Chunks never picked up because the run was cancelled
        let leftover: Vec<Chunk> = state.queue.lock().await.drain(..).collect();
        let mut outcomes = state.outcomes.into_inner();
        for chunk in leftover {
            for item in chunk.items {
                outcomes.push(DispatchOutcome::not_dispatched(item.key().clone(), item.kind()));
            }
        }
        outcomes.sort_by(|a, b| (a.kind, &a.key).cmp(&(b.kind, &b.key)));

        let report = DispatchReport {
            outcomes,
            chunks: total_chunks,
            aborted: self.cancel.is_cancelled(),
            elapsed: started.elapsed(),
        };
        info!(
            "✅ Dispatch finished in {:.1}s: {} succeeded, {} failed, {} not dispatched",
            report.elapsed.as_secs_f64(),
            report.succeeded(),
            report.failed(),
            report.not_dispatched()
        );
        report
    }

    async fn run_worker(&self, worker_id: usize, state: &RunState) {
        debug!("👷 worker {} started", worker_id);

        loop {
            if self.cancel.is_cancelled() {
                info!("🛑 worker {} stopping: run cancelled", worker_id);
                break;
            }

            let Some(chunk) = state.queue.lock().await.pop_front() else {
                break;
            };
            debug!(
                "👷 worker {} took {} chunk #{} ({} item(s))",
                worker_id,
                chunk.kind,
                chunk.id,
                chunk.items.len()
            );

            for mutation in chunk.items {
                let outcome = if self.cancel.is_cancelled() {
                    DispatchOutcome::not_dispatched(mutation.key().clone(), mutation.kind())
                } else {
                    self.execute(&mutation, state).await
                };
                state.outcomes.lock().await.push(outcome);
            }

            let mut finished = state.finished_chunks.lock().await;
            *finished += 1;
            info!(
                "📦 chunk #{} ({}) done, {}/{} chunk(s) finished",
                chunk.id, chunk.kind, *finished, state.total_chunks
            );
        }

        debug!("👷 worker {} finished", worker_id);
    }

    async fn execute(&self, mutation: &Mutation, state: &RunState) -> DispatchOutcome {
        let key = mutation.key().clone();
        let kind = mutation.kind();
        let label = format!("{kind} {key}");

        let outcome = match mutation {
            Mutation::Create(entry) => {
                if !state.created.lock().await.insert(key.clone()) {
                    warn!("⚠️ {}: key already exists remotely, create refused", label);
                    return refused(key, kind, "external key already exists remotely");
                }
                let desired = &entry.desired;
                let outcome = self
                    .policy
                    .execute(&self.limiter, &self.cancel, &label, || {
                        self.backend.create_product(desired)
                    })
                    .await;
                into_outcome(key, kind, outcome, Some)
            }
            Mutation::Update(entry) => {
                let (Some(remote), DeltaDecision::Update { changed }) =
                    (&entry.remote, &entry.decision)
                else {
                    return refused(key, kind, "update without a remote product");
                };
                let outcome = self
                    .policy
                    .execute(&self.limiter, &self.cancel, &label, || {
                        self.backend.update_product(remote, &entry.desired, changed)
                    })
                    .await;
                into_outcome(key, kind, outcome, |()| Some(remote.product_id.clone()))
            }
            Mutation::Archive(entry) => {
                let remote = &entry.remote;
                let outcome = self
                    .policy
                    .execute(&self.limiter, &self.cancel, &label, || {
                        self.backend.archive_product(remote)
                    })
                    .await;
                into_outcome(key, kind, outcome, |()| Some(remote.product_id.clone()))
            }
        };

        self.check_abort(&outcome, mutation);
        outcome.0
    }

    /// An authentication failure invalidates every later call
    fn check_abort(&self, outcome: &(DispatchOutcome, Option<RemoteError>), mutation: &Mutation) {
        if let Some(error) = &outcome.1 {
            if error.aborts_run() && !self.cancel.is_cancelled() {
                error!(
                    "🛑 {} {} failed with {}; aborting the run",
                    mutation.kind(),
                    mutation.key(),
                    error
                );
                self.cancel.cancel();
            }
        }
    }
}

fn refused(key: ExternalKey, kind: MutationKind, reason: &str) -> DispatchOutcome {
    DispatchOutcome {
        key,
        kind,
        state: DispatchState::FailedPermanent,
        attempts: 0,
        last_error: Some(reason.to_string()),
        remote_id: None,
    }
}

fn into_outcome<T>(
    key: ExternalKey,
    kind: MutationKind,
    outcome: RetryOutcome<T>,
    remote_id: impl FnOnce(T) -> Option<String>,
) -> (DispatchOutcome, Option<RemoteError>) {
    let state = outcome.state();
    let attempts = outcome.attempts();
    let (remote_id, error) = match outcome.into_result() {
        Ok(value) => (remote_id(value), None),
        Err(error) => (None, error),
    };
    let dispatch = DispatchOutcome {
        key,
        kind,
        state,
        attempts,
        last_error: error.as_ref().map(ToString::to_string),
        remote_id,
    };
    (dispatch, error)
}
