use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use gamedex_core::{AppId, CatalogRecord, Classified, InvalidRecord, SyncReport};
use gamedex_index::CatalogIndex;
use gamedex_storage::{AuditReport, CatalogStore};
use gamedex_upstream::{classify, DetailLookup, UpstreamClient};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::SyncError;

/// Terminal result of fetching and classifying one app.
#[derive(Debug)]
enum FetchOutcome {
    Classified(Classified),
    NotFound,
    Failed,
}

async fn fetch_one(client: &dyn UpstreamClient, id: AppId) -> FetchOutcome {
    let detail = match client.fetch_detail(id).await {
        Ok(DetailLookup::Found(detail)) => detail,
        Ok(DetailLookup::NotFound) => return FetchOutcome::NotFound,
        Err(err) => {
            warn!(app_id = id, "detail fetch failed");
            debug!(app_id = id, error = %err, "detail fetch error");
            return FetchOutcome::Failed;
        }
    };
    match client.fetch_popularity(id).await {
        Ok(popularity) => FetchOutcome::Classified(classify(id, &detail, &popularity)),
        Err(err) => {
            warn!(app_id = id, "popularity fetch failed");
            debug!(app_id = id, error = %err, "popularity fetch error");
            FetchOutcome::Failed
        }
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    complete: Vec<CatalogRecord>,
    incomplete: Vec<InvalidRecord>,
}

impl Accumulator {
    fn route(&mut self, report: &mut SyncReport, id: AppId, outcome: FetchOutcome) {
        report.processed += 1;
        match outcome {
            FetchOutcome::Classified(Classified::Complete(record)) => {
                report.new_complete += 1;
                self.complete.push(record);
            }
            FetchOutcome::Classified(Classified::Incomplete(record)) => {
                report.new_incomplete += 1;
                self.incomplete.push(record);
            }
            FetchOutcome::NotFound => {
                report.new_incomplete += 1;
                self.incomplete.push(InvalidRecord::placeholder(id));
            }
            FetchOutcome::Failed => {
                report.failed += 1;
                report.failed_ids.push(id);
                self.incomplete.push(InvalidRecord::placeholder(id));
            }
        }
    }
}

/// Grows the catalog store from upstream and keeps the index in step with it.
///
/// Runs and refreshes are serialised on a cycle lock. The store lock is only
/// taken around in-memory reads and the final merge, never across network calls.
pub struct SyncEngine {
    store: Mutex<CatalogStore>,
    client: Arc<dyn UpstreamClient>,
    index: Arc<CatalogIndex>,
    workers: usize,
    cycle: Mutex<()>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("workers", &self.workers)
            .field("index_entries", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// `store` should already be loaded; the index is rebuilt from it here.
    pub fn new(store: CatalogStore, client: Arc<dyn UpstreamClient>, index: Arc<CatalogIndex>, workers: usize) -> Self {
        index.rebuild(store.complete());
        Self {
            store: Mutex::new(store),
            client,
            index,
            workers: workers.max(1),
            cycle: Mutex::new(()),
        }
    }

    pub fn index(&self) -> Arc<CatalogIndex> {
        Arc::clone(&self.index)
    }

    /// Fetch every app the store does not know yet and merge the results.
    pub async fn run_sync(&self) -> Result<SyncReport, SyncError> {
        let _cycle = self.cycle.lock().await;
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id);
        self.run_cycle(run_id).instrument(span).await
    }

    async fn run_cycle(&self, run_id: Uuid) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::empty(run_id, Utc::now());
        let known = self.store.lock().await.known_ids();
        let universe = self.client.fetch_id_universe().await.map_err(SyncError::Upstream)?;
        let pending: Vec<AppId> = universe.into_iter().filter(|id| !known.contains(id)).collect();
        info!(known = known.len(), pending = pending.len(), "pending set computed");
        if pending.is_empty() {
            report.finished_at = Utc::now();
            return Ok(report);
        }

        let mut outcomes = self.fetch_pending(&pending).await;
        outcomes.sort_by_key(|(id, _)| *id);
        let mut acc = Accumulator::default();
        for (id, outcome) in outcomes {
            acc.route(&mut report, id, outcome);
        }

        let result = self.apply(acc).await;
        report.finished_at = Utc::now();
        info!(
            processed = report.processed,
            new_complete = report.new_complete,
            new_incomplete = report.new_incomplete,
            failed = report.failed,
            "sync run finished"
        );
        match result {
            Ok(()) => Ok(report),
            Err(source) => Err(SyncError::Persist {
                report: Box::new(report),
                source,
            }),
        }
    }

    /// Bounded fan-out over `pending`. Every ID comes back exactly once; a
    /// worker that dies is reported as a failure for its ID.
    async fn fetch_pending(&self, pending: &[AppId]) -> Vec<(AppId, FetchOutcome)> {
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        for &id in pending {
            let client = Arc::clone(&self.client);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                (id, fetch_one(client.as_ref(), id).await)
            });
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(pair) => outcomes.push(pair),
                Err(err) => warn!(error = %err, "sync worker did not finish"),
            }
        }
        if outcomes.len() < pending.len() {
            let seen: HashSet<AppId> = outcomes.iter().map(|(id, _)| *id).collect();
            for &id in pending.iter().filter(|id| !seen.contains(id)) {
                outcomes.push((id, FetchOutcome::Failed));
            }
        }
        outcomes
    }

    /// Merge under the store lock, then rebuild the index from memory even if
    /// persisting failed.
    async fn apply(&self, acc: Accumulator) -> Result<(), gamedex_storage::StoreError> {
        let mut store = self.store.lock().await;
        let merged = store.merge(acc.complete, acc.incomplete).await;
        self.index.rebuild(store.complete());
        let outcome = merged?;
        debug!(?outcome, "accumulators merged");
        Ok(())
    }

    /// Re-fetch one app regardless of whether it is already known.
    ///
    /// A not-found or incomplete answer is recorded like in a sync run. An
    /// upstream failure leaves the stored entry untouched and is only reported.
    pub async fn refresh(&self, id: AppId) -> Result<SyncReport, SyncError> {
        let _cycle = self.cycle.lock().await;
        let run_id = Uuid::new_v4();
        let span = info_span!("refresh", %run_id, app_id = id);
        async {
            let mut report = SyncReport::empty(run_id, Utc::now());
            let outcome = fetch_one(self.client.as_ref(), id).await;
            if matches!(outcome, FetchOutcome::Failed) {
                report.processed = 1;
                report.failed = 1;
                report.failed_ids.push(id);
                report.finished_at = Utc::now();
                return Ok(report);
            }
            let mut acc = Accumulator::default();
            acc.route(&mut report, id, outcome);
            let result = self.apply(acc).await;
            report.finished_at = Utc::now();
            info!(complete = report.new_complete == 1, "app refreshed");
            match result {
                Ok(()) => Ok(report),
                Err(source) => Err(SyncError::Persist {
                    report: Box::new(report),
                    source,
                }),
            }
        }
        .instrument(span)
        .await
    }

    /// Drop one app from both partitions and from the index.
    pub async fn purge(&self, id: AppId) -> Result<bool, SyncError> {
        let _cycle = self.cycle.lock().await;
        let mut store = self.store.lock().await;
        let removed = store.purge(id).await;
        self.index.rebuild(store.complete());
        Ok(removed?)
    }

    pub async fn audit(&self) -> AuditReport {
        self.store.lock().await.audit()
    }

    pub async fn export_keyed(&self, path: &Path) -> Result<(), SyncError> {
        Ok(self.store.lock().await.export_keyed(path).await?)
    }

    /// `(complete, incomplete)` partition sizes.
    pub async fn partition_sizes(&self) -> (usize, usize) {
        let store = self.store.lock().await;
        (store.complete().len(), store.incomplete().len())
    }
}
