//! Catalog sync orchestration: configuration, the sync engine, operator gate and scheduling.

mod config;
mod engine;

use std::sync::Arc;

use anyhow::{Context, Result};
use gamedex_core::{SyncReport, UserId};
use gamedex_index::{CatalogIndex, WishlistReconciler};
use gamedex_storage::{CatalogStore, JsonWishlistStore, StoreError};
use gamedex_upstream::UpstreamError;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

pub use config::GamedexConfig;
pub use engine::SyncEngine;

pub const CRATE_NAME: &str = "gamedex-sync";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("catalog store: {0}")]
    Store(#[from] StoreError),
    #[error("fetching the app universe: {0}")]
    Upstream(#[source] UpstreamError),
    #[error("sync results kept in memory but not persisted: {source}")]
    Persist {
        report: Box<SyncReport>,
        #[source]
        source: StoreError,
    },
    #[error("user {caller} is not the catalog operator")]
    Unauthorized { caller: UserId },
}

/// Admits exactly one designated operator to privileged catalog actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorGate {
    operator: Option<UserId>,
}

impl OperatorGate {
    /// With no operator configured every caller is refused.
    pub fn new(operator: Option<UserId>) -> Self {
        Self { operator }
    }

    pub fn authorize(&self, caller: UserId) -> Result<(), SyncError> {
        if self.operator == Some(caller) {
            Ok(())
        } else {
            warn!(caller, "privileged catalog action refused");
            Err(SyncError::Unauthorized { caller })
        }
    }
}

/// Everything a front end needs: the engine, the shared index, wishlists and the gate.
#[derive(Debug, Clone)]
pub struct Services {
    pub engine: Arc<SyncEngine>,
    pub index: Arc<CatalogIndex>,
    pub wishlists: Arc<WishlistReconciler>,
    pub gate: OperatorGate,
}

pub async fn build_services(config: &GamedexConfig) -> Result<Services> {
    let store = CatalogStore::open(&config.data_dir)
        .await
        .with_context(|| format!("opening catalog in {}", config.data_dir.display()))?;
    let client = config.steam_client().context("building upstream http client")?;
    let index = Arc::new(CatalogIndex::new());
    let engine = Arc::new(SyncEngine::new(store, Arc::new(client), Arc::clone(&index), config.workers));
    let wishlists = Arc::new(WishlistReconciler::new(
        Arc::new(JsonWishlistStore::new(&config.wishlist_dir)),
        Arc::clone(&index),
    ));
    Ok(Services {
        engine,
        index,
        wishlists,
        gate: OperatorGate::new(config.operator_id),
    })
}

pub async fn run_sync_once_from_env() -> Result<SyncReport> {
    let config = GamedexConfig::from_env();
    let services = build_services(&config).await?;
    Ok(services.engine.run_sync().await?)
}

/// A scheduler running one sync cycle per cron tick, if scheduling is enabled.
pub async fn maybe_build_scheduler(config: &GamedexConfig, engine: Arc<SyncEngine>) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.sync_cron.as_str();
    let job = Job::new_async(cron, move |_uuid, _l| {
        let engine = Arc::clone(&engine);
        Box::pin(async move {
            match engine.run_sync().await {
                Ok(report) => info!(
                    run_id = %report.run_id,
                    processed = report.processed,
                    failed = report.failed,
                    "scheduled sync finished"
                ),
                Err(err) => warn!(error = %err, "scheduled sync failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
