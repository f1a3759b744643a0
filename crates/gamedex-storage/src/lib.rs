//! Flat-file persistence (catalog partitions, wishlists) and the retrying HTTP fetcher.

mod catalog;
mod http;
mod wishlist;

use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub use catalog::{
    deduplicate, AuditReport, CatalogStore, MergeOutcome, PartitionAudit, StoreError,
    COMPLETE_FILE, INCOMPLETE_FILE,
};
pub use http::{
    classify_reqwest_error, Attempt, Backoff, FetchError, HttpClientConfig, HttpFetcher,
    RetryDisposition, RetryError, RetryPolicy, Sleeper, TokioSleeper,
};
pub use wishlist::JsonWishlistStore;

pub const CRATE_NAME: &str = "gamedex-storage";

/// Replace `path` with `bytes` via a sibling temp file and rename, so readers
/// and crashes only ever see the old or the new content.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    fs::create_dir_all(&parent).await?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await?;
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err);
    }

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err);
    }
    Ok(())
}
