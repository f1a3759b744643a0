use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gamedex_core::{UserId, WishlistEntry, WishlistStore, WishlistStoreError};
use tokio::fs;
use tracing::debug;

use crate::write_atomic;

/// One JSON document per user, `<dir>/<user_id>_wishlist.json`.
#[derive(Debug, Clone)]
pub struct JsonWishlistStore {
    dir: PathBuf,
}

impl JsonWishlistStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, user_id: UserId) -> PathBuf {
        self.dir.join(format!("{user_id}_wishlist.json"))
    }
}

#[async_trait]
impl WishlistStore for JsonWishlistStore {
    async fn load(&self, user_id: UserId) -> Result<Vec<WishlistEntry>, WishlistStoreError> {
        let path = self.path_for(user_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(WishlistStoreError::Read {
                    user_id,
                    source: Box::new(err),
                })
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).map_err(|err| WishlistStoreError::Read {
            user_id,
            source: Box::new(err),
        })
    }

    async fn save(&self, user_id: UserId, entries: &[WishlistEntry]) -> Result<(), WishlistStoreError> {
        let bytes = serde_json::to_vec_pretty(entries).map_err(|err| WishlistStoreError::Write {
            user_id,
            source: Box::new(err),
        })?;
        write_atomic(&self.path_for(user_id), &bytes)
            .await
            .map_err(|err| WishlistStoreError::Write {
                user_id,
                source: Box::new(err),
            })?;
        debug!(user_id, entries = entries.len(), "wishlist saved");
        Ok(())
    }
}
