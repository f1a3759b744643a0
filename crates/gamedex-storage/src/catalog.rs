use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use gamedex_core::{AppId, CatalogRecord, InvalidRecord, Keyed};
use serde::de::{self, DeserializeOwned, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::write_atomic;

pub const COMPLETE_FILE: &str = "detailed_games.json";
pub const INCOMPLETE_FILE: &str = "invalid_games.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serializing partition: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("persisting {path}: {source}")]
    PersistFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Collapse entries sharing an ID. The surviving entry sits where the ID was
/// first seen but carries the value of its last occurrence. Returns the number
/// of entries removed.
pub fn deduplicate<T: Keyed>(partition: &mut Vec<T>) -> usize {
    let before = partition.len();
    let mut slots: HashMap<AppId, usize> = HashMap::with_capacity(before);
    let mut out: Vec<T> = Vec::with_capacity(before);
    for item in partition.drain(..) {
        match slots.get(&item.app_id()) {
            Some(&slot) => out[slot] = item,
            None => {
                slots.insert(item.app_id(), out.len());
                out.push(item);
            }
        }
    }
    *partition = out;
    before - partition.len()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub complete_added: usize,
    pub incomplete_added: usize,
    pub duplicates_removed: usize,
    /// IDs that moved from one partition to the other.
    pub evicted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartitionAudit {
    pub total: usize,
    pub duplicate_ids: BTreeSet<AppId>,
    pub incomplete_ids: Vec<AppId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub complete: PartitionAudit,
    pub incomplete: PartitionAudit,
}

/// Authoritative on-disk catalog: a complete and an incomplete partition,
/// each persisted as one JSON document. The in-memory copy stays
/// authoritative for the process even when a persist attempt fails.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    complete_path: PathBuf,
    incomplete_path: PathBuf,
    complete: Vec<CatalogRecord>,
    incomplete: Vec<InvalidRecord>,
}

impl CatalogStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self::with_paths(data_dir.join(COMPLETE_FILE), data_dir.join(INCOMPLETE_FILE))
    }

    pub fn with_paths(complete_path: impl Into<PathBuf>, incomplete_path: impl Into<PathBuf>) -> Self {
        Self {
            complete_path: complete_path.into(),
            incomplete_path: incomplete_path.into(),
            complete: Vec::new(),
            incomplete: Vec::new(),
        }
    }

    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut store = Self::new(data_dir);
        store.load().await?;
        Ok(store)
    }

    /// Reload both partitions from disk. Missing or empty files read as empty partitions.
    pub async fn load(&mut self) -> Result<(), StoreError> {
        self.complete = read_partition(&self.complete_path).await?;
        self.incomplete = read_partition(&self.incomplete_path).await?;
        info!(
            complete = self.complete.len(),
            incomplete = self.incomplete.len(),
            "catalog partitions loaded"
        );
        Ok(())
    }

    pub fn complete(&self) -> &[CatalogRecord] {
        &self.complete
    }

    pub fn incomplete(&self) -> &[InvalidRecord] {
        &self.incomplete
    }

    /// Union of the IDs of both partitions.
    pub fn known_ids(&self) -> HashSet<AppId> {
        self.complete
            .iter()
            .map(Keyed::app_id)
            .chain(self.incomplete.iter().map(Keyed::app_id))
            .collect()
    }

    pub fn get_complete(&self, id: AppId) -> Option<&CatalogRecord> {
        self.complete.iter().find(|r| r.id == id)
    }

    /// Append the new records, deduplicate both partitions and persist.
    ///
    /// An ID merged into one partition is evicted from the other, so every ID
    /// lives in exactly one partition afterwards. If the same ID arrives in both
    /// batches the complete record wins.
    pub async fn merge(
        &mut self,
        new_complete: Vec<CatalogRecord>,
        new_incomplete: Vec<InvalidRecord>,
    ) -> Result<MergeOutcome, StoreError> {
        let complete_ids: HashSet<AppId> = new_complete.iter().map(Keyed::app_id).collect();
        let new_incomplete: Vec<InvalidRecord> = new_incomplete
            .into_iter()
            .filter(|r| !complete_ids.contains(&r.id))
            .collect();
        let incomplete_ids: HashSet<AppId> = new_incomplete.iter().map(Keyed::app_id).collect();

        let mut outcome = MergeOutcome {
            complete_added: new_complete.len(),
            incomplete_added: new_incomplete.len(),
            ..Default::default()
        };

        let before = self.incomplete.len() + self.complete.len();
        self.incomplete.retain(|r| !complete_ids.contains(&r.id));
        self.complete.retain(|r| !incomplete_ids.contains(&r.id));
        outcome.evicted = before - self.incomplete.len() - self.complete.len();

        self.complete.extend(new_complete);
        self.incomplete.extend(new_incomplete);
        outcome.duplicates_removed =
            deduplicate(&mut self.complete) + deduplicate(&mut self.incomplete);

        debug!(?outcome, "catalog merge applied in memory");
        self.persist().await?;
        Ok(outcome)
    }

    /// Remove `id` from both partitions. Returns whether anything was removed.
    pub async fn purge(&mut self, id: AppId) -> Result<bool, StoreError> {
        let before = self.complete.len() + self.incomplete.len();
        self.complete.retain(|r| r.id != id);
        self.incomplete.retain(|r| r.id != id);
        let removed = before != self.complete.len() + self.incomplete.len();
        if removed {
            info!(app_id = id, "purged from catalog");
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Rewrite both partition files.
    pub async fn persist(&self) -> Result<(), StoreError> {
        write_partition(&self.complete_path, &self.complete).await?;
        write_partition(&self.incomplete_path, &self.incomplete).await
    }

    /// Write the complete partition keyed by stringified ID.
    pub async fn export_keyed(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let mut map = serde_json::Map::with_capacity(self.complete.len());
        for record in &self.complete {
            map.insert(record.id.to_string(), serde_json::to_value(record)?);
        }
        // serde_json::Map orders keys; the list partition remains the ordered source.
        let bytes = serde_json::to_vec_pretty(&map)?;
        write_atomic(path, &bytes)
            .await
            .map_err(|source| StoreError::PersistFailure {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn audit(&self) -> AuditReport {
        AuditReport {
            complete: audit_partition(&self.complete, record_has_empty_field),
            incomplete: audit_partition(&self.incomplete, |r| r.name.trim().is_empty()),
        }
    }
}

fn record_has_empty_field(r: &CatalogRecord) -> bool {
    [
        &r.name,
        &r.image_url,
        &r.price,
        &r.developer,
        &r.publisher,
        &r.short_desc,
        &r.release_date,
        &r.platforms,
    ]
    .iter()
    .any(|s| s.trim().is_empty())
        || r.top_tags.is_empty()
        || r.languages_sub.is_empty()
        || r.languages_audio.is_empty()
}

fn audit_partition<T: Keyed>(items: &[T], is_incomplete: impl Fn(&T) -> bool) -> PartitionAudit {
    let mut seen = HashSet::with_capacity(items.len());
    let mut audit = PartitionAudit {
        total: items.len(),
        ..Default::default()
    };
    for item in items {
        if !seen.insert(item.app_id()) {
            audit.duplicate_ids.insert(item.app_id());
        }
        if is_incomplete(item) {
            audit.incomplete_ids.push(item.app_id());
        }
    }
    audit
}

async fn read_partition<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "partition file missing; starting empty");
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice::<PartitionEntries<T>>(&bytes)
        .map(|entries| entries.0)
        .map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

async fn write_partition<T: Serialize>(path: &Path, items: &[T]) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(items)?;
    write_atomic(path, &bytes).await.map_err(|source| {
        warn!(path = %path.display(), error = %source, "partition persist failed");
        StoreError::PersistFailure {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Partition document in either list-indexed or key-indexed form, in file order.
struct PartitionEntries<T>(Vec<T>);

impl<'de, T: Deserialize<'de>> Deserialize<'de> for PartitionEntries<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
            type Value = PartitionEntries<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a list of records or a map of ID to record")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(item) = seq.next_element()? {
                    out.push(item);
                }
                Ok(PartitionEntries(out))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, item)) = map.next_entry::<String, T>()? {
                    key.trim()
                        .parse::<AppId>()
                        .map_err(|_| de::Error::custom(format!("non-numeric catalog key {key:?}")))?;
                    out.push(item);
                }
                Ok(PartitionEntries(out))
            }
        }

        deserializer.deserialize_any(EntriesVisitor(PhantomData))
    }
}
