//! Read-optimized projection of the complete catalog partition.
//!
//! A [`CatalogIndex`] holds one immutable snapshot at a time. Rebuilds assemble
//! a fresh snapshot off to the side and swap it in whole, so a reader sees
//! either the previous catalog or the new one, never a mix.

pub mod similarity;
pub mod wishlist;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use gamedex_core::{AppId, CatalogRecord};
use tracing::debug;

pub use similarity::ratio;
pub use wishlist::{
    parse_release_date, ImportReport, RejectReason, RejectedEntry, TagCount, WishlistError, WishlistOrder,
    WishlistReconciler, TAG_COUNT_LIMIT,
};

pub const CRATE_NAME: &str = "gamedex-index";

pub const NAME_SEARCH_LIMIT: usize = 10;
pub const TAG_SEARCH_LIMIT: usize = 20;
/// Fuzzy name matches need a similarity strictly above this.
pub const FUZZY_THRESHOLD: f64 = 0.70;

/// A catalog record plus its precomputed popularity score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub record: CatalogRecord,
    pub total_reviews: u64,
}

impl IndexEntry {
    fn new(record: CatalogRecord) -> Self {
        let total_reviews = record.total_reviews();
        Self { record, total_reviews }
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    /// Partition order; every ranking is a stable sort over this.
    entries: Vec<Arc<IndexEntry>>,
    /// Spaces removed, lowercased; parallel to `entries`.
    squashed_names: Vec<String>,
    by_id: HashMap<AppId, usize>,
    by_name: HashMap<String, usize>,
}

impl Snapshot {
    fn build(records: &[CatalogRecord]) -> Self {
        let mut snapshot = Snapshot {
            entries: Vec::with_capacity(records.len()),
            squashed_names: Vec::with_capacity(records.len()),
            by_id: HashMap::with_capacity(records.len()),
            by_name: HashMap::with_capacity(records.len()),
        };
        for (slot, record) in records.iter().enumerate() {
            let entry = Arc::new(IndexEntry::new(record.clone()));
            snapshot.by_id.insert(record.id, slot);
            let key = exact_name_key(&record.name);
            match snapshot.by_name.get(&key) {
                Some(&held) if snapshot.entries[held].total_reviews >= entry.total_reviews => {}
                _ => {
                    snapshot.by_name.insert(key, slot);
                }
            }
            snapshot.squashed_names.push(squash(&record.name));
            snapshot.entries.push(entry);
        }
        snapshot
    }

    /// Matching entries ordered by total reviews, partition order on ties.
    fn ranked(&self, limit: usize, mut keep: impl FnMut(usize) -> bool) -> Vec<Arc<IndexEntry>> {
        let mut hits: Vec<&Arc<IndexEntry>> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(slot, _)| keep(*slot))
            .map(|(_, entry)| entry)
            .collect();
        hits.sort_by(|a, b| b.total_reviews.cmp(&a.total_reviews));
        hits.into_iter().take(limit).cloned().collect()
    }
}

fn exact_name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

fn squash(name: &str) -> String {
    name.to_lowercase().chars().filter(|c| *c != ' ').collect()
}

/// Single-writer, many-reader index over complete catalog records.
#[derive(Debug, Default)]
pub struct CatalogIndex {
    current: RwLock<Arc<Snapshot>>,
    rebuild_lock: Mutex<()>,
}

impl CatalogIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: &[CatalogRecord]) -> Self {
        let index = Self::new();
        index.rebuild(records);
        index
    }

    /// Replace the whole snapshot with one built from `records`.
    ///
    /// Records are expected to be deduplicated already; should an ID repeat,
    /// ID lookups resolve to its last occurrence.
    pub fn rebuild(&self, records: &[CatalogRecord]) -> usize {
        let _writer = self.rebuild_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(Snapshot::build(records));
        let size = next.entries.len();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
        debug!(entries = size, "catalog index rebuilt");
        size
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.snapshot().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_by_id(&self, id: AppId) -> Option<Arc<IndexEntry>> {
        let snapshot = self.snapshot();
        snapshot.by_id.get(&id).map(|&slot| Arc::clone(&snapshot.entries[slot]))
    }

    /// Case-insensitive, trimmed name equality; the most reviewed record wins
    /// when names collide.
    pub fn get_by_exact_name(&self, name: &str) -> Option<Arc<IndexEntry>> {
        let snapshot = self.snapshot();
        snapshot
            .by_name
            .get(&exact_name_key(name))
            .map(|&slot| Arc::clone(&snapshot.entries[slot]))
    }

    /// Substring or fuzzy match on names with spaces removed.
    pub fn search_by_name(&self, query: &str, limit: usize) -> Vec<Arc<IndexEntry>> {
        let needle = squash(query);
        if needle.is_empty() {
            return Vec::new();
        }
        let snapshot = self.snapshot();
        snapshot.ranked(limit, |slot| {
            let name = &snapshot.squashed_names[slot];
            name.contains(&needle) || similarity::ratio(&needle, name) > FUZZY_THRESHOLD
        })
    }

    /// Records with any top tag containing `tag`, case-insensitively.
    pub fn search_by_tag(&self, tag: &str, limit: usize) -> Vec<Arc<IndexEntry>> {
        let needle = tag.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let snapshot = self.snapshot();
        snapshot.ranked(limit, |slot| {
            snapshot.entries[slot]
                .record
                .top_tags
                .iter()
                .any(|t| t.to_lowercase().contains(&needle))
        })
    }
}
