//! Per-user wishlists kept consistent with the catalog index.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use gamedex_core::{AppId, UserId, WishlistEntry, WishlistStore, WishlistStoreError, NO_TAGS_FOUND};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::CatalogIndex;

pub const TAG_COUNT_LIMIT: usize = 10;

const RELEASE_DATE_FORMATS: [&str; 4] = ["%b %d, %Y", "%d %b, %Y", "%B %d, %Y", "%d %B, %Y"];

#[derive(Debug, Error)]
pub enum WishlistError {
    #[error(transparent)]
    Store(#[from] WishlistStoreError),
    #[error("wishlist entry {} rejected: {reason:?}", entry.id)]
    Rejected { entry: WishlistEntry, reason: RejectReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Blank name or a zero ID.
    Malformed,
    UnknownId,
    UnknownName,
    /// ID and name each resolve, but to different records.
    Mismatch { name_resolves_to: AppId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedEntry {
    pub entry: WishlistEntry,
    pub reason: RejectReason,
}

/// Outcome of reconciling an external batch against one user's wishlist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub accepted: Vec<WishlistEntry>,
    pub duplicates: Vec<WishlistEntry>,
    pub rejected: Vec<RejectedEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WishlistOrder {
    Name,
    Reviews,
    ReleaseDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
    pub games: Vec<String>,
}

/// Wishlist operations over a [`WishlistStore`], serialised per user.
pub struct WishlistReconciler {
    store: Arc<dyn WishlistStore>,
    index: Arc<CatalogIndex>,
    per_user: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for WishlistReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WishlistReconciler")
            .field("index_entries", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl WishlistReconciler {
    pub fn new(store: Arc<dyn WishlistStore>, index: Arc<CatalogIndex>) -> Self {
        Self {
            store,
            index,
            per_user: Mutex::new(HashMap::new()),
        }
    }

    async fn user_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut map = self.per_user.lock().await;
        // Only the map holds an idle lock; clones are handed out under this guard.
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(map.entry(user_id).or_insert_with(|| Arc::new(Mutex::new(()))))
    }

    pub async fn list(&self, user_id: UserId) -> Result<Vec<WishlistEntry>, WishlistError> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        Ok(self.store.load(user_id).await?)
    }

    /// Returns `false` when an identical entry is already present. Entries
    /// that do not resolve to a catalog record are rejected.
    pub async fn add(&self, user_id: UserId, entry: WishlistEntry) -> Result<bool, WishlistError> {
        if let Err(reason) = self.cross_check(&entry) {
            warn!(user_id, app_id = entry.id, ?reason, "wishlist entry rejected");
            return Err(WishlistError::Rejected { entry, reason });
        }
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        let mut entries = self.store.load(user_id).await?;
        if entries.contains(&entry) {
            return Ok(false);
        }
        entries.push(entry);
        self.store.save(user_id, &entries).await?;
        Ok(true)
    }

    /// Removes every entry whose name matches, case-insensitively. Returns how many went.
    pub async fn remove(&self, user_id: UserId, name: &str) -> Result<usize, WishlistError> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        let mut entries = self.store.load(user_id).await?;
        let before = entries.len();
        entries.retain(|e| !same_name(&e.name, name));
        let removed = before - entries.len();
        if removed > 0 {
            self.store.save(user_id, &entries).await?;
        }
        Ok(removed)
    }

    pub async fn contains(&self, user_id: UserId, name: &str) -> Result<bool, WishlistError> {
        Ok(self.list(user_id).await?.iter().any(|e| same_name(&e.name, name)))
    }

    pub async fn count(&self, user_id: UserId) -> Result<usize, WishlistError> {
        Ok(self.list(user_id).await?.len())
    }

    pub async fn import(&self, user_id: UserId, external: Vec<WishlistEntry>) -> Result<ImportReport, WishlistError> {
        Ok(self.reconcile(user_id, external).await?.1)
    }

    /// Like [`import`](Self::import), also handing back the resulting wishlist.
    pub async fn merge(
        &self,
        user_id: UserId,
        external: Vec<WishlistEntry>,
    ) -> Result<(Vec<WishlistEntry>, ImportReport), WishlistError> {
        self.reconcile(user_id, external).await
    }

    async fn reconcile(
        &self,
        user_id: UserId,
        external: Vec<WishlistEntry>,
    ) -> Result<(Vec<WishlistEntry>, ImportReport), WishlistError> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        let mut entries = self.store.load(user_id).await?;
        let mut report = ImportReport::default();

        for entry in external {
            if let Err(reason) = self.cross_check(&entry) {
                warn!(user_id, app_id = entry.id, ?reason, "wishlist entry rejected");
                report.rejected.push(RejectedEntry { entry, reason });
            } else if entries.contains(&entry) {
                report.duplicates.push(entry);
            } else {
                entries.push(entry.clone());
                report.accepted.push(entry);
            }
        }

        if !report.accepted.is_empty() {
            self.store.save(user_id, &entries).await?;
        }
        info!(
            user_id,
            accepted = report.accepted.len(),
            duplicates = report.duplicates.len(),
            rejected = report.rejected.len(),
            "wishlist reconciled"
        );
        Ok((entries, report))
    }

    /// ID and name must both resolve, and to the same catalog record.
    fn cross_check(&self, entry: &WishlistEntry) -> Result<(), RejectReason> {
        if entry.id == 0 || entry.name.trim().is_empty() {
            return Err(RejectReason::Malformed);
        }
        let by_id = self.index.get_by_id(entry.id).ok_or(RejectReason::UnknownId)?;
        let by_name = self
            .index
            .get_by_exact_name(&entry.name)
            .ok_or(RejectReason::UnknownName)?;
        if by_id.record.id != by_name.record.id {
            return Err(RejectReason::Mismatch {
                name_resolves_to: by_name.record.id,
            });
        }
        Ok(())
    }

    /// The wishlist in the requested order; ties keep list order.
    pub async fn sorted(&self, user_id: UserId, order: WishlistOrder) -> Result<Vec<WishlistEntry>, WishlistError> {
        let mut entries = self.list(user_id).await?;
        match order {
            WishlistOrder::Name => entries.sort_by_key(|e| e.name.to_lowercase()),
            WishlistOrder::Reviews => {
                let reviews = |id| self.index.get_by_id(id).map_or(0, |e| e.total_reviews);
                entries.sort_by_key(|e| std::cmp::Reverse(reviews(e.id)));
            }
            WishlistOrder::ReleaseDate => {
                let released = |id| {
                    self.index
                        .get_by_id(id)
                        .and_then(|e| parse_release_date(&e.record.release_date))
                };
                // `None` sorts first, so unknown dates go to the back via the flag.
                entries.sort_by_key(|e| {
                    let date = released(e.id);
                    (date.is_none(), date)
                });
            }
        }
        Ok(entries)
    }

    /// Most common top tags across the user's wishlisted games.
    pub async fn tag_counts(&self, user_id: UserId, limit: usize) -> Result<Vec<TagCount>, WishlistError> {
        let entries = self.list(user_id).await?;
        let mut counts: Vec<TagCount> = Vec::new();
        for entry in &entries {
            let Some(found) = self.index.get_by_id(entry.id) else {
                continue;
            };
            for tag in found.record.top_tags.iter().filter(|t| t.as_str() != NO_TAGS_FOUND) {
                match counts.iter_mut().find(|c| &c.tag == tag) {
                    Some(existing) => {
                        existing.count += 1;
                        existing.games.push(found.record.name.clone());
                    }
                    None => counts.push(TagCount {
                        tag: tag.clone(),
                        count: 1,
                        games: vec![found.record.name.clone()],
                    }),
                }
            }
        }
        counts.sort_by(|a, b| b.count.cmp(&a.count));
        counts.truncate(limit);
        Ok(counts)
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

pub fn parse_release_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    RELEASE_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::record;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MemoryStore {
        lists: StdMutex<HashMap<UserId, Vec<WishlistEntry>>>,
        saves: StdMutex<usize>,
    }

    #[async_trait]
    impl WishlistStore for MemoryStore {
        async fn load(&self, user_id: UserId) -> Result<Vec<WishlistEntry>, WishlistStoreError> {
            Ok(self.lists.lock().unwrap().get(&user_id).cloned().unwrap_or_default())
        }

        async fn save(&self, user_id: UserId, entries: &[WishlistEntry]) -> Result<(), WishlistStoreError> {
            *self.saves.lock().unwrap() += 1;
            self.lists.lock().unwrap().insert(user_id, entries.to_vec());
            Ok(())
        }
    }

    fn entry(id: AppId, name: &str) -> WishlistEntry {
        WishlistEntry {
            id,
            name: name.to_string(),
            price: "$9.99".to_string(),
        }
    }

    fn reconciler() -> (WishlistReconciler, Arc<MemoryStore>) {
        let mut portal = record(10, "Portal", 9000, 100, &["Puzzle", "Sci-fi"]);
        portal.release_date = "Oct 10, 2007".into();
        let mut real = record(42, "Real Game", 50, 0, &["Puzzle", "Indie"]);
        real.release_date = "1 Feb, 2001".into();
        let mut strike = record(20, "Counter-Strike", 200_000, 5_000, &["FPS", "Indie"]);
        strike.release_date = "Coming soon".into();
        let mut delisted = record(77, "Delisted", 0, 0, &[]);
        delisted.release_date = "TBA".into();
        let index = Arc::new(CatalogIndex::from_records(&[portal, real, strike, delisted]));
        let store = Arc::new(MemoryStore::default());
        (WishlistReconciler::new(store.clone(), index), store)
    }

    #[tokio::test]
    async fn add_is_idempotent_and_remove_matches_names() {
        let (wishlists, store) = reconciler();
        assert!(wishlists.add(1, entry(10, "Portal")).await.unwrap());
        assert!(!wishlists.add(1, entry(10, "Portal")).await.unwrap());
        assert!(wishlists.add(1, entry(20, "Counter-Strike")).await.unwrap());
        assert_eq!(wishlists.count(1).await.unwrap(), 2);
        assert!(wishlists.contains(1, " portal").await.unwrap());
        assert_eq!(*store.saves.lock().unwrap(), 2);

        assert_eq!(wishlists.remove(1, "PORTAL").await.unwrap(), 1);
        assert_eq!(wishlists.remove(1, "portal").await.unwrap(), 0);
        assert_eq!(wishlists.list(1).await.unwrap(), vec![entry(20, "Counter-Strike")]);
        assert!(wishlists.list(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_rejects_games_outside_the_catalog() {
        let (wishlists, store) = reconciler();
        let err = wishlists.add(1, entry(999, "Ghost Game")).await.unwrap_err();
        assert!(matches!(
            err,
            WishlistError::Rejected {
                reason: RejectReason::UnknownId,
                ..
            }
        ));
        let err = wishlists.add(1, entry(10, "Counter-Strike")).await.unwrap_err();
        assert!(matches!(
            err,
            WishlistError::Rejected {
                reason: RejectReason::Mismatch { name_resolves_to: 20 },
                ..
            }
        ));
        assert!(wishlists.list(1).await.unwrap().is_empty());
        assert_eq!(*store.saves.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn idle_user_locks_are_pruned() {
        let (wishlists, _) = reconciler();
        for user in 1..=50 {
            wishlists.count(user).await.unwrap();
        }
        assert_eq!(wishlists.per_user.lock().await.len(), 1);

        let held = wishlists.user_lock(3).await;
        let _guard = held.lock().await;
        wishlists.count(4).await.unwrap();
        let map = wishlists.per_user.lock().await;
        assert!(map.contains_key(&3));
        assert_eq!(map.len(), 2);
    }

    #[tokio::test]
    async fn import_rejects_entries_failing_the_cross_check() {
        let (wishlists, _) = reconciler();
        wishlists.add(7, entry(10, "Portal")).await.unwrap();

        let report = wishlists
            .import(
                7,
                vec![
                    entry(42, "Ghost Game"),
                    entry(10, "Portal"),
                    entry(42, "real game"),
                    entry(99, "Portal"),
                    entry(10, "Counter-Strike"),
                    entry(0, ""),
                ],
            )
            .await
            .unwrap();

        assert_eq!(report.accepted, vec![entry(42, "real game")]);
        assert_eq!(report.duplicates, vec![entry(10, "Portal")]);
        let reasons: Vec<RejectReason> = report.rejected.iter().map(|r| r.reason).collect();
        assert_eq!(
            reasons,
            vec![
                RejectReason::UnknownName,
                RejectReason::UnknownId,
                RejectReason::Mismatch { name_resolves_to: 20 },
                RejectReason::Malformed,
            ]
        );
        assert_eq!(report.rejected[0].entry, entry(42, "Ghost Game"));
        assert_eq!(
            wishlists.list(7).await.unwrap(),
            vec![entry(10, "Portal"), entry(42, "real game")]
        );
    }

    #[tokio::test]
    async fn merge_returns_resulting_list_and_skips_save_when_nothing_new() {
        let (wishlists, store) = reconciler();
        let (list, report) = wishlists.merge(3, vec![entry(42, "Ghost Game")]).await.unwrap();
        assert!(list.is_empty());
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(*store.saves.lock().unwrap(), 0);

        let (list, report) = wishlists
            .merge(3, vec![entry(10, "Portal"), entry(10, "Portal")])
            .await
            .unwrap();
        assert_eq!(list, vec![entry(10, "Portal")]);
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.duplicates.len(), 1);
    }

    #[tokio::test]
    async fn sorted_views() {
        let (wishlists, _) = reconciler();
        for e in [entry(20, "Counter-Strike"), entry(10, "Portal"), entry(42, "Real Game"), entry(77, "delisted")] {
            wishlists.add(5, e).await.unwrap();
        }
        let ids = |v: Vec<WishlistEntry>| v.into_iter().map(|e| e.id).collect::<Vec<_>>();

        assert_eq!(ids(wishlists.sorted(5, WishlistOrder::Name).await.unwrap()), vec![20, 77, 10, 42]);
        assert_eq!(ids(wishlists.sorted(5, WishlistOrder::Reviews).await.unwrap()), vec![20, 10, 42, 77]);
        assert_eq!(
            ids(wishlists.sorted(5, WishlistOrder::ReleaseDate).await.unwrap()),
            vec![42, 10, 20, 77]
        );
    }

    #[tokio::test]
    async fn tag_counts_rank_shared_tags() {
        let (wishlists, _) = reconciler();
        for e in [entry(10, "Portal"), entry(42, "Real Game"), entry(20, "Counter-Strike")] {
            wishlists.add(9, e).await.unwrap();
        }
        let counts = wishlists.tag_counts(9, TAG_COUNT_LIMIT).await.unwrap();
        assert_eq!(counts[0].tag, "Puzzle");
        assert_eq!(counts[0].games, vec!["Portal", "Real Game"]);
        assert_eq!(counts[1].tag, "Indie");
        assert_eq!(counts[1].count, 2);
        assert_eq!(counts.len(), 4);
        assert_eq!(wishlists.tag_counts(9, 1).await.unwrap().len(), 1);
    }

    #[test]
    fn release_dates_in_store_formats() {
        assert_eq!(parse_release_date("Oct 10, 2007"), NaiveDate::from_ymd_opt(2007, 10, 10));
        assert_eq!(parse_release_date("1 Feb, 2001"), NaiveDate::from_ymd_opt(2001, 2, 1));
        assert_eq!(parse_release_date("March 3, 2020"), NaiveDate::from_ymd_opt(2020, 3, 3));
        assert_eq!(parse_release_date("Coming soon"), None);
    }
}
