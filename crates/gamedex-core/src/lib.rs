//! Core domain model for the gamedex catalog: records, wishlist references and run reports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "gamedex-core";

/// External store identifier for an app.
pub type AppId = u64;

/// Identity of a wishlist owner (chat IDs may be negative).
pub type UserId = i64;

pub const INVALID_GAME_NAME: &str = "Invalid Game";
pub const NOT_AVAILABLE: &str = "Not available";
pub const NO_TAGS_FOUND: &str = "No tags found";

/// Anything stored in a catalog partition, addressed by its app ID.
pub trait Keyed {
    fn app_id(&self) -> AppId;
}

/// Fully validated catalog entry, the unit of the complete partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct CatalogRecord {
    #[serde(rename = "ID")]
    pub id: AppId,
    pub name: String,
    #[serde(rename = "ImageURL")]
    pub image_url: String,
    pub price: String,
    pub developer: String,
    pub publisher: String,
    pub positive_reviews: u64,
    pub negative_reviews: u64,
    pub day_peak: u64,
    pub top_tags: Vec<String>,
    pub languages_sub: Vec<String>,
    pub languages_audio: Vec<String>,
    pub short_desc: String,
    pub release_date: String,
    pub platforms: String,
}

impl CatalogRecord {
    pub fn total_reviews(&self) -> u64 {
        self.positive_reviews.saturating_add(self.negative_reviews)
    }

    /// Reduced form kept when a record is demoted to the incomplete partition.
    pub fn to_invalid(&self) -> InvalidRecord {
        InvalidRecord {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

impl Keyed for CatalogRecord {
    fn app_id(&self) -> AppId {
        self.id
    }
}

/// Lightweight entry of the incomplete partition: only ID and Name survive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvalidRecord {
    #[serde(rename = "ID")]
    pub id: AppId,
    pub name: String,
}

impl InvalidRecord {
    /// Marker stored for IDs whose fetch failed or was reported as not found.
    pub fn placeholder(id: AppId) -> Self {
        Self {
            id,
            name: INVALID_GAME_NAME.to_string(),
        }
    }
}

impl Keyed for InvalidRecord {
    fn app_id(&self) -> AppId {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Completeness {
    Complete,
    Incomplete,
}

/// Result of validating one fetched app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Complete(CatalogRecord),
    Incomplete(InvalidRecord),
}

impl Classified {
    pub fn completeness(&self) -> Completeness {
        match self {
            Classified::Complete(_) => Completeness::Complete,
            Classified::Incomplete(_) => Completeness::Incomplete,
        }
    }

    pub fn app_id(&self) -> AppId {
        match self {
            Classified::Complete(record) => record.id,
            Classified::Incomplete(record) => record.id,
        }
    }
}

/// Reduced reference into the catalog held in a user's wishlist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WishlistEntry {
    #[serde(rename = "ID")]
    pub id: AppId,
    pub name: String,
    pub price: String,
}

impl From<&CatalogRecord> for WishlistEntry {
    fn from(record: &CatalogRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            price: record.price.clone(),
        }
    }
}

/// Summary of one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processed: usize,
    pub new_complete: usize,
    pub new_incomplete: usize,
    pub failed: usize,
    pub failed_ids: Vec<AppId>,
}

impl SyncReport {
    pub fn empty(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            processed: 0,
            new_complete: 0,
            new_incomplete: 0,
            failed: 0,
            failed_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WishlistStoreError {
    #[error("reading wishlist for user {user_id}: {source}")]
    Read {
        user_id: UserId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("writing wishlist for user {user_id}: {source}")]
    Write {
        user_id: UserId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Backing store for per-user wishlists.
#[async_trait]
pub trait WishlistStore: Send + Sync {
    /// Returns the stored list, or an empty one for a user never seen before.
    async fn load(&self, user_id: UserId) -> Result<Vec<WishlistEntry>, WishlistStoreError>;

    async fn save(&self, user_id: UserId, entries: &[WishlistEntry]) -> Result<(), WishlistStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_uses_catalog_field_names() {
        let raw = serde_json::json!({
            "ID": 10,
            "Name": "Portal",
            "ImageURL": "https://cdn.example/portal.jpg",
            "Price": "$9.99",
            "Developer": "Valve",
            "Publisher": "Valve",
            "PositiveReviews": 9000,
            "NegativeReviews": 100,
            "DayPeak": 512,
            "TopTags": ["Puzzle", "First-Person"],
            "LanguagesSub": ["English", "French"],
            "LanguagesAudio": ["English"],
            "ShortDesc": "Think with portals.",
            "ReleaseDate": "Oct 10, 2007",
            "Platforms": "windows, mac, linux"
        });
        let record: CatalogRecord = serde_json::from_value(raw).expect("decode record");
        assert_eq!(record.id, 10);
        assert_eq!(record.image_url, "https://cdn.example/portal.jpg");
        assert_eq!(record.total_reviews(), 9100);

        let back = serde_json::to_value(&record).expect("encode record");
        assert_eq!(back["ID"], 10);
        assert_eq!(back["ImageURL"], "https://cdn.example/portal.jpg");
    }

    #[test]
    fn demoted_record_keeps_only_id_and_name() {
        let record = CatalogRecord {
            id: 7,
            name: "Half Done".into(),
            developer: "Someone".into(),
            ..Default::default()
        };
        let invalid = record.to_invalid();
        assert_eq!(invalid, InvalidRecord { id: 7, name: "Half Done".into() });
        let json = serde_json::to_value(&invalid).expect("encode");
        assert_eq!(json, serde_json::json!({"ID": 7, "Name": "Half Done"}));
    }

    #[test]
    fn placeholder_marks_invalid_game() {
        assert_eq!(InvalidRecord::placeholder(3).name, INVALID_GAME_NAME);
    }
}
