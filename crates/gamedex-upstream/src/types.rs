//! Typed responses of the store detail, app list and popularity endpoints.

use std::collections::HashMap;
use std::fmt;

use gamedex_core::AppId;
use serde::de::{IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Deserialize)]
pub struct AppListResponse {
    pub applist: AppList,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppList {
    #[serde(default)]
    pub apps: Vec<AppListEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppListEntry {
    pub appid: AppId,
    #[serde(default)]
    pub name: String,
}

/// Body of the detail endpoint: `{"<appid>": {"success": bool, "data": {...}}}`.
/// Some unknown IDs answer with a bare `null`.
pub type AppDetailsResponse = Option<HashMap<String, AppDetailsEnvelope>>;

#[derive(Debug, Clone, Deserialize)]
pub struct AppDetailsEnvelope {
    #[serde(default)]
    pub success: bool,
    pub data: Option<AppDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppDetail {
    pub name: Option<String>,
    #[serde(default)]
    pub is_free: bool,
    pub header_image: Option<String>,
    pub developers: Option<Vec<String>>,
    pub publishers: Option<Vec<String>>,
    pub price_overview: Option<PriceOverview>,
    pub release_date: Option<ReleaseInfo>,
    #[serde(default)]
    pub packages: Vec<serde_json::Value>,
    pub supported_languages: Option<String>,
    pub short_description: Option<String>,
    pub platforms: Option<PlatformFlags>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PriceOverview {
    pub final_formatted: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReleaseInfo {
    #[serde(default)]
    pub coming_soon: bool,
    #[serde(default)]
    pub date: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PlatformFlags {
    #[serde(default)]
    pub windows: bool,
    #[serde(default)]
    pub mac: bool,
    #[serde(default)]
    pub linux: bool,
}

impl PlatformFlags {
    pub fn available(&self) -> Vec<&'static str> {
        [("windows", self.windows), ("mac", self.mac), ("linux", self.linux)]
            .into_iter()
            .filter_map(|(name, on)| on.then_some(name))
            .collect()
    }
}

/// Review counts, peak players and tag weights from the popularity source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Popularity {
    #[serde(default)]
    pub positive: u64,
    #[serde(default)]
    pub negative: u64,
    #[serde(default, rename = "ccu")]
    pub peak_concurrent: u64,
    #[serde(default, deserialize_with = "tag_weights")]
    pub tags: Vec<(String, u64)>,
}

/// Tags arrive as a `{name: weight}` object, or as `[]` when the app has none.
/// Document order is kept so equal weights rank in source order.
fn tag_weights<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<(String, u64)>, D::Error> {
    struct TagsVisitor;

    impl<'de> Visitor<'de> for TagsVisitor {
        type Value = Vec<(String, u64)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a tag-to-weight object or an empty list")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry::<String, u64>()? {
                out.push(entry);
            }
            Ok(out)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            while seq.next_element::<IgnoredAny>()?.is_some() {}
            Ok(Vec::new())
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }
    }

    deserializer.deserialize_any(TagsVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn popularity_accepts_object_or_empty_list_tags() {
        let with_tags: Popularity = serde_json::from_str(
            r#"{"appid": 1, "positive": 5, "negative": 1, "ccu": 3, "tags": {"RPG": 10, "Indie": 4}}"#,
        )
        .expect("object tags");
        assert_eq!(with_tags.peak_concurrent, 3);
        assert_eq!(with_tags.tags, vec![("RPG".into(), 10), ("Indie".into(), 4)]);

        let without: Popularity = serde_json::from_str(r#"{"appid": 2, "tags": []}"#).expect("list tags");
        assert!(without.tags.is_empty());
        assert_eq!(without.positive, 0);
    }

    #[test]
    fn platform_flags_list_in_fixed_order() {
        let flags = PlatformFlags {
            windows: true,
            mac: false,
            linux: true,
        };
        assert_eq!(flags.available(), vec!["windows", "linux"]);
    }
}
