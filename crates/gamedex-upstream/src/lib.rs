//! Upstream catalog sources behind one interface, plus record validation.

pub mod types;
pub mod validate;

use std::collections::BTreeSet;

use async_trait::async_trait;
use gamedex_core::AppId;
use gamedex_storage::{FetchError, HttpFetcher};
use reqwest::Url;
use thiserror::Error;
use tracing::debug;

pub use types::{AppDetail, Popularity};
pub use validate::classify;

pub const CRATE_NAME: &str = "gamedex-upstream";

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream unavailable after {attempts} attempts (last status {status:?})")]
    Unavailable { attempts: u32, status: Option<u16> },
    #[error("transport error: {0}")]
    Transport(#[source] FetchError),
    #[error("malformed upstream response: {0}")]
    Decode(String),
    #[error("invalid upstream url: {0}")]
    Url(String),
}

impl UpstreamError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, UpstreamError::Unavailable { status: Some(429), .. })
    }
}

impl From<FetchError> for UpstreamError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Unavailable { attempts, ref last, .. } => UpstreamError::Unavailable {
                attempts,
                status: last.status(),
            },
            FetchError::Decode { .. } | FetchError::EmptyBody { .. } => UpstreamError::Decode(err.to_string()),
            other => UpstreamError::Transport(other),
        }
    }
}

#[derive(Debug, Clone)]
pub enum DetailLookup {
    Found(Box<AppDetail>),
    /// The store answered but reported the app as unsuccessful or absent.
    NotFound,
}

/// Read-only access to the catalog detail source and the popularity source.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch_detail(&self, id: AppId) -> Result<DetailLookup, UpstreamError>;

    async fn fetch_popularity(&self, id: AppId) -> Result<Popularity, UpstreamError>;

    /// Every app ID currently listed by the store.
    async fn fetch_id_universe(&self) -> Result<BTreeSet<AppId>, UpstreamError>;
}

#[derive(Debug, Clone)]
pub struct SteamEndpoints {
    pub store_base: String,
    pub applist_base: String,
    pub steamspy_base: String,
}

impl Default for SteamEndpoints {
    fn default() -> Self {
        Self {
            store_base: "https://store.steampowered.com".to_string(),
            applist_base: "https://api.steampowered.com".to_string(),
            steamspy_base: "https://steamspy.com".to_string(),
        }
    }
}

/// Store detail + app list from Steam, popularity and tags from SteamSpy.
#[derive(Debug)]
pub struct SteamClient {
    http: HttpFetcher,
    endpoints: SteamEndpoints,
    api_key: Option<String>,
    region: String,
}

impl SteamClient {
    pub fn new(http: HttpFetcher, endpoints: SteamEndpoints, region: impl Into<String>) -> Self {
        Self {
            http,
            endpoints,
            api_key: None,
            region: region.into(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        self.api_key = (!key.trim().is_empty()).then_some(key);
        self
    }

    fn detail_url(&self, id: AppId) -> Result<Url, UpstreamError> {
        let mut params = vec![("appids", id.to_string()), ("cc", self.region.clone())];
        if let Some(key) = &self.api_key {
            params.push(("key", key.clone()));
        }
        Url::parse_with_params(
            &format!("{}/api/appdetails", self.endpoints.store_base.trim_end_matches('/')),
            &params,
        )
        .map_err(|e| UpstreamError::Url(e.to_string()))
    }

    fn popularity_url(&self, id: AppId) -> Result<Url, UpstreamError> {
        Url::parse_with_params(
            &format!("{}/api.php", self.endpoints.steamspy_base.trim_end_matches('/')),
            &[("request", "appdetails".to_string()), ("appid", id.to_string())],
        )
        .map_err(|e| UpstreamError::Url(e.to_string()))
    }

    fn applist_url(&self) -> Result<Url, UpstreamError> {
        Url::parse(&format!(
            "{}/ISteamApps/GetAppList/v2",
            self.endpoints.applist_base.trim_end_matches('/')
        ))
        .map_err(|e| UpstreamError::Url(e.to_string()))
    }
}

#[async_trait]
impl UpstreamClient for SteamClient {
    async fn fetch_detail(&self, id: AppId) -> Result<DetailLookup, UpstreamError> {
        let url = self.detail_url(id)?;
        let body: types::AppDetailsResponse = self.http.fetch_json(url.as_str()).await?;
        let envelope = body.and_then(|mut apps| apps.remove(&id.to_string()));
        match envelope {
            Some(types::AppDetailsEnvelope {
                success: true,
                data: Some(detail),
            }) => Ok(DetailLookup::Found(Box::new(detail))),
            _ => {
                debug!(app_id = id, "store reported app as unsuccessful");
                Ok(DetailLookup::NotFound)
            }
        }
    }

    async fn fetch_popularity(&self, id: AppId) -> Result<Popularity, UpstreamError> {
        let url = self.popularity_url(id)?;
        Ok(self.http.fetch_json(url.as_str()).await?)
    }

    async fn fetch_id_universe(&self) -> Result<BTreeSet<AppId>, UpstreamError> {
        let url = self.applist_url()?;
        let list: types::AppListResponse = self.http.fetch_json(url.as_str()).await?;
        Ok(list.applist.apps.into_iter().map(|app| app.appid).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamedex_storage::{Backoff, HttpClientConfig, RetryPolicy};
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, max_attempts: u32) -> SteamClient {
        let http = HttpFetcher::new(HttpClientConfig {
            retry: RetryPolicy {
                max_attempts,
                backoff: Backoff::Fixed(Duration::from_millis(1)),
                ..Default::default()
            },
            ..Default::default()
        })
        .expect("http");
        SteamClient::new(
            http,
            SteamEndpoints {
                store_base: server.uri(),
                applist_base: server.uri(),
                steamspy_base: server.uri(),
            },
            "US",
        )
        .with_api_key("secret")
    }

    #[tokio::test]
    async fn detail_found_and_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/appdetails"))
            .and(query_param("appids", "10"))
            .and(query_param("cc", "US"))
            .and(query_param("key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "10": {"success": true, "data": {"name": "Portal", "developers": ["Valve"], "publishers": ["Valve"]}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/appdetails"))
            .and(query_param("appids", "11"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"11": {"success": false}})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/appdetails"))
            .and(query_param("appids", "12"))
            .respond_with(ResponseTemplate::new(200).set_body_string("null"))
            .mount(&server)
            .await;

        let steam = client(&server, 1);
        match steam.fetch_detail(10).await.expect("found") {
            DetailLookup::Found(detail) => assert_eq!(detail.name.as_deref(), Some("Portal")),
            DetailLookup::NotFound => panic!("expected detail"),
        }
        assert!(matches!(steam.fetch_detail(11).await, Ok(DetailLookup::NotFound)));
        assert!(matches!(steam.fetch_detail(12).await, Ok(DetailLookup::NotFound)));
    }

    #[tokio::test]
    async fn popularity_and_universe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api.php"))
            .and(query_param("request", "appdetails"))
            .and(query_param("appid", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "appid": 10, "positive": 9000, "negative": 100, "ccu": 7, "tags": {"Puzzle": 3}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ISteamApps/GetAppList/v2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "applist": {"apps": [{"appid": 10, "name": "Portal"}, {"appid": 20, "name": ""}, {"appid": 10, "name": "Portal"}]}
            })))
            .mount(&server)
            .await;

        let steam = client(&server, 1);
        let popularity = steam.fetch_popularity(10).await.expect("popularity");
        assert_eq!(popularity.positive, 9000);
        assert_eq!(popularity.tags, vec![("Puzzle".to_string(), 3)]);
        assert_eq!(
            steam.fetch_id_universe().await.expect("universe"),
            BTreeSet::from([10, 20])
        );
    }

    #[tokio::test]
    async fn rate_limit_exhaustion_maps_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(2)
            .mount(&server)
            .await;

        let err = client(&server, 2).fetch_popularity(1).await.expect_err("429");
        assert!(matches!(err, UpstreamError::Unavailable { attempts: 2, status: Some(429) }));
        assert!(err.is_rate_limited());
    }
}
