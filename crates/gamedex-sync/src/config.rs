use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use gamedex_core::UserId;
use gamedex_storage::{Backoff, FetchError, HttpClientConfig, HttpFetcher, RetryPolicy};
use gamedex_upstream::{SteamClient, SteamEndpoints};

#[derive(Debug, Clone)]
pub struct GamedexConfig {
    pub data_dir: PathBuf,
    pub wishlist_dir: PathBuf,
    pub steam_api_key: Option<String>,
    pub region: String,
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub operator_id: Option<UserId>,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub web_port: u16,
    pub endpoints: SteamEndpoints,
}

impl GamedexConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = SteamEndpoints::default();
        Self {
            data_dir: lookup("GAMEDEX_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            wishlist_dir: lookup("GAMEDEX_WISHLIST_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/wishlists")),
            steam_api_key: lookup("STEAM_API_KEY").filter(|k| !k.trim().is_empty()),
            region: lookup("GAMEDEX_REGION").unwrap_or_else(|| "US".to_string()),
            workers: parsed(&lookup, "GAMEDEX_WORKERS").filter(|n: &usize| *n > 0).unwrap_or(2),
            max_attempts: parsed(&lookup, "GAMEDEX_MAX_ATTEMPTS").filter(|n: &u32| *n > 0).unwrap_or(10),
            retry_delay_ms: parsed(&lookup, "GAMEDEX_RETRY_DELAY_MS").unwrap_or(5_000),
            http_timeout_secs: parsed(&lookup, "GAMEDEX_HTTP_TIMEOUT_SECS").unwrap_or(20),
            user_agent: lookup("GAMEDEX_USER_AGENT").unwrap_or_else(|| "gamedex-bot/0.1".to_string()),
            operator_id: parsed(&lookup, "GAMEDEX_OPERATOR_ID"),
            scheduler_enabled: lookup("GAMEDEX_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: lookup("GAMEDEX_SYNC_CRON").unwrap_or_else(|| "0 0 6 * * *".to_string()),
            web_port: parsed(&lookup, "GAMEDEX_WEB_PORT").unwrap_or(8000),
            endpoints: SteamEndpoints {
                store_base: lookup("GAMEDEX_STORE_BASE_URL").unwrap_or(defaults.store_base),
                applist_base: lookup("GAMEDEX_APPLIST_BASE_URL").unwrap_or(defaults.applist_base),
                steamspy_base: lookup("GAMEDEX_STEAMSPY_BASE_URL").unwrap_or(defaults.steamspy_base),
            },
        }
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                backoff: Backoff::Fixed(Duration::from_millis(self.retry_delay_ms)),
                ..Default::default()
            },
        }
    }

    pub fn steam_client(&self) -> Result<SteamClient, FetchError> {
        let http = HttpFetcher::new(self.http_config())?;
        let client = SteamClient::new(http, self.endpoints.clone(), self.region.clone());
        Ok(match &self.steam_api_key {
            Some(key) => client.with_api_key(key.clone()),
            None => client,
        })
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> GamedexConfig {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        GamedexConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_design_values() {
        let cfg = config(&[]);
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.max_attempts, 10);
        assert_eq!(cfg.region, "US");
        assert_eq!(cfg.operator_id, None);
        assert!(!cfg.scheduler_enabled);
        assert_eq!(cfg.web_port, 8000);
        assert_eq!(cfg.endpoints.store_base, "https://store.steampowered.com");

        let http = cfg.http_config();
        assert_eq!(http.retry.backoff, Backoff::Fixed(Duration::from_secs(5)));
        assert_eq!(http.timeout, Duration::from_secs(20));
    }

    #[test]
    fn overrides_and_bad_values() {
        let cfg = config(&[
            ("GAMEDEX_WORKERS", "0"),
            ("GAMEDEX_MAX_ATTEMPTS", "3"),
            ("GAMEDEX_OPERATOR_ID", "-100123"),
            ("GAMEDEX_SCHEDULER_ENABLED", "true"),
            ("GAMEDEX_WEB_PORT", "not-a-port"),
            ("STEAM_API_KEY", "  "),
            ("GAMEDEX_STEAMSPY_BASE_URL", "http://127.0.0.1:9999"),
        ]);
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.operator_id, Some(-100123));
        assert!(cfg.scheduler_enabled);
        assert_eq!(cfg.web_port, 8000);
        assert_eq!(cfg.steam_api_key, None);
        assert_eq!(cfg.endpoints.steamspy_base, "http://127.0.0.1:9999");
    }

    #[test]
    fn numeric_settings_parse_into_their_own_types() {
        let cfg = config(&[
            ("GAMEDEX_WORKERS", " 8 "),
            ("GAMEDEX_MAX_ATTEMPTS", "4"),
            ("GAMEDEX_RETRY_DELAY_MS", "250"),
            ("GAMEDEX_HTTP_TIMEOUT_SECS", "3"),
            ("GAMEDEX_WEB_PORT", "9090"),
            ("GAMEDEX_OPERATOR_ID", "42"),
        ]);
        assert_eq!(cfg.workers, 8);
        assert_eq!(cfg.max_attempts, 4);
        assert_eq!(cfg.retry_delay_ms, 250);
        assert_eq!(cfg.http_timeout_secs, 3);
        assert_eq!(cfg.web_port, 9090);
        assert_eq!(cfg.operator_id, Some(42));
        assert_eq!(cfg.http_config().retry.backoff, Backoff::Fixed(Duration::from_millis(250)));
        assert_eq!(config(&[("GAMEDEX_WEB_PORT", "70000")]).web_port, 8000);
    }
}
