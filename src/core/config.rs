use std::time::Duration;

use super::site::SiteConfig;

// ---------------------------------------------------------------------------
// EzyConfig — file-based config loader (ezy-coin.json) with env-var fallback
// ---------------------------------------------------------------------------

pub const ENV_CONFIG_PATH: &str = "EZY_COIN_CONFIG";
pub const ENV_CONCURRENCY: &str = "EZY_COIN_CONCURRENCY";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "EZY_COIN_REQUEST_TIMEOUT_SECS";
pub const ENV_BALANCE_TIMEOUT_SECS: &str = "EZY_COIN_BALANCE_TIMEOUT_SECS";
pub const ENV_DEBOUNCE_MS: &str = "EZY_COIN_DEBOUNCE_MS";
pub const ENV_FLASH_MS: &str = "EZY_COIN_FLASH_MS";
pub const ENV_COOKIE: &str = "EZY_COIN_COOKIE";

/// Top-level config loaded from `ezy-coin.json`.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct EzyConfig {
    /// Max unlocks in flight during a bulk unlock. `0` = unbounded. Default: 5.
    pub concurrency_limit: Option<i64>,
    /// Purchase request timeout. Default: 10s.
    pub request_timeout_secs: Option<u64>,
    /// Balance page fetch timeout. Default: 10s.
    pub balance_timeout_secs: Option<u64>,
    /// Quiet interval before a DOM change triggers a rescan. Default: 250ms.
    pub rescan_debounce_ms: Option<u64>,
    /// How long a failed coin stays highlighted. Default: 1000ms.
    pub flash_ms: Option<u64>,
    /// Extra or overriding site entries.
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl EzyConfig {
    /// Concurrency limit: JSON field → `EZY_COIN_CONCURRENCY` → 5.
    ///
    /// Negative values are passed through; the batch runner rejects them.
    pub fn resolve_concurrency_limit(&self) -> i64 {
        self.concurrency_limit
            .or_else(|| env_parse(ENV_CONCURRENCY))
            .unwrap_or(5)
    }

    /// Purchase timeout: JSON field → `EZY_COIN_REQUEST_TIMEOUT_SECS` → 10s.
    pub fn resolve_request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .or_else(|| env_parse(ENV_REQUEST_TIMEOUT_SECS))
                .unwrap_or(10),
        )
    }

    /// Balance fetch timeout: JSON field → `EZY_COIN_BALANCE_TIMEOUT_SECS` → 10s.
    pub fn resolve_balance_timeout(&self) -> Duration {
        Duration::from_secs(
            self.balance_timeout_secs
                .or_else(|| env_parse(ENV_BALANCE_TIMEOUT_SECS))
                .unwrap_or(10),
        )
    }

    /// Rescan debounce: JSON field → `EZY_COIN_DEBOUNCE_MS` → 250ms.
    pub fn resolve_debounce(&self) -> Duration {
        Duration::from_millis(
            self.rescan_debounce_ms
                .or_else(|| env_parse(ENV_DEBOUNCE_MS))
                .unwrap_or(250),
        )
    }

    /// Failure highlight: JSON field → `EZY_COIN_FLASH_MS` → 1000ms.
    pub fn resolve_flash(&self) -> Duration {
        Duration::from_millis(
            self.flash_ms
                .or_else(|| env_parse(ENV_FLASH_MS))
                .unwrap_or(1000),
        )
    }

    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            concurrency_limit: self.resolve_concurrency_limit(),
            request_timeout: self.resolve_request_timeout(),
            balance_timeout: self.resolve_balance_timeout(),
            rescan_debounce: self.resolve_debounce(),
            flash: self.resolve_flash(),
        }
    }
}

/// Resolved tunables a session runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub concurrency_limit: i64,
    pub request_timeout: Duration,
    pub balance_timeout: Duration,
    pub rescan_debounce: Duration,
    pub flash: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            request_timeout: Duration::from_secs(10),
            balance_timeout: Duration::from_secs(10),
            rescan_debounce: Duration::from_millis(250),
            flash: Duration::from_millis(1000),
        }
    }
}

/// Load `ezy-coin.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `EZY_COIN_CONFIG` env var path
/// 2. `./ezy-coin.json`
/// 3. `../ezy-coin.json`
///
/// Missing file → `EzyConfig::default()` (silent, all env-var fallbacks apply).
/// Parse error → log a warning, return `EzyConfig::default()`.
pub fn load_config() -> EzyConfig {
    let candidates: Vec<std::path::PathBuf> = {
        let mut v = vec![
            std::path::PathBuf::from("ezy-coin.json"),
            std::path::PathBuf::from("../ezy-coin.json"),
        ];
        if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
            v.insert(0, std::path::PathBuf::from(env_path));
        }
        v
    };

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => return parse_config(&contents, &path.display().to_string()),
            Err(_) => continue,
        }
    }

    EzyConfig::default()
}

fn parse_config(contents: &str, origin: &str) -> EzyConfig {
    match serde_json::from_str::<EzyConfig>(contents) {
        Ok(cfg) => {
            tracing::info!("ezy-coin.json loaded from {}", origin);
            cfg
        }
        Err(e) => {
            tracing::warn!("ezy-coin.json parse error at {}: {} — using defaults", origin, e);
            EzyConfig::default()
        }
    }
}

/// Session cookie used to authenticate against the site (`EZY_COIN_COOKIE`).
pub fn cookie_from_env() -> Option<String> {
    std::env::var(ENV_COOKIE)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
