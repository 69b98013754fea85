use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

// ---------------------------------------------------------------------------
// SiteConfig — per-origin selectors, endpoint and field names
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("no site configuration for origin {0}")]
    Unsupported(String),

    #[error("invalid balance pattern {pattern:?}: {reason}")]
    BalancePattern { pattern: String, reason: String },

    #[error("invalid site url {url:?}: {reason}")]
    Url { url: String, reason: String },
}

/// Everything the core needs to know about one site's markup and backend.
///
/// The defaults describe the WP-Manga ("Madara") theme that both built-in sites
/// run; only the listing root differs between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Scheme + host, e.g. `https://hiraethtranslation.com`.
    pub origin: String,
    /// Root under which chapters are listed and DOM changes are observed.
    pub chapter_list_selector: String,
    /// Where the "unlock all" control is mounted.
    pub button_mount_selector: String,
    pub balance_selector: String,
    /// Must contain one capture group around the number.
    pub balance_pattern: String,
    /// Page fetched to refresh the authoritative balance.
    pub balance_page_path: String,
    pub chapter_selector: String,
    pub coin_selector: String,
    pub nonce_selector: String,
    pub unlock_endpoint: String,
    pub unlock_action: String,
    /// Class name (not a selector) marking a chapter as locked.
    pub locked_class: String,
    /// Class token prefix carrying the numeric chapter id.
    pub chapter_id_prefix: String,
    /// Class added to instrumented coins.
    pub purchase_affordance_class: String,
    pub cost_class_prefix: String,
    pub cost_data_attribute: String,
    /// Icon class of a locked chapter link, swapped for `unlocked_icon_class`.
    pub lock_icon_class: String,
    pub unlocked_icon_class: String,
    /// Relative path (against the listing URL) of the lazily loaded chapter list.
    pub chapters_ajax_path: Option<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            origin: String::new(),
            chapter_list_selector: ".page-content-listing.single-page".to_string(),
            button_mount_selector: "#init-links".to_string(),
            balance_selector: ".c-user_menu li:first-child a".to_string(),
            balance_pattern: r"Balance:\s*(\d+)".to_string(),
            balance_page_path: "/".to_string(),
            chapter_selector: ".wp-manga-chapter".to_string(),
            coin_selector: ".coin".to_string(),
            nonce_selector: r#"input[name="wp-manga-coin-nonce"]"#.to_string(),
            unlock_endpoint: "/wp-admin/admin-ajax.php".to_string(),
            unlock_action: "wp_manga_buy_chapter".to_string(),
            locked_class: "premium-block".to_string(),
            chapter_id_prefix: "data-chapter-".to_string(),
            purchase_affordance_class: "c-btn-custom-1".to_string(),
            cost_class_prefix: "coin-".to_string(),
            cost_data_attribute: "data-coin".to_string(),
            lock_icon_class: "fa-lock".to_string(),
            unlocked_icon_class: "fa-lock-open".to_string(),
            chapters_ajax_path: Some("ajax/chapters/".to_string()),
        }
    }
}

impl SiteConfig {
    /// Madara defaults for `origin`, listing chapters under `chapter_list_selector`.
    pub fn madara(origin: &str, chapter_list_selector: &str) -> Self {
        Self {
            origin: origin.trim_end_matches('/').to_string(),
            chapter_list_selector: chapter_list_selector.to_string(),
            ..Self::default()
        }
    }

    /// Selector matching the coin of every locked chapter.
    pub fn locked_coin_selector(&self) -> String {
        format!(".{} {}", self.locked_class, self.coin_selector)
    }

    pub fn balance_regex(&self) -> Result<Regex, SiteError> {
        Regex::new(&self.balance_pattern).map_err(|e| SiteError::BalancePattern {
            pattern: self.balance_pattern.clone(),
            reason: e.to_string(),
        })
    }

    fn join(&self, path: &str) -> Result<Url, SiteError> {
        let base = Url::parse(&self.origin).map_err(|e| SiteError::Url {
            url: self.origin.clone(),
            reason: e.to_string(),
        })?;
        base.join(path).map_err(|e| SiteError::Url {
            url: path.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn unlock_url(&self) -> Result<Url, SiteError> {
        self.join(&self.unlock_endpoint)
    }

    pub fn balance_page_url(&self) -> Result<Url, SiteError> {
        self.join(&self.balance_page_path)
    }

    /// Bare host of the origin, used to key user preferences.
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.origin)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
    }
}

/// Normalized `scheme://host[:port]` form used as the registry key.
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

// ---------------------------------------------------------------------------
// SiteRegistry — origin → config lookup, loaded once
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    sites: HashMap<String, Arc<SiteConfig>>,
}

impl SiteRegistry {
    /// The sites the tool supports out of the box.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.insert(SiteConfig::madara(
            "https://darkstartranslations.com",
            "#manga-chapters-holder",
        ));
        registry.insert(SiteConfig::madara(
            "https://hiraethtranslation.com",
            ".page-content-listing.single-page",
        ));
        registry
    }

    /// Add or replace entries (e.g. from `ezy-coin.json`).
    pub fn with_overrides(mut self, extra: impl IntoIterator<Item = SiteConfig>) -> Self {
        for site in extra {
            self.insert(site);
        }
        self
    }

    fn insert(&mut self, mut site: SiteConfig) {
        site.origin = site.origin.trim_end_matches('/').to_string();
        let key = Url::parse(&site.origin)
            .map(|u| origin_of(&u))
            .unwrap_or_else(|_| site.origin.clone());
        self.sites.insert(key, Arc::new(site));
    }

    pub fn lookup(&self, origin: &str) -> Option<Arc<SiteConfig>> {
        self.sites.get(origin.trim_end_matches('/')).cloned()
    }

    pub fn lookup_url(&self, url: &Url) -> Result<Arc<SiteConfig>, SiteError> {
        let origin = origin_of(url);
        self.lookup(&origin).ok_or(SiteError::Unsupported(origin))
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}
