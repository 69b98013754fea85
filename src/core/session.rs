use crate::backend::CoinBackend;
use crate::core::config::SessionSettings;
use crate::core::site::{SiteConfig, SiteError};
use crate::features::balance::BalanceTracker;
use crate::features::observer::ChangeObserver;
use crate::features::processing::ProcessingSet;
use crate::features::scanner;
use crate::scraping::document::{Document, PageError};
use crate::tools::bulk_unlock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not running on a chapter page: {0}")]
    ChapterPage(String),

    #[error("balance not found (maybe not logged in?)")]
    NotLoggedIn,

    #[error(transparent)]
    Page(#[from] PageError),

    #[error(transparent)]
    Site(#[from] SiteError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    pub settings: SessionSettings,
    pub auto_unlock: bool,
}

/// Everything one listing page's unlock flows share, from page load to teardown.
pub struct Session {
    pub id: Uuid,
    site: Arc<SiteConfig>,
    settings: SessionSettings,
    document: Arc<Document>,
    backend: Arc<dyn CoinBackend>,
    balance: BalanceTracker,
    processing: Arc<ProcessingSet>,
    total_cost: AtomicU64,
    auto_unlock: AtomicBool,
    observer: Mutex<Option<ChangeObserver>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("origin", &self.site.origin)
            .field("total_cost", &self.total_cost())
            .field("processing", &self.processing.len())
            .field("auto_unlock", &self.auto_unlock())
            .finish()
    }
}

impl Session {
    /// Set up a session for a listing page and start observing it.
    ///
    /// Must run inside a tokio runtime: the change observer is a spawned task.
    pub async fn start(
        page_url: &Url,
        document: Arc<Document>,
        backend: Arc<dyn CoinBackend>,
        options: SessionOptions,
    ) -> Result<Arc<Self>, SessionError> {
        if page_url.path().contains("/chapter") {
            info!("Script is not running on a chapter page");
            return Err(SessionError::ChapterPage(page_url.to_string()));
        }

        let site = Arc::clone(document.site());
        let pattern = site.balance_regex()?;
        let initial = match BalanceTracker::read_from_page(&document, &pattern) {
            Some(balance) if balance > 0 => balance,
            _ => {
                error!("Balance not found (Maybe not logged in?), stopping");
                return Err(SessionError::NotLoggedIn);
            }
        };

        if !document.has_list_root() {
            error!("Target div not found: {}", site.chapter_list_selector);
            return Err(PageError::ListRootMissing(site.chapter_list_selector.clone()).into());
        }

        if !document.mount_unlock_all() {
            warn!("Target element for button not found: {}", site.button_mount_selector);
        }

        let balance = BalanceTracker::new(
            initial,
            Arc::clone(&backend),
            Arc::clone(&document),
            pattern,
            options.settings.balance_timeout,
        );

        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            site,
            settings: options.settings,
            document,
            backend,
            balance,
            processing: ProcessingSet::new(),
            total_cost: AtomicU64::new(0),
            auto_unlock: AtomicBool::new(options.auto_unlock),
            observer: Mutex::new(None),
        });
        info!(
            "Session {} started on {} with balance {}",
            session.id, page_url, initial
        );

        let report = scanner::scan(&session);
        *session.observer_slot() = Some(ChangeObserver::observe(&session));

        if session.auto_unlock() && !report.newly_instrumented.is_empty() {
            bulk_unlock::spawn_auto_unlock(&session, report.newly_instrumented);
        }

        Ok(session)
    }

    fn observer_slot(&self) -> std::sync::MutexGuard<'_, Option<ChangeObserver>> {
        self.observer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn site(&self) -> &Arc<SiteConfig> {
        &self.site
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn backend(&self) -> &Arc<dyn CoinBackend> {
        &self.backend
    }

    pub fn balance(&self) -> &BalanceTracker {
        &self.balance
    }

    pub fn processing(&self) -> &Arc<ProcessingSet> {
        &self.processing
    }

    /// Sum of all currently locked item costs, as of the last scan.
    pub fn total_cost(&self) -> u64 {
        self.total_cost.load(Ordering::SeqCst)
    }

    pub(crate) fn set_total_cost(&self, total: u64) {
        self.total_cost.store(total, Ordering::SeqCst);
    }

    pub fn auto_unlock(&self) -> bool {
        self.auto_unlock.load(Ordering::SeqCst)
    }

    pub fn set_auto_unlock(&self, enabled: bool) {
        self.auto_unlock.store(enabled, Ordering::SeqCst);
    }

    pub fn is_observing(&self) -> bool {
        self.observer_slot()
            .as_ref()
            .is_some_and(|o| o.is_connected())
    }

    /// Stop observing the page. In-flight unlocks run to completion.
    pub fn shutdown(&self) {
        if let Some(observer) = self.observer_slot().take() {
            observer.disconnect();
            info!("Session {} shut down", self.id);
        }
    }
}
