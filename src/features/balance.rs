//! Spendable coin balance.
//!
//! One value per session, mirrored into the page's balance display. All
//! read-modify-write sequences go through a `tokio::sync::Mutex`, so concurrent
//! unlock completions debit one after another.

use crate::backend::CoinBackend;
use crate::scraping::document::Document;
use crate::scraping::parse::extract_balance;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BalanceError {
    #[error("invalid debit amount {0}")]
    InvalidDebit(i64),
}

pub struct BalanceTracker {
    value: Mutex<u64>,
    backend: Arc<dyn CoinBackend>,
    document: Arc<Document>,
    pattern: Regex,
    timeout: Duration,
}

impl std::fmt::Debug for BalanceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceTracker")
            .field("pattern", &self.pattern.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BalanceTracker {
    pub fn new(
        initial: u64,
        backend: Arc<dyn CoinBackend>,
        document: Arc<Document>,
        pattern: Regex,
        timeout: Duration,
    ) -> Self {
        Self {
            value: Mutex::new(initial),
            backend,
            document,
            pattern,
            timeout,
        }
    }

    /// Balance shown in the page's own balance display, if any.
    pub fn read_from_page(document: &Document, pattern: &Regex) -> Option<u64> {
        let text = document.balance_display()?;
        let balance = extract_balance(&text, pattern);
        if balance.is_none() {
            error!("Balance element found but unreadable: {:?}", text);
        }
        balance
    }

    pub async fn current(&self) -> u64 {
        *self.value.lock().await
    }

    /// Re-read the balance from the remote balance page.
    ///
    /// `None` on timeout, transport failure or a page without the balance label.
    /// A successful read replaces the local value.
    pub async fn refresh_balance(&self) -> Option<u64> {
        let fetched = match tokio::time::timeout(self.timeout, self.backend.fetch_balance(&self.pattern)).await {
            Ok(Ok(Some(balance))) => balance,
            Ok(Ok(None)) => {
                warn!("Balance label not found on balance page (maybe not logged in?)");
                return None;
            }
            Ok(Err(e)) => {
                warn!("Balance refresh failed: {}", e);
                return None;
            }
            Err(_) => {
                warn!("Balance refresh timed out after {}ms", self.timeout.as_millis());
                return None;
            }
        };

        let mut value = self.value.lock().await;
        *value = fetched;
        self.document.set_balance_display(fetched);
        Some(fetched)
    }

    /// Whether a fresh balance covers `cost`. Never true when the refresh fails.
    pub async fn check_sufficiency(&self, cost: u64) -> bool {
        match self.refresh_balance().await {
            Some(balance) if balance >= cost => true,
            Some(balance) => {
                error!("Balance {} is not enough for a cost of {}", balance, cost);
                false
            }
            None => false,
        }
    }

    /// Subtract `amount`, clamping at zero, and mirror the result into the page.
    pub async fn apply_debit(&self, amount: i64) -> Result<u64, BalanceError> {
        let amount = match u64::try_from(amount) {
            Ok(a) => a,
            Err(_) => {
                error!("Rejected debit of {} coins", amount);
                return Err(BalanceError::InvalidDebit(amount));
            }
        };

        let mut value = self.value.lock().await;
        *value = value.saturating_sub(amount);
        if !self.document.set_balance_display(*value) {
            warn!("Balance display missing; local balance is {}", *value);
        }
        info!("Debited {} coins, balance now {}", amount, *value);
        Ok(*value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{MockBackend, Reply};
    use crate::core::site::SiteConfig;

    const PAGE: &str = r#"<html><body>
        <ul class="c-user_menu"><li><a>Balance: 20</a></li></ul>
        <div id="list"></div></body></html>"#;

    fn tracker(remote: Option<u64>) -> (BalanceTracker, Arc<Document>, Arc<MockBackend>) {
        let site = Arc::new(SiteConfig::madara("https://x", "#list"));
        let document = Arc::new(Document::parse(PAGE, Arc::clone(&site)).unwrap());
        let backend = Arc::new(MockBackend::new(remote, Reply::Purchased));
        let pattern = site.balance_regex().unwrap();
        let initial = BalanceTracker::read_from_page(&document, &pattern).unwrap();
        let tracker = BalanceTracker::new(
            initial,
            backend.clone(),
            Arc::clone(&document),
            pattern,
            Duration::from_secs(10),
        );
        (tracker, document, backend)
    }

    #[tokio::test]
    async fn initial_balance_comes_from_page() {
        let (tracker, _, _) = tracker(Some(20));
        assert_eq!(tracker.current().await, 20);
    }

    #[tokio::test]
    async fn debit_clamps_at_zero_and_updates_display() {
        let (tracker, document, _) = tracker(None);
        assert_eq!(tracker.apply_debit(15).await, Ok(5));
        assert_eq!(tracker.apply_debit(15).await, Ok(0));
        assert_eq!(document.balance_display().as_deref(), Some("Balance: 0"));
    }

    #[tokio::test]
    async fn invalid_debit_leaves_balance_untouched() {
        let (tracker, _, _) = tracker(None);
        assert_eq!(tracker.apply_debit(-3).await, Err(BalanceError::InvalidDebit(-3)));
        assert_eq!(tracker.current().await, 20);
    }

    #[tokio::test]
    async fn concurrent_debits_serialize() {
        let (tracker, _, _) = tracker(None);
        let tracker = Arc::new(tracker);
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let t = Arc::clone(&tracker);
                tokio::spawn(async move { t.apply_debit(3).await })
            })
            .collect();
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }
        assert_eq!(tracker.current().await, 0);
    }

    #[tokio::test]
    async fn sufficiency_uses_refreshed_balance() {
        let (tracker, document, backend) = tracker(Some(8));
        assert!(tracker.check_sufficiency(8).await);
        assert!(!tracker.check_sufficiency(9).await);
        assert_eq!(tracker.current().await, 8);
        assert_eq!(document.balance_display().as_deref(), Some("Balance: 8"));
        assert_eq!(
            backend.balance_fetches.load(std::sync::atomic::Ordering::SeqCst),
            2
        );
    }

    #[tokio::test]
    async fn failed_refresh_is_never_sufficient() {
        let (tracker, _, _) = tracker(None);
        assert_eq!(tracker.refresh_balance().await, None);
        assert!(!tracker.check_sufficiency(0).await);
        assert_eq!(tracker.current().await, 20);
    }
}
