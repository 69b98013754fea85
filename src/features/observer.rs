use crate::core::session::Session;
use crate::features::scanner;
use crate::scraping::document::DomChange;
use crate::tools::bulk_unlock;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Debounced rescans driven by structural page changes.
///
/// Holds only a weak reference to its session; dropping the observer (or the
/// session) stops the task.
#[derive(Debug)]
pub struct ChangeObserver {
    task: JoinHandle<()>,
}

impl ChangeObserver {
    pub fn observe(session: &Arc<Session>) -> Self {
        let changes = session.document().subscribe();
        let debounce = session.settings().rescan_debounce;
        let task = tokio::spawn(run(Arc::downgrade(session), changes, debounce));
        Self { task }
    }

    pub fn is_connected(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn disconnect(&self) {
        self.task.abort();
    }
}

impl Drop for ChangeObserver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Wait for the next added/removed-nodes notification. `false` once the page is gone.
async fn next_structural(changes: &mut broadcast::Receiver<DomChange>) -> bool {
    loop {
        match changes.recv().await {
            Ok(change) if change.is_structural() => return true,
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                debug!("observer lagged by {} notifications", skipped);
                return true;
            }
            Err(RecvError::Closed) => return false,
        }
    }
}

/// Let churn settle: returns once `quiet` passes without another structural change.
async fn settle(changes: &mut broadcast::Receiver<DomChange>, quiet: Duration) -> bool {
    let mut deadline = Instant::now() + quiet;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return true,
            received = changes.recv() => match received {
                Ok(change) if change.is_structural() => deadline = Instant::now() + quiet,
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => deadline = Instant::now() + quiet,
                Err(RecvError::Closed) => return false,
            },
        }
    }
}

async fn run(session: Weak<Session>, mut changes: broadcast::Receiver<DomChange>, quiet: Duration) {
    while next_structural(&mut changes).await {
        if !settle(&mut changes, quiet).await {
            break;
        }
        let Some(session) = session.upgrade() else {
            break;
        };
        let report = scanner::scan(&session);
        if session.auto_unlock() && !report.newly_instrumented.is_empty() {
            info!(
                "Auto-unlock: {} newly listed chapters",
                report.newly_instrumented.len()
            );
            bulk_unlock::spawn_auto_unlock(&session, report.newly_instrumented);
        }
    }
    debug!("change observer stopped");
}
