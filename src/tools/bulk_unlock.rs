use crate::core::session::Session;
use crate::core::types::{BulkReport, NodeId};
use crate::tools::batch::{self, BatchError};
use crate::tools::prompt::Prompter;
use crate::tools::unlock::{settle_attempt, try_unlock, UnlockContext};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub const INSUFFICIENT_BALANCE_MESSAGE: &str = "Balance is not enough to unlock all chapters!";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "report", rename_all = "snake_case")]
pub enum BulkOutcome {
    NothingLocked,
    InsufficientBalance,
    Declined,
    Completed(BulkReport),
}

/// Unlock every locked chapter on the page after the user confirms.
///
/// Nothing is sent unless the refreshed balance covers the total and the user
/// says yes. Items go out in reverse DOM order through the batch runner at the
/// session's concurrency limit; failed items are flashed and skipped.
pub async fn unlock_all(
    session: &Arc<Session>,
    prompter: &dyn Prompter,
) -> Result<BulkOutcome, BatchError> {
    let total = session.total_cost();
    if !session.balance().check_sufficiency(total).await {
        prompter.alert(INSUFFICIENT_BALANCE_MESSAGE).await;
        return Ok(BulkOutcome::InsufficientBalance);
    }
    if total == 0 {
        return Ok(BulkOutcome::NothingLocked);
    }

    let remaining = session.balance().current().await.saturating_sub(total);
    let question = format!(
        "You are about to spend {} coins to unlock all chapters (balance after: {}). Do you want to proceed?",
        total, remaining
    );
    if !prompter.confirm(&question).await {
        info!("Unlock all declined");
        return Ok(BulkOutcome::Declined);
    }

    let nodes: Vec<NodeId> = session
        .document()
        .locked_items()
        .into_iter()
        .rev()
        .map(|item| item.node)
        .collect();

    session.document().set_unlock_all_busy(true);
    let report = unlock_nodes(session, nodes).await;
    session.document().set_unlock_all_busy(false);
    let report = report?;

    if report.failed > 0 {
        warn!(
            "Unlock all finished with {} of {} chapters failed",
            report.failed, report.requested
        );
    }
    Ok(BulkOutcome::Completed(report))
}

/// Run the single-item flow for each node through the batch runner.
pub async fn unlock_nodes(
    session: &Arc<Session>,
    nodes: Vec<NodeId>,
) -> Result<BulkReport, BatchError> {
    let start_time = Instant::now();
    let limit = session.settings().concurrency_limit;
    let requested = nodes.len();
    info!("Unlocking {} chapters (concurrency: {})", requested, limit);

    let tasks = nodes.into_iter().map(|node| {
        let session = Arc::clone(session);
        async move {
            let attempt = try_unlock(&session, node, UnlockContext::Listing).await;
            settle_attempt(&session, node, attempt)
                .ok_or_else(|| anyhow::anyhow!("chapter node {} was not unlocked", node))
        }
    });
    let outcomes = batch::run(limit, tasks).await?;

    let receipts: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().ok()).collect();
    let report = BulkReport {
        requested,
        unlocked: receipts.len(),
        failed: requested - receipts.len(),
        total_cost: receipts.iter().map(|r| r.cost).sum(),
        duration_ms: start_time.elapsed().as_millis() as u64,
        finished_at: chrono::Utc::now(),
    };
    info!(
        "Unlock completed: {}/{} unlocked, {} coins spent, {}ms total",
        report.unlocked, report.requested, report.total_cost, report.duration_ms
    );
    Ok(report)
}

/// Unlock freshly listed chapters in the background, without confirmation.
///
/// Skipped entirely when the refreshed balance does not cover their summed cost.
pub fn spawn_auto_unlock(session: &Arc<Session>, nodes: Vec<NodeId>) -> JoinHandle<()> {
    let session = Arc::clone(session);
    tokio::spawn(async move {
        let cost: u64 = nodes
            .iter()
            .filter_map(|node| session.document().item_cost(*node))
            .sum();
        if !session.balance().check_sufficiency(cost).await {
            warn!(
                "Auto-unlock skipped: balance does not cover {} coins for {} chapters",
                cost,
                nodes.len()
            );
            return;
        }
        if let Err(e) = unlock_nodes(&session, nodes).await {
            error!("Auto-unlock failed: {}", e);
        }
    })
}
