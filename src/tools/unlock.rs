use crate::backend::BackendError;
use crate::core::session::Session;
use crate::core::types::{NodeId, PurchaseRequest, PurchaseResponse, UnlockReceipt};
use crate::features::scanner;
use crate::scraping::document::PageError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Where an unlock is triggered from. Listing-page unlocks rescan afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockContext {
    Listing,
    Standalone,
}

#[derive(Debug, Error)]
pub enum UnlockError {
    #[error("item {0} is already being unlocked")]
    AlreadyProcessing(NodeId),

    #[error("chapter element {0} not found")]
    MissingContainer(NodeId),

    #[error("item {0} is not locked or has no unlock handler")]
    AlreadyUnlocked(NodeId),

    #[error("chapter id not found on item {0}")]
    MissingIdentifier(NodeId),

    #[error("security nonce not found on page")]
    MissingNonce,

    #[error("coin cost of chapter {0} is unreadable")]
    UnreadableCost(String),

    #[error("purchase request timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("purchase rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Page(#[from] PageError),
}

/// Unlock one item; `true` only when the purchase went through.
///
/// Failures are logged and flashed on the item, never propagated.
pub async fn unlock(session: &Arc<Session>, node: NodeId, context: UnlockContext) -> bool {
    let attempt = try_unlock(session, node, context).await;
    settle_attempt(session, node, attempt).is_some()
}

/// Log the outcome of one attempt and flash the item when it failed.
pub(crate) fn settle_attempt(
    session: &Arc<Session>,
    node: NodeId,
    attempt: Result<UnlockReceipt, UnlockError>,
) -> Option<UnlockReceipt> {
    match attempt {
        Ok(receipt) => {
            info!(
                "Unlocked chapter {} for {} coins",
                receipt.chapter_id, receipt.cost
            );
            Some(receipt)
        }
        Err(UnlockError::AlreadyProcessing(_)) => {
            debug!("Coin is already being processed, ignoring");
            None
        }
        Err(UnlockError::AlreadyUnlocked(_)) => {
            debug!("Chapter (node {}) is already unlocked, ignoring", node);
            None
        }
        Err(e) => {
            warn!("Failed to buy chapter (node {}): {}", node, e);
            flash_failure(session, node);
            None
        }
    }
}

/// A user click on an item's coin.
///
/// Ignored while the item is in flight or when it has no unlock handler
/// (already unlocked). Checks the balance for this item before buying.
pub async fn click(session: &Arc<Session>, node: NodeId) -> bool {
    if session.processing().contains(node) {
        debug!("Coin is already being processed, ignoring click");
        return false;
    }
    let handler_attached = session
        .document()
        .chapter(node)
        .and_then(|c| c.coin)
        .is_some_and(|coin| coin.handler);
    if !handler_attached {
        debug!("No unlock handler on node {}, ignoring click", node);
        return false;
    }

    if let Some(cost) = session.document().item_cost(node) {
        if !session.balance().check_sufficiency(cost).await {
            flash_failure(session, node);
            return false;
        }
    }
    unlock(session, node, UnlockContext::Listing).await
}

/// Purchase request/response cycle for one item, committing the unlocked state on success.
///
/// The item is held in the processing set for the whole call, and released on
/// every return path.
pub async fn try_unlock(
    session: &Arc<Session>,
    node: NodeId,
    context: UnlockContext,
) -> Result<UnlockReceipt, UnlockError> {
    let _claim = session
        .processing()
        .try_claim(node)
        .ok_or(UnlockError::AlreadyProcessing(node))?;

    let document = session.document();
    let site = session.site();
    let chapter = document
        .chapter(node)
        .filter(|c| c.coin.is_some())
        .ok_or(UnlockError::MissingContainer(node))?;
    let handler_attached = chapter.coin.as_ref().is_some_and(|coin| coin.handler);
    if !chapter.is_locked(site) || !handler_attached {
        return Err(UnlockError::AlreadyUnlocked(node));
    }
    let chapter_id = chapter
        .chapter_id(site)
        .ok_or(UnlockError::MissingIdentifier(node))?;
    let nonce = document.nonce().ok_or(UnlockError::MissingNonce)?;
    let cost = chapter
        .cost(site)
        .ok_or_else(|| UnlockError::UnreadableCost(chapter_id.clone()))?;

    document.set_disabled(node, true)?;
    let request = PurchaseRequest {
        action: site.unlock_action.clone(),
        chapter: chapter_id.clone(),
        nonce,
    };

    let outcome = match purchase(session, &request).await {
        Ok(response) => commit(session, node, chapter_id, cost, &response, context).await,
        Err(e) => Err(e),
    };
    if outcome.is_err() {
        if let Err(e) = document.set_disabled(node, false) {
            debug!("could not re-enable coin: {}", e);
        }
    }
    outcome
}

async fn purchase(
    session: &Session,
    request: &PurchaseRequest,
) -> Result<PurchaseResponse, UnlockError> {
    let timeout = session.settings().request_timeout;
    let response = tokio::time::timeout(timeout, session.backend().purchase(request))
        .await
        .map_err(|_| UnlockError::Timeout(timeout))??;
    debug!("Purchase reply for chapter {}: {:?}", request.chapter, response);
    Ok(response)
}

async fn commit(
    session: &Arc<Session>,
    node: NodeId,
    chapter_id: String,
    cost: u64,
    response: &PurchaseResponse,
    context: UnlockContext,
) -> Result<UnlockReceipt, UnlockError> {
    if !response.is_purchased() {
        return Err(UnlockError::Rejected(
            response.message().unwrap_or("no message").to_string(),
        ));
    }

    // The remote purchase already happened; local bookkeeping failures only log.
    let debit = i64::try_from(cost).unwrap_or(i64::MAX);
    if let Err(e) = session.balance().apply_debit(debit).await {
        warn!(
            "Chapter {} unlocked but balance was not updated ({}); display may be stale",
            chapter_id, e
        );
    }
    if let Err(e) = session.document().mark_unlocked(node, response.url()) {
        warn!("Chapter {} unlocked but the page could not be updated: {}", chapter_id, e);
    }
    if context == UnlockContext::Listing {
        scanner::scan(session);
    }

    Ok(UnlockReceipt {
        node,
        chapter_id,
        cost,
        url: response.url().map(|u| u.to_string()),
    })
}

/// Highlight a failed item briefly.
pub fn flash_failure(session: &Arc<Session>, node: NodeId) {
    let document = Arc::clone(session.document());
    if document.set_flash(node, true).is_err() {
        return;
    }
    let flash = session.settings().flash;
    tokio::spawn(async move {
        tokio::time::sleep(flash).await;
        if let Err(e) = document.set_flash(node, false) {
            debug!("could not clear failure highlight: {}", e);
        }
    });
}
