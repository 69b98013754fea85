use crate::core::session::Session;
use crate::core::types::ScanReport;
use tracing::{info, warn};

/// Find every locked item, instrument the new ones, and recompute the total cost.
///
/// Instrumentation is idempotent: an item already seen keeps its single handler.
/// Items whose cost cannot be read count as 0 and are reported as anomalies.
pub fn scan(session: &Session) -> ScanReport {
    let document = session.document();
    let items = document.locked_items();

    let mut report = ScanReport {
        locked: items.len(),
        ..ScanReport::default()
    };

    for item in &items {
        if !item.instrumented {
            match document.instrument(item.node) {
                Ok(true) => report.newly_instrumented.push(item.node),
                Ok(false) => {}
                Err(e) => warn!("Could not attach unlock handler: {}", e),
            }
        }
        match item.cost {
            Some(cost) => report.total_cost = report.total_cost.saturating_add(cost),
            None => {
                report.anomalies += 1;
                warn!(
                    "Unreadable coin cost on {:?} (chapter {:?}), counting as 0",
                    item.title, item.chapter_id
                );
            }
        }
    }

    session.set_total_cost(report.total_cost);
    document.update_unlock_all(report.total_cost);

    info!(
        "Found {} locked chapters ({} new), total cost {}",
        report.locked,
        report.newly_instrumented.len(),
        report.total_cost
    );
    report
}
