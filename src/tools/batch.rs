use std::collections::HashMap;
use std::future::Future;
use std::time::Instant;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("invalid concurrency limit {0}: must be 0 (unbounded) or positive")]
    InvalidLimit(i64),
}

/// Why one task in a batch did not produce a value.
#[derive(Debug, Error)]
pub enum TaskFailure {
    #[error("task failed: {0:#}")]
    Errored(anyhow::Error),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task was cancelled")]
    Cancelled,
}

impl From<JoinError> for TaskFailure {
    fn from(e: JoinError) -> Self {
        if e.is_panic() {
            TaskFailure::Panicked(e.to_string())
        } else {
            TaskFailure::Cancelled
        }
    }
}

pub type TaskOutcome<T> = Result<T, TaskFailure>;

/// Run `tasks` with at most `limit` in flight; `0` means no limit.
///
/// Every task is spawned as soon as it is enumerated. When `limit` tasks are
/// still running, enumeration waits until one of them settles (a rolling
/// window, not fixed-size rounds). One task failing never cancels its
/// siblings. Outcomes come back in the order the tasks were given.
pub async fn run<T, F, I>(limit: i64, tasks: I) -> Result<Vec<TaskOutcome<T>>, BatchError>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    if limit < 0 {
        return Err(BatchError::InvalidLimit(limit));
    }
    let window = usize::try_from(limit).ok().filter(|w| *w > 0);

    let start_time = Instant::now();
    let mut in_flight = JoinSet::new();
    let mut slot_of = HashMap::new();
    let mut outcomes: Vec<Option<TaskOutcome<T>>> = Vec::new();

    for (index, task) in tasks.into_iter().enumerate() {
        outcomes.push(None);
        let handle = in_flight.spawn(task);
        slot_of.insert(handle.id(), index);

        if let Some(window) = window {
            while in_flight.len() >= window {
                if let Some(joined) = in_flight.join_next_with_id().await {
                    settle(joined, &slot_of, &mut outcomes);
                }
            }
        }
    }

    while let Some(joined) = in_flight.join_next_with_id().await {
        settle(joined, &slot_of, &mut outcomes);
    }

    let outcomes: Vec<TaskOutcome<T>> = outcomes
        .into_iter()
        .map(|o| o.unwrap_or(Err(TaskFailure::Cancelled)))
        .collect();
    let failed = outcomes.iter().filter(|o| o.is_err()).count();
    info!(
        "Batch of {} tasks settled (limit {}): {} failed, {}ms",
        outcomes.len(),
        limit,
        failed,
        start_time.elapsed().as_millis()
    );
    Ok(outcomes)
}

fn settle<T>(
    joined: Result<(tokio::task::Id, anyhow::Result<T>), JoinError>,
    slot_of: &HashMap<tokio::task::Id, usize>,
    outcomes: &mut [Option<TaskOutcome<T>>],
) {
    let (id, outcome) = match joined {
        Ok((id, Ok(value))) => (id, Ok(value)),
        Ok((id, Err(e))) => (id, Err(TaskFailure::Errored(e))),
        Err(e) => (e.id(), Err(TaskFailure::from(e))),
    };
    match slot_of.get(&id) {
        Some(&index) => outcomes[index] = Some(outcome),
        None => debug!("settled task {} has no slot", id),
    }
}
