use crate::core::types::NodeId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Items with an unlock in flight.
///
/// Membership is taken with [`ProcessingSet::try_claim`] before any request is
/// sent and released when the returned guard drops, on every exit path.
#[derive(Debug, Default)]
pub struct ProcessingSet {
    inner: Mutex<HashSet<NodeId>>,
}

impl ProcessingSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn members(&self) -> MutexGuard<'_, HashSet<NodeId>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `None` when the item is already being processed.
    pub fn try_claim(self: &Arc<Self>, node: NodeId) -> Option<ProcessingGuard> {
        if self.members().insert(node) {
            Some(ProcessingGuard {
                set: Arc::clone(self),
                node,
            })
        } else {
            None
        }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.members().contains(&node)
    }

    pub fn len(&self) -> usize {
        self.members().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members().is_empty()
    }
}

#[derive(Debug)]
pub struct ProcessingGuard {
    set: Arc<ProcessingSet>,
    node: NodeId,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.set.members().remove(&self.node);
    }
}
