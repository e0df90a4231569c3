use std::collections::BTreeSet;
use std::sync::Arc;

use vmx_types::TxId;

/// Logical subscribers of one physical subscription, with a cached
/// immutable snapshot handed out to outbound data tagging.
///
/// The snapshot is rebuilt lazily after a mutation; consumers hold the
/// previous `Arc` and never observe tearing.
#[derive(Debug, Default)]
pub(crate) struct SubscriberSet {
    ids: BTreeSet<TxId>,
    cached: Option<Arc<[TxId]>>,
}

impl SubscriberSet {
    pub(crate) fn insert(&mut self, tx_id: TxId) -> bool {
        let added = self.ids.insert(tx_id);
        if added {
            self.cached = None;
        }
        added
    }

    pub(crate) fn remove(&mut self, tx_id: TxId) -> bool {
        let removed = self.ids.remove(&tx_id);
        if removed {
            self.cached = None;
        }
        removed
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub(crate) fn snapshot(&mut self) -> Arc<[TxId]> {
        self.cached
            .get_or_insert_with(|| self.ids.iter().copied().collect())
            .clone()
    }
}
