use std::sync::atomic::{AtomicU64, Ordering};

/// Correlation id for a subscription or lookup request.
///
/// Ids are positive and unique within a downstream session; [`TX_NONE`]
/// marks an absent id.
pub type TxId = u64;

/// The reserved "absent" transaction id.
pub const TX_NONE: TxId = 0;

/// Monotonic transaction id source.
///
/// Backs [`DownstreamAdapter::next_tx_id`] implementations; ids start at 1
/// so that 0 stays reserved.
#[derive(Debug)]
pub struct TxIdGen {
    next: AtomicU64,
}

impl TxIdGen {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: TxId) -> Self {
        Self {
            next: AtomicU64::new(first.max(1)),
        }
    }

    pub fn next_id(&self) -> TxId {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for TxIdGen {
    fn default() -> Self {
        Self::new()
    }
}
