use std::collections::VecDeque;

use ahash::AHashMap;
use chrono::{DateTime, Duration, Utc};

use vmx_types::messages::{
    BoardLookupResultMessage, PortfolioLookupResultMessage, SecurityLookupResultMessage,
    TimeFrameLookupResultMessage,
};
use vmx_types::{Message, MessageType, TX_NONE, TxId};

/// Per-transaction countdowns, advanced by observed message-clock deltas
/// rather than a timer thread.
#[derive(Debug)]
pub(crate) struct TimeoutWheel {
    timeout: Duration,
    remaining: AHashMap<TxId, Duration>,
}

impl TimeoutWheel {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            remaining: AHashMap::default(),
        }
    }

    /// Arms a countdown. No-op for absent ids, a disabled timeout, or an
    /// already armed tx.
    pub(crate) fn start(&mut self, tx: TxId) {
        if tx == TX_NONE || self.timeout <= Duration::zero() {
            return;
        }
        self.remaining.entry(tx).or_insert(self.timeout);
    }

    /// Resets an armed countdown back to the full timeout. Data frames of
    /// a running lookup use this as a liveness heartbeat.
    pub(crate) fn refresh(&mut self, tx: TxId) {
        if let Some(rem) = self.remaining.get_mut(&tx) {
            *rem = self.timeout;
        }
    }

    pub(crate) fn remove(&mut self, tx: TxId) {
        self.remaining.remove(&tx);
    }

    pub(crate) fn clear(&mut self) {
        self.remaining.clear();
    }

    /// Advances every countdown by `delta`, evicting and reporting the
    /// expired ids.
    pub(crate) fn tick(&mut self, delta: Duration) -> Vec<TxId> {
        if delta <= Duration::zero() || self.remaining.is_empty() {
            return Vec::new();
        }
        let mut fired = Vec::new();
        for (tx, rem) in self.remaining.iter_mut() {
            *rem = *rem - delta;
            if *rem <= Duration::zero() {
                fired.push(*tx);
            }
        }
        for tx in &fired {
            self.remaining.remove(tx);
        }
        fired.sort_unstable();
        fired
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum EnqueueAction {
    /// Queue was empty; send downstream now.
    Forward,
    /// Another lookup of this kind is in flight; held back.
    Queued,
    /// Equal message already queued; dropped.
    Duplicate,
}

/// FIFO of pending lookups of one kind. The head is the single in-flight
/// request; everything behind it waits for the head's result.
#[derive(Debug)]
pub(crate) struct LookupSlot {
    queue: VecDeque<Message>,
    pub(crate) timeouts: TimeoutWheel,
    result_type: MessageType,
}

impl LookupSlot {
    pub(crate) fn new(result_type: MessageType, timeout: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            timeouts: TimeoutWheel::new(timeout),
            result_type,
        }
    }

    pub(crate) fn result_type(&self) -> MessageType {
        self.result_type
    }

    pub(crate) fn enqueue(&mut self, msg: &Message) -> EnqueueAction {
        if self.queue.iter().any(|queued| queued == msg) {
            return EnqueueAction::Duplicate;
        }
        self.queue.push_back(msg.clone());
        if self.queue.len() == 1 {
            EnqueueAction::Forward
        } else {
            EnqueueAction::Queued
        }
    }

    /// Settles a lookup's terminal answer. Only when `tx` is the in-flight
    /// head does the queue advance; the next queued lookup is then returned,
    /// marked for re-entry through the inbound port. A backlog entry is
    /// removed where it sits without disturbing the head.
    pub(crate) fn complete(&mut self, tx: TxId) -> Option<Message> {
        self.timeouts.remove(tx);
        let head_matches = self.queue.front().is_some_and(|head| head.tx_id() == tx);
        if !head_matches {
            self.queue.retain(|queued| queued.tx_id() != tx);
            return None;
        }
        self.queue.pop_front();
        let mut next = self.queue.front()?.clone();
        next.set_back(true);
        Some(next)
    }

    /// Removes every expired lookup from the queue in one pass. The next
    /// surviving entry is promoted only when the in-flight head itself
    /// expired; expired backlog entries already have their terminal answer
    /// and must not be sent downstream.
    pub(crate) fn expire(&mut self, fired: &[TxId]) -> Option<Message> {
        let head_fired = self
            .queue
            .front()
            .is_some_and(|head| fired.contains(&head.tx_id()));
        self.queue.retain(|queued| !fired.contains(&queued.tx_id()));
        if !head_fired {
            return None;
        }
        let mut next = self.queue.front()?.clone();
        next.set_back(true);
        Some(next)
    }

    /// Synthetic negative result closing the loop for a client whose lookup
    /// the transport never answered.
    pub(crate) fn timed_out_result(&self, tx: TxId, local_time: Option<DateTime<Utc>>) -> Message {
        let error = Some("lookup timed out".to_string());
        match self.result_type {
            MessageType::SecurityLookupResult => SecurityLookupResultMessage {
                original_tx_id: tx,
                error,
                local_time,
            }
            .into(),
            MessageType::BoardLookupResult => BoardLookupResultMessage {
                original_tx_id: tx,
                error,
                local_time,
            }
            .into(),
            MessageType::TimeFrameLookupResult => TimeFrameLookupResultMessage {
                original_tx_id: tx,
                error,
                local_time,
                ..Default::default()
            }
            .into(),
            _ => PortfolioLookupResultMessage {
                original_tx_id: tx,
                error,
                local_time,
            }
            .into(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
        self.timeouts.clear();
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }
}

/// One lookup slot per kind the venue understands.
#[derive(Debug)]
pub(crate) struct LookupBook {
    pub(crate) securities: LookupSlot,
    pub(crate) portfolios: LookupSlot,
    pub(crate) boards: LookupSlot,
    pub(crate) time_frames: LookupSlot,
}

impl LookupBook {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            securities: LookupSlot::new(MessageType::SecurityLookupResult, timeout),
            portfolios: LookupSlot::new(MessageType::PortfolioLookupResult, timeout),
            boards: LookupSlot::new(MessageType::BoardLookupResult, timeout),
            time_frames: LookupSlot::new(MessageType::TimeFrameLookupResult, timeout),
        }
    }

    pub(crate) fn slots_mut(&mut self) -> [&mut LookupSlot; 4] {
        [
            &mut self.securities,
            &mut self.portfolios,
            &mut self.boards,
            &mut self.time_frames,
        ]
    }

    pub(crate) fn clear(&mut self) {
        for slot in self.slots_mut() {
            slot.clear();
        }
    }
}
