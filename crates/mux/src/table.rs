use std::hash::Hash;
use std::sync::Arc;

use ahash::AHashMap;

use vmx_types::{SubscriptionMessage, TX_NONE, TxId};

use crate::subscribers::SubscriberSet;

/// One physical subscription and the logical subscribers multiplexed over
/// it.
#[derive(Debug)]
pub(crate) struct SubscriptionInfo<M> {
    /// Canonical subscribe request: a clone of the first subscribe. Flipped
    /// to `is_subscribe = false` once the final unsubscribe goes out, so
    /// the eventual reply settles the info as gone.
    pub(crate) message: M,
    /// Requests awaiting the next physical reply, in arrival order.
    /// Drained by each reply fan-out.
    pub(crate) requests: Vec<M>,
    pub(crate) subscribers: SubscriberSet,
    pub(crate) is_subscribed: bool,
}

/// What the router must do after a subscribe was booked.
#[derive(Debug)]
pub(crate) enum SubscribeAction<M> {
    /// First subscriber for the key; send downstream.
    Forward(M),
    /// Duplicate accepted as history-only; send downstream flagged.
    ForwardHistory(M),
    /// Key already live; acknowledge upstream immediately.
    Ack(M),
    /// A physical request is in flight; the reply fan-out will answer.
    Pending,
}

#[derive(Debug)]
pub(crate) enum UnsubscribeAction<M> {
    /// Last subscriber left; send the physical unsubscribe downstream.
    Forward(M),
    /// Others remain; acknowledge upstream immediately.
    Ack(M),
    /// No subscription under this key.
    NonExist(M),
}

#[derive(Debug)]
pub(crate) enum ReplyAction<M> {
    /// One reply per pending request, arrival order preserved.
    Replies(Vec<M>),
    /// The tx correlates with nothing we track.
    Unknown,
}

/// Keyed subscription store, cross-indexed by transaction id.
///
/// Infos live in a primary map keyed by the physical tx id (the first
/// subscriber's tx); `by_key` and `by_tx` are secondary indices into it,
/// which sidesteps shared ownership of the infos entirely.
#[derive(Debug)]
pub(crate) struct SubscriptionTable<K, M> {
    by_key: AHashMap<K, TxId>,
    by_tx: AHashMap<TxId, TxId>,
    infos: AHashMap<TxId, SubscriptionInfo<M>>,
}

impl<K, M> Default for SubscriptionTable<K, M> {
    fn default() -> Self {
        Self {
            by_key: AHashMap::default(),
            by_tx: AHashMap::default(),
            infos: AHashMap::default(),
        }
    }
}

impl<K, M> SubscriptionTable<K, M>
where
    K: Eq + Hash + Clone,
    M: SubscriptionMessage,
{
    /// Books a subscribe request under `key`.
    ///
    /// `allow_multiple` demotes duplicates of a live key to history-only
    /// requests that still travel downstream under their own tx.
    pub(crate) fn subscribe(
        &mut self,
        key: K,
        mut msg: M,
        allow_multiple: bool,
    ) -> SubscribeAction<M> {
        let tx = msg.tx_id();
        if let Some(&phys) = self.by_key.get(&key) {
            if let Some(info) = self.infos.get_mut(&phys) {
                info.subscribers.insert(tx);
                self.by_tx.insert(tx, phys);
                return if allow_multiple {
                    msg.set_history_only(true);
                    info.requests.push(msg.clone());
                    SubscribeAction::ForwardHistory(msg)
                } else if info.is_subscribed {
                    let mut ack = msg;
                    ack.set_original_tx_id(tx);
                    SubscribeAction::Ack(ack)
                } else {
                    info.requests.push(msg);
                    SubscribeAction::Pending
                };
            }
        }
        let mut info = SubscriptionInfo {
            message: msg.clone(),
            requests: vec![msg.clone()],
            subscribers: SubscriberSet::default(),
            is_subscribed: false,
        };
        info.subscribers.insert(tx);
        self.by_key.insert(key, tx);
        self.by_tx.insert(tx, tx);
        self.infos.insert(tx, info);
        SubscribeAction::Forward(msg)
    }

    pub(crate) fn unsubscribe(&mut self, key: &K, mut msg: M) -> UnsubscribeAction<M> {
        let Some(&phys) = self.by_key.get(key) else {
            return UnsubscribeAction::NonExist(msg);
        };
        let Some(info) = self.infos.get_mut(&phys) else {
            return UnsubscribeAction::NonExist(msg);
        };
        let leaving = msg.original_tx_id();
        info.subscribers.remove(leaving);
        self.by_tx.remove(&leaving);
        if info.subscribers.is_empty() {
            if msg.original_tx_id() == TX_NONE {
                msg.set_original_tx_id(info.message.tx_id());
            }
            info.message.set_subscribe(false);
            info.requests.push(msg.clone());
            // route the coming unsubscribe reply back to this info
            self.by_tx.insert(msg.tx_id(), phys);
            self.by_key.remove(key);
            UnsubscribeAction::Forward(msg)
        } else {
            let tx = msg.tx_id();
            let mut ack = msg;
            ack.set_original_tx_id(tx);
            UnsubscribeAction::Ack(ack)
        }
    }

    /// Settles a downstream reply correlated by `tx`, fanning one reply out
    /// to every pending request. Destroys the info once it is no longer
    /// subscribed.
    pub(crate) fn process_reply(
        &mut self,
        tx: TxId,
        ok: bool,
        error: Option<String>,
        not_supported: bool,
    ) -> ReplyAction<M> {
        let Some(&phys) = self.by_tx.get(&tx) else {
            return ReplyAction::Unknown;
        };
        let Some(info) = self.infos.get_mut(&phys) else {
            self.by_tx.remove(&tx);
            return ReplyAction::Unknown;
        };
        info.is_subscribed = info.message.is_subscribe() && ok;
        let mut replies = Vec::with_capacity(info.requests.len());
        for req in info.requests.drain(..) {
            let req_tx = req.tx_id();
            let mut reply = req;
            reply.set_original_tx_id(req_tx);
            reply.set_error(error.clone());
            reply.set_not_supported(not_supported);
            replies.push(reply);
        }
        if !info.is_subscribed {
            self.drop_info(phys);
        }
        ReplyAction::Replies(replies)
    }

    /// Lightweight reply settlement without fan-out, for subscriptions that
    /// carry their own result message (portfolio lookups).
    pub(crate) fn settle(&mut self, tx: TxId, ok: bool) -> bool {
        let Some(&phys) = self.by_tx.get(&tx) else {
            return false;
        };
        let Some(info) = self.infos.get_mut(&phys) else {
            self.by_tx.remove(&tx);
            return false;
        };
        info.is_subscribed = info.message.is_subscribe() && ok;
        info.requests.clear();
        if !info.is_subscribed {
            self.drop_info(phys);
        }
        true
    }

    pub(crate) fn contains_tx(&self, tx: TxId) -> bool {
        self.by_tx.contains_key(&tx)
    }

    /// Subscriber snapshot of the subscription `tx` belongs to.
    pub(crate) fn subscribers_snapshot(&mut self, tx: TxId) -> Option<Arc<[TxId]>> {
        let phys = *self.by_tx.get(&tx)?;
        self.infos
            .get_mut(&phys)
            .map(|info| info.subscribers.snapshot())
    }

    /// Subscriber snapshot of the oldest live subscription. Physical tx ids
    /// are monotonic, so the smallest id is the earliest arrival.
    pub(crate) fn first_snapshot(&mut self) -> Option<Arc<[TxId]>> {
        let phys = self.infos.keys().copied().min()?;
        self.infos
            .get_mut(&phys)
            .map(|info| info.subscribers.snapshot())
    }

    /// Canonical subscribe message of every live (keyed) subscription, in
    /// physical-tx order.
    pub(crate) fn snapshot_messages(&self) -> Vec<M> {
        let mut phys: Vec<TxId> = self.by_key.values().copied().collect();
        phys.sort_unstable();
        phys.dedup();
        phys.iter()
            .filter_map(|p| self.infos.get(p))
            .map(|info| info.message.clone())
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.by_key.clear();
        self.by_tx.clear();
        self.infos.clear();
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.by_key.is_empty() && self.by_tx.is_empty() && self.infos.is_empty()
    }

    fn drop_info(&mut self, phys: TxId) {
        self.infos.remove(&phys);
        self.by_tx.retain(|_, p| *p != phys);
        self.by_key.retain(|_, p| *p != phys);
    }

    #[cfg(test)]
    pub(crate) fn live_keys(&self) -> usize {
        self.by_key.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmx_types::messages::MarketDataMessage;
    use vmx_types::{MarketDataKey, MarketDataType, SecurityId};

    fn sub(tx: TxId) -> MarketDataMessage {
        MarketDataMessage {
            tx_id: tx,
            is_subscribe: true,
            data_type: MarketDataType::Trades,
            security_id: Some(SecurityId::new("SBER", "TQBR")),
            ..Default::default()
        }
    }

    fn unsub(tx: TxId, original: TxId) -> MarketDataMessage {
        MarketDataMessage {
            tx_id: tx,
            original_tx_id: original,
            is_subscribe: false,
            data_type: MarketDataType::Trades,
            security_id: Some(SecurityId::new("SBER", "TQBR")),
            ..Default::default()
        }
    }

    fn key(msg: &MarketDataMessage) -> MarketDataKey {
        msg.key(true)
    }

    #[test]
    fn test_second_subscribe_is_pending() {
        let mut table = SubscriptionTable::default();
        let first = sub(1);
        assert!(matches!(
            table.subscribe(key(&first), first.clone(), false),
            SubscribeAction::Forward(_)
        ));
        let second = sub(2);
        assert!(matches!(
            table.subscribe(key(&second), second, false),
            SubscribeAction::Pending
        ));
        assert_eq!(table.live_keys(), 1);
    }

    #[test]
    fn test_reply_fans_out_to_every_request() {
        let mut table = SubscriptionTable::default();
        let first = sub(1);
        table.subscribe(key(&first), first.clone(), false);
        table.subscribe(key(&first), sub(2), false);
        match table.process_reply(1, true, None, false) {
            ReplyAction::Replies(replies) => {
                let originals: Vec<TxId> = replies.iter().map(|r| r.original_tx_id).collect();
                assert_eq!(originals, vec![1, 2]);
                assert!(replies.iter().all(|r| r.error.is_none()));
            }
            ReplyAction::Unknown => panic!("reply must correlate"),
        }
        // the fan-out drained the pending requests; a late duplicate is
        // acked immediately instead
        assert!(matches!(
            table.subscribe(key(&first), sub(3), false),
            SubscribeAction::Ack(_)
        ));
    }

    #[test]
    fn test_failed_subscribe_reply_drops_info() {
        let mut table = SubscriptionTable::default();
        let first = sub(1);
        table.subscribe(key(&first), first.clone(), false);
        match table.process_reply(1, false, Some("rejected".to_string()), false) {
            ReplyAction::Replies(replies) => {
                assert_eq!(replies.len(), 1);
                assert_eq!(replies[0].error.as_deref(), Some("rejected"));
            }
            ReplyAction::Unknown => panic!("reply must correlate"),
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_unsubscribe_refcounts_down_to_physical() {
        let mut table = SubscriptionTable::default();
        let first = sub(1);
        table.subscribe(key(&first), first.clone(), false);
        table.subscribe(key(&first), sub(2), false);
        table.process_reply(1, true, None, false);

        match table.unsubscribe(&key(&first), unsub(10, 1)) {
            UnsubscribeAction::Ack(ack) => assert_eq!(ack.original_tx_id, 10),
            other => panic!("expected immediate ack, got {other:?}"),
        }
        match table.unsubscribe(&key(&first), unsub(11, 2)) {
            UnsubscribeAction::Forward(fwd) => {
                assert_eq!(fwd.tx_id, 11);
                assert!(!fwd.is_subscribe);
            }
            other => panic!("expected physical unsubscribe, got {other:?}"),
        }
        assert_eq!(table.live_keys(), 0);

        // unsubscribe reply destroys the info
        match table.process_reply(11, true, None, false) {
            ReplyAction::Replies(replies) => {
                assert_eq!(replies.len(), 1);
                assert_eq!(replies[0].original_tx_id, 11);
            }
            ReplyAction::Unknown => panic!("unsubscribe reply must correlate"),
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_unknown_key_is_non_exist() {
        let mut table: SubscriptionTable<MarketDataKey, MarketDataMessage> =
            SubscriptionTable::default();
        let msg = unsub(5, 99);
        assert!(matches!(
            table.unsubscribe(&msg.key(true), msg),
            UnsubscribeAction::NonExist(_)
        ));
    }

    #[test]
    fn test_history_duplicate_travels_downstream() {
        let mut table = SubscriptionTable::default();
        let first = sub(1);
        table.subscribe(key(&first), first.clone(), false);
        table.process_reply(1, true, None, false);
        match table.subscribe(key(&first), sub(2), true) {
            SubscribeAction::ForwardHistory(msg) => {
                assert!(msg.history_only);
                assert_eq!(msg.tx_id, 2);
            }
            other => panic!("expected history forward, got {other:?}"),
        }
        assert_eq!(&*table.subscribers_snapshot(1).unwrap(), &[1, 2]);
    }

    #[test]
    fn test_snapshot_messages_are_canonical_subscribes() {
        let mut table = SubscriptionTable::default();
        let first = sub(1);
        table.subscribe(key(&first), first.clone(), false);
        table.subscribe(key(&first), sub(2), false);
        let snapshot = table.snapshot_messages();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].tx_id, 1);
        assert!(snapshot[0].is_subscribe);
    }
}
