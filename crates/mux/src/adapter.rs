use std::hash::Hash;
use std::mem;
use std::sync::Arc;

use ahash::AHashSet;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use vmx_types::messages::{
    ExecType, MarketDataMessage, OrderStatusMessage, PortfolioLookupMessage, PortfolioMessage,
};
use vmx_types::{
    MarketDataKey, Message, MessageType, ScopeKey, SubscriptionMessage, TX_NONE, TxId,
};

use crate::config::MuxConfig;
use crate::error::MuxError;
use crate::lookup::{EnqueueAction, LookupBook};
use crate::table::{ReplyAction, SubscribeAction, SubscriptionTable, UnsubscribeAction};
use crate::traits::{DownstreamAdapter, UpstreamSink};

/// Everything mutable, behind one mutex. Critical sections only touch this
/// block; port callbacks fire after the lock is released.
struct MuxState {
    md: SubscriptionTable<MarketDataKey, MarketDataMessage>,
    portfolios: SubscriptionTable<ScopeKey, PortfolioMessage>,
    order_status: SubscriptionTable<TxId, OrderStatusMessage>,
    pf_lookups: SubscriptionTable<TxId, PortfolioLookupMessage>,
    /// Duplicate subscribes accepted as history-only; their replies are
    /// consumed silently.
    history_only: AHashSet<TxId>,
    /// Ids the adapter itself injected (replay, queued-lookup re-emission).
    /// Consumed on the first matching message, skipping bookkeeping.
    pass_through: AHashSet<TxId>,
    /// Subscribes captured at disconnect, waiting for the next connect.
    pending_replay: Vec<Message>,
    prev_local_time: Option<DateTime<Utc>>,
    lookups: LookupBook,
}

impl MuxState {
    fn new(lookup_timeout: chrono::Duration) -> Self {
        Self {
            md: SubscriptionTable::default(),
            portfolios: SubscriptionTable::default(),
            order_status: SubscriptionTable::default(),
            pf_lookups: SubscriptionTable::default(),
            history_only: AHashSet::default(),
            pass_through: AHashSet::default(),
            pending_replay: Vec::new(),
            prev_local_time: None,
            lookups: LookupBook::new(lookup_timeout),
        }
    }

    fn clear_tables(&mut self) {
        self.md.clear();
        self.portfolios.clear();
        self.order_status.clear();
        self.pf_lookups.clear();
        self.history_only.clear();
    }

    /// Canonical subscribe of every live subscription, across all tables.
    fn snapshot_subscriptions(&self) -> Vec<Message> {
        let mut out = Vec::new();
        out.extend(self.md.snapshot_messages().into_iter().map(Message::from));
        out.extend(
            self.portfolios
                .snapshot_messages()
                .into_iter()
                .map(Message::from),
        );
        out.extend(
            self.order_status
                .snapshot_messages()
                .into_iter()
                .map(Message::from),
        );
        out.extend(
            self.pf_lookups
                .snapshot_messages()
                .into_iter()
                .map(Message::from),
        );
        out
    }
}

/// Port traffic accumulated while the state lock is held, flushed after it
/// is released.
#[derive(Default)]
struct Effects {
    down: Vec<Message>,
    up: Vec<Message>,
    reenter: Vec<Message>,
}

/// Subscription multiplexing adapter.
///
/// Sits between upstream clients and a downstream venue transport:
/// deduplicates subscriptions per key, fans replies back out to every
/// logical subscriber, serializes lookup floods to one in-flight request
/// per kind, times out unanswerable lookups off the observed message
/// clock, replays subscriptions around reconnects, and stamps outbound
/// data with the subscriber ids that asked for it.
pub struct MuxAdapter {
    cfg: MuxConfig,
    downstream: Arc<dyn DownstreamAdapter>,
    upstream: Arc<dyn UpstreamSink>,
    state: Mutex<MuxState>,
}

impl MuxAdapter {
    pub fn new(
        cfg: MuxConfig,
        downstream: Arc<dyn DownstreamAdapter>,
        upstream: Arc<dyn UpstreamSink>,
    ) -> Result<Self, MuxError> {
        cfg.validate()?;
        let state = Mutex::new(MuxState::new(cfg.lookup_timeout));
        Ok(Self {
            cfg,
            downstream,
            upstream,
            state,
        })
    }

    pub fn config(&self) -> &MuxConfig {
        &self.cfg
    }

    /// Inbound port: control messages from the client layer.
    pub fn send_in(&self, msg: Message) {
        let mut fx = Effects::default();
        {
            let mut st = self.state.lock();
            self.dispatch_in(&mut st, msg, &mut fx);
        }
        self.flush(fx);
    }

    /// Outbound port: data and result messages from the transport.
    ///
    /// Fails with [`MuxError::UnsupportedMessage`] when a message reaches
    /// the tagging stage without a tagging rule, which means the pipeline
    /// is wired wrong.
    pub fn on_out(&self, mut msg: Message) -> Result<(), MuxError> {
        let mut fx = Effects::default();
        let forward;
        {
            let mut st = self.state.lock();
            forward = self.dispatch_out(&mut st, &mut msg, &mut fx)?;
            self.advance_clock(&mut st, &msg, &mut fx);
        }
        if forward {
            self.upstream.raise_new_out(msg);
        }
        self.flush(fx);
        Ok(())
    }

    fn flush(&self, fx: Effects) {
        for m in fx.down {
            self.downstream.send_in(m);
        }
        for m in fx.up {
            self.upstream.raise_new_out(m);
        }
        for m in fx.reenter {
            self.upstream.on_send_in(m);
        }
    }

    // --- inbound ---

    fn dispatch_in(&self, st: &mut MuxState, msg: Message, fx: &mut Effects) {
        match msg {
            Message::Reset(_) => {
                if !self.cfg.restore_on_error_reconnect {
                    st.clear_tables();
                }
                st.pending_replay.clear();
                st.pass_through.clear();
                st.lookups.clear();
                st.prev_local_time = None;
                info!("mux.reset");
                fx.down.push(msg);
            }
            Message::Disconnect(_) => self.in_disconnect(st, msg, fx),
            Message::MarketData(m) => {
                if st.pass_through.remove(&m.tx_id) {
                    fx.down.push(m.into());
                    return;
                }
                let key = m.key(self.downstream.supports_subscription_by_security());
                self.route_subscription(&mut st.md, &mut st.history_only, key, m, fx);
            }
            Message::Portfolio(m) => {
                if st.pass_through.remove(&m.tx_id) {
                    fx.down.push(m.into());
                    return;
                }
                let key = ScopeKey::new(&m.name);
                self.route_subscription(&mut st.portfolios, &mut st.history_only, key, m, fx);
            }
            Message::OrderStatus(m) => {
                if st.pass_through.remove(&m.tx_id) {
                    fx.down.push(m.into());
                    return;
                }
                let key = if m.is_subscribe {
                    m.tx_id
                } else {
                    m.original_tx_id
                };
                self.route_subscription(&mut st.order_status, &mut st.history_only, key, m, fx);
            }
            Message::PortfolioLookup(m) => self.in_portfolio_lookup(st, m, fx),
            Message::SecurityLookup(_) | Message::BoardLookup(_) | Message::TimeFrameLookup(_) => {
                self.in_lookup(st, msg, fx);
            }
            other => fx.down.push(other),
        }
    }

    fn route_subscription<K, M>(
        &self,
        table: &mut SubscriptionTable<K, M>,
        history_only: &mut AHashSet<TxId>,
        key: K,
        msg: M,
        fx: &mut Effects,
    ) where
        K: Eq + Hash + Clone,
        M: SubscriptionMessage,
    {
        if msg.is_subscribe() {
            match table.subscribe(key, msg, self.cfg.support_multiple_subscriptions) {
                SubscribeAction::Forward(m) => fx.down.push(m.into()),
                SubscribeAction::ForwardHistory(m) => {
                    debug!(tx_id = m.tx_id(), "mux.subscribe: duplicate, history only");
                    history_only.insert(m.tx_id());
                    fx.down.push(m.into());
                }
                SubscribeAction::Ack(m) => {
                    debug!(tx_id = m.tx_id(), "mux.subscribe: joined live subscription");
                    fx.up.push(m.into());
                }
                SubscribeAction::Pending => {}
            }
        } else {
            match table.unsubscribe(&key, msg) {
                UnsubscribeAction::Forward(m) => fx.down.push(m.into()),
                UnsubscribeAction::Ack(m) => fx.up.push(m.into()),
                UnsubscribeAction::NonExist(m) => self.non_exist(m, fx),
            }
        }
    }

    fn non_exist<M: SubscriptionMessage>(&self, msg: M, fx: &mut Effects) {
        let tx = msg.tx_id();
        if self.cfg.non_exist_subscription_as_error {
            let mut reply = msg;
            reply.set_original_tx_id(tx);
            reply.set_error(Some("no active subscription".to_string()));
            fx.up.push(reply.into());
        } else {
            info!(tx_id = tx, "mux.unsubscribe: no active subscription");
        }
    }

    fn in_lookup(&self, st: &mut MuxState, msg: Message, fx: &mut Effects) {
        let tx = msg.tx_id();
        let kind = msg.message_type();
        if st.pass_through.remove(&tx) {
            fx.down.push(msg);
            return;
        }
        let slot = match kind {
            MessageType::SecurityLookup => &mut st.lookups.securities,
            MessageType::BoardLookup => &mut st.lookups.boards,
            _ => &mut st.lookups.time_frames,
        };
        match slot.enqueue(&msg) {
            EnqueueAction::Duplicate => {
                debug!(tx_id = tx, kind = %kind, "mux.lookup: duplicate dropped");
                return;
            }
            EnqueueAction::Forward => fx.down.push(msg),
            EnqueueAction::Queued => {
                debug!(tx_id = tx, kind = %kind, "mux.lookup: queued behind in-flight");
            }
        }
        if !self.downstream.supports_out(slot.result_type()) {
            slot.timeouts.start(tx);
        }
    }

    fn in_portfolio_lookup(&self, st: &mut MuxState, m: PortfolioLookupMessage, fx: &mut Effects) {
        if st.pass_through.remove(&m.tx_id) {
            fx.down.push(m.into());
            return;
        }
        if !m.is_subscribe {
            let key = m.original_tx_id;
            self.route_subscription(&mut st.pf_lookups, &mut st.history_only, key, m, fx);
            return;
        }
        let tx = m.tx_id;
        // the lookup is also the subscription to the own-order/trade stream
        st.pf_lookups.subscribe(tx, m.clone(), false);
        let wrapped: Message = m.into();
        let slot = &mut st.lookups.portfolios;
        match slot.enqueue(&wrapped) {
            EnqueueAction::Duplicate => return,
            EnqueueAction::Forward => fx.down.push(wrapped),
            EnqueueAction::Queued => {
                debug!(tx_id = tx, "mux.lookup: portfolio lookup queued");
            }
        }
        if !self.downstream.supports_out(slot.result_type()) {
            slot.timeouts.start(tx);
        }
    }

    fn in_disconnect(&self, st: &mut MuxState, msg: Message, fx: &mut Effects) {
        let captured = st.snapshot_subscriptions();
        let armed = self.cfg.restore_on_normal_reconnect;
        if armed {
            st.pending_replay = captured.clone();
        } else if !self.cfg.restore_on_error_reconnect {
            // error-restore keeps subscribers across the disconnect,
            // awaiting the reconnect-finished signal
            st.clear_tables();
        }
        info!(captured = captured.len(), armed, "mux.disconnect");
        for original in captured {
            let mut unsub = original.clone();
            let fresh = self.downstream.next_tx_id();
            unsub.set_tx_id(fresh);
            unsub.set_original_tx_id(original.tx_id());
            unsub.set_subscribe(false);
            if armed {
                st.pass_through.insert(fresh);
            }
            fx.down.push(unsub);
        }
        fx.down.push(msg);
    }

    // --- outbound ---

    /// Returns whether the (possibly tagged) message itself is forwarded
    /// upstream.
    fn dispatch_out(
        &self,
        st: &mut MuxState,
        msg: &mut Message,
        fx: &mut Effects,
    ) -> Result<bool, MuxError> {
        match msg {
            Message::Connect(c) => {
                if c.is_ok() {
                    self.arm_replay(st, fx);
                }
                Ok(true)
            }
            Message::ReconnectingFinished(_) => {
                if self.cfg.restore_on_error_reconnect {
                    let captured = st.snapshot_subscriptions();
                    self.schedule_replay(st, captured, fx);
                }
                Ok(true)
            }
            Message::Disconnect(_) | Message::Reset(_) => Ok(true),
            Message::MarketData(m) => Ok(Self::settle_reply(
                &mut st.md,
                &mut st.history_only,
                &mut st.pass_through,
                m.original_tx_id,
                m.error.clone(),
                m.not_supported,
                fx,
            )),
            Message::OrderStatus(m) => Ok(Self::settle_reply(
                &mut st.order_status,
                &mut st.history_only,
                &mut st.pass_through,
                m.original_tx_id,
                m.error.clone(),
                m.not_supported,
                fx,
            )),
            Message::Security(s) => {
                st.lookups.securities.timeouts.refresh(s.original_tx_id);
                Ok(true)
            }
            Message::Board(b) => {
                st.lookups.boards.timeouts.refresh(b.original_tx_id);
                Self::tag_md(st, b.original_tx_id, &mut b.subscription_ids);
                Ok(true)
            }
            Message::SecurityLookupResult(r) => {
                let next = st.lookups.securities.complete(r.original_tx_id);
                self.schedule_reentry(st, next, fx);
                Ok(true)
            }
            Message::BoardLookupResult(r) => {
                let next = st.lookups.boards.complete(r.original_tx_id);
                self.schedule_reentry(st, next, fx);
                Ok(true)
            }
            Message::TimeFrameLookupResult(r) => {
                let next = st.lookups.time_frames.complete(r.original_tx_id);
                self.schedule_reentry(st, next, fx);
                Ok(true)
            }
            Message::PortfolioLookupResult(r) => {
                let tx = r.original_tx_id;
                // settle the order/trade stream subscription first
                if !st.history_only.remove(&tx) && !st.pass_through.remove(&tx) {
                    st.pf_lookups.settle(tx, r.error.is_none());
                }
                let next = st.lookups.portfolios.complete(tx);
                self.schedule_reentry(st, next, fx);
                Ok(true)
            }
            Message::Portfolio(p) => {
                // a portfolio frame doubles as the reply to a portfolio
                // subscribe; settle pending requests before treating it
                // as data
                if !Self::settle_reply(
                    &mut st.portfolios,
                    &mut st.history_only,
                    &mut st.pass_through,
                    p.original_tx_id,
                    p.error.clone(),
                    p.not_supported,
                    fx,
                ) {
                    return Ok(false);
                }
                st.lookups.portfolios.timeouts.refresh(p.original_tx_id);
                Self::tag_transactional(
                    st,
                    p.original_tx_id,
                    &mut p.subscription_id,
                    &mut p.subscription_ids,
                );
                Ok(true)
            }
            Message::Candle(c) => {
                Self::tag_md(st, c.original_tx_id, &mut c.subscription_ids);
                Ok(true)
            }
            Message::News(n) => {
                Self::tag_md(st, n.original_tx_id, &mut n.subscription_ids);
                Ok(true)
            }
            Message::BoardState(b) => {
                Self::tag_md(st, b.original_tx_id, &mut b.subscription_ids);
                Ok(true)
            }
            Message::Execution(e) => {
                match e.exec_type {
                    ExecType::Tick | ExecType::OrderLog => {
                        Self::tag_md(st, e.original_tx_id, &mut e.subscription_ids);
                    }
                    ExecType::Transaction => Self::tag_transactional(
                        st,
                        e.original_tx_id,
                        &mut e.subscription_id,
                        &mut e.subscription_ids,
                    ),
                }
                Ok(true)
            }
            Message::PositionChange(p) => {
                Self::tag_transactional(
                    st,
                    p.original_tx_id,
                    &mut p.subscription_id,
                    &mut p.subscription_ids,
                );
                Ok(true)
            }
            Message::PortfolioChange(p) => {
                Self::tag_transactional(
                    st,
                    p.original_tx_id,
                    &mut p.subscription_id,
                    &mut p.subscription_ids,
                );
                Ok(true)
            }
            other => Err(MuxError::UnsupportedMessage(other.message_type())),
        }
    }

    /// Reply settlement shared by the table-backed kinds: consumes
    /// history-only and pass-through ids, fans pending replies out, and
    /// reports whether the raw message should still travel upstream.
    ///
    /// A correlated message with nothing pending is not a reply; it keeps
    /// flowing so portfolio frames can serve as both ack and snapshot.
    #[allow(clippy::too_many_arguments)]
    fn settle_reply<K, M>(
        table: &mut SubscriptionTable<K, M>,
        history_only: &mut AHashSet<TxId>,
        pass_through: &mut AHashSet<TxId>,
        tx: TxId,
        error: Option<String>,
        not_supported: bool,
        fx: &mut Effects,
    ) -> bool
    where
        K: Eq + Hash + Clone,
        M: SubscriptionMessage,
        Message: From<M>,
    {
        if tx == TX_NONE {
            return true;
        }
        if history_only.remove(&tx) || pass_through.remove(&tx) {
            return false;
        }
        let ok = error.is_none() && !not_supported;
        match table.process_reply(tx, ok, error, not_supported) {
            ReplyAction::Replies(replies) if !replies.is_empty() => {
                fx.up.extend(replies.into_iter().map(Message::from));
                false
            }
            _ => true,
        }
    }

    /// Market-data tagging: the physical subscription's subscriber snapshot.
    fn tag_md(st: &mut MuxState, original: TxId, subscription_ids: &mut Option<Arc<[TxId]>>) {
        if let Some(ids) = st.md.subscribers_snapshot(original) {
            *subscription_ids = Some(ids);
        }
    }

    /// Transactional tagging for the own-order/trade and portfolio streams.
    ///
    /// When several portfolio-lookup subscriptions are live, the ids come
    /// from the oldest entry's snapshot. Known inaccuracy, kept for
    /// compatibility with the transports built against it.
    fn tag_transactional(
        st: &mut MuxState,
        original: TxId,
        subscription_id: &mut TxId,
        subscription_ids: &mut Option<Arc<[TxId]>>,
    ) {
        if st.pf_lookups.contains_tx(original) {
            *subscription_id = original;
        }
        if let Some(ids) = st.pf_lookups.first_snapshot() {
            *subscription_ids = Some(ids);
        }
    }

    fn arm_replay(&self, st: &mut MuxState, fx: &mut Effects) {
        if self.cfg.restore_on_error_reconnect {
            let captured = st.snapshot_subscriptions();
            self.schedule_replay(st, captured, fx);
        } else if self.cfg.restore_on_normal_reconnect {
            let captured = mem::take(&mut st.pending_replay);
            self.schedule_replay(st, captured, fx);
        }
    }

    fn schedule_replay(&self, st: &mut MuxState, captured: Vec<Message>, fx: &mut Effects) {
        if captured.is_empty() {
            return;
        }
        info!(count = captured.len(), "mux.replay");
        for mut m in captured {
            m.set_back(true);
            st.pass_through.insert(m.tx_id());
            fx.reenter.push(m);
        }
    }

    fn schedule_reentry(&self, st: &mut MuxState, next: Option<Message>, fx: &mut Effects) {
        if let Some(next) = next {
            debug!(tx_id = next.tx_id(), "mux.lookup: advancing queue");
            st.pass_through.insert(next.tx_id());
            fx.reenter.push(next);
        }
    }

    /// Message-driven clock: every outbound message advances the timeout
    /// wheels by the observed `local_time` delta.
    fn advance_clock(&self, st: &mut MuxState, msg: &Message, fx: &mut Effects) {
        let Some(now) = msg.local_time() else {
            return;
        };
        if let Some(prev) = st.prev_local_time {
            let delta = now - prev;
            for slot in st.lookups.slots_mut() {
                let fired = slot.timeouts.tick(delta);
                if fired.is_empty() {
                    continue;
                }
                if let Some(next) = slot.expire(&fired) {
                    st.pass_through.insert(next.tx_id());
                    fx.reenter.push(next);
                }
                for tx in fired {
                    info!(tx_id = tx, kind = %slot.result_type(), "mux.lookup: timed out");
                    fx.up.push(slot.timed_out_result(tx, Some(now)));
                }
            }
        }
        st.prev_local_time = Some(now);
    }
}
