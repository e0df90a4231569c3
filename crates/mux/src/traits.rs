use vmx_types::{Message, MessageType, TxId};

/// The transport side of the pipeline, below the adapter.
///
/// `send_in` is only ever invoked after the adapter has released its state
/// lock. `supports_out`, `next_tx_id` and
/// `supports_subscription_by_security` are capability probes: they may be
/// called while the state is locked, must not block and must not re-enter
/// the adapter.
pub trait DownstreamAdapter: Send + Sync {
    /// Forward a message to the venue transport.
    fn send_in(&self, msg: Message);

    /// Whether the venue ever emits this message type. Lookups whose result
    /// type is unsupported get a countdown instead of waiting forever.
    fn supports_out(&self, message_type: MessageType) -> bool;

    /// Monotonic transaction id source.
    fn next_tx_id(&self) -> TxId;

    /// When false, market-data keys drop the security id so all securities
    /// of a data type share one physical subscription.
    fn supports_subscription_by_security(&self) -> bool {
        true
    }
}

/// The client side of the pipeline, above the adapter. Both methods are
/// invoked lock-free, from whatever thread crossed the port.
pub trait UpstreamSink: Send + Sync {
    /// Deliver an outbound message to the client layer.
    fn raise_new_out(&self, msg: Message);

    /// Loop a message back into the adapter's inbound port. Used for
    /// reconnect replay and queued-lookup re-emission; such messages carry
    /// `is_back = true`.
    fn on_send_in(&self, msg: Message);
}
