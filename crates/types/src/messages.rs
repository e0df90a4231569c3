use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use strum_macros::Display;

use crate::ids::{TX_NONE, TxId};
use crate::keys::{MarketDataKey, MarketDataType, ScopeKey, SecurityId};

pub type Price = Decimal;
pub type Volume = Decimal;

/// Trade direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
pub enum Side {
    #[default]
    Buy,
    Sell,
}

/// Which stream an execution entry belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
pub enum ExecType {
    /// Anonymous trade tape.
    #[default]
    Tick,
    /// Full order log.
    OrderLog,
    /// Own orders and trades.
    Transaction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
pub enum CandleType {
    #[default]
    TimeFrame,
    Tick,
    Volume,
    Range,
}

/// Trading session state of a board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
pub enum SessionState {
    #[default]
    Active,
    Paused,
    Closed,
}

/// Tag enum over every [`Message`] variant. Used for capability probes
/// (`DownstreamAdapter::supports_out`) and in logs/errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum MessageType {
    Reset,
    Connect,
    Disconnect,
    ReconnectingFinished,
    MarketData,
    Portfolio,
    OrderStatus,
    PortfolioLookup,
    SecurityLookup,
    BoardLookup,
    TimeFrameLookup,
    SecurityLookupResult,
    BoardLookupResult,
    TimeFrameLookupResult,
    PortfolioLookupResult,
    Security,
    Board,
    BoardState,
    Candle,
    News,
    Execution,
    PositionChange,
    PortfolioChange,
    OrderRegister,
    OrderCancel,
}

// --- control / lifecycle ---

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResetMessage {}

/// Connection request (inbound) or connection result (outbound).
/// An outbound `Connect` with `error: None` is a successful connect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectMessage {
    pub error: Option<String>,
    pub local_time: Option<DateTime<Utc>>,
}

impl ConnectMessage {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisconnectMessage {
    pub local_time: Option<DateTime<Utc>>,
}

/// Raised by the transport once an error-driven reconnect cycle finished.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconnectingFinishedMessage {
    pub local_time: Option<DateTime<Utc>>,
}

// --- subscription commands and replies ---

/// Market-data subscribe/unsubscribe command. On the outbound port the
/// same variant is the venue's reply, correlated by `original_tx_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketDataMessage {
    pub tx_id: TxId,
    pub original_tx_id: TxId,
    pub is_subscribe: bool,
    pub data_type: MarketDataType,
    pub security_id: Option<SecurityId>,
    /// Extra key discriminator, e.g. a candle time-frame.
    pub arg: Option<String>,
    pub news_id: Option<String>,
    pub board_code: Option<String>,
    /// Duplicate subscription accepted for history delivery only.
    pub history_only: bool,
    pub is_back: bool,
    pub not_supported: bool,
    pub error: Option<String>,
    pub local_time: Option<DateTime<Utc>>,
}

impl MarketDataMessage {
    /// The equivalence key this command subscribes to.
    ///
    /// When the downstream cannot subscribe per security the security id is
    /// dropped from the key, so all securities of a data type share one
    /// physical subscription.
    pub fn key(&self, by_security: bool) -> MarketDataKey {
        if self.data_type.requires_security() {
            MarketDataKey::Security {
                data_type: self.data_type,
                security_id: if by_security {
                    self.security_id.clone()
                } else {
                    None
                },
                arg: self.arg.clone(),
            }
        } else {
            let scope = self
                .news_id
                .as_deref()
                .or(self.board_code.as_deref())
                .unwrap_or("");
            MarketDataKey::Scope(ScopeKey::new(scope))
        }
    }
}

/// Portfolio subscribe/unsubscribe command (inbound, keyed by name) or a
/// portfolio snapshot from the venue (outbound).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioMessage {
    pub tx_id: TxId,
    pub original_tx_id: TxId,
    pub is_subscribe: bool,
    pub name: String,
    pub is_back: bool,
    pub not_supported: bool,
    pub error: Option<String>,
    pub subscription_id: TxId,
    pub subscription_ids: Option<Arc<[TxId]>>,
    pub local_time: Option<DateTime<Utc>>,
}

/// Order-status stream request; one physical subscription per request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderStatusMessage {
    pub tx_id: TxId,
    pub original_tx_id: TxId,
    pub is_subscribe: bool,
    pub is_back: bool,
    pub not_supported: bool,
    pub error: Option<String>,
    pub local_time: Option<DateTime<Utc>>,
}

/// Portfolio lookup. Doubles as the subscription to the own-order/trade
/// stream, so it is both queued like a lookup and tracked like a
/// subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioLookupMessage {
    pub tx_id: TxId,
    pub original_tx_id: TxId,
    pub is_subscribe: bool,
    pub is_back: bool,
    pub not_supported: bool,
    pub error: Option<String>,
    pub local_time: Option<DateTime<Utc>>,
}

// --- lookups and their results ---

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityLookupMessage {
    pub tx_id: TxId,
    pub security_id: Option<SecurityId>,
    pub code_like: Option<String>,
    pub is_back: bool,
    pub local_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardLookupMessage {
    pub tx_id: TxId,
    pub like: Option<String>,
    pub is_back: bool,
    pub local_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeFrameLookupMessage {
    pub tx_id: TxId,
    pub is_back: bool,
    pub local_time: Option<DateTime<Utc>>,
}

/// Terminates a security lookup. Synthesized with `error` set when the
/// lookup times out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityLookupResultMessage {
    pub original_tx_id: TxId,
    pub error: Option<String>,
    pub local_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardLookupResultMessage {
    pub original_tx_id: TxId,
    pub error: Option<String>,
    pub local_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeFrameLookupResultMessage {
    pub original_tx_id: TxId,
    pub time_frames: Vec<Duration>,
    pub error: Option<String>,
    pub local_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioLookupResultMessage {
    pub original_tx_id: TxId,
    pub error: Option<String>,
    pub local_time: Option<DateTime<Utc>>,
}

// --- outbound data ---

/// One security description streamed while a security lookup is running.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityMessage {
    pub original_tx_id: TxId,
    pub security_id: SecurityId,
    pub name: Option<String>,
    pub local_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardMessage {
    pub original_tx_id: TxId,
    pub code: String,
    pub exchange: Option<String>,
    pub subscription_id: TxId,
    pub subscription_ids: Option<Arc<[TxId]>>,
    pub local_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardStateMessage {
    pub original_tx_id: TxId,
    pub board_code: String,
    pub state: SessionState,
    pub subscription_id: TxId,
    pub subscription_ids: Option<Arc<[TxId]>>,
    pub local_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandleMessage {
    pub original_tx_id: TxId,
    pub candle_type: CandleType,
    pub security_id: SecurityId,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Volume,
    pub open_time: Option<DateTime<Utc>>,
    pub is_finished: bool,
    pub subscription_id: TxId,
    pub subscription_ids: Option<Arc<[TxId]>>,
    pub local_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewsMessage {
    pub original_tx_id: TxId,
    pub id: Option<String>,
    pub board_code: Option<String>,
    pub headline: String,
    pub story: Option<String>,
    pub subscription_id: TxId,
    pub subscription_ids: Option<Arc<[TxId]>>,
    pub local_time: Option<DateTime<Utc>>,
}

/// Entry of an execution stream: trade tape, order log, or the
/// own-order/trade stream, per `exec_type`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionMessage {
    pub original_tx_id: TxId,
    pub exec_type: ExecType,
    pub security_id: Option<SecurityId>,
    pub order_id: Option<i64>,
    pub trade_id: Option<i64>,
    pub price: Price,
    pub volume: Volume,
    pub side: Option<Side>,
    pub subscription_id: TxId,
    pub subscription_ids: Option<Arc<[TxId]>>,
    pub local_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionChangeMessage {
    pub original_tx_id: TxId,
    pub portfolio_name: String,
    pub security_id: Option<SecurityId>,
    pub value: Option<Decimal>,
    pub subscription_id: TxId,
    pub subscription_ids: Option<Arc<[TxId]>>,
    pub local_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioChangeMessage {
    pub original_tx_id: TxId,
    pub portfolio_name: String,
    pub subscription_id: TxId,
    pub subscription_ids: Option<Arc<[TxId]>>,
    pub local_time: Option<DateTime<Utc>>,
}

// --- order traffic passing straight through the adapter ---

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderRegisterMessage {
    pub tx_id: TxId,
    pub security_id: SecurityId,
    pub portfolio_name: String,
    pub side: Side,
    pub price: Price,
    pub volume: Volume,
    pub local_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderCancelMessage {
    pub tx_id: TxId,
    pub original_tx_id: TxId,
    pub local_time: Option<DateTime<Utc>>,
}

/// The closed set of messages crossing the adapter's two ports.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Reset(ResetMessage),
    Connect(ConnectMessage),
    Disconnect(DisconnectMessage),
    ReconnectingFinished(ReconnectingFinishedMessage),
    MarketData(MarketDataMessage),
    Portfolio(PortfolioMessage),
    OrderStatus(OrderStatusMessage),
    PortfolioLookup(PortfolioLookupMessage),
    SecurityLookup(SecurityLookupMessage),
    BoardLookup(BoardLookupMessage),
    TimeFrameLookup(TimeFrameLookupMessage),
    SecurityLookupResult(SecurityLookupResultMessage),
    BoardLookupResult(BoardLookupResultMessage),
    TimeFrameLookupResult(TimeFrameLookupResultMessage),
    PortfolioLookupResult(PortfolioLookupResultMessage),
    Security(SecurityMessage),
    Board(BoardMessage),
    BoardState(BoardStateMessage),
    Candle(CandleMessage),
    News(NewsMessage),
    Execution(ExecutionMessage),
    PositionChange(PositionChangeMessage),
    PortfolioChange(PortfolioChangeMessage),
    OrderRegister(OrderRegisterMessage),
    OrderCancel(OrderCancelMessage),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Reset(_) => MessageType::Reset,
            Message::Connect(_) => MessageType::Connect,
            Message::Disconnect(_) => MessageType::Disconnect,
            Message::ReconnectingFinished(_) => MessageType::ReconnectingFinished,
            Message::MarketData(_) => MessageType::MarketData,
            Message::Portfolio(_) => MessageType::Portfolio,
            Message::OrderStatus(_) => MessageType::OrderStatus,
            Message::PortfolioLookup(_) => MessageType::PortfolioLookup,
            Message::SecurityLookup(_) => MessageType::SecurityLookup,
            Message::BoardLookup(_) => MessageType::BoardLookup,
            Message::TimeFrameLookup(_) => MessageType::TimeFrameLookup,
            Message::SecurityLookupResult(_) => MessageType::SecurityLookupResult,
            Message::BoardLookupResult(_) => MessageType::BoardLookupResult,
            Message::TimeFrameLookupResult(_) => MessageType::TimeFrameLookupResult,
            Message::PortfolioLookupResult(_) => MessageType::PortfolioLookupResult,
            Message::Security(_) => MessageType::Security,
            Message::Board(_) => MessageType::Board,
            Message::BoardState(_) => MessageType::BoardState,
            Message::Candle(_) => MessageType::Candle,
            Message::News(_) => MessageType::News,
            Message::Execution(_) => MessageType::Execution,
            Message::PositionChange(_) => MessageType::PositionChange,
            Message::PortfolioChange(_) => MessageType::PortfolioChange,
            Message::OrderRegister(_) => MessageType::OrderRegister,
            Message::OrderCancel(_) => MessageType::OrderCancel,
        }
    }

    /// The request tx id, for variants that carry one.
    pub fn tx_id(&self) -> TxId {
        match self {
            Message::MarketData(m) => m.tx_id,
            Message::Portfolio(m) => m.tx_id,
            Message::OrderStatus(m) => m.tx_id,
            Message::PortfolioLookup(m) => m.tx_id,
            Message::SecurityLookup(m) => m.tx_id,
            Message::BoardLookup(m) => m.tx_id,
            Message::TimeFrameLookup(m) => m.tx_id,
            Message::OrderRegister(m) => m.tx_id,
            Message::OrderCancel(m) => m.tx_id,
            _ => TX_NONE,
        }
    }

    pub fn set_tx_id(&mut self, tx_id: TxId) {
        match self {
            Message::MarketData(m) => m.tx_id = tx_id,
            Message::Portfolio(m) => m.tx_id = tx_id,
            Message::OrderStatus(m) => m.tx_id = tx_id,
            Message::PortfolioLookup(m) => m.tx_id = tx_id,
            Message::SecurityLookup(m) => m.tx_id = tx_id,
            Message::BoardLookup(m) => m.tx_id = tx_id,
            Message::TimeFrameLookup(m) => m.tx_id = tx_id,
            Message::OrderRegister(m) => m.tx_id = tx_id,
            Message::OrderCancel(m) => m.tx_id = tx_id,
            _ => {}
        }
    }

    pub fn set_original_tx_id(&mut self, tx_id: TxId) {
        match self {
            Message::MarketData(m) => m.original_tx_id = tx_id,
            Message::Portfolio(m) => m.original_tx_id = tx_id,
            Message::OrderStatus(m) => m.original_tx_id = tx_id,
            Message::PortfolioLookup(m) => m.original_tx_id = tx_id,
            Message::OrderCancel(m) => m.original_tx_id = tx_id,
            _ => {}
        }
    }

    pub fn set_subscribe(&mut self, is_subscribe: bool) {
        match self {
            Message::MarketData(m) => m.is_subscribe = is_subscribe,
            Message::Portfolio(m) => m.is_subscribe = is_subscribe,
            Message::OrderStatus(m) => m.is_subscribe = is_subscribe,
            Message::PortfolioLookup(m) => m.is_subscribe = is_subscribe,
            _ => {}
        }
    }

    /// Marks a message the adapter loops back into its own inbound port.
    pub fn set_back(&mut self, is_back: bool) {
        match self {
            Message::MarketData(m) => m.is_back = is_back,
            Message::Portfolio(m) => m.is_back = is_back,
            Message::OrderStatus(m) => m.is_back = is_back,
            Message::PortfolioLookup(m) => m.is_back = is_back,
            Message::SecurityLookup(m) => m.is_back = is_back,
            Message::BoardLookup(m) => m.is_back = is_back,
            Message::TimeFrameLookup(m) => m.is_back = is_back,
            _ => {}
        }
    }

    pub fn local_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Message::Reset(_) => None,
            Message::Connect(m) => m.local_time,
            Message::Disconnect(m) => m.local_time,
            Message::ReconnectingFinished(m) => m.local_time,
            Message::MarketData(m) => m.local_time,
            Message::Portfolio(m) => m.local_time,
            Message::OrderStatus(m) => m.local_time,
            Message::PortfolioLookup(m) => m.local_time,
            Message::SecurityLookup(m) => m.local_time,
            Message::BoardLookup(m) => m.local_time,
            Message::TimeFrameLookup(m) => m.local_time,
            Message::SecurityLookupResult(m) => m.local_time,
            Message::BoardLookupResult(m) => m.local_time,
            Message::TimeFrameLookupResult(m) => m.local_time,
            Message::PortfolioLookupResult(m) => m.local_time,
            Message::Security(m) => m.local_time,
            Message::Board(m) => m.local_time,
            Message::BoardState(m) => m.local_time,
            Message::Candle(m) => m.local_time,
            Message::News(m) => m.local_time,
            Message::Execution(m) => m.local_time,
            Message::PositionChange(m) => m.local_time,
            Message::PortfolioChange(m) => m.local_time,
            Message::OrderRegister(m) => m.local_time,
            Message::OrderCancel(m) => m.local_time,
        }
    }
}

macro_rules! impl_from_message {
    ($($variant:ident($inner:ty)),+ $(,)?) => {
        $(impl From<$inner> for Message {
            fn from(m: $inner) -> Self {
                Message::$variant(m)
            }
        })+
    };
}

impl_from_message!(
    Reset(ResetMessage),
    Connect(ConnectMessage),
    Disconnect(DisconnectMessage),
    ReconnectingFinished(ReconnectingFinishedMessage),
    MarketData(MarketDataMessage),
    Portfolio(PortfolioMessage),
    OrderStatus(OrderStatusMessage),
    PortfolioLookup(PortfolioLookupMessage),
    SecurityLookup(SecurityLookupMessage),
    BoardLookup(BoardLookupMessage),
    TimeFrameLookup(TimeFrameLookupMessage),
    SecurityLookupResult(SecurityLookupResultMessage),
    BoardLookupResult(BoardLookupResultMessage),
    TimeFrameLookupResult(TimeFrameLookupResultMessage),
    PortfolioLookupResult(PortfolioLookupResultMessage),
    Security(SecurityMessage),
    Board(BoardMessage),
    BoardState(BoardStateMessage),
    Candle(CandleMessage),
    News(NewsMessage),
    Execution(ExecutionMessage),
    PositionChange(PositionChangeMessage),
    PortfolioChange(PortfolioChangeMessage),
    OrderRegister(OrderRegisterMessage),
    OrderCancel(OrderCancelMessage),
);

/// Capability bound for messages the generic subscription-table operations
/// work with: correlation ids, subscribe direction, and the reply fields
/// copied into synthesized per-subscriber acks.
pub trait SubscriptionMessage: Clone + fmt::Debug + PartialEq + Into<Message> {
    fn tx_id(&self) -> TxId;
    fn set_tx_id(&mut self, tx_id: TxId);
    fn original_tx_id(&self) -> TxId;
    fn set_original_tx_id(&mut self, tx_id: TxId);
    fn is_subscribe(&self) -> bool;
    fn set_subscribe(&mut self, is_subscribe: bool);
    fn error(&self) -> Option<&str>;
    fn set_error(&mut self, error: Option<String>);
    fn not_supported(&self) -> bool;
    fn set_not_supported(&mut self, not_supported: bool);
    fn set_back(&mut self, is_back: bool);
    /// Only market-data duplicates are demoted to history-only delivery.
    fn set_history_only(&mut self, _history_only: bool) {}
}

macro_rules! impl_subscription_message {
    ($ty:ty) => {
        impl SubscriptionMessage for $ty {
            fn tx_id(&self) -> TxId {
                self.tx_id
            }
            fn set_tx_id(&mut self, tx_id: TxId) {
                self.tx_id = tx_id;
            }
            fn original_tx_id(&self) -> TxId {
                self.original_tx_id
            }
            fn set_original_tx_id(&mut self, tx_id: TxId) {
                self.original_tx_id = tx_id;
            }
            fn is_subscribe(&self) -> bool {
                self.is_subscribe
            }
            fn set_subscribe(&mut self, is_subscribe: bool) {
                self.is_subscribe = is_subscribe;
            }
            fn error(&self) -> Option<&str> {
                self.error.as_deref()
            }
            fn set_error(&mut self, error: Option<String>) {
                self.error = error;
            }
            fn not_supported(&self) -> bool {
                self.not_supported
            }
            fn set_not_supported(&mut self, not_supported: bool) {
                self.not_supported = not_supported;
            }
            fn set_back(&mut self, is_back: bool) {
                self.is_back = is_back;
            }
        }
    };
}

impl_subscription_message!(PortfolioMessage);
impl_subscription_message!(OrderStatusMessage);
impl_subscription_message!(PortfolioLookupMessage);

impl SubscriptionMessage for MarketDataMessage {
    fn tx_id(&self) -> TxId {
        self.tx_id
    }
    fn set_tx_id(&mut self, tx_id: TxId) {
        self.tx_id = tx_id;
    }
    fn original_tx_id(&self) -> TxId {
        self.original_tx_id
    }
    fn set_original_tx_id(&mut self, tx_id: TxId) {
        self.original_tx_id = tx_id;
    }
    fn is_subscribe(&self) -> bool {
        self.is_subscribe
    }
    fn set_subscribe(&mut self, is_subscribe: bool) {
        self.is_subscribe = is_subscribe;
    }
    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
    fn set_error(&mut self, error: Option<String>) {
        self.error = error;
    }
    fn not_supported(&self) -> bool {
        self.not_supported
    }
    fn set_not_supported(&mut self, not_supported: bool) {
        self.not_supported = not_supported;
    }
    fn set_back(&mut self, is_back: bool) {
        self.is_back = is_back;
    }
    fn set_history_only(&mut self, history_only: bool) {
        self.history_only = history_only;
    }
}
