pub mod ids;
pub mod keys;
pub mod messages;

pub use ids::{TX_NONE, TxId, TxIdGen};
pub use keys::{MarketDataKey, MarketDataType, ScopeKey, SecurityId};
pub use messages::{Message, MessageType, SubscriptionMessage};
