//! Subscription multiplexing adapter: one physical venue subscription per
//! key, many logical subscribers on top of it.

pub mod adapter;
pub mod config;
pub mod error;
pub mod traits;

mod lookup;
mod subscribers;
mod table;

pub use adapter::MuxAdapter;
pub use config::MuxConfig;
pub use error::MuxError;
pub use traits::{DownstreamAdapter, UpstreamSink};
