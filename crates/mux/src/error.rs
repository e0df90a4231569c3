use thiserror::Error;

use vmx_types::MessageType;

#[derive(Debug, Error, PartialEq)]
pub enum MuxError {
    /// An outbound message reached the tagging stage without a tagging
    /// rule. Surfaced hard to flush integration mistakes early.
    #[error("unsupported outbound message: {0}")]
    UnsupportedMessage(MessageType),
    /// The configured lookup timeout is negative.
    #[error("lookup timeout must not be negative, got {0}")]
    InvalidInterval(chrono::Duration),
}
