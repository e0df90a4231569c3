use chrono::Duration;

use crate::error::MuxError;

/// Adapter options. Defaults leave every restore/duplication feature off
/// and arm lookups with a 10 second timeout.
#[derive(Clone, Debug, PartialEq)]
pub struct MuxConfig {
    /// Re-issue captured subscriptions after an error-driven reconnect.
    pub restore_on_error_reconnect: bool,
    /// Re-issue captured subscriptions after a clean disconnect/connect.
    pub restore_on_normal_reconnect: bool,
    /// Accept duplicates of an already-subscribed key as history-only.
    pub support_multiple_subscriptions: bool,
    /// Unsubscribing an unknown subscription produces an error reply
    /// instead of an info log.
    pub non_exist_subscription_as_error: bool,
    /// Countdown applied to all four lookup kinds. Must be >= 0.
    pub lookup_timeout: Duration,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            restore_on_error_reconnect: false,
            restore_on_normal_reconnect: false,
            support_multiple_subscriptions: false,
            non_exist_subscription_as_error: false,
            lookup_timeout: Duration::seconds(10),
        }
    }
}

impl MuxConfig {
    pub fn validate(&self) -> Result<(), MuxError> {
        if self.lookup_timeout < Duration::zero() {
            return Err(MuxError::InvalidInterval(self.lookup_timeout));
        }
        Ok(())
    }
}
