use std::fmt;

use strum_macros::Display;

/// Security identifier as the venue knows it: instrument code plus the
/// board it trades on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SecurityId {
    pub code: String,
    pub board: String,
}

impl SecurityId {
    pub fn new(code: impl Into<String>, board: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            board: board.into(),
        }
    }
}

impl fmt::Display for SecurityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.code, self.board)
    }
}

/// Kinds of streaming market data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
pub enum MarketDataType {
    #[default]
    Level1,
    MarketDepth,
    Trades,
    OrderLog,
    Candles,
    News,
    Board,
}

impl MarketDataType {
    /// Whether a subscription of this type addresses a concrete security.
    /// News and board streams are scoped by a string instead.
    pub fn requires_security(self) -> bool {
        !matches!(self, MarketDataType::News | MarketDataType::Board)
    }
}

/// Case-folded string key. News ids, board codes and portfolio names are
/// matched case-insensitively; the empty string is a valid scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ScopeKey(String);

impl ScopeKey {
    pub fn new(s: &str) -> Self {
        Self(s.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ScopeKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Equivalence class deciding whether two market-data subscribe requests
/// can share one physical subscription downstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarketDataKey {
    /// Security-required data types. `security_id` is `None` when the
    /// downstream cannot subscribe per security.
    Security {
        data_type: MarketDataType,
        security_id: Option<SecurityId>,
        arg: Option<String>,
    },
    /// News id or board code scope.
    Scope(ScopeKey),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_key_is_case_insensitive() {
        assert_eq!(ScopeKey::new("TQBR"), ScopeKey::new("tqbr"));
        assert_eq!(ScopeKey::new(""), ScopeKey::new(""));
    }

    #[test]
    fn test_news_and_board_do_not_require_security() {
        assert!(!MarketDataType::News.requires_security());
        assert!(!MarketDataType::Board.requires_security());
        assert!(MarketDataType::Trades.requires_security());
        assert!(MarketDataType::Candles.requires_security());
    }

    #[test]
    fn test_market_data_keys_distinguish_arg() {
        let one_min = MarketDataKey::Security {
            data_type: MarketDataType::Candles,
            security_id: Some(SecurityId::new("SBER", "TQBR")),
            arg: Some("1m".to_string()),
        };
        let five_min = MarketDataKey::Security {
            data_type: MarketDataType::Candles,
            security_id: Some(SecurityId::new("SBER", "TQBR")),
            arg: Some("5m".to_string()),
        };
        assert_ne!(one_min, five_min);
    }
}
