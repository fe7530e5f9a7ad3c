//! Unified error handling for the FX grid bot
//!
//! Every venue, cache and strategy failure is funnelled into [`TradingError`].
//! Venue rejections are classified once, at the adapter boundary, into a
//! [`RejectReason`] so nothing above the gateway ever matches on raw text.

use std::fmt;
use std::io;

/// Classified reason for a venue order rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InsufficientFunds,
    MinimumSizeViolation,
    InvalidUnits,
    InvalidPrice,
    InvalidTakeProfit,
    InvalidTrailingStop,
    InvalidInstrument,
    Unknown,
}

impl RejectReason {
    /// Classify free-form venue error text.
    ///
    /// Matching ignores case, underscores and spaces so `TAKE_PROFIT_ON_FILL_PRICE_INVALID`
    /// and "take profit price invalid" land on the same reason. Exit-order patterns are
    /// tested before `minimum`, and specific ones before the generic `price` / `units` ones.
    pub fn classify(text: &str) -> Self {
        let normalized: String = text
            .chars()
            .filter(|c| !matches!(c, '_' | ' ' | '-'))
            .flat_map(char::to_lowercase)
            .collect();

        if normalized.contains("insufficient") {
            RejectReason::InsufficientFunds
        } else if normalized.contains("takeprofit") {
            RejectReason::InvalidTakeProfit
        } else if normalized.contains("trailingstop") {
            RejectReason::InvalidTrailingStop
        } else if normalized.contains("minimum") {
            RejectReason::MinimumSizeViolation
        } else if normalized.contains("units") {
            RejectReason::InvalidUnits
        } else if normalized.contains("price") {
            RejectReason::InvalidPrice
        } else if normalized.contains("instrument") {
            RejectReason::InvalidInstrument
        } else {
            RejectReason::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InsufficientFunds => "insufficient funds",
            RejectReason::MinimumSizeViolation => "minimum order size not met",
            RejectReason::InvalidUnits => "invalid units",
            RejectReason::InvalidPrice => "invalid price",
            RejectReason::InvalidTakeProfit => "invalid take profit",
            RejectReason::InvalidTrailingStop => "invalid trailing stop",
            RejectReason::InvalidInstrument => "invalid instrument",
            RejectReason::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the grid bot
#[derive(Debug)]
pub enum TradingError {
    // Market data / indicator errors
    MarketData(String),
    Indicator(String),

    // Execution errors
    OrderRejected { reason: RejectReason, message: String },
    InsufficientFunds { instrument: String, allocated: f64 },

    // Streaming errors
    Stream(String),

    // Configuration errors
    Configuration(String),

    // API errors
    ApiConnection(String),
    ApiAuthentication(String),
    ApiRateLimit(String),
    ApiResponse(String),
    ApiTimeout(String),

    // Database errors
    DatabaseQuery(String),
    DatabaseConstraint(String),
    DatabaseMigration(String),

    // IO errors
    FileRead(String),
    FileWrite(String),

    Internal(String),
}

impl TradingError {
    /// Build a classified rejection from venue error text
    pub fn rejected(message: impl Into<String>) -> Self {
        let message = message.into();
        TradingError::OrderRejected {
            reason: RejectReason::classify(&message),
            message,
        }
    }

    /// Check if error is retryable by the next polling cycle
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TradingError::ApiTimeout(_)
                | TradingError::ApiConnection(_)
                | TradingError::ApiRateLimit(_)
                | TradingError::MarketData(_)
                | TradingError::Stream(_)
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            TradingError::MarketData(_) | TradingError::Indicator(_) => "market_data",

            TradingError::OrderRejected { .. } | TradingError::InsufficientFunds { .. } => {
                "execution"
            }

            TradingError::Stream(_) => "stream",

            TradingError::Configuration(_) => "config",

            TradingError::ApiConnection(_)
            | TradingError::ApiAuthentication(_)
            | TradingError::ApiRateLimit(_)
            | TradingError::ApiResponse(_)
            | TradingError::ApiTimeout(_) => "api",

            TradingError::DatabaseQuery(_)
            | TradingError::DatabaseConstraint(_)
            | TradingError::DatabaseMigration(_) => "database",

            TradingError::FileRead(_) | TradingError::FileWrite(_) => "io",

            TradingError::Internal(_) => "internal",
        }
    }

    /// Rejection reason, if this is a classified venue rejection
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            TradingError::OrderRejected { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for TradingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingError::MarketData(msg) => write!(f, "Market data error: {}", msg),
            TradingError::Indicator(msg) => write!(f, "Indicator error: {}", msg),

            TradingError::OrderRejected { reason, message } => {
                write!(f, "Order rejected ({}): {}", reason, message)
            }
            TradingError::InsufficientFunds { instrument, allocated } => {
                write!(
                    f,
                    "Insufficient funds for {}: allocation {:.2} sizes to zero units",
                    instrument, allocated
                )
            }

            TradingError::Stream(msg) => write!(f, "Stream error: {}", msg),

            TradingError::Configuration(msg) => write!(f, "Configuration error: {}", msg),

            TradingError::ApiConnection(msg) => write!(f, "API connection error: {}", msg),
            TradingError::ApiAuthentication(msg) => {
                write!(f, "API authentication failed: {}", msg)
            }
            TradingError::ApiRateLimit(msg) => write!(f, "API rate limit exceeded: {}", msg),
            TradingError::ApiResponse(msg) => write!(f, "API response error: {}", msg),
            TradingError::ApiTimeout(msg) => write!(f, "API timeout: {}", msg),

            TradingError::DatabaseQuery(msg) => write!(f, "Database query error: {}", msg),
            TradingError::DatabaseConstraint(msg) => {
                write!(f, "Database constraint violation: {}", msg)
            }
            TradingError::DatabaseMigration(msg) => {
                write!(f, "Database migration error: {}", msg)
            }

            TradingError::FileRead(msg) => write!(f, "File read error: {}", msg),
            TradingError::FileWrite(msg) => write!(f, "File write error: {}", msg),

            TradingError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for TradingError {}

// Conversion implementations for common error types

impl From<io::Error> for TradingError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => TradingError::ApiTimeout(err.to_string()),
            io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => {
                TradingError::ApiConnection(err.to_string())
            }
            _ => TradingError::FileRead(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for TradingError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(_, Some(msg)) => {
                if msg.contains("constraint") {
                    TradingError::DatabaseConstraint(msg)
                } else {
                    TradingError::DatabaseQuery(msg)
                }
            }
            rusqlite::Error::QueryReturnedNoRows => {
                TradingError::DatabaseQuery("Query returned no rows".to_string())
            }
            _ => TradingError::DatabaseQuery(err.to_string()),
        }
    }
}

impl From<refinery::Error> for TradingError {
    fn from(err: refinery::Error) -> Self {
        TradingError::DatabaseMigration(err.to_string())
    }
}

impl From<serde_json::Error> for TradingError {
    fn from(err: serde_json::Error) -> Self {
        TradingError::ApiResponse(format!("JSON parse error: {}", err))
    }
}

impl From<reqwest::Error> for TradingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TradingError::ApiTimeout(err.to_string())
        } else if err.is_connect() {
            TradingError::ApiConnection(err.to_string())
        } else if err.is_decode() {
            TradingError::ApiResponse(err.to_string())
        } else if err.is_status() {
            TradingError::ApiResponse(err.to_string())
        } else {
            TradingError::ApiConnection(err.to_string())
        }
    }
}

impl From<crate::config::ConfigError> for TradingError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::FileRead(msg) => TradingError::FileRead(msg),
            ConfigError::FileWrite(msg) => TradingError::FileWrite(msg),
            ConfigError::Parse(msg)
            | ConfigError::Serialize(msg)
            | ConfigError::Validation(msg)
            | ConfigError::MissingCredential(msg) => TradingError::Configuration(msg),
        }
    }
}

/// Result type alias using TradingError
pub type TradingResult<T> = Result<T, TradingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_oanda_reject_codes() {
        assert_eq!(RejectReason::classify("INSUFFICIENT_MARGIN"), RejectReason::InsufficientFunds);
        assert_eq!(
            RejectReason::classify("UNITS_MINIMUM_NOT_MET"),
            RejectReason::MinimumSizeViolation
        );
        assert_eq!(RejectReason::classify("UNITS_INVALID"), RejectReason::InvalidUnits);
        assert_eq!(RejectReason::classify("PRICE_PRECISION_EXCEEDED"), RejectReason::InvalidPrice);
        assert_eq!(
            RejectReason::classify("TAKE_PROFIT_ON_FILL_PRICE_INVALID"),
            RejectReason::InvalidTakeProfit
        );
        assert_eq!(
            RejectReason::classify("TRAILING_STOP_LOSS_ON_FILL_PRICE_DISTANCE_MAXIMUM_EXCEEDED"),
            RejectReason::InvalidTrailingStop
        );
        assert_eq!(RejectReason::classify("INSTRUMENT_NOT_TRADEABLE"), RejectReason::InvalidInstrument);
        assert_eq!(RejectReason::classify("MARKET_HALTED"), RejectReason::Unknown);
    }

    #[test]
    fn test_classify_exit_minimums_by_exit_kind() {
        assert_eq!(
            RejectReason::classify("TRAILING_STOP_LOSS_ON_FILL_PRICE_DISTANCE_MINIMUM_NOT_MET"),
            RejectReason::InvalidTrailingStop
        );
        assert_eq!(
            RejectReason::classify("TAKE_PROFIT_ON_FILL_PRICE_DISTANCE_MINIMUM_NOT_MET"),
            RejectReason::InvalidTakeProfit
        );
        assert_eq!(
            RejectReason::classify("UNITS_MINIMUM_NOT_MET"),
            RejectReason::MinimumSizeViolation
        );
    }

    #[test]
    fn test_classify_free_text() {
        assert_eq!(
            RejectReason::classify("The take profit price is invalid"),
            RejectReason::InvalidTakeProfit
        );
        assert_eq!(
            RejectReason::classify("Insufficient funds to create order"),
            RejectReason::InsufficientFunds
        );
    }

    #[test]
    fn test_error_category() {
        let err = TradingError::Configuration("test".to_string());
        assert_eq!(err.category(), "config");

        let err = TradingError::rejected("UNITS_INVALID");
        assert_eq!(err.category(), "execution");
        assert_eq!(err.reject_reason(), Some(RejectReason::InvalidUnits));

        let err = TradingError::ApiTimeout("test".to_string());
        assert_eq!(err.category(), "api");
    }

    #[test]
    fn test_retryable() {
        assert!(TradingError::Stream("reset by peer".to_string()).is_retryable());
        assert!(TradingError::MarketData("no candles".to_string()).is_retryable());
        assert!(!TradingError::rejected("PRICE_INVALID").is_retryable());
    }

    #[test]
    fn test_display_includes_reason() {
        let err = TradingError::rejected("INSUFFICIENT_MARGIN");
        let text = err.to_string();
        assert!(text.contains("insufficient funds"));
        assert!(text.contains("INSUFFICIENT_MARGIN"));
    }
}
