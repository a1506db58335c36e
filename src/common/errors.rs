//! Error types for the application

use thiserror::Error;

/// Result type alias using our BotError
pub type Result<T> = std::result::Result<T, BotError>;

/// Recovery class of an error.
///
/// The controller decides what to do after a failure from the kind alone:
/// transport drops are retried by the feed supervisor, rejections and missing
/// data end the current decision cycle, inconsistencies trigger a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Feed or connection dropped; reconnect with backoff
    Transport,
    /// The exchange refused an order or setting
    ExchangeRejection,
    /// Price/candle data could not be fetched this cycle
    DataUnavailable,
    /// Local position state disagrees with the exchange
    StateInconsistency,
    /// Anything else (bad config, parse failures, bugs)
    Internal,
}

/// Main error type for bot operations
#[derive(Error, Debug)]
pub enum BotError {
    /// WebSocket or stream transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// Order or setting refused by the exchange
    #[error("Exchange rejected request (code {code}): {message}")]
    ExchangeRejection { code: i64, message: String },

    /// Market data could not be obtained
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// Local state does not match the exchange
    #[error("State inconsistency: {0}")]
    StateInconsistency(String),

    /// HTTP request errors
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Invalid API response
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Database errors from the audit trail
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BotError {
    /// Shorthand for an exchange rejection without a numeric code
    pub fn rejected(message: impl Into<String>) -> Self {
        BotError::ExchangeRejection {
            code: 0,
            message: message.into(),
        }
    }

    /// Classify this error into its recovery kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            BotError::Transport(_) | BotError::Timeout(_) => ErrorKind::Transport,
            BotError::HttpRequest(e) if e.is_connect() || e.is_timeout() => {
                ErrorKind::DataUnavailable
            }
            BotError::ExchangeRejection { .. } => ErrorKind::ExchangeRejection,
            BotError::DataUnavailable(_) => ErrorKind::DataUnavailable,
            BotError::StateInconsistency(_) => ErrorKind::StateInconsistency,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BotError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BotError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            BotError::Transport("closed".into()).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            BotError::rejected("Margin is insufficient.").kind(),
            ErrorKind::ExchangeRejection
        );
        assert_eq!(
            BotError::DataUnavailable("no price".into()).kind(),
            ErrorKind::DataUnavailable
        );
        assert_eq!(
            BotError::Configuration("bad".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_rejection_message() {
        let err = BotError::ExchangeRejection {
            code: -2019,
            message: "Margin is insufficient.".into(),
        };
        assert_eq!(
            err.to_string(),
            "Exchange rejected request (code -2019): Margin is insufficient."
        );
    }
}
