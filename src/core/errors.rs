use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Coarse meaning of an exchange error code.
///
/// The same numeric code means the same thing on every endpoint, so the mapping
/// lives in an [`ErrorCodeTable`] owned by the exchange module rather than in
/// the endpoint wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Exchange-side failure or overload.
    Server,
    /// Missing, malformed or rejected API key / signature.
    Authentication,
    /// Request timestamp outside the accepted receive window.
    Timestamp,
    /// Request-rate or order-rate limit reached.
    RateLimit,
    /// A request parameter failed validation.
    InvalidParameter,
    /// The matching engine refused the order or cancel.
    OrderRejected,
    /// The referenced order does not exist.
    OrderNotFound,
    /// Position mode / margin type / position side conflicts.
    PositionConflict,
    /// Anything the table does not know about.
    Unknown,
}

/// Data-driven lookup from exchange error codes to [`ErrorCategory`].
#[derive(Debug, Clone, Copy)]
pub struct ErrorCodeTable {
    entries: &'static [(i64, ErrorCategory)],
}

impl ErrorCodeTable {
    pub const fn new(entries: &'static [(i64, ErrorCategory)]) -> Self {
        Self { entries }
    }

    pub const fn empty() -> Self {
        Self { entries: &[] }
    }

    /// Categorize a response. Unknown codes on 5xx responses count as server errors.
    pub fn classify(&self, status_code: u16, code: i64) -> ErrorCategory {
        self.entries
            .iter()
            .find(|(known, _)| *known == code)
            .map_or_else(
                || {
                    if status_code >= 500 {
                        ErrorCategory::Server
                    } else {
                        ErrorCategory::Unknown
                    }
                },
                |(_, category)| *category,
            )
    }
}

impl Default for ErrorCodeTable {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("API error (HTTP {status_code}): {code} - {message}")]
    ApiError {
        status_code: u16,
        code: i64,
        message: String,
        category: ErrorCategory,
    },

    #[error("Signing error: {0}")]
    SigningError(String),

    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    #[error("Banned by the exchange until {until}")]
    Banned { until: DateTime<Utc> },

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    #[error("Other error: {0}")]
    Other(String),
}

impl ExchangeError {
    /// Whether the REST executor may transparently re-issue the request.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransportError(_) | Self::ConnectionTimeout(_) => true,
            Self::RateLimitExceeded { .. } => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ApiError { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Exchange-specific numeric code, if the exchange supplied one.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::ApiError { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::ApiError { category, .. } => Some(*category),
            Self::RateLimitExceeded { .. } | Self::Banned { .. } => Some(ErrorCategory::RateLimit),
            _ => None,
        }
    }
}
