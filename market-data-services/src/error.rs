use thiserror::Error;

/// Errors raised while talking to an upstream market-data provider.
///
/// None of these are fatal to the aggregator: every variant ends in "try the
/// next provider" or "no data".
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// Local fixed-window limiter rejected the call before any network I/O.
    #[error("Rate limit exceeded: {provider}")]
    RateLimitExceeded { provider: String },

    /// Circuit breaker is open for this provider.
    #[error("Provider unavailable (circuit open): {provider}")]
    ProviderUnavailable { provider: String },

    #[error("Timeout: {provider}")]
    Timeout { provider: String },

    #[error("HTTP error from {provider}: {source}")]
    Http {
        provider: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} returned HTTP {status}")]
    Status { provider: String, status: u16 },

    #[error("Failed to decode {provider} response: {message}")]
    Decode { provider: String, message: String },

    #[error("{provider} has no data for {symbol}")]
    NoData { provider: String, symbol: String },

    #[error("{provider} does not support {operation}")]
    NotSupported {
        provider: String,
        operation: &'static str,
    },

    #[error("Request cancelled")]
    Cancelled,
}

impl MarketDataError {
    pub fn http(provider: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::Timeout {
                provider: provider.to_string(),
            };
        }
        Self::Http {
            provider: provider.to_string(),
            source,
        }
    }

    pub fn decode(provider: &str, message: impl Into<String>) -> Self {
        Self::Decode {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn no_data(provider: &str, symbol: &str) -> Self {
        Self::NoData {
            provider: provider.to_string(),
            symbol: symbol.to_string(),
        }
    }

    /// Whether another attempt against the same provider may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Http { .. } => true,
            Self::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Whether this outcome says something about the provider's health and
    /// should count against its circuit breaker. Client-side statuses such as
    /// 404 for an unknown ticker do not.
    pub fn is_provider_fault(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Http { .. } | Self::Decode { .. } => true,
            Self::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache payload error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid analysis document: {0}")]
    Invalid(#[from] market_core::ValidationError),

    #[error("Analysis store backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let timeout = MarketDataError::Timeout {
            provider: "yahoo".to_string(),
        };
        assert!(timeout.is_retryable());
        assert!(timeout.is_provider_fault());

        let throttled = MarketDataError::Status {
            provider: "yahoo".to_string(),
            status: 429,
        };
        assert!(throttled.is_retryable());

        let not_found = MarketDataError::Status {
            provider: "yahoo".to_string(),
            status: 404,
        };
        assert!(!not_found.is_retryable());
        assert!(!not_found.is_provider_fault());

        let unavailable = MarketDataError::Status {
            provider: "yahoo".to_string(),
            status: 503,
        };
        assert!(unavailable.is_provider_fault());
        assert!(throttled.is_provider_fault());

        let skipped = MarketDataError::RateLimitExceeded {
            provider: "alpha_vantage".to_string(),
        };
        assert!(!skipped.is_retryable());
        assert!(!skipped.is_provider_fault());

        let missing = MarketDataError::no_data("yahoo", "ZZZZ");
        assert!(!missing.is_retryable());
        assert!(!missing.is_provider_fault());

        assert!(!MarketDataError::Cancelled.is_retryable());
    }
}
