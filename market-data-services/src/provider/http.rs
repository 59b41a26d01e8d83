use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::error::MarketDataError;

const USER_AGENT: &str = concat!("market-mcp/", env!("CARGO_PKG_VERSION"));

/// Shared client settings. The aggregator enforces its own per-attempt
/// deadline; this timeout only backstops direct use of a client.
pub(crate) fn build_client() -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(15))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        })
}

/// GET `url` with `query` and decode the JSON body.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    provider: &str,
    url: &str,
    query: &[(&str, &str)],
) -> Result<T, MarketDataError> {
    let response = client
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| MarketDataError::http(provider, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(MarketDataError::Status {
            provider: provider.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| MarketDataError::http(provider, e))?;

    serde_json::from_str(&body).map_err(|e| MarketDataError::decode(provider, e.to_string()))
}

/// Parse a numeric field that providers sometimes send as a string.
pub(crate) fn parse_number(raw: &str) -> Option<f64> {
    raw.trim()
        .trim_end_matches('%')
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 189.25 "), Some(189.25));
        assert_eq!(parse_number("-1.23%"), Some(-1.23));
        assert_eq!(parse_number("n/a"), None);
        assert_eq!(parse_number("NaN"), None);
    }
}
