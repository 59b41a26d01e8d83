use crate::error::ValidationError;
use crate::types::TimestampMS;
use serde::{Deserialize, Serialize};

/// Latest price snapshot for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    #[serde(rename = "timestampMs")]
    pub timestamp: TimestampMS,
    pub source: String,
}

impl Quote {
    /// Build a quote from the current price and previous close, deriving the
    /// absolute and percentage change.
    pub fn from_previous_close(
        symbol: impl Into<String>,
        price: f64,
        previous_close: Option<f64>,
        timestamp: TimestampMS,
        source: impl Into<String>,
    ) -> Self {
        let (change, change_percent) = match previous_close {
            Some(prev) if prev.is_finite() && prev > 0.0 => {
                let change = price - prev;
                (change, change / prev * 100.0)
            }
            _ => (0.0, 0.0),
        };

        Self {
            symbol: symbol.into(),
            price,
            change,
            change_percent,
            timestamp,
            source: source.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.symbol.trim().is_empty() {
            return Err(ValidationError::EmptySymbol);
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(ValidationError::NonPositive {
                field: "price",
                value: self.price,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_from_previous_close() {
        let quote = Quote::from_previous_close("AAPL", 110.0, Some(100.0), 0, "yahoo");
        assert_eq!(quote.change, 10.0);
        assert!((quote.change_percent - 10.0).abs() < 1e-9);
        assert!(quote.validate().is_ok());
    }

    #[test]
    fn test_missing_previous_close() {
        let quote = Quote::from_previous_close("AAPL", 110.0, None, 0, "yahoo");
        assert_eq!(quote.change, 0.0);
        assert_eq!(quote.change_percent, 0.0);
    }

    #[test]
    fn test_non_positive_price_rejected() {
        let quote = Quote::from_previous_close("AAPL", 0.0, Some(1.0), 0, "yahoo");
        assert!(quote.validate().is_err());
    }

    #[test]
    fn test_wire_field_names() {
        let quote = Quote::from_previous_close("AAPL", 1.0, None, 5, "yahoo");
        let json = serde_json::to_value(&quote).unwrap();
        assert!(json.get("changePercent").is_some());
        assert_eq!(json["timestampMs"], 5);
    }
}
