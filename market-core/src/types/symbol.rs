use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Broad instrument category reported by symbol search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Equity,
    Etf,
    Index,
    Crypto,
    Currency,
    Other,
}

impl AssetClass {
    /// Map a provider's free-form instrument type label.
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "equity" | "stock" | "common stock" => Self::Equity,
            "etf" | "mutualfund" | "mutual fund" => Self::Etf,
            "index" => Self::Index,
            "cryptocurrency" | "crypto" => Self::Crypto,
            "currency" | "physical currency" => Self::Currency,
            _ => Self::Other,
        }
    }
}

/// One symbol search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolMatch {
    pub symbol: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    pub asset_class: AssetClass,
    pub source: String,
}

/// Trim and upper-case a ticker, rejecting empty or malformed input.
pub fn normalize_symbol(raw: &str) -> Result<String, ValidationError> {
    let symbol = raw.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(ValidationError::EmptySymbol);
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=' | '/');
    if symbol.len() > 24 || !symbol.chars().all(allowed) {
        return Err(ValidationError::InvalidSymbol(raw.to_string()));
    }
    Ok(symbol)
}

/// Look-back range for historical requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "5d")]
    FiveDays,
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
    #[serde(rename = "ytd")]
    YearToDate,
    #[serde(rename = "max")]
    Max,
}

impl Period {
    pub const ALL: [Period; 10] = [
        Period::OneDay,
        Period::FiveDays,
        Period::OneMonth,
        Period::ThreeMonths,
        Period::SixMonths,
        Period::OneYear,
        Period::TwoYears,
        Period::FiveYears,
        Period::YearToDate,
        Period::Max,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Period::OneDay => "1d",
            Period::FiveDays => "5d",
            Period::OneMonth => "1mo",
            Period::ThreeMonths => "3mo",
            Period::SixMonths => "6mo",
            Period::OneYear => "1y",
            Period::TwoYears => "2y",
            Period::FiveYears => "5y",
            Period::YearToDate => "ytd",
            Period::Max => "max",
        }
    }

    /// Approximate number of calendar days covered. `ytd` is treated as a
    /// full year and `max` as twenty.
    pub fn approx_days(self) -> u32 {
        match self {
            Period::OneDay => 1,
            Period::FiveDays => 5,
            Period::OneMonth => 30,
            Period::ThreeMonths => 90,
            Period::SixMonths => 180,
            Period::OneYear | Period::YearToDate => 365,
            Period::TwoYears => 730,
            Period::FiveYears => 1825,
            Period::Max => 7300,
        }
    }
}

impl FromStr for Period {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Period::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| ValidationError::UnsupportedPeriod(s.to_string()))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bar width for historical requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1wk")]
    OneWeek,
    #[serde(rename = "1mo")]
    OneMonth,
}

impl Interval {
    pub const ALL: [Interval; 8] = [
        Interval::OneMinute,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::ThirtyMinutes,
        Interval::OneHour,
        Interval::OneDay,
        Interval::OneWeek,
        Interval::OneMonth,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::OneDay => "1d",
            Interval::OneWeek => "1wk",
            Interval::OneMonth => "1mo",
        }
    }

    pub fn is_intraday(self) -> bool {
        matches!(
            self,
            Interval::OneMinute
                | Interval::FiveMinutes
                | Interval::FifteenMinutes
                | Interval::ThirtyMinutes
                | Interval::OneHour
        )
    }
}

impl FromStr for Interval {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Interval::ALL
            .into_iter()
            .find(|i| i.as_str() == wanted)
            .ok_or_else(|| ValidationError::UnsupportedInterval(s.to_string()))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol(" aapl ").unwrap(), "AAPL");
        assert_eq!(normalize_symbol("btc-usd").unwrap(), "BTC-USD");
        assert_eq!(normalize_symbol("^gspc").unwrap(), "^GSPC");
        assert_eq!(normalize_symbol("   "), Err(ValidationError::EmptySymbol));
        assert!(normalize_symbol("AAPL; DROP").is_err());
    }

    #[test]
    fn test_period_parsing() {
        assert_eq!("1mo".parse::<Period>().unwrap(), Period::OneMonth);
        assert_eq!("YTD".parse::<Period>().unwrap(), Period::YearToDate);
        assert!("7w".parse::<Period>().is_err());
        assert_eq!(Period::SixMonths.to_string(), "6mo");
    }

    #[test]
    fn test_interval_parsing() {
        assert_eq!("1wk".parse::<Interval>().unwrap(), Interval::OneWeek);
        assert!("2h".parse::<Interval>().is_err());
        assert!(Interval::FiveMinutes.is_intraday());
        assert!(!Interval::OneDay.is_intraday());
    }

    #[test]
    fn test_period_serde_matches_as_str() {
        for period in Period::ALL {
            let json = serde_json::to_value(period).unwrap();
            assert_eq!(json, period.as_str());
        }
    }

    #[test]
    fn test_asset_class_labels() {
        assert_eq!(AssetClass::from_label("EQUITY"), AssetClass::Equity);
        assert_eq!(AssetClass::from_label("CRYPTOCURRENCY"), AssetClass::Crypto);
        assert_eq!(AssetClass::from_label("FUTURE"), AssetClass::Other);
    }
}
