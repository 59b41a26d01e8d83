//! Crypto symbol detection and CoinGecko id lookup.

/// Ticker -> CoinGecko coin id for the assets we route without a search call.
const KNOWN_COINS: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("SOL", "solana"),
    ("BNB", "binancecoin"),
    ("XRP", "ripple"),
    ("ADA", "cardano"),
    ("DOGE", "dogecoin"),
    ("DOT", "polkadot"),
    ("AVAX", "avalanche-2"),
    ("MATIC", "matic-network"),
    ("LINK", "chainlink"),
    ("LTC", "litecoin"),
    ("TRX", "tron"),
    ("ATOM", "cosmos"),
    ("XLM", "stellar"),
    ("UNI", "uniswap"),
    ("SHIB", "shiba-inu"),
    ("USDT", "tether"),
    ("USDC", "usd-coin"),
];

const QUOTE_SUFFIXES: &[&str] = &["-USDT", "-USD", "/USDT", "/USD", "USDT"];

/// Base asset of a crypto-looking symbol: `BTC-USD`, `BTCUSDT`, `BTC/USD`
/// all give `BTC`. Plain tickers are returned unchanged.
pub fn base_asset(symbol: &str) -> String {
    let upper = symbol.trim().to_ascii_uppercase();
    for suffix in QUOTE_SUFFIXES {
        if let Some(base) = upper.strip_suffix(suffix) {
            if !base.is_empty() {
                return base.to_string();
            }
        }
    }
    upper
}

fn has_crypto_quote_suffix(upper: &str) -> bool {
    QUOTE_SUFFIXES.iter().any(|suffix| {
        upper
            .strip_suffix(suffix)
            .map(|base| (2..=10).contains(&base.len()) && base.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or(false)
    })
}

/// Whether `symbol` should be routed to the crypto provider first.
///
/// Matches the `XXX-USD`, `XXXUSDT` and `XXX/USD` pair shapes, or a bare
/// ticker from the known-coin table.
pub fn is_crypto_symbol(symbol: &str) -> bool {
    let upper = symbol.trim().to_ascii_uppercase();
    if has_crypto_quote_suffix(&upper) {
        return true;
    }
    KNOWN_COINS.iter().any(|(ticker, _)| *ticker == upper)
}

/// CoinGecko coin id for a symbol, if the base asset is in the table.
pub fn coingecko_id(symbol: &str) -> Option<&'static str> {
    let base = base_asset(symbol);
    KNOWN_COINS
        .iter()
        .find(|(ticker, _)| *ticker == base)
        .map(|(_, id)| *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_patterns() {
        assert!(is_crypto_symbol("BTC-USD"));
        assert!(is_crypto_symbol("ethusdt"));
        assert!(is_crypto_symbol("SOL/USD"));
        assert!(is_crypto_symbol("DOGE"));
    }

    #[test]
    fn test_equities_are_not_crypto() {
        assert!(!is_crypto_symbol("AAPL"));
        assert!(!is_crypto_symbol("^GSPC"));
        assert!(!is_crypto_symbol("BRK.B"));
        assert!(!is_crypto_symbol("USD"));
    }

    #[test]
    fn test_coingecko_lookup() {
        assert_eq!(coingecko_id("BTC-USD"), Some("bitcoin"));
        assert_eq!(coingecko_id("ETHUSDT"), Some("ethereum"));
        assert_eq!(coingecko_id("avax/usd"), Some("avalanche-2"));
        assert_eq!(coingecko_id("AAPL"), None);
        assert_eq!(base_asset("BTC-USD"), "BTC");
        assert_eq!(base_asset("MSFT"), "MSFT");
    }
}
