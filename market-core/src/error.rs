use thiserror::Error;

/// Reasons a market observation or request value is rejected at ingestion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} must be finite and positive, got {value}")]
    NonPositive { field: &'static str, value: f64 },

    #[error("volume must be finite and >= 0, got {0}")]
    NegativeVolume(f64),

    #[error("inconsistent bar: high={high} low={low} open={open} close={close}")]
    InconsistentRange {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },

    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("unsupported period '{0}'")]
    UnsupportedPeriod(String),

    #[error("unsupported interval '{0}'")]
    UnsupportedInterval(String),

    #[error("{analysis_type} document is missing required field '{field}'")]
    MissingDocumentField {
        analysis_type: String,
        field: &'static str,
    },
}
