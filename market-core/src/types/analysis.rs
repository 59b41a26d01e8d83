use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Discriminator for stored analysis documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Quote,
    Historical,
    Technical,
    MarketOverview,
}

impl AnalysisType {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisType::Quote => "quote",
            AnalysisType::Historical => "historical",
            AnalysisType::Technical => "technical",
            AnalysisType::MarketOverview => "market_overview",
        }
    }

    /// Keys every document of this type must carry.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            AnalysisType::Quote => &["price"],
            AnalysisType::Historical => &["bars", "period", "interval"],
            AnalysisType::Technical => &["price", "indicators"],
            AnalysisType::MarketOverview => &["quotes"],
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quote" => Some(AnalysisType::Quote),
            "historical" => Some(AnalysisType::Historical),
            "technical" => Some(AnalysisType::Technical),
            "market_overview" => Some(AnalysisType::MarketOverview),
            _ => None,
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analysis payload: a key-value map tagged with its analysis type.
///
/// Consumers match on `analysis_type` and read the keys that type declares
/// in [`AnalysisType::required_fields`]; [`AnalysisDocument::validate`]
/// enforces their presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisDocument {
    pub analysis_type: AnalysisType,
    pub fields: BTreeMap<String, Value>,
}

impl AnalysisDocument {
    pub fn new(analysis_type: AnalysisType) -> Self {
        Self {
            analysis_type,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for field in self.analysis_type.required_fields() {
            match self.fields.get(*field) {
                Some(v) if !v.is_null() => {}
                _ => {
                    return Err(ValidationError::MissingDocumentField {
                        analysis_type: self.analysis_type.to_string(),
                        field,
                    })
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_validation() {
        let doc = AnalysisDocument::new(AnalysisType::Technical)
            .with_field("price", 101.5)
            .with_field("indicators", json!({"rsi": 55.0}));
        assert!(doc.validate().is_ok());

        let missing = AnalysisDocument::new(AnalysisType::Technical).with_field("price", 1.0);
        assert_eq!(
            missing.validate(),
            Err(ValidationError::MissingDocumentField {
                analysis_type: "technical".to_string(),
                field: "indicators",
            })
        );
    }

    #[test]
    fn test_null_field_counts_as_missing() {
        let doc = AnalysisDocument::new(AnalysisType::Quote).with_field("price", Value::Null);
        assert!(doc.validate().is_err());
    }

    #[test]
    fn test_type_round_trips_through_str() {
        for t in [
            AnalysisType::Quote,
            AnalysisType::Historical,
            AnalysisType::Technical,
            AnalysisType::MarketOverview,
        ] {
            assert_eq!(AnalysisType::parse(t.as_str()), Some(t));
            assert_eq!(serde_json::to_value(t).unwrap(), t.as_str());
        }
    }
}
