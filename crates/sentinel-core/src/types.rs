use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last-price snapshot for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
    /// True when the quote was synthesized locally because no market-data
    /// credential was configured or the fetch failed.
    #[serde(default)]
    pub simulated: bool,
}

/// One insider transaction filing entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsiderTransaction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub share: Option<f64>,
    #[serde(default)]
    pub change: Option<f64>,
    #[serde(default)]
    pub filing_date: Option<String>,
    #[serde(default)]
    pub transaction_date: Option<String>,
    #[serde(default)]
    pub transaction_code: Option<String>,
    #[serde(default)]
    pub transaction_price: Option<f64>,
}

/// News/social document used as scoring context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub source: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub url: String,
    pub published_utc: DateTime<Utc>,
}

/// Trade pushed by the live event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    /// Exchange timestamp, unix milliseconds
    pub timestamp: i64,
}

/// Aggregated per-symbol inputs handed to a scorer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketBundle {
    pub quote: Quote,
    pub insider: Vec<InsiderTransaction>,
}

/// Risk tier attached to an assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        }
    }

    /// Case-insensitive parse used when reading free-form oracle output.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            "critical" => Some(RiskLevel::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scoring pass over a symbol's aggregated data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    /// 0-100
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub prediction: String,
    pub risk_level: RiskLevel,
}

/// A published high-confidence detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub prediction: String,
    pub risk_level: RiskLevel,
}

impl Alert {
    pub fn from_assessment(id: u64, symbol: impl Into<String>, assessment: Assessment) -> Self {
        Self {
            id,
            symbol: symbol.into(),
            timestamp: Utc::now(),
            confidence: assessment.confidence,
            evidence: assessment.evidence,
            prediction: assessment.prediction,
            risk_level: assessment.risk_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_labels() {
        assert_eq!(RiskLevel::from_label("critical"), Some(RiskLevel::Critical));
        assert_eq!(RiskLevel::from_label(" HIGH "), Some(RiskLevel::High));
        assert_eq!(RiskLevel::from_label("medium"), Some(RiskLevel::Medium));
        assert_eq!(RiskLevel::from_label("none"), None);
        assert_eq!(RiskLevel::Critical.as_str(), "Critical");
    }

    #[test]
    fn test_quote_simulated_defaults_false() {
        let json = r#"{
            "symbol": "AAPL",
            "price": 187.4,
            "change": 1.2,
            "change_percent": 0.64,
            "volume": 51230000.0,
            "timestamp": "2024-05-01T14:30:00Z"
        }"#;
        let quote: Quote = serde_json::from_str(json).unwrap();
        assert!(!quote.simulated);
        assert_eq!(quote.symbol, "AAPL");
    }

    #[test]
    fn test_alert_carries_assessment_fields() {
        let assessment = Assessment {
            confidence: 91.0,
            evidence: vec!["unusual volume".to_string()],
            prediction: "movement expected".to_string(),
            risk_level: RiskLevel::High,
        };
        let alert = Alert::from_assessment(7, "NVDA", assessment.clone());
        assert_eq!(alert.id, 7);
        assert_eq!(alert.symbol, "NVDA");
        assert_eq!(alert.confidence, assessment.confidence);
        assert_eq!(alert.evidence, assessment.evidence);
        assert_eq!(alert.risk_level, RiskLevel::High);
    }
}
