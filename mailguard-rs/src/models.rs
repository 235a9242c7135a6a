//! Data exchanged between the page, the cache and the analysis backend

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable token identifying which message is currently displayed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailIdentifier(String);

impl EmailIdentifier {
    /// Build an identifier, rejecting blank values
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == value.len() {
            Some(Self(value))
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmailIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A link found in the email body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRef {
    /// Destination after redirect unwrapping
    pub href: String,
    /// Visible label, truncated
    pub text: String,
}

/// Email content scraped from the page, sent as the analysis request body
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedEmail {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body_text: String,
    #[serde(default)]
    pub body_html: String,
    #[serde(default)]
    pub links: Vec<LinkRef>,
}

impl ExtractedEmail {
    /// A subject or a sender is enough to ask for an analysis
    pub fn is_analyzable(&self) -> bool {
        !self.subject.is_empty() || !self.sender.is_empty()
    }
}

/// Backend-assigned risk category
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RiskLevel {
    Safe,
    Suspicious,
    Risky,
    Dangerous,
    /// Any label this client does not know, kept verbatim
    Other(String),
}

impl RiskLevel {
    pub fn as_str(&self) -> &str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Suspicious => "suspicious",
            RiskLevel::Risky => "risky",
            RiskLevel::Dangerous => "dangerous",
            RiskLevel::Other(label) => label,
        }
    }

    /// Label as shown on the result banner
    pub fn display_label(&self) -> String {
        self.as_str().to_uppercase()
    }

    /// Badge colour for a link with this risk level
    pub fn badge_color(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "#28a745",
            RiskLevel::Suspicious => "#ffc107",
            _ => "#dc3545",
        }
    }
}

impl From<String> for RiskLevel {
    fn from(value: String) -> Self {
        match value.as_str() {
            "safe" => RiskLevel::Safe,
            "suspicious" => RiskLevel::Suspicious,
            "risky" => RiskLevel::Risky,
            "dangerous" => RiskLevel::Dangerous,
            _ => RiskLevel::Other(value),
        }
    }
}

impl From<RiskLevel> for String {
    fn from(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Other(label) => label,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict for the email as a whole
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub trust_percent: u32,
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phishing_prob: Option<f64>,
}

/// Verdict for one link of the email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkAssessment {
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub trust_percent: u32,
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phishing_prob: Option<f64>,
}

impl LinkAssessment {
    /// Tooltip text for the badge placed next to the link
    pub fn tooltip(&self) -> String {
        let mut text = format!("Risk Level: {}\nURL: {}", self.risk_level, self.href);
        if let Some(explanation) = self.explanation.as_deref().filter(|e| !e.is_empty()) {
            text.push_str("\n\nAnalysis: ");
            text.push_str(explanation);
        }
        if !self.flags.is_empty() {
            text.push_str("\n\nIndicators:\n");
            text.push_str(&self.flags.join("\n"));
        }
        text
    }
}

/// Analysis returned by the backend for one email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub email: Assessment,
    #[serde(default)]
    pub links: Vec<LinkAssessment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_risk_level: Option<RiskLevel>,
}

impl AnalysisResult {
    /// Per-link verdict for an unwrapped URL
    pub fn link(&self, href: &str) -> Option<&LinkAssessment> {
        self.links.iter().find(|link| link.href == href)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_rejects_blank() {
        assert!(EmailIdentifier::new("").is_none());
        assert!(EmailIdentifier::new("   ").is_none());
        assert_eq!(EmailIdentifier::new(" #msg-f:1 ").unwrap().as_str(), "#msg-f:1");
    }

    #[test]
    fn test_analyzable() {
        let mut email = ExtractedEmail {
            subject: "Invoice Due".to_string(),
            body_text: "Please pay".to_string(),
            ..Default::default()
        };
        assert!(email.is_analyzable());

        email.subject.clear();
        assert!(!email.is_analyzable());

        email.sender = "billing@example.com".to_string();
        assert!(email.is_analyzable());
    }

    #[test]
    fn test_request_uses_camel_case() {
        let email = ExtractedEmail {
            sender: "a@example.com".to_string(),
            subject: "Hi".to_string(),
            body_text: "text".to_string(),
            body_html: "<p>text</p>".to_string(),
            links: vec![LinkRef {
                href: "https://example.com".to_string(),
                text: "Example".to_string(),
            }],
        };
        let json = serde_json::to_value(&email).unwrap();
        assert_eq!(json["bodyText"], "text");
        assert_eq!(json["bodyHtml"], "<p>text</p>");
        assert_eq!(json["links"][0]["href"], "https://example.com");
    }

    #[test]
    fn test_parse_backend_response() {
        let raw = r#"{
            "email": {"phishing_prob": 0.08, "trust_percent": 92, "risk_level": "safe",
                      "explanation": "No phishing indicators detected.", "flags": []},
            "links": [{"href": "http://198.51.100.7/login", "text": "Login", "phishing_prob": 0.9,
                       "trust_percent": 10, "risk_level": "dangerous",
                       "flags": ["IP address used instead of domain name"]}],
            "overall_risk_level": "suspicious"
        }"#;
        let result: AnalysisResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.email.trust_percent, 92);
        assert_eq!(result.email.risk_level, RiskLevel::Safe);
        assert_eq!(result.overall_risk_level, Some(RiskLevel::Suspicious));
        let link = result.link("http://198.51.100.7/login").unwrap();
        assert_eq!(link.risk_level, RiskLevel::Dangerous);
        assert_eq!(link.flags.len(), 1);
    }

    #[test]
    fn test_missing_email_is_malformed() {
        let raw = r#"{"links": []}"#;
        assert!(serde_json::from_str::<AnalysisResult>(raw).is_err());
    }

    #[test]
    fn test_unknown_risk_level_kept() {
        let level: RiskLevel = serde_json::from_str("\"quarantined\"").unwrap();
        assert_eq!(level, RiskLevel::Other("quarantined".to_string()));
        assert_eq!(serde_json::to_string(&level).unwrap(), "\"quarantined\"");
        assert_eq!(level.display_label(), "QUARANTINED");
        assert_eq!(level.badge_color(), "#dc3545");
    }

    #[test]
    fn test_tooltip() {
        let link = LinkAssessment {
            href: "https://bit.ly/x".to_string(),
            text: None,
            trust_percent: 40,
            risk_level: RiskLevel::Risky,
            explanation: Some("URL has some suspicious characteristics".to_string()),
            flags: vec!["URL shortener detected".to_string()],
            phishing_prob: None,
        };
        let tooltip = link.tooltip();
        assert!(tooltip.starts_with("Risk Level: risky\nURL: https://bit.ly/x"));
        assert!(tooltip.contains("Analysis: URL has some suspicious characteristics"));
        assert!(tooltip.ends_with("Indicators:\nURL shortener detected"));
    }
}
