//! Rule metadata and the trait every analysis rule implements

use crate::dataflow::Timeout;
use crate::diagnostic::Severity;
use crate::dispatch::RuleContext;
use crate::syntax::{Node, SyntaxKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Rule category for grouping related rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleCategory {
    /// Code that is definitely wrong or useless
    Correctness,
    /// Code that is likely wrong or suspicious
    Suspicious,
    /// Idiomatic and consistent style rules
    #[default]
    Style,
    /// Rules that improve runtime performance or resource usage
    Perf,
    /// Extra strict rules that may have false positives
    Pedantic,
    /// Rules that ban specific patterns or features
    Restriction,
    /// Rules under development (may change or be removed)
    Nursery,
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleCategory::Correctness => write!(f, "correctness"),
            RuleCategory::Suspicious => write!(f, "suspicious"),
            RuleCategory::Style => write!(f, "style"),
            RuleCategory::Perf => write!(f, "perf"),
            RuleCategory::Pedantic => write!(f, "pedantic"),
            RuleCategory::Restriction => write!(f, "restriction"),
            RuleCategory::Nursery => write!(f, "nursery"),
        }
    }
}

impl std::str::FromStr for RuleCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "correctness" => Ok(RuleCategory::Correctness),
            "suspicious" => Ok(RuleCategory::Suspicious),
            "style" => Ok(RuleCategory::Style),
            "perf" | "performance" => Ok(RuleCategory::Perf),
            "pedantic" => Ok(RuleCategory::Pedantic),
            "restriction" => Ok(RuleCategory::Restriction),
            "nursery" | "experimental" => Ok(RuleCategory::Nursery),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

/// Rule stability level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleStability {
    /// Rule is stable and recommended for use
    #[default]
    Stable,
    /// Rule is in preview/experimental stage
    Preview,
    /// Rule is deprecated and will be removed
    Deprecated,
}

impl fmt::Display for RuleStability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleStability::Stable => write!(f, "stable"),
            RuleStability::Preview => write!(f, "preview"),
            RuleStability::Deprecated => write!(f, "deprecated"),
        }
    }
}

/// How the reporter collapses repeated issues of one rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReportPolicy {
    /// Keep every reported issue
    EveryOccurrence,
    /// At most one issue per primary span
    #[default]
    OncePerLocation,
    /// At most one issue per symbol; issues without a symbol fall back to their span
    OncePerSymbol,
}

/// A configurable rule parameter and its default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleParameter {
    pub name: String,
    pub description: String,
    pub default: serde_json::Value,
}

/// Failure raised by a rule while checking a node
#[derive(Debug, Error)]
pub enum RuleError {
    /// A configured parameter has the wrong shape
    #[error("invalid value for parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The file's analysis budget ran out inside the rule
    #[error(transparent)]
    Timeout(#[from] Timeout),

    /// Anything else the rule could not handle
    #[error("{0}")]
    Internal(String),
}

impl RuleError {
    pub fn internal(message: impl Into<String>) -> Self {
        RuleError::Internal(message.into())
    }
}

/// Static description of a rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMeta {
    /// Unique rule identifier (e.g., "dead-store")
    pub id: String,

    /// Human-readable name, also the fixture file stem
    pub name: String,

    /// Detailed description
    pub description: String,

    /// Default severity level
    #[serde(default)]
    pub severity: Severity,

    /// Rule category (correctness, style, perf, etc.)
    #[serde(default)]
    pub category: RuleCategory,

    /// Rule stability (stable, preview, deprecated)
    #[serde(default)]
    pub stability: RuleStability,

    #[serde(default)]
    pub report_policy: ReportPolicy,

    /// Whether diagnostics of this rule may carry a fix
    #[serde(default)]
    pub fixable: bool,

    #[serde(default)]
    pub parameters: Vec<RuleParameter>,

    /// Tags for categorization
    #[serde(default)]
    pub tags: Vec<String>,

    /// Rationale explaining why this rule exists
    #[serde(default)]
    pub rationale: Option<String>,

    /// Example of code that violates this rule
    #[serde(default)]
    pub example_bad: Option<String>,

    /// Example of correct code
    #[serde(default)]
    pub example_good: Option<String>,

    /// Related rule IDs
    #[serde(default)]
    pub related: Vec<String>,
}

impl RuleMeta {
    /// Create metadata with the minimal required fields
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            severity: Severity::Warning,
            category: RuleCategory::default(),
            stability: RuleStability::default(),
            report_policy: ReportPolicy::default(),
            fixable: false,
            parameters: Vec::new(),
            tags: Vec::new(),
            rationale: None,
            example_bad: None,
            example_good: None,
            related: Vec::new(),
        }
    }

    /// Set the severity
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the rule category
    pub fn with_category(mut self, category: RuleCategory) -> Self {
        self.category = category;
        self
    }

    /// Mark rule as preview/experimental
    pub fn preview(mut self) -> Self {
        self.stability = RuleStability::Preview;
        self
    }

    pub fn with_report_policy(mut self, policy: ReportPolicy) -> Self {
        self.report_policy = policy;
        self
    }

    pub fn fixable(mut self) -> Self {
        self.fixable = true;
        self
    }

    pub fn with_parameter(mut self, name: &str, description: &str, default: serde_json::Value) -> Self {
        self.parameters.push(RuleParameter {
            name: name.to_string(),
            description: description.to_string(),
            default,
        });
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    /// Set the rationale
    pub fn with_rationale(mut self, rationale: &str) -> Self {
        self.rationale = Some(rationale.to_string());
        self
    }

    /// Set bad example
    pub fn with_example_bad(mut self, example: &str) -> Self {
        self.example_bad = Some(example.to_string());
        self
    }

    /// Set good example
    pub fn with_example_good(mut self, example: &str) -> Self {
        self.example_good = Some(example.to_string());
        self
    }

    /// Add a related rule
    pub fn with_related(mut self, rule_id: &str) -> Self {
        self.related.push(rule_id.to_string());
        self
    }

    /// Check if rule is preview/experimental
    pub fn is_preview(&self) -> bool {
        self.stability == RuleStability::Preview
    }

    /// Check if rule is deprecated
    pub fn is_deprecated(&self) -> bool {
        self.stability == RuleStability::Deprecated
    }

    /// Check if rule matches the given tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Check if rule matches any of the given tags
    pub fn has_any_tag(&self, tags: &HashSet<String>) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }

    pub fn parameter(&self, name: &str) -> Option<&RuleParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// An analysis rule.
///
/// Rules are stateless and shared across threads. Anything a rule needs to
/// remember while one file is traversed lives in the context's pass state,
/// which is created fresh for every file.
pub trait Rule: Send + Sync {
    fn meta(&self) -> &RuleMeta;

    /// Node kinds this rule wants to see. Empty means only `finalize` runs.
    fn triggers(&self) -> &[SyntaxKind];

    /// Called for every node of a triggering kind, in pre-order
    fn check(&self, ctx: &RuleContext<'_>, node: Node<'_>) -> Result<(), RuleError>;

    /// Called once after the traversal, for rules that collect before reporting
    fn finalize(&self, _ctx: &RuleContext<'_>) -> Result<(), RuleError> {
        Ok(())
    }

    fn id(&self) -> &str {
        &self.meta().id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_creation() {
        let meta = RuleMeta::new("test-rule", "TestRule", "Checks things");

        assert_eq!(meta.id, "test-rule");
        assert_eq!(meta.name, "TestRule");
        assert_eq!(meta.severity, Severity::Warning);
        assert_eq!(meta.report_policy, ReportPolicy::OncePerLocation);
        assert!(!meta.fixable);
        assert!(!meta.is_preview());
    }

    #[test]
    fn test_meta_builder() {
        let meta = RuleMeta::new("complexity", "Complexity", "Too complex")
            .with_severity(Severity::Error)
            .with_category(RuleCategory::Pedantic)
            .with_report_policy(ReportPolicy::OncePerSymbol)
            .with_parameter("maximum", "Highest allowed value", serde_json::json!(10))
            .with_tag("brain-overload")
            .with_related("dead-store")
            .fixable()
            .preview();

        assert_eq!(meta.severity, Severity::Error);
        assert_eq!(meta.category, RuleCategory::Pedantic);
        assert!(meta.fixable);
        assert!(meta.is_preview());
        assert_eq!(meta.parameter("maximum").unwrap().default, serde_json::json!(10));
        assert!(meta.parameter("minimum").is_none());
        assert!(meta.has_tag("brain-overload"));
        let tags: HashSet<String> = ["other".to_string(), "brain-overload".to_string()].into();
        assert!(meta.has_any_tag(&tags));
    }

    #[test]
    fn test_category_parse_and_display() {
        assert_eq!("performance".parse::<RuleCategory>(), Ok(RuleCategory::Perf));
        assert_eq!("Correctness".parse::<RuleCategory>(), Ok(RuleCategory::Correctness));
        assert!("bogus".parse::<RuleCategory>().is_err());
        assert_eq!(RuleCategory::Suspicious.to_string(), "suspicious");
        assert_eq!(RuleStability::Preview.to_string(), "preview");
    }

    #[test]
    fn test_meta_serializes() {
        let meta = RuleMeta::new("dead-store", "DeadStores", "Useless assignment");
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["report_policy"], "once-per-location");
        assert_eq!(json["severity"], "warning");
    }

    #[test]
    fn test_rule_error_display() {
        let err = RuleError::InvalidParameter {
            name: "maximum".to_string(),
            reason: "expected an integer".to_string(),
        };
        assert_eq!(err.to_string(), "invalid value for parameter 'maximum': expected an integer");
        let timeout: RuleError = Timeout { budget_ms: 5 }.into();
        assert!(matches!(timeout, RuleError::Timeout(_)));
    }
}
