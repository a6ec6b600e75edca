//! SARIF (Static Analysis Results Interchange Format) output formatter
//!
//! SARIF 2.1.0 is understood by most CI code-scanning integrations.
//! Secondary locations become `relatedLocations`; fixes are expressed as
//! byte-offset replacements.

use super::OutputFormatter;
use crate::diagnostic::{Diagnostic, Fix, Location, Severity};
use crate::engine::LintResult;
use serde::Serialize;
use std::collections::BTreeMap;

const SARIF_SCHEMA: &str =
    "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/master/Schemata/sarif-schema-2.1.0.json";

/// SARIF formatter for CI/CD integration
#[derive(Default)]
pub struct SarifFormatter {
    /// Tool name
    pub tool_name: String,

    /// Tool version
    pub tool_version: String,

    /// Rule descriptions by id, used for the driver's rule table
    pub descriptions: BTreeMap<String, String>,
}

impl SarifFormatter {
    /// Create a new SARIF formatter
    pub fn new(tool_name: &str, tool_version: &str) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            tool_version: tool_version.to_string(),
            descriptions: BTreeMap::new(),
        }
    }

    /// Describe rules in the driver's rule table
    pub fn with_descriptions<'a>(mut self, rules: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        self.descriptions
            .extend(rules.into_iter().map(|(id, d)| (id.to_string(), d.to_string())));
        self
    }
}

#[derive(Serialize)]
struct SarifReport {
    #[serde(rename = "$schema")]
    schema: &'static str,
    version: &'static str,
    runs: Vec<SarifRun>,
}

#[derive(Serialize)]
struct SarifRun {
    tool: SarifTool,
    results: Vec<SarifResult>,
}

#[derive(Serialize)]
struct SarifTool {
    driver: SarifDriver,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifDriver {
    name: String,
    version: String,
    rules: Vec<SarifRule>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifRule {
    id: String,
    short_description: SarifMessage,
    default_configuration: SarifConfiguration,
}

#[derive(Serialize)]
struct SarifConfiguration {
    level: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifResult {
    rule_id: String,
    level: &'static str,
    message: SarifMessage,
    locations: Vec<SarifLocation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    related_locations: Vec<SarifLocation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fixes: Vec<SarifFix>,
}

#[derive(Serialize)]
struct SarifMessage {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<usize>,
    physical_location: SarifPhysicalLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<SarifMessage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifPhysicalLocation {
    artifact_location: SarifArtifactLocation,
    region: SarifRegion,
}

#[derive(Serialize)]
struct SarifArtifactLocation {
    uri: String,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct SarifRegion {
    #[serde(skip_serializing_if = "Option::is_none")]
    start_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_column: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_column: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    byte_offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    byte_length: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifFix {
    description: SarifMessage,
    artifact_changes: Vec<SarifArtifactChange>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifArtifactChange {
    artifact_location: SarifArtifactLocation,
    replacements: Vec<SarifReplacement>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifReplacement {
    deleted_region: SarifRegion,
    inserted_content: SarifMessage,
}

fn severity_to_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Info => "note",
    }
}

fn uri(location: &Location) -> String {
    location.file.display().to_string().replace('\\', "/")
}

fn sarif_location(location: &Location, id: Option<usize>, message: Option<&str>) -> SarifLocation {
    SarifLocation {
        id,
        physical_location: SarifPhysicalLocation {
            artifact_location: SarifArtifactLocation { uri: uri(location) },
            region: SarifRegion {
                start_line: Some(location.line.max(1)),
                start_column: Some(location.column.max(1)),
                end_column: (location.length > 0).then(|| location.column + location.length),
                ..SarifRegion::default()
            },
        },
        message: message.map(|text| SarifMessage {
            text: text.to_string(),
        }),
    }
}

fn sarif_fix(location: &Location, fix: &Fix) -> SarifFix {
    SarifFix {
        description: SarifMessage {
            text: fix.description.clone(),
        },
        artifact_changes: vec![SarifArtifactChange {
            artifact_location: SarifArtifactLocation { uri: uri(location) },
            replacements: fix
                .edits
                .iter()
                .map(|edit| SarifReplacement {
                    deleted_region: SarifRegion {
                        byte_offset: Some(edit.span.start),
                        byte_length: Some(edit.span.len),
                        ..SarifRegion::default()
                    },
                    inserted_content: SarifMessage {
                        text: edit.replacement.clone(),
                    },
                })
                .collect(),
        }],
    }
}

fn sarif_result(d: &Diagnostic) -> SarifResult {
    SarifResult {
        rule_id: d.rule_id.clone(),
        level: severity_to_level(d.severity),
        message: SarifMessage {
            text: d.message.clone(),
        },
        locations: vec![sarif_location(&d.location, None, None)],
        related_locations: d
            .secondary
            .iter()
            .enumerate()
            .map(|(i, s)| sarif_location(&s.location, Some(i + 1), s.message.as_deref()))
            .collect(),
        fixes: d.fix.iter().map(|fix| sarif_fix(&d.location, fix)).collect(),
    }
}

impl OutputFormatter for SarifFormatter {
    fn format(&self, result: &LintResult) -> String {
        let mut rules: BTreeMap<&str, SarifRule> = BTreeMap::new();
        for diag in &result.diagnostics {
            rules.entry(&diag.rule_id).or_insert_with(|| SarifRule {
                id: diag.rule_id.clone(),
                short_description: SarifMessage {
                    text: self
                        .descriptions
                        .get(&diag.rule_id)
                        .cloned()
                        .or_else(|| diag.help.clone())
                        .unwrap_or_else(|| diag.message.clone()),
                },
                default_configuration: SarifConfiguration {
                    level: severity_to_level(diag.severity),
                },
            });
        }

        let report = SarifReport {
            schema: SARIF_SCHEMA,
            version: "2.1.0",
            runs: vec![SarifRun {
                tool: SarifTool {
                    driver: SarifDriver {
                        name: self.tool_name.clone(),
                        version: self.tool_version.clone(),
                        rules: rules.into_values().collect(),
                    },
                },
                results: result.diagnostics.iter().map(sarif_result).collect(),
            }],
        };

        serde_json::to_string_pretty(&report).unwrap_or_default()
    }

    fn format_diagnostic(&self, diagnostic: &Diagnostic) -> String {
        serde_json::to_string_pretty(&sarif_result(diagnostic)).unwrap_or_default()
    }
}
