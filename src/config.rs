//! Configuration system for the analysis engine
//!
//! Reads configuration from:
//! - `.lintel.yaml` / `.lintel.json` / `lintel.yaml` (project-level)
//! - the same names in the home directory (user-level)
//! - built-in presets named by `extends`

use crate::diagnostic::Severity;
use crate::rule::{RuleCategory, RuleMeta};
use crate::syntax::{LanguageVersion, ParseOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File names searched by `Config::load_default`, in order
pub const CONFIG_NAMES: &[&str] = &[
    ".lintel.yaml",
    ".lintel.yml",
    ".lintel.json",
    "lintel.yaml",
    "lintel.yml",
    "lintel.json",
];

const MAX_EXTENDS_DEPTH: usize = 10;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Enable parallel processing
    pub parallel: bool,

    /// Number of parallel jobs (0 = auto-detect)
    pub jobs: usize,

    /// Per-file analysis budget in milliseconds (0 = unlimited)
    pub timeout_ms: u64,

    /// Emit `parse-error` diagnostics for syntax errors
    pub report_parse_errors: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            jobs: 0,
            timeout_ms: 10_000,
            report_parse_errors: true,
        }
    }
}

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format
    pub format: OutputFormat,

    /// Color mode
    pub color: ColorMode,

    /// Verbose output
    pub verbose: bool,

    /// Show statistics
    pub statistics: bool,

    /// Source lines shown around each diagnostic
    pub context_lines: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            color: ColorMode::Auto,
            verbose: false,
            statistics: true,
            context_lines: 0,
        }
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Sarif,
    Compact,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "sarif" => Ok(OutputFormat::Sarif),
            "compact" => Ok(OutputFormat::Compact),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Color mode options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    #[default]
    Auto,
    Always,
    Never,
}

/// File handling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Include patterns
    pub include: Vec<String>,

    /// Exclude patterns
    pub exclude: Vec<String>,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            include: vec!["**/*.cs".to_string()],
            exclude: vec![
                "**/bin/**".to_string(),
                "**/obj/**".to_string(),
                "**/*.g.cs".to_string(),
                "**/*.Designer.cs".to_string(),
                "**/*.Fixed.cs".to_string(),
            ],
        }
    }
}

/// Rule configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Disabled rules
    pub disabled: Vec<String>,

    /// Enabled rules (empty = all)
    pub enabled: Vec<String>,

    /// Select rules by prefix (e.g., "null" selects all null* rules)
    pub extend: Vec<String>,

    /// Ignore rules by prefix
    pub ignore: Vec<String>,

    /// Severity overrides (rule_id -> severity)
    pub severity: HashMap<String, Severity>,

    /// Per-file rule ignores (glob pattern -> rule IDs)
    pub per_file: HashMap<String, Vec<String>>,

    /// Rule parameters (rule_id -> name -> value)
    pub parameters: HashMap<String, HashMap<String, serde_json::Value>>,
}

/// Source language settings applied to every parsed file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    /// Language version gating newer syntax
    pub version: LanguageVersion,

    /// Preprocessor symbols defined for every file
    pub defines: Vec<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Extend from other configuration files or presets
    pub extends: Vec<String>,

    /// Engine settings
    pub engine: EngineConfig,

    /// Output settings
    pub output: OutputConfig,

    /// File handling settings
    pub files: FilesConfig,

    /// Rule configuration
    pub rules: RulesConfig,

    /// Source language settings
    pub language: LanguageConfig,

    /// Enable preview/experimental rules
    pub preview: bool,

    /// Rule categories to enable (empty = all stable)
    pub categories: Vec<String>,
}

/// Command-line values layered over the loaded configuration
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub format: Option<OutputFormat>,
    pub verbose: Option<bool>,
    pub jobs: Option<usize>,
    pub disabled_rules: Vec<String>,
    pub enabled_rules: Vec<String>,
    pub extend: Vec<String>,
    pub ignore: Vec<String>,
    pub language_version: Option<LanguageVersion>,
    pub defines: Vec<String>,
    pub no_color: bool,
}

impl Config {
    /// Create default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a preset configuration by name
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "recommended" => Some(Self::preset_recommended()),
            "strict" => Some(Self::preset_strict()),
            "minimal" => Some(Self::preset_minimal()),
            _ => None,
        }
    }

    /// Recommended preset - balanced defaults
    fn preset_recommended() -> Self {
        Self {
            categories: vec![
                "correctness".to_string(),
                "suspicious".to_string(),
                "style".to_string(),
            ],
            ..Self::default()
        }
    }

    /// Strict preset - all rules enabled
    fn preset_strict() -> Self {
        Self {
            preview: true,
            categories: vec![
                "correctness".to_string(),
                "suspicious".to_string(),
                "style".to_string(),
                "perf".to_string(),
                "pedantic".to_string(),
            ],
            ..Self::default()
        }
    }

    /// Minimal preset - only critical rules
    fn preset_minimal() -> Self {
        Self {
            categories: vec!["correctness".to_string()],
            ..Self::default()
        }
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_depth(path, 0)
    }

    /// Load with recursion depth limit (to prevent infinite loops)
    fn load_with_depth(path: &Path, depth: usize) -> Result<Self, ConfigError> {
        if depth >= MAX_EXTENDS_DEPTH {
            return Err(ConfigError::Invalid(
                "Maximum config inheritance depth exceeded".to_string(),
            ));
        }

        let content = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let mut config: Self = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown config file format: {}",
                    ext
                )))
            }
        };
        log::debug!("loaded config {} (depth {})", path.display(), depth);

        if !config.extends.is_empty() {
            let base_dir = path.parent().unwrap_or(Path::new("."));
            let mut base_config = Self::default();

            for extend in &config.extends.clone() {
                let extended = if let Some(preset) = Self::preset(extend) {
                    preset
                } else {
                    let extend_path = if Path::new(extend).is_absolute() {
                        PathBuf::from(extend)
                    } else {
                        base_dir.join(extend)
                    };
                    Self::load_with_depth(&extend_path, depth + 1)?
                };
                base_config.merge(extended);
            }

            base_config.merge(config);
            config = base_config;
        }

        Ok(config)
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        // Engine settings - other takes precedence if non-default
        let defaults = EngineConfig::default();
        if other.engine.jobs != 0 {
            self.engine.jobs = other.engine.jobs;
        }
        self.engine.parallel = other.engine.parallel;
        if other.engine.timeout_ms != defaults.timeout_ms {
            self.engine.timeout_ms = other.engine.timeout_ms;
        }
        self.engine.report_parse_errors = other.engine.report_parse_errors;

        // Output settings
        if other.output.format != OutputFormat::Text {
            self.output.format = other.output.format;
        }
        if other.output.verbose {
            self.output.verbose = true;
        }
        if other.output.color != ColorMode::Auto {
            self.output.color = other.output.color;
        }
        if other.output.context_lines != 0 {
            self.output.context_lines = other.output.context_lines;
        }

        // Files - extend lists
        for pattern in other.files.include {
            if !self.files.include.contains(&pattern) {
                self.files.include.push(pattern);
            }
        }
        for pattern in other.files.exclude {
            if !self.files.exclude.contains(&pattern) {
                self.files.exclude.push(pattern);
            }
        }

        // Rules - merge
        self.rules.disabled.extend(other.rules.disabled);
        if !other.rules.enabled.is_empty() {
            self.rules.enabled = other.rules.enabled;
        }
        self.rules.extend.extend(other.rules.extend);
        self.rules.ignore.extend(other.rules.ignore);
        self.rules.severity.extend(other.rules.severity);
        for (pattern, rules) in other.rules.per_file {
            self.rules.per_file.entry(pattern).or_default().extend(rules);
        }
        for (rule_id, parameters) in other.rules.parameters {
            self.rules.parameters.entry(rule_id).or_default().extend(parameters);
        }

        // Language
        if other.language.version != LanguageVersion::default() {
            self.language.version = other.language.version;
        }
        self.language.defines.extend(other.language.defines);

        // Preview and categories
        if other.preview {
            self.preview = true;
        }
        if !other.categories.is_empty() {
            self.categories = other.categories;
        }
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<Self, ConfigError> {
        for name in CONFIG_NAMES {
            let path = PathBuf::from(name);
            if path.exists() {
                return Self::load(&path);
            }
        }

        if let Some(home) = dirs::home_dir() {
            for name in CONFIG_NAMES {
                let path = home.join(name);
                if path.exists() {
                    return Self::load(&path);
                }
            }
        }

        Ok(Self::default())
    }

    /// Merge CLI arguments into configuration
    pub fn merge_cli(&mut self, cli: CliOverrides) {
        if let Some(f) = cli.format {
            self.output.format = f;
        }
        if let Some(v) = cli.verbose {
            self.output.verbose = v;
        }
        if let Some(j) = cli.jobs {
            self.engine.jobs = j;
        }
        self.rules.disabled.extend(cli.disabled_rules);
        if !cli.enabled_rules.is_empty() {
            self.rules.enabled = cli.enabled_rules;
        }
        self.add_extend_prefixes(cli.extend);
        self.add_ignore_prefixes(cli.ignore);
        if let Some(version) = cli.language_version {
            self.language.version = version;
        }
        self.language.defines.extend(cli.defines);
        if cli.no_color {
            self.output.color = ColorMode::Never;
        }
    }

    /// Add prefixes to extend (select rules by prefix)
    pub fn add_extend_prefixes(&mut self, prefixes: Vec<String>) {
        self.rules.extend.extend(prefixes);
    }

    /// Add prefixes to ignore
    pub fn add_ignore_prefixes(&mut self, prefixes: Vec<String>) {
        self.rules.ignore.extend(prefixes);
    }

    /// Check if a rule is enabled
    pub fn is_rule_enabled(&self, rule_id: &str) -> bool {
        if self.rules.disabled.iter().any(|r| r == rule_id) {
            return false;
        }

        if self.matches_ignore_prefix(rule_id) {
            return false;
        }

        // If enabled list is not empty, rule must be in it
        if !self.rules.enabled.is_empty() {
            return self.rules.enabled.iter().any(|r| r == rule_id);
        }

        self.matches_extend_prefix(rule_id)
    }

    /// Enabled by id, stability and category
    pub fn is_rule_active(&self, meta: &RuleMeta) -> bool {
        if !self.is_rule_enabled(&meta.id) {
            return false;
        }
        // explicitly selected rules bypass the stability and category filters
        if self.rules.enabled.iter().any(|r| r == &meta.id) {
            return true;
        }
        if meta.is_preview() && !self.preview {
            return false;
        }
        if meta.is_deprecated() {
            return false;
        }
        self.categories.is_empty()
            || self
                .categories
                .iter()
                .filter_map(|c| c.parse::<RuleCategory>().ok())
                .any(|c| c == meta.category)
    }

    /// Check if a rule matches any prefix in the extend list
    pub fn matches_extend_prefix(&self, rule_id: &str) -> bool {
        if self.rules.extend.is_empty() {
            return true;
        }
        let rule_upper = rule_id.to_uppercase();
        self.rules
            .extend
            .iter()
            .any(|prefix| rule_upper.starts_with(&prefix.to_uppercase()))
    }

    /// Check if a rule matches any prefix in the ignore list
    pub fn matches_ignore_prefix(&self, rule_id: &str) -> bool {
        let rule_upper = rule_id.to_uppercase();
        self.rules
            .ignore
            .iter()
            .any(|prefix| rule_upper.starts_with(&prefix.to_uppercase()))
    }

    /// Get severity override for a rule
    pub fn get_severity_override(&self, rule_id: &str) -> Option<Severity> {
        self.rules.severity.get(rule_id).copied()
    }

    /// Configured parameter values for a rule
    pub fn rule_parameters(&self, rule_id: &str) -> HashMap<String, serde_json::Value> {
        self.rules.parameters.get(rule_id).cloned().unwrap_or_default()
    }

    /// Check if a rule should be ignored for a file
    pub fn should_ignore_rule_for_file(&self, rule_id: &str, file_path: &Path) -> bool {
        let file_str = file_path.to_string_lossy();

        for (pattern, rules) in &self.rules.per_file {
            if let Ok(glob) = globset::Glob::new(pattern) {
                let matcher = glob.compile_matcher();
                if matcher.is_match(file_str.as_ref())
                    && rules.iter().any(|r| r == "all" || r == rule_id)
                {
                    return true;
                }
            }
        }

        false
    }

    /// Parse options for every analysed file
    pub fn parse_options(&self) -> ParseOptions {
        self.language
            .defines
            .iter()
            .fold(ParseOptions::new(self.language.version), |options, symbol| {
                options.with_define(symbol.clone())
            })
    }

    /// Starter configuration written by `lintel init`
    pub fn starter_yaml(preset: &str) -> String {
        format!(
            "# Lintel configuration\nextends:\n  - {}\n\nengine:\n  parallel: true\n  timeout_ms: 10000\n\nrules:\n  disabled: []\n  severity: {{}}\n  parameters:\n    function-complexity:\n      maximum: 10\n\nlanguage:\n  version: latest\n  defines: []\n",
            preset
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleMeta;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::new();
        assert!(config.engine.parallel);
        assert_eq!(config.engine.jobs, 0);
        assert_eq!(config.engine.timeout_ms, 10_000);
        assert!(config.engine.report_parse_errors);
        assert_eq!(config.output.format, OutputFormat::Text);
        assert_eq!(config.files.include, vec!["**/*.cs".to_string()]);
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("SARIF".parse::<OutputFormat>().unwrap(), OutputFormat::Sarif);
        assert_eq!("compact".parse::<OutputFormat>().unwrap(), OutputFormat::Compact);
        assert!("github".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_config_merge_cli() {
        let mut config = Config::new();
        config.merge_cli(CliOverrides {
            format: Some(OutputFormat::Json),
            verbose: Some(true),
            jobs: Some(4),
            disabled_rules: vec!["rule1".to_string()],
            language_version: Some(LanguageVersion::CSharp8),
            defines: vec!["DEBUG".to_string()],
            no_color: true,
            ..CliOverrides::default()
        });

        assert_eq!(config.output.format, OutputFormat::Json);
        assert!(config.output.verbose);
        assert_eq!(config.engine.jobs, 4);
        assert!(config.rules.disabled.contains(&"rule1".to_string()));
        assert_eq!(config.output.color, ColorMode::Never);
        let options = config.parse_options();
        assert_eq!(options.language_version, LanguageVersion::CSharp8);
        assert_eq!(options.defines, vec!["DEBUG".to_string()]);
    }

    #[test]
    fn test_rule_enabled() {
        let mut config = Config::new();
        assert!(config.is_rule_enabled("any-rule"));

        config.rules.disabled.push("disabled-rule".to_string());
        assert!(!config.is_rule_enabled("disabled-rule"));
        assert!(config.is_rule_enabled("other-rule"));

        config.rules.enabled = vec!["only-this".to_string()];
        assert!(!config.is_rule_enabled("disabled-rule"));
        assert!(!config.is_rule_enabled("other-rule"));
        assert!(config.is_rule_enabled("only-this"));
    }

    #[test]
    fn test_extend_and_ignore_prefixes() {
        let mut config = Config::new();
        config.add_extend_prefixes(vec!["null".to_string(), "DISPOS".to_string()]);
        config.add_ignore_prefixes(vec!["disposed-".to_string()]);

        assert!(config.is_rule_enabled("null-pointer-dereference"));
        assert!(config.is_rule_enabled("disposable-not-disposed"));
        assert!(!config.is_rule_enabled("disposed-more-than-once"));
        assert!(!config.is_rule_enabled("dead-store"));
    }

    #[test]
    fn test_rule_active_by_category_and_stability() {
        let style = RuleMeta::new("style-rule", "StyleRule", "d").with_category(RuleCategory::Style);
        let preview = RuleMeta::new("new-rule", "NewRule", "d")
            .with_category(RuleCategory::Correctness)
            .preview();

        let mut config = Config::preset("minimal").unwrap();
        assert!(!config.is_rule_active(&style));
        assert!(!config.is_rule_active(&preview));

        config.preview = true;
        assert!(config.is_rule_active(&preview));

        config.rules.enabled = vec!["style-rule".to_string()];
        assert!(config.is_rule_active(&style));
    }

    #[test]
    fn test_severity_override_and_parameters() {
        let mut config = Config::new();
        config.rules.severity.insert("rule1".to_string(), Severity::Error);
        config
            .rules
            .parameters
            .entry("function-complexity".to_string())
            .or_default()
            .insert("maximum".to_string(), json!(5));

        assert_eq!(config.get_severity_override("rule1"), Some(Severity::Error));
        assert_eq!(config.get_severity_override("rule2"), None);
        assert_eq!(config.rule_parameters("function-complexity")["maximum"], json!(5));
        assert!(config.rule_parameters("dead-store").is_empty());
    }

    #[test]
    fn test_per_file_ignores() {
        let mut config = Config::new();
        config
            .rules
            .per_file
            .insert("**/Generated/*.cs".to_string(), vec!["dead-store".to_string()]);
        config.rules.per_file.insert("legacy/*.cs".to_string(), vec!["all".to_string()]);

        assert!(config.should_ignore_rule_for_file("dead-store", Path::new("src/Generated/A.cs")));
        assert!(!config.should_ignore_rule_for_file("null-pointer-dereference", Path::new("src/Generated/A.cs")));
        assert!(config.should_ignore_rule_for_file("null-pointer-dereference", Path::new("legacy/B.cs")));
    }

    #[test]
    fn test_yaml_deserialize() {
        let yaml = r#"
engine:
  parallel: false
  jobs: 4
  timeout_ms: 250
output:
  format: json
  verbose: true
rules:
  disabled:
    - rule1
    - rule2
  parameters:
    function-complexity:
      maximum: 3
language:
  version: "8"
  defines: [TRACE]
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(!config.engine.parallel);
        assert_eq!(config.engine.jobs, 4);
        assert_eq!(config.engine.timeout_ms, 250);
        assert_eq!(config.output.format, OutputFormat::Json);
        assert!(config.output.verbose);
        assert_eq!(config.rules.disabled.len(), 2);
        assert_eq!(config.rule_parameters("function-complexity")["maximum"], json!(3));
        assert_eq!(config.language.version, LanguageVersion::CSharp8);
        assert_eq!(config.language.defines, vec!["TRACE".to_string()]);
    }

    #[test]
    fn test_load_with_extends() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.yaml");
        std::fs::write(&base, "rules:\n  disabled: [dead-store]\n").unwrap();
        let main = dir.path().join(".lintel.yaml");
        let mut file = std::fs::File::create(&main).unwrap();
        writeln!(file, "extends: [minimal, base.yaml]\nrules:\n  disabled: [redundant-jump-statement]").unwrap();

        let config = Config::load(&main).unwrap();
        assert_eq!(config.categories, vec!["correctness".to_string()]);
        assert!(!config.is_rule_enabled("dead-store"));
        assert!(!config.is_rule_enabled("redundant-jump-statement"));
    }

    #[test]
    fn test_extends_cycle_hits_depth_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("self.yaml");
        std::fs::write(&path, "extends: [self.yaml]\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_starter_yaml_parses() {
        let config: Config = serde_yaml::from_str(&Config::starter_yaml("recommended")).unwrap();
        assert_eq!(config.extends, vec!["recommended".to_string()]);
        assert_eq!(config.rule_parameters("function-complexity")["maximum"], json!(10));
    }
}
