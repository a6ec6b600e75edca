//! Lintel - rule-based static analysis for C#
//!
//! Source files are lexed and parsed into a lossless syntax tree, bound into
//! a semantic model, and traversed once by a dispatcher that hands each node
//! to the rules subscribed to its kind. Rules that need control flow ask the
//! context for a per-member CFG, on which the data-flow solver tracks
//! nullness, disposal and liveness.
//!
//! # Architecture
//!
//! ```text
//! CLI/API -> Engine -> parse -> bind -> Dispatcher -> rules -> Reporter -> Diagnostics
//!                                           |
//!                                      CFG + dataflow
//! ```
//!
//! # Verifying rules against fixtures
//!
//! Fixture files carry their expected diagnostics in comments:
//!
//! ```text
//! var z = true || ((true)); // Noncompliant {{Remove the unnecessary Boolean literal(s).}}
//! //           ^^^^^^^^^^^
//! ```
//!
//! [`verify::Verifier`] runs one rule over a fixture and reports every
//! missing or unexpected diagnostic, and compares code fixes with the
//! `.Fixed.cs` sibling file.

pub mod cfg;
pub mod config;
pub mod dataflow;
pub mod diagnostic;
pub mod dispatch;
pub mod engine;
pub mod fixer;
pub mod output;
pub mod registry;
pub mod reporter;
pub mod rule;
pub mod rules;
pub mod semantic;
pub mod suppression;
pub mod syntax;
pub mod verify;

// Re-export main types
pub use config::{CliOverrides, Config};
pub use diagnostic::{Diagnostic, Fix, FixSafety, Location, SecondaryLocation, Severity, TextEdit};
pub use dispatch::{ActiveRule, Dispatcher, RuleContext, RuleFailure};
pub use engine::{AnalysisError, Engine, FileAnalysis, LintResult, RuleTiming};
pub use fixer::{FixMode, FixOutcome, FixResult, Fixer};
pub use output::{CompactFormatter, JsonFormatter, OutputFormatter, SarifFormatter, TextFormatter};
pub use registry::Registry;
pub use reporter::Issue;
pub use rule::{Rule, RuleCategory, RuleError, RuleMeta, RuleStability};
pub use syntax::{parse, LanguageVersion, ParseOptions, SyntaxTree};
pub use verify::{VerificationFailure, Verifier, VerifyError};
