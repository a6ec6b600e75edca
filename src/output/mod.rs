//! Output formatters for analysis results

mod compact;
mod json;
mod sarif;
mod text;

pub use compact::CompactFormatter;
pub use json::JsonFormatter;
pub use sarif::SarifFormatter;
pub use text::TextFormatter;

use crate::config::OutputFormat;
use crate::diagnostic::Diagnostic;
use crate::engine::LintResult;
use crate::registry::Registry;

/// Output formatter trait
pub trait OutputFormatter: Send + Sync {
    /// Format the entire result
    fn format(&self, result: &LintResult) -> String;

    /// Format a single diagnostic
    fn format_diagnostic(&self, diagnostic: &Diagnostic) -> String;
}

/// Formatter for a configured output format
pub fn formatter_for(
    format: OutputFormat,
    colored: bool,
    statistics: bool,
    registry: &Registry,
) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Text => {
            let mut text = TextFormatter::new();
            text.colored = colored;
            text.show_stats = statistics;
            Box::new(text)
        }
        OutputFormat::Json => Box::new(JsonFormatter::new().pretty()),
        OutputFormat::Sarif => Box::new(
            SarifFormatter::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
                .with_descriptions(registry.metas().map(|m| (m.id.as_str(), m.description.as_str()))),
        ),
        OutputFormat::Compact => Box::new(CompactFormatter::new()),
    }
}
