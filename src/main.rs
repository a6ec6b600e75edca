//! Lintel CLI - rule-based static analysis for C#

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use glob::glob;
use globset::{Glob, GlobSet, GlobSetBuilder};
use lintel::config::{ColorMode, FilesConfig, OutputFormat};
use lintel::fixer::{FixMode, FixResult, Fixer};
use lintel::output::formatter_for;
use lintel::verify::{fixed_sibling, VerifyError};
use lintel::{CliOverrides, Config, Engine, LanguageVersion, Registry, Rule, RuleMeta, RuleStability, Severity, Verifier};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "lintel",
    version,
    about = "C# static analyzer",
    long_about = "A rule-based static analyzer for C# with data-flow checks, code fixes and a fixture-driven rule test harness."
)]
struct Cli {
    /// Files, directories or glob patterns to analyze
    files: Vec<String>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    format: Option<Format>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Number of parallel jobs (0 = auto)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Disable specific rules (comma-separated)
    #[arg(long, value_delimiter = ',')]
    disable: Vec<String>,

    /// Only run these rules (comma-separated)
    #[arg(long, value_delimiter = ',')]
    select: Vec<String>,

    /// Also select rules whose id starts with these prefixes
    #[arg(long, value_delimiter = ',')]
    extend: Vec<String>,

    /// Skip rules whose id starts with these prefixes
    #[arg(long, value_delimiter = ',')]
    ignore: Vec<String>,

    /// Apply fixes (shows a diff unless --write is given)
    #[arg(long)]
    fix: bool,

    /// Write fixed files back to disk
    #[arg(long, requires = "fix")]
    write: bool,

    /// Include fixes that may change behavior
    #[arg(long, requires = "fix")]
    unsafe_fixes: bool,

    /// C# language version (e.g. 8, CSharp9, latest)
    #[arg(long, value_parser = parse_language_version)]
    lang_version: Option<LanguageVersion>,

    /// Preprocessor symbols to define (comma-separated)
    #[arg(long, value_delimiter = ',')]
    define: Vec<String>,

    /// Show per-rule timing statistics
    #[arg(long)]
    timing: bool,

    /// Exit with 0 even when issues are found
    #[arg(long)]
    exit_zero: bool,

    /// List all available rules
    #[arg(long)]
    list_rules: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Explain a rule in detail
    Explain {
        /// Rule id or name
        rule_id: String,
    },
    /// Check fixtures against their expectation markers
    Verify {
        /// Fixture files
        #[arg(required = true)]
        fixtures: Vec<PathBuf>,

        /// Rule to verify (default: inferred from the fixture file name)
        #[arg(long)]
        rule: Option<String>,
    },
    /// Write a starter configuration file
    Init {
        /// Preset: recommended, strict or minimal
        #[arg(long, default_value = "recommended")]
        preset: String,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
    Sarif,
    Compact,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Text => OutputFormat::Text,
            Format::Json => OutputFormat::Json,
            Format::Sarif => OutputFormat::Sarif,
            Format::Compact => OutputFormat::Compact,
        }
    }
}

fn parse_language_version(value: &str) -> Result<LanguageVersion, String> {
    value
        .parse()
        .map_err(|_| format!("unknown language version '{}'", value))
}

fn paint_severity(severity: Severity) -> colored::ColoredString {
    match severity {
        Severity::Error => "error".red(),
        Severity::Warning => "warning".yellow(),
        Severity::Info => "info".blue(),
    }
}

fn print_rule(meta: &RuleMeta, active: bool) {
    let stability_marker = match meta.stability {
        RuleStability::Preview => " [preview]".yellow(),
        RuleStability::Deprecated => " [deprecated]".red(),
        RuleStability::Stable => "".normal(),
    };
    let fixable = if meta.fixable { " [fix]".green() } else { "".normal() };
    let state = if active { "" } else { " (inactive)" };

    println!(
        "    {} [{}] ({}){}{}{}",
        meta.id.cyan(),
        paint_severity(meta.severity),
        meta.category,
        stability_marker,
        fixable,
        state.dimmed()
    );
    println!("      {}", meta.description);
    if !meta.tags.is_empty() {
        println!("      Tags: {}", meta.tags.join(", "));
    }
}

/// Print detailed rule explanation
fn explain_rule(meta: &RuleMeta) {
    println!("{}", "Rule Details".bold());
    println!();
    println!("  {}: {}", "ID".bold(), meta.id.cyan());
    println!("  {}: {}", "Name".bold(), meta.name);
    println!("  {}: {}", "Severity".bold(), paint_severity(meta.severity));
    println!("  {}: {}", "Category".bold(), meta.category);
    println!("  {}: {}", "Stability".bold(), meta.stability);

    println!();
    println!("  {}", "Description".bold());
    println!("  {}", meta.description);

    if let Some(rationale) = &meta.rationale {
        println!();
        println!("  {}", "Rationale".bold());
        println!("  {}", rationale);
    }

    if let Some(bad) = &meta.example_bad {
        println!();
        println!("  {} {}", "Example".bold(), "(incorrect)".red());
        for line in bad.lines() {
            println!("    {}", line);
        }
    }

    if let Some(good) = &meta.example_good {
        println!();
        println!("  {} {}", "Example".bold(), "(correct)".green());
        for line in good.lines() {
            println!("    {}", line);
        }
    }

    if !meta.parameters.is_empty() {
        println!();
        println!("  {}", "Parameters".bold());
        for parameter in &meta.parameters {
            println!("    {} = {}  {}", parameter.name.cyan(), parameter.default, parameter.description);
        }
    }

    if meta.fixable {
        println!();
        println!("  {}", "Auto-fix Available".bold());
    }

    if !meta.tags.is_empty() {
        println!();
        println!("  {}: {}", "Tags".bold(), meta.tags.join(", "));
    }

    if !meta.related.is_empty() {
        println!();
        println!("  {}: {}", "Related Rules".bold(), meta.related.join(", "));
    }
}

fn handle_explain(registry: &Registry, rule_id: &str) -> Result<ExitCode> {
    match registry.find(rule_id) {
        Some(rule) => {
            explain_rule(rule.meta());
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("{}: Rule '{}' not found", "error".red().bold(), rule_id);
            eprintln!();
            eprintln!("Use {} to see all available rules", "--list-rules".cyan());
            Ok(ExitCode::from(1))
        }
    }
}

fn handle_init(preset: &str, force: bool) -> Result<ExitCode> {
    if Config::preset(preset).is_none() {
        bail!("unknown preset '{}' (expected recommended, strict or minimal)", preset);
    }
    let path = Path::new(".lintel.yaml");
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::write(path, Config::starter_yaml(preset))
        .with_context(|| format!("cannot write {}", path.display()))?;
    println!("Created {} with the {} preset", path.display().to_string().cyan(), preset);
    Ok(ExitCode::SUCCESS)
}

/// Rule named by the part of the fixture's file name before the first dot
fn rule_for_fixture<'r>(registry: &'r Registry, fixture: &Path) -> Option<&'r dyn Rule> {
    let name = fixture.file_name()?.to_str()?;
    let stem = name.split('.').next()?;
    registry.find(stem)
}

fn handle_verify(registry: &Registry, fixtures: &[PathBuf], rule: Option<&str>) -> Result<ExitCode> {
    let mut failed = 0;
    for fixture in fixtures {
        let found = match rule {
            Some(id) => registry.find(id),
            None => rule_for_fixture(registry, fixture),
        };
        let rule = match found {
            Some(rule) => rule,
            None => bail!("no rule matches fixture {} (use --rule)", fixture.display()),
        };

        let mut verifier = Verifier::new(rule).fixture(fixture);
        if let Some(fixed) = fixed_sibling(fixture) {
            verifier = verifier.code_fix(fixed);
        }

        match verifier.verify() {
            Ok(()) => println!("{} {} [{}]", "ok".green().bold(), fixture.display(), rule.id()),
            Err(VerifyError::Failed(failure)) => {
                failed += 1;
                println!("{} {}", "FAILED".red().bold(), failure);
                for problem in &failure.problems {
                    println!("  {}", problem);
                }
            }
            Err(err) => return Err(err).with_context(|| format!("cannot verify {}", fixture.display())),
        }
    }

    if failed > 0 {
        eprintln!("{}: {} of {} fixture(s) failed", "error".red().bold(), failed, fixtures.len());
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid pattern '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

/// Expand the command-line arguments into the files to analyze.
/// Files named explicitly are kept even when they fall outside `include`.
fn collect_files(patterns: &[String], files: &FilesConfig) -> Result<Vec<PathBuf>> {
    let include = build_globset(&files.include)?;
    let exclude = build_globset(&files.exclude)?;
    let relative = |path: &Path| path.strip_prefix(".").unwrap_or(path).to_path_buf();

    let defaults = [".".to_string()];
    let patterns = if patterns.is_empty() { &defaults[..] } else { patterns };

    let mut collected = Vec::new();
    for pattern in patterns {
        let path = Path::new(pattern);
        if path.is_file() {
            collected.push(path.to_path_buf());
            continue;
        }

        let (expanded, filter) = if path.is_dir() {
            (format!("{}/**/*", pattern.trim_end_matches('/')), true)
        } else {
            (pattern.clone(), false)
        };
        let entries = glob(&expanded).with_context(|| format!("invalid pattern '{}'", pattern))?;
        for entry in entries.flatten() {
            let candidate = relative(&entry);
            if !entry.is_file() || exclude.is_match(&candidate) {
                continue;
            }
            if filter && !include.is_match(&candidate) {
                continue;
            }
            collected.push(entry);
        }
    }

    collected.sort();
    collected.dedup();
    Ok(collected)
}

fn use_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => std::io::stdout().is_terminal(),
    }
}

fn run_fixes(engine: &Engine, files: &[PathBuf], mode: FixMode, write: bool) -> FixResult {
    let mut result = FixResult::default();
    for path in files {
        let original = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                result.errors.push(format!("{}: {}", path.display(), err));
                continue;
            }
        };
        let outcome = Fixer::fix_all(engine, path, &original, mode);
        if write && outcome.text != original {
            if let Err(err) = std::fs::write(path, &outcome.text) {
                result.errors.push(format!("{}: {}", path.display(), err));
                continue;
            }
        }
        result.record(path, &original, &outcome);
    }
    result
}

fn run(cli: Cli) -> Result<ExitCode> {
    let registry = Registry::builtin();

    if let Some(cmd) = &cli.command {
        return match cmd {
            Commands::Explain { rule_id } => handle_explain(&registry, rule_id),
            Commands::Verify { fixtures, rule } => handle_verify(&registry, fixtures, rule.as_deref()),
            Commands::Init { preset, force } => handle_init(preset, *force),
        };
    }

    let mut config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("cannot load config {}", path.display()))?,
        None => Config::load_default().context("cannot load config")?,
    };
    config.merge_cli(CliOverrides {
        format: cli.format.map(OutputFormat::from),
        verbose: cli.verbose.then_some(true),
        jobs: cli.jobs,
        disabled_rules: cli.disable.clone(),
        enabled_rules: cli.select.clone(),
        extend: cli.extend.clone(),
        ignore: cli.ignore.clone(),
        language_version: cli.lang_version,
        defines: cli.define.clone(),
        no_color: cli.no_color,
    });

    let colored = use_color(config.output.color);
    colored::control::set_override(colored);

    if cli.list_rules {
        println!("{}", "Available rules:".bold());
        println!();
        let mut metas: Vec<&RuleMeta> = registry.metas().collect();
        metas.sort_by(|a, b| a.id.cmp(&b.id));
        for meta in metas {
            print_rule(meta, config.is_rule_active(meta) && config.is_rule_enabled(&meta.id));
        }
        return Ok(ExitCode::SUCCESS);
    }

    let files = collect_files(&cli.files, &config.files)?;
    if files.is_empty() {
        eprintln!("{}: No files found to analyze", "error".red().bold());
        return Ok(ExitCode::from(1));
    }
    log::info!("analyzing {} file(s)", files.len());

    let format = config.output.format;
    let statistics = config.output.statistics;
    let engine = Engine::with_registry(config, registry);

    if cli.fix {
        let mode = if cli.unsafe_fixes { FixMode::All } else { FixMode::SafeOnly };
        let fixes = run_fixes(&engine, &files, mode, cli.write);
        for err in &fixes.errors {
            eprintln!("{}: {}", "error".red().bold(), err);
        }
        if cli.write {
            eprintln!(
                "Applied {} fixes to {} files",
                fixes.fixes_applied, fixes.files_modified
            );
        } else {
            print!("{}", fixes.format_diffs());
            eprintln!(
                "{}: {} fixes available in {} files",
                "dry-run".cyan(),
                fixes.fixes_applied,
                fixes.files_modified
            );
            eprintln!("Use --write to apply fixes");
        }
        if fixes.fixes_skipped > 0 && !cli.unsafe_fixes {
            eprintln!(
                "{}: {} fixes skipped (use --unsafe-fixes to include unsafe fixes)",
                "note".blue(),
                fixes.fixes_skipped
            );
        }
        if !cli.write {
            return Ok(ExitCode::SUCCESS);
        }
    }

    let result = engine.analyze_files(&files);
    let formatter = formatter_for(format, colored, statistics, engine.registry());
    print!("{}", formatter.format(&result));

    if cli.timing {
        eprintln!();
        eprintln!("{}", result.format_timings());
    }

    if cli.exit_zero {
        return Ok(ExitCode::SUCCESS);
    }
    let code = u8::try_from(result.exit_code()).unwrap_or(2);
    Ok(ExitCode::from(code))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}: {:#}", "error".red().bold(), err);
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "lintel", "src", "--format", "sarif", "--disable", "a,b", "--fix", "--write", "--lang-version", "8",
        ])
        .unwrap();
        assert_eq!(cli.files, vec!["src".to_string()]);
        assert!(matches!(cli.format, Some(Format::Sarif)));
        assert_eq!(cli.disable, vec!["a".to_string(), "b".to_string()]);
        assert!(cli.fix && cli.write);
        assert_eq!(cli.lang_version, Some(LanguageVersion::CSharp8));
    }

    #[test]
    fn test_write_requires_fix() {
        assert!(Cli::try_parse_from(["lintel", "--write"]).is_err());
    }

    #[test]
    fn test_verify_subcommand() {
        let cli = Cli::try_parse_from(["lintel", "verify", "DeadStores.cs", "--rule", "dead-store"]).unwrap();
        match cli.command {
            Some(Commands::Verify { fixtures, rule }) => {
                assert_eq!(fixtures, vec![PathBuf::from("DeadStores.cs")]);
                assert_eq!(rule.as_deref(), Some("dead-store"));
            }
            _ => panic!("expected verify"),
        }
    }

    #[test]
    fn test_rule_for_fixture_uses_stem() {
        let registry = Registry::builtin();
        let rule = rule_for_fixture(&registry, Path::new("tests/BooleanLiteralUnnecessary.CSharp9.cs")).unwrap();
        assert_eq!(rule.id(), "boolean-literal-unnecessary");
        assert!(rule_for_fixture(&registry, Path::new("Unknown.cs")).is_none());
    }

    #[test]
    fn test_collect_files_applies_filters() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("obj")).unwrap();
        std::fs::write(root.join("A.cs"), "class A {}").unwrap();
        std::fs::write(root.join("A.Fixed.cs"), "class A {}").unwrap();
        std::fs::write(root.join("notes.txt"), "").unwrap();
        std::fs::write(root.join("obj").join("B.cs"), "class B {}").unwrap();

        let files = collect_files(&[root.display().to_string()], &FilesConfig::default()).unwrap();
        assert_eq!(files, vec![root.join("A.cs")]);

        let explicit = root.join("A.Fixed.cs");
        let files = collect_files(&[explicit.display().to_string()], &FilesConfig::default()).unwrap();
        assert_eq!(files, vec![explicit]);
    }
}
