//! e2e-triage - Error analysis for end-to-end test runs
//!
//! Reads raw runner output (a JSON report or list-reporter text) from a file
//! or stdin and reports categorized, deduplicated failures.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::Read;
use std::path::{Path, PathBuf};

use e2e_triage::{
    ActionType, AnalysisReport, Analyzer, Category, ConfigLoader, ErrorExtractor, PatternMatcher,
    Severity, TriageConfig, TriageError,
};

#[derive(Parser)]
#[command(name = "e2e-triage")]
#[command(version)]
#[command(about = "Categorize, deduplicate and prioritize end-to-end test failures", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file that overrides the user and project config
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one test run
    Analyze {
        /// Runner output file, or `-` for stdin
        input: String,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,

        /// Also write the JSON report to this file
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Pattern database to use instead of the configured one
        #[arg(long, value_name = "FILE")]
        patterns: Option<PathBuf>,

        /// Directory of per-test artifacts (DOM snapshots, screenshots)
        #[arg(long, value_name = "DIR")]
        context_dir: Option<PathBuf>,

        /// Similarity threshold for clustering, between 0 and 1
        #[arg(long, value_name = "T")]
        threshold: Option<f64>,
    },

    /// Print the compact status line for a run
    Status {
        /// Runner output file, or `-` for stdin
        input: String,
    },

    /// Group similar failures of a run
    Clusters {
        /// Runner output file, or `-` for stdin
        input: String,

        /// Similarity threshold for clustering, between 0 and 1
        #[arg(long, value_name = "T")]
        threshold: Option<f64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect the pattern database
    Patterns {
        #[command(subcommand)]
        action: PatternsAction,
    },

    /// Categorize a single error message
    Categorize {
        /// Error text
        text: String,
    },
}

#[derive(Subcommand)]
enum PatternsAction {
    /// List known patterns
    List {
        /// Only patterns in this category
        #[arg(long)]
        category: Option<Category>,

        /// Only patterns with this severity
        #[arg(long)]
        severity: Option<Severity>,

        /// Only patterns with an automatic fix
        #[arg(long)]
        fixable: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one pattern as JSON
    Show {
        /// Pattern id
        id: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "e2e_triage=debug"
    } else {
        "e2e_triage=info,warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => Ok(()),
        Err(e) => match e.downcast_ref::<TriageError>() {
            Some(triage) => {
                eprintln!("{} {}", "Error:".red().bold(), triage);
                std::process::exit(triage.exit_code());
            }
            None => Err(e),
        },
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());
    if !project_path.exists() {
        bail!(
            "Project directory does not exist: {}",
            project_path.display()
        );
    }

    let mut loader = ConfigLoader::new();
    if let Some(path) = cli.config {
        loader = loader.with_explicit_path(path);
    }
    let mut config = loader.load(&project_path)?;

    match cli.command {
        Commands::Analyze {
            input,
            json,
            output,
            patterns,
            context_dir,
            threshold,
        } => {
            if patterns.is_some() {
                config.patterns_path = patterns;
            }
            if context_dir.is_some() {
                config.context_dir = context_dir;
            }
            if let Some(t) = threshold {
                config.cluster_threshold = t;
            }

            let raw = read_input(&input)?;
            let report = Analyzer::from_config(&config)?.analyze(&raw);

            if let Some(ref path) = output {
                report.write_report(path)?;
            }
            if json {
                println!("{}", report.to_json_pretty()?);
            } else {
                print_report(&report);
                if let Some(path) = output {
                    println!("\n{} Report written to {}", "OK".green().bold(), path.display());
                }
            }
        }

        Commands::Status { input } => {
            let raw = read_input(&input)?;
            let report = Analyzer::from_config(&config)?.analyze(&raw);
            println!("{}", report.status);
        }

        Commands::Clusters {
            input,
            threshold,
            json,
        } => {
            if let Some(t) = threshold {
                config.cluster_threshold = t;
            }
            let raw = read_input(&input)?;
            let analyzer = Analyzer::from_config(&config)?;
            let (_, _, errors) = analyzer.collect_errors(&raw);
            let unique = analyzer.fingerprinter().deduplicate(&errors, None).unique;
            let clusters = analyzer
                .fingerprinter()
                .find_clusters(&unique, analyzer.cluster_threshold());

            if json {
                println!("{}", serde_json::to_string_pretty(&clusters)?);
            } else if clusters.is_empty() {
                println!("{} No failures to cluster", "Note:".yellow());
            } else {
                println!(
                    "\n{} {} clusters from {} unique errors (threshold {:.2})",
                    "Clusters:".cyan().bold(),
                    clusters.len(),
                    unique.len(),
                    analyzer.cluster_threshold()
                );
                for (i, cluster) in clusters.iter().enumerate() {
                    println!(
                        "\n   {} {} ({} errors)",
                        format!("#{}", i + 1).bold(),
                        cluster[0].category,
                        cluster.len()
                    );
                    for error in cluster {
                        println!("     - {}", truncate(&error.message, 100));
                    }
                }
            }
        }

        Commands::Patterns { action } => {
            let matcher = load_matcher(&config)?;
            match action {
                PatternsAction::List {
                    category,
                    severity,
                    fixable,
                    json,
                } => {
                    let patterns: Vec<_> = matcher
                        .patterns()
                        .filter(|p| category.is_none_or(|c| p.resolved_category() == c))
                        .filter(|p| severity.is_none_or(|s| p.severity == s))
                        .filter(|p| !fixable || p.fix_available)
                        .collect();

                    if json {
                        println!("{}", serde_json::to_string_pretty(&patterns)?);
                    } else if patterns.is_empty() {
                        println!("{} No patterns match", "Note:".yellow());
                    } else {
                        println!(
                            "\n{} {} of {} patterns",
                            "Patterns:".cyan().bold(),
                            patterns.len(),
                            matcher.len()
                        );
                        for p in patterns {
                            let fix = if p.fix_available {
                                " [auto-fix]".green().to_string()
                            } else {
                                String::new()
                            };
                            println!(
                                "   {} {} ({}, {}){}",
                                p.id.bold(),
                                p.name,
                                p.resolved_category(),
                                severity_label(p.severity),
                                fix
                            );
                        }
                    }
                }
                PatternsAction::Show { id } => match matcher.get_pattern(&id) {
                    Some(p) => println!("{}", serde_json::to_string_pretty(p)?),
                    None => bail!("Unknown pattern id: {}", id),
                },
            }
        }

        Commands::Categorize { text } => {
            let extractor = ErrorExtractor::new();
            let error = extractor.extract_details(&text);
            let result = load_matcher(&config)?.match_error(&error);
            let category = result.resolved_category();

            println!(
                "{} {} ({})",
                "Category:".cyan().bold(),
                category.to_string().bold(),
                category.semantic_code()
            );
            if let Some(best) = result.best_match {
                println!(
                    "   Pattern: {} ({:.0}% confidence)",
                    best.pattern_id,
                    best.confidence * 100.0
                );
                println!("   Root cause: {}", best.root_cause);
                if best.fix_available {
                    println!("   {}", "Automatic fix available".green());
                }
            }
        }
    }

    Ok(())
}

fn load_matcher(config: &TriageConfig) -> anyhow::Result<PatternMatcher> {
    let matcher = match config.patterns_path {
        Some(ref path) => PatternMatcher::from_path(path)?,
        None => PatternMatcher::builtin()?,
    };
    Ok(matcher)
}

/// Read runner output from a file, or from stdin for `-`.
fn read_input(input: &str) -> anyhow::Result<String> {
    if input == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read stdin")?;
        return Ok(raw);
    }

    let path = Path::new(input);
    if !path.exists() {
        return Err(TriageError::MissingFile {
            path: path.to_path_buf(),
        }
        .into());
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn severity_label(severity: Severity) -> String {
    match severity {
        Severity::Critical => severity.as_str().red().bold().to_string(),
        Severity::High => severity.as_str().red().to_string(),
        Severity::Medium => severity.as_str().yellow().to_string(),
        Severity::Low => severity.as_str().dimmed().to_string(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= max {
        line.to_string()
    } else {
        let cut: String = line.chars().take(max).collect();
        format!("{}...", cut)
    }
}

fn print_report(report: &AnalysisReport) {
    println!(
        "\n{} {} of {} tests failed",
        "Run:".cyan().bold(),
        report.failed_tests,
        report.total_tests
    );
    println!("   Status: {}", report.status.bold());

    if report.failed_tests == 0 {
        println!("\n{} No failures found", "OK".green().bold());
        return;
    }

    let dedup = &report.deduplication;
    println!(
        "   Unique errors: {} ({} duplicates, {:.0}% reduction)",
        dedup.unique_count,
        dedup.duplicate_count,
        dedup.deduplication_ratio * 100.0
    );

    println!("\n{}", "Categories:".cyan().bold());
    for summary in &report.aggregated.categories {
        let fixable = if summary.fixable_count > 0 {
            format!(" {} fixable", summary.fixable_count)
                .green()
                .to_string()
        } else {
            String::new()
        };
        println!(
            "   {} {} {} ({}){}",
            format!("{:>2}", summary.semantic_code).bold(),
            summary.category,
            summary.count,
            severity_label(summary.severity),
            fixable
        );
        println!("      Root cause: {}", summary.primary_root_cause);
        if !summary.affected_files.is_empty() {
            println!("      Files: {}", summary.affected_files.join(", "));
        }
    }

    if !report.action_items.is_empty() {
        println!("\n{}", "Actions:".cyan().bold());
        for (i, item) in report.action_items.iter().enumerate() {
            let marker = match item.action_type {
                ActionType::AutoFix => "fix".green(),
                ActionType::Investigate => "investigate".red(),
                ActionType::ManualFix => "manual".yellow(),
            };
            println!("   {}. [{}] {}", i + 1, marker, item.description);
            if let Some(ref command) = item.command {
                println!("      $ {}", command);
            }
            println!("      Impact: {}", item.estimated_impact);
        }
    }

    if report.clusters.len() < report.deduplication.unique_count {
        println!(
            "\n{} {} similar-error clusters (see `e2e-triage clusters`)",
            "Note:".yellow(),
            report.clusters.len()
        );
    }
}
