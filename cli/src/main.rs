use std::path::{Path, PathBuf};

use agentscan_core::{AgentCandidate, ScanConfig, ScanReport, Scanner, Value};
use anyhow::{bail, Context};
use clap::{ArgAction, Parser};
use console::style;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "agentscan.yml";

/// Agent discovery CLI entry point.
#[derive(Debug, Parser)]
#[command(
    name = "agentscan",
    about = "Find LLM agent definitions in Python source trees."
)]
struct Args {
    /// File or directory to scan.
    #[arg(value_name = "PATH", default_value = ".")]
    path: PathBuf,

    /// Path to config file (YAML). Defaults to agentscan.yml if present.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Emit JSON output for automation.
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Only print the summary line.
    #[arg(long, action = ArgAction::SetTrue)]
    quiet: bool,

    /// File extensions to scan (comma-separated). Overrides the config.
    #[arg(long = "ext", value_delimiter = ',', value_name = "EXT[,EXT]")]
    extensions: Vec<String>,

    /// Number of leading prompt characters used to detect duplicates.
    #[arg(long, value_name = "N")]
    dedup_prefix: Option<usize>,

    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG wins when set.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut cfg = load_config(args.config.as_deref())?;
    if !args.extensions.is_empty() {
        cfg.extensions = args.extensions.clone();
    }
    if let Some(prefix) = args.dedup_prefix {
        cfg.dedup_prefix_chars = prefix;
    }

    let scanner = Scanner::new(cfg).context("Invalid scan configuration")?;
    let report = scanner
        .scan(&args.path)
        .with_context(|| format!("Failed to scan {}", args.path.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_human_report(&report, args.quiet);
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

/// An explicit `--config` must exist; the default file is optional.
fn load_config(explicit: Option<&Path>) -> anyhow::Result<ScanConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                bail!("Config file {} does not exist", path.display());
            }
            path.to_path_buf()
        }
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG);
            if !path.exists() {
                return Ok(ScanConfig::default());
            }
            path
        }
    };
    ScanConfig::load(&path).with_context(|| format!("Failed to load config {}", path.display()))
}

fn print_human_report(report: &ScanReport, quiet: bool) {
    if !quiet {
        for agent in &report.agents {
            print_agent(agent);
        }
        for skipped in &report.skipped {
            println!(
                "{} {}: {}",
                style("skipped").dim(),
                style(&skipped.path).cyan(),
                skipped.reason
            );
        }
        if !report.agents.is_empty() || !report.skipped.is_empty() {
            println!();
        }
    }
    let stats = &report.stats;
    println!(
        "{} agent(s) in {} file(s); {} skipped, {} duplicate(s) dropped",
        style(report.agents.len()).bold(),
        stats.files_scanned,
        stats.files_skipped,
        stats.duplicates_dropped
    );
}

fn print_agent(agent: &AgentCandidate) {
    println!(
        "{} [{}] {}:{}",
        style(&agent.id[..12.min(agent.id.len())]).bold(),
        style(agent.framework_tag).yellow(),
        style(&agent.source_file).cyan(),
        agent.line
    );
    match &agent.role_text {
        Value::Known(text) => {
            let first = text.lines().next().unwrap_or_default();
            println!("  prompt: {first}");
        }
        Value::Unresolved => println!("  prompt: {}", style("<unresolved>").dim()),
    }
    if !agent.tool_name_hints.is_empty() {
        println!("  tools: {}", agent.tool_name_hints.join(", "));
    }
}
