//! polyq CLI - one intent, five databases
//!
//! Usage:
//!   polyq "get::movies[director~'spielberg'i, year=1993]"
//!   polyq --compare "get::movies[year>1989][lim=5]"
//!   polyq explain "set::movies[rating=9.1][title='Goodfellas', year=1990]"
//!   polyq schema wide-column movies

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use tracing_subscriber::EnvFilter;

use polyq::prelude::*;

#[derive(Parser)]
#[command(name = "polyq")]
#[command(author = "polyq contributors")]
#[command(version)]
#[command(about = "🔀 polyq - one intent, five databases", long_about = None)]
#[command(after_help = "EXAMPLES:
    polyq \"get::movies[director~'spielberg'i, year=1993]\"
    polyq --backend graph \"key::movies[title='Hook', year=1991]\"
    polyq --compare \"get::movies[genre~'drama'i][lim=3]\"
    polyq --json '{\"operation\": \"filter\", \"entity\": \"movies\"}'
    polyq explain \"del::movies[title='Ghost', year=1990]\"
    polyq schema triple movies")]
struct Cli {
    /// Intent in compact syntax (or JSON with --json)
    query: Option<String>,

    /// Backend to run against
    #[arg(short, long, default_value = "document")]
    backend: BackendKind,

    /// Run on every enabled backend and compare
    #[arg(short, long)]
    compare: bool,

    /// Read the intent as JSON instead of compact syntax
    #[arg(long)]
    json: bool,

    /// Show the native queries without executing
    #[arg(long)]
    dry_run: bool,

    /// Output format
    #[arg(short, long, default_value = "table")]
    format: OutputFormat,

    /// Configuration file
    #[arg(long, env = "POLYQ_CONFIG")]
    config: Option<PathBuf>,

    /// Per-backend execution budget
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Start with empty stores
    #[arg(long)]
    no_seed: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse an intent and show its translation for every backend
    Explain { query: String },
    /// Describe how a backend stores an entity
    Schema {
        backend: BackendKind,
        #[arg(default_value = "movies")]
        entity: String,
    },
    /// Show the compact syntax reference
    Symbols,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "polyq=debug" } else { "polyq=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(Commands::Symbols) = &cli.command {
        show_symbols();
        return Ok(());
    }

    let mut config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(ms) = cli.timeout_ms {
        anyhow::ensure!(ms > 0, "--timeout-ms must be positive");
        config.timeout_ms = ms;
    }
    if cli.no_seed {
        config.seed = false;
    }

    let mut engine = Engine::in_memory(&config).await?;
    if cli.json {
        engine = engine.with_source(Arc::new(JsonSource));
    }

    match &cli.command {
        Some(Commands::Explain { query }) => explain(&engine, &cli, query),
        Some(Commands::Schema { backend, entity }) => {
            let description = engine.describe(*backend, entity).await?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&description)?),
                OutputFormat::Table => {
                    println!(
                        "{} {} {}",
                        backend.to_string().cyan().bold(),
                        "stores".dimmed(),
                        description.native_entity.white().bold()
                    );
                    print_records(&description.records());
                }
            }
            Ok(())
        }
        Some(Commands::Symbols) => Ok(()),
        None => {
            let Some(query) = cli.query.as_deref() else {
                println!("{}", "Usage: polyq <INTENT>".yellow());
                println!("Run {} for more information.", "polyq --help".cyan());
                return Ok(());
            };
            if cli.dry_run {
                return explain(&engine, &cli, query);
            }
            let target = if cli.compare { Target::All } else { Target::Backend(cli.backend) };
            let outcome = engine.run(query, target).await?;
            print_outcome(&outcome, cli.format)
        }
    }
}

fn infer(cli: &Cli, text: &str) -> anyhow::Result<Intent> {
    let intent = if cli.json { JsonSource::decode(text)? } else { polyq::parse(text)? };
    intent.validate()?;
    Ok(intent)
}

fn explain(engine: &Engine, cli: &Cli, text: &str) -> anyhow::Result<()> {
    let intent = infer(cli, text)?;
    let explained = engine.explain(&intent);

    if let OutputFormat::Json = cli.format {
        let rendered: Vec<serde_json::Value> = explained
            .iter()
            .map(|(kind, query)| match query {
                Ok(q) => serde_json::json!({ "backend": kind, "native_query": q.to_string() }),
                Err(e) => serde_json::json!({
                    "backend": kind,
                    "error_kind": e.kind(),
                    "error_detail": e.to_string(),
                }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rendered)?);
        return Ok(());
    }

    println!("{}", "🔀 polyq Intent Explanation".cyan().bold());
    println!();
    println!("{} {}", "Input:".dimmed(), text.yellow());
    println!("{} {}", "Intent:".dimmed(), intent.to_string().white());
    println!();

    for (kind, query) in explained {
        println!("{} {}", kind.to_string().green().bold(), format!("({})", kind.dialect()).dimmed());
        match query {
            Ok(q) => {
                for line in q.to_string().lines() {
                    println!("  {}", line.white());
                }
            }
            Err(e) => println!("  {} {}", format!("[{}]", e.kind()).red(), e),
        }
        println!();
    }
    Ok(())
}

fn print_outcome(outcome: &Outcome, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let json = match outcome {
                Outcome::Single(envelope) => serde_json::to_string_pretty(envelope)?,
                Outcome::Comparison(report) => serde_json::to_string_pretty(report)?,
            };
            println!("{}", json);
        }
        OutputFormat::Table => {
            for envelope in outcome.envelopes() {
                print_envelope(envelope);
            }
            if let Outcome::Comparison(report) = outcome {
                print_summary(&report.summary);
            }
        }
    }
    Ok(())
}

fn print_envelope(envelope: &ResultEnvelope) {
    let status = match envelope.status() {
        Status::Success => "success".green(),
        Status::Partial => "partial".yellow(),
        Status::Error => "error".red(),
    };
    println!(
        "{} {} {}",
        envelope.backend().to_string().cyan().bold(),
        status.bold(),
        format!("{:.2} ms", envelope.elapsed().as_secs_f64() * 1000.0).dimmed()
    );
    if let Some(native) = envelope.native_query() {
        println!("  {} {}", "Query:".dimmed(), native.white());
    }
    if let Some(detail) = envelope.error_detail() {
        let kind = envelope.error_kind().map(|k| k.to_string()).unwrap_or_default();
        let label = if envelope.is_error() { detail.red() } else { detail.yellow() };
        println!("  {} {}", format!("[{}]", kind).dimmed(), label);
    }
    if let Some(affected) = envelope.affected() {
        println!("{} {} affected", "✓".green(), affected);
    } else if !envelope.is_error() {
        print_records(envelope.records());
    }
    println!();
}

fn print_records(records: &[Record]) {
    if records.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    let columns: Vec<&str> = records[0].keys().collect();
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            columns
                .iter()
                .map(|c| r.get(c).map(|v| v.to_string()).unwrap_or_default())
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let header: Vec<String> = columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!("{:width$}", c, width = *w))
        .collect();
    println!("{}", header.join(" │ ").white().bold());
    let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
    println!("{}", sep.join("─┼─").dimmed());
    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{:width$}", cell, width = *w))
            .collect();
        println!("{}", cells.join(" │ "));
    }
    println!("{} record(s) returned", records.len().to_string().cyan());
}

fn print_summary(summary: &ComparisonSummary) {
    println!("{}", "Comparison".cyan().bold());
    println!(
        "  {} {}/{} succeeded, {:.2} ms total",
        "Backends:".dimmed(),
        summary.succeeded,
        summary.total,
        summary.total_elapsed.as_secs_f64() * 1000.0
    );
    if let (Some(fastest), Some(slowest)) = (summary.fastest, summary.slowest) {
        println!("  {} {}  {} {}", "Fastest:".dimmed(), fastest, "Slowest:".dimmed(), slowest);
    }
    let counts: Vec<String> = summary
        .record_counts
        .iter()
        .map(|(kind, n)| format!("{}={}", kind, n))
        .collect();
    println!("  {} {}", "Counts:".dimmed(), counts.join(" "));
    if summary.counts_agree {
        println!("  {}", "✓ record counts agree".green());
    } else {
        let divergent: Vec<String> = summary.divergent.iter().map(|k| k.to_string()).collect();
        println!("  {} {}", "✗ divergent:".red(), divergent.join(", "));
    }
}

fn show_symbols() {
    println!("{}", "🔀 polyq Syntax Reference".cyan().bold());
    println!();

    let symbols = [
        ("get::", "Filter", "Records matching every predicate"),
        ("key::", "Read by key", "One record by its identity fields"),
        ("add::", "Create", "Insert or replace by identity"),
        ("set::", "Update", "First cage assigns, second selects"),
        ("del::", "Delete", "Remove matching records"),
        ("schema::", "Describe", "Fields as the backend stores them"),
        ("=", "Equals", "year=1993"),
        ("~", "Contains", "title~'park'"),
        ("'..'i", "Ignore case", "director~'spielberg'i"),
        (">  <", "Compare", "rating>8, year<2000"),
        ("{..}", "In set", "year={1990, 1993}"),
        ("[lim=N]", "Limit", "[lim=10]"),
        ("[off=N]", "Offset", "[off=20]"),
    ];

    println!(
        "{:10} {:13} {}",
        "Symbol".white().bold(),
        "Name".white().bold(),
        "Meaning".white().bold()
    );
    println!("{}", "─".repeat(60).dimmed());

    for (symbol, name, meaning) in symbols {
        println!("{:10} {:13} {}", symbol.cyan().bold(), name.yellow(), meaning.dimmed());
    }
}
