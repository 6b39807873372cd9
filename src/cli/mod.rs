//! CLI layer: argument parsing, command dispatch, and subcommand implementations.

pub mod args;
mod info;
mod serve;

pub use args::*;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cidx::{CacheConfig, CacheError, DaemonCache, IndexPublisher, IndexRecord, QueryRequest, QueryResponse};

// ─── CLI ─────────────────────────────────────────────────────────────

/// Code index daemon: resident semantic + full-text query cache that follows index rebuilds
#[derive(Parser, Debug)]
#[command(name = "cidx", version, about, after_help = "\
Run 'cidx <COMMAND> --help' for detailed options and examples.\n\
Common options: -p <PROJECT> (project root), --collection <NAME>")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Start the JSON-RPC query daemon over stdio.
    Serve(ServeArgs),

    /// Publish a new index generation from a JSONL records file.
    Publish(PublishArgs),

    /// One-shot query against a project's index.
    Query(QueryArgs),

    /// Show the published index metadata for a project.
    Info(InfoArgs),
}

// ─── Main entry point ───────────────────────────────────────────────

pub fn run() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(args) => serve::cmd_serve(args),
        Commands::Publish(args) => cmd_publish(args),
        Commands::Query(args) => cmd_query(args),
        Commands::Info(args) => info::cmd_info(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Structured logging to stderr (stdout carries JSON-RPC / results).
/// `RUST_LOG` takes precedence over `level`.
pub(crate) fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

// ─── publish ────────────────────────────────────────────────────────

fn cmd_publish(args: PublishArgs) -> Result<(), CacheError> {
    init_logging(&args.log_level);
    let start = Instant::now();

    let records = match &args.input {
        Some(path) => read_records(path)?,
        None if args.update && !args.delete.is_empty() => Vec::new(),
        None => {
            return Err(CacheError::InvalidArgs(
                "--input is required (or --update with --delete)".to_string(),
            ))
        }
    };

    let config = CacheConfig {
        collection: args.collection.clone(),
        ..CacheConfig::default()
    };
    let collection = config.collection_path_for(Path::new(&args.project));
    let publisher = IndexPublisher::new(&collection).with_params(args.params());

    let version = if args.update {
        publisher.update(&records, &args.delete)?
    } else {
        publisher.publish(&records)?
    };

    eprintln!(
        "Published {} record(s) to {} as version {} in {:.1}ms",
        records.len(),
        collection.display(),
        version,
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

/// Read one [`IndexRecord`] per non-empty line.
pub(crate) fn read_records(path: &Path) -> Result<Vec<IndexRecord>, CacheError> {
    let file = File::open(path)
        .map_err(|e| CacheError::InvalidArgs(format!("cannot open {}: {}", path.display(), e)))?;
    let mut records = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: IndexRecord = serde_json::from_str(line).map_err(|e| {
            CacheError::InvalidArgs(format!("{}:{}: invalid record: {}", path.display(), line_no + 1, e))
        })?;
        records.push(record);
    }
    Ok(records)
}

// ─── query ──────────────────────────────────────────────────────────

fn cmd_query(args: QueryArgs) -> Result<(), CacheError> {
    init_logging(&args.log_level);
    let request = build_request(&args)?;

    let cache = DaemonCache::new(CacheConfig {
        collection: args.collection.clone(),
        ..CacheConfig::default()
    });
    let response = cache.query(Path::new(&args.project), &request)?;
    cache.shutdown();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

pub(crate) fn build_request(args: &QueryArgs) -> Result<QueryRequest, CacheError> {
    match (&args.terms, &args.vector, args.id) {
        (Some(terms), None, None) => Ok(QueryRequest::FullText {
            terms: terms
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            mode_and: args.all,
            regex: args.regex,
            limit: args.limit,
        }),
        (None, Some(vector), None) => {
            let vector = vector
                .split(',')
                .map(|v| v.trim().parse::<f32>())
                .collect::<Result<Vec<f32>, _>>()
                .map_err(|e| CacheError::InvalidArgs(format!("--vector: {}", e)))?;
            Ok(QueryRequest::Semantic { vector, limit: args.limit })
        }
        (None, None, Some(id)) => Ok(QueryRequest::Lookup { id }),
        _ => Err(CacheError::InvalidArgs(
            "exactly one of --terms, --vector, --id is required".to_string(),
        )),
    }
}

fn print_response(response: &QueryResponse) {
    for hit in &response.hits {
        let location = hit
            .location
            .as_ref()
            .map(|l| format!("{}:{}-{}", l.path, l.start_line, l.end_line))
            .unwrap_or_else(|| "?".to_string());
        if hit.lines.is_empty() {
            println!("{:>8.4}  #{:<8} {}", hit.score, hit.id, location);
        } else {
            let lines: Vec<String> = hit.lines.iter().map(|l| l.to_string()).collect();
            println!("{:>8.4}  #{:<8} {}  lines: {}", hit.score, hit.id, location, lines.join(","));
        }
    }
    eprintln!(
        "{} result(s) from version {} in {:.1}ms",
        response.hits.len(),
        response.version,
        response.elapsed_ms
    );
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
