//! Argument structs for all subcommands.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use cidx::config::DEFAULT_COLLECTION;
use cidx::{CacheConfig, PublishParams, Space, StalenessPolicy};

#[derive(Parser, Debug)]
#[command(after_long_help = r#"EXAMPLES:
  Serve current dir:     cidx serve
  Serve a project:       cidx serve --project /work/app --watch
  Short TTL, fail closed: cidx serve -p /work/app --ttl-secs 60 --staleness closed

HOW IT WORKS:
  1. Starts JSON-RPC event loop on stdin/stdout (logs go to stderr)
  2. The first query maps the project's index into memory
  3. Every query compares the loaded version with collection_meta.json;
     a new version published by `cidx publish` is reloaded before serving
  4. An entry idle longer than --ttl-secs is evicted (checked every --poll-interval-secs)
  5. With --watch: a publish releases the old mappings immediately

METHODS:
  query       {"kind":"semantic","vector":[...],"limit":10}
              {"kind":"text","terms":["retry"],"all":false,"regex":false,"limit":10}
              {"kind":"lookup","id":42}
              Optional "project" overrides --project.
  status      cache snapshot (project, version, counters, live handles)
  invalidate  drop cached handles; next query reloads
  ping
"#)]
pub struct ServeArgs {
    /// Default project queried when a request names none.
    #[arg(short, long, default_value = ".")]
    pub project: String,

    /// Collection name under .code-indexer/index.
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    pub collection: String,

    /// Evict the loaded index after this many idle seconds.
    #[arg(long, default_value = "600")]
    pub ttl_secs: u64,

    /// How often the eviction loop wakes up, in seconds.
    #[arg(long, default_value = "30")]
    pub poll_interval_secs: u64,

    /// What to do when metadata is missing or unreadable: open (keep serving) or closed (reload).
    #[arg(long, default_value = "open")]
    pub staleness: StalenessPolicy,

    /// Reject indexes whose vector dimension differs.
    #[arg(long)]
    pub expected_dim: Option<usize>,

    /// Load the default project's index at startup instead of on first query.
    #[arg(long)]
    pub preload: bool,

    /// Watch the metadata sidecar and release old handles as soon as a new version lands.
    #[arg(long)]
    pub watch: bool,

    /// Debounce delay in ms for the metadata watcher.
    #[arg(long, default_value = "250")]
    pub debounce_ms: u64,

    /// Log level for stderr output (error, warn, info, debug, trace). RUST_LOG overrides.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl ServeArgs {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_secs(self.ttl_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            collection: self.collection.clone(),
            staleness_policy: self.staleness,
            expected_dim: self.expected_dim,
            ..CacheConfig::default()
        }
    }
}

#[derive(Parser, Debug)]
#[command(after_long_help = r#"EXAMPLES:
  Full rebuild:      cidx publish -p /work/app --input chunks.jsonl
  Incremental:       cidx publish -p /work/app --input changed.jsonl --update --delete 17 --delete 18
  Delete only:       cidx publish -p /work/app --update --delete 17

RECORD FORMAT (one JSON object per line):
  {"id":1,"path":"src/lib.rs","start_line":1,"end_line":40,"vector":[0.1,0.2],"text":"fn main() {}"}
  "text" is optional; the full-text index is built from records that carry it.

NOTES:
  - Payloads are written to temp files and renamed into place; the metadata
    sidecar (with a new index_rebuild_uuid) is written last.
  - A running `cidx serve` picks the new version up on its next query.
"#)]
pub struct PublishArgs {
    /// Project root.
    #[arg(short, long, default_value = ".")]
    pub project: String,

    #[arg(long, default_value = DEFAULT_COLLECTION)]
    pub collection: String,

    /// JSONL file with index records. Required unless --update with only --delete.
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Merge into the current generation instead of replacing it.
    #[arg(long)]
    pub update: bool,

    /// Record ids to remove (with --update).
    #[arg(long, action = clap::ArgAction::Append, requires = "update")]
    pub delete: Vec<u64>,

    /// Distance space: cosine, l2 or ip.
    #[arg(long, default_value = "cosine")]
    pub space: Space,

    /// HNSW M parameter recorded in the metadata.
    #[arg(long, default_value = "16")]
    pub m: usize,

    /// HNSW ef_construction parameter recorded in the metadata.
    #[arg(long, default_value = "200")]
    pub ef_construction: usize,

    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

impl PublishArgs {
    pub fn params(&self) -> PublishParams {
        PublishParams {
            space: self.space,
            m: self.m,
            ef_construction: self.ef_construction,
        }
    }
}

#[derive(Parser, Debug)]
#[command(after_long_help = r#"EXAMPLES:
  Full-text:       cidx query -p /work/app --terms HttpClient,ILogger
  AND + regex:     cidx query -p /work/app --terms "retry.*,policy" --all --regex
  Semantic:        cidx query -p /work/app --vector 0.1,0.3,0.7 --limit 5
  Lookup by id:    cidx query -p /work/app --id 42

NOTES:
  - Exactly one of --terms, --vector, --id.
  - One-shot: loads the index, answers, exits. Use `cidx serve` to keep it resident.
"#)]
pub struct QueryArgs {
    #[arg(short, long, default_value = ".")]
    pub project: String,

    #[arg(long, default_value = DEFAULT_COLLECTION)]
    pub collection: String,

    /// Full-text terms, comma-separated.
    #[arg(short, long, conflicts_with_all = ["vector", "id"])]
    pub terms: Option<String>,

    /// Query vector, comma-separated floats.
    #[arg(long, conflicts_with = "id", allow_hyphen_values = true)]
    pub vector: Option<String>,

    /// Chunk id to look up.
    #[arg(long)]
    pub id: Option<u64>,

    /// AND mode: chunk must contain ALL terms.
    #[arg(long)]
    pub all: bool,

    /// Treat terms as regex patterns matched against indexed tokens.
    #[arg(short, long)]
    pub regex: bool,

    /// Maximum results (0 = all).
    #[arg(long, default_value = "10")]
    pub limit: usize,

    /// Print the raw JSON response.
    #[arg(long)]
    pub json: bool,

    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

#[derive(Parser, Debug)]
pub struct InfoArgs {
    #[arg(short, long, default_value = ".")]
    pub project: String,

    #[arg(long, default_value = DEFAULT_COLLECTION)]
    pub collection: String,

    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,
}
