use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Instant;
use tally::{AggregateConfig, AggregateError, Engine, Strategy, format_json, format_summary};
use tracing::info;
use tracing_subscriber::EnvFilter;

const READ_BUFFER_BYTES: usize = 1024 * 1024;

/// Per-key min/mean/max over a stream of `key;value` lines.
#[derive(Parser, Debug)]
#[command(name = "tally", version)]
struct Args {
    /// File of `key;value` lines
    input: PathBuf,

    /// Number of independently locked shards
    #[arg(long)]
    shards: Option<usize>,

    /// Number of worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Batches allowed to wait in the work queue
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Lines per queued batch
    #[arg(long)]
    batch_lines: Option<usize>,

    #[arg(long, value_enum)]
    strategy: Option<Strategy>,

    /// JSON config file; flags given on the command line take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the summary as a JSON array instead of the `{k=min/mean/max, ...}` line
    #[arg(long)]
    json: bool,
}

impl Args {
    fn resolve_config(&self) -> Result<AggregateConfig, AggregateError> {
        let mut config = match &self.config {
            Some(path) => AggregateConfig::from_json_file(path)?,
            None => AggregateConfig::default(),
        };
        if let Some(shards) = self.shards {
            config.shard_count = shards;
        }
        if let Some(workers) = self.workers {
            config.worker_count = workers;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(batch_lines) = self.batch_lines {
            config.batch_lines = batch_lines;
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        Ok(config)
    }
}

fn main() -> Result<(), AggregateError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.resolve_config()?;
    config.log_summary();

    let file = File::open(&args.input).map_err(|source| AggregateError::OpenInput {
        path: args.input.clone(),
        source,
    })?;
    info!(input = %args.input.display(), "[tally] reading input");

    let engine = Engine::new(config)?;
    let started = Instant::now();
    let aggregation = engine.run(BufReader::with_capacity(READ_BUFFER_BYTES, file))?;
    info!(elapsed = ?started.elapsed(), "[tally] total reading and aggregation time");

    let started = Instant::now();
    let output = if args.json {
        format_json(&aggregation.mapping)?
    } else {
        format_summary(&aggregation.mapping)
    };
    info!(elapsed = ?started.elapsed(), "[tally] total formatting time");

    println!("{}", output);
    Ok(())
}
