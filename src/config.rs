use crate::error::AggregateError;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

pub const MIN_SHARDS: usize = 64;
pub const SHARDS_PER_WORKER: usize = 4;
pub const DEFAULT_BATCH_LINES: usize = 4096;
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1_000_000;

/// How workers accumulate statistics while the stream is being read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// All workers update one table of independently locked shards.
    #[default]
    SharedShards,
    /// Each worker fills a private table; tables are merged per key at the end.
    WorkerLocal,
}

/// Sizing for one aggregation run.
///
/// `queue_capacity` counts batches, and each batch carries up to `batch_lines` lines, so at most
/// `queue_capacity * batch_lines` lines are in flight between the reader and the workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    pub shard_count: usize,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub batch_lines: usize,
    /// Log producer progress every this many lines. Zero disables progress logging.
    pub progress_interval: u64,
    pub strategy: Strategy,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self::calculate_for(available_cores())
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl AggregateConfig {
    /// Size the engine for a machine with `cores` usable CPUs.
    ///
    /// One worker per core, at least `MIN_SHARDS` shards (and never fewer than four per worker,
    /// rounded up to a power of two), and two queued batches per worker.
    pub fn calculate_for(cores: usize) -> Self {
        let worker_count = cores.max(1);
        let shard_count = (worker_count * SHARDS_PER_WORKER)
            .next_power_of_two()
            .max(MIN_SHARDS);
        Self {
            shard_count,
            worker_count,
            queue_capacity: worker_count * 2,
            batch_lines: DEFAULT_BATCH_LINES,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            strategy: Strategy::SharedShards,
        }
    }

    /// Fixed configuration independent of the host, for tests.
    pub fn default_config() -> Self {
        Self {
            shard_count: MIN_SHARDS,
            worker_count: 4,
            queue_capacity: 8,
            batch_lines: DEFAULT_BATCH_LINES,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            strategy: Strategy::SharedShards,
        }
    }

    pub fn new(shard_count: usize, worker_count: usize, queue_capacity: usize) -> Self {
        Self {
            shard_count,
            worker_count,
            queue_capacity,
            ..Self::default_config()
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_batch_lines(mut self, batch_lines: usize) -> Self {
        self.batch_lines = batch_lines;
        self
    }

    pub fn validate(&self) -> Result<(), AggregateError> {
        let sizes = [
            ("shard_count", self.shard_count),
            ("worker_count", self.worker_count),
            ("queue_capacity", self.queue_capacity),
            ("batch_lines", self.batch_lines),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(AggregateError::InvalidConfig(format!(
                    "{} must be at least 1",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Parse a JSON config. Missing fields take the values `Default` picks for this host.
    pub fn from_json_str(text: &str) -> Result<Self, AggregateError> {
        serde_json::from_str(text).map_err(AggregateError::ConfigParse)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, AggregateError> {
        let text = fs::read_to_string(path).map_err(|source| AggregateError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn log_summary(&self) {
        info!(
            shards = self.shard_count,
            workers = self.worker_count,
            queue_capacity = self.queue_capacity,
            batch_lines = self.batch_lines,
            strategy = ?self.strategy,
            "[config] engine configuration"
        );
    }
}
