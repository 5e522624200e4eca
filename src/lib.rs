pub mod combiner;
pub mod config;
pub mod error;
pub mod format;
pub mod partition;
pub mod pipeline;
pub mod record;
pub mod shard;
pub mod stats;
pub mod work_queue;
pub mod worker;

pub use combiner::FinalMapping;
pub use config::{AggregateConfig, Strategy};
pub use error::*;
pub use format::{format_json, format_summary, format_summary as format};
pub use pipeline::{Aggregation, Engine, RunReport, StopHandle, aggregate};
pub use stats::Stats;
