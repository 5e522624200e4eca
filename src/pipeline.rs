use crate::combiner::{FinalMapping, combine_partials, combine_shards};
use crate::config::{AggregateConfig, Strategy};
use crate::error::AggregateError;
use crate::shard::{LocalTable, ShardedTable};
use crate::work_queue::{Batch, WorkQueue};
use crate::worker::{RecordSink, Worker, WorkerTally};
use crossbeam_channel::Sender;
use serde::Serialize;
use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{info, warn};

/// Asks a running engine to stop reading input.
///
/// Lines already queued are still processed, so the result is an exact aggregation of every
/// line handed to the workers before the request.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Counters describing one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Lines handed to the workers.
    pub lines_read: u64,
    pub records_applied: u64,
    pub malformed: u64,
    pub invalid: u64,
    pub distinct_keys: usize,
    pub stopped_early: bool,
}

#[derive(Debug)]
pub struct Aggregation {
    pub mapping: FinalMapping,
    pub report: RunReport,
}

pub struct Engine {
    config: AggregateConfig,
    stop: StopHandle,
}

impl Engine {
    pub fn new(config: AggregateConfig) -> Result<Self, AggregateError> {
        config.validate()?;
        Ok(Self {
            config,
            stop: StopHandle::new(),
        })
    }

    pub fn config(&self) -> &AggregateConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Read `reader` to the end (or until a stop request), aggregate every line and merge the result.
    ///
    /// The calling thread is the single producer. Workers run on scoped threads and are all joined
    /// before anything is combined.
    pub fn run<R: BufRead>(&self, reader: R) -> Result<Aggregation, AggregateError> {
        info!(
            shards = self.config.shard_count,
            workers = self.config.worker_count,
            queue_capacity = self.config.queue_capacity,
            strategy = ?self.config.strategy,
            "[engine] starting aggregation"
        );

        let (mapping, tally, stopped_early) = match self.config.strategy {
            Strategy::SharedShards => {
                let table = ShardedTable::new(self.config.shard_count);
                let (sinks, tally, stopped_early) = self.drive(reader, |_| &table)?;
                drop(sinks);
                (combine_shards(table), tally, stopped_early)
            }
            Strategy::WorkerLocal => {
                let (tables, tally, stopped_early) = self.drive(reader, |_| LocalTable::new())?;
                (combine_partials(tables), tally, stopped_early)
            }
        };

        let report = RunReport {
            lines_read: tally.lines,
            records_applied: tally.applied,
            malformed: tally.malformed,
            invalid: tally.invalid,
            distinct_keys: mapping.len(),
            stopped_early,
        };
        info!(
            lines = report.lines_read,
            applied = report.records_applied,
            malformed = report.malformed,
            invalid = report.invalid,
            keys = report.distinct_keys,
            stopped_early = report.stopped_early,
            "[engine] aggregation finished"
        );
        Ok(Aggregation { mapping, report })
    }

    /// Spawn the workers, feed them from `reader`, and join every one of them.
    ///
    /// Returns each worker's sink, the summed tallies, and whether the producer stopped early.
    fn drive<R, S, F>(
        &self,
        reader: R,
        make_sink: F,
    ) -> Result<(Vec<S>, WorkerTally, bool), AggregateError>
    where
        R: BufRead,
        S: RecordSink + Send,
        F: Fn(usize) -> S,
    {
        thread::scope(|scope| {
            let (sender, receiver) = WorkQueue::new(self.config.queue_capacity).split();

            let handles: Vec<_> = (0..self.config.worker_count)
                .map(|id| {
                    let receiver = receiver.clone();
                    let worker = Worker::new(id, make_sink(id));
                    scope.spawn(move || worker.run(&receiver))
                })
                .collect();
            drop(receiver);

            // The sender is dropped when `produce` returns, which closes the queue on every path.
            let produced = self.produce(reader, sender);

            let mut sinks = Vec::with_capacity(handles.len());
            let mut tally = WorkerTally::default();
            let mut panicked = None;
            for (id, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok((sink, worker_tally)) => {
                        tally.absorb(&worker_tally);
                        sinks.push(sink);
                    }
                    Err(_) => {
                        panicked.get_or_insert(id);
                    }
                }
            }

            if let Some(id) = panicked {
                return Err(AggregateError::WorkerPanicked(id));
            }
            let stopped_early = produced?;
            Ok((sinks, tally, stopped_early))
        })
    }

    /// Split the stream into line batches and queue them. Returns `true` if stopped by request.
    fn produce<R: BufRead>(&self, mut reader: R, sender: Sender<Batch>) -> Result<bool, AggregateError> {
        let batch_lines = self.config.batch_lines;
        let interval = self.config.progress_interval;
        let mut lines = 0u64;
        let mut batch = Batch::new();

        loop {
            if self.stop.is_stop_requested() {
                warn!(
                    lines_queued = lines - batch.lines() as u64,
                    "[producer] stop requested, no further lines will be queued"
                );
                return Ok(true);
            }

            let more = batch.read_line(&mut reader).map_err(|err| {
                warn!(error = %err, lines, "[producer] input read failed, aborting run");
                AggregateError::SourceRead(err)
            })?;
            if !more {
                break;
            }

            lines += 1;
            if interval > 0 && lines % interval == 0 {
                info!(lines, "[producer] read lines so far");
            }

            if batch.lines() >= batch_lines && sender.send(std::mem::take(&mut batch)).is_err() {
                warn!(lines, "[producer] all workers exited before end of input");
                return Ok(false);
            }
        }

        if !batch.is_empty() && sender.send(batch).is_err() {
            warn!(lines, "[producer] all workers exited before end of input");
            return Ok(false);
        }
        info!(lines, "[producer] reached end of input");
        Ok(false)
    }
}

/// Aggregate a whole stream with `config` and return the merged mapping.
pub fn aggregate<R: BufRead>(reader: R, config: &AggregateConfig) -> Result<FinalMapping, AggregateError> {
    Ok(Engine::new(config.clone())?.run(reader)?.mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::format_summary;
    use std::io::{self, BufReader, Cursor, Read};

    const SCENARIO_TWO: &str = "Abha;-23.0\nAbha;18.0\nYerevan;-37.2\nAbha;59.2\n";
    const SCENARIO_TWO_OUTPUT: &str = "{Abha=-23.0/18.1/59.2, Yerevan=-37.2/-37.2/-37.2}";

    fn summarize(input: &str, config: AggregateConfig) -> String {
        format_summary(&aggregate(Cursor::new(input.as_bytes()), &config).unwrap())
    }

    fn tenths(t: i64) -> String {
        let sign = if t < 0 { "-" } else { "" };
        format!("{}{}.{}", sign, t.abs() / 10, t.abs() % 10)
    }

    fn generated_input(lines: usize) -> String {
        (0..lines)
            .map(|i| {
                let key = format!("station-{:03}", (i * 7919) % 311);
                let value = ((i * 37) % 1999) as i64 - 999;
                format!("{};{}\n", key, tenths(value))
            })
            .collect()
    }

    #[test]
    fn test_empty_input_is_empty_braces() {
        for strategy in [Strategy::SharedShards, Strategy::WorkerLocal] {
            let config = AggregateConfig::default_config().with_strategy(strategy);
            assert_eq!(summarize("", config), "{}");
        }
    }

    #[test]
    fn test_scenario_two() {
        assert_eq!(
            summarize(SCENARIO_TWO, AggregateConfig::default_config()),
            SCENARIO_TWO_OUTPUT
        );
    }

    #[test]
    fn test_scenario_three_shard_and_worker_counts() {
        for shards in [1, 2048] {
            for workers in [1, 16] {
                for strategy in [Strategy::SharedShards, Strategy::WorkerLocal] {
                    let config = AggregateConfig::new(shards, workers, 4)
                        .with_strategy(strategy)
                        .with_batch_lines(1);
                    assert_eq!(
                        summarize(SCENARIO_TWO, config),
                        SCENARIO_TWO_OUTPUT,
                        "shards={} workers={} strategy={:?}",
                        shards,
                        workers,
                        strategy
                    );
                }
            }
        }
    }

    #[test]
    fn test_output_independent_of_partitioning() {
        let input = generated_input(20_000);
        let reference = summarize(&input, AggregateConfig::new(1, 1, 1));
        for shards in [1, 2, 2048] {
            for workers in [1, 4, 16] {
                for strategy in [Strategy::SharedShards, Strategy::WorkerLocal] {
                    let config = AggregateConfig::new(shards, workers, 3)
                        .with_strategy(strategy)
                        .with_batch_lines(7);
                    assert_eq!(
                        summarize(&input, config),
                        reference,
                        "shards={} workers={} strategy={:?}",
                        shards,
                        workers,
                        strategy
                    );
                }
            }
        }
    }

    #[test]
    fn test_bad_lines_are_inert() {
        let clean = generated_input(2_000);
        let mut noisy = String::new();
        for (i, line) in clean.lines().enumerate() {
            if i % 97 == 0 {
                noisy.push_str("no separator here\n");
                noisy.push_str("a;b;c\n");
                noisy.push_str("Abha;not-a-number\n");
                noisy.push_str("\n");
            }
            noisy.push_str(line);
            noisy.push('\n');
        }

        let config = AggregateConfig::new(16, 4, 4).with_batch_lines(64);
        assert_eq!(summarize(&noisy, config.clone()), summarize(&clean, config));
    }

    #[test]
    fn test_malformed_line_deep_in_large_batch_keeps_neighbours() {
        let mut input = String::new();
        for i in 0..10_000 {
            if i == 7_777 {
                input.push_str("garbage-without-separator\n");
            }
            input.push_str("k;1.0\n");
        }

        let config = AggregateConfig::new(4, 2, 2).with_batch_lines(100_000);
        let aggregation = Engine::new(config).unwrap().run(Cursor::new(input)).unwrap();
        assert_eq!(aggregation.mapping.get("k").unwrap().count, 10_000);
        assert_eq!(aggregation.report.malformed, 1);
        assert_eq!(aggregation.report.lines_read, 10_001);
    }

    #[test]
    fn test_report_counts_lines() {
        let input = "a;1.0\nb;x\nno-sep\na;2.0\nlast;3.0";
        let config = AggregateConfig::default_config().with_strategy(Strategy::WorkerLocal);
        let report = Engine::new(config).unwrap().run(Cursor::new(input)).unwrap().report;
        assert_eq!(
            report,
            RunReport {
                lines_read: 5,
                records_applied: 3,
                malformed: 1,
                invalid: 1,
                distinct_keys: 2,
                stopped_early: false,
            }
        );
    }

    #[test]
    fn test_invalid_config_rejected_before_running() {
        let result = Engine::new(AggregateConfig::new(0, 4, 4));
        assert!(matches!(result, Err(AggregateError::InvalidConfig(_))));
    }

    #[test]
    fn test_stop_before_run_aggregates_nothing() {
        let engine = Engine::new(AggregateConfig::default_config()).unwrap();
        engine.stop_handle().request_stop();
        let aggregation = engine.run(Cursor::new(SCENARIO_TWO)).unwrap();
        assert!(aggregation.mapping.is_empty());
        assert!(aggregation.report.stopped_early);
        assert_eq!(aggregation.report.lines_read, 0);
    }

    struct StopAfter {
        inner: Cursor<Vec<u8>>,
        stop: StopHandle,
        after_bytes: u64,
    }

    impl Read for StopAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.inner.position() >= self.after_bytes {
                self.stop.request_stop();
            }
            self.inner.read(buf)
        }
    }

    #[test]
    fn test_stop_mid_stream_keeps_queued_lines_exact() {
        let input = "k;1.0\n".repeat(10_000).into_bytes();
        let config = AggregateConfig::new(8, 4, 2).with_batch_lines(8);
        let engine = Engine::new(config).unwrap();
        let reader = BufReader::with_capacity(
            16,
            StopAfter {
                inner: Cursor::new(input),
                stop: engine.stop_handle(),
                after_bytes: 600,
            },
        );

        let aggregation = engine.run(reader).unwrap();
        let report = aggregation.report;
        assert!(report.stopped_early);
        assert!(report.lines_read < 10_000);
        let stats = aggregation.mapping.get("k").unwrap();
        assert_eq!(stats.count, report.records_applied);
        assert_eq!(stats.sum, report.records_applied as f64);
    }

    struct FailAfter {
        inner: Cursor<Vec<u8>>,
    }

    impl Read for FailAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let read = self.inner.read(buf)?;
            if read == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "device unplugged"));
            }
            Ok(read)
        }
    }

    #[test]
    fn test_read_failure_aborts_run() {
        for strategy in [Strategy::SharedShards, Strategy::WorkerLocal] {
            let config = AggregateConfig::new(4, 2, 1).with_strategy(strategy);
            let reader = BufReader::new(FailAfter {
                inner: Cursor::new(SCENARIO_TWO.as_bytes().to_vec()),
            });
            let err = aggregate(reader, &config).unwrap_err();
            assert!(err.is_source_read(), "unexpected error {:?}", err);
        }
    }
}
