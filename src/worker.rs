use crate::error::RecordError;
use crate::record::parse_record;
use crate::shard::{LocalTable, ShardedTable};
use crate::work_queue::Batch;
use crossbeam_channel::Receiver;
use tracing::{debug, trace};

/// Destination for parsed records.
pub trait RecordSink {
    fn observe(&mut self, key: &str, value: f64);
}

impl RecordSink for &ShardedTable {
    #[inline]
    fn observe(&mut self, key: &str, value: f64) {
        ShardedTable::observe(*self, key, value);
    }
}

impl RecordSink for LocalTable {
    #[inline]
    fn observe(&mut self, key: &str, value: f64) {
        LocalTable::observe(self, key, value);
    }
}

/// Line counters kept by one worker.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerTally {
    pub lines: u64,
    pub applied: u64,
    pub malformed: u64,
    pub invalid: u64,
}

impl WorkerTally {
    pub fn absorb(&mut self, other: &WorkerTally) {
        self.lines += other.lines;
        self.applied += other.applied;
        self.malformed += other.malformed;
        self.invalid += other.invalid;
    }
}

pub struct Worker<S: RecordSink> {
    id: usize,
    sink: S,
    tally: WorkerTally,
}

impl<S: RecordSink> Worker<S> {
    pub fn new(id: usize, sink: S) -> Self {
        Self {
            id,
            sink,
            tally: WorkerTally::default(),
        }
    }

    pub fn tally(&self) -> WorkerTally {
        self.tally
    }

    /// Parse and apply one line. A bad line is counted and skipped; it never affects its neighbours.
    pub fn process_line(&mut self, line: &[u8]) {
        self.tally.lines += 1;
        match parse_record(line) {
            Ok(record) => {
                self.sink.observe(record.key, record.value);
                self.tally.applied += 1;
            }
            Err(RecordError::Malformed) => {
                self.tally.malformed += 1;
                debug!(
                    worker = self.id,
                    line = %String::from_utf8_lossy(line),
                    "skipping malformed line"
                );
            }
            Err(RecordError::InvalidValue(value)) => {
                self.tally.invalid += 1;
                debug!(worker = self.id, value = %value, "skipping invalid value");
            }
        }
    }

    pub fn process_batch(&mut self, batch: &Batch) {
        trace!(worker = self.id, lines = batch.lines(), "processing batch");
        for line in batch.iter_lines() {
            self.process_line(line);
        }
    }

    /// Drain the queue until it is closed and empty, then hand back the sink.
    pub fn run(mut self, receiver: &Receiver<Batch>) -> (S, WorkerTally) {
        for batch in receiver.iter() {
            self.process_batch(&batch);
        }
        debug!(
            worker = self.id,
            lines = self.tally.lines,
            applied = self.tally.applied,
            "worker drained queue"
        );
        (self.sink, self.tally)
    }
}
