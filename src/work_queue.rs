use crate::record::batch_lines;
use crossbeam_channel::{Receiver, Sender, bounded};
use std::io::{self, BufRead};

/// A group of complete lines travelling through the work queue as one item.
///
/// Lines are stored back to back in one buffer, each terminated by `\n`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Batch {
    bytes: Vec<u8>,
    lines: usize,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line, adding the terminator if the caller left it off.
    pub fn push_line(&mut self, line: &[u8]) {
        self.bytes.extend_from_slice(line);
        if !line.ends_with(b"\n") {
            self.bytes.push(b'\n');
        }
        self.lines += 1;
    }

    /// Read the next line of `reader` straight into the batch.
    /// Returns `false` at end of stream.
    pub fn read_line<R: BufRead>(&mut self, reader: &mut R) -> io::Result<bool> {
        let read = reader.read_until(b'\n', &mut self.bytes)?;
        if read == 0 {
            return Ok(false);
        }
        if self.bytes.last() != Some(&b'\n') {
            self.bytes.push(b'\n');
        }
        self.lines += 1;
        Ok(true)
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    pub fn iter_lines(&self) -> impl Iterator<Item = &[u8]> {
        batch_lines(&self.bytes)
    }
}

/// Bounded channel between the single producer and the worker pool.
///
/// The producer blocks once `capacity` batches are waiting. Dropping every sender closes the
/// queue; receivers then drain what is left and see the end of the stream.
pub struct WorkQueue {
    pub sender: Sender<Batch>,
    pub receiver: Receiver<Batch>,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self { sender, receiver }
    }

    pub fn split(self) -> (Sender<Batch>, Receiver<Batch>) {
        (self.sender, self.receiver)
    }
}
