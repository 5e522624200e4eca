use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Fault local to a single input line. The line is skipped and the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("malformed record: expected exactly one ';' separator and a non-empty key")]
    Malformed,
    #[error("invalid value: {0:?} is not a finite decimal number")]
    InvalidValue(String),
}

/// Fault that aborts a whole aggregation run.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("failed reading input stream: {0}")]
    SourceRead(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed reading config file {}: {}", .path.display(), .source)]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed parsing config file: {0}")]
    ConfigParse(#[source] serde_json::Error),
    #[error("failed rendering summary: {0}")]
    Render(#[from] serde_json::Error),
    #[error("failed opening input {}: {}", .path.display(), .source)]
    OpenInput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
}

impl AggregateError {
    /// True for the variants produced by the input stream itself rather than by setup glue.
    pub fn is_source_read(&self) -> bool {
        matches!(self, AggregateError::SourceRead(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert_to_source_read() {
        let err: AggregateError = io::Error::new(io::ErrorKind::UnexpectedEof, "disk gone").into();
        assert!(err.is_source_read());
        assert!(err.to_string().contains("disk gone"));
    }

    #[test]
    fn invalid_value_message_names_the_text() {
        let err = RecordError::InvalidValue("abc".to_string());
        assert_eq!(err.to_string(), "invalid value: \"abc\" is not a finite decimal number");
    }
}
