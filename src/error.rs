//! Error type shared by every matrix operation.
//!
//! All variants are terminal for the operation that raised them; nothing is
//! retried internally. Variants raised after output started carry a
//! `rows_emitted` count so the caller can tell a clean failure (nothing sent)
//! from a truncated response.

use crate::cancel::Stage;
use crate::io::csv::MalformedQuote;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the transpose engine and the streaming operations.
#[derive(Error, Debug)]
pub enum MatrixError {
    /// A record could not be parsed (bad quoting, invalid UTF-8, ...).
    #[error("CSV parsing error at row {row}: {message}")]
    Parse { row: u64, message: String },

    /// The underlying input stream failed while reading.
    #[error("failed to read input: {0}")]
    Input(#[source] io::Error),

    /// A row's width does not match the width of the first row.
    #[error("column number inconsistent: row {row} has {found} columns, expected {expected}")]
    InconsistentShape {
        row: u64,
        expected: usize,
        found: usize,
    },

    /// A field is not a base-10 integer (sum/product only).
    #[error("row {row}: {value} is not a number")]
    NotANumber { row: u64, value: String },

    /// Row count and column count differ (echo/flatten only).
    ///
    /// Detected at end of input, so earlier rows may already have been flushed.
    #[error("not a matrix: {rows} rows, {columns} columns")]
    NotSquare {
        rows: u64,
        columns: usize,
        rows_emitted: u64,
    },

    /// The input holds no rows at all.
    #[error("input contains no rows")]
    EmptyInput,

    /// The input could not be rewound after probing the column count.
    #[error("failed to reset reading point: {0}")]
    UnseekableInput(#[source] io::Error),

    /// Backing storage for a shard could not be created or written.
    #[error("shard {shard}: cannot allocate or write backing storage: {source}")]
    ShardAllocation {
        shard: usize,
        #[source]
        source: io::Error,
    },

    /// A shard could not be read back, or its content is corrupt.
    #[error("shard {shard}: reassembly failed after {rows_emitted} output rows: {message}")]
    Reassembly {
        shard: usize,
        rows_emitted: u64,
        message: String,
    },

    /// The deadline elapsed (or the operation was cancelled) at a check-point.
    #[error("processing timeout during {stage} after {elapsed:?} ({rows_emitted} rows already sent)")]
    DeadlineExceeded {
        stage: Stage,
        elapsed: Duration,
        rows_emitted: u64,
        cancelled: bool,
    },

    /// Writing to the result sink failed.
    #[error("writing response error after {rows_emitted} rows: {source}")]
    Output {
        rows_emitted: u64,
        #[source]
        source: io::Error,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, MatrixError>;

/// Coarse classification a caller can map onto a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request payload is at fault.
    BadInput,
    /// The deadline elapsed.
    Timeout,
    /// Storage, output or configuration failure on our side.
    Internal,
}

impl MatrixError {
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Parse { .. }
            | Self::Input(_)
            | Self::InconsistentShape { .. }
            | Self::NotANumber { .. }
            | Self::NotSquare { .. }
            | Self::EmptyInput
            | Self::UnseekableInput(_) => ErrorClass::BadInput,
            Self::DeadlineExceeded { .. } => ErrorClass::Timeout,
            Self::ShardAllocation { .. }
            | Self::Reassembly { .. }
            | Self::Output { .. }
            | Self::InvalidConfig(_) => ErrorClass::Internal,
        }
    }

    /// Number of output rows already handed to the sink when the error was raised.
    #[must_use]
    pub const fn rows_emitted(&self) -> u64 {
        match self {
            Self::NotSquare { rows_emitted, .. }
            | Self::Reassembly { rows_emitted, .. }
            | Self::DeadlineExceeded { rows_emitted, .. }
            | Self::Output { rows_emitted, .. } => *rows_emitted,
            _ => 0,
        }
    }

    /// `true` when some output may already have reached the client.
    #[must_use]
    pub const fn output_committed(&self) -> bool {
        self.rows_emitted() > 0
    }

    pub(crate) fn from_csv(row: u64, err: csv::Error) -> Self {
        if err.is_io_error() {
            match err.into_kind() {
                csv::ErrorKind::Io(e) => {
                    let quoting = e
                        .get_ref()
                        .and_then(|inner| inner.downcast_ref::<MalformedQuote>())
                        .map(ToString::to_string);
                    match quoting {
                        Some(message) => Self::Parse { row, message },
                        None => Self::Input(e),
                    }
                }
                other => Self::Parse {
                    row,
                    message: format!("{other:?}"),
                },
            }
        } else {
            Self::Parse {
                row,
                message: err.to_string(),
            }
        }
    }
}
