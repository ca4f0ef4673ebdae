//! Single-pass matrix operations: echo, flatten, sum and product.
//!
//! None of them needs intermediate storage. Rows are validated for a
//! consistent width as they stream; the square-shape check (echo and flatten
//! only) can only run at end of input, after earlier output may already have
//! been flushed.
//!
//! Sum and product fold every value into an arbitrary-precision integer and
//! write it as a single field, so they never overflow.

use crate::block::Row;
use crate::cancel::{CancellationContext, Stage};
use crate::config::StreamConfig;
use crate::error::{MatrixError, Result};
use crate::io::{RowSink, RowSource};
use crate::metrics::MetricsCollector;
use num_bigint::{BigInt, Sign};
use std::io::{Read, Write};
use std::ops::ControlFlow;
use tracing::{debug, info, instrument};

/// Outcome of a streaming operation.
#[derive(Debug, Clone)]
pub struct StreamReport {
    /// Rows read from the input.
    pub rows: u64,
    /// Column count of the input.
    pub columns: usize,
    /// Output records written.
    pub rows_emitted: u64,
    /// Output fields written.
    pub fields_emitted: u64,
    pub metrics: MetricsCollector,
}

/// Copy a matrix from `input` to `output` unchanged, re-serialized.
///
/// The output is flushed every `output_flush_rows` rows.
///
/// # Errors
///
/// `Parse`/`Input`/`InconsistentShape` for bad input, `EmptyInput` when no
/// rows are present, `NotSquare` (when `require_square`) at end of input,
/// `Output` if the sink fails and `DeadlineExceeded` at a check-point.
#[instrument(skip_all, name = "echo")]
pub fn echo_matrix<R: Read, W: Write>(
    input: R,
    output: W,
    config: &StreamConfig,
    ctx: &CancellationContext,
) -> Result<StreamReport> {
    config.validate()?;
    let metrics = MetricsCollector::new();
    metrics.record_start();

    let mut source = RowSource::new(input, config.delimiter);
    let mut sink =
        RowSink::new(output, config.delimiter).with_flush_every(config.output_flush_rows);
    let mut fields = 0u64;

    while let Some(row) = next_row(&mut source, &sink, ctx)? {
        fields += row.len() as u64;
        sink.write_row(&row)?;
    }
    let columns = check_shape(&source, &sink, config)?;
    let rows_emitted = sink.rows_written();
    sink.into_inner()?;

    Ok(finish_report(
        "echo",
        metrics,
        source.rows_read(),
        columns,
        rows_emitted,
        fields,
    ))
}

/// Write every value of the matrix, in row-major order, as one output record.
///
/// Values are streamed into the sink as they are read, so memory stays
/// bounded regardless of the matrix size. The sink is flushed every
/// `flatten_chunk_fields` values.
///
/// # Errors
///
/// Same as [`echo_matrix`].
#[instrument(skip_all, name = "flatten")]
pub fn flatten_matrix<R: Read, W: Write>(
    input: R,
    output: W,
    config: &StreamConfig,
    ctx: &CancellationContext,
) -> Result<StreamReport> {
    config.validate()?;
    let metrics = MetricsCollector::new();
    metrics.record_start();

    let mut source = RowSource::new(input, config.delimiter);
    let mut sink = RowSink::new(output, config.delimiter);
    let chunk = config.flatten_chunk_fields.max(1) as u64;
    let mut fields = 0u64;

    while let Some(row) = next_row(&mut source, &sink, ctx)? {
        for value in &row {
            sink.write_field(value)?;
            fields += 1;
            if fields % chunk == 0 {
                sink.flush()?;
                debug!(fields, "flushed flatten chunk");
            }
        }
    }
    let columns = check_shape(&source, &sink, config)?;
    sink.end_row()?;
    let rows_emitted = sink.rows_written();
    sink.into_inner()?;

    Ok(finish_report(
        "flatten",
        metrics,
        source.rows_read(),
        columns,
        rows_emitted,
        fields,
    ))
}

/// Add up every value of the matrix and write the total as one field.
///
/// Fields may carry surrounding whitespace and an optional sign. The matrix
/// does not have to be square.
///
/// # Errors
///
/// `NotANumber` for a field that is not a base-10 integer, plus the input,
/// output and deadline errors of [`echo_matrix`].
#[instrument(skip_all, name = "sum")]
pub fn sum_matrix<R: Read, W: Write>(
    input: R,
    output: W,
    config: &StreamConfig,
    ctx: &CancellationContext,
) -> Result<StreamReport> {
    reduce_matrix("sum", input, output, config, ctx, BigInt::default(), |acc, value| {
        *acc += value;
        ControlFlow::Continue(())
    })
}

/// Multiply every value of the matrix and write the product as one field.
///
/// Reading stops as soon as the product reaches zero; the rest of the input
/// is neither parsed nor validated.
///
/// # Errors
///
/// Same as [`sum_matrix`].
#[instrument(skip_all, name = "product")]
pub fn product_matrix<R: Read, W: Write>(
    input: R,
    output: W,
    config: &StreamConfig,
    ctx: &CancellationContext,
) -> Result<StreamReport> {
    reduce_matrix("product", input, output, config, ctx, BigInt::from(1u8), |acc, value| {
        *acc *= value;
        if acc.sign() == Sign::NoSign {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })
}

fn reduce_matrix<R: Read, W: Write>(
    operation: &'static str,
    input: R,
    output: W,
    config: &StreamConfig,
    ctx: &CancellationContext,
    mut acc: BigInt,
    mut step: impl FnMut(&mut BigInt, &BigInt) -> ControlFlow<()>,
) -> Result<StreamReport> {
    config.validate()?;
    let metrics = MetricsCollector::new();
    metrics.record_start();

    let mut source = RowSource::new(input, config.delimiter);
    let mut sink = RowSink::new(output, config.delimiter);
    let mut values = 0u64;

    'rows: while let Some(row) = next_row(&mut source, &sink, ctx)? {
        for field in &row {
            let value = parse_integer(field).ok_or_else(|| MatrixError::NotANumber {
                row: source.rows_read(),
                value: field.clone(),
            })?;
            values += 1;
            if step(&mut acc, &value).is_break() {
                debug!(operation, row = source.rows_read(), values, "result settled early");
                break 'rows;
            }
        }
    }
    let columns = source.width().ok_or(MatrixError::EmptyInput)?;
    sink.write_row([acc.to_string()])?;
    sink.into_inner()?;

    metrics.set_counter("values_read", values);
    Ok(finish_report(operation, metrics, source.rows_read(), columns, 1, 1))
}

/// Base-10 integer with optional sign, ignoring surrounding whitespace.
fn parse_integer(field: &str) -> Option<BigInt> {
    let trimmed = field.trim();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let magnitude: BigInt = digits.parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

fn next_row<R: Read, W: Write>(
    source: &mut RowSource<R>,
    sink: &RowSink<W>,
    ctx: &CancellationContext,
) -> Result<Option<Row>> {
    ctx.check(Stage::Stream, sink.rows_committed())?;
    source.next_row()
}

fn check_shape<R: Read, W: Write>(
    source: &RowSource<R>,
    sink: &RowSink<W>,
    config: &StreamConfig,
) -> Result<usize> {
    let columns = source.width().ok_or(MatrixError::EmptyInput)?;
    let rows = source.rows_read();
    if config.require_square && rows != columns as u64 {
        return Err(MatrixError::NotSquare {
            rows,
            columns,
            rows_emitted: sink.rows_committed(),
        });
    }
    Ok(columns)
}

fn finish_report(
    operation: &str,
    metrics: MetricsCollector,
    rows: u64,
    columns: usize,
    rows_emitted: u64,
    fields_emitted: u64,
) -> StreamReport {
    metrics.set_counter("rows_read", rows);
    metrics.set_counter("columns", columns as u64);
    metrics.set_counter("rows_emitted", rows_emitted);
    metrics.set_counter("fields_emitted", fields_emitted);
    metrics.record_end();
    info!(operation, rows, columns, rows_emitted, "matrix streamed");
    StreamReport {
        rows,
        columns,
        rows_emitted,
        fields_emitted,
        metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(input: &str, config: &StreamConfig) -> Result<String> {
        let mut out = Vec::new();
        echo_matrix(input.as_bytes(), &mut out, config, &CancellationContext::unbounded())?;
        Ok(String::from_utf8(out).unwrap())
    }

    fn flatten(input: &str, config: &StreamConfig) -> Result<String> {
        let mut out = Vec::new();
        flatten_matrix(input.as_bytes(), &mut out, config, &CancellationContext::unbounded())?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn echo_square() -> Result<()> {
        let out = echo("1,2\n3,4\n", &StreamConfig::default())?;
        assert_eq!(out, "1,2\n3,4\n");
        Ok(())
    }

    #[test]
    fn flatten_square() -> Result<()> {
        let out = flatten("1,2,3\n4,5,6\n7,8,9\n", &StreamConfig::default())?;
        assert_eq!(out, "1,2,3,4,5,6,7,8,9\n");
        Ok(())
    }

    #[test]
    fn non_square_rejected_at_end() {
        let err = echo("1,2\n", &StreamConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            MatrixError::NotSquare {
                rows: 1,
                columns: 2,
                rows_emitted: 0
            }
        ));
    }

    #[test]
    fn non_square_allowed_when_disabled() -> Result<()> {
        let config = StreamConfig {
            require_square: false,
            ..StreamConfig::default()
        };
        assert_eq!(flatten("1,2\n", &config)?, "1,2\n");
        Ok(())
    }

    #[test]
    fn integers_allow_sign_and_padding() {
        assert_eq!(parse_integer(" 42 "), Some(BigInt::from(42)));
        assert_eq!(parse_integer("-7"), Some(BigInt::from(-7)));
        assert_eq!(parse_integer("+7"), Some(BigInt::from(7)));
        assert_eq!(parse_integer(""), None);
        assert_eq!(parse_integer("-"), None);
        assert_eq!(parse_integer("1_000"), None);
        assert_eq!(parse_integer("1.5"), None);
        assert_eq!(parse_integer("0x10"), None);
    }

    #[test]
    fn sum_and_product_of_small_matrix() -> Result<()> {
        let config = StreamConfig::default();
        let ctx = CancellationContext::unbounded();
        let mut out = Vec::new();
        let report = sum_matrix(&b"1,2\n3,4\n"[..], &mut out, &config, &ctx)?;
        assert_eq!(out, b"10\n");
        assert_eq!(report.rows, 2);
        assert_eq!(report.metrics.counter("values_read"), Some(4));

        let mut out = Vec::new();
        product_matrix(&b"1,2\n3,4\n"[..], &mut out, &config, &ctx)?;
        assert_eq!(out, b"24\n");
        Ok(())
    }

    #[test]
    fn empty_input_rejected() {
        let err = echo("", &StreamConfig::default()).unwrap_err();
        assert!(matches!(err, MatrixError::EmptyInput));
    }
}
