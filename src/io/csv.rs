//! CSV row streaming.
//!
//! This module provides:
//! - **Row source**: [`RowSource`], a lazy, forward-only reader yielding one
//!   [`Row`] at a time with optional width enforcement
//! - **Row sink**: [`RowSink`], a CSV writer with explicit flush and row counters
//! - **Width probe**: [`probe_width`], which reads the first record and rewinds
//!   the input to where it started
//!
//! # Design notes
//! - Records carry no header row; every line is data.
//! - The reader is built `flexible` so ragged rows surface as
//!   [`MatrixError::InconsistentShape`] with a row number rather than a csv error.
//! - Blank lines are skipped by the csv parser.
//! - The csv parser accepts any quoting. Input is scanned on the way in, and an
//!   unterminated quoted field, a `"` inside an unquoted field or text after a
//!   closing quote is reported as [`MatrixError::Parse`].

use crate::block::Row;
use crate::error::{MatrixError, Result};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::io::{self, Read, Seek, SeekFrom, Write};
use thiserror::Error;

/// Buffer capacity used by the csv reader.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;
/// Buffer capacity used by the csv writer.
pub const WRITE_BUFFER_SIZE: usize = 128 * 1024;

fn reader_builder(delimiter: u8) -> ReaderBuilder {
    let mut b = ReaderBuilder::new();
    b.has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .buffer_capacity(READ_BUFFER_SIZE);
    b
}

/// Quoting mistake found while scanning input, carried inside an `io::Error`.
#[derive(Error, Debug)]
#[error("{reason} on line {line}")]
pub(crate) struct MalformedQuote {
    line: u64,
    reason: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    FieldStart,
    Unquoted,
    Quoted,
    /// A `"` seen inside a quoted field: either an escape or the closing quote.
    QuoteInQuoted,
}

/// Pass-through reader that rejects malformed quoting.
///
/// Bytes before a mistake are handed on first, so the csv reader is inside the
/// offending record when the error surfaces.
struct QuoteGuard<R> {
    inner: R,
    delimiter: u8,
    state: QuoteState,
    line: u64,
    pending: Option<MalformedQuote>,
}

impl<R: Read> QuoteGuard<R> {
    const fn new(inner: R, delimiter: u8) -> Self {
        Self {
            inner,
            delimiter,
            state: QuoteState::FieldStart,
            line: 1,
            pending: None,
        }
    }

    fn scan(&mut self, byte: u8) -> std::result::Result<(), &'static str> {
        let boundary = byte == self.delimiter || byte == b'\n' || byte == b'\r';
        self.state = match (self.state, byte) {
            (QuoteState::Quoted, b'"') => QuoteState::QuoteInQuoted,
            (QuoteState::Quoted, _) => QuoteState::Quoted,
            (QuoteState::QuoteInQuoted, b'"') => QuoteState::Quoted,
            (QuoteState::FieldStart, b'"') => QuoteState::Quoted,
            (QuoteState::Unquoted, b'"') => return Err("quote inside an unquoted field"),
            (_, _) if boundary => QuoteState::FieldStart,
            (QuoteState::QuoteInQuoted, _) => return Err("text after a closing quote"),
            (QuoteState::FieldStart | QuoteState::Unquoted, _) => QuoteState::Unquoted,
        };
        if byte == b'\n' {
            self.line += 1;
        }
        Ok(())
    }

    fn fail(&self, reason: &'static str) -> io::Error {
        let line = self.line;
        io::Error::new(io::ErrorKind::InvalidData, MalformedQuote { line, reason })
    }
}

impl<R: Read> Read for QuoteGuard<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(err) = self.pending.take() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, err));
        }
        let n = self.inner.read(buf)?;
        if n == 0 {
            if self.state == QuoteState::Quoted {
                return Err(self.fail("unterminated quoted field"));
            }
            return Ok(0);
        }
        for (i, &byte) in buf[..n].iter().enumerate() {
            if let Err(reason) = self.scan(byte) {
                if i == 0 {
                    return Err(self.fail(reason));
                }
                self.pending = Some(MalformedQuote {
                    line: self.line,
                    reason,
                });
                return Ok(i);
            }
        }
        Ok(n)
    }
}

/// Lazy sequence of rows read from a byte stream.
pub struct RowSource<R: Read> {
    reader: csv::Reader<QuoteGuard<R>>,
    record: StringRecord,
    rows_read: u64,
    width: Option<usize>,
}

impl<R: Read> RowSource<R> {
    /// Wrap `input`; the width is fixed by the first row read.
    pub fn new(input: R, delimiter: u8) -> Self {
        Self {
            reader: reader_builder(delimiter).from_reader(QuoteGuard::new(input, delimiter)),
            record: StringRecord::new(),
            rows_read: 0,
            width: None,
        }
    }

    /// Enforce `width` from the very first row.
    #[must_use]
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = Some(width);
        self
    }

    /// Column count established so far.
    #[must_use]
    pub const fn width(&self) -> Option<usize> {
        self.width
    }

    #[must_use]
    pub const fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Read the next row, or `None` at end of input.
    ///
    /// # Errors
    ///
    /// `Parse`/`Input` for malformed records or read failures, and
    /// `InconsistentShape` when the row width differs from the established one.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        let row_no = self.rows_read + 1;
        let more = self
            .reader
            .read_record(&mut self.record)
            .map_err(|e| MatrixError::from_csv(row_no, e))?;
        if !more {
            return Ok(None);
        }
        self.rows_read = row_no;

        let found = self.record.len();
        match self.width {
            Some(expected) if expected != found => {
                return Err(MatrixError::InconsistentShape {
                    row: row_no,
                    expected,
                    found,
                });
            }
            Some(_) => {}
            None => self.width = Some(found),
        }
        Ok(Some(self.record.iter().map(str::to_owned).collect()))
    }
}

impl<R: Read> Iterator for RowSource<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

/// Read the first record of `input` to learn the column count, then seek back
/// to the position the input had on entry.
///
/// Returns `Ok(None)` for an input without records.
///
/// # Errors
///
/// `UnseekableInput` when the position cannot be queried or restored;
/// `Parse`/`Input` when the first record is malformed.
pub fn probe_width<R: Read + Seek>(input: &mut R, delimiter: u8) -> Result<Option<usize>> {
    let origin = input
        .stream_position()
        .map_err(MatrixError::UnseekableInput)?;

    let width = {
        let mut probe =
            reader_builder(delimiter).from_reader(QuoteGuard::new(&mut *input, delimiter));
        let mut record = StringRecord::new();
        let more = probe
            .read_record(&mut record)
            .map_err(|e| MatrixError::from_csv(1, e))?;
        more.then(|| record.len())
    };

    input
        .seek(SeekFrom::Start(origin))
        .map_err(MatrixError::UnseekableInput)?;
    Ok(width)
}

/// CSV serializer for rows with explicit flushing.
///
/// Rows are buffered; [`flush`](RowSink::flush) forces buffered bytes to the
/// underlying writer so partial progress becomes visible downstream.
/// When `flush_every` is non-zero the sink also flushes on its own every
/// `flush_every` rows.
pub struct RowSink<W: Write> {
    writer: csv::Writer<W>,
    rows_written: u64,
    rows_flushed: u64,
    flush_every: usize,
    open_row: bool,
    flushed_partial: bool,
}

impl<W: Write> RowSink<W> {
    pub fn new(output: W, delimiter: u8) -> Self {
        let writer = WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .buffer_capacity(WRITE_BUFFER_SIZE)
            .from_writer(output);
        Self {
            writer,
            rows_written: 0,
            rows_flushed: 0,
            flush_every: 0,
            open_row: false,
            flushed_partial: false,
        }
    }

    /// Flush automatically every `rows` rows (0 disables).
    #[must_use]
    pub fn with_flush_every(mut self, rows: usize) -> Self {
        self.flush_every = rows;
        self
    }

    /// Serialize one row.
    ///
    /// # Errors
    ///
    /// Returns `Output` when serialization or the underlying write fails.
    pub fn write_row<I, T>(&mut self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer
            .write_record(fields)
            .map_err(|e| self.output_error(e.into()))?;
        self.rows_written += 1;
        if self.flush_every > 0 && self.rows_written % self.flush_every as u64 == 0 {
            self.flush()?;
        }
        Ok(())
    }

    /// Append one field to the current row without terminating it.
    ///
    /// # Errors
    ///
    /// Returns `Output` when the underlying write fails.
    pub fn write_field(&mut self, field: impl AsRef<[u8]>) -> Result<()> {
        self.writer
            .write_field(field)
            .map_err(|e| self.output_error(e.into()))?;
        self.open_row = true;
        Ok(())
    }

    /// Terminate the row started with [`write_field`](RowSink::write_field).
    ///
    /// # Errors
    ///
    /// Returns `Output` when the underlying write fails.
    pub fn end_row(&mut self) -> Result<()> {
        if !self.open_row {
            return Ok(());
        }
        self.open_row = false;
        self.write_row(None::<&[u8]>)
    }

    /// Push buffered bytes to the underlying writer and flush it.
    ///
    /// # Errors
    ///
    /// Returns `Output` when the underlying writer fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| self.output_error(e))?;
        self.rows_flushed = self.rows_written;
        self.flushed_partial = self.open_row;
        Ok(())
    }

    /// Rows accepted by the sink.
    #[must_use]
    pub const fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Rows known to have reached the underlying writer.
    #[must_use]
    pub const fn rows_flushed(&self) -> u64 {
        self.rows_flushed
    }

    /// Rows with at least some bytes flushed, counting a row that was
    /// flushed while still open.
    #[must_use]
    pub const fn rows_committed(&self) -> u64 {
        self.rows_flushed + self.flushed_partial as u64
    }

    /// `true` once any bytes were flushed to the underlying writer.
    #[must_use]
    pub const fn committed(&self) -> bool {
        self.rows_committed() > 0
    }

    /// Flush and return the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns `Output` when the final flush fails.
    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        let rows_emitted = self.rows_written;
        self.writer.into_inner().map_err(|e| MatrixError::Output {
            rows_emitted,
            source: e.into_error(),
        })
    }

    fn output_error(&self, source: io::Error) -> MatrixError {
        MatrixError::Output {
            rows_emitted: self.rows_committed(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_rows_and_fixes_width() -> Result<()> {
        let mut src = RowSource::new("1,2\n3,4\n".as_bytes(), b',');
        assert_eq!(src.next_row()?, Some(vec!["1".to_string(), "2".to_string()]));
        assert_eq!(src.width(), Some(2));
        assert_eq!(src.next_row()?, Some(vec!["3".to_string(), "4".to_string()]));
        assert_eq!(src.next_row()?, None);
        assert_eq!(src.rows_read(), 2);
        Ok(())
    }

    #[test]
    fn ragged_row_is_reported_with_its_number() {
        let mut src = RowSource::new("1,2\n3,4,5\n".as_bytes(), b',');
        let err = src.find_map(Result::err).unwrap();
        assert!(matches!(
            err,
            MatrixError::InconsistentShape {
                row: 2,
                expected: 2,
                found: 3
            }
        ));
    }

    #[test]
    fn custom_delimiter_and_quotes() -> Result<()> {
        let mut src = RowSource::new("a;\"b;c\"\n".as_bytes(), b';');
        assert_eq!(src.next_row()?, Some(vec!["a".to_string(), "b;c".to_string()]));
        Ok(())
    }

    #[test]
    fn invalid_utf8_is_a_parse_error() {
        let bytes: &[u8] = b"1,\xff\n";
        let mut src = RowSource::new(bytes, b',');
        assert!(matches!(src.next_row(), Err(MatrixError::Parse { row: 1, .. })));
    }

    #[test]
    fn quoting_mistakes_are_parse_errors() {
        for (input, row) in [
            ("1,2\n3,\"4\n", 2),
            ("a\"b,c\n", 1),
            ("1,2\n\"3\"x,4\n", 2),
        ] {
            let mut src = RowSource::new(input.as_bytes(), b',');
            let err = src.find_map(Result::err).unwrap();
            assert!(
                matches!(err, MatrixError::Parse { row: r, .. } if r == row),
                "{input:?}: {err}"
            );
        }
    }

    #[test]
    fn well_formed_quoting_is_accepted() -> Result<()> {
        let mut src = RowSource::new("\"a\"\"b\",\"c,d\"\n\"\",\"x\ny\"\r\n".as_bytes(), b',');
        assert_eq!(src.next_row()?, Some(vec!["a\"b".to_string(), "c,d".to_string()]));
        assert_eq!(src.next_row()?, Some(vec![String::new(), "x\ny".to_string()]));
        assert_eq!(src.next_row()?, None);
        Ok(())
    }

    #[test]
    fn probe_rewinds_to_origin() -> Result<()> {
        let mut cur = Cursor::new(b"skip\n1,2,3\n4,5,6\n".to_vec());
        cur.set_position(5);
        assert_eq!(probe_width(&mut cur, b',')?, Some(3));
        assert_eq!(cur.position(), 5);
        assert_eq!(probe_width(&mut Cursor::new(Vec::new()), b',')?, None);
        Ok(())
    }

    #[test]
    fn sink_counts_and_flushes() -> Result<()> {
        let mut sink = RowSink::new(Vec::new(), b',').with_flush_every(2);
        sink.write_row(["1", "3"])?;
        assert_eq!(sink.rows_flushed(), 0);
        sink.write_row(["2", "4"])?;
        assert_eq!(sink.rows_flushed(), 2);
        let out = sink.into_inner()?;
        assert_eq!(String::from_utf8(out).unwrap(), "1,3\n2,4\n");
        Ok(())
    }

    #[test]
    fn field_streaming_builds_one_row() -> Result<()> {
        let mut sink = RowSink::new(Vec::new(), b',');
        for f in ["1", "2", "a,b"] {
            sink.write_field(f)?;
        }
        assert!(!sink.committed());
        sink.flush()?;
        assert!(sink.committed());
        assert_eq!(sink.rows_committed(), 1);
        sink.end_row()?;
        assert_eq!(sink.rows_committed(), 1);
        sink.end_row()?;
        assert_eq!(sink.rows_written(), 1);
        let out = sink.into_inner()?;
        assert_eq!(String::from_utf8(out).unwrap(), "1,2,\"a,b\"\n");
        Ok(())
    }
}
