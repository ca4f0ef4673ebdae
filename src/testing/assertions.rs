//! Assertion helpers for matrix outputs.

use crate::block::Row;
use crate::error::{MatrixError, Result};
use crate::io::RowSource;

/// Parse CSV bytes into rows without enforcing a width.
///
/// # Errors
///
/// Returns `Parse` if the bytes are not valid CSV.
pub fn parse_csv(bytes: &[u8], delimiter: u8) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(bytes);
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| MatrixError::from_csv(idx as u64 + 1, e))?;
        rows.push(record.iter().map(str::to_owned).collect());
    }
    Ok(rows)
}

/// Parse a rectangular CSV matrix, failing on ragged rows.
///
/// # Errors
///
/// Returns `Parse` or `InconsistentShape`.
pub fn parse_matrix(bytes: &[u8], delimiter: u8) -> Result<Vec<Row>> {
    RowSource::new(bytes, delimiter).collect()
}

/// Naive transpose of a rectangular matrix held entirely in memory.
///
/// # Example
///
/// ```
/// use matrixbeam::testing::transpose_in_memory;
///
/// let m = vec![vec!["1".to_string(), "2".to_string()]];
/// assert_eq!(transpose_in_memory(&m), vec![vec!["1".to_string()], vec!["2".to_string()]]);
/// ```
#[must_use]
pub fn transpose_in_memory(matrix: &[Row]) -> Vec<Row> {
    let columns = matrix.first().map_or(0, Vec::len);
    (0..columns)
        .map(|c| matrix.iter().map(|row| row[c].clone()).collect())
        .collect()
}

/// Assert two matrices are equal, pointing at the first differing cell.
///
/// # Panics
///
/// Panics if the matrices differ in shape or content.
pub fn assert_matrix_eq(actual: &[Row], expected: &[Row]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "Row count mismatch:\n  Expected rows: {}\n  Actual rows: {}",
        expected.len(),
        actual.len()
    );
    for (r, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert_eq!(
            a.len(),
            e.len(),
            "Width mismatch in row {r}:\n  Expected: {e:?}\n  Actual: {a:?}"
        );
        for (c, (av, ev)) in a.iter().zip(e).enumerate() {
            assert_eq!(av, ev, "Cell mismatch at ({r}, {c})");
        }
    }
}

/// Assert that `output` is the transpose of `input`, both given as CSV bytes.
///
/// # Panics
///
/// Panics if either side fails to parse or the output is not the transpose.
pub fn assert_is_transpose(input: &[u8], output: &[u8], delimiter: u8) {
    let input = match parse_matrix(input, delimiter) {
        Ok(rows) => rows,
        Err(e) => panic!("input does not parse: {e}"),
    };
    let output = match parse_csv(output, delimiter) {
        Ok(rows) => rows,
        Err(e) => panic!("output does not parse: {e}"),
    };
    assert_matrix_eq(&output, &transpose_in_memory(&input));
}
