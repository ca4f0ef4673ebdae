//! Deterministic test matrices.

use crate::block::Row;

/// Generate a `rows × columns` matrix of non-zero integers in `[-100, 100]`.
///
/// The same `seed` always yields the same matrix.
///
/// # Example
///
/// ```
/// use matrixbeam::testing::generate_matrix;
///
/// let m = generate_matrix(3, 5, 1);
/// assert_eq!(m.len(), 3);
/// assert!(m.iter().all(|row| row.len() == 5));
/// ```
#[must_use]
pub fn generate_matrix(rows: usize, columns: usize, seed: u64) -> Vec<Row> {
    // xorshift64*; the state must never be zero
    let mut state = seed ^ 0x9e37_79b9_7f4a_7c15;
    if state == 0 {
        state = 1;
    }
    let mut next = move || {
        state ^= state >> 12;
        state ^= state << 25;
        state ^= state >> 27;
        state.wrapping_mul(0x2545_f491_4f6c_dd1d)
    };

    (0..rows)
        .map(|_| {
            (0..columns)
                .map(|_| {
                    let v = (next() % 200) as i64 - 100;
                    let v = if v >= 0 { v + 1 } else { v };
                    v.to_string()
                })
                .collect()
        })
        .collect()
}

/// Sequentially numbered matrix: row `r`, column `c` holds `r * columns + c + 1`.
///
/// Handy when a failing assertion should point at the misplaced cell.
#[must_use]
pub fn numbered_matrix(rows: usize, columns: usize) -> Vec<Row> {
    (0..rows)
        .map(|r| (0..columns).map(|c| (r * columns + c + 1).to_string()).collect())
        .collect()
}

/// Serialize `matrix` as CSV bytes using `delimiter`.
///
/// Fields are quoted only when they contain the delimiter, a quote or a line break.
#[must_use]
pub fn matrix_to_csv(matrix: &[Row], delimiter: u8) -> Vec<u8> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_writer(Vec::new());
    for row in matrix {
        // writing into a Vec cannot fail
        let _ = writer.write_record(row);
    }
    writer.into_inner().unwrap_or_default()
}
