//! Testing utilities for matrix operations.
//!
//! This module provides what the crate's own tests use, exposed so that
//! applications embedding the engine can test their integration too:
//!
//! - **Fixtures**: deterministic matrices and their CSV text
//! - **Assertions**: parse CSV output and compare it against an in-memory transpose
//! - **Mock I/O**: inputs that refuse to seek, sinks and shard storage that fail on demand
//!
//! # Quick Start
//!
//! ```
//! use matrixbeam::testing::*;
//! use matrixbeam::{TransposeConfig, transpose};
//! use std::io::Cursor;
//!
//! # fn main() -> anyhow::Result<()> {
//! let matrix = generate_matrix(7, 4, 42);
//! let mut out = Vec::new();
//! transpose(Cursor::new(matrix_to_csv(&matrix, b',')), &mut out, &TransposeConfig::default())?;
//!
//! assert_matrix_eq(&parse_csv(&out, b',')?, &transpose_in_memory(&matrix));
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;
pub mod mock_io;

pub use assertions::*;
pub use fixtures::*;
pub use mock_io::*;
