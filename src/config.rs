//! Configuration for the transpose engine and the streaming operations.
//!
//! Both structs are plain data with sensible defaults. They can be built in
//! code, deserialized with serde, or layered from environment variables with
//! `from_env`.

use crate::error::{MatrixError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Rows handled per in-memory block.
pub const DEFAULT_BLOCK_SIZE: usize = 6;
/// Number of column shards.
pub const DEFAULT_SHARD_COUNT: usize = 3;
/// Write buffer per shard.
pub const DEFAULT_SHARD_BUFFER: usize = 4 * 1024 * 1024;
/// Output rows between forced flushes.
pub const DEFAULT_FLUSH_ROWS: usize = 1000;
/// Overall processing deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// How column ranges are assigned to shards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionStrategy {
    /// Widths differ by at most one; the first `total % n` shards take the extra column.
    #[default]
    Balanced,
    /// Every shard gets `ceil(total / n)` columns; the overshoot is padded with placeholders.
    Legacy,
}

impl std::str::FromStr for PartitionStrategy {
    type Err = MatrixError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "balanced" => Ok(Self::Balanced),
            "legacy" => Ok(Self::Legacy),
            other => Err(MatrixError::InvalidConfig(format!(
                "unknown partition strategy '{other}'"
            ))),
        }
    }
}

/// Settings for the out-of-core transpose.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransposeConfig {
    /// Rows per in-memory block.
    pub block_size: usize,
    /// Number of shards the transposed rows are spread over.
    pub shard_count: usize,
    /// Field separator for input, shards and output.
    pub delimiter: u8,
    /// Column-range assignment.
    pub partition: PartitionStrategy,
    /// Buffer capacity of each shard writer, in bytes.
    pub shard_buffer_capacity: usize,
    /// Output rows between forced flushes of the result stream.
    pub output_flush_rows: usize,
    /// Deadline for the whole operation; `None` disables it.
    pub timeout: Option<Duration>,
    /// Parent directory for shard files; the system temp dir when `None`.
    pub spill_dir: Option<PathBuf>,
}

impl Default for TransposeConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            shard_count: DEFAULT_SHARD_COUNT,
            delimiter: b',',
            partition: PartitionStrategy::Balanced,
            shard_buffer_capacity: DEFAULT_SHARD_BUFFER,
            output_flush_rows: DEFAULT_FLUSH_ROWS,
            timeout: Some(DEFAULT_TIMEOUT),
            spill_dir: None,
        }
    }
}

impl TransposeConfig {
    /// Defaults overlaid with `{prefix}BLOCK_SIZE`, `{prefix}SHARD_COUNT`,
    /// `{prefix}DELIMITER`, `{prefix}PARTITION`, `{prefix}TIMEOUT_SECS`
    /// and `{prefix}SPILL_DIR`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when a variable is present but malformed.
    pub fn from_env(prefix: &str) -> Result<Self> {
        Self::from_map(&config_from_env(prefix))
    }

    pub(crate) fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = vars.get("block_size") {
            cfg.block_size = parse_usize("block_size", v)?;
        }
        if let Some(v) = vars.get("shard_count") {
            cfg.shard_count = parse_usize("shard_count", v)?;
        }
        if let Some(v) = vars.get("delimiter") {
            cfg.delimiter = parse_delimiter(v)?;
        }
        if let Some(v) = vars.get("partition") {
            cfg.partition = v.parse()?;
        }
        if let Some(v) = vars.get("timeout_secs") {
            cfg.timeout = parse_timeout(v)?;
        }
        if let Some(v) = vars.get("spill_dir") {
            cfg.spill_dir = Some(PathBuf::from(v));
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero block size or shard count, or an unusable delimiter.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(MatrixError::InvalidConfig("block_size must be at least 1".into()));
        }
        if self.shard_count == 0 {
            return Err(MatrixError::InvalidConfig("shard_count must be at least 1".into()));
        }
        check_delimiter(self.delimiter)
    }
}

/// Settings for the single-pass echo and flatten operations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub delimiter: u8,
    pub output_flush_rows: usize,
    /// Fields buffered by flatten before they are pushed to the sink.
    pub flatten_chunk_fields: usize,
    /// Reject inputs whose row count differs from their column count.
    pub require_square: bool,
    pub timeout: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            output_flush_rows: DEFAULT_FLUSH_ROWS,
            flatten_chunk_fields: 100_000,
            require_square: true,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

impl StreamConfig {
    /// Defaults overlaid with `{prefix}DELIMITER`, `{prefix}TIMEOUT_SECS`
    /// and `{prefix}REQUIRE_SQUARE`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when a variable is present but malformed.
    pub fn from_env(prefix: &str) -> Result<Self> {
        let vars = config_from_env(prefix);
        let mut cfg = Self::default();
        if let Some(v) = vars.get("delimiter") {
            cfg.delimiter = parse_delimiter(v)?;
        }
        if let Some(v) = vars.get("timeout_secs") {
            cfg.timeout = parse_timeout(v)?;
        }
        if let Some(v) = vars.get("require_square") {
            cfg.require_square = v.parse().map_err(|_| {
                MatrixError::InvalidConfig(format!("require_square: '{v}' is not a boolean"))
            })?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    ///
    /// Returns `InvalidConfig` for an unusable delimiter.
    pub fn validate(&self) -> Result<()> {
        check_delimiter(self.delimiter)
    }
}

/// Collect `{prefix}*` environment variables, keyed by the lowercased suffix.
#[must_use]
pub fn config_from_env(prefix: &str) -> HashMap<String, String> {
    std::env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(prefix)
                .map(|name| (name.to_lowercase(), value))
        })
        .collect()
}

fn parse_usize(name: &str, v: &str) -> Result<usize> {
    v.trim()
        .parse()
        .map_err(|_| MatrixError::InvalidConfig(format!("{name}: '{v}' is not a number")))
}

fn parse_timeout(v: &str) -> Result<Option<Duration>> {
    let secs: u64 = v
        .trim()
        .parse()
        .map_err(|_| MatrixError::InvalidConfig(format!("timeout_secs: '{v}' is not a number")))?;
    // 0 disables the deadline
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

/// Accepts a single ASCII character, or `\t` / `tab`.
///
/// # Errors
///
/// Returns `InvalidConfig` for anything else.
pub fn parse_delimiter(v: &str) -> Result<u8> {
    let byte = match v {
        "\\t" | "tab" => b'\t',
        s if s.len() == 1 && s.is_ascii() => s.as_bytes()[0],
        _ => {
            return Err(MatrixError::InvalidConfig(format!(
                "delimiter must be a single ASCII character, got '{v}'"
            )));
        }
    };
    check_delimiter(byte)?;
    Ok(byte)
}

fn check_delimiter(d: u8) -> Result<()> {
    if !d.is_ascii() || matches!(d, b'"' | b'\n' | b'\r') {
        return Err(MatrixError::InvalidConfig(format!(
            "delimiter {:?} cannot be used",
            char::from(d)
        )));
    }
    Ok(())
}
