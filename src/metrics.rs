//! Metrics collection and reporting for matrix operations.
//!
//! Every operation fills a [`MetricsCollector`] with counters (rows read,
//! blocks written, placeholders, ...) and per-stage timings. The collector is
//! cheap to clone and thread-safe, so a caller can keep a handle while the
//! operation runs and inspect or persist it afterwards.
//!
//! # Example
//!
//! ```no_run
//! use matrixbeam::metrics::MetricsCollector;
//! use std::time::Duration;
//!
//! # fn main() -> anyhow::Result<()> {
//! let metrics = MetricsCollector::new();
//! metrics.record_start();
//! metrics.increment_counter("rows_read", 6);
//! metrics.record_stage("reassemble", Duration::from_millis(12));
//! metrics.record_end();
//!
//! metrics.save_to_file("metrics.json")?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Thread-safe container for the counters and timings of one operation.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsCollectorInner>>,
}

#[derive(Default)]
struct MetricsCollectorInner {
    counters: BTreeMap<String, u64>,
    stages: BTreeMap<String, Duration>,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves plain numbers behind; keep using them.
    fn lock(&self) -> MutexGuard<'_, MetricsCollectorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the start time of the operation.
    pub fn record_start(&self) {
        self.lock().start_time = Some(Instant::now());
    }

    /// Record the end time of the operation.
    pub fn record_end(&self) {
        self.lock().end_time = Some(Instant::now());
    }

    /// Elapsed time between [`record_start`](Self::record_start) and
    /// [`record_end`](Self::record_end), if both were called.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        let inner = self.lock();
        match (inner.start_time, inner.end_time) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    /// Add `value` to the counter `name`, creating it at zero first.
    pub fn increment_counter(&self, name: &str, value: u64) {
        *self.lock().counters.entry(name.to_string()).or_default() += value;
    }

    /// Set the counter `name` to `value`.
    pub fn set_counter(&self, name: &str, value: u64) {
        self.lock().counters.insert(name.to_string(), value);
    }

    #[must_use]
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.lock().counters.get(name).copied()
    }

    /// Accumulate time spent in stage `name`.
    pub fn record_stage(&self, name: &str, elapsed: Duration) {
        *self.lock().stages.entry(name.to_string()).or_default() += elapsed;
    }

    #[must_use]
    pub fn stage(&self, name: &str) -> Option<Duration> {
        self.lock().stages.get(name).copied()
    }

    /// All metrics as a JSON object.
    ///
    /// Counters appear under their own name, stage timings as
    /// `{stage}_ms`, and the total as `execution_time_ms`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let inner = self.lock();
        let mut out = serde_json::Map::new();
        for (name, count) in &inner.counters {
            out.insert(name.clone(), json!(count));
        }
        for (name, elapsed) in &inner.stages {
            out.insert(format!("{name}_ms"), json!(elapsed.as_millis()));
        }
        if let (Some(start), Some(end)) = (inner.start_time, inner.end_time) {
            out.insert(
                "execution_time_ms".to_string(),
                json!(end.duration_since(start).as_millis()),
            );
        }
        Value::Object(out)
    }

    /// Write [`to_json`](Self::to_json), pretty-printed, to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written to.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let formatted = serde_json::to_string_pretty(&self.to_json())?;
        let mut file =
            File::create(path).with_context(|| format!("create {}", path.display()))?;
        file.write_all(formatted.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    /// Counter names and values at this point in time.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.lock().counters.clone()
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("metrics", &self.to_json())
            .finish()
    }
}
