//! Cooperative cancellation shared by every stage of an operation.
//!
//! A [`CancellationContext`] is created once per operation and cloned into
//! each stage. Stages call [`CancellationContext::check`] at their iteration
//! boundaries; nothing is interrupted between check-points.

use crate::error::{MatrixError, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// The pipeline stage that observed expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ReadBlock,
    WriteShard,
    Reassemble,
    Stream,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadBlock => "block read",
            Self::WriteShard => "shard write",
            Self::Reassemble => "reassembly",
            Self::Stream => "streaming",
        };
        f.write_str(name)
    }
}

/// Deadline plus a manual cancel flag, cheap to clone.
#[derive(Clone, Debug)]
pub struct CancellationContext {
    started: Instant,
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl CancellationContext {
    /// A context that only ends through [`cancel`](Self::cancel).
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started.checked_add(timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Build from an optional timeout, as carried by the config structs.
    #[must_use]
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map_or_else(Self::unbounded, Self::with_timeout)
    }

    /// Request cancellation; every clone observes it at its next check-point.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the deadline, `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Check-point: fails with [`MatrixError::DeadlineExceeded`] once the
    /// deadline has passed or the context was cancelled.
    ///
    /// # Errors
    ///
    /// Returns `DeadlineExceeded` carrying `stage` and `rows_emitted`.
    pub fn check(&self, stage: Stage, rows_emitted: u64) -> Result<()> {
        let cancelled = self.is_cancelled();
        if cancelled || self.is_expired() {
            return Err(MatrixError::DeadlineExceeded {
                stage,
                elapsed: self.elapsed(),
                rows_emitted,
                cancelled,
            });
        }
        Ok(())
    }
}

impl Default for CancellationContext {
    fn default() -> Self {
        Self::unbounded()
    }
}
