//! Error reporting for metadata loading.
//!
//! A reporter sees every failed attempt to load a metadata document and
//! decides whether the same fetch is tried again.

use crate::error::Error;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    GiveUp,
}

/// Receives metadata loading failures.
pub trait ErrorReporter: Send + Sync {
    /// Called after attempt number `attempt` (starting at 1) failed with `error`.
    fn report(&self, error: &Error, attempt: u32) -> RetryDecision;
}

/// Logs each failure once and never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, error: &Error, attempt: u32) -> RetryDecision {
        tracing::error!(%error, attempt, "failed to load terrain metadata");
        RetryDecision::GiveUp
    }
}

/// Retries until `max_attempts` attempts have failed.
///
/// Metadata errors are not retried: the same document would be rejected again.
#[derive(Debug, Clone, Copy)]
pub struct RetryReporter {
    pub max_attempts: u32,
}

impl RetryReporter {
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }
}

impl ErrorReporter for RetryReporter {
    fn report(&self, error: &Error, attempt: u32) -> RetryDecision {
        if attempt < self.max_attempts && !matches!(error, Error::Metadata { .. }) {
            tracing::warn!(%error, attempt, max = self.max_attempts, "retrying terrain metadata");
            RetryDecision::Retry
        } else {
            tracing::error!(%error, attempt, "failed to load terrain metadata");
            RetryDecision::GiveUp
        }
    }
}
