//! Bounded in-memory error history for operator diagnostics

use crate::error::ClassifiedError;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// A formatted snapshot of one error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub code: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub message: String,
    pub user_message: String,
    pub retryable: bool,
    /// Milliseconds since the Unix epoch
    pub recorded_at: u64,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.kind)?;
        if let Some(stage) = &self.stage {
            write!(f, " ({})", stage)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Ring buffer of the most recent errors; the oldest entry is evicted first.
///
/// Owned by whoever drives pipeline runs and passed in by reference, so
/// concurrent flows can keep separate histories.
#[derive(Debug, Clone)]
pub struct ErrorHistory {
    entries: VecDeque<ErrorRecord>,
    capacity: usize,
}

impl Default for ErrorHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorHistory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record an error; `stage` overrides the stage carried by the error
    pub fn record(&mut self, err: &ClassifiedError, stage: Option<&str>) -> &ErrorRecord {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        let recorded_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.entries.push_back(ErrorRecord {
            code: err.code().to_string(),
            kind: err.kind().label().to_string(),
            stage: stage.or(err.stage()).map(str::to_string),
            message: err.message().to_string(),
            user_message: err.user_message().to_string(),
            retryable: err.is_retryable(),
            recorded_at,
        });
        &self.entries[self.entries.len() - 1]
    }

    /// Entries from oldest to newest
    pub fn entries(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&ErrorRecord> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
