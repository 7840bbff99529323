//! Throttled progress reporting
//!
//! Hashing or extracting thousands of files would flood a progress callback,
//! so [`ProgressTracker`] only forwards an update when the percentage moved by
//! at least the report interval, when two seconds passed since the last
//! update, or when the task completes.

use serde::Serialize;
use std::time::{Duration, Instant};

use crate::utils::cancellation::TaskHandle;

/// Default report interval in percent.
const DEFAULT_REPORT_INTERVAL: u8 = 5;

/// Maximum silence between two updates.
const MAX_REPORT_GAP: Duration = Duration::from_secs(2);

/// What a progress counter counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressUnit {
    Bytes,
    Entries,
}

/// One progress update delivered to a [`TaskHandle`] callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    /// Human readable task name, e.g. `"Hashing /path"`.
    pub task: String,
    pub processed: u64,
    /// Unknown for streams of unknown length.
    pub total: Option<u64>,
    pub unit: ProgressUnit,
}

impl ProgressUpdate {
    /// Completion in percent, if the total is known.
    pub fn percentage(&self) -> Option<u8> {
        match self.total {
            Some(0) => Some(100),
            Some(total) => Some(((self.processed.min(total) * 100) / total) as u8),
            None => None,
        }
    }
}

/// Tracks one sub-task and forwards throttled updates to its handle.
#[derive(Debug)]
pub struct ProgressTracker<'a> {
    handle: &'a TaskHandle,
    task: String,
    total: Option<u64>,
    unit: ProgressUnit,
    processed: u64,
    last_reported_percentage: u8,
    report_interval: u8,
    last_report_time: Instant,
}

impl<'a> ProgressTracker<'a> {
    pub(crate) fn new(
        handle: &'a TaskHandle,
        task: String,
        total: Option<u64>,
        unit: ProgressUnit,
    ) -> Self {
        Self {
            handle,
            task,
            total,
            unit,
            processed: 0,
            last_reported_percentage: 0,
            report_interval: DEFAULT_REPORT_INTERVAL,
            last_report_time: Instant::now(),
        }
    }

    /// Record `amount` more units of work.
    pub fn advance(&mut self, amount: u64) {
        self.processed = self.processed.saturating_add(amount);
        if self.should_report() {
            self.emit();
        }
    }

    /// Report the final state unconditionally.
    pub fn finish(mut self) {
        if let Some(total) = self.total {
            self.processed = self.processed.max(total);
        }
        self.emit();
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    fn percentage(&self) -> u8 {
        self.snapshot().percentage().unwrap_or(0)
    }

    fn should_report(&self) -> bool {
        let pct_changed = self.total.is_some()
            && self.percentage()
                >= self
                    .last_reported_percentage
                    .saturating_add(self.report_interval);
        let time_elapsed = self.last_report_time.elapsed() >= MAX_REPORT_GAP;
        let is_last = self.total.is_some_and(|total| self.processed >= total);

        pct_changed || time_elapsed || is_last
    }

    fn snapshot(&self) -> ProgressUpdate {
        ProgressUpdate {
            task: self.task.clone(),
            processed: self.processed,
            total: self.total,
            unit: self.unit,
        }
    }

    fn emit(&mut self) {
        self.handle.report(&self.snapshot());
        self.last_reported_percentage = self.percentage();
        self.last_report_time = Instant::now();
    }
}
