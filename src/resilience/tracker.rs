//! Performance Tracker
//!
//! Bounded rolling statistics for one service.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Successful-call durations kept per service
pub const MAX_PERFORMANCE_HISTORY: usize = 100;

/// Counters and rolling window of one service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetadata {
    pub call_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Mean of `performance_history`, in milliseconds
    pub average_response_ms: f64,
    /// Durations of recent successful calls in milliseconds, oldest first
    pub performance_history: Vec<f64>,
    pub last_called: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    call_count: u64,
    success_count: u64,
    failure_count: u64,
    history: VecDeque<f64>,
    average_ms: f64,
    last_called: Option<DateTime<Utc>>,
}

/// Rolling call statistics
#[derive(Debug)]
pub struct PerformanceTracker {
    capacity: usize,
    inner: Mutex<TrackerInner>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::with_capacity(MAX_PERFORMANCE_HISTORY)
    }

    /// Tracker keeping at most `capacity` durations
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(TrackerInner {
                history: VecDeque::with_capacity(capacity.max(1)),
                ..Default::default()
            }),
        }
    }

    /// Record one completed call
    pub fn record(&self, duration: Duration, success: bool) {
        let mut inner = self.inner.lock();
        inner.call_count += 1;
        inner.last_called = Some(Utc::now());

        if !success {
            inner.failure_count += 1;
            return;
        }

        inner.success_count += 1;
        inner.history.push_back(duration.as_micros() as f64 / 1000.0);
        while inner.history.len() > self.capacity {
            inner.history.pop_front();
        }
        inner.average_ms = inner.history.iter().sum::<f64>() / inner.history.len() as f64;
    }

    pub fn call_count(&self) -> u64 {
        self.inner.lock().call_count
    }

    pub fn success_count(&self) -> u64 {
        self.inner.lock().success_count
    }

    pub fn failure_count(&self) -> u64 {
        self.inner.lock().failure_count
    }

    /// Mean response time over the bounded history, in milliseconds
    pub fn average_ms(&self) -> f64 {
        self.inner.lock().average_ms
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().history.len()
    }

    pub fn snapshot(&self) -> ServiceMetadata {
        let inner = self.inner.lock();
        ServiceMetadata {
            call_count: inner.call_count,
            success_count: inner.success_count,
            failure_count: inner.failure_count,
            average_response_ms: inner.average_ms,
            performance_history: inner.history.iter().copied().collect(),
            last_called: inner.last_called,
        }
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}
