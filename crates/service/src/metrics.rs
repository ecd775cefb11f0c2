//! Metrics module for clipsqueeze
//!
//! Provides the in-memory metrics snapshot served at `/metrics`: aggregate job
//! counters plus the stage of every job currently in flight.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Per-job metrics for a job that is still running
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMetrics {
    pub id: String,
    pub stage: String,
    pub target_size_mb: f64,
    pub size_in_bytes_before: u64,
    /// Zero until probing finishes
    pub duration_seconds: f64,
    /// Zero until the plan is computed
    pub target_bitrate_bps: u64,
}

/// How a job left the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { size_in_bytes_after: u64 },
    Failed,
    Cancelled,
}

/// Complete metrics snapshot including live jobs and aggregate stats
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub timestamp_unix_ms: i64,
    pub jobs: Vec<JobMetrics>,
    pub running_jobs: usize,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub cancelled_jobs: u64,
    pub total_bytes_in: u64,
    pub total_bytes_out: u64,
}

impl MetricsSnapshot {
    /// Register a newly accepted job
    pub fn job_started(&mut self, job: JobMetrics) {
        self.total_bytes_in += job.size_in_bytes_before;
        if let Some(existing) = self.jobs.iter_mut().find(|j| j.id == job.id) {
            *existing = job;
        } else {
            self.jobs.push(job);
        }
        self.running_jobs = self.jobs.len();
    }

    /// Apply `update` to a live job, if it is still tracked
    pub fn update_job<F>(&mut self, id: &str, update: F)
    where
        F: FnOnce(&mut JobMetrics),
    {
        if let Some(job) = self.jobs.iter_mut().find(|j| j.id == id) {
            update(job);
        }
    }

    /// Drop a job from the live list and fold it into the counters
    pub fn job_finished(&mut self, id: &str, outcome: JobOutcome) {
        self.jobs.retain(|j| j.id != id);
        self.running_jobs = self.jobs.len();
        match outcome {
            JobOutcome::Completed {
                size_in_bytes_after,
            } => {
                self.completed_jobs += 1;
                self.total_bytes_out += size_in_bytes_after;
            }
            JobOutcome::Failed => self.failed_jobs += 1,
            JobOutcome::Cancelled => self.cancelled_jobs += 1,
        }
    }
}

/// Shared metrics state for concurrent access across service components
///
/// A std lock, since stage updates happen inside synchronous pass callbacks.
/// Critical sections never await.
pub type SharedMetrics = Arc<RwLock<MetricsSnapshot>>;

/// Creates a new SharedMetrics instance with default values
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(RwLock::new(MetricsSnapshot::default()))
}

/// Write access; a panic in another holder does not invalidate plain counters
pub fn write_metrics(metrics: &SharedMetrics) -> RwLockWriteGuard<'_, MetricsSnapshot> {
    metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn read_metrics(metrics: &SharedMetrics) -> RwLockReadGuard<'_, MetricsSnapshot> {
    metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clone the current snapshot stamped with the current time
pub fn snapshot_now(metrics: &SharedMetrics) -> MetricsSnapshot {
    let mut snapshot = read_metrics(metrics).clone();
    snapshot.timestamp_unix_ms = timestamp_ms();
    snapshot
}

/// Get current timestamp in milliseconds
fn timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
