// crates/jobs/src/registry.rs
//! In-memory registry that owns every `JobRecord` and guards its transitions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{counter, histogram};
use tokio::sync::broadcast;

use super::types::{
    JobError, JobEvent, JobEventKind, JobFilter, JobId, JobRecord, JobStatus, Metadata,
};

/// Capacity of the event channel. Slow subscribers lag and drop events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Process-local store of job records.
///
/// Records live in a sharded `DashMap`, so a mutation only holds the shard
/// guard of its own id for the length of an in-memory update. Nothing here
/// awaits while a guard is held, so unrelated jobs never block each other.
///
/// Every operation except `create` treats an unknown id as a benign miss:
/// a job that never existed and one that was already evicted look the same.
pub struct JobRegistry {
    jobs: DashMap<JobId, JobRecord>,
    events_tx: broadcast::Sender<JobEvent>,
}

impl JobRegistry {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            jobs: DashMap::new(),
            events_tx,
        }
    }

    /// Register a new `Pending` job and return its id.
    pub fn create(&self, job_type: impl Into<String>, metadata: Metadata) -> JobId {
        let id = JobId::new();
        let record = JobRecord::new(id, job_type.into(), metadata);

        counter!("jobs_created_total", "job_type" => record.job_type.clone()).increment(1);
        tracing::debug!(job_id = %id, job_type = %record.job_type, "job created");

        let entry = self.jobs.entry(id).or_insert(record);
        self.emit(JobEventKind::Created, entry.value().clone());
        id
    }

    /// Snapshot of a job, or `None` if it is unknown or was evicted.
    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        self.jobs.get(&id).map(|r| r.value().clone())
    }

    /// Record progress for a pending or running job.
    ///
    /// `progress` is clamped to 100. Returns `false` without touching the
    /// record when the job is unknown or already terminal.
    pub fn update_progress(&self, id: JobId, progress: u8, message: impl Into<String>) -> bool {
        let message = message.into();
        self.mutate(id, JobEventKind::Progress, |record| {
            if record.is_terminal() {
                tracing::debug!(job_id = %id, status = %record.status, "ignoring progress for finished job");
                return false;
            }
            record.progress = progress.min(100);
            record.progress_message = Some(message);
            true
        })
    }

    /// Move a `Pending` job to `Running`.
    pub fn start(&self, id: JobId) -> bool {
        self.mutate(id, JobEventKind::Started, |record| {
            if record.status != JobStatus::Pending {
                tracing::warn!(job_id = %id, status = %record.status, "ignoring start for job not pending");
                return false;
            }
            record.status = JobStatus::Running;
            record.started_at = Some(Utc::now().max(record.created_at));
            true
        })
    }

    /// Finish a job successfully with `result`.
    pub fn complete(&self, id: JobId, result: serde_json::Value) -> bool {
        self.mutate(id, JobEventKind::Completed, |record| {
            if record.is_terminal() {
                tracing::warn!(job_id = %id, status = %record.status, "ignoring completion for finished job");
                return false;
            }
            record.status = JobStatus::Completed;
            record.result = Some(result);
            record.completed_at = Some(finish_time(record));
            record.progress = 100;
            record.progress_message = Some("Completed".to_string());
            counter!("jobs_completed_total", "job_type" => record.job_type.clone()).increment(1);
            record_duration(record);
            true
        })
    }

    /// Finish a job with a failure.
    pub fn fail(&self, id: JobId, error: JobError) -> bool {
        self.mutate(id, JobEventKind::Failed, |record| {
            if record.is_terminal() {
                tracing::warn!(job_id = %id, status = %record.status, "ignoring failure for finished job");
                return false;
            }
            record.status = JobStatus::Failed;
            record.error = Some(error);
            record.completed_at = Some(finish_time(record));
            counter!("jobs_failed_total", "job_type" => record.job_type.clone()).increment(1);
            record_duration(record);
            true
        })
    }

    /// Evict terminal jobs created more than `max_age` ago.
    ///
    /// Pending and running jobs are never evicted, whatever their age.
    /// Returns the number of records removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        match cutoff {
            Some(cutoff) => self.evict_finished_before(cutoff),
            None => 0,
        }
    }

    /// Evict terminal jobs whose `created_at` is strictly before `cutoff`.
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut evicted = Vec::new();
        self.jobs.retain(|_, record| {
            let expired = record.is_terminal() && record.created_at < cutoff;
            if expired {
                evicted.push(record.clone());
            }
            !expired
        });

        let count = evicted.len();
        for record in evicted {
            counter!("jobs_evicted_total", "job_type" => record.job_type.clone()).increment(1);
            self.emit(JobEventKind::Evicted, record);
        }
        if count > 0 {
            tracing::info!(evicted = count, cutoff = %cutoff, "evicted finished jobs");
        }
        count
    }

    /// Snapshots matching `filter`, newest first.
    pub fn list(&self, filter: &JobFilter) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self
            .jobs
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Snapshots of every pending or running job.
    pub fn active_jobs(&self) -> Vec<JobRecord> {
        let mut jobs = self.list(&JobFilter::default());
        jobs.retain(|job| !job.is_terminal());
        jobs
    }

    /// Subscribe to every applied mutation (for SSE streaming).
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Apply `f` under the record's shard guard and broadcast the result if
    /// `f` reports that it changed the record.
    fn mutate<F>(&self, id: JobId, kind: JobEventKind, f: F) -> bool
    where
        F: FnOnce(&mut JobRecord) -> bool,
    {
        let Some(mut entry) = self.jobs.get_mut(&id) else {
            tracing::debug!(job_id = %id, event = ?kind, "unknown job, ignoring");
            return false;
        };
        if !f(entry.value_mut()) {
            return false;
        }

        // Broadcast while the guard is held so subscribers see events for one
        // job in the order its mutations were applied.
        tracing::trace!(job_id = %id, event = ?kind, status = %entry.status, "job updated");
        self.emit(kind, entry.value().clone());
        true
    }

    fn emit(&self, kind: JobEventKind, job: JobRecord) {
        // No subscribers is fine.
        let _ = self.events_tx.send(JobEvent { kind, job });
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, id: JobId, by: chrono::Duration) {
        if let Some(mut entry) = self.jobs.get_mut(&id) {
            let record = entry.value_mut();
            record.created_at -= by;
            if let Some(started) = record.started_at.as_mut() {
                *started -= by;
            }
            if let Some(completed) = record.completed_at.as_mut() {
                *completed -= by;
            }
        }
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Wall clocks can step backwards; keep `started_at <= completed_at` anyway.
fn finish_time(record: &JobRecord) -> DateTime<Utc> {
    Utc::now().max(record.started_at.unwrap_or(record.created_at))
}

fn record_duration(record: &JobRecord) {
    if let (Some(started), Some(completed)) = (record.started_at, record.completed_at) {
        let secs = (completed - started).num_milliseconds() as f64 / 1000.0;
        histogram!("job_duration_seconds", "job_type" => record.job_type.clone()).record(secs);
    }
}
