//! Job queue between the control plane and image workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Job type of an image build.
pub const OSBUILD_JOB: &str = "osbuild";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("job {0} does not exist")]
    UnknownJob(Uuid),
    #[error("token {0} does not belong to a running job")]
    UnknownToken(Uuid),
    #[error("job {0} is not pending or running")]
    NotRunning(Uuid),
    #[error("worker queue is shut down")]
    Closed,
    #[error("enqueue rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: String,
    pub reason: String,
}

/// What a worker reports when it finishes a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub error: Option<JobFailure>,
}

impl JobResult {
    pub fn success(log: impl Into<String>) -> Self {
        Self {
            log: log.into(),
            error: None,
        }
    }

    pub fn failure(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            log: String::new(),
            error: Some(JobFailure {
                kind: kind.into(),
                reason: reason.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub queued: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub canceled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_type: String,
    pub status: JobStatus,
    pub result: Option<JobResult>,
}

/// A job handed to a worker. `token` identifies this assignment when
/// finishing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAssignment {
    pub job_id: Uuid,
    pub token: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
}

/// Payload of an [`OSBUILD_JOB`]. The worker writes the image to
/// `output_dir/filename`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildPayload {
    pub compose_id: Uuid,
    pub image_type: String,
    pub filename: String,
    pub output_dir: std::path::PathBuf,
    #[serde(default)]
    pub manifest: serde_json::Value,
}

pub trait WorkerQueue: Send + Sync {
    fn enqueue(&self, job_type: &str, payload: serde_json::Value) -> Result<Uuid, WorkerError>;

    /// Wait up to `timeout` for a pending job of one of `job_types`.
    fn request_job(
        &self,
        job_types: &[&str],
        timeout: Duration,
    ) -> Result<Option<JobAssignment>, WorkerError>;

    fn finish_job(&self, token: Uuid, result: JobResult) -> Result<(), WorkerError>;

    fn job_info(&self, job_id: Uuid) -> Result<JobInfo, WorkerError>;

    fn cancel(&self, job_id: Uuid) -> Result<(), WorkerError>;

    /// Drop every trace of `job_id`. Later lookups report it unknown.
    fn forget(&self, job_id: Uuid) -> Result<(), WorkerError>;
}

#[derive(Debug)]
struct Job {
    job_type: String,
    payload: serde_json::Value,
    status: JobStatus,
    result: Option<JobResult>,
    token: Option<Uuid>,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<Uuid, Job>,
    pending: VecDeque<Uuid>,
    tokens: HashMap<Uuid, Uuid>,
    closed: bool,
}

/// In-process [`WorkerQueue`]. Pending jobs are served in FIFO order.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake every long poll and refuse further work.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }
}

impl WorkerQueue for InMemoryJobQueue {
    fn enqueue(&self, job_type: &str, payload: serde_json::Value) -> Result<Uuid, WorkerError> {
        let mut st = self.lock();
        if st.closed {
            return Err(WorkerError::Closed);
        }
        let id = Uuid::new_v4();
        st.jobs.insert(
            id,
            Job {
                job_type: job_type.to_owned(),
                payload,
                status: JobStatus {
                    queued: Utc::now(),
                    started: None,
                    finished: None,
                    canceled: false,
                },
                result: None,
                token: None,
            },
        );
        st.pending.push_back(id);
        drop(st);
        self.available.notify_all();
        debug!(job = %id, job_type, "enqueued job");
        Ok(id)
    }

    fn request_job(
        &self,
        job_types: &[&str],
        timeout: Duration,
    ) -> Result<Option<JobAssignment>, WorkerError> {
        let deadline = Instant::now() + timeout;
        let mut st = self.lock();
        loop {
            if st.closed {
                return Err(WorkerError::Closed);
            }
            let pos = st.pending.iter().position(|id| {
                st.jobs
                    .get(id)
                    .is_some_and(|j| job_types.contains(&j.job_type.as_str()))
            });
            if let Some(pos) = pos {
                let Some(job_id) = st.pending.remove(pos) else {
                    continue;
                };
                let token = Uuid::new_v4();
                st.tokens.insert(token, job_id);
                let Some(job) = st.jobs.get_mut(&job_id) else {
                    continue;
                };
                job.status.started = Some(Utc::now());
                job.token = Some(token);
                info!(job = %job_id, "job started");
                return Ok(Some(JobAssignment {
                    job_id,
                    token,
                    job_type: job.job_type.clone(),
                    payload: job.payload.clone(),
                }));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            st = self
                .available
                .wait_timeout(st, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn finish_job(&self, token: Uuid, result: JobResult) -> Result<(), WorkerError> {
        let mut st = self.lock();
        let job_id = st
            .tokens
            .remove(&token)
            .ok_or(WorkerError::UnknownToken(token))?;
        let job = st
            .jobs
            .get_mut(&job_id)
            .ok_or(WorkerError::UnknownJob(job_id))?;
        job.token = None;
        if job.status.canceled {
            return Ok(());
        }
        job.status.finished = Some(Utc::now());
        info!(job = %job_id, failed = result.error.is_some(), "job finished");
        job.result = Some(result);
        Ok(())
    }

    fn job_info(&self, job_id: Uuid) -> Result<JobInfo, WorkerError> {
        let st = self.lock();
        let job = st.jobs.get(&job_id).ok_or(WorkerError::UnknownJob(job_id))?;
        Ok(JobInfo {
            job_type: job.job_type.clone(),
            status: job.status.clone(),
            result: job.result.clone(),
        })
    }

    fn cancel(&self, job_id: Uuid) -> Result<(), WorkerError> {
        let mut st = self.lock();
        let job = st.jobs.get_mut(&job_id).ok_or(WorkerError::UnknownJob(job_id))?;
        if job.status.finished.is_some() || job.status.canceled {
            return Err(WorkerError::NotRunning(job_id));
        }
        job.status.canceled = true;
        job.status.finished = Some(Utc::now());
        let token = job.token.take();
        if let Some(token) = token {
            st.tokens.remove(&token);
        }
        st.pending.retain(|id| *id != job_id);
        info!(job = %job_id, "job canceled");
        Ok(())
    }

    fn forget(&self, job_id: Uuid) -> Result<(), WorkerError> {
        let mut st = self.lock();
        let job = st.jobs.remove(&job_id).ok_or(WorkerError::UnknownJob(job_id))?;
        if let Some(token) = job.token {
            st.tokens.remove(&token);
        }
        st.pending.retain(|id| *id != job_id);
        debug!(job = %job_id, "job forgotten");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn enqueue_request_finish() {
        let q = InMemoryJobQueue::new();
        let id = q.enqueue(OSBUILD_JOB, serde_json::json!({"n": 1})).unwrap();
        assert!(q.job_info(id).unwrap().status.started.is_none());
        let job = q
            .request_job(&[OSBUILD_JOB], Duration::from_millis(10))
            .unwrap()
            .unwrap();
        assert_eq!(job.job_id, id);
        assert_eq!(job.payload["n"], 1);
        assert!(q.job_info(id).unwrap().status.started.is_some());
        q.finish_job(job.token, JobResult::success("ok")).unwrap();
        let info = q.job_info(id).unwrap();
        assert!(info.status.finished.is_some());
        assert_eq!(info.result.unwrap().log, "ok");
        assert!(matches!(
            q.finish_job(job.token, JobResult::default()),
            Err(WorkerError::UnknownToken(_))
        ));
    }

    #[test]
    fn request_times_out_when_empty() {
        let q = InMemoryJobQueue::new();
        let got = q.request_job(&[OSBUILD_JOB], Duration::from_millis(20)).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn request_ignores_other_job_types() {
        let q = InMemoryJobQueue::new();
        q.enqueue("koji-init", serde_json::Value::Null).unwrap();
        let got = q.request_job(&[OSBUILD_JOB], Duration::from_millis(10)).unwrap();
        assert!(got.is_none());
        assert_eq!(q.pending_len(), 1);
    }

    #[test]
    fn long_poll_wakes_on_enqueue() {
        let q = Arc::new(InMemoryJobQueue::new());
        let poller = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || q.request_job(&[OSBUILD_JOB], Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(50));
        let id = q.enqueue(OSBUILD_JOB, serde_json::Value::Null).unwrap();
        let job = poller.join().unwrap().unwrap().unwrap();
        assert_eq!(job.job_id, id);
    }

    #[test]
    fn close_interrupts_long_poll() {
        let q = Arc::new(InMemoryJobQueue::new());
        let poller = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || q.request_job(&[OSBUILD_JOB], Duration::from_secs(30)))
        };
        std::thread::sleep(Duration::from_millis(50));
        q.close();
        assert_eq!(poller.join().unwrap(), Err(WorkerError::Closed));
    }

    #[test]
    fn cancel_pending_and_running() {
        let q = InMemoryJobQueue::new();
        let pending = q.enqueue(OSBUILD_JOB, serde_json::Value::Null).unwrap();
        q.cancel(pending).unwrap();
        assert!(q.job_info(pending).unwrap().status.canceled);
        assert_eq!(q.pending_len(), 0);
        assert!(matches!(q.cancel(pending), Err(WorkerError::NotRunning(_))));

        let running = q.enqueue(OSBUILD_JOB, serde_json::Value::Null).unwrap();
        let job = q
            .request_job(&[OSBUILD_JOB], Duration::from_millis(10))
            .unwrap()
            .unwrap();
        q.cancel(running).unwrap();
        assert!(q.finish_job(job.token, JobResult::success("late")).is_err());
        assert!(q.job_info(running).unwrap().result.is_none());
    }

    #[test]
    fn forget_releases_job_and_token() {
        let q = InMemoryJobQueue::new();
        let done = q.enqueue(OSBUILD_JOB, serde_json::Value::Null).unwrap();
        let job = q
            .request_job(&[OSBUILD_JOB], Duration::from_millis(10))
            .unwrap()
            .unwrap();
        q.finish_job(job.token, JobResult::success("ok")).unwrap();
        let running = q.enqueue(OSBUILD_JOB, serde_json::Value::Null).unwrap();
        let held = q
            .request_job(&[OSBUILD_JOB], Duration::from_millis(10))
            .unwrap()
            .unwrap();
        let pending = q.enqueue(OSBUILD_JOB, serde_json::Value::Null).unwrap();

        for id in [done, running, pending] {
            q.forget(id).unwrap();
            assert_eq!(q.job_info(id), Err(WorkerError::UnknownJob(id)));
            assert_eq!(q.forget(id), Err(WorkerError::UnknownJob(id)));
        }
        assert_eq!(q.pending_len(), 0);
        let st = q.lock();
        assert!(st.jobs.is_empty());
        assert!(st.tokens.is_empty());
        drop(st);
        assert_eq!(
            q.finish_job(held.token, JobResult::default()),
            Err(WorkerError::UnknownToken(held.token))
        );
    }
}
