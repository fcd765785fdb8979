//! In-process image worker.
//!
//! Real image builds happen outside the control plane. [`LocalWorker`]
//! stands in for them: it takes build jobs off a [`WorkerQueue`], writes a
//! placeholder image where the payload says, and reports a build log.

use crate::worker::{BuildPayload, JobAssignment, JobResult, WorkerError, WorkerQueue, OSBUILD_JOB};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct LocalWorker {
    queue: Arc<dyn WorkerQueue>,
    build_time: Duration,
}

impl LocalWorker {
    pub fn new(queue: Arc<dyn WorkerQueue>) -> Self {
        Self {
            queue,
            build_time: Duration::ZERO,
        }
    }

    /// Simulated build duration, so RUNNING is observable.
    #[must_use]
    pub fn with_build_time(mut self, build_time: Duration) -> Self {
        self.build_time = build_time;
        self
    }

    /// Process at most one job. Returns whether a job was taken.
    pub fn run_once(&self, timeout: Duration) -> Result<bool, WorkerError> {
        let Some(job) = self.queue.request_job(&[OSBUILD_JOB], timeout)? else {
            return Ok(false);
        };
        let result = self.build(&job);
        match self.queue.finish_job(job.token, result) {
            Ok(()) => {}
            // Canceled while building.
            Err(WorkerError::UnknownToken(_)) => {
                debug!(job = %job.job_id, "job was canceled before it finished");
            }
            Err(e) => return Err(e),
        }
        Ok(true)
    }

    fn build(&self, job: &JobAssignment) -> JobResult {
        let payload: BuildPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(p) => p,
            Err(e) => return JobResult::failure("ManifestError", e.to_string()),
        };
        let mut log = String::new();
        let _ = writeln!(
            log,
            "Building {} image for compose {}",
            payload.image_type, payload.compose_id
        );
        if !self.build_time.is_zero() {
            std::thread::sleep(self.build_time);
        }
        if let Err(e) = std::fs::create_dir_all(&payload.output_dir) {
            return JobResult::failure("TargetError", e.to_string());
        }
        let path = payload.output_dir.join(&payload.filename);
        let content = format!(
            "placeholder {} image for compose {}\n",
            payload.image_type, payload.compose_id
        );
        if let Err(e) = std::fs::write(&path, content) {
            return JobResult::failure("TargetError", e.to_string());
        }
        let _ = writeln!(log, "Wrote {}", path.display());
        let _ = writeln!(log, "Build finished");
        info!(compose = %payload.compose_id, "local build finished");
        JobResult::success(log)
    }

    /// Run on a background thread until the queue closes or the handle stops it.
    pub fn spawn(self) -> std::io::Result<WorkerHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("weldr-local-worker".to_owned())
            .spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    match self.run_once(POLL_INTERVAL) {
                        Ok(_) => {}
                        Err(WorkerError::Closed) => break,
                        Err(e) => warn!("local worker: {e}"),
                    }
                }
                debug!("local worker stopped");
            })?;
        Ok(WorkerHandle {
            stop,
            thread: Some(thread),
        })
    }
}

pub struct WorkerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
