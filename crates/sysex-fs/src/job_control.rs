//! Progress and cancellation shared between a long operation and its caller.
//!
//! The operation runs on a worker thread and reports milestones through
//! [`JobControl::advance`]; the caller polls [`JobControl::progress`] and may
//! call [`JobControl::cancel`] at any time. Cancellation is cooperative: it is
//! observed at the next poll or milestone.

use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::errors::BackendError;
use crate::ignore_poison::IgnorePoison;

/// Shared `active` flag. Starts active; once cancelled it stays cancelled.
#[derive(Debug, Clone)]
pub struct CancelToken {
    active: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// `Err(Cancelled)` once the token has been cancelled.
    pub fn check(&self) -> Result<(), BackendError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(BackendError::Cancelled)
        }
    }

    /// Sleeps for `duration`, waking every `poll` to check for cancellation.
    pub fn sleep(&self, duration: Duration, poll: Duration) -> Result<(), BackendError> {
        let start = Instant::now();
        loop {
            self.check()?;
            let elapsed = start.elapsed();
            if elapsed >= duration {
                return Ok(());
            }
            std::thread::sleep(poll.min(duration - elapsed));
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of a job's progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub parts: u32,
    pub part: u32,
    /// Overall progress in [0, 1].
    pub progress: f64,
}

type ProgressCallback = Box<dyn Fn(f64) + Send + Sync>;

struct JobInner {
    id: String,
    active: CancelToken,
    progress: Mutex<JobProgress>,
    callback: Option<ProgressCallback>,
    data: Mutex<Option<Box<dyn Any + Send>>>,
}

/// Handle to one long-running operation. Clones share the same state.
#[derive(Clone)]
pub struct JobControl {
    inner: Arc<JobInner>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a job that also reports every progress change to `callback`.
    pub fn with_callback(callback: impl Fn(f64) + Send + Sync + 'static) -> Self {
        Self::build(Some(Box::new(callback)))
    }

    fn build(callback: Option<ProgressCallback>) -> Self {
        Self {
            inner: Arc::new(JobInner {
                id: uuid::Uuid::new_v4().to_string(),
                active: CancelToken::new(),
                progress: Mutex::new(JobProgress::default()),
                callback,
                data: Mutex::new(None),
            }),
        }
    }

    /// Unique operation id, used in logs.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Starts (or restarts) progress accounting over `parts` parts.
    pub fn begin(&self, parts: u32) {
        {
            let mut progress = self.inner.progress.lock_ignore_poison();
            *progress = JobProgress {
                parts: parts.max(1),
                part: 0,
                progress: 0.0,
            };
        }
        self.notify(0.0);
    }

    /// Moves to the next part, keeping the overall progress monotonic.
    pub fn next_part(&self) {
        let mut progress = self.inner.progress.lock_ignore_poison();
        if progress.part + 1 < progress.parts {
            progress.part += 1;
        }
    }

    /// Sets the progress of the current part and recomputes the overall value
    /// as `(part + fraction) / parts`.
    pub fn advance(&self, fraction: f64) {
        let overall = {
            let mut progress = self.inner.progress.lock_ignore_poison();
            let parts = progress.parts.max(1) as f64;
            let fraction = fraction.clamp(0.0, 1.0);
            progress.progress = ((progress.part as f64 + fraction) / parts).clamp(0.0, 1.0);
            progress.progress
        };
        self.notify(overall);
    }

    pub fn progress(&self) -> JobProgress {
        *self.inner.progress.lock_ignore_poison()
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.is_active()
    }

    pub fn cancel(&self) {
        log::debug!("Cancelling job {}", self.inner.id);
        self.inner.active.cancel();
    }

    /// `Err(Cancelled)` once the job has been cancelled.
    pub fn check_active(&self) -> Result<(), BackendError> {
        self.inner.active.check()
    }

    /// The token to hand to sysex transfers run on behalf of this job.
    pub fn cancel_token(&self) -> CancelToken {
        self.inner.active.clone()
    }

    /// Stores operation-specific side metadata for the caller.
    pub fn set_data<T: Any + Send>(&self, data: T) {
        *self.inner.data.lock_ignore_poison() = Some(Box::new(data));
    }

    /// Takes the side metadata back if it has type `T`.
    pub fn take_data<T: Any + Send>(&self) -> Option<T> {
        let mut slot = self.inner.data.lock_ignore_poison();
        match slot.take()?.downcast::<T>() {
            Ok(data) => Some(*data),
            Err(other) => {
                *slot = Some(other);
                None
            }
        }
    }

    fn notify(&self, progress: f64) {
        if let Some(callback) = &self.inner.callback {
            callback(progress);
        }
    }
}

impl Default for JobControl {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JobControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobControl")
            .field("id", &self.inner.id)
            .field("active", &self.is_active())
            .field("progress", &self.progress())
            .finish()
    }
}
