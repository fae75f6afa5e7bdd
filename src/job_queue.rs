//! Cancelable serial job queue.
//!
//! [`CancelableJobQueue`] runs jobs strictly in FIFO order on one worker
//! thread at a time. The worker is spawned when a job is queued while no
//! worker is draining, and exits as soon as the queue is empty.
//!
//! Cancellation is structural: a queued job is removed before it starts, a
//! running job is never interrupted. Two forms exist:
//!
//! - [`enqueue_canceling_last`](CancelableJobQueue::enqueue_canceling_last)
//!   removes the job at the tail, if it is still queued, before appending.
//! - [`cancel_all`](CancelableJobQueue::cancel_all) removes every queued job.
//!
//! Both decisions are taken under the same lock the worker uses to pull jobs,
//! so a job is either canceled or started, never both.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{BlurError, Result};

// ============================================================================
// Job identity and state
// ============================================================================

/// Identifier of a job. Queued jobs are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    /// Id used for outcomes of synchronous calls.
    pub const SYNC: JobId = JobId(0);

    pub(crate) const fn from_raw(n: u64) -> Self {
        JobId(n)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle: `Queued -> Running -> {Completed, Failed}` or `Queued -> Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Canceled,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Canceled | JobState::Failed
        )
    }
}

struct JobCell {
    id: JobId,
    state: Mutex<JobState>,
    changed: Condvar,
}

impl JobCell {
    fn set(&self, state: JobState) {
        *self.state.lock() = state;
        self.changed.notify_all();
    }
}

/// Caller-side view of a queued job.
#[derive(Clone)]
pub struct JobHandle {
    cell: Arc<JobCell>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.cell.id
    }

    pub fn state(&self) -> JobState {
        *self.cell.state.lock()
    }

    /// Block until the job reaches a terminal state.
    pub fn wait(&self) -> JobState {
        let mut state = self.cell.state.lock();
        while !state.is_terminal() {
            self.cell.changed.wait(&mut state);
        }
        *state
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobState> {
        let deadline = Instant::now() + timeout;
        let mut state = self.cell.state.lock();
        while !state.is_terminal() {
            if self.cell.changed.wait_until(&mut state, deadline).timed_out() {
                return state.is_terminal().then_some(*state);
            }
        }
        Some(*state)
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// JobHandler
// ============================================================================

/// Work performed by the queue's worker.
///
/// `execute` runs on the worker thread. `complete` is called right after the
/// job has been marked `Completed` or `Failed`, still on the worker thread.
/// Canceled jobs reach neither.
pub trait JobHandler: Send + Sync + 'static {
    type Request: Send + 'static;
    type Output: Send + 'static;

    fn execute(&self, id: JobId, request: Self::Request) -> Result<Self::Output>;

    fn complete(&self, id: JobId, outcome: Result<Self::Output>);
}

// ============================================================================
// CancelableJobQueue
// ============================================================================

struct QueuedJob<R> {
    cell: Arc<JobCell>,
    request: R,
}

struct QueueState<R> {
    pending: VecDeque<QueuedJob<R>>,
    running: Option<JobId>,
    worker_active: bool,
    next_id: u64,
}

struct Shared<H: JobHandler> {
    state: Mutex<QueueState<H::Request>>,
    handler: H,
    worker_name: String,
}

pub struct CancelableJobQueue<H: JobHandler> {
    shared: Arc<Shared<H>>,
}

impl<H: JobHandler> CancelableJobQueue<H> {
    /// Create a queue whose worker threads are named `worker_name`.
    pub fn new(handler: H, worker_name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    running: None,
                    worker_active: false,
                    next_id: 1,
                }),
                handler,
                worker_name: worker_name.into(),
            }),
        }
    }

    pub fn handler(&self) -> &H {
        &self.shared.handler
    }

    /// Append a job. Never blocks on running work.
    pub fn enqueue(&self, request: H::Request) -> Result<JobHandle> {
        self.enqueue_canceling_last(request, false)
    }

    /// Append a job; if `cancel_last` is set and the current tail job has not
    /// started, cancel it first. With an empty queue, or a tail that is
    /// already running, the flag has no effect.
    pub fn enqueue_canceling_last(&self, request: H::Request, cancel_last: bool) -> Result<JobHandle> {
        let (handle, spawn) = {
            let mut state = self.shared.state.lock();
            if cancel_last {
                if let Some(last) = state.pending.pop_back() {
                    last.cell.set(JobState::Canceled);
                    debug!(job = %last.cell.id, "canceled last queued job");
                }
            }
            let id = JobId::from_raw(state.next_id);
            state.next_id += 1;
            let cell = Arc::new(JobCell {
                id,
                state: Mutex::new(JobState::Queued),
                changed: Condvar::new(),
            });
            state.pending.push_back(QueuedJob {
                cell: cell.clone(),
                request,
            });
            let spawn = !state.worker_active;
            state.worker_active = true;
            debug!(job = %id, pending = state.pending.len(), "queued job");
            (JobHandle { cell }, spawn)
        };

        if spawn {
            if let Err(e) = self.spawn_worker() {
                let mut state = self.shared.state.lock();
                state.worker_active = false;
                if let Some(pos) = state.pending.iter().position(|j| j.cell.id == handle.id()) {
                    if let Some(job) = state.pending.remove(pos) {
                        job.cell.set(JobState::Failed);
                    }
                }
                warn!(job = %handle.id(), error = %e, "could not start worker");
                return Err(BlurError::WorkerSpawn(e.to_string()));
            }
        }
        Ok(handle)
    }

    /// Cancel every job that has not started. Returns how many were removed.
    pub fn cancel_all(&self) -> usize {
        let canceled: Vec<QueuedJob<H::Request>> = {
            let mut state = self.shared.state.lock();
            let jobs: Vec<_> = state.pending.drain(..).collect();
            for job in &jobs {
                job.cell.set(JobState::Canceled);
            }
            jobs
        };
        if !canceled.is_empty() {
            debug!(count = canceled.len(), "canceled queued jobs");
        }
        canceled.len()
    }

    /// Jobs waiting to start.
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// The job currently executing, if any.
    pub fn running(&self) -> Option<JobId> {
        self.shared.state.lock().running
    }

    /// True when nothing is queued and no worker is draining.
    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.lock();
        state.pending.is_empty() && !state.worker_active
    }

    fn spawn_worker(&self) -> std::io::Result<()> {
        let shared = self.shared.clone();
        thread::Builder::new()
            .name(self.shared.worker_name.clone())
            .spawn(move || drain(shared))
            .map(|_| ())
    }
}

impl<H: JobHandler> Drop for CancelableJobQueue<H> {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Clears the worker flag if the handler panics, so the next enqueue can
/// start a fresh worker.
struct WorkerGuard<'a, H: JobHandler> {
    shared: &'a Shared<H>,
}

impl<H: JobHandler> Drop for WorkerGuard<'_, H> {
    fn drop(&mut self) {
        if thread::panicking() {
            let mut state = self.shared.state.lock();
            state.worker_active = false;
            state.running = None;
        }
    }
}

fn drain<H: JobHandler>(shared: Arc<Shared<H>>) {
    let _guard = WorkerGuard { shared: &shared };
    debug!(worker = %shared.worker_name, "worker started");
    loop {
        let job = {
            let mut state = shared.state.lock();
            match state.pending.pop_front() {
                Some(job) => {
                    job.cell.set(JobState::Running);
                    state.running = Some(job.cell.id);
                    job
                }
                None => {
                    state.worker_active = false;
                    state.running = None;
                    break;
                }
            }
        };

        let id = job.cell.id;
        let outcome = shared.handler.execute(id, job.request);
        let terminal = match &outcome {
            Ok(_) => JobState::Completed,
            Err(e) => {
                warn!(job = %id, error = %e, "job failed");
                JobState::Failed
            }
        };
        shared.state.lock().running = None;
        job.cell.set(terminal);
        shared.handler.complete(id, outcome);
    }
    debug!(worker = %shared.worker_name, "worker stopped");
}
