// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Capacity-1 job runner.
//
// The print executor is a singleton resource. Every submission, whether from
// the local listener or the transit relay, goes through one runner that
// dispatches jobs strictly in submission order and never starts job K+1
// before job K has signalled completion.
//
// A job is a closure that receives a `JobDone` handle. The handle is the
// only way to release the runner: calling `complete()` or simply dropping it
// advances the queue, so a job that bails out early can never wedge it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::observer::StatusObserver;

/// A queued unit of work. Invoked once, when it reaches the head of the queue.
pub type JobFn = Box<dyn FnOnce(JobDone) + Send + 'static>;

/// Queue contents plus the busy flag.
///
/// Invariant: `busy` is true iff a job has been dispatched and its
/// `JobDone` has not yet fired.
struct RunnerState {
    queue: VecDeque<JobFn>,
    busy: bool,
}

struct Shared {
    state: Mutex<RunnerState>,
    observer: Arc<dyn StatusObserver>,
}

/// Serialized job runner. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct JobRunner {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("JobRunner")
            .field("busy", &state.busy)
            .field("queued", &state.queue.len())
            .finish()
    }
}

impl JobRunner {
    pub fn new(observer: Arc<dyn StatusObserver>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RunnerState {
                    queue: VecDeque::new(),
                    busy: false,
                }),
                observer,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RunnerState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a job. Dispatches it immediately when the runner is idle.
    pub fn submit(&self, job: JobFn) {
        let queued = {
            let mut state = self.state();
            state.queue.push_back(job);
            state.queue.len()
        };
        debug!(queued, "job submitted to runner");

        if self.dispatch() {
            self.notify();
        }
    }

    /// Pop the head and run it, unless a job is already in flight.
    ///
    /// The closure is invoked outside the lock so it may complete
    /// synchronously. Returns whether a job was dispatched.
    fn dispatch(&self) -> bool {
        let job = {
            let mut state = self.state();
            if state.busy {
                return false;
            }
            match state.queue.pop_front() {
                Some(job) => {
                    state.busy = true;
                    job
                }
                None => return false,
            }
        };

        debug!("dispatching job");
        job(JobDone {
            runner: Some(self.clone()),
        });
        true
    }

    /// Release the busy slot, start the next job if any, and publish the
    /// resulting state.
    fn on_job_done(&self) {
        self.state().busy = false;
        debug!(remaining = self.pending(), "job done");
        self.dispatch();
        self.notify();
    }

    fn notify(&self) {
        self.shared.observer.notify_queue_state(self.is_busy());
    }

    /// Whether a job currently occupies the executor. Pure read.
    pub fn is_busy(&self) -> bool {
        self.state().busy
    }

    /// Number of jobs waiting behind the one in flight.
    pub fn pending(&self) -> usize {
        self.state().queue.len()
    }
}

/// Single-shot release handle for the job currently in flight.
///
/// Fires exactly once: on `complete()` or, failing that, on drop.
pub struct JobDone {
    runner: Option<JobRunner>,
}

impl JobDone {
    pub fn complete(mut self) {
        if let Some(runner) = self.runner.take() {
            runner.on_job_done();
        }
    }
}

impl Drop for JobDone {
    fn drop(&mut self) {
        if let Some(runner) = self.runner.take() {
            runner.on_job_done();
        }
    }
}

impl std::fmt::Debug for JobDone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDone")
            .field("fired", &self.runner.is_none())
            .finish()
    }
}
