//! Fixed-size worker pool. Update handling and scheduler fan-out run here
//! so the ingress loop never blocks on the database or the network.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::{Error, Result};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

struct State {
    jobs: VecDeque<Job>,
    alive: bool,
    jobs_max: usize,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

/// N worker threads sharing one locked FIFO and one condvar. Submission is
/// non-blocking; ordering is FIFO per producer. Shutdown drains the queue:
/// workers exit only once the queue is observed empty with the flag down.
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(threads: usize, jobs_min: usize, jobs_max: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::Invalid("worker pool needs at least one thread".into()));
        }

        if jobs_max == 0 || jobs_max < jobs_min {
            return Err(Error::Invalid(format!("invalid job queue bounds: {jobs_min}/{jobs_max}")));
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                jobs: VecDeque::with_capacity(jobs_min),
                alive: true,
                jobs_max,
            }),
            cond: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads {
            let shared = shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("worker-{index}"))
                .spawn(move || worker_loop(index, &shared))?;

            handles.push(handle);
        }

        tracing::info!(threads, jobs_max, "worker pool running");
        Ok(Self { shared, handles: Mutex::new(handles) })
    }

    /// Enqueues a job without blocking. Fails when the queue is at its
    /// maximum depth or the pool has been shut down; the caller keeps
    /// responsibility for anything the job owns.
    pub fn submit(&self, job: Job) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.alive {
            return Err(Error::PoolClosed);
        }

        if state.jobs.len() >= state.jobs_max {
            return Err(Error::QueueFull);
        }

        state.jobs.push_back(job);
        drop(state);
        self.shared.cond.notify_one();
        Ok(())
    }

    /// Lowers the alive flag, wakes every worker and joins them. Pending
    /// jobs are executed before the workers exit.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            state.alive = false;
        }
        self.shared.cond.notify_all();

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for handle in handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
    }
}

fn worker_loop(index: usize, shared: &Shared) {
    tracing::debug!(index, "worker running");

    let mut state = shared.state.lock().unwrap_or_else(|e| e.into_inner());
    loop {
        match state.jobs.pop_front() {
            Some(job) => {
                drop(state);
                job();
                state = shared.state.lock().unwrap_or_else(|e| e.into_inner());
            }
            None if state.alive => {
                state = shared.cond.wait(state).unwrap_or_else(|e| e.into_inner());
            }
            None => break,
        }
    }

    tracing::debug!(index, "worker stopped");
}
