use crossbeam_channel::{bounded, unbounded, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatch pool needs at least one worker")]
    NoWorkers,
    #[error("failed to spawn dispatch worker: {0}")]
    Spawn(String),
    #[error("dispatch task {task} panicked: {message}")]
    Panicked { task: usize, message: String },
    #[error("dispatch pool is shut down")]
    ShutDown,
}

/// Fixed set of worker threads, one per bus interface.
///
/// [`DispatchPool::run_parallel`] is a barrier: it returns once every task
/// has finished, with one result per task in submission order.
pub struct DispatchPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl DispatchPool {
    pub fn new(size: usize) -> Result<Self, DispatchError> {
        if size == 0 {
            return Err(DispatchError::NoWorkers);
        }
        let (tx, rx) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("dispatch-{i}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                })
                .map_err(|e| DispatchError::Spawn(e.to_string()))?;
            workers.push(handle);
        }
        debug!(size, "dispatch pool started");
        Ok(Self {
            jobs: Some(tx),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Run every task on the pool and wait for all of them.
    ///
    /// A panicking task yields [`DispatchError::Panicked`] in its slot; the
    /// other tasks still run to completion.
    pub fn run_parallel<T, F>(&self, tasks: Vec<F>) -> Vec<Result<T, DispatchError>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let count = tasks.len();
        let Some(jobs) = &self.jobs else {
            return (0..count).map(|_| Err(DispatchError::ShutDown)).collect();
        };
        let (done_tx, done_rx) = bounded(count);
        for (task_idx, task) in tasks.into_iter().enumerate() {
            let done = done_tx.clone();
            let job: Job = Box::new(move || {
                let outcome = catch_unwind(AssertUnwindSafe(task)).map_err(|payload| {
                    DispatchError::Panicked {
                        task: task_idx,
                        message: panic_message(payload.as_ref()),
                    }
                });
                // The barrier below holds the receiver until all results are in.
                let _ = done.send((task_idx, outcome));
            });
            if jobs.send(job).is_err() {
                let _ = done_tx.send((task_idx, Err(DispatchError::ShutDown)));
            }
        }
        drop(done_tx);

        let mut slots: Vec<Option<Result<T, DispatchError>>> = (0..count).map(|_| None).collect();
        for (task_idx, outcome) in done_rx.iter().take(count) {
            slots[task_idx] = Some(outcome);
        }
        slots
            .into_iter()
            .map(|slot| slot.unwrap_or(Err(DispatchError::ShutDown)))
            .collect()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        // Closing the queue lets every worker fall out of its recv loop.
        self.jobs.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("dispatch worker panicked outside a task");
            }
        }
    }
}
