//! Fixed-size worker pool with per-worker FIFO queues and barrier rendezvous.
//!
//! Every worker owns one queue. Jobs are distributed round-robin unless a
//! specific worker is requested. A barrier places one rendezvous job on every
//! queue, so no job submitted after the barrier starts before every worker has
//! drained what was submitted ahead of it.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam::sync::WaitGroup;
use crossbeam_channel::{Receiver, Sender};

use crate::thread::enter_audio_thread;

/// Jobs pulled from a queue per wake-up.
const BATCH: usize = 5;

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to spawn worker thread {index}")]
    Spawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("worker dropped the job before producing a result")]
    Disconnected,
}

/// Completion handle for a job submitted with [`ThreadPool::submit_with_result`].
#[derive(Debug)]
pub struct JobHandle<T> {
    receiver: Receiver<T>,
}

impl<T> JobHandle<T> {
    /// Blocks until the job has run and returns its result.
    pub fn wait(self) -> Result<T, PoolError> {
        self.receiver.recv().map_err(|_| PoolError::Disconnected)
    }

    pub fn is_ready(&self) -> bool {
        !self.receiver.is_empty()
    }
}

struct Worker {
    sender: Sender<Message>,
    handle: Option<JoinHandle<()>>,
}

/// A pool of named worker threads.
///
/// A pool without workers runs submitted jobs inline on the calling thread,
/// which keeps single-threaded callers free of special cases.
pub struct ThreadPool {
    workers: Vec<Worker>,
    next: AtomicUsize,
    barriers: AtomicU64,
}

impl ThreadPool {
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
            next: AtomicUsize::new(0),
            barriers: AtomicU64::new(0),
        }
    }

    pub fn with_threads(threads: usize) -> Result<Self, PoolError> {
        let mut pool = Self::new();
        pool.start(threads)?;
        Ok(pool)
    }

    /// Spawns `threads` workers. A running pool is stopped first.
    pub fn start(&mut self, threads: usize) -> Result<(), PoolError> {
        self.stop();
        for index in 0..threads {
            let (sender, receiver) = crossbeam_channel::unbounded();
            let handle = thread::Builder::new()
                .name(format!("sonora-worker-{index}"))
                .spawn(move || worker_loop(receiver))
                .map_err(|source| PoolError::Spawn { index, source });
            match handle {
                Ok(handle) => self.workers.push(Worker {
                    sender,
                    handle: Some(handle),
                }),
                Err(err) => {
                    self.stop();
                    return Err(err);
                }
            }
        }
        tracing::debug!(threads, "thread pool started");
        Ok(())
    }

    /// Poisons every queue and joins the workers. Jobs queued ahead of the
    /// sentinel still run.
    pub fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        for worker in &self.workers {
            let _ = worker.sender.send(Message::Shutdown);
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    tracing::error!("worker thread panicked before shutdown");
                }
            }
        }
        let threads = self.workers.len();
        self.workers.clear();
        self.next.store(0, Ordering::Relaxed);
        tracing::debug!(threads, "thread pool stopped");
    }

    pub fn set_thread_count(&mut self, threads: usize) -> Result<(), PoolError> {
        if threads == self.workers.len() {
            return Ok(());
        }
        self.start(threads)
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Total number of barriers submitted since the pool was created.
    pub fn barriers_submitted(&self) -> u64 {
        self.barriers.load(Ordering::Relaxed)
    }

    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.workers.is_empty() {
            job();
            return;
        }
        let worker = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.dispatch(worker, Box::new(job));
    }

    /// Enqueues `job` on a specific worker's queue. The index wraps around the
    /// worker count.
    pub fn submit_to<F>(&self, worker: usize, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.workers.is_empty() {
            job();
            return;
        }
        self.dispatch(worker % self.workers.len(), Box::new(job));
    }

    pub fn submit_with_result<F, T>(&self, job: F) -> JobHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        self.submit(move || {
            let _ = sender.send(job());
        });
        JobHandle { receiver }
    }

    fn submit_with_result_to<F, T>(&self, worker: usize, job: F) -> JobHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        self.submit_to(worker, move || {
            let _ = sender.send(job());
        });
        JobHandle { receiver }
    }

    /// Places one rendezvous job on every worker queue. Each worker blocks at
    /// its rendezvous until all workers have arrived.
    pub fn submit_barrier(&self) {
        if self.workers.is_empty() {
            return;
        }
        let group = WaitGroup::new();
        for worker in 0..self.workers.len() {
            let member = group.clone();
            self.dispatch(worker, Box::new(move || member.wait()));
        }
        drop(group);
        self.barriers.fetch_add(1, Ordering::Relaxed);
    }

    /// Waits until every queue has drained everything submitted so far.
    pub fn sync(&self) -> Result<(), PoolError> {
        let handles = (0..self.workers.len())
            .map(|worker| self.submit_with_result_to(worker, || ()))
            .collect::<Vec<_>>();
        for handle in handles {
            handle.wait()?;
        }
        Ok(())
    }

    fn dispatch(&self, worker: usize, task: Task) {
        if self.workers[worker].sender.send(Message::Run(task)).is_err() {
            tracing::error!(worker, "worker queue disconnected; job dropped");
        }
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(receiver: Receiver<Message>) {
    enter_audio_thread();
    let mut batch = Vec::with_capacity(BATCH);
    loop {
        let Ok(first) = receiver.recv() else {
            return;
        };
        batch.push(first);
        while batch.len() < BATCH {
            match receiver.try_recv() {
                Ok(message) => batch.push(message),
                Err(_) => break,
            }
        }
        for message in batch.drain(..) {
            match message {
                Message::Run(task) => task(),
                Message::Shutdown => return,
            }
        }
    }
}
