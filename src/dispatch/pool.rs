use crossbeam_channel::{bounded, Sender};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Fixed set of worker threads fed through a bounded queue.
///
/// At most `threads` jobs run at once and at most `capacity` wait in the
/// queue; `submit` blocks while the queue is full.
pub struct WorkerPool<T: Send + 'static> {
    sender: Option<Sender<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new<F>(name: &str, threads: usize, capacity: usize, handler: F) -> io::Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let (sender, receiver) = bounded::<T>(capacity);
        let handler = Arc::new(handler);
        let mut workers = Vec::with_capacity(threads);

        for i in 0..threads.max(1) {
            let receiver = receiver.clone();
            let handler = Arc::clone(&handler);
            let worker = thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || {
                    for job in receiver.iter() {
                        handler(job);
                    }
                })?;
            workers.push(worker);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Queues a job, waiting for a free slot. Hands the job back if the
    /// pool has no workers left to take it.
    pub fn submit(&self, job: T) -> Result<(), T> {
        match &self.sender {
            Some(sender) => sender.send(job).map_err(|e| e.into_inner()),
            None => Err(job),
        }
    }

    pub fn queued(&self) -> usize {
        self.sender.as_ref().map_or(0, |s| s.len())
    }

    /// Closes the queue and waits for every queued and running job.
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.join().is_err() {
                log::error!("Worker thread {} panicked", name);
            }
        }
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
