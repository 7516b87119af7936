//! # Worker Pool
//!
//! Fixed number of tokio workers draining one bounded job queue. `submit` waits while
//! the queue is full, which pushes back on the consumer loop instead of buffering an
//! unbounded number of deliveries.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::errors::{ConsumerError, ConsumerResult};
use crate::processing::processor::panic_message;

type Job = BoxFuture<'static, ()>;

pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("workers", &self.workers.lock().len())
            .field("open", &self.sender.lock().is_some())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn `worker_count` workers over a queue holding at most `queue_size` jobs
    pub fn new(name: impl Into<String>, worker_count: usize, queue_size: usize) -> Self {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Job>(queue_size.max(1));
        let receiver = Arc::new(AsyncMutex::new(receiver));

        let workers = (0..worker_count.max(1))
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let name = name.clone();
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        let Some(job) = job else { break };

                        if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
                            error!(
                                pool = %name,
                                worker_id,
                                error = %panic_message(panic),
                                "Worker job panicked"
                            );
                        }
                    }
                    debug!(pool = %name, worker_id, "Worker stopped");
                })
            })
            .collect();

        Self {
            name,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `job`, waiting for room when the queue is full
    pub async fn submit<F>(&self, job: F) -> ConsumerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or_else(|| ConsumerError::pool_closed(&self.name))?;

        sender
            .send(job.boxed())
            .await
            .map_err(|_| ConsumerError::pool_closed(&self.name))
    }

    /// Stop accepting jobs and wait for the queued ones to finish
    pub async fn shutdown(&self) {
        self.sender.lock().take();

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                error!(pool = %self.name, error = %e, "Worker task failed");
            }
        }
        debug!(pool = %self.name, "Worker pool shut down");
    }
}
