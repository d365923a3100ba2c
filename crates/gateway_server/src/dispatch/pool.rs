//! Fixed-size worker pool over one bounded job queue.

use crate::error::ServerError;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Task = BoxFuture<'static, ()>;

/// N background workers draining one bounded queue.
///
/// [`WorkerPool::submit`] never waits for queue space: when the queue is full
/// the task runs on the caller instead.
pub struct WorkerPool {
    sender: RwLock<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawns `workers` tasks on the current Tokio runtime.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let size = workers.max(1);
        let (sender, receiver) = mpsc::channel::<Task>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..size)
            .map(|worker_id| {
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    loop {
                        let task = receiver.lock().await.recv().await;
                        match task {
                            Some(task) => task.await,
                            None => break,
                        }
                    }
                    debug!("Worker {} stopped", worker_id);
                })
            })
            .collect();

        Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(handles),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Hands a task to the pool.
    ///
    /// If the queue is full the task runs to completion on the caller before
    /// this returns. Fails with [`ServerError::PoolClosed`] after shutdown.
    pub async fn submit<F>(&self, task: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = match self.sender.read().await.as_ref() {
            Some(sender) => sender.clone(),
            None => return Err(ServerError::PoolClosed),
        };

        match sender.try_send(Box::pin(task)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!("⚠️ Worker queue full, running task on the caller");
                task.await;
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ServerError::PoolClosed),
        }
    }

    /// Closes the queue and waits for the workers to finish everything that
    /// was already queued.
    pub async fn shutdown(&self) {
        if self.sender.write().await.take().is_none() {
            return;
        }

        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker task ended abnormally: {}", e);
            }
        }
        info!("🧵 Worker pool drained ({} workers)", self.size);
    }
}
