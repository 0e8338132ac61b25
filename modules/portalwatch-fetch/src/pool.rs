use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A unit on the task channel. `Stop` is the sentinel a producer sends once
/// per worker after enumeration completes (§4.2).
pub enum Task<T> {
    Item(T),
    Stop,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub workers: usize,
    pub task_capacity: usize,
    pub result_capacity: usize,
    pub idle_max: Duration,
    pub drain_timeout: Duration,
}

/// Bounded task/result worker pool (§4.2). Each worker polls its task queue
/// non-blockingly: on an empty queue it sleeps 1s and accumulates idle time,
/// exiting once `idle_max` is reached or a `Stop` sentinel is received.
/// Guarantees: every task submitted before `close()` is processed or
/// explicitly abandoned at shutdown; results may arrive out of order; no
/// task runs twice.
pub struct Pool<T> {
    task_tx: mpsc::Sender<Task<T>>,
    handles: Vec<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl<T: Send + 'static> Pool<T> {
    /// Spawn `config.workers` tasks, each applying `handler` to dequeued
    /// items and forwarding the output on the returned receiver.
    pub fn spawn<R, F, Fut>(config: PoolConfig, handler: F) -> (Self, mpsc::Receiver<R>)
    where
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = R> + Send,
    {
        let (task_tx, task_rx) = mpsc::channel::<Task<T>>(config.task_capacity);
        let (result_tx, result_rx) = mpsc::channel::<R>(config.result_capacity);
        let task_rx = Arc::new(Mutex::new(task_rx));

        let mut handles = Vec::with_capacity(config.workers);
        for id in 0..config.workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let handler = handler.clone();
            let idle_max = config.idle_max;
            handles.push(tokio::spawn(async move {
                let mut idle = Duration::ZERO;
                loop {
                    let polled = task_rx.lock().await.try_recv();
                    match polled {
                        Ok(Task::Item(item)) => {
                            idle = Duration::ZERO;
                            let result = handler(item).await;
                            if result_tx.send(result).await.is_err() {
                                break;
                            }
                        }
                        Ok(Task::Stop) => {
                            debug!(worker = id, "stop sentinel received");
                            break;
                        }
                        Err(mpsc::error::TryRecvError::Empty) => {
                            tokio::time::sleep(Duration::from_secs(1)).await;
                            idle += Duration::from_secs(1);
                            if idle >= idle_max {
                                debug!(worker = id, "idle timeout reached");
                                break;
                            }
                        }
                        Err(mpsc::error::TryRecvError::Disconnected) => break,
                    }
                }
            }));
        }

        (Self { task_tx, handles, drain_timeout: config.drain_timeout }, result_rx)
    }

    pub async fn submit(&self, item: T) -> Result<(), mpsc::error::SendError<Task<T>>> {
        self.task_tx.send(Task::Item(item)).await
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Send one `Stop` per worker, then wait up to the configured drain
    /// timeout; workers still alive past it are aborted (§5).
    pub async fn close(self) {
        for _ in 0..self.handles.len() {
            let _ = self.task_tx.send(Task::Stop).await;
        }
        self.join().await;
    }

    async fn join(self) {
        let deadline = Instant::now() + self.drain_timeout;
        for handle in self.handles {
            let abort = handle.abort_handle();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                warn!("worker exceeded drain timeout, aborting");
                abort.abort();
            }
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            task_capacity: 256,
            result_capacity: 256,
            idle_max: Duration::from_secs(20),
            drain_timeout: Duration::from_secs(300),
        }
    }
}
