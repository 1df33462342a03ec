//! Background task orchestration for a shard.
//!
//! A `BackgroundTaskRegistry` owns the long-lived tasks of a shard (today the
//! membership reconciler) and gives them one lifecycle:
//! - tasks are registered by name and visible to health checks
//! - one broadcast signal stops every task
//! - tasks that ignore the signal are aborted after a timeout
//!
//! Tasks are spawned with [`spawn_cooperative`](BackgroundTaskRegistry::spawn_cooperative),
//! which hands each one its own [`ShutdownSignal`] so that it can finish
//! cleanly (for example to deregister from the engine before it stops).
//!
//! # Example
//!
//! ```rust,no_run
//! use jetlog::cluster::background_tasks::{BackgroundTaskRegistry, TaskStatus};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut registry = BackgroundTaskRegistry::new();
//!
//!     registry.spawn_cooperative("reconciler", |mut shutdown| async move {
//!         loop {
//!             tokio::select! {
//!                 _ = shutdown.recv() => break,
//!                 _ = tokio::time::sleep(Duration::from_secs(1)) => {}
//!             }
//!         }
//!     });
//!
//!     for (name, status) in registry.health_check() {
//!         println!("{}: {}", name, if status == TaskStatus::Running { "OK" } else { "STOPPED" });
//!     }
//!
//!     registry.shutdown_all_with_timeout(Duration::from_secs(5)).await;
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;

/// Status of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Task is currently running.
    Running,
    /// Task finished (returned, panicked or was cancelled).
    Finished,
}

impl TaskStatus {
    /// Long-lived tasks are only healthy while they run.
    pub fn is_healthy(&self) -> bool {
        matches!(self, TaskStatus::Running)
    }
}

/// Shutdown notification handed to cooperative tasks.
pub struct ShutdownSignal {
    receiver: broadcast::Receiver<()>,
}

impl ShutdownSignal {
    /// Wait until shutdown is requested.
    ///
    /// Also returns if the registry is dropped.
    pub async fn recv(&mut self) {
        let _ = self.receiver.recv().await;
    }
}

/// Registry of named background tasks with a shared shutdown signal.
pub struct BackgroundTaskRegistry {
    /// Registered tasks by name.
    tasks: HashMap<&'static str, JoinHandle<()>>,
    /// Shutdown signal sender.
    shutdown_tx: broadcast::Sender<()>,
    /// Whether shutdown has been initiated.
    shutting_down: bool,
}

impl BackgroundTaskRegistry {
    /// Create a new task registry.
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tasks: HashMap::new(),
            shutdown_tx,
            shutting_down: false,
        }
    }

    /// Spawn a named task that observes the shutdown signal itself.
    ///
    /// The task is expected to return promptly once the signal fires; if it
    /// does not, shutdown aborts it after the timeout.
    pub fn spawn_cooperative<F, Fut>(&mut self, name: &'static str, task: F)
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let signal = ShutdownSignal {
            receiver: self.shutdown_tx.subscribe(),
        };
        let task = task(signal);
        self.register(name, async move {
            task.await;
            tracing::debug!(task = name, "Task exited");
        });
    }

    fn register<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutting_down {
            tracing::warn!(task = name, "Ignoring spawn during shutdown");
            return;
        }

        // If a task with this name exists, abort it first
        if let Some(old_handle) = self.tasks.remove(name) {
            old_handle.abort();
            tracing::debug!(task = name, "Aborted previous task instance");
        }

        let handle = tokio::spawn(task);
        tracing::info!(task = name, "Spawned background task");

        self.tasks.insert(name, handle);
    }

    /// Get the status of all tasks, sorted by name.
    pub fn health_check(&self) -> Vec<(&'static str, TaskStatus)> {
        let mut health: Vec<_> = self
            .tasks
            .iter()
            .map(|(name, handle)| {
                let status = if handle.is_finished() {
                    TaskStatus::Finished
                } else {
                    TaskStatus::Running
                };
                (*name, status)
            })
            .collect();
        health.sort_by_key(|(name, _)| *name);
        health
    }

    /// Signal shutdown and wait for every task to finish.
    ///
    /// Tasks still running when `timeout` expires are aborted.
    pub async fn shutdown_all_with_timeout(&mut self, timeout: Duration) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;

        tracing::info!(
            task_count = self.tasks.len(),
            "Initiating background task shutdown"
        );

        let _ = self.shutdown_tx.send(());

        let deadline = tokio::time::Instant::now() + timeout;

        for (name, mut handle) in self.tasks.drain() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());

            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(())) => {
                    tracing::debug!(task = name, "Task shutdown complete");
                }
                Ok(Err(e)) => {
                    tracing::warn!(task = name, error = %e, "Task panicked during shutdown");
                }
                Err(_) => {
                    tracing::warn!(task = name, "Task did not respond to shutdown, aborting");
                    handle.abort();
                }
            }
        }

        tracing::info!("All background tasks shutdown complete");
    }
}

impl Default for BackgroundTaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BackgroundTaskRegistry {
    fn drop(&mut self) {
        if !self.shutting_down {
            let _ = self.shutdown_tx.send(());
            for (name, handle) in self.tasks.drain() {
                tracing::debug!(task = name, "Aborting task on registry drop");
                handle.abort();
            }
        }
    }
}

/// Thread-safe wrapper around BackgroundTaskRegistry.
#[derive(Clone, Default)]
pub struct SharedTaskRegistry {
    inner: Arc<RwLock<BackgroundTaskRegistry>>,
}

impl SharedTaskRegistry {
    /// Create a new shared registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a named task that observes the shutdown signal itself.
    pub async fn spawn_cooperative<F, Fut>(&self, name: &'static str, task: F)
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.write().await.spawn_cooperative(name, task);
    }

    /// Get health status of all tasks.
    pub async fn health_check(&self) -> Vec<(&'static str, TaskStatus)> {
        self.inner.read().await.health_check()
    }

    /// Shutdown all tasks with a custom timeout.
    pub async fn shutdown_all_with_timeout(&self, timeout: Duration) {
        self.inner
            .write()
            .await
            .shutdown_all_with_timeout(timeout)
            .await;
    }
}
