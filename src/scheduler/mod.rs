//! Periodic background work with graceful shutdown.
//!
//! Flushing and compaction run on timers, off the client call path. Each
//! registered task gets its own timer loop; shutdown broadcasts a stop
//! signal and joins every loop before returning.

use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::Result;
use crate::Error;

/// Handed to a task on every run.
pub struct Context {
    pub task_name: &'static str,
    pub run_id: u64,
    pub shutdown: broadcast::Receiver<()>,
}

#[async_trait::async_trait]
pub trait BackgroundTask: Send + Sync {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    async fn execute(&self, ctx: Context) -> Result<()>;
}

pub struct Scheduler {
    handles: RwLock<Vec<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            handles: RwLock::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Starts a periodic task. The first run happens one interval after
    /// registration, not immediately.
    pub fn register<T: BackgroundTask + 'static>(&self, task: Arc<T>) -> Result<()> {
        let handle = self.spawn_timer_loop(task);
        self.handles
            .write()
            .map_err(|_| Error::MutexPoisoned)?
            .push(handle);
        Ok(())
    }

    fn spawn_timer_loop<T: BackgroundTask + 'static>(&self, task: Arc<T>) -> JoinHandle<()> {
        let interval = task.interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut run_id = 0u64;

        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_id += 1;
                        let ctx = Context {
                            task_name: task.name(),
                            run_id,
                            shutdown: shutdown_rx.resubscribe(),
                        };

                        // A failed run is logged and retried on the next
                        // tick; it never kills the loop.
                        if let Err(e) = task.execute(ctx).await {
                            tracing::error!(
                                task = task.name(),
                                run_id,
                                error = %e,
                                "Background task run failed"
                            );
                        }
                    }

                    _ = shutdown_rx.recv() => {
                        tracing::info!(task = task.name(), "Background task stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Signals every task to stop and waits for the loops to exit.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx.send(()).ok();

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.write().map_err(|_| Error::MutexPoisoned)?;
            guard.drain(..).collect()
        };
        for handle in handles {
            handle
                .await
                .map_err(|e| Error::InvalidState(format!("task join failed: {}", e)))?;
        }
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTask {
        interval: Duration,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl BackgroundTask for CountingTask {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        async fn execute(&self, _ctx: Context) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_task_runs_periodically() -> Result<()> {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler.register(Arc::new(CountingTask {
            interval: Duration::from_millis(10),
            runs: Arc::clone(&runs),
        }))?;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(runs.load(Ordering::SeqCst) > 1);

        scheduler.shutdown().await
    }

    #[tokio::test]
    async fn test_shutdown_stops_tasks() -> Result<()> {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler.register(Arc::new(CountingTask {
            interval: Duration::from_millis(10),
            runs: Arc::clone(&runs),
        }))?;

        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.shutdown().await?;
        let after = runs.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after);
        Ok(())
    }

    #[tokio::test]
    async fn test_first_run_waits_one_interval() -> Result<()> {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler.register(Arc::new(CountingTask {
            interval: Duration::from_millis(50),
            runs: Arc::clone(&runs),
        }))?;

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        scheduler.shutdown().await
    }
}
