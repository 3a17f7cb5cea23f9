// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! The scheduler: admission-controls and multiplexes many workflow runs
//! over a FIFO queue, a bounded in-flight set, and a periodic retention GC
//! sweep, built on `tokio::sync::mpsc` + `tokio::select!`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{OrchestratorError, Result};
use crate::executor::WorkflowExecutor;

/// Scheduler tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub max_concurrent_workflows: usize,
    pub max_workflow_timeout: Duration,
    pub cleanup_interval: Duration,
    pub history_retention_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: 10,
            max_workflow_timeout: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(86_400),
            history_retention_days: 30,
        }
    }
}

impl SchedulerConfig {
    /// Rejects a zero-second timeout, or zero concurrency, at
    /// configuration time rather than failing lazily on first dispatch.
    pub fn validate(&self) -> Result<()> {
        if self.max_workflow_timeout.is_zero() {
            return Err(OrchestratorError::Configuration(
                "max_workflow_timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_workflows == 0 {
            return Err(OrchestratorError::Configuration(
                "max_concurrent_workflows must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A unit of work admitted to the queue: the executor that will drive one
/// workflow to completion. The queue holds these rather than bare ids
/// because the executor already owns its `WorkflowDefinition` and every
/// handle it needs.
type QueuedRun = Arc<WorkflowExecutor>;

/// FIFO queue + bounded in-flight set + periodic GC.
pub struct WorkflowScheduler {
    config: SchedulerConfig,
    sender: mpsc::UnboundedSender<QueuedRun>,
    receiver: Arc<Mutex<Option<mpsc::UnboundedReceiver<QueuedRun>>>>,
    running: Arc<Mutex<HashSet<String>>>,
    cleanup_fn: Arc<dyn Fn(i64) -> futures::future::BoxFuture<'static, Result<u64>> + Send + Sync>,
    running_flag: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkflowScheduler {
    /// `cleanup` is called once per `cleanup_interval` tick with
    /// `config.history_retention_days`; callers typically supply
    /// `move |days| Box::pin(manager.cleanup(days))`.
    pub fn new<F>(config: SchedulerConfig, cleanup: F) -> Result<Self>
    where
        F: Fn(i64) -> futures::future::BoxFuture<'static, Result<u64>> + Send + Sync + 'static,
    {
        config.validate()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            sender,
            receiver: Arc::new(Mutex::new(Some(receiver))),
            running: Arc::new(Mutex::new(HashSet::new())),
            cleanup_fn: Arc::new(cleanup),
            running_flag: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Enqueues a workflow run for dispatch. FIFO ordering across arrivals
    /// is the scheduler's only fairness guarantee. `config.max_workflow_timeout`
    /// is applied to the run here, before it ever reaches the dispatch loop,
    /// overriding whatever timeout the executor was built with.
    pub fn enqueue(&self, run: WorkflowExecutor) -> Result<()> {
        let run = Arc::new(run.with_timeout(self.config.max_workflow_timeout));
        self.sender
            .send(run)
            .map_err(|_| OrchestratorError::Internal("scheduler queue is closed".to_string()))
    }

    pub fn queue_depth_hint(&self) -> usize {
        // UnboundedReceiver does not expose a length; in-flight count is the
        // only live metric this scheduler can report without polling the
        // channel, so that's what `get_scheduler_status` surfaces.
        0
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.running_flag.load(Ordering::SeqCst)
    }

    /// Spawns the dispatch and GC loops. Idempotent: calling `start` twice
    /// while already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running_flag.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            max_concurrent_workflows = self.config.max_concurrent_workflows,
            "starting scheduler"
        );

        let Some(receiver) = self.receiver.lock().take() else {
            return;
        };

        let dispatch = tokio::spawn(self.clone().dispatch_loop(receiver));
        let gc = tokio::spawn(self.clone().cleanup_loop());
        *self.tasks.lock() = vec![dispatch, gc];
    }

    /// Cancels the dispatch and GC loops. In-flight workflows continue to
    /// completion unless separately cancelled.
    pub fn stop(&self) {
        if !self.running_flag.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("stopping scheduler");
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    #[instrument(skip(self, receiver))]
    async fn dispatch_loop(self: Arc<Self>, mut receiver: mpsc::UnboundedReceiver<QueuedRun>) {
        loop {
            if !self.running_flag.load(Ordering::SeqCst) {
                return;
            }

            let headroom = self.running.lock().len() < self.config.max_concurrent_workflows;
            if !headroom {
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }

            let run = tokio::select! {
                run = receiver.recv() => run,
                _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
            };

            let Some(run) = run else {
                return;
            };

            let id = run.workflow_id().to_string();
            self.running.lock().insert(id.clone());
            debug!(workflow_id = %id, "dispatching workflow");

            let running = self.running.clone();
            tokio::spawn(async move {
                if let Err(err) = run.execute().await {
                    warn!(workflow_id = %id, %err, "workflow run ended with an error");
                }
                running.lock().remove(&id);
            });
        }
    }

    #[instrument(skip(self))]
    async fn cleanup_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.cleanup_interval);
        ticker.tick().await; // first tick fires immediately; skip it.
        loop {
            ticker.tick().await;
            if !self.running_flag.load(Ordering::SeqCst) {
                return;
            }
            match (self.cleanup_fn)(self.config.history_retention_days).await {
                Ok(removed) => info!(removed, "retention GC sweep complete"),
                Err(err) => warn!(%err, "retention GC sweep failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_concurrent_workflows, 10);
        assert_eq!(config.max_workflow_timeout, Duration::from_secs(3600));
        assert_eq!(config.cleanup_interval, Duration::from_secs(86_400));
        assert_eq!(config.history_retention_days, 30);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = SchedulerConfig::default();
        config.max_workflow_timeout = Duration::from_secs(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = SchedulerConfig::default();
        config.max_concurrent_workflows = 0;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let scheduler = Arc::new(
            WorkflowScheduler::new(SchedulerConfig::default(), |_days| Box::pin(async { Ok(0) }))
                .unwrap(),
        );
        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());
        scheduler.stop();
        assert!(!scheduler.is_running());
    }
}
