use anyhow::Result;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::config::SchedulerConfig;
use crate::orchestrator::PollOrchestrator;

/// Fixed-interval sweeps plus a heartbeat log line.
///
/// Overlapping sweep triggers are not queued here: each job run calls
/// [`PollOrchestrator::run_sweep_once`], which drops the trigger when a sweep
/// is already active.
pub struct SweepScheduler {
    scheduler: JobScheduler,
    orchestrator: Arc<PollOrchestrator>,
    config: SchedulerConfig,
    startup_sweep: Option<tokio::task::JoinHandle<()>>,
}

impl SweepScheduler {
    pub async fn new(orchestrator: Arc<PollOrchestrator>, config: SchedulerConfig) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler,
            orchestrator,
            config,
            startup_sweep: None,
        })
    }

    pub async fn start(&mut self) -> Result<()> {
        self.add_sweep_job().await?;
        self.add_heartbeat_job().await?;
        self.scheduler.start().await?;

        tracing::info!(
            poll_interval_secs = self.config.poll_interval_secs,
            heartbeat_interval_secs = self.config.heartbeat_interval_secs,
            "Sweep scheduler started"
        );

        if self.config.run_on_start {
            let orchestrator = Arc::clone(&self.orchestrator);
            self.startup_sweep = Some(tokio::spawn(async move {
                orchestrator.run_sweep_once().await;
            }));
        }
        Ok(())
    }

    async fn add_sweep_job(&self) -> Result<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let job = Job::new_repeated_async(self.config.poll_interval(), move |_uuid, _lock| {
            let orchestrator = Arc::clone(&orchestrator);
            Box::pin(async move {
                if let Some(report) = orchestrator.run_sweep_once().await {
                    tracing::debug!(checked = report.summary.checked, "Scheduled sweep complete");
                }
            })
        })?;
        self.scheduler.add(job).await?;
        Ok(())
    }

    async fn add_heartbeat_job(&self) -> Result<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let job = Job::new_repeated_async(self.config.heartbeat_interval(), move |_uuid, _lock| {
            let orchestrator = Arc::clone(&orchestrator);
            Box::pin(async move {
                let status = orchestrator.status().await;
                tracing::info!(
                    leaves = status.leaves,
                    tracked = status.tracked_records,
                    in_stock = status.in_stock,
                    sweep_running = status.sweep_running,
                    last_sweep = status.last_sweep.as_ref().map(|s| s.finished_at.to_rfc3339()),
                    "Heartbeat"
                );
            })
        })?;
        self.scheduler.add(job).await?;
        Ok(())
    }

    /// Stops firing new jobs and waits for the startup sweep, which ends early
    /// once the shutdown signal has fired.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        if let Some(handle) = self.startup_sweep.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Startup sweep ended abnormally");
            }
        }
        tracing::info!("Sweep scheduler shut down");
        Ok(())
    }
}
