//! The scheduling loop.
//!
//! Every cycle takes a fresh snapshot of the cache, opens a session over it,
//! runs the configured actions, closes the session and writes the results
//! out: binds through the bind pool, PodGroup and Queue status through the
//! status updater. Cycles never overlap.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use gangway_cache::{
    BindReport, BindRequest, Binder, SchedulerCache, Snapshot, StatusUpdater, VolumeBinder,
    bind_batch,
};
use gangway_framework::{PluginRegistry, SessionOutcome, open_session};

use crate::action::{Action, build_actions};
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub session: String,
    pub binds: BindReport,
    pub job_updates: usize,
    pub queue_updates: usize,
    /// Status writes that failed after retries. They are recomputed and
    /// retried by the next cycle.
    pub status_failures: usize,
}

pub struct Scheduler {
    cache: SchedulerCache,
    config: SchedulerConfig,
    registry: PluginRegistry,
    actions: Vec<Box<dyn Action>>,
    binder: Arc<dyn Binder>,
    volume_binder: Arc<dyn VolumeBinder>,
    status: Arc<dyn StatusUpdater>,
}

impl Scheduler {
    /// Validate `config` against `registry` and resolve its actions.
    pub fn new(
        cache: SchedulerCache,
        config: SchedulerConfig,
        registry: PluginRegistry,
        binder: Arc<dyn Binder>,
        volume_binder: Arc<dyn VolumeBinder>,
        status: Arc<dyn StatusUpdater>,
    ) -> SchedulerResult<Self> {
        config.validate(&registry)?;
        let actions = build_actions(&config.policy.actions)?;
        Ok(Self {
            cache,
            config,
            registry,
            actions,
            binder,
            volume_binder,
            status,
        })
    }

    pub fn cache(&self) -> &SchedulerCache {
        &self.cache
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run one scheduling cycle.
    ///
    /// `cancel` is checked between actions. A cancelled cycle reverts its
    /// tentative placements and writes nothing, so every task it touched is
    /// still `Pending` for the next cycle.
    pub async fn run_once(&self, cancel: &watch::Receiver<bool>) -> SchedulerResult<CycleReport> {
        let started = Instant::now();
        let snapshot = self.cache.snapshot().await;
        let (session, outcome) = self.run_session(snapshot, cancel)?;

        if let Err(e) = self.cache.reserve_binds(&outcome.binds).await {
            warn!(%session, error = %e, binds = outcome.binds.len(), "cache changed under the cycle, dropping its binds");
            self.release_volumes(&outcome.binds);
            return Err(e.into());
        }

        let bind_opts = self.config.bind_options();
        let binds = bind_batch(
            &self.cache,
            self.binder.clone(),
            self.volume_binder.clone(),
            outcome.binds,
            &bind_opts,
        )
        .await;

        let retry = self.config.retry_policy();
        let mut status_failures = 0;
        for pg in &outcome.job_updates {
            if let Err(e) = self
                .cache
                .update_pod_group_status(self.status.as_ref(), pg, &retry)
                .await
            {
                warn!(podgroup = %pg.metadata.key(), error = %e, "failed to update podgroup status");
                status_failures += 1;
            }
        }
        for queue in &outcome.queue_updates {
            if let Err(e) = self
                .cache
                .update_queue_status(self.status.as_ref(), queue, &retry)
                .await
            {
                warn!(queue = %queue.metadata.name, error = %e, "failed to update queue status");
                status_failures += 1;
            }
        }

        info!(
            %session,
            bound = binds.bound.len(),
            failed = binds.failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cycle finished"
        );
        Ok(CycleReport {
            session,
            binds,
            job_updates: outcome.job_updates.len(),
            queue_updates: outcome.queue_updates.len(),
            status_failures,
        })
    }

    /// Open a session over `snapshot`, run every action and close it.
    fn run_session(
        &self,
        snapshot: Snapshot,
        cancel: &watch::Receiver<bool>,
    ) -> SchedulerResult<(String, SessionOutcome)> {
        let mut ssn = open_session(
            snapshot,
            &self.config.policy.tiers,
            &self.registry,
            self.volume_binder.clone(),
        )?;
        let session = ssn.uid().to_string();

        for action in &self.actions {
            if *cancel.borrow() {
                info!(%session, action = action.name(), "cycle cancelled");
                ssn.abandon();
                return Err(SchedulerError::Cancelled);
            }
            let begun = Instant::now();
            action.execute(&mut ssn);
            debug!(
                %session,
                action = action.name(),
                elapsed_ms = begun.elapsed().as_millis() as u64,
                "action finished"
            );
        }
        if *cancel.borrow() {
            info!(%session, "cycle cancelled before dispatch");
            ssn.abandon();
            return Err(SchedulerError::Cancelled);
        }
        Ok((session, ssn.close()))
    }

    fn release_volumes(&self, binds: &[BindRequest]) {
        for request in binds.iter().rev() {
            if let Some(volumes) = &request.task.pod_volumes {
                self.volume_binder.revert_volumes(&request.task, volumes);
            }
        }
    }

    /// Run a cycle every schedule period until `shutdown` fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.schedule_period();
        info!(
            period_ms = period.as_millis() as u64,
            actions = ?self.config.policy.actions,
            "scheduler started"
        );

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once(&shutdown).await {
                        Ok(report) => debug!(
                            session = %report.session,
                            bound = report.binds.bound.len(),
                            "cycle report"
                        ),
                        Err(SchedulerError::Cancelled) => {}
                        Err(e) => error!(error = %e, "scheduling cycle failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("scheduler shutting down");
                    break;
                }
            }
        }
    }
}
