//! Dry run: load a manifest into a fresh cache and run scheduling cycles
//! against recording collaborators.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use gangway_cache::SchedulerCache;
use gangway_cache::recording::{RecordingBinder, RecordingStatusUpdater};
use gangway_plugins::default_registry;
use gangway_scheduler::{CycleReport, Scheduler, SchedulerConfig, SchedulerError};

use crate::manifest::ClusterManifest;

#[derive(Debug, Serialize)]
pub struct Simulation {
    /// Task `namespace/name` to node, over every cycle.
    pub placements: BTreeMap<String, String>,
    pub cycles: Vec<CycleReport>,
}

pub async fn simulate(
    manifest: &ClusterManifest,
    config: SchedulerConfig,
    cycles: u32,
    cancel: watch::Receiver<bool>,
) -> anyhow::Result<Simulation> {
    let cache = SchedulerCache::new();
    for event in manifest.events() {
        let kind = event.kind();
        cache
            .apply(event)
            .await
            .with_context(|| format!("loading manifest ({kind})"))?;
    }

    let binder = Arc::new(RecordingBinder::new());
    let scheduler = Scheduler::new(
        cache,
        config,
        default_registry(),
        binder.clone(),
        Arc::new(manifest.volume_binder()),
        Arc::new(RecordingStatusUpdater::new()),
    )?;

    let mut reports = Vec::new();
    for cycle in 1..=cycles {
        match scheduler.run_once(&cancel).await {
            Ok(report) => {
                info!(cycle, bound = report.binds.bound.len(), "simulated cycle");
                reports.push(report);
            }
            Err(SchedulerError::Cancelled) => {
                warn!(cycle, "simulation interrupted");
                break;
            }
            Err(e) => warn!(cycle, error = %e, "cycle failed"),
        }
    }

    Ok(Simulation {
        placements: binder.binds(),
        cycles: reports,
    })
}
