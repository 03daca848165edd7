//! Bind worker pool.
//!
//! A committed batch is bound concurrently, at most `workers` binds in
//! flight. Each bind first binds the task's volumes and requests any dynamic
//! provisioning, then issues the pod bind, retrying optimistic-concurrency conflicts with bounded backoff.
//! Results are written back to the cache: confirmed binds become `Bound`,
//! failures return the task to `Pending` for the next cycle.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use gangway_api::TaskInfo;

use crate::cache::SchedulerCache;
use crate::error::BindError;
use crate::interface::{Binder, VolumeBinder};
use crate::retry::{RetryPolicy, retry_on_conflict};

/// One task to bind to one node.
#[derive(Debug, Clone)]
pub struct BindRequest {
    pub task: TaskInfo,
    pub node: String,
}

#[derive(Debug, Clone)]
pub struct BindOptions {
    /// Maximum binds in flight.
    pub workers: usize,
    pub retry: RetryPolicy,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            workers: 16,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of a bind batch, keyed by task `namespace/name`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BindReport {
    pub bound: BTreeMap<String, String>,
    pub failed: BTreeMap<String, String>,
}

impl BindReport {
    pub fn merge(&mut self, other: BindReport) {
        self.bound.extend(other.bound);
        self.failed.extend(other.failed);
    }
}

/// Bind every request and write the results back to `cache`.
pub async fn bind_batch(
    cache: &SchedulerCache,
    binder: Arc<dyn Binder>,
    volumes: Arc<dyn VolumeBinder>,
    requests: Vec<BindRequest>,
    opts: &BindOptions,
) -> BindReport {
    let mut report = BindReport::default();
    if requests.is_empty() {
        return report;
    }

    let permits = Arc::new(Semaphore::new(opts.workers.max(1)));
    let mut set = JoinSet::new();
    let mut in_flight: HashMap<tokio::task::Id, BindRequest> = HashMap::new();
    for req in requests {
        let permits = permits.clone();
        let binder = binder.clone();
        let volumes = volumes.clone();
        let retry = opts.retry;
        let tracked = req.clone();
        let handle = set.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            bind_one(binder.as_ref(), volumes.as_ref(), &req, &retry).await
        });
        in_flight.insert(handle.id(), tracked);
    }

    while let Some(joined) = set.join_next_with_id().await {
        let (id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(e) => {
                error!(error = %e, "bind worker died");
                (e.id(), Err(BindError::WorkerFailed(e.to_string())))
            }
        };
        let Some(req) = in_flight.remove(&id) else {
            warn!(task_id = %id, "bind result for unknown worker");
            continue;
        };
        let key = req.task.key();
        match result {
            Ok(()) => {
                info!(task = %key, node = %req.node, "task bound");
                if let Err(e) = cache.bind_succeeded(&req.task.job, &req.task.uid, &req.node).await {
                    warn!(task = %key, error = %e, "bound task vanished from cache");
                }
                report.bound.insert(key, req.node);
            }
            Err(e) => {
                warn!(task = %key, node = %req.node, error = %e, "bind failed, task requeued");
                if let Err(e) = cache.bind_failed(&req.task.job, &req.task.uid, &req.node).await {
                    warn!(task = %key, error = %e, "failed task vanished from cache");
                }
                report.failed.insert(key, e.to_string());
            }
        }
    }

    debug!(bound = report.bound.len(), failed = report.failed.len(), "bind batch finished");
    report
}

async fn bind_one(
    binder: &dyn Binder,
    volumes: &dyn VolumeBinder,
    req: &BindRequest,
    retry: &RetryPolicy,
) -> Result<(), BindError> {
    if let Some(pod_volumes) = &req.task.pod_volumes {
        let bound = match volumes.bind_volumes(&req.task, pod_volumes).await {
            Ok(()) => volumes.dynamic_provisions(&req.task, pod_volumes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = bound {
            volumes.revert_volumes(&req.task, pod_volumes);
            return Err(e.into());
        }
    }

    let what = format!("bind {} to {}", req.task.key(), req.node);
    let pod = &req.task.pod;
    let node = req.node.as_str();
    retry_on_conflict(retry, &what, move || binder.bind(pod, node)).await
}
