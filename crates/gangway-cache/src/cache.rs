//! SchedulerCache: the long-lived cluster view that seeds every cycle.
//!
//! The cache has a single writer (the event loop and the bind workers'
//! write-backs, serialized through one `RwLock`) and any number of snapshot
//! readers. A running cycle works on a deep copy taken by [`snapshot`], so it
//! never observes events that arrive while it runs.
//!
//! [`snapshot`]: SchedulerCache::snapshot

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, info, warn};

use gangway_api::{
    JobId, JobInfo, Node, NodeInfo, Pod, PodGroup, Queue, QueueId, QueueInfo, TaskInfo, TaskStatus,
};

use crate::binder::BindRequest;
use crate::error::{BindError, CacheError, CacheResult};
use crate::event::ClusterEvent;
use crate::interface::StatusUpdater;
use crate::retry::{RetryPolicy, retry_on_conflict};

/// Point-in-time copy of the cluster, owned by one scheduling cycle.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub nodes: BTreeMap<String, NodeInfo>,
    pub jobs: BTreeMap<JobId, JobInfo>,
    pub queues: BTreeMap<QueueId, QueueInfo>,
}

#[derive(Debug, Default)]
struct ClusterState {
    nodes: BTreeMap<String, NodeInfo>,
    jobs: BTreeMap<JobId, JobInfo>,
    queues: BTreeMap<QueueId, QueueInfo>,
}

/// Shared handle to the cluster cache. Cloning is cheap.
#[derive(Clone, Default)]
pub struct SchedulerCache {
    state: Arc<RwLock<ClusterState>>,
}

impl SchedulerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one cluster event.
    pub async fn apply(&self, event: ClusterEvent) -> CacheResult<()> {
        let kind = event.kind();
        let mut state = self.state.write().await;
        let result = match event {
            ClusterEvent::AddNode(node) | ClusterEvent::UpdateNode(node) => {
                state.set_node(&node);
                Ok(())
            }
            ClusterEvent::DeleteNode(node) => state.delete_node(&node),
            ClusterEvent::AddPod(pod) => state.add_pod(&pod),
            ClusterEvent::UpdatePod(pod) => state.update_pod(&pod),
            ClusterEvent::DeletePod(pod) => state.delete_pod(&pod).map(|_| ()),
            ClusterEvent::AddPodGroup(pg) | ClusterEvent::UpdatePodGroup(pg) => {
                state.set_pod_group(&pg);
                Ok(())
            }
            ClusterEvent::DeletePodGroup(pg) => state.delete_pod_group(&pg),
            ClusterEvent::AddQueue(queue) | ClusterEvent::UpdateQueue(queue) => {
                state.set_queue(&queue);
                Ok(())
            }
            ClusterEvent::DeleteQueue(queue) => state.delete_queue(&queue),
        };
        if result.is_ok() {
            debug!(event = kind, "cluster event applied");
        }
        result
    }

    /// Consume events until the channel closes or shutdown is signalled.
    pub async fn run_event_loop(
        &self,
        mut events: mpsc::Receiver<ClusterEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("cache event loop started");
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("event channel closed");
                        break;
                    };
                    let kind = event.kind();
                    if let Err(e) = self.apply(event).await {
                        warn!(event = kind, error = %e, "failed to apply cluster event");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("cache event loop shutting down");
                    break;
                }
            }
        }
        info!("cache event loop stopped");
    }

    /// Deep copy of the schedulable cluster state.
    ///
    /// Only nodes whose object has been observed are included. Jobs are
    /// included only when their PodGroup is known and names a known queue.
    pub async fn snapshot(&self) -> Snapshot {
        let state = self.state.read().await;

        let nodes = state
            .nodes
            .iter()
            .filter(|(_, n)| n.is_ready())
            .map(|(name, n)| (name.clone(), n.clone()))
            .collect();

        let mut jobs = BTreeMap::new();
        for (id, job) in &state.jobs {
            if job.pod_group.is_none() {
                debug!(job = %id, "skipping job without pod group");
                continue;
            }
            if !state.queues.contains_key(&job.queue) {
                warn!(job = %id, queue = %job.queue, "skipping job in unknown queue");
                continue;
            }
            jobs.insert(id.clone(), job.clone());
        }

        Snapshot {
            nodes,
            jobs,
            queues: state.queues.clone(),
        }
    }

    /// Move the tasks of a committed batch to `Binding`, all or nothing.
    ///
    /// Fails with [`CacheError::Inconsistent`] if any job, task or node the
    /// batch names has changed under the cycle; the live cache is untouched
    /// in that case.
    pub async fn reserve_binds(&self, requests: &[BindRequest]) -> CacheResult<()> {
        let mut state = self.state.write().await;

        let mut nodes: BTreeMap<String, NodeInfo> = BTreeMap::new();
        let mut jobs: BTreeMap<JobId, JobInfo> = BTreeMap::new();
        for req in requests {
            let job = match jobs.entry(req.task.job.clone()) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => {
                    let live = state.jobs.get(&req.task.job).ok_or_else(|| {
                        CacheError::Inconsistent(format!("job {} no longer cached", req.task.job))
                    })?;
                    e.insert(live.clone())
                }
            };
            let node = match nodes.entry(req.node.clone()) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => {
                    let live = state.nodes.get(&req.node).filter(|n| n.is_ready()).ok_or_else(|| {
                        CacheError::Inconsistent(format!("node {} no longer cached", req.node))
                    })?;
                    e.insert(live.clone())
                }
            };

            let mut task = match job.task(&req.task.uid) {
                Some(t) if t.status == TaskStatus::Pending => t.clone(),
                Some(t) => {
                    return Err(CacheError::Inconsistent(format!(
                        "task {} is {} in the cache",
                        t.key(),
                        t.status
                    )));
                }
                None => {
                    return Err(CacheError::Inconsistent(format!(
                        "task {} no longer cached",
                        req.task.key()
                    )));
                }
            };
            task.status = TaskStatus::Binding;
            task.pod_volumes = req.task.pod_volumes.clone();
            node.add_task(&task)
                .map_err(|e| CacheError::Inconsistent(e.to_string()))?;
            job.update_task_status(&task.uid, TaskStatus::Binding)?;
            if let Some(t) = job.task_mut(&task.uid) {
                t.node_name = Some(req.node.clone());
            }
        }

        state.nodes.extend(nodes);
        state.jobs.extend(jobs);
        Ok(())
    }

    /// Record a confirmed bind.
    pub async fn bind_succeeded(&self, job: &str, uid: &str, node: &str) -> CacheResult<()> {
        let mut state = self.state.write().await;
        let job_info = state
            .jobs
            .get_mut(job)
            .ok_or_else(|| CacheError::JobNotFound(job.to_string()))?;
        job_info.update_task_status(uid, TaskStatus::Bound)?;
        let task = job_info.task(uid).cloned();

        if let (Some(task), Some(node_info)) = (task, state.nodes.get_mut(node)) {
            node_info.update_task(&task)?;
        }
        Ok(())
    }

    /// Return a task whose bind failed to `Pending` so the next cycle retries it.
    pub async fn bind_failed(&self, job: &str, uid: &str, node: &str) -> CacheResult<()> {
        let mut state = self.state.write().await;
        if let Some(node_info) = state.nodes.get_mut(node) {
            if let Err(e) = node_info.remove_task(uid) {
                debug!(%node, task = %uid, error = %e, "failed task already gone from node");
            }
        }
        let job_info = state
            .jobs
            .get_mut(job)
            .ok_or_else(|| CacheError::JobNotFound(job.to_string()))?;
        job_info.update_task_status(uid, TaskStatus::Pending)?;
        if let Some(task) = job_info.task_mut(uid) {
            task.node_name = None;
            task.pod_volumes = None;
        }
        Ok(())
    }

    /// Write a PodGroup's status through `updater`, retrying conflicts, and
    /// keep the cache in step on success.
    pub async fn update_pod_group_status(
        &self,
        updater: &dyn StatusUpdater,
        pg: &PodGroup,
        retry: &RetryPolicy,
    ) -> Result<(), BindError> {
        let what = format!("podgroup {}", pg.metadata.key());
        retry_on_conflict(retry, &what, move || updater.update_pod_group(pg)).await?;

        let mut state = self.state.write().await;
        if let Some(job) = state.jobs.get_mut(&pg.metadata.key()) {
            job.set_pod_group(pg);
        }
        Ok(())
    }

    /// Write a Queue's status through `updater`, retrying conflicts.
    pub async fn update_queue_status(
        &self,
        updater: &dyn StatusUpdater,
        queue: &Queue,
        retry: &RetryPolicy,
    ) -> Result<(), BindError> {
        let what = format!("queue {}", queue.metadata.name);
        retry_on_conflict(retry, &what, move || updater.update_queue_status(queue)).await?;

        let mut state = self.state.write().await;
        if let Some(info) = state.queues.get_mut(&queue.metadata.name) {
            *info = QueueInfo::new(queue);
        }
        Ok(())
    }

    pub async fn node(&self, name: &str) -> Option<NodeInfo> {
        self.state.read().await.nodes.get(name).cloned()
    }

    pub async fn job(&self, id: &str) -> Option<JobInfo> {
        self.state.read().await.jobs.get(id).cloned()
    }

    pub async fn queue(&self, name: &str) -> Option<QueueInfo> {
        self.state.read().await.queues.get(name).cloned()
    }
}

impl ClusterState {
    fn set_node(&mut self, node: &Node) {
        let name = &node.metadata.name;
        self.nodes
            .entry(name.clone())
            .or_insert_with(|| NodeInfo::placeholder(name))
            .set_node(node);
    }

    fn delete_node(&mut self, node: &Node) -> CacheResult<()> {
        self.nodes
            .remove(&node.metadata.name)
            .map(|_| ())
            .ok_or_else(|| CacheError::NodeNotFound(node.metadata.name.clone()))
    }

    fn add_pod(&mut self, pod: &Pod) -> CacheResult<()> {
        let task = TaskInfo::new(pod);
        if let Some(node) = &task.node_name {
            self.nodes
                .entry(node.clone())
                .or_insert_with(|| NodeInfo::placeholder(node))
                .add_task(&task)?;
        }
        if !task.job.is_empty() {
            self.jobs
                .entry(task.job.clone())
                .or_insert_with(|| JobInfo::new(task.job.clone()))
                .add_task(task)?;
        }
        Ok(())
    }

    fn update_pod(&mut self, pod: &Pod) -> CacheResult<()> {
        if let Err(e) = self.delete_pod(pod) {
            debug!(pod = %pod.metadata.key(), error = %e, "updated pod was not cached");
        }
        self.add_pod(pod)
    }

    fn delete_pod(&mut self, pod: &Pod) -> CacheResult<TaskInfo> {
        let incoming = TaskInfo::new(pod);

        // The cached record knows where the task actually sits; the pod
        // object may predate a bind made by this scheduler.
        let cached = self
            .jobs
            .get_mut(&incoming.job)
            .and_then(|job| job.delete_task(&incoming.uid).ok());
        let node_name = cached
            .as_ref()
            .and_then(|t| t.node_name.clone())
            .or_else(|| incoming.node_name.clone());

        let from_node = match node_name {
            Some(name) => self
                .nodes
                .get_mut(&name)
                .and_then(|node| node.remove_task(&incoming.uid).ok()),
            None => None,
        };

        if let Some(job) = self.jobs.get(&incoming.job) {
            if job.pod_group.is_none() && job.tasks.is_empty() {
                self.jobs.remove(&incoming.job);
            }
        }

        cached.or(from_node).ok_or_else(|| {
            CacheError::Api(gangway_api::ApiError::TaskNotFound {
                owner: "cache".to_string(),
                task: incoming.key(),
            })
        })
    }

    fn set_pod_group(&mut self, pg: &PodGroup) {
        let id = pg.metadata.key();
        self.jobs
            .entry(id.clone())
            .or_insert_with(|| JobInfo::new(id))
            .set_pod_group(pg);
    }

    fn delete_pod_group(&mut self, pg: &PodGroup) -> CacheResult<()> {
        let id = pg.metadata.key();
        let job = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| CacheError::JobNotFound(id.clone()))?;
        job.unset_pod_group();
        if job.tasks.is_empty() {
            self.jobs.remove(&id);
        }
        Ok(())
    }

    fn set_queue(&mut self, queue: &Queue) {
        self.queues
            .insert(queue.metadata.name.clone(), QueueInfo::new(queue));
    }

    fn delete_queue(&mut self, queue: &Queue) -> CacheResult<()> {
        self.queues
            .remove(&queue.metadata.name)
            .map(|_| ())
            .ok_or_else(|| CacheError::QueueNotFound(queue.metadata.name.clone()))
    }
}
