//! TaskInfo: the scheduler's view of one pod.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::job_info::JobId;
use crate::objects::{Pod, PodPhase};
use crate::resource::Resource;
use crate::volume::PodVolumes;

pub type TaskId = String;

/// Placement status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting for a node.
    Pending,
    /// Placed on a node within the current session.
    Allocated,
    /// Placed, but its job is held below gang readiness.
    Pipelined,
    /// Bind dispatched, result outstanding.
    Binding,
    /// Bind confirmed.
    Bound,
    Running,
    /// Terminating; still holds its node resources.
    Releasing,
    Succeeded,
    Failed,
    Unknown,
}

impl TaskStatus {
    /// Counted towards a job's allocation and gang readiness.
    pub fn is_allocated(self) -> bool {
        matches!(self, Self::Allocated | Self::Binding | Self::Bound | Self::Running)
    }

    /// Holds resources on the node it is assigned to.
    pub fn occupies_node(self) -> bool {
        self.is_allocated() || matches!(self, Self::Pipelined | Self::Releasing)
    }

    pub fn from_pod(pod: &Pod) -> Self {
        match pod.phase {
            PodPhase::Pending if pod.spec.node_name.is_some() => Self::Bound,
            PodPhase::Pending => Self::Pending,
            PodPhase::Running if pod.terminating => Self::Releasing,
            PodPhase::Running => Self::Running,
            PodPhase::Succeeded => Self::Succeeded,
            PodPhase::Failed => Self::Failed,
            PodPhase::Unknown => Self::Unknown,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskInfo {
    pub uid: TaskId,
    /// Owning job; empty for pods outside any PodGroup.
    pub job: JobId,
    pub namespace: String,
    pub name: String,
    pub node_name: Option<String>,
    pub status: TaskStatus,
    pub priority: i32,
    pub resreq: Resource,
    pub pod: Pod,
    /// Volume decision made when the task was tentatively placed.
    pub pod_volumes: Option<PodVolumes>,
}

impl TaskInfo {
    pub fn new(pod: &Pod) -> Self {
        let meta = &pod.metadata;
        let job = pod
            .group_name()
            .map(|group| format!("{}/{}", meta.namespace, group))
            .unwrap_or_default();

        Self {
            uid: meta.uid_or_key(),
            job,
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
            node_name: pod.spec.node_name.clone(),
            status: TaskStatus::from_pod(pod),
            priority: pod.spec.priority.unwrap_or(0),
            resreq: Resource::from_list(&pod.spec.requests),
            pod: pod.clone(),
            pod_volumes: None,
        }
    }

    /// `namespace/name`, the identity external observers use.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn creation_timestamp(&self) -> u64 {
        self.pod.metadata.creation_timestamp
    }

    pub fn has_volume_claims(&self) -> bool {
        !self.pod.spec.volume_claims.is_empty()
    }
}
