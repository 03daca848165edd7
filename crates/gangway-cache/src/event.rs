//! Cluster change events consumed by the cache.

use gangway_api::{Node, Pod, PodGroup, Queue};

/// One add/update/delete notification from the cluster watch.
///
/// Deletes carry the last known object, matching what a watch delivers.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    AddNode(Node),
    UpdateNode(Node),
    DeleteNode(Node),
    AddPod(Pod),
    UpdatePod(Pod),
    DeletePod(Pod),
    AddPodGroup(PodGroup),
    UpdatePodGroup(PodGroup),
    DeletePodGroup(PodGroup),
    AddQueue(Queue),
    UpdateQueue(Queue),
    DeleteQueue(Queue),
}

impl ClusterEvent {
    /// Short label for logs, e.g. `add-pod`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AddNode(_) => "add-node",
            Self::UpdateNode(_) => "update-node",
            Self::DeleteNode(_) => "delete-node",
            Self::AddPod(_) => "add-pod",
            Self::UpdatePod(_) => "update-pod",
            Self::DeletePod(_) => "delete-pod",
            Self::AddPodGroup(_) => "add-podgroup",
            Self::UpdatePodGroup(_) => "update-podgroup",
            Self::DeletePodGroup(_) => "delete-podgroup",
            Self::AddQueue(_) => "add-queue",
            Self::UpdateQueue(_) => "update-queue",
            Self::DeleteQueue(_) => "delete-queue",
        }
    }
}
