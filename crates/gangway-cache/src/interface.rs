//! Seams to the external collaborators: the bind API, the status writer and
//! the volume binder.
//!
//! Calls that cross the network return boxed futures so the traits stay
//! object-safe and can be shared as `Arc<dyn ...>` across bind workers.

use std::future::Future;
use std::pin::Pin;

use gangway_api::{NodeInfo, Pod, PodGroup, PodVolumes, Queue, TaskInfo};

use crate::error::{BindError, VolumeError};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Assigns a pod to a node.
pub trait Binder: Send + Sync {
    fn bind<'a>(&'a self, pod: &'a Pod, node: &'a str) -> BoxFuture<'a, Result<(), BindError>>;
}

/// Writes PodGroup and Queue status. Implementations report conflicts as
/// [`BindError::Conflict`] so callers can retry them.
pub trait StatusUpdater: Send + Sync {
    fn update_pod_group<'a>(&'a self, pg: &'a PodGroup) -> BoxFuture<'a, Result<(), BindError>>;

    fn update_queue_status<'a>(&'a self, queue: &'a Queue) -> BoxFuture<'a, Result<(), BindError>>;
}

/// Storage side of a placement.
///
/// `get_pod_volumes`, `allocate_volumes` and `revert_volumes` run inside a
/// scheduling cycle and only touch in-memory reservations. `bind_volumes`
/// and `dynamic_provisions` perform the durable writes and run on the bind
/// path, static bindings first.
pub trait VolumeBinder: Send + Sync {
    /// Decide how each of the task's claims would be satisfied on `node`.
    fn get_pod_volumes(&self, task: &TaskInfo, node: &NodeInfo) -> Result<PodVolumes, VolumeError>;

    /// Reserve the decided volumes for the task.
    fn allocate_volumes(
        &self,
        task: &TaskInfo,
        node: &str,
        volumes: &PodVolumes,
    ) -> Result<(), VolumeError>;

    /// Drop reservations made by `allocate_volumes`.
    fn revert_volumes(&self, task: &TaskInfo, volumes: &PodVolumes);

    /// Bind claims to the existing volumes chosen for them.
    fn bind_volumes<'a>(
        &'a self,
        task: &'a TaskInfo,
        volumes: &'a PodVolumes,
    ) -> BoxFuture<'a, Result<(), VolumeError>>;

    /// Request new volumes for the claims no existing volume satisfies.
    fn dynamic_provisions<'a>(
        &'a self,
        task: &'a TaskInfo,
        volumes: &'a PodVolumes,
    ) -> BoxFuture<'a, Result<(), VolumeError>>;
}
