//! gangway-api: resource model and scheduling info for the gangway batch scheduler.
//!
//! Two layers live here:
//!
//! - **Cluster objects** (`objects`): the scheduler's view of Nodes, Pods,
//!   PodGroups, Queues and storage objects, deserializable from manifests.
//! - **Scheduling info** (`TaskInfo`, `JobInfo`, `NodeInfo`, `QueueInfo`):
//!   the denormalized per-cycle records the cache snapshots and the session
//!   mutates while it makes placement decisions.
//!
//! # Architecture
//!
//! ```text
//! Pod ──────► TaskInfo ──┐
//! PodGroup ─► JobInfo ◄──┘ (tasks keyed by uid, gang size = min_member)
//! Node ─────► NodeInfo     (idle = allocatable - used)
//! Queue ────► QueueInfo
//! ```

pub mod error;
pub mod fit_error;
pub mod job_info;
pub mod node_info;
pub mod objects;
pub mod quantity;
pub mod queue_info;
pub mod resource;
pub mod task_info;
pub mod volume;

#[cfg(any(test, feature = "test-util"))]
pub mod builders;

pub use error::{ApiError, ApiResult};
pub use fit_error::{FitError, FitErrors, FitReason};
pub use job_info::{JobId, JobInfo};
pub use node_info::NodeInfo;
pub use objects::*;
pub use quantity::{Quantity, ResourceList};
pub use queue_info::{QueueId, QueueInfo};
pub use resource::{CPU, MEMORY, MIN_RESOURCE, PODS, Resource, dominant_share, share};
pub use task_info::{TaskId, TaskInfo, TaskStatus};
pub use volume::{PodVolumes, StaticBinding};
