//! QueueInfo: the scheduler's view of one queue.

use crate::objects::{Queue, QueueState};
use crate::resource::Resource;

pub type QueueId = String;

#[derive(Debug, Clone, PartialEq)]
pub struct QueueInfo {
    pub uid: QueueId,
    pub name: String,
    pub weight: u32,
    /// Hard upper bound on what the queue may be granted.
    pub capability: Option<Resource>,
    pub reclaimable: bool,
    pub state: QueueState,
    pub queue: Queue,
}

impl QueueInfo {
    pub fn new(queue: &Queue) -> Self {
        Self {
            uid: queue.metadata.name.clone(),
            name: queue.metadata.name.clone(),
            weight: queue.spec.weight,
            capability: queue.spec.capability.as_ref().map(Resource::from_list),
            reclaimable: queue.spec.reclaimable.unwrap_or(true),
            state: queue.status.state,
            queue: queue.clone(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == QueueState::Open
    }
}
