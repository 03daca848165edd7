//! Explicit priority: higher priority jobs and tasks go first, and may
//! preempt strictly lower priority tasks.

use std::cmp::Ordering;

use gangway_api::{JobInfo, TaskId, TaskInfo};
use gangway_framework::{Arguments, Plugin};

pub const NAME: &str = "priority";

pub fn build(_: &Arguments) -> Box<dyn Plugin> {
    Box::new(PriorityPlugin)
}

pub struct PriorityPlugin;

impl Plugin for PriorityPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn job_order(&self, l: &JobInfo, r: &JobInfo) -> Option<Ordering> {
        Some(r.priority.cmp(&l.priority))
    }

    fn task_order(&self, l: &TaskInfo, r: &TaskInfo) -> Option<Ordering> {
        Some(r.priority.cmp(&l.priority))
    }

    fn preemptable(&self, preemptor: &TaskInfo, preemptees: &[&TaskInfo]) -> Option<Vec<TaskId>> {
        Some(
            preemptees
                .iter()
                .filter(|victim| victim.priority < preemptor.priority)
                .map(|victim| victim.uid.clone())
                .collect(),
        )
    }
}
