//! Gang scheduling: a job is ready only once `min_available` of its tasks
//! are placed, and victims are never taken from a job that would drop
//! below its gang size.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::debug;

use gangway_api::{JobId, JobInfo, TaskId, TaskInfo};
use gangway_framework::{Arguments, Plugin, SessionState, ValidateResult, Vote};

pub const NAME: &str = "gang";

pub const NOT_ENOUGH_PODS: &str = "NotEnoughPods";

pub fn build(_: &Arguments) -> Box<dyn Plugin> {
    Box::new(GangPlugin::default())
}

#[derive(Debug, Clone, Copy, Default)]
struct Gang {
    ready: u32,
    min: u32,
}

#[derive(Default)]
pub struct GangPlugin {
    gangs: BTreeMap<JobId, Gang>,
}

impl GangPlugin {
    fn refresh(&mut self, state: &SessionState, job: &str) {
        if let Some(info) = state.jobs.get(job) {
            self.gangs.insert(
                job.to_string(),
                Gang {
                    ready: info.ready_task_num(),
                    min: info.min_available,
                },
            );
        }
    }

    fn victims(&self, candidates: &[&TaskInfo]) -> Vec<TaskId> {
        let mut occupied: BTreeMap<&str, Gang> = BTreeMap::new();
        let mut victims = Vec::new();
        for task in candidates {
            let Some(gang) = self.gangs.get(&task.job) else {
                continue;
            };
            let slot = occupied.entry(task.job.as_str()).or_insert(*gang);
            if slot.ready > slot.min {
                slot.ready -= 1;
                victims.push(task.uid.clone());
            }
        }
        victims
    }
}

impl Plugin for GangPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn on_session_open(&mut self, state: &SessionState) {
        for id in state.jobs.keys() {
            self.refresh(state, id);
        }
    }

    fn on_session_close(&mut self, _: &SessionState) {
        let unready = self.gangs.values().filter(|g| g.ready < g.min).count();
        debug!(unready, jobs = self.gangs.len(), "gang session closed");
    }

    fn on_allocate(&mut self, state: &SessionState, task: &TaskInfo) {
        self.refresh(state, &task.job);
    }

    fn on_deallocate(&mut self, state: &SessionState, task: &TaskInfo) {
        self.refresh(state, &task.job);
    }

    /// Jobs still short of their gang go before jobs already running.
    fn job_order(&self, l: &JobInfo, r: &JobInfo) -> Option<Ordering> {
        Some(l.is_ready().cmp(&r.is_ready()))
    }

    fn job_valid(&self, job: &JobInfo) -> Option<ValidateResult> {
        let valid = job.valid_task_num();
        if valid < job.min_available {
            return Some(ValidateResult::fail(
                NOT_ENOUGH_PODS,
                format!(
                    "not enough valid tasks for gang-scheduling, valid: {valid}, min: {}",
                    job.min_available
                ),
            ));
        }
        Some(ValidateResult::pass())
    }

    fn job_ready(&self, job: &JobInfo) -> Option<bool> {
        Some(job.is_ready())
    }

    fn job_pipelined(&self, job: &JobInfo) -> Option<Vote> {
        Some(if job.is_pipelined() {
            Vote::Permit
        } else {
            Vote::Reject
        })
    }

    fn preemptable(&self, _: &TaskInfo, preemptees: &[&TaskInfo]) -> Option<Vec<TaskId>> {
        Some(self.victims(preemptees))
    }

    fn reclaimable(&self, _: &TaskInfo, reclaimees: &[&TaskInfo]) -> Option<Vec<TaskId>> {
        Some(self.victims(reclaimees))
    }
}
