//! Dominant resource fairness.
//!
//! Each job and queue carries its allocation and the dominant share of that
//! allocation over the cluster total. Lower shares order first. Queue shares
//! are divided by the queue weight, so equal-weight queues interleave and a
//! heavier queue is allowed proportionally more before it yields.
//!
//! A job whose pending tasks ask for a resource the cluster has none of
//! counts as holding a full share, so it orders behind every job that can
//! still make progress.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::trace;

use gangway_api::{
    JobId, JobInfo, QueueId, QueueInfo, Resource, TaskId, TaskInfo, dominant_share,
};
use gangway_framework::{Arguments, Plugin, SessionState};

pub const NAME: &str = "drf";

/// Shares closer than this compare equal.
const SHARE_DELTA: f64 = 0.000_001;

pub fn build(_: &Arguments) -> Box<dyn Plugin> {
    Box::new(DrfPlugin::default())
}

#[derive(Debug, Clone, Default)]
struct Attr {
    allocated: Resource,
    dominant: String,
    share: f64,
    /// A requested resource the cluster does not offer at all.
    unavailable: Option<String>,
}

impl Attr {
    fn order_share(&self) -> f64 {
        if self.unavailable.is_some() {
            self.share.max(1.0)
        } else {
            self.share
        }
    }
}

/// First resource the job's pending tasks request that `total` lacks.
fn unavailable_resource(job: &JobInfo, total: &Resource) -> Option<String> {
    let mut request = Resource::empty();
    for task in job.pending_tasks() {
        request.add(&task.resreq);
    }
    request
        .resource_names()
        .into_iter()
        .find(|name| !request.is_zero(name) && total.is_zero(name))
}

#[derive(Default)]
pub struct DrfPlugin {
    total: Resource,
    jobs: BTreeMap<JobId, Attr>,
    queues: BTreeMap<QueueId, Attr>,
    weights: BTreeMap<QueueId, u32>,
}

fn compare(l: f64, r: f64) -> Ordering {
    if (l - r).abs() < SHARE_DELTA {
        Ordering::Equal
    } else if l < r {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

impl DrfPlugin {
    fn update(total: &Resource, attr: &mut Attr) {
        let (dominant, share) = dominant_share(&attr.allocated, total);
        attr.dominant = dominant;
        attr.share = share;
    }

    fn queue_share(&self, queue: &str) -> Option<f64> {
        let attr = self.queues.get(queue)?;
        let weight = self.weights.get(queue).copied().unwrap_or(1).max(1);
        Some(attr.share / f64::from(weight))
    }

    fn apply(&mut self, state: &SessionState, task: &TaskInfo, allocated: bool) {
        let Some(job) = state.jobs.get(&task.job) else {
            return;
        };
        let change = |attr: &mut Attr| {
            if allocated {
                attr.allocated.add(&task.resreq);
            } else {
                attr.allocated.sub(&task.resreq);
            }
        };

        let job_attr = self.jobs.entry(job.uid.clone()).or_default();
        change(job_attr);
        Self::update(&self.total, job_attr);

        let queue_attr = self.queues.entry(job.queue.clone()).or_default();
        change(queue_attr);
        Self::update(&self.total, queue_attr);

        if let Some(attr) = self.jobs.get(&job.uid) {
            trace!(job = %job.uid, dominant = %attr.dominant, share = attr.share, "drf share updated");
        }
    }
}

impl Plugin for DrfPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn on_session_open(&mut self, state: &SessionState) {
        self.total = state.total_resource.clone();
        for queue in state.queues.values() {
            self.weights.insert(queue.name.clone(), queue.weight);
        }
        for job in state.jobs.values() {
            let mut attr = Attr {
                allocated: job.allocated.clone(),
                unavailable: unavailable_resource(job, &self.total),
                ..Attr::default()
            };
            Self::update(&self.total, &mut attr);
            if let Some(resource) = &attr.unavailable {
                trace!(job = %job.uid, %resource, "job requests a resource the cluster lacks");
            }

            let queue = self.queues.entry(job.queue.clone()).or_default();
            queue.allocated.add(&job.allocated);
            Self::update(&self.total, queue);

            self.jobs.insert(job.uid.clone(), attr);
        }
    }

    fn on_allocate(&mut self, state: &SessionState, task: &TaskInfo) {
        self.apply(state, task, true);
    }

    fn on_deallocate(&mut self, state: &SessionState, task: &TaskInfo) {
        self.apply(state, task, false);
    }

    fn job_order(&self, l: &JobInfo, r: &JobInfo) -> Option<Ordering> {
        let (l, r) = (self.jobs.get(&l.uid)?, self.jobs.get(&r.uid)?);
        Some(compare(l.order_share(), r.order_share()))
    }

    fn queue_order(&self, l: &QueueInfo, r: &QueueInfo) -> Option<Ordering> {
        let (l, r) = (self.queue_share(&l.name)?, self.queue_share(&r.name)?);
        Some(compare(l, r))
    }

    /// A victim qualifies when the preemptor's job, with the new task, would
    /// still hold no more than the victim's job after losing the victim.
    fn preemptable(&self, preemptor: &TaskInfo, preemptees: &[&TaskInfo]) -> Option<Vec<TaskId>> {
        let mut grown = self
            .jobs
            .get(&preemptor.job)
            .map(|a| a.allocated.clone())
            .unwrap_or_default();
        grown.add(&preemptor.resreq);
        let (_, ls) = dominant_share(&grown, &self.total);

        let mut shrunk: BTreeMap<&str, Resource> = BTreeMap::new();
        let mut victims = Vec::new();
        for victim in preemptees {
            let Some(attr) = self.jobs.get(&victim.job) else {
                continue;
            };
            let allocated = shrunk
                .entry(victim.job.as_str())
                .or_insert_with(|| attr.allocated.clone());
            let mut after = allocated.clone();
            after.sub(&victim.resreq);
            let (_, rs) = dominant_share(&after, &self.total);
            if ls < rs || (ls - rs).abs() <= SHARE_DELTA {
                *allocated = after;
                victims.push(victim.uid.clone());
            }
        }
        Some(victims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Cluster, open_snapshot, plugins};
    use gangway_framework::Statement;

    #[test]
    fn lower_share_orders_first_and_follows_allocations() {
        let mut ssn = Cluster::new()
            .node("n1", "4", "8G")
            .queue("q1", 1)
            .job("a", "q1", 1, 0, &[("a1", "2", "1G", "n1")])
            .job("b", "q1", 1, 0, &[("b1", "1", "1G", ""), ("b2", "1", "1G", "")])
            .open(&plugins(&[NAME]));
        let order = |ssn: &gangway_framework::Session| {
            ssn.job_order(&ssn.state.jobs["ns/a"], &ssn.state.jobs["ns/b"])
        };
        assert_eq!(order(&ssn), Ordering::Greater);

        let mut stmt = Statement::new("ns/b");
        stmt.allocate(&mut ssn, "ns-b1", "n1").unwrap();
        // a holds 2/4 of the cpu, b 1/4.
        assert_eq!(order(&ssn), Ordering::Greater);
        stmt.allocate(&mut ssn, "ns-b2", "n1").unwrap();
        assert_eq!(order(&ssn), Ordering::Equal);

        stmt.discard(&mut ssn);
        assert_eq!(order(&ssn), Ordering::Greater);
    }

    #[test]
    fn queue_share_is_weighted() {
        let ssn = Cluster::new()
            .node("n1", "4", "8G")
            .queue("heavy", 2)
            .queue("light", 1)
            .job("h", "heavy", 1, 0, &[("h1", "2", "1G", "n1")])
            .job("l", "light", 1, 0, &[("l1", "1", "1G", "n1")])
            .open(&plugins(&[NAME]));
        let (heavy, light) = (&ssn.state.queues["heavy"], &ssn.state.queues["light"]);
        assert_eq!(ssn.queue_order(heavy, light), Ordering::Equal);
    }

    #[test]
    fn preempts_only_from_richer_jobs() {
        let ssn = Cluster::new()
            .node("n1", "4", "8G")
            .queue("q1", 1)
            .job("rich", "q1", 1, 0, &[("r1", "1", "1G", "n1"), ("r2", "1", "1G", "n1"), ("r3", "1", "1G", "n1")])
            .job("poor", "q1", 1, 0, &[("p1", "1", "1G", "")])
            .open(&plugins(&[NAME]));
        let rich = &ssn.state.jobs["ns/rich"];
        let candidates: Vec<&TaskInfo> = rich.tasks.values().collect();
        let preemptor = &ssn.state.jobs["ns/poor"].tasks["ns-p1"];
        // Poor grows to 1/4; rich shrinks 3/4 -> 2/4 -> 1/4 -> 0/4.
        assert_eq!(
            ssn.preemptable(preemptor, &candidates),
            vec!["ns-r1".to_string(), "ns-r2".to_string()]
        );
    }

    #[test]
    fn job_needing_missing_resource_orders_last() {
        let mut snap = Cluster::new()
            .node("n1", "4", "8G")
            .queue("q1", 1)
            .job("busy", "q1", 1, 0, &[("b1", "3", "1G", "n1"), ("b2", "1", "1G", "")])
            .job("gpu", "q1", 1, 0, &[("g1", "1", "1G", "")])
            .snapshot();
        if let Some(task) = snap.jobs.get_mut("ns/gpu").and_then(|j| j.task_mut("ns-g1")) {
            task.resreq = task.resreq.clone().with_scalar("nvidia.com/gpu", 1000.0);
        }
        let ssn = open_snapshot(snap, &plugins(&[NAME]));

        // busy holds 3/4 of the cpu, gpu holds nothing but cannot run here.
        let (busy, gpu) = (&ssn.state.jobs["ns/busy"], &ssn.state.jobs["ns/gpu"]);
        assert_eq!(ssn.job_order(gpu, busy), Ordering::Greater);
        assert_eq!(ssn.job_order(busy, gpu), Ordering::Less);
    }
}
