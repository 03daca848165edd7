//! Weighted proportional sharing between queues.
//!
//! Each queue with work is granted a deserved share of the cluster by
//! water-filling: the remaining capacity is split by weight among queues
//! that still want more, a queue's grant is capped at what it requests (and
//! at its capability), and whatever a capped queue cannot use is split again
//! among the rest.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use gangway_api::{
    JobId, QueueId, QueueInfo, Resource, TaskId, TaskInfo, TaskStatus, share,
};
use gangway_framework::{Arguments, Plugin, SessionState};

pub const NAME: &str = "proportion";

pub fn build(_: &Arguments) -> Box<dyn Plugin> {
    Box::new(ProportionPlugin::default())
}

#[derive(Debug, Clone, Default)]
struct QueueAttr {
    weight: u32,
    capability: Option<Resource>,
    deserved: Resource,
    allocated: Resource,
    request: Resource,
    share: f64,
}

impl QueueAttr {
    fn update_share(&mut self) {
        let mut names = self.deserved.resource_names();
        names.extend(self.allocated.scalars.keys().cloned());
        self.share = names
            .iter()
            .map(|name| share(self.allocated.get(name), self.deserved.get(name)))
            .fold(0.0, f64::max);
    }
}

/// Clamp `deserved` to `cap` on the dimensions `cap` sets. True once every
/// such dimension is at its cap.
fn cap_at(deserved: &mut Resource, cap: &Resource) -> bool {
    let mut reached = true;
    for name in cap.resource_names() {
        if cap.is_zero(&name) {
            continue;
        }
        let limit = cap.get(&name);
        if deserved.get(&name) >= limit {
            deserved.set(&name, limit);
        } else {
            reached = false;
        }
    }
    reached
}

#[derive(Default)]
pub struct ProportionPlugin {
    total: Resource,
    queues: BTreeMap<QueueId, QueueAttr>,
    job_queues: BTreeMap<JobId, QueueId>,
}

impl ProportionPlugin {
    fn water_fill(&mut self) {
        let mut remaining = self.total.clone();
        let mut met: BTreeSet<QueueId> = BTreeSet::new();

        loop {
            let total_weight: u32 = self
                .queues
                .iter()
                .filter(|(name, _)| !met.contains(*name))
                .map(|(_, attr)| attr.weight)
                .sum();
            if total_weight == 0 {
                break;
            }

            let mut granted = Resource::empty();
            for (name, attr) in self.queues.iter_mut() {
                if met.contains(name) {
                    continue;
                }
                let before = attr.deserved.clone();

                let mut portion = remaining.clone();
                portion.multi(f64::from(attr.weight) / f64::from(total_weight));
                attr.deserved.add(&portion);

                attr.deserved.min_dimension(&attr.request);
                let capped = attr
                    .capability
                    .as_ref()
                    .is_some_and(|cap| cap_at(&mut attr.deserved, cap));
                if capped || attr.request.less_equal(&attr.deserved) {
                    met.insert(name.clone());
                }
                attr.update_share();

                let mut delta = attr.deserved.clone();
                delta.sub(&before);
                granted.add(&delta);
                debug!(
                    queue = %name,
                    deserved = %attr.deserved,
                    request = %attr.request,
                    "proportion grant"
                );
            }

            remaining.sub(&granted);
            if remaining.is_empty() || granted.is_empty() {
                break;
            }
        }
    }

    fn attr_of_job(&self, job: &str) -> Option<&QueueAttr> {
        self.queues.get(self.job_queues.get(job)?)
    }

    fn apply(&mut self, task: &TaskInfo, allocated: bool) {
        let Some(queue) = self.job_queues.get(&task.job) else {
            return;
        };
        let Some(attr) = self.queues.get_mut(queue) else {
            return;
        };
        if allocated {
            attr.allocated.add(&task.resreq);
        } else {
            attr.allocated.sub(&task.resreq);
        }
        attr.update_share();
    }
}

impl Plugin for ProportionPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn on_session_open(&mut self, state: &SessionState) {
        self.total = state.total_resource.clone();

        for job in state.jobs.values() {
            let Some(queue) = state.queues.get(&job.queue) else {
                continue;
            };
            self.job_queues.insert(job.uid.clone(), queue.name.clone());
            let attr = self
                .queues
                .entry(queue.name.clone())
                .or_insert_with(|| QueueAttr {
                    weight: queue.weight,
                    capability: queue.capability.clone(),
                    ..QueueAttr::default()
                });

            for task in job.tasks.values() {
                if task.status.is_allocated() {
                    attr.allocated.add(&task.resreq);
                    attr.request.add(&task.resreq);
                } else if task.status == TaskStatus::Pending {
                    attr.request.add(&task.resreq);
                }
            }
        }

        self.water_fill();
    }

    fn on_allocate(&mut self, _: &SessionState, task: &TaskInfo) {
        self.apply(task, true);
    }

    fn on_deallocate(&mut self, _: &SessionState, task: &TaskInfo) {
        self.apply(task, false);
    }

    fn queue_order(&self, l: &QueueInfo, r: &QueueInfo) -> Option<Ordering> {
        let (l, r) = (self.queues.get(&l.name)?, self.queues.get(&r.name)?);
        Some(l.share.partial_cmp(&r.share).unwrap_or(Ordering::Equal))
    }

    fn overused(&self, queue: &QueueInfo) -> Option<bool> {
        let attr = self.queues.get(&queue.name)?;
        let overused = attr.deserved.less_equal(&attr.allocated);
        if overused {
            debug!(queue = %queue.name, deserved = %attr.deserved, allocated = %attr.allocated, "queue overused");
        }
        Some(overused)
    }

    fn allocatable(&self, queue: &QueueInfo, task: &TaskInfo) -> Option<bool> {
        let attr = self.queues.get(&queue.name)?;
        let mut future = attr.allocated.clone();
        future.add(&task.resreq);
        let fits = future.less_equal_with_dimension(&attr.deserved, &task.resreq);
        if !fits {
            debug!(
                queue = %queue.name,
                task = %task.key(),
                deserved = %attr.deserved,
                allocated = %attr.allocated,
                "task exceeds queue deserved share"
            );
        }
        Some(fits)
    }

    /// Only queues holding more than they deserve give up tasks.
    fn reclaimable(&self, _: &TaskInfo, reclaimees: &[&TaskInfo]) -> Option<Vec<TaskId>> {
        let mut remaining: BTreeMap<&str, Resource> = BTreeMap::new();
        let mut victims = Vec::new();
        for victim in reclaimees {
            let Some(queue) = self.job_queues.get(&victim.job) else {
                continue;
            };
            let Some(attr) = self.attr_of_job(&victim.job) else {
                continue;
            };
            let allocated = remaining
                .entry(queue.as_str())
                .or_insert_with(|| attr.allocated.clone());
            if allocated.less_equal(&attr.deserved) {
                continue;
            }
            allocated.sub(&victim.resreq);
            victims.push(victim.uid.clone());
        }
        Some(victims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Cluster, plugins};
    use gangway_framework::Statement;

    const G: f64 = 1_000_000_000.0;

    #[test]
    fn equal_weights_split_evenly() {
        let ssn = Cluster::new()
            .node("n1", "2", "4G")
            .queue("q1", 1)
            .queue("q2", 1)
            .job("a", "q1", 1, 0, &[("a1", "1", "1G", ""), ("a2", "1", "1G", "")])
            .job("b", "q2", 1, 0, &[("b1", "1", "1G", ""), ("b2", "1", "1G", "")])
            .open(&plugins(&[NAME]));
        let q1 = &ssn.state.queues["q1"];
        let a1 = &ssn.state.jobs["ns/a"].tasks["ns-a1"];
        assert!(ssn.allocatable(q1, a1));
        assert!(!ssn.overused(q1));
    }

    #[test]
    fn deserved_capped_at_request_and_redistributed() {
        let mut plugin = ProportionPlugin::default();
        plugin.total = Resource::new(6000.0, 6.0 * G);
        for (name, weight, cpu) in [("small", 1, 1000.0), ("big", 1, 6000.0)] {
            plugin.queues.insert(
                name.to_string(),
                QueueAttr {
                    weight,
                    request: Resource::new(cpu, G),
                    ..QueueAttr::default()
                },
            );
        }
        plugin.water_fill();
        let small = &plugin.queues["small"].deserved;
        let big = &plugin.queues["big"].deserved;
        assert_eq!(small.milli_cpu, 1000.0);
        assert_eq!(big.milli_cpu, 5000.0);
        assert_eq!(big.memory, G);
    }

    #[test]
    fn capability_bounds_deserved() {
        let mut plugin = ProportionPlugin::default();
        plugin.total = Resource::new(4000.0, 4.0 * G);
        plugin.queues.insert(
            "capped".to_string(),
            QueueAttr {
                weight: 1,
                capability: Some(Resource::new(1000.0, G)),
                request: Resource::new(4000.0, 4.0 * G),
                ..QueueAttr::default()
            },
        );
        plugin.water_fill();
        assert_eq!(plugin.queues["capped"].deserved, Resource::new(1000.0, G));
    }

    #[test]
    fn allocation_beyond_deserved_is_refused() {
        let mut ssn = Cluster::new()
            .node("n1", "2", "4G")
            .queue("q1", 1)
            .queue("q2", 1)
            .job("a", "q1", 1, 0, &[("a1", "1", "1G", ""), ("a2", "1", "1G", "")])
            .job("b", "q2", 1, 0, &[("b1", "1", "1G", "")])
            .open(&plugins(&[NAME]));

        let mut stmt = Statement::new("ns/a");
        stmt.allocate(&mut ssn, "ns-a1", "n1").unwrap();
        let q1 = ssn.state.queues["q1"].clone();
        let q2 = ssn.state.queues["q2"].clone();
        let a2 = ssn.state.jobs["ns/a"].tasks["ns-a2"].clone();
        assert!(!ssn.allocatable(&q1, &a2));
        assert_eq!(ssn.queue_order(&q2, &q1), Ordering::Less);
    }

    #[test]
    fn reclaims_only_above_deserved() {
        let ssn = Cluster::new()
            .node("n1", "4", "8G")
            .queue("q1", 1)
            .queue("q2", 1)
            .job("a", "q1", 1, 0, &[("a1", "1", "1G", "n1"), ("a2", "1", "1G", "n1"), ("a3", "1", "1G", "n1")])
            .job("b", "q2", 1, 0, &[("b1", "2", "1G", ""), ("b2", "1", "1G", "")])
            .open(&plugins(&[NAME]));
        // q1 deserves 2 cpu and holds 3, so one task can go.
        let a = &ssn.state.jobs["ns/a"];
        let candidates: Vec<&TaskInfo> = a.tasks.values().collect();
        let reclaimer = &ssn.state.jobs["ns/b"].tasks["ns-b1"];
        assert_eq!(ssn.reclaimable(reclaimer, &candidates), vec!["ns-a1".to_string()]);
    }
}
