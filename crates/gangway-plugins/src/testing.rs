//! Small cluster fixtures for plugin tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use gangway_api::builders::*;
use gangway_api::{JobInfo, NodeInfo, PodPhase, QueueInfo, TaskInfo};
use gangway_cache::Snapshot;
use gangway_cache::recording::InMemoryVolumeBinder;
use gangway_framework::{PluginOption, Session, Tier, open_session};

/// One task of a fixture job: `(name, cpu, memory, node)`. An empty node
/// leaves the task pending; otherwise it is running there.
pub type TaskRow<'a> = (&'a str, &'a str, &'a str, &'a str);

#[derive(Default)]
pub struct Cluster {
    snap: Snapshot,
}

impl Cluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, name: &str, cpu: &str, memory: &str) -> Self {
        let node = build_node(
            name,
            build_resource_list(&[("cpu", cpu), ("memory", memory)]),
            BTreeMap::new(),
        );
        self.snap.nodes.insert(name.to_string(), NodeInfo::new(&node));
        self
    }

    pub fn queue(mut self, name: &str, weight: u32) -> Self {
        self.snap
            .queues
            .insert(name.to_string(), QueueInfo::new(&build_queue(name, weight)));
        self
    }

    pub fn job(mut self, name: &str, queue: &str, min: u32, priority: i32, tasks: &[TaskRow<'_>]) -> Self {
        let mut pg = build_pod_group("ns", name, queue, min);
        pg.spec.priority = Some(priority);
        let mut job = JobInfo::new(pg.metadata.key());
        job.set_pod_group(&pg);

        for (task, cpu, memory, node) in tasks {
            let phase = if node.is_empty() {
                PodPhase::Pending
            } else {
                PodPhase::Running
            };
            let mut pod = build_pod(
                "ns",
                task,
                node,
                phase,
                build_resource_list(&[("cpu", cpu), ("memory", memory)]),
                name,
                BTreeMap::new(),
                BTreeMap::new(),
            );
            pod.spec.priority = Some(priority);
            let info = TaskInfo::new(&pod);
            if let Some(node) = self.snap.nodes.get_mut(*node) {
                node.add_task(&info).unwrap();
            }
            job.add_task(info).unwrap();
        }
        self.snap.jobs.insert(job.uid.clone(), job);
        self
    }

    pub fn snapshot(self) -> Snapshot {
        self.snap
    }

    /// Open a session with one tier holding `plugins`.
    pub fn open(self, plugins: &[PluginOption]) -> Session {
        open_snapshot(self.snap, plugins)
    }
}

/// Open a session over a hand-edited snapshot with one tier of `plugins`.
pub fn open_snapshot(snap: Snapshot, plugins: &[PluginOption]) -> Session {
    let tiers = vec![Tier {
        plugins: plugins.to_vec(),
    }];
    open_session(
        snap,
        &tiers,
        &crate::default_registry(),
        Arc::new(InMemoryVolumeBinder::new()),
    )
    .unwrap()
}

pub fn plugins(names: &[&str]) -> Vec<PluginOption> {
    names.iter().map(|n| PluginOption::new(n)).collect()
}
