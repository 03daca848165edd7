//! End-to-end allocate scenarios and allocation invariants.

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use tokio::sync::watch;

use gangway_api::builders::*;
use gangway_api::{
    JobInfo, Node, NodeInfo, Pod, PodGroup, PodPhase, Queue, QueueInfo, Resource, TaskInfo,
};
use gangway_cache::recording::{
    ALLOCATE_VOLUMES, DYNAMIC_PROVISIONS, GET_POD_VOLUMES, InMemoryVolumeBinder, REVERT_VOLUMES,
    RecordingBinder, RecordingStatusUpdater,
};
use gangway_cache::{ClusterEvent, SchedulerCache, Snapshot};
use gangway_framework::{
    Capability, PluginOption, SchedulerConfiguration, Session, Tier, open_session,
};
use gangway_plugins::default_registry;
use gangway_scheduler::{Action, Allocate, Scheduler, SchedulerConfig};

const NS: &str = "c1";

/// A small cluster described by its objects.
#[derive(Default, Clone)]
struct Fixture {
    nodes: Vec<Node>,
    queues: Vec<Queue>,
    groups: Vec<PodGroup>,
    pods: Vec<Pod>,
}

impl Fixture {
    fn new() -> Self {
        Self::default()
    }

    fn node(mut self, name: &str, cpu: &str, memory: &str) -> Self {
        self.nodes.push(build_node(
            name,
            build_resource_list(&[("cpu", cpu), ("memory", memory)]),
            BTreeMap::new(),
        ));
        self
    }

    fn queue(mut self, name: &str, weight: u32) -> Self {
        self.queues.push(build_queue(name, weight));
        self
    }

    fn group(self, name: &str, queue: &str, min: u32) -> Self {
        self.group_in(NS, name, queue, min)
    }

    fn group_in(mut self, namespace: &str, name: &str, queue: &str, min: u32) -> Self {
        self.groups.push(build_pod_group(namespace, name, queue, min));
        self
    }

    fn pod(self, name: &str, group: &str, cpu: &str, memory: &str) -> Self {
        self.pod_in(NS, name, group, cpu, memory)
    }

    fn pod_in(mut self, namespace: &str, name: &str, group: &str, cpu: &str, memory: &str) -> Self {
        self.pods.push(build_pod(
            namespace,
            name,
            "",
            PodPhase::Pending,
            build_resource_list(&[("cpu", cpu), ("memory", memory)]),
            group,
            BTreeMap::new(),
            BTreeMap::new(),
        ));
        self
    }

    fn pod_with_claim(mut self, name: &str, group: &str, cpu: &str, claim: &str) -> Self {
        self.pods.push(build_pod_with_claims(
            NS,
            name,
            build_resource_list(&[("cpu", cpu), ("memory", "1Gi")]),
            group,
            &[claim],
        ));
        self
    }

    fn snapshot(&self) -> Snapshot {
        let mut snap = Snapshot::default();
        for node in &self.nodes {
            snap.nodes
                .insert(node.metadata.name.clone(), NodeInfo::new(node));
        }
        for queue in &self.queues {
            snap.queues
                .insert(queue.metadata.name.clone(), QueueInfo::new(queue));
        }
        for pg in &self.groups {
            let mut job = JobInfo::new(pg.metadata.key());
            job.set_pod_group(pg);
            snap.jobs.insert(job.uid.clone(), job);
        }
        for pod in &self.pods {
            let task = TaskInfo::new(pod);
            if let Some(job) = snap.jobs.get_mut(&task.job) {
                job.add_task(task).unwrap();
            }
        }
        snap
    }

    async fn cache(&self) -> SchedulerCache {
        let cache = SchedulerCache::new();
        let events = self
            .nodes
            .iter()
            .cloned()
            .map(ClusterEvent::AddNode)
            .chain(self.queues.iter().cloned().map(ClusterEvent::AddQueue))
            .chain(self.groups.iter().cloned().map(ClusterEvent::AddPodGroup))
            .chain(self.pods.iter().cloned().map(ClusterEvent::AddPod));
        for event in events {
            cache.apply(event).await.unwrap();
        }
        cache
    }

    /// Run one full cycle with the default policy and return the binds.
    async fn schedule(&self, volumes: Arc<InMemoryVolumeBinder>) -> BTreeMap<String, String> {
        self.schedule_with(SchedulerConfig::default(), volumes).await
    }

    async fn schedule_with(
        &self,
        config: SchedulerConfig,
        volumes: Arc<InMemoryVolumeBinder>,
    ) -> BTreeMap<String, String> {
        let binder = Arc::new(RecordingBinder::new());
        let scheduler = Scheduler::new(
            self.cache().await,
            config,
            default_registry(),
            binder.clone(),
            volumes,
            Arc::new(RecordingStatusUpdater::new()),
        )
        .unwrap();
        let (_tx, cancel) = watch::channel(false);
        scheduler.run_once(&cancel).await.unwrap();
        binder.binds()
    }

    /// Open a session with the default policy and run allocate over it.
    fn allocate(&self) -> Session {
        let mut ssn = open_session(
            self.snapshot(),
            &SchedulerConfiguration::default().tiers,
            &default_registry(),
            Arc::new(InMemoryVolumeBinder::new()),
        )
        .unwrap();
        Allocate.execute(&mut ssn);
        ssn
    }
}

fn expected(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(task, node)| (task.to_string(), node.to_string()))
        .collect()
}

fn placements(ssn: &Session) -> BTreeMap<String, String> {
    ssn.binds()
        .iter()
        .map(|b| (b.task.key(), b.node.clone()))
        .collect()
}

#[tokio::test]
async fn one_job_fills_one_node() {
    let binds = Fixture::new()
        .node("n1", "2", "4Gi")
        .queue("q1", 1)
        .group("job", "q1", 1)
        .pod("task-a", "job", "1", "1Gi")
        .pod("task-b", "job", "1", "1Gi")
        .schedule(Arc::new(InMemoryVolumeBinder::new()))
        .await;
    assert_eq!(binds, expected(&[("c1/task-a", "n1"), ("c1/task-b", "n1")]));
}

#[tokio::test]
async fn two_queues_interleave_on_one_node() {
    let binds = Fixture::new()
        .node("n1", "2", "4Gi")
        .queue("qa", 1)
        .queue("qb", 1)
        .group("ja", "qa", 1)
        .group("jb", "qb", 1)
        .pod("a1", "ja", "1", "1Gi")
        .pod("a2", "ja", "1", "1Gi")
        .pod("b1", "jb", "1", "1Gi")
        .pod("b2", "jb", "1", "1Gi")
        .schedule(Arc::new(InMemoryVolumeBinder::new()))
        .await;
    assert_eq!(binds, expected(&[("c1/a1", "n1"), ("c1/b1", "n1")]));
}

#[tokio::test]
async fn unschedulable_queue_does_not_block_others() {
    let binds = Fixture::new()
        .node("n1", "2", "4Gi")
        .queue("q1", 1)
        .queue("q2", 1)
        .group("big", "q1", 1)
        .group("small", "q2", 1)
        .pod("huge", "big", "3", "1Gi")
        .pod("task", "small", "1", "1Gi")
        .schedule(Arc::new(InMemoryVolumeBinder::new()))
        .await;
    assert_eq!(binds, expected(&[("c1/task", "n1")]));
}

fn volume_binder() -> Arc<InMemoryVolumeBinder> {
    let volumes = Arc::new(InMemoryVolumeBinder::new());
    volumes.add_storage_class(build_storage_class("standard", "csi.example.com"));
    volumes.add_claim(build_claim(NS, "data", "standard", "1Gi"));
    volumes
}

#[tokio::test]
async fn dynamic_claim_is_provisioned_and_bound() {
    let volumes = volume_binder();
    let binds = Fixture::new()
        .node("n1", "2", "4Gi")
        .queue("q1", 1)
        .group("pvc", "q1", 1)
        .pod_with_claim("p1", "pvc", "1", "data")
        .schedule(volumes.clone())
        .await;

    assert_eq!(binds, expected(&[("c1/p1", "n1")]));
    assert_eq!(
        volumes.actions("c1/p1"),
        vec![GET_POD_VOLUMES, ALLOCATE_VOLUMES, DYNAMIC_PROVISIONS]
    );
    assert!(volumes.claim("c1/data").unwrap().volume_name.is_some());
}

#[tokio::test]
async fn claim_is_reverted_when_gang_cannot_fit() {
    let volumes = volume_binder();
    let binds = Fixture::new()
        .node("n1", "2", "4Gi")
        .queue("q1", 1)
        .group("pvc", "q1", 2)
        .pod_with_claim("p1", "pvc", "1", "data")
        .pod("p2", "pvc", "3", "1Gi")
        .schedule(volumes.clone())
        .await;

    assert!(binds.is_empty());
    assert_eq!(
        volumes.actions("c1/p1"),
        vec![GET_POD_VOLUMES, ALLOCATE_VOLUMES, REVERT_VOLUMES]
    );
    assert!(volumes.actions("c1/p2").is_empty());
    assert!(volumes.claim("c1/data").unwrap().volume_name.is_none());
}

/// A single-tier allocate policy.
fn single_tier(plugins: Vec<PluginOption>) -> SchedulerConfig {
    SchedulerConfig {
        policy: SchedulerConfiguration {
            actions: vec!["allocate".to_string()],
            tiers: vec![Tier { plugins }],
        },
        ..SchedulerConfig::default()
    }
}

/// drf orders jobs, proportion orders queues; nothing else is enabled.
fn fairness_only() -> SchedulerConfig {
    single_tier(vec![
        PluginOption::with_only("drf", &[Capability::JobOrder, Capability::Preemptable]),
        PluginOption::with_only(
            "proportion",
            &[Capability::QueueOrder, Capability::Reclaimable],
        ),
    ])
}

/// priority and gang deciding readiness, pipelining, predicates and task order.
fn gang_only() -> SchedulerConfig {
    let caps = [
        Capability::JobReady,
        Capability::Predicate,
        Capability::JobPipelined,
        Capability::TaskOrder,
    ];
    single_tier(vec![
        PluginOption::with_only("priority", &caps),
        PluginOption::with_only("gang", &caps),
    ])
}

#[tokio::test]
async fn fairness_tier_fills_one_node() {
    let binds = Fixture::new()
        .node("n1", "2", "4Gi")
        .queue("c1", 1)
        .group("pg1", "c1", 0)
        .pod("p1", "pg1", "1", "1G")
        .pod("p2", "pg1", "1", "1G")
        .schedule_with(fairness_only(), Arc::new(InMemoryVolumeBinder::new()))
        .await;
    assert_eq!(binds, expected(&[("c1/p1", "n1"), ("c1/p2", "n1")]));
}

#[tokio::test]
async fn fairness_tier_interleaves_namespaced_queues() {
    let binds = Fixture::new()
        .node("n1", "2", "4G")
        .queue("c1", 1)
        .queue("c2", 1)
        .group_in("c1", "pg1", "c1", 0)
        .group_in("c2", "pg2", "c2", 0)
        .pod_in("c1", "pg1-p-1", "pg1", "1", "1G")
        .pod_in("c1", "pg1-p-2", "pg1", "1", "1G")
        .pod_in("c2", "pg2-p-1", "pg2", "1", "1G")
        .pod_in("c2", "pg2-p-2", "pg2", "1", "1G")
        .schedule_with(fairness_only(), Arc::new(InMemoryVolumeBinder::new()))
        .await;
    assert_eq!(
        binds,
        expected(&[("c2/pg2-p-1", "n1"), ("c1/pg1-p-1", "n1")])
    );
}

#[tokio::test]
async fn fairness_tier_skips_oversized_queue() {
    let binds = Fixture::new()
        .node("n1", "2", "4G")
        .queue("c1", 1)
        .queue("c2", 1)
        .group("pg1", "c1", 0)
        .group("pg2", "c2", 0)
        .pod("p1", "pg1", "3", "1G")
        .pod("p2", "pg2", "1", "1G")
        .schedule_with(fairness_only(), Arc::new(InMemoryVolumeBinder::new()))
        .await;
    assert_eq!(binds, expected(&[("c1/p2", "n1")]));
}

fn two_claim_binder() -> Arc<InMemoryVolumeBinder> {
    let volumes = Arc::new(InMemoryVolumeBinder::new());
    volumes.add_storage_class(build_storage_class("standard", "csi.example.com"));
    volumes.add_claim(build_claim(NS, "pvc", "standard", "1Gi"));
    volumes.add_claim(build_claim(NS, "pvc1", "standard", "1Gi"));
    volumes
}

fn two_claim_gang(node: &str, cpu: &str) -> Fixture {
    Fixture::new()
        .node(node, cpu, "4Gi")
        .queue("c1", 1)
        .group("pg1", "c1", 2)
        .pod_with_claim("p1", "pg1", "1", "pvc")
        .pod_with_claim("p2", "pg1", "1", "pvc1")
}

#[tokio::test]
async fn gang_tier_reverts_claim_on_small_node() {
    let volumes = two_claim_binder();
    let binds = two_claim_gang("n1", "1")
        .schedule_with(gang_only(), volumes.clone())
        .await;

    assert!(binds.is_empty());
    assert_eq!(
        volumes.actions("c1/p1"),
        vec![GET_POD_VOLUMES, ALLOCATE_VOLUMES, REVERT_VOLUMES]
    );
    assert!(volumes.actions("c1/p2").is_empty());
}

#[tokio::test]
async fn gang_tier_provisions_both_claims_on_large_node() {
    let volumes = two_claim_binder();
    let binds = two_claim_gang("n2", "2")
        .schedule_with(gang_only(), volumes.clone())
        .await;

    assert_eq!(binds, expected(&[("c1/p1", "n2"), ("c1/p2", "n2")]));
    for task in ["c1/p1", "c1/p2"] {
        assert_eq!(
            volumes.actions(task),
            vec![GET_POD_VOLUMES, ALLOCATE_VOLUMES, DYNAMIC_PROVISIONS]
        );
    }
}

#[test]
fn incomplete_gang_releases_its_resources() {
    let fixture = Fixture::new()
        .node("n1", "2", "4Gi")
        .queue("q1", 1)
        .group("gang", "q1", 2)
        .pod("t1", "gang", "1", "1Gi")
        .pod("t2", "gang", "3", "1Gi");
    let before = fixture.snapshot().nodes["n1"].idle.clone();

    let ssn = fixture.allocate();
    assert_eq!(ssn.state.nodes["n1"].idle, before);
    let outcome = ssn.close();
    assert!(outcome.binds.is_empty());
}

#[test]
fn same_snapshot_gives_same_placements() {
    let fixture = Fixture::new()
        .node("n1", "4", "8Gi")
        .node("n2", "4", "8Gi")
        .queue("q1", 2)
        .queue("q2", 1)
        .group("j1", "q1", 2)
        .group("j2", "q2", 1)
        .group("j3", "q1", 1)
        .pod("a", "j1", "2", "1Gi")
        .pod("b", "j1", "2", "2Gi")
        .pod("c", "j2", "1", "1Gi")
        .pod("d", "j2", "3", "1Gi")
        .pod("e", "j3", "1", "4Gi");

    let first = placements(&fixture.allocate());
    let second = placements(&fixture.allocate());
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

/// `(cpu per node)` and `(min, [cpu per task])` per job.
fn cluster_strategy() -> impl Strategy<Value = (Vec<u32>, Vec<(u32, Vec<u32>)>)> {
    let nodes = prop::collection::vec(2u32..=4, 1..=3);
    let job = prop::collection::vec(1u32..=3, 1..=4)
        .prop_flat_map(|tasks| (1..=tasks.len() as u32, Just(tasks)));
    let jobs = prop::collection::vec(job, 1..=5);
    (nodes, jobs)
}

fn random_fixture(nodes: &[u32], jobs: &[(u32, Vec<u32>)]) -> Fixture {
    let mut fixture = Fixture::new().queue("q1", 1).queue("q2", 1);
    for (i, cpu) in nodes.iter().enumerate() {
        fixture = fixture.node(&format!("n{i}"), &cpu.to_string(), "16Gi");
    }
    for (j, (min, tasks)) in jobs.iter().enumerate() {
        let group = format!("j{j}");
        let queue = if j % 2 == 0 { "q1" } else { "q2" };
        fixture = fixture.group(&group, queue, *min);
        for (t, cpu) in tasks.iter().enumerate() {
            fixture = fixture.pod(&format!("j{j}-t{t}"), &group, &cpu.to_string(), "1Gi");
        }
    }
    fixture
}

proptest! {
    #[test]
    fn binds_respect_node_capacity_and_gangs((nodes, jobs) in cluster_strategy()) {
        let fixture = random_fixture(&nodes, &jobs);
        let snapshot = fixture.snapshot();
        let outcome = fixture.allocate().close();

        let mut used: BTreeMap<String, Resource> = BTreeMap::new();
        let mut per_job: BTreeMap<String, u32> = BTreeMap::new();
        for bind in &outcome.binds {
            used.entry(bind.node.clone()).or_default().add(&bind.task.resreq);
            *per_job.entry(bind.task.job.clone()).or_default() += 1;
        }
        for (node, request) in &used {
            prop_assert!(request.less_equal(&snapshot.nodes[node].allocatable));
        }
        for (job, bound) in &per_job {
            prop_assert!(*bound >= snapshot.jobs[job].min_available);
        }
    }

    #[test]
    fn equal_queues_interleave(tasks in 1u32..=6, capacity in 1u32..=8) {
        let mut fixture = Fixture::new()
            .node("n1", &capacity.to_string(), "64Gi")
            .queue("q1", 1)
            .queue("q2", 1)
            .group("j1", "q1", 1)
            .group("j2", "q2", 1);
        for t in 0..tasks {
            fixture = fixture
                .pod(&format!("a{t}"), "j1", "1", "1Gi")
                .pod(&format!("b{t}"), "j2", "1", "1Gi");
        }
        let ssn = fixture.allocate();

        let count = |job: &str| ssn.binds().iter().filter(|b| b.task.job == job).count() as i64;
        let (q1, q2) = (count("c1/j1"), count("c1/j2"));
        prop_assert!((q1 - q2).abs() <= 1, "q1 {} q2 {}", q1, q2);
    }
}
