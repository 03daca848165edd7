//! Cluster manifest: the objects a dry run starts from.
//!
//! ```toml
//! [[nodes]]
//! name = "n1"
//! allocatable = { cpu = "4", memory = "8Gi", pods = "110" }
//!
//! [[queues]]
//! name = "default"
//! weight = 1
//!
//! [[pod_groups]]
//! name = "train"
//! queue = "default"
//! min_member = 2
//!
//! [[pods]]
//! name = "train-0"
//! group = "train"
//! requests = { cpu = "1", memory = "1Gi" }
//! ```
//!
//! Pods with a `node` are running there; the rest are pending. Namespaces
//! default to `default`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use gangway_api::{
    GROUP_NAME_ANNOTATION, Node, ObjectMeta, PersistentVolumeClaim, Pod, PodGroup, PodGroupPhase,
    PodPhase, Quantity, Queue, ResourceList, StorageClass, Taint, Toleration, VolumeBindingMode,
};
use gangway_cache::ClusterEvent;
use gangway_cache::recording::InMemoryVolumeBinder;

fn default_namespace() -> String {
    "default".to_string()
}

fn one() -> u32 {
    1
}

fn inqueue() -> PodGroupPhase {
    PodGroupPhase::Inqueue
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClusterManifest {
    pub nodes: Vec<NodeEntry>,
    pub queues: Vec<QueueEntry>,
    pub pod_groups: Vec<PodGroupEntry>,
    pub pods: Vec<PodEntry>,
    pub storage_classes: Vec<StorageClassEntry>,
    pub claims: Vec<ClaimEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeEntry {
    pub name: String,
    pub allocatable: ResourceList,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default)]
    pub unschedulable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueEntry {
    pub name: String,
    #[serde(default = "one")]
    pub weight: u32,
    pub capability: Option<ResourceList>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PodGroupEntry {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    pub queue: String,
    #[serde(default = "one")]
    pub min_member: u32,
    pub priority: Option<i32>,
    #[serde(default = "inqueue")]
    pub phase: PodGroupPhase,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PodEntry {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    pub group: String,
    #[serde(default)]
    pub requests: ResourceList,
    pub node: Option<String>,
    pub priority: Option<i32>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub claims: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageClassEntry {
    pub name: String,
    pub provisioner: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimEntry {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    pub storage_class: String,
    pub size: Quantity,
}

impl ClusterManifest {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading cluster manifest {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing cluster manifest {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Events that load the manifest into an empty cache, parents first.
    /// Pod groups and pods are created in file order.
    pub fn events(&self) -> Vec<ClusterEvent> {
        let nodes = self.nodes.iter().map(|n| ClusterEvent::AddNode(n.to_node()));
        let queues = self.queues.iter().map(|q| ClusterEvent::AddQueue(q.to_queue()));
        let groups = (1..)
            .zip(&self.pod_groups)
            .map(|(seq, pg)| ClusterEvent::AddPodGroup(pg.to_pod_group(seq)));
        let pods = (1..)
            .zip(&self.pods)
            .map(|(seq, p)| ClusterEvent::AddPod(p.to_pod(seq)));
        nodes.chain(queues).chain(groups).chain(pods).collect()
    }

    /// A volume binder that knows the manifest's claims and storage classes.
    pub fn volume_binder(&self) -> InMemoryVolumeBinder {
        let binder = InMemoryVolumeBinder::new();
        for class in &self.storage_classes {
            binder.add_storage_class(class.to_storage_class());
        }
        for claim in &self.claims {
            binder.add_claim(claim.to_claim());
        }
        binder
    }
}

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: namespace.to_string(),
        name: name.to_string(),
        uid: if namespace.is_empty() {
            name.to_string()
        } else {
            format!("{namespace}-{name}")
        },
        ..ObjectMeta::default()
    }
}

impl NodeEntry {
    fn to_node(&self) -> Node {
        let mut metadata = meta("", &self.name);
        metadata.labels = self.labels.clone();
        Node {
            metadata,
            capacity: self.allocatable.clone(),
            allocatable: self.allocatable.clone(),
            taints: self.taints.clone(),
            unschedulable: self.unschedulable,
        }
    }
}

impl QueueEntry {
    fn to_queue(&self) -> Queue {
        let mut queue = Queue {
            metadata: meta("", &self.name),
            ..Queue::default()
        };
        queue.spec.weight = self.weight;
        queue.spec.capability = self.capability.clone();
        queue
    }
}

impl PodGroupEntry {
    fn to_pod_group(&self, seq: u64) -> PodGroup {
        let mut pg = PodGroup {
            metadata: ObjectMeta {
                creation_timestamp: seq,
                ..meta(&self.namespace, &self.name)
            },
            ..PodGroup::default()
        };
        pg.spec.queue = self.queue.clone();
        pg.spec.min_member = self.min_member;
        pg.spec.priority = self.priority;
        pg.status.phase = self.phase;
        pg
    }
}

impl PodEntry {
    fn to_pod(&self, seq: u64) -> Pod {
        let mut pod = Pod {
            metadata: ObjectMeta {
                creation_timestamp: seq,
                ..meta(&self.namespace, &self.name)
            },
            ..Pod::default()
        };
        pod.metadata.labels = self.labels.clone();
        pod.metadata
            .annotations
            .insert(GROUP_NAME_ANNOTATION.to_string(), self.group.clone());
        pod.spec.node_name = self.node.clone();
        pod.spec.priority = self.priority;
        pod.spec.requests = self.requests.clone();
        pod.spec.node_selector = self.node_selector.clone();
        pod.spec.tolerations = self.tolerations.clone();
        pod.spec.volume_claims = self.claims.clone();
        pod.phase = if self.node.is_some() {
            PodPhase::Running
        } else {
            PodPhase::Pending
        };
        pod
    }
}

impl StorageClassEntry {
    fn to_storage_class(&self) -> StorageClass {
        StorageClass {
            metadata: meta("", &self.name),
            provisioner: self.provisioner.clone(),
            binding_mode: VolumeBindingMode::WaitForFirstConsumer,
        }
    }
}

impl ClaimEntry {
    fn to_claim(&self) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: meta(&self.namespace, &self.name),
            storage_class_name: Some(self.storage_class.clone()),
            requests: BTreeMap::from([("storage".to_string(), self.size.clone())]),
            ..PersistentVolumeClaim::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
        [[nodes]]
        name = "n1"
        allocatable = { cpu = "2", memory = "4Gi" }
        labels = { zone = "a" }

        [[queues]]
        name = "q1"

        [[pod_groups]]
        namespace = "c1"
        name = "job"
        queue = "q1"
        min_member = 2

        [[pods]]
        namespace = "c1"
        name = "p1"
        group = "job"
        requests = { cpu = "1", memory = "1Gi" }
        claims = ["data"]

        [[pods]]
        namespace = "c1"
        name = "p0"
        group = "job"
        requests = { cpu = "500m" }
        node = "n1"

        [[storage_classes]]
        name = "standard"
        provisioner = "csi.example.com"

        [[claims]]
        namespace = "c1"
        name = "data"
        storage_class = "standard"
        size = "1Gi"
    "#;

    #[test]
    fn parses_objects_with_defaults() {
        let manifest = ClusterManifest::from_toml_str(MANIFEST).unwrap();
        assert_eq!(manifest.queues[0].weight, 1);
        assert_eq!(manifest.pod_groups[0].phase, PodGroupPhase::Inqueue);

        let node = manifest.nodes[0].to_node();
        assert_eq!(node.allocatable["cpu"].value(), 2.0);
        assert_eq!(node.metadata.labels["zone"], "a");

        let running = manifest.pods[1].to_pod(2);
        assert_eq!(running.phase, PodPhase::Running);
        assert_eq!(running.spec.requests["cpu"].value(), 0.5);
        assert_eq!(running.metadata.annotations[GROUP_NAME_ANNOTATION], "job");
        assert_eq!(manifest.pods[0].to_pod(1).phase, PodPhase::Pending);
    }

    #[test]
    fn events_put_parents_first() {
        let manifest = ClusterManifest::from_toml_str(MANIFEST).unwrap();
        let kinds: Vec<&str> = manifest.events().iter().map(ClusterEvent::kind).collect();
        assert_eq!(
            kinds,
            vec!["add-node", "add-queue", "add-podgroup", "add-pod", "add-pod"]
        );
    }

    #[test]
    fn claims_reach_the_volume_binder() {
        let manifest = ClusterManifest::from_toml_str(MANIFEST).unwrap();
        let binder = manifest.volume_binder();
        let claim = binder.claim("c1/data").unwrap();
        assert_eq!(claim.storage_class_name.as_deref(), Some("standard"));
        assert!(claim.volume_name.is_none());
    }

    #[test]
    fn bad_quantity_is_rejected() {
        let err = ClusterManifest::from_toml_str(
            r#"
            [[nodes]]
            name = "n1"
            allocatable = { cpu = "two" }
            "#,
        );
        assert!(err.is_err());
    }
}
