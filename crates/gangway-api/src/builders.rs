//! Terse constructors for cluster objects, shared by test suites.
//!
//! Quantities are given as strings and parsed eagerly; a malformed literal
//! in a test is a bug in the test, so these builders panic on it.

use std::collections::BTreeMap;

use crate::objects::{
    GROUP_NAME_ANNOTATION, Node, ObjectMeta, PersistentVolumeClaim, Pod, PodGroup, PodGroupPhase,
    PodPhase, Queue, StorageClass, VolumeBindingMode,
};
use crate::quantity::{Quantity, ResourceList};

/// Build a resource list from `(name, quantity)` pairs.
pub fn build_resource_list(pairs: &[(&str, &str)]) -> ResourceList {
    pairs
        .iter()
        .map(|(name, q)| {
            let quantity = Quantity::parse(q)
                .unwrap_or_else(|e| panic!("bad quantity {q:?} for {name}: {e}"));
            (name.to_string(), quantity)
        })
        .collect()
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn build_node(name: &str, allocatable: ResourceList, node_labels: BTreeMap<String, String>) -> Node {
    Node {
        metadata: ObjectMeta {
            name: name.to_string(),
            uid: name.to_string(),
            labels: node_labels,
            ..ObjectMeta::default()
        },
        capacity: allocatable.clone(),
        allocatable,
        ..Node::default()
    }
}

/// A pod in `namespace` belonging to PodGroup `group`. An empty `node_name`
/// leaves the pod unassigned.
#[allow(clippy::too_many_arguments)]
pub fn build_pod(
    namespace: &str,
    name: &str,
    node_name: &str,
    phase: PodPhase,
    requests: ResourceList,
    group: &str,
    pod_labels: BTreeMap<String, String>,
    node_selector: BTreeMap<String, String>,
) -> Pod {
    let mut pod = Pod::default();
    pod.metadata = ObjectMeta {
        namespace: namespace.to_string(),
        name: name.to_string(),
        uid: format!("{namespace}-{name}"),
        labels: pod_labels,
        ..ObjectMeta::default()
    };
    if !group.is_empty() {
        pod.metadata
            .annotations
            .insert(GROUP_NAME_ANNOTATION.to_string(), group.to_string());
    }
    if !node_name.is_empty() {
        pod.spec.node_name = Some(node_name.to_string());
    }
    pod.spec.requests = requests;
    pod.spec.node_selector = node_selector;
    pod.phase = phase;
    pod
}

/// A pending, unassigned pod that mounts the given claims.
pub fn build_pod_with_claims(
    namespace: &str,
    name: &str,
    requests: ResourceList,
    group: &str,
    claims: &[&str],
) -> Pod {
    let mut pod = build_pod(
        namespace,
        name,
        "",
        PodPhase::Pending,
        requests,
        group,
        BTreeMap::new(),
        BTreeMap::new(),
    );
    pod.spec.volume_claims = claims.iter().map(|c| c.to_string()).collect();
    pod
}

/// An admitted (`Inqueue`) PodGroup.
pub fn build_pod_group(namespace: &str, name: &str, queue: &str, min_member: u32) -> PodGroup {
    let mut pg = PodGroup::default();
    pg.metadata.namespace = namespace.to_string();
    pg.metadata.name = name.to_string();
    pg.metadata.uid = format!("{namespace}-{name}");
    pg.spec.queue = queue.to_string();
    pg.spec.min_member = min_member;
    pg.status.phase = PodGroupPhase::Inqueue;
    pg
}

pub fn build_queue(name: &str, weight: u32) -> Queue {
    let mut queue = Queue::default();
    queue.metadata.name = name.to_string();
    queue.metadata.uid = name.to_string();
    queue.spec.weight = weight;
    queue
}

/// An unbound claim that will be provisioned from `storage_class`.
pub fn build_claim(namespace: &str, name: &str, storage_class: &str, size: &str) -> PersistentVolumeClaim {
    let mut claim = PersistentVolumeClaim::default();
    claim.metadata.namespace = namespace.to_string();
    claim.metadata.name = name.to_string();
    claim.storage_class_name = Some(storage_class.to_string());
    claim.requests = build_resource_list(&[("storage", size)]);
    claim
}

pub fn build_storage_class(name: &str, provisioner: &str) -> StorageClass {
    let mut sc = StorageClass::default();
    sc.metadata.name = name.to_string();
    sc.provisioner = provisioner.to_string();
    sc.binding_mode = VolumeBindingMode::WaitForFirstConsumer;
    sc
}
