//! Node-level predicates beyond resource fit: cordoned nodes, taints,
//! pod-count limits and pod anti-affinity.

use gangway_api::{FitReason, NodeInfo, TaintEffect, TaskInfo};
use gangway_framework::{Arguments, Plugin};

pub const NAME: &str = "predicates";

pub fn build(_: &Arguments) -> Box<dyn Plugin> {
    Box::new(PredicatesPlugin)
}

pub struct PredicatesPlugin;

fn check_taints(task: &TaskInfo, node: &NodeInfo) -> Result<(), FitReason> {
    let Some(object) = &node.node else {
        return Ok(());
    };
    if object.unschedulable {
        return Err(FitReason::NodeUnschedulable);
    }
    let tolerations = &task.pod.spec.tolerations;
    for taint in &object.taints {
        if taint.effect == TaintEffect::PreferNoSchedule {
            continue;
        }
        if !tolerations.iter().any(|t| t.tolerates(taint)) {
            return Err(FitReason::UntoleratedTaint(taint.key.clone()));
        }
    }
    Ok(())
}

/// Anti-affinity is symmetric: the incoming pod must not select a pod on
/// the node, and no pod on the node may select the incoming pod.
fn check_anti_affinity(task: &TaskInfo, node: &NodeInfo) -> Result<(), FitReason> {
    let incoming = task
        .pod
        .spec
        .affinity
        .as_ref()
        .and_then(|a| a.pod_anti_affinity.as_ref());
    let labels = &task.pod.metadata.labels;

    for existing in node.tasks.values().filter(|t| t.status.occupies_node()) {
        if incoming.is_some_and(|aa| aa.selects(&existing.pod.metadata.labels)) {
            return Err(FitReason::PodAntiAffinity);
        }
        let theirs = existing
            .pod
            .spec
            .affinity
            .as_ref()
            .and_then(|a| a.pod_anti_affinity.as_ref());
        if theirs.is_some_and(|aa| aa.selects(labels)) {
            return Err(FitReason::PodAntiAffinity);
        }
    }
    Ok(())
}

impl Plugin for PredicatesPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn predicate(&self, task: &TaskInfo, node: &NodeInfo) -> Option<Result<(), FitReason>> {
        let result = check_taints(task, node).and_then(|()| {
            if node.max_pods > 0 && node.pods_num() >= node.max_pods {
                return Err(FitReason::TooManyPods);
            }
            check_anti_affinity(task, node)
        });
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use gangway_api::builders::*;
    use gangway_api::{
        Affinity, PodAntiAffinity, PodPhase, Quantity, Taint, Toleration, TolerationOperator,
    };

    fn node() -> NodeInfo {
        NodeInfo::new(&build_node(
            "n1",
            build_resource_list(&[("cpu", "4"), ("memory", "8G")]),
            BTreeMap::new(),
        ))
    }

    fn pod(name: &str, pod_labels: &[(&str, &str)]) -> TaskInfo {
        TaskInfo::new(&build_pod(
            "ns",
            name,
            "",
            PodPhase::Pending,
            build_resource_list(&[("cpu", "1"), ("memory", "1G")]),
            "pg",
            labels(pod_labels),
            BTreeMap::new(),
        ))
    }

    fn check(task: &TaskInfo, node: &NodeInfo) -> Result<(), FitReason> {
        PredicatesPlugin.predicate(task, node).unwrap_or(Ok(()))
    }

    #[test]
    fn cordoned_node_rejects() {
        let mut n = node();
        if let Some(object) = n.node.as_mut() {
            object.unschedulable = true;
        }
        assert_eq!(check(&pod("p1", &[]), &n), Err(FitReason::NodeUnschedulable));
    }

    #[test]
    fn taints_need_tolerations() {
        let mut n = node();
        if let Some(object) = n.node.as_mut() {
            object.taints.push(Taint {
                key: "gpu".to_string(),
                value: Some("true".to_string()),
                effect: TaintEffect::NoSchedule,
            });
        }
        let mut task = pod("p1", &[]);
        assert_eq!(
            check(&task, &n),
            Err(FitReason::UntoleratedTaint("gpu".to_string()))
        );

        task.pod.spec.tolerations.push(Toleration {
            key: Some("gpu".to_string()),
            operator: TolerationOperator::Exists,
            value: None,
            effect: None,
        });
        assert_eq!(check(&task, &n), Ok(()));
    }

    #[test]
    fn pod_limit_is_enforced() {
        let mut object = build_node(
            "n1",
            build_resource_list(&[("cpu", "4"), ("memory", "8G")]),
            BTreeMap::new(),
        );
        object
            .allocatable
            .insert("pods".to_string(), Quantity::parse("1").unwrap());
        let mut n = NodeInfo::new(&object);
        let mut running = pod("p0", &[]);
        running.status = gangway_api::TaskStatus::Running;
        n.add_task(&running).unwrap();
        assert_eq!(check(&pod("p1", &[]), &n), Err(FitReason::TooManyPods));
    }

    #[test]
    fn anti_affinity_is_symmetric() {
        let mut n = node();
        let mut running = pod("web-0", &[("app", "web")]);
        running.status = gangway_api::TaskStatus::Running;
        running.pod.spec.affinity = Some(Affinity {
            node_affinity: None,
            pod_anti_affinity: Some(PodAntiAffinity {
                match_labels: labels(&[("app", "web")]),
            }),
        });
        n.add_task(&running).unwrap();

        assert_eq!(
            check(&pod("web-1", &[("app", "web")]), &n),
            Err(FitReason::PodAntiAffinity)
        );
        assert_eq!(check(&pod("db-0", &[("app", "db")]), &n), Ok(()));
    }
}
