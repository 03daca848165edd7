//! Node scoring.
//!
//! Three weighted components, each in `0..=100` except affinity:
//!
//! - **least requested**: prefer nodes with the most capacity left after
//!   placement, averaged over cpu and memory
//! - **balanced allocation**: prefer nodes whose cpu and memory utilization
//!   stay close to each other
//! - **node affinity**: sum of the weights of matching preferred terms

use gangway_api::{NodeInfo, TaskInfo};
use gangway_framework::{Arguments, Plugin};

pub const NAME: &str = "nodeorder";

pub const LEAST_REQUESTED_WEIGHT: &str = "leastrequested.weight";
pub const BALANCED_RESOURCE_WEIGHT: &str = "balancedresource.weight";
pub const NODE_AFFINITY_WEIGHT: &str = "nodeaffinity.weight";

const MAX_SCORE: f64 = 100.0;

pub fn build(args: &Arguments) -> Box<dyn Plugin> {
    Box::new(NodeOrderPlugin::new(args))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeOrderPlugin {
    least_requested: f64,
    balanced_resource: f64,
    node_affinity: f64,
}

impl NodeOrderPlugin {
    pub fn new(args: &Arguments) -> Self {
        Self {
            least_requested: args.get_f64(LEAST_REQUESTED_WEIGHT).unwrap_or(1.0),
            balanced_resource: args.get_f64(BALANCED_RESOURCE_WEIGHT).unwrap_or(1.0),
            node_affinity: args.get_f64(NODE_AFFINITY_WEIGHT).unwrap_or(1.0),
        }
    }
}

fn least_requested(task: &TaskInfo, node: &NodeInfo) -> f64 {
    let score = |capacity: f64, requested: f64| {
        if capacity <= 0.0 || requested > capacity {
            0.0
        } else {
            (capacity - requested) * MAX_SCORE / capacity
        }
    };
    let cpu = score(
        node.allocatable.milli_cpu,
        node.used.milli_cpu + task.resreq.milli_cpu,
    );
    let memory = score(node.allocatable.memory, node.used.memory + task.resreq.memory);
    (cpu + memory) / 2.0
}

fn balanced_allocation(task: &TaskInfo, node: &NodeInfo) -> f64 {
    let fraction = |capacity: f64, requested: f64| {
        if capacity <= 0.0 { 1.0 } else { requested / capacity }
    };
    let cpu = fraction(
        node.allocatable.milli_cpu,
        node.used.milli_cpu + task.resreq.milli_cpu,
    );
    let memory = fraction(node.allocatable.memory, node.used.memory + task.resreq.memory);
    if cpu >= 1.0 || memory >= 1.0 {
        return 0.0;
    }
    (1.0 - (cpu - memory).abs()) * MAX_SCORE
}

fn preferred_affinity(task: &TaskInfo, node: &NodeInfo) -> f64 {
    let Some(affinity) = task
        .pod
        .spec
        .affinity
        .as_ref()
        .and_then(|a| a.node_affinity.as_ref())
    else {
        return 0.0;
    };
    affinity
        .preferred
        .iter()
        .filter(|term| term.preference.matches(node.labels()))
        .map(|term| f64::from(term.weight))
        .sum()
}

impl Plugin for NodeOrderPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn node_order(&self, task: &TaskInfo, node: &NodeInfo) -> Option<f64> {
        Some(
            least_requested(task, node) * self.least_requested
                + balanced_allocation(task, node) * self.balanced_resource
                + preferred_affinity(task, node) * self.node_affinity,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use gangway_api::builders::*;
    use gangway_api::{
        Affinity, NodeAffinity, NodeSelectorRequirement, NodeSelectorTerm, PodPhase,
        PreferredSchedulingTerm, SelectorOperator, TaskStatus,
    };

    fn node(name: &str, zone: &str) -> NodeInfo {
        NodeInfo::new(&build_node(
            name,
            build_resource_list(&[("cpu", "4"), ("memory", "4G")]),
            labels(&[("zone", zone)]),
        ))
    }

    fn task(name: &str, cpu: &str, memory: &str) -> TaskInfo {
        TaskInfo::new(&build_pod(
            "ns",
            name,
            "",
            PodPhase::Pending,
            build_resource_list(&[("cpu", cpu), ("memory", memory)]),
            "pg",
            BTreeMap::new(),
            BTreeMap::new(),
        ))
    }

    #[test]
    fn empty_node_scores_higher() {
        let empty = node("n1", "a");
        let mut busy = node("n2", "a");
        let mut running = task("r", "2", "2G");
        running.status = TaskStatus::Running;
        busy.add_task(&running).unwrap();

        let t = task("p", "1", "1G");
        assert_eq!(least_requested(&t, &empty), 75.0);
        assert_eq!(least_requested(&t, &busy), 25.0);
        assert_eq!(balanced_allocation(&t, &empty), 100.0);
    }

    #[test]
    fn imbalanced_request_scores_lower() {
        let n = node("n1", "a");
        let t = task("p", "2", "1G");
        assert_eq!(balanced_allocation(&t, &n), 75.0);
        assert_eq!(balanced_allocation(&task("full", "4", "1G"), &n), 0.0);
    }

    #[test]
    fn weights_come_from_arguments() {
        let plugin = NodeOrderPlugin::new(
            &Arguments::new()
                .with(LEAST_REQUESTED_WEIGHT, 2)
                .with(BALANCED_RESOURCE_WEIGHT, 0)
                .with(NODE_AFFINITY_WEIGHT, 1),
        );
        let n = node("n1", "a");
        let mut t = task("p", "1", "1G");
        t.pod.spec.affinity = Some(Affinity {
            node_affinity: Some(NodeAffinity {
                required: Vec::new(),
                preferred: vec![PreferredSchedulingTerm {
                    weight: 10,
                    preference: NodeSelectorTerm {
                        match_expressions: vec![NodeSelectorRequirement {
                            key: "zone".to_string(),
                            operator: SelectorOperator::In,
                            values: vec!["a".to_string()],
                        }],
                    },
                }],
            }),
            pod_anti_affinity: None,
        });
        assert_eq!(plugin.node_order(&t, &n), Some(160.0));
        assert_eq!(plugin.node_order(&t, &node("n2", "b")), Some(150.0));
    }
}
