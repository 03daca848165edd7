//! Node filtering and scoring shared by the actions.
//!
//! Built-in checks run before plugin predicates: resource fit, node
//! selector, then required node affinity. Nodes are visited in name order so
//! fit errors and ties resolve the same way every cycle.

use tracing::debug;

use gangway_api::{FitError, FitErrors, FitReason, NodeInfo, TaskInfo};

use crate::session::Session;

/// Nodes that passed every predicate, and the rejections of the rest.
#[derive(Debug, Default)]
pub struct PredicateOutcome {
    pub nodes: Vec<String>,
    pub errors: FitErrors,
}

fn builtin(task: &TaskInfo, node: &NodeInfo) -> Result<(), FitReason> {
    if let Some(dimension) = task.resreq.insufficient_dimension(&node.idle) {
        return Err(FitReason::InsufficientResource(dimension));
    }

    let labels = node.labels();
    let selector = &task.pod.spec.node_selector;
    if !selector.iter().all(|(k, v)| labels.get(k) == Some(v)) {
        return Err(FitReason::NodeSelectorMismatch);
    }

    let required = task
        .pod
        .spec
        .affinity
        .as_ref()
        .and_then(|a| a.node_affinity.as_ref())
        .map(|na| na.required.as_slice())
        .unwrap_or_default();
    if !required.is_empty() && !required.iter().any(|term| term.matches(labels)) {
        return Err(FitReason::NodeAffinityMismatch);
    }
    Ok(())
}

/// Run built-in and plugin predicates for `task` against every node.
pub fn predicate_nodes(ssn: &Session, task: &TaskInfo) -> PredicateOutcome {
    let mut outcome = PredicateOutcome::default();
    let key = task.key();

    for (name, node) in &ssn.state.nodes {
        match builtin(task, node).and_then(|()| ssn.predicate(task, node)) {
            Ok(()) => outcome.nodes.push(name.clone()),
            Err(reason) => {
                debug!(task = %key, node = %name, %reason, "predicate failed");
                outcome.errors.set_node_error(FitError::new(&key, name, reason));
            }
        }
    }
    outcome
}

/// Score each candidate with the session's node order.
pub fn prioritize_nodes(ssn: &Session, task: &TaskInfo, nodes: &[String]) -> Vec<(String, f64)> {
    nodes
        .iter()
        .filter_map(|name| {
            let node = ssn.state.nodes.get(name)?;
            Some((name.clone(), ssn.node_order(task, node)))
        })
        .collect()
}

/// Highest score wins; ties go to the lexicographically smallest name.
/// A NaN score ranks below every number.
pub fn select_best_node(scores: &[(String, f64)]) -> Option<&str> {
    let rank = |score: f64| if score.is_nan() { f64::NEG_INFINITY } else { score };
    scores
        .iter()
        .min_by(|(ln, ls), (rn, rs)| rank(*rs).total_cmp(&rank(*ls)).then_with(|| ln.cmp(rn)))
        .map(|(name, _)| name.as_str())
}
