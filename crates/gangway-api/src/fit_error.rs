//! Predicate rejection reasons and their per-task aggregation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a node cannot host a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitReason {
    InsufficientResource(String),
    TooManyPods,
    NodeSelectorMismatch,
    NodeAffinityMismatch,
    NodeUnschedulable,
    UntoleratedTaint(String),
    PodAntiAffinity,
    Volume(String),
    Plugin { plugin: String, message: String },
}

impl fmt::Display for FitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientResource(name) => write!(f, "insufficient {name}"),
            Self::TooManyPods => f.write_str("too many pods"),
            Self::NodeSelectorMismatch => f.write_str("node(s) didn't match node selector"),
            Self::NodeAffinityMismatch => f.write_str("node(s) didn't match node affinity"),
            Self::NodeUnschedulable => f.write_str("node(s) were unschedulable"),
            Self::UntoleratedTaint(key) => write!(f, "node(s) had untolerated taint {{{key}}}"),
            Self::PodAntiAffinity => f.write_str("node(s) didn't satisfy pod anti-affinity"),
            Self::Volume(msg) => write!(f, "volume binding failed: {msg}"),
            Self::Plugin { plugin, message } => write!(f, "{plugin}: {message}"),
        }
    }
}

/// A single node's rejection of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitError {
    /// `namespace/name` of the task.
    pub task: String,
    pub node: String,
    pub reasons: Vec<FitReason>,
}

impl FitError {
    pub fn new(task: impl Into<String>, node: impl Into<String>, reason: FitReason) -> Self {
        Self {
            task: task.into(),
            node: node.into(),
            reasons: vec![reason],
        }
    }
}

impl fmt::Display for FitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reasons: Vec<String> = self.reasons.iter().map(ToString::to_string).collect();
        write!(f, "task {} on node {} fit failed: {}", self.task, self.node, reasons.join(", "))
    }
}

/// All node rejections collected for one task in one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitErrors {
    nodes: BTreeMap<String, FitError>,
    err: Option<String>,
}

impl FitErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_node_error(&mut self, err: FitError) {
        self.nodes.insert(err.node.clone(), err);
    }

    /// Record a failure that isn't tied to a node.
    pub fn set_error(&mut self, msg: impl Into<String>) {
        self.err = Some(msg.into());
    }

    pub fn node_errors(&self) -> &BTreeMap<String, FitError> {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.err.is_none()
    }

    /// Histogram summary, e.g. `0/3 nodes are available: 1 insufficient cpu, 2 too many pods.`
    pub fn error(&self) -> String {
        if let Some(err) = &self.err {
            return err.clone();
        }

        let mut histogram: BTreeMap<String, usize> = BTreeMap::new();
        for fit in self.nodes.values() {
            for reason in &fit.reasons {
                *histogram.entry(reason.to_string()).or_insert(0) += 1;
            }
        }
        let parts: Vec<String> = histogram
            .iter()
            .map(|(reason, count)| format!("{count} {reason}"))
            .collect();
        format!(
            "0/{} nodes are available: {}.",
            self.nodes.len(),
            parts.join(", ")
        )
    }
}
