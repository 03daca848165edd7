//! Scheduler policy records: which actions run and which plugins sit in
//! which tier, with per-capability enable flags.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Every hook a plugin can contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    JobOrder,
    TaskOrder,
    NodeOrder,
    QueueOrder,
    Predicate,
    Reclaimable,
    Preemptable,
    JobReady,
    JobPipelined,
}

impl Capability {
    pub const ALL: [Capability; 9] = [
        Capability::JobOrder,
        Capability::TaskOrder,
        Capability::NodeOrder,
        Capability::QueueOrder,
        Capability::Predicate,
        Capability::Reclaimable,
        Capability::Preemptable,
        Capability::JobReady,
        Capability::JobPipelined,
    ];
}

/// Free-form plugin arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arguments(BTreeMap<String, serde_json::Value>);

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(serde_json::Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(serde_json::Value::as_bool)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One plugin entry in a tier. An absent flag means the capability is enabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginOption {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_job_order: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_task_order: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_node_order: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_queue_order: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_predicate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_reclaimable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_preemptable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_job_ready: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_job_pipelined: Option<bool>,
    #[serde(skip_serializing_if = "Arguments::is_empty")]
    pub arguments: Arguments,
}

impl PluginOption {
    /// Plugin with every capability enabled.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Plugin with only the listed capabilities enabled.
    pub fn with_only(name: &str, enabled: &[Capability]) -> Self {
        let mut option = Self::new(name);
        for cap in Capability::ALL {
            *option.flag_mut(cap) = Some(enabled.contains(&cap));
        }
        option
    }

    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn enabled(&self, cap: Capability) -> bool {
        self.flag(cap).unwrap_or(true)
    }

    fn flag(&self, cap: Capability) -> Option<bool> {
        match cap {
            Capability::JobOrder => self.enable_job_order,
            Capability::TaskOrder => self.enable_task_order,
            Capability::NodeOrder => self.enable_node_order,
            Capability::QueueOrder => self.enable_queue_order,
            Capability::Predicate => self.enable_predicate,
            Capability::Reclaimable => self.enable_reclaimable,
            Capability::Preemptable => self.enable_preemptable,
            Capability::JobReady => self.enable_job_ready,
            Capability::JobPipelined => self.enable_job_pipelined,
        }
    }

    fn flag_mut(&mut self, cap: Capability) -> &mut Option<bool> {
        match cap {
            Capability::JobOrder => &mut self.enable_job_order,
            Capability::TaskOrder => &mut self.enable_task_order,
            Capability::NodeOrder => &mut self.enable_node_order,
            Capability::QueueOrder => &mut self.enable_queue_order,
            Capability::Predicate => &mut self.enable_predicate,
            Capability::Reclaimable => &mut self.enable_reclaimable,
            Capability::Preemptable => &mut self.enable_preemptable,
            Capability::JobReady => &mut self.enable_job_ready,
            Capability::JobPipelined => &mut self.enable_job_pipelined,
        }
    }
}

/// Plugins consulted together. Earlier tiers take precedence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tier {
    pub plugins: Vec<PluginOption>,
}

/// Actions to run each cycle and the plugin tiers they consult.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfiguration {
    pub actions: Vec<String>,
    pub tiers: Vec<Tier>,
}

impl Default for SchedulerConfiguration {
    /// `allocate`; tier one priority and gang; tier two drf, predicates,
    /// proportion and nodeorder.
    fn default() -> Self {
        let tier = |names: &[&str]| Tier {
            plugins: names.iter().map(|n| PluginOption::new(n)).collect(),
        };
        Self {
            actions: vec!["allocate".to_string()],
            tiers: vec![
                tier(&["priority", "gang"]),
                tier(&["drf", "predicates", "proportion", "nodeorder"]),
            ],
        }
    }
}
