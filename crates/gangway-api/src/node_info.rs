//! NodeInfo: a node plus the tasks assigned to it.
//!
//! `idle` is maintained as `allocatable - used` and is the only figure the
//! predicate engine fits requests against. Adding an occupying task that
//! does not fit is an error, so `used <= allocatable` holds for every node
//! that has seen its `Node` object.

use std::collections::BTreeMap;

use crate::error::{ApiError, ApiResult};
use crate::objects::Node;
use crate::quantity::Quantity;
use crate::resource::{PODS, Resource};
use crate::task_info::{TaskId, TaskInfo};

static NO_LABELS: BTreeMap<String, String> = BTreeMap::new();

#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    /// `None` until the node object itself has been observed.
    pub node: Option<Node>,
    pub allocatable: Resource,
    pub capability: Resource,
    pub idle: Resource,
    pub used: Resource,
    /// Pod-count limit; 0 means unlimited.
    pub max_pods: u32,
    pub tasks: BTreeMap<TaskId, TaskInfo>,
}

impl NodeInfo {
    pub fn new(node: &Node) -> Self {
        let mut info = Self::placeholder(&node.metadata.name);
        info.set_node(node);
        info
    }

    /// A node known only through the pods bound to it.
    pub fn placeholder(name: &str) -> Self {
        Self {
            name: name.to_string(),
            node: None,
            allocatable: Resource::empty(),
            capability: Resource::empty(),
            idle: Resource::empty(),
            used: Resource::empty(),
            max_pods: 0,
            tasks: BTreeMap::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.node.is_some()
    }

    /// Attach or replace the node object; idle is recomputed from current usage.
    pub fn set_node(&mut self, node: &Node) {
        self.allocatable = Resource::from_list(&node.allocatable);
        self.capability = if node.capacity.is_empty() {
            self.allocatable.clone()
        } else {
            Resource::from_list(&node.capacity)
        };
        self.max_pods = node
            .allocatable
            .get(PODS)
            .map(Quantity::value)
            .unwrap_or(0.0) as u32;
        self.idle = self.allocatable.clone();
        self.idle.sub(&self.used);
        self.node = Some(node.clone());
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        self.node
            .as_ref()
            .map(|n| &n.metadata.labels)
            .unwrap_or(&NO_LABELS)
    }

    /// Tasks currently holding resources on this node.
    pub fn pods_num(&self) -> u32 {
        self.tasks
            .values()
            .filter(|t| t.status.occupies_node())
            .count() as u32
    }

    pub fn add_task(&mut self, task: &TaskInfo) -> ApiResult<()> {
        if self.tasks.contains_key(&task.uid) {
            return Err(ApiError::DuplicateTask {
                owner: self.name.clone(),
                task: task.uid.clone(),
            });
        }

        if task.status.occupies_node() {
            if self.is_ready() && !task.resreq.less_equal(&self.idle) {
                return Err(ApiError::InsufficientResources {
                    node: self.name.clone(),
                    task: task.key(),
                    requested: task.resreq.to_string(),
                    idle: self.idle.to_string(),
                });
            }
            self.idle.sub(&task.resreq);
            self.used.add(&task.resreq);
        }

        let mut task = task.clone();
        task.node_name = Some(self.name.clone());
        self.tasks.insert(task.uid.clone(), task);
        Ok(())
    }

    pub fn remove_task(&mut self, uid: &str) -> ApiResult<TaskInfo> {
        let task = self.tasks.remove(uid).ok_or_else(|| ApiError::TaskNotFound {
            owner: self.name.clone(),
            task: uid.to_string(),
        })?;
        if task.status.occupies_node() {
            self.used.sub(&task.resreq);
            if self.is_ready() {
                self.idle = self.allocatable.clone();
                self.idle.sub(&self.used);
            }
        }
        Ok(task)
    }

    /// Replace a task's record, re-checking fit for its new status.
    pub fn update_task(&mut self, task: &TaskInfo) -> ApiResult<()> {
        let previous = self.remove_task(&task.uid)?;
        if let Err(e) = self.add_task(task) {
            // Restore the previous record so the node stays consistent.
            self.add_task(&previous)?;
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Pod;
    use crate::task_info::TaskStatus;

    fn node(cpu: &str, mem: &str, pods: &str) -> Node {
        let mut node = Node::default();
        node.metadata.name = "n1".to_string();
        for (k, v) in [("cpu", cpu), ("memory", mem), ("pods", pods)] {
            node.allocatable
                .insert(k.to_string(), Quantity::parse(v).unwrap());
        }
        node
    }

    fn task(name: &str, status: TaskStatus, cpu: f64) -> TaskInfo {
        let mut pod = Pod::default();
        pod.metadata.namespace = "ns".to_string();
        pod.metadata.name = name.to_string();
        let mut t = TaskInfo::new(&pod);
        t.status = status;
        t.resreq = Resource::new(cpu, 1e9);
        t
    }

    #[test]
    fn new_reads_allocatable_and_pod_limit() {
        let info = NodeInfo::new(&node("2", "4Gi", "10"));
        assert_eq!(info.allocatable.milli_cpu, 2000.0);
        assert_eq!(info.idle, info.allocatable);
        assert_eq!(info.max_pods, 10);
    }

    #[test]
    fn add_and_remove_restore_idle() {
        let mut info = NodeInfo::new(&node("2", "4Gi", "10"));
        let before = info.idle.clone();
        info.add_task(&task("a", TaskStatus::Allocated, 1000.0)).unwrap();
        assert_eq!(info.idle.milli_cpu, 1000.0);
        assert_eq!(info.pods_num(), 1);

        info.remove_task("ns/a").unwrap();
        assert_eq!(info.idle, before);
    }

    #[test]
    fn rejects_task_that_does_not_fit() {
        let mut info = NodeInfo::new(&node("2", "4Gi", "10"));
        info.add_task(&task("a", TaskStatus::Bound, 1500.0)).unwrap();
        let err = info.add_task(&task("b", TaskStatus::Allocated, 1000.0));
        assert!(matches!(err, Err(ApiError::InsufficientResources { .. })));
        assert_eq!(info.used.milli_cpu, 1500.0);
    }

    #[test]
    fn pending_tasks_do_not_consume() {
        let mut info = NodeInfo::new(&node("1", "1Gi", "10"));
        info.add_task(&task("a", TaskStatus::Succeeded, 4000.0)).unwrap();
        assert_eq!(info.idle.milli_cpu, 1000.0);
    }

    #[test]
    fn placeholder_adopts_node_later() {
        let mut info = NodeInfo::placeholder("n1");
        info.add_task(&task("a", TaskStatus::Running, 500.0)).unwrap();
        assert!(!info.is_ready());

        info.set_node(&node("2", "4Gi", "10"));
        assert!(info.is_ready());
        assert_eq!(info.idle.milli_cpu, 1500.0);
    }
}
