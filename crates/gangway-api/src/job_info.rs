//! JobInfo: a PodGroup and the tasks that belong to it.

use std::collections::BTreeMap;

use crate::error::{ApiError, ApiResult};
use crate::fit_error::FitErrors;
use crate::objects::{PodGroup, PodGroupPhase};
use crate::queue_info::QueueId;
use crate::resource::Resource;
use crate::task_info::{TaskId, TaskInfo, TaskStatus};

/// `namespace/podgroup-name`.
pub type JobId = String;

#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
    pub uid: JobId,
    pub namespace: String,
    pub name: String,
    pub queue: QueueId,
    pub priority: i32,
    /// Gang size: tasks that must be placed together.
    pub min_available: u32,
    pub creation_timestamp: u64,
    pub pod_group: Option<PodGroup>,
    pub tasks: BTreeMap<TaskId, TaskInfo>,
    /// Sum of requests of tasks in allocated statuses.
    pub allocated: Resource,
    pub total_request: Resource,
    /// Per-task predicate failures from the current cycle.
    pub nodes_fit_errors: BTreeMap<TaskId, FitErrors>,
}

impl JobInfo {
    pub fn new(uid: impl Into<JobId>) -> Self {
        let uid = uid.into();
        let (namespace, name) = match uid.split_once('/') {
            Some((ns, name)) => (ns.to_string(), name.to_string()),
            None => (String::new(), uid.clone()),
        };
        Self {
            uid,
            namespace,
            name,
            queue: String::new(),
            priority: 0,
            min_available: 0,
            creation_timestamp: 0,
            pod_group: None,
            tasks: BTreeMap::new(),
            allocated: Resource::empty(),
            total_request: Resource::empty(),
            nodes_fit_errors: BTreeMap::new(),
        }
    }

    pub fn set_pod_group(&mut self, pg: &PodGroup) {
        self.queue = pg.spec.queue.clone();
        self.min_available = pg.spec.min_member;
        self.priority = pg.spec.priority.unwrap_or(0);
        self.creation_timestamp = pg.metadata.creation_timestamp;
        self.pod_group = Some(pg.clone());
    }

    pub fn unset_pod_group(&mut self) {
        self.pod_group = None;
    }

    pub fn phase(&self) -> Option<PodGroupPhase> {
        self.pod_group.as_ref().map(|pg| pg.status.phase)
    }

    pub fn add_task(&mut self, task: TaskInfo) -> ApiResult<()> {
        if self.tasks.contains_key(&task.uid) {
            return Err(ApiError::DuplicateTask {
                owner: self.uid.clone(),
                task: task.uid,
            });
        }
        if task.status.is_allocated() {
            self.allocated.add(&task.resreq);
        }
        self.total_request.add(&task.resreq);
        self.tasks.insert(task.uid.clone(), task);
        Ok(())
    }

    pub fn delete_task(&mut self, uid: &str) -> ApiResult<TaskInfo> {
        let task = self.tasks.remove(uid).ok_or_else(|| self.not_found(uid))?;
        if task.status.is_allocated() {
            self.allocated.sub(&task.resreq);
        }
        self.total_request.sub(&task.resreq);
        self.nodes_fit_errors.remove(uid);
        Ok(task)
    }

    /// Move a task to `status`, keeping the allocated total consistent.
    pub fn update_task_status(&mut self, uid: &str, status: TaskStatus) -> ApiResult<()> {
        let Some(task) = self.tasks.get_mut(uid) else {
            return Err(ApiError::TaskNotFound {
                owner: self.uid.clone(),
                task: uid.to_string(),
            });
        };
        let was_allocated = task.status.is_allocated();
        task.status = status;
        match (was_allocated, status.is_allocated()) {
            (false, true) => {
                self.allocated.add(&task.resreq);
            }
            (true, false) => {
                self.allocated.sub(&task.resreq);
            }
            _ => {}
        }
        Ok(())
    }

    pub fn task(&self, uid: &str) -> Option<&TaskInfo> {
        self.tasks.get(uid)
    }

    pub fn task_mut(&mut self, uid: &str) -> Option<&mut TaskInfo> {
        self.tasks.get_mut(uid)
    }

    pub fn tasks_with_status(&self, status: TaskStatus) -> impl Iterator<Item = &TaskInfo> {
        self.tasks.values().filter(move |t| t.status == status)
    }

    pub fn count_status(&self, status: TaskStatus) -> u32 {
        self.tasks_with_status(status).count() as u32
    }

    /// Tasks counting towards gang readiness.
    pub fn ready_task_num(&self) -> u32 {
        self.tasks
            .values()
            .filter(|t| t.status.is_allocated() || t.status == TaskStatus::Succeeded)
            .count() as u32
    }

    /// Tasks held pipelined.
    pub fn waiting_task_num(&self) -> u32 {
        self.count_status(TaskStatus::Pipelined)
    }

    /// Tasks that could still contribute to the gang.
    pub fn valid_task_num(&self) -> u32 {
        self.tasks
            .values()
            .filter(|t| {
                t.status.is_allocated()
                    || matches!(
                        t.status,
                        TaskStatus::Pending | TaskStatus::Pipelined | TaskStatus::Succeeded
                    )
            })
            .count() as u32
    }

    pub fn is_ready(&self) -> bool {
        self.ready_task_num() >= self.min_available
    }

    pub fn is_pipelined(&self) -> bool {
        self.waiting_task_num() + self.ready_task_num() >= self.min_available
    }

    pub fn pending_tasks(&self) -> Vec<&TaskInfo> {
        self.tasks_with_status(TaskStatus::Pending).collect()
    }

    pub fn record_fit_errors(&mut self, task: &str, errs: FitErrors) {
        self.nodes_fit_errors.insert(task.to_string(), errs);
    }

    /// Human-readable reason the job could not be scheduled this cycle.
    pub fn fit_error(&self) -> String {
        let mut msg = format!(
            "job is not ready: {} minAvailable, {} ready, {} pending",
            self.min_available,
            self.ready_task_num(),
            self.count_status(TaskStatus::Pending)
        );
        if let Some((uid, errs)) = self.nodes_fit_errors.iter().next() {
            msg.push_str(&format!("; task {uid}: {}", errs.error()));
        }
        msg
    }

    fn not_found(&self, uid: &str) -> ApiError {
        ApiError::TaskNotFound {
            owner: self.uid.clone(),
            task: uid.to_string(),
        }
    }
}
