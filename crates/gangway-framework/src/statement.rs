//! Per-job transaction log over tentative placements.

use tracing::{debug, warn};

use gangway_api::{JobId, TaskId, TaskInfo};
use gangway_cache::BindRequest;

use crate::error::FrameworkResult;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Operation {
    task: TaskId,
    node: String,
}

/// Records the placements made for one job in one pass of an action, so
/// they can be committed together or reverted together.
#[derive(Debug)]
pub struct Statement {
    job: JobId,
    operations: Vec<Operation>,
}

impl Statement {
    pub fn new(job: impl Into<JobId>) -> Self {
        Self {
            job: job.into(),
            operations: Vec::new(),
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// `(job, task)` pairs in placement order.
    pub fn placements(&self) -> Vec<(JobId, TaskId)> {
        self.operations
            .iter()
            .map(|op| (self.job.clone(), op.task.clone()))
            .collect()
    }

    /// Tentatively place `task` on `node`. Nothing is recorded when the
    /// placement fails, and the session is left as it was.
    pub fn allocate(&mut self, ssn: &mut Session, task: &str, node: &str) -> FrameworkResult<TaskInfo> {
        let placed = ssn.allocate_task(&self.job, task, node)?;
        self.operations.push(Operation {
            task: task.to_string(),
            node: node.to_string(),
        });
        Ok(placed)
    }

    /// Turn every placement into a bind request.
    pub fn commit(self, ssn: &mut Session) {
        for op in &self.operations {
            match ssn.task(&self.job, &op.task) {
                Ok(task) => {
                    let request = BindRequest {
                        task: task.clone(),
                        node: op.node.clone(),
                    };
                    ssn.push_bind(request);
                }
                Err(e) => warn!(job = %self.job, task = %op.task, error = %e, "committed task vanished"),
            }
        }
        debug!(job = %self.job, tasks = self.operations.len(), "statement committed");
    }

    /// Revert every placement, newest first.
    pub fn discard(self, ssn: &mut Session) {
        for op in self.operations.iter().rev() {
            if let Err(e) = ssn.unallocate_task(&self.job, &op.task) {
                warn!(job = %self.job, task = %op.task, node = %op.node, error = %e, "failed to revert placement");
            }
        }
        debug!(job = %self.job, tasks = self.operations.len(), "statement discarded");
    }
}
