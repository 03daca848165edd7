//! The plugin contract.
//!
//! A plugin implements any subset of the hooks below. Every hook has a
//! default body returning `None`, which means "not implemented" and makes
//! the session skip the plugin for that hook. `Some(Ordering::Equal)` from
//! an ordering hook is different: the plugin was consulted and had no
//! preference, so the next plugin decides.
//!
//! Plugins keep their own per-cycle state (shares, deserved quotas). They
//! build it in [`Plugin::on_session_open`] and keep it current through the
//! allocate and deallocate events the session fires for every tentative
//! placement and its reversal.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use gangway_api::{FitReason, JobInfo, NodeInfo, QueueInfo, TaskId, TaskInfo};

use crate::session::SessionState;

/// Three-valued answer to "may this job keep its tentative placements?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vote {
    Permit,
    Abstain,
    Reject,
}

/// Outcome of a job validity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateResult {
    pub pass: bool,
    pub reason: String,
    pub message: String,
}

impl ValidateResult {
    pub fn pass() -> Self {
        Self {
            pass: true,
            reason: String::new(),
            message: String::new(),
        }
    }

    pub fn fail(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            pass: false,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

#[allow(unused_variables)]
pub trait Plugin: Send {
    fn name(&self) -> &str;

    fn on_session_open(&mut self, state: &SessionState) {}

    fn on_session_close(&mut self, state: &SessionState) {}

    /// `task` was tentatively placed; `state` already reflects it.
    fn on_allocate(&mut self, state: &SessionState, task: &TaskInfo) {}

    /// A tentative placement of `task` was reverted; `state` already reflects it.
    fn on_deallocate(&mut self, state: &SessionState, task: &TaskInfo) {}

    fn job_order(&self, l: &JobInfo, r: &JobInfo) -> Option<Ordering> {
        None
    }

    fn task_order(&self, l: &TaskInfo, r: &TaskInfo) -> Option<Ordering> {
        None
    }

    fn queue_order(&self, l: &QueueInfo, r: &QueueInfo) -> Option<Ordering> {
        None
    }

    /// Score for placing `task` on `node`; higher is better.
    fn node_order(&self, task: &TaskInfo, node: &NodeInfo) -> Option<f64> {
        None
    }

    fn predicate(&self, task: &TaskInfo, node: &NodeInfo) -> Option<Result<(), FitReason>> {
        None
    }

    fn job_ready(&self, job: &JobInfo) -> Option<bool> {
        None
    }

    fn job_pipelined(&self, job: &JobInfo) -> Option<Vote> {
        None
    }

    fn job_valid(&self, job: &JobInfo) -> Option<ValidateResult> {
        None
    }

    /// The queue already holds at least its fair share.
    fn overused(&self, queue: &QueueInfo) -> Option<bool> {
        None
    }

    /// The queue may take `task` without exceeding its fair share.
    fn allocatable(&self, queue: &QueueInfo, task: &TaskInfo) -> Option<bool> {
        None
    }

    /// Which of `reclaimees` may be evicted on behalf of `reclaimer`.
    fn reclaimable(&self, reclaimer: &TaskInfo, reclaimees: &[&TaskInfo]) -> Option<Vec<TaskId>> {
        None
    }

    /// Which of `preemptees` may be evicted on behalf of `preemptor`.
    fn preemptable(&self, preemptor: &TaskInfo, preemptees: &[&TaskInfo]) -> Option<Vec<TaskId>> {
        None
    }
}
