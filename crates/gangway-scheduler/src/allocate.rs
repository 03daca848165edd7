//! The allocate action: place pending tasks of admitted jobs onto nodes.
//!
//! Queues, jobs and tasks are picked greedily. After every pass over a job
//! its queue goes back into the candidate set and the best queue is chosen
//! again, so fairness shares changed by the placements just made decide who
//! goes next. Within one pass a job keeps placing tasks until it is ready;
//! a ready job with work left yields to let other jobs interleave.
//!
//! Each pass records its placements in a [`Statement`]. A ready job commits
//! them as binds, a pipelined job holds them until the session closes, and
//! any other job gives them back at once.

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, trace};

use gangway_api::{FitErrors, JobId, PodGroupPhase, QueueId, TaskId, TaskStatus};
use gangway_framework::{
    Session, Statement, predicate_nodes, prioritize_nodes, select_best_node,
};

use crate::action::Action;

pub const NAME: &str = "allocate";

pub struct Allocate;

/// Remove and return the first item `cmp` orders lowest.
fn pop_best<T>(items: &mut Vec<T>, mut cmp: impl FnMut(&T, &T) -> Ordering) -> Option<T> {
    let mut best = 0;
    for idx in 1..items.len() {
        if cmp(&items[idx], &items[best]) == Ordering::Less {
            best = idx;
        }
    }
    if items.is_empty() {
        None
    } else {
        Some(items.remove(best))
    }
}

fn compare_queues(ssn: &Session, l: &str, r: &str) -> Ordering {
    match (ssn.state.queues.get(l), ssn.state.queues.get(r)) {
        (Some(lq), Some(rq)) => ssn.queue_order(lq, rq),
        _ => l.cmp(r),
    }
}

fn compare_jobs(ssn: &Session, l: &str, r: &str) -> Ordering {
    match (ssn.state.jobs.get(l), ssn.state.jobs.get(r)) {
        (Some(lj), Some(rj)) => ssn.job_order(lj, rj),
        _ => l.cmp(r),
    }
}

/// Pending tasks of `job` in task order.
fn ordered_tasks(ssn: &Session, job: &str) -> VecDeque<TaskId> {
    let Some(info) = ssn.state.jobs.get(job) else {
        return VecDeque::new();
    };
    let mut tasks = info.pending_tasks();
    tasks.sort_by(|l, r| ssn.task_order(l, r));
    tasks.into_iter().map(|t| t.uid.clone()).collect()
}

/// Jobs eligible for allocation, grouped by queue.
fn candidate_jobs(ssn: &Session) -> BTreeMap<QueueId, Vec<JobId>> {
    let mut by_queue: BTreeMap<QueueId, Vec<JobId>> = BTreeMap::new();
    for job in ssn.state.jobs.values() {
        if !matches!(
            job.phase(),
            Some(PodGroupPhase::Inqueue | PodGroupPhase::Running)
        ) {
            trace!(job = %job.uid, phase = ?job.phase(), "job not admitted");
            continue;
        }
        let Some(queue) = ssn.state.queues.get(&job.queue) else {
            debug!(job = %job.uid, queue = %job.queue, "queue of job not found");
            continue;
        };
        if !queue.is_open() {
            debug!(job = %job.uid, queue = %queue.name, "queue is not open");
            continue;
        }
        if job.pending_tasks().is_empty() {
            continue;
        }
        by_queue
            .entry(queue.name.clone())
            .or_default()
            .push(job.uid.clone());
    }
    by_queue
}

impl Allocate {
    /// Place tasks of `job` from `tasks` until the job is ready or the
    /// tasks run out. Returns true when the job should be revisited.
    fn allocate_job(
        ssn: &mut Session,
        queue: &QueueId,
        job: &JobId,
        tasks: &mut VecDeque<TaskId>,
        stmt: &mut Statement,
    ) -> bool {
        while let Some(uid) = tasks.pop_front() {
            let task = match ssn.task(job, &uid) {
                Ok(task) if task.status == TaskStatus::Pending => task.clone(),
                Ok(_) => continue,
                Err(e) => {
                    debug!(%job, task = %uid, error = %e, "task vanished from session");
                    continue;
                }
            };

            let Some(queue_info) = ssn.state.queues.get(queue) else {
                return false;
            };
            if !ssn.allocatable(queue_info, &task) {
                debug!(task = %task.key(), queue = %queue, "queue cannot take task");
                continue;
            }

            let outcome = predicate_nodes(ssn, &task);
            if outcome.nodes.is_empty() {
                debug!(task = %task.key(), reason = %outcome.errors.error(), "no node fits task");
                if let Some(info) = ssn.state.jobs.get_mut(job) {
                    info.record_fit_errors(&uid, outcome.errors);
                }
                continue;
            }

            let scores = prioritize_nodes(ssn, &task, &outcome.nodes);
            let Some(node) = select_best_node(&scores).map(str::to_string) else {
                continue;
            };

            if let Err(e) = stmt.allocate(ssn, &uid, &node) {
                debug!(task = %task.key(), %node, error = %e, "allocation failed");
                let mut errors = FitErrors::new();
                errors.set_error(e.to_string());
                if let Some(info) = ssn.state.jobs.get_mut(job) {
                    info.record_fit_errors(&uid, errors);
                }
                continue;
            }

            let ready = ssn
                .state
                .jobs
                .get(job)
                .is_some_and(|info| ssn.job_ready(info));
            if ready && !tasks.is_empty() {
                return true;
            }
        }
        false
    }

    /// Commit, hold or discard the placements of one pass over `job`.
    fn settle(ssn: &mut Session, job: &JobId, stmt: Statement) {
        let (ready, pipelined) = match ssn.state.jobs.get(job) {
            Some(info) => (ssn.job_ready(info), ssn.job_pipelined(info)),
            None => (false, false),
        };
        if ready {
            stmt.commit(ssn);
        } else if pipelined && !stmt.is_empty() {
            debug!(%job, tasks = stmt.len(), "job pipelined, holding placements");
            ssn.hold(stmt);
        } else {
            if !stmt.is_empty() {
                debug!(%job, tasks = stmt.len(), "job not ready, discarding placements");
            }
            stmt.discard(ssn);
        }
    }
}

impl Action for Allocate {
    fn name(&self) -> &str {
        NAME
    }

    fn execute(&self, ssn: &mut Session) {
        debug!(session = %ssn.uid(), "enter allocate");

        let mut jobs_by_queue = candidate_jobs(ssn);
        let mut queues: Vec<QueueId> = jobs_by_queue.keys().cloned().collect();
        let mut pending: BTreeMap<JobId, VecDeque<TaskId>> = BTreeMap::new();

        while let Some(queue) = pop_best(&mut queues, |l, r| compare_queues(ssn, l, r)) {
            let overused = ssn
                .state
                .queues
                .get(&queue)
                .is_none_or(|info| ssn.overused(info));
            if overused {
                debug!(%queue, "queue overused, skipping");
                continue;
            }

            let Some(jobs) = jobs_by_queue.get_mut(&queue) else {
                continue;
            };
            let Some(job) = pop_best(jobs, |l, r| compare_jobs(ssn, l, r)) else {
                debug!(%queue, "queue has no jobs left");
                continue;
            };

            let tasks = pending
                .entry(job.clone())
                .or_insert_with(|| ordered_tasks(ssn, &job));
            trace!(%queue, %job, tasks = tasks.len(), "allocating job");

            let mut stmt = Statement::new(job.clone());
            let revisit = Self::allocate_job(ssn, &queue, &job, tasks, &mut stmt);
            Self::settle(ssn, &job, stmt);

            if revisit {
                jobs.push(job);
            }
            queues.push(queue);
        }

        debug!(session = %ssn.uid(), binds = ssn.binds().len(), "leave allocate");
    }
}
