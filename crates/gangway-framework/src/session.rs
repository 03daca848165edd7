//! Session: the per-cycle aggregate root.
//!
//! A session owns a deep copy of the cache snapshot plus one fresh instance
//! of every configured plugin. Actions read the state freely but change it
//! only through [`Statement`](crate::Statement), which records each
//! tentative placement so a gang that falls short can be rolled back.
//! Closing the session reverts placements still held, derives PodGroup and
//! Queue status, and hands back the binds committed during the cycle.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{self, AtomicU64};

use tracing::{debug, info, warn};

use gangway_api::{
    FitReason, JobId, JobInfo, NodeInfo, PodGroup, PodGroupCondition, PodGroupConditionType,
    PodGroupPhase, PodGroupStatus, Queue, QueueId, QueueInfo, Resource, TaskId, TaskInfo,
    TaskStatus,
};
use gangway_cache::{BindRequest, Snapshot, VolumeBinder};

use crate::conf::{Capability, PluginOption, Tier};
use crate::error::{FrameworkError, FrameworkResult};
use crate::plugin::{Plugin, ValidateResult, Vote};
use crate::registry::PluginRegistry;
use crate::statement::Statement;

static SESSION_SEQ: AtomicU64 = AtomicU64::new(1);

/// The mutable cluster view of one cycle.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub uid: String,
    pub jobs: BTreeMap<JobId, JobInfo>,
    pub nodes: BTreeMap<String, NodeInfo>,
    pub queues: BTreeMap<QueueId, QueueInfo>,
    /// Sum of allocatable over all nodes.
    pub total_resource: Resource,
}

struct PluginSlot {
    option: PluginOption,
    plugin: Box<dyn Plugin>,
}

/// What a closed session leaves for the scheduler to write out.
#[derive(Debug, Default)]
pub struct SessionOutcome {
    pub binds: Vec<BindRequest>,
    pub job_updates: Vec<PodGroup>,
    pub queue_updates: Vec<Queue>,
}

pub struct Session {
    pub state: SessionState,
    tiers: Vec<Vec<PluginSlot>>,
    volume_binder: Arc<dyn VolumeBinder>,
    binds: Vec<BindRequest>,
    /// Statements of pipelined jobs, reverted at close.
    held: Vec<Statement>,
    invalid_jobs: BTreeMap<JobId, (JobInfo, ValidateResult)>,
}

/// Open a session over `snapshot` with the plugins `tiers` name.
pub fn open_session(
    snapshot: Snapshot,
    tiers: &[Tier],
    registry: &PluginRegistry,
    volume_binder: Arc<dyn VolumeBinder>,
) -> FrameworkResult<Session> {
    let uid = format!("session-{}", SESSION_SEQ.fetch_add(1, atomic::Ordering::Relaxed));

    let mut total_resource = Resource::empty();
    for node in snapshot.nodes.values() {
        total_resource.add(&node.allocatable);
    }

    let mut seen = BTreeSet::new();
    let mut built = Vec::with_capacity(tiers.len());
    for tier in tiers {
        let mut slots = Vec::with_capacity(tier.plugins.len());
        for option in &tier.plugins {
            if !seen.insert(option.name.clone()) {
                return Err(FrameworkError::DuplicatePlugin {
                    plugin: option.name.clone(),
                });
            }
            slots.push(PluginSlot {
                plugin: registry.build(&option.name, &option.arguments)?,
                option: option.clone(),
            });
        }
        built.push(slots);
    }

    let mut ssn = Session {
        state: SessionState {
            uid,
            jobs: snapshot.jobs,
            nodes: snapshot.nodes,
            queues: snapshot.queues,
            total_resource,
        },
        tiers: built,
        volume_binder,
        binds: Vec::new(),
        held: Vec::new(),
        invalid_jobs: BTreeMap::new(),
    };

    {
        let Session { state, tiers, .. } = &mut ssn;
        for slot in tiers.iter_mut().flatten() {
            slot.plugin.on_session_open(state);
        }
    }

    let invalid: Vec<(JobId, ValidateResult)> = ssn
        .state
        .jobs
        .values()
        .filter_map(|job| ssn.job_valid(job).map(|r| (job.uid.clone(), r)))
        .collect();
    for (id, result) in invalid {
        if let Some(job) = ssn.state.jobs.remove(&id) {
            info!(job = %id, reason = %result.reason, message = %result.message, "job is not valid");
            ssn.invalid_jobs.insert(id, (job, result));
        }
    }

    info!(
        session = %ssn.state.uid,
        jobs = ssn.state.jobs.len(),
        nodes = ssn.state.nodes.len(),
        queues = ssn.state.queues.len(),
        "session opened"
    );
    Ok(ssn)
}

impl Session {
    pub fn uid(&self) -> &str {
        &self.state.uid
    }

    /// Binds committed so far this cycle.
    pub fn binds(&self) -> &[BindRequest] {
        &self.binds
    }

    pub fn task(&self, job: &str, uid: &str) -> FrameworkResult<&TaskInfo> {
        self.state
            .jobs
            .get(job)
            .ok_or_else(|| FrameworkError::JobNotFound(job.to_string()))?
            .task(uid)
            .ok_or_else(|| FrameworkError::TaskNotFound {
                job: job.to_string(),
                task: uid.to_string(),
            })
    }

    fn enabled(&self, cap: Capability) -> impl Iterator<Item = &dyn Plugin> {
        self.tiers
            .iter()
            .flatten()
            .filter(move |slot| slot.option.enabled(cap))
            .map(|slot| slot.plugin.as_ref())
    }

    /// Plugins that implement the hook, in tier order.
    fn all(&self) -> impl Iterator<Item = &dyn Plugin> {
        self.tiers.iter().flatten().map(|slot| slot.plugin.as_ref())
    }

    // ── Ordering ───────────────────────────────────────────────────

    /// First non-equal plugin verdict wins; otherwise older job first.
    pub fn job_order(&self, l: &JobInfo, r: &JobInfo) -> Ordering {
        self.enabled(Capability::JobOrder)
            .filter_map(|p| p.job_order(l, r))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| {
                l.creation_timestamp
                    .cmp(&r.creation_timestamp)
                    .then_with(|| l.uid.cmp(&r.uid))
            })
    }

    pub fn task_order(&self, l: &TaskInfo, r: &TaskInfo) -> Ordering {
        self.enabled(Capability::TaskOrder)
            .filter_map(|p| p.task_order(l, r))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| {
                l.creation_timestamp()
                    .cmp(&r.creation_timestamp())
                    .then_with(|| l.uid.cmp(&r.uid))
            })
    }

    pub fn queue_order(&self, l: &QueueInfo, r: &QueueInfo) -> Ordering {
        self.enabled(Capability::QueueOrder)
            .filter_map(|p| p.queue_order(l, r))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| l.name.cmp(&r.name))
    }

    /// Sum of every enabled plugin's score.
    pub fn node_order(&self, task: &TaskInfo, node: &NodeInfo) -> f64 {
        self.enabled(Capability::NodeOrder)
            .filter_map(|p| p.node_order(task, node))
            .sum()
    }

    // ── Predicates and votes ───────────────────────────────────────

    /// First plugin rejection, if any.
    pub fn predicate(&self, task: &TaskInfo, node: &NodeInfo) -> Result<(), FitReason> {
        for plugin in self.enabled(Capability::Predicate) {
            if let Some(Err(reason)) = plugin.predicate(task, node) {
                return Err(reason);
            }
        }
        Ok(())
    }

    /// Every plugin must agree the job is ready.
    pub fn job_ready(&self, job: &JobInfo) -> bool {
        self.enabled(Capability::JobReady)
            .filter_map(|p| p.job_ready(job))
            .all(|ready| ready)
    }

    /// Per tier: any reject denies, any permit allows, otherwise the next
    /// tier decides. Pipelined when no tier decides.
    pub fn job_pipelined(&self, job: &JobInfo) -> bool {
        for tier in &self.tiers {
            let mut permitted = false;
            for slot in tier
                .iter()
                .filter(|s| s.option.enabled(Capability::JobPipelined))
            {
                match slot.plugin.job_pipelined(job) {
                    Some(Vote::Reject) => return false,
                    Some(Vote::Permit) => permitted = true,
                    Some(Vote::Abstain) | None => {}
                }
            }
            if permitted {
                return true;
            }
        }
        true
    }

    /// First failing validity check, if any.
    pub fn job_valid(&self, job: &JobInfo) -> Option<ValidateResult> {
        self.all()
            .filter_map(|p| p.job_valid(job))
            .find(|result| !result.pass)
    }

    pub fn overused(&self, queue: &QueueInfo) -> bool {
        self.all().filter_map(|p| p.overused(queue)).any(|o| o)
    }

    pub fn allocatable(&self, queue: &QueueInfo, task: &TaskInfo) -> bool {
        self.all()
            .filter_map(|p| p.allocatable(queue, task))
            .all(|ok| ok)
    }

    /// Victims every implementing plugin of the first deciding tier agrees on.
    pub fn reclaimable(&self, reclaimer: &TaskInfo, reclaimees: &[&TaskInfo]) -> Vec<TaskId> {
        self.victims(Capability::Reclaimable, |p| {
            p.reclaimable(reclaimer, reclaimees)
        })
    }

    pub fn preemptable(&self, preemptor: &TaskInfo, preemptees: &[&TaskInfo]) -> Vec<TaskId> {
        self.victims(Capability::Preemptable, |p| {
            p.preemptable(preemptor, preemptees)
        })
    }

    fn victims(
        &self,
        cap: Capability,
        candidates: impl Fn(&dyn Plugin) -> Option<Vec<TaskId>>,
    ) -> Vec<TaskId> {
        for tier in &self.tiers {
            let mut victims: Option<Vec<TaskId>> = None;
            for slot in tier.iter().filter(|s| s.option.enabled(cap)) {
                let Some(found) = candidates(slot.plugin.as_ref()) else {
                    continue;
                };
                victims = Some(match victims {
                    None => found,
                    Some(prev) => prev.into_iter().filter(|id| found.contains(id)).collect(),
                });
            }
            if let Some(victims) = victims {
                return victims;
            }
        }
        Vec::new()
    }

    // ── Tentative placement ────────────────────────────────────────

    /// Place a pending task on a node in the session state, reserving its
    /// volumes first. Fires the allocate event on success.
    pub(crate) fn allocate_task(
        &mut self,
        job: &str,
        uid: &str,
        node_name: &str,
    ) -> FrameworkResult<TaskInfo> {
        let task = self.task(job, uid)?.clone();
        let node = self
            .state
            .nodes
            .get(node_name)
            .ok_or_else(|| FrameworkError::NodeNotFound(node_name.to_string()))?;

        let pod_volumes = if task.has_volume_claims() {
            let decided = self.volume_binder.get_pod_volumes(&task, node)?;
            if let Err(e) = self
                .volume_binder
                .allocate_volumes(&task, node_name, &decided)
            {
                debug!(task = %task.key(), node = %node_name, error = %e, "volume allocation failed");
                self.volume_binder.revert_volumes(&task, &decided);
                return Err(e.into());
            }
            Some(decided)
        } else {
            None
        };

        let mut placed = task;
        let previous = placed.status;
        placed.status = TaskStatus::Allocated;
        placed.node_name = Some(node_name.to_string());
        placed.pod_volumes = pod_volumes;

        if let Err(e) = self.place(job, &placed, previous) {
            if let Some(volumes) = &placed.pod_volumes {
                self.volume_binder.revert_volumes(&placed, volumes);
            }
            return Err(e);
        }

        debug!(task = %placed.key(), node = %node_name, "task allocated");
        self.fire(&placed, true);
        Ok(placed)
    }

    fn place(&mut self, job: &str, placed: &TaskInfo, previous: TaskStatus) -> FrameworkResult<()> {
        let node_name = placed.node_name.clone().unwrap_or_default();
        let job_info = self
            .state
            .jobs
            .get_mut(job)
            .ok_or_else(|| FrameworkError::JobNotFound(job.to_string()))?;
        job_info.update_task_status(&placed.uid, placed.status)?;

        let node = self
            .state
            .nodes
            .get_mut(&node_name)
            .ok_or_else(|| FrameworkError::NodeNotFound(node_name.clone()));
        let added = node.and_then(|node| node.add_task(placed).map_err(FrameworkError::from));
        if let Err(e) = added {
            if let Some(job_info) = self.state.jobs.get_mut(job) {
                job_info.update_task_status(&placed.uid, previous)?;
            }
            return Err(e);
        }

        if let Some(task) = self
            .state
            .jobs
            .get_mut(job)
            .and_then(|j| j.task_mut(&placed.uid))
        {
            task.node_name = placed.node_name.clone();
            task.pod_volumes = placed.pod_volumes.clone();
        }
        Ok(())
    }

    /// Undo a tentative placement, releasing node resources and volume
    /// reservations. Fires the deallocate event.
    pub(crate) fn unallocate_task(&mut self, job: &str, uid: &str) -> FrameworkResult<TaskInfo> {
        let task = self.task(job, uid)?.clone();

        if let Some(node) = task
            .node_name
            .as_ref()
            .and_then(|name| self.state.nodes.get_mut(name))
        {
            node.remove_task(uid)?;
        }
        if let Some(job_info) = self.state.jobs.get_mut(job) {
            job_info.update_task_status(uid, TaskStatus::Pending)?;
            if let Some(t) = job_info.task_mut(uid) {
                t.node_name = None;
                t.pod_volumes = None;
            }
        }
        if let Some(volumes) = &task.pod_volumes {
            self.volume_binder.revert_volumes(&task, volumes);
        }

        debug!(task = %task.key(), node = ?task.node_name, "task allocation reverted");
        self.fire(&task, false);
        Ok(task)
    }

    /// Keep a placement for the rest of the cycle without committing it.
    pub(crate) fn pipeline_task(&mut self, job: &str, uid: &str) -> FrameworkResult<()> {
        let job_info = self
            .state
            .jobs
            .get_mut(job)
            .ok_or_else(|| FrameworkError::JobNotFound(job.to_string()))?;
        job_info.update_task_status(uid, TaskStatus::Pipelined)?;
        let Some(task) = job_info.task(uid).cloned() else {
            return Ok(());
        };
        if let Some(node) = task
            .node_name
            .as_ref()
            .and_then(|name| self.state.nodes.get_mut(name))
        {
            node.update_task(&task)?;
        }
        Ok(())
    }

    pub(crate) fn push_bind(&mut self, request: BindRequest) {
        self.binds.push(request);
    }

    fn fire(&mut self, task: &TaskInfo, allocated: bool) {
        let Session { state, tiers, .. } = self;
        for slot in tiers.iter_mut().flatten() {
            if allocated {
                slot.plugin.on_allocate(state, task);
            } else {
                slot.plugin.on_deallocate(state, task);
            }
        }
    }

    /// Hold a pipelined job's placements until the session closes.
    pub fn hold(&mut self, stmt: Statement) {
        for (job, uid) in stmt.placements() {
            if let Err(e) = self.pipeline_task(&job, &uid) {
                warn!(%job, task = %uid, error = %e, "failed to pipeline task");
            }
        }
        self.held.push(stmt);
    }

    // ── Close ──────────────────────────────────────────────────────

    /// Revert held placements, derive status updates and return the
    /// committed binds.
    pub fn close(mut self) -> SessionOutcome {
        let held = std::mem::take(&mut self.held);
        for stmt in held.into_iter().rev() {
            stmt.discard(&mut self);
        }

        let job_updates = self.job_status_updates();
        let queue_updates = self.queue_status_updates(&job_updates);

        {
            let Session { state, tiers, .. } = &mut self;
            for slot in tiers.iter_mut().flatten() {
                slot.plugin.on_session_close(state);
            }
        }

        info!(
            session = %self.state.uid,
            binds = self.binds.len(),
            job_updates = job_updates.len(),
            queue_updates = queue_updates.len(),
            "session closed"
        );
        SessionOutcome {
            binds: std::mem::take(&mut self.binds),
            job_updates,
            queue_updates,
        }
    }

    /// Drop the cycle's work without producing anything: every tentative
    /// placement, committed or held, is reverted.
    pub fn abandon(mut self) {
        let held = std::mem::take(&mut self.held);
        for stmt in held.into_iter().rev() {
            stmt.discard(&mut self);
        }
        let binds = std::mem::take(&mut self.binds);
        for request in binds.iter().rev() {
            if let Err(e) = self.unallocate_task(&request.task.job, &request.task.uid) {
                warn!(task = %request.task.key(), error = %e, "failed to revert committed task");
            }
        }
        info!(session = %self.state.uid, reverted = binds.len(), "session abandoned");
    }

    fn job_status_updates(&self) -> Vec<PodGroup> {
        let mut updates = Vec::new();

        for job in self.state.jobs.values() {
            let Some(pg) = &job.pod_group else { continue };
            let condition = if self.job_ready(job) {
                self.condition(
                    PodGroupConditionType::Scheduled,
                    "TasksScheduled",
                    format!(
                        "{} of {} tasks scheduled",
                        job.ready_task_num(),
                        job.tasks.len()
                    ),
                )
            } else {
                self.condition(
                    PodGroupConditionType::Unschedulable,
                    "NotEnoughResources",
                    job.fit_error(),
                )
            };
            if let Some(updated) = updated_pod_group(job, pg, condition) {
                updates.push(updated);
            }
        }

        for (job, result) in self.invalid_jobs.values() {
            let Some(pg) = &job.pod_group else { continue };
            let condition = self.condition(
                PodGroupConditionType::Unschedulable,
                &result.reason,
                result.message.clone(),
            );
            if let Some(updated) = updated_pod_group(job, pg, condition) {
                updates.push(updated);
            }
        }
        updates
    }

    fn condition(&self, kind: PodGroupConditionType, reason: &str, message: String) -> PodGroupCondition {
        PodGroupCondition {
            kind,
            status: true,
            transition_id: self.state.uid.clone(),
            reason: reason.to_string(),
            message,
        }
    }

    fn queue_status_updates(&self, job_updates: &[PodGroup]) -> Vec<Queue> {
        let updated: BTreeMap<String, PodGroupPhase> = job_updates
            .iter()
            .map(|pg| (pg.metadata.key(), pg.status.phase))
            .collect();

        let jobs = self
            .state
            .jobs
            .values()
            .chain(self.invalid_jobs.values().map(|(job, _)| job));

        let mut counts: BTreeMap<&str, [u32; 4]> = BTreeMap::new();
        for job in jobs {
            let Some(phase) = updated.get(&job.uid).copied().or_else(|| job.phase()) else {
                continue;
            };
            let slot = counts.entry(job.queue.as_str()).or_default();
            match phase {
                PodGroupPhase::Pending => slot[0] += 1,
                PodGroupPhase::Inqueue => slot[1] += 1,
                PodGroupPhase::Running => slot[2] += 1,
                PodGroupPhase::Unknown => slot[3] += 1,
                PodGroupPhase::Completed => {}
            }
        }

        let mut updates = Vec::new();
        for queue in self.state.queues.values() {
            let [pending, inqueue, running, unknown] =
                counts.get(queue.name.as_str()).copied().unwrap_or_default();
            let status = &queue.queue.status;
            if (status.pending, status.inqueue, status.running, status.unknown)
                == (pending, inqueue, running, unknown)
            {
                continue;
            }
            let mut updated = queue.queue.clone();
            updated.status.pending = pending;
            updated.status.inqueue = inqueue;
            updated.status.running = running;
            updated.status.unknown = unknown;
            updates.push(updated);
        }
        updates
    }
}

/// The PodGroup with refreshed counters, phase and condition, or `None`
/// when nothing changed.
fn updated_pod_group(job: &JobInfo, pg: &PodGroup, condition: PodGroupCondition) -> Option<PodGroup> {
    let mut status = pg.status.clone();
    status.running = job.count_status(TaskStatus::Running);
    status.succeeded = job.count_status(TaskStatus::Succeeded);
    status.failed = job.count_status(TaskStatus::Failed);
    status.phase = derive_phase(job, status.phase);
    set_condition(&mut status, condition);

    if status == pg.status {
        return None;
    }
    let mut updated = pg.clone();
    updated.status = status;
    Some(updated)
}

fn derive_phase(job: &JobInfo, current: PodGroupPhase) -> PodGroupPhase {
    let total = job.tasks.len() as u32;
    let finished = job.count_status(TaskStatus::Succeeded) + job.count_status(TaskStatus::Failed);
    if total > 0 && finished == total {
        PodGroupPhase::Completed
    } else if job.ready_task_num() >= job.min_available {
        PodGroupPhase::Running
    } else if current == PodGroupPhase::Inqueue {
        PodGroupPhase::Inqueue
    } else {
        PodGroupPhase::Pending
    }
}

/// Replace the condition of the same kind unless only the transition id
/// would change. A scheduled job drops its unschedulable condition.
fn set_condition(status: &mut PodGroupStatus, condition: PodGroupCondition) {
    let unchanged = status.conditions.iter().any(|c| {
        c.kind == condition.kind
            && c.status == condition.status
            && c.reason == condition.reason
            && c.message == condition.message
    });
    if unchanged {
        return;
    }
    status.conditions.retain(|c| {
        c.kind != condition.kind
            && !(condition.kind == PodGroupConditionType::Scheduled
                && c.kind == PodGroupConditionType::Unschedulable)
    });
    status.conditions.push(condition);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::Arguments;
    use gangway_api::builders::*;
    use gangway_api::{PodPhase, TaskInfo};
    use gangway_cache::recording::InMemoryVolumeBinder;
    use std::collections::BTreeMap as Map;

    /// Orders jobs by name descending and votes by a fixed table.
    struct Scripted {
        name: &'static str,
        pipelined: Option<Vote>,
        victims: Option<Vec<&'static str>>,
    }

    impl Plugin for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn job_order(&self, l: &JobInfo, r: &JobInfo) -> Option<Ordering> {
            Some(r.uid.cmp(&l.uid))
        }

        fn job_pipelined(&self, _: &JobInfo) -> Option<Vote> {
            self.pipelined
        }

        fn preemptable(&self, _: &TaskInfo, _: &[&TaskInfo]) -> Option<Vec<TaskId>> {
            self.victims
                .as_ref()
                .map(|v| v.iter().map(|s| s.to_string()).collect())
        }
    }

    fn registry() -> PluginRegistry {
        fn permit(_: &Arguments) -> Box<dyn Plugin> {
            Box::new(Scripted { name: "permit", pipelined: Some(Vote::Permit), victims: Some(vec!["a", "b"]) })
        }
        fn reject(_: &Arguments) -> Box<dyn Plugin> {
            Box::new(Scripted { name: "reject", pipelined: Some(Vote::Reject), victims: Some(vec!["b", "c"]) })
        }
        fn abstain(_: &Arguments) -> Box<dyn Plugin> {
            Box::new(Scripted { name: "abstain", pipelined: Some(Vote::Abstain), victims: None })
        }
        let mut registry = PluginRegistry::new();
        registry
            .register("permit", permit)
            .register("reject", reject)
            .register("abstain", abstain);
        registry
    }

    fn tiers(names: &[&[&str]]) -> Vec<Tier> {
        names
            .iter()
            .map(|t| Tier {
                plugins: t.iter().map(|n| PluginOption::new(n)).collect(),
            })
            .collect()
    }

    fn snapshot() -> Snapshot {
        let mut snap = Snapshot::default();
        let node = build_node(
            "n1",
            build_resource_list(&[("cpu", "2"), ("memory", "4G")]),
            Map::new(),
        );
        snap.nodes.insert("n1".to_string(), NodeInfo::new(&node));
        snap.queues
            .insert("q1".to_string(), QueueInfo::new(&build_queue("q1", 1)));
        for name in ["pg1", "pg2"] {
            let mut job = JobInfo::new(format!("c1/{name}"));
            job.set_pod_group(&build_pod_group("c1", name, "q1", 1));
            let pod = build_pod(
                "c1",
                &format!("{name}-p1"),
                "",
                PodPhase::Pending,
                build_resource_list(&[("cpu", "1"), ("memory", "1G")]),
                name,
                Map::new(),
                Map::new(),
            );
            job.add_task(TaskInfo::new(&pod)).unwrap();
            snap.jobs.insert(job.uid.clone(), job);
        }
        snap
    }

    fn open(tier_names: &[&[&str]]) -> Session {
        open_session(
            snapshot(),
            &tiers(tier_names),
            &registry(),
            Arc::new(InMemoryVolumeBinder::new()),
        )
        .unwrap()
    }

    #[test]
    fn unknown_and_duplicate_plugins_fail_open() {
        let vb = Arc::new(InMemoryVolumeBinder::new());
        let err = open_session(snapshot(), &tiers(&[&["nope"]]), &registry(), vb.clone())
            .err()
            .unwrap();
        assert!(matches!(err, FrameworkError::UnknownPlugin(_)));

        let err = open_session(snapshot(), &tiers(&[&["permit"], &["permit"]]), &registry(), vb)
            .err()
            .unwrap();
        assert!(matches!(err, FrameworkError::DuplicatePlugin { .. }));
    }

    #[test]
    fn job_order_uses_plugins_then_falls_back() {
        let ssn = open(&[&["permit"]]);
        let (a, b) = (&ssn.state.jobs["c1/pg1"], &ssn.state.jobs["c1/pg2"]);
        assert_eq!(ssn.job_order(a, b), Ordering::Greater);

        let ssn = open(&[]);
        let (a, b) = (&ssn.state.jobs["c1/pg1"], &ssn.state.jobs["c1/pg2"]);
        assert_eq!(ssn.job_order(a, b), Ordering::Less);
    }

    #[test]
    fn disabled_capability_is_skipped() {
        let mut t = tiers(&[&["permit"]]);
        t[0].plugins[0] = PluginOption::with_only("permit", &[Capability::JobPipelined]);
        let ssn = open_session(snapshot(), &t, &registry(), Arc::new(InMemoryVolumeBinder::new()))
            .unwrap();
        let (a, b) = (&ssn.state.jobs["c1/pg1"], &ssn.state.jobs["c1/pg2"]);
        assert_eq!(ssn.job_order(a, b), Ordering::Less);
    }

    #[test]
    fn pipelined_vote_by_tier() {
        let job = snapshot().jobs["c1/pg1"].clone();
        assert!(open(&[&["permit", "abstain"]]).job_pipelined(&job));
        assert!(!open(&[&["permit", "reject"]]).job_pipelined(&job));
        // The first tier permits, so the second is never consulted.
        assert!(open(&[&["permit"], &["reject"]]).job_pipelined(&job));
        assert!(!open(&[&["abstain"], &["reject"]]).job_pipelined(&job));
        assert!(open(&[&["abstain"]]).job_pipelined(&job));
    }

    #[test]
    fn victims_intersect_within_first_deciding_tier() {
        let ssn = open(&[&["abstain"], &["permit", "reject"]]);
        let task = ssn.state.jobs["c1/pg1"].tasks.values().next().unwrap().clone();
        assert_eq!(ssn.preemptable(&task, &[]), vec!["b".to_string()]);

        let ssn = open(&[&["reject"], &["permit"]]);
        assert_eq!(ssn.preemptable(&task, &[]), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn close_records_one_condition_per_job() {
        let ssn = open(&[]);
        let outcome = ssn.close();
        assert!(outcome.binds.is_empty());
        // With no job_ready plugin every job counts as ready.
        assert_eq!(outcome.job_updates.len(), 2);
        let pg = &outcome.job_updates[0];
        assert_eq!(pg.status.conditions.len(), 1);
        assert_eq!(pg.status.conditions[0].kind, PodGroupConditionType::Scheduled);
        assert_eq!(pg.status.phase, PodGroupPhase::Inqueue);
        assert_eq!(outcome.queue_updates.len(), 1);
        assert_eq!(outcome.queue_updates[0].status.inqueue, 2);
    }

    #[test]
    fn unchanged_condition_is_not_rewritten() {
        let job = snapshot().jobs["c1/pg1"].clone();
        let pg = job.pod_group.clone().unwrap();
        let cond = |id: &str| PodGroupCondition {
            kind: PodGroupConditionType::Unschedulable,
            status: true,
            transition_id: id.to_string(),
            reason: "NotEnoughResources".to_string(),
            message: "m".to_string(),
        };
        let first = updated_pod_group(&job, &pg, cond("s1")).unwrap();
        assert!(updated_pod_group(&job, &first, cond("s2")).is_none());
    }
}
