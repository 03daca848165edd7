//! In-memory collaborators for tests and dry runs.
//!
//! `RecordingBinder` and `RecordingStatusUpdater` accept every write (unless
//! told to fail) and remember it. `InMemoryVolumeBinder` matches claims
//! against an in-memory set of volumes and storage classes and keeps a trace
//! of the volume operations performed for each task.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use gangway_api::{
    NodeInfo, PersistentVolume, PersistentVolumeClaim, Pod, PodGroup, PodVolumes, Queue,
    StaticBinding, StorageClass, TaskInfo,
};

use crate::error::{BindError, VolumeError};
use crate::interface::{Binder, BoxFuture, StatusUpdater, VolumeBinder};

pub const GET_POD_VOLUMES: &str = "GetPodVolumes";
pub const ALLOCATE_VOLUMES: &str = "AllocateVolumes";
pub const REVERT_VOLUMES: &str = "RevertVolumes";
pub const STATIC_BINDINGS: &str = "StaticBindings";
pub const DYNAMIC_PROVISIONS: &str = "DynamicProvisions";

const STORAGE: &str = "storage";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Binder ─────────────────────────────────────────────────────────

/// Records `namespace/name → node` for every successful bind.
#[derive(Debug, Default)]
pub struct RecordingBinder {
    binds: Mutex<BTreeMap<String, String>>,
    /// Remaining conflicts to report per pod.
    conflicts: Mutex<BTreeMap<String, u32>>,
    rejects: Mutex<BTreeSet<String>>,
}

impl RecordingBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a conflict for the next `count` binds of `pod_key`.
    pub fn inject_conflicts(&self, pod_key: &str, count: u32) {
        lock(&self.conflicts).insert(pod_key.to_string(), count);
    }

    /// Reject every bind of `pod_key`.
    pub fn reject(&self, pod_key: &str) {
        lock(&self.rejects).insert(pod_key.to_string());
    }

    pub fn binds(&self) -> BTreeMap<String, String> {
        lock(&self.binds).clone()
    }

    fn try_bind(&self, pod: &Pod, node: &str) -> Result<(), BindError> {
        let key = pod.metadata.key();
        if lock(&self.rejects).contains(&key) {
            return Err(BindError::Rejected(format!("pod {key} may not be bound")));
        }
        if let Some(left) = lock(&self.conflicts).get_mut(&key) {
            if *left > 0 {
                *left -= 1;
                return Err(BindError::Conflict(format!("pod {key}")));
            }
        }
        lock(&self.binds).insert(key, node.to_string());
        Ok(())
    }
}

impl Binder for RecordingBinder {
    fn bind<'a>(&'a self, pod: &'a Pod, node: &'a str) -> BoxFuture<'a, Result<(), BindError>> {
        Box::pin(async move { self.try_bind(pod, node) })
    }
}

// ── Status updater ─────────────────────────────────────────────────

/// Keeps the latest status written for each PodGroup and Queue.
#[derive(Debug, Default)]
pub struct RecordingStatusUpdater {
    pod_groups: Mutex<BTreeMap<String, PodGroup>>,
    queues: Mutex<BTreeMap<String, Queue>>,
    writes: AtomicU32,
    pending_conflicts: AtomicU32,
}

impl RecordingStatusUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` writes with a conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    pub fn pod_group(&self, key: &str) -> Option<PodGroup> {
        lock(&self.pod_groups).get(key).cloned()
    }

    pub fn queue(&self, name: &str) -> Option<Queue> {
        lock(&self.queues).get(name).cloned()
    }

    /// Successful writes so far.
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    fn take_conflict(&self, what: String) -> Result<(), BindError> {
        let took = self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            return Err(BindError::Conflict(what));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl StatusUpdater for RecordingStatusUpdater {
    fn update_pod_group<'a>(&'a self, pg: &'a PodGroup) -> BoxFuture<'a, Result<(), BindError>> {
        Box::pin(async move {
            let key = pg.metadata.key();
            self.take_conflict(format!("podgroup {key}"))?;
            lock(&self.pod_groups).insert(key, pg.clone());
            Ok(())
        })
    }

    fn update_queue_status<'a>(&'a self, queue: &'a Queue) -> BoxFuture<'a, Result<(), BindError>> {
        Box::pin(async move {
            let name = queue.metadata.name.clone();
            self.take_conflict(format!("queue {name}"))?;
            lock(&self.queues).insert(name, queue.clone());
            Ok(())
        })
    }
}

// ── Volume binder ──────────────────────────────────────────────────

#[derive(Debug, Default)]
struct VolumeState {
    claims: BTreeMap<String, PersistentVolumeClaim>,
    volumes: BTreeMap<String, PersistentVolume>,
    classes: BTreeMap<String, StorageClass>,
    /// volume name → claim key holding the reservation.
    reserved: BTreeMap<String, String>,
    failing_provisions: BTreeSet<String>,
    /// Every operation in call order, as `(task key, action)`.
    trace: Vec<(String, &'static str)>,
}

impl VolumeState {
    fn record(&mut self, task: &TaskInfo, action: &'static str) {
        debug!(task = %task.key(), action, "volume operation");
        self.trace.push((task.key(), action));
    }
}

/// Volume binder over in-memory claims, volumes and storage classes.
#[derive(Debug, Default)]
pub struct InMemoryVolumeBinder {
    state: Mutex<VolumeState>,
}

impl InMemoryVolumeBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_claim(&self, claim: PersistentVolumeClaim) {
        lock(&self.state).claims.insert(claim.metadata.key(), claim);
    }

    pub fn add_volume(&self, volume: PersistentVolume) {
        lock(&self.state)
            .volumes
            .insert(volume.metadata.name.clone(), volume);
    }

    pub fn add_storage_class(&self, class: StorageClass) {
        lock(&self.state)
            .classes
            .insert(class.metadata.name.clone(), class);
    }

    /// Make provisioning of `claim_key` fail at bind time.
    pub fn fail_provisioning(&self, claim_key: &str) {
        lock(&self.state)
            .failing_provisions
            .insert(claim_key.to_string());
    }

    pub fn claim(&self, key: &str) -> Option<PersistentVolumeClaim> {
        lock(&self.state).claims.get(key).cloned()
    }

    /// Operations performed for one task, in order.
    pub fn actions(&self, task_key: &str) -> Vec<String> {
        lock(&self.state)
            .trace
            .iter()
            .filter(|(task, _)| task == task_key)
            .map(|(_, action)| action.to_string())
            .collect()
    }

    /// Every operation performed, in order.
    pub fn all_actions(&self) -> Vec<String> {
        lock(&self.state)
            .trace
            .iter()
            .map(|(_, action)| action.to_string())
            .collect()
    }
}

fn storage_of(list: &gangway_api::ResourceList) -> f64 {
    list.get(STORAGE).map(|q| q.value()).unwrap_or(0.0)
}

impl VolumeBinder for InMemoryVolumeBinder {
    fn get_pod_volumes(&self, task: &TaskInfo, node: &NodeInfo) -> Result<PodVolumes, VolumeError> {
        let mut state = lock(&self.state);
        state.record(task, GET_POD_VOLUMES);

        let mut decided = PodVolumes::default();
        for name in &task.pod.spec.volume_claims {
            let key = format!("{}/{}", task.namespace, name);
            let claim = state
                .claims
                .get(&key)
                .ok_or_else(|| VolumeError::ClaimNotFound(key.clone()))?;
            if claim.volume_name.is_some() {
                continue;
            }

            let wanted = storage_of(&claim.requests);
            let matching = state.volumes.values().find(|pv| {
                pv.claim_ref.is_none()
                    && !state.reserved.contains_key(&pv.metadata.name)
                    && pv.storage_class_name == claim.storage_class_name
                    && storage_of(&pv.capacity) >= wanted
                    && pv
                        .node_affinity
                        .as_ref()
                        .is_none_or(|term| term.matches(node.labels()))
            });
            if let Some(pv) = matching {
                decided.static_bindings.push(StaticBinding {
                    claim: key,
                    volume: pv.metadata.name.clone(),
                });
                continue;
            }

            let provisionable = claim
                .storage_class_name
                .as_ref()
                .and_then(|sc| state.classes.get(sc))
                .is_some_and(|sc| !sc.provisioner.is_empty());
            if !provisionable {
                return Err(VolumeError::Unsatisfiable {
                    claim: key,
                    node: node.name.clone(),
                });
            }
            decided.dynamic_provisions.push(key);
        }
        Ok(decided)
    }

    fn allocate_volumes(
        &self,
        task: &TaskInfo,
        node: &str,
        volumes: &PodVolumes,
    ) -> Result<(), VolumeError> {
        let mut state = lock(&self.state);
        state.record(task, ALLOCATE_VOLUMES);

        for binding in &volumes.static_bindings {
            if let Some(holder) = state.reserved.get(&binding.volume) {
                if *holder != binding.claim {
                    return Err(VolumeError::AlreadyReserved {
                        volume: binding.volume.clone(),
                        claim: holder.clone(),
                    });
                }
            }
        }
        for binding in &volumes.static_bindings {
            state
                .reserved
                .insert(binding.volume.clone(), binding.claim.clone());
        }
        debug!(task = %task.key(), %node, "volumes reserved");
        Ok(())
    }

    fn revert_volumes(&self, task: &TaskInfo, volumes: &PodVolumes) {
        let mut state = lock(&self.state);
        state.record(task, REVERT_VOLUMES);
        for binding in &volumes.static_bindings {
            if state.reserved.get(&binding.volume) == Some(&binding.claim) {
                state.reserved.remove(&binding.volume);
            }
        }
    }

    fn bind_volumes<'a>(
        &'a self,
        task: &'a TaskInfo,
        volumes: &'a PodVolumes,
    ) -> BoxFuture<'a, Result<(), VolumeError>> {
        Box::pin(async move {
            self.bind_static(task, volumes);
            Ok(())
        })
    }

    fn dynamic_provisions<'a>(
        &'a self,
        task: &'a TaskInfo,
        volumes: &'a PodVolumes,
    ) -> BoxFuture<'a, Result<(), VolumeError>> {
        Box::pin(async move { self.provision(task, volumes) })
    }
}

impl InMemoryVolumeBinder {
    fn bind_static(&self, task: &TaskInfo, volumes: &PodVolumes) {
        if volumes.static_bindings.is_empty() {
            return;
        }
        let mut state = lock(&self.state);
        state.record(task, STATIC_BINDINGS);
        for binding in &volumes.static_bindings {
            state.reserved.remove(&binding.volume);
            if let Some(pv) = state.volumes.get_mut(&binding.volume) {
                pv.claim_ref = Some(binding.claim.clone());
            }
            if let Some(claim) = state.claims.get_mut(&binding.claim) {
                claim.volume_name = Some(binding.volume.clone());
            }
        }
    }

    fn provision(&self, task: &TaskInfo, volumes: &PodVolumes) -> Result<(), VolumeError> {
        if volumes.dynamic_provisions.is_empty() {
            return Ok(());
        }
        let mut state = lock(&self.state);
        state.record(task, DYNAMIC_PROVISIONS);
        for key in &volumes.dynamic_provisions {
            if state.failing_provisions.contains(key) {
                return Err(VolumeError::Provisioning {
                    claim: key.clone(),
                    message: "provisioner unavailable".to_string(),
                });
            }
            let Some(claim) = state.claims.get_mut(key) else {
                return Err(VolumeError::ClaimNotFound(key.clone()));
            };
            let volume_name = format!("pvc-{}", claim.metadata.uid_or_key().replace('/', "-"));
            claim.volume_name = Some(volume_name.clone());
            let mut pv = PersistentVolume {
                storage_class_name: claim.storage_class_name.clone(),
                capacity: claim.requests.clone(),
                claim_ref: Some(key.clone()),
                ..PersistentVolume::default()
            };
            pv.metadata.name = volume_name.clone();
            state.volumes.insert(volume_name, pv);
        }
        Ok(())
    }
}
