//! Volume decisions attached to a tentatively placed task.

use serde::{Deserialize, Serialize};

/// A claim matched to an existing PersistentVolume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticBinding {
    /// `namespace/name` of the claim.
    pub claim: String,
    pub volume: String,
}

/// What the volume binder decided for one task on one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodVolumes {
    pub static_bindings: Vec<StaticBinding>,
    /// Claims (`namespace/name`) that need a new volume provisioned.
    pub dynamic_provisions: Vec<String>,
}

impl PodVolumes {
    pub fn is_empty(&self) -> bool {
        self.static_bindings.is_empty() && self.dynamic_provisions.is_empty()
    }
}
