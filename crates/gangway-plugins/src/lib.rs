//! gangway-plugins: the scheduling policies a session consults.
//!
//! | Plugin       | Hooks                                                        |
//! |--------------|--------------------------------------------------------------|
//! | `priority`   | job/task order by priority, preemptable                      |
//! | `gang`       | job valid/ready/pipelined, job order, preemptable/reclaimable |
//! | `drf`        | job/queue order by dominant share, preemptable               |
//! | `proportion` | queue order, overused, allocatable, reclaimable              |
//! | `predicates` | node unschedulable, taints, pod count, pod anti-affinity     |
//! | `nodeorder`  | least-requested, balanced-allocation, preferred affinity     |

pub mod drf;
pub mod gang;
pub mod nodeorder;
pub mod predicates;
pub mod priority;
pub mod proportion;

#[cfg(test)]
pub(crate) mod testing;

use gangway_framework::PluginRegistry;

/// Registry with every built-in plugin.
pub fn default_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry
        .register(priority::NAME, priority::build)
        .register(gang::NAME, gang::build)
        .register(drf::NAME, drf::build)
        .register(proportion::NAME, proportion::build)
        .register(predicates::NAME, predicates::build)
        .register(nodeorder::NAME, nodeorder::build);
    registry
}
