//! Actions: the steps a scheduling cycle runs over its session.

use gangway_framework::Session;

use crate::allocate::{self, Allocate};
use crate::error::{SchedulerError, SchedulerResult};

/// One step of a scheduling cycle. Actions change the session only through
/// statements, and never fail the cycle: per-task and per-job problems are
/// recorded on the session and the action moves on.
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, ssn: &mut Session);
}

/// Resolve configured action names, in order.
pub fn build_actions(names: &[String]) -> SchedulerResult<Vec<Box<dyn Action>>> {
    names
        .iter()
        .map(|name| match name.as_str() {
            allocate::NAME => Ok(Box::new(Allocate) as Box<dyn Action>),
            other => Err(SchedulerError::UnknownAction(other.to_string())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_actions_in_order() {
        let actions = build_actions(&["allocate".to_string()]).unwrap();
        let names: Vec<&str> = actions.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["allocate"]);
    }

    #[test]
    fn unknown_action_is_an_error() {
        let err = build_actions(&["allocate".to_string(), "preempt".to_string()]).err();
        assert!(matches!(err, Some(SchedulerError::UnknownAction(name)) if name == "preempt"));
    }
}
