//! Name → constructor map used to instantiate the plugins a tier lists.

use std::collections::BTreeMap;

use crate::conf::Arguments;
use crate::error::{FrameworkError, FrameworkResult};
use crate::plugin::Plugin;

/// Builds a fresh plugin instance for one session.
pub type PluginBuilder = fn(&Arguments) -> Box<dyn Plugin>;

#[derive(Clone, Default)]
pub struct PluginRegistry {
    builders: BTreeMap<String, PluginBuilder>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `builder` under `name`, replacing any earlier registration.
    pub fn register(&mut self, name: &str, builder: PluginBuilder) -> &mut Self {
        self.builders.insert(name.to_string(), builder);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }

    pub fn build(&self, name: &str, arguments: &Arguments) -> FrameworkResult<Box<dyn Plugin>> {
        let builder = self
            .builders
            .get(name)
            .ok_or_else(|| FrameworkError::UnknownPlugin(name.to_string()))?;
        Ok(builder(arguments))
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.builders.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Plugin for Noop {
        fn name(&self) -> &str {
            "noop"
        }
    }

    fn noop(_: &Arguments) -> Box<dyn Plugin> {
        Box::new(Noop)
    }

    #[test]
    fn builds_registered_plugins() {
        let mut registry = PluginRegistry::new();
        registry.register("noop", noop);
        assert!(registry.contains("noop"));
        assert_eq!(registry.build("noop", &Arguments::new()).unwrap().name(), "noop");
        assert!(matches!(
            registry.build("missing", &Arguments::new()),
            Err(FrameworkError::UnknownPlugin(_))
        ));
    }
}
