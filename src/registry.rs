use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::actions::ActionRegistry;
use crate::error::{SimError, SimResult};
use crate::ordering::Controller;
use crate::scene::SceneRegistry;
use crate::simulator::World;

/// Everything that turns names in a snapshot back into behavior.
///
/// Built once at startup and shared as `Arc<Registry>`; tests build their own.
pub struct Registry {
    pub actions: ActionRegistry,
    pub scenes: SceneRegistry,
    controllers: HashMap<String, Controller>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            actions: ActionRegistry::new(),
            scenes: SceneRegistry::new(),
            controllers: HashMap::new(),
        }
    }

    pub fn register_controller<F>(&mut self, name: &str, decide: F)
    where
        F: Fn(&World) -> Option<String> + Send + Sync + 'static,
    {
        self.controllers.insert(name.to_string(), Arc::new(decide));
    }

    pub fn controller(&self, name: &str) -> SimResult<Controller> {
        self.controllers
            .get(name)
            .cloned()
            .ok_or_else(|| SimError::UnknownController(name.to_string()))
    }

    pub fn controllers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.controllers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("actions", &self.actions.list())
            .field("scenes", &self.scenes.list())
            .field("controllers", &self.controllers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_lookup() {
        let mut registry = Registry::new();
        registry.register_controller("first", |world: &World| world.names().into_iter().next());

        assert!(registry.controller("first").is_ok());
        assert!(matches!(registry.controller("nope"), Err(SimError::UnknownController(_))));
        assert_eq!(registry.controllers(), vec!["first"]);
    }
}
