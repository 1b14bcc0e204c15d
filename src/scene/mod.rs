pub mod basic;

pub use basic::BasicScene;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

use crate::actions::{ActionCall, ActionOutcome, ActionRegistry, ActionSpec};
use crate::agent::Agent;
use crate::error::{SimError, SimResult};
use crate::simulator::World;

/// Open key/value state owned by a scene.
pub type SceneState = Map<String, Value>;

/// Rule object mediating a simulation: what agents may do, who gets
/// skipped, and when it is over.
pub trait Scene: Send + fmt::Debug {
    fn name(&self) -> &str;

    fn initialize_agent(&mut self, _agent: &mut Agent) {}

    fn scene_actions(&self, agent: &Agent) -> Vec<ActionSpec>;

    /// Catalog entry for one action, whether or not `scene_actions` offers it to everyone.
    fn action_spec(&self, name: &str) -> Option<ActionSpec>;

    fn status_prompt(&self, _agent: &Agent, _world: &World) -> String {
        String::new()
    }

    fn should_skip_turn(&self, _agent: &Agent, _world: &World) -> bool {
        false
    }

    fn parse_and_handle_action(
        &mut self,
        call: &ActionCall,
        actor: &str,
        world: &mut World,
    ) -> SimResult<ActionOutcome>;

    fn post_turn(&mut self, _actor: &str, _world: &mut World) {}

    fn is_complete(&self) -> bool;

    fn state(&self) -> &SceneState;

    fn state_mut(&mut self) -> &mut SceneState;

    /// Shallow merge. Scenes that derive behavior from their state must
    /// rebuild it here so a patched scene acts like one restored from the
    /// patched state.
    fn patch_state(&mut self, updates: SceneState) -> SimResult<()> {
        let state = self.state_mut();
        for (key, value) in updates {
            state.insert(key, value);
        }
        Ok(())
    }

    fn serialize(&self) -> Value {
        Value::Object(self.state().clone())
    }

    fn clone_box(&self) -> Box<dyn Scene>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub name: String,
    pub state: Value,
}

impl SceneSnapshot {
    pub fn of(scene: &dyn Scene) -> Self {
        Self {
            name: scene.name().to_string(),
            state: scene.serialize(),
        }
    }
}

type SceneFactory = Box<dyn Fn(SceneState, &ActionRegistry) -> SimResult<Box<dyn Scene>> + Send + Sync>;

/// Builds scenes by name, both fresh and from serialized state.
pub struct SceneRegistry {
    scenes: HashMap<String, SceneFactory>,
}

impl SceneRegistry {
    pub fn new() -> Self {
        let mut registry = Self { scenes: HashMap::new() };
        registry.register_builtin();
        registry
    }

    fn register_builtin(&mut self) {
        self.register("basic", |state, actions| {
            Ok(Box::new(BasicScene::new(state, actions)?) as Box<dyn Scene>)
        });
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(SceneState, &ActionRegistry) -> SimResult<Box<dyn Scene>> + Send + Sync + 'static,
    {
        self.scenes.insert(name.to_lowercase(), Box::new(factory));
    }

    pub fn create(&self, name: &str, state: SceneState, actions: &ActionRegistry) -> SimResult<Box<dyn Scene>> {
        let factory = self
            .scenes
            .get(&name.to_lowercase())
            .ok_or_else(|| SimError::UnknownScene(name.to_string()))?;
        factory(state, actions)
    }

    pub fn restore(&self, snapshot: SceneSnapshot, actions: &ActionRegistry) -> SimResult<Box<dyn Scene>> {
        let state = match snapshot.state {
            Value::Object(map) => map,
            Value::Null => SceneState::new(),
            other => return Err(SimError::malformed(format!("scene state must be an object, got {}", other))),
        };
        self.create(&snapshot.name, state, actions)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scenes.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for SceneRegistry {
    fn default() -> Self {
        Self::new()
    }
}
