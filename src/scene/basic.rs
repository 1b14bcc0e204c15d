// Open-floor conversation. Game-specific scenes register their own factories.

use serde_json::{Value, json};
use tracing::debug;

use super::{Scene, SceneState};
use crate::actions::{ActionCall, ActionOutcome, ActionRegistry, ActionSet, ActionSpec};
use crate::agent::Agent;
use crate::error::{SimError, SimResult};
use crate::simulator::World;

const DEFAULT_ACTIONS: [&str; 4] = ["speak", "send_message", "yield", "schedule_order"];
const MODERATOR_ONLY: &str = "schedule_order";

#[derive(Debug, Clone)]
pub struct BasicScene {
    state: SceneState,
    actions: ActionSet,
    // catalog `state.actions` is resolved against
    catalog: ActionRegistry,
}

impl BasicScene {
    pub fn new(mut state: SceneState, registry: &ActionRegistry) -> SimResult<Self> {
        let names = action_names(state.get("actions"));
        let actions = registry.resolve(&names)?;

        state.insert("actions".to_string(), json!(names));
        state.entry("turn").or_insert(json!(0));

        Ok(Self {
            state,
            actions,
            catalog: registry.clone(),
        })
    }

    pub fn turn(&self) -> u64 {
        self.state.get("turn").and_then(Value::as_u64).unwrap_or(0)
    }
}

/// Names listed in `state.actions`, or the defaults when it is not a list.
fn action_names(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => DEFAULT_ACTIONS.iter().map(|s| s.to_string()).collect(),
    }
}

impl Scene for BasicScene {
    fn name(&self) -> &str {
        "basic"
    }

    fn scene_actions(&self, agent: &Agent) -> Vec<ActionSpec> {
        self.actions
            .specs()
            .into_iter()
            .filter(|spec| spec.name != MODERATOR_ONLY || agent.property_flag("moderator"))
            .collect()
    }

    fn action_spec(&self, name: &str) -> Option<ActionSpec> {
        self.actions.get(name).map(|action| action.spec())
    }

    fn status_prompt(&self, agent: &Agent, world: &World) -> String {
        match self.state.get("topic").and_then(Value::as_str) {
            Some(topic) => format!(
                "[Status] Turn {}. It is your turn, {}. Topic: {}",
                world.turns(),
                agent.name(),
                topic
            ),
            None => String::new(),
        }
    }

    fn should_skip_turn(&self, agent: &Agent, _world: &World) -> bool {
        agent.property_flag("muted")
    }

    fn parse_and_handle_action(
        &mut self,
        call: &ActionCall,
        actor: &str,
        world: &mut World,
    ) -> SimResult<ActionOutcome> {
        let action = self
            .actions
            .get(&call.name)
            .cloned()
            .ok_or_else(|| SimError::UnknownAction(call.name.clone()))?;

        if call.name == MODERATOR_ONLY && !world.require_agent(actor)?.property_flag("moderator") {
            return Err(SimError::action(MODERATOR_ONLY, format!("{} is not a moderator", actor)));
        }

        debug!("{} -> {}", actor, call.name);
        action.handle(call, actor, world, &mut self.state)
    }

    /// Re-resolves the action set when `actions` changes. Nothing is merged
    /// if a listed action is unknown.
    fn patch_state(&mut self, updates: SceneState) -> SimResult<()> {
        let resolved = match updates.get("actions") {
            Some(value) => {
                let names = action_names(Some(value));
                Some((self.catalog.resolve(&names)?, names))
            }
            None => None,
        };

        for (key, value) in updates {
            self.state.insert(key, value);
        }
        if let Some((actions, names)) = resolved {
            debug!("Scene actions now: {}", names.join(", "));
            self.actions = actions;
            self.state.insert("actions".to_string(), json!(names));
        }
        Ok(())
    }

    fn post_turn(&mut self, _actor: &str, _world: &mut World) {
        let next = self.turn() + 1;
        self.state.insert("turn".to_string(), json!(next));
    }

    fn is_complete(&self) -> bool {
        if self.state.get("complete").and_then(Value::as_bool).unwrap_or(false) {
            return true;
        }
        match self.state.get("max_turns").and_then(Value::as_u64) {
            Some(limit) => self.turn() >= limit,
            None => false,
        }
    }

    fn state(&self) -> &SceneState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SceneState {
        &mut self.state
    }

    fn clone_box(&self) -> Box<dyn Scene> {
        Box::new(self.clone())
    }
}
