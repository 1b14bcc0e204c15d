use serde_json::json;

use super::World;
use crate::actions::{ActionCall, ActionOutcome};
use crate::error::SimResult;
use crate::llm::Clients;
use crate::scene::Scene;

/// Mutable view over one simulator's world and scene, handed to orderings so
/// that a policy may drive an agent through the regular dispatch path.
pub struct Stage<'a> {
    pub world: &'a mut World,
    pub scene: &'a mut dyn Scene,
    pub clients: &'a Clients,
}

impl<'a> Stage<'a> {
    pub fn new(world: &'a mut World, scene: &'a mut dyn Scene, clients: &'a Clients) -> Self {
        Self { world, scene, clients }
    }

    /// Run one action through the scene, bracketed by `action_start` and
    /// `action_end`, then flush whatever the action queued.
    pub fn dispatch(&mut self, actor: &str, call: &ActionCall) -> SimResult<ActionOutcome> {
        self.world.emit_event(
            "action_start",
            json!({ "agent": actor, "action": call }),
        );

        let outcome = self.scene.parse_and_handle_action(call, actor, self.world);

        let data = match &outcome {
            Ok(outcome) => json!({
                "agent": actor,
                "action": call.name,
                "success": outcome.success,
                "summary": outcome.summary,
                "result": outcome.result,
                "pass_control": outcome.pass_control,
            }),
            Err(e) => json!({
                "agent": actor,
                "action": call.name,
                "success": false,
                "error": e.to_string(),
            }),
        };
        self.world.emit_event("action_end", data);
        self.world.emit_remaining_events();

        outcome
    }
}
