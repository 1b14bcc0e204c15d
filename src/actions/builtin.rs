// The generic conversation actions every scene can opt into.

use serde_json::json;

use super::{Action, ActionCall, ActionOutcome, ActionSpec};
use crate::error::{SimError, SimResult};
use crate::event::Event;
use crate::scene::SceneState;
use crate::simulator::World;

#[derive(Debug, Clone, Copy)]
pub struct Speak;

impl Action for Speak {
    fn name(&self) -> &str {
        "speak"
    }

    fn spec(&self) -> ActionSpec {
        ActionSpec::new("speak", "Say something to everyone and end your turn.", &["content"])
    }

    fn handle(
        &self,
        call: &ActionCall,
        actor: &str,
        world: &mut World,
        _state: &mut SceneState,
    ) -> SimResult<ActionOutcome> {
        let content = call.require("content")?;
        world.broadcast(&Event::speak(actor, content), Some(actor));

        Ok(ActionOutcome::done(format!("{} said: {}", actor, content))
            .with_result(json!({ "content": content }))
            .passing())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SendMessage;

impl Action for SendMessage {
    fn name(&self) -> &str {
        "send_message"
    }

    fn spec(&self) -> ActionSpec {
        ActionSpec::new(
            "send_message",
            "Privately message one other participant. You keep the floor.",
            &["to", "content"],
        )
    }

    fn handle(
        &self,
        call: &ActionCall,
        actor: &str,
        world: &mut World,
        _state: &mut SceneState,
    ) -> SimResult<ActionOutcome> {
        let to = call.require("to")?;
        let content = call.require("content")?;

        if to == actor {
            return Err(SimError::action("send_message", "cannot message yourself"));
        }
        if !world.contains(to) {
            return Err(SimError::action("send_message", format!("no participant named '{}'", to)));
        }

        world.deliver(to, &Event::message(actor, content))?;
        world.require_agent_mut(actor)?
            .add_env_feedback(format!("Your private message to {} was delivered.", to));
        world.emit_event_later(
            "private_message",
            json!({ "from": actor, "to": to, "content": content, "turn": world.turns() }),
        );

        Ok(ActionOutcome::done(format!("{} messaged {}", actor, to))
            .with_result(json!({ "to": to, "content": content })))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Yield;

impl Action for Yield {
    fn name(&self) -> &str {
        "yield"
    }

    fn spec(&self) -> ActionSpec {
        ActionSpec::new("yield", "Do nothing and pass the floor.", &[])
    }

    fn handle(
        &self,
        _call: &ActionCall,
        actor: &str,
        _world: &mut World,
        _state: &mut SceneState,
    ) -> SimResult<ActionOutcome> {
        Ok(ActionOutcome::done(format!("{} yielded", actor)).passing())
    }
}

/// Moderator picks who acts next. The chosen names travel to the ordering
/// policy through the immediate `schedule_order` event.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleOrder;

impl ScheduleOrder {
    pub fn split_names(raw: &str) -> Vec<String> {
        raw.split([',', '\n'])
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

impl Action for ScheduleOrder {
    fn name(&self) -> &str {
        "schedule_order"
    }

    fn spec(&self) -> ActionSpec {
        ActionSpec::new(
            "schedule_order",
            "Decide who acts next, as a comma-separated list of names.",
            &["order"],
        )
    }

    fn handle(
        &self,
        call: &ActionCall,
        actor: &str,
        world: &mut World,
        _state: &mut SceneState,
    ) -> SimResult<ActionOutcome> {
        let names = Self::split_names(call.require("order")?);
        if names.is_empty() {
            return Err(SimError::action("schedule_order", "empty order"));
        }

        world.emit_event("schedule_order", json!({ "actor": actor, "order": names }));

        Ok(ActionOutcome::done(format!("{} scheduled: {}", actor, names.join(", ")))
            .with_result(json!(names))
            .passing())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentSpec};

    fn world() -> World {
        World::new(vec![
            Agent::from_spec(AgentSpec::new("Alice", "mock")),
            Agent::from_spec(AgentSpec::new("Bob", "mock")),
        ])
    }

    #[test]
    fn test_speak_reaches_others_and_passes() {
        let mut world = world();
        let call = ActionCall::new("speak").with_field("content", "good morning");
        let outcome = Speak.handle(&call, "Alice", &mut world, &mut SceneState::new()).unwrap();

        assert!(outcome.pass_control);
        assert_eq!(world.agent("Bob").unwrap().short_memory().len(), 1);
        assert!(world.agent("Alice").unwrap().short_memory().is_empty());
    }

    #[test]
    fn test_send_message_keeps_floor() {
        let mut world = world();
        let call = ActionCall::new("send_message").with_field("to", "Bob").with_field("content", "psst");
        let outcome = SendMessage.handle(&call, "Alice", &mut world, &mut SceneState::new()).unwrap();

        assert!(!outcome.pass_control);
        assert!(world.agent("Bob").unwrap().short_memory()[0].content.contains("[Private] Alice: psst"));
        assert_eq!(world.agent("Alice").unwrap().short_memory().len(), 1);
    }

    #[test]
    fn test_send_message_to_stranger_fails() {
        let mut world = world();
        let call = ActionCall::new("send_message").with_field("to", "Zed").with_field("content", "hi");
        assert!(SendMessage.handle(&call, "Alice", &mut world, &mut SceneState::new()).is_err());
    }

    #[test]
    fn test_schedule_order_emits_names() {
        let mut world = world();
        let call = ActionCall::new("schedule_order").with_field("order", "Bob, Alice,,");
        let outcome = ScheduleOrder.handle(&call, "Alice", &mut world, &mut SceneState::new()).unwrap();

        assert_eq!(outcome.result, json!(["Bob", "Alice"]));
        let inbox = world.take_inbox();
        assert_eq!(inbox[0].kind, "schedule_order");
        assert_eq!(inbox[0].data["order"], json!(["Bob", "Alice"]));
    }
}
