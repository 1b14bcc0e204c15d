use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, info};

use super::{Ordering, OrderingSnapshot};
use crate::error::{SimError, SimResult};
use crate::event::LogEvent;
use crate::simulator::{Stage, World};

const SCHEDULE_ACTION: &str = "schedule_order";

/// Lets a moderator agent decide the speaking order.
///
/// Names are served from a FIFO. When it runs dry the moderator is prompted
/// and forced to take one LLM turn; it must answer with exactly one
/// `schedule_order` action. That action goes through the normal scene
/// dispatch, and the resulting `schedule_order` event refills the queue.
/// A moderator that does not comply is an error, never a silent fallback.
#[derive(Debug, Clone)]
pub struct LlmModeratedOrdering {
    moderator: String,
    // frozen at construction
    candidates: Vec<String>,
    queue: VecDeque<String>,
}

impl LlmModeratedOrdering {
    pub fn new(moderator: impl Into<String>, candidates: Vec<String>) -> Self {
        Self {
            moderator: moderator.into(),
            candidates,
            queue: VecDeque::new(),
        }
    }

    pub fn with_queue(mut self, queue: VecDeque<String>) -> Self {
        self.queue = queue;
        self
    }

    pub fn moderator(&self) -> &str {
        &self.moderator
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn queue(&self) -> impl Iterator<Item = &String> {
        self.queue.iter()
    }

    /// Append the names that belong to live agents; unknown names are dropped.
    pub fn add_to_queue<I>(&mut self, names: I, world: &World) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut added = 0;
        for name in names {
            if world.contains(&name) {
                self.queue.push_back(name);
                added += 1;
            } else {
                debug!("Moderator scheduled unknown agent '{}', dropping", name);
            }
        }
        added
    }

    fn contract(&self, reason: impl Into<String>) -> SimError {
        SimError::SchedulingContract {
            moderator: self.moderator.clone(),
            reason: reason.into(),
        }
    }

    fn refill(&mut self, stage: &mut Stage<'_>) -> SimResult<()> {
        let spec = stage
            .scene
            .action_spec(SCHEDULE_ACTION)
            .ok_or_else(|| self.contract("scene does not provide schedule_order"))?;

        let instruction = format!(
            "[Moderation] Decide who acts next. Candidates: {}. \
             Use the schedule_order action with the names in speaking order.",
            self.candidates.join(", ")
        );

        let moderator = stage.world.require_agent_mut(&self.moderator)?;
        let mut specs = stage.scene.scene_actions(moderator);
        if !specs.iter().any(|s| s.name == SCHEDULE_ACTION) {
            specs.push(spec);
        }
        moderator.add_env_feedback(instruction);
        moderator.set_action_space(specs);

        let calls: Vec<_> = moderator
            .process(stage.clients, true)?
            .into_iter()
            .filter(|call| call.name == SCHEDULE_ACTION)
            .collect();

        let [call] = calls.as_slice() else {
            return Err(self.contract(format!(
                "expected exactly one schedule_order action, got {}",
                calls.len()
            )));
        };

        stage
            .dispatch(&self.moderator, call)
            .map_err(|e| self.contract(e.to_string()))?;

        for event in stage.world.take_inbox() {
            self.on_event(&event, stage.world);
        }

        info!("Moderator {} scheduled {} turn(s)", self.moderator, self.queue.len());
        Ok(())
    }
}

impl Ordering for LlmModeratedOrdering {
    fn name(&self) -> &str {
        "llm_moderated"
    }

    fn next_actor(&mut self, stage: &mut Stage<'_>) -> SimResult<Option<String>> {
        if self.queue.is_empty() {
            self.refill(stage)?;
        }

        match self.queue.pop_front() {
            Some(name) => Ok(Some(name)),
            None => Err(self.contract("schedule named no live agents")),
        }
    }

    fn on_event(&mut self, event: &LogEvent, world: &World) {
        if event.kind != SCHEDULE_ACTION {
            return;
        }
        if let Some(Value::Array(order)) = event.data.get("order") {
            let names = order.iter().filter_map(Value::as_str).map(str::to_string);
            self.add_to_queue(names, world);
        }
    }

    fn snapshot(&self) -> OrderingSnapshot {
        OrderingSnapshot::LlmModerated {
            moderator: self.moderator.clone(),
            candidates: self.candidates.clone(),
            queue: self.queue.iter().cloned().collect(),
        }
    }

    fn clone_box(&self) -> Box<dyn Ordering> {
        Box::new(self.clone())
    }
}
