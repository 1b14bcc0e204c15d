use serde_json::{Value, json};
use std::collections::VecDeque;

use crate::agent::Agent;
use crate::error::{SimError, SimResult};
use crate::event::{Event, EventSink, LogEvent};
use crate::llm::Role;

/// The part of a simulator that scenes and actions may touch: the agents,
/// the turn counter and the two event channels.
#[derive(Debug, Default)]
pub struct World {
    agents: Vec<Agent>,
    event_queue: VecDeque<LogEvent>,
    // immediate events not yet shown to the ordering policy
    inbox: Vec<LogEvent>,
    turns: u64,
    sink: Option<SinkHandle>,
}

#[derive(Clone)]
struct SinkHandle(EventSink);

impl std::fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EventSink")
    }
}

impl World {
    pub fn new(agents: Vec<Agent>) -> Self {
        Self { agents, ..Self::default() }
    }

    pub(crate) fn restore(agents: Vec<Agent>, event_queue: Vec<LogEvent>, turns: u64) -> Self {
        Self {
            agents,
            event_queue: event_queue.into(),
            inbox: Vec::new(),
            turns,
            sink: None,
        }
    }

    /// Independent copy: agents are rebuilt from their state, the sink and
    /// the undelivered inbox stay behind.
    pub(crate) fn fork(&self) -> Self {
        Self::restore(
            self.agents.iter().map(|a| Agent::deserialize(a.serialize())).collect(),
            self.event_queue.iter().cloned().collect(),
            self.turns,
        )
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agent(name).is_some()
    }

    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.name() == name)
    }

    pub fn agent_mut(&mut self, name: &str) -> Option<&mut Agent> {
        self.agents.iter_mut().find(|a| a.name() == name)
    }

    pub fn require_agent(&self, name: &str) -> SimResult<&Agent> {
        self.agent(name).ok_or_else(|| SimError::UnknownAgent(name.to_string()))
    }

    pub fn require_agent_mut(&mut self, name: &str) -> SimResult<&mut Agent> {
        self.agent_mut(name).ok_or_else(|| SimError::UnknownAgent(name.to_string()))
    }

    pub fn turns(&self) -> u64 {
        self.turns
    }

    pub(crate) fn advance_turn(&mut self) {
        self.turns += 1;
    }

    pub(crate) fn set_sink(&mut self, sink: Option<EventSink>) {
        for agent in &mut self.agents {
            agent.set_log_sink(sink.clone());
        }
        self.sink = sink.map(SinkHandle);
    }

    /// Forward an event to the log handler now.
    pub fn emit_event(&mut self, kind: &str, data: Value) {
        let event = LogEvent::new(kind, data);
        if let Some(SinkHandle(sink)) = &self.sink {
            sink(event.clone());
        }
        self.inbox.push(event);
    }

    /// Queue an event until the next flush point.
    pub fn emit_event_later(&mut self, kind: &str, data: Value) {
        self.event_queue.push_back(LogEvent::new(kind, data));
    }

    pub fn emit_remaining_events(&mut self) {
        while let Some(event) = self.event_queue.pop_front() {
            self.emit_event(&event.kind, event.data);
        }
    }

    pub fn pending_events(&self) -> impl Iterator<Item = &LogEvent> {
        self.event_queue.iter()
    }

    pub(crate) fn take_inbox(&mut self) -> Vec<LogEvent> {
        std::mem::take(&mut self.inbox)
    }

    /// Put an event into one agent's memory.
    pub fn deliver(&mut self, recipient: &str, event: &Event) -> SimResult<()> {
        let text = event.to_string(Some(self.turns));
        self.require_agent_mut(recipient)?.append_memory(Role::User, text);
        Ok(())
    }

    /// Put an event into every agent's memory except `except`'s, and record it.
    pub fn broadcast(&mut self, event: &Event, except: Option<&str>) {
        let text = event.to_string(Some(self.turns));
        for agent in self.agents.iter_mut().filter(|a| Some(a.name()) != except) {
            agent.append_memory(Role::User, text.clone());
        }
        self.emit_event_later("public_event", json!({ "event": event, "turn": self.turns }));
    }
}
