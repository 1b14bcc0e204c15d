pub mod parse;
pub mod prompt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use tracing::{debug, warn};

use crate::actions::{ActionCall, ActionSpec};
use crate::error::{SimError, SimResult};
use crate::event::{EventSink, LogEvent};
use crate::llm::{ChatMessage, Clients, Role};
use parse::PlanUpdate;

const DEFAULT_MAX_REPEAT: u32 = 2;

fn default_emotion() -> String {
    "neutral".to_string()
}

/// The agent's working plan. Replaced as a whole, never patched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanState {
    pub goals: Vec<String>,
    pub milestones: Vec<String>,
    pub strategy: String,
    pub notes: String,
}

impl PlanState {
    pub fn render(&self) -> String {
        let list = |items: &[String]| {
            if items.is_empty() {
                "(none)".to_string()
            } else {
                items.join("; ")
            }
        };
        format!(
            "Goals: {}\nMilestones: {}\nStrategy: {}\nNotes: {}",
            list(&self.goals),
            list(&self.milestones),
            if self.strategy.is_empty() { "(none)" } else { &self.strategy },
            if self.notes.is_empty() { "(none)" } else { &self.notes },
        )
    }
}

/// Declarative description used to build an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub client: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub guidelines: String,
    #[serde(default)]
    pub plan_state: PlanState,
    #[serde(default = "default_emotion")]
    pub emotion: String,
    #[serde(default)]
    pub max_repeat: Option<u32>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, client: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client: client.into(),
            properties: Map::new(),
            guidelines: String::new(),
            plan_state: PlanState::default(),
            emotion: default_emotion(),
            max_repeat: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_guidelines(mut self, guidelines: impl Into<String>) -> Self {
        self.guidelines = guidelines.into();
        self
    }
}

/// Everything mutable about an agent, in JSON-safe form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub name: String,
    pub client: String,
    pub properties: Map<String, Value>,
    pub guidelines: String,
    pub short_memory: Vec<ChatMessage>,
    pub plan_state: PlanState,
    pub action_space: Vec<ActionSpec>,
    pub emotion: String,
    pub last_history_length: usize,
    pub max_repeat: u32,
}

pub struct Agent {
    name: String,
    client: String,
    properties: Map<String, Value>,
    guidelines: String,
    short_memory: Vec<ChatMessage>,
    plan_state: PlanState,
    action_space: Vec<ActionSpec>,
    emotion: String,
    // memory length when the LLM was last consulted
    last_history_length: usize,
    max_repeat: u32,
    log_sink: Option<EventSink>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("client", &self.client)
            .field("memory_len", &self.short_memory.len())
            .field("emotion", &self.emotion)
            .finish_non_exhaustive()
    }
}

impl Agent {
    pub fn from_spec(spec: AgentSpec) -> Self {
        Self {
            name: spec.name,
            client: spec.client,
            properties: spec.properties,
            guidelines: spec.guidelines,
            short_memory: Vec::new(),
            plan_state: spec.plan_state,
            action_space: Vec::new(),
            emotion: spec.emotion,
            last_history_length: 0,
            max_repeat: spec.max_repeat.unwrap_or(DEFAULT_MAX_REPEAT),
            log_sink: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.properties
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    pub fn property_flag(&self, key: &str) -> bool {
        self.properties.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn guidelines(&self) -> &str {
        &self.guidelines
    }

    pub fn short_memory(&self) -> &[ChatMessage] {
        &self.short_memory
    }

    pub fn plan_state(&self) -> &PlanState {
        &self.plan_state
    }

    pub fn action_space(&self) -> &[ActionSpec] {
        &self.action_space
    }

    pub fn set_action_space(&mut self, actions: Vec<ActionSpec>) {
        self.action_space = actions;
    }

    pub fn emotion(&self) -> &str {
        &self.emotion
    }

    pub fn last_history_length(&self) -> usize {
        self.last_history_length
    }

    pub fn set_log_sink(&mut self, sink: Option<EventSink>) {
        self.log_sink = sink;
    }

    pub fn set_max_repeat(&mut self, max_repeat: u32) {
        self.max_repeat = max_repeat;
    }

    fn log_event(&self, kind: &str, data: Value) {
        if let Some(sink) = &self.log_sink {
            sink(LogEvent::new(kind, data));
        }
    }

    /// Append a memory turn and report it as a context delta.
    pub fn append_memory(&mut self, role: Role, content: impl Into<String>) {
        let content = content.into();
        self.log_event(
            "agent_ctx_delta",
            json!({ "agent": self.name, "role": role, "content": content }),
        );
        self.short_memory.push(ChatMessage::new(role, content));
    }

    /// Non-conversational signal from the environment.
    pub fn add_env_feedback(&mut self, content: impl Into<String>) {
        self.append_memory(Role::User, content);
    }

    pub fn replace_plan(&mut self, plan: PlanState) {
        self.log_event("agent_plan_update", json!({ "agent": self.name, "plan_state": plan }));
        self.plan_state = plan;
    }

    pub fn set_emotion(&mut self, emotion: impl Into<String>) {
        self.emotion = emotion.into();
        self.log_event("agent_emotion_update", json!({ "agent": self.name, "emotion": self.emotion }));
    }

    /// Consult the LLM and turn its reply into at most one action.
    ///
    /// Without initiative the agent only speaks when its memory grew since
    /// the last call. Parse failures are retried `max_repeat` times; the raw
    /// reply of the last failed attempt is still committed to memory so the
    /// same stimulus is not reprocessed forever. Transport failures are not
    /// retried here.
    pub fn process(&mut self, clients: &Clients, initiative: bool) -> SimResult<Vec<ActionCall>> {
        if !initiative && self.short_memory.len() == self.last_history_length {
            return Ok(Vec::new());
        }

        let client = clients.get(&self.client)?.clone();
        let messages = prompt::build_messages(self);
        let attempts = self.max_repeat + 1;
        let mut failure = None;

        for attempt in 1..=attempts {
            let raw = client.chat(&messages).map_err(|source| SimError::Llm {
                agent: self.name.clone(),
                source,
            })?;

            match parse::parse_response(&raw) {
                Ok(parsed) => {
                    self.append_memory(Role::Assistant, raw);
                    self.last_history_length = self.short_memory.len();

                    if let PlanUpdate::Replace(plan) = parsed.plan_update {
                        self.replace_plan(plan);
                    }
                    if let Some(emotion) = parsed.emotion_update {
                        self.set_emotion(emotion);
                    }

                    self.log_event(
                        "agent_response",
                        json!({
                            "agent": self.name,
                            "thoughts": parsed.thoughts,
                            "plan": parsed.plan,
                            "action": parsed.action,
                        }),
                    );
                    debug!("Agent {} answered on attempt {}", self.name, attempt);

                    return Ok(parsed.action.into_iter().collect());
                }
                Err(reason) => {
                    warn!("Agent {} attempt {}/{}: {}", self.name, attempt, attempts, reason);
                    failure = Some((raw, reason));
                }
            }
        }

        let (raw, reason) = failure.unwrap_or_default();
        self.append_memory(Role::Assistant, raw);
        self.last_history_length = self.short_memory.len();

        Err(SimError::MalformedResponse {
            agent: self.name.clone(),
            attempts,
            reason,
        })
    }

    pub fn serialize(&self) -> AgentState {
        AgentState {
            name: self.name.clone(),
            client: self.client.clone(),
            properties: self.properties.clone(),
            guidelines: self.guidelines.clone(),
            short_memory: self.short_memory.clone(),
            plan_state: self.plan_state.clone(),
            action_space: self.action_space.clone(),
            emotion: self.emotion.clone(),
            last_history_length: self.last_history_length,
            max_repeat: self.max_repeat,
        }
    }

    pub fn deserialize(state: AgentState) -> Self {
        Self {
            name: state.name,
            client: state.client,
            properties: state.properties,
            guidelines: state.guidelines,
            short_memory: state.short_memory,
            plan_state: state.plan_state,
            action_space: state.action_space,
            emotion: state.emotion,
            last_history_length: state.last_history_length,
            max_repeat: state.max_repeat,
            log_sink: None,
        }
    }
}
