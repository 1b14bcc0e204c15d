pub mod scripted;

pub use scripted::ScriptedClient;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{SimError, SimResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Opaque chat completion endpoint.
///
/// Blocking on purpose: a simulator run is a synchronous loop and the host
/// moves it onto a worker thread. Implementations are shared by every branch
/// of a tree and must tolerate concurrent calls.
pub trait LlmClient: Send + Sync + fmt::Debug {
    fn chat(&self, messages: &[ChatMessage]) -> anyhow::Result<String>;
}

/// Named client handles, shared read-only across every simulator of a tree.
#[derive(Debug, Clone, Default)]
pub struct Clients {
    inner: Arc<HashMap<String, Arc<dyn LlmClient>>>,
}

impl Clients {
    pub fn new(clients: HashMap<String, Arc<dyn LlmClient>>) -> Self {
        Self { inner: Arc::new(clients) }
    }

    pub fn single(name: impl Into<String>, client: Arc<dyn LlmClient>) -> Self {
        let mut map = HashMap::new();
        map.insert(name.into(), client);
        Self::new(map)
    }

    pub fn get(&self, name: &str) -> SimResult<&Arc<dyn LlmClient>> {
        self.inner
            .get(name)
            .ok_or_else(|| SimError::UnknownClient(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.keys().cloned().collect();
        names.sort();
        names
    }
}
