pub mod builtin;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::{SimError, SimResult};
use crate::scene::SceneState;
use crate::simulator::World;

/// Catalog entry shown to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    pub description: String,
    pub fields: Vec<String>,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn render(&self) -> String {
        let fields: String = self.fields.iter().map(|f| format!("<{0}>...</{0}>", f)).collect();
        format!(
            "- {name}: {desc} Usage: <{name}>{fields}</{name}>",
            name = self.name,
            desc = self.description,
            fields = fields,
        )
    }
}

/// One action an agent asked for: a name plus string fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCall {
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl ActionCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), fields: BTreeMap::new() }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> SimResult<&str> {
        self.field(key)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SimError::action(&self.name, format!("missing field '{}'", key)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub result: Value,
    pub summary: String,
    pub meta: Value,
    /// The actor gives up the floor for the rest of its turn.
    pub pass_control: bool,
}

impl ActionOutcome {
    pub fn done(summary: impl Into<String>) -> Self {
        Self {
            success: true,
            result: Value::Null,
            summary: summary.into(),
            meta: Value::Null,
            pass_control: false,
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = result;
        self
    }

    pub fn passing(mut self) -> Self {
        self.pass_control = true;
        self
    }
}

pub trait Action: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn spec(&self) -> ActionSpec;
    fn handle(
        &self,
        call: &ActionCall,
        actor: &str,
        world: &mut World,
        state: &mut SceneState,
    ) -> SimResult<ActionOutcome>;
}

/// A scene's allowed actions, resolved once from the registry.
#[derive(Debug, Clone, Default)]
pub struct ActionSet {
    actions: Vec<Arc<dyn Action>>,
}

impl ActionSet {
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Action>> {
        self.actions.iter().find(|a| a.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn specs(&self) -> Vec<ActionSpec> {
        self.actions.iter().map(|a| a.spec()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.name().to_string()).collect()
    }
}

/// Name to action catalog. Clones share the table until one of them registers more.
#[derive(Clone)]
pub struct ActionRegistry {
    actions: Arc<HashMap<String, Arc<dyn Action>>>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry").field("actions", &self.list()).finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        let mut registry = Self { actions: Arc::new(HashMap::new()) };
        registry.register_builtin();
        registry
    }

    fn register_builtin(&mut self) {
        self.register(Arc::new(builtin::Speak));
        self.register(Arc::new(builtin::SendMessage));
        self.register(Arc::new(builtin::Yield));
        self.register(Arc::new(builtin::ScheduleOrder));
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        Arc::make_mut(&mut self.actions).insert(action.name().to_lowercase(), action);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(&name.to_lowercase()).cloned()
    }

    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> SimResult<ActionSet> {
        let actions = names
            .iter()
            .map(|name| {
                self.get(name.as_ref())
                    .ok_or_else(|| SimError::UnknownAction(name.as_ref().to_string()))
            })
            .collect::<SimResult<Vec<_>>>()?;
        Ok(ActionSet { actions })
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_actions() {
        let registry = ActionRegistry::new();
        let set = registry.resolve(&["speak", "yield"]).unwrap();
        assert!(set.contains("speak"));
        assert!(!set.contains("send_message"));
        assert_eq!(set.names(), vec!["speak", "yield"]);
    }

    #[test]
    fn test_resolve_unknown_action_fails() {
        let registry = ActionRegistry::new();
        let err = registry.resolve(&["speak", "fly"]).unwrap_err();
        assert!(matches!(err, SimError::UnknownAction(name) if name == "fly"));
    }

    #[test]
    fn test_require_rejects_blank_field() {
        let call = ActionCall::new("speak").with_field("content", "  ");
        assert!(call.require("content").is_err());
    }
}
