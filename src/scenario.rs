use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::agent::AgentSpec;
use crate::error::SimResult;
use crate::llm::{Clients, LlmClient, ScriptedClient};
use crate::registry::Registry;
use crate::scene::SceneState;
use crate::simulator::{SimConfig, Simulator};
use crate::tree::SimTree;

fn default_scene() -> String {
    "basic".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    #[serde(default = "default_scene")]
    pub name: String,
    #[serde(default)]
    pub state: SceneState,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            name: default_scene(),
            state: SceneState::new(),
        }
    }
}

/// Canned replies for one named client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    pub replies: Vec<String>,
    #[serde(default)]
    pub repeat_last: bool,
}

/// Everything needed to build a root simulator, as read from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub sim: SimConfig,
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub scene: SceneConfig,
    #[serde(default)]
    pub clients: BTreeMap<String, ClientConfig>,
}

impl ScenarioConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing scenario {}", path.display()))
    }

    /// Fresh clients; scripts start from their first reply.
    pub fn clients(&self) -> Clients {
        let clients: HashMap<String, Arc<dyn LlmClient>> = self
            .clients
            .iter()
            .map(|(name, config)| {
                let mut client = ScriptedClient::new(config.replies.iter().cloned());
                if config.repeat_last {
                    client = client.repeating_last();
                }
                (name.clone(), Arc::new(client) as Arc<dyn LlmClient>)
            })
            .collect();
        Clients::new(clients)
    }

    pub fn build(&self, registry: &Registry) -> SimResult<Simulator> {
        Simulator::from_specs(
            self.sim.clone(),
            self.agents.clone(),
            &self.scene.name,
            self.scene.state.clone(),
            registry,
            self.clients(),
        )
    }

    pub fn build_tree(&self, registry: Arc<Registry>) -> SimResult<SimTree> {
        let sim = self.build(&registry)?;
        Ok(SimTree::new(&sim, registry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::OrderingConfig;
    use serde_json::json;

    #[test]
    fn test_minimal_scenario() {
        let scenario: ScenarioConfig = serde_json::from_value(json!({
            "agents": [
                { "name": "Alice", "client": "mock" },
                { "name": "Bob", "client": "mock", "properties": { "muted": true } }
            ],
            "clients": { "mock": { "replies": ["<action><yield/></action>"], "repeat_last": true } }
        }))
        .unwrap();

        assert_eq!(scenario.scene.name, "basic");
        assert_eq!(scenario.sim.ordering, OrderingConfig::Sequential);

        let mut sim = scenario.build(&Registry::new()).unwrap();
        let report = sim.run(4).unwrap();
        assert_eq!(report.turns_run, 4);
        assert_eq!(report.actions_ok, 2);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        std::fs::write(
            &path,
            r#"{"sim": {"name": "town", "ordering": {"policy": "cycled", "names": ["A"]}},
                "agents": [{"name": "A", "client": "c"}],
                "scene": {"state": {"topic": "harvest"}}}"#,
        )
        .unwrap();

        let scenario = ScenarioConfig::load(&path).unwrap();
        assert_eq!(scenario.sim.name, "town");
        assert_eq!(scenario.scene.state["topic"], "harvest");
        assert!(ScenarioConfig::load(dir.path().join("missing.json")).is_err());
    }
}
