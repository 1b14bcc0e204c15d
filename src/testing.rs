// Fixtures shared by unit tests.

use std::sync::Arc;

use crate::actions::ActionRegistry;
use crate::agent::{Agent, AgentSpec};
use crate::llm::{Clients, ScriptedClient};
use crate::scene::{BasicScene, Scene, SceneState};
use crate::simulator::{Stage, World};

pub(crate) struct StageFixture {
    pub world: World,
    pub scene: Box<dyn Scene>,
    pub clients: Clients,
    pub client: Arc<ScriptedClient>,
}

impl StageFixture {
    pub fn with_agents(names: &[&str]) -> Self {
        Self::scripted(names, &[])
    }

    /// Agents all talk to one scripted client named "mock".
    pub fn scripted(names: &[&str], replies: &[&str]) -> Self {
        let client = Arc::new(ScriptedClient::new(replies.iter().copied()));
        let agents = names
            .iter()
            .map(|name| Agent::from_spec(AgentSpec::new(*name, "mock")))
            .collect();
        let scene = BasicScene::new(SceneState::new(), &ActionRegistry::new()).expect("basic scene");

        Self {
            world: World::new(agents),
            scene: Box::new(scene),
            clients: Clients::single("mock", client.clone()),
            client,
        }
    }

    pub fn flagged(mut self, name: &str, flag: &str) -> Self {
        if let Some(agent) = self.world.agent_mut(name) {
            agent.properties_mut().insert(flag.to_string(), serde_json::Value::Bool(true));
        }
        self
    }

    pub fn stage(&mut self) -> Stage<'_> {
        Stage::new(&mut self.world, self.scene.as_mut(), &self.clients)
    }
}
