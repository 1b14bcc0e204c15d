pub mod actions;
pub mod agent;
pub mod error;
pub mod event;
pub mod llm;
pub mod metrics;
pub mod ordering;
pub mod registry;
pub mod scenario;
pub mod scene;
pub mod simulator;
pub mod tree;

#[cfg(test)]
mod testing;

pub use agent::Agent;
pub use error::{SimError, SimResult};
pub use metrics::MetricsCollector;
pub use registry::Registry;
pub use simulator::{SimConfig, Simulator};
pub use tree::{SharedTree, SimTree};

pub mod prelude {
    pub use crate::actions::{Action, ActionCall, ActionOutcome, ActionRegistry, ActionSpec};
    pub use crate::agent::{Agent, AgentSpec, PlanState};
    pub use crate::error::{SimError, SimResult};
    pub use crate::event::{Event, LogEvent, TreeEvent};
    pub use crate::llm::{ChatMessage, Clients, LlmClient, Role, ScriptedClient};
    pub use crate::metrics::{MetricsCollector, MetricsSnapshot};
    pub use crate::ordering::{Ordering, OrderingSnapshot};
    pub use crate::registry::Registry;
    pub use crate::scenario::ScenarioConfig;
    pub use crate::scene::{Scene, SceneRegistry, SceneState};
    pub use crate::simulator::{OrderingConfig, RunReport, RunStop, SimConfig, Simulator};
    pub use crate::tree::{BranchOp, EdgeType, NodeId, SharedTree, SimTree};
}
