use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::agent::PlanState;
use crate::error::{SimError, SimResult};
use crate::llm::Role;
use crate::simulator::Simulator;

const KNOWN_OPS: [&str; 6] = [
    "agent_ctx_append",
    "agent_plan_replace",
    "agent_props_patch",
    "scene_state_patch",
    "public_broadcast",
    "advance",
];

fn default_role() -> Role {
    Role::User
}

/// A direct edit applied to a cloned simulator, without running the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BranchOp {
    AgentCtxAppend {
        name: String,
        #[serde(default = "default_role")]
        role: Role,
        content: String,
    },
    AgentPlanReplace {
        name: String,
        plan_state: PlanState,
    },
    AgentPropsPatch {
        name: String,
        updates: Map<String, Value>,
    },
    SceneStatePatch {
        updates: Map<String, Value>,
    },
    PublicBroadcast {
        text: String,
    },
    /// Only recorded by `advance`; never applied by `branch`.
    Advance {
        turns: u64,
    },
}

impl BranchOp {
    /// Parse one op dict. An unrecognized `op` name is reported as such,
    /// before any field validation.
    pub fn from_value(value: &Value) -> SimResult<Self> {
        let name = value
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| SimError::invalid_op("<missing>", "op dict has no 'op' name"))?;

        if !KNOWN_OPS.contains(&name) {
            return Err(SimError::UnknownOp(name.to_string()));
        }

        serde_json::from_value(value.clone()).map_err(|e| SimError::invalid_op(name, e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AgentCtxAppend { .. } => "agent_ctx_append",
            Self::AgentPlanReplace { .. } => "agent_plan_replace",
            Self::AgentPropsPatch { .. } => "agent_props_patch",
            Self::SceneStatePatch { .. } => "scene_state_patch",
            Self::PublicBroadcast { .. } => "public_broadcast",
            Self::Advance { .. } => "advance",
        }
    }

    pub fn edge_type(&self) -> EdgeType {
        match self {
            Self::AgentCtxAppend { .. } => EdgeType::AgentCtx,
            Self::AgentPlanReplace { .. } => EdgeType::AgentPlan,
            Self::AgentPropsPatch { .. } => EdgeType::AgentProps,
            Self::SceneStatePatch { .. } => EdgeType::SceneState,
            Self::PublicBroadcast { .. } => EdgeType::PublicEvent,
            Self::Advance { .. } => EdgeType::Advance,
        }
    }

    pub fn apply(&self, sim: &mut Simulator) -> SimResult<()> {
        match self {
            Self::AgentCtxAppend { name, role, content } => {
                agent(sim, name)?.append_memory(*role, content.clone());
            }
            Self::AgentPlanReplace { name, plan_state } => {
                agent(sim, name)?.replace_plan(plan_state.clone());
            }
            Self::AgentPropsPatch { name, updates } => {
                let properties = agent(sim, name)?.properties_mut();
                for (key, value) in updates {
                    properties.insert(key.clone(), value.clone());
                }
            }
            Self::SceneStatePatch { updates } => sim.scene_mut().patch_state(updates.clone())?,
            Self::PublicBroadcast { text } => sim.broadcast_public(text.clone()),
            Self::Advance { .. } => {
                return Err(SimError::invalid_op("advance", "turns are only run through advance"));
            }
        }
        Ok(())
    }
}

fn agent<'a>(sim: &'a mut Simulator, name: &str) -> SimResult<&'a mut crate::agent::Agent> {
    sim.agent_mut(name).ok_or_else(|| SimError::UnknownAgent(name.to_string()))
}

/// What produced a child from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Root,
    AgentCtx,
    AgentPlan,
    AgentProps,
    SceneState,
    PublicEvent,
    Advance,
    Multi,
}

impl EdgeType {
    /// A single op names its own edge; zero ops or several are `Multi`.
    pub fn from_ops(ops: &[BranchOp]) -> Self {
        match ops {
            [op] => op.edge_type(),
            _ => Self::Multi,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::AgentCtx => "agent_ctx",
            Self::AgentPlan => "agent_plan",
            Self::AgentProps => "agent_props",
            Self::SceneState => "scene_state",
            Self::PublicEvent => "public_event",
            Self::Advance => "advance",
            Self::Multi => "multi",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_edge_type_derivation() {
        let advance = BranchOp::Advance { turns: 3 };
        let broadcast = BranchOp::PublicBroadcast { text: "storm".into() };

        assert_eq!(EdgeType::from_ops(&[advance.clone()]), EdgeType::Advance);
        assert_eq!(EdgeType::from_ops(&[advance, broadcast]), EdgeType::Multi);
        assert_eq!(EdgeType::from_ops(&[]), EdgeType::Multi);
    }

    #[test]
    fn test_unknown_op_name() {
        let err = BranchOp::from_value(&json!({ "op": "not_a_real_op" })).unwrap_err();
        assert_eq!(err.to_string(), "Unknown op: not_a_real_op");
    }

    #[test]
    fn test_known_op_with_bad_fields() {
        let err = BranchOp::from_value(&json!({ "op": "agent_props_patch", "name": "Alice" })).unwrap_err();
        assert!(matches!(err, SimError::InvalidOp { .. }));
    }

    #[test]
    fn test_ctx_append_defaults_to_user_role() {
        let op = BranchOp::from_value(&json!({
            "op": "agent_ctx_append",
            "name": "Alice",
            "content": "You hear thunder."
        }))
        .unwrap();
        assert_eq!(
            op,
            BranchOp::AgentCtxAppend {
                name: "Alice".into(),
                role: Role::User,
                content: "You hear thunder.".into()
            }
        );
        assert_eq!(serde_json::to_value(&op).unwrap()["op"], "agent_ctx_append");
    }

    #[test]
    fn test_edge_type_serializes_snake_case() {
        assert_eq!(serde_json::to_value(EdgeType::PublicEvent).unwrap(), json!("public_event"));
        assert_eq!(EdgeType::AgentProps.to_string(), "agent_props");
    }
}
