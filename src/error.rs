//! Error types for the simulation core.
//!
//! Variants follow the failure classes the run loop and the tree treat
//! differently: LLM transport failures and exhausted parse retries abort a
//! run, action dispatch failures are logged and swallowed, and tree
//! structural errors are returned straight to the caller.

use thiserror::Error;

use crate::tree::NodeId;

pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("LLM call failed for agent '{agent}': {source}")]
    Llm {
        agent: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Agent '{agent}' produced no parseable response after {attempts} attempt(s): {reason}")]
    MalformedResponse {
        agent: String,
        attempts: u32,
        reason: String,
    },

    #[error("Action '{action}' failed: {reason}")]
    Action {
        action: String,
        reason: String,
    },

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Node {0} is not attached to the tree")]
    NodeDetached(NodeId),

    #[error("Node {0} is already attached")]
    AlreadyAttached(NodeId),

    #[error("The root node cannot be deleted")]
    RootDeletion,

    #[error("Unknown op: {0}")]
    UnknownOp(String),

    #[error("Invalid op '{op}': {reason}")]
    InvalidOp {
        op: String,
        reason: String,
    },

    #[error("Duplicate agent name: {0}")]
    DuplicateAgent(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Unknown LLM client: {0}")]
    UnknownClient(String),

    #[error("Unknown scene: {0}")]
    UnknownScene(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Unknown ordering controller: {0}")]
    UnknownController(String),

    #[error("Moderator '{moderator}' broke the scheduling contract: {reason}")]
    SchedulingContract {
        moderator: String,
        reason: String,
    },

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Branch worker failed: {0}")]
    Worker(String),

    #[error("Malformed snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl SimError {
    pub fn action(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Action {
            action: action.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_op(op: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOp {
            op: op.into(),
            reason: reason.into(),
        }
    }

    /// Structural problem in otherwise well-formed snapshot JSON.
    pub fn malformed(reason: impl std::fmt::Display) -> Self {
        Self::Snapshot(serde::de::Error::custom(reason))
    }
}
