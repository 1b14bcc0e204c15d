use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::ordering::OrderingSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub name: String,
    pub max_steps_per_turn: u32,
    /// Parse-retry budget handed to every agent.
    pub max_repeat: u32,
    pub ordering: OrderingConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            name: "default_sim".to_string(),
            max_steps_per_turn: 4,
            max_repeat: 2,
            ordering: OrderingConfig::Sequential,
        }
    }
}

impl SimConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_steps(mut self, steps: u32) -> Self {
        self.max_steps_per_turn = steps;
        self
    }

    pub fn with_max_repeat(mut self, max_repeat: u32) -> Self {
        self.max_repeat = max_repeat;
        self
    }

    pub fn with_ordering(mut self, ordering: OrderingConfig) -> Self {
        self.ordering = ordering;
        self
    }
}

/// Which ordering policy a fresh simulator starts with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OrderingConfig {
    Sequential,
    Random {
        #[serde(default)]
        seed: u64,
    },
    Cycled {
        names: Vec<String>,
    },
    Controlled {
        controller: String,
    },
    LlmModerated {
        moderator: String,
        /// Defaults to every agent except the moderator.
        #[serde(default)]
        candidates: Option<Vec<String>>,
    },
}

impl OrderingConfig {
    /// Starting state for this policy over the given roster.
    pub fn initial(&self, roster: &[String]) -> SimResult<OrderingSnapshot> {
        let snapshot = match self {
            Self::Sequential => OrderingSnapshot::Sequential { cursor: 0 },
            Self::Random { seed } => OrderingSnapshot::Random { seed: *seed, word_pos: 0 },
            Self::Cycled { names } => OrderingSnapshot::Cycled {
                names: names.clone(),
                cursor: 0,
            },
            Self::Controlled { controller } => OrderingSnapshot::Controlled {
                controller: controller.clone(),
                fallback_cursor: 0,
            },
            Self::LlmModerated { moderator, .. } if !roster.contains(moderator) => {
                return Err(SimError::UnknownAgent(moderator.clone()));
            }
            Self::LlmModerated { moderator, candidates } => OrderingSnapshot::LlmModerated {
                moderator: moderator.clone(),
                candidates: candidates.clone().unwrap_or_else(|| {
                    roster.iter().filter(|name| *name != moderator).cloned().collect()
                }),
                queue: Vec::new(),
            },
        };
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = SimConfig::default();
        assert_eq!(config.max_steps_per_turn, 4);
        assert_eq!(config.max_repeat, 2);
        assert_eq!(config.ordering, OrderingConfig::Sequential);
    }

    #[test]
    fn test_partial_config_from_json() {
        let config: SimConfig = serde_json::from_value(json!({
            "name": "council",
            "ordering": { "policy": "random", "seed": 9 }
        }))
        .unwrap();
        assert_eq!(config.name, "council");
        assert_eq!(config.max_steps_per_turn, 4);
        assert_eq!(config.ordering, OrderingConfig::Random { seed: 9 });
    }

    #[test]
    fn test_moderator_candidates_default_to_others() {
        let roster = vec!["Mod".to_string(), "A".to_string(), "B".to_string()];
        let config = OrderingConfig::LlmModerated { moderator: "Mod".into(), candidates: None };

        assert_eq!(
            config.initial(&roster).unwrap(),
            OrderingSnapshot::LlmModerated {
                moderator: "Mod".into(),
                candidates: vec!["A".into(), "B".into()],
                queue: vec![],
            }
        );
    }

    #[test]
    fn test_moderator_must_be_in_roster() {
        let config = OrderingConfig::LlmModerated { moderator: "Ghost".into(), candidates: None };
        assert!(matches!(config.initial(&["A".to_string()]), Err(SimError::UnknownAgent(_))));
    }
}
