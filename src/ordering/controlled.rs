use std::fmt;
use std::sync::Arc;

use super::{Ordering, OrderingSnapshot, SequentialOrdering};
use crate::error::SimResult;
use crate::simulator::{Stage, World};

/// Injected decision function. Returning `None`, or a name that is not live,
/// hands the slot to the sequential fallback.
pub type Controller = Arc<dyn Fn(&World) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct ControlledOrdering {
    controller_name: String,
    decide: Controller,
    fallback: SequentialOrdering,
}

impl fmt::Debug for ControlledOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlledOrdering")
            .field("controller", &self.controller_name)
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl ControlledOrdering {
    pub fn new(controller_name: impl Into<String>, decide: Controller) -> Self {
        Self {
            controller_name: controller_name.into(),
            decide,
            fallback: SequentialOrdering::new(),
        }
    }

    pub fn with_fallback_cursor(mut self, cursor: usize) -> Self {
        self.fallback = SequentialOrdering::at(cursor);
        self
    }
}

impl Ordering for ControlledOrdering {
    fn name(&self) -> &str {
        "controlled"
    }

    fn next_actor(&mut self, stage: &mut Stage<'_>) -> SimResult<Option<String>> {
        match (self.decide)(stage.world) {
            Some(name) if stage.world.contains(&name) => Ok(Some(name)),
            _ => Ok(self.fallback.pick(&stage.world.names())),
        }
    }

    fn snapshot(&self) -> OrderingSnapshot {
        OrderingSnapshot::Controlled {
            controller: self.controller_name.clone(),
            fallback_cursor: self.fallback.cursor(),
        }
    }

    fn clone_box(&self) -> Box<dyn Ordering> {
        Box::new(self.clone())
    }
}
