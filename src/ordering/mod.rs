pub mod controlled;
pub mod cycled;
pub mod moderated;
pub mod random;
pub mod sequential;

pub use controlled::{ControlledOrdering, Controller};
pub use cycled::CycledOrdering;
pub use moderated::LlmModeratedOrdering;
pub use random::RandomOrdering;
pub use sequential::SequentialOrdering;

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::error::SimResult;
use crate::event::LogEvent;
use crate::registry::Registry;
use crate::simulator::{Stage, World};

pub const POLICIES: [&str; 5] = ["sequential", "random", "cycled", "controlled", "llm_moderated"];

/// Scheduling policy deciding which agent acts next.
///
/// Conceptually an endless sequence of names; `next_actor` pulls one. It only
/// returns `None` when there is nobody left to schedule.
pub trait Ordering: Send + fmt::Debug {
    fn name(&self) -> &str;

    fn next_actor(&mut self, stage: &mut Stage<'_>) -> SimResult<Option<String>>;

    /// Called once the named agent's turn is over.
    fn post_turn(&mut self, _name: &str) {}

    /// Called for every immediate event the simulator emits.
    fn on_event(&mut self, _event: &LogEvent, _world: &World) {}

    fn snapshot(&self) -> OrderingSnapshot;

    fn clone_box(&self) -> Box<dyn Ordering>;
}

/// Iterator view over an ordering, bound to one stage.
pub struct Schedule<'a, 'w, O: Ordering + ?Sized> {
    ordering: &'a mut O,
    stage: &'a mut Stage<'w>,
}

impl<'a, 'w, O: Ordering + ?Sized> Schedule<'a, 'w, O> {
    pub fn new(ordering: &'a mut O, stage: &'a mut Stage<'w>) -> Self {
        Self { ordering, stage }
    }
}

impl<O: Ordering + ?Sized> Iterator for Schedule<'_, '_, O> {
    type Item = SimResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.ordering.next_actor(self.stage).transpose()
    }
}

/// Policy name plus its internal state, enough to resume scheduling exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OrderingSnapshot {
    Sequential {
        cursor: usize,
    },
    Random {
        seed: u64,
        word_pos: u64,
    },
    Cycled {
        names: Vec<String>,
        cursor: usize,
    },
    Controlled {
        controller: String,
        fallback_cursor: usize,
    },
    LlmModerated {
        moderator: String,
        candidates: Vec<String>,
        queue: Vec<String>,
    },
}

impl OrderingSnapshot {
    pub fn restore(self, registry: &Registry) -> SimResult<Box<dyn Ordering>> {
        let ordering: Box<dyn Ordering> = match self {
            Self::Sequential { cursor } => Box::new(SequentialOrdering::at(cursor)),
            Self::Random { seed, word_pos } => Box::new(RandomOrdering::resume(seed, word_pos)),
            Self::Cycled { names, cursor } => Box::new(CycledOrdering::at(names, cursor)),
            Self::Controlled { controller, fallback_cursor } => {
                let decide = registry.controller(&controller)?;
                Box::new(ControlledOrdering::new(controller, decide).with_fallback_cursor(fallback_cursor))
            }
            Self::LlmModerated { moderator, candidates, queue } => Box::new(
                LlmModeratedOrdering::new(moderator, candidates).with_queue(VecDeque::from(queue)),
            ),
        };
        Ok(ordering)
    }
}
