use super::{Ordering, OrderingSnapshot};
use crate::error::SimResult;
use crate::simulator::Stage;

/// Round-robin over whoever is currently in the simulation.
#[derive(Debug, Clone, Default)]
pub struct SequentialOrdering {
    cursor: usize,
}

impl SequentialOrdering {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(cursor: usize) -> Self {
        Self { cursor }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn pick(&mut self, roster: &[String]) -> Option<String> {
        if roster.is_empty() {
            return None;
        }
        let idx = self.cursor % roster.len();
        self.cursor = idx + 1;
        Some(roster[idx].clone())
    }
}

impl Ordering for SequentialOrdering {
    fn name(&self) -> &str {
        "sequential"
    }

    fn next_actor(&mut self, stage: &mut Stage<'_>) -> SimResult<Option<String>> {
        Ok(self.pick(&stage.world.names()))
    }

    fn snapshot(&self) -> OrderingSnapshot {
        OrderingSnapshot::Sequential { cursor: self.cursor }
    }

    fn clone_box(&self) -> Box<dyn Ordering> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StageFixture;
    use crate::ordering::Schedule;
    use proptest::prelude::*;

    #[test]
    fn test_sequential_cycles_forever() {
        let mut fixture = StageFixture::with_agents(&["A", "B", "C"]);
        let mut stage = fixture.stage();
        let mut ordering = SequentialOrdering::new();

        let names: Vec<String> = Schedule::new(&mut ordering, &mut stage)
            .take(7)
            .collect::<SimResult<_>>()
            .unwrap();
        assert_eq!(names, vec!["A", "B", "C", "A", "B", "C", "A"]);
    }

    #[test]
    fn test_empty_roster_yields_nothing() {
        let mut ordering = SequentialOrdering::new();
        assert_eq!(ordering.pick(&[]), None);
    }

    proptest! {
        #[test]
        fn test_sequential_visits_everyone_each_round(size in 1usize..8, rounds in 1usize..5) {
            let roster: Vec<String> = (0..size).map(|i| format!("agent{}", i)).collect();
            let mut ordering = SequentialOrdering::new();
            for _ in 0..rounds {
                let round: Vec<String> = (0..size).filter_map(|_| ordering.pick(&roster)).collect();
                prop_assert_eq!(&round, &roster);
            }
        }
    }
}
