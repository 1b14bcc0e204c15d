use super::{Ordering, OrderingSnapshot};
use crate::error::SimResult;
use crate::simulator::Stage;

/// A fixed name list, repeated. Names that are not live get skipped by the simulator.
#[derive(Debug, Clone)]
pub struct CycledOrdering {
    names: Vec<String>,
    cursor: usize,
}

impl CycledOrdering {
    pub fn new(names: Vec<String>) -> Self {
        Self::at(names, 0)
    }

    pub fn at(names: Vec<String>, cursor: usize) -> Self {
        Self { names, cursor }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Ordering for CycledOrdering {
    fn name(&self) -> &str {
        "cycled"
    }

    fn next_actor(&mut self, _stage: &mut Stage<'_>) -> SimResult<Option<String>> {
        if self.names.is_empty() {
            return Ok(None);
        }
        let idx = self.cursor % self.names.len();
        self.cursor = idx + 1;
        Ok(Some(self.names[idx].clone()))
    }

    fn snapshot(&self) -> OrderingSnapshot {
        OrderingSnapshot::Cycled {
            names: self.names.clone(),
            cursor: self.cursor,
        }
    }

    fn clone_box(&self) -> Box<dyn Ordering> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordering::Schedule;
    use crate::testing::StageFixture;

    #[test]
    fn test_cycled_repeats_fixed_list() {
        let mut fixture = StageFixture::with_agents(&["A", "B", "C"]);
        let mut stage = fixture.stage();
        let mut ordering = CycledOrdering::new(vec!["C".into(), "A".into(), "A".into()]);

        let names: Vec<String> = Schedule::new(&mut ordering, &mut stage)
            .take(6)
            .collect::<SimResult<_>>()
            .unwrap();
        assert_eq!(names, vec!["C", "A", "A", "C", "A", "A"]);
    }

    #[test]
    fn test_cycled_snapshot_keeps_position() {
        let mut fixture = StageFixture::with_agents(&["A", "B"]);
        let mut stage = fixture.stage();
        let mut ordering = CycledOrdering::new(vec!["A".into(), "B".into()]);
        ordering.next_actor(&mut stage).unwrap();

        assert_eq!(
            ordering.snapshot(),
            OrderingSnapshot::Cycled { names: vec!["A".into(), "B".into()], cursor: 1 }
        );
    }
}
