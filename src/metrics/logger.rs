use anyhow::Result;
use csv::Writer;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

use crate::tree::NodeSummary;

#[derive(Debug, Serialize)]
struct SummaryRow {
    id: u64,
    parent: Option<u64>,
    depth: Option<u32>,
    edge_type: String,
    turns: u64,
    children: String,
    logs: usize,
}

impl From<&NodeSummary> for SummaryRow {
    fn from(summary: &NodeSummary) -> Self {
        Self {
            id: summary.id.get(),
            parent: summary.parent.map(|p| p.get()),
            depth: summary.depth,
            edge_type: summary.edge_type.map(|e| e.to_string()).unwrap_or_default(),
            turns: summary.turns,
            children: summary
                .children
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(";"),
            logs: summary.logs,
        }
    }
}

/// Writes node summaries as CSV, one row per node.
pub struct CsvLogger {
    writer: Writer<File>,
}

impl CsvLogger {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let writer = Writer::from_path(path)?;
        Ok(Self { writer })
    }

    pub fn log(&mut self, summary: &NodeSummary) -> Result<()> {
        self.writer.serialize(SummaryRow::from(summary))?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn log_batch(&mut self, summaries: &[NodeSummary]) -> Result<()> {
        for summary in summaries {
            self.writer.serialize(SummaryRow::from(summary))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{EdgeType, NodeId};

    #[test]
    fn test_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.csv");
        let summaries = vec![
            NodeSummary {
                id: NodeId::new(0),
                parent: None,
                depth: Some(0),
                edge_type: Some(EdgeType::Root),
                turns: 0,
                children: vec![NodeId::new(1), NodeId::new(2)],
                logs: 0,
            },
            NodeSummary {
                id: NodeId::new(1),
                parent: Some(NodeId::new(0)),
                depth: Some(1),
                edge_type: Some(EdgeType::Advance),
                turns: 4,
                children: vec![],
                logs: 12,
            },
        ];

        let mut logger = CsvLogger::new(&path).unwrap();
        logger.log_batch(&summaries).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], "id,parent,depth,edge_type,turns,children,logs");
        assert_eq!(lines[1], "0,,0,root,0,1;2,0");
        assert_eq!(lines[2], "1,0,1,advance,4,,12");
    }
}
