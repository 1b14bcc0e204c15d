//! Branching tree of simulations.
//!
//! Every node owns its own simulator. New nodes are made in two steps:
//! `copy_sim` clones a node into an unattached node, the caller runs or edits
//! the clone, then `attach` links it under a parent with a depth and an edge
//! type derived from the ops that produced it. A failed run or op discards
//! the clone, so the committed tree is never left half-edited.

pub mod channel;
pub mod ops;
pub mod shared;

pub use channel::{NodeChannel, SubscriptionId, recv_tree_event};
pub use ops::{BranchOp, EdgeType};
pub use shared::{BranchRun, SharedTree};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{SimError, SimResult};
use crate::event::{LogEvent, TreeEvent};
use crate::llm::Clients;
use crate::registry::Registry;
use crate::simulator::{RunReport, RunStop, SimSnapshot, Simulator};

const TREE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct Node {
    id: NodeId,
    parent: Option<NodeId>,
    depth: Option<u32>,
    edge_type: Option<EdgeType>,
    ops: Vec<BranchOp>,
    // as of insert or attach; read when the simulator is busy
    turns: u64,
    sim: Arc<Mutex<Simulator>>,
    channel: Arc<NodeChannel>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// `None` until the node is attached.
    pub fn depth(&self) -> Option<u32> {
        self.depth
    }

    pub fn edge_type(&self) -> Option<EdgeType> {
        self.edge_type
    }

    pub fn ops(&self) -> &[BranchOp] {
        &self.ops
    }

    pub fn is_attached(&self) -> bool {
        self.depth.is_some()
    }

    pub fn sim(&self) -> &Arc<Mutex<Simulator>> {
        &self.sim
    }

    pub fn channel(&self) -> &Arc<NodeChannel> {
        &self.channel
    }

    pub fn logs(&self) -> Vec<LogEvent> {
        self.channel.logs()
    }
}

/// One row of `SimTree::summaries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub depth: Option<u32>,
    pub edge_type: Option<EdgeType>,
    pub turns: u64,
    pub children: Vec<NodeId>,
    pub logs: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub depth: Option<u32>,
    pub edge_type: Option<EdgeType>,
    pub ops: Vec<BranchOp>,
    pub children: Vec<NodeId>,
    pub sim: SimSnapshot,
    pub logs: Vec<LogEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub root: NodeId,
    pub seq: u64,
    pub nodes: Vec<NodeSnapshot>,
}

/// A cloned node checked out for a run. Finish it with `SimTree::commit`,
/// or `SimTree::discard` its child.
#[derive(Debug, Clone)]
pub struct PendingBranch {
    pub parent: NodeId,
    pub child: NodeId,
    sim: Arc<Mutex<Simulator>>,
    channel: Arc<NodeChannel>,
}

impl PendingBranch {
    /// Blocking run of the clone. A cancelled run counts as a failure.
    pub fn run(&self, turns: u64, cancel: &CancellationToken) -> SimResult<RunReport> {
        self.channel.publish(LogEvent::new(
            "run_start",
            json!({ "parent": self.parent, "turns": turns }),
        ));

        let report = self.sim.lock().run_until(turns, cancel);
        match &report {
            Ok(report) if report.stop == RunStop::Cancelled => {
                self.channel.publish(LogEvent::new("run_cancelled", json!({ "report": report })));
                return Err(SimError::Cancelled);
            }
            Ok(report) => {
                self.channel.publish(LogEvent::new("run_finish", json!({ "report": report })))
            }
            Err(e) => self
                .channel
                .publish(LogEvent::new("run_failed", json!({ "error": e.to_string() }))),
        }
        report
    }
}

pub struct SimTree {
    nodes: BTreeMap<NodeId, Node>,
    children: BTreeMap<NodeId, Vec<NodeId>>,
    root: NodeId,
    seq: u64,
    next_sub: u64,
    registry: Arc<Registry>,
    tree_tx: broadcast::Sender<TreeEvent>,
}

impl fmt::Debug for SimTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimTree")
            .field("root", &self.root)
            .field("nodes", &self.nodes.len())
            .field("seq", &self.seq)
            .finish()
    }
}

impl SimTree {
    /// Root the tree at a deep copy of `sim`; the caller keeps its own simulator.
    pub fn new(sim: &Simulator, registry: Arc<Registry>) -> Self {
        let (tree_tx, _) = broadcast::channel(TREE_CHANNEL_CAPACITY);
        let mut tree = Self {
            nodes: BTreeMap::new(),
            children: BTreeMap::new(),
            root: NodeId::new(0),
            seq: 0,
            next_sub: 0,
            registry,
            tree_tx,
        };

        let root = tree.next_id();
        tree.insert_node(root, sim.fork(), Vec::new());
        if let Some(node) = tree.nodes.get_mut(&root) {
            node.depth = Some(0);
            node.edge_type = Some(EdgeType::Root);
        }
        tree.root = root;
        info!("Tree rooted at node {}", root);
        tree
    }

    fn next_id(&mut self) -> NodeId {
        let id = NodeId::new(self.seq);
        self.seq += 1;
        id
    }

    fn insert_node(&mut self, id: NodeId, mut sim: Simulator, logs: Vec<LogEvent>) {
        let channel = Arc::new(NodeChannel::new(id, logs, self.tree_tx.clone()));
        sim.set_event_sink(Some(channel.sink()));
        let turns = sim.turns();

        self.nodes.insert(
            id,
            Node {
                id,
                parent: None,
                depth: None,
                edge_type: None,
                ops: Vec::new(),
                turns,
                sim: Arc::new(Mutex::new(sim)),
                channel,
            },
        );
        self.children.insert(id, Vec::new());
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn node(&self, id: NodeId) -> SimResult<&Node> {
        self.nodes.get(&id).ok_or(SimError::NodeNotFound(id))
    }

    pub fn children(&self, id: NodeId) -> SimResult<&[NodeId]> {
        self.children
            .get(&id)
            .map(Vec::as_slice)
            .ok_or(SimError::NodeNotFound(id))
    }

    pub fn simulator(&self, id: NodeId) -> SimResult<Arc<Mutex<Simulator>>> {
        Ok(Arc::clone(self.node(id)?.sim()))
    }

    pub fn logs(&self, id: NodeId) -> SimResult<Vec<LogEvent>> {
        Ok(self.node(id)?.logs())
    }

    fn require_attached(&self, id: NodeId) -> SimResult<&Node> {
        let node = self.node(id)?;
        if node.is_attached() {
            Ok(node)
        } else {
            Err(SimError::NodeDetached(id))
        }
    }

    /// Clone a node into a new, unattached node with a copy of its logs.
    pub fn copy_sim(&mut self, id: NodeId) -> SimResult<NodeId> {
        let source = self.node(id)?;
        let sim = source.sim.lock().fork();
        let logs = source.channel.logs();

        let child = self.next_id();
        self.insert_node(child, sim, logs);
        debug!("Copied node {} into {}", id, child);
        Ok(child)
    }

    /// Link a cloned node under `parent`.
    pub fn attach(&mut self, parent: NodeId, ops: Vec<BranchOp>, child: NodeId) -> SimResult<NodeId> {
        let parent_depth = self
            .require_attached(parent)?
            .depth
            .ok_or(SimError::NodeDetached(parent))?;

        let node = self.nodes.get_mut(&child).ok_or(SimError::NodeNotFound(child))?;
        if node.is_attached() {
            return Err(SimError::AlreadyAttached(child));
        }

        let edge_type = EdgeType::from_ops(&ops);
        if let Some(sim) = node.sim.try_lock() {
            node.turns = sim.turns();
        }
        node.parent = Some(parent);
        node.depth = Some(parent_depth + 1);
        node.edge_type = Some(edge_type);
        node.ops = ops;

        node.channel.publish(LogEvent::new(
            "attached",
            json!({
                "parent": parent,
                "depth": node.depth,
                "edge_type": edge_type,
                "ops": node.ops,
            }),
        ));

        self.children.entry(parent).or_default().push(child);
        info!("Attached node {} under {} ({})", child, parent, edge_type);
        Ok(child)
    }

    /// Drop an unattached node, e.g. after its run failed.
    pub fn discard(&mut self, id: NodeId) -> SimResult<()> {
        if self.node(id)?.is_attached() {
            return Err(SimError::AlreadyAttached(id));
        }
        self.nodes.remove(&id);
        self.children.remove(&id);
        debug!("Discarded unattached node {}", id);
        Ok(())
    }

    /// Clone an attached node for running, without holding on to the tree.
    pub fn checkout(&mut self, parent: NodeId) -> SimResult<PendingBranch> {
        self.require_attached(parent)?;
        let child = self.copy_sim(parent)?;
        let node = self.node(child)?;

        Ok(PendingBranch {
            parent,
            child,
            sim: Arc::clone(&node.sim),
            channel: Arc::clone(&node.channel),
        })
    }

    pub fn commit(&mut self, pending: &PendingBranch, turns: u64) -> SimResult<NodeId> {
        self.attach(pending.parent, vec![BranchOp::Advance { turns }], pending.child)
    }

    /// Clone `parent`, run the clone for up to `turns` turns, attach it.
    pub fn advance(&mut self, parent: NodeId, turns: u64) -> SimResult<NodeId> {
        let pending = self.checkout(parent)?;
        match pending.run(turns, &CancellationToken::new()) {
            Ok(_) => self.commit(&pending, turns),
            Err(e) => {
                self.discard(pending.child)?;
                Err(e)
            }
        }
    }

    /// Clone `parent`, apply `ops` in order, attach. Nothing is committed if
    /// any op fails.
    pub fn branch(&mut self, parent: NodeId, ops: Vec<BranchOp>) -> SimResult<NodeId> {
        self.require_attached(parent)?;
        if let Some(op) = ops.iter().find(|op| matches!(op, BranchOp::Advance { .. })) {
            return Err(SimError::invalid_op(op.name(), "turns are only run through advance"));
        }

        let child = self.copy_sim(parent)?;
        let applied = {
            let mut sim = self.node(child)?.sim.lock();
            let result = ops.iter().try_for_each(|op| op.apply(&mut sim));
            if result.is_ok() {
                sim.flush_events();
            }
            result
        };

        match applied {
            Ok(()) => self.attach(parent, ops, child),
            Err(e) => {
                self.discard(child)?;
                Err(e)
            }
        }
    }

    /// `branch` from raw op dicts. Unknown op names fail before anything is cloned.
    pub fn branch_json(&mut self, parent: NodeId, ops: &[Value]) -> SimResult<NodeId> {
        let ops = ops.iter().map(BranchOp::from_value).collect::<SimResult<Vec<_>>>()?;
        self.branch(parent, ops)
    }

    /// Remove `id` and everything below it. Returns the removed ids, sorted.
    pub fn delete_subtree(&mut self, id: NodeId) -> SimResult<Vec<NodeId>> {
        if id == self.root {
            return Err(SimError::RootDeletion);
        }
        let parent = self.node(id)?.parent;

        let mut doomed = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            doomed.push(current);
            if let Some(kids) = self.children.get(&current) {
                stack.extend(kids.iter().copied());
            }
        }

        if let Some(kids) = parent.and_then(|p| self.children.get_mut(&p)) {
            kids.retain(|kid| *kid != id);
        }
        for gone in &doomed {
            if let Some(node) = self.nodes.remove(gone) {
                node.channel.publish(LogEvent::new("deleted", json!({ "root": id })));
            }
            self.children.remove(gone);
        }

        doomed.sort();
        info!("Deleted {} node(s) under {}", doomed.len(), id);
        Ok(doomed)
    }

    /// Attached nodes without children, by id.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|node| node.is_attached())
            .filter(|node| self.children.get(&node.id).is_none_or(Vec::is_empty))
            .map(|node| node.id)
            .collect()
    }

    pub fn max_depth(&self) -> u32 {
        self.nodes.values().filter_map(|node| node.depth).max().unwrap_or(0)
    }

    pub fn frontier(&self, only_max_depth: bool) -> Vec<NodeId> {
        let leaves = self.leaves();
        if !only_max_depth {
            return leaves;
        }
        let deepest = self.max_depth();
        leaves
            .into_iter()
            .filter(|id| self.nodes.get(id).and_then(|n| n.depth) == Some(deepest))
            .collect()
    }

    /// One row per node. A simulator that is busy running reports the turn
    /// count it had when it was inserted or attached.
    pub fn summaries(&self) -> Vec<NodeSummary> {
        self.nodes
            .values()
            .map(|node| NodeSummary {
                id: node.id,
                parent: node.parent,
                depth: node.depth,
                edge_type: node.edge_type,
                turns: node.sim.try_lock().map_or(node.turns, |sim| sim.turns()),
                children: self.children.get(&node.id).cloned().unwrap_or_default(),
                logs: node.channel.log_len(),
            })
            .collect()
    }

    /// Lowest common ancestor of two attached nodes.
    pub fn lca(&self, a: NodeId, b: NodeId) -> SimResult<NodeId> {
        let step = |id: NodeId| -> SimResult<(NodeId, u32)> {
            let node = self.require_attached(id)?;
            let parent = node.parent.unwrap_or(id);
            Ok((parent, node.depth.unwrap_or(0)))
        };

        let (mut a, mut b) = (a, b);
        let mut depth_a = self.require_attached(a)?.depth.unwrap_or(0);
        let mut depth_b = self.require_attached(b)?.depth.unwrap_or(0);

        while depth_a > depth_b {
            a = step(a)?.0;
            depth_a -= 1;
        }
        while depth_b > depth_a {
            b = step(b)?.0;
            depth_b -= 1;
        }
        while a != b {
            a = step(a)?.0;
            b = step(b)?.0;
        }
        Ok(a)
    }

    /// Register a queue receiving every event of one node.
    pub fn add_node_sub(
        &mut self,
        id: NodeId,
        tx: mpsc::UnboundedSender<TreeEvent>,
    ) -> SimResult<SubscriptionId> {
        let channel = Arc::clone(&self.node(id)?.channel);
        let sub = SubscriptionId::new(self.next_sub);
        self.next_sub += 1;
        channel.subscribe(sub, tx);
        Ok(sub)
    }

    pub fn subscribe_node(
        &mut self,
        id: NodeId,
    ) -> SimResult<(SubscriptionId, mpsc::UnboundedReceiver<TreeEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = self.add_node_sub(id, tx)?;
        Ok((sub, rx))
    }

    pub fn remove_node_sub(&mut self, id: NodeId, sub: SubscriptionId) -> SimResult<bool> {
        Ok(self.node(id)?.channel.unsubscribe(sub))
    }

    /// Every event of every node, tagged with its node id.
    pub fn subscribe_tree(&self) -> broadcast::Receiver<TreeEvent> {
        self.tree_tx.subscribe()
    }

    /// Attached nodes only. Unattached clones are in flight and are either
    /// committed or discarded by whoever checked them out.
    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            root: self.root,
            seq: self.seq,
            nodes: self
                .nodes
                .values()
                .filter(|node| node.is_attached())
                .map(|node| NodeSnapshot {
                    id: node.id,
                    parent: node.parent,
                    depth: node.depth,
                    edge_type: node.edge_type,
                    ops: node.ops.clone(),
                    children: self.children.get(&node.id).cloned().unwrap_or_default(),
                    sim: node.sim.lock().snapshot(),
                    logs: node.channel.logs(),
                })
                .collect(),
        }
    }

    pub fn restore(snapshot: TreeSnapshot, registry: Arc<Registry>, clients: Clients) -> SimResult<Self> {
        let (tree_tx, _) = broadcast::channel(TREE_CHANNEL_CAPACITY);
        let mut tree = Self {
            nodes: BTreeMap::new(),
            children: BTreeMap::new(),
            root: snapshot.root,
            seq: snapshot.seq,
            next_sub: 0,
            registry,
            tree_tx,
        };

        let mut links = Vec::new();
        for node in snapshot.nodes {
            if node.id.get() >= tree.seq {
                return Err(SimError::malformed(format!("node {} is past the id sequence", node.id)));
            }
            let sim = Simulator::restore(node.sim, &tree.registry, clients.clone())?;
            tree.insert_node(node.id, sim, node.logs);
            if let Some(entry) = tree.nodes.get_mut(&node.id) {
                entry.parent = node.parent;
                entry.depth = node.depth;
                entry.edge_type = node.edge_type;
                entry.ops = node.ops;
            }
            links.push((node.id, node.children));
        }

        for (id, kids) in links {
            for kid in &kids {
                let child = tree.node(*kid).map_err(|_| SimError::malformed(format!("dangling child {}", kid)))?;
                if child.parent != Some(id) {
                    return Err(SimError::malformed(format!("node {} does not list {} as parent", kid, id)));
                }
            }
            tree.children.insert(id, kids);
        }

        let root = tree.node(tree.root).map_err(|_| SimError::malformed("root node missing"))?;
        if root.parent.is_some() || root.depth != Some(0) {
            return Err(SimError::malformed("root must have depth 0 and no parent"));
        }

        info!("Restored tree with {} node(s)", tree.nodes.len());
        Ok(tree)
    }

    pub fn serialize(&self) -> SimResult<Value> {
        Ok(serde_json::to_value(self.snapshot())?)
    }

    pub fn deserialize(data: Value, registry: Arc<Registry>, clients: Clients) -> SimResult<Self> {
        let snapshot: TreeSnapshot = serde_json::from_value(data)?;
        Self::restore(snapshot, registry, clients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentSpec;
    use crate::llm::ScriptedClient;
    use crate::scene::SceneState;
    use crate::simulator::SimConfig;

    fn speak(text: &str) -> String {
        format!("<action><speak><content>{}</content></speak></action>", text)
    }

    fn tree(replies: Vec<String>) -> SimTree {
        let registry = Arc::new(Registry::new());
        let clients = Clients::single("mock", Arc::new(ScriptedClient::new(replies)));
        let sim = Simulator::from_specs(
            SimConfig::default(),
            vec![AgentSpec::new("Alice", "mock"), AgentSpec::new("Bob", "mock")],
            "basic",
            SceneState::new(),
            &registry,
            clients,
        )
        .unwrap();
        SimTree::new(&sim, registry)
    }

    #[test]
    fn test_root_is_attached_at_depth_zero() {
        let tree = tree(vec![]);
        let root = tree.node(tree.root()).unwrap();
        assert_eq!(root.depth(), Some(0));
        assert_eq!(root.edge_type(), Some(EdgeType::Root));
        assert_eq!(tree.leaves(), vec![tree.root()]);
    }

    #[test]
    fn test_copy_sim_is_unattached() {
        let mut tree = tree(vec![]);
        let child = tree.copy_sim(tree.root()).unwrap();
        let node = tree.node(child).unwrap();

        assert!(!node.is_attached());
        assert_eq!(node.parent(), None);
        assert!(tree.children(child).unwrap().is_empty());
        assert_eq!(tree.leaves(), vec![tree.root()]);
    }

    #[test]
    fn test_attach_twice_fails() {
        let mut tree = tree(vec![]);
        let root = tree.root();
        let child = tree.copy_sim(root).unwrap();
        tree.attach(root, vec![], child).unwrap();

        assert!(matches!(tree.attach(root, vec![], child), Err(SimError::AlreadyAttached(_))));
        assert_eq!(tree.children(root).unwrap(), &[child]);
    }

    #[test]
    fn test_advance_records_op_and_depth() {
        let mut tree = tree(vec![speak("one"), speak("two")]);
        let root = tree.root();
        let child = tree.advance(root, 2).unwrap();
        let node = tree.node(child).unwrap();

        assert_eq!(node.depth(), Some(1));
        assert_eq!(node.edge_type(), Some(EdgeType::Advance));
        assert_eq!(node.ops(), &[BranchOp::Advance { turns: 2 }]);
        assert_eq!(node.sim().lock().turns(), 2);
        assert_eq!(tree.node(root).unwrap().sim().lock().turns(), 0);
        assert!(node.logs().iter().any(|e| e.kind == "turn_start"));
        assert!(tree.node(root).unwrap().logs().is_empty());
    }

    #[test]
    fn test_failed_advance_leaves_tree_unchanged() {
        let mut tree = tree(vec![]);
        let before = tree.ids();

        assert!(matches!(tree.advance(tree.root(), 1), Err(SimError::Llm { .. })));
        assert_eq!(tree.ids(), before);
        assert!(tree.children(tree.root()).unwrap().is_empty());
    }

    #[test]
    fn test_branch_rejects_advance_op() {
        let mut tree = tree(vec![]);
        let err = tree.branch(tree.root(), vec![BranchOp::Advance { turns: 1 }]).unwrap_err();
        assert!(matches!(err, SimError::InvalidOp { .. }));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_branch_with_unknown_agent_is_rolled_back() {
        let mut tree = tree(vec![]);
        let ops = vec![
            BranchOp::PublicBroadcast { text: "hello".into() },
            BranchOp::AgentCtxAppend { name: "Zed".into(), role: crate::llm::Role::User, content: "x".into() },
        ];
        assert!(matches!(tree.branch(tree.root(), ops), Err(SimError::UnknownAgent(_))));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_public_broadcast_reaches_everyone() {
        let mut tree = tree(vec![]);
        let child = tree
            .branch(tree.root(), vec![BranchOp::PublicBroadcast { text: "A storm is coming".into() }])
            .unwrap();
        let node = tree.node(child).unwrap();
        let sim = node.sim().lock();

        assert_eq!(node.edge_type(), Some(EdgeType::PublicEvent));
        for name in ["Alice", "Bob"] {
            let memory = sim.agent(name).unwrap().short_memory();
            assert_eq!(memory.last().unwrap().content, "[T0] [Public] A storm is coming");
        }
        assert!(node.logs().iter().any(|e| e.kind == "public_event"));
    }

    #[test]
    fn test_lca() {
        let mut tree = tree(vec![]);
        let root = tree.root();
        let op = || vec![BranchOp::PublicBroadcast { text: "x".into() }];
        let a = tree.branch(root, op()).unwrap();
        let b = tree.branch(a, op()).unwrap();
        let c = tree.branch(a, op()).unwrap();
        let d = tree.branch(root, op()).unwrap();

        assert_eq!(tree.lca(b, c).unwrap(), a);
        assert_eq!(tree.lca(b, d).unwrap(), root);
        assert_eq!(tree.lca(b, b).unwrap(), b);
        assert_eq!(tree.lca(a, b).unwrap(), a);
    }

    #[test]
    fn test_node_subscription() {
        let mut tree = tree(vec![]);
        let root = tree.root();
        let (sub, mut rx) = tree.subscribe_node(root).unwrap();

        tree.node(root).unwrap().sim().lock().emit_event("ping", json!({}));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, "ping");
        assert_eq!(event.node, root);

        assert!(tree.remove_node_sub(root, sub).unwrap());
        assert!(!tree.remove_node_sub(root, sub).unwrap());
    }

    #[test]
    fn test_tree_stream_sees_lifecycle() {
        let mut tree = tree(vec![]);
        let mut rx = tree.subscribe_tree();
        let child = tree
            .branch(tree.root(), vec![BranchOp::SceneStatePatch { updates: Default::default() }])
            .unwrap();
        tree.delete_subtree(child).unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        assert!(kinds.contains(&"attached".to_string()));
        assert_eq!(kinds.last().map(String::as_str), Some("deleted"));
    }

    #[test]
    fn test_restore_rejects_dangling_child() {
        let tree = tree(vec![]);
        let mut snapshot = tree.snapshot();
        snapshot.nodes[0].children.push(NodeId::new(42));

        let result = SimTree::restore(snapshot, Arc::new(Registry::new()), Clients::default());
        assert!(matches!(result, Err(SimError::Snapshot(_))));
    }

    #[test]
    fn test_busy_branch_does_not_block_queries() {
        let mut tree = tree(vec![]);
        let root = tree.root();
        let pending = tree.checkout(root).unwrap();

        // stands in for a run holding the clone's simulator
        let sim = tree.simulator(pending.child).unwrap();
        let _running = sim.lock();

        let summaries = tree.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].id, pending.child);
        assert_eq!(summaries[1].turns, 0);
        assert_eq!(summaries[1].edge_type, None);

        let snapshot = tree.snapshot();
        assert_eq!(snapshot.nodes.len(), 1);
        assert_eq!(snapshot.nodes[0].id, root);
    }

    #[test]
    fn test_summary_turns_follow_the_simulator() {
        let mut tree = tree(vec![speak("one"), speak("two")]);
        let root = tree.root();
        let child = tree.advance(root, 2).unwrap();
        let summaries = tree.summaries();
        let row = summaries.iter().find(|s| s.id == child).unwrap();
        assert_eq!(row.turns, 2);
    }
}
