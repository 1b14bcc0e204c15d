use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use simtree::prelude::*;
use simtree::scene::SceneState;

fn speak(text: &str) -> String {
    format!("<action><speak><content>{}</content></speak></action>", text)
}

fn shared(clients: Clients) -> SharedTree {
    let registry = Arc::new(Registry::new());
    let sim = Simulator::from_specs(
        SimConfig::default(),
        vec![AgentSpec::new("Alice", "good"), AgentSpec::new("Bob", "good")],
        "basic",
        SceneState::new(),
        &registry,
        clients,
    )
    .unwrap();
    SharedTree::new(SimTree::new(&sim, registry))
}

fn talkative() -> Clients {
    Clients::single("good", Arc::new(ScriptedClient::new([speak("hi")]).repeating_last()))
}

#[tokio::test]
async fn test_advance_attaches_child() {
    let tree = shared(talkative());
    let root = tree.lock().root();

    let run = tree.advance(root, 3).await.unwrap();
    assert_eq!(run.parent, root);
    assert_eq!(run.report.turns_run, 3);

    let guard = tree.lock();
    let node = guard.node(run.child).unwrap();
    assert_eq!(node.depth(), Some(1));
    assert_eq!(node.ops(), &[BranchOp::Advance { turns: 3 }]);
    assert_eq!(tree.metrics().snapshot().runs, 1);
}

#[tokio::test]
async fn test_frontier_advances_every_leaf() {
    let tree = shared(talkative());
    let root = tree.lock().root();
    let (a, b) = {
        let mut guard = tree.lock();
        let a = guard.branch(root, vec![]).unwrap();
        let b = guard.branch(root, vec![]).unwrap();
        (a, b)
    };

    let results = tree.advance_frontier(2, true, CancellationToken::new()).await;
    assert_eq!(results.iter().map(|(leaf, _)| *leaf).collect::<Vec<_>>(), vec![a, b]);
    assert!(results.iter().all(|(_, result)| result.is_ok()));

    let guard = tree.lock();
    assert_eq!(guard.max_depth(), 2);
    assert_eq!(guard.frontier(true).len(), 2);
    assert_eq!(guard.children(a).unwrap().len(), 1);
    assert_eq!(guard.children(b).unwrap().len(), 1);
}

#[tokio::test]
async fn test_failing_branch_is_discarded_without_hurting_siblings() {
    let tree = shared(talkative());
    let root = tree.lock().root();
    let (ok, broken) = {
        let mut guard = tree.lock();
        let ok = guard.branch(root, vec![]).unwrap();
        let broken = guard.branch(root, vec![]).unwrap();
        // point Alice at a client nobody registered
        let sim = guard.simulator(broken).unwrap();
        let mut sim = sim.lock();
        let mut state = sim.agent("Alice").unwrap().serialize();
        state.client = "missing".into();
        *sim.agent_mut("Alice").unwrap() = Agent::deserialize(state);
        (ok, broken)
    };
    let before = tree.lock().len();

    let results = tree.advance_frontier(1, false, CancellationToken::new()).await;
    let by_leaf: std::collections::HashMap<_, _> = results.into_iter().collect();

    assert!(by_leaf[&ok].is_ok());
    assert!(matches!(by_leaf[&broken], Err(SimError::UnknownClient(_))));

    let guard = tree.lock();
    assert_eq!(guard.len(), before + 1);
    assert!(guard.children(broken).unwrap().is_empty());
    assert_eq!(tree.metrics().snapshot().runs_failed, 1);
}

#[tokio::test]
async fn test_cancelled_run_is_discarded() {
    let tree = shared(talkative());
    let root = tree.lock().root();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = tree.advance_until(root, 5, cancel).await;
    assert!(matches!(result, Err(SimError::Cancelled)));
    assert_eq!(tree.lock().len(), 1);
}

#[tokio::test]
async fn test_tree_stream_tags_nodes() {
    let tree = shared(talkative());
    let root = tree.lock().root();
    let mut events = tree.lock().subscribe_tree();

    let run = tree.advance(root, 1).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.node, run.child);
        kinds.push(event.kind);
    }
    assert_eq!(kinds.first().map(String::as_str), Some("run_start"));
    assert!(kinds.contains(&"run_finish".to_string()));
    assert_eq!(kinds.last().map(String::as_str), Some("attached"));
}

#[tokio::test]
async fn test_node_subscriber_receives_live_events() {
    let tree = shared(talkative());
    let root = tree.lock().root();
    let (_sub, mut rx) = tree.lock().subscribe_node(root).unwrap();

    tree.lock()
        .branch(root, vec![BranchOp::PublicBroadcast { text: "only the child sees this".into() }])
        .unwrap();
    tree.lock().node(root).unwrap().sim().lock().broadcast_public("root news");
    tree.lock().node(root).unwrap().sim().lock().flush_events();

    let event = rx.recv().await.unwrap();
    assert_eq!(event.node, root);
    let mut kinds = vec![event.kind];
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind);
    }
    assert!(kinds.contains(&"public_event".to_string()));
    assert_eq!(tree.lock().logs(root).unwrap().len(), kinds.len());
}
