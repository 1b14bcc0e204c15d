// Copyright 2025 Servus Altissimi (Pseudonym)

// Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the "Software"), to deal in the Software without restriction, including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is furnished to do so, subject to the following conditions:
// The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software.
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use simtree::metrics::logger::CsvLogger;
use simtree::ordering::POLICIES;
use simtree::prelude::*;
use simtree::tree::{NodeSummary, recv_tree_event};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a tree from a scenario and advance its root.
    Run {
        #[arg(short, long)]
        scenario: PathBuf,
        #[arg(short, long, default_value_t = 4)]
        turns: u64,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Fork one node and run the fork.
    Advance {
        #[arg(short, long)]
        scenario: PathBuf,
        #[arg(long)]
        tree: PathBuf,
        #[arg(short, long)]
        node: u64,
        #[arg(short, long, default_value_t = 4)]
        turns: u64,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Fork one node and apply edit ops from a JSON file.
    Branch {
        #[arg(short, long)]
        scenario: PathBuf,
        #[arg(long)]
        tree: PathBuf,
        #[arg(short, long)]
        node: u64,
        #[arg(long)]
        ops: PathBuf,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Advance every frontier leaf concurrently.
    Frontier {
        #[arg(short, long)]
        scenario: PathBuf,
        #[arg(long)]
        tree: PathBuf,
        #[arg(short, long, default_value_t = 4)]
        turns: u64,
        #[arg(long)]
        deepest: bool,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    Inspect {
        #[arg(short, long)]
        scenario: PathBuf,
        #[arg(long)]
        tree: PathBuf,
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    Delete {
        #[arg(short, long)]
        scenario: PathBuf,
        #[arg(long)]
        tree: PathBuf,
        #[arg(short, long)]
        node: u64,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let program_start = Instant::now();

    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let registry = Arc::new(Registry::new());

    match cli.command {
        Commands::Run { scenario, turns, out } => {
            let scenario = ScenarioConfig::load(&scenario)?;
            let tree = SharedTree::new(scenario.build_tree(registry)?);
            let root = tree.lock().root();

            let run = tree.advance(root, turns).await?;
            info!("Node {} ran {} turn(s), stop: {:?}", run.child, run.report.turns_run, run.report.stop);

            let out = out.unwrap_or_else(default_out);
            save_tree(&tree.lock(), &out)?;
        }

        Commands::Advance { scenario, tree, node, turns, out } => {
            let scenario = ScenarioConfig::load(&scenario)?;
            let shared = SharedTree::new(load_tree(&scenario, &tree, registry)?);

            let run = shared.advance(NodeId::new(node), turns).await?;
            info!("Advanced {} -> {} ({} turn(s))", run.parent, run.child, run.report.turns_run);

            save_tree(&shared.lock(), out.as_deref().unwrap_or(&tree))?;
        }

        Commands::Branch { scenario, tree, node, ops, out } => {
            let scenario = ScenarioConfig::load(&scenario)?;
            let mut sim_tree = load_tree(&scenario, &tree, registry)?;

            let raw = std::fs::read_to_string(&ops).with_context(|| format!("reading ops {}", ops.display()))?;
            let ops: Vec<Value> = serde_json::from_str(&raw)?;

            let child = sim_tree.branch_json(NodeId::new(node), &ops)?;
            info!("Branched {} -> {} with {} op(s)", node, child, ops.len());

            save_tree(&sim_tree, out.as_deref().unwrap_or(&tree))?;
        }

        Commands::Frontier { scenario, tree, turns, deepest, out } => {
            let scenario = ScenarioConfig::load(&scenario)?;
            let shared = SharedTree::new(load_tree(&scenario, &tree, registry)?);
            advance_frontier(&shared, turns, deepest).await?;
            save_tree(&shared.lock(), out.as_deref().unwrap_or(&tree))?;
        }

        Commands::Inspect { scenario, tree, csv } => {
            let scenario = ScenarioConfig::load(&scenario)?;
            let sim_tree = load_tree(&scenario, &tree, registry)?;
            let summaries = sim_tree.summaries();

            summary_table(&summaries);
            println!("Leaves: {:?}", sim_tree.leaves());
            println!("Frontier (deepest): {:?}\n", sim_tree.frontier(true));

            if let Some(path) = csv {
                let mut logger = CsvLogger::new(&path)?;
                logger.log_batch(&summaries)?;
                info!("Summaries saved to: {}", path.display());
            }
        }

        Commands::Delete { scenario, tree, node, out } => {
            let scenario = ScenarioConfig::load(&scenario)?;
            let mut sim_tree = load_tree(&scenario, &tree, registry)?;

            let removed = sim_tree.delete_subtree(NodeId::new(node))?;
            info!("Removed node(s): {:?}", removed);

            save_tree(&sim_tree, out.as_deref().unwrap_or(&tree))?;
        }

        Commands::List => {
            println!("\nOrdering policies");
            for policy in POLICIES {
                println!("  - {}", policy);
            }

            println!("\nScenes");
            for scene in registry.scenes.list() {
                println!("  - {}", scene);
            }

            println!("\nActions");
            for action in registry.actions.list() {
                println!("  - {}", action);
            }

            println!("\nUsage: simtree run --scenario <file> --turns <n>\n");
        }
    }

    info!("Total runtime: {:.2}s", program_start.elapsed().as_secs_f64());

    Ok(())
}

async fn advance_frontier(shared: &SharedTree, turns: u64, deepest: bool) -> Result<()> {
    let leaves = shared.lock().frontier(deepest);
    let mut events = shared.lock().subscribe_tree();

    let pb = ProgressBar::new(leaves.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.orange/yellow} {pos}/{len} branches {msg}")?
            .progress_chars("█▓░"),
    );

    let progress = pb.clone();
    let listener = tokio::spawn(async move {
        while let Some(event) = recv_tree_event(&mut events).await {
            if matches!(event.kind.as_str(), "run_finish" | "run_failed" | "run_cancelled") {
                progress.inc(1);
                progress.set_message(format!("node {} {}", event.node, event.kind));
            }
        }
    });

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let results = shared.advance_frontier(turns, deepest, cancel).await;
    listener.abort();
    pb.finish_with_message("frontier advanced");

    for (leaf, result) in &results {
        match result {
            Ok(run) => info!("  {} -> {}: {} turn(s), {:?}", leaf, run.child, run.report.turns_run, run.report.stop),
            Err(e) => warn!("  {} failed: {}", leaf, e),
        }
    }

    let metrics = shared.metrics().snapshot();
    info!(
        "Runs: {} ok, {} failed | turns: {} | action failure rate: {:.1}%",
        metrics.runs,
        metrics.runs_failed,
        metrics.turns,
        metrics.action_failure_rate * 100.0
    );
    Ok(())
}

fn default_out() -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    PathBuf::from(format!("results/tree_{}.json", timestamp))
}

fn load_tree(scenario: &ScenarioConfig, path: &Path, registry: Arc<Registry>) -> Result<SimTree> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading tree {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)?;
    Ok(SimTree::deserialize(value, registry, scenario.clients())?)
}

fn save_tree(tree: &SimTree, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&tree.serialize()?)?)?;
    info!("Tree saved to: {}", path.display());
    Ok(())
}

fn summary_table(summaries: &[NodeSummary]) {
    println!("\n╔════════╦════════╦═══════╦══════════════╦═══════╦══════════════════╗");
    println!("║ Node   ║ Parent ║ Depth ║ Edge         ║ Turns ║ Children         ║");
    println!("╠════════╬════════╬═══════╬══════════════╬═══════╬══════════════════╣");

    for summary in summaries {
        let parent = summary.parent.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
        let depth = summary.depth.map(|d| d.to_string()).unwrap_or_else(|| "-".into());
        let edge = summary.edge_type.map(|e| e.to_string()).unwrap_or_else(|| "unattached".into());
        let children = summary
            .children
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",");

        println!(
            "║ {:<6} ║ {:<6} ║ {:>5} ║ {:<12} ║ {:>5} ║ {:<16} ║",
            summary.id.to_string(), parent, depth, edge, summary.turns, children
        );
    }

    println!("╚════════╩════════╩═══════╩══════════════╩═══════╩══════════════════╝\n");
}
