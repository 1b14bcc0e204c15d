pub mod config;
pub mod stage;
pub mod world;

pub use config::{OrderingConfig, SimConfig};
pub use stage::Stage;
pub use world::World;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentSpec, AgentState};
use crate::error::{SimError, SimResult};
use crate::event::{Event, EventSink, LogEvent};
use crate::llm::Clients;
use crate::ordering::{Ordering, OrderingSnapshot};
use crate::registry::Registry;
use crate::scene::{Scene, SceneSnapshot, SceneState};

// consecutive picks of names that are not live before the run gives up
const MAX_IDLE_PICKS: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStop {
    /// The scene reported completion.
    Completed,
    /// The turn budget ran out.
    Exhausted,
    Cancelled,
    /// The ordering had nobody live to schedule.
    NoActors,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub turns_run: u64,
    pub actions_ok: u64,
    pub actions_failed: u64,
    pub stop: RunStop,
}

impl Default for RunReport {
    fn default() -> Self {
        Self {
            turns_run: 0,
            actions_ok: 0,
            actions_failed: 0,
            stop: RunStop::Exhausted,
        }
    }
}

/// Serialized simulator: JSON-safe, and enough to continue exactly where
/// the original left off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimSnapshot {
    pub config: SimConfig,
    pub agents: Vec<AgentState>,
    pub scene: SceneSnapshot,
    pub ordering: OrderingSnapshot,
    pub event_queue: Vec<LogEvent>,
    pub turns: u64,
}

/// Runs the turn loop of one simulation.
///
/// Between calls to `run` it is a plain value that can be snapshotted or
/// forked; nothing inside it is shared with another simulator except the
/// read-only LLM clients.
#[derive(Debug)]
pub struct Simulator {
    config: SimConfig,
    world: World,
    scene: Box<dyn Scene>,
    ordering: Box<dyn Ordering>,
    clients: Clients,
}

impl Simulator {
    pub fn new(
        config: SimConfig,
        agents: Vec<Agent>,
        mut scene: Box<dyn Scene>,
        ordering: Box<dyn Ordering>,
        clients: Clients,
    ) -> SimResult<Self> {
        let mut seen = HashSet::new();
        for agent in &agents {
            if !seen.insert(agent.name().to_string()) {
                return Err(SimError::DuplicateAgent(agent.name().to_string()));
            }
        }

        let mut agents = agents;
        for agent in &mut agents {
            agent.set_max_repeat(config.max_repeat);
            scene.initialize_agent(agent);
        }

        Ok(Self {
            config,
            world: World::new(agents),
            scene,
            ordering,
            clients,
        })
    }

    /// Build agents, scene and ordering from their declarative descriptions.
    /// The moderator of an `llm_moderated` ordering gets `moderator: true`
    /// unless its spec already says otherwise.
    pub fn from_specs(
        config: SimConfig,
        mut specs: Vec<AgentSpec>,
        scene_name: &str,
        scene_state: SceneState,
        registry: &Registry,
        clients: Clients,
    ) -> SimResult<Self> {
        let roster: Vec<String> = specs.iter().map(|s| s.name.clone()).collect();
        let ordering = config.ordering.initial(&roster)?.restore(registry)?;
        if let OrderingConfig::LlmModerated { moderator, .. } = &config.ordering {
            for spec in specs.iter_mut().filter(|spec| &spec.name == moderator) {
                spec.properties.entry("moderator").or_insert(json!(true));
            }
        }
        let scene = registry.scenes.create(scene_name, scene_state, &registry.actions)?;
        let agents = specs.into_iter().map(Agent::from_spec).collect();

        Self::new(config, agents, scene, ordering, clients)
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn scene(&self) -> &dyn Scene {
        self.scene.as_ref()
    }

    pub fn scene_mut(&mut self) -> &mut dyn Scene {
        self.scene.as_mut()
    }

    pub fn ordering(&self) -> &dyn Ordering {
        self.ordering.as_ref()
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    pub fn turns(&self) -> u64 {
        self.world.turns()
    }

    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.world.agent(name)
    }

    pub fn agent_mut(&mut self, name: &str) -> Option<&mut Agent> {
        self.world.agent_mut(name)
    }

    pub fn set_event_sink(&mut self, sink: Option<EventSink>) {
        self.world.set_sink(sink);
    }

    /// Public announcement to every agent, recorded like any other broadcast.
    pub fn broadcast_public(&mut self, text: impl Into<String>) {
        self.world.broadcast(&Event::public(text), None);
    }

    pub fn emit_event(&mut self, kind: &str, data: Value) {
        self.world.emit_event(kind, data);
        self.notify_ordering();
    }

    /// Emit everything queued so far and let the ordering see it.
    pub fn flush_events(&mut self) {
        self.world.emit_remaining_events();
        self.notify_ordering();
    }

    fn notify_ordering(&mut self) {
        for event in self.world.take_inbox() {
            self.ordering.on_event(&event, &self.world);
        }
    }

    pub fn run(&mut self, max_turns: u64) -> SimResult<RunReport> {
        self.run_until(max_turns, &CancellationToken::new())
    }

    /// Turn loop. Stops when the scene completes, after `max_turns` turns, or
    /// when `cancel` fires between two turns.
    ///
    /// Action dispatch failures are logged and fed back to the agent. LLM
    /// failures and broken scheduling contracts abort the run.
    pub fn run_until(&mut self, max_turns: u64, cancel: &CancellationToken) -> SimResult<RunReport> {
        info!("Running {} for up to {} turn(s)", self.config.name, max_turns);

        let mut report = RunReport::default();
        let mut idle_picks = 0;

        while report.turns_run < max_turns {
            if cancel.is_cancelled() {
                report.stop = RunStop::Cancelled;
                break;
            }

            self.flush_events();
            if self.scene.is_complete() {
                report.stop = RunStop::Completed;
                break;
            }

            let next = {
                let mut stage = Stage::new(&mut self.world, self.scene.as_mut(), &self.clients);
                self.ordering.next_actor(&mut stage)?
            };
            self.notify_ordering();

            let Some(name) = next else {
                report.stop = RunStop::NoActors;
                break;
            };
            if !self.world.contains(&name) {
                warn!("Ordering picked unknown agent '{}', skipping", name);
                idle_picks += 1;
                if idle_picks >= MAX_IDLE_PICKS {
                    report.stop = RunStop::NoActors;
                    break;
                }
                continue;
            }
            idle_picks = 0;

            self.take_turn(&name, &mut report)?;
            report.turns_run += 1;
        }

        if report.stop == RunStop::Exhausted && self.scene.is_complete() {
            report.stop = RunStop::Completed;
        }

        info!(
            "{} stopped after {} turn(s): {:?} ({} ok, {} failed actions)",
            self.config.name, report.turns_run, report.stop, report.actions_ok, report.actions_failed
        );
        Ok(report)
    }

    fn take_turn(&mut self, name: &str, report: &mut RunReport) -> SimResult<()> {
        let turn = self.world.turns();
        debug!("Turn {} -> {}", turn, name);
        self.world.emit_event("turn_start", json!({ "turn": turn, "agent": name }));

        let agent = self.world.require_agent(name)?;
        let status = self.scene.status_prompt(agent, &self.world);
        let skip = self.scene.should_skip_turn(agent, &self.world);

        if !status.is_empty() {
            self.world.require_agent_mut(name)?.add_env_feedback(status);
        }

        if skip {
            debug!("{} skips turn {}", name, turn);
        } else {
            self.act(name, report)?;
        }

        self.scene.post_turn(name, &mut self.world);
        self.flush_events();
        self.ordering.post_turn(name);
        self.world.advance_turn();
        self.emit_event("turn_end", json!({ "turn": turn, "agent": name }));
        debug!("Turn {} done", turn);
        Ok(())
    }

    /// The intra-turn loop: the agent keeps acting until it passes, yields
    /// the floor, or hits the step limit.
    fn act(&mut self, name: &str, report: &mut RunReport) -> SimResult<()> {
        let agent = self.world.require_agent(name)?;
        let actions = self.scene.scene_actions(agent);
        self.world.require_agent_mut(name)?.set_action_space(actions);

        for step in 0..self.config.max_steps_per_turn {
            let calls = self
                .world
                .require_agent_mut(name)?
                .process(&self.clients, step == 0)?;
            if calls.is_empty() {
                break;
            }

            let mut yielded = false;
            for call in &calls {
                let outcome = {
                    let mut stage = Stage::new(&mut self.world, self.scene.as_mut(), &self.clients);
                    stage.dispatch(name, call)
                };

                match outcome {
                    Ok(outcome) => {
                        report.actions_ok += 1;
                        yielded |= outcome.pass_control;
                    }
                    Err(e) => {
                        report.actions_failed += 1;
                        warn!("{} action '{}' failed: {}", name, call.name, e);
                        self.world
                            .require_agent_mut(name)?
                            .add_env_feedback(format!("[Error] Your action '{}' failed: {}", call.name, e));
                    }
                }
                self.notify_ordering();
            }

            if yielded {
                break;
            }
        }
        Ok(())
    }

    /// Deep, independent copy. Scene and ordering are cloned structurally,
    /// agents through their state.
    pub fn fork(&self) -> Self {
        Self {
            config: self.config.clone(),
            world: self.world.fork(),
            scene: self.scene.clone_box(),
            ordering: self.ordering.clone_box(),
            clients: self.clients.clone(),
        }
    }

    pub fn snapshot(&self) -> SimSnapshot {
        SimSnapshot {
            config: self.config.clone(),
            agents: self.world.agents().iter().map(Agent::serialize).collect(),
            scene: SceneSnapshot::of(self.scene.as_ref()),
            ordering: self.ordering.snapshot(),
            event_queue: self.world.pending_events().cloned().collect(),
            turns: self.world.turns(),
        }
    }

    pub fn restore(snapshot: SimSnapshot, registry: &Registry, clients: Clients) -> SimResult<Self> {
        let agents = snapshot.agents.into_iter().map(Agent::deserialize).collect();
        let scene = registry.scenes.restore(snapshot.scene, &registry.actions)?;
        let ordering = snapshot.ordering.restore(registry)?;

        Ok(Self {
            config: snapshot.config,
            world: World::restore(agents, snapshot.event_queue, snapshot.turns),
            scene,
            ordering,
            clients,
        })
    }

    pub fn serialize(&self) -> SimResult<Value> {
        Ok(serde_json::to_value(self.snapshot())?)
    }

    pub fn deserialize(data: Value, registry: &Registry, clients: Clients) -> SimResult<Self> {
        let snapshot: SimSnapshot = serde_json::from_value(data)?;
        Self::restore(snapshot, registry, clients)
    }
}
