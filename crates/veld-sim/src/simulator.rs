//! The simulator: construction, structural mutation, action
//! admission, and state export.
//!
//! # Locking
//!
//! One top-level mutex serializes structural mutation, action
//! admission, and tick execution; the finer-grained locks (patch-map
//! read/write lock, per-patch and per-agent mutexes) order strictly
//! below it, taken as documented in their modules. Step sinks run with
//! the top-level lock held and therefore must not call back into the
//! simulator.
//!
//! # Quorum
//!
//! Admission methods report to the [`Coordinator`]; whichever call
//! completes the quorum executes the tick inline before returning.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};

use veld_core::action::{Action, ActionError};
use veld_core::config::{ConfigError, SimulatorConfig};
use veld_core::direction::Direction;
use veld_core::error::StepError;
use veld_core::item::Item;
use veld_core::position::Position;
use veld_energy::EnergyTables;
use veld_field::map::PatchMap;
use veld_field::patch::Patch;
use veld_field::scent::ScentDiffuser;

use crate::agent::{AgentState, AgentTable};
use crate::coordinator::{Coordinator, CoordinatorState};
use crate::metrics::StepMetrics;
use crate::perception;

/// Result of one tick, delivered to step sinks.
///
/// `agents` holds the post-step state of every agent, in ascending id
/// order.
#[derive(Clone, Debug, PartialEq)]
pub struct StepOutcome {
    /// The tick that just completed.
    pub tick: u64,
    /// Post-step agent states, ascending by id.
    pub agents: Vec<AgentState>,
}

/// What a step sink receives: the outcome, or the error of a failed
/// (and rolled-back) step.
pub type StepEvent = Result<StepOutcome, StepError>;

/// A registered per-tick event sink.
pub(crate) enum StepSink {
    /// Direct function handle.
    Handler(Box<dyn Fn(&StepEvent) + Send + Sync>),
    /// Channel sender; disconnected receivers are silently skipped.
    Channel(Sender<StepEvent>),
}

/// Errors from semaphore calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SemaphoreError {
    /// No semaphore with the given id exists.
    InvalidSemaphoreId,
}

impl fmt::Display for SemaphoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSemaphoreId => write!(f, "invalid semaphore id"),
        }
    }
}

impl Error for SemaphoreError {}

/// One patch's externally visible state, as returned by
/// [`Simulator::get_map`].
#[derive(Clone, Debug, PartialEq)]
pub struct PatchState {
    /// Patch coordinate.
    pub position: Position,
    /// Whether the patch is frozen against resampling.
    pub fixed: bool,
    /// Alive items in the patch.
    pub items: Vec<Item>,
    /// Positions of agents currently inside the patch.
    pub agents: Vec<Position>,
    /// Scent tensor, if requested.
    pub scent: Option<Vec<f32>>,
    /// Per-cell color raster (items + agents, unoccluded), if
    /// requested.
    pub colors: Option<Vec<f32>>,
}

/// Full simulator state as plain data, the unit the snapshot codec
/// reads and writes.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulatorState {
    /// The immutable configuration.
    pub config: SimulatorConfig,
    /// Current tick.
    pub tick: u64,
    /// Every materialized patch, ascending by coordinate.
    pub patches: Vec<Patch>,
    /// Every agent, ascending by id.
    pub agents: Vec<AgentState>,
    /// Next agent id to allocate.
    pub next_agent_id: u64,
    /// Coordinator bookkeeping.
    pub coordinator: CoordinatorState,
}

/// A lock-step grid-world simulator.
///
/// See the [crate docs](crate) for the tick pipeline and the module
/// docs for locking rules.
pub struct Simulator {
    pub(crate) config: Arc<SimulatorConfig>,
    pub(crate) energy: Arc<EnergyTables>,
    pub(crate) map: PatchMap,
    pub(crate) agents: AgentTable,
    pub(crate) coordinator: Coordinator,
    pub(crate) tick: AtomicU64,
    pub(crate) diffuser: Mutex<ScentDiffuser>,
    pub(crate) sinks: Mutex<Vec<StepSink>>,
    pub(crate) last_metrics: Mutex<StepMetrics>,
    pub(crate) sim_lock: Mutex<()>,
}

// Compile-time assertion: Simulator is Send + Sync so servers can
// share it across client threads.
const _: () = {
    #[allow(dead_code)]
    fn assert_send_sync<T: Send + Sync>() {}
    #[allow(dead_code)]
    fn check() {
        assert_send_sync::<Simulator>();
    }
};

impl Simulator {
    /// Create a simulator from a configuration.
    ///
    /// Validates the configuration and resolves every energy-function
    /// spec; any failure aborts construction. The world starts at tick
    /// 0 with no patches, agents, or semaphores.
    pub fn new(config: SimulatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let energy =
            EnergyTables::new(&config).map_err(|e| ConfigError::InvalidEnergyFunction {
                reason: e.to_string(),
            })?;
        let diffuser = ScentDiffuser::new(&config);
        Ok(Self {
            map: PatchMap::new(config.patch_size),
            agents: AgentTable::new(),
            coordinator: Coordinator::new(),
            tick: AtomicU64::new(0),
            diffuser: Mutex::new(diffuser),
            sinks: Mutex::new(Vec::new()),
            last_metrics: Mutex::new(StepMetrics::default()),
            sim_lock: Mutex::new(()),
            energy: Arc::new(energy),
            config: Arc::new(config),
        })
    }

    /// The immutable configuration.
    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Current tick (0 until the first step completes).
    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }

    /// Metrics of the most recent successful step.
    pub fn last_metrics(&self) -> StepMetrics {
        self.last_metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Register a step handler.
    ///
    /// Handlers run on the thread that completed quorum, with the
    /// simulator lock held: they must not call back into the
    /// simulator.
    pub fn on_step(&self, handler: impl Fn(&StepEvent) + Send + Sync + 'static) {
        if let Ok(mut sinks) = self.sinks.lock() {
            sinks.push(StepSink::Handler(Box::new(handler)));
        }
    }

    /// Register a channel sink and return its receiving end.
    ///
    /// Every step event is cloned into the channel; dropping the
    /// receiver unregisters nothing but sends become no-ops.
    pub fn step_channel(&self) -> Receiver<StepEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        if let Ok(mut sinks) = self.sinks.lock() {
            sinks.push(StepSink::Channel(tx));
        }
        rx
    }

    // ── Agents ──────────────────────────────────────────────────

    /// Add an agent at the origin, facing up.
    ///
    /// Materializes and fixes the 3×3 patch block around the origin,
    /// computes the agent's initial perception, and registers it with
    /// the coordinator. Agents may share the spawn cell.
    pub fn add_agent(&self) -> Result<AgentState, StepError> {
        let _guard = self.lock_sim();
        let position = Position::ORIGIN;
        let tick = self.current_tick();

        let mut inserted = Vec::new();
        if let Err(error) = self.materialize_fixed_block(position, tick, &mut inserted) {
            for coord in inserted {
                self.map.remove(coord);
            }
            return Err(error);
        }

        let (id, handle) = self.agents.insert_new(position, &self.config);
        self.coordinator.add_agent();

        self.catch_up_around(&[position], tick);
        let positions = self.agents.positions_sorted();
        let scent = perception::compute_scent(&self.config, &self.map, position);
        let vision = perception::compute_vision(
            &self.config,
            &self.map,
            &positions,
            position,
            Direction::Up,
        );
        let mut agent = handle.lock().map_err(|_| StepError::LockPoisoned)?;
        agent.scent = scent;
        agent.vision = vision;
        Ok(agent.clone())
    }

    /// Remove an agent. Its cell obligation is dropped; if that
    /// completes the quorum, the tick runs before this returns.
    pub fn remove_agent(&self, agent_id: u64) -> Result<(), ActionError> {
        let _guard = self.lock_sim();
        let handle = self
            .agents
            .remove(agent_id)
            .ok_or(ActionError::InvalidAgentId)?;
        let (was_active, had_pending) = match handle.lock() {
            Ok(agent) => (agent.active, agent.requested_action.is_some()),
            Err(_) => (true, false),
        };
        if self.coordinator.remove_agent(was_active, had_pending) {
            self.step_and_broadcast();
        }
        Ok(())
    }

    /// Ids of all agents, ascending.
    pub fn agent_ids(&self) -> Vec<u64> {
        self.agents.ids_sorted()
    }

    /// States of the requested agents; `None` for unknown ids.
    pub fn agent_states(&self, agent_ids: &[u64]) -> Vec<Option<AgentState>> {
        agent_ids
            .iter()
            .map(|&id| {
                let handle = self.agents.get(id)?;
                let agent = handle.lock().ok()?;
                Some(agent.clone())
            })
            .collect()
    }

    /// Activate or deactivate an agent.
    ///
    /// Deactivation drops any pending action and removes the agent
    /// from the expected responders; if that completes the quorum, the
    /// tick runs before this returns.
    pub fn set_active(&self, agent_id: u64, active: bool) -> Result<(), ActionError> {
        let _guard = self.lock_sim();
        let handle = self.agents.get(agent_id).ok_or(ActionError::InvalidAgentId)?;
        let mut agent = handle.lock().map_err(|_| ActionError::InvalidAgentId)?;
        if agent.active == active {
            return Ok(());
        }
        agent.active = active;
        if active {
            drop(agent);
            self.coordinator.activate_agent();
        } else {
            let had_pending = agent.requested_action.take().is_some();
            drop(agent);
            if self.coordinator.deactivate_agent(had_pending) {
                self.step_and_broadcast();
            }
        }
        Ok(())
    }

    /// Whether an agent is active.
    pub fn is_active(&self, agent_id: u64) -> Result<bool, ActionError> {
        let handle = self.agents.get(agent_id).ok_or(ActionError::InvalidAgentId)?;
        let agent = handle.lock().map_err(|_| ActionError::InvalidAgentId)?;
        Ok(agent.active)
    }

    // ── Actions ─────────────────────────────────────────────────

    /// Request a move of up to `steps` cells in the agent-relative
    /// `direction`.
    pub fn move_agent(
        &self,
        agent_id: u64,
        direction: Direction,
        steps: u32,
    ) -> Result<(), ActionError> {
        if steps == 0 || steps > self.config.max_steps_per_movement {
            return Err(ActionError::StepCountOutOfRange { steps });
        }
        if !self.config.allowed_movement_directions[direction.index()] {
            return Err(ActionError::DirectionNotAllowed { direction });
        }
        self.submit_action(agent_id, Action::Move { direction, steps })
    }

    /// Request a turn by the agent-relative `direction`.
    pub fn turn_agent(&self, agent_id: u64, direction: Direction) -> Result<(), ActionError> {
        if !self.config.allowed_turn_directions[direction.index()] {
            return Err(ActionError::DirectionNotAllowed { direction });
        }
        self.submit_action(agent_id, Action::Turn { direction })
    }

    /// Consume the agent's tick without doing anything.
    pub fn no_op(&self, agent_id: u64) -> Result<(), ActionError> {
        if !self.config.no_op_allowed {
            return Err(ActionError::NoOpNotAllowed);
        }
        self.submit_action(agent_id, Action::NoOp)
    }

    /// Admit an action for `agent_id` and run the tick if this
    /// completes the quorum.
    pub(crate) fn submit_action(&self, agent_id: u64, action: Action) -> Result<(), ActionError> {
        let _guard = self.lock_sim();
        let handle = self.agents.get(agent_id).ok_or(ActionError::InvalidAgentId)?;
        {
            let mut agent = handle.lock().map_err(|_| ActionError::InvalidAgentId)?;
            if !agent.active {
                return Err(ActionError::InvalidAgentId);
            }
            if agent.requested_action.is_some() {
                return Err(ActionError::ActionAlreadyQueued);
            }
            agent.requested_action = Some(action);
        }
        if self.coordinator.agent_acted() {
            self.step_and_broadcast();
        }
        Ok(())
    }

    // ── Semaphores ──────────────────────────────────────────────

    /// Allocate a semaphore. It starts unsignaled and gates ticking
    /// immediately.
    pub fn add_semaphore(&self) -> u64 {
        let _guard = self.lock_sim();
        self.coordinator.add_semaphore()
    }

    /// Remove a semaphore; if the remaining participants already
    /// reported, the tick runs before this returns.
    pub fn remove_semaphore(&self, semaphore_id: u64) -> Result<(), SemaphoreError> {
        let _guard = self.lock_sim();
        match self.coordinator.remove_semaphore(semaphore_id) {
            Ok(true) => {
                self.step_and_broadcast();
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(()) => Err(SemaphoreError::InvalidSemaphoreId),
        }
    }

    /// Signal a semaphore; it stays signaled across ticks until
    /// [`unsignal_semaphore`](Simulator::unsignal_semaphore).
    pub fn signal_semaphore(&self, semaphore_id: u64) -> Result<(), SemaphoreError> {
        let _guard = self.lock_sim();
        match self.coordinator.signal_semaphore(semaphore_id) {
            Ok(true) => {
                self.step_and_broadcast();
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(()) => Err(SemaphoreError::InvalidSemaphoreId),
        }
    }

    /// Lower a semaphore, stalling ticks until it is signaled again.
    pub fn unsignal_semaphore(&self, semaphore_id: u64) -> Result<(), SemaphoreError> {
        let _guard = self.lock_sim();
        self.coordinator
            .unsignal_semaphore(semaphore_id)
            .map_err(|()| SemaphoreError::InvalidSemaphoreId)
    }

    /// The semaphore table: `(id, signaled)` in allocation order.
    pub fn semaphores(&self) -> Vec<(u64, bool)> {
        self.coordinator.semaphores()
    }

    // ── Map access ──────────────────────────────────────────────

    /// States of the materialized patches intersecting the rectangle
    /// `[bottom_left, top_right]` (inclusive, world cells).
    ///
    /// A read-only view: missing patches are skipped, not generated.
    pub fn get_map(
        &self,
        bottom_left: Position,
        top_right: Position,
        want_scent: bool,
        want_vision: bool,
    ) -> Vec<PatchState> {
        let _guard = self.lock_sim();
        let n = self.config.patch_size;
        let lo = bottom_left.patch_of(n);
        let hi = top_right.patch_of(n);
        let agent_positions = self.agents.positions_sorted();

        let mut states = Vec::new();
        for py in lo.y..=hi.y {
            for px in lo.x..=hi.x {
                let coord = Position::new(px, py);
                let Some(patch) = self.map.clone_patch(coord) else {
                    continue;
                };
                let agents: Vec<Position> = agent_positions
                    .iter()
                    .map(|&(_, pos)| pos)
                    .filter(|pos| pos.patch_of(n) == coord)
                    .collect();
                let colors = want_vision.then(|| self.render_colors(&patch, &agents));
                states.push(PatchState {
                    position: coord,
                    fixed: patch.fixed,
                    items: patch
                        .items
                        .iter()
                        .copied()
                        .filter(Item::is_alive)
                        .collect(),
                    agents,
                    scent: want_scent.then(|| patch.scent.clone()),
                    colors,
                });
            }
        }
        states
    }

    /// Raw per-cell color raster of one patch: item colors plus agent
    /// colors, no occlusion or field-of-view.
    fn render_colors(&self, patch: &Patch, agents: &[Position]) -> Vec<f32> {
        let n = self.config.patch_size;
        let dim = self.config.color_dim as usize;
        let mut colors = vec![0.0f32; (n as usize) * (n as usize) * dim];
        for item in patch.items.iter().filter(|item| item.is_alive()) {
            let cell = item.position.cell_of(n);
            let base = Patch::scent_index(cell, n, self.config.color_dim);
            for (s, &c) in self.config.item_types[item.item_type as usize]
                .color
                .iter()
                .enumerate()
            {
                colors[base + s] += c;
            }
        }
        for position in agents {
            let cell = position.cell_of(n);
            let base = Patch::scent_index(cell, n, self.config.color_dim);
            for (s, &c) in self.config.agent_color.iter().enumerate() {
                colors[base + s] += c;
            }
        }
        colors
    }

    // ── State export / import ───────────────────────────────────

    /// Export the complete simulator state as plain data.
    pub fn to_state(&self) -> SimulatorState {
        let _guard = self.lock_sim();
        let patches = self
            .map
            .coords_sorted()
            .into_iter()
            .filter_map(|coord| self.map.clone_patch(coord))
            .collect();
        let agents = self
            .agents
            .ids_sorted()
            .into_iter()
            .filter_map(|id| {
                let handle = self.agents.get(id)?;
                let agent = handle.lock().ok()?;
                Some(agent.clone())
            })
            .collect();
        SimulatorState {
            config: (*self.config).clone(),
            tick: self.current_tick(),
            patches,
            agents,
            next_agent_id: self.agents.next_id(),
            coordinator: self.coordinator.export(),
        }
    }

    /// Rebuild a simulator from exported state.
    pub fn from_state(state: SimulatorState) -> Result<Self, ConfigError> {
        let sim = Self::new(state.config)?;
        sim.tick.store(state.tick, Ordering::SeqCst);
        for patch in state.patches {
            sim.map.insert(patch);
        }
        for agent in state.agents {
            sim.agents.insert_existing(agent);
        }
        // next_agent_id may run ahead of the highest live id when
        // agents were removed; restore it exactly.
        sim.agents.force_next_id(state.next_agent_id);
        sim.coordinator.restore(&state.coordinator);
        Ok(sim)
    }

    pub(crate) fn lock_sim(&self) -> std::sync::MutexGuard<'_, ()> {
        self.sim_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulator")
            .field("tick", &self.current_tick())
            .field("patches", &self.map.len())
            .field("agents", &self.agents.len())
            .finish()
    }
}
