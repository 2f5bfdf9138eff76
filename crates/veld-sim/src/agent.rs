//! Agent state and the agent table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use indexmap::IndexMap;

use veld_core::action::Action;
use veld_core::config::SimulatorConfig;
use veld_core::direction::Direction;
use veld_core::position::Position;

/// Mutable per-agent state, guarded by its own mutex in the table.
///
/// Invariant: while `requested_action` is `Some`, admission rejects
/// further requests until the tick the action was issued for completes
/// and the stepper clears it.
#[derive(Clone, Debug, PartialEq)]
pub struct Agent {
    /// Unique agent id, allocated monotonically and never reused.
    pub id: u64,
    /// Current world position.
    pub position: Position,
    /// Current facing.
    pub direction: Direction,
    /// Scent perceived at the agent's cell, recomputed each tick
    /// (`scent_dim` floats).
    pub scent: Vec<f32>,
    /// Vision window in the agent frame, recomputed each tick
    /// (`(2V+1)² · color_dim` floats).
    pub vision: Vec<f32>,
    /// Inventory: per-item-type pickup counts.
    pub collected_items: Vec<u32>,
    /// The action pending for the current tick, if any.
    pub requested_action: Option<Action>,
    /// Whether the agent participates in quorum and stepping.
    pub active: bool,
}

/// An immutable snapshot of one agent, as handed to step sinks, RPC
/// responses, and the snapshot codec.
pub type AgentState = Agent;

impl Agent {
    /// A fresh agent at `position`, facing up, with empty perception.
    pub fn new(id: u64, position: Position, config: &SimulatorConfig) -> Self {
        let side = (2 * config.vision_range + 1) as usize;
        Self {
            id,
            position,
            direction: Direction::Up,
            scent: vec![0.0; config.scent_dim as usize],
            vision: vec![0.0; side * side * config.color_dim as usize],
            collected_items: vec![0; config.item_types.len()],
            requested_action: None,
            active: true,
        }
    }
}

/// Shared handle to one agent.
pub type AgentHandle = Arc<Mutex<Agent>>;

/// The agent table: id-keyed storage with per-agent locks.
///
/// Structural changes (insert/remove) take the table lock; per-agent
/// mutation takes only that agent's mutex. Lock order follows the
/// simulator-wide hierarchy: any patch lock strictly before any agent
/// lock.
pub struct AgentTable {
    agents: RwLock<IndexMap<u64, AgentHandle>>,
    next_id: AtomicU64,
}

impl AgentTable {
    /// An empty table. Ids start at 1.
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(IndexMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate an id and insert a fresh agent at `position`.
    pub fn insert_new(&self, position: Position, config: &SimulatorConfig) -> (u64, AgentHandle) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(Mutex::new(Agent::new(id, position, config)));
        if let Ok(mut map) = self.agents.write() {
            map.insert(id, Arc::clone(&handle));
        }
        (id, handle)
    }

    /// Insert a fully formed agent, keeping the id counter ahead of it.
    /// Used by snapshot load.
    pub fn insert_existing(&self, agent: Agent) {
        let id = agent.id;
        self.next_id.fetch_max(id + 1, Ordering::Relaxed);
        if let Ok(mut map) = self.agents.write() {
            map.insert(id, Arc::new(Mutex::new(agent)));
        }
    }

    /// Look up an agent by id.
    pub fn get(&self, id: u64) -> Option<AgentHandle> {
        self.agents
            .read()
            .ok()
            .and_then(|map| map.get(&id).cloned())
    }

    /// Remove an agent. Returns the removed handle, or `None` for an
    /// unknown id.
    pub fn remove(&self, id: u64) -> Option<AgentHandle> {
        self.agents
            .write()
            .ok()
            .and_then(|mut map| map.shift_remove(&id))
    }

    /// All agent ids in ascending order.
    ///
    /// The stepper iterates this for every per-agent phase, which is
    /// what makes first-come-first-serve conflict resolution (and the
    /// whole tick) deterministic.
    pub fn ids_sorted(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .agents
            .read()
            .map(|map| map.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Number of agents (active or not).
    pub fn len(&self) -> usize {
        self.agents.read().map(|map| map.len()).unwrap_or(0)
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The next id the table would allocate.
    pub fn next_id(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }

    /// Set the next id exactly. Used by snapshot load, where the
    /// counter may run ahead of the highest live id.
    pub fn force_next_id(&self, next: u64) {
        self.next_id.store(next, Ordering::Relaxed);
    }

    /// Positions of all agents, in ascending id order.
    pub fn positions_sorted(&self) -> Vec<(u64, Position)> {
        self.ids_sorted()
            .into_iter()
            .filter_map(|id| {
                let handle = self.get(id)?;
                let guard = handle.lock().ok()?;
                Some((id, guard.position))
            })
            .collect()
    }
}

impl Default for AgentTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AgentTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTable")
            .field("agents", &self.len())
            .field("next_id", &self.next_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veld_core::config::{CollisionPolicy, SamplerKind};

    fn test_config() -> SimulatorConfig {
        SimulatorConfig {
            seed: 1,
            patch_size: 8,
            mcmc_iterations: 1,
            scent_dim: 2,
            color_dim: 3,
            vision_range: 1,
            max_steps_per_movement: 1,
            allowed_movement_directions: [true; 4],
            allowed_turn_directions: [true; 4],
            no_op_allowed: true,
            item_types: Vec::new(),
            agent_color: vec![0.0; 3],
            collision_policy: CollisionPolicy::FirstComeFirstServe,
            sampler: SamplerKind::MetropolisHastings,
            scent_decay: 0.5,
            scent_diffusion: 0.1,
            removed_item_lifetime: 4,
            field_of_view: std::f32::consts::TAU,
        }
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let table = AgentTable::new();
        let config = test_config();
        let (a, _) = table.insert_new(Position::ORIGIN, &config);
        let (b, _) = table.insert_new(Position::ORIGIN, &config);
        assert!(b > a);
        table.remove(a).unwrap();
        let (c, _) = table.insert_new(Position::ORIGIN, &config);
        assert!(c > b, "removed id must not be reused");
    }

    #[test]
    fn new_agent_has_sized_perception() {
        let config = test_config();
        let agent = Agent::new(1, Position::ORIGIN, &config);
        assert_eq!(agent.scent.len(), 2);
        assert_eq!(agent.vision.len(), 3 * 3 * 3);
        assert!(agent.active);
        assert_eq!(agent.requested_action, None);
        assert_eq!(agent.direction, Direction::Up);
    }

    #[test]
    fn insert_existing_advances_id_counter() {
        let table = AgentTable::new();
        let config = test_config();
        let mut agent = Agent::new(7, Position::ORIGIN, &config);
        agent.id = 7;
        table.insert_existing(agent);
        let (next, _) = table.insert_new(Position::ORIGIN, &config);
        assert_eq!(next, 8);
    }

    #[test]
    fn ids_sorted_is_ascending_after_removal() {
        let table = AgentTable::new();
        let config = test_config();
        for _ in 0..5 {
            table.insert_new(Position::ORIGIN, &config);
        }
        table.remove(3).unwrap();
        assert_eq!(table.ids_sorted(), vec![1, 2, 4, 5]);
    }
}
