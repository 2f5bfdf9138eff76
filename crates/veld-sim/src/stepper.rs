//! Tick execution: the per-step pipeline.
//!
//! Runs with the simulator lock held, on whichever thread completed
//! the quorum. Phases, in order:
//!
//! 1. Snapshot admitted actions (ascending agent id).
//! 2. Resolve movement paths, materializing and fixing every patch a
//!    path touches; blocking items truncate paths at the last free
//!    cell. **This is the only fallible phase** — on error all patch
//!    inserts are rolled back and the tick does not advance.
//! 3. Resolve movement conflicts per the collision policy.
//! 4. Apply movement and turns; fix the 3×3 block around each final
//!    position.
//! 5. Item pickup (patch lock before agent lock), lifetime expiry,
//!    and regeneration births.
//! 6. Advance the tick counter.
//! 7. Catch scent up across the active patch set; recompute every
//!    agent's perception.
//! 8. Clear pending actions, re-arm the coordinator, broadcast to
//!    sinks.

use std::sync::atomic::Ordering;
use std::time::Instant;

use indexmap::IndexMap;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use veld_core::action::Action;
use veld_core::config::CollisionPolicy;
use veld_core::direction::Direction;
use veld_core::error::{MapError, StepError};
use veld_core::item::Item;
use veld_core::position::Position;
use veld_core::rng::{mix, regen_seed, tick_seed};
use veld_field::sampler;
use veld_field::scent::ScentSnapshot;

use crate::metrics::StepMetrics;
use crate::perception;
use crate::simulator::{Simulator, StepEvent, StepOutcome, StepSink};

/// An agent's admitted state at the start of the tick.
struct Pending {
    id: u64,
    position: Position,
    direction: Direction,
    action: Option<Action>,
    active: bool,
}

/// A resolved move request: origin and (path-truncated) target.
struct Mover {
    id: u64,
    from: Position,
    to: Position,
}

fn map_to_step(error: MapError) -> StepError {
    match error {
        MapError::PatchMissing { patch } => StepError::PatchGenerationFailed {
            patch,
            reason: "patch missing after generation".into(),
        },
        MapError::LockPoisoned => StepError::LockPoisoned,
    }
}

/// In-place Fisher–Yates with the given stream.
fn shuffle(indices: &mut [usize], rng: &mut ChaCha8Rng) {
    for i in (1..indices.len()).rev() {
        let j = (rng.gen::<u64>() % (i as u64 + 1)) as usize;
        indices.swap(i, j);
    }
}

impl Simulator {
    /// Execute one tick and deliver the result to every sink.
    pub(crate) fn step_and_broadcast(&self) {
        let event = self.execute_step();
        if let Ok(sinks) = self.sinks.lock() {
            for sink in sinks.iter() {
                match sink {
                    StepSink::Handler(handler) => handler(&event),
                    StepSink::Channel(tx) => {
                        let _ = tx.send(event.clone());
                    }
                }
            }
        }
    }

    fn execute_step(&self) -> StepEvent {
        let start = Instant::now();
        let tick = self.current_tick();
        let new_tick = tick + 1;
        let mut metrics = StepMetrics::new(new_tick);
        let mut inserted: Vec<Position> = Vec::new();

        match self.run_phases(tick, new_tick, &mut metrics, &mut inserted) {
            Ok(outcome) => {
                metrics.generated_patches = inserted.len() as u32;
                metrics.duration = start.elapsed();
                if let Ok(mut last) = self.last_metrics.lock() {
                    *last = metrics;
                }
                Ok(outcome)
            }
            Err(error) => {
                // Abort with no side effects: drop every patch this
                // step created. The tick counter was never advanced.
                for coord in inserted {
                    self.map.remove(coord);
                }
                Err(error)
            }
        }
    }

    fn run_phases(
        &self,
        tick: u64,
        new_tick: u64,
        metrics: &mut StepMetrics,
        inserted: &mut Vec<Position>,
    ) -> Result<StepOutcome, StepError> {
        let config = &*self.config;
        let n = config.patch_size;
        let ids = self.agents.ids_sorted();

        // Phase 1: snapshot admitted actions.
        let mut pending = Vec::with_capacity(ids.len());
        for &id in &ids {
            if let Some(handle) = self.agents.get(id) {
                let agent = handle.lock().map_err(|_| StepError::LockPoisoned)?;
                pending.push(Pending {
                    id,
                    position: agent.position,
                    direction: agent.direction,
                    action: agent.requested_action,
                    active: agent.active,
                });
            }
        }

        // Phase 2: resolve movement paths (fallible).
        let mut movers: Vec<Mover> = Vec::new();
        for p in &pending {
            if !p.active {
                continue;
            }
            let Some(Action::Move { direction, steps }) = p.action else {
                continue;
            };
            let offset = p.direction.resolve(direction).offset();
            let mut pos = p.position;
            for _ in 0..steps {
                let next = pos + offset;
                let handle = self
                    .map
                    .get_or_generate(
                        next.patch_of(n),
                        true,
                        config,
                        &self.energy,
                        tick,
                        inserted,
                    )
                    .map_err(map_to_step)?;
                let blocked = {
                    let patch = handle.lock().map_err(|_| StepError::LockPoisoned)?;
                    patch
                        .alive_item_at(next)
                        .map(|index| {
                            config.item_types[patch.items[index].item_type as usize]
                                .blocks_movement
                        })
                        .unwrap_or(false)
                };
                if blocked {
                    break;
                }
                pos = next;
            }
            movers.push(Mover {
                id: p.id,
                from: p.position,
                to: pos,
            });
        }

        // Materialize and fix the 3×3 blocks around every candidate
        // destination before any state mutation, so a generation
        // failure still aborts cleanly.
        for mover in &movers {
            self.materialize_fixed_block(mover.to, tick, inserted)?;
        }

        // Phase 3: conflict resolution.
        let mut moved: IndexMap<u64, Position> = IndexMap::new();
        match config.collision_policy {
            CollisionPolicy::NoCollisions => {
                for mover in &movers {
                    if mover.to != mover.from {
                        metrics.moved_agents += 1;
                    }
                    moved.insert(mover.id, mover.to);
                }
            }
            CollisionPolicy::FirstComeFirstServe | CollisionPolicy::Random => {
                let mut occupancy: IndexMap<Position, u32> = IndexMap::new();
                for p in &pending {
                    *occupancy.entry(p.position).or_insert(0) += 1;
                }
                // Movers are already in ascending id order; Random
                // replaces that with a tick-seeded shuffle.
                let mut order: Vec<usize> = (0..movers.len()).collect();
                if config.collision_policy == CollisionPolicy::Random {
                    let mut rng =
                        ChaCha8Rng::seed_from_u64(tick_seed(config.seed, new_tick));
                    shuffle(&mut order, &mut rng);
                }
                for index in order {
                    let mover = &movers[index];
                    if mover.to == mover.from {
                        continue;
                    }
                    if let Some(count) = occupancy.get_mut(&mover.from) {
                        *count -= 1;
                    }
                    if occupancy.get(&mover.to).copied().unwrap_or(0) > 0 {
                        // Lost the cell; the tick is still consumed.
                        *occupancy.entry(mover.from).or_insert(0) += 1;
                        metrics.collisions_lost += 1;
                    } else {
                        *occupancy.entry(mover.to).or_insert(0) += 1;
                        moved.insert(mover.id, mover.to);
                        metrics.moved_agents += 1;
                    }
                }
            }
        }

        // Phase 4: apply movement and turns.
        for p in &pending {
            let Some(handle) = self.agents.get(p.id) else {
                continue;
            };
            let mut agent = handle.lock().map_err(|_| StepError::LockPoisoned)?;
            if let Some(&to) = moved.get(&p.id) {
                agent.position = to;
            }
            if p.active {
                if let Some(Action::Turn { direction }) = p.action {
                    agent.direction = agent.direction.resolve(direction);
                }
            }
        }

        // Phase 5a: item pickup, ascending id, patch lock first.
        for p in &pending {
            if !p.active {
                continue;
            }
            let position = moved.get(&p.id).copied().unwrap_or(p.position);
            let Some(patch_handle) = self.map.get(position.patch_of(n)) else {
                continue;
            };
            let mut patch = patch_handle.lock().map_err(|_| StepError::LockPoisoned)?;
            let Some(index) = patch.alive_item_at(position) else {
                continue;
            };
            let item_type_index = patch.items[index].item_type as usize;
            let item_type = &config.item_types[item_type_index];
            let Some(agent_handle) = self.agents.get(p.id) else {
                continue;
            };
            let mut agent = agent_handle.lock().map_err(|_| StepError::LockPoisoned)?;
            let satisfied = agent
                .collected_items
                .iter()
                .zip(&item_type.required_item_counts)
                .zip(&item_type.required_item_costs)
                .all(|((&held, &needed), &cost)| held >= needed && held >= cost);
            if satisfied {
                patch.items[index].deletion_tick = new_tick;
                for (held, &cost) in agent
                    .collected_items
                    .iter_mut()
                    .zip(&item_type.required_item_costs)
                {
                    *held -= cost;
                }
                agent.collected_items[item_type_index] += 1;
                metrics.items_collected += 1;
            }
        }

        // Phase 5b: lifetime expiry.
        if config.item_types.iter().any(|t| t.lifetime > 0) {
            for coord in self.map.coords_sorted() {
                let Some(handle) = self.map.get(coord) else {
                    continue;
                };
                let mut patch = handle.lock().map_err(|_| StepError::LockPoisoned)?;
                for item in &mut patch.items {
                    let lifetime = config.item_types[item.item_type as usize].lifetime;
                    if lifetime > 0
                        && item.is_alive()
                        && new_tick - item.creation_tick >= lifetime
                    {
                        item.deletion_tick = new_tick;
                        metrics.items_expired += 1;
                    }
                }
            }
        }

        // Phase 5c: regeneration births in the active region.
        let regen_types: Vec<usize> = (0..config.item_types.len())
            .filter(|&t| !self.energy.regeneration(t).is_zero())
            .collect();
        if !regen_types.is_empty() {
            let final_positions: Vec<Position> = pending
                .iter()
                .map(|p| moved.get(&p.id).copied().unwrap_or(p.position))
                .collect();
            for coord in self.active_patch_set(&final_positions) {
                let mut frozen: IndexMap<Position, Vec<Item>> = IndexMap::new();
                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let neighbor = Position::new(coord.x + dx, coord.y + dy);
                        if let Some(handle) = self.map.get(neighbor) {
                            let patch =
                                handle.lock().map_err(|_| StepError::LockPoisoned)?;
                            frozen.insert(neighbor, patch.items.clone());
                        }
                    }
                }
                let Some(handle) = self.map.get(coord) else {
                    continue;
                };
                let mut patch = handle.lock().map_err(|_| StepError::LockPoisoned)?;
                if !patch.fixed {
                    continue;
                }
                let center = Position::compose(coord, (n / 2, n / 2), n);
                for &item_type in &regen_types {
                    let rate = self
                        .energy
                        .regeneration(item_type)
                        .evaluate(center, new_tick);
                    if rate <= 0.0 {
                        continue;
                    }
                    let mut rng = ChaCha8Rng::seed_from_u64(mix(
                        regen_seed(config.seed, new_tick, coord),
                        item_type as u64,
                    ));
                    let before = patch.items.len();
                    sampler::regeneration_pass(
                        config,
                        &self.energy,
                        coord,
                        &mut patch.items,
                        &frozen,
                        item_type,
                        rate,
                        new_tick,
                        &mut rng,
                    );
                    metrics.items_regenerated += (patch.items.len() - before) as u32;
                }
            }
        }

        // Phase 6: tick advance.
        self.tick.store(new_tick, Ordering::SeqCst);

        // Phase 7: scent catch-up and perception.
        let all_positions = self.agents.positions_sorted();
        let positions_only: Vec<Position> =
            all_positions.iter().map(|&(_, pos)| pos).collect();
        metrics.scent_updates = self.catch_up_around(&positions_only, new_tick);

        for &id in &ids {
            let Some(handle) = self.agents.get(id) else {
                continue;
            };
            let (position, direction) = {
                let agent = handle.lock().map_err(|_| StepError::LockPoisoned)?;
                (agent.position, agent.direction)
            };
            let scent = perception::compute_scent(config, &self.map, position);
            let vision = perception::compute_vision(
                config,
                &self.map,
                &all_positions,
                position,
                direction,
            );
            let mut agent = handle.lock().map_err(|_| StepError::LockPoisoned)?;
            agent.scent = scent;
            agent.vision = vision;
        }

        // Phase 8: clear pending actions and re-arm.
        let mut outcome_agents = Vec::with_capacity(ids.len());
        for &id in &ids {
            let Some(handle) = self.agents.get(id) else {
                continue;
            };
            let mut agent = handle.lock().map_err(|_| StepError::LockPoisoned)?;
            agent.requested_action = None;
            outcome_agents.push(agent.clone());
        }
        self.coordinator.reset_tick();

        Ok(StepOutcome {
            tick: new_tick,
            agents: outcome_agents,
        })
    }

    /// Generate and fix the 3×3 patch block around `position`.
    pub(crate) fn materialize_fixed_block(
        &self,
        position: Position,
        tick: u64,
        inserted: &mut Vec<Position>,
    ) -> Result<(), StepError> {
        let center = position.patch_of(self.config.patch_size);
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let coord = Position::new(center.x + dx, center.y + dy);
                self.map
                    .get_or_generate(coord, true, &self.config, &self.energy, tick, inserted)
                    .map_err(map_to_step)?;
            }
        }
        Ok(())
    }

    /// The deduplicated, ascending set of existing patches within one
    /// patch of any of `positions`.
    fn active_patch_set(&self, positions: &[Position]) -> Vec<Position> {
        let n = self.config.patch_size;
        let mut set: Vec<Position> = Vec::new();
        for &position in positions {
            let center = position.patch_of(n);
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let coord = Position::new(center.x + dx, center.y + dy);
                    if self.map.contains(coord) {
                        set.push(coord);
                    }
                }
            }
        }
        set.sort();
        set.dedup();
        set
    }

    /// Catch scent up to `target_tick` for every patch near the given
    /// positions. Returns the number of single-tick updates applied.
    pub(crate) fn catch_up_around(&self, positions: &[Position], target_tick: u64) -> u32 {
        let set = self.active_patch_set(positions);

        // Freeze the pre-update grids of the working set and its ring,
        // so in-set neighbors read tick-consistent values.
        let mut snapshot = ScentSnapshot::new();
        let mut ring: Vec<Position> = Vec::new();
        for &coord in &set {
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    ring.push(Position::new(coord.x + dx, coord.y + dy));
                }
            }
        }
        ring.sort();
        ring.dedup();
        for coord in ring {
            if let Some(handle) = self.map.get(coord) {
                if let Ok(patch) = handle.lock() {
                    snapshot.insert(coord, patch.scent.clone());
                }
            }
        }

        let mut updates = 0u32;
        let Ok(mut diffuser) = self.diffuser.lock() else {
            return 0;
        };
        for coord in set {
            if let Some(handle) = self.map.get(coord) {
                if let Ok(mut patch) = handle.lock() {
                    updates += target_tick.saturating_sub(patch.last_scent_update) as u32;
                    diffuser.catch_up(
                        &mut patch,
                        &snapshot,
                        &self.config.item_types,
                        target_tick,
                    );
                }
            }
        }
        updates
    }
}
