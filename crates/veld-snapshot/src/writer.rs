//! Snapshot encoding.

use std::io::Write;

use veld_core::action::Action;
use veld_core::config::{CollisionPolicy, SamplerKind, SimulatorConfig};
use veld_core::item::{EnergySpec, ItemType};
use veld_core::position::Position;
use veld_field::patch::Patch;
use veld_sim::agent::AgentState;
use veld_sim::{Simulator, SimulatorState};

use crate::codec::*;
use crate::error::SnapshotError;
use crate::{FORMAT_VERSION, MAGIC};

/// Save a simulator's complete state.
///
/// Equivalent to `write_state(&sim.to_state(), writer)`; the exported
/// state is already in canonical order (patches ascending by
/// coordinate, agents ascending by id), which is what makes identical
/// simulators produce identical files.
pub fn save<W: Write>(sim: &Simulator, writer: &mut W) -> Result<(), SnapshotError> {
    write_state(&sim.to_state(), writer)
}

/// Encode an exported state. The caller is responsible for canonical
/// ordering; [`Simulator::to_state`] provides it.
pub fn write_state<W: Write>(
    state: &SimulatorState,
    writer: &mut W,
) -> Result<(), SnapshotError> {
    let mut w = ChecksumWriter::new(writer);
    w.put(&MAGIC)?;
    write_u8(&mut w, FORMAT_VERSION)?;

    write_config(&mut w, &state.config)?;
    write_u64_le(&mut w, state.tick)?;

    write_u32_le(&mut w, state.patches.len() as u32)?;
    for patch in &state.patches {
        write_patch(&mut w, patch)?;
    }

    write_u32_le(&mut w, state.agents.len() as u32)?;
    for agent in &state.agents {
        write_agent(&mut w, agent)?;
    }
    write_u64_le(&mut w, state.next_agent_id)?;

    write_u64_le(&mut w, state.coordinator.acted_agents)?;
    write_u64_le(&mut w, state.coordinator.expected_agents)?;
    write_u32_le(&mut w, state.coordinator.semaphores.len() as u32)?;
    for &(id, signaled) in &state.coordinator.semaphores {
        write_u64_le(&mut w, id)?;
        write_bool(&mut w, signaled)?;
    }
    write_u64_le(&mut w, state.coordinator.next_semaphore_id)?;

    w.finish()
}

fn write_position(w: &mut ChecksumWriter<'_>, position: Position) -> Result<(), SnapshotError> {
    write_i64_le(w, position.x)?;
    write_i64_le(w, position.y)
}

fn write_spec(w: &mut ChecksumWriter<'_>, spec: &EnergySpec) -> Result<(), SnapshotError> {
    write_u32_le(w, spec.tag)?;
    write_f32_slice(w, &spec.args)
}

fn write_config(w: &mut ChecksumWriter<'_>, config: &SimulatorConfig) -> Result<(), SnapshotError> {
    write_u64_le(w, config.seed)?;
    write_u32_le(w, config.patch_size)?;
    write_u32_le(w, config.mcmc_iterations)?;
    write_u32_le(w, config.scent_dim)?;
    write_u32_le(w, config.color_dim)?;
    write_u32_le(w, config.vision_range)?;
    write_u32_le(w, config.max_steps_per_movement)?;
    for allowed in config.allowed_movement_directions {
        write_bool(w, allowed)?;
    }
    for allowed in config.allowed_turn_directions {
        write_bool(w, allowed)?;
    }
    write_bool(w, config.no_op_allowed)?;
    write_u8(
        w,
        match config.collision_policy {
            CollisionPolicy::NoCollisions => 0,
            CollisionPolicy::FirstComeFirstServe => 1,
            CollisionPolicy::Random => 2,
        },
    )?;
    write_u8(
        w,
        match config.sampler {
            SamplerKind::MetropolisHastings => 0,
            SamplerKind::Gibbs => 1,
        },
    )?;
    write_f32_le(w, config.scent_decay)?;
    write_f32_le(w, config.scent_diffusion)?;
    write_u64_le(w, config.removed_item_lifetime)?;
    write_f32_le(w, config.field_of_view)?;
    write_f32_slice(w, &config.agent_color)?;

    write_u32_le(w, config.item_types.len() as u32)?;
    for item_type in &config.item_types {
        write_item_type(w, item_type)?;
    }
    Ok(())
}

fn write_item_type(w: &mut ChecksumWriter<'_>, item_type: &ItemType) -> Result<(), SnapshotError> {
    write_str(w, &item_type.name)?;
    write_f32_slice(w, &item_type.scent)?;
    write_f32_slice(w, &item_type.color)?;
    write_u32_slice(w, &item_type.required_item_counts)?;
    write_u32_slice(w, &item_type.required_item_costs)?;
    write_bool(w, item_type.blocks_movement)?;
    write_f32_le(w, item_type.visual_occlusion)?;
    write_spec(w, &item_type.intensity)?;
    write_u32_le(w, item_type.interactions.len() as u32)?;
    for spec in &item_type.interactions {
        write_spec(w, spec)?;
    }
    write_spec(w, &item_type.regeneration)?;
    write_u64_le(w, item_type.lifetime)
}

fn write_patch(w: &mut ChecksumWriter<'_>, patch: &Patch) -> Result<(), SnapshotError> {
    write_position(w, patch.position)?;
    write_bool(w, patch.fixed)?;
    write_u32_le(w, patch.items.len() as u32)?;
    for item in &patch.items {
        write_u32_le(w, item.item_type)?;
        write_position(w, item.position)?;
        write_u64_le(w, item.creation_tick)?;
        write_u64_le(w, item.deletion_tick)?;
    }
    write_f32_slice(w, &patch.scent)?;
    write_u64_le(w, patch.last_scent_update)
}

fn write_agent(w: &mut ChecksumWriter<'_>, agent: &AgentState) -> Result<(), SnapshotError> {
    write_u64_le(w, agent.id)?;
    write_position(w, agent.position)?;
    write_u8(w, agent.direction.index() as u8)?;
    write_f32_slice(w, &agent.scent)?;
    write_f32_slice(w, &agent.vision)?;
    write_u32_slice(w, &agent.collected_items)?;
    match agent.requested_action {
        None => write_u8(w, 0)?,
        Some(Action::Move { direction, steps }) => {
            write_u8(w, 1)?;
            write_u8(w, direction.index() as u8)?;
            write_u32_le(w, steps)?;
        }
        Some(Action::Turn { direction }) => {
            write_u8(w, 2)?;
            write_u8(w, direction.index() as u8)?;
        }
        Some(Action::NoOp) => write_u8(w, 3)?,
    }
    write_bool(w, agent.active)
}
