//! Snapshot decoding.
//!
//! Strictly mirrors [`writer`](crate::writer). Every enum tag is
//! validated, the trailing checksum must match, and the stream must
//! end exactly after it — otherwise the load fails with no partial
//! state.

use std::io::Read;

use veld_core::action::Action;
use veld_core::config::{CollisionPolicy, SamplerKind, SimulatorConfig};
use veld_core::direction::Direction;
use veld_core::item::{EnergySpec, Item, ItemType};
use veld_core::position::Position;
use veld_field::patch::Patch;
use veld_sim::agent::AgentState;
use veld_sim::{CoordinatorState, Simulator, SimulatorState};

use crate::codec::*;
use crate::error::SnapshotError;
use crate::{FORMAT_VERSION, MAGIC};

/// Load a simulator from a snapshot stream.
pub fn load<R: Read>(reader: &mut R) -> Result<Simulator, SnapshotError> {
    let state = read_state(reader)?;
    Simulator::from_state(state).map_err(|e| SnapshotError::InvalidState {
        reason: e.to_string(),
    })
}

/// Decode an exported state from a snapshot stream.
pub fn read_state<R: Read>(reader: &mut R) -> Result<SimulatorState, SnapshotError> {
    let mut r = ChecksumReader::new(reader);

    let mut magic = [0u8; 4];
    r.take(&mut magic)?;
    if magic != MAGIC {
        return Err(SnapshotError::InvalidMagic);
    }
    let version = read_u8(&mut r)?;
    if version != FORMAT_VERSION {
        return Err(SnapshotError::UnsupportedVersion { found: version });
    }

    let config = read_config(&mut r)?;
    let tick = read_u64_le(&mut r)?;

    let patch_count = read_u32_le(&mut r)? as usize;
    let mut patches = Vec::with_capacity(patch_count.min(1 << 16));
    for _ in 0..patch_count {
        patches.push(read_patch(&mut r)?);
    }

    let agent_count = read_u32_le(&mut r)? as usize;
    let mut agents = Vec::with_capacity(agent_count.min(1 << 16));
    for _ in 0..agent_count {
        agents.push(read_agent(&mut r)?);
    }
    let next_agent_id = read_u64_le(&mut r)?;

    let acted_agents = read_u64_le(&mut r)?;
    let expected_agents = read_u64_le(&mut r)?;
    let semaphore_count = read_u32_le(&mut r)? as usize;
    let mut semaphores = Vec::with_capacity(semaphore_count.min(1 << 16));
    for _ in 0..semaphore_count {
        let id = read_u64_le(&mut r)?;
        let signaled = read_bool(&mut r)?;
        semaphores.push((id, signaled));
    }
    let next_semaphore_id = read_u64_le(&mut r)?;

    r.finish()?;

    // Cross-validate tensor sizes against the configuration: a
    // checksum-valid file with inconsistent dimensions must not reach
    // the simulator.
    let cells = (config.patch_size as usize).pow(2);
    let scent_len = cells * config.scent_dim as usize;
    for patch in &patches {
        if patch.scent.len() != scent_len {
            return Err(SnapshotError::Malformed {
                detail: format!(
                    "patch {} scent length {} != {scent_len}",
                    patch.position,
                    patch.scent.len()
                ),
            });
        }
    }
    let side = (2 * config.vision_range as usize) + 1;
    let vision_len = side * side * config.color_dim as usize;
    for agent in &agents {
        if agent.scent.len() != config.scent_dim as usize
            || agent.vision.len() != vision_len
            || agent.collected_items.len() != config.item_types.len()
        {
            return Err(SnapshotError::Malformed {
                detail: format!("agent {} perception lengths inconsistent", agent.id),
            });
        }
    }

    Ok(SimulatorState {
        config,
        tick,
        patches,
        agents,
        next_agent_id,
        coordinator: CoordinatorState {
            acted_agents,
            expected_agents,
            semaphores,
            next_semaphore_id,
        },
    })
}

fn read_position(r: &mut ChecksumReader<'_>) -> Result<Position, SnapshotError> {
    let x = read_i64_le(r)?;
    let y = read_i64_le(r)?;
    Ok(Position::new(x, y))
}

fn read_direction(r: &mut ChecksumReader<'_>) -> Result<Direction, SnapshotError> {
    let tag = read_u8(r)?;
    Direction::from_index(tag).ok_or(SnapshotError::Malformed {
        detail: format!("unknown direction tag {tag}"),
    })
}

fn read_spec(r: &mut ChecksumReader<'_>) -> Result<EnergySpec, SnapshotError> {
    let tag = read_u32_le(r)?;
    let args = read_f32_vec(r)?;
    Ok(EnergySpec::new(tag, args))
}

fn read_config(r: &mut ChecksumReader<'_>) -> Result<SimulatorConfig, SnapshotError> {
    let seed = read_u64_le(r)?;
    let patch_size = read_u32_le(r)?;
    let mcmc_iterations = read_u32_le(r)?;
    let scent_dim = read_u32_le(r)?;
    let color_dim = read_u32_le(r)?;
    let vision_range = read_u32_le(r)?;
    let max_steps_per_movement = read_u32_le(r)?;
    let mut allowed_movement_directions = [false; 4];
    for allowed in &mut allowed_movement_directions {
        *allowed = read_bool(r)?;
    }
    let mut allowed_turn_directions = [false; 4];
    for allowed in &mut allowed_turn_directions {
        *allowed = read_bool(r)?;
    }
    let no_op_allowed = read_bool(r)?;
    let collision_policy = match read_u8(r)? {
        0 => CollisionPolicy::NoCollisions,
        1 => CollisionPolicy::FirstComeFirstServe,
        2 => CollisionPolicy::Random,
        tag => {
            return Err(SnapshotError::Malformed {
                detail: format!("unknown collision policy tag {tag}"),
            })
        }
    };
    let sampler = match read_u8(r)? {
        0 => SamplerKind::MetropolisHastings,
        1 => SamplerKind::Gibbs,
        tag => {
            return Err(SnapshotError::Malformed {
                detail: format!("unknown sampler tag {tag}"),
            })
        }
    };
    let scent_decay = read_f32_le(r)?;
    let scent_diffusion = read_f32_le(r)?;
    let removed_item_lifetime = read_u64_le(r)?;
    let field_of_view = read_f32_le(r)?;
    let agent_color = read_f32_vec(r)?;

    let type_count = read_u32_le(r)? as usize;
    let mut item_types = Vec::with_capacity(type_count.min(1 << 12));
    for _ in 0..type_count {
        item_types.push(read_item_type(r)?);
    }

    Ok(SimulatorConfig {
        seed,
        patch_size,
        mcmc_iterations,
        scent_dim,
        color_dim,
        vision_range,
        max_steps_per_movement,
        allowed_movement_directions,
        allowed_turn_directions,
        no_op_allowed,
        item_types,
        agent_color,
        collision_policy,
        sampler,
        scent_decay,
        scent_diffusion,
        removed_item_lifetime,
        field_of_view,
    })
}

fn read_item_type(r: &mut ChecksumReader<'_>) -> Result<ItemType, SnapshotError> {
    let name = read_str(r)?;
    let scent = read_f32_vec(r)?;
    let color = read_f32_vec(r)?;
    let required_item_counts = read_u32_vec(r)?;
    let required_item_costs = read_u32_vec(r)?;
    let blocks_movement = read_bool(r)?;
    let visual_occlusion = read_f32_le(r)?;
    let intensity = read_spec(r)?;
    let interaction_count = read_u32_le(r)? as usize;
    let mut interactions = Vec::with_capacity(interaction_count.min(1 << 12));
    for _ in 0..interaction_count {
        interactions.push(read_spec(r)?);
    }
    let regeneration = read_spec(r)?;
    let lifetime = read_u64_le(r)?;
    Ok(ItemType {
        name,
        scent,
        color,
        required_item_counts,
        required_item_costs,
        blocks_movement,
        visual_occlusion,
        intensity,
        interactions,
        regeneration,
        lifetime,
    })
}

fn read_patch(r: &mut ChecksumReader<'_>) -> Result<Patch, SnapshotError> {
    let position = read_position(r)?;
    let fixed = read_bool(r)?;
    let item_count = read_u32_le(r)? as usize;
    let mut items = Vec::with_capacity(item_count.min(1 << 16));
    for _ in 0..item_count {
        let item_type = read_u32_le(r)?;
        let item_position = read_position(r)?;
        let creation_tick = read_u64_le(r)?;
        let deletion_tick = read_u64_le(r)?;
        items.push(Item {
            item_type,
            position: item_position,
            creation_tick,
            deletion_tick,
        });
    }
    let scent = read_f32_vec(r)?;
    let last_scent_update = read_u64_le(r)?;
    Ok(Patch {
        position,
        fixed,
        items,
        scent,
        last_scent_update,
    })
}

fn read_agent(r: &mut ChecksumReader<'_>) -> Result<AgentState, SnapshotError> {
    let id = read_u64_le(r)?;
    let position = read_position(r)?;
    let direction = read_direction(r)?;
    let scent = read_f32_vec(r)?;
    let vision = read_f32_vec(r)?;
    let collected_items = read_u32_vec(r)?;
    let requested_action = match read_u8(r)? {
        0 => None,
        1 => {
            let direction = read_direction(r)?;
            let steps = read_u32_le(r)?;
            Some(Action::Move { direction, steps })
        }
        2 => Some(Action::Turn {
            direction: read_direction(r)?,
        }),
        3 => Some(Action::NoOp),
        tag => {
            return Err(SnapshotError::Malformed {
                detail: format!("unknown action tag {tag}"),
            })
        }
    };
    let active = read_bool(r)?;
    Ok(AgentState {
        id,
        position,
        direction,
        scent,
        vision,
        collected_items,
        requested_action,
        active,
    })
}
