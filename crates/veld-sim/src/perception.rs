//! Perception: scent reads and ray-occluded, rotated vision.
//!
//! Vision gathers the `(2V+1)²` window around the agent from the 3×3
//! patch block the stepper keeps materialized. Each target cell's
//! color is attenuated by the transmittance of the line of sight — the
//! product of `1 − visual_occlusion` over every occupied interior cell
//! of the ray — and zeroed outside the field-of-view cone. The window
//! is returned in the agent frame: facing becomes +y, rotated in 90°
//! increments.

use veld_core::config::SimulatorConfig;
use veld_core::direction::Direction;
use veld_core::position::Position;
use veld_field::map::PatchMap;

/// Scent components at `position`, read from its (caught-up) patch.
///
/// Missing patches read as zero scent; the stepper materializes every
/// patch an agent can stand in, so that only happens for callers
/// probing unexplored space.
pub fn compute_scent(config: &SimulatorConfig, map: &PatchMap, position: Position) -> Vec<f32> {
    let (patch_coord, cell) = position.decompose(config.patch_size);
    match map.get(patch_coord) {
        Some(handle) => match handle.lock() {
            Ok(patch) => patch
                .cell_scent(cell, config.patch_size, config.scent_dim)
                .to_vec(),
            Err(_) => vec![0.0; config.scent_dim as usize],
        },
        None => vec![0.0; config.scent_dim as usize],
    }
}

/// The vision window for an agent at `position` facing `direction`.
///
/// `agent_positions` lists every agent in the world (including the
/// observer); agents contribute the configured `agent_color` to their
/// cell but never occlude.
pub fn compute_vision(
    config: &SimulatorConfig,
    map: &PatchMap,
    agent_positions: &[(u64, Position)],
    position: Position,
    direction: Direction,
) -> Vec<f32> {
    let v = config.vision_range as i64;
    let side = (2 * v + 1) as usize;
    let dim = config.color_dim as usize;

    // Window-local rasters: per-cell color sum and occlusion.
    let mut cell_color = vec![0.0f32; side * side * dim];
    let mut occlusion = vec![0.0f32; side * side];

    let window_index = |dx: i64, dy: i64| -> usize {
        ((dy + v) as usize) * side + (dx + v) as usize
    };

    // Items from the 3×3 patch block around the agent, in ascending
    // patch order.
    let center_patch = position.patch_of(config.patch_size);
    for py in -1i64..=1 {
        for px in -1i64..=1 {
            let coord = Position::new(center_patch.x + px, center_patch.y + py);
            let Some(handle) = map.get(coord) else {
                continue;
            };
            let Ok(patch) = handle.lock() else { continue };
            for item in &patch.items {
                if !item.is_alive() {
                    continue;
                }
                let d = item.position - position;
                if d.x.abs() > v || d.y.abs() > v {
                    continue;
                }
                let index = window_index(d.x, d.y);
                let item_type = &config.item_types[item.item_type as usize];
                for (s, &c) in item_type.color.iter().enumerate() {
                    cell_color[index * dim + s] += c;
                }
                occlusion[index] = item_type.visual_occlusion;
            }
        }
    }

    // Agents paint their color but are transparent to rays.
    for &(_, agent_pos) in agent_positions {
        let d = agent_pos - position;
        if d.x.abs() > v || d.y.abs() > v {
            continue;
        }
        let index = window_index(d.x, d.y);
        for (s, &c) in config.agent_color.iter().enumerate() {
            cell_color[index * dim + s] += c;
        }
    }

    let facing = direction.offset();
    let half_fov = config.field_of_view / 2.0;
    let fov_filters = config.field_of_view < std::f32::consts::TAU;

    let mut vision = vec![0.0f32; side * side * dim];
    for dy in -v..=v {
        for dx in -v..=v {
            if fov_filters && (dx != 0 || dy != 0) {
                let dot = (facing.x * dx + facing.y * dy) as f64;
                let len = ((dx * dx + dy * dy) as f64).sqrt();
                let angle = (dot / len).clamp(-1.0, 1.0).acos();
                if angle > half_fov as f64 {
                    continue;
                }
            }

            let transmittance = ray_transmittance(&occlusion, side, v, dx, dy);
            if transmittance == 0.0 {
                continue;
            }

            let source = window_index(dx, dy);
            let (fx, fy) = direction.to_agent_frame((dx, dy));
            let target = (((fy + v) as usize) * side + (fx + v) as usize) * dim;
            for s in 0..dim {
                vision[target + s] = transmittance * cell_color[source * dim + s];
            }
        }
    }
    vision
}

/// Transmittance along the line of sight from the window center to
/// `(dx, dy)`, excluding both endpoints.
///
/// The ray is sampled at `max(|dx|, |dy|)` evenly spaced points; each
/// occupied interior cell multiplies the transmittance by
/// `1 − occlusion`. The observer's own cell and the target itself do
/// not attenuate — an occluder is always visible, only what lies
/// behind it is dimmed.
fn ray_transmittance(occlusion: &[f32], side: usize, v: i64, dx: i64, dy: i64) -> f32 {
    let steps = dx.abs().max(dy.abs());
    let mut transmittance = 1.0f32;
    for i in 1..steps {
        let t = i as f64 / steps as f64;
        let cx = (dx as f64 * t).round() as i64;
        let cy = (dy as f64 * t).round() as i64;
        if cx == 0 && cy == 0 {
            continue;
        }
        let index = ((cy + v) as usize) * side + (cx + v) as usize;
        transmittance *= 1.0 - occlusion[index];
        if transmittance == 0.0 {
            break;
        }
    }
    transmittance
}

#[cfg(test)]
mod tests {
    use super::*;
    use veld_core::config::{CollisionPolicy, SamplerKind};
    use veld_core::item::{EnergySpec, Item, ItemType};
    use veld_field::patch::Patch;

    fn test_config(vision_range: u32, occlusion: f32) -> SimulatorConfig {
        SimulatorConfig {
            seed: 1,
            patch_size: 8,
            mcmc_iterations: 1,
            scent_dim: 1,
            color_dim: 1,
            vision_range,
            max_steps_per_movement: 1,
            allowed_movement_directions: [true; 4],
            allowed_turn_directions: [true; 4],
            no_op_allowed: true,
            item_types: vec![ItemType {
                name: "wall".into(),
                scent: vec![0.0],
                color: vec![1.0],
                required_item_counts: vec![0],
                required_item_costs: vec![0],
                blocks_movement: false,
                visual_occlusion: occlusion,
                intensity: EnergySpec::zero(),
                interactions: vec![EnergySpec::zero()],
                regeneration: EnergySpec::zero(),
                lifetime: 0,
            }],
            agent_color: vec![0.25],
            collision_policy: CollisionPolicy::FirstComeFirstServe,
            sampler: SamplerKind::MetropolisHastings,
            scent_decay: 0.5,
            scent_diffusion: 0.1,
            removed_item_lifetime: 4,
            field_of_view: std::f32::consts::TAU,
        }
    }

    fn map_with_items(config: &SimulatorConfig, items: &[Item]) -> PatchMap {
        let map = PatchMap::new(config.patch_size);
        for py in -1i64..=1 {
            for px in -1i64..=1 {
                map.insert(Patch::new(
                    Position::new(px, py),
                    config.patch_size,
                    config.scent_dim,
                    0,
                ));
            }
        }
        for item in items {
            let coord = item.position.patch_of(config.patch_size);
            let handle = map.get(coord).unwrap();
            handle.lock().unwrap().items.push(*item);
        }
        map
    }

    fn window_value(vision: &[f32], v: i64, fx: i64, fy: i64) -> f32 {
        let side = (2 * v + 1) as usize;
        vision[((fy + v) as usize) * side + (fx + v) as usize]
    }

    #[test]
    fn item_appears_at_its_offset_facing_up() {
        let config = test_config(2, 0.0);
        let map = map_with_items(&config, &[Item::new(0, Position::new(1, 2), 0)]);
        let vision = compute_vision(&config, &map, &[], Position::ORIGIN, Direction::Up);
        assert_eq!(window_value(&vision, 2, 1, 2), 1.0);
    }

    #[test]
    fn vision_rotates_with_facing() {
        // Facing right, the cell one step east is straight ahead (+y).
        let config = test_config(1, 0.0);
        let map = map_with_items(&config, &[Item::new(0, Position::new(1, 0), 0)]);
        let vision = compute_vision(&config, &map, &[], Position::ORIGIN, Direction::Right);
        assert_eq!(window_value(&vision, 1, 0, 1), 1.0);
        assert_eq!(window_value(&vision, 1, 1, 0), 0.0);
    }

    #[test]
    fn occluder_dims_what_lies_behind() {
        let config = test_config(2, 0.5);
        let map = map_with_items(
            &config,
            &[
                Item::new(0, Position::new(0, 1), 0),
                Item::new(0, Position::new(0, 2), 0),
            ],
        );
        let vision = compute_vision(&config, &map, &[], Position::ORIGIN, Direction::Up);
        // The near occluder is fully visible; the far cell is seen
        // through 1 - 0.5 transmittance.
        assert_eq!(window_value(&vision, 2, 0, 1), 1.0);
        assert_eq!(window_value(&vision, 2, 0, 2), 0.5);
    }

    #[test]
    fn full_occlusion_blackens_the_far_cell() {
        let config = test_config(2, 1.0);
        let map = map_with_items(
            &config,
            &[
                Item::new(0, Position::new(0, 1), 0),
                Item::new(0, Position::new(0, 2), 0),
            ],
        );
        let vision = compute_vision(&config, &map, &[], Position::ORIGIN, Direction::Up);
        assert_eq!(window_value(&vision, 2, 0, 1), 1.0);
        assert_eq!(window_value(&vision, 2, 0, 2), 0.0);
    }

    #[test]
    fn field_of_view_zeroes_cells_behind() {
        let mut config = test_config(1, 0.0);
        config.field_of_view = std::f32::consts::FRAC_PI_2; // 90° cone
        let map = map_with_items(
            &config,
            &[
                Item::new(0, Position::new(0, 1), 0),
                Item::new(0, Position::new(0, -1), 0),
                Item::new(0, Position::new(1, 0), 0),
            ],
        );
        let vision = compute_vision(&config, &map, &[], Position::ORIGIN, Direction::Up);
        assert_eq!(window_value(&vision, 1, 0, 1), 1.0, "ahead is visible");
        assert_eq!(window_value(&vision, 1, 0, -1), 0.0, "behind is dark");
        assert_eq!(window_value(&vision, 1, 1, 0), 0.0, "flank beyond 45° is dark");
    }

    #[test]
    fn agents_paint_their_color() {
        let config = test_config(1, 0.0);
        let map = map_with_items(&config, &[]);
        let vision = compute_vision(
            &config,
            &map,
            &[(1, Position::ORIGIN), (2, Position::new(0, 1))],
            Position::ORIGIN,
            Direction::Up,
        );
        // The observer sees itself at the center and the neighbor ahead.
        assert_eq!(window_value(&vision, 1, 0, 0), 0.25);
        assert_eq!(window_value(&vision, 1, 0, 1), 0.25);
    }

    #[test]
    fn ghosts_are_invisible() {
        let config = test_config(1, 0.0);
        let mut ghost = Item::new(0, Position::new(0, 1), 0);
        ghost.deletion_tick = 1;
        let map = map_with_items(&config, &[ghost]);
        let vision = compute_vision(&config, &map, &[], Position::ORIGIN, Direction::Up);
        assert_eq!(window_value(&vision, 1, 0, 1), 0.0);
    }

    #[test]
    fn scent_reads_the_agent_cell() {
        let config = test_config(1, 0.0);
        let map = map_with_items(&config, &[]);
        let handle = map.get(Position::ORIGIN).unwrap();
        {
            let mut patch = handle.lock().unwrap();
            let index = Patch::scent_index((3, 4), config.patch_size, config.scent_dim);
            patch.scent[index] = 2.5;
        }
        let scent = compute_scent(&config, &map, Position::new(3, 4));
        assert_eq!(scent, vec![2.5]);
        assert_eq!(
            compute_scent(&config, &map, Position::new(100, 100)),
            vec![0.0],
            "unexplored space smells of nothing"
        );
    }
}
