//! End-to-end tick scenarios against the public API.

use veld_core::config::{CollisionPolicy, SamplerKind, SimulatorConfig};
use veld_core::direction::Direction;
use veld_core::item::{EnergySpec, ItemType};
use veld_core::position::Position;
use veld_sim::Simulator;

/// The reference scenario configuration: patch_size 4, one item type
/// "A" with intensity CONSTANT(-2) and zero interaction.
fn scenario_config(seed: u64) -> SimulatorConfig {
    SimulatorConfig {
        seed,
        patch_size: 4,
        mcmc_iterations: 100,
        scent_dim: 1,
        color_dim: 1,
        vision_range: 1,
        max_steps_per_movement: 4,
        allowed_movement_directions: [true; 4],
        allowed_turn_directions: [true; 4],
        no_op_allowed: true,
        item_types: vec![ItemType {
            name: "A".into(),
            scent: vec![1.0],
            color: vec![1.0],
            required_item_counts: vec![0],
            required_item_costs: vec![0],
            blocks_movement: false,
            visual_occlusion: 0.0,
            intensity: EnergySpec::new(1, vec![-2.0]),
            interactions: vec![EnergySpec::zero()],
            regeneration: EnergySpec::zero(),
            lifetime: 0,
        }],
        agent_color: vec![0.5],
        collision_policy: CollisionPolicy::FirstComeFirstServe,
        sampler: SamplerKind::MetropolisHastings,
        scent_decay: 0.5,
        scent_diffusion: 0.1,
        removed_item_lifetime: 8,
        field_of_view: std::f32::consts::TAU,
    }
}

fn position_of(sim: &Simulator, id: u64) -> Position {
    sim.agent_states(&[id])[0].as_ref().unwrap().position
}

#[test]
fn origin_patch_item_count_stays_moderate() {
    // After 100 MH sweeps with intensity -2 on a 4×4 patch, the
    // equilibrium count is ~Poisson(16·e⁻²); more than 10 items in the
    // origin patch would be a gross outlier. Checked across seeds.
    for seed in 0..40u64 {
        let sim = Simulator::new(scenario_config(seed)).unwrap();
        sim.add_agent().unwrap();
        let states = sim.get_map(Position::new(0, 0), Position::new(3, 3), false, false);
        assert_eq!(states.len(), 1);
        assert!(
            states[0].items.len() <= 10,
            "seed {seed}: {} items in origin patch",
            states[0].items.len()
        );
    }
}

#[test]
fn parallel_movers_advance_together() {
    let sim = Simulator::new(scenario_config(1)).unwrap();
    let a = sim.add_agent().unwrap();
    let b = sim.add_agent().unwrap();

    // Walk b east so the pair starts at (0,0) and (1,0).
    sim.no_op(a.id).unwrap();
    sim.move_agent(b.id, Direction::Right, 1).unwrap();
    assert_eq!(position_of(&sim, a.id), Position::new(0, 0));
    assert_eq!(position_of(&sim, b.id), Position::new(1, 0));

    // Both move up one step in the same tick.
    sim.move_agent(a.id, Direction::Up, 1).unwrap();
    sim.move_agent(b.id, Direction::Up, 1).unwrap();
    assert_eq!(position_of(&sim, a.id), Position::new(0, 1));
    assert_eq!(position_of(&sim, b.id), Position::new(1, 1));
}

#[test]
fn fcfs_gives_the_contested_cell_to_the_lower_id() {
    // Build agents with ids 3 and 7; everyone else is removed.
    let sim = Simulator::new(scenario_config(2)).unwrap();
    let ids: Vec<u64> = (0..7).map(|_| sim.add_agent().unwrap().id).collect();
    for &id in &ids {
        if id != 3 && id != 7 {
            sim.remove_agent(id).unwrap();
        }
    }
    assert_eq!(sim.agent_ids(), vec![3, 7]);

    // March id 3 to (2, 1) and id 7 to (1, 2).
    sim.move_agent(3, Direction::Right, 2).unwrap();
    sim.move_agent(7, Direction::Right, 1).unwrap();
    sim.move_agent(3, Direction::Up, 1).unwrap();
    sim.move_agent(7, Direction::Up, 2).unwrap();
    assert_eq!(position_of(&sim, 3), Position::new(2, 1));
    assert_eq!(position_of(&sim, 7), Position::new(1, 2));

    // Both request (2, 2): 3 moves up, 7 moves relative-right.
    sim.move_agent(3, Direction::Up, 1).unwrap();
    sim.move_agent(7, Direction::Right, 1).unwrap();

    assert_eq!(position_of(&sim, 3), Position::new(2, 2), "lower id wins");
    assert_eq!(position_of(&sim, 7), Position::new(1, 2), "loser stays put");
    assert_eq!(sim.current_tick(), 3, "the losing mover still consumed the tick");
}

#[test]
fn no_collisions_policy_lets_agents_share() {
    let mut config = scenario_config(2);
    config.collision_policy = CollisionPolicy::NoCollisions;
    let sim = Simulator::new(config).unwrap();
    let a = sim.add_agent().unwrap();
    let b = sim.add_agent().unwrap();

    // Both spawn at the origin and both step up: they share (0, 1).
    sim.move_agent(a.id, Direction::Up, 1).unwrap();
    sim.move_agent(b.id, Direction::Up, 1).unwrap();
    assert_eq!(position_of(&sim, a.id), Position::new(0, 1));
    assert_eq!(position_of(&sim, b.id), Position::new(0, 1));
}

#[test]
fn semaphore_gates_the_tick() {
    let sim = Simulator::new(scenario_config(3)).unwrap();
    let agent = sim.add_agent().unwrap();
    let sem = sim.add_semaphore();

    sim.move_agent(agent.id, Direction::Up, 1).unwrap();
    assert_eq!(sim.current_tick(), 0, "tick must stall on the semaphore");

    sim.signal_semaphore(sem).unwrap();
    assert_eq!(sim.current_tick(), 1);
    assert_eq!(position_of(&sim, agent.id), Position::new(0, 1));
}

#[test]
fn semaphore_signal_order_is_commutative() {
    let run = |signal_first: bool| {
        let sim = Simulator::new(scenario_config(4)).unwrap();
        let agent = sim.add_agent().unwrap();
        let sem = sim.add_semaphore();
        if signal_first {
            sim.signal_semaphore(sem).unwrap();
            sim.move_agent(agent.id, Direction::Up, 1).unwrap();
        } else {
            sim.move_agent(agent.id, Direction::Up, 1).unwrap();
            sim.signal_semaphore(sem).unwrap();
        }
        assert_eq!(sim.current_tick(), 1);
        sim.to_state()
    };
    assert_eq!(run(true), run(false));
}

#[test]
fn one_action_per_agent_per_tick() {
    let sim = Simulator::new(scenario_config(5)).unwrap();
    let agent = sim.add_agent().unwrap();
    let gate = sim.add_semaphore();

    sim.move_agent(agent.id, Direction::Up, 1).unwrap();
    let second = sim.move_agent(agent.id, Direction::Down, 1);
    assert!(second.is_err(), "second action in one tick must fail");
    let third = sim.no_op(agent.id);
    assert!(third.is_err());

    // Only the first action applies once the gate opens.
    sim.signal_semaphore(gate).unwrap();
    assert_eq!(position_of(&sim, agent.id), Position::new(0, 1));
}

#[test]
fn identical_runs_produce_identical_state() {
    let run = || {
        let sim = Simulator::new(scenario_config(6)).unwrap();
        let a = sim.add_agent().unwrap();
        let b = sim.add_agent().unwrap();
        for step in 0..50u32 {
            match step % 4 {
                0 => {
                    sim.move_agent(a.id, Direction::Up, 1).unwrap();
                    sim.move_agent(b.id, Direction::Right, 1).unwrap();
                }
                1 => {
                    sim.turn_agent(a.id, Direction::Left).unwrap();
                    sim.move_agent(b.id, Direction::Up, 2).unwrap();
                }
                2 => {
                    sim.move_agent(a.id, Direction::Up, 1).unwrap();
                    sim.no_op(b.id).unwrap();
                }
                _ => {
                    sim.no_op(a.id).unwrap();
                    sim.move_agent(b.id, Direction::Down, 1).unwrap();
                }
            }
        }
        assert_eq!(sim.current_tick(), 50);
        sim.to_state()
    };
    assert_eq!(run(), run());
}

#[test]
fn inactive_agents_do_not_stall_the_tick() {
    let sim = Simulator::new(scenario_config(7)).unwrap();
    let a = sim.add_agent().unwrap();
    let b = sim.add_agent().unwrap();

    sim.set_active(b.id, false).unwrap();
    assert_eq!(sim.is_active(b.id), Ok(false));

    // Only a owes an action now.
    sim.move_agent(a.id, Direction::Up, 1).unwrap();
    assert_eq!(sim.current_tick(), 1);

    // Inactive agents cannot act.
    assert!(sim.move_agent(b.id, Direction::Up, 1).is_err());

    // Reactivation restores the obligation.
    sim.set_active(b.id, true).unwrap();
    sim.move_agent(a.id, Direction::Up, 1).unwrap();
    assert_eq!(sim.current_tick(), 1, "b owes an action again");
    sim.no_op(b.id).unwrap();
    assert_eq!(sim.current_tick(), 2);
}

#[test]
fn deactivating_the_laggard_releases_the_tick() {
    let sim = Simulator::new(scenario_config(8)).unwrap();
    let a = sim.add_agent().unwrap();
    let b = sim.add_agent().unwrap();

    sim.move_agent(a.id, Direction::Up, 1).unwrap();
    assert_eq!(sim.current_tick(), 0);
    sim.set_active(b.id, false).unwrap();
    assert_eq!(sim.current_tick(), 1, "dropping b's obligation runs the tick");
}

#[test]
fn movement_policy_is_enforced() {
    let mut config = scenario_config(9);
    config.allowed_movement_directions = [true, false, false, false]; // forward only
    config.max_steps_per_movement = 2;
    let sim = Simulator::new(config).unwrap();
    let agent = sim.add_agent().unwrap();

    assert!(sim.move_agent(agent.id, Direction::Left, 1).is_err());
    assert!(sim.move_agent(agent.id, Direction::Up, 3).is_err());
    assert!(sim.move_agent(agent.id, Direction::Up, 0).is_err());
    assert_eq!(sim.current_tick(), 0, "rejected actions consume nothing");
    sim.move_agent(agent.id, Direction::Up, 2).unwrap();
    assert_eq!(position_of(&sim, agent.id), Position::new(0, 2));
}

#[test]
fn step_channel_reports_each_tick() {
    let sim = Simulator::new(scenario_config(10)).unwrap();
    let events = sim.step_channel();
    let agent = sim.add_agent().unwrap();

    sim.move_agent(agent.id, Direction::Up, 1).unwrap();
    sim.no_op(agent.id).unwrap();

    let first = events.try_recv().unwrap().unwrap();
    assert_eq!(first.tick, 1);
    assert_eq!(first.agents[0].position, Position::new(0, 1));
    let second = events.try_recv().unwrap().unwrap();
    assert_eq!(second.tick, 2);
    assert!(events.try_recv().is_err(), "no further events");
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn arbitrary_action_sequences_are_deterministic(
            actions in proptest::collection::vec(0u8..6, 1..25),
            seed in 0u64..1000,
        ) {
            let run = || {
                let sim = Simulator::new(scenario_config(seed)).unwrap();
                let agent = sim.add_agent().unwrap();
                for &op in &actions {
                    match op {
                        0 => sim.move_agent(agent.id, Direction::Up, 1).unwrap(),
                        1 => sim.move_agent(agent.id, Direction::Down, 1).unwrap(),
                        2 => sim.move_agent(agent.id, Direction::Left, 2).unwrap(),
                        3 => sim.move_agent(agent.id, Direction::Right, 1).unwrap(),
                        4 => sim.turn_agent(agent.id, Direction::Left).unwrap(),
                        _ => sim.no_op(agent.id).unwrap(),
                    }
                }
                sim.to_state()
            };
            prop_assert_eq!(run(), run());
        }
    }
}

#[test]
fn scent_accumulates_near_items_over_time() {
    // With items emitting unit scent, some scent must be visible to
    // get_map after a few ticks in any seed that placed items near the
    // agent's patch neighborhood.
    let sim = Simulator::new(scenario_config(11)).unwrap();
    let agent = sim.add_agent().unwrap();
    for _ in 0..5 {
        sim.no_op(agent.id).unwrap();
    }
    let states = sim.get_map(Position::new(-8, -8), Position::new(11, 11), true, false);
    let items: usize = states.iter().map(|s| s.items.len()).sum();
    let total_scent: f32 = states
        .iter()
        .filter_map(|s| s.scent.as_ref())
        .flat_map(|grid| grid.iter())
        .sum();
    if items > 0 {
        assert!(
            total_scent > 0.0,
            "{items} items but no scent after 5 ticks"
        );
    }
    for value in states.iter().filter_map(|s| s.scent.as_ref()).flatten() {
        assert!(*value >= 0.0, "negative scent {value}");
    }
}
