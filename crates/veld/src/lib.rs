//! Veld: an infinite-grid world simulator for situated learning agents.
//!
//! This is the top-level facade crate that re-exports the public API
//! from all Veld sub-crates. For most users, adding `veld` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use veld::prelude::*;
//!
//! // A one-item world: sparse berries with unit scent.
//! let config = SimulatorConfig {
//!     seed: 42,
//!     patch_size: 32,
//!     mcmc_iterations: 140,
//!     scent_dim: 1,
//!     color_dim: 1,
//!     vision_range: 5,
//!     max_steps_per_movement: 1,
//!     allowed_movement_directions: [true; 4],
//!     allowed_turn_directions: [true; 4],
//!     no_op_allowed: true,
//!     item_types: vec![ItemType {
//!         name: "berry".into(),
//!         scent: vec![1.0],
//!         color: vec![1.0],
//!         required_item_counts: vec![0],
//!         required_item_costs: vec![0],
//!         blocks_movement: false,
//!         visual_occlusion: 0.0,
//!         intensity: EnergySpec::new(1, vec![-5.0]),
//!         interactions: vec![EnergySpec::zero()],
//!         regeneration: EnergySpec::zero(),
//!         lifetime: 0,
//!     }],
//!     agent_color: vec![0.5],
//!     collision_policy: CollisionPolicy::FirstComeFirstServe,
//!     sampler: SamplerKind::MetropolisHastings,
//!     scent_decay: 0.4,
//!     scent_diffusion: 0.14,
//!     removed_item_lifetime: 24,
//!     field_of_view: std::f32::consts::TAU,
//! };
//!
//! let sim = Simulator::new(config).unwrap();
//! let agent = sim.add_agent().unwrap();
//! sim.move_agent(agent.id, Direction::Up, 1).unwrap();
//! assert_eq!(sim.current_tick(), 1);
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in
//! the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `veld-core` | Positions, directions, items, actions, configuration |
//! | [`energy`] | `veld-energy` | Tagged energy functions and sampler caches |
//! | [`field`] | `veld-field` | Patch store, field sampler, scent diffusion |
//! | [`sim`] | `veld-sim` | Simulator, stepper, coordinator, RPC surface |
//! | [`snapshot`] | `veld-snapshot` | Byte-stable state snapshots |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types and configuration (`veld-core`).
///
/// Positions and patch/cell decomposition, directions, the item
/// catalog, actions, the RPC status enum, and seed derivation.
pub use veld_core as types;

/// Tagged energy functions and sampler caches (`veld-energy`).
///
/// Intensity, interaction, and regeneration functions resolved from
/// tag + argument specs, plus the stationary interaction table.
pub use veld_energy as energy;

/// Patch store, field sampler, and scent diffusion (`veld-field`).
///
/// [`field::PatchMap`] owns the lazily materialized world;
/// [`field::sampler`] runs the MCMC generation; [`field::scent`]
/// advances the decay+diffusion field.
pub use veld_field as field;

/// Simulator orchestration (`veld-sim`).
///
/// [`sim::Simulator`] is the primary API; [`sim::Server`] wraps it in
/// the multi-client RPC contract.
pub use veld_sim as sim;

/// Byte-stable snapshots (`veld-snapshot`).
///
/// Save with [`snapshot::save`], restore with [`snapshot::load`];
/// identical states produce identical bytes.
pub use veld_snapshot as snapshot;

/// Common imports for typical Veld usage.
///
/// ```rust
/// use veld::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use veld_core::{
        Action, CellCoord, CollisionPolicy, Direction, EnergySpec, Item, ItemType, Position,
        SamplerKind, SimulatorConfig, Status,
    };

    // Errors
    pub use veld_core::{ActionError, ConfigError, MapError, StepError};

    // Energy functions
    pub use veld_energy::{EnergyTables, Intensity, Interaction, Regeneration};

    // Field
    pub use veld_field::{Patch, PatchMap};

    // Simulator and server
    pub use veld_sim::{
        AgentState, Permissions, Request, Response, Server, ServerEvent, Simulator, StepMetrics,
        StepOutcome,
    };

    // Snapshots
    pub use veld_snapshot::{load, save, SnapshotError};
}
