//! Core types and configuration for the Veld simulation framework.
//!
//! This is the leaf crate with zero internal Veld dependencies. It defines
//! the fundamental abstractions used throughout the Veld workspace:
//! grid positions, directions, the item catalog, agent actions, the
//! simulator configuration, error types, and deterministic seed derivation.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod action;
pub mod config;
pub mod direction;
pub mod error;
pub mod item;
pub mod position;
pub mod rng;
pub mod status;

// Re-export core types at crate root for convenience.
pub use action::{Action, ActionError};
pub use config::{CollisionPolicy, ConfigError, SamplerKind, SimulatorConfig};
pub use direction::Direction;
pub use error::{MapError, StepError};
pub use item::{EnergySpec, Item, ItemType};
pub use position::{CellCoord, Position};
pub use status::Status;
