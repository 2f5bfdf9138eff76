//! Simulator configuration and validation.
//!
//! [`SimulatorConfig`] is the constructor input for a simulator and is
//! immutable afterward. [`validate()`](SimulatorConfig::validate)
//! checks structural invariants; energy-function tags and arities are
//! validated separately when the registry resolves them.

use std::error::Error;
use std::fmt;

use crate::item::ItemType;

/// How simultaneous moves into the same cell are resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// Any number of agents may share a cell; every mover reaches its
    /// target.
    NoCollisions,
    /// Movers are processed in ascending agent id; later movers into a
    /// claimed cell stay in place.
    FirstComeFirstServe,
    /// Movers are processed in an order shuffled with the tick-derived
    /// RNG stream; losers stay in place.
    Random,
}

/// Which sampler materializes new patches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplerKind {
    /// Metropolis–Hastings birth/death sweeps (default).
    MetropolisHastings,
    /// Systematic-scan Gibbs over interleaved cell quadrants.
    Gibbs,
}

/// Complete, immutable simulator configuration.
///
/// Field vectors are cross-validated: every item type's `scent` must be
/// `scent_dim` long, `color` must be `color_dim` long, and the
/// per-type vectors (`interactions`, `required_item_counts`,
/// `required_item_costs`) must have one entry per catalog item type.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulatorConfig {
    /// Base seed; every stochastic stream in the simulator derives
    /// from it (see [`rng`](crate::rng)).
    pub seed: u64,
    /// Patch side length in cells. Power of two recommended.
    pub patch_size: u32,
    /// Metropolis–Hastings sweeps per generation batch.
    pub mcmc_iterations: u32,
    /// Number of scent components.
    pub scent_dim: u32,
    /// Number of color components.
    pub color_dim: u32,
    /// Vision radius V; the vision window is (2V+1)² cells.
    pub vision_range: u32,
    /// Maximum `steps` accepted in a move action.
    pub max_steps_per_movement: u32,
    /// Per-direction movement policy, indexed by
    /// [`Direction::index`](crate::direction::Direction::index).
    pub allowed_movement_directions: [bool; 4],
    /// Per-direction turn policy, indexed likewise.
    pub allowed_turn_directions: [bool; 4],
    /// Whether explicit no-op actions are accepted.
    pub no_op_allowed: bool,
    /// The item catalog. Immutable after construction.
    pub item_types: Vec<ItemType>,
    /// Color agents contribute to vision (`color_dim` floats).
    pub agent_color: Vec<f32>,
    /// Collision resolution policy.
    pub collision_policy: CollisionPolicy,
    /// Sampler used for patch materialization.
    pub sampler: SamplerKind,
    /// Scent decay λ per tick, in (0, 1).
    pub scent_decay: f32,
    /// Scent diffusion δ per tick, in [0, 1).
    pub scent_diffusion: f32,
    /// Ticks a removed item keeps contributing decayed scent.
    pub removed_item_lifetime: u64,
    /// Field-of-view angle in radians; `2π` or more disables the cone
    /// filter.
    pub field_of_view: f32,
}

impl SimulatorConfig {
    /// Validate structural invariants.
    ///
    /// Called by the simulator constructor; a failed validation aborts
    /// construction. Energy-function tags are validated by the
    /// registry, not here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.patch_size == 0 {
            return Err(ConfigError::ZeroPatchSize);
        }
        if self.scent_dim == 0 || self.color_dim == 0 {
            return Err(ConfigError::ZeroPerceptionDim);
        }
        if self.max_steps_per_movement == 0 {
            return Err(ConfigError::ZeroMaxSteps);
        }
        if self.vision_range >= self.patch_size {
            // The perception gather reads at most one patch ring beyond
            // the agent's patch; a larger window would reach patches the
            // stepper never materializes.
            return Err(ConfigError::VisionRangeTooLarge {
                vision_range: self.vision_range,
                patch_size: self.patch_size,
            });
        }
        if !(self.scent_decay > 0.0 && self.scent_decay < 1.0) || !self.scent_decay.is_finite() {
            return Err(ConfigError::ScentDecayOutOfRange {
                value: self.scent_decay,
            });
        }
        if !(self.scent_diffusion >= 0.0 && self.scent_diffusion < 1.0)
            || !self.scent_diffusion.is_finite()
        {
            return Err(ConfigError::ScentDiffusionOutOfRange {
                value: self.scent_diffusion,
            });
        }
        if !self.field_of_view.is_finite() || self.field_of_view <= 0.0 {
            return Err(ConfigError::InvalidFieldOfView {
                value: self.field_of_view,
            });
        }
        if self.agent_color.len() != self.color_dim as usize {
            return Err(ConfigError::AgentColorDimMismatch {
                expected: self.color_dim as usize,
                got: self.agent_color.len(),
            });
        }

        let type_count = self.item_types.len();
        for (index, item) in self.item_types.iter().enumerate() {
            let check = |cond: bool, reason: &str| -> Result<(), ConfigError> {
                if cond {
                    Ok(())
                } else {
                    Err(ConfigError::InvalidItemType {
                        index,
                        reason: reason.to_string(),
                    })
                }
            };
            check(!item.name.is_empty(), "name is empty")?;
            check(
                item.scent.len() == self.scent_dim as usize,
                "scent length != scent_dim",
            )?;
            check(
                item.color.len() == self.color_dim as usize,
                "color length != color_dim",
            )?;
            check(
                item.required_item_counts.len() == type_count,
                "required_item_counts length != item type count",
            )?;
            check(
                item.required_item_costs.len() == type_count,
                "required_item_costs length != item type count",
            )?;
            check(
                item.interactions.len() == type_count,
                "interactions length != item type count",
            )?;
            check(
                item.visual_occlusion.is_finite()
                    && (0.0..=1.0).contains(&item.visual_occlusion),
                "visual_occlusion outside [0, 1]",
            )?;
        }
        Ok(())
    }
}

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected during [`SimulatorConfig::validate()`].
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigError {
    /// `patch_size` is zero.
    ZeroPatchSize,
    /// `scent_dim` or `color_dim` is zero.
    ZeroPerceptionDim,
    /// `max_steps_per_movement` is zero.
    ZeroMaxSteps,
    /// The vision window would reach beyond the 3×3 materialized patch
    /// block.
    VisionRangeTooLarge {
        /// The configured vision range.
        vision_range: u32,
        /// The configured patch size.
        patch_size: u32,
    },
    /// `scent_decay` is outside (0, 1).
    ScentDecayOutOfRange {
        /// The invalid value.
        value: f32,
    },
    /// `scent_diffusion` is outside [0, 1).
    ScentDiffusionOutOfRange {
        /// The invalid value.
        value: f32,
    },
    /// `field_of_view` is non-positive, NaN, or infinite.
    InvalidFieldOfView {
        /// The invalid value.
        value: f32,
    },
    /// `agent_color` length does not match `color_dim`.
    AgentColorDimMismatch {
        /// Expected length (`color_dim`).
        expected: usize,
        /// Actual length.
        got: usize,
    },
    /// An item type failed validation.
    InvalidItemType {
        /// Index of the offending item type.
        index: usize,
        /// Description of the violation.
        reason: String,
    },
    /// An energy-function spec failed registry resolution.
    InvalidEnergyFunction {
        /// Description of the violation.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroPatchSize => write!(f, "patch_size must be at least 1"),
            Self::ZeroPerceptionDim => write!(f, "scent_dim and color_dim must be at least 1"),
            Self::ZeroMaxSteps => write!(f, "max_steps_per_movement must be at least 1"),
            Self::VisionRangeTooLarge {
                vision_range,
                patch_size,
            } => write!(
                f,
                "vision_range {vision_range} must be smaller than patch_size {patch_size}"
            ),
            Self::ScentDecayOutOfRange { value } => {
                write!(f, "scent_decay must be in (0, 1), got {value}")
            }
            Self::ScentDiffusionOutOfRange { value } => {
                write!(f, "scent_diffusion must be in [0, 1), got {value}")
            }
            Self::InvalidFieldOfView { value } => {
                write!(f, "field_of_view must be finite and positive, got {value}")
            }
            Self::AgentColorDimMismatch { expected, got } => {
                write!(f, "agent_color has {got} components, expected {expected}")
            }
            Self::InvalidItemType { index, reason } => {
                write!(f, "item type {index}: {reason}")
            }
            Self::InvalidEnergyFunction { reason } => {
                write!(f, "energy function: {reason}")
            }
        }
    }
}

impl Error for ConfigError {}
