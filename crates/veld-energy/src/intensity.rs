//! Intensity (unary energy) functions.

use veld_core::item::EnergySpec;
use veld_core::position::Position;

use crate::error::EnergyError;
use crate::hash::hash_unit;

/// Tag of the [`Intensity::Zero`] function.
pub const TAG_ZERO: u32 = 0;
/// Tag of the [`Intensity::Constant`] function.
pub const TAG_CONSTANT: u32 = 1;
/// Tag of the [`Intensity::RadialHash`] function.
pub const TAG_RADIAL_HASH: u32 = 2;

/// A resolved intensity function: log-density contribution of placing
/// an item of one type at a position.
#[derive(Clone, Debug, PartialEq)]
pub enum Intensity {
    /// Always 0.
    Zero,
    /// A position-independent constant.
    Constant {
        /// The constant log-intensity.
        value: f32,
    },
    /// Hash-based radial noise: ring index `⌊|p|·scale + shift⌋` is
    /// hashed to `[0, 1)` and mapped to `bias + amplitude · noise`.
    ///
    /// Produces concentric bands of varying item density around the
    /// origin, deterministic in the position alone.
    RadialHash {
        /// Offset added to the scaled radius before flooring.
        shift: f32,
        /// Radius scale; larger values give thinner bands.
        scale: f32,
        /// Base log-intensity.
        bias: f32,
        /// Noise amplitude.
        amplitude: f32,
    },
}

impl Intensity {
    /// Resolve a tagged spec, validating tag and arity.
    pub fn from_spec(spec: &EnergySpec) -> Result<Self, EnergyError> {
        let arity = |expected: usize| -> Result<(), EnergyError> {
            if spec.args.len() == expected {
                Ok(())
            } else {
                Err(EnergyError::ArgumentCount {
                    kind: "intensity",
                    tag: spec.tag,
                    expected,
                    got: spec.args.len(),
                })
            }
        };
        match spec.tag {
            TAG_ZERO => {
                arity(0)?;
                Ok(Intensity::Zero)
            }
            TAG_CONSTANT => {
                arity(1)?;
                Ok(Intensity::Constant {
                    value: spec.args[0],
                })
            }
            TAG_RADIAL_HASH => {
                arity(4)?;
                Ok(Intensity::RadialHash {
                    shift: spec.args[0],
                    scale: spec.args[1],
                    bias: spec.args[2],
                    amplitude: spec.args[3],
                })
            }
            tag => Err(EnergyError::UnknownTag {
                kind: "intensity",
                tag,
            }),
        }
    }

    /// The serialization form of this function.
    pub fn to_spec(&self) -> EnergySpec {
        match self {
            Intensity::Zero => EnergySpec::new(TAG_ZERO, Vec::new()),
            Intensity::Constant { value } => EnergySpec::new(TAG_CONSTANT, vec![*value]),
            Intensity::RadialHash {
                shift,
                scale,
                bias,
                amplitude,
            } => EnergySpec::new(TAG_RADIAL_HASH, vec![*shift, *scale, *bias, *amplitude]),
        }
    }

    /// Evaluate at a world position.
    pub fn evaluate(&self, pos: Position) -> f32 {
        match self {
            Intensity::Zero => 0.0,
            Intensity::Constant { value } => *value,
            Intensity::RadialHash {
                shift,
                scale,
                bias,
                amplitude,
            } => {
                let radius = (pos.squared_length() as f64).sqrt();
                let ring = (radius * *scale as f64 + *shift as f64).floor() as i64;
                bias + amplitude * hash_unit(&[ring as u64])
            }
        }
    }

    /// Whether the function ignores absolute position.
    ///
    /// Stationary intensities are constant over the grid; the sampler
    /// may evaluate them once per item type instead of once per cell.
    pub fn is_stationary(&self) -> bool {
        matches!(self, Intensity::Zero | Intensity::Constant { .. })
    }
}
