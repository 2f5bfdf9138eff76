//! Regeneration functions.
//!
//! A regeneration function scales the birth intensity of one item type
//! during the stepper's regeneration pass. Values are multiplicative:
//! 1 leaves the base intensity unchanged, 0 (or anything non-positive)
//! disables regeneration for that tick.

use veld_core::item::EnergySpec;
use veld_core::position::Position;

use crate::error::EnergyError;

/// Tag of the [`Regeneration::Zero`] function.
pub const TAG_ZERO: u32 = 0;
/// Tag of the [`Regeneration::Constant`] function.
pub const TAG_CONSTANT: u32 = 1;
/// Tag of the [`Regeneration::Custom`] function.
pub const TAG_CUSTOM: u32 = 2;

/// A resolved regeneration function.
#[derive(Clone, Debug, PartialEq)]
pub enum Regeneration {
    /// Always 0: the type never regenerates.
    Zero,
    /// A tick-independent constant rate.
    Constant {
        /// The constant rate.
        value: f32,
    },
    /// A tick-indexed schedule. Ticks beyond the table return 0;
    /// the table must be non-empty.
    Custom {
        /// Per-tick rates, indexed by tick.
        values: Vec<f32>,
    },
}

impl Regeneration {
    /// Resolve a tagged spec, validating tag and arity.
    pub fn from_spec(spec: &EnergySpec) -> Result<Self, EnergyError> {
        match spec.tag {
            TAG_ZERO => {
                if !spec.args.is_empty() {
                    return Err(EnergyError::ArgumentCount {
                        kind: "regeneration",
                        tag: spec.tag,
                        expected: 0,
                        got: spec.args.len(),
                    });
                }
                Ok(Regeneration::Zero)
            }
            TAG_CONSTANT => {
                if spec.args.len() != 1 {
                    return Err(EnergyError::ArgumentCount {
                        kind: "regeneration",
                        tag: spec.tag,
                        expected: 1,
                        got: spec.args.len(),
                    });
                }
                Ok(Regeneration::Constant {
                    value: spec.args[0],
                })
            }
            TAG_CUSTOM => {
                if spec.args.is_empty() {
                    return Err(EnergyError::InvalidArgument {
                        kind: "regeneration",
                        reason: "custom schedule must be non-empty".into(),
                    });
                }
                Ok(Regeneration::Custom {
                    values: spec.args.clone(),
                })
            }
            tag => Err(EnergyError::UnknownTag {
                kind: "regeneration",
                tag,
            }),
        }
    }

    /// The serialization form of this function.
    pub fn to_spec(&self) -> EnergySpec {
        match self {
            Regeneration::Zero => EnergySpec::new(TAG_ZERO, Vec::new()),
            Regeneration::Constant { value } => EnergySpec::new(TAG_CONSTANT, vec![*value]),
            Regeneration::Custom { values } => EnergySpec::new(TAG_CUSTOM, values.clone()),
        }
    }

    /// Evaluate at a position and tick.
    ///
    /// The built-in functions ignore `pos`; it is part of the signature
    /// so user-extended registries can vary regeneration spatially.
    pub fn evaluate(&self, _pos: Position, tick: u64) -> f32 {
        match self {
            Regeneration::Zero => 0.0,
            Regeneration::Constant { value } => *value,
            Regeneration::Custom { values } => {
                // Ticks outside the schedule regenerate nothing.
                usize::try_from(tick)
                    .ok()
                    .and_then(|t| values.get(t))
                    .copied()
                    .unwrap_or(0.0)
            }
        }
    }

    /// Whether the function ignores the tick.
    pub fn is_time_independent(&self) -> bool {
        matches!(self, Regeneration::Zero | Regeneration::Constant { .. })
    }

    /// Whether this function can ever produce a positive rate.
    pub fn is_zero(&self) -> bool {
        matches!(self, Regeneration::Zero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_is_bounds_checked() {
        let f = Regeneration::from_spec(&EnergySpec::new(TAG_CUSTOM, vec![0.5, 1.0])).unwrap();
        assert_eq!(f.evaluate(Position::ORIGIN, 0), 0.5);
        assert_eq!(f.evaluate(Position::ORIGIN, 1), 1.0);
        assert_eq!(f.evaluate(Position::ORIGIN, 2), 0.0);
        assert_eq!(f.evaluate(Position::ORIGIN, u64::MAX), 0.0);
        assert!(!f.is_time_independent());
    }

    #[test]
    fn empty_custom_schedule_rejected() {
        let err = Regeneration::from_spec(&EnergySpec::new(TAG_CUSTOM, vec![])).unwrap_err();
        assert!(matches!(err, EnergyError::InvalidArgument { .. }));
    }

    #[test]
    fn constant_ignores_tick() {
        let f = Regeneration::Constant { value: 0.7 };
        assert_eq!(f.evaluate(Position::ORIGIN, 0), 0.7);
        assert_eq!(f.evaluate(Position::new(5, 5), 1000), 0.7);
        assert!(f.is_time_independent());
        assert!(!f.is_zero());
    }

    #[test]
    fn spec_round_trips() {
        for f in [
            Regeneration::Zero,
            Regeneration::Constant { value: 2.0 },
            Regeneration::Custom {
                values: vec![1.0, 0.0, 3.0],
            },
        ] {
            assert_eq!(Regeneration::from_spec(&f.to_spec()).unwrap(), f);
        }
    }
}
