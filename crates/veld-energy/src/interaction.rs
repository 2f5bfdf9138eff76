//! Pairwise interaction functions.
//!
//! An interaction couples two item placements: positive values attract,
//! negative values repel. Interactions must vanish beyond a displacement
//! of `2 · patch_size` on either axis — the patch store's quadrant
//! neighborhoods only reach that far, and the stationary table in
//! [`cache`](crate::cache) is sized to it.

use veld_core::item::EnergySpec;
use veld_core::position::Position;

use crate::error::EnergyError;
use crate::hash::hash_unit;
use crate::EXCLUSION_ENERGY;

/// Tag of the [`Interaction::Zero`] function.
pub const TAG_ZERO: u32 = 0;
/// Tag of the [`Interaction::PiecewiseBox`] function.
pub const TAG_PIECEWISE_BOX: u32 = 1;
/// Tag of the [`Interaction::Cross`] function.
pub const TAG_CROSS: u32 = 2;
/// Tag of the [`Interaction::CrossHash`] function.
pub const TAG_CROSS_HASH: u32 = 3;
/// Tag of the [`Interaction::Moore`] function.
pub const TAG_MOORE: u32 = 4;
/// Tag of the [`Interaction::Four`] function.
pub const TAG_FOUR: u32 = 5;
/// Tag of the [`Interaction::Gaussian`] function.
pub const TAG_GAUSSIAN: u32 = 6;

/// A resolved pairwise interaction function.
#[derive(Clone, Debug, PartialEq)]
pub enum Interaction {
    /// Always 0.
    Zero,
    /// Two concentric distance bands: `v1` within radius `r1`, `v2`
    /// within radius `r2`, zero beyond.
    PiecewiseBox {
        /// Inner band radius.
        r1: f32,
        /// Outer band radius; must be ≥ `r1`.
        r2: f32,
        /// Value inside the inner band.
        v1: f32,
        /// Value between the bands.
        v2: f32,
    },
    /// Axis-sensitive bands: displacements exactly on a grid axis use
    /// the `v_axis` values, off-axis displacements the `v_off` values.
    ///
    /// Encourages (or penalizes) items lining up in rows and columns.
    Cross {
        /// Inner band radius.
        r1: f32,
        /// Outer band radius; must be ≥ `r1`.
        r2: f32,
        /// On-axis value inside the inner band.
        v_axis1: f32,
        /// On-axis value between the bands.
        v_axis2: f32,
        /// Off-axis value inside the inner band.
        v_off1: f32,
        /// Off-axis value between the bands.
        v_off2: f32,
    },
    /// [`Interaction::Cross`] modulated by a hash of the displacement,
    /// breaking the field's translation symmetry into patchy texture.
    CrossHash {
        /// Inner band radius.
        r1: f32,
        /// Outer band radius; must be ≥ `r1`.
        r2: f32,
        /// On-axis value inside the inner band.
        v_axis1: f32,
        /// On-axis value between the bands.
        v_axis2: f32,
        /// Off-axis value inside the inner band.
        v_off1: f32,
        /// Off-axis value between the bands.
        v_off2: f32,
    },
    /// Hard exclusion of the 8-cell Moore neighborhood: placements at
    /// Chebyshev distance 1 get [`EXCLUSION_ENERGY`].
    Moore,
    /// Hard exclusion of the 4-cell von Neumann neighborhood:
    /// placements at Manhattan distance 1 get [`EXCLUSION_ENERGY`].
    Four,
    /// Smooth attraction/repulsion `a · exp(−d² / 2σ²)`.
    Gaussian {
        /// Standard deviation σ; must be positive.
        sigma: f32,
        /// Peak amplitude `a` (negative repels).
        amplitude: f32,
    },
}

impl Interaction {
    /// Resolve a tagged spec, validating tag, arity, and argument
    /// ranges.
    pub fn from_spec(spec: &EnergySpec) -> Result<Self, EnergyError> {
        let arity = |expected: usize| -> Result<(), EnergyError> {
            if spec.args.len() == expected {
                Ok(())
            } else {
                Err(EnergyError::ArgumentCount {
                    kind: "interaction",
                    tag: spec.tag,
                    expected,
                    got: spec.args.len(),
                })
            }
        };
        let radii_ordered = |r1: f32, r2: f32| -> Result<(), EnergyError> {
            if r1.is_finite() && r2.is_finite() && 0.0 <= r1 && r1 <= r2 {
                Ok(())
            } else {
                Err(EnergyError::InvalidArgument {
                    kind: "interaction",
                    reason: format!("radii must satisfy 0 <= r1 <= r2, got {r1}, {r2}"),
                })
            }
        };
        match spec.tag {
            TAG_ZERO => {
                arity(0)?;
                Ok(Interaction::Zero)
            }
            TAG_PIECEWISE_BOX => {
                arity(4)?;
                radii_ordered(spec.args[0], spec.args[1])?;
                Ok(Interaction::PiecewiseBox {
                    r1: spec.args[0],
                    r2: spec.args[1],
                    v1: spec.args[2],
                    v2: spec.args[3],
                })
            }
            TAG_CROSS | TAG_CROSS_HASH => {
                arity(6)?;
                radii_ordered(spec.args[0], spec.args[1])?;
                let (r1, r2) = (spec.args[0], spec.args[1]);
                let (v_axis1, v_axis2) = (spec.args[2], spec.args[3]);
                let (v_off1, v_off2) = (spec.args[4], spec.args[5]);
                if spec.tag == TAG_CROSS {
                    Ok(Interaction::Cross {
                        r1,
                        r2,
                        v_axis1,
                        v_axis2,
                        v_off1,
                        v_off2,
                    })
                } else {
                    Ok(Interaction::CrossHash {
                        r1,
                        r2,
                        v_axis1,
                        v_axis2,
                        v_off1,
                        v_off2,
                    })
                }
            }
            TAG_MOORE => {
                arity(0)?;
                Ok(Interaction::Moore)
            }
            TAG_FOUR => {
                arity(0)?;
                Ok(Interaction::Four)
            }
            TAG_GAUSSIAN => {
                arity(2)?;
                let sigma = spec.args[0];
                if !(sigma.is_finite() && sigma > 0.0) {
                    return Err(EnergyError::InvalidArgument {
                        kind: "interaction",
                        reason: format!("sigma must be finite and positive, got {sigma}"),
                    });
                }
                Ok(Interaction::Gaussian {
                    sigma,
                    amplitude: spec.args[1],
                })
            }
            tag => Err(EnergyError::UnknownTag {
                kind: "interaction",
                tag,
            }),
        }
    }

    /// The serialization form of this function.
    pub fn to_spec(&self) -> EnergySpec {
        match self {
            Interaction::Zero => EnergySpec::new(TAG_ZERO, Vec::new()),
            Interaction::PiecewiseBox { r1, r2, v1, v2 } => {
                EnergySpec::new(TAG_PIECEWISE_BOX, vec![*r1, *r2, *v1, *v2])
            }
            Interaction::Cross {
                r1,
                r2,
                v_axis1,
                v_axis2,
                v_off1,
                v_off2,
            } => EnergySpec::new(
                TAG_CROSS,
                vec![*r1, *r2, *v_axis1, *v_axis2, *v_off1, *v_off2],
            ),
            Interaction::CrossHash {
                r1,
                r2,
                v_axis1,
                v_axis2,
                v_off1,
                v_off2,
            } => EnergySpec::new(
                TAG_CROSS_HASH,
                vec![*r1, *r2, *v_axis1, *v_axis2, *v_off1, *v_off2],
            ),
            Interaction::Moore => EnergySpec::new(TAG_MOORE, Vec::new()),
            Interaction::Four => EnergySpec::new(TAG_FOUR, Vec::new()),
            Interaction::Gaussian { sigma, amplitude } => {
                EnergySpec::new(TAG_GAUSSIAN, vec![*sigma, *amplitude])
            }
        }
    }

    /// Evaluate for a pair of placements `(first, second)`.
    pub fn evaluate(&self, first: Position, second: Position) -> f32 {
        let d = second - first;
        let dist2 = d.squared_length() as f64;
        match self {
            Interaction::Zero => 0.0,
            Interaction::PiecewiseBox { r1, r2, v1, v2 } => {
                if dist2 <= (*r1 as f64) * (*r1 as f64) {
                    *v1
                } else if dist2 <= (*r2 as f64) * (*r2 as f64) {
                    *v2
                } else {
                    0.0
                }
            }
            Interaction::Cross {
                r1,
                r2,
                v_axis1,
                v_axis2,
                v_off1,
                v_off2,
            } => cross_value(d, dist2, *r1, *r2, *v_axis1, *v_axis2, *v_off1, *v_off2),
            Interaction::CrossHash {
                r1,
                r2,
                v_axis1,
                v_axis2,
                v_off1,
                v_off2,
            } => {
                let base =
                    cross_value(d, dist2, *r1, *r2, *v_axis1, *v_axis2, *v_off1, *v_off2);
                // Modulated by a hash of the unordered position pair so
                // evaluate(a, b) and evaluate(b, a) see the same factor.
                let (lo, hi) = if (first.x, first.y) <= (second.x, second.y) {
                    (first, second)
                } else {
                    (second, first)
                };
                base * hash_unit(&[lo.x as u64, lo.y as u64, hi.x as u64, hi.y as u64])
            }
            Interaction::Moore => {
                let chebyshev = d.x.abs().max(d.y.abs());
                if chebyshev == 1 {
                    EXCLUSION_ENERGY
                } else {
                    0.0
                }
            }
            Interaction::Four => {
                let manhattan = d.x.abs() + d.y.abs();
                if manhattan == 1 {
                    EXCLUSION_ENERGY
                } else {
                    0.0
                }
            }
            Interaction::Gaussian { sigma, amplitude } => {
                let s = *sigma as f64;
                (*amplitude as f64 * (-dist2 / (2.0 * s * s)).exp()) as f32
            }
        }
    }

    /// Whether the function depends only on the displacement between
    /// the two positions.
    ///
    /// Stationary interactions are precomputed into the displacement
    /// table in [`cache::InteractionTable`](crate::cache::InteractionTable).
    pub fn is_stationary(&self) -> bool {
        !matches!(self, Interaction::CrossHash { .. })
    }

    /// Displacement (on either axis) beyond which this function is
    /// guaranteed zero, if bounded.
    pub fn support_radius(&self) -> Option<f64> {
        match self {
            Interaction::Zero => Some(0.0),
            Interaction::PiecewiseBox { r2, .. }
            | Interaction::Cross { r2, .. }
            | Interaction::CrossHash { r2, .. } => Some(*r2 as f64),
            Interaction::Moore | Interaction::Four => Some(1.5),
            // Gaussian has unbounded support; the quadrant neighborhood
            // truncates it at 2·patch_size.
            Interaction::Gaussian { .. } => None,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cross_value(
    d: Position,
    dist2: f64,
    r1: f32,
    r2: f32,
    v_axis1: f32,
    v_axis2: f32,
    v_off1: f32,
    v_off2: f32,
) -> f32 {
    let on_axis = d.x == 0 || d.y == 0;
    if dist2 <= (r1 as f64) * (r1 as f64) {
        if on_axis {
            v_axis1
        } else {
            v_off1
        }
    } else if dist2 <= (r2 as f64) * (r2 as f64) {
        if on_axis {
            v_axis2
        } else {
            v_off2
        }
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(x: i64, y: i64) -> Position {
        Position::new(x, y)
    }

    #[test]
    fn piecewise_box_bands() {
        let f = Interaction::from_spec(&EnergySpec::new(
            TAG_PIECEWISE_BOX,
            vec![1.5, 3.0, 2.0, -1.0],
        ))
        .unwrap();
        assert_eq!(f.evaluate(pos(0, 0), pos(1, 0)), 2.0);
        assert_eq!(f.evaluate(pos(0, 0), pos(2, 0)), -1.0);
        assert_eq!(f.evaluate(pos(0, 0), pos(4, 0)), 0.0);
    }

    #[test]
    fn piecewise_box_rejects_swapped_radii() {
        let err =
            Interaction::from_spec(&EnergySpec::new(TAG_PIECEWISE_BOX, vec![3.0, 1.0, 0.0, 0.0]))
                .unwrap_err();
        assert!(matches!(err, EnergyError::InvalidArgument { .. }));
    }

    #[test]
    fn cross_distinguishes_axis_from_diagonal() {
        let f = Interaction::Cross {
            r1: 2.0,
            r2: 4.0,
            v_axis1: 5.0,
            v_axis2: 2.5,
            v_off1: -1.0,
            v_off2: -0.5,
        };
        assert_eq!(f.evaluate(pos(0, 0), pos(0, 2)), 5.0);
        assert_eq!(f.evaluate(pos(0, 0), pos(1, 1)), -1.0);
        assert_eq!(f.evaluate(pos(0, 0), pos(3, 0)), 2.5);
        assert_eq!(f.evaluate(pos(0, 0), pos(2, 2)), -0.5);
        assert_eq!(f.evaluate(pos(0, 0), pos(5, 0)), 0.0);
    }

    #[test]
    fn cross_hash_is_symmetric_and_bounded_by_cross() {
        let args = vec![2.0, 4.0, 5.0, 2.5, -1.0, -0.5];
        let hashed =
            Interaction::from_spec(&EnergySpec::new(TAG_CROSS_HASH, args.clone())).unwrap();
        let plain = Interaction::from_spec(&EnergySpec::new(TAG_CROSS, args)).unwrap();
        for (a, b) in [(pos(0, 0), pos(0, 2)), (pos(3, 1), pos(4, 2))] {
            let v = hashed.evaluate(a, b);
            assert_eq!(v, hashed.evaluate(b, a), "symmetry violated");
            assert!(v.abs() <= plain.evaluate(a, b).abs() + f32::EPSILON);
        }
        assert!(!hashed.is_stationary());
        assert!(plain.is_stationary());
    }

    #[test]
    fn moore_excludes_diagonal_neighbors() {
        let f = Interaction::Moore;
        assert_eq!(f.evaluate(pos(0, 0), pos(1, 1)), EXCLUSION_ENERGY);
        assert_eq!(f.evaluate(pos(0, 0), pos(0, 1)), EXCLUSION_ENERGY);
        assert_eq!(f.evaluate(pos(0, 0), pos(2, 0)), 0.0);
    }

    #[test]
    fn four_allows_diagonal_neighbors() {
        let f = Interaction::Four;
        assert_eq!(f.evaluate(pos(0, 0), pos(1, 1)), 0.0);
        assert_eq!(f.evaluate(pos(0, 0), pos(0, 1)), EXCLUSION_ENERGY);
    }

    #[test]
    fn gaussian_peaks_at_zero_distance() {
        let f = Interaction::Gaussian {
            sigma: 2.0,
            amplitude: 3.0,
        };
        let near = f.evaluate(pos(0, 0), pos(1, 0));
        let far = f.evaluate(pos(0, 0), pos(6, 0));
        assert!(near > far);
        assert!(far > 0.0);
        assert!(f.support_radius().is_none());
    }

    #[test]
    fn gaussian_rejects_nonpositive_sigma() {
        let err =
            Interaction::from_spec(&EnergySpec::new(TAG_GAUSSIAN, vec![0.0, 1.0])).unwrap_err();
        assert!(matches!(err, EnergyError::InvalidArgument { .. }));
    }

    #[test]
    fn spec_round_trips() {
        let functions = [
            Interaction::Zero,
            Interaction::PiecewiseBox {
                r1: 1.0,
                r2: 2.0,
                v1: 3.0,
                v2: 4.0,
            },
            Interaction::Moore,
            Interaction::Four,
            Interaction::Gaussian {
                sigma: 1.0,
                amplitude: -2.0,
            },
        ];
        for f in functions {
            assert_eq!(Interaction::from_spec(&f.to_spec()).unwrap(), f);
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn piecewise_box_vanishes_beyond_outer_radius(
                dx in -50i64..50,
                dy in -50i64..50,
                r1 in 0.0f32..5.0,
                extra in 0.0f32..5.0,
            ) {
                let r2 = r1 + extra;
                let f = Interaction::PiecewiseBox {
                    r1,
                    r2,
                    v1: 2.0,
                    v2: -1.0,
                };
                let d2 = (dx * dx + dy * dy) as f64;
                let v = f.evaluate(pos(0, 0), pos(dx, dy));
                if d2 > (r2 as f64) * (r2 as f64) {
                    prop_assert_eq!(v, 0.0);
                }
            }

            #[test]
            fn bounded_interactions_respect_their_support(
                dx in -50i64..50,
                dy in -50i64..50,
            ) {
                for f in [Interaction::Moore, Interaction::Four] {
                    let radius = f.support_radius().unwrap();
                    let d2 = (dx * dx + dy * dy) as f64;
                    if d2 > radius * radius {
                        prop_assert_eq!(f.evaluate(pos(0, 0), pos(dx, dy)), 0.0);
                    }
                }
            }
        }
    }
}
