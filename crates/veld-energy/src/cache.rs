//! Sampler hot-path caches.
//!
//! The Metropolis–Hastings sampler evaluates pairwise interactions for
//! every (proposal, neighbor item) pair; for stationary functions that
//! cost is folded into one table read per pair. The log cache backs
//! the proposal-correction terms, which only ever take logarithms of
//! small item counts.

use veld_core::position::Position;

use crate::interaction::Interaction;

/// Precomputed displacement tables for stationary interaction
/// functions.
///
/// One `(4n × 4n)` table per ordered item-type pair whose interaction
/// is stationary, where `n` is the patch size. The table covers
/// displacements in `[-2n, 2n)` on each axis, indexed by
/// `displacement + (2n, 2n)`; quadrant neighborhoods never produce a
/// displacement outside that square, and interaction functions are
/// defined to be zero there anyway.
#[derive(Clone, Debug)]
pub struct InteractionTable {
    type_count: usize,
    /// Half the table side: `2 · patch_size`.
    span: i64,
    /// Row-major `[first_type * type_count + second_type]`; `None` for
    /// non-stationary pairs, which fall back to direct evaluation.
    tables: Vec<Option<Vec<f32>>>,
}

impl InteractionTable {
    /// Precompute tables for every stationary pair.
    ///
    /// `interactions` is the row-major ordered-pair function matrix
    /// (`type_count²` entries).
    pub fn new(interactions: &[Interaction], type_count: usize, patch_size: u32) -> Self {
        let span = 2 * patch_size as i64;
        let side = (2 * span) as usize;
        let tables = interactions
            .iter()
            .map(|f| {
                if !f.is_stationary() {
                    return None;
                }
                if matches!(f, Interaction::Zero) {
                    // A zero table would only slow the lookup down.
                    return None;
                }
                let mut table = vec![0.0f32; side * side];
                for dy in -span..span {
                    for dx in -span..span {
                        let index = ((dy + span) as usize) * side + (dx + span) as usize;
                        table[index] =
                            f.evaluate(Position::ORIGIN, Position::new(dx, dy));
                    }
                }
                Some(table)
            })
            .collect();
        Self {
            type_count,
            span,
            tables,
        }
    }

    /// Look up the interaction of the ordered pair `(first_type,
    /// second_type)` at displacement `d = second_pos - first_pos`.
    ///
    /// Returns `None` when the pair has no table (non-stationary or
    /// identically zero); the caller falls back to direct evaluation.
    /// Displacements outside the table are zero by definition.
    #[inline]
    pub fn lookup(&self, first_type: usize, second_type: usize, d: Position) -> Option<f32> {
        let table = self.tables[first_type * self.type_count + second_type].as_ref()?;
        if d.x < -self.span || d.x >= self.span || d.y < -self.span || d.y >= self.span {
            return Some(0.0);
        }
        let side = (2 * self.span) as usize;
        let index = ((d.y + self.span) as usize) * side + (d.x + self.span) as usize;
        Some(table[index])
    }

    /// Whether the ordered pair is identically zero (no table and a
    /// zero function). Used to skip whole neighbor scans.
    pub fn has_table(&self, first_type: usize, second_type: usize) -> bool {
        self.tables[first_type * self.type_count + second_type].is_some()
    }
}

/// Cache of `ln k` for small non-negative integers.
///
/// `ln 0` is represented as negative infinity, which the MH acceptance
/// arithmetic never reaches (counts passed in are at least 1).
#[derive(Clone, Debug)]
pub struct LogCache {
    values: Vec<f64>,
}

impl LogCache {
    /// Cache logarithms of `0..capacity`.
    pub fn new(capacity: usize) -> Self {
        let values = (0..capacity.max(2))
            .map(|k| if k == 0 { f64::NEG_INFINITY } else { (k as f64).ln() })
            .collect();
        Self { values }
    }

    /// `ln k`, cached for small `k`, computed directly otherwise.
    #[inline]
    pub fn log(&self, k: usize) -> f64 {
        match self.values.get(k) {
            Some(&v) => v,
            None => (k as f64).ln(),
        }
    }
}

impl Default for LogCache {
    fn default() -> Self {
        // Covers patch item counts and patch_size² for every sane
        // configuration.
        Self::new(4096)
    }
}
