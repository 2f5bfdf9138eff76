//! The resolved energy-function registry.
//!
//! [`EnergyTables`] is built once at simulator construction from the
//! item catalog's tagged specs. It owns every resolved function plus
//! the stationary interaction table and log cache, and is the only
//! interface the sampler and stepper use to evaluate energies.

use veld_core::config::SimulatorConfig;
use veld_core::position::Position;

use crate::cache::{InteractionTable, LogCache};
use crate::error::EnergyError;
use crate::intensity::Intensity;
use crate::interaction::Interaction;
use crate::regeneration::Regeneration;

/// Resolved energy functions for one item catalog.
#[derive(Clone, Debug)]
pub struct EnergyTables {
    intensities: Vec<Intensity>,
    /// Row-major ordered-pair matrix: `[first * type_count + second]`.
    interactions: Vec<Interaction>,
    regenerations: Vec<Regeneration>,
    table: InteractionTable,
    log_cache: LogCache,
    type_count: usize,
}

impl EnergyTables {
    /// Resolve every spec in the catalog and build the caches.
    ///
    /// Fails on the first unknown tag, wrong arity, or invalid
    /// argument; the caller surfaces the failure as a construction
    /// error.
    pub fn new(config: &SimulatorConfig) -> Result<Self, EnergyError> {
        let type_count = config.item_types.len();
        let mut intensities = Vec::with_capacity(type_count);
        let mut interactions = Vec::with_capacity(type_count * type_count);
        let mut regenerations = Vec::with_capacity(type_count);

        for item in &config.item_types {
            intensities.push(Intensity::from_spec(&item.intensity)?);
            for spec in &item.interactions {
                interactions.push(Interaction::from_spec(spec)?);
            }
            regenerations.push(Regeneration::from_spec(&item.regeneration)?);
        }

        let table = InteractionTable::new(&interactions, type_count, config.patch_size);
        Ok(Self {
            intensities,
            interactions,
            regenerations,
            table,
            log_cache: LogCache::default(),
            type_count,
        })
    }

    /// Number of item types in the catalog.
    pub fn type_count(&self) -> usize {
        self.type_count
    }

    /// Log-intensity of placing an item of `item_type` at `pos`.
    #[inline]
    pub fn intensity(&self, item_type: usize, pos: Position) -> f32 {
        self.intensities[item_type].evaluate(pos)
    }

    /// Interaction energy of the ordered pair
    /// `(first_type at first, second_type at second)`.
    ///
    /// Stationary pairs read the precomputed displacement table;
    /// everything else evaluates directly.
    #[inline]
    pub fn interaction(
        &self,
        first_type: usize,
        second_type: usize,
        first: Position,
        second: Position,
    ) -> f32 {
        match self.table.lookup(first_type, second_type, second - first) {
            Some(v) => v,
            None => self.interactions[first_type * self.type_count + second_type]
                .evaluate(first, second),
        }
    }

    /// Symmetrized pair energy: `interaction(p, q, t, u) +
    /// interaction(q, p, u, t)`, the term the MH acceptance sums over
    /// every neighbor item.
    #[inline]
    pub fn pair_energy(
        &self,
        proposal_type: usize,
        proposal_pos: Position,
        other_type: usize,
        other_pos: Position,
    ) -> f32 {
        self.interaction(proposal_type, other_type, proposal_pos, other_pos)
            + self.interaction(other_type, proposal_type, other_pos, proposal_pos)
    }

    /// The regeneration function of `item_type`.
    pub fn regeneration(&self, item_type: usize) -> &Regeneration {
        &self.regenerations[item_type]
    }

    /// Whether the ordered pair `(first_type, second_type)` is
    /// identically zero for every displacement.
    pub fn interaction_is_zero(&self, first_type: usize, second_type: usize) -> bool {
        matches!(
            self.interactions[first_type * self.type_count + second_type],
            Interaction::Zero
        )
    }

    /// Cached `ln k`.
    #[inline]
    pub fn log(&self, k: usize) -> f64 {
        self.log_cache.log(k)
    }

    /// The serialization form of the intensity function of `item_type`.
    pub fn intensity_spec(&self, item_type: usize) -> veld_core::item::EnergySpec {
        self.intensities[item_type].to_spec()
    }
}
