//! The patch store: on-demand generation and caching of patches.
//!
//! One global map keyed by patch coordinate. Reads take a shared lock;
//! insertion (generation) takes the exclusive lock only after sampling
//! has finished, so concurrent readers are never blocked behind MCMC.
//! Generation is idempotent: each patch samples from its own
//! seed-derived stream, so a caller that loses an insertion race
//! observes a patch identical to the one it computed.

use std::sync::{Arc, Mutex, RwLock};

use indexmap::IndexMap;
use smallvec::SmallVec;

use veld_core::config::SimulatorConfig;
use veld_core::error::MapError;
use veld_core::item::Item;
use veld_core::position::Position;
use veld_energy::EnergyTables;

use crate::patch::Patch;
use crate::sampler;

/// Shared handle to one patch.
pub type PatchHandle = Arc<Mutex<Patch>>;

/// The four quadrant neighborhoods of a patch.
///
/// Each quadrant lists the patches (up to 4, including the patch
/// itself) whose items can interact with cells in that quadrant.
/// Only patches that currently exist are listed; during generation the
/// same-batch patches stand in for missing ones.
#[derive(Clone, Debug, Default)]
pub struct QuadrantNeighborhood {
    /// Patches interacting with the north-west quadrant.
    pub nw: SmallVec<[Position; 4]>,
    /// Patches interacting with the north-east quadrant.
    pub ne: SmallVec<[Position; 4]>,
    /// Patches interacting with the south-west quadrant.
    pub sw: SmallVec<[Position; 4]>,
    /// Patches interacting with the south-east quadrant.
    pub se: SmallVec<[Position; 4]>,
}

/// The patch store.
///
/// Owns every materialized patch. Lock order: the map lock strictly
/// before any per-patch lock, and per-patch locks in ascending
/// `(x, y)` coordinate order when several are held.
pub struct PatchMap {
    patch_size: u32,
    patches: RwLock<IndexMap<Position, PatchHandle>>,
}

impl PatchMap {
    /// Create an empty store for `patch_size`-sized patches.
    pub fn new(patch_size: u32) -> Self {
        Self {
            patch_size,
            patches: RwLock::new(IndexMap::new()),
        }
    }

    /// Patch side length in cells.
    pub fn patch_size(&self) -> u32 {
        self.patch_size
    }

    /// Look up an existing patch.
    pub fn get(&self, patch: Position) -> Option<PatchHandle> {
        self.patches
            .read()
            .ok()
            .and_then(|map| map.get(&patch).cloned())
    }

    /// Whether a patch exists.
    pub fn contains(&self, patch: Position) -> bool {
        self.patches
            .read()
            .map(|map| map.contains_key(&patch))
            .unwrap_or(false)
    }

    /// Number of materialized patches.
    pub fn len(&self) -> usize {
        self.patches.read().map(|map| map.len()).unwrap_or(0)
    }

    /// Whether no patch has been materialized yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the patch at `target`, generating it (and the
    /// surrounding block) if absent.
    ///
    /// Generation materializes every missing patch of the 4×4 block
    /// covering `target` in one batch, so the sampler sees the
    /// cross-boundary neighborhoods it needs. Newly inserted patch
    /// coordinates are appended to `inserted`, letting a failed step
    /// roll its generation back.
    ///
    /// `fix` freezes the target patch against future resampling.
    pub fn get_or_generate(
        &self,
        target: Position,
        fix: bool,
        config: &SimulatorConfig,
        energy: &EnergyTables,
        tick: u64,
        inserted: &mut Vec<Position>,
    ) -> Result<PatchHandle, MapError> {
        // Fast path: the patch already exists.
        if let Some(handle) = self.get(target) {
            if fix {
                handle.lock().map_err(|_| MapError::LockPoisoned)?.fixed = true;
            }
            return Ok(handle);
        }

        // Collect the batch: missing patches of the 4×4 block covering
        // the target (target at block position (1, 1)), plus a frozen
        // snapshot of every existing patch the batch can interact with.
        let mut batch: IndexMap<Position, Vec<Item>> = IndexMap::new();
        let mut frozen: IndexMap<Position, Vec<Item>> = IndexMap::new();
        {
            let map = self.patches.read().map_err(|_| MapError::LockPoisoned)?;
            for dy in -1i64..=2 {
                for dx in -1i64..=2 {
                    let coord = Position::new(target.x + dx, target.y + dy);
                    if !map.contains_key(&coord) {
                        batch.insert(coord, Vec::new());
                    }
                }
            }
            for dy in -2i64..=3 {
                for dx in -2i64..=3 {
                    let coord = Position::new(target.x + dx, target.y + dy);
                    if let Some(handle) = map.get(&coord) {
                        let patch = handle.lock().map_err(|_| MapError::LockPoisoned)?;
                        frozen.insert(coord, patch.items.clone());
                    }
                }
            }
        }

        // Sample outside any lock; the batch streams are keyed by
        // coordinate, so a racing generator computes identical items.
        sampler::sample_batch(config, energy, &mut batch, &frozen, tick);

        {
            let mut map = self.patches.write().map_err(|_| MapError::LockPoisoned)?;
            for (coord, items) in batch {
                let absent = !map.contains_key(&coord);
                if absent {
                    let mut patch = Patch::new(coord, self.patch_size, config.scent_dim, tick);
                    patch.items = items;
                    map.insert(coord, Arc::new(Mutex::new(patch)));
                    inserted.push(coord);
                }
            }
        }

        let handle = self
            .get(target)
            .expect("target was inserted by this batch or a racing one");
        if fix {
            handle.lock().map_err(|_| MapError::LockPoisoned)?.fixed = true;
        }
        Ok(handle)
    }

    /// Freeze a patch against resampling.
    pub fn mark_fixed(&self, patch: Position) -> Result<(), MapError> {
        let handle = self.get(patch).ok_or(MapError::PatchMissing { patch })?;
        handle.lock().map_err(|_| MapError::LockPoisoned)?.fixed = true;
        Ok(())
    }

    /// The quadrant neighborhoods of `patch`, listing only patches
    /// that currently exist.
    pub fn neighborhood(&self, patch: Position) -> QuadrantNeighborhood {
        let mut result = QuadrantNeighborhood::default();
        let quadrants: [(&mut SmallVec<[Position; 4]>, i64, i64); 4] = [
            (&mut result.sw, -1, -1),
            (&mut result.se, 1, -1),
            (&mut result.nw, -1, 1),
            (&mut result.ne, 1, 1),
        ];
        for (list, qx, qy) in quadrants {
            for coord in [
                patch,
                Position::new(patch.x + qx, patch.y),
                Position::new(patch.x, patch.y + qy),
                Position::new(patch.x + qx, patch.y + qy),
            ] {
                if self.contains(coord) {
                    list.push(coord);
                }
            }
        }
        result
    }

    /// Remove a patch outright. Used only to roll back the inserts of
    /// a failed step.
    pub fn remove(&self, patch: Position) {
        if let Ok(mut map) = self.patches.write() {
            map.shift_remove(&patch);
        }
    }

    /// Insert a fully formed patch, replacing any existing one.
    /// Used by snapshot load.
    pub fn insert(&self, patch: Patch) {
        if let Ok(mut map) = self.patches.write() {
            map.insert(patch.position, Arc::new(Mutex::new(patch)));
        }
    }

    /// All patch coordinates in ascending `(x, y)` order.
    ///
    /// The snapshot codec iterates this to get a canonical byte layout
    /// regardless of generation order.
    pub fn coords_sorted(&self) -> Vec<Position> {
        let mut coords: Vec<Position> = self
            .patches
            .read()
            .map(|map| map.keys().copied().collect())
            .unwrap_or_default();
        coords.sort();
        coords
    }

    /// Clone of one patch's full state, for snapshots and `get_map`.
    pub fn clone_patch(&self, patch: Position) -> Option<Patch> {
        let handle = self.get(patch)?;
        let guard = handle.lock().ok()?;
        Some(guard.clone())
    }
}

impl std::fmt::Debug for PatchMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchMap")
            .field("patch_size", &self.patch_size)
            .field("patches", &self.len())
            .finish()
    }
}
