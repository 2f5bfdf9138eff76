//! Scent decay and diffusion with lazy per-patch catch-up.
//!
//! Scent lives on each patch as an `n × n × scent_dim` tensor and
//! advances once per tick:
//!
//! ```text
//! S'[x,y] = (1 − δ·k) · λ · S[x,y]  +  λ·δ · Σ S[neighbors]  +  contributions
//! ```
//!
//! where `k` counts the 4-neighbors that exist (edge cells fetch from
//! adjacent patches; a missing patch removes its cells from the sum
//! and from `k`). Contributions add each alive item's scent plus a
//! `λ^age` echo for every ghost younger than the configured removed
//! item lifetime.
//!
//! Patches are caught up lazily: a patch touched after idling applies
//! as many updates as it is behind. Neighbor grids are read from a
//! [`ScentSnapshot`] taken before the working set advances, preserving
//! the simultaneous-update semantics for patches that are current;
//! patches that lag behind replay against the snapshot as it stands,
//! which only affects cells the stepper never lets an agent smell.

use indexmap::IndexMap;

use veld_core::config::SimulatorConfig;
use veld_core::item::ItemType;
use veld_core::position::Position;

use crate::patch::Patch;

/// Frozen scent grids of a working set and its ring, keyed by patch
/// coordinate.
#[derive(Clone, Debug, Default)]
pub struct ScentSnapshot {
    grids: IndexMap<Position, Vec<f32>>,
}

impl ScentSnapshot {
    /// An empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one patch's pre-update grid.
    pub fn insert(&mut self, patch: Position, grid: Vec<f32>) {
        self.grids.insert(patch, grid);
    }

    /// The recorded grid of one patch.
    pub fn get(&self, patch: Position) -> Option<&[f32]> {
        self.grids.get(&patch).map(Vec::as_slice)
    }

    /// Scent components of the cell at a world position, if its patch
    /// was recorded.
    pub fn cell(&self, world: Position, patch_size: u32, scent_dim: u32) -> Option<&[f32]> {
        let (patch, cell) = world.decompose(patch_size);
        let grid = self.grids.get(&patch)?;
        let start = Patch::scent_index(cell, patch_size, scent_dim);
        Some(&grid[start..start + scent_dim as usize])
    }
}

/// The scent update kernel with its pre-allocated temporaries.
///
/// One instance per simulator; `catch_up` is called inside the
/// per-patch lock, so the scratch buffers never allocate on the hot
/// path after the first patch.
#[derive(Debug)]
pub struct ScentDiffuser {
    patch_size: u32,
    scent_dim: u32,
    decay: f32,
    diffusion: f32,
    removed_item_lifetime: u64,
    next: Vec<f32>,
    contributions: Vec<f32>,
}

impl ScentDiffuser {
    /// Build a diffuser for one configuration.
    pub fn new(config: &SimulatorConfig) -> Self {
        let cells = (config.patch_size as usize).pow(2) * config.scent_dim as usize;
        Self {
            patch_size: config.patch_size,
            scent_dim: config.scent_dim,
            decay: config.scent_decay,
            diffusion: config.scent_diffusion,
            removed_item_lifetime: config.removed_item_lifetime,
            next: vec![0.0; cells],
            contributions: vec![0.0; cells],
        }
    }

    /// Advance `patch` to `target_tick`, applying one update per
    /// missing tick, then drop fully expired ghosts.
    ///
    /// Neighbor reads come from `snapshot`; the patch's own grid
    /// evolves in place.
    pub fn catch_up(
        &mut self,
        patch: &mut Patch,
        snapshot: &ScentSnapshot,
        item_types: &[ItemType],
        target_tick: u64,
    ) {
        while patch.last_scent_update < target_tick {
            let tick = patch.last_scent_update + 1;
            self.advance_once(patch, snapshot, item_types, tick);
            patch.last_scent_update = tick;
        }
        patch.prune_ghosts(target_tick, self.removed_item_lifetime);
    }

    fn advance_once(
        &mut self,
        patch: &mut Patch,
        snapshot: &ScentSnapshot,
        item_types: &[ItemType],
        tick: u64,
    ) {
        let n = self.patch_size as i64;
        let dim = self.scent_dim as usize;

        self.accumulate_contributions(patch, item_types, tick);

        for y in 0..n {
            for x in 0..n {
                let base = ((y * n + x) as usize) * dim;

                // Gather the 4-neighborhood: in-patch cells read the
                // patch's own pre-update grid, out-of-patch cells the
                // snapshot. A neighbor whose patch is missing is out
                // of bounds and excluded from k.
                let mut neighbor_count = 0u32;
                for s in 0..dim {
                    self.next[base + s] = 0.0;
                }
                for (dx, dy) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
                    let nx = x + dx;
                    let ny = y + dy;
                    if (0..n).contains(&nx) && (0..n).contains(&ny) {
                        let neighbor = ((ny * n + nx) as usize) * dim;
                        neighbor_count += 1;
                        for s in 0..dim {
                            self.next[base + s] += patch.scent[neighbor + s];
                        }
                    } else {
                        let world = Position::new(
                            patch.position.x * n + nx,
                            patch.position.y * n + ny,
                        );
                        if let Some(cell) =
                            snapshot.cell(world, self.patch_size, self.scent_dim)
                        {
                            neighbor_count += 1;
                            for s in 0..dim {
                                self.next[base + s] += cell[s];
                            }
                        }
                    }
                }

                // Clamped so a large δ cannot drive cells negative.
                let keep = (1.0 - self.diffusion * neighbor_count as f32).max(0.0) * self.decay;
                let spread = self.decay * self.diffusion;
                for s in 0..dim {
                    self.next[base + s] = keep * patch.scent[base + s]
                        + spread * self.next[base + s]
                        + self.contributions[base + s];
                }
            }
        }

        patch.scent.copy_from_slice(&self.next);
    }

    /// Sum item and ghost scent into the contribution buffer.
    fn accumulate_contributions(&mut self, patch: &Patch, item_types: &[ItemType], tick: u64) {
        self.contributions.fill(0.0);
        let dim = self.scent_dim as usize;
        for item in &patch.items {
            let cell = item.position.cell_of(self.patch_size);
            let base = Patch::scent_index(cell, self.patch_size, self.scent_dim);
            let scent = &item_types[item.item_type as usize].scent;
            if item.is_alive_at(tick) {
                for s in 0..dim {
                    self.contributions[base + s] += scent[s];
                }
            } else if let Some(age) = item.ghost_age(tick) {
                if age < self.removed_item_lifetime {
                    let echo = self.decay.powi(age as i32);
                    for s in 0..dim {
                        self.contributions[base + s] += echo * scent[s];
                    }
                }
            }
        }
    }
}
