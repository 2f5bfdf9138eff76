//! Gibbs-field sampling of item placements.
//!
//! New patches are materialized by running `mcmc_iterations` sweeps of
//! a Markov chain whose stationary distribution is the Gibbs field
//! defined by the item catalog's intensity and interaction functions.
//! Two chains are available, selected by
//! [`SamplerKind`](veld_core::config::SamplerKind):
//!
//! - **Metropolis–Hastings** (default): each sweep makes one
//!   birth-or-death proposal per patch in the generation batch.
//! - **Gibbs**: each sweep resamples every cell of every batch patch
//!   from its conditional distribution, scanning the four interleaved
//!   cell quadrants in shuffled order.
//!
//! Every patch draws from its own seed-derived RNG stream
//! ([`rng::patch_seed`](veld_core::rng::patch_seed)), so the items a
//! patch receives do not depend on generation order.

use indexmap::IndexMap;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use veld_core::config::{SamplerKind, SimulatorConfig};
use veld_core::item::Item;
use veld_core::position::{CellCoord, Position};
use veld_core::rng::patch_seed;
use veld_energy::EnergyTables;

/// Uniform draw in `0..bound`.
#[inline]
fn uniform(rng: &mut ChaCha8Rng, bound: u64) -> u64 {
    debug_assert!(bound > 0);
    rng.gen::<u64>() % bound
}

/// The four quadrant patch coordinates whose items can interact with a
/// cell of `patch`.
///
/// A cell in (say) the north-west quadrant of a patch is within
/// interaction range (`2 · patch_size`) of the patch itself and its
/// west, north-west, and north neighbors only. Boundary effects beyond
/// that are zero by the interaction-function contract.
pub fn quadrant_patches(patch: Position, cell: CellCoord, patch_size: u32) -> [Position; 4] {
    let half = patch_size / 2;
    let qx: i64 = if cell.0 < half { -1 } else { 1 };
    let qy: i64 = if cell.1 < half { -1 } else { 1 };
    [
        patch,
        Position::new(patch.x + qx, patch.y),
        Position::new(patch.x, patch.y + qy),
        Position::new(patch.x + qx, patch.y + qy),
    ]
}

/// Items visible to a proposal: alive items of the quadrant
/// neighborhood, resolved against the generation batch first and the
/// frozen pre-existing patches second.
fn pair_energy_sum(
    energy: &EnergyTables,
    batch: &IndexMap<Position, Vec<Item>>,
    frozen: &IndexMap<Position, Vec<Item>>,
    patch: Position,
    cell: CellCoord,
    pos: Position,
    item_type: usize,
    patch_size: u32,
) -> f64 {
    let mut sum = 0.0f64;
    for quadrant in quadrant_patches(patch, cell, patch_size) {
        let items = match batch.get(&quadrant) {
            Some(items) => items.as_slice(),
            None => match frozen.get(&quadrant) {
                Some(items) => items.as_slice(),
                None => continue,
            },
        };
        for other in items {
            if !other.is_alive() || other.position == pos {
                continue;
            }
            sum += energy.pair_energy(item_type, pos, other.item_type as usize, other.position)
                as f64;
        }
    }
    sum
}

fn alive_indices(items: &[Item]) -> Vec<usize> {
    items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.is_alive())
        .map(|(index, _)| index)
        .collect()
}

fn is_cell_occupied(items: &[Item], pos: Position) -> bool {
    items
        .iter()
        .any(|item| item.is_alive() && item.position == pos)
}

/// Run the configured sampler over a generation batch.
///
/// `batch` maps each newly generated patch coordinate to its item list
/// (mutated in place); `frozen` holds the item lists of pre-existing
/// neighbor patches, which the chain reads but never modifies. Items
/// born here carry `creation_tick = tick`.
pub fn sample_batch(
    config: &SimulatorConfig,
    energy: &EnergyTables,
    batch: &mut IndexMap<Position, Vec<Item>>,
    frozen: &IndexMap<Position, Vec<Item>>,
    tick: u64,
) {
    if energy.type_count() == 0 || batch.is_empty() {
        return;
    }
    batch.sort_keys();

    let coords: Vec<Position> = batch.keys().copied().collect();
    let mut rngs: Vec<ChaCha8Rng> = coords
        .iter()
        .map(|&coord| ChaCha8Rng::seed_from_u64(patch_seed(config.seed, coord)))
        .collect();

    for _sweep in 0..config.mcmc_iterations {
        for (index, &coord) in coords.iter().enumerate() {
            let rng = &mut rngs[index];
            match config.sampler {
                SamplerKind::MetropolisHastings => {
                    if rng.gen::<f64>() < 0.5 {
                        propose_birth(config, energy, batch, frozen, coord, rng, tick);
                    } else {
                        propose_death(config, energy, batch, frozen, coord, rng);
                    }
                }
                SamplerKind::Gibbs => {
                    gibbs_sweep(config, energy, batch, frozen, coord, rng, tick);
                }
            }
        }
    }
}

/// One birth proposal for `patch`.
///
/// Forward proposal density is `1 / (type_count · n²)`, inverse (the
/// death that would undo it) `1 / (k + 1)`; the acceptance exponent
/// carries both corrections.
fn propose_birth(
    config: &SimulatorConfig,
    energy: &EnergyTables,
    batch: &mut IndexMap<Position, Vec<Item>>,
    frozen: &IndexMap<Position, Vec<Item>>,
    patch: Position,
    rng: &mut ChaCha8Rng,
    tick: u64,
) {
    let n = config.patch_size;
    let item_type = uniform(rng, energy.type_count() as u64) as usize;
    let cell = (uniform(rng, n as u64) as u32, uniform(rng, n as u64) as u32);
    let pos = Position::compose(patch, cell, n);

    let items = &batch[&patch];
    if is_cell_occupied(items, pos) {
        return;
    }
    let alive = items.iter().filter(|item| item.is_alive()).count();

    let mut log_accept = energy.intensity(item_type, pos) as f64;
    log_accept += pair_energy_sum(energy, batch, frozen, patch, cell, pos, item_type, n);
    log_accept += energy.log(energy.type_count()) + 2.0 * energy.log(n as usize);
    log_accept -= energy.log(alive + 1);

    if log_accept >= 0.0 || rng.gen::<f64>() < log_accept.exp() {
        batch
            .get_mut(&patch)
            .expect("batch patch present")
            .push(Item::new(item_type as u32, pos, tick));
    }
}

/// One death proposal for `patch`: the mirror of [`propose_birth`].
fn propose_death(
    config: &SimulatorConfig,
    energy: &EnergyTables,
    batch: &mut IndexMap<Position, Vec<Item>>,
    frozen: &IndexMap<Position, Vec<Item>>,
    patch: Position,
    rng: &mut ChaCha8Rng,
) {
    let n = config.patch_size;
    let alive = alive_indices(&batch[&patch]);
    if alive.is_empty() {
        return;
    }
    let pick = alive[uniform(rng, alive.len() as u64) as usize];
    let item = batch[&patch][pick];
    let cell = item.position.cell_of(n);
    let item_type = item.item_type as usize;

    let mut log_accept = -(energy.intensity(item_type, item.position) as f64);
    log_accept -= pair_energy_sum(
        energy,
        batch,
        frozen,
        patch,
        cell,
        item.position,
        item_type,
        n,
    );
    log_accept -= energy.log(energy.type_count()) + 2.0 * energy.log(n as usize);
    log_accept += energy.log(alive.len());

    if log_accept >= 0.0 || rng.gen::<f64>() < log_accept.exp() {
        // Removed for good: generation-time deaths never become ghosts.
        batch.get_mut(&patch).expect("batch patch present").remove(pick);
    }
}

/// One Gibbs sweep over every cell of `patch`.
///
/// Cells are visited quadrant by quadrant (the four parity classes of
/// `(x mod 2, y mod 2)`), shuffled within each quadrant, and resampled
/// from the conditional distribution over `{empty} ∪ item_types` given
/// every other placement.
fn gibbs_sweep(
    config: &SimulatorConfig,
    energy: &EnergyTables,
    batch: &mut IndexMap<Position, Vec<Item>>,
    frozen: &IndexMap<Position, Vec<Item>>,
    patch: Position,
    rng: &mut ChaCha8Rng,
    tick: u64,
) {
    let n = config.patch_size;
    for (px, py) in [(0u32, 0u32), (1, 0), (0, 1), (1, 1)] {
        let mut cells: Vec<CellCoord> = Vec::with_capacity((n as usize * n as usize) / 4 + n as usize);
        for y in (py..n).step_by(2) {
            for x in (px..n).step_by(2) {
                cells.push((x, y));
            }
        }
        // Fisher–Yates with this patch's stream.
        for i in (1..cells.len()).rev() {
            let j = uniform(rng, (i + 1) as u64) as usize;
            cells.swap(i, j);
        }

        for cell in cells {
            let pos = Position::compose(patch, cell, n);

            // The conditional excludes whatever currently occupies the
            // cell, so remove it before computing energies.
            if let Some(index) = batch[&patch]
                .iter()
                .position(|item| item.is_alive() && item.position == pos)
            {
                batch.get_mut(&patch).expect("batch patch present").remove(index);
            }

            let type_count = energy.type_count();
            let mut energies = vec![0.0f64; type_count + 1];
            for item_type in 0..type_count {
                energies[item_type + 1] = energy.intensity(item_type, pos) as f64
                    + pair_energy_sum(energy, batch, frozen, patch, cell, pos, item_type, n);
            }

            let choice = sample_categorical(&energies, rng);
            if choice > 0 {
                batch
                    .get_mut(&patch)
                    .expect("batch patch present")
                    .push(Item::new((choice - 1) as u32, pos, tick));
            }
        }
    }
}

/// Sample an index proportionally to `exp(energies[i])`.
///
/// Shift-by-max keeps the exponentials in range regardless of the
/// energy scale.
fn sample_categorical(energies: &[f64], rng: &mut ChaCha8Rng) -> usize {
    let max = energies.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let weights: Vec<f64> = energies.iter().map(|&e| (e - max).exp()).collect();
    let total: f64 = weights.iter().sum();
    let mut remaining = rng.gen::<f64>() * total;
    for (index, &w) in weights.iter().enumerate() {
        remaining -= w;
        if remaining < 0.0 {
            return index;
        }
    }
    weights.len() - 1
}

/// A short birth-only pass used by the stepper's regeneration phase.
///
/// Restricted to births of `item_type` with the intensity offset by
/// `ln(rate)`; `rate` is the regeneration function's value for this
/// patch and tick. Runs a quarter of the configured sweep count,
/// floored at one proposal.
#[allow(clippy::too_many_arguments)]
pub fn regeneration_pass(
    config: &SimulatorConfig,
    energy: &EnergyTables,
    patch: Position,
    items: &mut Vec<Item>,
    frozen: &IndexMap<Position, Vec<Item>>,
    item_type: usize,
    rate: f32,
    tick: u64,
    rng: &mut ChaCha8Rng,
) {
    if rate <= 0.0 {
        return;
    }
    let n = config.patch_size;
    let log_rate = (rate as f64).ln();
    let proposals = (config.mcmc_iterations / 4).max(1);

    // Wrap the live item list in a one-entry batch so the shared
    // energy accumulation sees in-progress births.
    let mut batch: IndexMap<Position, Vec<Item>> = IndexMap::new();
    batch.insert(patch, std::mem::take(items));

    for _ in 0..proposals {
        let cell = (uniform(rng, n as u64) as u32, uniform(rng, n as u64) as u32);
        let pos = Position::compose(patch, cell, n);
        if is_cell_occupied(&batch[&patch], pos) {
            continue;
        }
        let alive = batch[&patch].iter().filter(|item| item.is_alive()).count();

        let mut log_accept = energy.intensity(item_type, pos) as f64 + log_rate;
        log_accept += pair_energy_sum(energy, &batch, frozen, patch, cell, pos, item_type, n);
        log_accept += 2.0 * energy.log(n as usize);
        log_accept -= energy.log(alive + 1);

        if log_accept >= 0.0 || rng.gen::<f64>() < log_accept.exp() {
            batch
                .get_mut(&patch)
                .expect("batch patch present")
                .push(Item::new(item_type as u32, pos, tick));
        }
    }

    *items = batch.swap_remove(&patch).expect("batch patch present");
}
