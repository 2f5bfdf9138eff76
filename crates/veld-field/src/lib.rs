//! Patch store, Gibbs-field sampler, and scent diffusion for the Veld
//! simulation framework.
//!
//! The infinite grid is materialized lazily as `patch_size²` patches.
//! When a patch is first touched, the [`PatchMap`] generates it — and
//! the surrounding block needed for boundary-correct sampling — by
//! running the configured [`sampler`] under the item catalog's energy
//! functions. Each patch carries a scent tensor that the [`scent`]
//! module advances with a decay+diffusion update, lazily catching
//! patches up to the current tick when they are next observed.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod map;
pub mod patch;
pub mod sampler;
pub mod scent;

pub use map::{PatchMap, QuadrantNeighborhood};
pub use patch::Patch;
pub use scent::{ScentDiffuser, ScentSnapshot};
