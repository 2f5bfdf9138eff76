//! Tagged energy functions and sampler caches for the Veld simulation
//! framework.
//!
//! The Gibbs field that governs item placement is parameterized by
//! three pluggable function kinds: per-type *intensity* (unary energy),
//! pairwise *interaction*, and per-type *regeneration*. Each function
//! is identified by a small integer tag plus an f32 argument array —
//! the serialization form — and resolved to a concrete callable here.
//! Resolution validates tags and arities; an invalid spec aborts
//! simulator construction.
//!
//! The registry also owns the sampler's hot-path caches: the
//! stationary interaction table (a precomputed displacement lookup)
//! and the small-integer logarithm cache.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod error;
mod hash;
pub mod intensity;
pub mod interaction;
pub mod regeneration;
pub mod registry;

pub use cache::{InteractionTable, LogCache};
pub use error::EnergyError;
pub use intensity::Intensity;
pub use interaction::Interaction;
pub use regeneration::Regeneration;
pub use registry::EnergyTables;

/// Hard-exclusion energy used by the `Moore` and `Four` interaction
/// functions.
///
/// Finite so that log-space arithmetic stays NaN-free; large enough
/// that `exp` underflows to zero acceptance.
pub const EXCLUSION_ENERGY: f32 = -1.0e6;
