//! Errors from energy-function resolution.

use std::error::Error;
use std::fmt;

/// Errors from resolving an [`EnergySpec`](veld_core::item::EnergySpec)
/// to a callable.
///
/// Resolution happens once, at simulator construction; these errors
/// are construction-fatal and surface through
/// [`ConfigError::InvalidEnergyFunction`](veld_core::config::ConfigError).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnergyError {
    /// The tag does not name a known function of this kind.
    UnknownTag {
        /// The function kind ("intensity", "interaction", "regeneration").
        kind: &'static str,
        /// The unknown tag.
        tag: u32,
    },
    /// The argument array has the wrong length for the tag.
    ArgumentCount {
        /// The function kind.
        kind: &'static str,
        /// The tag whose arity was violated.
        tag: u32,
        /// Expected argument count.
        expected: usize,
        /// Actual argument count.
        got: usize,
    },
    /// An argument value is invalid (NaN, wrong sign, empty table).
    InvalidArgument {
        /// The function kind.
        kind: &'static str,
        /// Description of the violation.
        reason: String,
    },
}

impl fmt::Display for EnergyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTag { kind, tag } => {
                write!(f, "unknown {kind} function tag {tag}")
            }
            Self::ArgumentCount {
                kind,
                tag,
                expected,
                got,
            } => write!(
                f,
                "{kind} function tag {tag} takes {expected} arguments, got {got}"
            ),
            Self::InvalidArgument { kind, reason } => {
                write!(f, "invalid {kind} argument: {reason}")
            }
        }
    }
}

impl Error for EnergyError {}
