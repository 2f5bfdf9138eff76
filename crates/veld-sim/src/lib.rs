//! Simulator orchestration for Veld.
//!
//! Provides [`Simulator`] as the primary user-facing API: agents and
//! semaphores register with the [`coordinator`], actions arrive
//! through the simulator's admission methods, and when every active
//! participant has reported, the stepper executes one lock-step tick
//! — conflict resolution, movement, patch materialization, item
//! pickup and regeneration, scent catch-up, and perception — then
//! broadcasts the result to registered step sinks. The [`server`]
//! module wraps a simulator in the multi-client RPC contract with
//! per-client permissions.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod agent;
pub mod coordinator;
pub mod metrics;
pub mod perception;
pub mod server;
pub mod simulator;
mod stepper;

pub use agent::{Agent, AgentState};
pub use coordinator::{Coordinator, CoordinatorState};
pub use metrics::StepMetrics;
pub use server::{ClientId, Permissions, Request, Response, Server, ServerEvent};
pub use simulator::{
    PatchState, SemaphoreError, Simulator, SimulatorState, StepEvent, StepOutcome,
};
