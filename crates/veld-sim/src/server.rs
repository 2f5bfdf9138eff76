//! The multi-client RPC contract: requests, responses, per-client
//! permissions, and the step broadcast.
//!
//! Transport is out of scope — a host wires [`Server::handle`] to its
//! own framing and drains each client's event channel into its
//! connection. Everything protocol-visible lives in the [`Request`],
//! [`Response`], and [`ServerEvent`] enums.
//!
//! Lock discipline: the client table lock is never held across a
//! simulator call. The step broadcast (which runs under the simulator
//! lock) takes only the client table lock, so the two locks are
//! always acquired in a consistent order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crossbeam_channel::{Receiver, Sender};
use indexmap::IndexMap;

use veld_core::action::{Action, ActionError};
use veld_core::direction::Direction;
use veld_core::error::StepError;
use veld_core::position::Position;
use veld_core::status::Status;

use crate::agent::AgentState;
use crate::simulator::{PatchState, SemaphoreError, Simulator};

/// Identifies a connected client.
pub type ClientId = u64;

/// Per-client capability flags, set by the host at connect time.
///
/// A denied call returns [`Status::PermissionDenied`] without mutating
/// any state. Action calls (`move`/`turn`/`no_op`) are not permission
/// gated but require the client to own the agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Permissions {
    pub add_agent: bool,
    pub remove_agent: bool,
    pub remove_client: bool,
    pub set_active: bool,
    pub get_map: bool,
    pub get_agent_ids: bool,
    pub get_agent_states: bool,
    pub manage_semaphores: bool,
    pub get_semaphores: bool,
}

impl Permissions {
    /// Every capability granted.
    pub fn all() -> Self {
        Self {
            add_agent: true,
            remove_agent: true,
            remove_client: true,
            set_active: true,
            get_map: true,
            get_agent_ids: true,
            get_agent_states: true,
            manage_semaphores: true,
            get_semaphores: true,
        }
    }

    /// No capability granted; the client can only drive agents it is
    /// handed out-of-band.
    pub fn none() -> Self {
        Self {
            add_agent: false,
            remove_agent: false,
            remove_client: false,
            set_active: false,
            get_map: false,
            get_agent_ids: false,
            get_agent_states: false,
            manage_semaphores: false,
            get_semaphores: false,
        }
    }
}

/// A client request.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    /// Create an agent owned by the calling client.
    AddAgent,
    /// Remove an agent.
    RemoveAgent {
        /// The agent to remove.
        agent_id: u64,
    },
    /// Allocate a semaphore.
    AddSemaphore,
    /// Remove a semaphore.
    RemoveSemaphore {
        /// The semaphore to remove.
        semaphore_id: u64,
    },
    /// Signal a semaphore.
    SignalSemaphore {
        /// The semaphore to signal.
        semaphore_id: u64,
    },
    /// List semaphores and their signaled state.
    GetSemaphores,
    /// Request a move for an owned agent.
    Move {
        /// The acting agent.
        agent_id: u64,
        /// Agent-relative movement direction.
        direction: Direction,
        /// Step count.
        steps: u32,
    },
    /// Request a turn for an owned agent.
    Turn {
        /// The acting agent.
        agent_id: u64,
        /// Agent-relative turn.
        direction: Direction,
    },
    /// Consume an owned agent's tick.
    NoOp {
        /// The acting agent.
        agent_id: u64,
    },
    /// Read the materialized patches intersecting a rectangle.
    GetMap {
        /// Bottom-left world cell (inclusive).
        bottom_left: Position,
        /// Top-right world cell (inclusive).
        top_right: Position,
        /// Include scent tensors.
        want_scent: bool,
        /// Include per-cell color rasters.
        want_vision: bool,
    },
    /// List all agent ids.
    GetAgentIds,
    /// Read the states of specific agents.
    GetAgentStates {
        /// The agents to read; unknown ids yield `None`.
        agent_ids: Vec<u64>,
    },
    /// Activate or deactivate an agent.
    SetActive {
        /// The target agent.
        agent_id: u64,
        /// The new active flag.
        active: bool,
    },
    /// Read an agent's active flag.
    IsActive {
        /// The target agent.
        agent_id: u64,
    },
}

/// A response to one [`Request`].
///
/// Invalid semaphore ids surface as [`Status::InvalidAgentId`] — the
/// closed status set has a single unknown-id code.
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    /// The call failed with a protocol-level status.
    Error(Status),
    /// The call succeeded with no payload.
    Ok,
    /// Agent created.
    AgentAdded(AgentState),
    /// Semaphore allocated.
    SemaphoreAdded(u64),
    /// Semaphore table.
    Semaphores(Vec<(u64, bool)>),
    /// An action was rejected at admission.
    ActionRejected(ActionError),
    /// `get_map` result.
    MapChunk(Vec<PatchState>),
    /// All agent ids.
    AgentIds(Vec<u64>),
    /// Requested agent states; `None` for unknown ids.
    AgentStates(Vec<Option<AgentState>>),
    /// An agent's active flag.
    Active(bool),
}

/// A server-initiated message on a client's event channel.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    /// A tick completed; carries the post-step agent states.
    Step {
        /// The completed tick.
        tick: u64,
        /// Post-step agent states, ascending by id.
        agents: Vec<AgentState>,
    },
    /// A tick failed and was rolled back.
    StepFailed(StepError),
    /// The connection is being closed by the server.
    LostConnection,
}

struct ClientEntry {
    permissions: Permissions,
    sender: Sender<ServerEvent>,
    agents: Vec<u64>,
}

struct ServerInner {
    sim: Arc<Simulator>,
    clients: Mutex<IndexMap<ClientId, ClientEntry>>,
    next_client_id: AtomicU64,
}

/// The in-process RPC server wrapping one simulator.
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Wrap a simulator and register the step broadcast.
    pub fn new(sim: Arc<Simulator>) -> Self {
        let inner = Arc::new(ServerInner {
            sim: Arc::clone(&sim),
            clients: Mutex::new(IndexMap::new()),
            next_client_id: AtomicU64::new(1),
        });
        let weak: Weak<ServerInner> = Arc::downgrade(&inner);
        sim.on_step(move |event| {
            let Some(inner) = weak.upgrade() else { return };
            let message = match event {
                Ok(outcome) => ServerEvent::Step {
                    tick: outcome.tick,
                    agents: outcome.agents.clone(),
                },
                Err(error) => ServerEvent::StepFailed(error.clone()),
            };
            if let Ok(clients) = inner.clients.lock() {
                for entry in clients.values() {
                    let _ = entry.sender.send(message.clone());
                }
            };
        });
        Self { inner }
    }

    /// Register a client with the given permissions. Returns its id
    /// and the receiving end of its event channel.
    pub fn connect(&self, permissions: Permissions) -> (ClientId, Receiver<ServerEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = self.inner.next_client_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut clients) = self.inner.clients.lock() {
            clients.insert(
                id,
                ClientEntry {
                    permissions,
                    sender: tx,
                    agents: Vec::new(),
                },
            );
        }
        (id, rx)
    }

    /// Drop a client.
    ///
    /// Each of its active agents without a pending action counts as a
    /// no-op for the current tick, so the remaining participants are
    /// not stalled by the departure; inactive agents are already
    /// excluded from quorum.
    pub fn disconnect(&self, client: ClientId) {
        let owned = match self.inner.clients.lock() {
            Ok(mut clients) => clients
                .shift_remove(&client)
                .map(|entry| entry.agents)
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        for agent_id in owned {
            let pending = self
                .inner
                .sim
                .agent_states(&[agent_id])
                .pop()
                .flatten()
                .map(|state| !state.active || state.requested_action.is_some())
                .unwrap_or(true);
            if !pending {
                // Bypasses the no-op policy: this is the server
                // releasing an obligation, not an agent action.
                let _ = self.inner.sim.submit_action(agent_id, Action::NoOp);
            }
        }
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.inner
            .clients
            .lock()
            .map(|clients| clients.len())
            .unwrap_or(0)
    }

    /// Dispatch one request on behalf of `client`.
    pub fn handle(&self, client: ClientId, request: Request) -> Response {
        // Copy what we need and release the table lock before touching
        // the simulator.
        let (permissions, owns) = {
            let Ok(clients) = self.inner.clients.lock() else {
                return Response::Error(Status::ServerOutOfMemory);
            };
            let Some(entry) = clients.get(&client) else {
                return Response::Error(Status::PermissionDenied);
            };
            let owns: Vec<u64> = entry.agents.clone();
            (entry.permissions, owns)
        };
        let sim = &self.inner.sim;

        match request {
            Request::AddAgent => {
                if !permissions.add_agent {
                    return Response::Error(Status::PermissionDenied);
                }
                match sim.add_agent() {
                    Ok(state) => {
                        if let Ok(mut clients) = self.inner.clients.lock() {
                            if let Some(entry) = clients.get_mut(&client) {
                                entry.agents.push(state.id);
                            }
                        }
                        Response::AgentAdded(state)
                    }
                    Err(StepError::OutOfMemory) => {
                        Response::Error(Status::ServerOutOfMemory)
                    }
                    Err(_) => Response::Error(Status::ServerParseMessageError),
                }
            }
            Request::RemoveAgent { agent_id } => {
                if !permissions.remove_agent {
                    return Response::Error(Status::PermissionDenied);
                }
                match sim.remove_agent(agent_id) {
                    Ok(()) => Response::Ok,
                    Err(_) => Response::Error(Status::InvalidAgentId),
                }
            }
            Request::AddSemaphore => {
                if !permissions.manage_semaphores {
                    return Response::Error(Status::PermissionDenied);
                }
                Response::SemaphoreAdded(sim.add_semaphore())
            }
            Request::RemoveSemaphore { semaphore_id } => {
                if !permissions.manage_semaphores {
                    return Response::Error(Status::PermissionDenied);
                }
                match sim.remove_semaphore(semaphore_id) {
                    Ok(()) => Response::Ok,
                    Err(SemaphoreError::InvalidSemaphoreId) => {
                        Response::Error(Status::InvalidAgentId)
                    }
                }
            }
            Request::SignalSemaphore { semaphore_id } => {
                if !permissions.manage_semaphores {
                    return Response::Error(Status::PermissionDenied);
                }
                match sim.signal_semaphore(semaphore_id) {
                    Ok(()) => Response::Ok,
                    Err(SemaphoreError::InvalidSemaphoreId) => {
                        Response::Error(Status::InvalidAgentId)
                    }
                }
            }
            Request::GetSemaphores => {
                if !permissions.get_semaphores {
                    return Response::Error(Status::PermissionDenied);
                }
                Response::Semaphores(sim.semaphores())
            }
            Request::Move {
                agent_id,
                direction,
                steps,
            } => {
                if !owns.contains(&agent_id) {
                    return Response::Error(Status::InvalidAgentId);
                }
                match sim.move_agent(agent_id, direction, steps) {
                    Ok(()) => Response::Ok,
                    Err(error) => Response::ActionRejected(error),
                }
            }
            Request::Turn {
                agent_id,
                direction,
            } => {
                if !owns.contains(&agent_id) {
                    return Response::Error(Status::InvalidAgentId);
                }
                match sim.turn_agent(agent_id, direction) {
                    Ok(()) => Response::Ok,
                    Err(error) => Response::ActionRejected(error),
                }
            }
            Request::NoOp { agent_id } => {
                if !owns.contains(&agent_id) {
                    return Response::Error(Status::InvalidAgentId);
                }
                match sim.no_op(agent_id) {
                    Ok(()) => Response::Ok,
                    Err(error) => Response::ActionRejected(error),
                }
            }
            Request::GetMap {
                bottom_left,
                top_right,
                want_scent,
                want_vision,
            } => {
                if !permissions.get_map {
                    return Response::Error(Status::PermissionDenied);
                }
                Response::MapChunk(sim.get_map(bottom_left, top_right, want_scent, want_vision))
            }
            Request::GetAgentIds => {
                if !permissions.get_agent_ids {
                    return Response::Error(Status::PermissionDenied);
                }
                Response::AgentIds(sim.agent_ids())
            }
            Request::GetAgentStates { agent_ids } => {
                if !permissions.get_agent_states {
                    return Response::Error(Status::PermissionDenied);
                }
                Response::AgentStates(sim.agent_states(&agent_ids))
            }
            Request::SetActive { agent_id, active } => {
                if !permissions.set_active {
                    return Response::Error(Status::PermissionDenied);
                }
                match sim.set_active(agent_id, active) {
                    Ok(()) => Response::Ok,
                    Err(_) => Response::Error(Status::InvalidAgentId),
                }
            }
            Request::IsActive { agent_id } => match sim.is_active(agent_id) {
                Ok(active) => Response::Active(active),
                Err(_) => Response::Error(Status::InvalidAgentId),
            },
        }
    }

    /// Force-remove another client. Requires the `remove_client`
    /// permission; the target receives [`ServerEvent::LostConnection`]
    /// before its channel closes.
    pub fn remove_client(&self, caller: ClientId, target: ClientId) -> Response {
        let allowed = self
            .inner
            .clients
            .lock()
            .ok()
            .and_then(|clients| clients.get(&caller).map(|c| c.permissions.remove_client))
            .unwrap_or(false);
        if !allowed {
            return Response::Error(Status::PermissionDenied);
        }
        if let Ok(clients) = self.inner.clients.lock() {
            if let Some(entry) = clients.get(&target) {
                let _ = entry.sender.send(ServerEvent::LostConnection);
            } else {
                return Response::Error(Status::InvalidAgentId);
            }
        }
        self.disconnect(target);
        Response::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veld_core::config::{CollisionPolicy, SamplerKind, SimulatorConfig};
    use veld_core::item::{EnergySpec, ItemType};

    fn test_config() -> SimulatorConfig {
        SimulatorConfig {
            seed: 7,
            patch_size: 8,
            mcmc_iterations: 5,
            scent_dim: 1,
            color_dim: 1,
            vision_range: 1,
            max_steps_per_movement: 2,
            allowed_movement_directions: [true; 4],
            allowed_turn_directions: [true; 4],
            no_op_allowed: true,
            item_types: vec![ItemType {
                name: "berry".into(),
                scent: vec![1.0],
                color: vec![1.0],
                required_item_counts: vec![0],
                required_item_costs: vec![0],
                blocks_movement: false,
                visual_occlusion: 0.0,
                intensity: EnergySpec::new(1, vec![-4.0]),
                interactions: vec![EnergySpec::zero()],
                regeneration: EnergySpec::zero(),
                lifetime: 0,
            }],
            agent_color: vec![0.5],
            collision_policy: CollisionPolicy::FirstComeFirstServe,
            sampler: SamplerKind::MetropolisHastings,
            scent_decay: 0.5,
            scent_diffusion: 0.1,
            removed_item_lifetime: 4,
            field_of_view: std::f32::consts::TAU,
        }
    }

    fn server() -> Server {
        Server::new(Arc::new(Simulator::new(test_config()).unwrap()))
    }

    #[test]
    fn denied_call_does_not_mutate() {
        let server = server();
        let (client, _events) = server.connect(Permissions::none());
        let response = server.handle(client, Request::AddAgent);
        assert_eq!(response, Response::Error(Status::PermissionDenied));
        assert!(server.inner.sim.agent_ids().is_empty());
    }

    #[test]
    fn unknown_client_is_rejected() {
        let server = server();
        let response = server.handle(99, Request::GetAgentIds);
        assert_eq!(response, Response::Error(Status::PermissionDenied));
    }

    #[test]
    fn add_agent_and_step_broadcast() {
        let server = server();
        let (client, events) = server.connect(Permissions::all());

        let Response::AgentAdded(state) = server.handle(client, Request::AddAgent) else {
            panic!("add_agent failed");
        };
        let response = server.handle(
            client,
            Request::Move {
                agent_id: state.id,
                direction: Direction::Up,
                steps: 1,
            },
        );
        assert_eq!(response, Response::Ok);

        match events.try_recv().unwrap() {
            ServerEvent::Step { tick, agents } => {
                assert_eq!(tick, 1);
                assert_eq!(agents.len(), 1);
                assert_eq!(agents[0].position, Position::new(0, 1));
            }
            other => panic!("expected step event, got {other:?}"),
        }
    }

    #[test]
    fn clients_cannot_drive_foreign_agents() {
        let server = server();
        let (owner, _events_a) = server.connect(Permissions::all());
        let (other, _events_b) = server.connect(Permissions::all());

        let Response::AgentAdded(state) = server.handle(owner, Request::AddAgent) else {
            panic!("add_agent failed");
        };
        let response = server.handle(
            other,
            Request::NoOp {
                agent_id: state.id,
            },
        );
        assert_eq!(response, Response::Error(Status::InvalidAgentId));
    }

    #[test]
    fn disconnect_releases_tick_obligation() {
        let server = server();
        let (a, events_a) = server.connect(Permissions::all());
        let (b, _events_b) = server.connect(Permissions::all());

        let Response::AgentAdded(agent_a) = server.handle(a, Request::AddAgent) else {
            panic!("add_agent failed");
        };
        let Response::AgentAdded(_agent_b) = server.handle(b, Request::AddAgent) else {
            panic!("add_agent failed");
        };

        // Client a acts; the tick stalls on b's agent.
        server.handle(
            a,
            Request::Move {
                agent_id: agent_a.id,
                direction: Direction::Up,
                steps: 1,
            },
        );
        assert_eq!(server.inner.sim.current_tick(), 0);

        // b vanishes: its agent counts as no-op and the tick runs.
        server.disconnect(b);
        assert_eq!(server.inner.sim.current_tick(), 1);
        assert!(matches!(
            events_a.try_recv().unwrap(),
            ServerEvent::Step { tick: 1, .. }
        ));
    }

    #[test]
    fn remove_client_notifies_target() {
        let server = server();
        let (admin, _events_admin) = server.connect(Permissions::all());
        let (victim, events_victim) = server.connect(Permissions::none());

        assert_eq!(server.remove_client(admin, victim), Response::Ok);
        assert_eq!(
            events_victim.try_recv().unwrap(),
            ServerEvent::LostConnection
        );
        assert_eq!(server.client_count(), 1);
    }

    #[test]
    fn remove_client_requires_permission() {
        let server = server();
        let (weak_client, _events_a) = server.connect(Permissions::none());
        let (other, _events_b) = server.connect(Permissions::all());

        assert_eq!(
            server.remove_client(weak_client, other),
            Response::Error(Status::PermissionDenied)
        );
        assert_eq!(server.client_count(), 2);
    }

    #[test]
    fn semaphores_via_rpc() {
        let server = server();
        let (client, _events) = server.connect(Permissions::all());

        let Response::SemaphoreAdded(sem) = server.handle(client, Request::AddSemaphore)
        else {
            panic!("add_semaphore failed");
        };
        assert_eq!(
            server.handle(client, Request::GetSemaphores),
            Response::Semaphores(vec![(sem, false)])
        );
        assert_eq!(
            server.handle(client, Request::SignalSemaphore { semaphore_id: sem }),
            Response::Ok
        );
        assert_eq!(
            server.handle(client, Request::SignalSemaphore { semaphore_id: 99 }),
            Response::Error(Status::InvalidAgentId)
        );
    }
}
