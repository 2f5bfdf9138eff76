//! Quorum tracking over agents and semaphores.
//!
//! The coordinator counts which participants still owe the current
//! tick a report. Agents report by getting an action admitted;
//! semaphores report by being signaled. When every active agent has a
//! pending action and every semaphore is signaled, the tick may run.
//!
//! Semaphores stay signaled across tick boundaries until explicitly
//! unsignaled, so a host that gates ticking on an external condition
//! signals once and lowers the gate only when it wants to stall the
//! world again. Quorum is evaluated only on report events — a world
//! whose sole participants are signaled semaphores does not free-run.

use std::sync::Mutex;

use indexmap::IndexMap;

/// Snapshot of the coordinator's bookkeeping, used by the snapshot
/// codec.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoordinatorState {
    /// Agents with an admitted action this tick.
    pub acted_agents: u64,
    /// Active agents expected to report.
    pub expected_agents: u64,
    /// Semaphore table: id → signaled.
    pub semaphores: Vec<(u64, bool)>,
    /// Next semaphore id to allocate.
    pub next_semaphore_id: u64,
}

#[derive(Debug, Default)]
struct Inner {
    acted_agents: u64,
    expected_agents: u64,
    semaphores: IndexMap<u64, bool>,
    next_semaphore_id: u64,
}

impl Inner {
    fn quorum(&self) -> bool {
        let has_responders = self.expected_agents > 0 || !self.semaphores.is_empty();
        has_responders
            && self.acted_agents == self.expected_agents
            && self.semaphores.values().all(|&signaled| signaled)
    }
}

/// The coordinator. All state behind one mutex; every method is a
/// short critical section.
#[derive(Debug)]
pub struct Coordinator {
    inner: Mutex<Inner>,
}

impl Coordinator {
    /// A coordinator with no participants.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_semaphore_id: 1,
                ..Inner::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned coordinator cannot be repaired meaningfully;
        // recover the data and continue.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new active agent.
    pub fn add_agent(&self) {
        self.lock().expected_agents += 1;
    }

    /// Remove an agent's obligation. `had_pending` reflects whether it
    /// had already reported this tick, `was_active` whether it was
    /// counted at all. Returns whether quorum is now reached.
    pub fn remove_agent(&self, was_active: bool, had_pending: bool) -> bool {
        let mut inner = self.lock();
        if was_active {
            inner.expected_agents = inner.expected_agents.saturating_sub(1);
            if had_pending {
                inner.acted_agents = inner.acted_agents.saturating_sub(1);
            }
        }
        inner.quorum()
    }

    /// Record that an agent's action was admitted. Returns whether
    /// quorum is now reached.
    pub fn agent_acted(&self) -> bool {
        let mut inner = self.lock();
        inner.acted_agents += 1;
        inner.quorum()
    }

    /// Re-include an agent in the expected set (activation).
    pub fn activate_agent(&self) {
        self.lock().expected_agents += 1;
    }

    /// Exclude an agent from the expected set (deactivation),
    /// dropping its pending report if it had one. Returns whether
    /// quorum is now reached.
    pub fn deactivate_agent(&self, had_pending: bool) -> bool {
        self.remove_agent(true, had_pending)
    }

    /// Allocate a semaphore. A fresh semaphore is unsignaled and
    /// immediately gates ticking.
    pub fn add_semaphore(&self) -> u64 {
        let mut inner = self.lock();
        let id = inner.next_semaphore_id;
        inner.next_semaphore_id += 1;
        inner.semaphores.insert(id, false);
        id
    }

    /// Remove a semaphore. Returns `Ok(quorum_reached)`, or `Err(())`
    /// for an unknown id.
    pub fn remove_semaphore(&self, id: u64) -> Result<bool, ()> {
        let mut inner = self.lock();
        if inner.semaphores.shift_remove(&id).is_none() {
            return Err(());
        }
        Ok(inner.quorum())
    }

    /// Signal a semaphore. Returns `Ok(quorum_reached)`, or `Err(())`
    /// for an unknown id.
    pub fn signal_semaphore(&self, id: u64) -> Result<bool, ()> {
        let mut inner = self.lock();
        match inner.semaphores.get_mut(&id) {
            Some(signaled) => {
                *signaled = true;
                Ok(inner.quorum())
            }
            None => Err(()),
        }
    }

    /// Lower a semaphore, stalling subsequent ticks until it is
    /// signaled again. Returns `Err(())` for an unknown id.
    pub fn unsignal_semaphore(&self, id: u64) -> Result<(), ()> {
        let mut inner = self.lock();
        match inner.semaphores.get_mut(&id) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(()),
        }
    }

    /// Current semaphore table, in allocation order.
    pub fn semaphores(&self) -> Vec<(u64, bool)> {
        self.lock()
            .semaphores
            .iter()
            .map(|(&id, &signaled)| (id, signaled))
            .collect()
    }

    /// Re-arm for the next tick: agents owe a fresh report, semaphores
    /// keep their signaled state.
    pub fn reset_tick(&self) {
        self.lock().acted_agents = 0;
    }

    /// Export the full state for snapshots.
    pub fn export(&self) -> CoordinatorState {
        let inner = self.lock();
        CoordinatorState {
            acted_agents: inner.acted_agents,
            expected_agents: inner.expected_agents,
            semaphores: inner
                .semaphores
                .iter()
                .map(|(&id, &signaled)| (id, signaled))
                .collect(),
            next_semaphore_id: inner.next_semaphore_id,
        }
    }

    /// Restore from a snapshot.
    pub fn restore(&self, state: &CoordinatorState) {
        let mut inner = self.lock();
        inner.acted_agents = state.acted_agents;
        inner.expected_agents = state.expected_agents;
        inner.semaphores = state.semaphores.iter().copied().collect();
        inner.next_semaphore_id = state.next_semaphore_id;
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_coordinator_has_no_quorum() {
        let coord = Coordinator::new();
        // No responders at all: nothing can report, nothing steps.
        assert!(!coord.lock().quorum());
    }

    #[test]
    fn single_agent_quorum() {
        let coord = Coordinator::new();
        coord.add_agent();
        assert!(coord.agent_acted());
    }

    #[test]
    fn semaphore_gates_agent_quorum() {
        let coord = Coordinator::new();
        coord.add_agent();
        let sem = coord.add_semaphore();
        assert!(!coord.agent_acted(), "unsignaled semaphore must stall");
        assert_eq!(coord.signal_semaphore(sem), Ok(true));
    }

    #[test]
    fn signal_then_act_is_equivalent() {
        let coord = Coordinator::new();
        coord.add_agent();
        let sem = coord.add_semaphore();
        assert_eq!(coord.signal_semaphore(sem), Ok(false));
        assert!(coord.agent_acted());
    }

    #[test]
    fn semaphores_stay_signaled_across_ticks() {
        let coord = Coordinator::new();
        coord.add_agent();
        let sem = coord.add_semaphore();
        coord.signal_semaphore(sem).unwrap();
        assert!(coord.agent_acted());
        coord.reset_tick();
        // Next tick: only the agent owes a report.
        assert!(coord.agent_acted());
    }

    #[test]
    fn unsignal_stalls_again() {
        let coord = Coordinator::new();
        coord.add_agent();
        let sem = coord.add_semaphore();
        coord.signal_semaphore(sem).unwrap();
        coord.unsignal_semaphore(sem).unwrap();
        assert!(!coord.agent_acted());
    }

    #[test]
    fn removing_last_laggard_reaches_quorum() {
        let coord = Coordinator::new();
        coord.add_agent();
        coord.add_agent();
        assert!(!coord.agent_acted());
        // The second agent disconnects without acting.
        assert!(coord.remove_agent(true, false));
    }

    #[test]
    fn unknown_semaphore_is_rejected() {
        let coord = Coordinator::new();
        assert_eq!(coord.signal_semaphore(99), Err(()));
        assert_eq!(coord.remove_semaphore(99), Err(()));
        assert_eq!(coord.unsignal_semaphore(99), Err(()));
    }

    #[test]
    fn export_restore_round_trips() {
        let coord = Coordinator::new();
        coord.add_agent();
        let sem = coord.add_semaphore();
        coord.signal_semaphore(sem).unwrap();

        let state = coord.export();
        let other = Coordinator::new();
        other.restore(&state);
        assert_eq!(other.export(), state);
    }
}
