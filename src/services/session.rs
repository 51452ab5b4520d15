//! Single in-flight session guard
//!
//! `SessionGate` holds the orchestrator state on a watch channel. A press
//! source calls `try_begin()`; the returned `SessionPermit` keeps the state at
//! `Busy` until it is dropped. Whoever holds the permit last (the session task,
//! or the unlock task it hands the permit to) returns the gate to `Idle`.

use crate::domain::types::OrchestratorState;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

#[derive(Clone)]
pub struct SessionGate {
    state_tx: Arc<watch::Sender<OrchestratorState>>,
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionGate {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(OrchestratorState::Idle);
        Self { state_tx: Arc::new(state_tx) }
    }

    /// Move Idle -> Busy. Returns None if a session is already in flight.
    pub fn try_begin(&self) -> Option<SessionPermit> {
        let began = self.state_tx.send_if_modified(|state| {
            if *state == OrchestratorState::Idle {
                *state = OrchestratorState::Busy;
                true
            } else {
                false
            }
        });

        if began {
            debug!("session_gate_busy");
            Some(SessionPermit { gate: self.clone() })
        } else {
            None
        }
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state_tx.borrow()
    }

    pub fn is_busy(&self) -> bool {
        self.state() == OrchestratorState::Busy
    }

    pub fn subscribe(&self) -> watch::Receiver<OrchestratorState> {
        self.state_tx.subscribe()
    }

    /// Resolve once no session is in flight
    pub async fn wait_idle(&self) {
        let mut rx = self.subscribe();
        // The sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|state| *state == OrchestratorState::Idle).await;
    }
}

/// Proof that a session is in flight. Dropping it returns the gate to Idle.
pub struct SessionPermit {
    gate: SessionGate,
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.gate.state_tx.send_replace(OrchestratorState::Idle);
        debug!("session_gate_idle");
    }
}

impl std::fmt::Debug for SessionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionPermit")
    }
}
