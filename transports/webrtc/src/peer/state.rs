//! Negotiation state tracked by the controller

use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Single-slot negotiation token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationState {
    #[default]
    Idle,
    /// An offer or answer is being produced, or a sent offer awaits its answer
    Negotiating,
    Connected,
    Closed,
}

/// Signaling-side progress of the current exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalingPhase {
    #[default]
    Idle,
    OfferCreated,
    LocalDescriptionSet,
    AnswerReceived,
    RemoteOfferReceived,
    RemoteDescriptionSet,
    AnswerCreated,
    Connected,
    Closed,
}

/// Lifecycle of the local or remote description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DescriptionState {
    #[default]
    Absent,
    Proposed,
    Committed,
}

/// Mutable bookkeeping, guarded by one lock that is never held across `.await`
#[derive(Debug, Default)]
pub(crate) struct ControllerState {
    pub negotiation: NegotiationState,
    pub phase: SignalingPhase,
    pub local: DescriptionState,
    pub remote: DescriptionState,
}

impl ControllerState {
    pub fn set_phase(&mut self, phase: SignalingPhase) {
        if self.negotiation == NegotiationState::Closed && phase != SignalingPhase::Closed {
            return;
        }
        if self.phase != phase {
            debug!("Signaling phase transition: {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }
}

/// Held for the duration of `create_offer` / `receive_offer`.
///
/// Dropping the guard without calling [`finish`](Self::finish) returns the
/// token to `Idle`, so a failed attempt can be retried by the caller.
pub(crate) struct NegotiationGuard {
    state: Arc<Mutex<ControllerState>>,
    armed: bool,
}

impl NegotiationGuard {
    /// Take the token, failing fast when another negotiation holds it
    pub fn acquire(state: &Arc<Mutex<ControllerState>>) -> Result<Self> {
        let mut guard = state.lock();
        match guard.negotiation {
            NegotiationState::Closed => Err(Error::ConnectionClosed),
            NegotiationState::Negotiating => Err(Error::NegotiationInProgress),
            NegotiationState::Idle | NegotiationState::Connected => {
                guard.negotiation = NegotiationState::Negotiating;
                Ok(Self {
                    state: Arc::clone(state),
                    armed: true,
                })
            }
        }
    }

    /// Release the token into `next`; no-op once the controller is closed
    pub fn finish(mut self, next: NegotiationState) {
        let mut guard = self.state.lock();
        if guard.negotiation == NegotiationState::Negotiating {
            guard.negotiation = next;
        }
        self.armed = false;
    }
}

impl Drop for NegotiationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut guard = self.state.lock();
        if guard.negotiation == NegotiationState::Negotiating {
            debug!("Negotiation attempt failed; releasing token");
            guard.negotiation = NegotiationState::Idle;
        }
    }
}
