//! Outbound event surface of the controller
//!
//! Every hook has an empty default body; implement only the ones you need.

use crate::peer::handle::{InboundDataChannel, InboundTrack};
use crate::peer::ice::IceCandidate;
use crate::sdp::SessionDescription;
use crate::stats::AggregatedStats;
use tokio::sync::mpsc;
use tracing::trace;

pub trait NegotiationObserver: Send + Sync {
    /// Remote media track received
    fn on_track(&self, _track: &InboundTrack) {}

    /// Local ICE candidate discovered, ready to trickle to the remote end
    fn on_ice_candidate(&self, _candidate: &IceCandidate) {}

    /// Remote end opened a data channel
    fn on_data_channel(&self, _channel: &InboundDataChannel) {}

    /// Aggregated statistics from a poll
    fn on_stats(&self, _stats: &AggregatedStats) {}

    /// Committed local offer, ready for transmission
    fn on_offer_ready(&self, _offer: &SessionDescription) {}

    /// Committed local answer, ready for transmission
    fn on_answer_ready(&self, _answer: &SessionDescription) {}

    /// Offer created, connection underway (UI)
    fn on_connecting(&self) {}

    /// Offer creation failed (UI)
    fn on_setup_failed(&self) {}
}

/// Ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl NegotiationObserver for NoopObserver {}

/// Owned copy of one observer callback
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    Track(InboundTrack),
    IceCandidate(IceCandidate),
    DataChannel(InboundDataChannel),
    Stats(Box<AggregatedStats>),
    OfferReady(SessionDescription),
    AnswerReady(SessionDescription),
    Connecting,
    SetupFailed,
}

/// Forwards every callback onto an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ControllerEvent) {
        if self.tx.send(event).is_err() {
            trace!("Controller event receiver dropped");
        }
    }
}

impl NegotiationObserver for ChannelObserver {
    fn on_track(&self, track: &InboundTrack) {
        self.send(ControllerEvent::Track(track.clone()));
    }

    fn on_ice_candidate(&self, candidate: &IceCandidate) {
        self.send(ControllerEvent::IceCandidate(candidate.clone()));
    }

    fn on_data_channel(&self, channel: &InboundDataChannel) {
        self.send(ControllerEvent::DataChannel(channel.clone()));
    }

    fn on_stats(&self, stats: &AggregatedStats) {
        self.send(ControllerEvent::Stats(Box::new(stats.clone())));
    }

    fn on_offer_ready(&self, offer: &SessionDescription) {
        self.send(ControllerEvent::OfferReady(offer.clone()));
    }

    fn on_answer_ready(&self, answer: &SessionDescription) {
        self.send(ControllerEvent::AnswerReady(answer.clone()));
    }

    fn on_connecting(&self) {
        self.send(ControllerEvent::Connecting);
    }

    fn on_setup_failed(&self) {
        self.send(ControllerEvent::SetupFailed);
    }
}
