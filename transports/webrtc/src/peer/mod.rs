//! Peer connection negotiation
//!
//! The controller sequences offer/answer and ICE over a [`PeerConnectionHandle`].

pub mod connection;
pub mod controller;
pub mod handle;
pub mod ice;
pub mod state;
pub mod transceivers;

pub use connection::WebRtcHandle;
pub use controller::{ControllerBuilder, PeerConnectionController};
pub use handle::{
    HandleEvent, HandleEventHandler, InboundDataChannel, InboundTrack, OfferOptions,
    PeerConnectionHandle, TrackKind, TransceiverDirection, TransceiverInfo,
};
pub use ice::{CandidateDescriptor, IceCandidate};
pub use state::{DescriptionState, NegotiationState, SignalingPhase};
pub use transceivers::{setup_transceivers, TransceiverSetup};
