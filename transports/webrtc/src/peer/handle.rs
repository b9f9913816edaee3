//! The transport object behind the controller
//!
//! [`PeerConnectionHandle`] is the narrow set of operations the controller
//! drives during negotiation. [`WebRtcHandle`](super::connection::WebRtcHandle)
//! implements it over webrtc-rs; tests drive the controller through an
//! in-memory implementation.

use crate::media::LocalAudioTrack;
use crate::peer::ice::IceCandidate;
use crate::sdp::SessionDescription;
use crate::stats::RawStatsReport;
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::track::track_remote::TrackRemote;

/// Media kind of a transceiver or track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// Negotiated direction of a media line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl fmt::Display for TransceiverDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransceiverDirection::SendRecv => "sendrecv",
            TransceiverDirection::SendOnly => "sendonly",
            TransceiverDirection::RecvOnly => "recvonly",
            TransceiverDirection::Inactive => "inactive",
        };
        f.write_str(s)
    }
}

/// Snapshot of one transceiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransceiverInfo {
    /// Position in the handle's transceiver list
    pub index: usize,
    pub kind: TrackKind,
    pub direction: TransceiverDirection,
    pub has_send_track: bool,
}

/// Options for offer creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OfferOptions {
    pub ice_restart: bool,
    pub voice_activity_detection: bool,
}

/// A remote media track announced by the handle
#[derive(Clone)]
pub struct InboundTrack {
    pub kind: TrackKind,
    pub ssrc: u32,
    pub track_id: String,
    pub stream_id: String,
    /// Underlying webrtc-rs track, absent for in-memory handles
    pub remote: Option<Arc<TrackRemote>>,
}

impl fmt::Debug for InboundTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundTrack")
            .field("kind", &self.kind)
            .field("ssrc", &self.ssrc)
            .field("track_id", &self.track_id)
            .field("stream_id", &self.stream_id)
            .finish()
    }
}

/// A data channel opened by the remote end
#[derive(Clone)]
pub struct InboundDataChannel {
    pub label: String,
    pub id: Option<u16>,
    /// Underlying webrtc-rs channel, absent for in-memory handles
    pub channel: Option<Arc<RTCDataChannel>>,
}

impl fmt::Debug for InboundDataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundDataChannel")
            .field("label", &self.label)
            .field("id", &self.id)
            .finish()
    }
}

/// Events raised by a handle
#[derive(Debug, Clone)]
pub enum HandleEvent {
    SignalingStateChange(RTCSignalingState),
    IceConnectionStateChange(RTCIceConnectionState),
    IceGatheringStateChange(RTCIceGathererState),
    Track(InboundTrack),
    /// `None` marks the end of gathering
    IceCandidate(Option<IceCandidate>),
    DataChannel(InboundDataChannel),
}

/// Callback installed once by the controller
pub type HandleEventHandler = Arc<dyn Fn(HandleEvent) + Send + Sync>;

/// The peer connection, as driven by negotiation
#[async_trait]
pub trait PeerConnectionHandle: Send + Sync {
    async fn create_offer(&self, options: &OfferOptions) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// The committed local description, if any
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Transceivers in creation order
    async fn transceivers(&self) -> Vec<TransceiverInfo>;

    /// Add a transceiver, optionally bound to a local audio track
    async fn add_transceiver(
        &self,
        kind: TrackKind,
        direction: TransceiverDirection,
        track: Option<LocalAudioTrack>,
    ) -> Result<TransceiverInfo>;

    /// Bind `track` as the send track of transceiver `index` and switch it to send-receive
    async fn attach_send_track(&self, index: usize, track: LocalAudioTrack) -> Result<()>;

    async fn set_transceiver_direction(
        &self,
        index: usize,
        direction: TransceiverDirection,
    ) -> Result<()>;

    async fn get_stats(&self) -> Result<RawStatsReport>;

    async fn close(&self) -> Result<()>;

    /// Route handle events to `handler`, replacing any previous handler
    fn set_event_handler(&self, handler: HandleEventHandler);
}
