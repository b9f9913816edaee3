//! Signaling message types exchanged with the streaming server

use crate::peer::ice::IceCandidate;
use crate::sdp::{SdpType, SessionDescription};
use crate::stats::AggregatedStats;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One message on the signaling channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SignalMessage {
    /// SDP offer
    Offer { sdp: String },

    /// SDP answer
    Answer { sdp: String },

    /// Trickled ICE candidate
    IceCandidate { candidate: IceCandidate },

    /// Aggregated connection statistics
    Stats { data: AggregatedStats },
}

impl SignalMessage {
    /// Serialize to JSON text
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize signal message: {}", e))
        })
    }

    /// Parse from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::SerializationError(format!("Failed to parse signal message: {}", e))
        })
    }

    /// Message type tag as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::IceCandidate { .. } => "iceCandidate",
            SignalMessage::Stats { .. } => "stats",
        }
    }

    /// The carried description, for `offer` and `answer`
    pub fn session_description(&self) -> Option<SessionDescription> {
        match self {
            SignalMessage::Offer { sdp } => Some(SessionDescription::offer(sdp.clone())),
            SignalMessage::Answer { sdp } => Some(SessionDescription::answer(sdp.clone())),
            _ => None,
        }
    }
}

impl TryFrom<SessionDescription> for SignalMessage {
    type Error = Error;

    fn try_from(description: SessionDescription) -> Result<Self> {
        match description.sdp_type {
            SdpType::Offer => Ok(SignalMessage::Offer {
                sdp: description.sdp,
            }),
            SdpType::Answer => Ok(SignalMessage::Answer {
                sdp: description.sdp,
            }),
            other => Err(Error::SignalingError(format!(
                "Cannot signal a {} description",
                other
            ))),
        }
    }
}

impl From<IceCandidate> for SignalMessage {
    fn from(candidate: IceCandidate) -> Self {
        SignalMessage::IceCandidate { candidate }
    }
}

impl From<AggregatedStats> for SignalMessage {
    fn from(data: AggregatedStats) -> Self {
        SignalMessage::Stats { data }
    }
}
