//! Error types for the WebRTC negotiation core

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or maintaining a peer connection
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// SDP negotiation error (offer/answer creation or description commit)
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Media track or transceiver error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Local capture device could not be opened
    #[error("Capture error: {0}")]
    CaptureError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// A negotiation is already in flight on this connection
    #[error("Negotiation already in progress")]
    NegotiationInProgress,

    /// The peer connection has been closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Signaling collaborator rejected or failed to deliver a message
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Operation not valid in the current signaling phase
    #[error("Invalid negotiation state: {0}")]
    InvalidState(String),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if issuing a fresh negotiation may succeed after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SdpError(_)
                | Error::IceCandidateError(_)
                | Error::SignalingError(_)
                | Error::NegotiationInProgress
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error is a peer-related error
    pub fn is_peer_error(&self) -> bool {
        matches!(
            self,
            Error::PeerConnectionError(_)
                | Error::IceCandidateError(_)
                | Error::SdpError(_)
                | Error::ConnectionClosed
        )
    }

    /// Check if this error only reports that the connection is gone
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed)
    }
}
