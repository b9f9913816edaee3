//! Client-side WebRTC negotiation core for streamed video/audio sessions
//!
//! This crate negotiates one peer connection per session with a streaming
//! server: it sets up receive-only video and optional microphone audio,
//! rewrites the outgoing SDP with bitrate and Opus hints, applies trickled
//! ICE candidates (optionally relay-only), and reduces connection statistics
//! into a compact per-poll summary.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  StreamSession                                       │
//! │  ├─ SignalingSink  (offer / answer / ICE / stats out)│
//! │  ├─ SharedConfig   (ForceTURN, UseMic, ...)          │
//! │  └─ PeerConnectionController                         │
//! │     ├─ transceiver setup + MediaCapture              │
//! │     ├─ SDP rewrite (bitrate, Opus)                   │
//! │     ├─ ICE relay policy + early candidate queue      │
//! │     ├─ StatsAggregator                               │
//! │     └─ PeerConnectionHandle (webrtc-rs)              │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use streamclient_webrtc::{PeerConnectionOptions, SessionConfig};
//!
//! let options = PeerConnectionOptions::default().with_bitrates(10_000, 100_000);
//! assert!(options.validate().is_ok());
//!
//! let config = SessionConfig::default().with_use_mic(true);
//! assert!(!config.force_turn);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use streamclient_webrtc::{SignalMessage, StreamSession};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> streamclient_webrtc::Result<()> {
//! let (tx, mut rx) = mpsc::unbounded_channel::<SignalMessage>();
//! let session = StreamSession::builder(Arc::new(tx)).build().await?;
//!
//! session.start().await?;
//! while let Some(message) = rx.recv().await {
//!     println!("{}", message.to_json()?);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod observer;
pub mod peer;
pub mod sdp;
pub mod session;
pub mod signaling;
pub mod stats;

pub use config::{
    PageContext, PeerConnectionOptions, SessionConfig, SharedConfig, SignallingEndpoint,
    TurnServerConfig,
};
pub use error::{Error, Result};
pub use media::{
    AudioCaptureConstraints, LocalAudioTrack, MediaCapture, NoCapture, SampleTrackCapture,
};
pub use observer::{ChannelObserver, ControllerEvent, NegotiationObserver, NoopObserver};
pub use peer::{
    DescriptionState, IceCandidate, NegotiationState, OfferOptions, PeerConnectionController,
    PeerConnectionHandle, SignalingPhase, WebRtcHandle,
};
pub use sdp::{rewrite_sdp, SdpPolicy, SdpType, SessionDescription};
pub use session::{SignalingSink, StreamSession};
pub use signaling::SignalMessage;
pub use stats::{AggregatedStats, RawStatsReport, StatsAggregator};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
