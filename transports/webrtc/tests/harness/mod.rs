//! Negotiation test harness
//!
//! Provides:
//! - `FakePeerConnection`: in-memory `PeerConnectionHandle` that records every call
//! - `FakeCapture`: scripted microphone outcomes
//! - `LogCapture`: collects formatted tracing output for assertions
//!
//! Basic usage pattern:
//!
//! 1. Create a `FakePeerConnection` (optionally scripting failures or stats)
//! 2. Build a controller or session over it with `build_with_handle`
//! 3. Drive negotiation and assert on `calls()` / observer events

#![allow(dead_code)]

pub mod fake_capture;
pub mod fake_peer;
pub mod log_capture;

pub use fake_capture::{CaptureMode, FakeCapture};
pub use fake_peer::FakePeerConnection;
pub use log_capture::LogCapture;

use std::time::Duration;
use streamclient_webrtc::{ControllerEvent, IceCandidate};
use tokio::sync::mpsc;

/// Offer as a browser would produce it: H.264 video plus Opus audio
pub const CANNED_OFFER_SDP: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 102\r\n\
a=mid:0\r\n\
a=recvonly\r\n\
a=rtpmap:102 H264/90000\r\n\
a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=mid:1\r\n\
a=sendrecv\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n";

/// Answer with the same media sections
pub const CANNED_ANSWER_SDP: &str = "v=0\r\n\
o=- 8392013357172946112 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 102\r\n\
a=mid:0\r\n\
a=recvonly\r\n\
a=rtpmap:102 H264/90000\r\n\
a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=mid:1\r\n\
a=recvonly\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n";

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,streamclient_webrtc=debug")
        .with_test_writer()
        .try_init();
}

pub fn host_candidate(port: u16) -> IceCandidate {
    IceCandidate::new(format!(
        "candidate:1 1 udp 2122260223 192.168.1.10 {} typ host",
        port
    ))
    .with_mid("0", 0)
}

pub fn relay_candidate(port: u16) -> IceCandidate {
    IceCandidate::new(format!(
        "candidate:3 1 udp 41885439 203.0.113.7 {} typ relay raddr 0.0.0.0 rport 0",
        port
    ))
    .with_mid("0", 0)
}

/// Drain whatever events are already queued
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<ControllerEvent>) -> Vec<ControllerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

/// Wait for the next event, failing the test on timeout
pub async fn next_event(
    rx: &mut mpsc::UnboundedReceiver<ControllerEvent>,
    timeout: Duration,
) -> ControllerEvent {
    tokio::time::timeout(timeout, rx.recv())
        .await
        .expect("timed out waiting for controller event")
        .expect("event channel closed")
}
