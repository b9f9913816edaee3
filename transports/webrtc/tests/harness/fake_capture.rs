//! Scripted microphone

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use streamclient_webrtc::{AudioCaptureConstraints, Error, LocalAudioTrack, MediaCapture, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Capture succeeds with a track
    Grant,
    /// Capture succeeds without a stream
    Empty,
    /// User refused the permission prompt
    Deny,
}

#[derive(Debug)]
pub struct FakeCapture {
    mode: CaptureMode,
    calls: AtomicUsize,
}

impl FakeCapture {
    pub fn new(mode: CaptureMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaCapture for FakeCapture {
    async fn capture_audio(
        &self,
        constraints: &AudioCaptureConstraints,
    ) -> Result<Option<LocalAudioTrack>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            CaptureMode::Grant => Ok(Some(LocalAudioTrack::new(constraints, "fake-mic-stream"))),
            CaptureMode::Empty => Ok(None),
            CaptureMode::Deny => Err(Error::CaptureError("NotAllowedError: permission denied".into())),
        }
    }
}
