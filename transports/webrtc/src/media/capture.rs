//! Local audio capture
//!
//! Capture is the one negotiation step that may suspend on a user prompt, so
//! it sits behind [`MediaCapture`]. A failed or empty capture never aborts
//! negotiation; the controller degrades to receive-only audio.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Constraints passed to the capture device
#[derive(Debug, Clone, PartialEq)]
pub struct AudioCaptureConstraints {
    pub auto_gain_control: bool,
    pub channel_count: u16,
    pub echo_cancellation: bool,
    /// Target latency in seconds
    pub latency: f64,
    pub noise_suppression: bool,
    pub sample_rate: u32,
    pub sample_size: u16,
    pub volume: f64,
}

impl Default for AudioCaptureConstraints {
    /// Mono 48 kHz 16-bit, all processing disabled, zero latency
    fn default() -> Self {
        Self {
            auto_gain_control: false,
            channel_count: 1,
            echo_cancellation: false,
            latency: 0.0,
            noise_suppression: false,
            sample_rate: 48_000,
            sample_size: 16,
            volume: 1.0,
        }
    }
}

/// A captured microphone stream, sent as Opus over RTP
#[derive(Clone)]
pub struct LocalAudioTrack {
    track: Arc<TrackLocalStaticSample>,
    id: String,
    stream_id: String,
    sample_rate: u32,
    channels: u16,
}

impl LocalAudioTrack {
    /// Build an Opus sample track honouring the constraints' rate and channel count
    pub fn new(constraints: &AudioCaptureConstraints, stream_id: impl Into<String>) -> Self {
        let stream_id = stream_id.into();
        let id = format!("mic-{}", uuid::Uuid::new_v4());
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: constraints.sample_rate,
                channels: constraints.channel_count,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            id.clone(),
            stream_id.clone(),
        ));

        Self {
            track,
            id,
            stream_id,
            sample_rate: constraints.sample_rate,
            channels: constraints.channel_count,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Get the underlying WebRTC track
    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    /// The track as accepted by senders and transceivers
    pub fn as_track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.track) as Arc<dyn TrackLocal + Send + Sync>
    }

    /// Write one encoded Opus frame
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<()> {
        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };

        self.track
            .write_sample(&sample)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to write audio sample: {}", e)))
    }
}

impl std::fmt::Debug for LocalAudioTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAudioTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish()
    }
}

/// Source of local audio
///
/// `Ok(None)` means the device produced no stream; `Err` means the request
/// was refused. Both downgrade the session to receive-only audio.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn capture_audio(
        &self,
        constraints: &AudioCaptureConstraints,
    ) -> Result<Option<LocalAudioTrack>>;
}

/// No capture device available
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCapture;

#[async_trait]
impl MediaCapture for NoCapture {
    async fn capture_audio(
        &self,
        _constraints: &AudioCaptureConstraints,
    ) -> Result<Option<LocalAudioTrack>> {
        Ok(None)
    }
}

/// Hands out a fresh Opus sample track; the application feeds it encoded frames
#[derive(Debug, Clone)]
pub struct SampleTrackCapture {
    stream_id: String,
}

impl SampleTrackCapture {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }
}

impl Default for SampleTrackCapture {
    fn default() -> Self {
        Self::new(format!("stream-{}", uuid::Uuid::new_v4()))
    }
}

#[async_trait]
impl MediaCapture for SampleTrackCapture {
    async fn capture_audio(
        &self,
        constraints: &AudioCaptureConstraints,
    ) -> Result<Option<LocalAudioTrack>> {
        if constraints.channel_count == 0 || constraints.sample_rate == 0 {
            return Err(Error::CaptureError(format!(
                "Unsupported capture format: {} Hz, {} channels",
                constraints.sample_rate, constraints.channel_count
            )));
        }

        let track = LocalAudioTrack::new(constraints, self.stream_id.clone());
        debug!(
            track_id = %track.id(),
            sample_rate = track.sample_rate(),
            channels = track.channels(),
            "Opened local audio track"
        );
        Ok(Some(track))
    }
}
