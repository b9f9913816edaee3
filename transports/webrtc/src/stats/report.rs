//! Raw statistics snapshot as produced by the peer connection handle
//!
//! Records follow the W3C `RTCStats` dictionary shapes. Every field defaults so
//! a partially-populated snapshot still deserializes.

use serde::{Deserialize, Serialize};

/// One statistics poll
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawStatsReport {
    /// Milliseconds since the Unix epoch at which the snapshot was taken
    pub timestamp_ms: u64,
    pub records: Vec<StatsRecord>,
}

impl RawStatsReport {
    pub fn new(timestamp_ms: u64, records: Vec<StatsRecord>) -> Self {
        Self {
            timestamp_ms,
            records,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Media kind of an RTP stream record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StatsRecord {
    InboundRtp(InboundRtpRecord),
    OutboundRtp(OutboundRtpRecord),
    RemoteInboundRtp(RemoteInboundRtpRecord),
    CandidatePair(CandidatePairRecord),
    LocalCandidate(CandidateRecord),
    RemoteCandidate(CandidateRecord),
    DataChannel(DataChannelRecord),
    Codec(CodecRecord),
    Transport(TransportRecord),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InboundRtpRecord {
    pub id: String,
    pub kind: MediaKind,
    pub ssrc: u32,
    pub codec_id: String,
    pub packets_received: u64,
    pub packets_lost: i64,
    pub bytes_received: u64,
    pub jitter: f64,
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub frames_per_second: f64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub audio_level: f64,
    pub total_audio_energy: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutboundRtpRecord {
    pub id: String,
    pub kind: MediaKind,
    pub ssrc: u32,
    pub codec_id: String,
    pub packets_sent: u64,
    pub bytes_sent: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteInboundRtpRecord {
    pub id: String,
    pub kind: MediaKind,
    pub packets_lost: i64,
    pub fraction_lost: f64,
    /// Seconds
    pub round_trip_time: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CandidatePairRecord {
    pub id: String,
    pub local_candidate_id: String,
    pub remote_candidate_id: String,
    pub state: String,
    pub nominated: bool,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Seconds
    pub current_round_trip_time: f64,
    pub available_outgoing_bitrate: f64,
    pub available_incoming_bitrate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CandidateRecord {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub protocol: String,
    pub candidate_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataChannelRecord {
    pub id: String,
    pub label: String,
    pub state: String,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CodecRecord {
    pub id: String,
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub channels: u16,
    pub sdp_fmtp_line: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransportRecord {
    pub id: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub selected_candidate_pair_id: String,
}
