//! Reduction of raw statistics snapshots into display-ready metrics

use super::report::{
    CandidatePairRecord, CandidateRecord, InboundRtpRecord, MediaKind, OutboundRtpRecord,
    RawStatsReport, StatsRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundVideoStats {
    pub bytes_received: u64,
    pub packets_received: u64,
    pub packets_lost: i64,
    pub bitrate_kbps: f64,
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub frames_per_second: f64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub jitter: f64,
    pub codec: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundAudioStats {
    pub bytes_received: u64,
    pub packets_received: u64,
    pub packets_lost: i64,
    pub bitrate_kbps: f64,
    pub audio_level: f64,
    pub total_audio_energy: f64,
    pub jitter: f64,
    pub codec: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundAudioStats {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub bitrate_kbps: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePairStats {
    pub id: String,
    pub state: String,
    pub nominated: bool,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub current_round_trip_time: f64,
    pub available_outgoing_bitrate: f64,
    pub available_incoming_bitrate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateStats {
    pub address: String,
    pub port: u16,
    pub protocol: String,
    pub candidate_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataChannelStats {
    pub label: String,
    pub state: String,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodecStats {
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub channels: u16,
    pub sdp_fmtp_line: String,
}

/// Point-in-time view of one raw report
///
/// Every metric is neutral (zero or `None`) when the report carries no record
/// for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedStats {
    pub timestamp_ms: u64,
    pub inbound_video: InboundVideoStats,
    pub inbound_audio: InboundAudioStats,
    pub outbound_audio: OutboundAudioStats,
    pub candidate_pair: Option<CandidatePairStats>,
    pub local_candidate: Option<CandidateStats>,
    pub remote_candidate: Option<CandidateStats>,
    pub data_channel: Option<DataChannelStats>,
    pub codecs: BTreeMap<String, CodecStats>,
    /// Seconds, from the remote end's receiver report
    pub remote_round_trip_time: Option<f64>,
}

impl AggregatedStats {
    /// Fraction of inbound packets lost across audio and video, in `[0, 1]`
    pub fn packet_loss_rate(&self) -> f64 {
        let lost = self.inbound_video.packets_lost.max(0) + self.inbound_audio.packets_lost.max(0);
        let received = self.inbound_video.packets_received + self.inbound_audio.packets_received;
        let expected = received as f64 + lost as f64;
        if expected == 0.0 {
            0.0
        } else {
            lost as f64 / expected
        }
    }

    /// Round-trip time from the selected candidate pair, falling back to the
    /// remote receiver report
    pub fn round_trip_time_ms(&self) -> Option<f64> {
        self.candidate_pair
            .as_ref()
            .map(|pair| pair.current_round_trip_time)
            .filter(|rtt| *rtt > 0.0)
            .or(self.remote_round_trip_time)
            .map(|seconds| seconds * 1000.0)
    }

    /// Total inbound media bitrate
    pub fn inbound_bitrate_kbps(&self) -> f64 {
        self.inbound_video.bitrate_kbps + self.inbound_audio.bitrate_kbps
    }
}

/// Reduces successive raw reports; remembers only the previous output
#[derive(Debug, Default)]
pub struct StatsAggregator {
    last: Option<AggregatedStats>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent output of [`process`](Self::process)
    pub fn last(&self) -> Option<&AggregatedStats> {
        self.last.as_ref()
    }

    /// Reduce `report`, deriving bitrates against the previous snapshot
    pub fn process(&mut self, report: &RawStatsReport) -> AggregatedStats {
        let mut stats = AggregatedStats {
            timestamp_ms: report.timestamp_ms,
            ..Default::default()
        };

        let mut inbound_video: Option<&InboundRtpRecord> = None;
        let mut inbound_audio: Option<&InboundRtpRecord> = None;
        let mut outbound_audio: Option<&OutboundRtpRecord> = None;
        let mut pairs: Vec<&CandidatePairRecord> = Vec::new();
        let mut local_candidates: Vec<&CandidateRecord> = Vec::new();
        let mut remote_candidates: Vec<&CandidateRecord> = Vec::new();

        for record in &report.records {
            match record {
                StatsRecord::InboundRtp(r) => match r.kind {
                    MediaKind::Video => {
                        inbound_video.get_or_insert(r);
                    }
                    MediaKind::Audio => {
                        inbound_audio.get_or_insert(r);
                    }
                },
                StatsRecord::OutboundRtp(r) if r.kind == MediaKind::Audio => {
                    outbound_audio.get_or_insert(r);
                }
                StatsRecord::RemoteInboundRtp(r) => {
                    if stats.remote_round_trip_time.is_none() {
                        stats.remote_round_trip_time = r.round_trip_time;
                    }
                }
                StatsRecord::CandidatePair(r) => pairs.push(r),
                StatsRecord::LocalCandidate(r) => local_candidates.push(r),
                StatsRecord::RemoteCandidate(r) => remote_candidates.push(r),
                StatsRecord::DataChannel(r) => {
                    if stats.data_channel.is_none() {
                        stats.data_channel = Some(DataChannelStats {
                            label: r.label.clone(),
                            state: r.state.clone(),
                            messages_sent: r.messages_sent,
                            messages_received: r.messages_received,
                            bytes_sent: r.bytes_sent,
                            bytes_received: r.bytes_received,
                        });
                    }
                }
                StatsRecord::Codec(r) => {
                    stats.codecs.insert(
                        r.id.clone(),
                        CodecStats {
                            mime_type: r.mime_type.clone(),
                            payload_type: r.payload_type,
                            clock_rate: r.clock_rate,
                            channels: r.channels,
                            sdp_fmtp_line: r.sdp_fmtp_line.clone(),
                        },
                    );
                }
                _ => {}
            }
        }

        let previous = self.last.as_ref();
        let elapsed_ms = previous
            .map(|p| report.timestamp_ms.saturating_sub(p.timestamp_ms))
            .unwrap_or(0);

        if let Some(r) = inbound_video {
            let prev_bytes = previous.map(|p| p.inbound_video.bytes_received);
            stats.inbound_video = InboundVideoStats {
                bytes_received: r.bytes_received,
                packets_received: r.packets_received,
                packets_lost: r.packets_lost,
                bitrate_kbps: bitrate_kbps(prev_bytes, r.bytes_received, elapsed_ms),
                frames_decoded: r.frames_decoded,
                frames_dropped: r.frames_dropped,
                frames_per_second: r.frames_per_second,
                frame_width: r.frame_width,
                frame_height: r.frame_height,
                jitter: r.jitter,
                codec: codec_name(&stats.codecs, &r.codec_id),
            };
        }

        if let Some(r) = inbound_audio {
            let prev_bytes = previous.map(|p| p.inbound_audio.bytes_received);
            stats.inbound_audio = InboundAudioStats {
                bytes_received: r.bytes_received,
                packets_received: r.packets_received,
                packets_lost: r.packets_lost,
                bitrate_kbps: bitrate_kbps(prev_bytes, r.bytes_received, elapsed_ms),
                audio_level: r.audio_level,
                total_audio_energy: r.total_audio_energy,
                jitter: r.jitter,
                codec: codec_name(&stats.codecs, &r.codec_id),
            };
        }

        if let Some(r) = outbound_audio {
            let prev_bytes = previous.map(|p| p.outbound_audio.bytes_sent);
            stats.outbound_audio = OutboundAudioStats {
                bytes_sent: r.bytes_sent,
                packets_sent: r.packets_sent,
                bitrate_kbps: bitrate_kbps(prev_bytes, r.bytes_sent, elapsed_ms),
            };
        }

        let selected = pairs
            .iter()
            .find(|p| p.nominated)
            .or_else(|| pairs.first())
            .copied();

        if let Some(pair) = selected {
            stats.candidate_pair = Some(CandidatePairStats {
                id: pair.id.clone(),
                state: pair.state.clone(),
                nominated: pair.nominated,
                bytes_sent: pair.bytes_sent,
                bytes_received: pair.bytes_received,
                current_round_trip_time: pair.current_round_trip_time,
                available_outgoing_bitrate: pair.available_outgoing_bitrate,
                available_incoming_bitrate: pair.available_incoming_bitrate,
            });
        }

        stats.local_candidate = pick_candidate(
            &local_candidates,
            selected.map(|p| p.local_candidate_id.as_str()),
        );
        stats.remote_candidate = pick_candidate(
            &remote_candidates,
            selected.map(|p| p.remote_candidate_id.as_str()),
        );

        self.last = Some(stats.clone());
        stats
    }
}

/// 8 * bytes / ms is kilobits per second
fn bitrate_kbps(previous_bytes: Option<u64>, bytes: u64, elapsed_ms: u64) -> f64 {
    match previous_bytes {
        Some(prev) if elapsed_ms > 0 && bytes >= prev => {
            8.0 * (bytes - prev) as f64 / elapsed_ms as f64
        }
        _ => 0.0,
    }
}

fn codec_name(codecs: &BTreeMap<String, CodecStats>, codec_id: &str) -> Option<String> {
    codecs.get(codec_id).map(|c| c.mime_type.clone())
}

fn pick_candidate(candidates: &[&CandidateRecord], id: Option<&str>) -> Option<CandidateStats> {
    let chosen = match id.filter(|id| !id.is_empty()) {
        Some(id) => candidates.iter().find(|c| c.id == id),
        None => candidates.first(),
    }?;
    Some(CandidateStats {
        address: chosen.address.clone(),
        port: chosen.port,
        protocol: chosen.protocol.clone(),
        candidate_type: chosen.candidate_type.clone(),
    })
}
