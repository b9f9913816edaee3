//! webrtc-rs implementation of [`PeerConnectionHandle`]
//!
//! webrtc-rs only commits a local description byte-equal to the offer or
//! answer it generated last. The handle therefore commits its own generated
//! form and keeps the caller's (policy-rewritten) form as the transmitted
//! local description returned by [`PeerConnectionHandle::local_description`].

use crate::config::PeerConnectionOptions;
use crate::media::LocalAudioTrack;
use crate::peer::handle::{
    HandleEvent, HandleEventHandler, InboundDataChannel, InboundTrack, OfferOptions,
    PeerConnectionHandle, TrackKind, TransceiverDirection, TransceiverInfo,
};
use crate::peer::ice::IceCandidate;
use crate::sdp::{SdpType, SessionDescription};
use crate::stats::{
    CandidatePairRecord, CandidateRecord, CodecRecord, DataChannelRecord, InboundRtpRecord,
    MediaKind, OutboundRtpRecord, RawStatsReport, RemoteInboundRtpRecord, StatsRecord,
    TransportRecord,
};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::interceptor::Interceptor;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::stats::{ICECandidateStats, StatsReport, StatsReportType};

type SharedHandler = Arc<RwLock<Option<HandleEventHandler>>>;

/// Peer connection backed by webrtc-rs
pub struct WebRtcHandle {
    connection_id: String,
    api: API,
    /// Chain for senders installed on transceivers created without a track
    sender_interceptor: Arc<dyn Interceptor + Send + Sync>,
    peer_connection: Arc<RTCPeerConnection>,
    handler: SharedHandler,
    /// Last offer or answer produced by webrtc-rs, not yet committed
    generated: Mutex<Option<RTCSessionDescription>>,
    /// Local description as handed to `set_local_description`
    transmitted: Mutex<Option<SessionDescription>>,
}

impl WebRtcHandle {
    /// Create a new peer connection
    ///
    /// # Arguments
    ///
    /// * `options` - STUN/TURN servers
    /// * `relay_only` - Restrict ICE to TURN relay candidates
    #[instrument(skip(options))]
    pub async fn new(options: &PeerConnectionOptions, relay_only: bool) -> Result<Self> {
        let connection_id = uuid::Uuid::new_v4().to_string();

        info!(
            "Creating peer connection: connection_id={}, relay_only={}",
            connection_id, relay_only
        );

        // Opus for audio, VP8/VP9/H.264 for video
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let mut sender_media_engine = MediaEngine::default();
        let sender_interceptor =
            register_default_interceptors(Registry::new(), &mut sender_media_engine)
                .map_err(|e| {
                    Error::WebRtcError(format!("Failed to register sender interceptors: {}", e))
                })?
                .build("")
                .map_err(|e| {
                    Error::WebRtcError(format!("Failed to build sender interceptors: {}", e))
                })?;

        let ice_servers: Vec<RTCIceServer> = options
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(options.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ice_transport_policy: if relay_only {
                RTCIceTransportPolicy::Relay
            } else {
                RTCIceTransportPolicy::All
            },
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        let handler: SharedHandler = Arc::new(RwLock::new(None));
        install_callbacks(&peer_connection, &handler);

        Ok(Self {
            connection_id,
            api,
            sender_interceptor,
            peer_connection,
            handler,
            generated: Mutex::new(None),
            transmitted: Mutex::new(None),
        })
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Underlying webrtc-rs connection
    pub fn peer_connection(&self) -> Arc<RTCPeerConnection> {
        Arc::clone(&self.peer_connection)
    }

    async fn transceiver_at(&self, index: usize) -> Result<Arc<RTCRtpTransceiver>> {
        self.peer_connection
            .get_transceivers()
            .await
            .get(index)
            .cloned()
            .ok_or_else(|| Error::MediaTrackError(format!("No transceiver at index {}", index)))
    }
}

fn dispatch(handler: &SharedHandler, event: HandleEvent) {
    let current = handler.read().clone();
    match current {
        Some(handler) => handler(event),
        None => debug!(?event, "Peer connection event before handler installed"),
    }
}

fn install_callbacks(peer_connection: &Arc<RTCPeerConnection>, handler: &SharedHandler) {
    let h = Arc::clone(handler);
    peer_connection.on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
        dispatch(&h, HandleEvent::SignalingStateChange(state));
        Box::pin(async {})
    }));

    let h = Arc::clone(handler);
    peer_connection.on_ice_connection_state_change(Box::new(
        move |state: RTCIceConnectionState| {
            dispatch(&h, HandleEvent::IceConnectionStateChange(state));
            Box::pin(async {})
        },
    ));

    let h = Arc::clone(handler);
    peer_connection.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
        dispatch(&h, HandleEvent::IceGatheringStateChange(state));
        Box::pin(async {})
    }));

    let h = Arc::clone(handler);
    peer_connection.on_ice_candidate(Box::new(move |candidate| {
        let event = match candidate {
            Some(candidate) => match candidate.to_json() {
                Ok(init) => Some(HandleEvent::IceCandidate(Some(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                }))),
                Err(e) => {
                    warn!("Failed to serialize local ICE candidate: {}", e);
                    None
                }
            },
            None => Some(HandleEvent::IceCandidate(None)),
        };
        if let Some(event) = event {
            dispatch(&h, event);
        }
        Box::pin(async {})
    }));

    let h = Arc::clone(handler);
    peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
        let kind = match track.kind() {
            RTPCodecType::Video => TrackKind::Video,
            _ => TrackKind::Audio,
        };
        dispatch(
            &h,
            HandleEvent::Track(InboundTrack {
                kind,
                ssrc: track.ssrc(),
                track_id: track.id(),
                stream_id: track.stream_id(),
                remote: Some(track),
            }),
        );
        Box::pin(async {})
    }));

    let h = Arc::clone(handler);
    peer_connection.on_data_channel(Box::new(move |data_channel| {
        dispatch(
            &h,
            HandleEvent::DataChannel(InboundDataChannel {
                label: data_channel.label().to_string(),
                id: Some(data_channel.id()),
                channel: Some(data_channel),
            }),
        );
        Box::pin(async {})
    }));
}

fn to_rtc_sdp_type(sdp_type: SdpType) -> RTCSdpType {
    match sdp_type {
        SdpType::Offer => RTCSdpType::Offer,
        SdpType::Answer => RTCSdpType::Answer,
        SdpType::Pranswer => RTCSdpType::Pranswer,
        SdpType::Rollback => RTCSdpType::Rollback,
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let sdp = description.sdp;
    match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(sdp),
        SdpType::Answer => RTCSessionDescription::answer(sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(sdp),
        SdpType::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            rollback.sdp = sdp;
            Ok(rollback)
        }
    }
    .map_err(|e| Error::SdpError(format!("Invalid session description: {}", e)))
}

fn from_rtc_description(description: &RTCSessionDescription) -> Result<SessionDescription> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        other => {
            return Err(Error::SdpError(format!(
                "Unsupported session description type: {}",
                other
            )))
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: description.sdp.clone(),
    })
}

fn to_rtc_direction(direction: TransceiverDirection) -> RTCRtpTransceiverDirection {
    match direction {
        TransceiverDirection::SendRecv => RTCRtpTransceiverDirection::Sendrecv,
        TransceiverDirection::SendOnly => RTCRtpTransceiverDirection::Sendonly,
        TransceiverDirection::RecvOnly => RTCRtpTransceiverDirection::Recvonly,
        TransceiverDirection::Inactive => RTCRtpTransceiverDirection::Inactive,
    }
}

fn from_rtc_direction(direction: RTCRtpTransceiverDirection) -> TransceiverDirection {
    match direction {
        RTCRtpTransceiverDirection::Sendrecv => TransceiverDirection::SendRecv,
        RTCRtpTransceiverDirection::Sendonly => TransceiverDirection::SendOnly,
        RTCRtpTransceiverDirection::Recvonly => TransceiverDirection::RecvOnly,
        _ => TransceiverDirection::Inactive,
    }
}

fn codec_type(kind: TrackKind) -> RTPCodecType {
    match kind {
        TrackKind::Audio => RTPCodecType::Audio,
        TrackKind::Video => RTPCodecType::Video,
    }
}

fn media_kind(kind: &str) -> MediaKind {
    if kind == "video" {
        MediaKind::Video
    } else {
        MediaKind::Audio
    }
}

fn candidate_record(id: &str, stats: &ICECandidateStats) -> CandidateRecord {
    CandidateRecord {
        id: id.to_string(),
        address: stats.ip.clone(),
        port: stats.port,
        protocol: stats.network_type.to_string(),
        candidate_type: stats.candidate_type.to_string(),
    }
}

/// Translate a webrtc-rs report; entries are ordered by id
fn convert_stats(report: &StatsReport) -> RawStatsReport {
    let mut entries: Vec<(&String, &StatsReportType)> = report.reports.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let records = entries
        .into_iter()
        .filter_map(|(id, entry)| {
            let record = match entry {
                StatsReportType::InboundRTP(s) => StatsRecord::InboundRtp(InboundRtpRecord {
                    id: id.clone(),
                    kind: media_kind(&s.kind),
                    ssrc: s.ssrc,
                    packets_received: s.packets_received as u64,
                    bytes_received: s.bytes_received as u64,
                    ..Default::default()
                }),
                StatsReportType::OutboundRTP(s) => StatsRecord::OutboundRtp(OutboundRtpRecord {
                    id: id.clone(),
                    kind: media_kind(&s.kind),
                    ssrc: s.ssrc,
                    packets_sent: s.packets_sent as u64,
                    bytes_sent: s.bytes_sent as u64,
                    ..Default::default()
                }),
                StatsReportType::RemoteInboundRTP(s) => {
                    StatsRecord::RemoteInboundRtp(RemoteInboundRtpRecord {
                        id: id.clone(),
                        kind: media_kind(&s.kind),
                        packets_lost: s.packets_lost as i64,
                        fraction_lost: s.fraction_lost,
                        round_trip_time: s.round_trip_time,
                    })
                }
                StatsReportType::CandidatePair(s) => {
                    StatsRecord::CandidatePair(CandidatePairRecord {
                        id: id.clone(),
                        local_candidate_id: s.local_candidate_id.clone(),
                        remote_candidate_id: s.remote_candidate_id.clone(),
                        state: format!("{:?}", s.state),
                        nominated: s.nominated,
                        packets_sent: s.packets_sent as u64,
                        packets_received: s.packets_received as u64,
                        bytes_sent: s.bytes_sent as u64,
                        bytes_received: s.bytes_received as u64,
                        current_round_trip_time: s.current_round_trip_time,
                        available_outgoing_bitrate: s.available_outgoing_bitrate,
                        available_incoming_bitrate: s.available_incoming_bitrate,
                    })
                }
                StatsReportType::LocalCandidate(s) => {
                    StatsRecord::LocalCandidate(candidate_record(id, s))
                }
                StatsReportType::RemoteCandidate(s) => {
                    StatsRecord::RemoteCandidate(candidate_record(id, s))
                }
                StatsReportType::DataChannel(s) => StatsRecord::DataChannel(DataChannelRecord {
                    id: id.clone(),
                    label: s.label.clone(),
                    state: format!("{:?}", s.state),
                    messages_sent: s.messages_sent as u64,
                    messages_received: s.messages_received as u64,
                    bytes_sent: s.bytes_sent as u64,
                    bytes_received: s.bytes_received as u64,
                }),
                StatsReportType::Codec(s) => StatsRecord::Codec(CodecRecord {
                    id: id.clone(),
                    mime_type: s.mime_type.clone(),
                    payload_type: s.payload_type as u8,
                    clock_rate: s.clock_rate as u32,
                    channels: s.channels as u16,
                    sdp_fmtp_line: s.sdp_fmtp_line.clone(),
                }),
                StatsReportType::Transport(s) => StatsRecord::Transport(TransportRecord {
                    id: id.clone(),
                    bytes_sent: s.bytes_sent as u64,
                    bytes_received: s.bytes_received as u64,
                    ..Default::default()
                }),
                _ => return None,
            };
            Some(record)
        })
        .collect();

    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    RawStatsReport::new(timestamp_ms, records)
}

#[async_trait]
impl PeerConnectionHandle for WebRtcHandle {
    async fn create_offer(&self, options: &OfferOptions) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(Some(RTCOfferOptions {
                voice_activity_detection: options.voice_activity_detection,
                ice_restart: options.ice_restart,
            }))
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        debug!("Created SDP offer on connection {}", self.connection_id);
        let description = from_rtc_description(&offer)?;
        *self.generated.lock() = Some(offer);
        Ok(description)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        debug!("Created SDP answer on connection {}", self.connection_id);
        let description = from_rtc_description(&answer)?;
        *self.generated.lock() = Some(answer);
        Ok(description)
    }

    /// Commits the generated offer/answer of the same type when there is
    /// one; `description` is kept as the transmitted local description.
    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let generated = {
            let mut slot = self.generated.lock();
            match slot.as_ref() {
                Some(g) if g.sdp_type == to_rtc_sdp_type(description.sdp_type) => slot.take(),
                _ => None,
            }
        };

        let commit = match generated {
            Some(generated) => {
                if generated.sdp != description.sdp {
                    debug!(
                        "Committing generated {} on connection {}; transmitting rewritten form",
                        description.sdp_type, self.connection_id
                    );
                }
                generated
            }
            None => to_rtc_description(description.clone())?,
        };

        self.peer_connection
            .set_local_description(commit)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        *self.transmitted.lock() = Some(description);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        if let Some(transmitted) = self.transmitted.lock().clone() {
            return Some(transmitted);
        }
        self.peer_connection
            .local_description()
            .await
            .and_then(|d| from_rtc_description(&d).ok())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        debug!(
            "Adding ICE candidate on connection {}: {}",
            self.connection_id, candidate.candidate
        );

        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn transceivers(&self) -> Vec<TransceiverInfo> {
        let mut out = Vec::new();
        for (index, transceiver) in self
            .peer_connection
            .get_transceivers()
            .await
            .iter()
            .enumerate()
        {
            let kind = match transceiver.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                RTPCodecType::Video => TrackKind::Video,
                _ => continue,
            };
            let has_send_track = transceiver.sender().await.track().await.is_some();
            out.push(TransceiverInfo {
                index,
                kind,
                direction: from_rtc_direction(transceiver.direction()),
                has_send_track,
            });
        }
        out
    }

    async fn add_transceiver(
        &self,
        kind: TrackKind,
        direction: TransceiverDirection,
        track: Option<LocalAudioTrack>,
    ) -> Result<TransceiverInfo> {
        let init = RTCRtpTransceiverInit {
            direction: to_rtc_direction(direction),
            send_encodings: vec![],
        };
        let has_send_track = track.is_some();

        let transceiver = match track {
            Some(track) => {
                self.peer_connection
                    .add_transceiver_from_track(track.as_track_local(), Some(init))
                    .await
            }
            None => {
                self.peer_connection
                    .add_transceiver_from_kind(codec_type(kind), Some(init))
                    .await
            }
        }
        .map_err(|e| Error::MediaTrackError(format!("Failed to add {} transceiver: {}", kind, e)))?;

        let all = self.peer_connection.get_transceivers().await;
        let index = all
            .iter()
            .position(|t| Arc::ptr_eq(t, &transceiver))
            .unwrap_or(all.len().saturating_sub(1));

        debug!(
            "Added {} transceiver #{} ({}) on connection {}",
            kind, index, direction, self.connection_id
        );

        Ok(TransceiverInfo {
            index,
            kind,
            direction: from_rtc_direction(transceiver.direction()),
            has_send_track,
        })
    }

    /// A sender created without a track has no encoding to swap, so it is
    /// replaced by a new sender bound to `track`.
    async fn attach_send_track(&self, index: usize, track: LocalAudioTrack) -> Result<()> {
        let transceiver = self.transceiver_at(index).await?;
        if transceiver.kind() != RTPCodecType::Audio {
            return Err(Error::MediaTrackError(format!(
                "Transceiver #{} is not an audio transceiver",
                index
            )));
        }

        let current = transceiver.sender().await;
        if current.track().await.is_some() {
            current
                .replace_track(Some(track.as_track_local()))
                .await
                .map_err(|e| {
                    Error::MediaTrackError(format!("Failed to attach send track: {}", e))
                })?;
        } else {
            let sender = self
                .api
                .new_rtp_sender(
                    Some(track.as_track_local()),
                    self.peer_connection.dtls_transport(),
                    Arc::clone(&self.sender_interceptor),
                )
                .await;
            transceiver.set_sender(Arc::new(sender)).await;
            debug!(
                "Installed sender for track {} on transceiver #{} ({})",
                track.id(),
                index,
                self.connection_id
            );
        }

        transceiver
            .set_direction(RTCRtpTransceiverDirection::Sendrecv)
            .await;
        Ok(())
    }

    async fn set_transceiver_direction(
        &self,
        index: usize,
        direction: TransceiverDirection,
    ) -> Result<()> {
        let transceiver = self.transceiver_at(index).await?;
        transceiver.set_direction(to_rtc_direction(direction)).await;
        Ok(())
    }

    async fn get_stats(&self) -> Result<RawStatsReport> {
        let report = self.peer_connection.get_stats().await;
        Ok(convert_stats(&report))
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection {}", self.connection_id);

        self.peer_connection.close().await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to close connection: {}", e))
        })
    }

    fn set_event_handler(&self, handler: HandleEventHandler) {
        *self.handler.write() = Some(handler);
    }
}
