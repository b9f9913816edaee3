//! Offer/answer negotiation integration tests
//!
//! Drive `PeerConnectionController` over the in-memory peer connection from
//! the harness.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --test negotiation_test
//! ```

mod harness;

use harness::{
    drain_events, init_logging, CaptureMode, FakeCapture, FakePeerConnection, CANNED_OFFER_SDP,
};
use std::sync::Arc;
use std::time::Duration;
use streamclient_webrtc::peer::{TrackKind, TransceiverDirection, TransceiverInfo};
use streamclient_webrtc::stats::{InboundRtpRecord, MediaKind, StatsRecord};
use streamclient_webrtc::{
    AggregatedStats, ChannelObserver, ControllerEvent, DescriptionState, Error,
    NegotiationState, OfferOptions, PageContext, PeerConnectionController,
    PeerConnectionOptions, RawStatsReport, SessionConfig, SessionDescription, SignalingPhase,
};
use tokio::sync::mpsc;

struct Fixture {
    controller: Arc<PeerConnectionController>,
    peer: Arc<FakePeerConnection>,
    capture: Arc<FakeCapture>,
    events: mpsc::UnboundedReceiver<ControllerEvent>,
}

fn fixture(mode: CaptureMode, page: PageContext, config: &SessionConfig) -> Fixture {
    let peer = Arc::new(FakePeerConnection::new());
    let capture = Arc::new(FakeCapture::new(mode));
    let (observer, events) = ChannelObserver::new();

    let controller = PeerConnectionController::builder(PeerConnectionOptions::default())
        .observer(Arc::new(observer))
        .capture(capture.clone())
        .page_context(page)
        .build_with_handle(peer.clone(), config)
        .unwrap();

    Fixture {
        controller: Arc::new(controller),
        peer,
        capture,
        events,
    }
}

fn default_fixture() -> Fixture {
    fixture(
        CaptureMode::Grant,
        PageContext::default(),
        &SessionConfig::default(),
    )
}

/// Exactly one receive-only video line and one audio line
fn assert_media_lines(transceivers: &[TransceiverInfo]) -> TransceiverInfo {
    let video: Vec<_> = transceivers
        .iter()
        .filter(|t| t.kind == TrackKind::Video)
        .collect();
    let audio: Vec<_> = transceivers
        .iter()
        .filter(|t| t.kind == TrackKind::Audio)
        .collect();
    assert_eq!(video.len(), 1, "expected one video line: {:?}", transceivers);
    assert_eq!(audio.len(), 1, "expected one audio line: {:?}", transceivers);
    assert_eq!(video[0].direction, TransceiverDirection::RecvOnly);
    assert!(!video[0].has_send_track);
    audio[0].clone()
}

// ============================================================================
// Offerer path
// ============================================================================

#[tokio::test]
async fn test_offer_without_microphone() {
    init_logging();
    let mut fx = default_fixture();

    let offer = fx
        .controller
        .create_offer(&OfferOptions::default(), &SessionConfig::default())
        .await
        .unwrap();

    let events = drain_events(&mut fx.events);
    let connecting = events
        .iter()
        .filter(|e| matches!(e, ControllerEvent::Connecting))
        .count();
    let offers: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ControllerEvent::OfferReady(o) => Some(o.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(connecting, 1);
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0], offer);

    assert!(offer.sdp.contains("maxaveragebitrate=510000;"));
    assert!(offer.sdp.contains("sprop-stereo=1;stereo=1;useinbandfec=1"));
    assert!(!offer.sdp.contains("sprop-maxcapturerate"));
    assert!(offer
        .sdp
        .contains(";x-google-start-bitrate=10000;x-google-max-bitrate=100000\r\n"));

    assert_eq!(
        fx.controller.local_description_state(),
        DescriptionState::Committed
    );
    assert_eq!(fx.peer.local(), Some(offer));
    assert_eq!(fx.capture.calls(), 0);

    let audio = assert_media_lines(&fx.peer.transceiver_snapshot());
    assert_eq!(audio.direction, TransceiverDirection::RecvOnly);
}

#[tokio::test]
async fn test_offer_call_ordering() {
    let fx = default_fixture();
    fx.controller
        .create_offer(&OfferOptions::default(), &SessionConfig::default())
        .await
        .unwrap();

    let setup = fx.peer.call_index("add_transceiver:audio").unwrap();
    let create = fx.peer.call_index("create_offer").unwrap();
    let commit = fx.peer.call_index("set_local_description:offer").unwrap();
    assert!(setup < create);
    assert!(create < commit);
    assert_eq!(
        fx.controller.signaling_phase(),
        SignalingPhase::LocalDescriptionSet
    );
    assert_eq!(fx.controller.negotiation_state(), NegotiationState::Negotiating);
}

#[tokio::test]
async fn test_offer_then_answer_connects() {
    let fx = default_fixture();
    fx.controller
        .create_offer(&OfferOptions::default(), &SessionConfig::default())
        .await
        .unwrap();

    fx.controller
        .receive_answer(SessionDescription::answer(harness::CANNED_ANSWER_SDP))
        .await
        .unwrap();

    assert_eq!(fx.controller.negotiation_state(), NegotiationState::Connected);
    assert_eq!(fx.controller.signaling_phase(), SignalingPhase::Connected);
    assert_eq!(
        fx.controller.remote_description_state(),
        DescriptionState::Committed
    );
}

#[tokio::test]
async fn test_rejected_answer_releases_token() {
    let fx = default_fixture();
    fx.controller
        .create_offer(&OfferOptions::default(), &SessionConfig::default())
        .await
        .unwrap();

    fx.peer.fail_set_remote(true);
    let err = fx
        .controller
        .receive_answer(SessionDescription::answer("garbage"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SdpError(_)));
    assert_eq!(fx.controller.negotiation_state(), NegotiationState::Idle);
    assert_eq!(
        fx.controller.remote_description_state(),
        DescriptionState::Absent
    );

    // a fresh attempt is accepted
    fx.peer.fail_set_remote(false);
    fx.controller
        .create_offer(&OfferOptions::default(), &SessionConfig::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_microphone_granted_sends_audio() {
    let mut fx = default_fixture();
    let config = SessionConfig::default().with_use_mic(true);

    let offer = fx
        .controller
        .create_offer(&OfferOptions::default(), &config)
        .await
        .unwrap();

    assert_eq!(fx.capture.calls(), 1);
    let audio = assert_media_lines(&fx.peer.transceiver_snapshot());
    assert_eq!(audio.direction, TransceiverDirection::SendRecv);
    assert!(audio.has_send_track);
    assert_eq!(fx.peer.attached_tracks().len(), 1);
    assert!(offer.sdp.contains(
        "maxaveragebitrate=510000;sprop-maxcapturerate=48000;sprop-stereo=1;stereo=1;useinbandfec=1"
    ));
    assert!(!drain_events(&mut fx.events)
        .iter()
        .any(|e| matches!(e, ControllerEvent::SetupFailed)));
}

#[tokio::test]
async fn test_microphone_denied_falls_back_to_receive_only() {
    let fx = fixture(
        CaptureMode::Deny,
        PageContext::default(),
        &SessionConfig::default(),
    );
    let config = SessionConfig::default().with_use_mic(true);

    let offer = fx
        .controller
        .create_offer(&OfferOptions::default(), &config)
        .await
        .unwrap();

    assert_eq!(fx.capture.calls(), 1);
    let audio = assert_media_lines(&fx.peer.transceiver_snapshot());
    assert_eq!(audio.direction, TransceiverDirection::RecvOnly);
    assert!(!audio.has_send_track);
    assert!(!offer.sdp.contains("sprop-maxcapturerate"));
}

#[tokio::test]
async fn test_microphone_empty_stream_falls_back_to_receive_only() {
    let fx = fixture(
        CaptureMode::Empty,
        PageContext::default(),
        &SessionConfig::default(),
    );
    let config = SessionConfig::default().with_use_mic(true);

    fx.controller
        .create_offer(&OfferOptions::default(), &config)
        .await
        .unwrap();

    let audio = assert_media_lines(&fx.peer.transceiver_snapshot());
    assert_eq!(audio.direction, TransceiverDirection::RecvOnly);
}

#[tokio::test]
async fn test_microphone_blocked_on_insecure_origin() {
    let page = PageContext::parse("http://stream.example.com").unwrap();
    let fx = fixture(CaptureMode::Grant, page, &SessionConfig::default());
    let config = SessionConfig::default().with_use_mic(true);

    let offer = fx
        .controller
        .create_offer(&OfferOptions::default(), &config)
        .await
        .unwrap();

    assert_eq!(fx.capture.calls(), 0, "no capture request on insecure origin");
    let audio = assert_media_lines(&fx.peer.transceiver_snapshot());
    assert_eq!(audio.direction, TransceiverDirection::RecvOnly);
    assert!(!offer.sdp.contains("sprop-maxcapturerate"));
}

#[tokio::test]
async fn test_microphone_allowed_on_https_origin() {
    let page = PageContext::parse("https://stream.example.com").unwrap();
    let fx = fixture(CaptureMode::Grant, page, &SessionConfig::default());
    let config = SessionConfig::default().with_use_mic(true);

    fx.controller
        .create_offer(&OfferOptions::default(), &config)
        .await
        .unwrap();

    assert_eq!(fx.capture.calls(), 1);
}

#[tokio::test]
async fn test_force_mono_audio() {
    let fx = default_fixture();
    let config = SessionConfig::default().with_force_mono_audio(true);

    let offer = fx
        .controller
        .create_offer(&OfferOptions::default(), &config)
        .await
        .unwrap();

    assert!(offer.sdp.contains("sprop-stereo=0;stereo=0;useinbandfec=1"));
    assert!(!offer.sdp.contains("stereo=1"));
}

#[tokio::test]
async fn test_offer_failure_notifies_setup_failed() {
    let mut fx = default_fixture();
    fx.peer.fail_offer();

    let err = fx
        .controller
        .create_offer(&OfferOptions::default(), &SessionConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SdpError(_)));

    let events = drain_events(&mut fx.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, ControllerEvent::SetupFailed)));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ControllerEvent::Connecting | ControllerEvent::OfferReady(_))));
    assert_eq!(fx.controller.negotiation_state(), NegotiationState::Idle);
    assert_eq!(
        fx.controller.local_description_state(),
        DescriptionState::Absent
    );
}

#[tokio::test]
async fn test_set_local_failure_restores_description_state() {
    let fx = default_fixture();
    fx.peer.fail_set_local();

    let err = fx
        .controller
        .create_offer(&OfferOptions::default(), &SessionConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SdpError(_)));
    assert_eq!(
        fx.controller.local_description_state(),
        DescriptionState::Absent
    );
    assert_eq!(fx.controller.negotiation_state(), NegotiationState::Idle);
}

// ============================================================================
// Responder path
// ============================================================================

#[tokio::test]
async fn test_receive_offer_answers() {
    init_logging();
    let mut fx = default_fixture();

    let answer = fx
        .controller
        .receive_offer(
            SessionDescription::offer(CANNED_OFFER_SDP),
            &SessionConfig::default(),
        )
        .await
        .unwrap();

    let answers: Vec<_> = drain_events(&mut fx.events)
        .into_iter()
        .filter_map(|e| match e {
            ControllerEvent::AnswerReady(a) => Some(a),
            _ => None,
        })
        .collect();
    assert_eq!(answers.len(), 1);
    assert_eq!(Some(answers[0].clone()), fx.peer.local());
    assert_eq!(answers[0], answer);

    let remote = fx.peer.call_index("set_remote_description:offer").unwrap();
    let create = fx.peer.call_index("create_answer").unwrap();
    let local = fx.peer.call_index("set_local_description:answer").unwrap();
    assert!(remote < create);
    assert!(create < local);

    assert!(answer.sdp.contains("maxaveragebitrate=510000;"));
    assert_eq!(
        fx.controller.remote_description_state(),
        DescriptionState::Committed
    );
    assert_eq!(
        fx.controller.local_description_state(),
        DescriptionState::Committed
    );
    assert_eq!(fx.controller.negotiation_state(), NegotiationState::Connected);
    assert_eq!(fx.controller.signaling_phase(), SignalingPhase::Connected);
}

#[tokio::test]
async fn test_receive_offer_reuses_remote_transceivers() {
    let fx = default_fixture();
    let config = SessionConfig::default().with_use_mic(true);

    fx.controller
        .receive_offer(SessionDescription::offer(CANNED_OFFER_SDP), &config)
        .await
        .unwrap();

    let calls = fx.peer.calls();
    assert!(
        !calls.iter().any(|c| c.starts_with("add_transceiver")),
        "remote transceivers must be reused: {:?}",
        calls
    );
    assert!(calls.iter().any(|c| c == "attach_send_track:1"));

    let audio = assert_media_lines(&fx.peer.transceiver_snapshot());
    assert_eq!(audio.direction, TransceiverDirection::SendRecv);
}

#[tokio::test]
async fn test_answer_failure_does_not_notify_setup_failed() {
    let mut fx = default_fixture();
    fx.peer.fail_answer();

    let err = fx
        .controller
        .receive_offer(
            SessionDescription::offer(CANNED_OFFER_SDP),
            &SessionConfig::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SdpError(_)));
    assert!(!drain_events(&mut fx.events)
        .iter()
        .any(|e| matches!(e, ControllerEvent::SetupFailed | ControllerEvent::AnswerReady(_))));
    assert_eq!(fx.controller.negotiation_state(), NegotiationState::Idle);
}

// ============================================================================
// Concurrency and close
// ============================================================================

#[tokio::test]
async fn test_concurrent_negotiation_fails_fast() {
    let fx = default_fixture();
    fx.peer.delay_offer(Duration::from_millis(50));
    let config = SessionConfig::default();
    let options = OfferOptions::default();

    let (first, second) = tokio::join!(
        fx.controller.create_offer(&options, &config),
        fx.controller.create_offer(&options, &config),
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(Error::NegotiationInProgress)));
    assert_eq!(
        fx.peer
            .calls()
            .iter()
            .filter(|c| c.as_str() == "create_offer")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_offer_in_flight_blocks_remote_offer() {
    let fx = default_fixture();
    fx.controller
        .create_offer(&OfferOptions::default(), &SessionConfig::default())
        .await
        .unwrap();

    let err = fx
        .controller
        .receive_offer(
            SessionDescription::offer(CANNED_OFFER_SDP),
            &SessionConfig::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NegotiationInProgress));
}

#[tokio::test]
async fn test_answer_during_offer_creation_keeps_token() {
    let fx = default_fixture();
    fx.peer.delay_offer(Duration::from_millis(100));
    fx.peer.fail_set_remote(true);
    let config = SessionConfig::default();
    let options = OfferOptions::default();

    let (first, (answer, second)) = tokio::join!(
        fx.controller.create_offer(&options, &config),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let answer = fx
                .controller
                .receive_answer(SessionDescription::answer(harness::CANNED_ANSWER_SDP))
                .await;
            let second = fx.controller.create_offer(&options, &config).await;
            (answer, second)
        }
    );

    assert!(first.is_ok());
    assert!(matches!(answer, Err(Error::InvalidState(_))));
    assert!(matches!(second, Err(Error::NegotiationInProgress)));
    assert!(fx.peer.call_index("set_remote_description").is_none());
    assert_eq!(fx.controller.negotiation_state(), NegotiationState::Negotiating);
}

#[tokio::test]
async fn test_answer_without_offer_rejected() {
    let fx = default_fixture();

    let err = fx
        .controller
        .receive_answer(SessionDescription::answer(harness::CANNED_ANSWER_SDP))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidState(_)));
    assert!(fx.peer.calls().is_empty());
    assert_eq!(fx.controller.negotiation_state(), NegotiationState::Idle);
    assert_eq!(
        fx.controller.remote_description_state(),
        DescriptionState::Absent
    );
}

#[tokio::test]
async fn test_second_answer_rejected_after_connect() {
    let fx = default_fixture();
    fx.controller
        .create_offer(&OfferOptions::default(), &SessionConfig::default())
        .await
        .unwrap();
    fx.controller
        .receive_answer(SessionDescription::answer(harness::CANNED_ANSWER_SDP))
        .await
        .unwrap();

    let err = fx
        .controller
        .receive_answer(SessionDescription::answer(harness::CANNED_ANSWER_SDP))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidState(_)));
    assert_eq!(fx.controller.negotiation_state(), NegotiationState::Connected);
    assert_eq!(
        fx.peer
            .calls()
            .iter()
            .filter(|c| c.starts_with("set_remote_description"))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_answer_while_answering_remote_offer_rejected() {
    let fx = default_fixture();
    fx.controller
        .receive_offer(
            SessionDescription::offer(CANNED_OFFER_SDP),
            &SessionConfig::default(),
        )
        .await
        .unwrap();

    let err = fx
        .controller
        .receive_answer(SessionDescription::answer(harness::CANNED_ANSWER_SDP))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test]
async fn test_close_twice() {
    let fx = default_fixture();

    fx.controller.close().await.unwrap();
    assert!(!fx.controller.has_handle().await);
    assert!(fx.controller.is_closed());

    fx.controller.close().await.unwrap();
    assert!(!fx.controller.has_handle().await);
    assert_eq!(fx.peer.close_count(), 1);
    assert_eq!(fx.controller.signaling_phase(), SignalingPhase::Closed);
}

#[tokio::test]
async fn test_operations_after_close() {
    let fx = default_fixture();
    fx.controller.close().await.unwrap();
    let config = SessionConfig::default();

    assert!(matches!(
        fx.controller
            .create_offer(&OfferOptions::default(), &config)
            .await,
        Err(Error::ConnectionClosed)
    ));
    assert!(matches!(
        fx.controller
            .receive_offer(SessionDescription::offer(CANNED_OFFER_SDP), &config)
            .await,
        Err(Error::ConnectionClosed)
    ));
    assert!(matches!(
        fx.controller
            .receive_answer(SessionDescription::answer("v=0\r\n"))
            .await,
        Err(Error::ConnectionClosed)
    ));
    assert!(matches!(
        fx.controller
            .handle_on_ice(harness::host_candidate(5000))
            .await,
        Err(Error::ConnectionClosed)
    ));
    assert!(matches!(
        fx.controller.generate_stats().await,
        Err(Error::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_close_during_offer_is_benign() {
    let mut fx = default_fixture();
    fx.peer.delay_offer(Duration::from_millis(50));
    let config = SessionConfig::default();
    let options = OfferOptions::default();

    let (offer, closed) = tokio::join!(
        fx.controller.create_offer(&options, &config),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            fx.controller.close().await
        }
    );

    assert!(closed.is_ok());
    assert!(matches!(offer, Err(Error::ConnectionClosed)));
    assert!(!drain_events(&mut fx.events)
        .iter()
        .any(|e| matches!(e, ControllerEvent::SetupFailed)));
    assert_eq!(fx.controller.negotiation_state(), NegotiationState::Closed);
}

// ============================================================================
// Statistics
// ============================================================================

#[tokio::test]
async fn test_empty_stats_report_is_neutral() {
    let mut fx = default_fixture();

    let stats = fx.controller.generate_stats().await.unwrap();
    assert_eq!(
        stats,
        AggregatedStats {
            timestamp_ms: stats.timestamp_ms,
            ..Default::default()
        }
    );
    assert_eq!(stats.packet_loss_rate(), 0.0);
    assert!(stats.round_trip_time_ms().is_none());

    let events = drain_events(&mut fx.events);
    assert!(matches!(events.as_slice(), [ControllerEvent::Stats(_)]));
}

#[tokio::test]
async fn test_stats_bitrate_across_polls() {
    let fx = default_fixture();
    let video = |bytes: u64| {
        StatsRecord::InboundRtp(InboundRtpRecord {
            id: "inbound-video".to_string(),
            kind: MediaKind::Video,
            bytes_received: bytes,
            packets_received: bytes / 1000,
            ..Default::default()
        })
    };
    fx.peer.push_stats(RawStatsReport::new(1_000, vec![video(0)]));
    fx.peer.push_stats(RawStatsReport::new(2_000, vec![video(125_000)]));

    let first = fx.controller.generate_stats().await.unwrap();
    assert_eq!(first.inbound_video.bitrate_kbps, 0.0);

    let second = fx.controller.generate_stats().await.unwrap();
    assert!((second.inbound_video.bitrate_kbps - 1000.0).abs() < 1e-9);
    assert_eq!(fx.controller.last_stats(), Some(second));
}
