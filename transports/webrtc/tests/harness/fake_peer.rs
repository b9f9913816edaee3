//! In-memory peer connection

use super::{CANNED_ANSWER_SDP, CANNED_OFFER_SDP};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::time::Duration;
use streamclient_webrtc::peer::{
    HandleEvent, HandleEventHandler, OfferOptions, PeerConnectionHandle, TrackKind,
    TransceiverDirection, TransceiverInfo,
};
use streamclient_webrtc::{
    Error, IceCandidate, LocalAudioTrack, RawStatsReport, Result, SdpType, SessionDescription,
};

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<String>,
    transceivers: Vec<TransceiverInfo>,
    attached_tracks: Vec<String>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    added_candidates: Vec<IceCandidate>,
    stats: VecDeque<RawStatsReport>,
    closed: bool,
    close_count: usize,
    fail_offer: bool,
    fail_answer: bool,
    fail_set_local: bool,
    fail_set_remote: bool,
    offer_delay: Option<Duration>,
}

/// Records every call; scripted failures are opt-in
///
/// Applying a remote offer to a handle without transceivers creates a
/// receive-only video and audio transceiver, the way a browser does.
#[derive(Default)]
pub struct FakePeerConnection {
    state: Mutex<FakeState>,
    handler: RwLock<Option<HandleEventHandler>>,
}

impl FakePeerConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_offer(&self) {
        self.state.lock().fail_offer = true;
    }

    pub fn fail_answer(&self) {
        self.state.lock().fail_answer = true;
    }

    pub fn fail_set_local(&self) {
        self.state.lock().fail_set_local = true;
    }

    pub fn fail_set_remote(&self, fail: bool) {
        self.state.lock().fail_set_remote = fail;
    }

    /// Make `create_offer` suspend before answering
    pub fn delay_offer(&self, delay: Duration) {
        self.state.lock().offer_delay = Some(delay);
    }

    pub fn push_stats(&self, report: RawStatsReport) {
        self.state.lock().stats.push_back(report);
    }

    /// Raise an event as the real connection would
    pub fn emit(&self, event: HandleEvent) {
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn has_handler(&self) -> bool {
        self.handler.read().is_some()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Position of the first call starting with `prefix`
    pub fn call_index(&self, prefix: &str) -> Option<usize> {
        self.state
            .lock()
            .calls
            .iter()
            .position(|c| c.starts_with(prefix))
    }

    pub fn transceiver_snapshot(&self) -> Vec<TransceiverInfo> {
        self.state.lock().transceivers.clone()
    }

    pub fn attached_tracks(&self) -> Vec<String> {
        self.state.lock().attached_tracks.clone()
    }

    pub fn local(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    pub fn added_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().added_candidates.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }

    fn record(&self, call: impl Into<String>) {
        self.state.lock().calls.push(call.into());
    }

    fn check_open(&self) -> Result<()> {
        if self.state.lock().closed {
            return Err(Error::PeerConnectionError("peer connection is closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnectionHandle for FakePeerConnection {
    async fn create_offer(&self, _options: &OfferOptions) -> Result<SessionDescription> {
        self.record("create_offer");
        let delay = self.state.lock().offer_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_open()?;
        if self.state.lock().fail_offer {
            return Err(Error::SdpError("scripted offer failure".into()));
        }
        Ok(SessionDescription::offer(CANNED_OFFER_SDP))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record("create_answer");
        self.check_open()?;
        let state = self.state.lock();
        if state.fail_answer {
            return Err(Error::SdpError("scripted answer failure".into()));
        }
        if state.remote.is_none() {
            return Err(Error::SdpError("no remote description".into()));
        }
        Ok(SessionDescription::answer(CANNED_ANSWER_SDP))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.record(format!("set_local_description:{}", description.sdp_type));
        self.check_open()?;
        let mut state = self.state.lock();
        if state.fail_set_local {
            return Err(Error::SdpError("scripted set_local failure".into()));
        }
        state.local = Some(description);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.record(format!("set_remote_description:{}", description.sdp_type));
        self.check_open()?;
        let mut state = self.state.lock();
        if state.fail_set_remote {
            return Err(Error::SdpError("scripted set_remote failure".into()));
        }
        if description.sdp_type == SdpType::Offer && state.transceivers.is_empty() {
            for (index, kind) in [TrackKind::Video, TrackKind::Audio].into_iter().enumerate() {
                state.transceivers.push(TransceiverInfo {
                    index,
                    kind,
                    direction: TransceiverDirection::RecvOnly,
                    has_send_track: false,
                });
            }
        }
        state.remote = Some(description);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(format!("add_ice_candidate:{}", candidate.candidate));
        self.check_open()?;
        let mut state = self.state.lock();
        if state.remote.is_none() {
            return Err(Error::IceCandidateError(
                "remote description not set".into(),
            ));
        }
        state.added_candidates.push(candidate);
        Ok(())
    }

    async fn transceivers(&self) -> Vec<TransceiverInfo> {
        self.state.lock().transceivers.clone()
    }

    async fn add_transceiver(
        &self,
        kind: TrackKind,
        direction: TransceiverDirection,
        track: Option<LocalAudioTrack>,
    ) -> Result<TransceiverInfo> {
        self.record(format!("add_transceiver:{}:{}", kind, direction));
        self.check_open()?;
        let mut state = self.state.lock();
        let info = TransceiverInfo {
            index: state.transceivers.len(),
            kind,
            direction,
            has_send_track: track.is_some(),
        };
        if let Some(track) = track {
            state.attached_tracks.push(track.id().to_string());
        }
        state.transceivers.push(info.clone());
        Ok(info)
    }

    async fn attach_send_track(&self, index: usize, track: LocalAudioTrack) -> Result<()> {
        self.record(format!("attach_send_track:{}", index));
        self.check_open()?;
        let mut state = self.state.lock();
        let transceiver = state
            .transceivers
            .get_mut(index)
            .ok_or_else(|| Error::MediaTrackError(format!("no transceiver {}", index)))?;
        transceiver.has_send_track = true;
        transceiver.direction = TransceiverDirection::SendRecv;
        state.attached_tracks.push(track.id().to_string());
        Ok(())
    }

    async fn set_transceiver_direction(
        &self,
        index: usize,
        direction: TransceiverDirection,
    ) -> Result<()> {
        self.record(format!("set_transceiver_direction:{}:{}", index, direction));
        let mut state = self.state.lock();
        let transceiver = state
            .transceivers
            .get_mut(index)
            .ok_or_else(|| Error::MediaTrackError(format!("no transceiver {}", index)))?;
        transceiver.direction = direction;
        Ok(())
    }

    async fn get_stats(&self) -> Result<RawStatsReport> {
        self.check_open()?;
        Ok(self.state.lock().stats.pop_front().unwrap_or_default())
    }

    async fn close(&self) -> Result<()> {
        self.record("close");
        let mut state = self.state.lock();
        state.closed = true;
        state.close_count += 1;
        Ok(())
    }

    fn set_event_handler(&self, handler: HandleEventHandler) {
        *self.handler.write() = Some(handler);
    }
}
