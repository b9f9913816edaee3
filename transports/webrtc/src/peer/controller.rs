//! Negotiation controller
//!
//! Owns the single peer connection handle of a session and sequences the
//! offer/answer exchange around it:
//!
//! ```text
//! create_offer:   setup transceivers -> create offer -> rewrite -> commit local -> on_offer_ready
//! receive_offer:  commit remote -> setup transceivers -> create answer -> rewrite -> commit local -> on_answer_ready
//! receive_answer: commit remote
//! ```
//!
//! Remote ICE candidates that arrive before the remote description is
//! committed are queued and flushed, in arrival order, by the commit.

use crate::config::{PageContext, PeerConnectionOptions, SessionConfig};
use crate::media::{microphone_permitted, MediaCapture, NoCapture};
use crate::observer::{NegotiationObserver, NoopObserver};
use crate::peer::connection::WebRtcHandle;
use crate::peer::handle::{HandleEvent, OfferOptions, PeerConnectionHandle};
use crate::peer::ice::IceCandidate;
use crate::peer::state::{
    ControllerState, DescriptionState, NegotiationGuard, NegotiationState, SignalingPhase,
};
use crate::peer::transceivers::setup_transceivers;
use crate::sdp::{rewrite_sdp, SdpPolicy, SessionDescription};
use crate::stats::{AggregatedStats, StatsAggregator};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, error, info, instrument, warn};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::peer_connection::signaling_state::RTCSignalingState;

/// Last states reported by the handle; observed only, never gated on
#[derive(Debug, Clone, Copy, Default)]
struct ObservedStates {
    signaling: RTCSignalingState,
    ice_connection: RTCIceConnectionState,
    ice_gathering: RTCIceGathererState,
}

/// Remote candidates waiting for the remote description
#[derive(Debug, Default)]
struct CandidateQueue {
    remote_ready: bool,
    pending: Vec<IceCandidate>,
}

/// Builder for [`PeerConnectionController`]
pub struct ControllerBuilder {
    options: PeerConnectionOptions,
    observer: Arc<dyn NegotiationObserver>,
    capture: Arc<dyn MediaCapture>,
    page: PageContext,
}

impl ControllerBuilder {
    fn new(options: PeerConnectionOptions) -> Self {
        Self {
            options,
            observer: Arc::new(NoopObserver),
            capture: Arc::new(NoCapture),
            page: PageContext::default(),
        }
    }

    /// Receiver of outbound events (default: ignore all)
    pub fn observer(mut self, observer: Arc<dyn NegotiationObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Microphone source (default: no device)
    pub fn capture(mut self, capture: Arc<dyn MediaCapture>) -> Self {
        self.capture = capture;
        self
    }

    /// Origin of the hosting page (default: `http://localhost/`)
    pub fn page_context(mut self, page: PageContext) -> Self {
        self.page = page;
        self
    }

    /// Build over a new webrtc-rs peer connection
    pub async fn build(self, config: &SessionConfig) -> Result<PeerConnectionController> {
        self.options.validate()?;
        let handle = WebRtcHandle::new(&self.options, config.force_turn).await?;
        self.build_with_handle(Arc::new(handle), config)
    }

    /// Build over an existing handle
    pub fn build_with_handle(
        self,
        handle: Arc<dyn PeerConnectionHandle>,
        config: &SessionConfig,
    ) -> Result<PeerConnectionController> {
        self.options.validate()?;

        let id = uuid::Uuid::new_v4().to_string();
        if config.force_turn {
            info!(controller_id = %id, "Forcing TURN usage: relay-only ICE transport policy");
            if self.options.turn_servers.is_empty() {
                warn!(
                    controller_id = %id,
                    "Relay-only ICE requested but no TURN server is configured; connection will not establish"
                );
            }
        }

        let observed = Arc::new(Mutex::new(ObservedStates::default()));
        install_event_handler(&handle, &id, Arc::clone(&self.observer), Arc::clone(&observed));

        Ok(PeerConnectionController {
            id,
            handle: RwLock::new(Some(handle)),
            observer: self.observer,
            capture: self.capture,
            page: self.page,
            options: self.options,
            relay_only: AtomicBool::new(config.force_turn),
            state: Arc::new(Mutex::new(ControllerState::default())),
            observed,
            candidates: AsyncMutex::new(CandidateQueue::default()),
            aggregator: Mutex::new(StatsAggregator::new()),
            dropped_candidates: AtomicU64::new(0),
        })
    }
}

fn install_event_handler(
    handle: &Arc<dyn PeerConnectionHandle>,
    controller_id: &str,
    observer: Arc<dyn NegotiationObserver>,
    observed: Arc<Mutex<ObservedStates>>,
) {
    let controller_id = controller_id.to_string();
    handle.set_event_handler(Arc::new(move |event: HandleEvent| match event {
        HandleEvent::SignalingStateChange(state) => {
            info!(controller_id = %controller_id, %state, "Signaling state change");
            observed.lock().signaling = state;
        }
        HandleEvent::IceConnectionStateChange(state) => {
            info!(controller_id = %controller_id, %state, "ICE connection state change");
            observed.lock().ice_connection = state;
        }
        HandleEvent::IceGatheringStateChange(state) => {
            info!(controller_id = %controller_id, %state, "ICE gathering state change");
            observed.lock().ice_gathering = state;
        }
        HandleEvent::Track(track) => {
            info!(
                controller_id = %controller_id,
                kind = %track.kind,
                ssrc = track.ssrc,
                "Remote track received"
            );
            observer.on_track(&track);
        }
        HandleEvent::IceCandidate(Some(candidate)) => {
            debug!(controller_id = %controller_id, candidate = %candidate.candidate, "Local ICE candidate");
            observer.on_ice_candidate(&candidate);
        }
        HandleEvent::IceCandidate(None) => {
            debug!(controller_id = %controller_id, "Local ICE candidate gathering finished");
        }
        HandleEvent::DataChannel(channel) => {
            info!(
                controller_id = %controller_id,
                label = %channel.label,
                id = ?channel.id,
                "Data channel opened"
            );
            observer.on_data_channel(&channel);
        }
    }));
}

/// Drives offer/answer negotiation over one peer connection handle
pub struct PeerConnectionController {
    id: String,
    handle: RwLock<Option<Arc<dyn PeerConnectionHandle>>>,
    observer: Arc<dyn NegotiationObserver>,
    capture: Arc<dyn MediaCapture>,
    page: PageContext,
    options: PeerConnectionOptions,
    relay_only: AtomicBool,
    state: Arc<Mutex<ControllerState>>,
    observed: Arc<Mutex<ObservedStates>>,
    candidates: AsyncMutex<CandidateQueue>,
    aggregator: Mutex<StatsAggregator>,
    dropped_candidates: AtomicU64,
}

impl PeerConnectionController {
    pub fn builder(options: PeerConnectionOptions) -> ControllerBuilder {
        ControllerBuilder::new(options)
    }

    /// Create, rewrite and commit a local offer.
    ///
    /// The negotiation token stays taken until the matching answer is
    /// committed by [`receive_answer`](Self::receive_answer).
    #[instrument(skip(self, options, config), fields(controller_id = %self.id))]
    pub async fn create_offer(
        &self,
        options: &OfferOptions,
        config: &SessionConfig,
    ) -> Result<SessionDescription> {
        let handle = self.current_handle().await?;
        let token = NegotiationGuard::acquire(&self.state)?;
        self.relay_only.store(config.force_turn, Ordering::Release);

        let use_mic = microphone_permitted(config.use_mic, &self.page);
        let microphone_active = self.setup_media(&handle, use_mic).await;

        let offer = match handle.create_offer(options).await {
            Ok(offer) => offer,
            Err(e) => {
                if self.is_closed() {
                    debug!(error = %e, "Offer creation aborted by close");
                    return Err(Error::ConnectionClosed);
                }
                error!(error = %e, "Failed to create offer");
                self.observer.on_setup_failed();
                return Err(e);
            }
        };
        self.state.lock().set_phase(SignalingPhase::OfferCreated);
        self.observer.on_connecting();

        let offer = self.apply_policy(&offer, microphone_active, config);
        self.commit_local(&handle, offer.clone()).await?;
        token.finish(NegotiationState::Negotiating);
        self.state.lock().set_phase(SignalingPhase::LocalDescriptionSet);

        info!(microphone_active, "Local offer committed");
        self.observer.on_offer_ready(&offer);
        Ok(offer)
    }

    /// Accept a remote offer and answer it.
    ///
    /// Returns the handle's committed local description, which is also what
    /// `on_answer_ready` receives.
    #[instrument(skip(self, offer, config), fields(controller_id = %self.id))]
    pub async fn receive_offer(
        &self,
        offer: SessionDescription,
        config: &SessionConfig,
    ) -> Result<SessionDescription> {
        let handle = self.current_handle().await?;
        let token = NegotiationGuard::acquire(&self.state)?;
        self.relay_only.store(config.force_turn, Ordering::Release);

        self.state.lock().set_phase(SignalingPhase::RemoteOfferReceived);
        if let Err(e) = self.commit_remote(&handle, offer).await {
            error!(error = %e, "Failed to apply remote offer");
            return Err(e);
        }
        self.state.lock().set_phase(SignalingPhase::RemoteDescriptionSet);

        let use_mic = microphone_permitted(config.use_mic, &self.page);
        let microphone_active = self.setup_media(&handle, use_mic).await;

        let answer = match handle.create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                if self.is_closed() {
                    debug!(error = %e, "Answer creation aborted by close");
                    return Err(Error::ConnectionClosed);
                }
                error!(error = %e, "Failed to create answer");
                return Err(e);
            }
        };
        self.state.lock().set_phase(SignalingPhase::AnswerCreated);

        let answer = self.apply_policy(&answer, microphone_active, config);
        self.commit_local(&handle, answer.clone()).await?;
        token.finish(NegotiationState::Connected);
        {
            let mut state = self.state.lock();
            state.set_phase(SignalingPhase::LocalDescriptionSet);
            state.set_phase(SignalingPhase::Connected);
        }

        let committed = handle.local_description().await.unwrap_or(answer);

        info!(microphone_active, "Local answer committed");
        self.observer.on_answer_ready(&committed);
        Ok(committed)
    }

    /// Commit the remote answer to our offer, completing the exchange.
    ///
    /// Only accepted while a committed local offer awaits its answer; any
    /// other answer fails with [`Error::InvalidState`] and leaves the
    /// negotiation token untouched.
    #[instrument(skip(self, answer), fields(controller_id = %self.id))]
    pub async fn receive_answer(&self, answer: SessionDescription) -> Result<()> {
        let handle = self.current_handle().await?;
        {
            let mut state = self.state.lock();
            match (state.negotiation, state.phase) {
                (NegotiationState::Closed, _) => return Err(Error::ConnectionClosed),
                (NegotiationState::Negotiating, SignalingPhase::LocalDescriptionSet) => {
                    state.set_phase(SignalingPhase::AnswerReceived);
                }
                (negotiation, phase) => {
                    drop(state);
                    warn!(?negotiation, ?phase, "Answer received while no offer awaits one");
                    return Err(Error::InvalidState(format!(
                        "no local offer awaiting an answer (phase {:?})",
                        phase
                    )));
                }
            }
        }

        match self.commit_remote(&handle, answer).await {
            Ok(()) => {
                let mut state = self.state.lock();
                if state.negotiation == NegotiationState::Negotiating {
                    state.negotiation = NegotiationState::Connected;
                }
                state.set_phase(SignalingPhase::RemoteDescriptionSet);
                state.set_phase(SignalingPhase::Connected);
                drop(state);
                info!("Remote answer committed");
                Ok(())
            }
            Err(e) => {
                let mut state = self.state.lock();
                if state.negotiation == NegotiationState::Negotiating {
                    state.negotiation = NegotiationState::Idle;
                }
                drop(state);
                error!(error = %e, "Failed to apply remote answer");
                Err(e)
            }
        }
    }

    /// Apply a remote ICE candidate.
    ///
    /// Under the relay-only policy a candidate whose line does not mention
    /// `relay` is dropped and counted; this is not an error.
    #[instrument(skip(self, candidate), fields(controller_id = %self.id))]
    pub async fn handle_on_ice(&self, candidate: IceCandidate) -> Result<()> {
        let handle = self.current_handle().await?;

        if self.drop_non_relay(&candidate) {
            return Ok(());
        }

        let mut queue = self.candidates.lock().await;
        if !queue.remote_ready {
            debug!(
                queued = queue.pending.len() + 1,
                parsed = %describe(&candidate),
                "Remote description not committed yet; queueing candidate"
            );
            queue.pending.push(candidate);
            return Ok(());
        }

        handle
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| self.closed_or(e))
    }

    /// Poll the handle, reduce the report and publish it via `on_stats`
    pub async fn generate_stats(&self) -> Result<AggregatedStats> {
        let handle = self.current_handle().await?;
        let report = handle.get_stats().await.map_err(|e| self.closed_or(e))?;
        let stats = self.aggregator.lock().process(&report);
        self.observer.on_stats(&stats);
        Ok(stats)
    }

    /// Close and release the handle. Later calls are no-ops.
    #[instrument(skip(self), fields(controller_id = %self.id))]
    pub async fn close(&self) -> Result<()> {
        let handle = self.handle.write().await.take();
        {
            let mut state = self.state.lock();
            state.negotiation = NegotiationState::Closed;
            state.set_phase(SignalingPhase::Closed);
        }

        match handle {
            Some(handle) => {
                info!("Closing peer connection");
                let pending = std::mem::take(&mut self.candidates.lock().await.pending);
                if !pending.is_empty() {
                    debug!(discarded = pending.len(), "Discarding queued remote candidates");
                }
                handle.close().await
            }
            None => {
                debug!("Peer connection already closed");
                Ok(())
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &PeerConnectionOptions {
        &self.options
    }

    pub fn negotiation_state(&self) -> NegotiationState {
        self.state.lock().negotiation
    }

    pub fn signaling_phase(&self) -> SignalingPhase {
        self.state.lock().phase
    }

    pub fn local_description_state(&self) -> DescriptionState {
        self.state.lock().local
    }

    pub fn remote_description_state(&self) -> DescriptionState {
        self.state.lock().remote
    }

    pub fn signaling_state(&self) -> RTCSignalingState {
        self.observed.lock().signaling
    }

    pub fn ice_connection_state(&self) -> RTCIceConnectionState {
        self.observed.lock().ice_connection
    }

    pub fn ice_gathering_state(&self) -> RTCIceGathererState {
        self.observed.lock().ice_gathering
    }

    /// Whether inbound candidates are currently filtered to relay only
    pub fn relay_only(&self) -> bool {
        self.relay_only.load(Ordering::Acquire)
    }

    /// Candidates dropped by the relay-only policy
    pub fn dropped_candidates(&self) -> u64 {
        self.dropped_candidates.load(Ordering::Relaxed)
    }

    /// Remote candidates waiting for the remote description
    pub async fn pending_candidates(&self) -> usize {
        self.candidates.lock().await.pending.len()
    }

    pub fn last_stats(&self) -> Option<AggregatedStats> {
        self.aggregator.lock().last().cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().negotiation == NegotiationState::Closed
    }

    pub async fn has_handle(&self) -> bool {
        self.handle.read().await.is_some()
    }

    async fn current_handle(&self) -> Result<Arc<dyn PeerConnectionHandle>> {
        self.handle
            .read()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or(Error::ConnectionClosed)
    }

    /// Failures of a handle closed underneath an operation are benign
    fn closed_or(&self, e: Error) -> Error {
        if self.is_closed() {
            debug!(error = %e, "Operation failed after close");
            Error::ConnectionClosed
        } else {
            e
        }
    }

    /// Apply the relay-only policy; true when `candidate` was dropped
    fn drop_non_relay(&self, candidate: &IceCandidate) -> bool {
        if !self.relay_only.load(Ordering::Acquire) || candidate.is_relay() {
            return false;
        }
        self.dropped_candidates.fetch_add(1, Ordering::Relaxed);
        info!(
            candidate = %candidate.candidate,
            parsed = %describe(candidate),
            "Dropping candidate because it was not TURN relay"
        );
        true
    }

    async fn setup_media(&self, handle: &Arc<dyn PeerConnectionHandle>, use_mic: bool) -> bool {
        match setup_transceivers(handle.as_ref(), self.capture.as_ref(), use_mic).await {
            Ok(setup) => {
                debug!(
                    transceivers = setup.transceivers.len(),
                    microphone_active = setup.microphone_active,
                    "Transceivers ready"
                );
                setup.microphone_active
            }
            Err(e) => {
                error!(error = %e, "Transceiver setup failed; continuing negotiation");
                false
            }
        }
    }

    fn apply_policy(
        &self,
        description: &SessionDescription,
        microphone_active: bool,
        config: &SessionConfig,
    ) -> SessionDescription {
        let policy = SdpPolicy {
            start_bitrate_kbps: self.options.start_bitrate_kbps,
            max_bitrate_kbps: self.options.max_bitrate_kbps,
            microphone_active,
            force_mono_audio: config.force_mono_audio,
        };
        let outcome = rewrite_sdp(&description.sdp, &policy);
        if outcome.is_noop() {
            debug!(sdp_type = %description.sdp_type, "No policy markers; description left unchanged");
        } else if outcome.bitrate_lines == 0 {
            debug!(sdp_type = %description.sdp_type, "No level-asymmetry-allowed fmtp line; bitrate hints not applied");
        } else if !outcome.opus_rewritten {
            debug!(sdp_type = %description.sdp_type, "No useinbandfec=1 marker; Opus parameters not applied");
        }
        description.with_sdp(outcome.sdp)
    }

    async fn commit_local(
        &self,
        handle: &Arc<dyn PeerConnectionHandle>,
        description: SessionDescription,
    ) -> Result<()> {
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.local, DescriptionState::Proposed)
        };

        match handle.set_local_description(description).await {
            Ok(()) => {
                self.state.lock().local = DescriptionState::Committed;
                Ok(())
            }
            Err(e) => {
                self.state.lock().local = previous;
                let e = self.closed_or(e);
                if !e.is_closed() {
                    error!(error = %e, "Failed to set local description");
                }
                Err(e)
            }
        }
    }

    /// Commit the remote description, then flush queued candidates in order.
    ///
    /// The queue lock is held throughout so candidates arriving meanwhile
    /// line up behind the flushed ones. Queued candidates pass the relay-only
    /// policy again, since it may have been switched on after they arrived.
    async fn commit_remote(
        &self,
        handle: &Arc<dyn PeerConnectionHandle>,
        description: SessionDescription,
    ) -> Result<()> {
        let mut queue = self.candidates.lock().await;
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.remote, DescriptionState::Proposed)
        };

        if let Err(e) = handle.set_remote_description(description).await {
            self.state.lock().remote = previous;
            return Err(self.closed_or(e));
        }
        self.state.lock().remote = DescriptionState::Committed;
        queue.remote_ready = true;

        let pending = std::mem::take(&mut queue.pending);
        if !pending.is_empty() {
            debug!(count = pending.len(), "Flushing queued remote candidates");
        }
        for candidate in pending {
            if self.drop_non_relay(&candidate) {
                continue;
            }
            if let Err(e) = handle.add_ice_candidate(candidate).await {
                warn!(error = %e, "Failed to add queued candidate");
            }
        }
        Ok(())
    }
}

/// Parsed summary of a candidate line for logs, falling back to the raw line
fn describe(candidate: &IceCandidate) -> String {
    candidate
        .descriptor()
        .map(|d| d.to_string())
        .unwrap_or_else(|| candidate.candidate.clone())
}

impl std::fmt::Debug for PeerConnectionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnectionController")
            .field("id", &self.id)
            .field("negotiation", &self.negotiation_state())
            .field("phase", &self.signaling_phase())
            .field("relay_only", &self.relay_only())
            .finish()
    }
}
