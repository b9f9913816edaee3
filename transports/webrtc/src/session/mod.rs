//! Session owner: one controller wired to a signaling channel
//!
//! ```text
//! signaling in  ── handle_message ──> PeerConnectionController
//! PeerConnectionController ── SessionObserver ──> SignalingSink (offer/answer/iceCandidate/stats)
//! ```

use crate::config::{
    PageContext, PeerConnectionOptions, SessionConfig, SharedConfig, SignallingEndpoint,
};
use crate::media::{MediaCapture, NoCapture};
use crate::observer::{NegotiationObserver, NoopObserver};
use crate::peer::{
    InboundDataChannel, InboundTrack, OfferOptions, PeerConnectionController,
    PeerConnectionHandle,
};
use crate::peer::ice::IceCandidate;
use crate::sdp::SessionDescription;
use crate::signaling::SignalMessage;
use crate::stats::AggregatedStats;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

/// Outbound half of the signaling channel
pub trait SignalingSink: Send + Sync {
    fn send(&self, message: SignalMessage) -> Result<()>;
}

impl SignalingSink for mpsc::UnboundedSender<SignalMessage> {
    fn send(&self, message: SignalMessage) -> Result<()> {
        mpsc::UnboundedSender::send(self, message)
            .map_err(|_| Error::SignalingError("Signaling channel closed".to_string()))
    }
}

/// Sends negotiation output to the sink, then hands every event to the
/// application observer
struct SessionObserver {
    sink: Arc<dyn SignalingSink>,
    inner: Arc<dyn NegotiationObserver>,
}

impl SessionObserver {
    fn forward(&self, message: SignalMessage) {
        let kind = message.kind();
        if let Err(e) = self.sink.send(message) {
            warn!(kind, error = %e, "Failed to send signaling message");
        }
    }

    fn forward_description(&self, description: &SessionDescription) {
        match SignalMessage::try_from(description.clone()) {
            Ok(message) => self.forward(message),
            Err(e) => warn!(error = %e, "Description not forwarded"),
        }
    }
}

impl NegotiationObserver for SessionObserver {
    fn on_track(&self, track: &InboundTrack) {
        self.inner.on_track(track);
    }

    fn on_ice_candidate(&self, candidate: &IceCandidate) {
        self.forward(SignalMessage::from(candidate.clone()));
        self.inner.on_ice_candidate(candidate);
    }

    fn on_data_channel(&self, channel: &InboundDataChannel) {
        self.inner.on_data_channel(channel);
    }

    fn on_stats(&self, stats: &AggregatedStats) {
        self.inner.on_stats(stats);
    }

    fn on_offer_ready(&self, offer: &SessionDescription) {
        self.forward_description(offer);
        self.inner.on_offer_ready(offer);
    }

    fn on_answer_ready(&self, answer: &SessionDescription) {
        self.forward_description(answer);
        self.inner.on_answer_ready(answer);
    }

    fn on_connecting(&self) {
        self.inner.on_connecting();
    }

    fn on_setup_failed(&self) {
        self.inner.on_setup_failed();
    }
}

/// Builder for [`StreamSession`]
pub struct SessionBuilder {
    sink: Arc<dyn SignalingSink>,
    options: PeerConnectionOptions,
    config: SharedConfig,
    observer: Arc<dyn NegotiationObserver>,
    capture: Arc<dyn MediaCapture>,
    page: PageContext,
    endpoint: Option<SignallingEndpoint>,
}

impl SessionBuilder {
    pub fn options(mut self, options: PeerConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Shared, live-updatable session configuration
    pub fn config(mut self, config: SharedConfig) -> Self {
        self.config = config;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn NegotiationObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn capture(mut self, capture: Arc<dyn MediaCapture>) -> Self {
        self.capture = capture;
        self
    }

    pub fn page_context(mut self, page: PageContext) -> Self {
        self.page = page;
        self
    }

    pub fn endpoint(mut self, endpoint: SignallingEndpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Build over a new webrtc-rs peer connection
    pub async fn build(self) -> Result<StreamSession> {
        let snapshot = self.config.snapshot();
        let (builder, parts) = self.split();
        let controller = builder.build(&snapshot).await?;
        Ok(parts.into_session(controller))
    }

    /// Build over an existing handle
    pub fn build_with_handle(self, handle: Arc<dyn PeerConnectionHandle>) -> Result<StreamSession> {
        let snapshot = self.config.snapshot();
        let (builder, parts) = self.split();
        let controller = builder.build_with_handle(handle, &snapshot)?;
        Ok(parts.into_session(controller))
    }

    fn split(self) -> (crate::peer::ControllerBuilder, SessionParts) {
        let observer = Arc::new(SessionObserver {
            sink: Arc::clone(&self.sink),
            inner: self.observer,
        });
        let builder = PeerConnectionController::builder(self.options)
            .observer(observer)
            .capture(self.capture)
            .page_context(self.page);
        let parts = SessionParts {
            sink: self.sink,
            config: self.config,
            endpoint: self.endpoint,
        };
        (builder, parts)
    }
}

struct SessionParts {
    sink: Arc<dyn SignalingSink>,
    config: SharedConfig,
    endpoint: Option<SignallingEndpoint>,
}

impl SessionParts {
    fn into_session(self, controller: PeerConnectionController) -> StreamSession {
        info!(controller_id = %controller.id(), "Stream session created");
        StreamSession {
            controller: Arc::new(controller),
            sink: self.sink,
            config: self.config,
            endpoint: self.endpoint,
            poller: Mutex::new(None),
        }
    }
}

/// One streaming session: a controller plus its signaling channel
pub struct StreamSession {
    controller: Arc<PeerConnectionController>,
    sink: Arc<dyn SignalingSink>,
    config: SharedConfig,
    endpoint: Option<SignallingEndpoint>,
    poller: Mutex<Option<AbortHandle>>,
}

impl StreamSession {
    pub fn builder(sink: Arc<dyn SignalingSink>) -> SessionBuilder {
        SessionBuilder {
            sink,
            options: PeerConnectionOptions::default(),
            config: SharedConfig::default(),
            observer: Arc::new(NoopObserver),
            capture: Arc::new(NoCapture),
            page: PageContext::default(),
            endpoint: None,
        }
    }

    /// Send the initial offer
    #[instrument(skip(self), fields(controller_id = %self.controller.id()))]
    pub async fn start(&self) -> Result<()> {
        let config = self.config.snapshot();
        debug!(?config, "Starting negotiation");
        self.controller
            .create_offer(&OfferOptions::default(), &config)
            .await
            .map(|_| ())
    }

    /// Route one inbound signaling message to the controller
    pub async fn handle_message(&self, message: SignalMessage) -> Result<()> {
        debug!(kind = message.kind(), "Inbound signaling message");
        match message {
            SignalMessage::Offer { sdp } => {
                let config = self.config.snapshot();
                self.controller
                    .receive_offer(SessionDescription::offer(sdp), &config)
                    .await
                    .map(|_| ())
            }
            SignalMessage::Answer { sdp } => {
                self.controller
                    .receive_answer(SessionDescription::answer(sdp))
                    .await
            }
            SignalMessage::IceCandidate { candidate } => {
                self.controller.handle_on_ice(candidate).await
            }
            SignalMessage::Stats { .. } => {
                warn!("Ignoring stats message from the remote end");
                Ok(())
            }
        }
    }

    /// Poll statistics every `interval`.
    ///
    /// Each poll reaches the observer; it is also sent to the signaling sink
    /// while the live config has `send_stats_to_server`. The task ends once
    /// the controller is closed. Replaces any running poller. A zero
    /// interval is rejected.
    pub fn spawn_stats_poller(&self, interval: Duration) -> Result<JoinHandle<()>> {
        if interval.is_zero() {
            return Err(Error::InvalidConfig(
                "Stats polling interval must be non-zero".to_string(),
            ));
        }

        let controller = Arc::clone(&self.controller);
        let config = self.config.clone();
        let sink = Arc::clone(&self.sink);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match controller.generate_stats().await {
                    Ok(stats) => {
                        if config.snapshot().send_stats_to_server {
                            if let Err(e) = sink.send(SignalMessage::from(stats)) {
                                warn!(error = %e, "Failed to send stats to server");
                            }
                        }
                    }
                    Err(e) if e.is_closed() => {
                        debug!("Controller closed; stopping stats poller");
                        break;
                    }
                    Err(e) => warn!(error = %e, "Stats poll failed"),
                }
            }
        });

        if let Some(previous) = self.poller.lock().replace(task.abort_handle()) {
            previous.abort();
        }
        Ok(task)
    }

    /// Stop polling and close the controller
    pub async fn close(&self) -> Result<()> {
        if let Some(poller) = self.poller.lock().take() {
            poller.abort();
        }
        self.controller.close().await
    }

    pub fn controller(&self) -> &Arc<PeerConnectionController> {
        &self.controller
    }

    /// Live configuration; updates apply to the next negotiation and stats poll
    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    /// Signalling URL to connect to, when an endpoint is configured
    pub fn signalling_url(&self) -> Option<url::Url> {
        self.endpoint.as_ref().map(SignallingEndpoint::resolve)
    }

    pub fn current_config(&self) -> SessionConfig {
        self.config.snapshot()
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("controller", &self.controller)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
