//! Configuration types for the negotiation core

use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use url::{Host, Url};

/// Options recognized per negotiation attempt
///
/// Owned by the hosting application. The controller reads one snapshot at the
/// start of every `create_offer` / `receive_offer` call, so toggling a field
/// between attempts takes effect on the next negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Restrict ICE to TURN relay candidates
    #[serde(rename = "ForceTURN")]
    pub force_turn: bool,

    /// Capture the local microphone and send it upstream
    #[serde(rename = "UseMic")]
    pub use_mic: bool,

    /// Negotiate mono Opus instead of stereo
    #[serde(rename = "ForceMonoAudio")]
    pub force_mono_audio: bool,

    /// Forward aggregated stats to the signaling server
    #[serde(rename = "SendStatsToServer")]
    pub send_stats_to_server: bool,
}

impl SessionConfig {
    /// Enable relay-only ICE
    pub fn with_force_turn(mut self, force_turn: bool) -> Self {
        self.force_turn = force_turn;
        self
    }

    /// Request microphone capture
    pub fn with_use_mic(mut self, use_mic: bool) -> Self {
        self.use_mic = use_mic;
        self
    }

    /// Force mono audio parameters in the rewritten SDP
    pub fn with_force_mono_audio(mut self, force_mono_audio: bool) -> Self {
        self.force_mono_audio = force_mono_audio;
        self
    }

    /// Forward stats to the signaling server
    pub fn with_send_stats_to_server(mut self, send_stats_to_server: bool) -> Self {
        self.send_stats_to_server = send_stats_to_server;
        self
    }
}

/// Runtime-togglable session configuration shared with the hosting application
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<SessionConfig>>,
}

impl SharedConfig {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Copy of the current settings
    pub fn snapshot(&self) -> SessionConfig {
        *self.inner.read()
    }

    /// Mutate the settings in place; the next negotiation attempt sees the change
    pub fn update<F: FnOnce(&mut SessionConfig)>(&self, f: F) {
        f(&mut self.inner.write());
    }
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Transport options handed to the controller at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConnectionOptions {
    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations
    pub turn_servers: Vec<TurnServerConfig>,

    /// Value written into `x-google-start-bitrate` (kbps)
    pub start_bitrate_kbps: u32,

    /// Value written into `x-google-max-bitrate` (kbps)
    pub max_bitrate_kbps: u32,
}

impl Default for PeerConnectionOptions {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            start_bitrate_kbps: 10_000,
            max_bitrate_kbps: 100_000,
        }
    }
}

impl PeerConnectionOptions {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - a STUN URL does not start with `stun:` or `stuns:`
    /// - a TURN URL does not start with `turn:` or `turns:`
    /// - `max_bitrate_kbps` is zero
    /// - `start_bitrate_kbps` exceeds `max_bitrate_kbps`
    pub fn validate(&self) -> Result<()> {
        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server URL must start with stun: or stuns:, got {}",
                    url
                )));
            }
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server URL must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }

        if self.max_bitrate_kbps == 0 {
            return Err(Error::InvalidConfig(
                "max_bitrate_kbps must be greater than zero".to_string(),
            ));
        }

        if self.start_bitrate_kbps > self.max_bitrate_kbps {
            return Err(Error::InvalidConfig(format!(
                "start_bitrate_kbps ({}) exceeds max_bitrate_kbps ({})",
                self.start_bitrate_kbps, self.max_bitrate_kbps
            )));
        }

        Ok(())
    }

    /// Replace the STUN server list
    pub fn with_stun_servers(mut self, stun_servers: Vec<String>) -> Self {
        self.stun_servers = stun_servers;
        self
    }

    /// Add TURN servers to this configuration
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    /// Set the start/max video bitrate policy
    pub fn with_bitrates(mut self, start_kbps: u32, max_kbps: u32) -> Self {
        self.start_bitrate_kbps = start_kbps;
        self.max_bitrate_kbps = max_kbps;
        self
    }
}

/// Origin of the page hosting the client
///
/// Microphone capture is only available from a secure context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext {
    origin: Url,
}

impl PageContext {
    pub fn new(origin: Url) -> Self {
        Self { origin }
    }

    /// Parse an origin string such as `https://example.com`
    pub fn parse(origin: &str) -> Result<Self> {
        let origin = Url::parse(origin)
            .map_err(|e| Error::InvalidConfig(format!("Invalid page origin {}: {}", origin, e)))?;
        Ok(Self { origin })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// HTTPS/WSS, or a loopback host (`localhost`, `*.localhost`,
    /// `127.0.0.0/8`, `[::1]`)
    pub fn is_secure(&self) -> bool {
        if matches!(self.origin.scheme(), "https" | "wss") {
            return true;
        }
        match self.origin.host() {
            Some(Host::Domain(domain)) => {
                let domain = domain.trim_end_matches('.').to_ascii_lowercase();
                domain == "localhost" || domain.ends_with(".localhost")
            }
            Some(Host::Ipv4(ip)) => ip.is_loopback(),
            Some(Host::Ipv6(ip)) => ip.is_loopback(),
            None => false,
        }
    }
}

const DEFAULT_PAGE_ORIGIN: &str = "http://localhost/";

impl Default for PageContext {
    fn default() -> Self {
        Self {
            origin: Url::parse(DEFAULT_PAGE_ORIGIN).expect("static origin parses"),
        }
    }
}

/// Formats the signalling URL before a connection attempt
pub type UrlFormatter = Arc<dyn Fn(&Url) -> Url + Send + Sync>;

/// Signalling endpoint with an optional configuration-supplied URL formatter
#[derive(Clone)]
pub struct SignallingEndpoint {
    url: Url,
    formatter: Option<UrlFormatter>,
}

impl SignallingEndpoint {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            formatter: None,
        }
    }

    /// Parse a `ws://` or `wss://` signalling URL
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| Error::InvalidConfig(format!("Invalid signalling URL {}: {}", url, e)))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(Error::InvalidConfig(format!(
                "signalling URL must start with ws:// or wss://, got {}",
                url
            )));
        }
        Ok(Self::new(parsed))
    }

    /// Install the URL formatting function
    pub fn with_formatter<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&Url) -> Url + Send + Sync + 'static,
    {
        self.formatter = Some(Arc::new(formatter));
        self
    }

    /// Base URL as configured
    pub fn base_url(&self) -> &Url {
        &self.url
    }

    /// URL to connect to, after the formatter (if any) has been applied
    pub fn resolve(&self) -> Url {
        match &self.formatter {
            Some(format) => format(&self.url),
            None => self.url.clone(),
        }
    }
}

impl fmt::Debug for SignallingEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignallingEndpoint")
            .field("url", &self.url.as_str())
            .field("formatter", &self.formatter.is_some())
            .finish()
    }
}
