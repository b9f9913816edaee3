//! Session descriptions and the bitrate/channel policy rewrite applied to
//! every local description before it is committed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

/// `a=fmtp` lines carrying `level-asymmetry-allowed`, CRLF terminated
const LEVEL_ASYMMETRY_FMTP: &str = r"(a=fmtp:\d+ [^\r\n]*level-asymmetry-allowed=[^\r\n]*)\r\n";

/// Opus in-band FEC marker replaced by the audio parameter block
const OPUS_FEC_MARKER: &str = "useinbandfec=1";

/// Fixed `maxaveragebitrate` for Opus
pub const OPUS_MAX_AVERAGE_BITRATE: u32 = 510_000;

/// Capture rate advertised when the microphone is live
pub const OPUS_MAX_CAPTURE_RATE: u32 = 48_000;

static LEVEL_ASYMMETRY_RE: OnceLock<regex::Regex> = OnceLock::new();

fn level_asymmetry_re() -> &'static regex::Regex {
    LEVEL_ASYMMETRY_RE
        .get_or_init(|| regex::Regex::new(LEVEL_ASYMMETRY_FMTP).expect("fmtp pattern compiles"))
}

/// SDP type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
            SdpType::Pranswer => "pranswer",
            SdpType::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// An SDP document together with its role in the exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Same type, new payload
    pub fn with_sdp(&self, sdp: String) -> Self {
        Self {
            sdp_type: self.sdp_type,
            sdp,
        }
    }
}

/// Inputs of the rewrite, fixed for one negotiation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdpPolicy {
    pub start_bitrate_kbps: u32,
    pub max_bitrate_kbps: u32,
    pub microphone_active: bool,
    pub force_mono_audio: bool,
}

impl SdpPolicy {
    /// Parameter block substituted for the first `useinbandfec=1`
    pub fn opus_parameters(&self) -> String {
        let mut block = format!("maxaveragebitrate={};", OPUS_MAX_AVERAGE_BITRATE);
        if self.microphone_active {
            block.push_str(&format!("sprop-maxcapturerate={};", OPUS_MAX_CAPTURE_RATE));
        }
        if self.force_mono_audio {
            block.push_str("sprop-stereo=0;stereo=0;");
        } else {
            block.push_str("sprop-stereo=1;stereo=1;");
        }
        block.push_str(OPUS_FEC_MARKER);
        block
    }
}

/// Result of [`rewrite_sdp`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub sdp: String,
    /// Number of fmtp lines that received the bitrate hints
    pub bitrate_lines: usize,
    /// Whether the Opus marker was found and replaced
    pub opus_rewritten: bool,
}

impl RewriteOutcome {
    /// Neither marker was present; the payload is unchanged
    pub fn is_noop(&self) -> bool {
        self.bitrate_lines == 0 && !self.opus_rewritten
    }
}

/// Apply the bitrate and Opus channel policy to an SDP payload.
///
/// Every `a=fmtp:<pt> ...level-asymmetry-allowed=...` line gets
/// `;x-google-start-bitrate=<start>;x-google-max-bitrate=<max>` appended, and
/// the first `useinbandfec=1` is replaced by [`SdpPolicy::opus_parameters`].
/// Missing markers leave the corresponding part untouched.
pub fn rewrite_sdp(sdp: &str, policy: &SdpPolicy) -> RewriteOutcome {
    let re = level_asymmetry_re();
    let bitrate_lines = re.find_iter(sdp).count();
    let with_bitrates = re.replace_all(sdp, |caps: &regex::Captures<'_>| {
        format!(
            "{};x-google-start-bitrate={};x-google-max-bitrate={}\r\n",
            &caps[1], policy.start_bitrate_kbps, policy.max_bitrate_kbps
        )
    });

    let opus_rewritten = with_bitrates.contains(OPUS_FEC_MARKER);
    let sdp = if opus_rewritten {
        with_bitrates.replacen(OPUS_FEC_MARKER, &policy.opus_parameters(), 1)
    } else {
        with_bitrates.into_owned()
    };

    debug!(
        bitrate_lines,
        opus_rewritten,
        microphone_active = policy.microphone_active,
        force_mono = policy.force_mono_audio,
        "Applied SDP policy"
    );

    RewriteOutcome {
        sdp,
        bitrate_lines,
        opus_rewritten,
    }
}
