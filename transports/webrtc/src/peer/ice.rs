//! ICE candidates in their browser JSON shape

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A trickled ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// `candidate:...` attribute value
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, sdp_mid: impl Into<String>, sdp_mline_index: u16) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self.sdp_mline_index = Some(sdp_mline_index);
        self
    }

    /// Relay-path test used by the relay-only policy: a plain substring match
    /// on the candidate line
    pub fn is_relay(&self) -> bool {
        self.candidate.contains("relay")
    }

    /// Parsed form, for logging
    pub fn descriptor(&self) -> Option<CandidateDescriptor> {
        CandidateDescriptor::parse(&self.candidate).ok()
    }
}

/// Fields of a `candidate:` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateDescriptor {
    pub foundation: String,
    pub component: u16,
    pub protocol: String,
    pub priority: u32,
    pub address: String,
    pub port: u16,
    pub candidate_type: String,
}

impl CandidateDescriptor {
    /// Parse `candidate:<foundation> <component> <protocol> <priority> <address> <port> typ <type> ...`
    ///
    /// Accepts the line with or without the `a=` and `candidate:` prefixes.
    pub fn parse(line: &str) -> Result<Self> {
        let body = line.trim();
        let body = body.strip_prefix("a=").unwrap_or(body);
        let body = body.strip_prefix("candidate:").unwrap_or(body);

        let fields: Vec<&str> = body.split_whitespace().collect();
        if fields.len() < 8 || fields[6] != "typ" {
            return Err(Error::IceCandidateError(format!(
                "Malformed candidate line: {}",
                line
            )));
        }

        Ok(Self {
            foundation: fields[0].to_string(),
            component: parse_field(fields[1], "component")?,
            protocol: fields[2].to_lowercase(),
            priority: parse_field(fields[3], "priority")?,
            address: fields[4].to_string(),
            port: parse_field(fields[5], "port")?,
            candidate_type: fields[7].to_string(),
        })
    }

    pub fn is_relay(&self) -> bool {
        self.candidate_type == "relay"
    }
}

fn parse_field<T>(value: &str, what: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.parse::<T>().map_err(|e| {
        Error::IceCandidateError(format!("Invalid {} {:?} in candidate: {}", what, value, e))
    })
}

impl fmt::Display for CandidateDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} {}",
            self.protocol, self.address, self.port, self.candidate_type
        )
    }
}
