//! Signaling payloads exchanged with clients
//!
//! Field names follow the browser `RTCSessionDescriptionInit` and
//! `RTCIceCandidateInit` dictionaries so the JSON a page produces can be
//! posted as-is.

use serde::{Deserialize, Serialize};

use crate::error::SfuError;

/// SDP type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl SdpType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Pranswer => "pranswer",
            Self::Rollback => "rollback",
        }
    }
}

/// Session description (SDP)
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

    /// Decode a posted `RTCSessionDescriptionInit`
    pub fn from_json(body: &[u8]) -> Result<Self, SfuError> {
        serde_json::from_slice(body).map_err(|e| SfuError::InvalidOffer(e.to_string()))
    }

    /// Accept only a non-empty offer
    pub fn validate_offer(&self) -> Result<(), SfuError> {
        if self.sdp_type != SdpType::Offer {
            return Err(SfuError::InvalidOffer(format!(
                "expected SDP type offer, got {}",
                self.sdp_type.as_str()
            )));
        }
        if self.sdp.trim().is_empty() {
            return Err(SfuError::InvalidOffer("empty SDP".to_string()));
        }
        Ok(())
    }
}

/// ICE candidate for WebRTC connection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }

    /// Decode a posted `RTCIceCandidateInit`
    pub fn from_json(body: &[u8]) -> Result<Self, SfuError> {
        serde_json::from_slice(body).map_err(|e| SfuError::InvalidCandidate(e.to_string()))
    }

    /// An empty `candidate` string is the browser's end-of-candidates
    /// marker; it is buffered and applied like any other candidate.
    #[must_use]
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.is_empty()
    }
}
