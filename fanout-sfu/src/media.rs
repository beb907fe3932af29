//! Media primitives shared between the session layer and the transport
//! engine: track kinds, codecs, the relayed unit, and the two trait objects
//! the relay moves units between.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

use crate::error::TransportError;

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Codec capability of a track, enough to build a matching sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCodec {
    pub kind: TrackKind,
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub sdp_fmtp_line: String,
}

impl MediaCodec {
    pub fn new(kind: TrackKind, mime_type: impl Into<String>, clock_rate: u32) -> Self {
        Self {
            kind,
            mime_type: mime_type.into(),
            clock_rate,
            channels: 0,
            sdp_fmtp_line: String::new(),
        }
    }
}

/// One RTP packet as read from a publisher, forwarded unmodified
#[derive(Debug, Clone)]
pub struct MediaUnit {
    /// Marshalled RTP packet
    pub data: Bytes,

    /// Source SSRC
    pub ssrc: u32,

    /// Sequence number
    pub sequence_number: u16,

    /// Timestamp
    pub timestamp: u32,
}

impl MediaUnit {
    pub fn new(data: Bytes, ssrc: u32, sequence_number: u16, timestamp: u32) -> Self {
        Self {
            data,
            ssrc,
            sequence_number,
            timestamp,
        }
    }
}

/// A publisher's inbound track as exposed by the transport engine
#[async_trait]
pub trait InboundTrack: Send + Sync {
    fn id(&self) -> String;

    fn codec(&self) -> MediaCodec;

    fn ssrc(&self) -> u32;

    /// Suspend until one unit arrives or the transport fails
    async fn read_unit(&self) -> Result<MediaUnit, TransportError>;
}

/// The forwarding sink: written by one relay task, attached as the outbound
/// source of any number of viewer transports.
#[async_trait]
pub trait MediaSink: Send + Sync {
    fn id(&self) -> String;

    fn codec(&self) -> MediaCodec;

    async fn write_unit(&self, unit: &MediaUnit) -> Result<(), TransportError>;

    /// Lets an engine recover its concrete sink type when attaching
    fn as_any(&self) -> &dyn Any;
}
