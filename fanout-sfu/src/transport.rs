//! Transport engine boundary
//!
//! The session layer never talks to a peer-connection library directly. It
//! creates transports through a [`TransportEngine`], drives negotiation
//! through [`Transport`], and learns about asynchronous happenings only via
//! [`TransportEvent`]s posted into the session's event channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::media::{InboundTrack, MediaCodec, MediaSink, TrackKind};
use crate::signal::{IceCandidate, SessionDescription};
use crate::types::{SessionId, SessionRole};

/// Overall connection state reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Something the engine observed on a transport
pub enum TransportEvent {
    /// A local candidate was gathered
    CandidateDiscovered(IceCandidate),
    /// ICE connectivity changed; diagnostic only
    IceStateChanged(String),
    /// The overall connection state changed
    ConnectionStateChanged(ConnectionState),
    /// The remote side started sending a track
    TrackArrived(Arc<dyn InboundTrack>),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CandidateDiscovered(c) => f.debug_tuple("CandidateDiscovered").field(c).finish(),
            Self::IceStateChanged(s) => f.debug_tuple("IceStateChanged").field(s).finish(),
            Self::ConnectionStateChanged(s) => {
                f.debug_tuple("ConnectionStateChanged").field(s).finish()
            }
            Self::TrackArrived(t) => f.debug_tuple("TrackArrived").field(&t.id()).finish(),
        }
    }
}

/// Channel end handed to a transport for event delivery
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Summary of one outbound RTP sender, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    pub kind: Option<TrackKind>,
    pub track_id: Option<String>,
}

/// Factory for transports and forwarding sinks
#[async_trait]
pub trait TransportEngine: Send + Sync {
    async fn create_transport(
        &self,
        session_id: &SessionId,
        role: SessionRole,
    ) -> Result<Arc<dyn Transport>, TransportError>;

    /// Build a sink that viewers can attach, matching `codec`
    fn create_sink(&self, codec: &MediaCodec) -> Result<Arc<dyn MediaSink>, TransportError>;
}

/// One peer transport instance
#[async_trait]
pub trait Transport: Send + Sync {
    /// Route every engine callback into `events`. Must be called before
    /// the remote description is set so no early event is lost.
    fn register_events(&self, events: EventSender);

    async fn set_remote_description(&self, offer: SessionDescription) -> Result<(), TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, answer: SessionDescription) -> Result<(), TransportError>;

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// Send the sink's media to the remote side
    async fn attach_sink(&self, sink: Arc<dyn MediaSink>) -> Result<(), TransportError>;

    async fn senders(&self) -> Vec<SenderInfo>;

    async fn close(&self) -> Result<(), TransportError>;
}
