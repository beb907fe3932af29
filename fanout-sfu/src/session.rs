//! Signaling session and its lifecycle state machine
//!
//! A session wraps one transport plus the candidate queues that feed it.
//! Every mutable field sits behind a single async mutex, so candidate
//! posts, transport events, diagnostics and teardown are serialized per
//! session while different sessions proceed independently.
//!
//! ## States
//!
//! ```text
//! New ──(transport created, events registered)──> Negotiating
//! Negotiating ──(connected)──> Connected
//! New | Negotiating | Connected ──(failed)──> Failed
//! any ──(closed | teardown)──> Closed
//! ```
//!
//! Failed and Closed are terminal: the object stays in the registry until
//! swept, but it is never selectable again.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::candidate::{CandidateBuffer, CandidateDisposition};
use crate::error::{SfuError, TransportError};
use crate::media::{InboundTrack, MediaSink, TrackKind};
use crate::relay::{RelayHandle, RelayStats};
use crate::signal::IceCandidate;
use crate::transport::{ConnectionState, Transport, TransportEngine, TransportEvent};
use crate::types::{SessionId, SessionRole};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    New,
    Negotiating,
    Connected,
    Failed,
    Closed,
}

impl SessionState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    /// Next state after the engine reports `connection`
    #[must_use]
    pub const fn on_connection_state(self, connection: ConnectionState) -> Self {
        match (self, connection) {
            (Self::Closed, _) | (_, ConnectionState::Closed) => Self::Closed,
            (Self::Failed, _) | (_, ConnectionState::Failed) => Self::Failed,
            (Self::Negotiating, ConnectionState::Connected) => Self::Connected,
            (state, _) => state,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Negotiating => "negotiating",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

enum RoleState {
    Publisher {
        sink: Option<Arc<dyn MediaSink>>,
        relays: Vec<RelayHandle>,
    },
    Viewer {
        bound_publisher: Option<SessionId>,
    },
}

impl RoleState {
    fn for_role(role: SessionRole) -> Self {
        match role {
            SessionRole::Publisher => Self::Publisher {
                sink: None,
                relays: Vec::new(),
            },
            SessionRole::Viewer => Self::Viewer {
                bound_publisher: None,
            },
        }
    }
}

struct SessionInner {
    state: SessionState,
    transport: Option<Arc<dyn Transport>>,
    candidates: CandidateBuffer,
    role_state: RoleState,
    last_activity: Instant,
}

impl SessionInner {
    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Read-only view of a session, used by diagnostics and `/stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub role: SessionRole,
    pub state: SessionState,
    pub has_transport: bool,
    pub remote_description_set: bool,
    pub pending_inbound_candidates: usize,
    pub queued_outbound_candidates: usize,
    pub has_forwarding_sink: bool,
    pub sink_kind: Option<TrackKind>,
    pub bound_publisher: Option<SessionId>,
    pub relays: Vec<RelayStats>,
    pub idle_ms: u64,
}

/// A publisher or viewer signaling session
pub struct Session {
    id: SessionId,
    role: SessionRole,
    inner: Mutex<SessionInner>,
    /// Cancelled on teardown; parents the event pump and every relay task
    shutdown: CancellationToken,
}

impl Session {
    #[must_use]
    pub fn new(id: SessionId, role: SessionRole) -> Self {
        debug!(session_id = %id, role = %role, "Session created");
        Self {
            id,
            role,
            inner: Mutex::new(SessionInner {
                state: SessionState::New,
                transport: None,
                candidates: CandidateBuffer::new(),
                role_state: RoleState::for_role(role),
                last_activity: Instant::now(),
            }),
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub const fn role(&self) -> SessionRole {
        self.role
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner.lock().await.transport.clone()
    }

    pub async fn idle_for(&self) -> Duration {
        self.inner.lock().await.last_activity.elapsed()
    }

    /// Take ownership of a freshly created transport and start consuming
    /// its events: `New -> Negotiating`.
    ///
    /// Event delivery is wired up here, before the caller sets the remote
    /// description, so no early candidate or track event can be missed.
    pub async fn begin_negotiation(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
        engine: Arc<dyn TransportEngine>,
    ) -> Result<(), SfuError> {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::New {
            return Err(SfuError::NotNew(inner.state));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        transport.register_events(events_tx);
        inner.transport = Some(transport);
        inner.state = SessionState::Negotiating;
        inner.touch();
        drop(inner);

        tokio::spawn(pump_events(
            Arc::downgrade(self),
            events_rx,
            engine,
            self.shutdown.child_token(),
        ));

        info!(session_id = %self.id, role = %self.role, "Session negotiating");
        Ok(())
    }

    /// Record that the remote description is set and apply every buffered
    /// inbound candidate in posting order. Holds the session lock for the
    /// whole drain so concurrent posts queue behind it.
    ///
    /// Returns the number of candidates applied successfully.
    pub async fn complete_remote_description(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let pending = inner.candidates.release_pending();
        inner.touch();

        let Some(transport) = inner.transport.clone() else {
            warn!(
                session_id = %self.id,
                dropped = pending.len(),
                "Remote description completed without a transport"
            );
            return 0;
        };

        let total = pending.len();
        let mut applied = 0;
        for candidate in pending {
            match transport.add_candidate(candidate).await {
                Ok(()) => applied += 1,
                Err(e) => warn!(
                    session_id = %self.id,
                    role = %self.role,
                    error = %e,
                    "Failed to apply buffered ICE candidate"
                ),
            }
        }

        if total > 0 {
            debug!(session_id = %self.id, role = %self.role, applied, total, "Applied buffered ICE candidates");
        }
        applied
    }

    /// Accept a candidate posted by the client: buffer it while the remote
    /// description is missing, otherwise hand it to the transport now.
    pub async fn add_remote_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition, TransportError> {
        let mut inner = self.inner.lock().await;
        inner.touch();

        let Some(candidate) = inner.candidates.buffer_inbound(candidate) else {
            return Ok(CandidateDisposition::Buffered);
        };

        let transport = inner.transport.clone().ok_or_else(|| {
            TransportError::Candidate("session has no transport".to_string())
        })?;
        transport.add_candidate(candidate).await?;
        Ok(CandidateDisposition::Applied)
    }

    /// Hand out every locally gathered candidate not yet polled
    pub async fn take_local_candidates(&self) -> Vec<IceCandidate> {
        let mut inner = self.inner.lock().await;
        inner.touch();
        inner.candidates.take_outbound()
    }

    pub async fn forwarding_sink(&self) -> Option<Arc<dyn MediaSink>> {
        match &self.inner.lock().await.role_state {
            RoleState::Publisher { sink, .. } => sink.clone(),
            RoleState::Viewer { .. } => None,
        }
    }

    /// Connected and already owning a sink a viewer can attach
    pub async fn is_selectable(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.state == SessionState::Connected
            && matches!(&inner.role_state, RoleState::Publisher { sink: Some(_), .. })
    }

    pub async fn bind_publisher(&self, publisher: SessionId) {
        let mut inner = self.inner.lock().await;
        if let RoleState::Viewer { bound_publisher } = &mut inner.role_state {
            *bound_publisher = Some(publisher);
        }
    }

    pub async fn bound_publisher(&self) -> Option<SessionId> {
        match &self.inner.lock().await.role_state {
            RoleState::Viewer { bound_publisher } => bound_publisher.clone(),
            RoleState::Publisher { .. } => None,
        }
    }

    /// Apply one transport event under the session lock
    pub async fn apply_event(&self, event: TransportEvent, engine: &dyn TransportEngine) {
        let mut inner = self.inner.lock().await;
        match event {
            TransportEvent::CandidateDiscovered(candidate) => {
                inner.candidates.push_outbound(candidate);
            }
            TransportEvent::IceStateChanged(state) => {
                debug!(session_id = %self.id, role = %self.role, ice_state = %state, "ICE connection state changed");
            }
            TransportEvent::ConnectionStateChanged(connection) => {
                let previous = inner.state;
                let next = previous.on_connection_state(connection);
                if next != previous {
                    inner.state = next;
                    inner.touch();
                    info!(
                        session_id = %self.id,
                        role = %self.role,
                        from = %previous,
                        to = %next,
                        connection = %connection,
                        "Session state changed"
                    );
                } else {
                    debug!(session_id = %self.id, state = %previous, connection = %connection, "Connection state ignored");
                }
            }
            TransportEvent::TrackArrived(track) => {
                self.start_relay(&mut inner, track, engine);
            }
        }
    }

    fn start_relay(
        &self,
        inner: &mut SessionInner,
        track: Arc<dyn InboundTrack>,
        engine: &dyn TransportEngine,
    ) {
        if inner.state == SessionState::Closed {
            debug!(session_id = %self.id, track_id = %track.id(), "Track arrived after teardown, ignoring");
            return;
        }

        let RoleState::Publisher { sink, relays } = &mut inner.role_state else {
            warn!(session_id = %self.id, track_id = %track.id(), "Viewer session received an inbound track, ignoring");
            return;
        };

        let codec = track.codec();
        info!(
            session_id = %self.id,
            track_id = %track.id(),
            kind = %codec.kind,
            codec = %codec.mime_type,
            ssrc = track.ssrc(),
            "Received track from publisher"
        );

        if sink.is_none() {
            match engine.create_sink(&codec) {
                Ok(created) => {
                    info!(session_id = %self.id, sink_id = %created.id(), codec = %codec.mime_type, "Forwarding sink initialized");
                    *sink = Some(created);
                }
                Err(e) => {
                    warn!(session_id = %self.id, error = %e, "Failed to create forwarding sink");
                    return;
                }
            }
        }
        let Some(sink) = sink.clone() else {
            return;
        };

        let sink_kind = sink.codec().kind;
        if sink_kind != codec.kind {
            info!(
                session_id = %self.id,
                track_id = %track.id(),
                track_kind = %codec.kind,
                sink_kind = %sink_kind,
                "Track kind does not match forwarding sink, not relaying"
            );
            return;
        }

        relays.push(RelayHandle::spawn(
            self.id.clone(),
            track,
            sink,
            self.shutdown.child_token(),
        ));
    }

    /// Explicit teardown: cancel event delivery, stop and join every relay,
    /// release the transport and move to Closed. Safe to call more than once.
    pub async fn teardown(&self) {
        self.shutdown.cancel();

        let mut inner = self.inner.lock().await;
        let previous = inner.state;
        inner.state = SessionState::Closed;
        inner.touch();
        let transport = inner.transport.take();
        let relays = match &mut inner.role_state {
            RoleState::Publisher { relays, .. } => std::mem::take(relays),
            RoleState::Viewer { .. } => Vec::new(),
        };
        drop(inner);

        for relay in &relays {
            relay.cancel();
        }
        for exit in join_all(relays.into_iter().map(RelayHandle::join)).await {
            debug!(session_id = %self.id, ?exit, "Media relay joined");
        }

        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                warn!(session_id = %self.id, role = %self.role, error = %e, "Failed to close transport");
            }
        }

        if previous != SessionState::Closed {
            info!(session_id = %self.id, role = %self.role, from = %previous, "Session torn down");
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        let (has_forwarding_sink, sink_kind, bound_publisher, relays) = match &inner.role_state {
            RoleState::Publisher { sink, relays } => (
                sink.is_some(),
                sink.as_ref().map(|s| s.codec().kind),
                None,
                relays.iter().map(RelayHandle::stats).collect(),
            ),
            RoleState::Viewer { bound_publisher } => {
                (false, None, bound_publisher.clone(), Vec::new())
            }
        };

        SessionSnapshot {
            id: self.id.clone(),
            role: self.role,
            state: inner.state,
            has_transport: inner.transport.is_some(),
            remote_description_set: inner.candidates.is_remote_ready(),
            pending_inbound_candidates: inner.candidates.pending_len(),
            queued_outbound_candidates: inner.candidates.outbound_len(),
            has_forwarding_sink,
            sink_kind,
            bound_publisher,
            relays,
            idle_ms: u64::try_from(inner.last_activity.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
        debug!(session_id = %self.id, role = %self.role, "Session dropped");
    }
}

/// Deliver transport events to the session in the order they were posted
async fn pump_events(
    session: Weak<Session>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    engine: Arc<dyn TransportEngine>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(session) = session.upgrade() else {
            break;
        };
        session.apply_event(event, engine.as_ref()).await;
    }
}
