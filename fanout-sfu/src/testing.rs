//! In-memory transport engine for tests
//!
//! `ScriptedEngine` records every call made through the transport boundary
//! in order, so tests can assert ordering (callbacks registered before the
//! remote description, buffered candidates applied in posting order, no
//! transport created for a rejected viewer). Failures can be injected per
//! operation.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use crate::error::TransportError;
use crate::media::{InboundTrack, MediaCodec, MediaSink, MediaUnit};
use crate::session::{Session, SessionState};
use crate::signal::{IceCandidate, SessionDescription};
use crate::transport::{EventSender, SenderInfo, Transport, TransportEngine, TransportEvent};
use crate::types::{SessionId, SessionRole};

/// One call observed at the transport boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    CreateTransport,
    RegisterEvents,
    SetRemoteDescription,
    CreateAnswer,
    SetLocalDescription,
    AddCandidate(String),
    AttachSink(String),
    Close,
}

/// Operation to make fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateTransport,
    SetRemoteDescription,
    CreateAnswer,
    SetLocalDescription,
    AttachSink,
    CreateSink,
}

#[derive(Default)]
struct EngineLog {
    calls: Mutex<Vec<EngineCall>>,
    added: Mutex<Vec<IceCandidate>>,
    rejected: Mutex<HashSet<String>>,
    failures: Mutex<HashSet<FailPoint>>,
    remote_gate: Mutex<Option<Arc<Notify>>>,
}

impl EngineLog {
    fn record(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }

    fn fails(&self, point: FailPoint) -> bool {
        self.failures.lock().contains(&point)
    }
}

#[derive(Default)]
pub struct ScriptedEngine {
    log: Arc<EngineLog>,
    transports: Mutex<Vec<Arc<ScriptedTransport>>>,
    sinks_created: AtomicUsize,
}

impl ScriptedEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_at(&self, point: FailPoint) {
        self.log.failures.lock().insert(point);
    }

    /// Hold every `set_remote_description` until the returned gate is
    /// notified, keeping sessions in Negotiating with no remote description
    pub fn hold_remote_description(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.log.remote_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Make `add_candidate` fail for this candidate string
    pub fn reject_candidate(&self, candidate: &str) {
        self.log.rejected.lock().insert(candidate.to_string());
    }

    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.log.calls.lock().clone()
    }

    /// Candidates successfully applied to any transport, in order
    #[must_use]
    pub fn added_candidates(&self) -> Vec<IceCandidate> {
        self.log.added.lock().clone()
    }

    #[must_use]
    pub fn transports_created(&self) -> usize {
        self.transports.lock().len()
    }

    #[must_use]
    pub fn last_transport(&self) -> Option<Arc<ScriptedTransport>> {
        self.transports.lock().last().cloned()
    }

    #[must_use]
    pub fn transport_for(&self, session_id: &SessionId, role: SessionRole) -> Option<Arc<ScriptedTransport>> {
        self.transports
            .lock()
            .iter()
            .rev()
            .find(|t| &t.session_id == session_id && t.role == role)
            .cloned()
    }

    #[must_use]
    pub fn sinks_created(&self) -> usize {
        self.sinks_created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportEngine for ScriptedEngine {
    async fn create_transport(
        &self,
        session_id: &SessionId,
        role: SessionRole,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        if self.log.fails(FailPoint::CreateTransport) {
            return Err(TransportError::Create("scripted failure".to_string()));
        }
        self.log.record(EngineCall::CreateTransport);

        let transport = Arc::new(ScriptedTransport {
            session_id: session_id.clone(),
            role,
            log: Arc::clone(&self.log),
            events: Mutex::new(None),
            remote_sdp: Mutex::new(None),
            attached: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.transports.lock().push(Arc::clone(&transport));
        Ok(transport)
    }

    fn create_sink(&self, codec: &MediaCodec) -> Result<Arc<dyn MediaSink>, TransportError> {
        if self.log.fails(FailPoint::CreateSink) {
            return Err(TransportError::Sink("scripted failure".to_string()));
        }
        let n = self.sinks_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingSink::new(format!("sink-{n}"), codec.clone())))
    }
}

pub struct ScriptedTransport {
    pub session_id: SessionId,
    pub role: SessionRole,
    log: Arc<EngineLog>,
    events: Mutex<Option<EventSender>>,
    remote_sdp: Mutex<Option<String>>,
    attached: Mutex<Vec<Arc<dyn MediaSink>>>,
    closed: AtomicBool,
}

impl ScriptedTransport {
    /// Post an event as the engine would from one of its callbacks.
    /// Returns false when no event sender is registered.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    #[must_use]
    pub fn remote_sdp(&self) -> Option<String> {
        self.remote_sdp.lock().clone()
    }

    #[must_use]
    pub fn attached_sinks(&self) -> Vec<Arc<dyn MediaSink>> {
        self.attached.lock().clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn register_events(&self, events: EventSender) {
        self.log.record(EngineCall::RegisterEvents);
        *self.events.lock() = Some(events);
    }

    async fn set_remote_description(&self, offer: SessionDescription) -> Result<(), TransportError> {
        if self.log.fails(FailPoint::SetRemoteDescription) {
            return Err(TransportError::RemoteDescription("scripted failure".to_string()));
        }
        let gate = self.log.remote_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.log.record(EngineCall::SetRemoteDescription);
        *self.remote_sdp.lock() = Some(offer.sdp);
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        if self.log.fails(FailPoint::CreateAnswer) {
            return Err(TransportError::Answer("scripted failure".to_string()));
        }
        self.log.record(EngineCall::CreateAnswer);
        Ok(SessionDescription::answer(format!(
            "v=0\r\ns=scripted-answer-{}\r\n",
            self.session_id
        )))
    }

    async fn set_local_description(&self, _answer: SessionDescription) -> Result<(), TransportError> {
        if self.log.fails(FailPoint::SetLocalDescription) {
            return Err(TransportError::LocalDescription("scripted failure".to_string()));
        }
        self.log.record(EngineCall::SetLocalDescription);
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        if self.log.rejected.lock().contains(&candidate.candidate) {
            return Err(TransportError::Candidate("scripted rejection".to_string()));
        }
        self.log.record(EngineCall::AddCandidate(candidate.candidate.clone()));
        self.log.added.lock().push(candidate);
        Ok(())
    }

    async fn attach_sink(&self, sink: Arc<dyn MediaSink>) -> Result<(), TransportError> {
        if self.log.fails(FailPoint::AttachSink) {
            return Err(TransportError::Sink("scripted failure".to_string()));
        }
        self.log.record(EngineCall::AttachSink(sink.id()));
        self.attached.lock().push(sink);
        Ok(())
    }

    async fn senders(&self) -> Vec<SenderInfo> {
        self.attached
            .lock()
            .iter()
            .map(|sink| SenderInfo {
                kind: Some(sink.codec().kind),
                track_id: Some(sink.id()),
            })
            .collect()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.log.record(EngineCall::Close);
        self.closed.store(true, Ordering::SeqCst);
        self.events.lock().take();
        Ok(())
    }
}

/// Inbound track fed by the test; `read_unit` suspends while nothing is queued
pub struct ScriptedTrack {
    id: String,
    codec: MediaCodec,
    tx: mpsc::UnboundedSender<Result<MediaUnit, TransportError>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<MediaUnit, TransportError>>>,
}

impl ScriptedTrack {
    pub fn new(id: impl Into<String>, codec: MediaCodec) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            id: id.into(),
            codec,
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    pub fn push_unit(&self, sequence_number: u16) {
        let payload = Bytes::from(sequence_number.to_be_bytes().to_vec());
        let unit = MediaUnit::new(payload, 0x1234, sequence_number, u32::from(sequence_number) * 3000);
        let _ = self.tx.send(Ok(unit));
    }

    pub fn fail_next_read(&self) {
        let _ = self.tx.send(Err(TransportError::Read("scripted read error".to_string())));
    }
}

#[async_trait]
impl InboundTrack for ScriptedTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn codec(&self) -> MediaCodec {
        self.codec.clone()
    }

    fn ssrc(&self) -> u32 {
        0x1234
    }

    async fn read_unit(&self) -> Result<MediaUnit, TransportError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .unwrap_or_else(|| Err(TransportError::Read("track ended".to_string())))
    }
}

/// Sink that keeps every unit written to it
pub struct RecordingSink {
    id: String,
    codec: MediaCodec,
    units: Mutex<Vec<MediaUnit>>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub fn new(id: impl Into<String>, codec: MediaCodec) -> Self {
        Self {
            id: id.into(),
            codec,
            units: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn sequence_numbers(&self) -> Vec<u16> {
        self.units.lock().iter().map(|u| u.sequence_number).collect()
    }

    /// Wait up to one second for at least `count` units
    pub async fn wait_for_units(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while self.units.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sink did not receive enough units");
    }
}

#[async_trait]
impl MediaSink for RecordingSink {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn codec(&self) -> MediaCodec {
        self.codec.clone()
    }

    async fn write_unit(&self, unit: &MediaUnit) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Write("scripted write error".to_string()));
        }
        self.units.lock().push(unit.clone());
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Wait up to one second for `session` to reach `state`
pub async fn wait_for_state(session: &Session, state: SessionState) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while session.state().await != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session {} never reached {state}", session.id()));
}
