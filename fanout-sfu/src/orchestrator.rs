//! Signaling orchestrator - offer/answer and candidate exchange
//!
//! Drives a session through negotiation:
//! - Publish: create transport, register events, set remote description,
//!   drain buffered candidates, answer
//! - View: select a publisher first, then attach its forwarding sink to a
//!   fresh transport before negotiating the same way
//! - Candidate posts and polls keyed by session id and role

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::candidate::CandidateDisposition;
use crate::error::{Result, SfuError};
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionState};
use crate::signal::{IceCandidate, SessionDescription};
use crate::transport::{Transport, TransportEngine};
use crate::types::{SessionId, SessionRole};

pub struct SignalingOrchestrator {
    registry: Arc<dyn SessionRegistry>,
    engine: Arc<dyn TransportEngine>,
}

impl SignalingOrchestrator {
    pub fn new(registry: Arc<dyn SessionRegistry>, engine: Arc<dyn TransportEngine>) -> Self {
        info!("Signaling orchestrator initialized");
        Self { registry, engine }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<dyn SessionRegistry> {
        &self.registry
    }

    /// Accept a publisher offer and return the answer
    pub async fn publish(
        &self,
        id: &SessionId,
        offer: SessionDescription,
    ) -> Result<SessionDescription> {
        offer.validate_offer()?;

        let session = self.resolve(id, SessionRole::Publisher).await;
        let transport = self
            .engine
            .create_transport(id, SessionRole::Publisher)
            .await?;

        self.start(&session, &transport).await?;
        let answer = negotiate(&session, &transport, offer).await?;

        info!(session_id = %id, "Publisher answered");
        Ok(answer)
    }

    /// Accept a viewer offer, bind it to a Connected publisher and return
    /// the answer. Fails with `NoPublisher` before creating anything when no
    /// publisher is eligible.
    pub async fn view(
        &self,
        id: &SessionId,
        offer: SessionDescription,
    ) -> Result<SessionDescription> {
        offer.validate_offer()?;

        let publisher = self
            .registry
            .select_connected_publisher()
            .await
            .ok_or(SfuError::NoPublisher)?;
        let sink = publisher
            .forwarding_sink()
            .await
            .ok_or(SfuError::NoPublisher)?;

        let session = self.resolve(id, SessionRole::Viewer).await;
        let transport = self.engine.create_transport(id, SessionRole::Viewer).await?;

        if let Err(e) = transport.attach_sink(sink).await {
            warn!(session_id = %id, publisher_id = %publisher.id(), error = %e, "Failed to attach forwarding sink");
            close_quietly(id, transport.as_ref()).await;
            return Err(e.into());
        }

        self.start(&session, &transport).await?;
        session.bind_publisher(publisher.id().clone()).await;
        let answer = negotiate(&session, &transport, offer).await?;

        info!(session_id = %id, publisher_id = %publisher.id(), "Viewer answered");
        Ok(answer)
    }

    /// Accept a remote candidate posted by the client, including the empty
    /// end-of-candidates marker. Candidates for a session that does not
    /// exist are dropped.
    pub async fn add_candidate(
        &self,
        id: &SessionId,
        role: SessionRole,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition> {
        let Some(session) = self.registry.lookup(id, role) else {
            debug!(session_id = %id, role = %role, "Candidate for unknown session dropped");
            return Ok(CandidateDisposition::Dropped);
        };

        let end_of_candidates = candidate.is_end_of_candidates();
        let disposition = session.add_remote_candidate(candidate).await?;
        debug!(session_id = %id, role = %role, ?disposition, end_of_candidates, "Remote ICE candidate accepted");
        Ok(disposition)
    }

    /// Hand out locally gathered candidates not yet returned by a poll
    pub async fn poll_candidates(&self, id: &SessionId, role: SessionRole) -> Vec<IceCandidate> {
        match self.registry.lookup(id, role) {
            Some(session) => session.take_local_candidates().await,
            None => Vec::new(),
        }
    }

    /// Close every session; used on process shutdown
    pub async fn shutdown(&self) {
        info!("Closing all signaling sessions");
        self.registry.close_all().await;
    }

    /// Existing session if still New, otherwise a fresh replacement
    async fn resolve(&self, id: &SessionId, role: SessionRole) -> Arc<Session> {
        let session = self.registry.lookup_or_create(id, role);
        if session.state().await == SessionState::New {
            session
        } else {
            self.registry.replace(id, role).await
        }
    }

    async fn start(&self, session: &Arc<Session>, transport: &Arc<dyn Transport>) -> Result<()> {
        if let Err(e) = session
            .begin_negotiation(Arc::clone(transport), Arc::clone(&self.engine))
            .await
        {
            warn!(session_id = %session.id(), role = %session.role(), error = %e, "Session already negotiating");
            close_quietly(session.id(), transport.as_ref()).await;
            return Err(e);
        }
        Ok(())
    }
}

/// Remote description, candidate drain, answer. The session lock is not
/// held while the remote description is applied.
async fn negotiate(
    session: &Session,
    transport: &Arc<dyn Transport>,
    offer: SessionDescription,
) -> Result<SessionDescription> {
    transport.set_remote_description(offer).await?;
    session.complete_remote_description().await;

    let answer = transport.create_answer().await?;
    transport.set_local_description(answer.clone()).await?;
    Ok(answer)
}

async fn close_quietly(id: &SessionId, transport: &dyn Transport) {
    if let Err(e) = transport.close().await {
        warn!(session_id = %id, error = %e, "Failed to close transport");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use crate::testing::{EngineCall, FailPoint, ScriptedEngine};

    fn setup() -> (Arc<ScriptedEngine>, SignalingOrchestrator) {
        let engine = Arc::new(ScriptedEngine::new());
        let registry = Arc::new(InMemoryRegistry::default());
        let orchestrator = SignalingOrchestrator::new(registry, engine.clone());
        (engine, orchestrator)
    }

    #[tokio::test]
    async fn test_publish_returns_answer() {
        let (engine, orchestrator) = setup();
        let id = SessionId::from("p1");

        let answer = orchestrator
            .publish(&id, SessionDescription::offer("v=0"))
            .await
            .unwrap();
        assert_eq!(answer.sdp_type, crate::signal::SdpType::Answer);

        let session = orchestrator.registry().lookup(&id, SessionRole::Publisher).unwrap();
        assert_eq!(session.state().await, SessionState::Negotiating);
        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::CreateTransport,
                EngineCall::RegisterEvents,
                EngineCall::SetRemoteDescription,
                EngineCall::CreateAnswer,
                EngineCall::SetLocalDescription,
            ]
        );
    }

    #[tokio::test]
    async fn test_publish_rejects_answer_typed_offer() {
        let (engine, orchestrator) = setup();
        let id = SessionId::from("p1");

        let result = orchestrator
            .publish(&id, SessionDescription::answer("v=0"))
            .await;
        assert!(matches!(result, Err(SfuError::InvalidOffer(_))));
        assert!(engine.calls().is_empty());
        assert!(orchestrator.registry().lookup(&id, SessionRole::Publisher).is_none());
    }

    #[tokio::test]
    async fn test_view_without_publisher_creates_nothing() {
        let (engine, orchestrator) = setup();
        let id = SessionId::from("v1");

        let result = orchestrator.view(&id, SessionDescription::offer("v=0")).await;
        assert!(matches!(result, Err(SfuError::NoPublisher)));
        assert_eq!(engine.transports_created(), 0);
        assert!(orchestrator.registry().lookup(&id, SessionRole::Viewer).is_none());
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported() {
        let (engine, orchestrator) = setup();
        engine.fail_at(FailPoint::CreateAnswer);

        let result = orchestrator
            .publish(&SessionId::from("p1"), SessionDescription::offer("v=0"))
            .await;
        assert!(matches!(result, Err(SfuError::Transport(_))));
    }

    #[tokio::test]
    async fn test_republish_replaces_session() {
        let (engine, orchestrator) = setup();
        let id = SessionId::from("p1");

        orchestrator.publish(&id, SessionDescription::offer("v=0")).await.unwrap();
        let first = orchestrator.registry().lookup(&id, SessionRole::Publisher).unwrap();

        orchestrator.publish(&id, SessionDescription::offer("v=0")).await.unwrap();
        let second = orchestrator.registry().lookup(&id, SessionRole::Publisher).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.state().await, SessionState::Closed);
        assert_eq!(second.state().await, SessionState::Negotiating);
        assert_eq!(engine.transports_created(), 2);
    }

    #[tokio::test]
    async fn test_candidate_for_unknown_session_dropped() {
        let (engine, orchestrator) = setup();

        let disposition = orchestrator
            .add_candidate(&SessionId::from("ghost"), SessionRole::Viewer, IceCandidate::new("candidate:a"))
            .await
            .unwrap();
        assert_eq!(disposition, CandidateDisposition::Dropped);
        assert!(engine.added_candidates().is_empty());
    }

    #[tokio::test]
    async fn test_end_of_candidates_applied_after_answer() {
        let (engine, orchestrator) = setup();
        let id = SessionId::from("p1");
        orchestrator
            .publish(&id, SessionDescription::offer("v=0"))
            .await
            .unwrap();

        let disposition = orchestrator
            .add_candidate(&id, SessionRole::Publisher, IceCandidate::new(""))
            .await
            .unwrap();
        assert_eq!(disposition, CandidateDisposition::Applied);
        assert_eq!(engine.calls().last(), Some(&EngineCall::AddCandidate(String::new())));
    }

    #[tokio::test]
    async fn test_poll_unknown_session_is_empty() {
        let (_engine, orchestrator) = setup();
        assert!(orchestrator
            .poll_candidates(&SessionId::from("ghost"), SessionRole::Publisher)
            .await
            .is_empty());
    }
}
