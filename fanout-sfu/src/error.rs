use crate::session::SessionState;
use thiserror::Error;

/// Failure reported by the transport engine, tagged with the operation that
/// produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to create transport: {0}")]
    Create(String),

    #[error("failed to set remote description: {0}")]
    RemoteDescription(String),

    #[error("failed to create answer: {0}")]
    Answer(String),

    #[error("failed to set local description: {0}")]
    LocalDescription(String),

    #[error("failed to add ICE candidate: {0}")]
    Candidate(String),

    #[error("failed to create or attach media sink: {0}")]
    Sink(String),

    #[error("media read failed: {0}")]
    Read(String),

    #[error("media write failed: {0}")]
    Write(String),

    #[error("failed to close transport: {0}")]
    Close(String),
}

#[derive(Error, Debug)]
pub enum SfuError {
    #[error("Invalid offer: {0}")]
    InvalidOffer(String),

    #[error("Invalid ICE candidate: {0}")]
    InvalidCandidate(String),

    #[error("No publisher available")]
    NoPublisher,

    #[error("Session is {0}, expected new")]
    NotNew(SessionState),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, SfuError>;
