//! Fanout SFU (Selective Forwarding Unit)
//!
//! Session and signaling layer of a minimal SFU: publishers send media in,
//! every viewer receives one publisher's media relayed unmodified.
//!
//! ## Architecture
//!
//! - **`Session`**: one publisher or viewer connection, its lifecycle state
//!   and candidate queues, behind a single per-session lock
//! - **`SessionRegistry`**: concurrent map of sessions by id and role
//! - **`SignalingOrchestrator`**: offer/answer and candidate exchange
//! - **`RelayHandle`**: per-track task copying media into the forwarding sink
//! - **`TransportEngine`**: boundary to the peer-connection library;
//!   [`WebRtcEngine`] is the production implementation
//! - **`LivenessMonitor`** / **`RetentionSweeper`**: background diagnostics
//!   and eviction of stale sessions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fanout_sfu::{InMemoryRegistry, SfuConfig, SignalingOrchestrator, WebRtcEngine};
//!
//! let config = SfuConfig::default();
//! let engine = Arc::new(WebRtcEngine::new(&config)?);
//! let registry = Arc::new(InMemoryRegistry::new(config.selection));
//! let orchestrator = SignalingOrchestrator::new(registry, engine);
//! let answer = orchestrator.publish(&session_id, offer).await?;
//! ```

mod candidate;
mod config;
mod engine;
mod error;
mod media;
mod monitor;
mod orchestrator;
mod registry;
mod relay;
mod retention;
mod selection;
mod session;
mod signal;
mod transport;
mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use candidate::{CandidateBuffer, CandidateDisposition};
pub use config::{RetentionConfig, SfuConfig};
pub use engine::{WebRtcEngine, WebRtcSink, WebRtcTransport};
pub use error::{Result, SfuError, TransportError};
pub use media::{InboundTrack, MediaCodec, MediaSink, MediaUnit, TrackKind};
pub use monitor::{LivenessMonitor, LivenessReport, PublisherReport};
pub use orchestrator::SignalingOrchestrator;
pub use registry::{InMemoryRegistry, SessionRegistry};
pub use relay::{RelayExit, RelayHandle, RelayStats};
pub use retention::RetentionSweeper;
pub use selection::{PublisherSelector, SelectionStrategy};
pub use session::{Session, SessionSnapshot, SessionState};
pub use signal::{IceCandidate, SdpType, SessionDescription};
pub use transport::{ConnectionState, EventSender, SenderInfo, Transport, TransportEngine, TransportEvent};
pub use types::{SessionId, SessionRole};
