//! Per-session ICE candidate queues
//!
//! Two independent FIFO queues:
//! - **outbound**: candidates gathered locally, waiting for the client to
//!   poll them. A poll takes the whole queue, so each candidate is handed out
//!   at most once.
//! - **pending inbound**: candidates the client posted before the remote
//!   description was set. They are released in posting order exactly once,
//!   after which the buffer only accepts candidates again if it is reset.
//!
//! The buffer itself is not synchronized; it lives inside the session's
//! lock together with the `remote_ready` flag it maintains.

use std::collections::VecDeque;
use std::mem;

use crate::signal::IceCandidate;

#[derive(Debug, Default)]
pub struct CandidateBuffer {
    outbound: Vec<IceCandidate>,
    pending_inbound: VecDeque<IceCandidate>,
    remote_ready: bool,
}

/// What happened to an inbound candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    /// Queued until the remote description is set
    Buffered,
    /// Handed to the transport
    Applied,
    /// No session of that role exists; the candidate was discarded
    Dropped,
}

impl CandidateBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a locally discovered candidate for the next poll
    pub fn push_outbound(&mut self, candidate: IceCandidate) {
        self.outbound.push(candidate);
    }

    /// Swap the outbound queue for an empty one
    pub fn take_outbound(&mut self) -> Vec<IceCandidate> {
        mem::take(&mut self.outbound)
    }

    #[must_use]
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Whether the remote description has been set
    #[must_use]
    pub const fn is_remote_ready(&self) -> bool {
        self.remote_ready
    }

    /// Store an inbound candidate that arrived too early.
    ///
    /// Returns the candidate back when the remote description is already
    /// set; the caller must apply it directly instead.
    pub fn buffer_inbound(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.remote_ready {
            return Some(candidate);
        }
        self.pending_inbound.push_back(candidate);
        None
    }

    /// Mark the remote description as set and release every pending
    /// candidate in arrival order. The pending queue is empty afterwards.
    pub fn release_pending(&mut self) -> Vec<IceCandidate> {
        self.remote_ready = true;
        self.pending_inbound.drain(..).collect()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending_inbound.len()
    }
}
