//! Teacher/learner resynchronization.
//!
//! A stale replica (the learner) rebuilds its tree from an authoritative
//! peer (the teacher) by exchanging node hashes top-down: matching
//! subtrees are pruned from the session, mismatched ones are streamed as
//! leaf records through a bounded blocking queue. The learner's previous
//! state stays authoritative and readable until the rebuilt candidate
//! passes root verification.
//!
//! Session state machine:
//!
//! ```text
//! Idle -> Negotiating -> Streaming -> Applying -> Complete
//!              \______________\___________\_____> Aborted
//! ```

pub mod learner;
pub mod message;
pub mod queue;
pub mod teacher;

pub use learner::ReconnectReport;
pub use message::Message;
pub use queue::BlockingQueue;

use crate::error::Result;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Negotiating,
    Streaming,
    Applying,
    Complete,
    Aborted,
}

impl SessionState {
    /// Moves the session forward, rejecting transitions the protocol does
    /// not allow. A full prune completes straight from `Negotiating`; leaf
    /// records are only legal once a subtree has been requested.
    pub(crate) fn advance(&mut self, to: SessionState) -> Result<()> {
        use SessionState::*;
        let legal = matches!(
            (*self, to),
            (Idle, Negotiating)
                | (Negotiating, Streaming | Complete)
                | (Streaming, Applying | Complete)
                | (Applying, Complete)
                | (Idle | Negotiating | Streaming | Applying, Aborted)
        );
        if !legal {
            return Err(Error::InvalidState(format!(
                "illegal session transition {} -> {}",
                self, to
            )));
        }
        *self = to;
        Ok(())
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Negotiating => "negotiating",
            SessionState::Streaming => "streaming",
            SessionState::Applying => "applying",
            SessionState::Complete => "complete",
            SessionState::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}
