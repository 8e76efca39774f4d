//! Learner side of the reconnect protocol.
//!
//! The learner builds a candidate generation on top of its sealed,
//! still-authoritative state. The candidate is resized to the teacher's
//! shape, matched against the teacher's node hashes, and patched with
//! streamed leaf records. Only after the candidate's recomputed root
//! equals the teacher's advertised root does it replace the old head; on
//! any failure the old state survives untouched.

use std::sync::Arc;

use crate::error::Result;
use crate::map::generation::Generation;
use crate::map::VirtualMap;
use crate::tree;
use crate::Error;

use super::message::Message;
use super::queue::BlockingQueue;
use super::SessionState;

/// What a completed learner session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectReport {
    pub leaves_received: u64,
    pub subtrees_pruned: u64,
    pub state: SessionState,
}

/// Runs one learner session against `map`. On success the streamed
/// candidate becomes the mutable head; on failure the previous state is
/// restored and the error is returned.
pub fn learn(
    map: &VirtualMap,
    from_teacher: &BlockingQueue<Message>,
    to_teacher: &BlockingQueue<Message>,
) -> Result<ReconnectReport> {
    let (base, candidate) = map.begin_candidate()?;
    let result = run(&candidate, from_teacher, to_teacher);
    to_teacher.close();

    match result {
        Ok(report) => {
            map.install_candidate(candidate)?;
            tracing::info!(
                leaves = report.leaves_received,
                pruned = report.subtrees_pruned,
                "Learner session complete"
            );
            Ok(report)
        }
        Err(e) => {
            tracing::warn!(error = %e, state = %SessionState::Aborted, "Learner session aborted");
            map.restore_after_abort(&base)?;
            Err(e)
        }
    }
}

fn run(
    candidate: &Arc<Generation>,
    from_teacher: &BlockingQueue<Message>,
    to_teacher: &BlockingQueue<Message>,
) -> Result<ReconnectReport> {
    let mut state = SessionState::Idle;
    tracing::debug!(candidate = candidate.id(), %state, "Learner session started");

    // Bring cached hashes up to date with the inherited content before
    // any comparison; resize below relies on it.
    candidate.root_hash()?;

    let (teacher_leaves, teacher_root) = match next_or_abort(from_teacher)? {
        Message::TreeInfo {
            leaf_count,
            root_hash,
        } => (leaf_count, root_hash),
        Message::Abort { reason } => return Err(Error::ReconnectAborted(reason)),
        other => {
            return Err(Error::InvalidState(format!(
                "expected tree info, got {:?}",
                other
            )))
        }
    };
    candidate.resize(teacher_leaves)?;
    state.advance(SessionState::Negotiating)?;
    tracing::debug!(%state, teacher_leaves, "Comparing node hashes");

    let mut pruned = 0u64;
    let mut received = 0u64;
    loop {
        match next_or_abort(from_teacher)? {
            Message::NodeHash { path, hash } => {
                let mine = candidate.hash_at(path)?;
                let reply = if mine == Some(hash) {
                    pruned += 1;
                    Message::HashMatch { path }
                } else if mine.is_some() && tree::is_internal(path, teacher_leaves) {
                    Message::HashMismatch { path }
                } else {
                    // A leaf, or a region we know nothing about: take the
                    // whole subtree.
                    if state == SessionState::Negotiating {
                        state.advance(SessionState::Streaming)?;
                        tracing::debug!(%state, "Requesting subtree streams");
                    }
                    Message::RequestSubtree { path }
                };
                to_teacher.supply(reply)?;
            }
            Message::LeafRecord { path, key, value } => {
                if state != SessionState::Applying {
                    // Rejects records the learner never asked for.
                    state.advance(SessionState::Applying)?;
                    tracing::debug!(%state, "Learner applying records");
                }
                candidate.apply_leaf(path, key, value)?;
                received += 1;
            }
            Message::EndOfSubtree { .. } => {}
            Message::Done => break,
            Message::Abort { reason } => {
                return Err(Error::ReconnectAborted(reason));
            }
            other => {
                return Err(Error::InvalidState(format!(
                    "unexpected message {:?} from teacher",
                    other
                )))
            }
        }
    }

    let root = candidate.root_hash()?;
    if root != teacher_root {
        return Err(Error::ReconnectAborted(
            "root hash mismatch after streaming".to_string(),
        ));
    }

    state.advance(SessionState::Complete)?;
    Ok(ReconnectReport {
        leaves_received: received,
        subtrees_pruned: pruned,
        state,
    })
}

/// A teacher that closes its stream before `Done` has aborted.
fn next_or_abort(from_teacher: &BlockingQueue<Message>) -> Result<Message> {
    match from_teacher.next() {
        Ok(message) => Ok(message),
        Err(Error::EndOfStream) => Err(Error::ReconnectAborted(
            "teacher closed the stream early".to_string(),
        )),
        Err(e) => Err(e),
    }
}
