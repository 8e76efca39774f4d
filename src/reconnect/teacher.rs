//! Teacher side of the reconnect protocol.
//!
//! The teacher serves a sealed snapshot. It walks the tree depth-first,
//! offering each node's hash; the learner prunes matching subtrees and
//! requests leaf streams for the rest. Pruning a subtree ends all traffic
//! for it, so a nearly-synchronized learner costs O(changed paths), not
//! O(tree).

use crate::error::Result;
use crate::map::generation::Generation;
use crate::map::Snapshot;
use crate::tree::{self, left_child, right_child};
use crate::Error;

use super::message::Message;
use super::queue::BlockingQueue;

/// Serves one reconnect session from `snapshot`. Closes `to_learner`
/// when the session ends, successfully or not.
pub fn serve(
    snapshot: &Snapshot,
    to_learner: &BlockingQueue<Message>,
    from_learner: &BlockingQueue<Message>,
) -> Result<()> {
    let result = run(snapshot, to_learner, from_learner);
    to_learner.close();
    if let Err(e) = &result {
        tracing::warn!(error = %e, "Teacher session failed");
    }
    result
}

fn run(
    snapshot: &Snapshot,
    to_learner: &BlockingQueue<Message>,
    from_learner: &BlockingQueue<Message>,
) -> Result<()> {
    let gen = snapshot.generation();
    // Recompute dirty hashes up front; the walk below reads only cached
    // ones.
    let root_hash = gen.root_hash()?;
    let leaf_count = gen.leaf_count();

    tracing::info!(
        generation = gen.id(),
        leaf_count,
        "Teacher session started"
    );
    to_learner.supply(Message::TreeInfo {
        leaf_count,
        root_hash,
    })?;

    let mut pruned = 0u64;
    let mut streamed = 0u64;
    let mut stack: Vec<u64> = Vec::new();
    if leaf_count > 0 {
        // Start at the root.
        stack.push(0);
    }

    while let Some(path) = stack.pop() {
        let hash = gen.hash_at(path)?.ok_or_else(|| {
            Error::InvalidState(format!("no cached hash for path {}", path))
        })?;
        to_learner.supply(Message::NodeHash { path, hash })?;

        match from_learner.next()? {
            Message::HashMatch { path: p } if p == path => pruned += 1,
            Message::HashMismatch { path: p }
                if p == path && tree::is_internal(path, leaf_count) =>
            {
                stack.push(right_child(path));
                stack.push(left_child(path));
            }
            Message::HashMismatch { path: p } | Message::RequestSubtree { path: p }
                if p == path =>
            {
                streamed += stream_subtree(gen, path, leaf_count, to_learner)?;
            }
            Message::Abort { reason } => {
                return Err(Error::ReconnectAborted(reason));
            }
            other => {
                return Err(Error::InvalidState(format!(
                    "unexpected reply {:?} for path {}",
                    other, path
                )));
            }
        }
    }

    to_learner.supply(Message::Done)?;
    tracing::info!(pruned, streamed, "Teacher session complete");
    Ok(())
}

/// Streams every leaf beneath `root` in ascending path order, then the
/// subtree terminator.
fn stream_subtree(
    gen: &Generation,
    root: u64,
    leaf_count: u64,
    to_learner: &BlockingQueue<Message>,
) -> Result<u64> {
    let mut sent = 0u64;
    let mut stack = vec![root];
    while let Some(path) = stack.pop() {
        if tree::is_leaf(path, leaf_count) {
            let leaf = gen.leaf_at(path)?.ok_or_else(|| {
                Error::InvalidState(format!("missing leaf at path {}", path))
            })?;
            to_learner.supply(Message::LeafRecord {
                path,
                key: leaf.key,
                value: leaf.value,
            })?;
            sent += 1;
        } else {
            stack.push(right_child(path));
            stack.push(left_child(path));
        }
    }
    to_learner.supply(Message::EndOfSubtree { path: root })?;
    Ok(sent)
}
