//! Conflict resolution callbacks.

use cairn_core::{Conflict, ConflictDecision};
use tokio::sync::{mpsc, oneshot};

/// Decides what happens to an item whose destination is occupied.
///
/// Called from a blocking thread while a batch is being planned, once per
/// conflicting item, in source order.
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, conflict: &Conflict) -> ConflictDecision;
}

impl<F> ConflictResolver for F
where
    F: Fn(&Conflict) -> ConflictDecision + Send + Sync,
{
    fn resolve(&self, conflict: &Conflict) -> ConflictDecision {
        self(conflict)
    }
}

/// A conflict waiting for an answer from the host.
#[derive(Debug)]
pub struct ConflictPrompt {
    pub conflict: Conflict,
    reply: oneshot::Sender<ConflictDecision>,
}

impl ConflictPrompt {
    /// Answer the prompt. Dropping it unanswered cancels the batch.
    pub fn respond(self, decision: ConflictDecision) {
        let _ = self.reply.send(decision);
    }
}

/// Forwards conflicts to an async host over a channel.
#[derive(Debug, Clone)]
pub struct ChannelResolver {
    tx: mpsc::Sender<ConflictPrompt>,
}

impl ChannelResolver {
    /// Create a resolver and the receiver the host answers prompts from.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ConflictPrompt>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

impl ConflictResolver for ChannelResolver {
    fn resolve(&self, conflict: &Conflict) -> ConflictDecision {
        let (reply, answer) = oneshot::channel();
        let prompt = ConflictPrompt {
            conflict: conflict.clone(),
            reply,
        };
        if self.tx.blocking_send(prompt).is_err() {
            return ConflictDecision::Cancel;
        }
        answer.blocking_recv().unwrap_or(ConflictDecision::Cancel)
    }
}
