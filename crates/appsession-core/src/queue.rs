//! Output queue: the hand-off point between the session and its transport.
//!
//! The session is the only writer. The transport only reads through
//! `flush`, called from the control loop after an enqueue notification.

use appsession_types::ForwardMsg;

/// Ordered buffer of messages awaiting delivery to the client.
pub trait OutboundQueue: Send {
    /// Appends a message. Messages are never modified after this call.
    fn enqueue(&mut self, msg: ForwardMsg);

    /// Drops every message not yet flushed.
    fn clear(&mut self);

    /// Removes and returns everything queued, in enqueue order.
    fn flush(&mut self) -> Vec<ForwardMsg>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Default in-memory queue.
#[derive(Debug, Default)]
pub struct ForwardMsgQueue {
    queue: Vec<ForwardMsg>,
}

impl ForwardMsgQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages currently queued, oldest first.
    pub fn messages(&self) -> &[ForwardMsg] {
        &self.queue
    }
}

impl OutboundQueue for ForwardMsgQueue {
    fn enqueue(&mut self, msg: ForwardMsg) {
        self.queue.push(msg);
    }

    fn clear(&mut self) {
        self.queue.clear();
    }

    fn flush(&mut self) -> Vec<ForwardMsg> {
        std::mem::take(&mut self.queue)
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}
