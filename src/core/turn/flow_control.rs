//! Delivery acknowledgment tracking.
//!
//! Every audio chunk sent to the phone side is followed by a mark. The
//! transport echoes marks back in order once the chunk has been played, so the
//! queue length is the number of chunks sent but not yet played.

use std::collections::VecDeque;

/// Mark name attached to every forwarded reply chunk.
pub const RESPONSE_MARK: &str = "responsePart";

/// FIFO of outstanding delivery acknowledgment tokens.
#[derive(Debug, Default, Clone)]
pub struct MarkQueue {
    pending: VecDeque<String>,
}

impl MarkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mark sent after an audio chunk.
    pub fn push(&mut self, name: impl Into<String>) {
        self.pending.push_back(name.into());
    }

    /// Match an echoed mark against the oldest outstanding one.
    ///
    /// Returns the matched token, or `None` when the queue is already empty
    /// (late acknowledgments after a barge-in are expected and ignored).
    pub fn acknowledge(&mut self) -> Option<String> {
        self.pending.pop_front()
    }

    /// Drop all outstanding marks.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_acknowledgment() {
        let mut queue = MarkQueue::new();
        queue.push("a");
        queue.push("b");
        queue.push("c");
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.acknowledge().as_deref(), Some("a"));
        assert_eq!(queue.acknowledge().as_deref(), Some("b"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_acknowledge_on_empty_is_ignored() {
        let mut queue = MarkQueue::new();
        assert!(queue.acknowledge().is_none());
        assert!(queue.is_empty());

        queue.push(RESPONSE_MARK);
        queue.clear();
        assert!(queue.acknowledge().is_none());
        assert_eq!(queue.len(), 0);
    }
}
