//! FIFO queue of pending programming operations.
//!
//! The command station accepts only one outstanding POM operation at a
//! time, so UI-triggered requests are decoupled from the wire through this
//! queue: callers append at any rate, the state machine drains one entry
//! per completed operation. Order is strict enqueue order; CV programming
//! order can matter (an address change must precede writes that use the
//! new address), so nothing is ever skipped or reordered.

use std::collections::VecDeque;

use cvlink_core::{CvNumber, DecoderAddress, PomRequest};

/// Ordered queue of not-yet-transmitted programming operations.
///
/// Unbounded in principle; in practice it holds at most a tab's worth of
/// CV edits. Only the session state machine dequeues, and only while the
/// session is idle.
#[derive(Debug, Default)]
pub struct RequestQueue {
    entries: VecDeque<PomRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a write operation. Never blocks.
    pub fn enqueue_write(&mut self, address: DecoderAddress, cv: CvNumber, value: u8) {
        self.entries
            .push_back(PomRequest::Write { address, cv, value });
    }

    /// Appends a verify operation. Never blocks.
    pub fn enqueue_verify(&mut self, address: DecoderAddress, cv: CvNumber) {
        self.entries.push_back(PomRequest::Verify { address, cv });
    }

    /// Removes and returns the head of the queue, or `None` when empty.
    pub fn dequeue(&mut self) -> Option<PomRequest> {
        self.entries.pop_front()
    }

    /// Discards every queued operation (close-time drop policy; entries
    /// are not requeued on reconnect).
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
