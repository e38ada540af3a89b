//! Events the session publishes to the consuming application.
//!
//! The session never calls into the UI layer directly; it emits
//! [`SessionEvent`]s on an mpsc channel and the application subscribes to
//! the receiver half. This is the entire boundary contract: queue-drain
//! completions, correlated feedback, and free-form status/progress
//! reporting.

use cvlink_core::{CvNumber, DecoderAddress};

/// Which status line a [`SessionEvent::Status`] message belongs to.
///
/// Mirrors the three status surfaces of the application window: a general
/// connection line, a send line, and a receive line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChannel {
    General,
    Send,
    Receive,
}

/// Notifications emitted by the session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// One queued write was transmitted; the queue advanced.
    WriteQueueDrained,

    /// One queued verify was transmitted; the reply is still pending.
    VerifyQueueDrained,

    /// A feedback reply was decoded and matched the outstanding verify.
    Feedback {
        address: DecoderAddress,
        cv: CvNumber,
        value: u8,
    },

    /// The outstanding verify received no reply within the configured
    /// bounded wait. The operation is dropped; the caller may re-enqueue.
    VerifyTimedOut {
        address: DecoderAddress,
        cv: CvNumber,
    },

    /// Free-form status text for one of the three status surfaces. Not
    /// part of the protocol invariants.
    Status {
        channel: StatusChannel,
        text: String,
    },

    /// Whether the session is busy with programming work; drives a
    /// progress indicator.
    Progress(bool),
}
