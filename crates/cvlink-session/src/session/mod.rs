//! The programming session state machine.
//!
//! The command station executes exactly one POM operation at a time, so
//! every outbound request funnels through this state machine. It is the
//! single arbiter of the wire: dequeueing is only possible while the
//! session is `Inactive`, which turns "at most one in-flight operation"
//! from caller discipline into a structural invariant.
//!
//! # Operational states
//!
//! ```text
//!             enqueue / dequeue Write            send completed
//!  Inactive ──────────────────────► WritingPom ────────────────┐
//!     ▲                                                        │
//!     ├────────────────────────────────────────────────────────┘
//!     │       enqueue / dequeue Verify           matching feedback,
//!     ├────────────────────────► VerifyingPom ──── timeout, or close
//!     │                                                        │
//!     ├────────────────────────────────────────────────────────┘
//!     │       poll tick (queue empty)            send completed
//!     └──────────────────────► PollingStatus{1,2} ─────────────┘
//! ```
//!
//! [`SessionCore`] is synchronous and free of I/O: inputs arrive one at a
//! time (the driver serializes them through a single channel, so each
//! transition is a critical section) and outputs are [`SessionAction`]s
//! the driver executes against the real sockets. This split keeps every
//! invariant unit-testable without a command station on the network.

pub mod driver;
pub mod events;
pub mod queue;

use cvlink_core::protocol::codec::{encode_status_request, encode_verify, encode_write};
use cvlink_core::protocol::messages::{POM_FRAME_LEN, STATUS_FRAME_LEN};
use cvlink_core::{CvNumber, DecoderAddress, FeedbackMessage, PomRequest, StatusRequest};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use self::events::{SessionEvent, StatusChannel};
use self::queue::RequestQueue;

/// Operational state of the session. Exactly one is active per connection
/// at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Idle; the only state in which the queue may be dequeued.
    Inactive,
    /// A write frame is on the wire, awaiting send completion.
    WritingPom,
    /// A verify frame was sent; awaiting send completion and then the
    /// feedback reply (or the bounded-wait timeout).
    VerifyingPom,
    /// The command-station status poll is in flight.
    PollingStatusPrimary,
    /// The command-station version poll is in flight.
    PollingStatusSecondary,
}

/// Which of the two stream pairs a transmission used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitChannel {
    /// The programming pair toward the command-station gateway.
    Programming,
    /// The status/feedback pair toward the RS-bus receiver.
    Status,
}

/// Side effects the driver must execute after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Write a programming frame to the programming output stream.
    TransmitProgramming([u8; POM_FRAME_LEN]),
    /// Write a status request to the status output stream.
    TransmitStatus([u8; STATUS_FRAME_LEN]),
    /// Start the bounded wait for the outstanding verify's reply.
    ArmVerifyTimeout,
    /// Cancel the bounded wait; the verify completed or was dropped.
    DisarmVerifyTimeout,
}

/// The session state machine: queue, state, and verify correlation.
///
/// Owned by the async driver; tests drive it directly.
pub struct SessionCore {
    state: SessionState,
    queue: RequestQueue,
    /// Correlation key of the verify awaiting its reply. At most one can
    /// be outstanding, which is what keeps (address, cv) matching
    /// unambiguous.
    pending_verify: Option<(DecoderAddress, CvNumber)>,
    /// Which status request the next idle poll sends; alternates.
    next_poll: StatusRequest,
    progress_active: bool,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionCore {
    /// Creates an idle session core publishing on `events`.
    pub fn new(events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            state: SessionState::Inactive,
            queue: RequestQueue::new(),
            pending_verify: None,
            next_poll: StatusRequest::CommandStation,
            progress_active: false,
            events,
        }
    }

    /// Current operational state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of queued, not-yet-transmitted operations.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    // ── Queue inputs ──────────────────────────────────────────────────────────

    /// Appends a write and, when idle, dispatches it immediately.
    pub fn enqueue_write(
        &mut self,
        address: DecoderAddress,
        cv: CvNumber,
        value: u8,
    ) -> Vec<SessionAction> {
        self.queue.enqueue_write(address, cv, value);
        self.dispatch_if_idle()
    }

    /// Appends a verify and, when idle, dispatches it immediately.
    pub fn enqueue_verify(&mut self, address: DecoderAddress, cv: CvNumber) -> Vec<SessionAction> {
        self.queue.enqueue_verify(address, cv);
        self.dispatch_if_idle()
    }

    // ── Transport inputs ──────────────────────────────────────────────────────

    /// A transmission finished cleanly on the given channel.
    pub fn handle_send_completed(&mut self, channel: TransmitChannel) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        match (channel, self.state) {
            (TransmitChannel::Programming, SessionState::WritingPom) => {
                // No reply is expected for a write on this protocol; the
                // operation is complete once it left the socket.
                self.emit(SessionEvent::WriteQueueDrained);
                self.state = SessionState::Inactive;
                self.try_dispatch(&mut actions);
            }
            (TransmitChannel::Programming, SessionState::VerifyingPom) => {
                self.emit(SessionEvent::VerifyQueueDrained);
                actions.push(SessionAction::ArmVerifyTimeout);
            }
            (TransmitChannel::Status, SessionState::PollingStatusPrimary)
            | (TransmitChannel::Status, SessionState::PollingStatusSecondary) => {
                self.state = SessionState::Inactive;
                self.try_dispatch(&mut actions);
            }
            (channel, state) => {
                debug!(?channel, ?state, "ignoring unexpected send completion");
            }
        }
        actions
    }

    /// A transmission failed on the given channel. The offending operation
    /// is discarded, not retried; the caller may re-enqueue it.
    pub fn handle_transmit_failed(
        &mut self,
        channel: TransmitChannel,
        error: &str,
    ) -> Vec<SessionAction> {
        warn!(?channel, error, "transmit failed");
        self.emit(SessionEvent::Status {
            channel: StatusChannel::Send,
            text: format!("transmit error: {error}"),
        });
        let mut actions = vec![SessionAction::DisarmVerifyTimeout];
        self.pending_verify = None;
        self.state = SessionState::Inactive;
        self.try_dispatch(&mut actions);
        actions
    }

    /// A feedback reply was decoded on the status stream.
    ///
    /// Only a reply matching the outstanding verify's (address, cv) key
    /// advances the session; anything else is a stray message and is
    /// discarded with a log line, no state change.
    pub fn handle_feedback(&mut self, msg: FeedbackMessage) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.state == SessionState::VerifyingPom
            && self.pending_verify == Some((msg.address, msg.cv))
        {
            self.pending_verify = None;
            self.emit(SessionEvent::Feedback {
                address: msg.address,
                cv: msg.cv,
                value: msg.value,
            });
            actions.push(SessionAction::DisarmVerifyTimeout);
            self.state = SessionState::Inactive;
            self.try_dispatch(&mut actions);
        } else {
            debug!(
                address = %msg.address,
                cv = %msg.cv,
                "discarding feedback with no matching outstanding verify"
            );
        }
        actions
    }

    /// The bounded wait for the outstanding verify's reply elapsed.
    pub fn handle_verify_timeout(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.state != SessionState::VerifyingPom {
            // Stale timer that raced a feedback reply or a close.
            return actions;
        }
        if let Some((address, cv)) = self.pending_verify.take() {
            warn!(%address, %cv, "verify reply timed out");
            self.emit(SessionEvent::VerifyTimedOut { address, cv });
            self.state = SessionState::Inactive;
            self.try_dispatch(&mut actions);
        }
        actions
    }

    /// Periodic idle tick. When the session is idle and the queue empty,
    /// sends the next alternating command-station status request; any
    /// other time the tick is ignored so polling never delays queued work.
    pub fn handle_poll_tick(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.state != SessionState::Inactive || !self.queue.is_empty() {
            return actions;
        }
        let request = self.next_poll;
        self.state = match request {
            StatusRequest::CommandStation => {
                self.next_poll = StatusRequest::Version;
                SessionState::PollingStatusPrimary
            }
            StatusRequest::Version => {
                self.next_poll = StatusRequest::CommandStation;
                SessionState::PollingStatusSecondary
            }
        };
        actions.push(SessionAction::TransmitStatus(encode_status_request(request)));
        actions
    }

    /// Unconditional teardown: forces `Inactive` from any state and drops
    /// every queued operation and the in-flight verify. Safe to call from
    /// any state; queued entries are not replayed on reopen.
    pub fn close(&mut self) -> Vec<SessionAction> {
        let dropped = self.queue.len();
        if dropped > 0 {
            debug!(dropped, "discarding queued operations on close");
        }
        self.queue.clear();
        self.pending_verify = None;
        self.state = SessionState::Inactive;
        self.set_progress(false);
        vec![SessionAction::DisarmVerifyTimeout]
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Dequeues and transmits the next operation. Must only be reached
    /// with `state == Inactive`; this is the one place a dequeue happens.
    fn try_dispatch(&mut self, actions: &mut Vec<SessionAction>) {
        debug_assert_eq!(self.state, SessionState::Inactive);
        match self.queue.dequeue() {
            Some(PomRequest::Write { address, cv, value }) => {
                self.set_progress(true);
                self.state = SessionState::WritingPom;
                actions.push(SessionAction::TransmitProgramming(encode_write(
                    address, cv, value,
                )));
            }
            Some(PomRequest::Verify { address, cv }) => {
                self.set_progress(true);
                self.state = SessionState::VerifyingPom;
                self.pending_verify = Some((address, cv));
                actions.push(SessionAction::TransmitProgramming(encode_verify(address, cv)));
            }
            None => self.set_progress(false),
        }
    }

    fn dispatch_if_idle(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.state == SessionState::Inactive {
            self.try_dispatch(&mut actions);
        }
        actions
    }

    fn set_progress(&mut self, active: bool) {
        if self.progress_active != active {
            self.progress_active = active;
            self.emit(SessionEvent::Progress(active));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // A dropped receiver means the application went away; events are
        // then best-effort only.
        let _ = self.events.send(event);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
