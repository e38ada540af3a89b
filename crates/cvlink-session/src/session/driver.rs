//! Async driver wiring the session state machine to the TCP transport.
//!
//! All inputs - caller commands, send completions, decoded feedback,
//! verify timeouts, and idle poll ticks - are serialized through one
//! task, so [`SessionCore`] transitions happen one at a time in arrival
//! order. Nothing suspends inside a transition; awaiting happens only at
//! the socket boundary.

use std::net::SocketAddr;
use std::time::Duration;

use cvlink_core::protocol::codec::{encode_verify, encode_write};
use cvlink_core::{CvNumber, DecoderAddress, FeedbackMessage};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::session::events::{SessionEvent, StatusChannel};
use crate::session::{SessionAction, SessionCore, TransmitChannel};
use crate::transport::{FrameBuffer, FrameSink, StreamPair, TransportError};

/// Tuning knobs for a session, normally taken from the config file.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Bounded wait for a verify reply before the operation is dropped.
    pub verify_timeout: Duration,
    /// Interval between idle command-station status polls.
    pub status_poll_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            verify_timeout: Duration::from_millis(1500),
            status_poll_interval: Duration::from_millis(2000),
        }
    }
}

/// Inputs funneled through the driver's single serialization channel.
#[derive(Debug)]
enum SessionInput {
    EnqueueWrite {
        address: DecoderAddress,
        cv: CvNumber,
        value: u8,
    },
    EnqueueVerify {
        address: DecoderAddress,
        cv: CvNumber,
    },
    SendWriteNow {
        address: DecoderAddress,
        cv: CvNumber,
        value: u8,
    },
    SendVerifyNow {
        address: DecoderAddress,
        cv: CvNumber,
    },
    Feedback(FeedbackMessage),
    VerifyTimeout(u64),
    Close,
}

/// Handle to a running programming session.
///
/// All methods post to the driver task and return immediately; none of
/// them blocks the caller. Dropping the handle closes the session the
/// same way [`Session::close`] does.
pub struct Session {
    input_tx: mpsc::UnboundedSender<SessionInput>,
}

impl Session {
    /// Opens both TCP connections and starts the driver task.
    ///
    /// Returns the handle together with the event receiver the
    /// application consumes. The request queue starts empty; a connect
    /// failure leaves nothing running, and the caller's own queue of
    /// intended operations is unaffected and can be replayed after a
    /// successful reopen.
    ///
    /// # Errors
    ///
    /// [`TransportError::Connect`] when either connection cannot be
    /// established; the other one, if already open, is dropped again.
    pub async fn open(
        programming_addr: SocketAddr,
        feedback_addr: SocketAddr,
        options: SessionOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), TransportError> {
        let programming = StreamPair::open(programming_addr).await?;
        let status = StreamPair::open(feedback_addr).await?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        info!(%programming_addr, %feedback_addr, "session opened");
        let _ = event_tx.send(SessionEvent::Status {
            channel: StatusChannel::General,
            text: format!("connected to {programming_addr} / {feedback_addr}"),
        });

        // Reader and timer tasks hold only weak senders so that dropping
        // the last Session handle ends the driver loop.
        spawn_feedback_reader(status.reader, input_tx.downgrade(), event_tx.clone());
        spawn_programming_drain(programming.reader);

        let driver = SessionDriver {
            core: SessionCore::new(event_tx.clone()),
            programming_sink: programming.writer,
            status_sink: status.writer,
            input_tx: input_tx.downgrade(),
            event_tx,
            options: options.clone(),
            armed_timeout: None,
            timeout_gen: 0,
        };
        tokio::spawn(driver.run(input_rx));

        Ok((Self { input_tx }, event_rx))
    }

    /// Queues a CV write; transmitted in enqueue order.
    pub fn enqueue_write(&self, address: DecoderAddress, cv: CvNumber, value: u8) {
        self.send(SessionInput::EnqueueWrite { address, cv, value });
    }

    /// Queues a CV verify; the reply arrives as [`SessionEvent::Feedback`].
    pub fn enqueue_verify(&self, address: DecoderAddress, cv: CvNumber) {
        self.send(SessionInput::EnqueueVerify { address, cv });
    }

    /// Transmits a write immediately, bypassing the queue and the
    /// one-in-flight arbitration. Unsafe to combine with queued traffic;
    /// prefer [`Session::enqueue_write`].
    pub fn send_write_now(&self, address: DecoderAddress, cv: CvNumber, value: u8) {
        self.send(SessionInput::SendWriteNow { address, cv, value });
    }

    /// Transmits a verify immediately, bypassing the queue and the
    /// one-in-flight arbitration. Unsafe to combine with queued traffic;
    /// prefer [`Session::enqueue_verify`].
    pub fn send_verify_now(&self, address: DecoderAddress, cv: CvNumber) {
        self.send(SessionInput::SendVerifyNow { address, cv });
    }

    /// Closes the session: both stream pairs are released and every
    /// queued-but-unsent operation is discarded, not requeued. Safe to
    /// call from any state.
    pub fn close(&self) {
        self.send(SessionInput::Close);
    }

    fn send(&self, input: SessionInput) {
        if self.input_tx.send(input).is_err() {
            warn!("session driver is gone; command dropped");
        }
    }
}

// ── Driver task ───────────────────────────────────────────────────────────────

struct SessionDriver {
    core: SessionCore,
    programming_sink: tokio::net::tcp::OwnedWriteHalf,
    status_sink: tokio::net::tcp::OwnedWriteHalf,
    input_tx: mpsc::WeakUnboundedSender<SessionInput>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    options: SessionOptions,
    /// Generation of the currently armed verify timeout; a fired timer
    /// whose generation no longer matches is stale and ignored.
    armed_timeout: Option<u64>,
    timeout_gen: u64,
}

impl SessionDriver {
    async fn run(mut self, mut input_rx: mpsc::UnboundedReceiver<SessionInput>) {
        let mut poll = tokio::time::interval(self.options.status_poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick fires immediately; skip it so a fresh
        // session does not poll before the caller had a chance to queue.
        poll.reset();

        loop {
            tokio::select! {
                maybe_input = input_rx.recv() => {
                    match maybe_input {
                        Some(SessionInput::Close) | None => break,
                        Some(input) => {
                            let actions = self.apply(input);
                            self.run_actions(actions).await;
                        }
                    }
                }
                _ = poll.tick() => {
                    let actions = self.core.handle_poll_tick();
                    self.run_actions(actions).await;
                }
            }
        }

        self.core.close();
        let _ = self.event_tx.send(SessionEvent::Status {
            channel: StatusChannel::General,
            text: "connection closed".to_string(),
        });
        info!("session closed");
        // Dropping self releases both write halves; the reader tasks end
        // when their peers hang up or their send side notices the closed
        // input channel.
    }

    fn apply(&mut self, input: SessionInput) -> Vec<SessionAction> {
        match input {
            SessionInput::EnqueueWrite { address, cv, value } => {
                self.core.enqueue_write(address, cv, value)
            }
            SessionInput::EnqueueVerify { address, cv } => self.core.enqueue_verify(address, cv),
            SessionInput::SendWriteNow { address, cv, value } => {
                vec![SessionAction::TransmitProgramming(encode_write(
                    address, cv, value,
                ))]
            }
            SessionInput::SendVerifyNow { address, cv } => {
                vec![SessionAction::TransmitProgramming(encode_verify(address, cv))]
            }
            SessionInput::Feedback(msg) => self.core.handle_feedback(msg),
            SessionInput::VerifyTimeout(gen) => {
                if self.armed_timeout == Some(gen) {
                    self.armed_timeout = None;
                    self.core.handle_verify_timeout()
                } else {
                    trace!(gen, "ignoring stale verify timeout");
                    Vec::new()
                }
            }
            SessionInput::Close => unreachable!("Close is handled by the run loop"),
        }
    }

    /// Executes actions, feeding each transmission's completion (or
    /// failure) back into the state machine until no follow-up actions
    /// remain.
    async fn run_actions(&mut self, mut pending: Vec<SessionAction>) {
        while !pending.is_empty() {
            let mut next = Vec::new();
            for action in pending.drain(..) {
                match action {
                    SessionAction::TransmitProgramming(frame) => {
                        next.extend(self.transmit(TransmitChannel::Programming, &frame).await);
                    }
                    SessionAction::TransmitStatus(frame) => {
                        next.extend(self.transmit(TransmitChannel::Status, &frame).await);
                    }
                    SessionAction::ArmVerifyTimeout => self.arm_verify_timeout(),
                    SessionAction::DisarmVerifyTimeout => self.armed_timeout = None,
                }
            }
            pending = next;
        }
    }

    async fn transmit(&mut self, channel: TransmitChannel, frame: &[u8]) -> Vec<SessionAction> {
        let sink: &mut dyn FrameSink = match channel {
            TransmitChannel::Programming => &mut self.programming_sink,
            TransmitChannel::Status => &mut self.status_sink,
        };
        match sink.transmit(frame).await {
            Ok(()) => {
                trace!(?channel, len = frame.len(), "frame transmitted");
                self.core.handle_send_completed(channel)
            }
            Err(err) => self.core.handle_transmit_failed(channel, &err.to_string()),
        }
    }

    fn arm_verify_timeout(&mut self) {
        self.timeout_gen += 1;
        let gen = self.timeout_gen;
        self.armed_timeout = Some(gen);
        let weak_tx = self.input_tx.clone();
        let timeout = self.options.verify_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tx) = weak_tx.upgrade() {
                let _ = tx.send(SessionInput::VerifyTimeout(gen));
            }
        });
    }
}

// ── Reader tasks ──────────────────────────────────────────────────────────────

/// Reads the status stream, assembles feedback frames, and forwards them
/// to the driver.
fn spawn_feedback_reader(
    mut reader: OwnedReadHalf,
    input_tx: mpsc::WeakUnboundedSender<SessionInput>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    tokio::spawn(async move {
        let mut buffer = FrameBuffer::new();
        let mut chunk = [0u8; 256];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    let _ = event_tx.send(SessionEvent::Status {
                        channel: StatusChannel::Receive,
                        text: "feedback connection closed by peer".to_string(),
                    });
                    break;
                }
                Ok(n) => {
                    buffer.push(&chunk[..n]);
                    while let Some(msg) = buffer.next_frame() {
                        debug!(address = %msg.address, cv = %msg.cv, "feedback frame received");
                        let Some(tx) = input_tx.upgrade() else {
                            return; // session handle is gone
                        };
                        if tx.send(SessionInput::Feedback(msg)).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => {
                    let _ = event_tx.send(SessionEvent::Status {
                        channel: StatusChannel::Receive,
                        text: format!("feedback read error: {err}"),
                    });
                    break;
                }
            }
        }
    });
}

/// Drains the programming connection's inbound direction. The gateway may
/// echo acknowledgements here; the session does not interpret them.
fn spawn_programming_drain(mut reader: OwnedReadHalf) {
    tokio::spawn(async move {
        let mut chunk = [0u8; 256];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => trace!(bytes = n, "discarding unsolicited programming-channel bytes"),
            }
        }
    });
}

// ── Tests ─────────────────────────────────────────────────────────────────────
