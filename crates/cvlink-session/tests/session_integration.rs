//! Integration tests for the programming session.
//!
//! # Purpose
//!
//! These tests exercise the [`Session`] through its *public* API exactly
//! the way the CV editor uses it, against a fake command station served
//! on localhost TCP sockets. They verify:
//!
//! - The happy paths: a queued write reaches the wire byte-exact and
//!   drains, a queued verify completes when the matching feedback frame
//!   arrives.
//! - The ordering guarantee: operations are transmitted in exact enqueue
//!   order, one at a time.
//! - The error paths: a stray feedback frame is discarded without
//!   disturbing the outstanding verify, and an unanswered verify is
//!   dropped after the bounded wait.
//! - Teardown: `close` discards queued work and nothing is replayed.
//!
//! # The fake command station
//!
//! A session owns two TCP connections, so the harness listens on two
//! ephemeral localhost ports:
//!
//! ```text
//! Session                          Fake station
//! ───────                          ────────────
//! programming pair ──────────────► every 8-byte POM frame is captured
//!                                  and handed to the test
//! status pair      ──────────────► inbound status polls captured
//!                  ◄────────────── test injects feedback frames
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use cvlink_core::protocol::codec::{encode_feedback, encode_verify, encode_write};
use cvlink_core::protocol::messages::POM_FRAME_LEN;
use cvlink_core::{CvNumber, DecoderAddress, FeedbackMessage};
use cvlink_session::{Session, SessionEvent, SessionOptions};

fn addr(raw: u16) -> DecoderAddress {
    DecoderAddress::new(raw).expect("test address in range")
}

fn cv(raw: u16) -> CvNumber {
    CvNumber::new(raw).expect("test CV in range")
}

/// Handles the test harness holds onto one fake station.
struct FakeStation {
    programming_addr: SocketAddr,
    feedback_addr: SocketAddr,
    /// 8-byte POM frames read from the programming connection.
    pom_frames: mpsc::UnboundedReceiver<[u8; POM_FRAME_LEN]>,
    /// Raw bytes read from the status connection (status polls).
    status_bytes: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Injects bytes into the session's feedback stream.
    inject: mpsc::UnboundedSender<Vec<u8>>,
}

/// Binds both listeners and spawns the accept/pump tasks.
async fn spawn_fake_station() -> FakeStation {
    let programming_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let feedback_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let programming_addr = programming_listener.local_addr().expect("local addr");
    let feedback_addr = feedback_listener.local_addr().expect("local addr");

    // Programming side: POM frames are fixed length, so read_exact slices
    // the byte stream back into frames.
    let (frame_tx, pom_frames) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (mut socket, _) = programming_listener.accept().await.expect("accept");
        let mut frame = [0u8; POM_FRAME_LEN];
        while socket.read_exact(&mut frame).await.is_ok() {
            if frame_tx.send(frame).is_err() {
                break;
            }
        }
    });

    // Status side: capture inbound polls, write injected feedback frames.
    let (status_tx, status_bytes) = mpsc::unbounded_channel();
    let (inject, mut inject_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(async move {
        let (socket, _) = feedback_listener.accept().await.expect("accept");
        let (mut reader, mut writer) = socket.into_split();

        tokio::spawn(async move {
            let mut chunk = [0u8; 64];
            while let Ok(n) = reader.read(&mut chunk).await {
                if n == 0 || status_tx.send(chunk[..n].to_vec()).is_err() {
                    break;
                }
            }
        });

        while let Some(bytes) = inject_rx.recv().await {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    FakeStation {
        programming_addr,
        feedback_addr,
        pom_frames,
        status_bytes,
        inject,
    }
}

/// Options with polling pushed far out so tests control all traffic.
fn quiet_options() -> SessionOptions {
    SessionOptions {
        verify_timeout: Duration::from_secs(5),
        status_poll_interval: Duration::from_secs(60),
    }
}

async fn open_session(
    station: &FakeStation,
    options: SessionOptions,
) -> (Session, mpsc::UnboundedReceiver<SessionEvent>) {
    Session::open(station.programming_addr, station.feedback_addr, options)
        .await
        .expect("session must open against the fake station")
}

/// Waits for the next frame on the programming connection.
async fn next_frame(station: &mut FakeStation) -> [u8; POM_FRAME_LEN] {
    timeout(Duration::from_secs(2), station.pom_frames.recv())
        .await
        .expect("timed out waiting for a POM frame")
        .expect("programming connection closed unexpectedly")
}

/// Waits for the next event that is not status/progress chatter.
async fn next_protocol_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    loop {
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for a session event")
            .expect("event channel closed unexpectedly");
        match event {
            SessionEvent::Status { .. } | SessionEvent::Progress(_) => continue,
            other => return other,
        }
    }
}

// ── Write flow ────────────────────────────────────────────────────────────────

/// Tests that a write of value 6 to CV 29 of decoder 3 on an idle session
/// produces a byte-exact frame on the programming wire and one
/// `WriteQueueDrained` event.
#[tokio::test]
async fn test_enqueued_write_reaches_wire_byte_exact_and_drains() {
    let mut station = spawn_fake_station().await;
    let (session, mut events) = open_session(&station, quiet_options()).await;

    session.enqueue_write(addr(3), cv(29), 6);

    let frame = next_frame(&mut station).await;
    assert_eq!(frame, encode_write(addr(3), cv(29), 6));
    // Spot-check the individual fields: address, CV (zero-based on the
    // wire), value, and a parity byte that XORs the frame to zero.
    assert_eq!(frame[3], 3);
    assert_eq!(frame[5], 28);
    assert_eq!(frame[6], 6);
    assert_eq!(frame.iter().fold(0u8, |acc, b| acc ^ b), 0);

    assert_eq!(
        next_protocol_event(&mut events).await,
        SessionEvent::WriteQueueDrained
    );

    session.close();
}

/// Tests that a burst of enqueued operations is transmitted strictly in
/// enqueue order, one frame at a time.
#[tokio::test]
async fn test_operations_transmit_in_enqueue_order() {
    let mut station = spawn_fake_station().await;
    let (session, mut events) = open_session(&station, quiet_options()).await;

    // All four are queued before the first frame is acknowledged by the
    // kernel, so ordering must come from the queue, not from timing.
    session.enqueue_write(addr(3), cv(11), 1);
    session.enqueue_write(addr(3), cv(12), 2);
    session.enqueue_verify(addr(3), cv(13));
    session.enqueue_write(addr(3), cv(14), 4);

    assert_eq!(next_frame(&mut station).await, encode_write(addr(3), cv(11), 1));
    assert_eq!(next_frame(&mut station).await, encode_write(addr(3), cv(12), 2));
    assert_eq!(next_frame(&mut station).await, encode_verify(addr(3), cv(13)));

    // The verify blocks the queue until its reply arrives.
    station
        .inject
        .send(
            encode_feedback(&FeedbackMessage {
                address: addr(3),
                cv: cv(13),
                value: 7,
            })
            .to_vec(),
        )
        .expect("inject");

    assert_eq!(next_frame(&mut station).await, encode_write(addr(3), cv(14), 4));

    // Event order mirrors the wire order.
    assert_eq!(
        next_protocol_event(&mut events).await,
        SessionEvent::WriteQueueDrained
    );
    assert_eq!(
        next_protocol_event(&mut events).await,
        SessionEvent::WriteQueueDrained
    );
    assert_eq!(
        next_protocol_event(&mut events).await,
        SessionEvent::VerifyQueueDrained
    );
    assert_eq!(
        next_protocol_event(&mut events).await,
        SessionEvent::Feedback {
            address: addr(3),
            cv: cv(13),
            value: 7
        }
    );

    session.close();
}

// ── Verify flow ───────────────────────────────────────────────────────────────

/// Tests that a verify of CV 29 on decoder 3 followed by a matching
/// feedback frame fires `Feedback(3, 29, 6)` exactly once.
#[tokio::test]
async fn test_verify_completes_on_matching_feedback_exactly_once() {
    let mut station = spawn_fake_station().await;
    let (session, mut events) = open_session(&station, quiet_options()).await;

    session.enqueue_verify(addr(3), cv(29));
    assert_eq!(next_frame(&mut station).await, encode_verify(addr(3), cv(29)));
    assert_eq!(
        next_protocol_event(&mut events).await,
        SessionEvent::VerifyQueueDrained
    );

    let reply = FeedbackMessage {
        address: addr(3),
        cv: cv(29),
        value: 6,
    };
    station.inject.send(encode_feedback(&reply).to_vec()).expect("inject");

    assert_eq!(
        next_protocol_event(&mut events).await,
        SessionEvent::Feedback {
            address: addr(3),
            cv: cv(29),
            value: 6
        }
    );

    // A duplicate reply has no outstanding verify to match; it must not
    // produce a second Feedback event.
    station.inject.send(encode_feedback(&reply).to_vec()).expect("inject");
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, SessionEvent::Feedback { .. }),
            "duplicate reply must not fire Feedback again"
        );
    }

    session.close();
}

/// Tests that feedback for a different decoder address is discarded while
/// the real reply still completes the verify afterwards.
#[tokio::test]
async fn test_stray_feedback_is_discarded_and_verify_still_completes() {
    let mut station = spawn_fake_station().await;
    let (session, mut events) = open_session(&station, quiet_options()).await;

    session.enqueue_verify(addr(3), cv(29));
    let _ = next_frame(&mut station).await;
    assert_eq!(
        next_protocol_event(&mut events).await,
        SessionEvent::VerifyQueueDrained
    );

    // Wrong address, then wrong CV: both stray.
    station
        .inject
        .send(
            encode_feedback(&FeedbackMessage {
                address: addr(4),
                cv: cv(29),
                value: 1,
            })
            .to_vec(),
        )
        .expect("inject");
    station
        .inject
        .send(
            encode_feedback(&FeedbackMessage {
                address: addr(3),
                cv: cv(30),
                value: 2,
            })
            .to_vec(),
        )
        .expect("inject");
    // The real reply.
    station
        .inject
        .send(
            encode_feedback(&FeedbackMessage {
                address: addr(3),
                cv: cv(29),
                value: 6,
            })
            .to_vec(),
        )
        .expect("inject");

    assert_eq!(
        next_protocol_event(&mut events).await,
        SessionEvent::Feedback {
            address: addr(3),
            cv: cv(29),
            value: 6
        },
        "only the matching reply may surface"
    );

    session.close();
}

/// Tests the bounded wait: a verify whose reply never arrives is dropped
/// after the configured timeout and the queue keeps moving.
#[tokio::test]
async fn test_unanswered_verify_times_out_and_queue_advances() {
    let mut station = spawn_fake_station().await;
    let options = SessionOptions {
        verify_timeout: Duration::from_millis(100),
        status_poll_interval: Duration::from_secs(60),
    };
    let (session, mut events) = open_session(&station, options).await;

    session.enqueue_verify(addr(3), cv(29));
    session.enqueue_write(addr(3), cv(11), 1);

    let _ = next_frame(&mut station).await; // the verify frame
    assert_eq!(
        next_protocol_event(&mut events).await,
        SessionEvent::VerifyQueueDrained
    );

    assert_eq!(
        next_protocol_event(&mut events).await,
        SessionEvent::VerifyTimedOut {
            address: addr(3),
            cv: cv(29)
        }
    );

    // The queued write goes out right after the timeout.
    assert_eq!(next_frame(&mut station).await, encode_write(addr(3), cv(11), 1));

    session.close();
}

// ── Status polling ────────────────────────────────────────────────────────────

/// Tests that an idle session polls the command station on the status
/// channel, alternating between the status and version requests.
#[tokio::test]
async fn test_idle_session_alternates_status_polls() {
    let mut station = spawn_fake_station().await;
    let options = SessionOptions {
        verify_timeout: Duration::from_secs(5),
        status_poll_interval: Duration::from_millis(50),
    };
    let (session, _events) = open_session(&station, options).await;

    // Collect status-channel bytes until both poll shapes have appeared.
    let mut seen = Vec::new();
    while seen.len() < 6 {
        let chunk = timeout(Duration::from_secs(2), station.status_bytes.recv())
            .await
            .expect("timed out waiting for status polls")
            .expect("status connection closed");
        seen.extend_from_slice(&chunk);
    }

    assert_eq!(&seen[..3], &[0x21, 0x24, 0x05], "first poll is the status request");
    assert_eq!(&seen[3..6], &[0x21, 0x21, 0x00], "second poll is the version request");

    session.close();
}

// ── Teardown ──────────────────────────────────────────────────────────────────

/// Tests that `close` while a verify is outstanding, with more operations
/// queued, discards everything and nothing is replayed.
#[tokio::test]
async fn test_close_while_verifying_discards_queued_operations() {
    let mut station = spawn_fake_station().await;
    let (session, mut events) = open_session(&station, quiet_options()).await;

    session.enqueue_verify(addr(3), cv(29));
    session.enqueue_write(addr(3), cv(11), 1);
    session.enqueue_write(addr(3), cv(12), 2);

    // Only the verify ever reaches the wire; it holds the line.
    assert_eq!(next_frame(&mut station).await, encode_verify(addr(3), cv(29)));

    session.close();

    // The queued writes were dropped: no further frame arrives.
    let late = timeout(Duration::from_millis(300), station.pom_frames.recv()).await;
    assert!(late.is_err(), "no queued frame may be transmitted after close");

    // The event stream announces the closed connection before ending.
    let mut saw_closed = false;
    while let Ok(Some(event)) = timeout(Duration::from_secs(2), events.recv()).await {
        if let SessionEvent::Status { text, .. } = &event {
            if text.contains("closed") {
                saw_closed = true;
                break;
            }
        }
    }
    assert!(saw_closed, "close must surface a status event");
}
