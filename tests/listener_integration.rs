//! Listener End-to-End Tests
//!
//! Drives the full stack (listener supervision, connection manager, wire
//! protocol) against scripted mock transports. No broker required. Covers:
//! - Readiness gating: no consumption before the connect handshake finishes
//! - Last-write-wins semantics of the shared orientation slot
//! - Reconnect polling through connection loss, cancellation and exhaustion
//! - Unified log-and-skip handling of undecodable payloads
//!
//! Run with: `cargo test --test listener_integration`

use disha_io::client::{ConnectOptions, MqttClient};
use disha_io::config::ReconnectConfig;
use disha_io::error::{Error, Result};
use disha_io::listener::OrientationListener;
use disha_io::orientation::{self, OrientationHandle, OrientationVector};
use disha_io::protocol::{decode_remaining_length, QosLevel};
use disha_io::transport::{Dialer, MockTransport, Transport};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// Test Dialers
// ============================================================================

/// Dialer that replays a scripted sequence of dial outcomes.
///
/// Each `Some(mock)` connects to that transport; each `None` fails the
/// attempt. Once the queue is drained every further attempt fails, which
/// models a broker that never comes back.
struct QueueDialer {
    outcomes: Mutex<VecDeque<Option<MockTransport>>>,
    attempts: Arc<AtomicU32>,
}

impl QueueDialer {
    fn new(outcomes: Vec<Option<MockTransport>>) -> (Self, Arc<AtomicU32>) {
        let attempts = Arc::new(AtomicU32::new(0));
        let dialer = QueueDialer {
            outcomes: Mutex::new(outcomes.into()),
            attempts: Arc::clone(&attempts),
        };
        (dialer, attempts)
    }
}

impl Dialer for QueueDialer {
    fn dial(&self) -> Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.lock().unwrap().pop_front() {
            Some(Some(mock)) => Ok(Box::new(mock)),
            _ => Err(Error::Other("broker unreachable".to_string())),
        }
    }
}

/// Dialer that blocks every dial attempt until released.
struct HoldDialer {
    release: Arc<AtomicBool>,
    transport: MockTransport,
}

impl Dialer for HoldDialer {
    fn dial(&self) -> Result<Box<dyn Transport>> {
        while !self.release.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(5));
        }
        Ok(Box::new(self.transport.clone()))
    }
}

// ============================================================================
// Frame Builders
// ============================================================================

fn connack_frame(session_present: bool, return_code: u8) -> Vec<u8> {
    vec![0x20, 0x02, session_present as u8, return_code]
}

fn suback_frame(packet_id: u16, return_code: u8) -> Vec<u8> {
    let id = packet_id.to_be_bytes();
    vec![0x90, 0x03, id[0], id[1], return_code]
}

/// QoS 0 PUBLISH frame
fn publish_frame(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x30, (2 + topic.len() + payload.len()) as u8];
    frame.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    frame.extend_from_slice(topic.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// A transport already scripted through a successful handshake.
fn handshake_transport(session_present: bool) -> MockTransport {
    let mock = MockTransport::new();
    mock.inject_read(&connack_frame(session_present, 0));
    if !session_present {
        mock.inject_read(&suback_frame(1, 0));
    }
    mock
}

/// Packet type codes of each complete frame in a byte stream.
fn frame_types(mut bytes: &[u8]) -> Vec<u8> {
    let mut types = Vec::new();
    while !bytes.is_empty() {
        let (remaining, varint_len) = decode_remaining_length(&bytes[1..])
            .unwrap()
            .expect("complete frame");
        types.push(bytes[0] >> 4);
        bytes = &bytes[1 + varint_len + remaining..];
    }
    types
}

// ============================================================================
// Harness
// ============================================================================

fn test_options() -> ConnectOptions {
    ConnectOptions {
        client_id: "it_client".to_string(),
        topic: "coords".to_string(),
        qos: QosLevel::AtMostOnce,
        clean_session: false,
        // Keep-alive off so quiet tests cannot trip the idle clock
        keep_alive: Duration::ZERO,
    }
}

fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        poll_interval_ms: 10,
        max_attempts,
    }
}

fn wait_for_orientation(
    handle: &OrientationHandle,
    expected: OrientationVector,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if orientation::current(handle) == expected {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

// ============================================================================
// Test: Readiness Gating
// ============================================================================

#[test]
fn test_no_consumption_before_handshake_completes() {
    let release = Arc::new(AtomicBool::new(false));
    let mock = handshake_transport(false);
    mock.inject_read(&publish_frame("coords", b"9,9,9"));

    let dialer = HoldDialer {
        release: Arc::clone(&release),
        transport: mock.clone(),
    };
    let handle = orientation::create_orientation_handle();
    let mut listener = OrientationListener::start(
        MqttClient::new(Box::new(dialer), test_options()),
        fast_reconnect(5),
        Arc::clone(&handle),
    )
    .unwrap();

    // While the dial is held, the consumer must not touch the transport
    thread::sleep(Duration::from_millis(200));
    assert!(!listener.is_ready());
    assert_eq!(
        mock.read_count(),
        0,
        "listener consumed from the transport before the handshake finished"
    );
    assert_eq!(orientation::current(&handle), OrientationVector::default());

    // Release the handshake; consumption starts and the slot fills
    release.store(true, Ordering::SeqCst);
    assert!(
        wait_for_orientation(
            &handle,
            OrientationVector::new(9.0, 9.0, 9.0),
            Duration::from_secs(3)
        ),
        "slot never picked up the queued message after release"
    );
    assert!(listener.is_ready());

    listener.shutdown().unwrap();
    assert!(!listener.has_failed());
}

// ============================================================================
// Test: Last Write Wins
// ============================================================================

#[test]
fn test_slot_holds_most_recent_decoded_value() {
    let mock = handshake_transport(false);
    mock.inject_read(&publish_frame("coords", b"1,0,0"));
    mock.inject_read(&publish_frame("coords", b"2,0,0"));
    mock.inject_read(&publish_frame("coords", b"3,0,0"));

    let (dialer, _) = QueueDialer::new(vec![Some(mock)]);
    let handle = orientation::create_orientation_handle();
    let mut listener = OrientationListener::start(
        MqttClient::new(Box::new(dialer), test_options()),
        fast_reconnect(5),
        Arc::clone(&handle),
    )
    .unwrap();

    assert!(
        wait_for_orientation(
            &handle,
            OrientationVector::new(3.0, 0.0, 0.0),
            Duration::from_secs(3)
        ),
        "slot should settle on the last published triple"
    );

    listener.shutdown().unwrap();
    assert!(!listener.has_failed());
}

// ============================================================================
// Test: Reconnect Flow
// ============================================================================

#[test]
fn test_reconnects_after_connection_loss() {
    // First connection delivers one message, then drops
    let first = handshake_transport(false);
    first.inject_read(&publish_frame("coords", b"1,1,1"));
    first.close();

    // Two failed attempts, then a fresh connection with a new message
    let second = handshake_transport(false);
    second.inject_read(&publish_frame("coords", b"2,2,2"));

    let (dialer, attempts) =
        QueueDialer::new(vec![Some(first), None, None, Some(second.clone())]);
    let handle = orientation::create_orientation_handle();
    let mut listener = OrientationListener::start(
        MqttClient::new(Box::new(dialer), test_options()),
        fast_reconnect(50),
        Arc::clone(&handle),
    )
    .unwrap();

    assert!(
        wait_for_orientation(
            &handle,
            OrientationVector::new(2.0, 2.0, 2.0),
            Duration::from_secs(5)
        ),
        "listener never recovered onto the second connection"
    );

    // Initial connect + two failures + successful reconnect
    assert_eq!(attempts.load(Ordering::SeqCst), 4);

    // The new session carried no subscription, so the client resubscribed
    assert_eq!(frame_types(&second.get_written()), [1, 8]);

    listener.shutdown().unwrap();
    assert!(!listener.has_failed());
}

#[test]
fn test_session_present_skips_resubscribe() {
    let mock = handshake_transport(true);
    mock.inject_read(&publish_frame("coords", b"4,4,4"));

    let (dialer, _) = QueueDialer::new(vec![Some(mock.clone())]);
    let handle = orientation::create_orientation_handle();
    let mut listener = OrientationListener::start(
        MqttClient::new(Box::new(dialer), test_options()),
        fast_reconnect(5),
        Arc::clone(&handle),
    )
    .unwrap();

    assert!(
        wait_for_orientation(
            &handle,
            OrientationVector::new(4.0, 4.0, 4.0),
            Duration::from_secs(3)
        ),
        "resumed session should still deliver messages"
    );

    // CONNECT only; the persistent session already carries the subscription
    assert_eq!(frame_types(&mock.get_written()), [1]);

    listener.shutdown().unwrap();
}

#[test]
fn test_shutdown_cancels_reconnect_poll() {
    let first = handshake_transport(false);
    first.close();

    // Queue drained after the first connection: every retry fails
    let (dialer, attempts) = QueueDialer::new(vec![Some(first)]);
    let handle = orientation::create_orientation_handle();
    let mut listener = OrientationListener::start(
        MqttClient::new(Box::new(dialer), test_options()),
        fast_reconnect(10_000),
        handle,
    )
    .unwrap();

    // Wait until the listener is clearly inside the reconnect poll
    assert!(
        wait_until(|| attempts.load(Ordering::SeqCst) >= 3, Duration::from_secs(5)),
        "listener never entered the reconnect poll"
    );

    let start = Instant::now();
    listener.shutdown().unwrap();
    assert!(
        start.elapsed() < Duration::from_secs(2),
        "shutdown took {:?} while reconnect polling",
        start.elapsed()
    );

    // Cancellation is a clean exit, not a failure
    assert!(listener.take_error().is_none());
}

#[test]
fn test_reconnect_exhaustion_is_terminal() {
    let first = handshake_transport(false);
    first.close();

    let (dialer, _) = QueueDialer::new(vec![Some(first)]);
    let handle = orientation::create_orientation_handle();
    let mut listener = OrientationListener::start(
        MqttClient::new(Box::new(dialer), test_options()),
        fast_reconnect(3),
        handle,
    )
    .unwrap();

    assert!(
        wait_until(|| listener.has_failed(), Duration::from_secs(5)),
        "exhausted reconnect poll should mark the listener failed"
    );

    listener.shutdown().unwrap();
    assert!(matches!(
        listener.take_error(),
        Some(Error::ReconnectExhausted(3))
    ));
}

#[test]
fn test_initial_connect_failure_is_terminal() {
    let (dialer, _) = QueueDialer::new(vec![]);
    let handle = orientation::create_orientation_handle();
    let mut listener = OrientationListener::start(
        MqttClient::new(Box::new(dialer), test_options()),
        fast_reconnect(5),
        handle,
    )
    .unwrap();

    assert!(
        wait_until(|| listener.has_failed(), Duration::from_secs(3)),
        "initial connect failure should be terminal"
    );
    assert!(!listener.is_ready());

    listener.shutdown().unwrap();
    assert!(listener.take_error().is_some());
}

// ============================================================================
// Test: Decode Failures
// ============================================================================

#[test]
fn test_undecodable_payloads_are_skipped_not_fatal() {
    let mock = handshake_transport(false);
    mock.inject_read(&publish_frame("coords", b"1,2,3"));
    mock.inject_read(&publish_frame("coords", b""));
    mock.inject_read(&publish_frame("coords", b"not,a,number"));
    mock.inject_read(&publish_frame("coords", b"7,8"));
    mock.inject_read(&publish_frame("coords", b"4,5,6"));

    let (dialer, _) = QueueDialer::new(vec![Some(mock)]);
    let handle = orientation::create_orientation_handle();
    let mut listener = OrientationListener::start(
        MqttClient::new(Box::new(dialer), test_options()),
        fast_reconnect(5),
        Arc::clone(&handle),
    )
    .unwrap();

    assert!(
        wait_for_orientation(
            &handle,
            OrientationVector::new(4.0, 5.0, 6.0),
            Duration::from_secs(3)
        ),
        "listener should skip bad payloads and keep consuming"
    );
    assert!(!listener.has_failed());

    listener.shutdown().unwrap();
}

// ============================================================================
// Test: Full Stream
// ============================================================================

#[test]
fn test_message_stream_end_to_end() {
    let mock = handshake_transport(false);
    mock.inject_read(&publish_frame("coords", b"0,0,0"));
    mock.inject_read(&publish_frame("coords", b"10,-5,2.5"));
    mock.inject_read(&publish_frame("coords", b"-5,5,0"));

    let (dialer, attempts) = QueueDialer::new(vec![Some(mock.clone())]);
    let handle = orientation::create_orientation_handle();
    let mut listener = OrientationListener::start(
        MqttClient::new(Box::new(dialer), test_options()),
        fast_reconnect(5),
        Arc::clone(&handle),
    )
    .unwrap();

    assert!(
        wait_for_orientation(
            &handle,
            OrientationVector::new(-5.0, 5.0, 0.0),
            Duration::from_secs(3)
        ),
        "slot should end on the final triple of the stream"
    );

    // One connection, one CONNECT, exactly one SUBSCRIBE
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    let types = frame_types(&mock.get_written());
    assert_eq!(types.iter().filter(|&&t| t == 8).count(), 1);

    listener.shutdown().unwrap();
    assert!(!listener.has_failed());
    assert!(listener.take_error().is_none());
}
