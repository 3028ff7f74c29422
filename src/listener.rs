//! Listener supervision: readiness gate, consume loop, reconnect handling
//!
//! Two named threads cooperate through a `ReadyGate`:
//!
//! 1. The connect thread (`mqtt-connect`) runs the initial connect and
//!    subscribe handshake once, then latches the gate. An initial connect
//!    failure is terminal for the whole listener.
//! 2. The listener thread (`mqtt-listener`) blocks on the gate, then
//!    consumes messages one at a time in receive order, decoding each into
//!    the shared orientation slot. Connection loss sends it through a
//!    bounded reconnect poll; anything unrecoverable stops it and is
//!    surfaced through `take_error`.
//!
//! Every blocking wait observes the shutdown flag within a bounded
//! interval, so `shutdown()` cannot hang on a stuck wait.

use crate::client::{InboundMessage, MqttClient};
use crate::config::ReconnectConfig;
use crate::decoder;
use crate::error::{Error, Result};
use crate::orientation::OrientationHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Receive poll window per consume iteration
const RECEIVE_POLL: Duration = Duration::from_millis(100);

/// Slice length for interruptible gate waits
const GATE_WAIT_SLICE: Duration = Duration::from_millis(100);

// ============================================================================
// Readiness Gate
// ============================================================================

/// One-shot readiness signal between the connect and listener threads.
///
/// Latches true exactly once, when the initial connect and subscribe
/// handshake completes. It is never re-armed: it means "initial handshake
/// done", not "currently connected", so later reconnects do not block
/// consumers behind a fresh gate.
pub struct ReadyGate {
    ready: Mutex<bool>,
    condvar: Condvar,
}

impl ReadyGate {
    pub fn new() -> Self {
        ReadyGate {
            ready: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Latch the gate and wake the waiter.
    pub fn mark_ready(&self) {
        let mut ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        if !*ready {
            *ready = true;
            self.condvar.notify_all();
        }
    }

    /// Whether the gate has latched.
    pub fn is_ready(&self) -> bool {
        *self.ready.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until the gate latches or shutdown is requested.
    ///
    /// Returns true when ready, false when cancelled. The condvar wait is
    /// sliced so a shutdown request is noticed within one slice even if
    /// the gate never fires.
    pub fn wait(&self, shutdown: &AtomicBool) -> bool {
        let mut ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        while !*ready {
            if shutdown.load(Ordering::Relaxed) {
                return false;
            }
            let (guard, _) = self
                .condvar
                .wait_timeout(ready, GATE_WAIT_SLICE)
                .unwrap_or_else(|e| e.into_inner());
            ready = guard;
        }
        true
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Consume Loop
// ============================================================================

/// Listener loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    /// Blocked on the readiness gate
    WaitingForReady,
    /// Pulling and decoding messages
    Consuming,
    /// Polling for a reconnect after connection loss
    Reconnecting,
}

/// Whether an error can be recovered by reconnecting.
fn is_recoverable(error: &Error) -> bool {
    matches!(
        error,
        Error::Io(_)
            | Error::ConnectionClosed
            | Error::KeepAliveTimeout
            | Error::NotConnected
            | Error::Timeout
    )
}

/// Decode one message into the orientation slot.
///
/// Decode failures are logged and skipped; the previous value stays.
fn apply_message(orientation: &OrientationHandle, message: &InboundMessage) {
    match decoder::decode(&message.payload) {
        Ok(vector) => {
            let mut slot = orientation.lock().unwrap_or_else(|e| e.into_inner());
            *slot = vector;
            log::debug!(
                "Orientation updated: ({}, {}, {})",
                vector.x,
                vector.y,
                vector.z
            );
        }
        Err(e) => {
            log::warn!("Dropping message on {:?}: {}", message.topic, e);
        }
    }
}

fn listener_loop(
    client: &Mutex<MqttClient>,
    gate: &ReadyGate,
    shutdown: &AtomicBool,
    orientation: &OrientationHandle,
    reconnect: &ReconnectConfig,
) -> Result<()> {
    let mut state = LoopState::WaitingForReady;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            return Ok(());
        }

        state = match state {
            LoopState::WaitingForReady => {
                if gate.wait(shutdown) {
                    LoopState::Consuming
                } else {
                    return Ok(());
                }
            }
            LoopState::Consuming => {
                let received = {
                    let mut client = client
                        .lock()
                        .map_err(|e| Error::MutexPoisoned(format!("client mutex: {}", e)))?;
                    client.receive(RECEIVE_POLL)
                };
                match received {
                    Ok(Some(message)) => {
                        apply_message(orientation, &message);
                        LoopState::Consuming
                    }
                    Ok(None) => LoopState::Consuming,
                    Err(e) if is_recoverable(&e) => {
                        log::warn!("Connection lost: {}, entering reconnect poll", e);
                        LoopState::Reconnecting
                    }
                    Err(e) => return Err(e),
                }
            }
            LoopState::Reconnecting => {
                let reconnected = {
                    let mut client = client
                        .lock()
                        .map_err(|e| Error::MutexPoisoned(format!("client mutex: {}", e)))?;
                    client.reconnect_poll(
                        shutdown,
                        reconnect.poll_interval(),
                        reconnect.max_attempts,
                    )
                };
                match reconnected {
                    Ok(true) => LoopState::Consuming,
                    Ok(false) => return Ok(()),
                    Err(e) => return Err(e),
                }
            }
        };
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Background orientation listener.
///
/// Owns the connect and listener threads plus the coordination state they
/// share. Dropping the listener shuts both threads down.
pub struct OrientationListener {
    client: Arc<Mutex<MqttClient>>,
    shutdown: Arc<AtomicBool>,
    gate: Arc<ReadyGate>,
    terminal: Arc<Mutex<Option<Error>>>,
    connect_handle: Option<JoinHandle<()>>,
    listener_handle: Option<JoinHandle<()>>,
}

impl OrientationListener {
    /// Spawn the connect and listener threads.
    pub fn start(
        client: MqttClient,
        reconnect: ReconnectConfig,
        orientation: OrientationHandle,
    ) -> Result<Self> {
        let client = Arc::new(Mutex::new(client));
        let shutdown = Arc::new(AtomicBool::new(false));
        let gate = Arc::new(ReadyGate::new());
        let terminal = Arc::new(Mutex::new(None));

        let connect_client = Arc::clone(&client);
        let connect_gate = Arc::clone(&gate);
        let connect_shutdown = Arc::clone(&shutdown);
        let connect_terminal = Arc::clone(&terminal);
        let connect_handle = thread::Builder::new()
            .name("mqtt-connect".to_string())
            .spawn(move || {
                let result = match connect_client.lock() {
                    Ok(mut client) => client.connect(),
                    Err(e) => Err(Error::MutexPoisoned(format!("client mutex: {}", e))),
                };
                match result {
                    Ok(()) => connect_gate.mark_ready(),
                    Err(e) => {
                        log::error!("Initial connect failed: {}", e);
                        record_terminal(&connect_terminal, e);
                        connect_shutdown.store(true, Ordering::Relaxed);
                    }
                }
            })
            .map_err(|e| Error::Other(format!("Failed to spawn connect thread: {}", e)))?;

        let listener_client = Arc::clone(&client);
        let listener_gate = Arc::clone(&gate);
        let listener_shutdown = Arc::clone(&shutdown);
        let listener_terminal = Arc::clone(&terminal);
        let listener_handle = thread::Builder::new()
            .name("mqtt-listener".to_string())
            .spawn(move || {
                let result = listener_loop(
                    &listener_client,
                    &listener_gate,
                    &listener_shutdown,
                    &orientation,
                    &reconnect,
                );
                if let Err(e) = result {
                    log::error!("Listener stopped: {}", e);
                    record_terminal(&listener_terminal, e);
                    listener_shutdown.store(true, Ordering::Relaxed);
                }
                log::info!("Listener thread exiting");
            })
            .map_err(|e| Error::Other(format!("Failed to spawn listener thread: {}", e)))?;

        Ok(OrientationListener {
            client,
            shutdown,
            gate,
            terminal,
            connect_handle: Some(connect_handle),
            listener_handle: Some(listener_handle),
        })
    }

    /// Whether the initial connect handshake has completed.
    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    /// Whether the listener has stopped on an unrecoverable error.
    pub fn has_failed(&self) -> bool {
        self.terminal
            .lock()
            .map(|terminal| terminal.is_some())
            .unwrap_or(true)
    }

    /// Stop both threads and close the connection. Idempotent.
    ///
    /// Blocks until both threads notice the flag; worst case is one
    /// in-flight dial plus reconnect handshake deadline.
    pub fn shutdown(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::Relaxed);

        if self.connect_handle.is_some() || self.listener_handle.is_some() {
            log::info!("Shutting down listener...");
        }

        if let Some(handle) = self.connect_handle.take() {
            handle
                .join()
                .map_err(|_| Error::ThreadPanic("mqtt-connect".to_string()))?;
        }
        if let Some(handle) = self.listener_handle.take() {
            handle
                .join()
                .map_err(|_| Error::ThreadPanic("mqtt-listener".to_string()))?;
        }

        if let Ok(mut client) = self.client.lock() {
            client.disconnect();
        }
        Ok(())
    }

    /// Take the terminal error, if the listener stopped on one.
    pub fn take_error(&mut self) -> Option<Error> {
        self.terminal
            .lock()
            .ok()
            .and_then(|mut terminal| terminal.take())
    }
}

fn record_terminal(slot: &Mutex<Option<Error>>, error: Error) {
    if let Ok(mut terminal) = slot.lock() {
        terminal.get_or_insert(error);
    }
}

impl Drop for OrientationListener {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_gate_latches_once() {
        let gate = ReadyGate::new();
        assert!(!gate.is_ready());
        gate.mark_ready();
        assert!(gate.is_ready());
        gate.mark_ready();
        assert!(gate.is_ready());
    }

    #[test]
    fn test_gate_wait_blocks_until_ready() {
        let gate = Arc::new(ReadyGate::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let signal_gate = Arc::clone(&gate);
        let signaller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            signal_gate.mark_ready();
        });

        let start = Instant::now();
        assert!(gate.wait(&shutdown));
        assert!(start.elapsed() >= Duration::from_millis(40));
        signaller.join().unwrap();
    }

    #[test]
    fn test_gate_wait_cancelled_by_shutdown() {
        let gate = Arc::new(ReadyGate::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&shutdown);
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            flag.store(true, Ordering::Relaxed);
        });

        let start = Instant::now();
        assert!(!gate.wait(&shutdown));
        // Cancellation is noticed within one wait slice
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(!gate.is_ready());
        canceller.join().unwrap();
    }

    #[test]
    fn test_gate_wait_returns_immediately_when_latched() {
        let gate = ReadyGate::new();
        let shutdown = AtomicBool::new(false);
        gate.mark_ready();

        let start = Instant::now();
        assert!(gate.wait(&shutdown));
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_error_recovery_classification() {
        assert!(is_recoverable(&Error::ConnectionClosed));
        assert!(is_recoverable(&Error::KeepAliveTimeout));
        assert!(is_recoverable(&Error::NotConnected));
        assert!(is_recoverable(&Error::Timeout));
        assert!(is_recoverable(&Error::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "pipe"
        ))));

        assert!(!is_recoverable(&Error::ConnectionRefused(5)));
        assert!(!is_recoverable(&Error::SubscribeRejected));
        assert!(!is_recoverable(&Error::Protocol("bad frame".to_string())));
        assert!(!is_recoverable(&Error::ReconnectExhausted(120)));
    }
}
