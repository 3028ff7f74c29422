//! MQTT connection manager
//!
//! Owns the dialer and the active transport, runs the connect and
//! subscribe handshake, and exposes the blocking receive primitive with
//! the liveness distinction the listener loop needs: `Ok(Some(_))`
//! delivers a message, `Ok(None)` means the connection is alive but quiet,
//! and `Err(_)` means the connection is no longer usable.

use crate::error::{Error, Result};
use crate::protocol::{Packet, PacketReader, QosLevel, TxPacket, SUBACK_FAILURE};
use crate::transport::{Dialer, Transport};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Deadline for the CONNACK and SUBACK handshake replies
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Shorter handshake deadline for reconnect attempts, so one hung broker
/// cannot pin the poll (and a pending shutdown behind it) for long
const RECONNECT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Pacing sleep between polls while waiting for data
const POLL_SLEEP: Duration = Duration::from_millis(2);

/// Connect options for the broker handshake.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Client identifier presented to the broker
    pub client_id: String,
    /// Topic filter to subscribe to
    pub topic: String,
    /// Requested delivery QoS
    pub qos: QosLevel,
    /// Start a clean session instead of resuming a persistent one
    pub clean_session: bool,
    /// Keep-alive interval (zero disables the keep-alive clock)
    pub keep_alive: Duration,
}

/// Connection liveness as seen by the manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionState {
    /// Transport currently believed alive
    pub connected: bool,
    /// Broker resumed a persistent session on the last connect
    pub session_present: bool,
}

/// An application message pulled from the subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Topic the message was published on
    pub topic: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

/// MQTT client covering the subscriber role.
pub struct MqttClient {
    dialer: Box<dyn Dialer>,
    options: ConnectOptions,
    transport: Option<Box<dyn Transport>>,
    reader: PacketReader,
    tx: TxPacket,
    state: ConnectionState,
    next_packet_id: u16,
    /// QoS 2 publishes received but not yet released by the broker
    inflight_qos2: HashSet<u16>,
    last_write: Instant,
    last_read: Instant,
}

impl MqttClient {
    pub fn new(dialer: Box<dyn Dialer>, options: ConnectOptions) -> Self {
        MqttClient {
            dialer,
            options,
            transport: None,
            reader: PacketReader::new(),
            tx: TxPacket::new(),
            state: ConnectionState::default(),
            next_packet_id: 0,
            inflight_qos2: HashSet::new(),
            last_write: Instant::now(),
            last_read: Instant::now(),
        }
    }

    /// Establish the connection and subscription.
    ///
    /// Dials a fresh transport, runs the CONNECT/CONNACK handshake and,
    /// unless the broker resumed a persistent session that already carries
    /// the subscription, subscribes to the configured topic. Landing on a
    /// fresh session also discards tracked QoS 2 state, since the new
    /// session may reuse packet ids. Safe to call again after a disconnect.
    pub fn connect(&mut self) -> Result<()> {
        self.connect_with_deadline(HANDSHAKE_TIMEOUT)
    }

    fn connect_with_deadline(&mut self, handshake_timeout: Duration) -> Result<()> {
        if self.options.client_id.len() > u16::MAX as usize
            || self.options.topic.len() > u16::MAX as usize
        {
            return Err(Error::InvalidParameter(
                "Client id and topic must fit in 65535 bytes".to_string(),
            ));
        }

        self.transport = None;
        self.state = ConnectionState::default();
        self.reader.reset();

        let mut transport = self.dialer.dial()?;

        let keep_alive_secs = self.options.keep_alive.as_secs().min(u16::MAX as u64) as u16;
        self.tx.set_connect(
            &self.options.client_id,
            self.options.clean_session,
            keep_alive_secs,
        );
        transport.write_all(self.tx.as_bytes())?;
        transport.flush()?;

        let deadline = Instant::now() + handshake_timeout;
        let (session_present, return_code) = match self.wait_packet(transport.as_mut(), deadline)? {
            Packet::Connack {
                session_present,
                return_code,
            } => (session_present, return_code),
            other => {
                return Err(Error::Protocol(format!(
                    "Expected CONNACK, got {:?}",
                    other
                )))
            }
        };
        if return_code != 0 {
            return Err(Error::ConnectionRefused(return_code));
        }

        if session_present {
            log::info!("Broker resumed persistent session, subscription already active");
        } else {
            // Session-present 0 means both sides dropped session state,
            // including QoS 2 ids received but not yet released
            self.inflight_qos2.clear();
            self.subscribe(transport.as_mut(), deadline)?;
        }

        self.state = ConnectionState {
            connected: true,
            session_present,
        };
        self.last_write = Instant::now();
        self.last_read = Instant::now();
        self.transport = Some(transport);
        Ok(())
    }

    /// Non-blocking liveness check.
    pub fn is_connected(&self) -> bool {
        self.state.connected
    }

    /// Snapshot of the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Pull the next application message, polling for up to `timeout`.
    ///
    /// Acknowledgement traffic (keep-alive answers, QoS handshakes) is
    /// handled internally and never surfaces as a message. `Ok(None)` means
    /// the connection is healthy but nothing arrived in time; any `Err`
    /// means the connection has been torn down.
    pub fn receive(&mut self, timeout: Duration) -> Result<Option<InboundMessage>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Err(e) = self.tick_keep_alive() {
                return Err(self.drop_connection(e));
            }

            let polled = match self.transport.as_mut() {
                Some(transport) => self.reader.poll(transport.as_mut()),
                None => return Err(Error::NotConnected),
            };

            match polled {
                Ok(Some(packet)) => {
                    self.last_read = Instant::now();
                    match self.handle_packet(packet) {
                        Ok(Some(message)) => return Ok(Some(message)),
                        Ok(None) => {
                            if Instant::now() >= deadline {
                                return Ok(None);
                            }
                        }
                        Err(e) => return Err(self.drop_connection(e)),
                    }
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    thread::sleep(POLL_SLEEP);
                }
                Err(e) => return Err(self.drop_connection(e)),
            }
        }
    }

    /// Poll for reconnection at a fixed interval.
    ///
    /// Bounded and cancellable: gives up after `max_attempts` and returns
    /// `Ok(false)` without an error when `shutdown` is set. Broker-side
    /// rejections (refused connect, rejected subscribe, protocol faults)
    /// are not retried. Each attempt handshakes under a shorter deadline
    /// than the initial connect.
    pub fn reconnect_poll(
        &mut self,
        shutdown: &AtomicBool,
        interval: Duration,
        max_attempts: u32,
    ) -> Result<bool> {
        for attempt in 1..=max_attempts {
            if shutdown.load(Ordering::Relaxed) {
                log::info!("Reconnect cancelled by shutdown");
                return Ok(false);
            }
            match self.connect_with_deadline(RECONNECT_HANDSHAKE_TIMEOUT) {
                Ok(()) => {
                    log::info!("Reconnected after {} attempt(s)", attempt);
                    return Ok(true);
                }
                Err(
                    e @ (Error::ConnectionRefused(_)
                    | Error::SubscribeRejected
                    | Error::Protocol(_)
                    | Error::NotSupported(_)
                    | Error::InvalidParameter(_)),
                ) => {
                    return Err(e);
                }
                Err(e) => {
                    log::debug!(
                        "Reconnect attempt {}/{} failed: {}",
                        attempt,
                        max_attempts,
                        e
                    );
                }
            }
            thread::sleep(interval);
        }
        Err(Error::ReconnectExhausted(max_attempts))
    }

    /// Send DISCONNECT and drop the transport.
    ///
    /// Best-effort: write failures are ignored, the connection is
    /// considered closed either way.
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            self.tx.set_disconnect();
            let _ = transport.write_all(self.tx.as_bytes());
            let _ = transport.flush();
            log::info!("Disconnected from broker");
        }
        self.state.connected = false;
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    fn subscribe(&mut self, transport: &mut dyn Transport, deadline: Instant) -> Result<()> {
        let packet_id = self.take_packet_id();
        self.tx
            .set_subscribe(packet_id, &self.options.topic, self.options.qos);
        transport.write_all(self.tx.as_bytes())?;
        transport.flush()?;

        loop {
            match self.wait_packet(transport, deadline)? {
                Packet::Suback {
                    packet_id: ack_id,
                    return_code,
                } => {
                    if ack_id != packet_id {
                        return Err(Error::Protocol(format!(
                            "SUBACK for packet id {} (expected {})",
                            ack_id, packet_id
                        )));
                    }
                    if return_code == SUBACK_FAILURE {
                        return Err(Error::SubscribeRejected);
                    }
                    if return_code != self.options.qos as u8 {
                        log::warn!(
                            "Broker granted QoS {} (requested {})",
                            return_code,
                            self.options.qos
                        );
                    }
                    log::info!(
                        "Subscribed to {:?} (QoS {})",
                        self.options.topic,
                        return_code
                    );
                    return Ok(());
                }
                // The broker may start delivering before SUBACK; unacked
                // QoS 1/2 messages are redelivered once we are consuming
                Packet::Publish { qos, topic, .. } => {
                    log::debug!("Skipping delivery on {:?} (QoS {}) before SUBACK", topic, qos);
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "Expected SUBACK, got {:?}",
                        other
                    )))
                }
            }
        }
    }

    fn wait_packet(&mut self, transport: &mut dyn Transport, deadline: Instant) -> Result<Packet> {
        loop {
            if let Some(packet) = self.reader.poll(transport)? {
                return Ok(packet);
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            thread::sleep(POLL_SLEEP);
        }
    }

    // ========================================================================
    // Inbound Handling
    // ========================================================================

    /// Process one inbound packet; returns a message for deliverable
    /// PUBLISH packets, `None` for control traffic.
    fn handle_packet(&mut self, packet: Packet) -> Result<Option<InboundMessage>> {
        match packet {
            Packet::Publish {
                dup,
                qos,
                topic,
                packet_id,
                payload,
            } => {
                if self.acknowledge_publish(qos, packet_id, dup)? {
                    Ok(Some(InboundMessage { topic, payload }))
                } else {
                    log::debug!("Suppressing duplicate QoS 2 delivery on {:?}", topic);
                    Ok(None)
                }
            }
            Packet::Pubrel { packet_id } => {
                self.inflight_qos2.remove(&packet_id);
                self.tx.set_pubcomp(packet_id);
                self.send_pending()?;
                Ok(None)
            }
            Packet::Pingresp => {
                log::trace!("PINGRESP received");
                Ok(None)
            }
            // A slow broker can answer a handshake after its deadline passed
            Packet::Connack { .. } | Packet::Suback { .. } => {
                log::debug!("Ignoring late handshake packet");
                Ok(None)
            }
        }
    }

    /// Send the acknowledgement a PUBLISH requires; returns whether the
    /// message should be delivered (QoS 2 retransmissions are suppressed).
    fn acknowledge_publish(&mut self, qos: u8, packet_id: Option<u16>, dup: bool) -> Result<bool> {
        match qos {
            0 => Ok(true),
            1 => {
                let id = packet_id
                    .ok_or_else(|| Error::Protocol("QoS 1 PUBLISH without packet id".to_string()))?;
                self.tx.set_puback(id);
                self.send_pending()?;
                Ok(true)
            }
            2 => {
                let id = packet_id
                    .ok_or_else(|| Error::Protocol("QoS 2 PUBLISH without packet id".to_string()))?;
                let first_delivery = self.inflight_qos2.insert(id);
                if !first_delivery && !dup {
                    log::debug!("QoS 2 retransmission of {} without dup flag", id);
                }
                self.tx.set_pubrec(id);
                self.send_pending()?;
                Ok(first_delivery)
            }
            other => Err(Error::Protocol(format!("Invalid QoS {} in PUBLISH", other))),
        }
    }

    /// Run the keep-alive clock: send PINGREQ on an idle connection and
    /// declare it dead once the broker has been silent for 1.5 intervals.
    fn tick_keep_alive(&mut self) -> Result<()> {
        let keep_alive = self.options.keep_alive;
        if keep_alive.is_zero() || self.transport.is_none() {
            return Ok(());
        }

        if self.last_read.elapsed() > keep_alive + keep_alive / 2 {
            return Err(Error::KeepAliveTimeout);
        }

        if self.last_write.elapsed() >= keep_alive * 3 / 4 {
            self.tx.set_pingreq();
            self.send_pending()?;
            log::trace!("PINGREQ sent");
        }
        Ok(())
    }

    /// Write the currently configured TX packet to the transport.
    fn send_pending(&mut self) -> Result<()> {
        let transport = match self.transport.as_mut() {
            Some(transport) => transport,
            None => return Err(Error::NotConnected),
        };
        transport.write_all(self.tx.as_bytes())?;
        transport.flush()?;
        self.last_write = Instant::now();
        Ok(())
    }

    /// Tear down the connection after a failure, returning the error.
    fn drop_connection(&mut self, error: Error) -> Error {
        if self.state.connected {
            log::debug!("Dropping connection: {}", error);
        }
        self.state.connected = false;
        self.transport = None;
        error
    }

    fn take_packet_id(&mut self) -> u16 {
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        if self.next_packet_id == 0 {
            self.next_packet_id = 1;
        }
        self.next_packet_id
    }
}
