//! The UDP event loop: one `mio`-registered socket, a connection table with
//! a free-list of slots, and the connection-init handler chain (spec.md
//! §4.3 "Connection-init", §5). Adapted from the slot free-list and
//! `ConnectionChange` reporting pattern of `neutronium::net::endpoint`,
//! generalized from TCP accept semantics to UDP's "first datagram from an
//! unknown address starts a connection" model.

use crate::transport::buffer::{OutboundQueue, ReassemblyBuffer};
use crate::transport::limiter::{Limiter, LimiterConfig, Priority};
use crate::transport::reliable::{ReceiveOutcome, ReliableReceiver, ReliableSender};
use crate::transport::wire::{ErrorType, Frame, NetworkError, NetworkResult};
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};
use slog::Logger;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

pub type ConnectionId = u32;

const SOCKET_TOKEN: Token = Token(0);

#[derive(Debug)]
pub enum ConnectionChange {
    Connected(ConnectionId, SocketAddr),
    Disconnected(ConnectionId, SocketAddr),
}

pub struct Connection {
    pub remote_addr: SocketAddr,
    pub sender: ReliableSender,
    pub receiver: ReliableReceiver,
    pub limiter: Limiter,
    pub outbound: OutboundQueue,
    pub reassembly: Option<ReassemblyBuffer>,
    pub last_packet_at: Instant,
}

impl Connection {
    fn new(remote_addr: SocketAddr, limiter_config: LimiterConfig, now: Instant) -> Connection {
        Connection {
            remote_addr,
            sender: ReliableSender::new(Duration::from_millis(300), Duration::from_secs(6)),
            receiver: ReliableReceiver::new(),
            limiter: Limiter::new(limiter_config, now),
            outbound: OutboundQueue::new(),
            reassembly: None,
            last_packet_at: now,
        }
    }

    /// Queues `datagram` for unreliable delivery at `priority`, bypassing
    /// the reliable sender entirely (framing acks, connection handshakes).
    pub fn queue_unreliable(&mut self, datagram: Vec<u8>, priority: Priority) {
        self.outbound.push(datagram, priority);
    }

    /// Queues `payload` for reliable delivery (spec.md §4.3): wraps it in a
    /// fresh `Frame::Reliable` sequence and tracks it for retry until
    /// acknowledged.
    pub fn queue_reliable(&mut self, payload: Vec<u8>, now: Instant) {
        let sequence = self.sender.send(payload.clone(), now);
        let frame = Frame::Reliable { sequence, payload: &payload };
        let mut bytes = Vec::new();
        let _ = frame.write(&mut bytes);
        self.outbound.push(bytes, Priority::Reliable);
    }

    /// Re-sends any reliable packet whose retry timeout has elapsed,
    /// backing the limiter's send rate off for each one (spec.md §4.4
    /// "Adjustment", §4.3 "Retry").
    fn retry_due(&mut self, now: Instant) {
        for (sequence, payload) in self.sender.due_for_retry(now) {
            let frame = Frame::Reliable { sequence, payload: &payload };
            let mut bytes = Vec::new();
            let _ = frame.write(&mut bytes);
            self.outbound.push(bytes, Priority::Reliable);
            self.limiter.on_retry();
        }
    }
}

/// A handler in the connection-init chain (spec.md §4.3). Returns `Some`
/// once it claims the datagram and instantiates the new connection's
/// limiter config; the first handler to claim wins and no further handler
/// in the chain is consulted.
pub trait ConnectionInitHandler: Send + Sync {
    fn try_claim(&self, addr: SocketAddr, client_kind: u8, key: i32) -> Option<LimiterConfig>;
}

pub struct Endpoint {
    socket: UdpSocket,
    poll: Poll,
    by_addr: HashMap<SocketAddr, ConnectionId>,
    slots: Vec<Option<Connection>>,
    free: Vec<ConnectionId>,
    init_chain: Vec<Box<dyn ConnectionInitHandler>>,
    idle_timeout: Duration,
    log: Logger,
}

impl Endpoint {
    pub fn new(bind_addr: SocketAddr, idle_timeout: Duration, log: Logger) -> io::Result<Endpoint> {
        let mut socket = UdpSocket::bind(bind_addr)?;
        let poll = Poll::new()?;
        poll.registry().register(&mut socket, SOCKET_TOKEN, Interest::READABLE | Interest::WRITABLE)?;

        Ok(Endpoint {
            socket,
            poll,
            by_addr: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            init_chain: Vec::new(),
            idle_timeout,
            log,
        })
    }

    /// Registers a connection-init handler at the end of the chain.
    pub fn register_init_handler(&mut self, handler: Box<dyn ConnectionInitHandler>) {
        self.init_chain.push(handler);
    }

    fn allocate_slot(&mut self, connection: Connection) -> ConnectionId {
        if let Some(id) = self.free.pop() {
            self.slots[id as usize] = Some(connection);
            id
        } else {
            let id = self.slots.len() as ConnectionId;
            self.slots.push(Some(connection));
            id
        }
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.slots.get(id as usize).and_then(|slot| slot.as_ref())
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.slots.get_mut(id as usize).and_then(|slot| slot.as_mut())
    }

    pub fn connection_id_for_addr(&self, addr: &SocketAddr) -> Option<ConnectionId> {
        self.by_addr.get(addr).copied()
    }

    /// Every currently live connection, for broadcast-style sends (spec.md
    /// §6 SIGUSR2 "broadcast a MESSAGE file line").
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.by_addr.values().copied().collect()
    }

    /// Re-sends every connection's overdue reliable packets, backing off
    /// each one's limiter (spec.md §4.3 "Retry"). Run once per mainloop
    /// tick.
    pub fn retry_reliable_sends(&mut self, now: Instant) {
        for slot in self.slots.iter_mut().flatten() {
            slot.retry_due(now);
        }
    }

    fn disconnect(&mut self, id: ConnectionId, changes: &mut Vec<ConnectionChange>) {
        if let Some(connection) = self.slots.get_mut(id as usize).and_then(Option::take) {
            self.by_addr.remove(&connection.remote_addr);
            self.free.push(id);
            changes.push(ConnectionChange::Disconnected(id, connection.remote_addr));
        }
    }

    /// Drains every datagram currently pending on the socket, dispatching
    /// framing packets to connection state and application packets back to
    /// the caller via `changes`/`deliveries`. Never blocks.
    pub fn poll_once(&mut self, now: Instant, timeout: Duration) -> io::Result<(Vec<ConnectionChange>, Vec<(ConnectionId, Vec<u8>)>)> {
        let mut events = Events::with_capacity(16);
        self.poll.poll(&mut events, Some(timeout))?;

        let mut changes = Vec::new();
        let mut deliveries = Vec::new();
        let mut buf = [0u8; 2048];

        loop {
            let (len, addr) = match self.socket.recv_from(&mut buf) {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            };

            self.handle_datagram(addr, &buf[..len], now, &mut changes, &mut deliveries);
        }

        self.housekeep(now, &mut changes);
        Ok((changes, deliveries))
    }

    fn handle_datagram(
        &mut self,
        addr: SocketAddr,
        datagram: &[u8],
        now: Instant,
        changes: &mut Vec<ConnectionChange>,
        deliveries: &mut Vec<(ConnectionId, Vec<u8>)>,
    ) {
        let frame = match Frame::parse(datagram) {
            Ok(frame) => frame,
            Err(NetworkError::Wait) => return,
            Err(NetworkError::Fatal(kind)) => {
                malicious_frame(&self.log, addr, kind);
                return;
            }
        };

        if let Frame::ConnectionInit { client_kind, key } = frame {
            if self.by_addr.contains_key(&addr) {
                return;
            }
            self.accept_connection(addr, client_kind, key, now, changes);
            return;
        }

        let Some(&id) = self.by_addr.get(&addr) else {
            return;
        };

        let connection = self.slots[id as usize].as_mut().unwrap();
        connection.last_packet_at = now;

        match frame {
            Frame::Reliable { sequence, payload } => {
                let ack = Frame::Ack { sequence };
                let mut bytes = Vec::new();
                let _ = ack.write(&mut bytes);
                connection.outbound.push(bytes, Priority::Ack);

                if let ReceiveOutcome::Ready(items) = connection.receiver.receive(sequence, payload.to_vec()) {
                    for item in items {
                        deliveries.push((id, item));
                    }
                }
            }
            Frame::Ack { sequence } => {
                if connection.sender.ack(sequence) {
                    connection.limiter.on_ack();
                }
            }
            Frame::Grouped { entries } => {
                for entry in entries {
                    deliveries.push((id, entry.to_vec()));
                }
            }
            Frame::BigPacketFragment { total_len, offset, payload } => {
                if connection.reassembly.is_none() {
                    connection.reassembly = ReassemblyBuffer::new(total_len).ok();
                }
                if let Some(buffer) = connection.reassembly.as_mut() {
                    match buffer.feed(offset, payload) {
                        Ok(Some(complete)) => {
                            deliveries.push((id, complete.to_vec()));
                            connection.reassembly = None;
                        }
                        Ok(None) => {}
                        Err(NetworkError::Fatal(kind)) => {
                            malicious_frame(&self.log, addr, kind);
                            connection.reassembly = None;
                        }
                        Err(NetworkError::Wait) => {}
                    }
                }
            }
            Frame::Disconnect => self.disconnect(id, changes),
            Frame::Application(payload) => deliveries.push((id, payload.to_vec())),
            Frame::ConnectionInit { .. } | Frame::ConnectionResponse { .. } => {}
        }
    }

    fn accept_connection(&mut self, addr: SocketAddr, client_kind: u8, key: i32, now: Instant, changes: &mut Vec<ConnectionChange>) {
        for handler in &self.init_chain {
            if let Some(limiter_config) = handler.try_claim(addr, client_kind, key) {
                let connection = Connection::new(addr, limiter_config, now);
                let id = self.allocate_slot(connection);
                self.by_addr.insert(addr, id);

                let response = Frame::ConnectionResponse { key };
                let mut bytes = Vec::new();
                let _ = response.write(&mut bytes);
                self.slots[id as usize].as_mut().unwrap().outbound.push(bytes, Priority::UnrelHigh);

                changes.push(ConnectionChange::Connected(id, addr));
                return;
            }
        }
        // No handler claimed it: the datagram is dropped (spec.md §4.3).
    }

    /// Disconnects any connection that's had no packet for `idle_timeout`
    /// (spec.md §4.3 "Failure semantics").
    fn housekeep(&mut self, now: Instant, changes: &mut Vec<ConnectionChange>) {
        let timed_out: Vec<ConnectionId> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| {
                slot.as_ref().and_then(|c| {
                    if now.saturating_duration_since(c.last_packet_at) >= self.idle_timeout {
                        Some(id as ConnectionId)
                    } else {
                        None
                    }
                })
            })
            .collect();

        for id in timed_out {
            self.disconnect(id, changes);
        }
    }

    /// Drains every connection's outbound queue to the wire, gated by each
    /// datagram's own priority (spec.md §4.4 "Admission").
    pub fn flush_outbound(&mut self, now: Instant) -> NetworkResult<usize> {
        let mut sent = 0;
        for slot in self.slots.iter_mut().flatten() {
            slot.limiter.iter(now);
            while let Some((datagram, priority)) = slot.outbound.pop() {
                if !slot.limiter.check(datagram.len() as f64, priority) {
                    slot.outbound.push(datagram, priority);
                    break;
                }
                self.socket.send_to(&datagram, slot.remote_addr)?;
                sent += 1;
            }
        }
        Ok(sent)
    }
}

fn malicious_frame(log: &Logger, addr: SocketAddr, kind: ErrorType) {
    flux::malicious!(log, "malformed framing packet"; "addr" => %addr, "kind" => ?kind);
}
