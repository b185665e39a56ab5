//! The non-blocking event loop: a single `mio::Poll` instance multiplexing
//! the listener and every accepted connection on one thread.

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Token};
use slog::{debug, o, trace, warn, Logger};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::dispatch;
use crate::net::buffer::{RxBuffer, TxBuffer};
use crate::net::error::{ErrorType, NetworkError, NetworkResult};
use crate::net::frame::{self, DecodeOutcome};
use crate::routing::RoutingTable;
use crate::stats::Stats;

/// The listener is always registered on this fixed token; connection slots
/// are offset by one so token 0 is never ambiguous with a real connection.
const LISTENER_TOKEN: Token = Token(0);

fn slot_token(slot: usize) -> Token {
    Token(slot + 1)
}

fn token_slot(token: Token) -> Option<usize> {
    token.0.checked_sub(1)
}

/// One accepted TCP connection: its socket plus the bounded receive and
/// transmit buffers the framing layer reads and writes through. Owned
/// exclusively by the event loop thread.
struct Connection {
    socket: TcpStream,
    peer_addr: SocketAddr,
    rx: RxBuffer,
    tx: TxBuffer,
    payload_scratch: Box<[u8]>,
    /// Largest payload this connection's receive buffer can ever hold,
    /// derived from its own configured capacity rather than a fixed
    /// constant — `ServerConfig::validate` guarantees `buffer_capacity >
    /// HEADER_SIZE`, so this subtraction never underflows.
    max_payload: usize,
    writable_registered: bool,
}

impl Connection {
    fn new(socket: TcpStream, peer_addr: SocketAddr, buffer_capacity: usize) -> Connection {
        let max_payload = buffer_capacity - frame::HEADER_SIZE;
        Connection {
            socket,
            peer_addr,
            rx: RxBuffer::new(buffer_capacity),
            tx: TxBuffer::new(buffer_capacity),
            payload_scratch: vec![0u8; max_payload].into_boxed_slice(),
            max_payload,
            writable_registered: false,
        }
    }
}

/// Owns the listener, the connection table, and the process-wide routing
/// table and stats. `run` blocks forever servicing readiness events until a
/// fatal host error occurs.
pub struct Server {
    listener: TcpListener,
    poll: mio::Poll,
    events: Events,
    connections: Vec<Option<Connection>>,
    free_slots: Vec<usize>,
    routing: RoutingTable,
    stats: Stats,
    clock: Clock,
    config: ServerConfig,
    logger: Logger,
}

impl Server {
    /// Binds the listener and prepares the event loop, but does not accept
    /// any connections yet — call `run` for that. `logger` follows the same
    /// `Into<Option<&Logger>>` convenience the rest of the crate uses: pass
    /// `None` to get a discarding logger.
    #[inline]
    pub fn new<'a, L: Into<Option<&'a Logger>>>(
        config: ServerConfig,
        logger: L,
    ) -> NetworkResult<Server> {
        let logger = match logger.into() {
            Some(parent) => parent.new(o!("component" => "server")),
            None => Logger::root(slog::Discard, o!()),
        };

        let addr: SocketAddr = config.bind.parse()?;
        let mut listener = Self::bind_listener(addr, config.backlog)?;

        let poll = mio::Poll::new()?;
        poll.registry().register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Server {
            listener,
            poll,
            events: Events::with_capacity(1024),
            connections: Vec::new(),
            free_slots: Vec::new(),
            routing: RoutingTable::new(config.routing_table_capacity),
            stats: Stats::new(),
            clock: Clock::new(),
            config,
            logger,
        })
    }

    /// Builds the listening socket through `socket2` rather than
    /// `TcpListener::bind` directly, so `SO_REUSEADDR` and the configured
    /// listen backlog actually reach the OS (mio's own `TcpListener::bind`
    /// takes no backlog parameter and hardcodes its own).
    fn bind_listener(addr: SocketAddr, backlog: u32) -> NetworkResult<TcpListener> {
        let domain = match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        };

        let socket = socket2::Socket::new(domain, socket2::Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog as i32)?;

        Ok(TcpListener::from_std(socket.into()))
    }

    #[inline]
    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    #[inline]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Runs the event loop until a fatal host error occurs. Never returns
    /// `Ok` under normal operation; callers (the `sflow-server` binary) are
    /// expected to interrupt the process externally (SIGINT/SIGTERM) rather
    /// than rely on a return value.
    pub fn run(&mut self) -> NetworkResult<()> {
        let poll_timeout = Duration::from_millis(self.config.poll_timeout_ms);

        loop {
            match self.poll.poll(&mut self.events, Some(poll_timeout)) {
                Ok(()) => (),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(self.logger, "fatal poll error"; "error" => %e);
                    return Err(e.into());
                }
            }

            // mio::Events borrows self.events; collect the token/readiness
            // pairs first so the handlers below can borrow self mutably.
            let ready: Vec<(Token, bool, bool)> =
                self.events.iter().map(|e| (e.token(), e.is_readable(), e.is_writable())).collect();

            for (token, readable, writable) in ready {
                if token == LISTENER_TOKEN {
                    self.accept_all();
                    continue;
                }

                if let Some(slot) = token_slot(token) {
                    self.service_connection(slot, readable, writable);
                }
            }
        }
    }

    /// Accepts every pending connection in one pass (edge-triggered
    /// readiness means a single `accept` isn't guaranteed to drain the
    /// backlog).
    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => self.register_connection(stream, peer_addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(self.logger, "accept error"; "error" => %e);
                    break;
                }
            }
        }
    }

    fn register_connection(&mut self, mut stream: TcpStream, peer_addr: SocketAddr) {
        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                let slot = self.connections.len();
                self.connections.push(None);
                slot
            }
        };

        if let Err(e) =
            self.poll.registry().register(&mut stream, slot_token(slot), Interest::READABLE)
        {
            warn!(self.logger, "connection registration failed"; "error" => %e);
            self.free_slots.push(slot);
            return;
        }

        debug!(self.logger, "connection accepted"; "peer" => %peer_addr, "slot" => slot);
        self.connections[slot] = Some(Connection::new(stream, peer_addr, self.config.buffer_capacity));
    }

    fn service_connection(&mut self, slot: usize, readable: bool, writable: bool) {
        let outcome = self.drive_connection(slot, readable, writable);
        if let Err(err_type) = outcome {
            self.teardown_connection(slot, err_type);
        }
    }

    /// Services the write side first (so a reply queued on a previous tick
    /// has a chance to drain before more are considered), then the read
    /// side, matching the `Wait`-breaks-the-loop / `Fatal`-propagates
    /// pattern used throughout this crate's error handling. Even when only
    /// a write-readiness event fired, a frame that was already fully
    /// buffered from an earlier read becomes dispatchable the moment the
    /// pending reply drains, so that case is checked explicitly too.
    fn drive_connection(
        &mut self,
        slot: usize,
        readable: bool,
        writable: bool,
    ) -> Result<(), ErrorType> {
        if writable {
            Self::ready_op(|| self.write_ready(slot))?;
        }
        if readable {
            Self::ready_op(|| self.read_ready(slot))?;
        } else if writable {
            Self::ready_op(|| self.try_dispatch_one(slot))?;
        }
        self.update_write_interest(slot)?;
        Ok(())
    }

    #[inline]
    fn ready_op<F: FnMut() -> NetworkResult<()>>(mut op: F) -> Result<(), ErrorType> {
        loop {
            match op() {
                Ok(()) => continue,
                Err(NetworkError::Wait) => return Ok(()),
                Err(NetworkError::Fatal(err_type)) => return Err(err_type),
            }
        }
    }

    /// First drains any frame already fully buffered from a prior read
    /// (`try_dispatch_one`); only if that reports `NeedMore` does this read
    /// more bytes off the socket. Per the backpressure rule, bytes keep
    /// accumulating into the Receive Buffer even while a reply is queued —
    /// only *dispatch* is gated on the Transmit Buffer being empty — but a
    /// Receive Buffer that is full and still can't yield a dispatchable
    /// frame means either the peer is misbehaving (a frame whose declared
    /// `payload_len` can never fit this connection's configured capacity —
    /// `try_dispatch_one` would already have caught that) or the buffer is
    /// simply wedged; either way this connection can never make forward
    /// progress, so it's counted as a bad frame and destroyed rather than
    /// spun on forever.
    fn read_ready(&mut self, slot: usize) -> NetworkResult<()> {
        match self.try_dispatch_one(slot) {
            Err(NetworkError::Wait) => (),
            done => return done,
        }

        let conn = self.connections[slot].as_mut().expect("slot is occupied while registered");

        if conn.rx.free_capacity() == 0 {
            self.stats.record_bad_frame();
            return Err(NetworkError::Fatal(ErrorType::BufferFull));
        }

        let read = conn.rx.ingress(&mut conn.socket)?;
        if read == 0 {
            return Err(NetworkError::Fatal(ErrorType::Io(io::ErrorKind::UnexpectedEof)));
        }

        self.try_dispatch_one(slot)
    }

    /// Attempts to decode and dispatch exactly one frame from whatever is
    /// already sitting in the Receive Buffer. Never touches the socket.
    /// Returns `Wait` both when there isn't a complete frame yet and when
    /// there is one but the Transmit Buffer still holds an undrained reply
    /// — in both cases the caller should stop trying for this tick.
    fn try_dispatch_one(&mut self, slot: usize) -> NetworkResult<()> {
        let conn = self.connections[slot].as_mut().expect("slot is occupied while registered");

        if !conn.tx.is_empty() {
            return Err(NetworkError::Wait);
        }

        let decode_outcome =
            frame::try_decode(conn.rx.as_slice(), &mut conn.payload_scratch, conn.max_payload);
        match decode_outcome {
            DecodeOutcome::NeedMore => Err(NetworkError::Wait),
            DecodeOutcome::Corrupt => {
                self.stats.record_bad_frame();
                Err(NetworkError::Fatal(ErrorType::CrcMismatch))
            }
            DecodeOutcome::Decoded { header, payload_len, consumed } => {
                let payload = conn.payload_scratch[..payload_len].to_vec();
                conn.rx.consume(consumed);

                let started = Instant::now();
                let reply = dispatch::dispatch(
                    &header,
                    &payload,
                    &mut self.routing,
                    &mut self.stats,
                    &self.clock,
                    started,
                );

                trace!(self.logger, "dispatched frame"; "slot" => slot, "msg_type" => header.msg_type);

                let conn = self.connections[slot].as_mut().expect("slot is occupied while registered");
                // Reply framing is always version 1, flags 0, echoing the
                // request's seq — independent of whatever flags the request
                // itself carried.
                let mut wire = vec![0u8; frame::HEADER_SIZE + reply.payload.len()];
                let n = frame::encode(reply.msg_type, 0, header.seq, &reply.payload, &mut wire)
                    .expect("reply payload always fits a buffer sized for it");
                conn.tx
                    .queue(&wire[..n])
                    .map_err(|_| NetworkError::Fatal(ErrorType::BufferFull))?;

                Ok(())
            }
        }
    }

    fn write_ready(&mut self, slot: usize) -> NetworkResult<()> {
        let conn = self.connections[slot].as_mut().expect("slot is occupied while registered");
        if conn.tx.is_empty() {
            return Err(NetworkError::Wait);
        }

        conn.tx.egress(&mut conn.socket)?;
        Ok(())
    }

    /// Registers for write readiness only while a reply is queued, mirroring
    /// the per-connection buffer invariant in the data model.
    fn update_write_interest(&mut self, slot: usize) -> Result<(), ErrorType> {
        let conn = self.connections[slot].as_mut().expect("slot is occupied while registered");
        let want_writable = !conn.tx.is_empty();

        if want_writable == conn.writable_registered {
            return Ok(());
        }

        let interest = if want_writable {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };

        self.poll
            .registry()
            .reregister(&mut conn.socket, slot_token(slot), interest)
            .map_err(|e| ErrorType::Io(e.kind()))?;
        conn.writable_registered = want_writable;
        Ok(())
    }

    fn teardown_connection(&mut self, slot: usize, err_type: ErrorType) {
        if let Some(mut conn) = self.connections[slot].take() {
            let _ = self.poll.registry().deregister(&mut conn.socket);
            debug!(self.logger, "connection closed"; "peer" => %conn.peer_addr, "reason" => ?err_type);
        }
        self.free_slots.push(slot);
    }
}
