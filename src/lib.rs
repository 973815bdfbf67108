//! A user-space TCP endpoint.
//!
//! [`tcp`] holds the protocol engine: sequence-space arithmetic, a bounded
//! byte stream, an out-of-order reassembler, and the sender, receiver, and
//! connection state machines. They are driven entirely by incoming segments
//! and elapsed-time ticks.
//!
//! [`Interface`] is a driver for that engine over a Linux TUN device. It
//! runs one connection at a time on a background thread and hands it out as
//! a blocking [`TcpStream`].

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use rand::Rng;
use std::{
    io,
    net::{Ipv4Addr, Shutdown},
    os::fd::{AsRawFd, BorrowedFd},
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, error, trace, warn};

pub mod config;
pub mod error;
pub mod tcp;

pub use config::Config;
pub use error::{Error, Result};
pub use tcp::connection::{Connection, Tcp4Tuple};
pub use tcp::segment::{Flags, Header, Segment};
pub use tcp::sequence::{unwrap, wrap, SeqNo};
pub use tcp::state::State;
pub use tcp::stream::ByteStream;

use tcp::state::Available;

const BUFFER_SIZE: usize = 1504;
const TICK_MS: u16 = 10;
const EPHEMERAL_PORTS: std::ops::RangeInclusive<u16> = 49152..=65535;

/// Type for handling interface requests
type InterfaceHandle = Arc<InterfaceManager>;

struct InterfaceManager {
    manager: Mutex<ConnectionManager>,
    pending_var: Condvar,
    receive_var: Condvar,
    send_var: Condvar,
}

impl InterfaceManager {
    fn new(local: Ipv4Addr, config: Config) -> Self {
        InterfaceManager {
            manager: Mutex::new(ConnectionManager {
                local,
                config,
                listening: None,
                session: None,
                terminate: false,
                failed: false,
            }),
            pending_var: Condvar::new(),
            receive_var: Condvar::new(),
            send_var: Condvar::new(),
        }
    }

    /// Marks the packet loop as gone and wakes every waiter so it can
    /// observe that.
    fn fail(&self) {
        if let Ok(mut cm) = self.manager.lock() {
            cm.failed = true;
        }
        self.pending_var.notify_all();
        self.receive_var.notify_all();
        self.send_var.notify_all();
    }

    fn lock(&self) -> Result<MutexGuard<'_, ConnectionManager>> {
        self.manager.lock().map_err(|_| Error::Poisoned)
    }

    fn wait<'a>(
        &self,
        var: &Condvar,
        guard: MutexGuard<'a, ConnectionManager>,
    ) -> Result<MutexGuard<'a, ConnectionManager>> {
        var.wait(guard).map_err(|_| Error::Poisoned)
    }
}

/// The connection carried by an interface, if any.
struct Session {
    quad: Tcp4Tuple,
    conn: Connection,
    /// Handed out as a `TcpStream`.
    claimed: bool,
    /// The `TcpStream` was dropped.
    detached: bool,
}

struct ConnectionManager {
    local: Ipv4Addr,
    config: Config,
    listening: Option<u16>,
    session: Option<Session>,
    // flag to terminate
    terminate: bool,
    /// The packet loop exited with an error.
    failed: bool,
}

impl ConnectionManager {
    fn on_segment(&mut self, quad: Tcp4Tuple, seg: &Segment) {
        match self.session.as_mut() {
            Some(session) if session.quad == quad => session.conn.segment_received(seg),
            Some(_) => trace!(?quad, "segment for another connection"),
            None => {
                if quad.src.0 != self.local || self.listening != Some(quad.src.1) || !seg.syn() {
                    trace!(?quad, "no listener for segment");
                    return;
                }
                let mut conn = Connection::new(self.config.clone());
                conn.segment_received(seg);
                debug!(?quad, "incoming connection");
                self.session = Some(Session {
                    quad,
                    conn,
                    claimed: false,
                    detached: false,
                });
            }
        }
    }

    /// Forgets a finished connection nobody holds on to.
    fn reap(&mut self) {
        if let Some(session) = &self.session {
            if !session.conn.active() && (session.detached || !session.claimed) {
                debug!(quad = ?session.quad, state = ?session.conn.state(), "connection released");
                self.session = None;
            }
        }
    }

    fn check_alive(&self) -> io::Result<()> {
        if self.failed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "Interface is down"));
        }
        Ok(())
    }

    fn connection(&mut self) -> io::Result<&mut Connection> {
        self.check_alive()?;
        self.session
            .as_mut()
            .map(|session| &mut session.conn)
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "Connection closed"))
    }
}

/// Struct that acts as an interface to the tcp implementation.
/// Essentially, it owns the thread that moves segments between the TUN
/// device and the connection, and a handle to the shared connection state.
pub struct Interface {
    ih: InterfaceHandle,
    jh: Option<thread::JoinHandle<Result<()>>>,
}

fn transmit(nic: &tun_tap::Iface, session: &mut Session) -> Result<()> {
    let quad = session.quad;
    while let Some(seg) = session.conn.segments_out_mut().pop_front() {
        nic.send(&seg.serialize(&quad)?)?;
    }
    Ok(())
}

fn packet_loop(nic: tun_tap::Iface, ih: InterfaceHandle) -> Result<()> {
    let mut buf = [0u8; BUFFER_SIZE];
    let mut last_tick = Instant::now();

    loop {
        let readable = {
            // SAFETY: `nic` owns the descriptor and outlives the borrow.
            let fd = unsafe { BorrowedFd::borrow_raw(nic.as_raw_fd()) };
            let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
            poll(&mut fds, PollTimeout::from(TICK_MS))? > 0
        };
        let received = if readable {
            Some(nic.recv(&mut buf[..])?)
        } else {
            None
        };

        let mut cm = ih.lock()?;
        if cm.terminate {
            if let Some(session) = cm.session.as_mut() {
                if session.conn.active() {
                    session.conn.abort();
                }
                transmit(&nic, session)?;
            }
            return Ok(());
        }

        if let Some(nbytes) = received {
            match Segment::parse(&buf[..nbytes]) {
                Ok((quad, seg)) => cm.on_segment(quad, &seg),
                Err(e) => trace!("Ignoring datagram. len:{} Err: {}", nbytes, e),
            }
        }

        let elapsed = last_tick.elapsed().as_millis() as u64;
        last_tick += Duration::from_millis(elapsed);

        let mut avail = Available::empty();
        if let Some(session) = cm.session.as_mut() {
            session.conn.tick(elapsed);
            transmit(&nic, session)?;
            avail = session.conn.availability();
        }
        cm.reap();
        // Release the lock so the woken threads can use it
        drop(cm);

        if avail.contains(Available::READ) {
            ih.receive_var.notify_all();
        }
        if avail.contains(Available::WRITE) {
            ih.send_var.notify_all();
        }
        ih.pending_var.notify_all();
    }
}

impl Interface {
    /// Opens the TUN device `name` and serves connections for `local`.
    pub fn new(name: &str, local: Ipv4Addr, config: Config) -> Result<Self> {
        let nic = tun_tap::Iface::without_packet_info(name, tun_tap::Mode::Tun)?;
        let ih: InterfaceHandle = Arc::new(InterfaceManager::new(local, config));

        let jh = {
            let ih = ih.clone();
            Some(thread::spawn(move || {
                let result = packet_loop(nic, ih.clone());
                if let Err(e) = &result {
                    error!("packet loop failed: {}", e);
                    ih.fail();
                }
                result
            }))
        };

        Ok(Interface { ih, jh })
    }

    /// Starts accepting connections on `port`.
    pub fn bind(&mut self, port: u16) -> Result<TcpListener> {
        let mut cm = self.ih.lock()?;
        if let Some(bound) = cm.listening {
            return Err(Error::AddrInUse(bound));
        }
        cm.listening = Some(port);
        Ok(TcpListener {
            ih: self.ih.clone(),
        })
    }

    /// Opens a connection to `remote:port` and waits for the handshake to
    /// finish.
    pub fn connect(&mut self, remote: Ipv4Addr, port: u16) -> Result<TcpStream> {
        let mut cm = self.ih.lock()?;
        if cm.session.is_some() {
            return Err(io::Error::new(io::ErrorKind::AddrInUse, "a connection is already open").into());
        }

        let quad = Tcp4Tuple {
            src: (cm.local, rand::thread_rng().gen_range(EPHEMERAL_PORTS)),
            dst: (remote, port),
        };
        let mut conn = Connection::new(cm.config.clone());
        conn.connect();
        debug!(?quad, "connecting");
        cm.session = Some(Session {
            quad,
            conn,
            claimed: true,
            detached: false,
        });

        loop {
            cm.check_alive()?;
            match cm.session.as_mut() {
                Some(session) if !session.conn.active() => {
                    session.detached = true;
                    return Err(io::Error::from(io::ErrorKind::ConnectionRefused).into());
                }
                Some(session) if session.conn.state().is_synchronized() => break,
                Some(_) => {}
                None => return Err(io::Error::from(io::ErrorKind::ConnectionAborted).into()),
            }
            cm = self.ih.wait(&self.ih.pending_var, cm)?;
        }

        Ok(TcpStream {
            ih: self.ih.clone(),
        })
    }
}

impl Drop for Interface {
    fn drop(&mut self) {
        if let Ok(mut cm) = self.ih.manager.lock() {
            cm.terminate = true;
        }
        if let Some(jh) = self.jh.take() {
            match jh.join() {
                Ok(Ok(())) => {}
                // already logged by the thread
                Ok(Err(_)) => {}
                Err(_) => warn!("packet loop panicked"),
            }
        }
    }
}

pub struct TcpListener {
    ih: InterfaceHandle,
}

impl TcpListener {
    /// Blocks until a peer has opened a connection.
    pub fn accept(&mut self) -> Result<TcpStream> {
        let mut cm = self.ih.lock()?;
        loop {
            cm.check_alive()?;
            if let Some(session) = cm.session.as_mut() {
                if !session.claimed {
                    session.claimed = true;
                    return Ok(TcpStream {
                        ih: self.ih.clone(),
                    });
                }
            }
            // Block for connections
            cm = self.ih.wait(&self.ih.pending_var, cm)?;
        }
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        if let Ok(mut cm) = self.ih.manager.lock() {
            cm.listening = None;
        }
    }
}

pub struct TcpStream {
    ih: InterfaceHandle,
}

impl io::Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut cm = self.ih.lock()?;
        loop {
            let inbound = cm.connection()?.inbound_stream_mut();
            if !inbound.buffer_empty() {
                let data = inbound.read(buf.len());
                buf[..data.len()].copy_from_slice(&data);
                return Ok(data.len());
            }
            if inbound.error() {
                return Err(io::ErrorKind::ConnectionReset.into());
            }
            if inbound.eof() {
                // No more data to read
                return Ok(0);
            }
            cm = self.ih.wait(&self.ih.receive_var, cm)?;
        }
    }
}

impl io::Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut cm = self.ih.lock()?;
        loop {
            let conn = cm.connection()?;
            if !conn.active() || conn.outbound_stream().input_ended() {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            if conn.remaining_outbound_capacity() > 0 {
                return Ok(conn.write(buf));
            }
            cm = self.ih.wait(&self.ih.send_var, cm)?;
        }
    }

    /// Blocks until everything written so far has been acknowledged.
    fn flush(&mut self) -> io::Result<()> {
        let mut cm = self.ih.lock()?;
        loop {
            let conn = cm.connection()?;
            if conn.outbound_stream().error() {
                return Err(io::ErrorKind::ConnectionReset.into());
            }
            if conn.outbound_stream().buffer_empty() && conn.bytes_in_flight() == 0 {
                return Ok(());
            }
            cm = self.ih.wait(&self.ih.send_var, cm)?;
        }
    }
}

impl TcpStream {
    /// Shutting down the write half sends a FIN once the buffered bytes are
    /// out. The read half has nothing to shut down.
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        if let Shutdown::Write | Shutdown::Both = how {
            let mut cm = self.ih.lock()?;
            cm.connection()?.end_input_stream();
        }
        Ok(())
    }

    /// RFC 793 name of the connection's current state.
    pub fn state(&self) -> io::Result<State> {
        let mut cm = self.ih.lock()?;
        Ok(cm.connection()?.state())
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        if let Ok(mut cm) = self.ih.manager.lock() {
            if let Some(session) = cm.session.as_mut() {
                session.conn.end_input_stream();
                session.detached = true;
            }
        }
    }
}
