//! Datagram transport abstraction.
//!
//! All network I/O flows through the [`Transport`] trait: a single
//! `send` / `recv_timeout` pair that the driver loop polls.  The production
//! implementation is [`UdpTransport`], a connected blocking UDP socket with a
//! per-call read timeout; tests substitute an in-memory implementation that
//! scripts the central's half of the conversation.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

/// Default central endpoint.
pub const DEFAULT_HOST: &str = "slow.gmelodie.com";
pub const DEFAULT_PORT: u16 = 7033;

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// A bidirectional datagram channel to the central.
pub trait Transport {
    /// Send one datagram.
    fn send(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Wait up to `timeout` for one datagram.
    ///
    /// Returns `Ok(Some(len))` when a datagram of `len` bytes was written
    /// into `buf`, `Ok(None)` when the timeout elapsed with nothing to read,
    /// and `Err` for a genuine I/O failure.
    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;
}

// ---------------------------------------------------------------------------
// UdpTransport
// ---------------------------------------------------------------------------

/// Blocking UDP transport, connected to one remote endpoint.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Resolve `host` to an IPv4 socket address on `port`.
    pub fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
        (host, port)
            .to_socket_addrs()?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no IPv4 address found for {host}"),
                )
            })
    }

    /// Bind an ephemeral local port and connect it to `remote`.
    pub fn connect(remote: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(remote)?;
        Ok(Self { socket })
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        self.socket.send(buf)?;
        Ok(())
    }

    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        // set_read_timeout rejects a zero Duration.
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        match self.socket.recv(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
