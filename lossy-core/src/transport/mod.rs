//! Transport abstraction for stream and datagram connections
//!
//! Both the real sockets and the impairing adapters implement these traits,
//! so a wrapped connection can be handed to code that expects the plain one.
//! Methods take `&self`: reads may run concurrently with writes, closes and
//! deadline updates.

pub(crate) mod slot;
pub mod tcp;
pub mod udp;

use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;
pub use tcp::TcpTransport;
pub use udp::{UdpEndpoint, UdpStream};

/// Connection-oriented byte transport.
///
/// Deadlines are absolute instants; `None` clears the deadline. An operation
/// started after its deadline fails with `io::ErrorKind::TimedOut`.
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    /// Reads bytes into `buf`, returning how many were read.
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes `buf` to the peer.
    async fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Closes the connection. Further operations fail.
    async fn close(&self) -> io::Result<()>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Sets both read and write deadlines.
    async fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;

    async fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;

    async fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;
}

/// Connectionless datagram transport where each send names its destination.
#[async_trait]
pub trait DatagramTransport: Send + Sync + 'static {
    /// Receives one datagram, returning its length and sender.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Sends one datagram to `target`.
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Closes the endpoint. Further operations fail.
    async fn close(&self) -> io::Result<()>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Sets both read and write deadlines.
    async fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;

    async fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;

    async fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;
}

/// The real send an impairment engine eventually performs.
///
/// `D` is the destination a write carries: `()` for streams, the peer
/// address for datagrams.
#[async_trait]
pub trait Deliver<D>: Send + Sync + 'static {
    async fn deliver(&self, payload: &[u8], destination: D) -> io::Result<usize>;
}

#[async_trait]
impl<T: StreamTransport> Deliver<()> for T {
    async fn deliver(&self, payload: &[u8], _destination: ()) -> io::Result<usize> {
        self.write(payload).await
    }
}

#[async_trait]
impl<T: DatagramTransport> Deliver<SocketAddr> for T {
    async fn deliver(&self, payload: &[u8], destination: SocketAddr) -> io::Result<usize> {
        self.send_to(payload, destination).await
    }
}

/// Error returned by operations on a closed transport.
pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "use of closed connection")
}

/// Error returned by operations whose deadline has passed.
pub(crate) fn timeout_error() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "i/o timeout")
}
