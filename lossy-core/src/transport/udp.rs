//! UDP socket transports

use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;
use tokio::net::{ToSocketAddrs, UdpSocket};

use super::slot::SocketSlot;
use super::{DatagramTransport, StreamTransport};

/// Connected UDP socket used as a stream transport.
///
/// Each `write` sends one datagram to the connected peer and each `read`
/// receives one.
#[derive(Debug)]
pub struct UdpStream {
    slot: SocketSlot<UdpSocket>,
}

impl UdpStream {
    /// Binds to `local` and connects to `peer`.
    ///
    /// # Errors
    ///
    /// - `io::Error` - If binding or connecting the socket fails
    pub async fn connect(local: impl ToSocketAddrs, peer: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        Ok(Self::from_socket(socket))
    }

    /// Wraps an already connected socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            slot: SocketSlot::new(socket),
        }
    }
}

#[async_trait]
impl StreamTransport for UdpStream {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.slot
            .read_op(move |socket| async move { socket.recv(buf).await })
            .await
    }

    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.slot
            .write_op(move |socket| async move { socket.send(buf).await })
            .await
    }

    async fn close(&self) -> io::Result<()> {
        self.slot.close()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.slot.with(UdpSocket::local_addr)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.slot.with(UdpSocket::peer_addr)
    }

    async fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.slot.set_deadline(deadline)
    }

    async fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.slot.set_read_deadline(deadline)
    }

    async fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.slot.set_write_deadline(deadline)
    }
}

/// Unconnected UDP socket used as a datagram transport.
#[derive(Debug)]
pub struct UdpEndpoint {
    slot: SocketSlot<UdpSocket>,
}

impl UdpEndpoint {
    /// Binds a new endpoint.
    ///
    /// # Errors
    ///
    /// - `io::Error` - If binding the socket fails
    pub async fn bind(local: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        Ok(Self::from_socket(socket))
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            slot: SocketSlot::new(socket),
        }
    }
}

#[async_trait]
impl DatagramTransport for UdpEndpoint {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.slot
            .read_op(move |socket| async move { socket.recv_from(buf).await })
            .await
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.slot
            .write_op(move |socket| async move { socket.send_to(buf, target).await })
            .await
    }

    async fn close(&self) -> io::Result<()> {
        self.slot.close()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.slot.with(UdpSocket::local_addr)
    }

    async fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.slot.set_deadline(deadline)
    }

    async fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.slot.set_read_deadline(deadline)
    }

    async fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.slot.set_write_deadline(deadline)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn pair() -> (UdpEndpoint, UdpStream) {
        let endpoint = UdpEndpoint::bind("127.0.0.1:0").await.unwrap();
        let peer = endpoint.local_addr().unwrap();
        let stream = UdpStream::connect("127.0.0.1:0", peer).await.unwrap();
        (endpoint, stream)
    }

    #[tokio::test]
    async fn test_stream_to_endpoint_round_trip() {
        let (endpoint, stream) = pair().await;

        assert_eq!(stream.write(b"ping").await.unwrap(), 4);
        let mut buf = [0u8; 16];
        let (n, from) = endpoint.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, stream.local_addr().unwrap());

        endpoint.send_to(b"pong", from).await.unwrap();
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[tokio::test]
    async fn test_read_deadline_times_out() {
        let (endpoint, _stream) = pair().await;
        endpoint
            .set_read_deadline(Some(Instant::now() + Duration::from_millis(20)))
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        let err = endpoint.recv_from(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (endpoint, stream) = pair().await;
        stream.close().await.unwrap();

        assert!(stream.write(b"late").await.is_err());
        assert!(stream.local_addr().is_err());
        assert!(endpoint.send_to(b"ok", endpoint.local_addr().unwrap()).await.is_ok());
    }
}
