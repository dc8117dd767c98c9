//! TCP stream transport

use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;
use tokio::net::{TcpStream, ToSocketAddrs};

use super::StreamTransport;
use super::slot::SocketSlot;

/// TCP connection as a stream transport.
///
/// `write` returns only once the whole buffer has been handed to the kernel.
#[derive(Debug)]
pub struct TcpTransport {
    slot: SocketSlot<TcpStream>,
}

impl TcpTransport {
    /// Connects to `peer`.
    ///
    /// # Errors
    ///
    /// - `io::Error` - If the connection cannot be established
    pub async fn connect(peer: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(peer).await?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            slot: SocketSlot::new(stream),
        }
    }
}

async fn read_some(stream: &TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        stream.readable().await?;
        match stream.try_read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}

async fn write_all(stream: &TcpStream, buf: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < buf.len() {
        stream.writable().await?;
        match stream.try_write(&buf[written..]) {
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}

#[async_trait]
impl StreamTransport for TcpTransport {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.slot
            .read_op(move |stream| async move { read_some(&stream, buf).await })
            .await
    }

    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.slot
            .write_op(move |stream| async move { write_all(&stream, buf).await })
            .await
    }

    async fn close(&self) -> io::Result<()> {
        self.slot.close()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.slot.with(TcpStream::local_addr)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.slot.with(TcpStream::peer_addr)
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
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn test_write_and_read_back() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpTransport::connect(addr).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();
        let server = TcpTransport::from_stream(accepted);

        let payload = vec![7u8; 64 * 1024];
        let writer = tokio::spawn(async move {
            let written = client.write(&payload).await.unwrap();
            (client, written)
        });

        let mut received = 0;
        let mut buf = vec![0u8; 8192];
        while received < 64 * 1024 {
            let n = server.read(&mut buf).await.unwrap();
            assert!(buf[..n].iter().all(|&b| b == 7));
            received += n;
        }

        let (client, written) = writer.await.unwrap();
        assert_eq!(written, 64 * 1024);
        assert_eq!(client.peer_addr().unwrap(), addr);
    }
}
