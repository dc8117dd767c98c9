//! Impaired stream connections

use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;

use crate::engine::WriteImpairment;
use crate::profile::ImpairmentProfile;
use crate::transport::StreamTransport;

/// Stream connection whose writes suffer bandwidth limits, latency and loss.
///
/// Writes return as soon as the payload is accepted; delivery happens later
/// or not at all. Reads, addresses and read deadlines go straight to the
/// wrapped connection.
///
/// ```no_run
/// use std::time::Duration;
///
/// use lossy_core::overhead::UDPV4_MIN_HEADER_OVERHEAD;
/// use lossy_core::transport::{StreamTransport, UdpStream};
/// use lossy_core::{ImpairmentProfile, LossyStream};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let socket = UdpStream::connect("127.0.0.1:0", "127.0.0.1:9000").await?;
/// let profile = ImpairmentProfile::new(
///     1024,
///     Duration::from_secs(1),
///     Duration::from_secs(2),
///     0.25,
///     UDPV4_MIN_HEADER_OVERHEAD,
/// )?;
/// let conn = LossyStream::new(socket, profile);
/// conn.write(b"maybe").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LossyStream<T> {
    engine: WriteImpairment<T>,
}

impl<T: StreamTransport> LossyStream<T> {
    pub fn new(inner: T, profile: ImpairmentProfile) -> Self {
        Self {
            engine: WriteImpairment::new(inner, profile),
        }
    }

    /// The wrapped connection.
    pub fn get_ref(&self) -> &T {
        self.engine.underlying()
    }

    pub fn profile(&self) -> &ImpairmentProfile {
        self.engine.profile()
    }
}

#[async_trait]
impl<T: StreamTransport> StreamTransport for LossyStream<T> {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.engine.underlying().read(buf).await
    }

    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.engine.schedule(buf, ()).await
    }

    async fn close(&self) -> io::Result<()> {
        let mut state = self.engine.state().await;
        state.mark_closed();
        tracing::debug!("Closing impaired stream");
        self.engine.underlying().close().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.engine.underlying().local_addr()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.engine.underlying().peer_addr()
    }

    async fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        let mut state = self.engine.state().await;
        state.set_write_deadline(deadline);
        self.engine.underlying().set_deadline(deadline).await
    }

    async fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.engine.underlying().set_read_deadline(deadline).await
    }

    async fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        let mut state = self.engine.state().await;
        state.set_write_deadline(deadline);
        self.engine.underlying().set_write_deadline(deadline).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_utils::RecordingTransport;

    #[tokio::test]
    async fn test_write_is_delivered_unchanged() {
        let conn = LossyStream::new(RecordingTransport::new(), ImpairmentProfile::transparent());

        assert_eq!(conn.write(&[1, 2, 3]).await.unwrap(), 3);
        let deliveries = conn
            .get_ref()
            .wait_for_deliveries(1, Duration::from_secs(1))
            .await;

        assert_eq!(deliveries[0].payload.as_ref(), &[1, 2, 3]);
        assert_eq!(deliveries[0].destination, None);
    }

    #[tokio::test]
    async fn test_close_then_write_fails() {
        let conn = LossyStream::new(RecordingTransport::new(), ImpairmentProfile::transparent());
        conn.close().await.unwrap();

        let err = conn.write(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(conn.close().await.is_err());
    }

    #[tokio::test]
    async fn test_expired_write_deadline_fails_synchronously() {
        let conn = LossyStream::new(
            RecordingTransport::new(),
            ImpairmentProfile::builder()
                .fixed_latency(Duration::from_millis(50))
                .build()
                .unwrap(),
        );

        conn.set_write_deadline(Some(Instant::now())).await.unwrap();
        let err = conn.write(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        // Clearing the deadline restores impaired, accepted writes
        conn.set_deadline(None).await.unwrap();
        assert_eq!(conn.write(b"ok").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_read_deadline_does_not_affect_writes() {
        let conn = LossyStream::new(RecordingTransport::new(), ImpairmentProfile::transparent());
        conn.set_read_deadline(Some(Instant::now())).await.unwrap();

        assert_eq!(conn.write(b"still fine").await.unwrap(), 10);
        let mut buf = [0u8; 4];
        let err = conn.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_reads_pass_through() {
        let conn = LossyStream::new(
            RecordingTransport::new(),
            ImpairmentProfile::latency_and_loss(Duration::ZERO, Duration::ZERO, 1.0).unwrap(),
        );
        conn.get_ref().push_inbound(b"incoming".to_vec());

        let mut buf = [0u8; 16];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"incoming");
    }
}
