//! Impaired datagram endpoints

use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;

use crate::engine::WriteImpairment;
use crate::profile::ImpairmentProfile;
use crate::transport::DatagramTransport;

/// Datagram endpoint whose sends suffer bandwidth limits, latency and loss.
///
/// Each delayed send goes to the address given to the original
/// [`send_to`](DatagramTransport::send_to). `recv_from` is untouched.
#[derive(Debug)]
pub struct LossyDatagram<T> {
    engine: WriteImpairment<T>,
}

impl<T: DatagramTransport> LossyDatagram<T> {
    pub fn new(inner: T, profile: ImpairmentProfile) -> Self {
        Self {
            engine: WriteImpairment::new(inner, profile),
        }
    }

    /// The wrapped endpoint.
    pub fn get_ref(&self) -> &T {
        self.engine.underlying()
    }

    pub fn profile(&self) -> &ImpairmentProfile {
        self.engine.profile()
    }
}

#[async_trait]
impl<T: DatagramTransport> DatagramTransport for LossyDatagram<T> {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.engine.underlying().recv_from(buf).await
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.engine.schedule(buf, target).await
    }

    async fn close(&self) -> io::Result<()> {
        let mut state = self.engine.state().await;
        state.mark_closed();
        tracing::debug!("Closing impaired datagram endpoint");
        self.engine.underlying().close().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.engine.underlying().local_addr()
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

    fn target(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_destination_is_threaded_through() {
        let endpoint = LossyDatagram::new(
            RecordingTransport::new(),
            ImpairmentProfile::builder()
                .fixed_latency(Duration::from_millis(10))
                .build()
                .unwrap(),
        );

        endpoint.send_to(b"a", target(5000)).await.unwrap();
        endpoint.send_to(b"b", target(6000)).await.unwrap();
        let mut deliveries = endpoint
            .get_ref()
            .wait_for_deliveries(2, Duration::from_secs(1))
            .await;
        deliveries.sort_by_key(|d| d.payload.clone());

        assert_eq!(deliveries[0].destination, Some(target(5000)));
        assert_eq!(deliveries[1].destination, Some(target(6000)));
    }

    #[tokio::test]
    async fn test_close_aborts_in_flight_sends() {
        let endpoint = LossyDatagram::new(
            RecordingTransport::new(),
            ImpairmentProfile::builder()
                .fixed_latency(Duration::from_millis(40))
                .build()
                .unwrap(),
        );

        endpoint.send_to(b"pending", target(5000)).await.unwrap();
        endpoint.close().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(endpoint.get_ref().delivery_count(), 0);
        let err = endpoint.send_to(b"late", target(5000)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_expired_deadline_bypasses_impairment() {
        let endpoint = LossyDatagram::new(
            RecordingTransport::new(),
            ImpairmentProfile::latency_and_loss(Duration::ZERO, Duration::ZERO, 1.0).unwrap(),
        );

        endpoint
            .set_deadline(Some(Instant::now() - Duration::from_millis(1)))
            .await
            .unwrap();
        let err = endpoint.send_to(b"x", target(5000)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_recv_from_passes_through() {
        let endpoint = LossyDatagram::new(RecordingTransport::new(), ImpairmentProfile::transparent());
        endpoint.get_ref().push_inbound(b"hi".to_vec());

        let mut buf = [0u8; 8];
        let (n, from) = endpoint.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hi");
        assert_eq!(from, RecordingTransport::PEER_ADDR);
        assert_eq!(endpoint.local_addr().unwrap(), RecordingTransport::LOCAL_ADDR);
    }
}
