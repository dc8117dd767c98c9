//! Shared helpers for integration tests

use std::time::Duration;

use lossy_core::DatagramTransport;
use lossy_core::test_utils::RecordingTransport;
use lossy_core::transport::{UdpEndpoint, UdpStream};
use rand::Rng;

/// Binds an unconnected endpoint and a stream connected to it, both on loopback.
pub async fn loopback_pair() -> (UdpEndpoint, UdpStream) {
    let endpoint = UdpEndpoint::bind("127.0.0.1:0").await.unwrap();
    let stream = UdpStream::connect("127.0.0.1:0", endpoint.local_addr().unwrap())
        .await
        .unwrap();
    (endpoint, stream)
}

pub fn random_messages(count: usize, size: usize) -> Vec<Vec<u8>> {
    let mut rng = rand::rng();
    (0..count)
        .map(|_| {
            let mut message = vec![0u8; size];
            rng.fill(&mut message[..]);
            message
        })
        .collect()
}

/// Waits until the delivery count stops changing, up to `limit`.
pub async fn wait_until_settled(transport: &RecordingTransport, limit: Duration) -> usize {
    let started = std::time::Instant::now();
    let mut last = transport.delivery_count();
    loop {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let now = transport.delivery_count();
        if now == last || started.elapsed() > limit {
            return now;
        }
        last = now;
    }
}
