//! Latency, bandwidth and integrity over real loopback sockets

use std::sync::Arc;
use std::time::{Duration, Instant};

use lossy_core::overhead::UDPV4_MIN_HEADER_OVERHEAD;
use lossy_core::transport::TcpTransport;
use lossy_core::{
    DatagramTransport, ImpairmentProfile, LossyDatagram, LossyStream, StreamTransport,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::common::{loopback_pair, random_messages};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_latency_stays_within_range() {
    const MIN_LATENCY: Duration = Duration::from_millis(10);
    const MAX_LATENCY: Duration = Duration::from_millis(100);
    const TOLERANCE: Duration = Duration::from_millis(15);
    const MESSAGE_COUNT: usize = 16;

    let (endpoint, stream) = loopback_pair().await;
    let stream_addr = stream.local_addr().unwrap();
    let profile = ImpairmentProfile::latency_and_loss(MIN_LATENCY, MAX_LATENCY, 0.0).unwrap();
    let stream = Arc::new(LossyStream::new(stream, profile));
    let endpoint = Arc::new(LossyDatagram::new(endpoint, profile));
    let messages = Arc::new(random_messages(MESSAGE_COUNT, 1024));

    // Stream -> endpoint
    let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
    let writer = {
        let stream = Arc::clone(&stream);
        let messages = Arc::clone(&messages);
        tokio::spawn(async move {
            for message in messages.iter() {
                stream.write(message).await.unwrap();
                sent_tx.send(Instant::now()).unwrap();
                // Keep deliveries in order
                tokio::time::sleep(MAX_LATENCY + Duration::from_millis(1)).await;
            }
        })
    };

    // Endpoint -> stream
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    let replier = {
        let endpoint = Arc::clone(&endpoint);
        let messages = Arc::clone(&messages);
        tokio::spawn(async move {
            for message in messages.iter() {
                endpoint.send_to(message, stream_addr).await.unwrap();
                reply_tx.send(Instant::now()).unwrap();
                tokio::time::sleep(MAX_LATENCY + Duration::from_millis(1)).await;
            }
        })
    };

    let stream_reader = {
        let stream = Arc::clone(&stream);
        let messages = Arc::clone(&messages);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            for expected in messages.iter() {
                let n = stream.read(&mut buf).await.unwrap();
                let latency = reply_rx.recv().await.unwrap().elapsed();
                assert_eq!(&buf[..n], &expected[..], "wrong message received");
                assert!(latency + Duration::from_millis(1) >= MIN_LATENCY, "latency too small: {latency:?}");
                assert!(latency <= MAX_LATENCY + TOLERANCE, "latency too large: {latency:?}");
            }
        })
    };

    let mut buf = vec![0u8; 2048];
    for expected in messages.iter() {
        let (n, from) = endpoint.recv_from(&mut buf).await.unwrap();
        let latency = sent_rx.recv().await.unwrap().elapsed();
        assert_eq!(from, stream_addr, "hijacked");
        assert_eq!(&buf[..n], &expected[..], "wrong message received");
        assert!(latency + Duration::from_millis(1) >= MIN_LATENCY, "latency too small: {latency:?}");
        assert!(latency <= MAX_LATENCY + TOLERANCE, "latency too large: {latency:?}");
    }

    writer.await.unwrap();
    replier.await.unwrap();
    stream_reader.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bandwidth_bounds_transmission_time() {
    const BANDWIDTH: i64 = 8 * 1024; // 64 Kbit/s
    const MESSAGE_COUNT: usize = 32;
    const MESSAGE_SIZE: usize = 1024;
    const TOLERANCE: Duration = Duration::from_millis(250);

    let ideal = Duration::from_secs_f64(
        (MESSAGE_COUNT * (MESSAGE_SIZE + UDPV4_MIN_HEADER_OVERHEAD)) as f64 / BANDWIDTH as f64,
    );

    let (endpoint, stream) = loopback_pair().await;
    let stream_addr = stream.local_addr().unwrap();
    let profile = ImpairmentProfile::new(
        BANDWIDTH,
        Duration::ZERO,
        Duration::ZERO,
        0.0,
        UDPV4_MIN_HEADER_OVERHEAD,
    )
    .unwrap();
    let stream = Arc::new(LossyStream::new(stream, profile));
    let endpoint = Arc::new(LossyDatagram::new(endpoint, profile));
    let messages = Arc::new(random_messages(MESSAGE_COUNT, MESSAGE_SIZE));

    let started = Instant::now();
    {
        let stream = Arc::clone(&stream);
        let messages = Arc::clone(&messages);
        tokio::spawn(async move {
            for message in messages.iter() {
                stream.write(message).await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });
    }
    {
        let endpoint = Arc::clone(&endpoint);
        let messages = Arc::clone(&messages);
        tokio::spawn(async move {
            for message in messages.iter() {
                endpoint.send_to(message, stream_addr).await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });
    }

    let stream_reader = {
        let stream = Arc::clone(&stream);
        let messages = Arc::clone(&messages);
        tokio::spawn(async move {
            let mut buf = vec![0u8; MESSAGE_SIZE];
            for expected in messages.iter() {
                let n = stream.read(&mut buf).await.unwrap();
                assert_eq!(n, MESSAGE_SIZE);
                assert_eq!(&buf[..], &expected[..]);
            }
        })
    };

    let mut buf = vec![0u8; MESSAGE_SIZE];
    for expected in messages.iter() {
        let (n, _) = endpoint.recv_from(&mut buf).await.unwrap();
        assert_eq!(n, MESSAGE_SIZE);
        assert_eq!(&buf[..], &expected[..]);
    }
    stream_reader.await.unwrap();

    let elapsed = started.elapsed();
    assert!(
        elapsed + Duration::from_millis(10) >= ideal,
        "transmission took {elapsed:?}, shorter than {ideal:?}"
    );
    assert!(
        elapsed <= ideal + TOLERANCE,
        "transmission took {elapsed:?}, longer than {ideal:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delivered_bytes_are_identical() {
    let (endpoint, stream) = loopback_pair().await;
    let profile = ImpairmentProfile::builder()
        .latency(Duration::ZERO, Duration::from_millis(20))
        .build()
        .unwrap();
    let stream = LossyStream::new(stream, profile);

    let mut sent: Vec<Vec<u8>> = (1..=64)
        .flat_map(|size| random_messages(1, size * 16))
        .collect();
    for message in &sent {
        stream.write(message).await.unwrap();
    }

    let mut received = Vec::new();
    let mut buf = vec![0u8; 2048];
    endpoint
        .set_read_deadline(Some(Instant::now() + Duration::from_secs(5)))
        .await
        .unwrap();
    while received.len() < sent.len() {
        let (n, _) = endpoint.recv_from(&mut buf).await.unwrap();
        received.push(buf[..n].to_vec());
    }

    // Jitter may reorder, never alter
    sent.sort();
    received.sort();
    assert_eq!(sent, received);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_are_not_impaired() {
    let (endpoint, stream) = loopback_pair().await;
    let stream_addr = stream.local_addr().unwrap();
    let stream = LossyStream::new(
        stream,
        ImpairmentProfile::latency_and_loss(Duration::from_secs(5), Duration::from_secs(5), 1.0)
            .unwrap(),
    );

    endpoint.send_to(b"inbound", stream_addr).await.unwrap();

    let mut buf = [0u8; 16];
    let started = Instant::now();
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"inbound");
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tcp_stream_is_delayed_in_order() {
    const LATENCY: Duration = Duration::from_millis(30);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = TcpTransport::connect(listener.local_addr().unwrap())
        .await
        .unwrap();
    let (accepted, _) = listener.accept().await.unwrap();
    let server = TcpTransport::from_stream(accepted);

    let client = LossyStream::new(
        client,
        ImpairmentProfile::builder().fixed_latency(LATENCY).build().unwrap(),
    );

    let started = Instant::now();
    client.write(b"hello ").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    client.write(b"world").await.unwrap();

    let mut received = Vec::new();
    let mut buf = [0u8; 64];
    let mut first_arrival = None;
    while received.len() < 11 {
        let n = server.read(&mut buf).await.unwrap();
        first_arrival.get_or_insert_with(|| started.elapsed());
        received.extend_from_slice(&buf[..n]);
    }

    assert_eq!(received, b"hello world");
    assert!(first_arrival.unwrap() >= LATENCY);
    assert_eq!(client.peer_addr().unwrap(), listener.local_addr().unwrap());
}
